// src/security/password.rs - Password policy and credential comparison
use log::debug;
use subtle::ConstantTimeEq;

use crate::error::{AuthError, Result};

pub const MIN_PASSWORD_LENGTH: usize = 8;

/// Check a new password: at least 8 characters with a letter, an ASCII
/// digit and a symbol (anything that is neither, whitespace included).
pub fn validate_password_policy(password: &str) -> Result<()> {
    let long_enough = password.chars().count() >= MIN_PASSWORD_LENGTH;
    let has_letter = password.chars().any(char::is_alphabetic);
    let has_digit = password.chars().any(|c| c.is_ascii_digit());
    let has_symbol = password
        .chars()
        .any(|c| !c.is_alphabetic() && !c.is_ascii_digit());

    if long_enough && has_letter && has_digit && has_symbol {
        Ok(())
    } else {
        debug!(
            "Password rejected by policy (length ok: {}, letter: {}, digit: {}, symbol: {})",
            long_enough, has_letter, has_digit, has_symbol
        );
        Err(AuthError::WeakPassword)
    }
}

/// Compare a submitted secret with the stored one.
///
/// The accounts backend stores secrets in the clear, so this is a direct
/// comparison. A hashed credential store would replace this function and the
/// `Account::password` field together.
pub fn verify_secret(submitted: &str, stored: &str) -> bool {
    submitted.as_bytes().ct_eq(stored.as_bytes()).into()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_policy_accepts_strong_password() {
        assert!(validate_password_policy("Passw0rd!").is_ok());
        assert!(validate_password_policy("abc123#$").is_ok());
    }

    #[test]
    fn test_policy_counts_space_as_symbol() {
        assert!(validate_password_policy("abcdefg1 ").is_ok());
        assert!(validate_password_policy("my pass 42").is_ok());
        // a non-ASCII numeral is not a digit, so it only fills the symbol slot
        assert!(validate_password_policy("abcdefg1\u{0663}").is_ok());
        assert_eq!(validate_password_policy("abcdefgh\u{0663}"), Err(AuthError::WeakPassword));
    }

    #[test]
    fn test_policy_rejects_each_missing_class() {
        assert_eq!(validate_password_policy("Pa0!"), Err(AuthError::WeakPassword));
        assert_eq!(validate_password_policy("Password!"), Err(AuthError::WeakPassword));
        assert_eq!(validate_password_policy("12345678!"), Err(AuthError::WeakPassword));
        assert_eq!(validate_password_policy("Passw0rd1"), Err(AuthError::WeakPassword));
        assert_eq!(validate_password_policy(""), Err(AuthError::WeakPassword));
    }

    #[test]
    fn test_verify_secret() {
        assert!(verify_secret("Passw0rd!", "Passw0rd!"));
        assert!(!verify_secret("Passw0rd", "Passw0rd!"));
        assert!(!verify_secret("passw0rd!", "Passw0rd!"));
        assert!(!verify_secret("", "x"));
    }
}

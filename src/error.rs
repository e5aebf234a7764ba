// src/error.rs - Error taxonomy for the authentication core
use thiserror::Error;

/// Errors surfaced by the authentication and risk core.
///
/// User-facing variants are meant to be shown next to the control that
/// triggered them; the flow that produced them stays on its current step.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AuthError {
    #[error("Invalid email or password")]
    InvalidCredentials,

    #[error("Password must be at least 8 characters and contain a letter, a digit and a symbol")]
    WeakPassword,

    #[error("An account with this email already exists")]
    DuplicateAccount,

    #[error("Invalid or expired one-time code")]
    InvalidOtp,

    #[error("Platform authenticator is not available on this device")]
    BiometricUnavailable,

    #[error("Biometric verification was cancelled")]
    BiometricCancelled,

    #[error("Biometric verification did not match")]
    BiometricMismatch,

    #[error("Network error: {0}")]
    NetworkError(String),

    #[error("Enrollment aborted: the email changed between samples")]
    EnrollmentAborted,

    #[error("Please wait {remaining_secs}s before requesting another code")]
    OtpCooldown { remaining_secs: u64 },

    #[error("A request is already in progress")]
    InProgress,

    #[error("Operation not available at this step")]
    InvalidStep,

    #[error("Storage error: {0}")]
    Storage(String),
}

impl AuthError {
    /// Whether the user can retry the same action without changing anything.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            AuthError::NetworkError(_)
                | AuthError::BiometricCancelled
                | AuthError::BiometricMismatch
                | AuthError::InProgress
                | AuthError::OtpCooldown { .. }
        )
    }
}

impl From<serde_json::Error> for AuthError {
    fn from(err: serde_json::Error) -> Self {
        AuthError::Storage(err.to_string())
    }
}

impl From<std::io::Error> for AuthError {
    fn from(err: std::io::Error) -> Self {
        AuthError::Storage(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, AuthError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classification() {
        assert!(AuthError::NetworkError("timeout".to_string()).is_retryable());
        assert!(AuthError::BiometricCancelled.is_retryable());
        assert!(!AuthError::WeakPassword.is_retryable());
        assert!(!AuthError::DuplicateAccount.is_retryable());
    }

    #[test]
    fn test_cooldown_message_includes_remaining() {
        let err = AuthError::OtpCooldown { remaining_secs: 12 };
        assert_eq!(err.to_string(), "Please wait 12s before requesting another code");
    }
}

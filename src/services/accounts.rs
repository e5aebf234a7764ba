// src/services/accounts.rs - Account store collaborator
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use log::info;
use parking_lot::RwLock;

use crate::error::{AuthError, Result};
use crate::models::Account;
use crate::services::otp::OtpService;
use crate::utils::mask_email;

#[async_trait]
pub trait AccountsService: Send + Sync {
    async fn list_accounts(&self) -> Result<Vec<Account>>;

    /// Fails with `DuplicateAccount` when the email is already registered.
    async fn create_account(&self, account: Account) -> Result<()>;

    /// Replace the stored secret after validating `otp` for `email`.
    async fn reset_password(&self, email: &str, otp: &str, new_password: &str) -> Result<()>;
}

/// Reference account store kept in memory, validating reset codes through
/// the OTP collaborator.
pub struct InMemoryAccounts {
    accounts: RwLock<Vec<Account>>,
    otp: Arc<dyn OtpService>,
    unavailable: AtomicBool,
}

impl InMemoryAccounts {
    pub fn new(otp: Arc<dyn OtpService>) -> Self {
        InMemoryAccounts {
            accounts: RwLock::new(Vec::new()),
            otp,
            unavailable: AtomicBool::new(false),
        }
    }

    pub fn with_accounts(otp: Arc<dyn OtpService>, accounts: Vec<Account>) -> Self {
        let store = Self::new(otp);
        *store.accounts.write() = accounts;
        store
    }

    /// Simulate the backend being unreachable.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    pub fn count(&self) -> usize {
        self.accounts.read().len()
    }

    pub fn get(&self, email: &str) -> Option<Account> {
        self.accounts.read().iter().find(|a| a.has_email(email)).cloned()
    }

    fn ensure_available(&self) -> Result<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(AuthError::NetworkError("accounts service unreachable".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl AccountsService for InMemoryAccounts {
    async fn list_accounts(&self) -> Result<Vec<Account>> {
        self.ensure_available()?;
        Ok(self.accounts.read().clone())
    }

    async fn create_account(&self, account: Account) -> Result<()> {
        self.ensure_available()?;

        let mut accounts = self.accounts.write();
        if accounts.iter().any(|a| a.has_email(&account.email)) {
            return Err(AuthError::DuplicateAccount);
        }

        info!("Created account for {}", mask_email(&account.email));
        accounts.push(account);
        Ok(())
    }

    async fn reset_password(&self, email: &str, otp: &str, new_password: &str) -> Result<()> {
        self.ensure_available()?;

        if !self.accounts.read().iter().any(|a| a.has_email(email)) {
            return Err(AuthError::InvalidCredentials);
        }

        if !self.otp.verify_otp(email, otp).await? {
            return Err(AuthError::InvalidOtp);
        }

        let mut accounts = self.accounts.write();
        if let Some(account) = accounts.iter_mut().find(|a| a.has_email(email)) {
            account.password = new_password.to_string();
            info!("Password reset for {}", mask_email(email));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::otp::InMemoryOtpService;

    fn seeded() -> (Arc<InMemoryOtpService>, InMemoryAccounts) {
        let otp = Arc::new(InMemoryOtpService::new());
        let accounts = InMemoryAccounts::with_accounts(
            otp.clone(),
            vec![Account::new("Asha", "asha", "a@bank.com", "Passw0rd!")],
        );
        (otp, accounts)
    }

    #[tokio::test]
    async fn test_duplicate_email_is_rejected_case_insensitively() {
        let (_, accounts) = seeded();
        let result = accounts
            .create_account(Account::new("Other", "other", "A@BANK.com", "Xyz12345!"))
            .await;

        assert_eq!(result, Err(AuthError::DuplicateAccount));
        assert_eq!(accounts.count(), 1);
    }

    #[tokio::test]
    async fn test_reset_password_requires_valid_otp() {
        let (otp, accounts) = seeded();

        let result = accounts.reset_password("a@bank.com", "000000", "N3w-pass!").await;
        assert_eq!(result, Err(AuthError::InvalidOtp));

        otp.send_otp("a@bank.com").await.unwrap();
        let code = otp.outbox("a@bank.com").unwrap();
        accounts.reset_password("a@bank.com", &code, "N3w-pass!").await.unwrap();

        assert_eq!(accounts.get("a@bank.com").unwrap().password, "N3w-pass!");
    }

    #[tokio::test]
    async fn test_unavailable_backend_reports_network_error() {
        let (_, accounts) = seeded();
        accounts.set_unavailable(true);

        assert!(matches!(
            accounts.list_accounts().await,
            Err(AuthError::NetworkError(_))
        ));
    }
}

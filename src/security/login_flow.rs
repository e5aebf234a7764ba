// src/security/login_flow.rs - Step-up login: email, typing rhythm, password, OTP
//
// Email step: the typing sample decides the next step. A recognised or not
// yet enrolled rhythm goes to the password step; a mismatch demands password
// plus a one-time code. Every failure keeps the flow on its current step.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use log::{debug, info, warn};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use serde_json::json;
use tokio::time::Instant;

use crate::error::{AuthError, Result};
use crate::models::{find_account, Account, CurrentUser, CURRENT_USER_KEY, DASHBOARD_PATH, JUST_LOGGED_IN_KEY};
use crate::security::behavioral_biometrics::TypingPattern;
use crate::security::password::{validate_password_policy, verify_secret};
use crate::security::risk_engine::{RiskEngine, RiskSignal};
use crate::services::{
    with_timeout, AccountsService, BiometricMatch, OtpService, SecurityAction, SecurityAudit,
    TypingBiometricService,
};
use crate::storage::{set_json, KeyValueStore};
use crate::utils::mask_email;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LoginStep {
    Email,
    Password,
    /// Password plus one-time code, after a typing-rhythm mismatch
    Otp,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthMode {
    Login,
    Create,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LoginAttemptState {
    pub mode: AuthMode,
    pub step: LoginStep,
    pub email: Option<String>,
    pub email_locked: bool,
    pub forgot_mode: bool,
    pub otp_sent_at: Option<Instant>,
    pub prefilled_password: Option<String>,
}

impl LoginAttemptState {
    fn fresh(mode: AuthMode) -> Self {
        LoginAttemptState {
            mode,
            step: LoginStep::Email,
            email: None,
            email_locked: false,
            forgot_mode: false,
            otp_sent_at: None,
            prefilled_password: None,
        }
    }
}

/// Result of a completed login
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SessionEstablished {
    pub user: CurrentUser,
    pub redirect: &'static str,
}

// Clears the busy flag when the request finishes, whatever the outcome
struct BusyGuard<'a>(&'a AtomicBool);

impl Drop for BusyGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

pub struct StepUpAuthFlow {
    accounts_service: Arc<dyn AccountsService>,
    otp: Arc<dyn OtpService>,
    typing: Arc<dyn TypingBiometricService>,
    session: Arc<dyn KeyValueStore>,
    risk: Option<Arc<RiskEngine>>,
    audit: SecurityAudit,
    request_timeout: Duration,
    otp_cooldown: Duration,
    accounts: RwLock<Vec<Account>>,
    state: Mutex<LoginAttemptState>,
    busy: AtomicBool,
}

impl StepUpAuthFlow {
    pub fn new(
        accounts_service: Arc<dyn AccountsService>,
        otp: Arc<dyn OtpService>,
        typing: Arc<dyn TypingBiometricService>,
        session: Arc<dyn KeyValueStore>,
        audit: SecurityAudit,
        request_timeout: Duration,
        otp_cooldown: Duration,
    ) -> Self {
        StepUpAuthFlow {
            accounts_service,
            otp,
            typing,
            session,
            risk: None,
            audit,
            request_timeout,
            otp_cooldown,
            accounts: RwLock::new(Vec::new()),
            state: Mutex::new(LoginAttemptState::fresh(AuthMode::Login)),
            busy: AtomicBool::new(false),
        }
    }

    /// Report typing-rhythm mismatches to the risk engine.
    pub fn with_risk_engine(mut self, risk: Arc<RiskEngine>) -> Self {
        self.risk = Some(risk);
        self
    }

    pub fn state(&self) -> LoginAttemptState {
        self.state.lock().clone()
    }

    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::SeqCst)
    }

    fn begin(&self) -> Result<BusyGuard<'_>> {
        self.busy
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .map_err(|_| AuthError::InProgress)?;
        Ok(BusyGuard(&self.busy))
    }

    fn locked_email(&self, allowed: &[LoginStep]) -> Result<String> {
        let state = self.state.lock();
        if state.mode != AuthMode::Login || !allowed.contains(&state.step) {
            return Err(AuthError::InvalidStep);
        }
        state.email.clone().ok_or(AuthError::InvalidStep)
    }

    fn cached_account(&self, email: &str) -> Option<Account> {
        find_account(&self.accounts.read(), email).cloned()
    }

    /// Fetch the account list. On failure the cache is left empty and every
    /// later login fails as `InvalidCredentials`.
    pub async fn load_accounts(&self) -> Result<usize> {
        match with_timeout(
            self.request_timeout,
            "account list",
            self.accounts_service.list_accounts(),
        )
        .await
        {
            Ok(accounts) => {
                let count = accounts.len();
                *self.accounts.write() = accounts;
                debug!("Loaded {} accounts", count);
                Ok(count)
            }
            Err(e) => {
                warn!("Failed to load accounts: {}", e);
                self.accounts.write().clear();
                Err(e)
            }
        }
    }

    pub async fn submit_email(&self, email: &str, pattern: &TypingPattern) -> Result<LoginStep> {
        {
            let state = self.state.lock();
            if state.mode != AuthMode::Login || state.step != LoginStep::Email || state.forgot_mode {
                return Err(AuthError::InvalidStep);
            }
        }
        let _busy = self.begin()?;

        let email = email.trim();
        self.audit.record(
            SecurityAction::EmailVerificationAttempt,
            Some(email),
            json!({ "keystrokes": pattern.keystroke_count() }),
        );

        let account = match self.cached_account(email) {
            Some(account) => account,
            None => {
                info!("Login attempt for unknown email {}", mask_email(email));
                self.audit.record(SecurityAction::LoginAttemptFailedEmailNotFound, Some(email), json!({}));
                return Err(AuthError::InvalidCredentials);
            }
        };

        let verdict = with_timeout(
            self.request_timeout,
            "typing biometric verification",
            self.typing.verify(&account.email, pattern),
        )
        .await?;

        let next = match verdict {
            BiometricMatch::Enrolled { sample_count } => {
                debug!("Typing sample {} stored for {}", sample_count, mask_email(&account.email));
                LoginStep::Password
            }
            BiometricMatch::Verified { matched: true } => {
                self.audit.record(SecurityAction::TypingBiometricMatch, Some(&account.email), json!({}));
                LoginStep::Password
            }
            BiometricMatch::Verified { matched: false } => {
                warn!("Typing rhythm mismatch for {}, requiring OTP", mask_email(&account.email));
                self.audit.record(SecurityAction::TypingBiometricMismatch, Some(&account.email), json!({}));
                if let Some(risk) = &self.risk {
                    risk.set_signal(RiskSignal::TypingAnomaly, true);
                }
                LoginStep::Otp
            }
        };

        let mut state = self.state.lock();
        state.step = next;
        state.email = Some(account.email.clone());
        state.email_locked = true;
        Ok(next)
    }

    pub async fn submit_password(&self, password: &str) -> Result<SessionEstablished> {
        let email = self.locked_email(&[LoginStep::Password])?;
        let _busy = self.begin()?;

        let account = self.check_password(&email, password)?;
        self.establish_session(&account)
    }

    /// Seconds left before another code may be requested.
    pub fn cooldown_remaining(&self) -> Duration {
        match self.state.lock().otp_sent_at {
            Some(sent_at) => self.otp_cooldown.saturating_sub(sent_at.elapsed()),
            None => Duration::ZERO,
        }
    }

    /// Send a code to the locked email. One send per cooldown window.
    pub async fn request_otp(&self) -> Result<()> {
        let email = {
            let state = self.state.lock();
            if state.mode != AuthMode::Login || !(state.step == LoginStep::Otp || state.forgot_mode) {
                return Err(AuthError::InvalidStep);
            }
            state.email.clone().ok_or(AuthError::InvalidStep)?
        };

        let remaining = self.cooldown_remaining();
        if !remaining.is_zero() {
            let mut remaining_secs = remaining.as_secs();
            if remaining.subsec_nanos() > 0 {
                remaining_secs += 1;
            }
            return Err(AuthError::OtpCooldown { remaining_secs });
        }

        let _busy = self.begin()?;
        with_timeout(self.request_timeout, "otp send", self.otp.send_otp(&email)).await?;

        self.state.lock().otp_sent_at = Some(Instant::now());
        info!("One-time code sent to {}", mask_email(&email));
        self.audit.record(SecurityAction::OtpSent, Some(&email), json!({}));
        Ok(())
    }

    /// Anomaly path: both the password and the code must check out.
    pub async fn submit_password_with_otp(&self, password: &str, code: &str) -> Result<SessionEstablished> {
        let email = self.locked_email(&[LoginStep::Otp])?;
        let _busy = self.begin()?;

        let account = self.check_password(&email, password)?;

        let valid = match with_timeout(
            self.request_timeout,
            "otp verification",
            self.otp.verify_otp(&email, code.trim()),
        )
        .await
        {
            Ok(valid) => valid,
            Err(e) => {
                self.audit.record(
                    SecurityAction::OtpVerificationFailed,
                    Some(&email),
                    json!({ "error": e.to_string() }),
                );
                return Err(e);
            }
        };
        if !valid {
            self.audit.record(SecurityAction::OtpVerificationFailed, Some(&email), json!({}));
            return Err(AuthError::InvalidOtp);
        }

        self.establish_session(&account)
    }

    pub fn begin_forgot_password(&self) -> Result<()> {
        let mut state = self.state.lock();
        if state.mode != AuthMode::Login || state.step == LoginStep::Email {
            return Err(AuthError::InvalidStep);
        }
        state.forgot_mode = true;
        state.prefilled_password = None;
        Ok(())
    }

    pub fn cancel_forgot_password(&self) {
        self.state.lock().forgot_mode = false;
    }

    /// Set a new password with a code sent through `request_otp`. On success
    /// the flow returns to the password step with the new password filled in.
    pub async fn reset_password(&self, code: &str, new_password: &str) -> Result<()> {
        let email = {
            let state = self.state.lock();
            if !state.forgot_mode {
                return Err(AuthError::InvalidStep);
            }
            state.email.clone().ok_or(AuthError::InvalidStep)?
        };
        validate_password_policy(new_password)?;
        let _busy = self.begin()?;

        if let Err(e) = with_timeout(
            self.request_timeout,
            "password reset",
            self.accounts_service.reset_password(&email, code.trim(), new_password),
        )
        .await
        {
            warn!("Password reset failed for {}: {}", mask_email(&email), e);
            self.audit.record(
                SecurityAction::PasswordResetFailed,
                Some(&email),
                json!({ "error": e.to_string() }),
            );
            return Err(e);
        }

        if let Some(account) = self
            .accounts
            .write()
            .iter_mut()
            .find(|account| account.has_email(&email))
        {
            account.password = new_password.to_string();
        }

        {
            let mut state = self.state.lock();
            state.forgot_mode = false;
            state.step = LoginStep::Password;
            state.prefilled_password = Some(new_password.to_string());
        }

        info!("Password reset completed for {}", mask_email(&email));
        self.audit.record(SecurityAction::PasswordResetSuccess, Some(&email), json!({}));
        Ok(())
    }

    pub fn use_different_email(&self) -> Result<()> {
        if self.is_busy() {
            return Err(AuthError::InProgress);
        }
        let mut state = self.state.lock();
        *state = LoginAttemptState::fresh(state.mode);
        Ok(())
    }

    pub fn switch_mode(&self, mode: AuthMode) -> Result<()> {
        if self.is_busy() {
            return Err(AuthError::InProgress);
        }
        *self.state.lock() = LoginAttemptState::fresh(mode);
        Ok(())
    }

    fn check_password(&self, email: &str, password: &str) -> Result<Account> {
        match self.cached_account(email) {
            Some(account) if verify_secret(password, &account.password) => Ok(account),
            _ => {
                self.audit.record(SecurityAction::LoginFailedWrongPassword, Some(email), json!({}));
                Err(AuthError::InvalidCredentials)
            }
        }
    }

    fn establish_session(&self, account: &Account) -> Result<SessionEstablished> {
        let user = CurrentUser::from(account);
        set_json(self.session.as_ref(), CURRENT_USER_KEY, &user)?;
        self.session.set(JUST_LOGGED_IN_KEY, "true")?;

        let step = self.state.lock().step;
        *self.state.lock() = LoginAttemptState::fresh(AuthMode::Login);

        info!("Session established for {}", mask_email(&account.email));
        self.audit.record(
            SecurityAction::LoginSuccess,
            Some(&account.email),
            json!({ "stepUp": step == LoginStep::Otp }),
        );

        Ok(SessionEstablished {
            user,
            redirect: DASHBOARD_PATH,
        })
    }
}

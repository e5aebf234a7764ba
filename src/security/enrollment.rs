// src/security/enrollment.rs - Account creation with typing-rhythm enrollment
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use log::{info, warn};
use parking_lot::Mutex;
use serde_json::json;

use crate::error::{AuthError, Result};
use crate::models::Account;
use crate::security::behavioral_biometrics::TypingPattern;
use crate::security::password::validate_password_policy;
use crate::services::{
    with_timeout, AccountsService, BiometricMatch, SecurityAction, SecurityAudit, TypingBiometricService,
};
use crate::utils::mask_email;

/// Details collected by the create-account form
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NewAccount {
    pub name: String,
    pub username: String,
    pub email: String,
    pub password: String,
}

/// Enrollment in progress. Nothing is persisted until the final sample.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EnrollmentSession {
    pub email: String,
    pub sample_count: u32,
    pub required_samples: u32,
    account: Account,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum EnrollmentProgress {
    SampleAccepted { sample_count: u32, remaining: u32 },
    Completed { email: String },
}

pub struct AccountCreationFlow {
    accounts_service: Arc<dyn AccountsService>,
    typing: Arc<dyn TypingBiometricService>,
    audit: SecurityAudit,
    request_timeout: Duration,
    required_samples: u32,
    session: Mutex<Option<EnrollmentSession>>,
    busy: AtomicBool,
}

impl AccountCreationFlow {
    pub fn new(
        accounts_service: Arc<dyn AccountsService>,
        typing: Arc<dyn TypingBiometricService>,
        audit: SecurityAudit,
        request_timeout: Duration,
        required_samples: u32,
    ) -> Self {
        AccountCreationFlow {
            accounts_service,
            typing,
            audit,
            request_timeout,
            required_samples: required_samples.max(1),
            session: Mutex::new(None),
            busy: AtomicBool::new(false),
        }
    }

    pub fn session(&self) -> Option<EnrollmentSession> {
        self.session.lock().clone()
    }

    /// Validate the form and open an enrollment session. Any earlier session
    /// is replaced.
    pub async fn begin_account_creation(&self, form: NewAccount) -> Result<EnrollmentSession> {
        let account = Account::new(&form.name, &form.username, &form.email, &form.password);
        if account.email.is_empty() || account.name.is_empty() || account.username.is_empty() {
            return Err(AuthError::InvalidCredentials);
        }
        validate_password_policy(&account.password)?;

        self.audit.record(SecurityAction::AccountCreationAttempt, Some(&account.email), json!({}));

        let existing = with_timeout(
            self.request_timeout,
            "account list",
            self.accounts_service.list_accounts(),
        )
        .await?;
        if existing.iter().any(|a| a.has_email(&account.email)) {
            info!("Account creation rejected, {} already exists", mask_email(&account.email));
            return Err(AuthError::DuplicateAccount);
        }

        let session = EnrollmentSession {
            email: account.email.clone(),
            sample_count: 0,
            required_samples: self.required_samples,
            account,
        };
        *self.session.lock() = Some(session.clone());
        Ok(session)
    }

    /// Submit one retyped email. A changed email abandons the enrollment.
    pub async fn submit_enrollment_sample(&self, email: &str, pattern: &TypingPattern) -> Result<EnrollmentProgress> {
        let session = self.session.lock().clone().ok_or(AuthError::InvalidStep)?;

        if self
            .busy
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(AuthError::InProgress);
        }
        let result = self.process_sample(session, email.trim(), pattern).await;
        self.busy.store(false, Ordering::SeqCst);
        result
    }

    async fn process_sample(
        &self,
        session: EnrollmentSession,
        email: &str,
        pattern: &TypingPattern,
    ) -> Result<EnrollmentProgress> {
        if !email.eq_ignore_ascii_case(&session.email) {
            warn!(
                "Enrollment for {} aborted, sample typed a different email",
                mask_email(&session.email)
            );
            *self.session.lock() = None;
            self.audit.record(
                SecurityAction::EnrollmentAborted,
                Some(&session.email),
                json!({ "sampleCount": session.sample_count }),
            );
            return Err(AuthError::EnrollmentAborted);
        }

        let verdict = with_timeout(
            self.request_timeout,
            "typing biometric enrollment",
            self.typing.verify(&session.email, pattern),
        )
        .await?;
        if verdict == (BiometricMatch::Verified { matched: false }) {
            return Err(AuthError::BiometricMismatch);
        }

        let sample_count = session.sample_count + 1;
        if sample_count < session.required_samples {
            if let Some(current) = self.session.lock().as_mut() {
                current.sample_count = sample_count;
            }
            self.audit.record(
                SecurityAction::EnrollmentSampleAccepted,
                Some(&session.email),
                json!({ "sampleCount": sample_count }),
            );
            return Ok(EnrollmentProgress::SampleAccepted {
                sample_count,
                remaining: session.required_samples - sample_count,
            });
        }

        with_timeout(
            self.request_timeout,
            "account creation",
            self.accounts_service.create_account(session.account.clone()),
        )
        .await?;

        *self.session.lock() = None;
        info!("Account created for {}", mask_email(&session.email));
        self.audit.record(SecurityAction::AccountCreationSuccess, Some(&session.email), json!({}));

        Ok(EnrollmentProgress::Completed { email: session.email })
    }

    /// Drop the enrollment without persisting anything.
    pub fn cancel(&self) {
        if self.session.lock().take().is_some() {
            info!("Enrollment cancelled");
        }
    }
}

// src/services/security_log.rs - Security audit trail collaborator
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use log::{debug, warn};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::runtime::Handle;
use tokio::sync::{mpsc, oneshot};

use crate::error::{AuthError, Result};
use crate::services::fingerprint::{DeviceFingerprint, FingerprintProvider};
use crate::utils::{generate_id, mask_email};

/// Actions recorded in the security log
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SecurityAction {
    EmailVerificationAttempt,
    LoginAttemptFailedEmailNotFound,
    TypingBiometricMatch,
    TypingBiometricMismatch,
    LoginSuccess,
    LoginFailedWrongPassword,
    OtpSent,
    OtpVerificationFailed,
    PasswordResetSuccess,
    PasswordResetFailed,
    AccountCreationAttempt,
    AccountCreationSuccess,
    EnrollmentSampleAccepted,
    EnrollmentAborted,
    BiometricVerificationSuccess,
    BiometricVerificationFailed,
    BotDetected,
    HoneypotTriggered,
}

impl SecurityAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            SecurityAction::EmailVerificationAttempt => "email_verification_attempt",
            SecurityAction::LoginAttemptFailedEmailNotFound => "login_attempt_failed_email_not_found",
            SecurityAction::TypingBiometricMatch => "typing_biometric_match",
            SecurityAction::TypingBiometricMismatch => "typing_biometric_mismatch",
            SecurityAction::LoginSuccess => "login_success",
            SecurityAction::LoginFailedWrongPassword => "login_failed_wrong_password",
            SecurityAction::OtpSent => "otp_sent",
            SecurityAction::OtpVerificationFailed => "otp_verification_failed",
            SecurityAction::PasswordResetSuccess => "password_reset_success",
            SecurityAction::PasswordResetFailed => "password_reset_failed",
            SecurityAction::AccountCreationAttempt => "account_creation_attempt",
            SecurityAction::AccountCreationSuccess => "account_creation_success",
            SecurityAction::EnrollmentSampleAccepted => "enrollment_sample_accepted",
            SecurityAction::EnrollmentAborted => "enrollment_aborted",
            SecurityAction::BiometricVerificationSuccess => "biometric_verification_success",
            SecurityAction::BiometricVerificationFailed => "biometric_verification_failed",
            SecurityAction::BotDetected => "bot_detected",
            SecurityAction::HoneypotTriggered => "honeypot_triggered",
        }
    }
}

impl std::fmt::Display for SecurityAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SecurityLogEvent {
    pub id: String,
    pub action: SecurityAction,
    pub email: Option<String>,
    pub timestamp: DateTime<Utc>,
    pub context: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fingerprint: Option<DeviceFingerprint>,
}

impl SecurityLogEvent {
    pub fn new(action: SecurityAction, email: Option<&str>, context: Value) -> Self {
        SecurityLogEvent {
            id: generate_id("sec"),
            action,
            email: email.map(|e| e.trim().to_string()),
            timestamp: Utc::now(),
            context,
            fingerprint: None,
        }
    }
}

/// Security-log collaborator. Callers never rely on the response.
#[async_trait]
pub trait SecurityLogSink: Send + Sync {
    async fn record(&self, event: SecurityLogEvent) -> Result<()>;
}

/// Filter for listing recorded events
#[derive(Clone, Debug, Default)]
pub struct LogFilter {
    pub email: Option<String>,
    pub action: Option<SecurityAction>,
    pub visitor_id: Option<String>,
}

impl LogFilter {
    fn matches(&self, event: &SecurityLogEvent) -> bool {
        let email_ok = match (&self.email, &event.email) {
            (Some(wanted), Some(actual)) => wanted.eq_ignore_ascii_case(actual),
            (Some(_), None) => false,
            (None, _) => true,
        };
        let action_ok = self.action.map_or(true, |a| a == event.action);
        let visitor_ok = match (&self.visitor_id, &event.fingerprint) {
            (Some(wanted), Some(fingerprint)) => *wanted == fingerprint.visitor_id,
            (Some(_), None) => false,
            (None, _) => true,
        };
        email_ok && action_ok && visitor_ok
    }
}

/// In-memory security log, newest events last.
#[derive(Default)]
pub struct MemorySecurityLog {
    events: RwLock<Vec<SecurityLogEvent>>,
    failing: AtomicBool,
}

impl MemorySecurityLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent `record` fail, to exercise the swallow path.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn query(&self, filter: &LogFilter) -> Vec<SecurityLogEvent> {
        self.events
            .read()
            .iter()
            .filter(|event| filter.matches(event))
            .cloned()
            .collect()
    }

    pub fn actions(&self) -> Vec<SecurityAction> {
        self.events.read().iter().map(|event| event.action).collect()
    }

    pub fn count(&self, action: SecurityAction) -> usize {
        self.events.read().iter().filter(|e| e.action == action).count()
    }

    pub fn len(&self) -> usize {
        self.events.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.read().is_empty()
    }
}

#[async_trait]
impl SecurityLogSink for MemorySecurityLog {
    async fn record(&self, event: SecurityLogEvent) -> Result<()> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(AuthError::NetworkError("security log unreachable".to_string()));
        }
        self.events.write().push(event);
        Ok(())
    }
}

enum AuditCommand {
    Record(SecurityLogEvent),
    Flush(oneshot::Sender<()>),
}

struct AuditInner {
    sink: Arc<dyn SecurityLogSink>,
    fingerprints: Option<Arc<dyn FingerprintProvider>>,
    timeout: Duration,
    queue: Mutex<Option<mpsc::UnboundedSender<AuditCommand>>>,
}

/// Front for the security-log sink used by every flow.
///
/// `record` only enqueues. A background writer attaches the device
/// fingerprint and delivers events to the sink in order, each bounded by the
/// timeout. Failures are logged and dropped.
#[derive(Clone)]
pub struct SecurityAudit {
    inner: Arc<AuditInner>,
}

impl SecurityAudit {
    pub fn new(sink: Arc<dyn SecurityLogSink>, timeout: Duration) -> Self {
        SecurityAudit {
            inner: Arc::new(AuditInner {
                sink,
                fingerprints: None,
                timeout,
                queue: Mutex::new(None),
            }),
        }
    }

    /// Attach a device fingerprint to every recorded event.
    pub fn with_fingerprints(sink: Arc<dyn SecurityLogSink>, fingerprints: Arc<dyn FingerprintProvider>, timeout: Duration) -> Self {
        SecurityAudit {
            inner: Arc::new(AuditInner {
                sink,
                fingerprints: Some(fingerprints),
                timeout,
                queue: Mutex::new(None),
            }),
        }
    }

    pub fn record(&self, action: SecurityAction, email: Option<&str>, context: Value) {
        let event = SecurityLogEvent::new(action, email, context);
        debug!(
            "Security event {} for {}",
            action,
            email.map(mask_email).unwrap_or_else(|| "-".to_string())
        );

        if !self.enqueue(AuditCommand::Record(event)) {
            warn!("Dropping security event {}: no runtime to deliver it", action);
        }
    }

    /// Wait until every event recorded so far has been delivered or dropped.
    pub async fn flush(&self) {
        let (done, delivered) = oneshot::channel();
        if self.enqueue(AuditCommand::Flush(done)) {
            let _ = delivered.await;
        }
    }

    fn enqueue(&self, command: AuditCommand) -> bool {
        let mut queue = self.inner.queue.lock();

        let command = match queue.as_ref() {
            Some(sender) => match sender.send(command) {
                Ok(()) => return true,
                // writer ended with its runtime; start a new one below
                Err(mpsc::error::SendError(command)) => command,
            },
            None => command,
        };

        let handle = match Handle::try_current() {
            Ok(handle) => handle,
            Err(_) => return false,
        };

        let (sender, receiver) = mpsc::unbounded_channel();
        handle.spawn(run_writer(
            self.inner.sink.clone(),
            self.inner.fingerprints.clone(),
            self.inner.timeout,
            receiver,
        ));
        let sent = sender.send(command).is_ok();
        *queue = Some(sender);
        sent
    }
}

async fn run_writer(
    sink: Arc<dyn SecurityLogSink>,
    fingerprints: Option<Arc<dyn FingerprintProvider>>,
    timeout: Duration,
    mut receiver: mpsc::UnboundedReceiver<AuditCommand>,
) {
    while let Some(command) = receiver.recv().await {
        let mut event = match command {
            AuditCommand::Record(event) => event,
            AuditCommand::Flush(done) => {
                let _ = done.send(());
                continue;
            }
        };
        let action = event.action;

        if let Some(provider) = &fingerprints {
            match tokio::time::timeout(timeout, provider.fingerprint()).await {
                Ok(Ok(fingerprint)) => event.fingerprint = Some(fingerprint),
                Ok(Err(e)) => debug!("No device fingerprint for {}: {}", action, e),
                Err(_) => debug!("No device fingerprint for {}: provider timed out", action),
            }
        }

        match tokio::time::timeout(timeout, sink.record(event)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!("Dropping security event {}: {}", action, e),
            Err(_) => warn!("Dropping security event {}: sink timed out", action),
        }
    }
}

// src/security/biometric_gate.rs - Route-level biometric step-up
//
// The gate never hides the page. A protected, unverified path shows a small
// verify affordance next to the content; the user clicks it or hovers over it
// for the configured delay to run the platform ceremony.

use std::sync::{Arc, Weak};
use std::time::Duration;

use log::{info, warn};
use parking_lot::Mutex;
use serde_json::json;

use crate::error::{AuthError, Result};
use crate::security::ledger::SessionVerificationLedger;
use crate::security::preferences::{SecurityFeature, SecurityPreferences};
use crate::services::{with_timeout, ChallengeProvider, PlatformAuthenticator, SecurityAction, SecurityAudit};
use crate::utils::task::ScheduledTask;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum GateState {
    /// Feature disabled or path not protected
    NotNeeded,
    /// Waiting for the user to start verification
    NeedsCheck { last_error: Option<String> },
    /// Platform ceremony in flight
    Verifying,
    Verified,
}

pub struct BiometricGateController {
    ledger: Arc<SessionVerificationLedger>,
    preferences: Arc<SecurityPreferences>,
    authenticator: Arc<dyn PlatformAuthenticator>,
    challenges: Arc<dyn ChallengeProvider>,
    audit: SecurityAudit,
    ceremony_timeout: Duration,
    hover_delay: Duration,
}

impl BiometricGateController {
    pub fn new(
        ledger: Arc<SessionVerificationLedger>,
        preferences: Arc<SecurityPreferences>,
        authenticator: Arc<dyn PlatformAuthenticator>,
        challenges: Arc<dyn ChallengeProvider>,
        audit: SecurityAudit,
        ceremony_timeout: Duration,
        hover_delay: Duration,
    ) -> Self {
        BiometricGateController {
            ledger,
            preferences,
            authenticator,
            challenges,
            audit,
            ceremony_timeout,
            hover_delay,
        }
    }

    pub fn requires_check(&self, path: &str) -> bool {
        self.preferences.is_enabled(SecurityFeature::Biometric)
            && self.ledger.is_biometric_path(path)
            && !self.ledger.is_verified(path)
    }

    /// Enter `path` and decide its initial gate state. Devices without a
    /// platform authenticator pass automatically.
    pub async fn visit(self: &Arc<Self>, path: &str, email: Option<&str>) -> Result<Arc<GateVisit>> {
        let state = if !self.preferences.is_enabled(SecurityFeature::Biometric)
            || !self.ledger.is_biometric_path(path)
        {
            GateState::NotNeeded
        } else if self.ledger.is_verified(path) {
            GateState::Verified
        } else if !self.authenticator.is_available().await {
            info!("No platform authenticator, passing {} without step-up", path);
            self.ledger.mark_verified(path)?;
            GateState::Verified
        } else {
            GateState::NeedsCheck { last_error: None }
        };

        Ok(Arc::new(GateVisit {
            controller: Arc::clone(self),
            path: path.to_string(),
            email: email.map(str::to_string),
            state: Mutex::new(state),
            hover: Mutex::new(None),
        }))
    }

    async fn run_ceremony(&self) -> Result<()> {
        let challenge = self.challenges.challenge().await?;
        with_timeout(
            self.ceremony_timeout,
            "platform authentication",
            self.authenticator.authenticate(&challenge),
        )
        .await
        .map(|_assertion| ())
    }
}

/// Gate state for one visit to one path.
pub struct GateVisit {
    controller: Arc<BiometricGateController>,
    path: String,
    email: Option<String>,
    state: Mutex<GateState>,
    hover: Mutex<Option<ScheduledTask>>,
}

impl GateVisit {
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Current state. A mark recorded elsewhere for the same path (another
    /// visit, a periodic challenge) is picked up here.
    pub fn state(&self) -> GateState {
        let mut state = self.state.lock();
        if matches!(*state, GateState::NeedsCheck { .. }) && self.controller.ledger.is_verified(&self.path) {
            *state = GateState::Verified;
        }
        state.clone()
    }

    pub fn should_show_affordance(&self) -> bool {
        matches!(self.state(), GateState::NeedsCheck { .. } | GateState::Verifying)
    }

    /// Run the platform ceremony. A second call while one is in flight is
    /// rejected with `InProgress`.
    pub async fn verify(&self) -> Result<()> {
        {
            let mut state = self.state.lock();
            match *state {
                GateState::Verifying => return Err(AuthError::InProgress),
                GateState::Verified | GateState::NotNeeded => return Ok(()),
                GateState::NeedsCheck { .. } => *state = GateState::Verifying,
            }
        }

        let outcome = match self.controller.run_ceremony().await {
            // authenticator vanished mid-session: same fail-open rule as on entry
            Err(AuthError::BiometricUnavailable) => Ok(()),
            other => other,
        };

        match outcome {
            Ok(()) => {
                if let Err(e) = self.controller.ledger.mark_verified(&self.path) {
                    *self.state.lock() = GateState::NeedsCheck {
                        last_error: Some(e.to_string()),
                    };
                    return Err(e);
                }
                *self.state.lock() = GateState::Verified;
                info!("Biometric step-up passed for {}", self.path);
                self.controller
                    .audit
                    .record(
                        SecurityAction::BiometricVerificationSuccess,
                        self.email.as_deref(),
                        json!({ "path": self.path }),
                    );
                Ok(())
            }
            Err(e) => {
                warn!("Biometric step-up failed for {}: {}", self.path, e);
                *self.state.lock() = GateState::NeedsCheck {
                    last_error: Some(e.to_string()),
                };
                self.controller
                    .audit
                    .record(
                        SecurityAction::BiometricVerificationFailed,
                        self.email.as_deref(),
                        json!({ "path": self.path, "error": e.to_string() }),
                    );
                Err(e)
            }
        }
    }

    /// Pointer entered the affordance: verify once it has stayed for the
    /// hover delay.
    pub fn pointer_enter(self: &Arc<Self>) {
        let mut hover = self.hover.lock();
        if hover.as_ref().map_or(false, ScheduledTask::is_running) {
            return;
        }

        let visit: Weak<GateVisit> = Arc::downgrade(self);
        let delay = self.controller.hover_delay;
        *hover = Some(ScheduledTask::spawn("gate-hover", async move {
            tokio::time::sleep(delay).await;
            if let Some(visit) = visit.upgrade() {
                // detached so leaving the affordance cannot abort a started ceremony
                tokio::spawn(async move {
                    let _ = visit.verify().await;
                });
            }
        }));
    }

    /// Pointer left before the delay elapsed: forget the pending hover.
    pub fn pointer_leave(&self) {
        if let Some(mut task) = self.hover.lock().take() {
            task.stop();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::webauthn::MockOutcome;
    use crate::services::{LocalChallengeProvider, MemorySecurityLog, MockPlatformAuthenticator};
    use crate::storage::MemoryStore;

    struct Fixture {
        controller: Arc<BiometricGateController>,
        ledger: Arc<SessionVerificationLedger>,
        preferences: Arc<SecurityPreferences>,
        authenticator: Arc<MockPlatformAuthenticator>,
        log: Arc<MemorySecurityLog>,
        audit: SecurityAudit,
    }

    fn fixture(available: bool) -> Fixture {
        let ledger = Arc::new(SessionVerificationLedger::new(Arc::new(MemoryStore::new()), false));
        let preferences = Arc::new(SecurityPreferences::load(Arc::new(MemoryStore::new())));
        let authenticator = Arc::new(MockPlatformAuthenticator::new(available));
        let log = Arc::new(MemorySecurityLog::new());
        let audit = SecurityAudit::new(log.clone(), Duration::from_secs(1));
        let controller = Arc::new(BiometricGateController::new(
            ledger.clone(),
            preferences.clone(),
            authenticator.clone(),
            Arc::new(LocalChallengeProvider::default()),
            audit.clone(),
            Duration::from_secs(60),
            Duration::from_millis(800),
        ));
        Fixture {
            controller,
            ledger,
            preferences,
            authenticator,
            log,
            audit,
        }
    }

    #[tokio::test]
    async fn test_unprotected_or_disabled_is_not_needed() {
        let f = fixture(true);
        let visit = f.controller.visit("/app/payments", None).await.unwrap();
        assert_eq!(visit.state(), GateState::NotNeeded);

        f.preferences.set_feature(SecurityFeature::Biometric, false).unwrap();
        let visit = f.controller.visit("/app/dashboard", None).await.unwrap();
        assert_eq!(visit.state(), GateState::NotNeeded);
        assert!(!visit.should_show_affordance());
    }

    #[tokio::test]
    async fn test_protected_path_needs_check_when_hardware_present() {
        let f = fixture(true);
        let visit = f.controller.visit("/app/transfers", None).await.unwrap();
        assert_eq!(visit.state(), GateState::NeedsCheck { last_error: None });
        assert!(visit.should_show_affordance());
        assert!(f.controller.requires_check("/app/transfers"));
    }

    #[tokio::test]
    async fn test_missing_hardware_fails_open() {
        let f = fixture(false);
        let (_sub, rx) = {
            let (tx, rx) = crossbeam::channel::unbounded();
            let sub = f.ledger.subscribe(move |event| {
                let _ = tx.send(event.path.clone());
            });
            (sub, rx)
        };

        let visit = f.controller.visit("/app/cards", None).await.unwrap();
        assert_eq!(visit.state(), GateState::Verified);
        assert!(f.ledger.is_verified("/app/cards"));
        assert_eq!(rx.try_recv().unwrap(), "/app/cards");
    }

    #[tokio::test]
    async fn test_successful_verification_marks_path() {
        let f = fixture(true);
        let visit = f.controller.visit("/app/statements", Some("a@bank.com")).await.unwrap();

        visit.verify().await.unwrap();
        assert_eq!(visit.state(), GateState::Verified);
        assert!(f.ledger.is_verified("/app/statements"));
        f.audit.flush().await;
        assert_eq!(f.log.count(SecurityAction::BiometricVerificationSuccess), 1);

        // same session, same path: no second ceremony
        let again = f.controller.visit("/app/statements", None).await.unwrap();
        assert_eq!(again.state(), GateState::Verified);
        assert_eq!(f.authenticator.ceremony_count(), 1);
    }

    #[tokio::test]
    async fn test_cancelled_ceremony_stays_in_needs_check() {
        let f = fixture(true);
        f.authenticator.push_outcome(MockOutcome::Cancel);
        let visit = f.controller.visit("/app/dashboard", None).await.unwrap();

        assert_eq!(visit.verify().await, Err(AuthError::BiometricCancelled));
        match visit.state() {
            GateState::NeedsCheck { last_error } => assert!(last_error.is_some()),
            other => panic!("unexpected state {:?}", other),
        }
        assert!(!f.ledger.is_verified("/app/dashboard"));
        f.audit.flush().await;
        assert_eq!(f.log.count(SecurityAction::BiometricVerificationFailed), 1);

        visit.verify().await.unwrap();
        assert_eq!(visit.state(), GateState::Verified);
    }

    #[tokio::test(start_paused = true)]
    async fn test_duplicate_verify_is_rejected() {
        let f = fixture(true);
        f.authenticator.set_delay(Duration::from_secs(2));
        let visit = f.controller.visit("/app/dashboard", None).await.unwrap();

        let first = {
            let visit = visit.clone();
            tokio::spawn(async move { visit.verify().await })
        };
        tokio::task::yield_now().await;

        assert_eq!(visit.state(), GateState::Verifying);
        assert_eq!(visit.verify().await, Err(AuthError::InProgress));
        assert!(first.await.unwrap().is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_ceremony_timeout_is_a_network_error() {
        let f = fixture(true);
        f.authenticator.set_delay(Duration::from_secs(120));
        let visit = f.controller.visit("/app/dashboard", None).await.unwrap();

        match visit.verify().await {
            Err(AuthError::NetworkError(_)) => {}
            other => panic!("unexpected result {:?}", other),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_sustained_hover_verifies() {
        let f = fixture(true);
        let visit = f.controller.visit("/app/cards", None).await.unwrap();

        visit.pointer_enter();
        tokio::time::sleep(Duration::from_millis(700)).await;
        assert!(!f.ledger.is_verified("/app/cards"));

        tokio::time::sleep(Duration::from_millis(200)).await;
        tokio::task::yield_now().await;
        assert!(f.ledger.is_verified("/app/cards"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_short_hover_does_nothing() {
        let f = fixture(true);
        let visit = f.controller.visit("/app/cards", None).await.unwrap();

        visit.pointer_enter();
        tokio::time::sleep(Duration::from_millis(500)).await;
        visit.pointer_leave();
        tokio::time::sleep(Duration::from_secs(2)).await;

        assert!(!f.ledger.is_verified("/app/cards"));
        assert_eq!(f.authenticator.ceremony_count(), 0);
    }

    #[tokio::test]
    async fn test_mark_from_elsewhere_is_picked_up() {
        let f = fixture(true);
        let visit = f.controller.visit("/app/cards", None).await.unwrap();
        f.ledger.mark_verified("/app/cards").unwrap();
        assert_eq!(visit.state(), GateState::Verified);
    }
}

// src/security/periodic_challenge.rs - Session re-verification prompt
//
// The prompt opens right after login, every challenge interval, and whenever
// the risk score is at or above the threshold, but only while the biometric
// feature is enabled. At most one prompt is open at a time.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use log::{debug, info, warn};
use parking_lot::Mutex;

use crate::error::{AuthError, Result};
use crate::events::{EventBus, Subscription};
use crate::models::JUST_LOGGED_IN_KEY;
use crate::security::preferences::{SecurityFeature, SecurityPreferences};
use crate::security::risk_engine::RiskEngine;
use crate::services::{with_timeout, ChallengeProvider, PlatformAuthenticator};
use crate::storage::KeyValueStore;
use crate::utils::task::ScheduledTask;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ChallengeReason {
    PostLogin,
    Interval,
    HighRisk,
}

pub struct PeriodicChallengeController {
    risk: Arc<RiskEngine>,
    preferences: Arc<SecurityPreferences>,
    session: Arc<dyn KeyValueStore>,
    authenticator: Arc<dyn PlatformAuthenticator>,
    challenges: Arc<dyn ChallengeProvider>,
    interval: Duration,
    risk_threshold: f64,
    ceremony_timeout: Duration,
    open: Mutex<Option<ChallengeReason>>,
    verifying: AtomicBool,
    prompts: EventBus<ChallengeReason>,
    timer: Mutex<Option<ScheduledTask>>,
    risk_subscription: Mutex<Option<Subscription>>,
}

impl PeriodicChallengeController {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        risk: Arc<RiskEngine>,
        preferences: Arc<SecurityPreferences>,
        session: Arc<dyn KeyValueStore>,
        authenticator: Arc<dyn PlatformAuthenticator>,
        challenges: Arc<dyn ChallengeProvider>,
        interval: Duration,
        risk_threshold: f64,
        ceremony_timeout: Duration,
    ) -> Self {
        PeriodicChallengeController {
            risk,
            preferences,
            session,
            authenticator,
            challenges,
            interval,
            risk_threshold,
            ceremony_timeout,
            open: Mutex::new(None),
            verifying: AtomicBool::new(false),
            prompts: EventBus::new(),
            timer: Mutex::new(None),
            risk_subscription: Mutex::new(None),
        }
    }

    fn enabled(&self) -> bool {
        self.preferences.is_enabled(SecurityFeature::Biometric)
    }

    /// Consume the post-login flag, then start the interval timer and the
    /// risk watch. Both hold weak references and stop with `stop()`.
    pub fn start(self: &Arc<Self>) {
        self.on_mount();

        let controller: Weak<Self> = Arc::downgrade(self);
        let timer = ScheduledTask::repeating("challenge-interval", self.interval, move || {
            match controller.upgrade() {
                Some(controller) => {
                    controller.on_interval_elapsed();
                    true
                }
                None => false,
            }
        });
        *self.timer.lock() = Some(timer);

        let controller: Weak<Self> = Arc::downgrade(self);
        let subscription = self.risk.subscribe(move |state| {
            if let Some(controller) = controller.upgrade() {
                controller.on_risk_score(state.score);
            }
        });
        *self.risk_subscription.lock() = Some(subscription);

        // a score already over the threshold counts too
        self.on_risk_score(self.risk.score());
    }

    pub fn stop(&self) {
        if let Some(mut timer) = self.timer.lock().take() {
            timer.stop();
        }
        self.risk_subscription.lock().take();
    }

    /// Open the prompt once if login just completed. The flag is only
    /// consumed while the feature is enabled.
    pub fn on_mount(&self) -> bool {
        if !self.enabled() || self.session.get(JUST_LOGGED_IN_KEY).as_deref() != Some("true") {
            return false;
        }
        if let Err(e) = self.session.remove(JUST_LOGGED_IN_KEY) {
            warn!("Failed to clear post-login flag: {}", e);
        }
        self.open_prompt(ChallengeReason::PostLogin)
    }

    pub fn on_interval_elapsed(&self) -> bool {
        self.enabled() && self.open_prompt(ChallengeReason::Interval)
    }

    pub fn on_risk_score(&self, score: f64) -> bool {
        self.enabled() && score >= self.risk_threshold && self.open_prompt(ChallengeReason::HighRisk)
    }

    fn open_prompt(&self, reason: ChallengeReason) -> bool {
        {
            let mut open = self.open.lock();
            if open.is_some() {
                return false;
            }
            *open = Some(reason);
        }
        info!("Re-verification prompt opened ({:?})", reason);
        self.prompts.publish(&reason);
        true
    }

    pub fn is_open(&self) -> bool {
        self.open.lock().is_some()
    }

    pub fn current_reason(&self) -> Option<ChallengeReason> {
        *self.open.lock()
    }

    pub fn is_verifying(&self) -> bool {
        self.verifying.load(Ordering::SeqCst)
    }

    pub fn subscribe<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&ChallengeReason) + Send + Sync + 'static,
    {
        self.prompts.subscribe(listener)
    }

    /// Close without verifying. Ignored while a verification is running.
    pub fn dismiss(&self) {
        if !self.is_verifying() {
            self.open.lock().take();
        }
    }

    /// Step-up passed: lower the risk, then close the prompt.
    pub fn complete(&self) -> Result<()> {
        if !self.is_open() {
            return Err(AuthError::InvalidStep);
        }
        self.risk.lower_risk();
        self.open.lock().take();
        Ok(())
    }

    /// Run the platform ceremony for the open prompt. Failures leave the
    /// prompt open for a retry; a device without an authenticator passes.
    pub async fn verify(&self) -> Result<()> {
        if !self.is_open() {
            return Err(AuthError::InvalidStep);
        }
        if self
            .verifying
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(AuthError::InProgress);
        }

        let outcome = async {
            let challenge = self.challenges.challenge().await?;
            with_timeout(
                self.ceremony_timeout,
                "periodic re-verification",
                self.authenticator.authenticate(&challenge),
            )
            .await
            .map(|_assertion| ())
        }
        .await;
        self.verifying.store(false, Ordering::SeqCst);

        match outcome {
            Ok(()) | Err(AuthError::BiometricUnavailable) => self.complete(),
            Err(e) => {
                debug!("Re-verification failed: {}", e);
                Err(e)
            }
        }
    }
}

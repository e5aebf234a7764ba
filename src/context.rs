// src/context.rs - Session root wiring every security component
//
// Components receive their collaborators and shared state from here; there
// is no process-wide mutable state. Background work started by `start()` is
// owned by the context and ends with `shutdown()` or `logout()`.

use std::sync::Arc;

use futures_util::future::join;
use log::{info, warn};
use parking_lot::Mutex;

use crate::config::Settings;
use crate::error::Result;
use crate::events::EventBus;
use crate::models::{Account, CurrentUser, CURRENT_USER_KEY, JUST_LOGGED_IN_KEY};
use crate::security::{
    AccountCreationFlow, AutomationDetector, BiometricGateController, HoneypotGuard, HoneypotTrigger,
    PeriodicChallengeController, RiskEngine, SecurityPreferences, SessionVerificationLedger, StepUpAuthFlow,
};
use crate::services::{
    AccountsService, BotClassifier, BotDetection, ChallengeProvider, FingerprintProvider, InMemoryAccounts,
    InMemoryOtpService, InMemoryTypingBiometrics, LocalChallengeProvider, MemorySecurityLog,
    MockPlatformAuthenticator, OtpService, PlatformAuthenticator, SecurityAudit, SecurityLogSink,
    StaticBotClassifier, StaticFingerprintProvider, TypingBiometricService,
};
use crate::storage::{get_json, KeyValueStore};
use crate::utils::task::ScheduledTask;

/// External collaborators the core consumes
#[derive(Clone)]
pub struct Collaborators {
    pub accounts: Arc<dyn AccountsService>,
    pub otp: Arc<dyn OtpService>,
    pub typing: Arc<dyn TypingBiometricService>,
    pub authenticator: Arc<dyn PlatformAuthenticator>,
    pub challenges: Arc<dyn ChallengeProvider>,
    pub security_log: Arc<dyn SecurityLogSink>,
    pub fingerprints: Arc<dyn FingerprintProvider>,
    pub bot_classifier: Arc<dyn BotClassifier>,
}

/// In-memory backend used by the CLI demos and integration tests. Keeps the
/// concrete handles so callers can read the OTP outbox or the security log.
pub struct DemoBackend {
    pub accounts: Arc<InMemoryAccounts>,
    pub otp: Arc<InMemoryOtpService>,
    pub typing: Arc<InMemoryTypingBiometrics>,
    pub authenticator: Arc<MockPlatformAuthenticator>,
    pub security_log: Arc<MemorySecurityLog>,
    pub fingerprints: Arc<StaticFingerprintProvider>,
}

impl DemoBackend {
    pub fn new(accounts: Vec<Account>) -> Self {
        let otp = Arc::new(InMemoryOtpService::new());
        DemoBackend {
            accounts: Arc::new(InMemoryAccounts::with_accounts(otp.clone(), accounts)),
            otp,
            typing: Arc::new(InMemoryTypingBiometrics::default()),
            authenticator: Arc::new(MockPlatformAuthenticator::new(true)),
            security_log: Arc::new(MemorySecurityLog::new()),
            fingerprints: Arc::new(StaticFingerprintProvider::demo()),
        }
    }

    pub fn collaborators(&self) -> Collaborators {
        Collaborators {
            accounts: self.accounts.clone(),
            otp: self.otp.clone(),
            typing: self.typing.clone(),
            authenticator: self.authenticator.clone(),
            challenges: Arc::new(LocalChallengeProvider::default()),
            security_log: self.security_log.clone(),
            fingerprints: self.fingerprints.clone(),
            bot_classifier: Arc::new(StaticBotClassifier::new(BotDetection::default())),
        }
    }
}

pub struct SecurityContext {
    session: Arc<dyn KeyValueStore>,
    audit: SecurityAudit,
    risk: Arc<RiskEngine>,
    preferences: Arc<SecurityPreferences>,
    ledger: Arc<SessionVerificationLedger>,
    gate: Arc<BiometricGateController>,
    login: Arc<StepUpAuthFlow>,
    enrollment: Arc<AccountCreationFlow>,
    challenge: Arc<PeriodicChallengeController>,
    automation: Arc<AutomationDetector>,
    honeypot: Arc<HoneypotGuard>,
    honeypot_bus: EventBus<HoneypotTrigger>,
    drift: Mutex<Option<ScheduledTask>>,
}

impl SecurityContext {
    pub fn new(
        settings: &Settings,
        collaborators: Collaborators,
        session: Arc<dyn KeyValueStore>,
        durable: Arc<dyn KeyValueStore>,
        risk: Arc<RiskEngine>,
    ) -> Self {
        let audit = SecurityAudit::with_fingerprints(
            collaborators.security_log.clone(),
            collaborators.fingerprints.clone(),
            settings.security_log_timeout(),
        );
        let preferences = Arc::new(SecurityPreferences::load(durable));
        let ledger = Arc::new(SessionVerificationLedger::new(session.clone(), settings.gate_security_logs));

        let gate = Arc::new(BiometricGateController::new(
            ledger.clone(),
            preferences.clone(),
            collaborators.authenticator.clone(),
            collaborators.challenges.clone(),
            audit.clone(),
            settings.webauthn_timeout(),
            settings.gate_hover_delay(),
        ));

        let login = Arc::new(
            StepUpAuthFlow::new(
                collaborators.accounts.clone(),
                collaborators.otp.clone(),
                collaborators.typing.clone(),
                session.clone(),
                audit.clone(),
                settings.request_timeout(),
                settings.otp_cooldown(),
            )
            .with_risk_engine(risk.clone()),
        );

        let enrollment = Arc::new(AccountCreationFlow::new(
            collaborators.accounts.clone(),
            collaborators.typing.clone(),
            audit.clone(),
            settings.request_timeout(),
            settings.enrollment_samples,
        ));

        let challenge = Arc::new(PeriodicChallengeController::new(
            risk.clone(),
            preferences.clone(),
            session.clone(),
            collaborators.authenticator.clone(),
            collaborators.challenges.clone(),
            settings.challenge_interval(),
            settings.risk_challenge_threshold,
            settings.webauthn_timeout(),
        ));

        let automation = Arc::new(
            AutomationDetector::new(collaborators.bot_classifier.clone(), audit.clone(), settings.request_timeout())
                .with_risk_engine(risk.clone()),
        );

        let honeypot = Arc::new(HoneypotGuard::new(session.clone(), audit.clone()));
        let honeypot_bus = EventBus::new();
        honeypot.attach(&honeypot_bus);

        SecurityContext {
            session,
            audit,
            risk,
            preferences,
            ledger,
            gate,
            login,
            enrollment,
            challenge,
            automation,
            honeypot,
            honeypot_bus,
            drift: Mutex::new(None),
        }
    }

    /// Start background work and run the start-up checks. The account list
    /// and the bot classifier load concurrently; a failed account load is
    /// returned once and leaves logins failing as invalid credentials.
    pub async fn start(&self, webdriver: bool) -> Result<usize> {
        {
            let mut drift = self.drift.lock();
            if drift.is_none() {
                *drift = Some(self.risk.start());
            }
        }
        self.challenge.start();

        let (accounts, suspicious) = join(self.login.load_accounts(), self.automation.run(webdriver)).await;
        if suspicious {
            warn!("Session started with automation suspected");
        }
        accounts
    }

    pub fn shutdown(&self) {
        if let Some(mut drift) = self.drift.lock().take() {
            drift.stop();
        }
        self.challenge.stop();
        info!("Security context stopped");
    }

    /// End the session: drop the session record and verification marks and
    /// stop background work.
    pub fn logout(&self) -> Result<()> {
        self.session.remove(CURRENT_USER_KEY)?;
        self.session.remove(JUST_LOGGED_IN_KEY)?;
        self.ledger.clear();
        self.shutdown();
        if let Err(e) = self.login.use_different_email() {
            warn!("Login flow not reset on logout: {}", e);
        }
        Ok(())
    }

    pub fn current_user(&self) -> Option<CurrentUser> {
        get_json(self.session.as_ref(), CURRENT_USER_KEY)
    }

    /// Reload the account list, e.g. after an enrollment completed.
    pub async fn refresh_accounts(&self) -> Result<usize> {
        self.login.load_accounts().await
    }

    /// Report interaction with a decoy element.
    pub fn trigger_honeypot(&self, source: &str, name: Option<&str>) {
        self.honeypot_bus.publish(&HoneypotTrigger::new(source, name));
    }

    /// Acknowledge the honeypot alert. Ends the session and returns the
    /// redirect target when an alert was showing.
    pub fn acknowledge_honeypot(&self) -> Result<Option<&'static str>> {
        let redirect = self.honeypot.acknowledge()?;
        if redirect.is_some() {
            self.logout()?;
        }
        Ok(redirect)
    }

    /// Security-log front shared by every component.
    pub fn audit(&self) -> &SecurityAudit {
        &self.audit
    }

    pub fn risk(&self) -> &Arc<RiskEngine> {
        &self.risk
    }

    pub fn preferences(&self) -> &Arc<SecurityPreferences> {
        &self.preferences
    }

    pub fn ledger(&self) -> &Arc<SessionVerificationLedger> {
        &self.ledger
    }

    pub fn gate(&self) -> &Arc<BiometricGateController> {
        &self.gate
    }

    pub fn login(&self) -> &Arc<StepUpAuthFlow> {
        &self.login
    }

    pub fn enrollment(&self) -> &Arc<AccountCreationFlow> {
        &self.enrollment
    }

    pub fn challenge(&self) -> &Arc<PeriodicChallengeController> {
        &self.challenge
    }

    pub fn automation(&self) -> &Arc<AutomationDetector> {
        &self.automation
    }

    pub fn honeypot(&self) -> &Arc<HoneypotGuard> {
        &self.honeypot
    }

    pub fn honeypot_bus(&self) -> &EventBus<HoneypotTrigger> {
        &self.honeypot_bus
    }
}

impl Drop for SecurityContext {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::security::behavioral_biometrics::pattern_for;
    use crate::security::{ChallengeReason, EnrollmentProgress, GateState, LoginStep, NewAccount};
    use crate::services::{LogFilter, SecurityAction};
    use crate::storage::MemoryStore;

    const EMAIL: &str = "a@bank.com";

    fn context() -> (SecurityContext, DemoBackend, Arc<MemoryStore>) {
        let backend = DemoBackend::new(vec![Account::new("Asha", "asha", EMAIL, "Passw0rd!")]);
        backend.typing.seed(EMAIL, vec![pattern_for(EMAIL, 80, 120); 3]);
        let session = Arc::new(MemoryStore::new());
        let settings = Settings::default();
        let context = SecurityContext::new(
            &settings,
            backend.collaborators(),
            session.clone(),
            Arc::new(MemoryStore::new()),
            Arc::new(RiskEngine::with_seed(&settings, 41)),
        );
        (context, backend, session)
    }

    #[tokio::test]
    async fn test_login_then_gate_then_logout() {
        let (context, backend, session) = context();
        assert_eq!(context.start(false).await.unwrap(), 1);

        let step = context
            .login()
            .submit_email(EMAIL, &pattern_for(EMAIL, 80, 120))
            .await
            .unwrap();
        assert_eq!(step, LoginStep::Password);
        let established = context.login().submit_password("Passw0rd!").await.unwrap();
        assert_eq!(context.current_user().unwrap().email, established.user.email);

        // dashboard mounts the re-verification prompt
        assert!(context.challenge().on_mount());
        assert_eq!(context.challenge().current_reason(), Some(ChallengeReason::PostLogin));

        let visit = context.gate().visit("/app/dashboard", Some(EMAIL)).await.unwrap();
        assert_eq!(visit.state(), GateState::NeedsCheck { last_error: None });
        visit.verify().await.unwrap();
        assert!(context.ledger().is_verified("/app/dashboard"));
        context.audit().flush().await;
        assert_eq!(backend.security_log.count(SecurityAction::LoginSuccess), 1);
        let fingerprint = backend.security_log.query(&LogFilter::default())[0].fingerprint.clone();
        assert!(fingerprint.is_some());

        context.logout().unwrap();
        assert!(context.current_user().is_none());
        assert!(!context.ledger().is_verified("/app/dashboard"));
        assert!(session.get(JUST_LOGGED_IN_KEY).is_none());
    }

    #[tokio::test]
    async fn test_enrollment_then_login_after_refresh() {
        let (context, _backend, _) = context();
        context.start(false).await.unwrap();

        let email = "new@bank.com";
        context
            .enrollment()
            .begin_account_creation(NewAccount {
                name: "Ravi".to_string(),
                username: "ravi".to_string(),
                email: email.to_string(),
                password: "Str0ng#pw".to_string(),
            })
            .await
            .unwrap();

        let pattern = pattern_for(email, 90, 110);
        let mut progress = None;
        for _ in 0..3 {
            progress = Some(context.enrollment().submit_enrollment_sample(email, &pattern).await.unwrap());
        }
        assert!(matches!(progress, Some(EnrollmentProgress::Completed { .. })));

        assert_eq!(context.refresh_accounts().await.unwrap(), 2);
        let step = context.login().submit_email(email, &pattern).await.unwrap();
        assert_eq!(step, LoginStep::Password);
    }

    #[tokio::test]
    async fn test_honeypot_ends_session() {
        let (context, backend, _) = context();
        context.start(false).await.unwrap();
        context.login().submit_email(EMAIL, &pattern_for(EMAIL, 80, 120)).await.unwrap();
        context.login().submit_password("Passw0rd!").await.unwrap();

        context.trigger_honeypot("form", Some("website"));
        assert!(context.honeypot().alert().is_some());

        assert_eq!(context.acknowledge_honeypot().unwrap(), Some("/"));
        assert!(context.current_user().is_none());

        context.audit().flush().await;
        let visitor = backend.fingerprints.fingerprint().await.unwrap().visitor_id;
        let from_device = backend.security_log.query(&LogFilter {
            action: Some(SecurityAction::HoneypotTriggered),
            visitor_id: Some(visitor),
            ..LogFilter::default()
        });
        assert_eq!(from_device.len(), 1);
    }

    #[tokio::test]
    async fn test_start_reports_account_load_failure_once() {
        let (context, backend, _) = context();
        backend.accounts.set_unavailable(true);
        assert!(context.start(false).await.is_err());
        context.shutdown();
    }
}

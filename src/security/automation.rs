// src/security/automation.rs - Bot and automation detection
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use log::{debug, warn};
use parking_lot::Mutex;
use serde_json::json;

use crate::security::risk_engine::RiskEngine;
use crate::services::{with_timeout, BotClassifier, BotDetection, SecurityAction, SecurityAudit};

// Base risk added when automation is suspected
pub const AUTOMATION_RISK_PENALTY: f64 = 20.0;

/// Contents of the automation warning
#[derive(Clone, Debug, PartialEq)]
pub struct BotWarning {
    pub label: String,
    pub probability: Option<f64>,
    pub request_id: Option<String>,
}

pub struct AutomationDetector {
    classifier: Arc<dyn BotClassifier>,
    audit: SecurityAudit,
    risk: Option<Arc<RiskEngine>>,
    classifier_timeout: Duration,
    reported: AtomicBool,
    detection: Mutex<Option<BotDetection>>,
    warning: Mutex<Option<BotWarning>>,
}

impl AutomationDetector {
    pub fn new(classifier: Arc<dyn BotClassifier>, audit: SecurityAudit, classifier_timeout: Duration) -> Self {
        AutomationDetector {
            classifier,
            audit,
            risk: None,
            classifier_timeout,
            reported: AtomicBool::new(false),
            detection: Mutex::new(None),
            warning: Mutex::new(None),
        }
    }

    pub fn with_risk_engine(mut self, risk: Arc<RiskEngine>) -> Self {
        self.risk = Some(risk);
        self
    }

    /// Classify the client. `webdriver` is the browser automation flag. If the
    /// classifier cannot be loaded only the flag is used. Suspicion is
    /// reported once per detector: one log event, one warning, one risk bump.
    pub async fn run(&self, webdriver: bool) -> bool {
        let detection = match with_timeout(self.classifier_timeout, "bot classifier", self.classifier.detect()).await {
            Ok(detection) => detection,
            Err(e) => {
                debug!("Bot classifier unavailable, using webdriver flag only: {}", e);
                BotDetection::webdriver_only(webdriver)
            }
        };

        let suspicious = detection.is_suspicious(webdriver);
        let warning = BotWarning {
            label: detection.label(webdriver),
            probability: detection.bot.as_ref().and_then(|bot| bot.probability),
            request_id: detection.request_id.clone(),
        };
        *self.detection.lock() = Some(detection);

        if !suspicious || self.reported.swap(true, Ordering::SeqCst) {
            return suspicious;
        }

        warn!("Automation suspected: {}", warning.label);
        let context = json!({
            "signal": warning.label,
            "probability": warning.probability,
            "requestId": warning.request_id,
        });
        *self.warning.lock() = Some(warning);

        if let Some(risk) = &self.risk {
            risk.elevate(AUTOMATION_RISK_PENALTY, "automation suspected");
        }
        self.audit.record(SecurityAction::BotDetected, None, context);
        true
    }

    pub fn last_detection(&self) -> Option<BotDetection> {
        self.detection.lock().clone()
    }

    pub fn warning(&self) -> Option<BotWarning> {
        self.warning.lock().clone()
    }

    pub fn dismiss_warning(&self) {
        self.warning.lock().take();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Settings;
    use crate::services::{BotVerdict, MemorySecurityLog, StaticBotClassifier};

    struct Fixture {
        detector: AutomationDetector,
        log: Arc<MemorySecurityLog>,
        audit: SecurityAudit,
        risk: Arc<RiskEngine>,
    }

    fn fixture(classifier: StaticBotClassifier) -> Fixture {
        let log = Arc::new(MemorySecurityLog::new());
        let audit = SecurityAudit::new(log.clone(), Duration::from_secs(1));
        let risk = Arc::new(RiskEngine::with_seed(&Settings::default(), 31));
        let detector = AutomationDetector::new(Arc::new(classifier), audit.clone(), Duration::from_secs(5))
            .with_risk_engine(risk.clone());
        Fixture {
            detector,
            log,
            audit,
            risk,
        }
    }

    fn probable_bot() -> BotDetection {
        BotDetection {
            request_id: Some("req-9".to_string()),
            bot: Some(BotVerdict {
                probability: Some(0.92),
                ..Default::default()
            }),
            browser: None,
        }
    }

    #[tokio::test]
    async fn test_human_client_is_not_reported() {
        let f = fixture(StaticBotClassifier::new(BotDetection::default()));
        assert!(!f.detector.run(false).await);
        assert!(f.detector.warning().is_none());
        f.audit.flush().await;
        assert!(f.log.is_empty());
    }

    #[tokio::test]
    async fn test_suspicion_reported_once() {
        let f = fixture(StaticBotClassifier::new(probable_bot()));
        let before = f.risk.score();

        assert!(f.detector.run(false).await);
        assert!(f.detector.run(false).await);

        f.audit.flush().await;
        assert_eq!(f.log.count(SecurityAction::BotDetected), 1);
        assert!((f.risk.score() - (before + AUTOMATION_RISK_PENALTY)).abs() < 1e-9);

        let warning = f.detector.warning().unwrap();
        assert_eq!(warning.probability, Some(0.92));
        assert_eq!(warning.request_id.as_deref(), Some("req-9"));

        f.detector.dismiss_warning();
        assert!(f.detector.warning().is_none());
        f.detector.run(false).await;
        assert!(f.detector.warning().is_none());
    }

    #[tokio::test]
    async fn test_classifier_failure_falls_back_to_webdriver_flag() {
        let quiet = fixture(StaticBotClassifier::unreachable());
        assert!(!quiet.detector.run(false).await);
        quiet.audit.flush().await;
        assert!(quiet.log.is_empty());

        let flagged = fixture(StaticBotClassifier::unreachable());
        assert!(flagged.detector.run(true).await);
        assert_eq!(flagged.detector.warning().unwrap().label, "webdriver");
    }
}

// src/security/honeypot.rs - Decoy-element trap that terminates the session
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use log::{debug, warn};
use parking_lot::Mutex;
use serde_json::json;

use crate::error::Result;
use crate::events::{EventBus, Subscription};
use crate::models::{CURRENT_USER_KEY, LOGIN_PATH};
use crate::services::{SecurityAction, SecurityAudit};
use crate::storage::KeyValueStore;

/// Interaction with a decoy element
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HoneypotTrigger {
    pub source: String,
    pub name: Option<String>,
}

impl HoneypotTrigger {
    pub fn new(source: &str, name: Option<&str>) -> Self {
        HoneypotTrigger {
            source: source.to_string(),
            name: name.map(str::to_string),
        }
    }
}

/// Reacts to the first honeypot trigger: logs it, raises an alert, and
/// signs the user out once the alert is acknowledged. Later triggers are
/// ignored.
pub struct HoneypotGuard {
    session: Arc<dyn KeyValueStore>,
    audit: SecurityAudit,
    triggered: AtomicBool,
    alert: Mutex<Option<HoneypotTrigger>>,
    subscription: Mutex<Option<Subscription>>,
}

impl HoneypotGuard {
    pub fn new(session: Arc<dyn KeyValueStore>, audit: SecurityAudit) -> Self {
        HoneypotGuard {
            session,
            audit,
            triggered: AtomicBool::new(false),
            alert: Mutex::new(None),
            subscription: Mutex::new(None),
        }
    }

    /// Listen on `bus`. Must happen before any decoy can be touched.
    pub fn attach(self: &Arc<Self>, bus: &EventBus<HoneypotTrigger>) {
        let guard: Weak<Self> = Arc::downgrade(self);
        let subscription = bus.subscribe(move |trigger| {
            if let Some(guard) = guard.upgrade() {
                guard.on_trigger(trigger);
            }
        });
        *self.subscription.lock() = Some(subscription);
    }

    pub fn detach(&self) {
        self.subscription.lock().take();
    }

    pub fn on_trigger(&self, trigger: &HoneypotTrigger) {
        if self.triggered.swap(true, Ordering::SeqCst) {
            debug!("Ignoring repeated honeypot trigger from {}", trigger.source);
            return;
        }

        warn!("Honeypot triggered by {} ({:?})", trigger.source, trigger.name);
        *self.alert.lock() = Some(trigger.clone());

        self.audit.record(
            SecurityAction::HoneypotTriggered,
            None,
            json!({ "source": trigger.source, "name": trigger.name }),
        );
    }

    pub fn is_triggered(&self) -> bool {
        self.triggered.load(Ordering::SeqCst)
    }

    pub fn alert(&self) -> Option<HoneypotTrigger> {
        self.alert.lock().clone()
    }

    /// User acknowledged the alert: drop the session record and return the
    /// path to redirect to. `None` when no alert is showing.
    pub fn acknowledge(&self) -> Result<Option<&'static str>> {
        if self.alert.lock().take().is_none() {
            return Ok(None);
        }
        self.session.remove(CURRENT_USER_KEY)?;
        Ok(Some(LOGIN_PATH))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::MemorySecurityLog;
    use crate::storage::MemoryStore;
    use std::time::Duration;

    fn guard() -> (Arc<HoneypotGuard>, Arc<MemoryStore>, Arc<MemorySecurityLog>, SecurityAudit) {
        let session = Arc::new(MemoryStore::new());
        session.set(CURRENT_USER_KEY, r#"{"email":"a@bank.com"}"#).unwrap();
        let log = Arc::new(MemorySecurityLog::new());
        let audit = SecurityAudit::new(log.clone(), Duration::from_secs(1));
        let guard = Arc::new(HoneypotGuard::new(session.clone(), audit.clone()));
        (guard, session, log, audit)
    }

    #[tokio::test]
    async fn test_first_trigger_alerts_and_logs() {
        let (guard, session, log, audit) = guard();
        let bus = EventBus::new();
        guard.attach(&bus);

        bus.publish(&HoneypotTrigger::new("form", Some("website")));
        bus.publish(&HoneypotTrigger::new("link", None));
        audit.flush().await;

        assert!(guard.is_triggered());
        assert_eq!(guard.alert().unwrap().source, "form");
        assert_eq!(log.count(SecurityAction::HoneypotTriggered), 1);

        assert_eq!(guard.acknowledge().unwrap(), Some("/"));
        assert!(session.get(CURRENT_USER_KEY).is_none());
        assert_eq!(guard.acknowledge().unwrap(), None);
    }

    #[tokio::test]
    async fn test_no_trigger_no_logout() {
        let (guard, session, _, _) = guard();
        assert_eq!(guard.acknowledge().unwrap(), None);
        assert!(session.get(CURRENT_USER_KEY).is_some());
    }

    #[test]
    fn test_detached_guard_ignores_triggers() {
        let (guard, _, _, _) = guard();
        let bus = EventBus::new();
        guard.attach(&bus);
        guard.detach();

        bus.publish(&HoneypotTrigger::new("form", None));
        assert!(!guard.is_triggered());
    }
}

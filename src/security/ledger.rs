// src/security/ledger.rs - Per-session record of step-up verified paths
use std::collections::HashSet;
use std::sync::Arc;

use lazy_static::lazy_static;
use log::{debug, warn};

use crate::error::Result;
use crate::events::{EventBus, Subscription};
use crate::storage::KeyValueStore;

pub const VERIFIED_KEY_PREFIX: &str = "verified:";
pub const SECURITY_LOGS_PATH: &str = "/app/security-logs";

lazy_static! {
    // Pages that require a biometric step-up once per session
    static ref BIOMETRIC_PATHS: HashSet<&'static str> = {
        let mut paths = HashSet::new();
        paths.insert("/app/dashboard");
        paths.insert("/app/transfers");
        paths.insert("/app/statements");
        paths.insert("/app/cards");
        paths.insert("/app/profile-security");
        paths
    };
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct VerificationCompleted {
    pub path: String,
}

/// Set of verified paths for the current session, kept in session storage
/// so it disappears with the session.
pub struct SessionVerificationLedger {
    session: Arc<dyn KeyValueStore>,
    gate_security_logs: bool,
    completed: EventBus<VerificationCompleted>,
}

impl SessionVerificationLedger {
    pub fn new(session: Arc<dyn KeyValueStore>, gate_security_logs: bool) -> Self {
        SessionVerificationLedger {
            session,
            gate_security_logs,
            completed: EventBus::new(),
        }
    }

    fn key(path: &str) -> String {
        format!("{}{}", VERIFIED_KEY_PREFIX, path)
    }

    pub fn is_verified(&self, path: &str) -> bool {
        self.session.get(&Self::key(path)).as_deref() == Some("1")
    }

    /// Record the mark, then notify listeners. Listeners should re-read
    /// `is_verified` rather than trust the payload alone.
    pub fn mark_verified(&self, path: &str) -> Result<()> {
        self.session.set(&Self::key(path), "1")?;
        let delivered = self.completed.publish(&VerificationCompleted {
            path: path.to_string(),
        });
        debug!("Path {} verified ({} listeners notified)", path, delivered);
        Ok(())
    }

    pub fn is_biometric_path(&self, path: &str) -> bool {
        BIOMETRIC_PATHS.contains(path) || (self.gate_security_logs && path == SECURITY_LOGS_PATH)
    }

    pub fn subscribe<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&VerificationCompleted) + Send + Sync + 'static,
    {
        self.completed.subscribe(listener)
    }

    pub fn verified_paths(&self) -> Vec<String> {
        let mut paths: Vec<String> = self
            .session
            .keys()
            .into_iter()
            .filter_map(|key| key.strip_prefix(VERIFIED_KEY_PREFIX).map(str::to_string))
            .collect();
        paths.sort();
        paths
    }

    /// Drop every mark, used on logout.
    pub fn clear(&self) {
        for path in self.verified_paths() {
            if let Err(e) = self.session.remove(&Self::key(&path)) {
                warn!("Failed to clear verification mark for {}: {}", path, e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStore;
    use parking_lot::Mutex;

    fn ledger(gate_security_logs: bool) -> SessionVerificationLedger {
        SessionVerificationLedger::new(Arc::new(MemoryStore::new()), gate_security_logs)
    }

    #[test]
    fn test_protected_paths() {
        let ledger = ledger(false);
        assert!(ledger.is_biometric_path("/app/dashboard"));
        assert!(ledger.is_biometric_path("/app/profile-security"));
        assert!(!ledger.is_biometric_path("/app/payments"));
        assert!(!ledger.is_biometric_path(SECURITY_LOGS_PATH));

        assert!(self::ledger(true).is_biometric_path(SECURITY_LOGS_PATH));
    }

    #[test]
    fn test_mark_is_per_path_and_broadcast() {
        let ledger = ledger(false);
        let seen = Arc::new(Mutex::new(Vec::new()));
        let s = seen.clone();
        let _sub = ledger.subscribe(move |event| s.lock().push(event.path.clone()));

        ledger.mark_verified("/app/cards").unwrap();

        assert!(ledger.is_verified("/app/cards"));
        assert!(!ledger.is_verified("/app/transfers"));
        assert_eq!(*seen.lock(), vec!["/app/cards".to_string()]);
    }

    #[test]
    fn test_mark_uses_composite_key() {
        let session = Arc::new(MemoryStore::new());
        let ledger = SessionVerificationLedger::new(session.clone(), false);
        ledger.mark_verified("/app/statements").unwrap();
        assert_eq!(session.get("verified:/app/statements").as_deref(), Some("1"));
    }

    #[test]
    fn test_clear_removes_only_marks() {
        let session = Arc::new(MemoryStore::new());
        session.set("currentUser", "{}").unwrap();
        let ledger = SessionVerificationLedger::new(session.clone(), false);
        ledger.mark_verified("/app/cards").unwrap();
        ledger.mark_verified("/app/dashboard").unwrap();
        assert_eq!(ledger.verified_paths(), vec!["/app/cards", "/app/dashboard"]);

        ledger.clear();
        assert!(ledger.verified_paths().is_empty());
        assert!(session.get("currentUser").is_some());
    }
}

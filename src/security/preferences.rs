// src/security/preferences.rs - Per-install security feature toggles
use std::sync::Arc;

use log::{info, warn};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::storage::{get_json, set_json, KeyValueStore};

pub const PREFERENCES_KEY: &str = "security:features";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SecurityFeature {
    SimSwap,
    VpnProxy,
    DeviceChange,
    TypingAnomaly,
    LocationMismatch,
    Biometric,
}

impl SecurityFeature {
    pub const ALL: [SecurityFeature; 6] = [
        SecurityFeature::SimSwap,
        SecurityFeature::VpnProxy,
        SecurityFeature::DeviceChange,
        SecurityFeature::TypingAnomaly,
        SecurityFeature::LocationMismatch,
        SecurityFeature::Biometric,
    ];

    /// Safety points lost while this feature is disabled
    pub fn penalty(&self) -> u32 {
        match self {
            SecurityFeature::SimSwap => 20,
            SecurityFeature::VpnProxy => 15,
            SecurityFeature::DeviceChange => 15,
            SecurityFeature::TypingAnomaly => 10,
            SecurityFeature::LocationMismatch => 15,
            SecurityFeature::Biometric => 10,
        }
    }
}

/// Feature flags as persisted. Keys missing from the stored JSON take their
/// default (enabled).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SecurityFeatures {
    pub sim_swap: bool,
    pub vpn_proxy: bool,
    pub device_change: bool,
    pub typing_anomaly: bool,
    pub location_mismatch: bool,
    pub biometric: bool,
}

impl Default for SecurityFeatures {
    fn default() -> Self {
        SecurityFeatures {
            sim_swap: true,
            vpn_proxy: true,
            device_change: true,
            typing_anomaly: true,
            location_mismatch: true,
            biometric: true,
        }
    }
}

impl SecurityFeatures {
    pub fn get(&self, feature: SecurityFeature) -> bool {
        match feature {
            SecurityFeature::SimSwap => self.sim_swap,
            SecurityFeature::VpnProxy => self.vpn_proxy,
            SecurityFeature::DeviceChange => self.device_change,
            SecurityFeature::TypingAnomaly => self.typing_anomaly,
            SecurityFeature::LocationMismatch => self.location_mismatch,
            SecurityFeature::Biometric => self.biometric,
        }
    }

    fn slot(&mut self, feature: SecurityFeature) -> &mut bool {
        match feature {
            SecurityFeature::SimSwap => &mut self.sim_swap,
            SecurityFeature::VpnProxy => &mut self.vpn_proxy,
            SecurityFeature::DeviceChange => &mut self.device_change,
            SecurityFeature::TypingAnomaly => &mut self.typing_anomaly,
            SecurityFeature::LocationMismatch => &mut self.location_mismatch,
            SecurityFeature::Biometric => &mut self.biometric,
        }
    }

    /// 100 minus the penalty of every disabled feature; floor is 15.
    pub fn safety_score(&self) -> u32 {
        let lost: u32 = SecurityFeature::ALL
            .iter()
            .filter(|f| !self.get(**f))
            .map(SecurityFeature::penalty)
            .sum();
        100u32.saturating_sub(lost).min(100)
    }
}

/// Durable feature preferences. Every mutation writes the whole set back.
pub struct SecurityPreferences {
    store: Arc<dyn KeyValueStore>,
    features: RwLock<SecurityFeatures>,
}

impl SecurityPreferences {
    pub fn load(store: Arc<dyn KeyValueStore>) -> Self {
        let features: SecurityFeatures = get_json(store.as_ref(), PREFERENCES_KEY).unwrap_or_default();
        SecurityPreferences {
            store,
            features: RwLock::new(features),
        }
    }

    pub fn get(&self) -> SecurityFeatures {
        *self.features.read()
    }

    pub fn is_enabled(&self, feature: SecurityFeature) -> bool {
        self.features.read().get(feature)
    }

    pub fn set_feature(&self, feature: SecurityFeature, enabled: bool) -> Result<()> {
        let snapshot = {
            let mut features = self.features.write();
            *features.slot(feature) = enabled;
            *features
        };
        self.persist(&snapshot)?;
        info!("Security feature {:?} set to {}", feature, enabled);
        Ok(())
    }

    pub fn toggle(&self, feature: SecurityFeature) -> Result<bool> {
        let snapshot = {
            let mut features = self.features.write();
            let slot = features.slot(feature);
            *slot = !*slot;
            *features
        };
        self.persist(&snapshot)?;
        Ok(snapshot.get(feature))
    }

    pub fn safety_score(&self) -> u32 {
        self.features.read().safety_score()
    }

    pub fn all_enabled(&self) -> bool {
        self.safety_score() == 100
    }

    fn persist(&self, features: &SecurityFeatures) -> Result<()> {
        set_json(self.store.as_ref(), PREFERENCES_KEY, features).map_err(|e| {
            warn!("Failed to persist security preferences: {}", e);
            e
        })
    }
}

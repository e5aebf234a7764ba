// src/services/fingerprint.rs - Device fingerprint attached to security events
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::error::{AuthError, Result};
use crate::utils::generate_id;

/// Fingerprints at or above this confidence are shown as high confidence.
pub const HIGH_CONFIDENCE: f64 = 0.8;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BrowserDetails {
    pub browser_name: String,
    pub browser_version: String,
    pub os: String,
    pub os_version: String,
}

impl Default for BrowserDetails {
    fn default() -> Self {
        BrowserDetails {
            browser_name: "Unknown".to_string(),
            browser_version: "Unknown".to_string(),
            os: "Unknown".to_string(),
            os_version: "Unknown".to_string(),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct GeoCoords {
    pub lat: f64,
    pub lon: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub accuracy: Option<f64>,
}

/// Identification of the device a security event came from. `ip` is the
/// address the server observed; `coords` are present only when the user
/// granted location access.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceFingerprint {
    pub visitor_id: String,
    pub confidence: f64,
    pub browser_details: BrowserDetails,
    pub request_id: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ip: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub coords: Option<GeoCoords>,
}

impl DeviceFingerprint {
    pub fn new(visitor_id: &str, confidence: f64, browser_details: BrowserDetails) -> Self {
        DeviceFingerprint {
            visitor_id: visitor_id.to_string(),
            confidence: confidence.clamp(0.0, 1.0),
            browser_details,
            request_id: generate_id("req"),
            timestamp: Utc::now(),
            ip: None,
            coords: None,
        }
    }

    pub fn is_high_confidence(&self) -> bool {
        self.confidence >= HIGH_CONFIDENCE
    }
}

/// Device identification service. An error means no fingerprint is
/// available for this event; the event is still recorded.
#[async_trait]
pub trait FingerprintProvider: Send + Sync {
    async fn fingerprint(&self) -> Result<DeviceFingerprint>;
}

/// Provider returning a fixed fingerprint, with coordinates that can be
/// refreshed once location access is granted.
pub struct StaticFingerprintProvider {
    fingerprint: RwLock<Option<DeviceFingerprint>>,
}

impl StaticFingerprintProvider {
    pub fn new(fingerprint: DeviceFingerprint) -> Self {
        StaticFingerprintProvider {
            fingerprint: RwLock::new(Some(fingerprint)),
        }
    }

    /// Provider for a device that could not be identified.
    pub fn unavailable() -> Self {
        StaticFingerprintProvider {
            fingerprint: RwLock::new(None),
        }
    }

    /// Fingerprint of the local demo device.
    pub fn demo() -> Self {
        let mut fingerprint = DeviceFingerprint::new(
            &generate_id("visitor"),
            0.99,
            BrowserDetails {
                browser_name: "Chrome".to_string(),
                browser_version: "126".to_string(),
                os: "Linux".to_string(),
                os_version: "6".to_string(),
            },
        );
        fingerprint.ip = Some("127.0.0.1".to_string());
        Self::new(fingerprint)
    }

    pub fn set_coords(&self, coords: GeoCoords) {
        if let Some(fingerprint) = self.fingerprint.write().as_mut() {
            fingerprint.coords = Some(coords);
        }
    }
}

#[async_trait]
impl FingerprintProvider for StaticFingerprintProvider {
    async fn fingerprint(&self) -> Result<DeviceFingerprint> {
        let mut fingerprint = self
            .fingerprint
            .read()
            .clone()
            .ok_or_else(|| AuthError::NetworkError("device fingerprint unavailable".to_string()))?;
        fingerprint.request_id = generate_id("req");
        fingerprint.timestamp = Utc::now();
        Ok(fingerprint)
    }
}

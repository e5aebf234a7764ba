// src/services/typing_biometrics.rs - Typing-rhythm matching collaborator
use std::collections::HashMap;

use async_trait::async_trait;
use log::debug;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::security::behavioral_biometrics::TypingPattern;
use crate::utils::mask_email;

/// Response of the matching collaborator for one submitted sample.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum BiometricMatch {
    /// Fewer than the required reference samples existed; this one was stored.
    Enrolled {
        #[serde(rename = "sampleCount")]
        sample_count: u32,
    },
    /// References exist; `matched` is the binary verdict.
    Verified {
        #[serde(rename = "match")]
        matched: bool,
    },
}

#[async_trait]
pub trait TypingBiometricService: Send + Sync {
    async fn verify(&self, user_id: &str, pattern: &TypingPattern) -> Result<BiometricMatch>;
}

/// Reference matcher: stores the first `required_samples` per user, then
/// matches new samples against them with a timing tolerance.
pub struct InMemoryTypingBiometrics {
    references: RwLock<HashMap<String, Vec<TypingPattern>>>,
    required_samples: usize,
    tolerance_ms: f64,
}

impl Default for InMemoryTypingBiometrics {
    fn default() -> Self {
        Self::new(3, 40.0)
    }
}

impl InMemoryTypingBiometrics {
    pub fn new(required_samples: usize, tolerance_ms: f64) -> Self {
        InMemoryTypingBiometrics {
            references: RwLock::new(HashMap::new()),
            required_samples,
            tolerance_ms,
        }
    }

    pub fn sample_count(&self, user_id: &str) -> usize {
        self.references
            .read()
            .get(&user_id.trim().to_lowercase())
            .map(Vec::len)
            .unwrap_or(0)
    }

    /// Seed reference samples directly, bypassing enrollment.
    pub fn seed(&self, user_id: &str, samples: Vec<TypingPattern>) {
        self.references
            .write()
            .insert(user_id.trim().to_lowercase(), samples);
    }
}

#[async_trait]
impl TypingBiometricService for InMemoryTypingBiometrics {
    async fn verify(&self, user_id: &str, pattern: &TypingPattern) -> Result<BiometricMatch> {
        let key = user_id.trim().to_lowercase();
        let mut references = self.references.write();
        let samples = references.entry(key).or_default();

        if samples.len() < self.required_samples {
            samples.push(pattern.clone());
            debug!(
                "Stored typing sample {} for {}",
                samples.len(),
                mask_email(user_id)
            );
            return Ok(BiometricMatch::Enrolled {
                sample_count: samples.len() as u32,
            });
        }

        let matched = samples
            .iter()
            .filter_map(|reference| reference.mean_deviation(pattern))
            .any(|deviation| deviation <= self.tolerance_ms);

        Ok(BiometricMatch::Verified { matched })
    }
}

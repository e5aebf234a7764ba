// src/services/webauthn.rs - Platform authenticator (WebAuthn) collaborator
//
// Assertion signatures are not verified here; the JSON form of the assertion
// is what a server-side verifier would receive together with its challenge.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use parking_lot::Mutex;
use rand::{thread_rng, RngCore};
use serde::{Deserialize, Serialize};

use crate::error::{AuthError, Result};

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WebAuthnUser {
    pub id: String,
    pub name: String,
    pub display_name: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisteredCredential {
    pub credential_id: String,
}

/// Assertion returned by a `get` ceremony, base64url fields.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssertionResponse {
    pub id: String,
    pub raw_id: String,
    #[serde(rename = "type")]
    pub credential_type: String,
    pub response: AuthenticatorAssertion,
    pub client_extension_results: serde_json::Value,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthenticatorAssertion {
    pub authenticator_data: String,
    #[serde(rename = "clientDataJSON")]
    pub client_data_json: String,
    pub signature: String,
    pub user_handle: Option<String>,
}

pub fn to_base64url(bytes: &[u8]) -> String {
    URL_SAFE_NO_PAD.encode(bytes)
}

/// Source of ceremony challenges.
#[async_trait]
pub trait ChallengeProvider: Send + Sync {
    async fn challenge(&self) -> Result<Vec<u8>>;
}

/// Generates challenges on the client. Replayable, so only acceptable for the
/// demo; a deployment plugs in a provider that fetches one per ceremony from
/// the server.
pub struct LocalChallengeProvider {
    length: usize,
}

impl Default for LocalChallengeProvider {
    fn default() -> Self {
        LocalChallengeProvider { length: 32 }
    }
}

#[async_trait]
impl ChallengeProvider for LocalChallengeProvider {
    async fn challenge(&self) -> Result<Vec<u8>> {
        let mut challenge = vec![0u8; self.length];
        thread_rng().fill_bytes(&mut challenge);
        Ok(challenge)
    }
}

/// Built-in authenticator (Touch ID, Windows Hello, Android fingerprint).
///
/// User or OS cancellation is reported as `BiometricCancelled`, a rejected
/// assertion as `BiometricMismatch`, a missing API as `BiometricUnavailable`.
#[async_trait]
pub trait PlatformAuthenticator: Send + Sync {
    async fn is_available(&self) -> bool;
    async fn authenticate(&self, challenge: &[u8]) -> Result<AssertionResponse>;
    async fn register(&self, user: &WebAuthnUser, challenge: &[u8]) -> Result<RegisteredCredential>;
}

/// Scripted outcome for the mock authenticator
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum MockOutcome {
    Succeed,
    Cancel,
    Reject,
    DeviceError(String),
}

/// Mock platform authenticator. Outcomes are consumed in order; once the
/// script is empty every ceremony succeeds.
pub struct MockPlatformAuthenticator {
    available: AtomicBool,
    script: Mutex<VecDeque<MockOutcome>>,
    delay: Mutex<Option<Duration>>,
    ceremonies: AtomicUsize,
}

impl MockPlatformAuthenticator {
    pub fn new(available: bool) -> Self {
        MockPlatformAuthenticator {
            available: AtomicBool::new(available),
            script: Mutex::new(VecDeque::new()),
            delay: Mutex::new(None),
            ceremonies: AtomicUsize::new(0),
        }
    }

    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    pub fn push_outcome(&self, outcome: MockOutcome) {
        self.script.lock().push_back(outcome);
    }

    /// Make each ceremony take `delay` before resolving.
    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock() = Some(delay);
    }

    pub fn ceremony_count(&self) -> usize {
        self.ceremonies.load(Ordering::SeqCst)
    }

    async fn run_ceremony(&self) -> Result<()> {
        self.ceremonies.fetch_add(1, Ordering::SeqCst);

        if !self.available.load(Ordering::SeqCst) {
            return Err(AuthError::BiometricUnavailable);
        }

        let delay = *self.delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let outcome = self.script.lock().pop_front().unwrap_or(MockOutcome::Succeed);
        match outcome {
            MockOutcome::Succeed => Ok(()),
            MockOutcome::Cancel => Err(AuthError::BiometricCancelled),
            MockOutcome::Reject => Err(AuthError::BiometricMismatch),
            MockOutcome::DeviceError(msg) => Err(AuthError::NetworkError(msg)),
        }
    }

    fn random_b64(len: usize) -> String {
        let mut bytes = vec![0u8; len];
        thread_rng().fill_bytes(&mut bytes);
        to_base64url(&bytes)
    }
}

#[async_trait]
impl PlatformAuthenticator for MockPlatformAuthenticator {
    async fn is_available(&self) -> bool {
        self.available.load(Ordering::SeqCst)
    }

    async fn authenticate(&self, challenge: &[u8]) -> Result<AssertionResponse> {
        self.run_ceremony().await?;

        let raw_id = Self::random_b64(16);
        let client_data = serde_json::json!({
            "type": "webauthn.get",
            "challenge": to_base64url(challenge),
            "origin": "http://localhost",
        });

        Ok(AssertionResponse {
            id: raw_id.clone(),
            raw_id,
            credential_type: "public-key".to_string(),
            response: AuthenticatorAssertion {
                authenticator_data: Self::random_b64(37),
                client_data_json: to_base64url(client_data.to_string().as_bytes()),
                signature: Self::random_b64(64),
                user_handle: None,
            },
            client_extension_results: serde_json::json!({}),
        })
    }

    async fn register(&self, _user: &WebAuthnUser, _challenge: &[u8]) -> Result<RegisteredCredential> {
        self.run_ceremony().await?;
        Ok(RegisteredCredential {
            credential_id: Self::random_b64(16),
        })
    }
}

// src/services/mod.rs - Collaborator contracts consumed by the core
//
// Each collaborator is a trait so the flows can be driven by a real backend
// client or by the in-memory implementations used for the demo and tests.

pub mod accounts;
pub mod bot_detection;
pub mod fingerprint;
pub mod otp;
pub mod security_log;
pub mod typing_biometrics;
pub mod webauthn;

use std::future::Future;
use std::time::Duration;

use crate::error::{AuthError, Result};

pub use accounts::{AccountsService, InMemoryAccounts};
pub use bot_detection::{BotClassifier, BotDetection, BotVerdict, BrowserSignals, StaticBotClassifier};
pub use fingerprint::{BrowserDetails, DeviceFingerprint, FingerprintProvider, GeoCoords, StaticFingerprintProvider};
pub use otp::{InMemoryOtpService, OtpService};
pub use security_log::{
    LogFilter, MemorySecurityLog, SecurityAction, SecurityAudit, SecurityLogEvent, SecurityLogSink,
};
pub use typing_biometrics::{BiometricMatch, InMemoryTypingBiometrics, TypingBiometricService};
pub use webauthn::{
    AssertionResponse, ChallengeProvider, LocalChallengeProvider, MockPlatformAuthenticator,
    PlatformAuthenticator, RegisteredCredential, WebAuthnUser,
};

/// Bound a collaborator call. An elapsed timeout is reported as a network error.
pub async fn with_timeout<T, F>(limit: Duration, operation: &str, call: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match tokio::time::timeout(limit, call).await {
        Ok(result) => result,
        Err(_) => Err(AuthError::NetworkError(format!(
            "{} timed out after {}ms",
            operation,
            limit.as_millis()
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_with_timeout_maps_elapsed_to_network_error() {
        let result: Result<()> = with_timeout(Duration::from_secs(1), "otp send", async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(())
        })
        .await;

        match result {
            Err(AuthError::NetworkError(msg)) => assert!(msg.contains("otp send")),
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_with_timeout_passes_through_result() {
        let ok: Result<u8> = with_timeout(Duration::from_secs(1), "x", async { Ok(7) }).await;
        assert_eq!(ok, Ok(7));

        let err: Result<u8> =
            with_timeout(Duration::from_secs(1), "x", async { Err(AuthError::InvalidOtp) }).await;
        assert_eq!(err, Err(AuthError::InvalidOtp));
    }
}

// src/services/otp.rs - One-time passcode delivery and verification
use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use log::{debug, info};
use parking_lot::RwLock;
use rand::Rng;
use tokio::time::Instant;

use crate::error::Result;
use crate::utils::mask_email;

// Codes stay valid for 5 minutes
pub const OTP_TTL: Duration = Duration::from_secs(5 * 60);

/// OTP collaborator. Rate limiting is the caller's job (send cooldown).
#[async_trait]
pub trait OtpService: Send + Sync {
    async fn send_otp(&self, email: &str) -> Result<()>;

    /// Returns `Ok(false)` for a wrong or expired code.
    async fn verify_otp(&self, email: &str, code: &str) -> Result<bool>;
}

#[derive(Clone, Debug)]
struct IssuedCode {
    code: String,
    expires_at: Instant,
}

/// Reference OTP issuer: one live 6-digit code per email, consumed on use.
///
/// Delivery is simulated by keeping the last code in an outbox that the demo
/// and tests can read back.
pub struct InMemoryOtpService {
    codes: RwLock<HashMap<String, IssuedCode>>,
    ttl: Duration,
}

impl Default for InMemoryOtpService {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryOtpService {
    pub fn new() -> Self {
        Self::with_ttl(OTP_TTL)
    }

    pub fn with_ttl(ttl: Duration) -> Self {
        InMemoryOtpService {
            codes: RwLock::new(HashMap::new()),
            ttl,
        }
    }

    /// Last code issued to `email`, if still stored.
    pub fn outbox(&self, email: &str) -> Option<String> {
        self.codes
            .read()
            .get(&email.trim().to_lowercase())
            .map(|issued| issued.code.clone())
    }

    fn generate_code() -> String {
        format!("{:06}", rand::thread_rng().gen_range(0..=999_999u32))
    }

    fn cleanup_expired(codes: &mut HashMap<String, IssuedCode>, now: Instant) {
        codes.retain(|_, issued| issued.expires_at >= now);
    }
}

#[async_trait]
impl OtpService for InMemoryOtpService {
    async fn send_otp(&self, email: &str) -> Result<()> {
        let now = Instant::now();
        let key = email.trim().to_lowercase();

        let mut codes = self.codes.write();
        Self::cleanup_expired(&mut codes, now);
        codes.insert(
            key,
            IssuedCode {
                code: Self::generate_code(),
                expires_at: now + self.ttl,
            },
        );

        info!("Issued one-time code to {}", mask_email(email));
        Ok(())
    }

    async fn verify_otp(&self, email: &str, code: &str) -> Result<bool> {
        let now = Instant::now();
        let key = email.trim().to_lowercase();

        let mut codes = self.codes.write();
        let issued = match codes.get(&key) {
            Some(issued) => issued.clone(),
            None => return Ok(false),
        };

        if issued.expires_at < now {
            debug!("One-time code for {} expired", mask_email(email));
            codes.remove(&key);
            return Ok(false);
        }

        if issued.code != code.trim() {
            return Ok(false);
        }

        // consume
        codes.remove(&key);
        Ok(true)
    }
}

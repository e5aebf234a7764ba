// src/config.rs - Settings for the authentication and risk core
use anyhow::{Context, Result};
use log::{info, warn};
use serde::Deserialize;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Runtime settings. Every field has a default so a partial TOML file works.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub risk_tick_ms: u64,
    pub risk_trend_cap: usize,
    pub risk_signal_flip_probability: f64,
    pub risk_challenge_threshold: f64,
    pub challenge_interval_secs: u64,
    pub otp_cooldown_secs: u64,
    pub request_timeout_ms: u64,
    pub security_log_timeout_ms: u64,
    pub webauthn_timeout_ms: u64,
    pub gate_hover_delay_ms: u64,
    pub enrollment_samples: u32,
    pub gate_security_logs: bool,
    pub durable_store_path: PathBuf,
    pub log_level: String,
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            risk_tick_ms: 3000,
            risk_trend_cap: 30,
            risk_signal_flip_probability: 0.15,
            risk_challenge_threshold: 70.0,
            challenge_interval_secs: 600, // 10 minutes
            otp_cooldown_secs: 30,
            request_timeout_ms: 15_000,
            security_log_timeout_ms: 2_000,
            webauthn_timeout_ms: 60_000,
            gate_hover_delay_ms: 800,
            enrollment_samples: 3,
            gate_security_logs: false,
            durable_store_path: PathBuf::from("data/preferences.json"),
            log_level: "info".to_string(),
        }
    }
}

impl Settings {
    pub fn risk_tick(&self) -> Duration {
        Duration::from_millis(self.risk_tick_ms)
    }

    pub fn challenge_interval(&self) -> Duration {
        Duration::from_secs(self.challenge_interval_secs)
    }

    pub fn otp_cooldown(&self) -> Duration {
        Duration::from_secs(self.otp_cooldown_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn security_log_timeout(&self) -> Duration {
        Duration::from_millis(self.security_log_timeout_ms)
    }

    pub fn webauthn_timeout(&self) -> Duration {
        Duration::from_millis(self.webauthn_timeout_ms)
    }

    pub fn gate_hover_delay(&self) -> Duration {
        Duration::from_millis(self.gate_hover_delay_ms)
    }

    /// Replace values the engines cannot run with. Each replacement is
    /// logged; nothing here fails.
    pub fn sanitize(&mut self) {
        let defaults = Settings::default();

        if self.risk_tick_ms == 0 {
            warn!("risk_tick_ms must be positive, using {}", defaults.risk_tick_ms);
            self.risk_tick_ms = defaults.risk_tick_ms;
        }

        if self.challenge_interval_secs == 0 {
            warn!(
                "challenge_interval_secs must be positive, using {}",
                defaults.challenge_interval_secs
            );
            self.challenge_interval_secs = defaults.challenge_interval_secs;
        }

        if self.risk_trend_cap == 0 {
            warn!("risk_trend_cap must be positive, using {}", defaults.risk_trend_cap);
            self.risk_trend_cap = defaults.risk_trend_cap;
        }

        if self.enrollment_samples == 0 {
            warn!("enrollment_samples must be positive, using {}", defaults.enrollment_samples);
            self.enrollment_samples = defaults.enrollment_samples;
        }

        let p = self.risk_signal_flip_probability;
        if !p.is_finite() {
            warn!(
                "risk_signal_flip_probability {} is not a number, using {}",
                p, defaults.risk_signal_flip_probability
            );
            self.risk_signal_flip_probability = defaults.risk_signal_flip_probability;
        } else if !(0.0..=1.0).contains(&p) {
            warn!("risk_signal_flip_probability {} out of range, clamping to [0, 1]", p);
            self.risk_signal_flip_probability = p.clamp(0.0, 1.0);
        }

        if !self.risk_challenge_threshold.is_finite() {
            warn!(
                "risk_challenge_threshold {} is not a number, using {}",
                self.risk_challenge_threshold, defaults.risk_challenge_threshold
            );
            self.risk_challenge_threshold = defaults.risk_challenge_threshold;
        }
    }
}

/// Load settings: defaults, then an optional TOML file, then the environment.
pub fn load_config(path: Option<&Path>) -> Result<Settings> {
    // Load .env file if present
    dotenv::dotenv().ok();

    let mut config = Settings::default();

    let file = path
        .map(Path::to_path_buf)
        .or_else(|| env::var("SECURE_BANKING_CONFIG").ok().map(PathBuf::from));

    if let Some(file) = file {
        config = load_from_file(&file)?;
        info!("Loaded configuration from {}", file.display());
    }

    apply_env_overrides(&mut config);
    config.sanitize();

    Ok(config)
}

/// Load configuration from a TOML file
fn load_from_file(path: &Path) -> Result<Settings> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("Failed to read configuration file {}", path.display()))?;

    toml::from_str(&raw).context("Failed to parse configuration file")
}

fn parse_env<T: std::str::FromStr>(key: &str) -> Option<T> {
    let value = env::var(key).ok()?;
    match value.trim().parse() {
        Ok(parsed) => Some(parsed),
        Err(_) => {
            warn!("Ignoring unparseable value for {}: {:?}", key, value);
            None
        }
    }
}

/// Apply environment variable overrides
fn apply_env_overrides(config: &mut Settings) {
    if let Some(ms) = parse_env("RISK_TICK_MS") {
        config.risk_tick_ms = ms;
    }

    if let Some(cap) = parse_env("RISK_TREND_CAP") {
        config.risk_trend_cap = cap;
    }

    if let Some(threshold) = parse_env("RISK_CHALLENGE_THRESHOLD") {
        config.risk_challenge_threshold = threshold;
    }

    if let Some(secs) = parse_env("CHALLENGE_INTERVAL_SECS") {
        config.challenge_interval_secs = secs;
    }

    if let Some(secs) = parse_env("OTP_COOLDOWN_SECS") {
        config.otp_cooldown_secs = secs;
    }

    if let Some(ms) = parse_env("REQUEST_TIMEOUT_MS") {
        config.request_timeout_ms = ms;
    }

    if let Some(ms) = parse_env("WEBAUTHN_TIMEOUT_MS") {
        config.webauthn_timeout_ms = ms;
    }

    if let Some(enabled) = parse_env("GATE_SECURITY_LOGS") {
        config.gate_security_logs = enabled;
    }

    if let Ok(path) = env::var("DURABLE_STORE_PATH") {
        config.durable_store_path = PathBuf::from(path);
    }

    if let Ok(level) = env::var("LOG_LEVEL") {
        config.log_level = level;
    }
}

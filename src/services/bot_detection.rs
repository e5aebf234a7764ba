// src/services/bot_detection.rs - Third-party bot classification signal
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::{AuthError, Result};

// Classifier probability at or above this counts as automated
pub const BOT_PROBABILITY_THRESHOLD: f64 = 0.7;

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct BotVerdict {
    pub probability: Option<f64>,
    pub name: Option<String>,
    #[serde(rename = "type")]
    pub kind: Option<String>,
    pub classification: Option<String>,
    pub result: Option<String>,
}

/// Browser-side automation signals reported alongside the verdict
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct BrowserSignals {
    pub webdriver: Option<bool>,
}

/// Classifier output. Every field is optional; classifiers differ in which
/// of them they fill in.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BotDetection {
    pub request_id: Option<String>,
    pub bot: Option<BotVerdict>,
    pub browser: Option<BrowserSignals>,
}

impl BotDetection {
    /// Result used when the classifier cannot be loaded: only the local
    /// automation flag is known.
    pub fn webdriver_only(webdriver: bool) -> Self {
        BotDetection {
            browser: Some(BrowserSignals {
                webdriver: Some(webdriver),
            }),
            ..Default::default()
        }
    }

    pub fn browser_webdriver(&self) -> bool {
        self.browser
            .as_ref()
            .and_then(|browser| browser.webdriver)
            .unwrap_or(false)
    }

    pub fn is_suspicious(&self, webdriver_flag: bool) -> bool {
        if webdriver_flag || self.browser_webdriver() {
            return true;
        }

        match &self.bot {
            Some(bot) => {
                let named = bot.name.is_some() || bot.kind.is_some() || bot.classification.is_some();
                let bad = bot.result.as_deref() == Some("bad");
                let probable = bot.probability.unwrap_or(0.0) >= BOT_PROBABILITY_THRESHOLD;
                named || bad || probable
            }
            None => false,
        }
    }

    /// Short description of the strongest signal, for the warning text.
    pub fn label(&self, webdriver_flag: bool) -> String {
        self.bot
            .as_ref()
            .and_then(|bot| {
                bot.name
                    .clone()
                    .or_else(|| bot.kind.clone())
                    .or_else(|| bot.classification.clone())
            })
            .or_else(|| webdriver_flag.then(|| "webdriver".to_string()))
            .unwrap_or_else(|| "automation suspected".to_string())
    }
}

#[async_trait]
pub trait BotClassifier: Send + Sync {
    async fn detect(&self) -> Result<BotDetection>;
}

/// Classifier returning a fixed detection, or failing to load when `None`.
pub struct StaticBotClassifier {
    detection: Option<BotDetection>,
}

impl StaticBotClassifier {
    pub fn new(detection: BotDetection) -> Self {
        StaticBotClassifier {
            detection: Some(detection),
        }
    }

    pub fn unreachable() -> Self {
        StaticBotClassifier { detection: None }
    }
}

#[async_trait]
impl BotClassifier for StaticBotClassifier {
    async fn detect(&self) -> Result<BotDetection> {
        self.detection
            .clone()
            .ok_or_else(|| AuthError::NetworkError("bot classifier failed to load".to_string()))
    }
}

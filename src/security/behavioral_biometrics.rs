// src/security/behavioral_biometrics.rs - Keystroke capture for typing-rhythm checks
//
// The client only captures timings; matching happens in the typing-biometric
// collaborator.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

// Keystroke time
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeystrokeTime {
    pub key: String,
    pub key_down_time: u64, // milliseconds
    pub key_up_time: u64,   // milliseconds
}

/// Timing profile of one typing action: how long each key was held (dwell)
/// and the gap between releasing one key and pressing the next (flight).
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypingPattern {
    pub dwell_ms: Vec<u32>,
    pub flight_ms: Vec<i64>,
}

impl TypingPattern {
    pub fn from_keystrokes(keystrokes: &[KeystrokeTime]) -> Self {
        let dwell_ms = keystrokes
            .iter()
            .map(|k| k.key_up_time.saturating_sub(k.key_down_time) as u32)
            .collect();

        // overlapping keys give negative flight times
        let flight_ms = keystrokes
            .windows(2)
            .map(|pair| pair[1].key_down_time as i64 - pair[0].key_up_time as i64)
            .collect();

        TypingPattern { dwell_ms, flight_ms }
    }

    pub fn keystroke_count(&self) -> usize {
        self.dwell_ms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.dwell_ms.is_empty()
    }

    /// Compact wire form: `dwell,dwell,...|flight,flight,...`
    pub fn encode(&self) -> String {
        let dwell: Vec<String> = self.dwell_ms.iter().map(|d| d.to_string()).collect();
        let flight: Vec<String> = self.flight_ms.iter().map(|f| f.to_string()).collect();
        format!("{}|{}", dwell.join(","), flight.join(","))
    }

    pub fn decode(raw: &str) -> Option<Self> {
        let (dwell, flight) = raw.split_once('|')?;

        fn parse_list<T: std::str::FromStr>(list: &str) -> Option<Vec<T>> {
            if list.is_empty() {
                return Some(Vec::new());
            }
            list.split(',').map(|v| v.trim().parse().ok()).collect()
        }

        Some(TypingPattern {
            dwell_ms: parse_list(dwell)?,
            flight_ms: parse_list(flight)?,
        })
    }

    /// Mean absolute timing difference against another sample of the same
    /// text. `None` when the samples have different keystroke counts.
    pub fn mean_deviation(&self, other: &TypingPattern) -> Option<f64> {
        if self.dwell_ms.len() != other.dwell_ms.len()
            || self.flight_ms.len() != other.flight_ms.len()
            || self.is_empty()
        {
            return None;
        }

        let dwell_diff = self
            .dwell_ms
            .iter()
            .zip(&other.dwell_ms)
            .map(|(a, b)| (*a as f64 - *b as f64).abs());
        let flight_diff = self
            .flight_ms
            .iter()
            .zip(&other.flight_ms)
            .map(|(a, b)| (*a as f64 - *b as f64).abs());

        let diffs: Vec<f64> = dwell_diff.chain(flight_diff).collect();
        Some(diffs.iter().sum::<f64>() / diffs.len() as f64)
    }
}

/// Records key events for one input field and produces a `TypingPattern`.
#[derive(Debug, Default)]
pub struct KeystrokeRecorder {
    pressed: HashMap<String, u64>,
    completed: Vec<KeystrokeTime>,
}

impl KeystrokeRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn key_down(&mut self, key: &str, at_ms: u64) {
        // auto-repeat keeps the first press time
        self.pressed.entry(key.to_string()).or_insert(at_ms);
    }

    pub fn key_up(&mut self, key: &str, at_ms: u64) {
        if let Some(down) = self.pressed.remove(key) {
            self.completed.push(KeystrokeTime {
                key: key.to_string(),
                key_down_time: down,
                key_up_time: at_ms.max(down),
            });
        }
    }

    pub fn keystrokes(&self) -> &[KeystrokeTime] {
        &self.completed
    }

    pub fn pattern(&self) -> TypingPattern {
        let mut ordered = self.completed.clone();
        ordered.sort_by_key(|k| k.key_down_time);
        TypingPattern::from_keystrokes(&ordered)
    }

    pub fn reset(&mut self) {
        self.pressed.clear();
        self.completed.clear();
    }
}

/// Pattern of `text` typed at a steady rhythm, for scripted sessions.
pub fn pattern_for(text: &str, dwell: u64, gap: u64) -> TypingPattern {
    let mut recorder = KeystrokeRecorder::new();
    let mut t = 1_000;
    for ch in text.chars() {
        let key = ch.to_string();
        recorder.key_down(&key, t);
        recorder.key_up(&key, t + dwell);
        t += dwell + gap;
    }
    recorder.pattern()
}

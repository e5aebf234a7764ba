// src/security/risk_engine.rs - Live session fraud-risk estimate
//
// score = clamp(base + sum of active signal weights). The base drifts on
// every tick; signals are set by detectors or flipped by the ambient noise
// model. Every mutation publishes the new state to subscribers.

use std::collections::VecDeque;
use std::sync::{Arc, Weak};

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use log::{debug, info};
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use crate::config::Settings;
use crate::events::{EventBus, Subscription};
use crate::utils::task::ScheduledTask;

pub const MIN_SCORE: f64 = 0.0;
pub const MAX_SCORE: f64 = 100.0;

// Samples a fresh engine starts with
const SEEDED_TREND_SAMPLES: usize = 20;

fn bounded(value: f64) -> f64 {
    value.clamp(MIN_SCORE, MAX_SCORE)
}

// gen_bool panics outside [0, 1]
fn flip_probability(p: f64) -> f64 {
    if p.is_nan() {
        0.0
    } else {
        p.clamp(0.0, 1.0)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum RiskSignal {
    SimSwap,
    Vpn,
    DeviceChange,
    TypingAnomaly,
    LocationMismatch,
}

impl RiskSignal {
    pub const ALL: [RiskSignal; 5] = [
        RiskSignal::SimSwap,
        RiskSignal::Vpn,
        RiskSignal::DeviceChange,
        RiskSignal::TypingAnomaly,
        RiskSignal::LocationMismatch,
    ];

    /// Points an active signal adds to the score
    pub fn weight(&self) -> f64 {
        match self {
            RiskSignal::Vpn => 15.0,
            RiskSignal::DeviceChange => 20.0,
            RiskSignal::SimSwap => 20.0,
            RiskSignal::TypingAnomaly => 10.0,
            RiskSignal::LocationMismatch => 15.0,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RiskSignal::SimSwap => "sim-swap",
            RiskSignal::Vpn => "vpn",
            RiskSignal::DeviceChange => "device-change",
            RiskSignal::TypingAnomaly => "typing-anomaly",
            RiskSignal::LocationMismatch => "location-mismatch",
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FraudSignals {
    pub sim_swap: bool,
    pub vpn: bool,
    pub device_change: bool,
    pub typing_anomaly: bool,
    pub location_mismatch: bool,
}

impl FraudSignals {
    pub fn get(&self, signal: RiskSignal) -> bool {
        match signal {
            RiskSignal::SimSwap => self.sim_swap,
            RiskSignal::Vpn => self.vpn,
            RiskSignal::DeviceChange => self.device_change,
            RiskSignal::TypingAnomaly => self.typing_anomaly,
            RiskSignal::LocationMismatch => self.location_mismatch,
        }
    }

    pub fn set(&mut self, signal: RiskSignal, active: bool) {
        let slot = match signal {
            RiskSignal::SimSwap => &mut self.sim_swap,
            RiskSignal::Vpn => &mut self.vpn,
            RiskSignal::DeviceChange => &mut self.device_change,
            RiskSignal::TypingAnomaly => &mut self.typing_anomaly,
            RiskSignal::LocationMismatch => &mut self.location_mismatch,
        };
        *slot = active;
    }

    pub fn active(&self) -> Vec<RiskSignal> {
        RiskSignal::ALL.iter().copied().filter(|s| self.get(*s)).collect()
    }

    pub fn penalty(&self) -> f64 {
        self.active().iter().map(RiskSignal::weight).sum()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
}

impl RiskLevel {
    pub fn from_score(score: f64) -> Self {
        if score <= 30.0 {
            RiskLevel::Low
        } else if score < 70.0 {
            RiskLevel::Medium
        } else {
            RiskLevel::High
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TrendPoint {
    pub timestamp: DateTime<Utc>,
    pub score: f64,
}

/// Snapshot of the engine handed to readers and subscribers.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RiskState {
    pub score: f64,
    pub signals: FraudSignals,
    pub trend: VecDeque<TrendPoint>,
}

impl RiskState {
    pub fn level(&self) -> RiskLevel {
        RiskLevel::from_score(self.score)
    }
}

struct EngineInner {
    base: f64,
    state: RiskState,
    rng: StdRng,
}

impl EngineInner {
    fn recompute(&mut self) {
        self.state.score = bounded(self.base + self.state.signals.penalty());
    }

    fn push_sample(&mut self, cap: usize) {
        self.state.trend.push_back(TrendPoint {
            timestamp: Utc::now(),
            score: self.state.score,
        });
        while self.state.trend.len() > cap {
            self.state.trend.pop_front();
        }
    }
}

pub struct RiskEngine {
    inner: Mutex<EngineInner>,
    trend_cap: usize,
    flip_probability: f64,
    tick_period: std::time::Duration,
    changes: EventBus<RiskState>,
}

impl RiskEngine {
    pub fn new(settings: &Settings) -> Self {
        Self::with_rng(settings, StdRng::from_entropy())
    }

    /// Deterministic engine for tests and replayable demos.
    pub fn with_seed(settings: &Settings, seed: u64) -> Self {
        Self::with_rng(settings, StdRng::seed_from_u64(seed))
    }

    fn with_rng(settings: &Settings, mut rng: StdRng) -> Self {
        let base = rng.gen_range(10.0..25.0);
        let tick_ms = settings.risk_tick_ms as i64;
        let now = Utc::now();
        let cap = settings.risk_trend_cap.max(1);

        let mut trend: VecDeque<TrendPoint> = (0..SEEDED_TREND_SAMPLES)
            .map(|i| TrendPoint {
                timestamp: now - ChronoDuration::milliseconds(tick_ms * (SEEDED_TREND_SAMPLES - i) as i64),
                score: bounded(base + rng.gen_range(-5.0..5.0)),
            })
            .collect();
        while trend.len() > cap {
            trend.pop_front();
        }

        RiskEngine {
            inner: Mutex::new(EngineInner {
                base,
                state: RiskState {
                    score: bounded(base),
                    signals: FraudSignals::default(),
                    trend,
                },
                rng,
            }),
            trend_cap: cap,
            flip_probability: flip_probability(settings.risk_signal_flip_probability),
            tick_period: settings.risk_tick(),
            changes: EventBus::new(),
        }
    }

    pub fn get_state(&self) -> RiskState {
        self.inner.lock().state.clone()
    }

    pub fn score(&self) -> f64 {
        self.inner.lock().state.score
    }

    pub fn set_signal(&self, signal: RiskSignal, active: bool) {
        let snapshot = {
            let mut inner = self.inner.lock();
            if inner.state.signals.get(signal) == active {
                return;
            }
            inner.state.signals.set(signal, active);
            inner.recompute();
            inner.state.clone()
        };

        debug!("Risk signal {} -> {} (score {:.1})", signal.as_str(), active, snapshot.score);
        self.changes.publish(&snapshot);
    }

    /// A successful step-up clears every signal and roughly halves the score.
    pub fn lower_risk(&self) {
        let snapshot = {
            let mut inner = self.inner.lock();
            let relief = inner.rng.gen_range(5.0..15.0);
            let score = bounded(inner.state.score * 0.5 + relief);
            inner.state.signals = FraudSignals::default();
            inner.base = score;
            inner.state.score = score;
            inner.state.clone()
        };

        info!("Risk lowered after step-up, score now {:.1}", snapshot.score);
        self.changes.publish(&snapshot);
    }

    /// Raise the base by `points`, for detectors that report graded evidence
    /// rather than one of the fixed signals.
    pub fn elevate(&self, points: f64, reason: &str) {
        let snapshot = {
            let mut inner = self.inner.lock();
            inner.base = bounded(inner.base + points);
            inner.recompute();
            inner.state.clone()
        };

        info!("Risk elevated by {:.0} ({}), score now {:.1}", points, reason, snapshot.score);
        self.changes.publish(&snapshot);
    }

    /// One drift step: perturb the base, maybe flip one signal, sample the trend.
    pub fn tick(&self) {
        let snapshot = {
            let mut inner = self.inner.lock();

            let drift = inner.rng.gen_range(-6.0..6.0);
            inner.base = bounded(inner.base + drift);

            if inner.rng.gen_bool(self.flip_probability) {
                let signal = RiskSignal::ALL[inner.rng.gen_range(0..RiskSignal::ALL.len())];
                let current = inner.state.signals.get(signal);
                inner.state.signals.set(signal, !current);
                debug!("Ambient signal flip: {} -> {}", signal.as_str(), !current);
            }

            inner.recompute();
            inner.push_sample(self.trend_cap);
            inner.state.clone()
        };

        self.changes.publish(&snapshot);
    }

    pub fn subscribe<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&RiskState) + Send + Sync + 'static,
    {
        self.changes.subscribe(listener)
    }

    /// Start the drift loop. The task holds only a weak reference and ends on
    /// its own once the engine is dropped.
    pub fn start(self: &Arc<Self>) -> ScheduledTask {
        let engine: Weak<RiskEngine> = Arc::downgrade(self);
        ScheduledTask::repeating("risk-drift", self.tick_period, move || match engine.upgrade() {
            Some(engine) => {
                engine.tick();
                true
            }
            None => false,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn engine(seed: u64) -> RiskEngine {
        RiskEngine::with_seed(&Settings::default(), seed)
    }

    #[test]
    fn test_initial_state() {
        let engine = engine(1);
        let state = engine.get_state();
        assert!(state.score >= 10.0 && state.score < 25.0);
        assert_eq!(state.trend.len(), 20);
        assert!(state.signals.active().is_empty());
        assert_eq!(state.level(), RiskLevel::Low);
    }

    #[test]
    fn test_score_bounded_for_all_signal_combinations() {
        for mask in 0u32..32 {
            let engine = engine(mask as u64);
            engine.elevate(95.0, "test");
            for (i, signal) in RiskSignal::ALL.iter().enumerate() {
                engine.set_signal(*signal, mask & (1 << i) != 0);
            }
            let score = engine.score();
            assert!((MIN_SCORE..=MAX_SCORE).contains(&score), "score {} out of range", score);
        }
    }

    #[test]
    fn test_unusable_flip_probability_does_not_panic() {
        let settings = Settings {
            risk_signal_flip_probability: f64::NAN,
            ..Settings::default()
        };
        let engine = RiskEngine::with_seed(&settings, 5);
        for _ in 0..50 {
            engine.tick();
        }
        assert!(engine.get_state().signals.active().is_empty());

        let settings = Settings {
            risk_signal_flip_probability: 7.0,
            ..Settings::default()
        };
        RiskEngine::with_seed(&settings, 5).tick();
    }

    #[test]
    fn test_signal_adds_weight_and_clearing_restores() {
        let engine = engine(2);
        let before = engine.score();

        engine.set_signal(RiskSignal::DeviceChange, true);
        assert!((engine.score() - (before + 20.0)).abs() < 1e-9);

        engine.set_signal(RiskSignal::DeviceChange, false);
        assert!((engine.score() - before).abs() < 1e-9);
    }

    #[test]
    fn test_lower_risk_clears_signals_and_reduces_mean() {
        let mut total = 0.0;
        let trials = 200;
        for seed in 0..trials {
            let engine = engine(seed);
            engine.elevate(60.0, "test");
            engine.set_signal(RiskSignal::SimSwap, true);
            engine.set_signal(RiskSignal::Vpn, true);

            engine.lower_risk();
            let state = engine.get_state();
            assert!(state.signals.active().is_empty());
            total += state.score;
        }

        // prior is pinned at 100; posterior is 50 + U(5,15)
        let mean = total / trials as f64;
        assert!(mean < 100.0);
        assert!(mean > 55.0 && mean < 65.0, "mean {}", mean);
    }

    #[test]
    fn test_trend_capped_fifo() {
        let engine = engine(3);
        let first_seeded = engine.get_state().trend[0].clone();

        for _ in 0..50 {
            engine.tick();
        }

        let state = engine.get_state();
        assert_eq!(state.trend.len(), 30);
        assert_ne!(state.trend[0], first_seeded);
        assert_eq!(state.trend.back().map(|p| p.score), Some(state.score));
    }

    #[test]
    fn test_ticks_stay_in_range() {
        let engine = engine(4);
        for _ in 0..500 {
            engine.tick();
            let score = engine.score();
            assert!((MIN_SCORE..=MAX_SCORE).contains(&score));
        }
    }

    #[test]
    fn test_flip_probability_one_flips_every_tick() {
        let settings = Settings {
            risk_signal_flip_probability: 1.0,
            ..Settings::default()
        };
        let engine = RiskEngine::with_seed(&settings, 5);
        let before = engine.get_state().signals;
        engine.tick();
        let after = engine.get_state().signals;

        let changed = RiskSignal::ALL
            .iter()
            .filter(|s| before.get(**s) != after.get(**s))
            .count();
        assert_eq!(changed, 1);
    }

    #[test]
    fn test_changes_are_published() {
        let engine = engine(6);
        let seen = Arc::new(AtomicUsize::new(0));
        let s = seen.clone();
        let _sub = engine.subscribe(move |_| {
            s.fetch_add(1, Ordering::SeqCst);
        });

        engine.set_signal(RiskSignal::Vpn, true);
        engine.set_signal(RiskSignal::Vpn, true); // no change, no event
        engine.tick();
        engine.lower_risk();
        assert_eq!(seen.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_levels() {
        assert_eq!(RiskLevel::from_score(30.0), RiskLevel::Low);
        assert_eq!(RiskLevel::from_score(30.1), RiskLevel::Medium);
        assert_eq!(RiskLevel::from_score(69.9), RiskLevel::Medium);
        assert_eq!(RiskLevel::from_score(70.0), RiskLevel::High);
    }

    #[tokio::test(start_paused = true)]
    async fn test_drift_task_ticks_and_stops_with_engine() {
        let engine = Arc::new(engine(7));
        let task = engine.start();
        let initial_len = engine.get_state().trend.len();

        tokio::time::sleep(Duration::from_millis(3000 * 3 + 100)).await;
        assert_eq!(engine.get_state().trend.len(), initial_len + 3);

        drop(engine);
        tokio::time::sleep(Duration::from_millis(3100)).await;
        assert!(!task.is_running());
    }
}

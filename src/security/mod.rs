// src/security/mod.rs - Adaptive authentication and session-risk core
pub mod automation;
pub mod behavioral_biometrics;
pub mod biometric_gate;
pub mod enrollment;
pub mod honeypot;
pub mod ledger;
pub mod login_flow;
pub mod password;
pub mod periodic_challenge;
pub mod preferences;
pub mod risk_engine;

pub use automation::{AutomationDetector, BotWarning};
pub use behavioral_biometrics::{KeystrokeRecorder, TypingPattern};
pub use biometric_gate::{BiometricGateController, GateState, GateVisit};
pub use enrollment::{AccountCreationFlow, EnrollmentProgress, EnrollmentSession, NewAccount};
pub use honeypot::{HoneypotGuard, HoneypotTrigger};
pub use ledger::{SessionVerificationLedger, VerificationCompleted};
pub use login_flow::{AuthMode, LoginAttemptState, LoginStep, SessionEstablished, StepUpAuthFlow};
pub use periodic_challenge::{ChallengeReason, PeriodicChallengeController};
pub use preferences::{SecurityFeature, SecurityFeatures, SecurityPreferences};
pub use risk_engine::{RiskEngine, RiskLevel, RiskSignal, RiskState, TrendPoint};

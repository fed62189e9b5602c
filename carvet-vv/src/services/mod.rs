//! Verification services

pub mod decision;
pub mod scoring;
pub mod verifier;
pub mod vision;

pub use decision::{Decision, DecisionInput, DecisionPolicy, Outcome};
pub use scoring::ScoreAggregator;
pub use verifier::{GovernorConfig, VerificationEngine, VerifyError, VerifyOutcome};
pub use vision::{VisionClient, VisionConfig, VisionError};

//! Data model for the verification service

pub mod attempt;
pub mod detection;
pub mod vehicle;

pub use attempt::VerificationAttempt;
pub use detection::{DetectedInfo, MatchScores, VisionReport};
pub use vehicle::{ListingClaim, VerificationState, VerificationStatus};

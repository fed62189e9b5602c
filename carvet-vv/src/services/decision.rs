//! Status decision rules
//!
//! Turns an aggregated confidence score and the vision flags into the
//! listing's next status. The rules are priority-ordered and expressed as
//! an explicit classification into a tagged `Outcome`, so precedence is
//! auditable and testable without any I/O.

use crate::models::vehicle::VerificationStatus;

/// Decision thresholds (score scale 0-100)
#[derive(Debug, Clone, Copy)]
pub struct DecisionPolicy {
    /// At or above: verified
    pub pass_threshold: f64,
    /// Below: failed; between this and pass: manual review
    pub manual_review_threshold: f64,
}

impl Default for DecisionPolicy {
    fn default() -> Self {
        Self {
            pass_threshold: 70.0,
            manual_review_threshold: 50.0,
        }
    }
}

/// Inputs to one status decision
#[derive(Debug, Clone, Copy)]
pub struct DecisionInput {
    /// Aggregated overall confidence score
    pub overall_score: f64,
    /// Whether the photos show an actual vehicle
    pub is_vehicle_image: bool,
    /// Review requested by the model or by the plate-mismatch check.
    /// Recorded for audit; per the rule order below it never changes the
    /// outcome outside the mid-band (which is manual review anyway).
    pub review_requested: bool,
}

/// Tagged classification of a decision, in rule-priority order
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Rule 1: non-vehicle content is an outright rejection
    NotAVehicle,
    /// Rule 2: score at or above the pass threshold
    Passed,
    /// Rule 3: score below the review threshold, review requests overridden
    LowConfidence,
    /// Rule 4: mid-band score, always manual review
    ReviewBand,
    /// Rule 5: unreachable for well-formed scores (e.g. NaN); logged
    Indeterminate,
}

/// A decided status transition
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Decision {
    pub status: VerificationStatus,
    pub verified: bool,
    pub outcome: Outcome,
}

impl DecisionPolicy {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply the ordered rules; first match wins, later rules never re-fire
    pub fn decide(&self, input: DecisionInput) -> Decision {
        let score = input.overall_score;

        let outcome = if !input.is_vehicle_image {
            Outcome::NotAVehicle
        } else if score >= self.pass_threshold {
            Outcome::Passed
        } else if score < self.manual_review_threshold {
            Outcome::LowConfidence
        } else if score < self.pass_threshold {
            Outcome::ReviewBand
        } else {
            // Exhaustive over real scores; reachable only for NaN input
            tracing::error!(
                score,
                "Status decision fell through the rule ladder, defaulting to failed"
            );
            Outcome::Indeterminate
        };

        let (status, verified) = match outcome {
            Outcome::NotAVehicle => (VerificationStatus::Failed, false),
            Outcome::Passed => (VerificationStatus::Verified, true),
            Outcome::LowConfidence => (VerificationStatus::Failed, false),
            Outcome::ReviewBand => (VerificationStatus::ManualReview, false),
            Outcome::Indeterminate => (VerificationStatus::Failed, false),
        };

        Decision {
            status,
            verified,
            outcome,
        }
    }
}

/// Plate mismatch check
///
/// Fires only when the user declared a plate, the model detected one, and
/// the plate match score is present but short of a perfect match. Returns
/// the discrepancy note to record on the attempt.
pub fn plate_mismatch_note(
    declared_plate: Option<&str>,
    detected_plate: Option<&str>,
    plate_score: Option<f64>,
) -> Option<String> {
    let declared = declared_plate?;
    let detected = detected_plate?;
    let score = plate_score?;
    if score < 100.0 {
        Some(format!(
            "Plate number mismatch: declared '{}', detected '{}' (match score {})",
            declared, detected, score
        ))
    } else {
        None
    }
}

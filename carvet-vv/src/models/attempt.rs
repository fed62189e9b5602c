//! Verification attempt records
//!
//! One row per scoring run, immutable once created. Either a scored record
//! (full detection payload and scores) or an error-only record (message set,
//! all scores NULL).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::detection::{DetectedInfo, MatchScores};

/// One persisted verification attempt
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerificationAttempt {
    /// Attempt UUID
    pub guid: Uuid,
    /// Listing this attempt belongs to
    pub vehicle_guid: Uuid,

    // Detected vehicle attributes
    pub detected_brand: Option<String>,
    pub detected_model: Option<String>,
    pub detected_vehicle_type: Option<String>,
    pub detected_fuel_type: Option<String>,
    pub detected_year: Option<String>,
    pub detected_plate_number: Option<String>,

    // Per-field match scores (absent = not assessable, never zero)
    pub brand_match_score: Option<f64>,
    pub model_match_score: Option<f64>,
    pub vehicle_type_match_score: Option<f64>,
    pub fuel_type_match_score: Option<f64>,
    pub plate_match_score: Option<f64>,
    pub image_quality_score: Option<f64>,
    /// Weighted aggregate (0-100); NULL on error attempts
    pub overall_confidence_score: Option<f64>,

    /// Whether the photos show an actual vehicle
    pub is_vehicle_image: bool,
    /// Number of images sent to the vision model
    pub images_analyzed_count: u32,

    /// Complete raw model reply, retained for audit and diagnosis
    pub ai_raw_response: Option<String>,
    /// Free-text improvement suggestions from the model
    pub ai_suggestions: Option<String>,
    /// Discrepancy notes (model-reported plus engine-added)
    pub discrepancies: Vec<String>,

    /// Final verdict of this attempt
    pub verification_passed: bool,
    /// True iff the decided status was manual_review
    pub requires_manual_review: bool,
    /// Set only when the attempt failed before producing a score
    pub error_message: Option<String>,

    pub created_at: DateTime<Utc>,
}

impl VerificationAttempt {
    /// Build a scored attempt record
    #[allow(clippy::too_many_arguments)]
    pub fn scored(
        vehicle_guid: Uuid,
        detected: DetectedInfo,
        scores: MatchScores,
        image_quality_score: Option<f64>,
        overall_score: f64,
        is_vehicle_image: bool,
        images_analyzed_count: u32,
        raw_response: String,
        suggestions: Option<String>,
        discrepancies: Vec<String>,
        verification_passed: bool,
        requires_manual_review: bool,
    ) -> Self {
        Self {
            guid: Uuid::new_v4(),
            vehicle_guid,
            detected_brand: detected.brand,
            detected_model: detected.model,
            detected_vehicle_type: detected.vehicle_type,
            detected_fuel_type: detected.fuel_type,
            detected_year: detected.year_range,
            detected_plate_number: detected.plate_number,
            brand_match_score: scores.brand,
            model_match_score: scores.model,
            vehicle_type_match_score: scores.vehicle_type,
            fuel_type_match_score: scores.fuel_type,
            plate_match_score: scores.plate,
            image_quality_score,
            overall_confidence_score: Some(overall_score),
            is_vehicle_image,
            images_analyzed_count,
            ai_raw_response: Some(raw_response),
            ai_suggestions: suggestions,
            discrepancies,
            verification_passed,
            requires_manual_review,
            error_message: None,
            created_at: Utc::now(),
        }
    }

    /// Build an error-only attempt record
    ///
    /// Scores stay NULL so the failure is never mistaken for a genuine low
    /// score; the raw reply is kept when one was received (format errors).
    pub fn error(
        vehicle_guid: Uuid,
        message: String,
        images_analyzed_count: u32,
        raw_response: Option<String>,
    ) -> Self {
        Self {
            guid: Uuid::new_v4(),
            vehicle_guid,
            detected_brand: None,
            detected_model: None,
            detected_vehicle_type: None,
            detected_fuel_type: None,
            detected_year: None,
            detected_plate_number: None,
            brand_match_score: None,
            model_match_score: None,
            vehicle_type_match_score: None,
            fuel_type_match_score: None,
            plate_match_score: None,
            image_quality_score: None,
            overall_confidence_score: None,
            is_vehicle_image: false,
            images_analyzed_count,
            ai_raw_response: raw_response,
            ai_suggestions: None,
            discrepancies: Vec::new(),
            verification_passed: false,
            requires_manual_review: false,
            error_message: Some(message),
            created_at: Utc::now(),
        }
    }

    /// True when this record carries an error instead of a score
    pub fn is_error(&self) -> bool {
        self.error_message.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_attempt_invariants() {
        let attempt =
            VerificationAttempt::error(Uuid::new_v4(), "API timeout".to_string(), 3, None);
        assert!(attempt.is_error());
        assert!(!attempt.verification_passed);
        assert!(!attempt.requires_manual_review);
        assert_eq!(attempt.overall_confidence_score, None);
        assert_eq!(attempt.brand_match_score, None);
        assert_eq!(attempt.images_analyzed_count, 3);
    }
}

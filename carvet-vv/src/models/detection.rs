//! Vision report parsing and validation
//!
//! The vision model's reply is untrusted input: it may be wrapped in
//! markdown code fences, miss fields, or report out-of-range scores. This
//! module turns the raw reply into a validated `VisionReport` and a
//! `MatchScores` set safe to aggregate.

use serde::{Deserialize, Serialize};

/// Valid score range for every per-field match score
const SCORE_MIN: f64 = 0.0;
const SCORE_MAX: f64 = 100.0;

/// Vehicle attributes the vision model detected in the photos
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DetectedInfo {
    pub brand: Option<String>,
    pub model: Option<String>,
    pub vehicle_type: Option<String>,
    pub fuel_type: Option<String>,
    /// Approximate year or range, free text
    pub year_range: Option<String>,
    /// Plate number read from the photos, if visible
    pub plate_number: Option<String>,
}

/// Per-field match scores as reported by the model (unvalidated)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReportedScores {
    pub brand_match: Option<f64>,
    pub model_match: Option<f64>,
    pub vehicle_type_match: Option<f64>,
    pub fuel_type_match: Option<f64>,
    pub plate_number_match: Option<f64>,
}

/// Image quality sub-report
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ImageQuality {
    pub score: Option<f64>,
    pub clear_images: Option<bool>,
    pub multiple_angles: Option<bool>,
    pub well_lit: Option<bool>,
}

/// Structured vision reply, one per verification attempt
///
/// Every field tolerates being absent; the decision rules treat missing
/// data conservatively rather than rejecting the whole reply.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VisionReport {
    #[serde(default)]
    pub is_vehicle_image: bool,
    #[serde(default)]
    pub detected_information: DetectedInfo,
    #[serde(default)]
    pub match_scores: ReportedScores,
    #[serde(default)]
    pub image_quality: ImageQuality,
    #[serde(default)]
    pub verification_passed: bool,
    #[serde(default)]
    pub requires_manual_review: bool,
    #[serde(default)]
    pub discrepancies: Vec<String>,
    pub suggestions: Option<String>,
    pub confidence_level: Option<String>,
}

impl VisionReport {
    /// Parse a raw model reply, stripping any markdown code fences first
    pub fn parse(raw: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(strip_code_fences(raw))
    }
}

/// Strip a markdown code fence wrapper from a model reply
///
/// Handles ```json ... ```, bare ``` ... ```, and unfenced replies.
pub fn strip_code_fences(raw: &str) -> &str {
    let trimmed = raw.trim();

    if let Some(start) = trimmed.find("```json") {
        let body = &trimmed[start + "```json".len()..];
        return match body.find("```") {
            Some(end) => body[..end].trim(),
            None => body.trim(),
        };
    }

    if let Some(start) = trimmed.find("```") {
        let body = &trimmed[start + "```".len()..];
        return match body.find("```") {
            Some(end) => body[..end].trim(),
            None => body.trim(),
        };
    }

    trimmed
}

/// Validated per-field match scores
///
/// Absent means the model could not assess that field; it is excluded from
/// aggregation rather than counted as zero. The plate score is only carried
/// when the user declared a plate number.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct MatchScores {
    pub brand: Option<f64>,
    pub model: Option<f64>,
    pub vehicle_type: Option<f64>,
    pub fuel_type: Option<f64>,
    pub plate: Option<f64>,
}

impl MatchScores {
    /// Validate reported scores into an aggregation-safe set
    ///
    /// Out-of-range and non-finite values are dropped (logged at warn), not
    /// clamped: a nonsense score must not influence the average.
    pub fn from_reported(reported: &ReportedScores, plate_declared: bool) -> Self {
        Self {
            brand: validate_score("brand_match", reported.brand_match),
            model: validate_score("model_match", reported.model_match),
            vehicle_type: validate_score("vehicle_type_match", reported.vehicle_type_match),
            fuel_type: validate_score("fuel_type_match", reported.fuel_type_match),
            plate: if plate_declared {
                validate_score("plate_number_match", reported.plate_number_match)
            } else {
                None
            },
        }
    }

    /// True when no field has a usable score
    pub fn is_empty(&self) -> bool {
        self.brand.is_none()
            && self.model.is_none()
            && self.vehicle_type.is_none()
            && self.fuel_type.is_none()
            && self.plate.is_none()
    }
}

fn validate_score(field: &str, score: Option<f64>) -> Option<f64> {
    match score {
        Some(value) if value.is_finite() && (SCORE_MIN..=SCORE_MAX).contains(&value) => Some(value),
        Some(value) => {
            tracing::warn!(field, value, "Reported match score out of range, ignoring");
            None
        }
        None => None,
    }
}

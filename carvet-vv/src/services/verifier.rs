//! Verification engine
//!
//! Orchestrates one verification attempt end to end: governor
//! preconditions, in-progress marking, image preparation, the vision call,
//! score aggregation, the status decision, and atomic persistence of the
//! attempt record plus the listing state. Every AI call produces exactly
//! one attempt row (scored or error-only); governor rejections produce
//! none.

use chrono::{Duration, Utc};
use sqlx::SqlitePool;
use std::path::Path;
use thiserror::Error;
use uuid::Uuid;

use carvet_common::events::{CarvetEvent, EventBus};

use crate::db;
use crate::models::detection::MatchScores;
use crate::models::vehicle::VerificationStatus;
use crate::models::VerificationAttempt;
use crate::services::decision::{plate_mismatch_note, DecisionInput, DecisionPolicy};
use crate::services::scoring::ScoreAggregator;
use crate::services::vision::{
    build_verification_prompt, encode_image_file, VisionClient, MAX_IMAGES_PER_CALL,
};

/// Attempt governor limits
#[derive(Debug, Clone, Copy)]
pub struct GovernorConfig {
    /// Hard cap on scored attempts per listing
    pub max_attempts: u32,
    /// Age after which an in_progress marker is presumed abandoned
    pub staleness_window: Duration,
}

impl Default for GovernorConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            staleness_window: Duration::minutes(5),
        }
    }
}

/// Engine errors
///
/// The first three are precondition rejections: they short-circuit before
/// any AI call and write no attempt record.
#[derive(Debug, Error)]
pub enum VerifyError {
    #[error("Vehicle not found: {0}")]
    NotFound(Uuid),

    #[error("Maximum verification attempts ({0}) reached")]
    AttemptsExhausted(u32),

    #[error("Verification already in progress")]
    AlreadyInProgress,

    #[error(transparent)]
    Storage(#[from] carvet_common::Error),
}

/// Result of one engine run
///
/// `success` distinguishes a scored attempt (which may still have decided
/// `failed`) from an error attempt; AI failures are reported here, never
/// raised past the engine boundary.
#[derive(Debug, Clone)]
pub struct VerifyOutcome {
    pub success: bool,
    pub status: VerificationStatus,
    pub score: Option<f64>,
    pub attempt: VerificationAttempt,
}

/// Verification engine
pub struct VerificationEngine {
    db: SqlitePool,
    event_bus: EventBus,
    vision: VisionClient,
    aggregator: ScoreAggregator,
    policy: DecisionPolicy,
    governor: GovernorConfig,
}

impl VerificationEngine {
    pub fn new(db: SqlitePool, event_bus: EventBus, vision: VisionClient) -> Self {
        Self {
            db,
            event_bus,
            vision,
            aggregator: ScoreAggregator::new(),
            policy: DecisionPolicy::new(),
            governor: GovernorConfig::default(),
        }
    }

    /// Override governor limits (tests tighten the staleness window)
    pub fn with_governor(mut self, governor: GovernorConfig) -> Self {
        self.governor = governor;
        self
    }

    /// Run one verification attempt for a listing
    pub async fn verify(&self, vehicle_guid: Uuid) -> Result<VerifyOutcome, VerifyError> {
        let (claim, state) = db::vehicles::load_vehicle(&self.db, vehicle_guid)
            .await?
            .ok_or(VerifyError::NotFound(vehicle_guid))?;

        // Governor: attempt cap
        if state.attempts >= self.governor.max_attempts {
            return Err(VerifyError::AttemptsExhausted(self.governor.max_attempts));
        }

        // Governor: advisory in-progress guard with staleness reset
        if state.status == VerificationStatus::InProgress {
            let stale = match state.last_verification_at {
                Some(last) => Utc::now() - last > self.governor.staleness_window,
                // No timestamp at all: the marker predates any scored
                // attempt, assume the run crashed
                None => true,
            };
            if stale {
                tracing::info!(
                    vehicle_guid = %vehicle_guid,
                    "Resetting stale in_progress verification to pending"
                );
                db::vehicles::set_status(&self.db, vehicle_guid, VerificationStatus::Pending)
                    .await?;
            } else {
                return Err(VerifyError::AlreadyInProgress);
            }
        }

        let image_paths = db::vehicles::load_image_paths(&self.db, vehicle_guid).await?;
        if image_paths.is_empty() {
            let outcome = self
                .record_failure(
                    vehicle_guid,
                    "No images found for verification".to_string(),
                    0,
                    None,
                )
                .await?;
            return Ok(outcome);
        }

        // Conditional claim of the in_progress marker: closes the window
        // between the status read above and this write, so two racing
        // requests cannot both run an attempt
        if !db::vehicles::try_mark_in_progress(&self.db, vehicle_guid).await? {
            return Err(VerifyError::AlreadyInProgress);
        }
        self.event_bus.emit_lossy(CarvetEvent::VerificationStarted {
            vehicle_guid,
            attempt_number: state.attempts + 1,
            timestamp: Utc::now(),
        });

        // Encode up to the per-call cap; unreadable files are skipped
        let mut data_urls = Vec::new();
        for path in image_paths.iter().take(MAX_IMAGES_PER_CALL) {
            match encode_image_file(Path::new(path)) {
                Ok(url) => data_urls.push(url),
                Err(e) => {
                    tracing::warn!(vehicle_guid = %vehicle_guid, error = %e, "Skipping image");
                }
            }
        }
        if data_urls.is_empty() {
            let outcome = self
                .record_failure(
                    vehicle_guid,
                    "Could not process vehicle images".to_string(),
                    0,
                    None,
                )
                .await?;
            return Ok(outcome);
        }

        let prompt = build_verification_prompt(&claim);
        let analysis = match self.vision.analyze(&prompt, &data_urls).await {
            Ok(analysis) => analysis,
            Err(e) => {
                let raw = e.raw_response().map(str::to_string);
                let outcome = self
                    .record_failure(vehicle_guid, e.to_string(), data_urls.len() as u32, raw)
                    .await?;
                return Ok(outcome);
            }
        };

        let report = analysis.report;
        let scores =
            MatchScores::from_reported(&report.match_scores, claim.plate_number.is_some());
        let overall_score = self.aggregator.aggregate(&scores);

        let mut discrepancies = report.discrepancies.clone();
        let mut review_requested = report.requires_manual_review;
        if let Some(note) = plate_mismatch_note(
            claim.plate_number.as_deref(),
            report.detected_information.plate_number.as_deref(),
            scores.plate,
        ) {
            tracing::info!(vehicle_guid = %vehicle_guid, note = %note, "Plate mismatch detected");
            discrepancies.push(note);
            review_requested = true;
        }

        let decision = self.policy.decide(DecisionInput {
            overall_score,
            is_vehicle_image: report.is_vehicle_image,
            review_requested,
        });

        let attempt = VerificationAttempt::scored(
            vehicle_guid,
            report.detected_information,
            scores,
            report.image_quality.score,
            overall_score,
            report.is_vehicle_image,
            data_urls.len() as u32,
            analysis.raw,
            report.suggestions,
            discrepancies,
            decision.verified,
            decision.status == VerificationStatus::ManualReview,
        );

        db::attempts::record_scored(&self.db, &attempt, decision.status, decision.verified)
            .await?;

        tracing::info!(
            vehicle_guid = %vehicle_guid,
            status = %decision.status,
            score = overall_score,
            outcome = ?decision.outcome,
            "Verification attempt completed"
        );

        self.event_bus
            .emit_lossy(CarvetEvent::VerificationCompleted {
                vehicle_guid,
                status: decision.status,
                score: overall_score,
                timestamp: Utc::now(),
            });

        Ok(VerifyOutcome {
            success: true,
            status: decision.status,
            score: Some(overall_score),
            attempt,
        })
    }

    /// Error path: one error-only attempt, status to failed, score and
    /// verified flag untouched
    async fn record_failure(
        &self,
        vehicle_guid: Uuid,
        message: String,
        images_analyzed: u32,
        raw_response: Option<String>,
    ) -> Result<VerifyOutcome, carvet_common::Error> {
        tracing::warn!(
            vehicle_guid = %vehicle_guid,
            error = %message,
            "Verification attempt failed"
        );

        let attempt = VerificationAttempt::error(
            vehicle_guid,
            message.clone(),
            images_analyzed,
            raw_response,
        );
        db::attempts::record_error(&self.db, &attempt).await?;

        self.event_bus.emit_lossy(CarvetEvent::VerificationFailed {
            vehicle_guid,
            error: message,
            timestamp: Utc::now(),
        });

        Ok(VerifyOutcome {
            success: false,
            status: VerificationStatus::Failed,
            score: None,
            attempt,
        })
    }
}

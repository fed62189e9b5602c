//! Verification API handlers
//!
//! POST /vehicles/:guid/verify, retry and bulk variants, plus the status,
//! history, and result-detail queries. Governor rejections map to 409/429
//! before any attempt record exists; engine-level failures (AI errors, no
//! images) come back as a 200 envelope with `success: false`, mirroring
//! how the attempt is recorded.

use axum::{
    extract::{Path, State},
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::db;
use crate::error::{ApiError, ApiResult};
use crate::models::vehicle::VerificationStatus;
use crate::models::VerificationAttempt;
use crate::services::verifier::{VerifyError, VerifyOutcome};
use crate::AppState;

/// POST /vehicles/:guid/verify response
#[derive(Debug, Serialize)]
pub struct VerifyResponse {
    pub success: bool,
    pub verification_status: VerificationStatus,
    pub verification_score: Option<f64>,
    pub verification_result: VerificationAttempt,
}

impl From<VerifyOutcome> for VerifyResponse {
    fn from(outcome: VerifyOutcome) -> Self {
        Self {
            success: outcome.success,
            verification_status: outcome.status,
            verification_score: outcome.score,
            verification_result: outcome.attempt,
        }
    }
}

/// Latest attempt summary embedded in the status response
#[derive(Debug, Serialize)]
pub struct LatestResultSummary {
    pub guid: Uuid,
    pub detected_brand: Option<String>,
    pub detected_model: Option<String>,
    pub detected_vehicle_type: Option<String>,
    pub detected_fuel_type: Option<String>,
    pub confidence_score: Option<f64>,
    pub passed: bool,
    pub requires_manual_review: bool,
    pub discrepancies: Vec<String>,
    pub suggestions: Option<String>,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl From<VerificationAttempt> for LatestResultSummary {
    fn from(attempt: VerificationAttempt) -> Self {
        Self {
            guid: attempt.guid,
            detected_brand: attempt.detected_brand,
            detected_model: attempt.detected_model,
            detected_vehicle_type: attempt.detected_vehicle_type,
            detected_fuel_type: attempt.detected_fuel_type,
            confidence_score: attempt.overall_confidence_score,
            passed: attempt.verification_passed,
            requires_manual_review: attempt.requires_manual_review,
            discrepancies: attempt.discrepancies,
            suggestions: attempt.ai_suggestions,
            error_message: attempt.error_message,
            created_at: attempt.created_at,
        }
    }
}

/// GET /vehicles/:guid/verification-status response
#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub vehicle_guid: Uuid,
    pub verification_status: VerificationStatus,
    pub is_verified: bool,
    pub verification_score: Option<f64>,
    pub attempts: u32,
    pub last_verification_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latest_result: Option<LatestResultSummary>,
}

/// GET /vehicles/:guid/verification-history response
#[derive(Debug, Serialize)]
pub struct HistoryResponse {
    pub vehicle_guid: Uuid,
    pub total_attempts: u32,
    pub current_status: VerificationStatus,
    pub is_verified: bool,
    pub results: Vec<VerificationAttempt>,
}

/// POST /vehicles/bulk-verify request
#[derive(Debug, Deserialize)]
pub struct BulkVerifyRequest {
    pub vehicle_guids: Vec<Uuid>,
}

/// One entry of the bulk-verify response
#[derive(Debug, Serialize)]
pub struct BulkVerifyItem {
    pub vehicle_guid: Uuid,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<VerificationStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// POST /vehicles/bulk-verify response
#[derive(Debug, Serialize)]
pub struct BulkVerifyResponse {
    pub total: usize,
    pub results: Vec<BulkVerifyItem>,
}

/// POST /vehicles/:guid/verify
///
/// Run one verification attempt for a listing.
pub async fn verify_vehicle(
    State(state): State<AppState>,
    Path(guid): Path<Uuid>,
) -> ApiResult<Json<VerifyResponse>> {
    let outcome = state.engine.verify(guid).await?;
    remember_failure(&state, &outcome).await;
    Ok(Json(outcome.into()))
}

/// POST /vehicles/:guid/retry-verification
///
/// Alias kept for the listing frontend; the governor makes retry and
/// verify the same operation.
pub async fn retry_verification(
    State(state): State<AppState>,
    Path(guid): Path<Uuid>,
) -> ApiResult<Json<VerifyResponse>> {
    let outcome = state.engine.verify(guid).await?;
    remember_failure(&state, &outcome).await;
    Ok(Json(outcome.into()))
}

/// POST /vehicles/bulk-verify
///
/// Verify multiple listings in one call. One entry per requested guid;
/// a rejection or failure on one listing never aborts the batch.
pub async fn bulk_verify(
    State(state): State<AppState>,
    Json(request): Json<BulkVerifyRequest>,
) -> ApiResult<Json<BulkVerifyResponse>> {
    if request.vehicle_guids.is_empty() {
        return Err(ApiError::BadRequest("No vehicle guids provided".to_string()));
    }

    let mut results = Vec::with_capacity(request.vehicle_guids.len());
    for guid in &request.vehicle_guids {
        match state.engine.verify(*guid).await {
            Ok(outcome) => {
                remember_failure(&state, &outcome).await;
                results.push(BulkVerifyItem {
                    vehicle_guid: *guid,
                    success: outcome.success,
                    status: Some(outcome.status),
                    error: outcome.attempt.error_message.clone(),
                });
            }
            Err(e) => {
                let error = e.to_string();
                // Storage errors still shouldn't sink the whole batch
                if let VerifyError::Storage(ref err) = e {
                    tracing::error!(vehicle_guid = %guid, error = %err, "Bulk verify storage error");
                }
                results.push(BulkVerifyItem {
                    vehicle_guid: *guid,
                    success: false,
                    status: None,
                    error: Some(error),
                });
            }
        }
    }

    Ok(Json(BulkVerifyResponse {
        total: request.vehicle_guids.len(),
        results,
    }))
}

/// GET /vehicles/:guid/verification-status
pub async fn get_verification_status(
    State(state): State<AppState>,
    Path(guid): Path<Uuid>,
) -> ApiResult<Json<StatusResponse>> {
    let (_claim, verification) = db::vehicles::load_vehicle(&state.db, guid)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("Vehicle not found: {}", guid)))?;

    let latest_result = db::attempts::latest(&state.db, guid)
        .await?
        .map(LatestResultSummary::from);

    Ok(Json(StatusResponse {
        vehicle_guid: guid,
        verification_status: verification.status,
        is_verified: verification.is_verified,
        verification_score: verification.verification_score,
        attempts: verification.attempts,
        last_verification_at: verification.last_verification_at,
        latest_result,
    }))
}

/// GET /vehicles/:guid/verification-history
pub async fn get_verification_history(
    State(state): State<AppState>,
    Path(guid): Path<Uuid>,
) -> ApiResult<Json<HistoryResponse>> {
    let (_claim, verification) = db::vehicles::load_vehicle(&state.db, guid)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("Vehicle not found: {}", guid)))?;

    let results = db::attempts::history(&state.db, guid).await?;

    Ok(Json(HistoryResponse {
        vehicle_guid: guid,
        total_attempts: verification.attempts,
        current_status: verification.status,
        is_verified: verification.is_verified,
        results,
    }))
}

/// GET /verification-results/:guid
pub async fn get_verification_result(
    State(state): State<AppState>,
    Path(guid): Path<Uuid>,
) -> ApiResult<Json<VerificationAttempt>> {
    let attempt = db::attempts::load(&state.db, guid)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("Verification result not found: {}", guid)))?;

    Ok(Json(attempt))
}

/// Surface engine-level failures in /health diagnostics
async fn remember_failure(state: &AppState, outcome: &VerifyOutcome) {
    if !outcome.success {
        if let Some(message) = &outcome.attempt.error_message {
            *state.last_error.write().await = Some(message.clone());
        }
    }
}

/// Build verification routes
pub fn verification_routes() -> Router<AppState> {
    Router::new()
        .route("/vehicles/:guid/verify", post(verify_vehicle))
        .route("/vehicles/:guid/retry-verification", post(retry_verification))
        .route("/vehicles/bulk-verify", post(bulk_verify))
        .route(
            "/vehicles/:guid/verification-status",
            get(get_verification_status),
        )
        .route(
            "/vehicles/:guid/verification-history",
            get(get_verification_history),
        )
        .route("/verification-results/:guid", get(get_verification_result))
}

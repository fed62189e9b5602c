//! Verification attempt persistence
//!
//! Attempt rows are immutable once inserted. The scored and error paths
//! each pair the insert with its vehicle-state update in one transaction,
//! so a partially updated state (score written, status stale) is never
//! observable.

use chrono::Utc;
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use carvet_common::{Error, Result};

use crate::db::vehicles::parse_timestamp;
use crate::models::vehicle::VerificationStatus;
use crate::models::VerificationAttempt;
use crate::utils::db_retry::retry_on_lock;

/// Settings key bounding the lock-retry window
const MAX_LOCK_WAIT_KEY: &str = "vv_database_max_lock_wait_ms";
const DEFAULT_MAX_LOCK_WAIT_MS: i64 = 5000;

async fn max_lock_wait_ms(pool: &SqlitePool) -> i64 {
    sqlx::query_scalar("SELECT CAST(value AS INTEGER) FROM settings WHERE key = ?")
        .bind(MAX_LOCK_WAIT_KEY)
        .fetch_optional(pool)
        .await
        .ok()
        .flatten()
        .unwrap_or(DEFAULT_MAX_LOCK_WAIT_MS)
}

/// Persist a scored attempt and the listing's new state atomically
///
/// Updates status, verified flag, score, attempt counter, and the
/// last-attempt timestamp together with the attempt insert.
pub async fn record_scored(
    pool: &SqlitePool,
    attempt: &VerificationAttempt,
    status: VerificationStatus,
    verified: bool,
) -> Result<()> {
    let max_wait = max_lock_wait_ms(pool).await;
    let now = Utc::now().to_rfc3339();

    retry_on_lock("record scored attempt", max_wait as u64, || async {
        let mut tx = pool.begin().await.map_err(Error::Database)?;

        insert_attempt(&mut tx, attempt).await?;

        sqlx::query(
            r#"
            UPDATE vehicles SET
                verification_status = ?,
                is_verified = ?,
                verification_score = ?,
                verification_attempts = verification_attempts + 1,
                last_verification_at = ?,
                updated_at = ?
            WHERE guid = ?
            "#,
        )
        .bind(status.as_str())
        .bind(verified as i64)
        .bind(attempt.overall_confidence_score)
        .bind(&now)
        .bind(&now)
        .bind(attempt.vehicle_guid.to_string())
        .execute(&mut *tx)
        .await
        .map_err(Error::Database)?;

        tx.commit().await.map_err(Error::Database)?;
        Ok(())
    })
    .await
}

/// Persist an error-only attempt; the listing only moves to failed
///
/// Score, verified flag, attempt counter, and last-attempt timestamp are
/// deliberately untouched: an error must not masquerade as a low score or
/// consume the attempt budget.
pub async fn record_error(pool: &SqlitePool, attempt: &VerificationAttempt) -> Result<()> {
    let max_wait = max_lock_wait_ms(pool).await;
    let now = Utc::now().to_rfc3339();

    retry_on_lock("record error attempt", max_wait as u64, || async {
        let mut tx = pool.begin().await.map_err(Error::Database)?;

        insert_attempt(&mut tx, attempt).await?;

        sqlx::query(
            r#"
            UPDATE vehicles SET verification_status = ?, updated_at = ? WHERE guid = ?
            "#,
        )
        .bind(VerificationStatus::Failed.as_str())
        .bind(&now)
        .bind(attempt.vehicle_guid.to_string())
        .execute(&mut *tx)
        .await
        .map_err(Error::Database)?;

        tx.commit().await.map_err(Error::Database)?;
        Ok(())
    })
    .await
}

async fn insert_attempt(
    tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
    attempt: &VerificationAttempt,
) -> Result<()> {
    let discrepancies = serde_json::to_string(&attempt.discrepancies)
        .map_err(|e| Error::Internal(format!("Failed to serialize discrepancies: {}", e)))?;

    sqlx::query(
        r#"
        INSERT INTO verification_results (
            guid, vehicle_guid,
            detected_brand, detected_model, detected_vehicle_type,
            detected_fuel_type, detected_year, detected_plate_number,
            brand_match_score, model_match_score, vehicle_type_match_score,
            fuel_type_match_score, plate_match_score,
            image_quality_score, overall_confidence_score,
            is_vehicle_image, images_analyzed_count,
            ai_raw_response, ai_suggestions, discrepancies,
            verification_passed, requires_manual_review, error_message,
            created_at
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(attempt.guid.to_string())
    .bind(attempt.vehicle_guid.to_string())
    .bind(&attempt.detected_brand)
    .bind(&attempt.detected_model)
    .bind(&attempt.detected_vehicle_type)
    .bind(&attempt.detected_fuel_type)
    .bind(&attempt.detected_year)
    .bind(&attempt.detected_plate_number)
    .bind(attempt.brand_match_score)
    .bind(attempt.model_match_score)
    .bind(attempt.vehicle_type_match_score)
    .bind(attempt.fuel_type_match_score)
    .bind(attempt.plate_match_score)
    .bind(attempt.image_quality_score)
    .bind(attempt.overall_confidence_score)
    .bind(attempt.is_vehicle_image as i64)
    .bind(attempt.images_analyzed_count as i64)
    .bind(&attempt.ai_raw_response)
    .bind(&attempt.ai_suggestions)
    .bind(discrepancies)
    .bind(attempt.verification_passed as i64)
    .bind(attempt.requires_manual_review as i64)
    .bind(&attempt.error_message)
    .bind(attempt.created_at.to_rfc3339())
    .execute(&mut **tx)
    .await
    .map_err(Error::Database)?;

    Ok(())
}

/// All attempts for a listing, newest first
pub async fn history(pool: &SqlitePool, vehicle_guid: Uuid) -> Result<Vec<VerificationAttempt>> {
    let rows = sqlx::query(
        r#"
        SELECT * FROM verification_results
        WHERE vehicle_guid = ?
        ORDER BY created_at DESC
        "#,
    )
    .bind(vehicle_guid.to_string())
    .fetch_all(pool)
    .await?;

    rows.into_iter().map(row_to_attempt).collect()
}

/// Most recent attempt for a listing, if any
pub async fn latest(pool: &SqlitePool, vehicle_guid: Uuid) -> Result<Option<VerificationAttempt>> {
    let row = sqlx::query(
        r#"
        SELECT * FROM verification_results
        WHERE vehicle_guid = ?
        ORDER BY created_at DESC
        LIMIT 1
        "#,
    )
    .bind(vehicle_guid.to_string())
    .fetch_optional(pool)
    .await?;

    row.map(row_to_attempt).transpose()
}

/// Load one attempt record by its own guid
pub async fn load(pool: &SqlitePool, guid: Uuid) -> Result<Option<VerificationAttempt>> {
    let row = sqlx::query("SELECT * FROM verification_results WHERE guid = ?")
        .bind(guid.to_string())
        .fetch_optional(pool)
        .await?;

    row.map(row_to_attempt).transpose()
}

fn row_to_attempt(row: sqlx::sqlite::SqliteRow) -> Result<VerificationAttempt> {
    let guid: String = row.get("guid");
    let vehicle_guid: String = row.get("vehicle_guid");
    let discrepancies: String = row.get("discrepancies");
    let discrepancies: Vec<String> = serde_json::from_str(&discrepancies)
        .map_err(|e| Error::Internal(format!("Failed to deserialize discrepancies: {}", e)))?;

    Ok(VerificationAttempt {
        guid: Uuid::parse_str(&guid)
            .map_err(|e| Error::Internal(format!("Invalid attempt guid '{}': {}", guid, e)))?,
        vehicle_guid: Uuid::parse_str(&vehicle_guid).map_err(|e| {
            Error::Internal(format!("Invalid vehicle guid '{}': {}", vehicle_guid, e))
        })?,
        detected_brand: row.get("detected_brand"),
        detected_model: row.get("detected_model"),
        detected_vehicle_type: row.get("detected_vehicle_type"),
        detected_fuel_type: row.get("detected_fuel_type"),
        detected_year: row.get("detected_year"),
        detected_plate_number: row.get("detected_plate_number"),
        brand_match_score: row.get("brand_match_score"),
        model_match_score: row.get("model_match_score"),
        vehicle_type_match_score: row.get("vehicle_type_match_score"),
        fuel_type_match_score: row.get("fuel_type_match_score"),
        plate_match_score: row.get("plate_match_score"),
        image_quality_score: row.get("image_quality_score"),
        overall_confidence_score: row.get("overall_confidence_score"),
        is_vehicle_image: row.get::<i64, _>("is_vehicle_image") != 0,
        images_analyzed_count: row.get::<i64, _>("images_analyzed_count") as u32,
        ai_raw_response: row.get("ai_raw_response"),
        ai_suggestions: row.get("ai_suggestions"),
        discrepancies,
        verification_passed: row.get::<i64, _>("verification_passed") != 0,
        requires_manual_review: row.get::<i64, _>("requires_manual_review") != 0,
        error_message: row.get("error_message"),
        created_at: parse_timestamp(row.get("created_at"))?,
    })
}

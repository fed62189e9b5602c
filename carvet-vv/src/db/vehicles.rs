//! Vehicle claim and verification state queries
//!
//! The claim columns belong to the listing backend; only the verification
//! columns are written here, and the scored-state update goes through
//! `db::attempts` so it lands in the same transaction as the attempt row.

use chrono::{DateTime, Utc};
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use carvet_common::{Error, Result};

use crate::models::vehicle::{ListingClaim, VerificationState, VerificationStatus};

/// Load a listing's declared attributes and current verification state
pub async fn load_vehicle(
    pool: &SqlitePool,
    guid: Uuid,
) -> Result<Option<(ListingClaim, VerificationState)>> {
    let row = sqlx::query(
        r#"
        SELECT guid, manufacturer, model, vehicle_type, fuel_type, year, plate_number,
               verification_status, is_verified, verification_score,
               verification_attempts, last_verification_at
        FROM vehicles
        WHERE guid = ?
        "#,
    )
    .bind(guid.to_string())
    .fetch_optional(pool)
    .await?;

    let Some(row) = row else {
        return Ok(None);
    };

    let claim = ListingClaim {
        guid,
        manufacturer: row.get("manufacturer"),
        model: row.get("model"),
        vehicle_type: row.get("vehicle_type"),
        fuel_type: row.get("fuel_type"),
        year: row.get("year"),
        plate_number: row.get("plate_number"),
    };

    let status_str: String = row.get("verification_status");
    let status = VerificationStatus::parse(&status_str)
        .ok_or_else(|| Error::Internal(format!("Unknown verification status: {}", status_str)))?;

    let state = VerificationState {
        status,
        is_verified: row.get::<i64, _>("is_verified") != 0,
        verification_score: row.get("verification_score"),
        attempts: row.get::<i64, _>("verification_attempts") as u32,
        last_verification_at: parse_timestamp_opt(row.get("last_verification_at"))?,
    };

    Ok(Some((claim, state)))
}

/// Image paths for a listing, primary image first
pub async fn load_image_paths(pool: &SqlitePool, vehicle_guid: Uuid) -> Result<Vec<String>> {
    let paths = sqlx::query_scalar(
        r#"
        SELECT path FROM vehicle_images
        WHERE vehicle_guid = ?
        ORDER BY is_primary DESC, uploaded_at ASC
        "#,
    )
    .bind(vehicle_guid.to_string())
    .fetch_all(pool)
    .await?;

    Ok(paths)
}

/// Update only the lifecycle status (in_progress marking, staleness reset)
pub async fn set_status(
    pool: &SqlitePool,
    guid: Uuid,
    status: VerificationStatus,
) -> Result<()> {
    let result = sqlx::query(
        r#"
        UPDATE vehicles SET verification_status = ?, updated_at = ? WHERE guid = ?
        "#,
    )
    .bind(status.as_str())
    .bind(Utc::now().to_rfc3339())
    .bind(guid.to_string())
    .execute(pool)
    .await?;

    if result.rows_affected() == 0 {
        return Err(Error::NotFound(format!("Vehicle not found: {}", guid)));
    }

    Ok(())
}

/// Atomically claim the in_progress marker for a listing
///
/// Conditional transition: succeeds only if no other attempt currently
/// holds the marker, so two racing requests cannot both proceed. Returns
/// false when the claim was lost.
pub async fn try_mark_in_progress(pool: &SqlitePool, guid: Uuid) -> Result<bool> {
    let result = sqlx::query(
        r#"
        UPDATE vehicles SET verification_status = ?, updated_at = ?
        WHERE guid = ? AND verification_status != ?
        "#,
    )
    .bind(VerificationStatus::InProgress.as_str())
    .bind(Utc::now().to_rfc3339())
    .bind(guid.to_string())
    .bind(VerificationStatus::InProgress.as_str())
    .execute(pool)
    .await?;

    Ok(result.rows_affected() > 0)
}

pub(crate) fn parse_timestamp_opt(raw: Option<String>) -> Result<Option<DateTime<Utc>>> {
    raw.map(|s| {
        DateTime::parse_from_rfc3339(&s)
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(|e| Error::Internal(format!("Failed to parse timestamp '{}': {}", s, e)))
    })
    .transpose()
}

pub(crate) fn parse_timestamp(raw: String) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(&raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| Error::Internal(format!("Failed to parse timestamp '{}': {}", raw, e)))
}

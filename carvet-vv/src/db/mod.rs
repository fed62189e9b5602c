//! Database access for carvet-vv
//!
//! Shared SQLite database in the root folder. The `vehicles` and
//! `vehicle_images` tables are populated by the listing backend; the
//! verification tables are owned here. All tables are created if missing so
//! either service can start first against a fresh database.

pub mod attempts;
pub mod settings;
pub mod vehicles;

use carvet_common::Result;
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::SqlitePool;
use std::path::Path;

/// Initialize database connection pool
pub async fn init_database_pool(db_path: &Path) -> Result<SqlitePool> {
    // Ensure parent directory exists
    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let db_url = format!("sqlite://{}?mode=rwc", db_path.display());
    tracing::debug!("Connecting to database: {}", db_url);

    let pool = SqlitePoolOptions::new()
        .max_connections(10)
        .connect(&db_url)
        .await?;

    // Enable foreign keys
    sqlx::query("PRAGMA foreign_keys = ON").execute(&pool).await?;

    // WAL mode: concurrent readers with one writer, needed while the
    // listing backend shares this file
    sqlx::query("PRAGMA journal_mode = WAL").execute(&pool).await?;

    sqlx::query("PRAGMA busy_timeout = 5000").execute(&pool).await?;

    init_tables(&pool).await?;

    Ok(pool)
}

/// Create tables if they don't exist (idempotent)
///
/// Public so integration tests can initialize in-memory databases.
pub async fn init_tables(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS settings (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS vehicles (
            guid TEXT PRIMARY KEY,
            manufacturer TEXT NOT NULL,
            model TEXT NOT NULL,
            vehicle_type TEXT,
            fuel_type TEXT,
            year INTEGER,
            plate_number TEXT UNIQUE,
            verification_status TEXT NOT NULL DEFAULT 'pending',
            is_verified INTEGER NOT NULL DEFAULT 0,
            verification_score REAL,
            verification_attempts INTEGER NOT NULL DEFAULT 0,
            last_verification_at TEXT,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS vehicle_images (
            guid TEXT PRIMARY KEY,
            vehicle_guid TEXT NOT NULL REFERENCES vehicles(guid) ON DELETE CASCADE,
            path TEXT NOT NULL,
            is_primary INTEGER NOT NULL DEFAULT 0,
            uploaded_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS verification_results (
            guid TEXT PRIMARY KEY,
            vehicle_guid TEXT NOT NULL REFERENCES vehicles(guid) ON DELETE CASCADE,
            detected_brand TEXT,
            detected_model TEXT,
            detected_vehicle_type TEXT,
            detected_fuel_type TEXT,
            detected_year TEXT,
            detected_plate_number TEXT,
            brand_match_score REAL,
            model_match_score REAL,
            vehicle_type_match_score REAL,
            fuel_type_match_score REAL,
            plate_match_score REAL,
            image_quality_score REAL,
            overall_confidence_score REAL,
            is_vehicle_image INTEGER NOT NULL DEFAULT 0,
            images_analyzed_count INTEGER NOT NULL DEFAULT 0,
            ai_raw_response TEXT,
            ai_suggestions TEXT,
            discrepancies TEXT NOT NULL DEFAULT '[]',
            verification_passed INTEGER NOT NULL DEFAULT 0,
            requires_manual_review INTEGER NOT NULL DEFAULT 0,
            error_message TEXT,
            created_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE INDEX IF NOT EXISTS idx_verification_results_vehicle
        ON verification_results(vehicle_guid, created_at DESC)
        "#,
    )
    .execute(pool)
    .await?;

    tracing::info!(
        "Database tables initialized (settings, vehicles, vehicle_images, verification_results)"
    );

    Ok(())
}

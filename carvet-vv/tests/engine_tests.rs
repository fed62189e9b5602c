//! Verification engine tests
//!
//! Drives the engine directly against an in-memory database with the
//! vision endpoint pointed at an unroutable address, exercising the
//! governor and the AI-failure error path.

use chrono::{Duration, Utc};
use sqlx::SqlitePool;
use tempfile::TempDir;
use uuid::Uuid;

use carvet_common::events::EventBus;
use carvet_vv::services::verifier::{GovernorConfig, VerificationEngine, VerifyError};
use carvet_vv::services::vision::{VisionClient, VisionConfig};

async fn test_pool() -> SqlitePool {
    let pool = SqlitePool::connect("sqlite::memory:")
        .await
        .expect("in-memory database");
    carvet_vv::db::init_tables(&pool).await.expect("schema");
    pool
}

fn test_engine(pool: &SqlitePool) -> VerificationEngine {
    let vision = VisionClient::new(VisionConfig {
        api_key: "test-key".to_string(),
        model: "gpt-4o".to_string(),
        // Nothing listens on port 1: connection is refused immediately
        base_url: "http://127.0.0.1:1/v1".to_string(),
    })
    .expect("vision client");
    VerificationEngine::new(pool.clone(), EventBus::new(16), vision)
}

async fn seed_vehicle(
    pool: &SqlitePool,
    status: &str,
    is_verified: bool,
    attempts: i64,
    score: Option<f64>,
    last_verification_at: Option<chrono::DateTime<Utc>>,
) -> Uuid {
    let guid = Uuid::new_v4();
    let now = Utc::now().to_rfc3339();
    sqlx::query(
        r#"
        INSERT INTO vehicles (
            guid, manufacturer, model, vehicle_type, fuel_type, year, plate_number,
            verification_status, is_verified, verification_score,
            verification_attempts, last_verification_at, created_at, updated_at
        ) VALUES (?, 'Honda', 'Civic', 'car', 'petrol', 2021, NULL, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(guid.to_string())
    .bind(status)
    .bind(is_verified as i64)
    .bind(score)
    .bind(attempts)
    .bind(last_verification_at.map(|t| t.to_rfc3339()))
    .bind(&now)
    .bind(&now)
    .execute(pool)
    .await
    .expect("seed vehicle");
    guid
}

/// Attach a real (readable) image file so the engine reaches the vision call
async fn seed_image(pool: &SqlitePool, vehicle_guid: Uuid, dir: &TempDir) {
    let path = dir.path().join(format!("{}.jpg", Uuid::new_v4()));
    std::fs::write(&path, b"\xff\xd8\xff\xe0fake_jpeg_data").expect("write image");

    sqlx::query(
        r#"
        INSERT INTO vehicle_images (guid, vehicle_guid, path, is_primary, uploaded_at)
        VALUES (?, ?, ?, 1, ?)
        "#,
    )
    .bind(Uuid::new_v4().to_string())
    .bind(vehicle_guid.to_string())
    .bind(path.to_string_lossy().to_string())
    .bind(Utc::now().to_rfc3339())
    .execute(pool)
    .await
    .expect("seed image");
}

#[tokio::test]
async fn transport_failure_preserves_prior_state() {
    let pool = test_pool().await;
    let dir = tempfile::tempdir().unwrap();
    // Prior attempt left a mid-band score
    let guid = seed_vehicle(&pool, "manual_review", false, 2, Some(61.5), Some(Utc::now())).await;
    seed_image(&pool, guid, &dir).await;

    let engine = test_engine(&pool);
    let outcome = engine.verify(guid).await.expect("engine reports, not raises");

    assert!(!outcome.success);
    assert_eq!(outcome.score, None);
    assert!(outcome.attempt.error_message.is_some());
    assert_eq!(outcome.attempt.overall_confidence_score, None);
    assert_eq!(outcome.attempt.brand_match_score, None);
    assert!(!outcome.attempt.verification_passed);
    assert!(!outcome.attempt.requires_manual_review);
    assert_eq!(outcome.attempt.images_analyzed_count, 1);

    // Status moved to failed; score, verified flag, and attempt counter untouched
    let row: (String, i64, f64, i64) = sqlx::query_as(
        "SELECT verification_status, is_verified, verification_score, verification_attempts \
         FROM vehicles WHERE guid = ?",
    )
    .bind(guid.to_string())
    .fetch_one(&pool)
    .await
    .unwrap();
    assert_eq!(row.0, "failed");
    assert_eq!(row.1, 0);
    assert_eq!(row.2, 61.5);
    assert_eq!(row.3, 2);

    // Exactly one attempt record was written
    let count: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM verification_results WHERE vehicle_guid = ?")
            .bind(guid.to_string())
            .fetch_one(&pool)
            .await
            .unwrap();
    assert_eq!(count, 1);
}

#[tokio::test]
async fn attempt_cap_rejects_before_any_record() {
    let pool = test_pool().await;
    let dir = tempfile::tempdir().unwrap();
    let guid = seed_vehicle(&pool, "failed", false, 5, Some(20.0), Some(Utc::now())).await;
    seed_image(&pool, guid, &dir).await;

    let engine = test_engine(&pool);
    let err = engine.verify(guid).await.expect_err("cap must reject");
    assert!(matches!(err, VerifyError::AttemptsExhausted(5)));

    let count: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM verification_results WHERE vehicle_guid = ?")
            .bind(guid.to_string())
            .fetch_one(&pool)
            .await
            .unwrap();
    assert_eq!(count, 0);
}

#[tokio::test]
async fn fresh_in_progress_blocks_new_attempt() {
    let pool = test_pool().await;
    let dir = tempfile::tempdir().unwrap();
    let guid = seed_vehicle(&pool, "in_progress", false, 1, None, Some(Utc::now())).await;
    seed_image(&pool, guid, &dir).await;

    let engine = test_engine(&pool);
    let err = engine.verify(guid).await.expect_err("must block");
    assert!(matches!(err, VerifyError::AlreadyInProgress));
}

#[tokio::test]
async fn stale_in_progress_is_reset_and_attempt_proceeds() {
    let pool = test_pool().await;
    let dir = tempfile::tempdir().unwrap();
    let stale_stamp = Utc::now() - Duration::minutes(10);
    let guid = seed_vehicle(&pool, "in_progress", false, 1, None, Some(stale_stamp)).await;
    seed_image(&pool, guid, &dir).await;

    let engine = test_engine(&pool);
    // Proceeds past the guard and hits the (failing) vision call
    let outcome = engine.verify(guid).await.expect("stale marker must not block");
    assert!(!outcome.success);
    assert!(outcome.attempt.error_message.is_some());
}

#[tokio::test]
async fn in_progress_without_timestamp_is_treated_as_abandoned() {
    let pool = test_pool().await;
    let dir = tempfile::tempdir().unwrap();
    let guid = seed_vehicle(&pool, "in_progress", false, 0, None, None).await;
    seed_image(&pool, guid, &dir).await;

    let engine = test_engine(&pool);
    let outcome = engine.verify(guid).await.expect("must not block");
    assert!(!outcome.success);
}

#[tokio::test]
async fn tightened_staleness_window_is_honored() {
    let pool = test_pool().await;
    let dir = tempfile::tempdir().unwrap();
    let guid = seed_vehicle(
        &pool,
        "in_progress",
        false,
        1,
        None,
        Some(Utc::now() - Duration::seconds(2)),
    )
    .await;
    seed_image(&pool, guid, &dir).await;

    let engine = test_engine(&pool).with_governor(GovernorConfig {
        max_attempts: 5,
        staleness_window: Duration::seconds(1),
    });

    // 2 s old marker is stale under a 1 s window
    let outcome = engine.verify(guid).await.expect("stale under tight window");
    assert!(!outcome.success);
}

#[tokio::test]
async fn unknown_vehicle_is_not_found() {
    let pool = test_pool().await;
    let engine = test_engine(&pool);
    let err = engine.verify(Uuid::new_v4()).await.expect_err("unknown");
    assert!(matches!(err, VerifyError::NotFound(_)));
}

#[tokio::test]
async fn unreadable_images_record_processing_error() {
    let pool = test_pool().await;
    let guid = seed_vehicle(&pool, "pending", false, 0, None, None).await;

    // Image row pointing at a path that does not exist
    sqlx::query(
        r#"
        INSERT INTO vehicle_images (guid, vehicle_guid, path, is_primary, uploaded_at)
        VALUES (?, ?, '/nonexistent/photo.jpg', 1, ?)
        "#,
    )
    .bind(Uuid::new_v4().to_string())
    .bind(guid.to_string())
    .bind(Utc::now().to_rfc3339())
    .execute(&pool)
    .await
    .unwrap();

    let engine = test_engine(&pool);
    let outcome = engine.verify(guid).await.expect("reported, not raised");
    assert!(!outcome.success);
    assert_eq!(
        outcome.attempt.error_message.as_deref(),
        Some("Could not process vehicle images")
    );
}

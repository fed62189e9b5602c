//! Integration tests for carvet-vv API endpoints
//!
//! The vision endpoint is pointed at an unroutable address; every test
//! here exercises paths that either never reach the vision call or record
//! its failure.

use axum::{
    body::Body,
    http::{Request, StatusCode},
};
use http_body_util::BodyExt;
use serde_json::{json, Value};
use tower::util::ServiceExt;
use uuid::Uuid;

use carvet_common::events::EventBus;
use carvet_vv::services::verifier::VerificationEngine;
use carvet_vv::services::vision::{VisionClient, VisionConfig};
use carvet_vv::AppState;

/// Test helper: create test app with in-memory database
async fn create_test_app() -> (axum::Router, sqlx::SqlitePool) {
    let pool = sqlx::SqlitePool::connect("sqlite::memory:")
        .await
        .expect("Failed to create in-memory database");

    carvet_vv::db::init_tables(&pool)
        .await
        .expect("Failed to initialize database schema");

    let event_bus = EventBus::new(100);

    // Unroutable vision endpoint: calls fail fast with a network error
    let vision = VisionClient::new(VisionConfig {
        api_key: "test-key".to_string(),
        model: "gpt-4o".to_string(),
        base_url: "http://127.0.0.1:1/v1".to_string(),
    })
    .expect("Failed to build vision client");

    let engine = VerificationEngine::new(pool.clone(), event_bus.clone(), vision);
    let state = AppState::new(pool.clone(), event_bus, engine);
    let app = carvet_vv::build_router(state);

    (app, pool)
}

/// Test helper: seed a vehicle row
async fn seed_vehicle(
    pool: &sqlx::SqlitePool,
    status: &str,
    attempts: i64,
    score: Option<f64>,
    last_verification_at: Option<String>,
) -> Uuid {
    let guid = Uuid::new_v4();
    let now = chrono::Utc::now().to_rfc3339();
    sqlx::query(
        r#"
        INSERT INTO vehicles (
            guid, manufacturer, model, vehicle_type, fuel_type, year, plate_number,
            verification_status, is_verified, verification_score,
            verification_attempts, last_verification_at, created_at, updated_at
        ) VALUES (?, 'Toyota', 'Corolla', 'car', 'petrol', 2019, NULL, ?, 0, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(guid.to_string())
    .bind(status)
    .bind(score)
    .bind(attempts)
    .bind(last_verification_at)
    .bind(&now)
    .bind(&now)
    .execute(pool)
    .await
    .expect("Failed to seed vehicle");
    guid
}

async fn body_json(response: axum::response::Response) -> Value {
    let bytes = response
        .into_body()
        .collect()
        .await
        .expect("Failed to read body")
        .to_bytes();
    serde_json::from_slice(&bytes).expect("Body is not JSON")
}

async fn attempt_count(pool: &sqlx::SqlitePool, guid: Uuid) -> i64 {
    sqlx::query_scalar("SELECT COUNT(*) FROM verification_results WHERE vehicle_guid = ?")
        .bind(guid.to_string())
        .fetch_one(pool)
        .await
        .expect("count query")
}

#[tokio::test]
async fn test_health_endpoint() {
    let (app, _pool) = create_test_app().await;

    let response = app
        .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["status"], "ok");
    assert_eq!(body["module"], "carvet-vv");
}

#[tokio::test]
async fn test_status_unknown_vehicle_is_404() {
    let (app, _pool) = create_test_app().await;

    let response = app
        .oneshot(
            Request::builder()
                .uri(format!("/vehicles/{}/verification-status", Uuid::new_v4()))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let body = body_json(response).await;
    assert_eq!(body["error"]["code"], "NOT_FOUND");
}

#[tokio::test]
async fn test_status_reflects_seeded_state() {
    let (app, pool) = create_test_app().await;
    let guid = seed_vehicle(&pool, "manual_review", 2, Some(61.5), None).await;

    let response = app
        .oneshot(
            Request::builder()
                .uri(format!("/vehicles/{}/verification-status", guid))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["verification_status"], "manual_review");
    assert_eq!(body["is_verified"], false);
    assert_eq!(body["verification_score"], 61.5);
    assert_eq!(body["attempts"], 2);
    assert!(body.get("latest_result").is_none());
}

#[tokio::test]
async fn test_verify_unknown_vehicle_is_404() {
    let (app, _pool) = create_test_app().await;

    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri(format!("/vehicles/{}/verify", Uuid::new_v4()))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_verify_at_attempt_cap_is_429_and_writes_nothing() {
    let (app, pool) = create_test_app().await;
    let guid = seed_vehicle(&pool, "failed", 5, Some(40.0), None).await;

    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri(format!("/vehicles/{}/verify", guid))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    let body = body_json(response).await;
    assert_eq!(body["error"]["code"], "TOO_MANY_ATTEMPTS");
    assert_eq!(attempt_count(&pool, guid).await, 0);
}

#[tokio::test]
async fn test_verify_while_in_progress_is_409() {
    let (app, pool) = create_test_app().await;
    // Fresh in_progress marker: not stale yet
    let recent = chrono::Utc::now().to_rfc3339();
    let guid = seed_vehicle(&pool, "in_progress", 1, None, Some(recent)).await;

    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri(format!("/vehicles/{}/verify", guid))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::CONFLICT);
    assert_eq!(attempt_count(&pool, guid).await, 0);
}

#[tokio::test]
async fn test_verify_without_images_records_error_attempt() {
    let (app, pool) = create_test_app().await;
    let guid = seed_vehicle(&pool, "pending", 1, Some(62.0), None).await;

    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri(format!("/vehicles/{}/verify", guid))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["success"], false);
    assert_eq!(body["verification_status"], "failed");
    assert_eq!(
        body["verification_result"]["error_message"],
        "No images found for verification"
    );

    // Exactly one error-only attempt; prior score untouched, counter unchanged
    assert_eq!(attempt_count(&pool, guid).await, 1);
    let row: (String, f64, i64) = sqlx::query_as(
        "SELECT verification_status, verification_score, verification_attempts FROM vehicles WHERE guid = ?",
    )
    .bind(guid.to_string())
    .fetch_one(&pool)
    .await
    .unwrap();
    assert_eq!(row.0, "failed");
    assert_eq!(row.1, 62.0);
    assert_eq!(row.2, 1);
}

#[tokio::test]
async fn test_history_lists_attempts_newest_first() {
    let (app, pool) = create_test_app().await;
    let guid = seed_vehicle(&pool, "pending", 0, None, None).await;

    // Two no-image runs produce two error attempts
    for _ in 0..2 {
        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri(format!("/vehicles/{}/verify", guid))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        // Ensure the two attempts get distinct timestamps
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    }

    let response = app
        .oneshot(
            Request::builder()
                .uri(format!("/vehicles/{}/verification-history", guid))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    let results = body["results"].as_array().unwrap();
    assert_eq!(results.len(), 2);
    let first: chrono::DateTime<chrono::Utc> =
        serde_json::from_value(results[0]["created_at"].clone()).unwrap();
    let second: chrono::DateTime<chrono::Utc> =
        serde_json::from_value(results[1]["created_at"].clone()).unwrap();
    assert!(first >= second, "history must be newest first");
}

#[tokio::test]
async fn test_result_detail_roundtrip() {
    let (app, pool) = create_test_app().await;
    let guid = seed_vehicle(&pool, "pending", 0, None, None).await;

    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri(format!("/vehicles/{}/verify", guid))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    let body = body_json(response).await;
    let result_guid = body["verification_result"]["guid"].as_str().unwrap().to_string();

    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .uri(format!("/verification-results/{}", result_guid))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let detail = body_json(response).await;
    assert_eq!(detail["guid"], result_guid.as_str());
    assert_eq!(detail["vehicle_guid"], guid.to_string());

    let response = app
        .oneshot(
            Request::builder()
                .uri(format!("/verification-results/{}", Uuid::new_v4()))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_bulk_verify_returns_one_entry_per_guid() {
    let (app, pool) = create_test_app().await;
    let known = seed_vehicle(&pool, "pending", 0, None, None).await;
    let capped = seed_vehicle(&pool, "failed", 5, Some(30.0), None).await;
    let unknown = Uuid::new_v4();

    let request_body = json!({ "vehicle_guids": [known, capped, unknown] }).to_string();
    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/vehicles/bulk-verify")
                .header("content-type", "application/json")
                .body(Body::from(request_body))
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["total"], 3);
    let results = body["results"].as_array().unwrap();
    assert_eq!(results.len(), 3);

    // known: engine ran (no images -> error attempt), batch continued
    assert_eq!(results[0]["vehicle_guid"], known.to_string());
    assert_eq!(results[0]["success"], false);
    assert_eq!(results[0]["status"], "failed");

    // capped: governor rejection, no record
    assert_eq!(results[1]["success"], false);
    assert!(results[1]["error"]
        .as_str()
        .unwrap()
        .contains("Maximum verification attempts"));
    assert_eq!(attempt_count(&pool, capped).await, 0);

    // unknown: reported, not aborted
    assert_eq!(results[2]["success"], false);
    assert!(results[2]["error"].as_str().unwrap().contains("not found"));
}

#[tokio::test]
async fn test_bulk_verify_empty_list_is_400() {
    let (app, _pool) = create_test_app().await;

    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/vehicles/bulk-verify")
                .header("content-type", "application/json")
                .body(Body::from(r#"{"vehicle_guids": []}"#))
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

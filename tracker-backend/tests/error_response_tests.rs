use axum::{
    body::Body,
    http::{Request, StatusCode},
};
use http_body_util::BodyExt;
use serde_json::{Value, json};
use tower::ServiceExt;
use tracker_backend::config::Config;
use tracker_backend::create_app;

/// Helper to create test database
async fn setup_test_db() -> tracker_db::Database {
    tracker_db::Database::open_in_memory()
        .await
        .expect("Failed to create in-memory database")
}

fn app_with_key(db: tracker_db::Database, key: Option<&str>) -> axum::Router {
    let config = Config {
        ingest_api_key: key.map(str::to_string),
        rate_limit_admin_burst: 100,
        ..Config::default()
    };
    create_app(db, config)
}

/// Helper to send a request and get response
async fn send_request(
    app: axum::Router,
    method: &str,
    uri: &str,
    body: Option<Value>,
    auth_token: Option<&str>,
) -> (StatusCode, Value) {
    let mut request_builder = Request::builder()
        .uri(uri)
        .method(method)
        .header("x-real-ip", "203.0.113.9");

    if let Some(token) = auth_token {
        request_builder = request_builder.header("Authorization", format!("Bearer {}", token));
    }

    let request = if let Some(json_body) = body {
        request_builder
            .header("Content-Type", "application/json")
            .body(Body::from(serde_json::to_vec(&json_body).unwrap()))
            .unwrap()
    } else {
        request_builder.body(Body::empty()).unwrap()
    };

    let response = app.oneshot(request).await.unwrap();
    let status = response.status();

    let body_bytes = response
        .into_body()
        .collect()
        .await
        .unwrap()
        .to_bytes();

    let json = if body_bytes.is_empty() {
        json!({})
    } else {
        serde_json::from_slice(&body_bytes).unwrap_or(json!({}))
    };

    (status, json)
}

#[tokio::test]
async fn test_error_response_format_for_unknown_server() {
    // GIVEN: An empty database
    let db = setup_test_db().await;
    let app = app_with_key(db, None);

    // WHEN: Requesting a server that was never polled
    let (status, body) =
        send_request(app, "GET", "/api/servers/rust/10.0.0.1/28015", None, None).await;

    // THEN: Should return 404 with JSON error
    assert_eq!(status, StatusCode::NOT_FOUND);

    // AND: Error response should have proper structure
    assert!(body.get("error").is_some(), "Response should have 'error' field");
    let error_msg = body["error"].as_str().unwrap();
    assert!(
        error_msg.contains("not found"),
        "Error message should be user-friendly"
    );
    assert!(body.get("details").is_none());
}

#[tokio::test]
async fn test_error_response_for_invalid_api_key() {
    // GIVEN: An app protected by a key
    let db = setup_test_db().await;
    let app = app_with_key(db, Some("poller-secret"));

    // WHEN: Making request with invalid API key
    let (status, body) = send_request(
        app,
        "POST",
        "/api/ingest",
        Some(json!({
            "server": { "type": "rust", "host": "10.0.0.1", "port": 28015 },
            "players": []
        })),
        Some("not-the-key"),
    )
    .await;

    // THEN: Should return 401 with JSON error
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    // AND: Error response should be helpful
    let error_msg = body["error"].as_str().unwrap();
    assert!(
        error_msg.contains("Invalid") || error_msg.contains("API key"),
        "Error message: {}",
        error_msg
    );
}

#[tokio::test]
async fn test_error_response_for_validation_failure() {
    // GIVEN: An empty database
    let db = setup_test_db().await;
    let app = app_with_key(db, None);

    // WHEN: Sending a server type with a space in it
    let (status, body) = send_request(
        app,
        "POST",
        "/api/ingest",
        Some(json!({
            "server": { "type": "rust server", "host": "10.0.0.1", "port": 28015 },
            "players": [{ "name": "Alice" }]
        })),
        None,
    )
    .await;

    // THEN: Should return 400 with validation error
    assert_eq!(status, StatusCode::BAD_REQUEST);

    // AND: Error message should explain the problem
    let error_msg = body["error"].as_str().unwrap();
    assert!(
        error_msg.contains("invalid characters"),
        "Error should mention the characters: {}",
        error_msg
    );
}

#[tokio::test]
async fn test_error_response_for_invalid_path_server() {
    // GIVEN: An empty database
    let db = setup_test_db().await;
    let app = app_with_key(db, None);

    // WHEN: Requesting sessions with a malformed host
    let (status, body) = send_request(
        app,
        "GET",
        "/api/servers/rust/bad%20host/28015/sessions/active",
        None,
        None,
    )
    .await;

    // THEN: Should return 400 naming the host
    assert_eq!(status, StatusCode::BAD_REQUEST);
    let error_msg = body["error"].as_str().unwrap();
    assert!(error_msg.contains("Host"), "Error message: {}", error_msg);
}

#[tokio::test]
async fn test_error_response_for_negative_merge_gap() {
    // GIVEN: An empty database
    let db = setup_test_db().await;
    let app = app_with_key(db, Some("admin-secret"));

    // WHEN: Requesting proximity consolidation with a negative gap
    let (status, body) = send_request(
        app,
        "POST",
        "/api/admin/consolidate/proximity",
        Some(json!({ "mergeGapMs": -250 })),
        Some("admin-secret"),
    )
    .await;

    // THEN: Error should name the offending value
    assert_eq!(status, StatusCode::BAD_REQUEST);
    let error_msg = body["error"].as_str().unwrap();
    assert!(
        error_msg.contains("negative") && error_msg.contains("-250"),
        "Error message: {}",
        error_msg
    );
}

#[tokio::test]
async fn test_error_response_for_bad_limit() {
    // GIVEN: An empty database
    let db = setup_test_db().await;
    let app = app_with_key(db, None);

    // WHEN: Requesting zero recent sessions
    let (status, body) = send_request(
        app,
        "GET",
        "/api/servers/rust/10.0.0.1/28015/sessions/recent?limit=0",
        None,
        None,
    )
    .await;

    // THEN: Error should describe the accepted range
    assert_eq!(status, StatusCode::BAD_REQUEST);
    let error_msg = body["error"].as_str().unwrap();
    assert!(
        error_msg.contains("between 1 and 500"),
        "Error message: {}",
        error_msg
    );
}

#[tokio::test]
async fn test_error_response_for_disabled_admin_routes() {
    // GIVEN: An app without any key configured
    let db = setup_test_db().await;
    let app = app_with_key(db, None);

    // WHEN: Requesting exact consolidation
    let (status, body) = send_request(
        app,
        "POST",
        "/api/admin/consolidate/exact",
        Some(json!({})),
        None,
    )
    .await;

    // THEN: Should return 403 explaining how to enable them
    assert_eq!(status, StatusCode::FORBIDDEN);
    let error_msg = body["error"].as_str().unwrap();
    assert!(
        error_msg.contains("API key is configured"),
        "Error message: {}",
        error_msg
    );
}

#[tokio::test]
async fn test_error_response_doesnt_expose_internals() {
    // GIVEN: An app protected by a key
    let db = setup_test_db().await;
    let app = app_with_key(db, Some("admin-secret"));

    // WHEN: Calling an admin route without credentials
    let (status, body) = send_request(
        app,
        "GET",
        "/api/admin/query-metrics",
        None,
        None,
    )
    .await;

    // THEN: Error should not expose internal details
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let error_msg = body["error"].as_str().unwrap();
    assert!(!error_msg.contains("SQL"), "Should not expose SQL details");
    assert!(
        !error_msg.contains("admin-secret"),
        "Should not echo the configured key"
    );
    assert!(
        !error_msg.contains("sha"),
        "Should not expose how keys are compared"
    );
}

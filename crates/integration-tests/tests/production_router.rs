//! The production router: health checks and auth rate limiting.

use axum::http::StatusCode;
use serde_json::json;

use ratna_integration_tests::TestApp;

#[tokio::test]
async fn test_health_endpoints() {
    let app = TestApp::production();

    let (status, body) = app.get("/health", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, "ok");

    let (status, _) = app.get("/health/ready", None).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn test_login_is_rate_limited_per_ip() {
    let app = TestApp::production();
    let attempt = json!({"email": "nobody@example.com", "password": "Guess1!x"});

    for _ in 0..5 {
        let (status, _) = app.post("/api/auth/login", None, attempt.clone()).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }
    let (status, _) = app.post("/api/auth/login", None, attempt).await;
    assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);

    // Other routes are not affected.
    let (status, _) = app.get("/api/shipping-rates", None).await;
    assert_eq!(status, StatusCode::OK);
}

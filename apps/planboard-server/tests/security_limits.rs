use axum::{body::Body, http::Request, http::StatusCode};
use planboard_server::{build_router, AppConfig};
use serde_json::json;
use tower::ServiceExt;

#[tokio::test]
async fn rejects_body_over_limit() {
    let config = AppConfig {
        max_body_bytes: 32,
        ..AppConfig::default()
    };
    let app = build_router(&config).unwrap();

    let request = Request::builder()
        .method("POST")
        .uri("/auth/login")
        .header("host", "planboard.test")
        .header("origin", "http://planboard.test")
        .header("content-type", "application/json")
        .body(Body::from(
            json!({"email":"someone@example.com","password":"this payload is definitely too large"})
                .to_string(),
        ))
        .unwrap();

    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
}

#[tokio::test]
async fn rate_limits_per_client_ip() {
    let config = AppConfig {
        rate_limit_requests_per_minute: 2,
        trust_proxy_headers: true,
        ..AppConfig::default()
    };
    let app = build_router(&config).unwrap();

    let request = |ip: &str| {
        Request::builder()
            .method("GET")
            .uri("/health")
            .header("x-forwarded-for", ip)
            .body(Body::empty())
            .unwrap()
    };

    let first = app.clone().oneshot(request("198.51.100.9")).await.unwrap();
    let second = app.clone().oneshot(request("198.51.100.9")).await.unwrap();
    let third = app.clone().oneshot(request("198.51.100.9")).await.unwrap();
    let other_client = app.oneshot(request("198.51.100.10")).await.unwrap();

    assert_eq!(first.status(), StatusCode::OK);
    assert_eq!(second.status(), StatusCode::OK);
    assert_eq!(third.status(), StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(other_client.status(), StatusCode::OK);
}

#[tokio::test]
async fn login_route_has_its_own_tighter_limit() {
    let config = AppConfig {
        auth_route_requests_per_minute: 2,
        trust_proxy_headers: true,
        ..AppConfig::default()
    };
    let app = build_router(&config).unwrap();

    let login = || {
        Request::builder()
            .method("POST")
            .uri("/auth/login")
            .header("host", "planboard.test")
            .header("origin", "http://planboard.test")
            .header("content-type", "application/json")
            .header("x-forwarded-for", "203.0.113.44")
            .body(Body::from(
                json!({"email":"nobody@example.com","password":"super-secure-password"})
                    .to_string(),
            ))
            .unwrap()
    };

    let first = app.clone().oneshot(login()).await.unwrap();
    let second = app.clone().oneshot(login()).await.unwrap();
    let third = app.clone().oneshot(login()).await.unwrap();
    assert_eq!(first.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(second.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(third.status(), StatusCode::TOO_MANY_REQUESTS);

    let health = Request::builder()
        .method("GET")
        .uri("/health")
        .header("x-forwarded-for", "203.0.113.44")
        .body(Body::empty())
        .unwrap();
    assert_eq!(app.oneshot(health).await.unwrap().status(), StatusCode::OK);
}

#[tokio::test]
async fn metrics_are_exposed_as_prometheus_text() {
    let app = build_router(&AppConfig::default()).unwrap();
    let request = Request::builder()
        .method("GET")
        .uri("/metrics")
        .body(Body::empty())
        .unwrap();
    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let text = String::from_utf8(bytes.to_vec()).unwrap();
    assert!(text.contains("# TYPE planboard_auth_failures_total counter"));
    assert!(text.contains("# TYPE planboard_setup_outcomes_total counter"));
}

#[test]
fn rejects_weak_setup_token_configuration() {
    let config = AppConfig {
        setup_token: Some(String::from("short")),
        ..AppConfig::default()
    };
    assert!(build_router(&config).is_err());
}

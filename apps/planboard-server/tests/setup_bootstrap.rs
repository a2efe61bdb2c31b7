use std::path::PathBuf;

use axum::{body::Body, http::Request, http::StatusCode};
use planboard_server::{build_router, AppConfig, DeploymentMode};
use serde_json::{json, Value};
use tower::ServiceExt;
use uuid::Uuid;

const SETUP_TOKEN: &str = "bootstrap-token-0123456789";

fn marker_path() -> PathBuf {
    std::env::temp_dir()
        .join(format!("planboard-setup-{}", Uuid::new_v4()))
        .join("setup-complete.json")
}

fn setup_request(token: &str, email: &str, teamspace_slug: Option<&str>) -> Request<Body> {
    let mut payload = json!({
        "setup_token": token,
        "email": email,
        "display_name": "Operator",
        "password": "super-secure-password"
    });
    if let Some(slug) = teamspace_slug {
        payload["teamspace_slug"] = Value::from(slug);
    }
    Request::builder()
        .method("POST")
        .uri("/setup")
        .header("host", "planboard.test")
        .header("origin", "http://planboard.test")
        .header("content-type", "application/json")
        .body(Body::from(payload.to_string()))
        .unwrap()
}

async fn error_code(response: axum::response::Response) -> String {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let body: Value = serde_json::from_slice(&bytes).unwrap();
    body["error"].as_str().unwrap().to_owned()
}

async fn cleanup(marker: &std::path::Path) {
    if let Some(dir) = marker.parent() {
        let _ = tokio::fs::remove_dir_all(dir).await;
    }
}

#[tokio::test]
async fn concurrent_setup_has_exactly_one_winner() {
    let marker = marker_path();
    let app = build_router(&AppConfig {
        deployment_mode: DeploymentMode::SingleTenant,
        setup_token: Some(String::from(SETUP_TOKEN)),
        setup_marker_path: marker.clone(),
        ..AppConfig::default()
    })
    .unwrap();

    let (first, second) = tokio::join!(
        app.clone()
            .oneshot(setup_request(SETUP_TOKEN, "first@example.com", None)),
        app.clone()
            .oneshot(setup_request(SETUP_TOKEN, "second@example.com", None))
    );
    let mut statuses = [first.unwrap().status(), second.unwrap().status()];
    statuses.sort();
    assert_eq!(statuses, [StatusCode::OK, StatusCode::CONFLICT]);
    assert!(tokio::fs::try_exists(&marker).await.unwrap());

    let third = app
        .oneshot(setup_request(SETUP_TOKEN, "third@example.com", None))
        .await
        .unwrap();
    assert_eq!(third.status(), StatusCode::CONFLICT);
    assert_eq!(error_code(third).await, "setup_already_completed");

    cleanup(&marker).await;
}

#[tokio::test]
async fn setup_requires_a_configured_and_matching_token() {
    let marker = marker_path();
    let unconfigured = build_router(&AppConfig {
        setup_marker_path: marker.clone(),
        ..AppConfig::default()
    })
    .unwrap();
    let response = unconfigured
        .oneshot(setup_request(SETUP_TOKEN, "op@example.com", Some("acme")))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(error_code(response).await, "setup_not_configured");

    let configured = build_router(&AppConfig {
        setup_token: Some(String::from(SETUP_TOKEN)),
        setup_marker_path: marker.clone(),
        ..AppConfig::default()
    })
    .unwrap();
    let wrong = configured
        .clone()
        .oneshot(setup_request("not-the-right-token", "op@example.com", Some("acme")))
        .await
        .unwrap();
    assert_eq!(wrong.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(error_code(wrong).await, "invalid_setup_token");
    assert!(!tokio::fs::try_exists(&marker).await.unwrap());

    cleanup(&marker).await;
}

#[tokio::test]
async fn multi_tenant_setup_needs_a_non_reserved_slug() {
    let marker = marker_path();
    let app = build_router(&AppConfig {
        setup_token: Some(String::from(SETUP_TOKEN)),
        setup_marker_path: marker.clone(),
        ..AppConfig::default()
    })
    .unwrap();

    let missing = app
        .clone()
        .oneshot(setup_request(SETUP_TOKEN, "op@example.com", None))
        .await
        .unwrap();
    assert_eq!(missing.status(), StatusCode::BAD_REQUEST);

    let reserved = app
        .clone()
        .oneshot(setup_request(SETUP_TOKEN, "op@example.com", Some("default")))
        .await
        .unwrap();
    assert_eq!(reserved.status(), StatusCode::BAD_REQUEST);

    let accepted = app
        .oneshot(setup_request(SETUP_TOKEN, "op@example.com", Some("acme")))
        .await
        .unwrap();
    assert_eq!(accepted.status(), StatusCode::OK);
    assert!(accepted.headers().get("set-cookie").is_some());

    cleanup(&marker).await;
}

fn json_request(
    method: &str,
    uri: &str,
    cookie: Option<&str>,
    body: Option<Value>,
) -> Request<Body> {
    let mut builder = Request::builder()
        .method(method)
        .uri(uri)
        .header("host", "planboard.test")
        .header("origin", "http://planboard.test");
    if let Some(cookie) = cookie {
        builder = builder.header("cookie", cookie);
    }
    match body {
        Some(payload) => builder
            .header("content-type", "application/json")
            .body(Body::from(payload.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    }
}

#[cfg(unix)]
#[tokio::test]
async fn marker_write_failure_is_fatal_but_bootstrap_stays_committed() {
    let marker = marker_path();
    let dir = marker.parent().unwrap().to_path_buf();
    tokio::fs::create_dir_all(&dir).await.unwrap();
    // A dangling link reads as absent but refuses create-new.
    tokio::fs::symlink(dir.join("missing").join("target"), &marker)
        .await
        .unwrap();
    let app = build_router(&AppConfig {
        setup_token: Some(String::from(SETUP_TOKEN)),
        setup_marker_path: marker.clone(),
        ..AppConfig::default()
    })
    .unwrap();

    let response = app
        .clone()
        .oneshot(setup_request(SETUP_TOKEN, "op@example.com", Some("acme")))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert!(response.headers().get("set-cookie").is_none());
    assert_eq!(error_code(response).await, "setup_marker_write_failed");

    let login = app
        .clone()
        .oneshot(json_request(
            "POST",
            "/auth/login",
            None,
            Some(json!({"email": "op@example.com", "password": "super-secure-password"})),
        ))
        .await
        .unwrap();
    assert_eq!(login.status(), StatusCode::OK);
    let cookie = login
        .headers()
        .get("set-cookie")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.split(';').next())
        .unwrap()
        .to_owned();
    let teamspace = app
        .clone()
        .oneshot(json_request("GET", "/teamspaces/acme", Some(&cookie), None))
        .await
        .unwrap();
    assert_eq!(teamspace.status(), StatusCode::OK);

    let retry = app
        .oneshot(setup_request(SETUP_TOKEN, "other@example.com", Some("other")))
        .await
        .unwrap();
    assert_eq!(retry.status(), StatusCode::CONFLICT);
    assert_eq!(error_code(retry).await, "users_already_exist");

    cleanup(&marker).await;
}

use axum::{body::Body, http::Request, http::StatusCode};
use planboard_server::{build_router, AppConfig};
use serde_json::{json, Value};
use tower::ServiceExt;

const PASSWORD: &str = "super-secure-password";

struct Reply {
    status: StatusCode,
    cookie: Option<String>,
    body: Value,
}

async fn send(
    app: &axum::Router,
    method: &str,
    uri: &str,
    cookie: Option<&str>,
    body: Option<Value>,
) -> Reply {
    let mut builder = Request::builder()
        .method(method)
        .uri(uri)
        .header("host", "planboard.test")
        .header("origin", "http://planboard.test");
    if let Some(cookie) = cookie {
        builder = builder.header("cookie", cookie);
    }
    if body.is_some() {
        builder = builder.header("content-type", "application/json");
    }
    let request = builder
        .body(body.map_or_else(Body::empty, |payload| Body::from(payload.to_string())))
        .unwrap();
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let cookie = response
        .headers()
        .get("set-cookie")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.split(';').next())
        .map(str::to_owned);
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    Reply {
        status,
        cookie,
        body,
    }
}

fn app() -> axum::Router {
    build_router(&AppConfig {
        rate_limit_requests_per_minute: 500,
        auth_route_requests_per_minute: 200,
        ..AppConfig::default()
    })
    .unwrap()
}

async fn register(app: &axum::Router, email: &str) -> String {
    let reply = send(
        app,
        "POST",
        "/auth/register",
        None,
        Some(json!({"email": email, "display_name": "Member", "password": PASSWORD})),
    )
    .await;
    assert_eq!(reply.status, StatusCode::OK);
    reply.cookie.unwrap()
}

async fn owner_with_teamspace(app: &axum::Router) -> String {
    let owner = register(app, "owner@example.com").await;
    let teamspace = send(
        app,
        "POST",
        "/teamspaces",
        Some(&owner),
        Some(json!({"slug": "acme", "name": "Acme"})),
    )
    .await;
    assert_eq!(teamspace.status, StatusCode::OK);
    let channel = send(
        app,
        "POST",
        "/teamspaces/acme/channels",
        Some(&owner),
        Some(json!({"slug": "roadmap", "name": "Roadmap"})),
    )
    .await;
    assert_eq!(channel.status, StatusCode::OK);
    owner
}

async fn invite(app: &axum::Router, owner: &str, payload: Value) -> String {
    let reply = send(
        app,
        "POST",
        "/teamspaces/acme/invitations",
        Some(owner),
        Some(payload),
    )
    .await;
    assert_eq!(reply.status, StatusCode::OK);
    reply.body["token"].as_str().unwrap().to_owned()
}

#[tokio::test]
async fn channel_invitation_grants_teamspace_viewer_and_channel_role() {
    let app = app();
    let owner = owner_with_teamspace(&app).await;
    let token = invite(
        &app,
        &owner,
        json!({"email": "frank@example.com", "role": "editor", "channel": "roadmap"}),
    )
    .await;

    let accepted = send(
        &app,
        "POST",
        &format!("/invitations/{token}/accept"),
        None,
        Some(json!({"display_name": "Frank", "password": PASSWORD})),
    )
    .await;
    assert_eq!(accepted.status, StatusCode::OK);
    assert!(accepted.body["channel_id"].is_string());
    let frank = accepted.cookie.unwrap();

    let teamspace = send(&app, "GET", "/teamspaces/acme", Some(&frank), None).await;
    assert_eq!(teamspace.status, StatusCode::OK);
    assert_eq!(teamspace.body["teamspace"]["role"], "viewer");

    let channel = send(
        &app,
        "GET",
        "/teamspaces/acme/channels/roadmap",
        Some(&frank),
        None,
    )
    .await;
    assert_eq!(channel.status, StatusCode::OK);
    assert_eq!(channel.body["channel"]["role"], "editor");
}

#[tokio::test]
async fn repeated_failures_lock_the_invitation() {
    let app = app();
    let owner = owner_with_teamspace(&app).await;
    let token = invite(
        &app,
        &owner,
        json!({"email": "gina@example.com", "role": "viewer"}),
    )
    .await;
    let accept_uri = format!("/invitations/{token}/accept");

    for _ in 0..3 {
        let failed = send(
            &app,
            "POST",
            &accept_uri,
            None,
            Some(json!({"display_name": "Gina", "password": "short"})),
        )
        .await;
        assert_eq!(failed.status, StatusCode::BAD_REQUEST);
        assert_eq!(failed.body["error"], "invalid_or_expired_invitation");
    }

    let listed = send(&app, "GET", "/teamspaces/acme/invitations", Some(&owner), None).await;
    assert_eq!(listed.body["invitations"][0]["attempts"], 3);

    let locked = send(
        &app,
        "POST",
        &accept_uri,
        None,
        Some(json!({"display_name": "Gina", "password": PASSWORD})),
    )
    .await;
    assert_eq!(locked.status, StatusCode::BAD_REQUEST);
    let preview = send(&app, "GET", &format!("/invitations/{token}"), None, None).await;
    assert_eq!(preview.status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn existing_account_must_sign_in_to_accept() {
    let app = app();
    let owner = owner_with_teamspace(&app).await;
    let hank = register(&app, "hank@example.com").await;
    let token = invite(
        &app,
        &owner,
        json!({"email": "hank@example.com", "role": "editor"}),
    )
    .await;
    let accept_uri = format!("/invitations/{token}/accept");

    let anonymous = send(
        &app,
        "POST",
        &accept_uri,
        None,
        Some(json!({"display_name": "Hank", "password": PASSWORD})),
    )
    .await;
    assert_eq!(anonymous.status, StatusCode::UNAUTHORIZED);

    let wrong_account = send(&app, "POST", &accept_uri, Some(&owner), Some(json!({}))).await;
    assert_eq!(wrong_account.status, StatusCode::BAD_REQUEST);

    let signed_in = send(&app, "POST", &accept_uri, Some(&hank), Some(json!({}))).await;
    assert_eq!(signed_in.status, StatusCode::OK);
    assert_eq!(signed_in.body["created_user"], false);

    let teamspace = send(&app, "GET", "/teamspaces/acme", Some(&hank), None).await;
    assert_eq!(teamspace.body["teamspace"]["role"], "editor");
}

#[tokio::test]
async fn revoked_and_malformed_tokens_look_alike() {
    let app = app();
    let owner = owner_with_teamspace(&app).await;
    let created = send(
        &app,
        "POST",
        "/teamspaces/acme/invitations",
        Some(&owner),
        Some(json!({"email": "ivy@example.com", "role": "viewer"})),
    )
    .await;
    let token = created.body["token"].as_str().unwrap().to_owned();
    let invitation_id = created.body["invitation"]["invitation_id"]
        .as_str()
        .unwrap()
        .to_owned();

    let revoked = send(
        &app,
        "DELETE",
        &format!("/teamspaces/acme/invitations/{invitation_id}"),
        Some(&owner),
        None,
    )
    .await;
    assert_eq!(revoked.status, StatusCode::NO_CONTENT);

    let after_revoke = send(&app, "GET", &format!("/invitations/{token}"), None, None).await;
    let malformed = send(&app, "GET", "/invitations/not-a-token", None, None).await;
    assert_eq!(after_revoke.status, StatusCode::BAD_REQUEST);
    assert_eq!(malformed.status, StatusCode::BAD_REQUEST);
    assert_eq!(after_revoke.body, malformed.body);
}

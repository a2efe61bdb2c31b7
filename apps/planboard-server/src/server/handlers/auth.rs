use std::net::SocketAddr;

use axum::{
    extract::{connect_info::ConnectInfo, Extension, State},
    http::{header::SET_COOKIE, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use planboard_core::{DisplayName, Email};

use crate::server::{
    auth::{
        authenticate, enforce_auth_route_rate_limit, extract_client_ip, hash_password, now_unix,
        validate_password,
    },
    core::{AppState, AuthContext, DeploymentMode},
    errors::AuthFailure,
    repository::{Persistence, Repository},
    session::{
        cleared_session_cookie, issue_session, revoke_session, session_token_from_headers,
        IssuedSession,
    },
    types::{ChangePasswordRequest, LoginRequest, RegisterRequest, SessionResponse, UserResponse},
};

fn session_response(context: &AuthContext, session: &IssuedSession) -> Response {
    (
        [(SET_COOKIE, session.cookie.clone())],
        Json(SessionResponse {
            user: UserResponse::from(context),
            expires_at_unix: session.expires_at_unix,
        }),
    )
        .into_response()
}

pub(crate) async fn register(
    State(state): State<AppState>,
    headers: HeaderMap,
    connect_info: Option<Extension<ConnectInfo<SocketAddr>>>,
    Json(payload): Json<RegisterRequest>,
) -> Result<Response, AuthFailure> {
    if state.runtime.deployment_mode != DeploymentMode::MultiTenant {
        return Err(AuthFailure::NotFound);
    }
    let client_ip = extract_client_ip(
        &state,
        &headers,
        connect_info.as_ref().map(|value| value.0 .0.ip()),
    );
    enforce_auth_route_rate_limit(&state, client_ip, "register").await?;

    let email = Email::try_from(payload.email).map_err(|_| AuthFailure::InvalidRequest)?;
    let display_name =
        DisplayName::try_from(payload.display_name).map_err(|_| AuthFailure::InvalidRequest)?;
    validate_password(&payload.password)?;
    let password_hash = hash_password(&payload.password).map_err(|_| AuthFailure::Internal)?;

    let now = now_unix();
    let repository = Repository::ready(&state).await?;
    let Some(user_id) = repository
        .create_user(&email, &display_name, &password_hash, now)
        .await?
    else {
        tracing::info!(event = "auth.register", outcome = "email_taken");
        return Err(AuthFailure::Conflict);
    };
    let session = issue_session(&state, user_id, now).await?;

    tracing::info!(event = "auth.register", outcome = "created", user_id = %user_id);
    Ok(session_response(
        &AuthContext {
            user_id,
            email,
            display_name,
        },
        &session,
    ))
}

pub(crate) async fn login(
    State(state): State<AppState>,
    headers: HeaderMap,
    connect_info: Option<Extension<ConnectInfo<SocketAddr>>>,
    Json(payload): Json<LoginRequest>,
) -> Result<Response, AuthFailure> {
    let client_ip = extract_client_ip(
        &state,
        &headers,
        connect_info.as_ref().map(|value| value.0 .0.ip()),
    );
    enforce_auth_route_rate_limit(&state, client_ip, "login").await?;

    let email = Email::try_from(payload.email).map_err(|_| AuthFailure::Unauthorized)?;
    validate_password(&payload.password).map_err(|_| AuthFailure::Unauthorized)?;
    let now = now_unix();
    let repository = Repository::ready(&state).await?;
    let user_id = repository
        .verify_credentials(&email, &payload.password, &state.dummy_password_hash, now)
        .await?;
    let Some(user_id) = user_id else {
        tracing::warn!(event = "auth.login", outcome = "invalid_credentials");
        return Err(AuthFailure::Unauthorized);
    };
    let user = repository
        .find_user(user_id)
        .await?
        .ok_or(AuthFailure::Unauthorized)?;
    let session = issue_session(&state, user_id, now).await?;

    tracing::info!(event = "auth.login", outcome = "success", user_id = %user_id);
    Ok(session_response(
        &AuthContext {
            user_id,
            email: user.email,
            display_name: user.display_name,
        },
        &session,
    ))
}

pub(crate) async fn logout(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Response, AuthFailure> {
    if let Some(token) = session_token_from_headers(&headers) {
        revoke_session(&state, token).await?;
        tracing::info!(event = "auth.logout", outcome = "revoked");
    }
    Ok((
        StatusCode::NO_CONTENT,
        [(SET_COOKIE, cleared_session_cookie(&state))],
    )
        .into_response())
}

pub(crate) async fn me(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<UserResponse>, AuthFailure> {
    let context = authenticate(&state, &headers).await?;
    Ok(Json(UserResponse::from(&context)))
}

/// Replaces the password, drops every existing session and issues a fresh one.
pub(crate) async fn change_password(
    State(state): State<AppState>,
    headers: HeaderMap,
    connect_info: Option<Extension<ConnectInfo<SocketAddr>>>,
    Json(payload): Json<ChangePasswordRequest>,
) -> Result<Response, AuthFailure> {
    let context = authenticate(&state, &headers).await?;
    let client_ip = extract_client_ip(
        &state,
        &headers,
        connect_info.as_ref().map(|value| value.0 .0.ip()),
    );
    enforce_auth_route_rate_limit(&state, client_ip, "password").await?;

    validate_password(&payload.new_password)?;
    let now = now_unix();
    let repository = Repository::ready(&state).await?;
    let verified = repository
        .verify_credentials(
            &context.email,
            &payload.current_password,
            &state.dummy_password_hash,
            now,
        )
        .await?;
    if verified != Some(context.user_id) {
        tracing::warn!(
            event = "auth.password",
            outcome = "invalid_credentials",
            user_id = %context.user_id
        );
        return Err(AuthFailure::Unauthorized);
    }

    let password_hash = hash_password(&payload.new_password).map_err(|_| AuthFailure::Internal)?;
    repository
        .replace_password(context.user_id, &password_hash)
        .await?;
    let session = issue_session(&state, context.user_id, now).await?;

    tracing::info!(event = "auth.password", outcome = "changed", user_id = %context.user_id);
    Ok(session_response(&context, &session))
}

use std::net::SocketAddr;

use axum::{
    extract::{connect_info::ConnectInfo, Extension, State},
    http::{header::SET_COOKIE, HeaderMap},
    response::{IntoResponse, Response},
    Json,
};

use crate::server::{
    auth::{enforce_auth_route_rate_limit, extract_client_ip, now_unix},
    core::AppState,
    setup::{is_setup_complete, run_setup, SetupFailure},
    types::{SetupRequest, SetupResponse, SetupStatusResponse},
};

pub(crate) async fn setup_status(State(state): State<AppState>) -> Json<SetupStatusResponse> {
    Json(SetupStatusResponse {
        completed: is_setup_complete(&state).await,
        mode: state.runtime.deployment_mode.as_str(),
    })
}

pub(crate) async fn complete_setup(
    State(state): State<AppState>,
    headers: HeaderMap,
    connect_info: Option<Extension<ConnectInfo<SocketAddr>>>,
    Json(payload): Json<SetupRequest>,
) -> Result<Response, SetupFailure> {
    let client_ip = extract_client_ip(
        &state,
        &headers,
        connect_info.as_ref().map(|value| value.0 .0.ip()),
    );
    enforce_auth_route_rate_limit(&state, client_ip, "setup")
        .await
        .map_err(SetupFailure::from)?;

    let outcome = run_setup(&state, &payload, now_unix()).await?;
    Ok((
        [(SET_COOKIE, outcome.session.cookie.clone())],
        Json(SetupResponse {
            user_id: outcome.record.user_id.to_string(),
            teamspace_slug: outcome.record.teamspace.slug.as_str().to_owned(),
            channel_slug: outcome.record.channel.slug.as_str().to_owned(),
            expires_at_unix: outcome.session.expires_at_unix,
        }),
    )
        .into_response())
}

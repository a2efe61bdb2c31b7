use std::{
    net::{IpAddr, Ipv4Addr, SocketAddr},
    sync::Arc,
    time::Duration,
};

use anyhow::anyhow;
use axum::{
    extract::ConnectInfo,
    extract::DefaultBodyLimit,
    http::{request::Request, HeaderName, StatusCode},
    middleware,
    routing::{delete, get, post, put},
    Router,
};
use tower::ServiceBuilder;
use tower_governor::{
    errors::GovernorError, governor::GovernorConfigBuilder, key_extractor::KeyExtractor,
    GovernorLayer,
};
use tower_http::{
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    timeout::TimeoutLayer,
    trace::TraceLayer,
};

use super::{
    auth::resolve_client_ip,
    core::{AppConfig, AppState, MIN_SETUP_TOKEN_CHARS},
    csrf::csrf_guard,
    handlers::{
        accept_invitation, change_password, complete_setup, create_channel, create_invitation,
        create_teamspace, delete_teamspace, get_channel, get_teamspace, list_channels,
        list_invitations, list_teamspaces, login, logout, me, preview_invitation, register,
        remove_channel_member, remove_teamspace_member, revoke_invitation, set_channel_member,
        set_teamspace_member, setup_status,
    },
    types::{health, metrics},
};

#[derive(Clone)]
struct TrustedClientIpKeyExtractor {
    trust_proxy_headers: bool,
}

impl TrustedClientIpKeyExtractor {
    fn new(trust_proxy_headers: bool) -> Self {
        Self {
            trust_proxy_headers,
        }
    }
}

impl KeyExtractor for TrustedClientIpKeyExtractor {
    type Key = IpAddr;

    fn extract<T>(&self, req: &Request<T>) -> Result<Self::Key, GovernorError> {
        let peer_ip = req
            .extensions()
            .get::<ConnectInfo<SocketAddr>>()
            .map(|value| value.0.ip())
            .or_else(|| req.extensions().get::<SocketAddr>().map(SocketAddr::ip));
        let resolved = resolve_client_ip(req.headers(), peer_ip, self.trust_proxy_headers);
        Ok(resolved.ip().unwrap_or(IpAddr::V4(Ipv4Addr::UNSPECIFIED)))
    }
}

fn validate_config(config: &AppConfig) -> anyhow::Result<()> {
    if config.rate_limit_requests_per_minute == 0 {
        return Err(anyhow!(
            "global rate limit must be at least 1 request per minute"
        ));
    }
    if config.auth_route_requests_per_minute == 0 {
        return Err(anyhow!(
            "auth route rate limit must be at least 1 request per minute"
        ));
    }
    if config.session_ttl.is_zero() {
        return Err(anyhow!("session ttl must be at least 1 second"));
    }
    if config.invitation_ttl.is_zero() {
        return Err(anyhow!("invitation ttl must be at least 1 second"));
    }
    if config.invitation_max_attempts == 0 {
        return Err(anyhow!("invitation max attempts must be at least 1"));
    }
    if config
        .setup_token
        .as_ref()
        .is_some_and(|token| token.chars().count() < MIN_SETUP_TOKEN_CHARS)
    {
        return Err(anyhow!(
            "setup token must be at least {MIN_SETUP_TOKEN_CHARS} characters"
        ));
    }
    Ok(())
}

/// Build the axum router with global security middleware.
///
/// # Errors
/// Returns an error if configured security limits are invalid.
pub fn build_router(config: &AppConfig) -> anyhow::Result<Router> {
    validate_config(config)?;

    let governor_config = Arc::new(
        GovernorConfigBuilder::default()
            .period(Duration::from_secs(60))
            .burst_size(config.rate_limit_requests_per_minute)
            .key_extractor(TrustedClientIpKeyExtractor::new(config.trust_proxy_headers))
            .finish()
            .ok_or_else(|| anyhow!("invalid governor configuration"))?,
    );
    let app_state = AppState::new(config)?;
    let request_id_header = HeaderName::from_static("x-request-id");
    let governor_layer = GovernorLayer::new(governor_config);

    let routes = Router::new()
        .route("/health", get(health))
        .route("/metrics", get(metrics))
        .route("/setup", post(complete_setup))
        .route("/setup/status", get(setup_status))
        .route("/auth/register", post(register))
        .route("/auth/login", post(login))
        .route("/auth/logout", post(logout))
        .route("/auth/me", get(me))
        .route("/auth/password", post(change_password))
        .route("/teamspaces", get(list_teamspaces).post(create_teamspace))
        .route(
            "/teamspaces/{teamspace}",
            get(get_teamspace).delete(delete_teamspace),
        )
        .route(
            "/teamspaces/{teamspace}/members/{user_id}",
            put(set_teamspace_member).delete(remove_teamspace_member),
        )
        .route(
            "/teamspaces/{teamspace}/channels",
            get(list_channels).post(create_channel),
        )
        .route("/teamspaces/{teamspace}/channels/{channel}", get(get_channel))
        .route(
            "/teamspaces/{teamspace}/channels/{channel}/members/{user_id}",
            put(set_channel_member).delete(remove_channel_member),
        )
        .route(
            "/teamspaces/{teamspace}/invitations",
            get(list_invitations).post(create_invitation),
        )
        .route(
            "/teamspaces/{teamspace}/invitations/{invitation_id}",
            delete(revoke_invitation),
        )
        .route("/invitations/{token}", get(preview_invitation))
        .route("/invitations/{token}/accept", post(accept_invitation));

    Ok(routes
        .layer(middleware::from_fn_with_state(app_state.clone(), csrf_guard))
        .with_state(app_state)
        .layer(DefaultBodyLimit::max(config.max_body_bytes))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(PropagateRequestIdLayer::new(request_id_header.clone()))
                .layer(SetRequestIdLayer::new(request_id_header, MakeRequestUuid))
                .layer(TimeoutLayer::with_status_code(
                    StatusCode::REQUEST_TIMEOUT,
                    config.request_timeout,
                ))
                .layer(governor_layer),
        ))
}

#[cfg(test)]
mod tests {
    use super::build_router;
    use crate::server::core::AppConfig;

    #[test]
    fn invalid_limits_are_rejected() {
        let short_token = AppConfig {
            setup_token: Some(String::from("too-short")),
            ..AppConfig::default()
        };
        assert!(build_router(&short_token).is_err());

        let no_attempts = AppConfig {
            invitation_max_attempts: 0,
            ..AppConfig::default()
        };
        assert!(build_router(&no_attempts).is_err());

        let zero_ttl = AppConfig {
            session_ttl: std::time::Duration::ZERO,
            ..AppConfig::default()
        };
        assert!(build_router(&zero_ttl).is_err());

        assert!(build_router(&AppConfig::default()).is_ok());
    }
}

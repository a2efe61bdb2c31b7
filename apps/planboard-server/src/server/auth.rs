use std::{
    net::IpAddr,
    sync::atomic::Ordering,
    time::{Duration, SystemTime, UNIX_EPOCH},
};

use anyhow::anyhow;
use argon2::{
    password_hash::rand_core::OsRng,
    password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use axum::http::HeaderMap;

use super::{
    core::{AppState, AuthContext, RATE_LIMIT_SWEEP_INTERVAL_SECS},
    errors::AuthFailure,
    repository::{Persistence, Repository},
    session::{session_token_from_headers, validate_session},
};

const MAX_X_FORWARDED_FOR_HEADER_CHARS: usize = 512;
const MAX_X_FORWARDED_FOR_ENTRY_CHARS: usize = 64;
const UNKNOWN_CLIENT_IP: &str = "unknown";
const RATE_LIMIT_WINDOW_SECS: i64 = 60;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ClientIpSource {
    Peer,
    Forwarded,
}

impl ClientIpSource {
    #[must_use]
    pub(crate) fn as_str(self) -> &'static str {
        match self {
            Self::Peer => "peer",
            Self::Forwarded => "forwarded",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct ClientIp {
    ip: Option<IpAddr>,
    source: ClientIpSource,
}

impl ClientIp {
    #[must_use]
    pub(crate) fn ip(self) -> Option<IpAddr> {
        self.ip
    }

    #[must_use]
    pub(crate) fn source(self) -> ClientIpSource {
        self.source
    }

    #[must_use]
    pub(crate) fn normalized(self) -> String {
        self.ip
            .map_or_else(|| String::from(UNKNOWN_CLIENT_IP), |ip| ip.to_string())
    }

    fn peer(ip: Option<IpAddr>) -> Self {
        Self {
            ip,
            source: ClientIpSource::Peer,
        }
    }

    fn forwarded(ip: IpAddr) -> Self {
        Self {
            ip: Some(ip),
            source: ClientIpSource::Forwarded,
        }
    }
}

pub(crate) fn validate_password(value: &str) -> Result<(), AuthFailure> {
    let len = value.len();
    if (12..=128).contains(&len) {
        Ok(())
    } else {
        Err(AuthFailure::InvalidRequest)
    }
}

pub(crate) fn hash_password(password: &str) -> anyhow::Result<String> {
    let salt = SaltString::generate(&mut OsRng);
    let argon2 = Argon2::default();
    let hash = argon2
        .hash_password(password.as_bytes(), &salt)
        .map_err(|e| anyhow!("password hash failed: {e}"))?
        .to_string();
    Ok(hash)
}

pub(crate) fn verify_password(stored_hash: &str, supplied_password: &str) -> bool {
    let Ok(parsed) = PasswordHash::new(stored_hash) else {
        return false;
    };
    Argon2::default()
        .verify_password(supplied_password.as_bytes(), &parsed)
        .is_ok()
}

/// Resolves the caller from the session cookie.
pub(crate) async fn authenticate(
    state: &AppState,
    headers: &HeaderMap,
) -> Result<AuthContext, AuthFailure> {
    let token = session_token_from_headers(headers).ok_or(AuthFailure::Unauthorized)?;
    let user_id = validate_session(state, token, now_unix())
        .await
        .ok_or(AuthFailure::Unauthorized)?;
    let repository = Repository::ready(state).await?;
    let user = repository
        .find_user(user_id)
        .await?
        .ok_or(AuthFailure::Unauthorized)?;
    Ok(AuthContext {
        user_id: user.id,
        email: user.email,
        display_name: user.display_name,
    })
}

/// Like [`authenticate`], but a missing or stale session yields `None`.
pub(crate) async fn optional_authenticate(
    state: &AppState,
    headers: &HeaderMap,
) -> Result<Option<AuthContext>, AuthFailure> {
    if session_token_from_headers(headers).is_none() {
        return Ok(None);
    }
    match authenticate(state, headers).await {
        Ok(context) => Ok(Some(context)),
        Err(AuthFailure::Unauthorized) => Ok(None),
        Err(error) => Err(error),
    }
}

pub(crate) fn now_unix() -> i64 {
    let now = SystemTime::now();
    let seconds = now
        .duration_since(UNIX_EPOCH)
        .unwrap_or_else(|_| Duration::from_secs(0))
        .as_secs();
    i64::try_from(seconds).unwrap_or(i64::MAX)
}

async fn maybe_sweep_rate_limit_state(state: &AppState, now: i64) {
    let last = state.rate_limit_last_sweep_unix.load(Ordering::Relaxed);
    if now.saturating_sub(last) < RATE_LIMIT_SWEEP_INTERVAL_SECS {
        return;
    }
    if state
        .rate_limit_last_sweep_unix
        .compare_exchange(last, now, Ordering::Relaxed, Ordering::Relaxed)
        .is_err()
    {
        return;
    }

    let mut hits = state.auth_route_hits.write().await;
    hits.retain(|_, route_hits| {
        route_hits.retain(|timestamp| now.saturating_sub(*timestamp) < RATE_LIMIT_WINDOW_SECS);
        !route_hits.is_empty()
    });
}

/// Sliding one-minute window per `(route, client ip)` for the unauthenticated entry points.
pub(crate) async fn enforce_auth_route_rate_limit(
    state: &AppState,
    client_ip: ClientIp,
    route: &str,
) -> Result<(), AuthFailure> {
    let ip = client_ip.normalized();
    let key = format!("{route}:{ip}");
    let now = now_unix();
    maybe_sweep_rate_limit_state(state, now).await;

    let mut hits = state.auth_route_hits.write().await;
    let route_hits = hits.entry(key).or_default();
    route_hits.retain(|timestamp| now.saturating_sub(*timestamp) < RATE_LIMIT_WINDOW_SECS);
    let max_hits =
        usize::try_from(state.runtime.auth_route_requests_per_minute).unwrap_or(usize::MAX);
    if route_hits.len() >= max_hits {
        tracing::warn!(
            event = "auth.rate_limit",
            route = %route,
            client_ip = %ip,
            client_ip_source = client_ip.source().as_str()
        );
        return Err(AuthFailure::RateLimited);
    }
    route_hits.push(now);
    Ok(())
}

pub(crate) fn resolve_client_ip(
    headers: &HeaderMap,
    peer_ip: Option<IpAddr>,
    trust_proxy_headers: bool,
) -> ClientIp {
    if trust_proxy_headers {
        if let Some(forwarded_ip) = parse_forwarded_ip(headers) {
            return ClientIp::forwarded(forwarded_ip);
        }
    }
    ClientIp::peer(peer_ip)
}

pub(crate) fn extract_client_ip(
    state: &AppState,
    headers: &HeaderMap,
    peer_ip: Option<IpAddr>,
) -> ClientIp {
    resolve_client_ip(headers, peer_ip, state.runtime.trust_proxy_headers)
}

fn parse_forwarded_ip(headers: &HeaderMap) -> Option<IpAddr> {
    headers
        .get("x-forwarded-for")
        .and_then(|value| value.to_str().ok())
        .filter(|value| value.len() <= MAX_X_FORWARDED_FOR_HEADER_CHARS)
        .and_then(|value| value.split(',').next())
        .map(str::trim)
        .filter(|value| !value.is_empty() && value.len() <= MAX_X_FORWARDED_FOR_ENTRY_CHARS)
        .and_then(|value| value.parse::<IpAddr>().ok())
}

#[cfg(test)]
mod tests {
    use super::{
        enforce_auth_route_rate_limit, hash_password, resolve_client_ip, verify_password,
        ClientIp, ClientIpSource,
    };
    use crate::server::{
        core::{AppConfig, AppState},
        errors::AuthFailure,
    };
    use axum::http::HeaderMap;

    #[test]
    fn password_hash_verifies_only_the_original_password() {
        let hash = hash_password("correct horse battery").expect("hash should succeed");
        assert!(verify_password(&hash, "correct horse battery"));
        assert!(!verify_password(&hash, "wrong horse battery"));
        assert!(!verify_password("not-a-phc-string", "correct horse battery"));
    }

    #[test]
    fn client_ip_ignores_forwarded_header_when_proxy_is_untrusted() {
        let mut headers = HeaderMap::new();
        headers.insert(
            "x-forwarded-for",
            "198.51.100.21".parse().expect("valid header"),
        );
        let resolved =
            resolve_client_ip(&headers, Some("10.10.0.4".parse().expect("valid ip")), false);
        assert_eq!(resolved.source(), ClientIpSource::Peer);
        assert_eq!(resolved.normalized(), "10.10.0.4");
    }

    #[test]
    fn client_ip_uses_first_forwarded_entry_when_proxy_is_trusted() {
        let mut headers = HeaderMap::new();
        headers.insert(
            "x-forwarded-for",
            "198.51.100.44, 203.0.113.10".parse().expect("valid header"),
        );
        let resolved =
            resolve_client_ip(&headers, Some("10.2.0.8".parse().expect("valid ip")), true);
        assert_eq!(resolved.source(), ClientIpSource::Forwarded);
        assert_eq!(resolved.normalized(), "198.51.100.44");
    }

    #[test]
    fn client_ip_rejects_malformed_or_oversized_forwarded_values() {
        let mut headers = HeaderMap::new();
        headers.insert(
            "x-forwarded-for",
            "198.51.100.44:80".parse().expect("valid header"),
        );
        let resolved = resolve_client_ip(&headers, None, true);
        assert_eq!(resolved.source(), ClientIpSource::Peer);
        assert_eq!(resolved.normalized(), "unknown");

        let oversized = format!("{},{}", "198.51.100.1", "9".repeat(600));
        headers.insert("x-forwarded-for", oversized.parse().expect("valid header"));
        let resolved =
            resolve_client_ip(&headers, Some("10.2.0.8".parse().expect("valid ip")), true);
        assert_eq!(resolved.source(), ClientIpSource::Peer);
    }

    #[tokio::test]
    async fn auth_route_limit_rejects_after_budget_and_sweeps_stale_keys() {
        let config = AppConfig {
            auth_route_requests_per_minute: 2,
            ..AppConfig::default()
        };
        let state = AppState::new(&config).expect("state should initialize");
        state
            .auth_route_hits
            .write()
            .await
            .insert(String::from("login:198.51.100.9"), vec![0]);

        let client_ip = ClientIp::peer(Some("198.51.100.10".parse().expect("valid ip")));
        for _ in 0..2 {
            enforce_auth_route_rate_limit(&state, client_ip, "login")
                .await
                .expect("within budget");
        }
        assert_eq!(
            enforce_auth_route_rate_limit(&state, client_ip, "login").await,
            Err(AuthFailure::RateLimited)
        );

        let hits = state.auth_route_hits.read().await;
        assert!(!hits.contains_key("login:198.51.100.9"), "stale key should be swept");
        assert!(hits.contains_key("login:198.51.100.10"));
    }
}

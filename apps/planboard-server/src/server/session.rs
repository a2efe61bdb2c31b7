use std::sync::atomic::Ordering;

use argon2::password_hash::rand_core::{OsRng, RngCore};
use axum::http::{header::COOKIE, HeaderMap};
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use planboard_core::UserId;
use sha2::{Digest, Sha256};

use super::{
    core::{AppState, RuntimeEnvironment, SESSION_SWEEP_INTERVAL_SECS},
    errors::AuthFailure,
    repository::{Persistence, Repository},
};

pub(crate) const SESSION_COOKIE_NAME: &str = "session";
const SESSION_TOKEN_BYTES: usize = 32;
/// Unpadded base64url length of [`SESSION_TOKEN_BYTES`].
const SESSION_TOKEN_CHARS: usize = 43;

/// Token material for a session that has not been stored yet.
#[derive(Debug, Clone)]
pub(crate) struct PendingSession {
    pub(crate) token: String,
    pub(crate) token_hash: [u8; 32],
    pub(crate) expires_at_unix: i64,
}

#[derive(Debug, Clone)]
pub(crate) struct IssuedSession {
    pub(crate) user_id: UserId,
    pub(crate) cookie: String,
    pub(crate) expires_at_unix: i64,
}

pub(crate) fn generate_session_token() -> String {
    let mut bytes = [0_u8; SESSION_TOKEN_BYTES];
    OsRng.fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

pub(crate) fn hash_session_token(token: &str) -> [u8; 32] {
    Sha256::digest(token.as_bytes()).into()
}

pub(crate) fn prepare_session(state: &AppState, now_unix: i64) -> PendingSession {
    let token = generate_session_token();
    PendingSession {
        token_hash: hash_session_token(&token),
        token,
        expires_at_unix: now_unix.saturating_add(state.runtime.session_ttl_secs),
    }
}

/// Finishes a session whose row was written by a larger transaction.
pub(crate) fn finish_session(
    state: &AppState,
    user_id: UserId,
    pending: &PendingSession,
) -> IssuedSession {
    IssuedSession {
        user_id,
        cookie: session_cookie(state, &pending.token),
        expires_at_unix: pending.expires_at_unix,
    }
}

pub(crate) async fn issue_session(
    state: &AppState,
    user_id: UserId,
    now_unix: i64,
) -> Result<IssuedSession, AuthFailure> {
    let pending = prepare_session(state, now_unix);
    Repository::ready(state)
        .await?
        .insert_session(pending.token_hash, user_id, pending.expires_at_unix, now_unix)
        .await?;
    Ok(finish_session(state, user_id, &pending))
}

/// Returns the session owner, or `None` for unknown, expired or unreadable sessions.
pub(crate) async fn validate_session(
    state: &AppState,
    token: &str,
    now_unix: i64,
) -> Option<UserId> {
    if !is_session_token_format(token) {
        return None;
    }
    maybe_sweep_sessions(state, now_unix).await;

    let repository = match Repository::ready(state).await {
        Ok(repository) => repository,
        Err(error) => {
            tracing::error!(event = "session.validate", outcome = "store_error", error = %error);
            return None;
        }
    };
    match repository
        .find_session(hash_session_token(token), now_unix)
        .await
    {
        Ok(user_id) => user_id,
        Err(error) => {
            tracing::error!(event = "session.validate", outcome = "store_error", error = %error);
            None
        }
    }
}

pub(crate) async fn revoke_session(state: &AppState, token: &str) -> Result<(), AuthFailure> {
    Repository::ready(state)
        .await?
        .delete_session(hash_session_token(token))
        .await
}

async fn maybe_sweep_sessions(state: &AppState, now_unix: i64) {
    let last = state.session_last_sweep_unix.load(Ordering::Relaxed);
    if now_unix.saturating_sub(last) < SESSION_SWEEP_INTERVAL_SECS {
        return;
    }
    if state
        .session_last_sweep_unix
        .compare_exchange(last, now_unix, Ordering::Relaxed, Ordering::Relaxed)
        .is_err()
    {
        return;
    }

    let result = match Repository::ready(state).await {
        Ok(repository) => repository.prune_expired_sessions(now_unix).await,
        Err(error) => Err(error),
    };
    if let Err(error) = result {
        tracing::warn!(event = "session.sweep", outcome = "failed", error = %error);
    }
}

pub(crate) fn session_cookie(state: &AppState, token: &str) -> String {
    build_cookie(
        token,
        state.runtime.session_ttl_secs,
        state.runtime.environment,
    )
}

pub(crate) fn cleared_session_cookie(state: &AppState) -> String {
    build_cookie("", 0, state.runtime.environment)
}

fn build_cookie(value: &str, max_age_secs: i64, environment: RuntimeEnvironment) -> String {
    let mut cookie = format!(
        "{SESSION_COOKIE_NAME}={value}; path=/; max-age={max_age_secs}; httponly; samesite=lax"
    );
    if environment != RuntimeEnvironment::Development {
        cookie.push_str("; secure");
    }
    cookie
}

pub(crate) fn session_token_from_headers(headers: &HeaderMap) -> Option<&str> {
    headers
        .get_all(COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(name, _)| *name == SESSION_COOKIE_NAME)
        .map(|(_, value)| value)
        .filter(|value| !value.is_empty())
}

fn is_session_token_format(token: &str) -> bool {
    token.len() == SESSION_TOKEN_CHARS
        && token
            .bytes()
            .all(|byte| byte.is_ascii_alphanumeric() || byte == b'-' || byte == b'_')
}

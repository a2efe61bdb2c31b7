use axum::{http::StatusCode, response::IntoResponse, Json};

use super::{
    metrics::{record_auth_failure, record_rate_limit_hit},
    types::AuthError,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum AuthFailure {
    InvalidRequest,
    Unauthorized,
    /// Also returned when the caller lacks the required role, so that
    /// unauthorized access is indistinguishable from a missing resource.
    NotFound,
    InvalidInvitation,
    Conflict,
    LastOwner,
    RateLimited,
    Internal,
}

impl std::fmt::Display for AuthFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{self:?}")
    }
}

impl IntoResponse for AuthFailure {
    fn into_response(self) -> axum::response::Response {
        match self {
            Self::Unauthorized => record_auth_failure("unauthorized"),
            Self::NotFound => record_auth_failure("not_found"),
            Self::RateLimited => record_rate_limit_hit("http", "auth_route"),
            Self::InvalidRequest
            | Self::InvalidInvitation
            | Self::Conflict
            | Self::LastOwner
            | Self::Internal => {}
        }

        let (status, error) = match self {
            Self::InvalidRequest => (StatusCode::BAD_REQUEST, "invalid_request"),
            Self::Unauthorized => (StatusCode::UNAUTHORIZED, "unauthorized"),
            Self::NotFound => (StatusCode::NOT_FOUND, "not_found"),
            Self::InvalidInvitation => (StatusCode::BAD_REQUEST, "invalid_or_expired_invitation"),
            Self::Conflict => (StatusCode::CONFLICT, "conflict"),
            Self::LastOwner => (StatusCode::CONFLICT, "last_owner"),
            Self::RateLimited => (StatusCode::TOO_MANY_REQUESTS, "rate_limited"),
            Self::Internal => (StatusCode::INTERNAL_SERVER_ERROR, "internal_error"),
        };
        (status, Json(AuthError { error })).into_response()
    }
}

pub fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .json()
        .with_env_filter(filter)
        .with_current_span(true)
        .with_span_list(true)
        .init();
}

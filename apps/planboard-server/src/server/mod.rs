pub(crate) mod access;
pub(crate) mod auth;
pub(crate) mod core;
pub(crate) mod csrf;
pub(crate) mod db;
pub(crate) mod errors;
pub(crate) mod handlers;
pub(crate) mod invitations;
pub(crate) mod metrics;
pub(crate) mod repository;
pub(crate) mod router;
pub(crate) mod session;
pub(crate) mod setup;
pub(crate) mod types;

pub use self::core::{
    AppConfig, DeploymentMode, RuntimeEnvironment, DEFAULT_AUTH_ROUTE_REQUESTS_PER_MINUTE,
    DEFAULT_JSON_BODY_LIMIT_BYTES, DEFAULT_RATE_LIMIT_REQUESTS_PER_MINUTE,
    DEFAULT_REQUEST_TIMEOUT_SECS, DEFAULT_SESSION_TTL_SECS, DEFAULT_SETUP_MARKER_PATH,
    MIN_SETUP_TOKEN_CHARS,
};
pub use errors::init_tracing;
pub use router::build_router;

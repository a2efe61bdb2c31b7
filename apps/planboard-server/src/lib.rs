#![forbid(unsafe_code)]

mod server;

pub use server::{
    build_router, init_tracing, AppConfig, DeploymentMode, RuntimeEnvironment,
    DEFAULT_AUTH_ROUTE_REQUESTS_PER_MINUTE, DEFAULT_JSON_BODY_LIMIT_BYTES,
    DEFAULT_RATE_LIMIT_REQUESTS_PER_MINUTE, DEFAULT_REQUEST_TIMEOUT_SECS,
    DEFAULT_SESSION_TTL_SECS, DEFAULT_SETUP_MARKER_PATH, MIN_SETUP_TOKEN_CHARS,
};

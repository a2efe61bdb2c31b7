use std::{
    collections::HashMap,
    path::PathBuf,
    sync::{atomic::AtomicI64, Arc, Mutex, OnceLock},
    time::Duration,
};

use anyhow::anyhow;
use planboard_core::{
    DisplayName, Email, UserId, DEFAULT_INVITATION_MAX_ATTEMPTS, DEFAULT_INVITATION_TTL_SECS,
};
use sqlx::{postgres::PgPoolOptions, PgPool};
use tokio::sync::{OnceCell, RwLock};

use super::{auth::hash_password, repository::memory::MemoryStore};

pub const DEFAULT_JSON_BODY_LIMIT_BYTES: usize = 1_048_576;
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 10;
pub const DEFAULT_RATE_LIMIT_REQUESTS_PER_MINUTE: u32 = 60;
pub const DEFAULT_AUTH_ROUTE_REQUESTS_PER_MINUTE: u32 = 20;
pub const DEFAULT_SESSION_TTL_SECS: u64 = 30 * 24 * 60 * 60;
pub const DEFAULT_SETUP_MARKER_PATH: &str = "./data/setup-complete.json";
pub const MIN_SETUP_TOKEN_CHARS: usize = 16;
pub(crate) const LOGIN_LOCK_THRESHOLD: u8 = 5;
pub(crate) const LOGIN_LOCK_SECS: i64 = 30;
pub(crate) const RATE_LIMIT_SWEEP_INTERVAL_SECS: i64 = 60;
pub(crate) const SESSION_SWEEP_INTERVAL_SECS: i64 = 5 * 60;
pub(crate) const DEFAULT_CHANNEL_SLUG: &str = "general";
pub(crate) const DEFAULT_CHANNEL_NAME: &str = "General";
pub(crate) const METRICS_TEXT_CONTENT_TYPE: &str = "text/plain; version=0.0.4; charset=utf-8";

pub(crate) static METRICS_STATE: OnceLock<MetricsState> = OnceLock::new();

#[derive(Default)]
pub(crate) struct MetricsState {
    pub(crate) auth_failures: Mutex<HashMap<&'static str, u64>>,
    pub(crate) rate_limit_hits: Mutex<HashMap<(&'static str, &'static str), u64>>,
    pub(crate) invitation_rejections: Mutex<HashMap<&'static str, u64>>,
    pub(crate) csrf_rejections: Mutex<HashMap<&'static str, u64>>,
    pub(crate) setup_outcomes: Mutex<HashMap<&'static str, u64>>,
}

/// How teamspaces are provisioned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeploymentMode {
    /// One implicit teamspace under the reserved slug, created by setup.
    SingleTenant,
    /// Users register and create their own teamspaces.
    MultiTenant,
}

impl DeploymentMode {
    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "single" | "single-tenant" => Some(Self::SingleTenant),
            "multi" | "multi-tenant" => Some(Self::MultiTenant),
            _ => None,
        }
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::SingleTenant => "single",
            Self::MultiTenant => "multi",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuntimeEnvironment {
    Development,
    Production,
}

impl RuntimeEnvironment {
    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "development" | "dev" => Some(Self::Development),
            "production" | "prod" => Some(Self::Production),
            _ => None,
        }
    }
}

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub max_body_bytes: usize,
    pub request_timeout: Duration,
    pub rate_limit_requests_per_minute: u32,
    pub auth_route_requests_per_minute: u32,
    pub deployment_mode: DeploymentMode,
    pub environment: RuntimeEnvironment,
    /// Honour `X-Forwarded-For` and `X-Forwarded-Host` from a fronting proxy.
    pub trust_proxy_headers: bool,
    pub session_ttl: Duration,
    pub invitation_ttl: Duration,
    pub invitation_max_attempts: u32,
    pub setup_token: Option<String>,
    pub setup_marker_path: PathBuf,
    pub database_url: Option<String>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            max_body_bytes: DEFAULT_JSON_BODY_LIMIT_BYTES,
            request_timeout: Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS),
            rate_limit_requests_per_minute: DEFAULT_RATE_LIMIT_REQUESTS_PER_MINUTE,
            auth_route_requests_per_minute: DEFAULT_AUTH_ROUTE_REQUESTS_PER_MINUTE,
            deployment_mode: DeploymentMode::MultiTenant,
            environment: RuntimeEnvironment::Production,
            trust_proxy_headers: false,
            session_ttl: Duration::from_secs(DEFAULT_SESSION_TTL_SECS),
            invitation_ttl: Duration::from_secs(DEFAULT_INVITATION_TTL_SECS.unsigned_abs()),
            invitation_max_attempts: DEFAULT_INVITATION_MAX_ATTEMPTS,
            setup_token: None,
            setup_marker_path: PathBuf::from(DEFAULT_SETUP_MARKER_PATH),
            database_url: None,
        }
    }
}

#[derive(Clone, Debug)]
pub(crate) struct RuntimeSecurityConfig {
    pub(crate) auth_route_requests_per_minute: u32,
    pub(crate) deployment_mode: DeploymentMode,
    pub(crate) environment: RuntimeEnvironment,
    pub(crate) trust_proxy_headers: bool,
    pub(crate) session_ttl_secs: i64,
    pub(crate) invitation_ttl_secs: i64,
    pub(crate) invitation_max_attempts: u32,
    pub(crate) setup_token: Option<String>,
    pub(crate) setup_marker_path: PathBuf,
}

#[derive(Clone)]
pub struct AppState {
    pub(crate) db_pool: Option<PgPool>,
    pub(crate) db_init: Arc<OnceCell<()>>,
    pub(crate) memory: Arc<RwLock<MemoryStore>>,
    pub(crate) dummy_password_hash: Arc<String>,
    pub(crate) auth_route_hits: Arc<RwLock<HashMap<String, Vec<i64>>>>,
    pub(crate) rate_limit_last_sweep_unix: Arc<AtomicI64>,
    pub(crate) session_last_sweep_unix: Arc<AtomicI64>,
    pub(crate) runtime: Arc<RuntimeSecurityConfig>,
}

impl AppState {
    pub(crate) fn new(config: &AppConfig) -> anyhow::Result<Self> {
        let dummy_password_hash = hash_password("planboard-dummy-password")?;
        let db_pool = if let Some(database_url) = &config.database_url {
            Some(
                PgPoolOptions::new()
                    .max_connections(10)
                    .connect_lazy(database_url)
                    .map_err(|e| anyhow!("postgres pool init failed: {e}"))?,
            )
        } else {
            None
        };

        Ok(Self {
            db_pool,
            db_init: Arc::new(OnceCell::new()),
            memory: Arc::new(RwLock::new(MemoryStore::default())),
            dummy_password_hash: Arc::new(dummy_password_hash),
            auth_route_hits: Arc::new(RwLock::new(HashMap::new())),
            rate_limit_last_sweep_unix: Arc::new(AtomicI64::new(0)),
            session_last_sweep_unix: Arc::new(AtomicI64::new(0)),
            runtime: Arc::new(RuntimeSecurityConfig {
                auth_route_requests_per_minute: config.auth_route_requests_per_minute,
                deployment_mode: config.deployment_mode,
                environment: config.environment,
                trust_proxy_headers: config.trust_proxy_headers,
                session_ttl_secs: duration_secs(config.session_ttl),
                invitation_ttl_secs: duration_secs(config.invitation_ttl),
                invitation_max_attempts: config.invitation_max_attempts,
                setup_token: config.setup_token.clone(),
                setup_marker_path: config.setup_marker_path.clone(),
            }),
        })
    }
}

fn duration_secs(value: Duration) -> i64 {
    i64::try_from(value.as_secs()).unwrap_or(i64::MAX)
}

#[derive(Debug, Clone)]
pub(crate) struct AuthContext {
    pub(crate) user_id: UserId,
    pub(crate) email: Email,
    pub(crate) display_name: DisplayName,
}

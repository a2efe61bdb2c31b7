#![forbid(unsafe_code)]

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use planboard_server::{build_router, init_tracing, AppConfig, DeploymentMode, RuntimeEnvironment};
use tokio::net::TcpListener;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let database_url = std::env::var("PLANBOARD_DATABASE_URL")
        .map_err(|_| anyhow::anyhow!("PLANBOARD_DATABASE_URL is required for runtime"))?;
    let defaults = AppConfig::default();
    let deployment_mode = std::env::var("PLANBOARD_MODE").map_or_else(
        |_| Ok(defaults.deployment_mode),
        |value| {
            DeploymentMode::parse(&value)
                .ok_or_else(|| anyhow::anyhow!("invalid PLANBOARD_MODE value {value:?}"))
        },
    )?;
    let environment = std::env::var("PLANBOARD_ENV").map_or_else(
        |_| Ok(defaults.environment),
        |value| {
            RuntimeEnvironment::parse(&value)
                .ok_or_else(|| anyhow::anyhow!("invalid PLANBOARD_ENV value {value:?}"))
        },
    )?;
    let trust_proxy_headers = std::env::var("PLANBOARD_TRUST_PROXY").map_or_else(
        |_| Ok(defaults.trust_proxy_headers),
        |value| {
            value.trim().parse::<bool>().map_err(|e| {
                anyhow::anyhow!("invalid PLANBOARD_TRUST_PROXY value {value:?}: {e}")
            })
        },
    )?;
    let session_ttl = std::env::var("PLANBOARD_SESSION_TTL_SECS").map_or_else(
        |_| Ok(defaults.session_ttl),
        |value| {
            value.parse::<u64>().map(Duration::from_secs).map_err(|e| {
                anyhow::anyhow!("invalid PLANBOARD_SESSION_TTL_SECS value {value:?}: {e}")
            })
        },
    )?;
    let app_config = AppConfig {
        deployment_mode,
        environment,
        trust_proxy_headers,
        session_ttl,
        setup_token: std::env::var("PLANBOARD_SETUP_TOKEN")
            .ok()
            .filter(|token| !token.is_empty()),
        setup_marker_path: std::env::var("PLANBOARD_SETUP_MARKER")
            .map_or_else(|_| defaults.setup_marker_path.clone(), PathBuf::from),
        database_url: Some(database_url),
        ..defaults
    };
    let app = build_router(&app_config)?;
    let addr = std::env::var("PLANBOARD_BIND_ADDR")
        .unwrap_or_else(|_| String::from("0.0.0.0:3000"))
        .parse::<SocketAddr>()
        .map_err(|e| anyhow::anyhow!("invalid PLANBOARD_BIND_ADDR: {e}"))?;
    let listener = TcpListener::bind(addr).await?;
    tracing::info!(%addr, mode = deployment_mode.as_str(), "planboard-server listening");

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;
    Ok(())
}

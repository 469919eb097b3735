// crates/server/src/main.rs
//! Runhub server binary.
//!
//! Reads configuration from the environment, builds the service graph once,
//! and serves the HTTP API until terminated.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};

use anyhow::Result;
use tracing_subscriber::EnvFilter;

use runhub_server::{create_app, AppState, Config};

/// Default port for the server.
const DEFAULT_PORT: u16 = 8470;

/// Get the server port from environment or use default.
fn get_port() -> u16 {
    std::env::var("RUNHUB_PORT")
        .ok()
        .or_else(|| std::env::var("PORT").ok())
        .and_then(|p| p.parse().ok())
        .unwrap_or(DEFAULT_PORT)
}

/// Bind address (`RUNHUB_BIND`), defaulting to all interfaces — the API is
/// typically fronted by a reverse proxy on a private network.
fn get_bind_addr() -> IpAddr {
    std::env::var("RUNHUB_BIND")
        .ok()
        .and_then(|raw| raw.parse().ok())
        .unwrap_or(IpAddr::V4(Ipv4Addr::UNSPECIFIED))
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .compact()
        .init();

    let config = Config::from_env()?;
    tracing::info!(
        state_dir = %config.state_dir.display(),
        backend = ?config.backend,
        "starting runhub v{}",
        env!("CARGO_PKG_VERSION"),
    );

    let state = AppState::new(config)?;
    let app = create_app(state);

    let addr = SocketAddr::from((get_bind_addr(), get_port()));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(%addr, "listening");

    axum::serve(listener, app).await?;

    Ok(())
}

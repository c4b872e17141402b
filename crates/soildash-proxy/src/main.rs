//! SoilDash Proxy - CORS relay for a soil sensor.
//!
//! Run with: `cargo run -p soildash-proxy`

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tracing::info;

use soildash_proxy::{Config, ProxyState, app};

/// SoilDash Proxy - CORS relay for a soil sensor.
#[derive(Parser, Debug)]
#[command(name = "soildash-proxy")]
#[command(version, about, long_about = None)]
struct Args {
    /// Path to configuration file.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Port to listen on (overrides config and PROXY_PORT).
    #[arg(short, long)]
    port: Option<u16>,

    /// Device IP address (overrides config and DEVICE_IP).
    #[arg(long)]
    device_ip: Option<String>,

    /// Device HTTP port (overrides config and DEVICE_PORT).
    #[arg(long)]
    device_port: Option<u16>,

    /// Require HTTP basic auth.
    #[arg(long)]
    enable_auth: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("soildash_proxy=info".parse()?)
                .add_directive("tower_http=debug".parse()?),
        )
        .init();

    let mut config = match &args.config {
        Some(path) => Config::load(path)?,
        None => Config::load_default().unwrap_or_default(),
    };
    config
        .apply_env(|name| std::env::var(name).ok())
        .context("Invalid environment configuration")?;

    if let Some(port) = args.port {
        config.server.port = port;
    }
    if let Some(ip) = args.device_ip {
        config.device.ip = ip;
    }
    if let Some(port) = args.device_port {
        config.device.port = port;
    }
    if args.enable_auth {
        config.security.auth_enabled = true;
    }
    config.validate()?;

    let state = ProxyState::new(config.clone()).context("Failed to build HTTP client")?;
    spawn_rate_limit_cleanup(Arc::clone(&state));

    let addr: SocketAddr = config
        .server
        .bind_addr()
        .parse()
        .with_context(|| format!("Invalid bind address {}", config.server.bind_addr()))?;

    info!("Proxy URL: http://localhost:{}", config.server.port);
    info!("Device: {}", config.device.address());
    info!(
        "Auth: {}",
        if config.security.auth_enabled { "ENABLED" } else { "DISABLED" }
    );
    info!(
        "Rate limit: {} requests per {:?}",
        config.security.rate_limit_max,
        config.security.rate_limit_window()
    );

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    axum::serve(
        listener,
        app(state).into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    info!("Proxy stopped");
    Ok(())
}

/// Periodically forget clients whose window has long expired.
fn spawn_rate_limit_cleanup(state: Arc<ProxyState>) {
    let window = state.config.security.rate_limit_window();
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(window.max(Duration::from_secs(1)));
        loop {
            ticker.tick().await;
            state.rate_limits.cleanup(window).await;
        }
    });
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received, shutting down gracefully");
}

//! recon-gateway - Reconciliation service for name-authority sources

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use recon_common::config::GatewayConfig;
use recon_gateway::services::HttpConnectionFactory;
use recon_gateway::AppState;
use tokio::signal;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Command-line arguments for recon-gateway
#[derive(Parser, Debug)]
#[command(name = "recon-gateway")]
#[command(about = "Reconciliation service for name-authority sources")]
#[command(version)]
struct Args {
    /// Config file (overrides RECON_CONFIG and the default location)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Address to bind
    #[arg(long, env = "RECON_HOST")]
    host: Option<String>,

    /// Port to listen on
    #[arg(short, long, env = "RECON_PORT")]
    port: Option<u16>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config = GatewayConfig::load(args.config.as_deref()).context("Failed to load configuration")?;

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                format!("recon_gateway={0},recon_common={0},tower_http=info", config.logging.level).into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting recon-gateway");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    let connector = Arc::new(
        HttpConnectionFactory::from_config(&config.http)
            .context("Failed to build HTTP client")?,
    );

    let registry = recon_gateway::build_registry(&config, connector);
    info!(count = registry.len(), "Data sources registered");

    let state = AppState::new(registry);
    let data_sources = Arc::clone(&state.data_sources);
    let app = recon_gateway::build_router(state);

    let host = args.host.unwrap_or(config.server.host);
    let port = args.port.unwrap_or(config.server.port);
    let addr = format!("{}:{}", host, port);

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;
    info!("Listening on http://{}", addr);
    info!("Health check: http://{}/health", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    info!("Draining worker pools");
    data_sources.shutdown().await;

    info!("Server shutdown complete");
    Ok(())
}

/// Resolves on Ctrl+C or SIGTERM
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, shutting down");
        },
        _ = terminate => {
            info!("Received terminate signal, shutting down");
        },
    }
}

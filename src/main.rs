//! gimbalcam - gimbal camera bridge
//!
//! Serves a small HTTP API and drives the camera over its binary TCP
//! protocol.

use clap::Parser;
use gimbalcam_server::{Config, Server};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "gimbalcam")]
#[command(about = "HTTP bridge for a gimbal camera")]
#[command(version)]
struct Cli {
    /// YAML configuration file
    #[arg(short, long, env = "GIMBALCAM_CONFIG")]
    config: Option<PathBuf>,

    /// Device address (overrides the config file)
    #[arg(short, long)]
    device: Option<String>,

    /// HTTP bind address (overrides the config file)
    #[arg(short, long)]
    bind: Option<SocketAddr>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    let mut config = match Config::load(cli.config.as_deref()) {
        Ok(c) => c,
        Err(e) => {
            tracing::error!("Failed to load config: {}", e);
            return Err(e.into());
        }
    };
    if let Some(path) = &cli.config {
        tracing::info!("Loaded config from {}", path.display());
    }

    if let Some(device) = cli.device {
        config.device.address = device;
    }
    if let Some(bind) = cli.bind {
        config.http.bind_addr = bind;
    }
    config.validate()?;

    tracing::info!("Starting gimbalcam bridge");
    tracing::info!(
        "  Device: {}:{}",
        config.device.address,
        config.device.port
    );
    tracing::info!("  HTTP: {}", config.http.bind_addr);
    tracing::info!(
        "  Metrics: {}",
        if config.metrics.enabled {
            "enabled"
        } else {
            "disabled"
        }
    );

    let server = Arc::new(Server::new(config)?);

    // Spawn shutdown signal handler
    let shutdown_server = server.clone();
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        tracing::info!("Received shutdown signal, stopping bridge...");
        shutdown_server.shutdown();
    });

    // Run server (blocks until shutdown)
    server.run().await?;

    tracing::info!("Bridge stopped");
    Ok(())
}

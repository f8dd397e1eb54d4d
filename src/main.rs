//! CARTA forwardAuth sidecar
//!
//! Answers Traefik forwardAuth requests for CARTA sessions with the id of the
//! user that owns the session.

use clap::Parser;
use tracing::info;

use carta_auth::{build_state, start_server, GatewayConfig};
use carta_common::signal::shutdown_signal;
use carta_common::telemetry::{init_logging, LogFormat, LoggingConfig};

/// carta-sidecar - map CARTA session ids to their owning user for Traefik
#[derive(Parser, Debug)]
#[command(name = "carta-sidecar", version, about, long_about = None)]
struct Cli {
    #[command(flatten)]
    gateway: GatewayConfig,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    if let Err(e) = rustls::crypto::aws_lc_rs::default_provider().install_default() {
        eprintln!("CRITICAL: Failed to install crypto provider: {:?}", e);
        std::process::exit(1);
    }

    let cli = Cli::parse();
    let config = cli.gateway;

    init_logging(&LoggingConfig {
        level: config.log_level.clone(),
        format: LogFormat::Json,
    })?;

    info!(version = env!("CARGO_PKG_VERSION"), "Starting carta-sidecar");
    config.log_parameters();

    let state = build_state(&config).await?;
    start_server(config.listen_addr, state, shutdown_signal()).await?;

    Ok(())
}

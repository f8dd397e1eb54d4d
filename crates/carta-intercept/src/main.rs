//! carta-intercept CLI

use std::process::ExitCode;

use clap::Parser;
use tracing::error;

use carta_common::telemetry::{init_logging, LogFormat, LoggingConfig};
use carta_intercept::Cli;

#[tokio::main]
async fn main() -> ExitCode {
    if let Err(e) = rustls::crypto::aws_lc_rs::default_provider().install_default() {
        eprintln!("Failed to install crypto provider: {:?}", e);
        return ExitCode::FAILURE;
    }

    let cli = Cli::parse();

    let logging = LoggingConfig {
        level: cli.log_level.clone(),
        format: LogFormat::Compact,
    };
    if let Err(e) = init_logging(&logging) {
        eprintln!("{e}");
        return ExitCode::FAILURE;
    }

    match cli.run().await {
        Ok(outcome) => ExitCode::from(outcome.exit_code()),
        Err(e) => {
            error!(error = %e, "interception failed");
            ExitCode::FAILURE
        }
    }
}

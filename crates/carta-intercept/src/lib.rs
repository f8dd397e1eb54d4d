//! CARTA session interception
//!
//! Development tool that routes one live CARTA session through the
//! forwardAuth sidecar: it applies mirror resources rendered from a template,
//! puts `carta-forwardauth` first on the session's IngressRoute, tails the echo
//! workload's logs and, on exit or signal, removes the mirror resources and
//! restores the route.

pub mod cluster;
pub mod error;
pub mod orchestrator;
pub mod routing;

pub use error::{Error, Result};
pub use orchestrator::{InterceptPlan, Orchestrator, Outcome};

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Args, Parser, Subcommand};
use tokio_util::sync::CancellationToken;

use carta_common::kube_utils::{create_client, ClientOptions};
use carta_common::signal::cancel_on_signal;
use carta_common::SessionToken;

use crate::cluster::KubeInterceptCluster;
use crate::routing::{KubeRouteStore, RouteManager};

/// carta-intercept - route a CARTA session through the forwardAuth sidecar
#[derive(Parser, Debug)]
#[command(name = "carta-intercept")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Default log level when RUST_LOG is unset
    #[arg(long, env = "LOG_LEVEL", default_value = "info", global = true)]
    pub log_level: String,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Intercept a CARTA session with forwardAuth until interrupted
    Intercept(InterceptArgs),
}

/// Arguments of the `intercept` command
#[derive(Args, Debug)]
pub struct InterceptArgs {
    /// Path to the mirror resources template (multi-document YAML)
    #[arg(short = 't', long = "template")]
    pub template: PathBuf,

    /// Namespace of the session
    #[arg(short = 'n', long)]
    pub namespace: String,

    /// CARTA session id
    #[arg(short = 's', long = "session-id", value_parser = parse_session_id)]
    pub session_id: SessionToken,

    /// Seconds to wait before tailing logs
    #[arg(short = 'w', long, default_value_t = 5.0)]
    pub wait: f64,

    /// Echo Deployment name
    #[arg(long, default_value = "carta-echo")]
    pub echo_deploy: String,

    /// Kubeconfig to use instead of in-cluster or default configuration
    #[arg(long)]
    pub kubeconfig: Option<PathBuf>,
}

fn parse_session_id(raw: &str) -> std::result::Result<SessionToken, String> {
    SessionToken::parse(raw)
        .ok_or_else(|| format!("{raw:?} is not a session id (expected [A-Za-z0-9]+)"))
}

impl InterceptArgs {
    /// Read the template and build the run plan
    pub async fn plan(&self) -> Result<InterceptPlan> {
        let template = tokio::fs::read_to_string(&self.template)
            .await
            .map_err(|source| Error::Template {
                path: self.template.clone(),
                source,
            })?;
        let wait = Duration::try_from_secs_f64(self.wait)
            .map_err(|e| Error::validation(format!("--wait {}: {}", self.wait, e)))?;

        Ok(InterceptPlan {
            namespace: self.namespace.clone(),
            session_id: self.session_id.to_string(),
            template,
            wait,
            echo_deploy: self.echo_deploy.clone(),
        })
    }
}

impl Cli {
    /// Run the CLI command
    pub async fn run(self) -> Result<Outcome> {
        match self.command {
            Commands::Intercept(args) => intercept(args).await,
        }
    }
}

async fn intercept(args: InterceptArgs) -> Result<Outcome> {
    let plan = args.plan().await?;

    let options = ClientOptions {
        kubeconfig: args.kubeconfig.clone(),
        ..ClientOptions::default()
    };
    let client = create_client(&options).await?;

    let cancel = CancellationToken::new();
    let signals = cancel_on_signal(cancel.clone());

    let orchestrator = Orchestrator::new(
        Arc::new(KubeInterceptCluster::new(client.clone())),
        RouteManager::new(KubeRouteStore::new(client)),
    );
    let result = orchestrator.run(&plan, cancel).await;
    signals.abort();
    result
}

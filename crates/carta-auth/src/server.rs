//! ForwardAuth HTTP server

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::routing::any;
use axum::Router;
use tokio::net::TcpListener;
use tracing::info;

use carta_common::kube_utils::create_client;

use crate::cache::IdentityCache;
use crate::config::GatewayConfig;
use crate::error::{Error, Result};
use crate::handler::forward_auth;
use crate::health::{livez, readyz, ClusterProbe, KubeProbe, LIVEZ_PATH, READYZ_PATH};
use crate::lookup::{ClusterIdentityLookup, KubeLabelQuery};
use crate::resolver::{ResolveIdentity, SessionResolver};

/// Shared state for handlers
#[derive(Clone)]
pub struct AppState {
    /// Session owner resolution (cache, then cluster)
    pub resolver: Arc<dyn ResolveIdentity>,
    /// Readiness check against the API server
    pub probe: Arc<dyn ClusterProbe>,
}

/// Build the router: health probes on any method, everything else is a
/// ForwardAuth decision
pub fn router(state: AppState) -> Router {
    Router::new()
        .route(LIVEZ_PATH, any(livez))
        .route(READYZ_PATH, any(readyz))
        .fallback(forward_auth)
        .with_state(state)
}

/// Connect to the cluster and wire the resolver and probe
pub async fn build_state(config: &GatewayConfig) -> Result<AppState> {
    let client = create_client(&config.client_options())
        .await
        .map_err(|e| Error::Config(format!("kube client: {}", e)))?;

    let query = KubeLabelQuery::new(client.clone(), &config.namespace, config.query_timeout());
    let lookup = ClusterIdentityLookup::new(query, config.label_keys());
    let cache = IdentityCache::new(config.cache_ttl(), config.cache_max_size);

    Ok(AppState {
        resolver: Arc::new(SessionResolver::new(cache, lookup)),
        probe: Arc::new(KubeProbe::new(client, config.query_timeout())),
    })
}

/// Serve until `shutdown` resolves, then drain in-flight requests
pub async fn start_server<F>(addr: SocketAddr, state: AppState, shutdown: F) -> Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let listener = TcpListener::bind(addr)
        .await
        .map_err(|e| Error::Config(format!("failed to bind {}: {}", addr, e)))?;

    info!(addr = %addr, "Starting ForwardAuth server");

    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown)
        .await
        .map_err(|e| Error::Internal(format!("Server error: {}", e)))?;

    info!("ForwardAuth server stopped");
    Ok(())
}

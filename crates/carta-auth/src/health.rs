//! Liveness and readiness probes
//!
//! Both are answered before the ForwardAuth decision and never touch the
//! identity cache.

use std::time::Duration;

use async_trait::async_trait;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use kube::Client;
use serde_json::json;
use tracing::warn;

#[cfg(test)]
use mockall::automock;

use carta_common::kube_utils::with_timeout;

use crate::server::AppState;

/// Liveness path
pub const LIVEZ_PATH: &str = "/livez";

/// Readiness path
pub const READYZ_PATH: &str = "/readyz";

/// Cheap check that the cluster API is reachable
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ClusterProbe: Send + Sync {
    /// Returns `Ok(())` when the API server answered
    async fn probe(&self) -> Result<(), carta_common::Error>;
}

/// [`ClusterProbe`] that asks the API server for its version
pub struct KubeProbe {
    client: Client,
    timeout: Duration,
}

impl KubeProbe {
    /// Probe through `client`, giving up after `timeout`
    pub fn new(client: Client, timeout: Duration) -> Self {
        Self { client, timeout }
    }
}

#[async_trait]
impl ClusterProbe for KubeProbe {
    async fn probe(&self) -> Result<(), carta_common::Error> {
        with_timeout(self.timeout, "apiserver version", self.client.apiserver_version())
            .await
            .map(|_| ())
    }
}

/// Always 200
pub async fn livez() -> impl IntoResponse {
    Json(json!({"status": "ok"}))
}

/// 200 when the API server answers, 503 otherwise
pub async fn readyz(State(state): State<AppState>) -> impl IntoResponse {
    readiness(state.probe.as_ref()).await
}

async fn readiness(probe: &dyn ClusterProbe) -> (StatusCode, Json<serde_json::Value>) {
    match probe.probe().await {
        Ok(()) => (StatusCode::OK, Json(json!({"status": "ready"}))),
        Err(e) => {
            warn!(error = %e, "readiness probe failed");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({"status": "not_ready", "error": e.to_string()})),
            )
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_ready_when_probe_succeeds() {
        let mut probe = MockClusterProbe::new();
        probe.expect_probe().times(1).returning(|| Ok(()));

        let (status, Json(body)) = readiness(&probe).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({"status": "ready"}));
    }

    #[tokio::test]
    async fn test_not_ready_carries_error() {
        let mut probe = MockClusterProbe::new();
        probe.expect_probe().returning(|| {
            Err(carta_common::Error::timeout(
                "apiserver version",
                Duration::from_secs(5),
            ))
        });

        let (status, Json(body)) = readiness(&probe).await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body["status"], "not_ready");
        assert!(body["error"].as_str().unwrap().contains("apiserver version"));
    }
}

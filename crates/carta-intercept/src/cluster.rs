//! Cluster operations used by an interception run

use async_trait::async_trait;
use futures::{AsyncBufReadExt, StreamExt};
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::Pod;
use kube::api::{Api, ListParams, LogParams};
use kube::{Client, ResourceExt};
use tracing::{debug, info, warn};

#[cfg(test)]
use mockall::automock;

use carta_common::kube_utils::{self, ManifestMetadata};

/// Field manager for server-side apply
pub const FIELD_MANAGER: &str = "carta-intercept";

/// Label selector used when the echo Deployment is not found by name
pub const ECHO_LABEL_SELECTOR: &str = "app=carta-echo";

/// Everything an interception run does to the cluster besides route patching
#[cfg_attr(test, automock)]
#[async_trait]
pub trait InterceptCluster: Send + Sync {
    /// Create or update the mirror resources
    async fn apply_manifests(&self, manifests: &[ManifestMetadata]) -> Result<(), carta_common::Error>;

    /// Delete the mirror resources; already-deleted objects are not an error
    async fn delete_manifests(&self, manifests: &[ManifestMetadata]) -> Result<(), carta_common::Error>;

    /// Name of the Deployment whose logs are tailed
    async fn resolve_log_workload(
        &self,
        namespace: &str,
        preferred: &str,
    ) -> Result<String, carta_common::Error>;

    /// Follow the Deployment's logs to stdout until the stream ends
    async fn stream_logs(&self, namespace: &str, deployment: &str) -> Result<(), carta_common::Error>;
}

/// [`InterceptCluster`] backed by the Kubernetes API
pub struct KubeInterceptCluster {
    client: Client,
}

impl KubeInterceptCluster {
    /// Use `client` for all operations
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    async fn first_pod(&self, namespace: &str, deployment: &str) -> Result<String, carta_common::Error> {
        let deployments: Api<Deployment> = Api::namespaced(self.client.clone(), namespace);
        let deploy = deployments.get(deployment).await?;

        let selector = deploy
            .spec
            .as_ref()
            .and_then(|spec| spec.selector.match_labels.as_ref())
            .filter(|labels| !labels.is_empty())
            .map(|labels| {
                labels
                    .iter()
                    .map(|(k, v)| format!("{k}={v}"))
                    .collect::<Vec<_>>()
                    .join(",")
            })
            .ok_or_else(|| {
                carta_common::Error::manifest_for("Deployment", format!("{deployment} has no matchLabels"))
            })?;

        let pods: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
        let list = pods.list(&ListParams::default().labels(&selector)).await?;
        list.items
            .iter()
            .find(|pod| {
                pod.status.as_ref().and_then(|s| s.phase.as_deref()) == Some("Running")
            })
            .or_else(|| list.items.first())
            .map(|pod| pod.name_any())
            .ok_or_else(|| {
                carta_common::Error::internal_with_context(
                    "stream_logs",
                    format!("no pods for deployment {deployment} ({selector})"),
                )
            })
    }
}

#[async_trait]
impl InterceptCluster for KubeInterceptCluster {
    async fn apply_manifests(&self, manifests: &[ManifestMetadata]) -> Result<(), carta_common::Error> {
        kube_utils::apply_manifests(&self.client, manifests, FIELD_MANAGER).await
    }

    async fn delete_manifests(&self, manifests: &[ManifestMetadata]) -> Result<(), carta_common::Error> {
        kube_utils::delete_manifests(&self.client, manifests).await
    }

    async fn resolve_log_workload(
        &self,
        namespace: &str,
        preferred: &str,
    ) -> Result<String, carta_common::Error> {
        let deployments: Api<Deployment> = Api::namespaced(self.client.clone(), namespace);
        if deployments.get_opt(preferred).await?.is_some() {
            return Ok(preferred.to_string());
        }

        let labelled = deployments
            .list(&ListParams::default().labels(ECHO_LABEL_SELECTOR).limit(1))
            .await?;
        match labelled.items.first() {
            Some(deploy) => {
                let name = deploy.name_any();
                debug!(name = %name, selector = ECHO_LABEL_SELECTOR, "echo deployment found by label");
                Ok(name)
            }
            None => {
                warn!(name = %preferred, "echo deployment not found, using given name");
                Ok(preferred.to_string())
            }
        }
    }

    async fn stream_logs(&self, namespace: &str, deployment: &str) -> Result<(), carta_common::Error> {
        let pod = self.first_pod(namespace, deployment).await?;
        info!(pod = %pod, "following logs");

        let pods: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
        let params = LogParams {
            follow: true,
            timestamps: true,
            ..LogParams::default()
        };
        let reader = pods.log_stream(&pod, &params).await?;

        let mut lines = Box::pin(reader).lines();
        while let Some(line) = lines.next().await {
            match line {
                Ok(line) => println!("{line}"),
                Err(e) => {
                    return Err(carta_common::Error::internal_with_context(
                        "stream_logs",
                        format!("log stream for {pod}: {e}"),
                    ))
                }
            }
        }
        Ok(())
    }
}

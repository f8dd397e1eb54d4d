//! Interception run: mirror resources, forwardAuth on the session route, log
//! tailing, and a teardown that always runs once the route may have changed
//!
//! Teardown steps are independent. A failure in one is logged and the next
//! one still runs; nothing in teardown reads the cancellation token, so a
//! second signal cannot cut it short.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use carta_common::kube_utils::{parse_manifest, ManifestMetadata};
use carta_common::template::{render, ManifestVars};
use carta_common::yaml::parse_documents;
use carta_common::FORWARDAUTH_MIDDLEWARE;

use crate::cluster::InterceptCluster;
use crate::error::Result;
use crate::routing::{EnsureOutcome, RouteManager, RouteStore};

/// How often the wait loop checks for a signal or a finished log stream
pub const POLL_INTERVAL: Duration = Duration::from_millis(200);

/// Shortest accepted wait loop interval
pub const MIN_POLL_INTERVAL: Duration = Duration::from_millis(1);

/// Inputs of one interception run
#[derive(Debug, Clone)]
pub struct InterceptPlan {
    /// Namespace holding the session and the mirror resources
    pub namespace: String,
    /// Session id, already validated
    pub session_id: String,
    /// Manifest template text with `${NAMESPACE}` and `${SESSION_ID}`
    pub template: String,
    /// Delay before tailing logs, giving the mirror time to start
    pub wait: Duration,
    /// Preferred name of the echo Deployment
    pub echo_deploy: String,
}

/// How a run ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// The log stream ended on its own
    Completed,
    /// A shutdown signal arrived
    Interrupted,
}

impl Outcome {
    /// Process exit code for this outcome
    pub fn exit_code(&self) -> u8 {
        match self {
            Self::Completed => 0,
            Self::Interrupted => 130,
        }
    }
}

/// Render the template for one session and parse it into manifests
pub fn render_manifests(plan: &InterceptPlan) -> Result<Vec<ManifestMetadata>> {
    let vars = ManifestVars::for_session(&plan.namespace, &plan.session_id);
    let rendered = render(&plan.template, &vars)?;
    let manifests = parse_documents(&rendered)?
        .into_iter()
        .map(|doc| parse_manifest(doc, &plan.namespace))
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(manifests)
}

/// Drives an interception run against a cluster
pub struct Orchestrator<C, S> {
    cluster: Arc<C>,
    routes: RouteManager<S>,
    poll_interval: Duration,
}

impl<C, S> Orchestrator<C, S>
where
    C: InterceptCluster + 'static,
    S: RouteStore,
{
    /// Create an orchestrator over `cluster` and `routes`
    pub fn new(cluster: Arc<C>, routes: RouteManager<S>) -> Self {
        Self {
            cluster,
            routes,
            poll_interval: POLL_INTERVAL,
        }
    }

    /// Override the wait loop interval, raised to [`MIN_POLL_INTERVAL`]
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval.max(MIN_POLL_INTERVAL);
        self
    }

    /// Run the interception until the log stream ends or `cancel` fires.
    ///
    /// Rendering or applying the mirror resources is fatal and nothing is
    /// cleaned up. From the route patch on, teardown runs exactly once.
    pub async fn run(&self, plan: &InterceptPlan, cancel: CancellationToken) -> Result<Outcome> {
        let manifests = render_manifests(plan)?;

        info!(
            namespace = %plan.namespace,
            session_id = %plan.session_id,
            documents = manifests.len(),
            "applying_template"
        );
        self.cluster.apply_manifests(&manifests).await?;

        info!(
            namespace = %plan.namespace,
            session_id = %plan.session_id,
            middleware_name = FORWARDAUTH_MIDDLEWARE,
            "ensuring_forwardauth"
        );
        let ensured = match self.routes.ensure_first(&plan.namespace, &plan.session_id).await {
            Ok(outcome) => outcome,
            Err(e) => {
                error!(error = %e, "failed to put forwardAuth on session route");
                self.teardown(plan, &manifests, None, None).await;
                return Err(e.into());
            }
        };
        match &ensured.route {
            Some(name) if ensured.changed => info!(base_ir_name = %name, "forwardauth_added"),
            Some(name) => info!(base_ir_name = %name, "forwardauth_present"),
            None => warn!(session_id = %plan.session_id, "no ingressroute found for session"),
        }

        let waited = AssertUnwindSafe(self.wait_and_tail(plan, &cancel))
            .catch_unwind()
            .await;
        match waited {
            Ok((outcome, logs)) => {
                self.teardown(plan, &manifests, Some(&ensured), logs).await;
                Ok(outcome)
            }
            Err(panic) => {
                let message = panic_message(panic.as_ref());
                error!(error = %message, "wait phase panicked");
                self.teardown(plan, &manifests, Some(&ensured), None).await;
                Err(carta_common::Error::internal_with_context("wait_and_tail", message).into())
            }
        }
    }

    async fn wait_and_tail(
        &self,
        plan: &InterceptPlan,
        cancel: &CancellationToken,
    ) -> (Outcome, Option<JoinHandle<()>>) {
        tokio::select! {
            _ = tokio::time::sleep(plan.wait) => {}
            _ = cancel.cancelled() => return (Outcome::Interrupted, None),
        }

        let deployment = match self
            .cluster
            .resolve_log_workload(&plan.namespace, &plan.echo_deploy)
            .await
        {
            Ok(name) => name,
            Err(e) => {
                warn!(error = %e, fallback = %plan.echo_deploy, "could not look up echo deployment");
                plan.echo_deploy.clone()
            }
        };

        info!(deploy_name = %deployment, namespace = %plan.namespace, "tailing_logs");
        let cluster = Arc::clone(&self.cluster);
        let namespace = plan.namespace.clone();
        let logs = tokio::spawn(async move {
            if let Err(e) = cluster.stream_logs(&namespace, &deployment).await {
                warn!(error = %e, deploy_name = %deployment, "log stream ended with error");
            }
        });

        let mut ticker = tokio::time::interval(self.poll_interval);
        let outcome = loop {
            if cancel.is_cancelled() {
                break Outcome::Interrupted;
            }
            if logs.is_finished() {
                break Outcome::Completed;
            }
            ticker.tick().await;
        };
        (outcome, Some(logs))
    }

    async fn teardown(
        &self,
        plan: &InterceptPlan,
        manifests: &[ManifestMetadata],
        ensured: Option<&EnsureOutcome>,
        logs: Option<JoinHandle<()>>,
    ) {
        if let Some(logs) = logs {
            logs.abort();
            if let Err(e) = logs.await {
                if !e.is_cancelled() {
                    warn!(error = %e, "log task failed");
                }
            }
        }

        info!(namespace = %plan.namespace, "deleting_mirror_resources");
        if let Err(e) = self.cluster.delete_manifests(manifests).await {
            warn!(error = %e, "failed to delete mirror resources");
        }

        let base_ir_name = ensured.and_then(|o| o.route.as_deref());
        info!(base_ir_name = base_ir_name.unwrap_or_default(), "restoring_base_route_middlewares");
        if let Some(EnsureOutcome {
            route: Some(name),
            snapshot: Some(snapshot),
            ..
        }) = ensured
        {
            if let Err(e) = self.routes.restore(&plan.namespace, name, snapshot).await {
                warn!(error = %e, route = %name, "failed to restore middlewares");
            }
        }

        info!("done");
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    panic
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| panic.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "panic".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::MockInterceptCluster;
    use crate::routing::MockRouteStore;
    use async_trait::async_trait;
    use serde_json::{json, Value};
    use std::sync::atomic::{AtomicUsize, Ordering};

    const TEMPLATE: &str = r#"apiVersion: v1
kind: Service
metadata:
  name: carta-echo-${SESSION_ID}
spec:
  ports:
    - port: 80
---
apiVersion: traefik.io/v1alpha1
kind: Middleware
metadata:
  name: carta-forwardauth
  namespace: ${NAMESPACE}
spec:
  forwardAuth:
    address: http://carta-sidecar.${NAMESPACE}.svc:8080
"#;

    fn plan() -> InterceptPlan {
        InterceptPlan {
            namespace: "skaha-workload".to_string(),
            session_id: "abc123".to_string(),
            template: TEMPLATE.to_string(),
            wait: Duration::from_millis(10),
            echo_deploy: "carta-echo".to_string(),
        }
    }

    fn session_route(middlewares: Value) -> Value {
        json!({
            "metadata": {"name": "skaha-carta-ingress-abc123"},
            "spec": {"routes": [{
                "match": "PathPrefix(`/session/carta/abc123`)",
                "middlewares": middlewares,
            }]},
        })
    }

    /// Cluster whose log stream never ends and whose deletes always fail
    #[derive(Default)]
    struct StuckCluster {
        applied: AtomicUsize,
        deleted: AtomicUsize,
        streams: AtomicUsize,
    }

    #[async_trait]
    impl InterceptCluster for StuckCluster {
        async fn apply_manifests(
            &self,
            manifests: &[ManifestMetadata],
        ) -> std::result::Result<(), carta_common::Error> {
            self.applied.fetch_add(manifests.len(), Ordering::SeqCst);
            Ok(())
        }

        async fn delete_manifests(
            &self,
            _manifests: &[ManifestMetadata],
        ) -> std::result::Result<(), carta_common::Error> {
            self.deleted.fetch_add(1, Ordering::SeqCst);
            Err(carta_common::Error::internal("apiserver unavailable"))
        }

        async fn resolve_log_workload(
            &self,
            _namespace: &str,
            preferred: &str,
        ) -> std::result::Result<String, carta_common::Error> {
            Ok(preferred.to_string())
        }

        async fn stream_logs(
            &self,
            _namespace: &str,
            _deployment: &str,
        ) -> std::result::Result<(), carta_common::Error> {
            self.streams.fetch_add(1, Ordering::SeqCst);
            std::future::pending::<()>().await;
            Ok(())
        }
    }

    /// Cluster that panics while looking up the log workload
    #[derive(Default)]
    struct PanickingCluster {
        deleted: AtomicUsize,
    }

    #[async_trait]
    impl InterceptCluster for PanickingCluster {
        async fn apply_manifests(
            &self,
            _manifests: &[ManifestMetadata],
        ) -> std::result::Result<(), carta_common::Error> {
            Ok(())
        }

        async fn delete_manifests(
            &self,
            _manifests: &[ManifestMetadata],
        ) -> std::result::Result<(), carta_common::Error> {
            self.deleted.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn resolve_log_workload(
            &self,
            _namespace: &str,
            _preferred: &str,
        ) -> std::result::Result<String, carta_common::Error> {
            panic!("log workload lookup blew up");
        }

        async fn stream_logs(
            &self,
            _namespace: &str,
            _deployment: &str,
        ) -> std::result::Result<(), carta_common::Error> {
            Ok(())
        }
    }

    #[test]
    fn test_render_manifests_defaults_namespace() {
        let manifests = render_manifests(&plan()).unwrap();
        assert_eq!(manifests.len(), 2);
        assert_eq!(manifests[0].name, "carta-echo-abc123");
        assert_eq!(manifests[0].namespace, "skaha-workload");
        assert_eq!(manifests[1].api_resource.plural, "middlewares");
    }

    #[test]
    fn test_render_rejects_unknown_placeholder() {
        let mut plan = plan();
        plan.template = "metadata:\n  name: ${UNKNOWN}\n".to_string();
        assert!(render_manifests(&plan).is_err());
    }

    #[tokio::test]
    async fn test_interrupt_runs_full_teardown() {
        let cluster = Arc::new(StuckCluster::default());

        let mut store = MockRouteStore::new();
        store
            .expect_get()
            .returning(|_, _| Ok(Some(session_route(json!([{"name": "x"}])))));
        store
            .expect_patch()
            .withf(|_, _, patch| {
                serde_json::to_value(patch).unwrap()
                    == json!([{"op": "replace", "path": "/spec/routes/0/middlewares",
                               "value": [{"name": "carta-forwardauth"}, {"name": "x"}]}])
            })
            .times(1)
            .returning(|_, _, _| Ok(()));
        store
            .expect_patch()
            .withf(|_, _, patch| {
                serde_json::to_value(patch).unwrap()
                    == json!([{"op": "replace", "path": "/spec/routes/0/middlewares",
                               "value": [{"name": "x"}]}])
            })
            .times(1)
            .returning(|_, _, _| Ok(()));

        let orchestrator = Orchestrator::new(cluster.clone(), RouteManager::new(store))
            .with_poll_interval(Duration::from_millis(5));

        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            trigger.cancel();
        });

        let outcome = orchestrator.run(&plan(), cancel).await.unwrap();

        assert_eq!(outcome, Outcome::Interrupted);
        assert_eq!(outcome.exit_code(), 130);
        assert_eq!(cluster.applied.load(Ordering::SeqCst), 2);
        assert_eq!(cluster.streams.load(Ordering::SeqCst), 1);
        assert_eq!(cluster.deleted.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_interrupt_during_wait_skips_log_tail() {
        let mut cluster = MockInterceptCluster::new();
        cluster.expect_apply_manifests().times(1).returning(|_| Ok(()));
        cluster.expect_resolve_log_workload().never();
        cluster.expect_stream_logs().never();
        cluster.expect_delete_manifests().times(1).returning(|_| Ok(()));

        let mut store = MockRouteStore::new();
        store.expect_get().returning(|_, _| Ok(None));
        store.expect_list().returning(|_| Ok(vec![]));
        store.expect_patch().never();

        let orchestrator = Orchestrator::new(Arc::new(cluster), RouteManager::new(store));
        let mut plan = plan();
        plan.wait = Duration::from_secs(60);

        let cancel = CancellationToken::new();
        cancel.cancel();
        let outcome = orchestrator.run(&plan, cancel).await.unwrap();
        assert_eq!(outcome, Outcome::Interrupted);
    }

    #[tokio::test]
    async fn test_finished_log_stream_completes_run() {
        let mut cluster = MockInterceptCluster::new();
        cluster.expect_apply_manifests().returning(|_| Ok(()));
        cluster
            .expect_resolve_log_workload()
            .returning(|_, _| Err(carta_common::Error::internal("forbidden")));
        cluster
            .expect_stream_logs()
            .withf(|_, deployment| deployment == "carta-echo")
            .times(1)
            .returning(|_, _| Ok(()));
        cluster.expect_delete_manifests().times(1).returning(|_| Ok(()));

        let mut store = MockRouteStore::new();
        store
            .expect_get()
            .returning(|_, _| Ok(Some(session_route(json!([{"name": "carta-forwardauth"}])))));
        // Already first, so the only patch is the restore of the same list
        store
            .expect_patch()
            .withf(|_, _, patch| {
                serde_json::to_value(patch).unwrap()
                    == json!([{"op": "replace", "path": "/spec/routes/0/middlewares",
                               "value": [{"name": "carta-forwardauth"}]}])
            })
            .times(1)
            .returning(|_, _, _| Ok(()));

        let orchestrator = Orchestrator::new(Arc::new(cluster), RouteManager::new(store))
            .with_poll_interval(Duration::from_millis(5));
        let outcome = orchestrator.run(&plan(), CancellationToken::new()).await.unwrap();
        assert_eq!(outcome, Outcome::Completed);
        assert_eq!(outcome.exit_code(), 0);
    }

    #[tokio::test]
    async fn test_panic_while_waiting_still_restores_route() {
        let cluster = Arc::new(PanickingCluster::default());

        let mut store = MockRouteStore::new();
        store
            .expect_get()
            .returning(|_, _| Ok(Some(session_route(json!([{"name": "x"}])))));
        store
            .expect_patch()
            .withf(|_, _, patch| {
                serde_json::to_value(patch).unwrap()
                    == json!([{"op": "replace", "path": "/spec/routes/0/middlewares",
                               "value": [{"name": "carta-forwardauth"}, {"name": "x"}]}])
            })
            .times(1)
            .returning(|_, _, _| Ok(()));
        store
            .expect_patch()
            .withf(|_, _, patch| {
                serde_json::to_value(patch).unwrap()
                    == json!([{"op": "replace", "path": "/spec/routes/0/middlewares",
                               "value": [{"name": "x"}]}])
            })
            .times(1)
            .returning(|_, _, _| Ok(()));

        let orchestrator = Orchestrator::new(cluster.clone(), RouteManager::new(store));
        let err = orchestrator
            .run(&plan(), CancellationToken::new())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("log workload lookup blew up"));
        assert_eq!(cluster.deleted.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_zero_poll_interval_is_raised() {
        let mut cluster = MockInterceptCluster::new();
        cluster.expect_apply_manifests().returning(|_| Ok(()));
        cluster
            .expect_resolve_log_workload()
            .returning(|_, preferred| Ok(preferred.to_string()));
        cluster.expect_stream_logs().returning(|_, _| Ok(()));
        cluster.expect_delete_manifests().times(1).returning(|_| Ok(()));

        let mut store = MockRouteStore::new();
        store.expect_get().returning(|_, _| Ok(None));
        store.expect_list().returning(|_| Ok(vec![]));
        store.expect_patch().never();

        let orchestrator = Orchestrator::new(Arc::new(cluster), RouteManager::new(store))
            .with_poll_interval(Duration::ZERO);
        assert_eq!(orchestrator.poll_interval, MIN_POLL_INTERVAL);

        let outcome = orchestrator.run(&plan(), CancellationToken::new()).await.unwrap();
        assert_eq!(outcome, Outcome::Completed);
    }

    #[tokio::test]
    async fn test_apply_failure_is_fatal_without_teardown() {
        let mut cluster = MockInterceptCluster::new();
        cluster
            .expect_apply_manifests()
            .returning(|_| Err(carta_common::Error::internal("forbidden")));
        cluster.expect_delete_manifests().never();

        let mut store = MockRouteStore::new();
        store.expect_get().never();
        store.expect_patch().never();

        let orchestrator = Orchestrator::new(Arc::new(cluster), RouteManager::new(store));
        assert!(orchestrator.run(&plan(), CancellationToken::new()).await.is_err());
    }
}

//! Session IngressRoute middleware management
//!
//! skaha creates one Traefik IngressRoute per CARTA session. Interception puts
//! the `carta-forwardauth` middleware in front of that route's chain and
//! later puts the chain back exactly as it was, including whether the
//! `middlewares` field existed at all.

use async_trait::async_trait;
use json_patch::{AddOperation, Patch, PatchOperation, RemoveOperation, ReplaceOperation};
use jsonptr::PointerBuf;
use kube::api::{Api, DynamicObject, ListParams, PatchParams};
use kube::core::ApiResource;
use kube::Client;
use serde_json::Value;
use tracing::{debug, info, warn};

#[cfg(test)]
use mockall::automock;

use carta_common::kube_utils::build_api_resource;
use carta_common::{
    session_ingress_name, session_path, FORWARDAUTH_MIDDLEWARE, INGRESS_ROUTE_GROUP,
    INGRESS_ROUTE_KIND, INGRESS_ROUTE_VERSION,
};

/// Middleware list of the first route as it was before interception
#[derive(Debug, Clone, PartialEq)]
pub enum MiddlewareSnapshot {
    /// The route had no `middlewares` field
    Absent,
    /// The route had this list, possibly empty
    Present(Vec<Value>),
}

/// Result of [`RouteManager::ensure_first`]
#[derive(Debug, Clone, PartialEq)]
pub struct EnsureOutcome {
    /// Whether the route was patched
    pub changed: bool,
    /// IngressRoute governing the session, if one was found
    pub route: Option<String>,
    /// State to restore at teardown; `None` when there is nothing to restore
    pub snapshot: Option<MiddlewareSnapshot>,
}

impl EnsureOutcome {
    fn not_found() -> Self {
        Self {
            changed: false,
            route: None,
            snapshot: None,
        }
    }
}

/// Read and patch access to IngressRoutes
///
/// Objects are handled as raw JSON so the Traefik CRD schema does not need to
/// be modelled.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait RouteStore: Send + Sync {
    /// Fetch one IngressRoute, `None` when it does not exist
    async fn get(&self, namespace: &str, name: &str) -> Result<Option<Value>, carta_common::Error>;

    /// All IngressRoutes in the namespace
    async fn list(&self, namespace: &str) -> Result<Vec<Value>, carta_common::Error>;

    /// Apply a JSON patch to one IngressRoute
    async fn patch(
        &self,
        namespace: &str,
        name: &str,
        patch: Patch,
    ) -> Result<(), carta_common::Error>;
}

/// [`RouteStore`] backed by the Kubernetes API
pub struct KubeRouteStore {
    client: Client,
    resource: ApiResource,
}

impl KubeRouteStore {
    /// Create a store for Traefik IngressRoutes
    pub fn new(client: Client) -> Self {
        let api_version = format!("{INGRESS_ROUTE_GROUP}/{INGRESS_ROUTE_VERSION}");
        Self {
            client,
            resource: build_api_resource(&api_version, INGRESS_ROUTE_KIND),
        }
    }

    fn api(&self, namespace: &str) -> Api<DynamicObject> {
        Api::namespaced_with(self.client.clone(), namespace, &self.resource)
    }
}

#[async_trait]
impl RouteStore for KubeRouteStore {
    async fn get(&self, namespace: &str, name: &str) -> Result<Option<Value>, carta_common::Error> {
        let Some(obj) = self.api(namespace).get_opt(name).await? else {
            return Ok(None);
        };
        to_value(&obj).map(Some)
    }

    async fn list(&self, namespace: &str) -> Result<Vec<Value>, carta_common::Error> {
        let list = self.api(namespace).list(&ListParams::default()).await?;
        list.items.iter().map(to_value).collect()
    }

    async fn patch(
        &self,
        namespace: &str,
        name: &str,
        patch: Patch,
    ) -> Result<(), carta_common::Error> {
        self.api(namespace)
            .patch(
                name,
                &PatchParams::default(),
                &kube::api::Patch::Json::<()>(patch),
            )
            .await?;
        Ok(())
    }
}

fn to_value(obj: &DynamicObject) -> Result<Value, carta_common::Error> {
    serde_json::to_value(obj).map_err(|e| {
        carta_common::Error::internal_with_context("ingressroute", format!("serialize: {}", e))
    })
}

/// Pointer to the first route's middleware list
pub fn middlewares_path() -> PointerBuf {
    PointerBuf::from_tokens(["spec", "routes", "0", "middlewares"])
}

fn first_route(route: &Value) -> Option<&Value> {
    route.pointer("/spec/routes/0")
}

fn route_name(route: &Value) -> Option<&str> {
    route.pointer("/metadata/name").and_then(Value::as_str)
}

fn middleware_name(entry: &Value) -> Option<&str> {
    entry.get("name").and_then(Value::as_str)
}

/// Current middleware list of a route, distinguishing absent from empty
pub fn snapshot_of(first_route: &Value) -> MiddlewareSnapshot {
    match first_route.get("middlewares") {
        Some(Value::Array(list)) => MiddlewareSnapshot::Present(list.clone()),
        _ => MiddlewareSnapshot::Absent,
    }
}

/// `current` with `target` moved to the front and any other copies dropped
pub fn with_target_first(current: &[Value], target: &str) -> Vec<Value> {
    std::iter::once(serde_json::json!({ "name": target }))
        .chain(
            current
                .iter()
                .filter(|entry| middleware_name(entry) != Some(target))
                .cloned(),
        )
        .collect()
}

/// Puts the forwardAuth middleware first on a session's route and restores it
pub struct RouteManager<S> {
    store: S,
    middleware: String,
}

impl<S: RouteStore> RouteManager<S> {
    /// Manage routes through `store` with the `carta-forwardauth` middleware
    pub fn new(store: S) -> Self {
        Self {
            store,
            middleware: FORWARDAUTH_MIDDLEWARE.to_string(),
        }
    }

    /// Find the IngressRoute serving `session_id`.
    ///
    /// Tries the name skaha gives session routes, then scans for a route whose
    /// first match expression mentions the session path.
    pub async fn find_route(
        &self,
        namespace: &str,
        session_id: &str,
    ) -> Result<Option<Value>, carta_common::Error> {
        let expected = session_ingress_name(session_id);
        if let Some(route) = self.store.get(namespace, &expected).await? {
            return Ok(Some(route));
        }

        let needle = session_path(session_id);
        let found = self.store.list(namespace).await?.into_iter().find(|route| {
            first_route(route)
                .and_then(|r| r.get("match"))
                .and_then(Value::as_str)
                .is_some_and(|m| m.contains(&needle))
        });
        debug!(namespace, expected = %expected, found = found.is_some(), "route scan");
        Ok(found)
    }

    /// Make the forwardAuth middleware the first entry of the session route's
    /// first middleware chain. Calling it again is a no-op.
    pub async fn ensure_first(
        &self,
        namespace: &str,
        session_id: &str,
    ) -> Result<EnsureOutcome, carta_common::Error> {
        let Some(route) = self.find_route(namespace, session_id).await? else {
            return Ok(EnsureOutcome::not_found());
        };
        let name = route_name(&route)
            .ok_or_else(|| carta_common::Error::manifest_for(INGRESS_ROUTE_KIND, "missing metadata.name"))?
            .to_string();

        let Some(first) = first_route(&route) else {
            warn!(route = %name, "ingressroute has no routes");
            return Ok(EnsureOutcome {
                changed: false,
                route: Some(name),
                snapshot: None,
            });
        };

        let snapshot = snapshot_of(first);
        let current: &[Value] = match &snapshot {
            MiddlewareSnapshot::Present(list) => list,
            MiddlewareSnapshot::Absent => &[],
        };

        if current.first().and_then(middleware_name) == Some(self.middleware.as_str()) {
            return Ok(EnsureOutcome {
                changed: false,
                route: Some(name),
                snapshot: Some(snapshot),
            });
        }

        let value = Value::Array(with_target_first(current, &self.middleware));
        let op = match snapshot {
            MiddlewareSnapshot::Absent => PatchOperation::Add(AddOperation {
                path: middlewares_path(),
                value,
            }),
            MiddlewareSnapshot::Present(_) => PatchOperation::Replace(ReplaceOperation {
                path: middlewares_path(),
                value,
            }),
        };
        self.store.patch(namespace, &name, Patch(vec![op])).await?;

        Ok(EnsureOutcome {
            changed: true,
            route: Some(name),
            snapshot: Some(snapshot),
        })
    }

    /// Put the middleware chain of `name` back to `snapshot`.
    ///
    /// An empty captured list is restored by removing the field. A route that no longer exists, or lost its routes, is left alone.
    pub async fn restore(
        &self,
        namespace: &str,
        name: &str,
        snapshot: &MiddlewareSnapshot,
    ) -> Result<(), carta_common::Error> {
        let Some(route) = self.store.get(namespace, name).await? else {
            warn!(route = %name, "ingressroute gone, nothing to restore");
            return Ok(());
        };
        let Some(first) = first_route(&route) else {
            warn!(route = %name, "ingressroute has no routes, nothing to restore");
            return Ok(());
        };
        let has_field = matches!(snapshot_of(first), MiddlewareSnapshot::Present(_));

        let restored = match snapshot {
            MiddlewareSnapshot::Present(list) if list.is_empty() => &MiddlewareSnapshot::Absent,
            other => other,
        };

        let op = match (restored, has_field) {
            (MiddlewareSnapshot::Absent, false) => return Ok(()),
            (MiddlewareSnapshot::Absent, true) => PatchOperation::Remove(RemoveOperation {
                path: middlewares_path(),
            }),
            (MiddlewareSnapshot::Present(list), true) => PatchOperation::Replace(ReplaceOperation {
                path: middlewares_path(),
                value: Value::Array(list.clone()),
            }),
            (MiddlewareSnapshot::Present(list), false) => PatchOperation::Add(AddOperation {
                path: middlewares_path(),
                value: Value::Array(list.clone()),
            }),
        };
        self.store.patch(namespace, name, Patch(vec![op])).await?;
        info!(route = %name, "middlewares restored");
        Ok(())
    }
}

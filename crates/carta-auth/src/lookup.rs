//! Session owner lookup against cluster state
//!
//! skaha labels every session Service and Pod with the session id and the
//! owning user id. The Service is checked first; the Pod is the fallback for
//! the window where the Service does not exist yet (session start) or is
//! already gone (teardown).
//!
//! "Nothing matched" is `Ok(None)`. A failed or timed-out list call is an
//! `Err` and is never turned into `Ok(None)` here.

use std::collections::BTreeMap;
use std::fmt::Debug;
use std::time::Duration;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::{Pod, Service};
use k8s_openapi::NamespaceResourceScope;
use kube::api::{Api, ListParams};
use kube::{Client, Resource, ResourceExt};
use serde::de::DeserializeOwned;
use tracing::{debug, info, warn};

#[cfg(test)]
use mockall::automock;

use carta_common::kube_utils::with_timeout;
use carta_common::{DEFAULT_SESSION_LABEL_KEY, DEFAULT_USER_LABEL_KEY};

use crate::session::SessionToken;

/// Kind of cluster object carrying session labels, in lookup order
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionObjectKind {
    /// The session's Service
    Service,
    /// The session's Pod
    Pod,
}

impl SessionObjectKind {
    /// Lookup order: Service first, Pod as fallback
    pub const LOOKUP_ORDER: [SessionObjectKind; 2] =
        [SessionObjectKind::Service, SessionObjectKind::Pod];

    /// Short name used in logs
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Service => "service",
            Self::Pod => "pod",
        }
    }
}

/// Label keys identifying the session and its owner
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LabelKeys {
    /// Key whose value is the session id
    pub session: String,
    /// Key whose value is the owning user id
    pub user: String,
}

impl Default for LabelKeys {
    fn default() -> Self {
        Self {
            session: DEFAULT_SESSION_LABEL_KEY.to_string(),
            user: DEFAULT_USER_LABEL_KEY.to_string(),
        }
    }
}

impl LabelKeys {
    /// Equality selector matching objects of one session
    pub fn selector_for(&self, token: &SessionToken) -> String {
        format!("{}={}", self.session, token)
    }
}

/// Trait abstracting the label queries made against the cluster
///
/// This trait allows mocking the Kubernetes client in tests while using
/// the real client in production.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait LabelQuery: Send + Sync {
    /// Labels of the first object of `kind` matching `selector`.
    ///
    /// Returns `Ok(None)` when nothing matches.
    async fn first_labels(
        &self,
        kind: SessionObjectKind,
        selector: &str,
    ) -> Result<Option<BTreeMap<String, String>>, carta_common::Error>;
}

/// [`LabelQuery`] backed by the Kubernetes API, scoped to one namespace
pub struct KubeLabelQuery {
    client: Client,
    namespace: String,
    timeout: Duration,
}

impl KubeLabelQuery {
    /// Query `namespace`, giving each list call at most `timeout`
    pub fn new(client: Client, namespace: impl Into<String>, timeout: Duration) -> Self {
        Self {
            client,
            namespace: namespace.into(),
            timeout,
        }
    }

    async fn first_match<K>(
        &self,
        selector: &str,
        operation: &str,
    ) -> Result<Option<BTreeMap<String, String>>, carta_common::Error>
    where
        K: Resource<Scope = NamespaceResourceScope> + Clone + DeserializeOwned + Debug,
        <K as Resource>::DynamicType: Default,
    {
        let api: Api<K> = Api::namespaced(self.client.clone(), &self.namespace);
        let params = ListParams::default().labels(selector).limit(1);
        let list = with_timeout(self.timeout, operation, api.list(&params)).await?;

        debug!(
            namespace = %self.namespace,
            selector = %selector,
            matched = list.items.len(),
            operation,
            "label query"
        );
        Ok(list.items.first().map(|obj| obj.labels().clone()))
    }
}

#[async_trait]
impl LabelQuery for KubeLabelQuery {
    async fn first_labels(
        &self,
        kind: SessionObjectKind,
        selector: &str,
    ) -> Result<Option<BTreeMap<String, String>>, carta_common::Error> {
        match kind {
            SessionObjectKind::Service => self.first_match::<Service>(selector, "list services").await,
            SessionObjectKind::Pod => self.first_match::<Pod>(selector, "list pods").await,
        }
    }
}

/// Resolves a session id to its owner from Service and Pod labels
pub struct ClusterIdentityLookup<Q> {
    query: Q,
    keys: LabelKeys,
}

impl<Q: LabelQuery> ClusterIdentityLookup<Q> {
    /// Create a lookup over `query` using the given label keys
    pub fn new(query: Q, keys: LabelKeys) -> Self {
        Self { query, keys }
    }

    /// Find the owner of `token`.
    ///
    /// Tries each object kind in [`SessionObjectKind::LOOKUP_ORDER`]; an object
    /// that matches but has no (or an empty) user label does not stop the
    /// search. A query failure is returned immediately.
    pub async fn lookup(
        &self,
        token: &SessionToken,
    ) -> Result<Option<String>, carta_common::Error> {
        let selector = self.keys.selector_for(token);

        for kind in SessionObjectKind::LOOKUP_ORDER {
            let Some(labels) = self.query.first_labels(kind, &selector).await? else {
                continue;
            };

            match labels.get(&self.keys.user).filter(|v| !v.is_empty()) {
                Some(userid) => {
                    info!(
                        source = kind.as_str(),
                        session = %token,
                        userid = %userid,
                        "map_session_user"
                    );
                    return Ok(Some(userid.clone()));
                }
                None => {
                    warn!(
                        source = kind.as_str(),
                        session = %token,
                        label = %self.keys.user,
                        "no_userid"
                    );
                }
            }
        }

        Ok(None)
    }
}

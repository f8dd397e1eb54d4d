//! Cache-backed session identity resolution

use async_trait::async_trait;
use tracing::debug;

#[cfg(test)]
use mockall::automock;

use crate::cache::IdentityCache;
use crate::lookup::{ClusterIdentityLookup, LabelQuery};
use crate::session::SessionToken;

/// Resolves a session id to the id of the user that owns it
///
/// `Ok(None)` means the cluster has no owner for this session. `Err` means the
/// cluster could not be asked; callers deny either way but log them apart.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ResolveIdentity: Send + Sync {
    /// Resolve the owner of `token`
    async fn resolve(&self, token: &SessionToken)
        -> Result<Option<String>, carta_common::Error>;
}

/// Consults the cache, then cluster labels, caching positive results only
pub struct SessionResolver<Q> {
    cache: IdentityCache,
    lookup: ClusterIdentityLookup<Q>,
}

impl<Q: LabelQuery> SessionResolver<Q> {
    /// Create a resolver over `cache` and `lookup`
    pub fn new(cache: IdentityCache, lookup: ClusterIdentityLookup<Q>) -> Self {
        Self { cache, lookup }
    }

    /// The underlying cache
    pub fn cache(&self) -> &IdentityCache {
        &self.cache
    }
}

#[async_trait]
impl<Q: LabelQuery> ResolveIdentity for SessionResolver<Q> {
    async fn resolve(
        &self,
        token: &SessionToken,
    ) -> Result<Option<String>, carta_common::Error> {
        if let Some(userid) = self.cache.get(token).await {
            debug!(session = %token, userid = %userid, "cache_hit");
            return Ok(Some(userid));
        }

        let userid = self.lookup.lookup(token).await?;
        if let Some(userid) = &userid {
            self.cache.put(token, userid.clone()).await;
        }
        Ok(userid)
    }
}

//! Session → user id cache
//!
//! A bounded moka cache with a fixed time-to-live measured from insertion.
//! Expired entries are never returned even if they have not been evicted yet.
//! Eviction is LRU so a freshly inserted mapping is never the victim when the
//! cache is full.

use std::time::Duration;

use moka::future::Cache;
use moka::policy::EvictionPolicy;

use crate::session::SessionToken;

/// Default time-to-live for a cached mapping
pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(3600);

/// Default maximum number of cached sessions
pub const DEFAULT_CACHE_MAX_SIZE: u64 = 4096;

/// In-memory cache of resolved session owners
#[derive(Clone)]
pub struct IdentityCache {
    inner: Cache<String, String>,
}

impl IdentityCache {
    /// Create a cache holding at most `max_size` sessions for `ttl` each
    pub fn new(ttl: Duration, max_size: u64) -> Self {
        let inner = Cache::builder()
            .max_capacity(max_size)
            .time_to_live(ttl)
            .eviction_policy(EvictionPolicy::lru())
            .build();
        Self { inner }
    }

    /// The cached user id for `token`, if present and not expired
    pub async fn get(&self, token: &SessionToken) -> Option<String> {
        self.inner.get(token.as_str()).await
    }

    /// Store `userid` for `token`, replacing any previous entry and its expiry
    pub async fn put(&self, token: &SessionToken, userid: String) {
        self.inner.insert(token.as_str().to_string(), userid).await;
    }
}

impl Default for IdentityCache {
    fn default() -> Self {
        Self::new(DEFAULT_CACHE_TTL, DEFAULT_CACHE_MAX_SIZE)
    }
}

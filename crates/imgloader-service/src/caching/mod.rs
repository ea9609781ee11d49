//! In-memory bookkeeping of loaded images.
//!
//! The [`ResourceCache`] holds fully loaded images together with the time they were
//! loaded, the [`InFlightTracker`] deduplicates concurrent loads of the same key, and the
//! [`janitor`] periodically evicts stale cache entries.

use std::time::Duration;

use tokio::time::Instant;

use crate::types::{ResolvedResource, ResourceKey};

mod inflight;
pub mod janitor;

pub use inflight::{Acquired, InFlightTracker, SharedLoad};
pub use janitor::{Janitor, JanitorHandle};

/// An image stored in the [`ResourceCache`].
#[derive(Clone, Debug)]
pub struct CacheEntry {
    pub value: ResolvedResource,
    pub cached_at: Instant,
}

impl CacheEntry {
    fn is_expired(&self, ttl: Duration, now: Instant) -> bool {
        now.saturating_duration_since(self.cached_at) > ttl
    }
}

type InMemoryCache = moka::sync::Cache<ResourceKey, CacheEntry>;

/// Maps keys to loaded images.
///
/// Entries older than the configured TTL are never returned, and are evicted by
/// [`sweep_expired`](Self::sweep_expired). Cloning the cache yields another handle to the
/// same entries.
#[derive(Clone)]
pub struct ResourceCache {
    cache: InMemoryCache,
    ttl: Duration,
}

impl std::fmt::Debug for ResourceCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResourceCache")
            .field("ttl", &self.ttl)
            .field("in-memory items", &self.cache.entry_count())
            .finish()
    }
}

impl ResourceCache {
    pub fn new(ttl: Duration, capacity: u64) -> Self {
        let cache = InMemoryCache::builder()
            .name("images")
            .max_capacity(capacity)
            .build();
        Self { cache, ttl }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Returns the live entry for `key`, if any.
    pub fn get(&self, key: &ResourceKey) -> Option<CacheEntry> {
        let entry = self.cache.get(key)?;
        if entry.is_expired(self.ttl, Instant::now()) {
            tracing::trace!(%key, "Ignoring expired cache entry");
            return None;
        }
        Some(entry)
    }

    /// Stores `value`, replacing any previous entry for `key`.
    pub fn put(&self, key: ResourceKey, value: ResolvedResource) {
        let entry = CacheEntry {
            value,
            cached_at: Instant::now(),
        };
        self.cache.insert(key, entry);
    }

    pub fn invalidate(&self, key: &ResourceKey) {
        self.cache.invalidate(key);
    }

    pub fn clear(&self) {
        for (key, _) in self.cache.iter() {
            self.cache.invalidate(&*key);
        }
        self.cache.invalidate_all();
    }

    /// Number of live entries.
    pub fn len(&self) -> usize {
        let now = Instant::now();
        self.cache
            .iter()
            .filter(|(_, entry)| !entry.is_expired(self.ttl, now))
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Removes all entries older than the TTL, returning how many were removed.
    pub fn sweep_expired(&self) -> usize {
        let now = Instant::now();
        let expired: Vec<_> = self
            .cache
            .iter()
            .filter(|(_, entry)| entry.is_expired(self.ttl, now))
            .map(|(key, _)| key)
            .collect();

        for key in &expired {
            self.cache.invalidate(&**key);
        }
        self.cache.run_pending_tasks();
        expired.len()
    }

    /// Number of stored entries, including expired ones.
    #[cfg(test)]
    pub(crate) fn raw_len(&self) -> usize {
        self.cache.iter().count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn substitute(url: &str) -> ResolvedResource {
        ResolvedResource::Substitute(url.into())
    }

    #[tokio::test(start_paused = true)]
    async fn test_put_overwrites() {
        let cache = ResourceCache::new(Duration::from_secs(300), 16);
        let key = ResourceKey::from("img://a");

        assert!(cache.get(&key).is_none());
        cache.put(key.clone(), substitute("img://first"));
        cache.put(key.clone(), substitute("img://second"));

        let entry = cache.get(&key).unwrap();
        assert_eq!(entry.value, substitute("img://second"));
        assert_eq!(cache.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_expired_entries_are_absent() {
        let cache = ResourceCache::new(Duration::from_secs(300), 16);
        let key = ResourceKey::from("img://a");
        cache.put(key.clone(), substitute("img://a"));

        tokio::time::advance(Duration::from_secs(300)).await;
        assert!(cache.get(&key).is_some());

        tokio::time::advance(Duration::from_secs(1)).await;
        assert!(cache.get(&key).is_none());
        assert_eq!(cache.len(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweep_expired() {
        let cache = ResourceCache::new(Duration::from_secs(10), 16);
        cache.put("img://old".into(), substitute("img://old"));

        tokio::time::advance(Duration::from_secs(6)).await;
        cache.put("img://new".into(), substitute("img://new"));

        tokio::time::advance(Duration::from_secs(6)).await;
        assert_eq!(cache.sweep_expired(), 1);

        assert!(cache.get(&"img://old".into()).is_none());
        assert!(cache.get(&"img://new".into()).is_some());
        assert_eq!(cache.sweep_expired(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_clear() {
        let cache = ResourceCache::new(Duration::from_secs(10), 16);
        cache.put("img://a".into(), substitute("img://a"));
        cache.put("img://b".into(), substitute("img://b"));
        cache.invalidate(&"img://a".into());
        assert_eq!(cache.len(), 1);
        cache.clear();
        assert!(cache.get(&"img://b".into()).is_none());
    }
}

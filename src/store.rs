//! Key/value stores with expiry, consumed by the caching client.
//!
//! Values are type-erased so one store can hold every response type; the caching client
//! keys them by type tag and downcasts on the way out.

use crate::clock::{Clock, MonotonicClock};
use async_trait::async_trait;
use dashmap::DashMap;
use std::any::Any;
use std::sync::Arc;
use std::time::Duration;

/// A cached, already-decoded response.
pub type CachedValue = Arc<dyn Any + Send + Sync>;

/// Store failures. The caching client treats every variant as a soft failure.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    #[error("cache store unavailable: {0}")]
    Unavailable(String),
}

/// Result of a scope-wide removal request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PatternRemoval {
    /// The store removed this many entries.
    Removed(usize),
    /// The store cannot remove by pattern; entries age out by TTL instead.
    Unsupported,
}

#[async_trait]
pub trait CacheStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<CachedValue>, StoreError>;

    /// Insert or overwrite `key`, expiring `ttl` from now.
    async fn set(&self, key: &str, value: CachedValue, ttl: Duration) -> Result<(), StoreError>;

    async fn remove(&self, key: &str) -> Result<(), StoreError>;

    /// Best-effort removal of every entry under a resource scope.
    async fn remove_matching(&self, _scope: &str) -> Result<PatternRemoval, StoreError> {
        Ok(PatternRemoval::Unsupported)
    }
}

#[derive(Debug, Clone)]
struct StoredEntry {
    value: CachedValue,
    expires_at_millis: u64,
}

/// Sharded in-process store with absolute expiry.
///
/// Expired entries are dropped lazily on lookup, or eagerly when the optional
/// `max_entries` bound needs room. The bound is approximate under concurrent inserts.
#[derive(Debug)]
pub struct InMemoryStore {
    entries: DashMap<String, StoredEntry>,
    max_entries: Option<usize>,
    clock: Arc<dyn Clock>,
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new(None)
    }
}

impl InMemoryStore {
    pub fn new(max_entries: Option<usize>) -> Self {
        Self { entries: DashMap::new(), max_entries, clock: Arc::new(MonotonicClock::default()) }
    }

    /// Use a custom clock (tests use [`crate::clock::ManualClock`]).
    pub fn with_clock<C: Clock + 'static>(mut self, clock: C) -> Self {
        self.clock = Arc::new(clock);
        self
    }

    pub fn max_entries(&self) -> Option<usize> {
        self.max_entries
    }

    /// Number of stored entries, including expired ones not yet collected.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn make_room(&self, now: u64) {
        let Some(max) = self.max_entries else {
            return;
        };
        if self.entries.len() < max {
            return;
        }
        self.entries.retain(|_, entry| entry.expires_at_millis > now);
        while self.entries.len() >= max {
            let soonest = self
                .entries
                .iter()
                .min_by_key(|entry| entry.expires_at_millis)
                .map(|entry| entry.key().clone());
            let Some(key) = soonest else {
                break;
            };
            tracing::trace!(target: "ninelives_http::cache", %key, "evicting soonest-expiring entry");
            self.entries.remove(&key);
        }
    }
}

fn ttl_millis(ttl: Duration) -> u64 {
    // Round up so sub-millisecond TTLs still live for one tick.
    u64::try_from(ttl.as_nanos().div_ceil(1_000_000)).unwrap_or(u64::MAX)
}

#[async_trait]
impl CacheStore for InMemoryStore {
    async fn get(&self, key: &str) -> Result<Option<CachedValue>, StoreError> {
        let now = self.clock.now_millis();
        let lookup = self
            .entries
            .get(key)
            .map(|entry| (entry.expires_at_millis > now).then(|| entry.value.clone()));
        match lookup {
            Some(Some(value)) => Ok(Some(value)),
            Some(None) => {
                self.entries.remove_if(key, |_, entry| entry.expires_at_millis <= now);
                Ok(None)
            }
            None => Ok(None),
        }
    }

    async fn set(&self, key: &str, value: CachedValue, ttl: Duration) -> Result<(), StoreError> {
        if ttl.is_zero() {
            self.entries.remove(key);
            return Ok(());
        }
        let now = self.clock.now_millis();
        if !self.entries.contains_key(key) {
            self.make_room(now);
        }
        let expires_at_millis = now.saturating_add(ttl_millis(ttl));
        self.entries.insert(key.to_string(), StoredEntry { value, expires_at_millis });
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<(), StoreError> {
        self.entries.remove(key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;

    fn value(n: u32) -> CachedValue {
        Arc::new(n)
    }

    async fn read(store: &InMemoryStore, key: &str) -> Option<u32> {
        store.get(key).await.unwrap().and_then(|v| v.downcast_ref::<u32>().copied())
    }

    #[tokio::test]
    async fn entries_expire_lazily() {
        let clock = ManualClock::new();
        let store = InMemoryStore::default().with_clock(clock.clone());
        store.set("k", value(1), Duration::from_secs(10)).await.unwrap();

        clock.advance(Duration::from_millis(9_999));
        assert_eq!(read(&store, "k").await, Some(1));
        assert_eq!(store.len(), 1);

        clock.advance(Duration::from_millis(1));
        assert_eq!(read(&store, "k").await, None);
        assert!(store.is_empty(), "expired entry collected on lookup");
    }

    #[tokio::test]
    async fn overwrite_recomputes_expiry() {
        let clock = ManualClock::new();
        let store = InMemoryStore::default().with_clock(clock.clone());
        store.set("k", value(1), Duration::from_secs(1)).await.unwrap();
        clock.advance(Duration::from_millis(900));
        store.set("k", value(2), Duration::from_secs(1)).await.unwrap();
        clock.advance(Duration::from_millis(900));
        assert_eq!(read(&store, "k").await, Some(2));
    }

    #[tokio::test]
    async fn zero_ttl_is_not_stored() {
        let store = InMemoryStore::default();
        store.set("k", value(1), Duration::ZERO).await.unwrap();
        assert_eq!(read(&store, "k").await, None);
    }

    #[tokio::test]
    async fn sub_millisecond_ttl_survives_the_current_tick() {
        let store = InMemoryStore::default().with_clock(ManualClock::new());
        store.set("k", value(1), Duration::from_micros(10)).await.unwrap();
        assert_eq!(read(&store, "k").await, Some(1));
    }

    #[tokio::test]
    async fn bound_evicts_expired_then_soonest_expiring() {
        let clock = ManualClock::new();
        let store = InMemoryStore::new(Some(2)).with_clock(clock.clone());
        store.set("short", value(1), Duration::from_secs(1)).await.unwrap();
        store.set("long", value(2), Duration::from_secs(100)).await.unwrap();

        store.set("new", value(3), Duration::from_secs(50)).await.unwrap();
        assert_eq!(store.len(), 2);
        assert_eq!(read(&store, "short").await, None);
        assert_eq!(read(&store, "long").await, Some(2));

        clock.advance(Duration::from_secs(60));
        store.set("newer", value(4), Duration::from_secs(50)).await.unwrap();
        assert_eq!(read(&store, "new").await, None, "expired entry goes first");
        assert_eq!(read(&store, "long").await, Some(2));
        assert_eq!(read(&store, "newer").await, Some(4));
    }

    #[tokio::test]
    async fn overwriting_at_capacity_does_not_evict() {
        let store = InMemoryStore::new(Some(1)).with_clock(ManualClock::new());
        store.set("k", value(1), Duration::from_secs(1)).await.unwrap();
        store.set("k", value(2), Duration::from_secs(1)).await.unwrap();
        assert_eq!(read(&store, "k").await, Some(2));
    }

    #[tokio::test]
    async fn remove_and_pattern_removal() {
        let store = InMemoryStore::default();
        store.set("k", value(1), Duration::from_secs(1)).await.unwrap();
        store.remove("k").await.unwrap();
        assert_eq!(read(&store, "k").await, None);
        assert_eq!(store.remove_matching("/leads").await.unwrap(), PatternRemoval::Unsupported);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_writers_on_distinct_keys() {
        let store = Arc::new(InMemoryStore::default());
        let handles: Vec<_> = (0..32u32)
            .map(|i| {
                let store = store.clone();
                tokio::spawn(async move {
                    store.set(&format!("k{i}"), value(i), Duration::from_secs(60)).await.unwrap();
                })
            })
            .collect();
        for handle in handles {
            handle.await.unwrap();
        }
        assert_eq!(store.len(), 32);
        assert_eq!(read(&store, "k7").await, Some(7));
    }
}

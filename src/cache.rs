//! Content-addressed result cache with TTL expiry and popularity tracking.
//!
//! Entries are keyed by `hash(normalize(query))`. The normalized query is
//! stored next to the payload and re-checked on every lookup, so two queries
//! that share a hash never serve each other's results.
//!
//! The cache is an optimization: storage failures are logged and reported to
//! the caller as a miss (reads) or silently dropped (writes).
//!
//! ```rust
//! use meterguard::cache::ContentCache;
//! use meterguard::config::CacheConfig;
//! use meterguard::store::InMemoryStore;
//! use std::sync::Arc;
//!
//! # #[tokio::main]
//! # async fn main() {
//! let cache = ContentCache::new(Arc::new(InMemoryStore::new()), CacheConfig::default());
//! assert!(cache.get("Coffee near me").await.unwrap().is_none());
//! cache.put("coffee  near ME", b"results".to_vec()).await.unwrap();
//! let hit = cache.get("Coffee near me").await.unwrap().unwrap();
//! assert_eq!(hit.payload, b"results");
//! assert_eq!(hit.hit_count, 2);
//! # }
//! ```

use crate::clock::{Clock, SystemClock};
use crate::config::CacheConfig;
use crate::error::GuardError;
use crate::normalize::CacheKey;
use crate::store::{CacheEntry, CacheStore, HitLookup, StoreError};
use crate::telemetry::{CacheEvent, GuardEvent, Telemetry, TelemetrySink};
use std::sync::Arc;

/// A served cache entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheHit {
    /// Stored result.
    pub payload: Vec<u8>,
    /// Popularity after this hit.
    pub hit_count: u64,
    /// Epoch millis of the last write.
    pub cached_at: u64,
    /// Epoch millis after which the entry is a miss.
    pub expires_at: u64,
}

impl From<CacheEntry> for CacheHit {
    fn from(entry: CacheEntry) -> Self {
        Self {
            payload: entry.payload,
            hit_count: entry.hit_count,
            cached_at: entry.cached_at,
            expires_at: entry.expires_at,
        }
    }
}

/// Query-result cache over a [`CacheStore`].
#[derive(Debug, Clone)]
pub struct ContentCache<S> {
    store: Arc<S>,
    config: CacheConfig,
    clock: Arc<dyn Clock>,
    telemetry: Telemetry,
}

impl<S> ContentCache<S>
where
    S: CacheStore + 'static,
{
    /// Cache over `store` using the system clock and no telemetry.
    pub fn new(store: Arc<S>, config: CacheConfig) -> Self {
        Self { store, config, clock: Arc::new(SystemClock), telemetry: Telemetry::null() }
    }

    /// Override the clock used for TTL checks.
    pub fn with_clock<C: Clock + 'static>(mut self, clock: C) -> Self {
        self.clock = Arc::new(clock);
        self
    }

    /// Attach a telemetry sink for hit, miss and collision events.
    pub fn with_telemetry<T>(mut self, sink: T) -> Self
    where
        T: TelemetrySink,
        T::Future: Send + 'static,
    {
        self.telemetry = Telemetry::new(sink);
        self
    }

    /// The TTL settings this cache was built with.
    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// Look up a query, counting a hit on success.
    ///
    /// Returns `Ok(None)` when the entry is absent, expired, owned by a
    /// colliding query, or the store failed. Only a blank query is an error.
    pub async fn get(&self, query: &str) -> Result<Option<CacheHit>, GuardError> {
        let key = CacheKey::for_query(query)?;
        let now = self.clock.now_millis();

        let lookup = match self.store.record_hit(&key.key, &key.normalized, now).await {
            Ok(lookup) => lookup,
            Err(e) => {
                self.read_failed(&key.key, &e);
                self.emit(CacheEvent::Miss { key: key.key }).await;
                return Ok(None);
            }
        };

        match lookup {
            HitLookup::Hit(entry) => {
                tracing::debug!(
                    target: "meterguard::cache",
                    key = %key.key,
                    hit_count = entry.hit_count,
                    "cache hit"
                );
                self.emit(CacheEvent::Hit { key: key.key, hit_count: entry.hit_count }).await;
                Ok(Some(entry.into()))
            }
            HitLookup::Collision => {
                tracing::warn!(
                    target: "meterguard::cache",
                    key = %key.key,
                    query = %key.normalized,
                    "hash collision; treating as miss"
                );
                self.emit(CacheEvent::Collision { key: key.key }).await;
                Ok(None)
            }
            HitLookup::Absent | HitLookup::Expired => {
                self.emit(CacheEvent::Miss { key: key.key }).await;
                Ok(None)
            }
        }
    }

    /// Store a result for `query`.
    ///
    /// Overwrites any existing entry (expired or colliding) and keeps its
    /// popularity growing. Returns the stored row, or `None` when the write
    /// was dropped.
    pub async fn put(
        &self,
        query: &str,
        payload: impl Into<Vec<u8>>,
    ) -> Result<Option<CacheEntry>, GuardError> {
        let key = CacheKey::for_query(query)?;
        let now = self.clock.now_millis();
        let entry = CacheEntry {
            query_hash: key.key.clone(),
            normalized_query: key.normalized,
            payload: payload.into(),
            cached_at: now,
            expires_at: now.saturating_add(self.config.ttl_millis()),
            hit_count: 1,
        };

        match self.store.upsert(entry).await {
            Ok(stored) => {
                self.emit(CacheEvent::Stored { key: key.key, hit_count: stored.hit_count }).await;
                Ok(Some(stored))
            }
            Err(e) => {
                tracing::warn!(
                    target: "meterguard::cache",
                    key = %key.key,
                    error = %e,
                    "cache write failed; dropping result"
                );
                Ok(None)
            }
        }
    }

    /// Read the fresh entry for `query` without counting a hit.
    pub async fn peek(&self, query: &str) -> Result<Option<CacheEntry>, GuardError> {
        let key = CacheKey::for_query(query)?;
        let now = self.clock.now_millis();
        match self.store.get(&key.key).await {
            Ok(Some(entry)) if !entry.is_expired(now) && entry.normalized_query == key.normalized => {
                Ok(Some(entry))
            }
            Ok(_) => Ok(None),
            Err(e) => {
                self.read_failed(&key.key, &e);
                Ok(None)
            }
        }
    }

    /// Drop the entry stored under `query`'s key. Returns whether one existed.
    pub async fn invalidate(&self, query: &str) -> Result<bool, GuardError> {
        let key = CacheKey::for_query(query)?;
        match self.store.remove(&key.key).await {
            Ok(existed) => Ok(existed),
            Err(e) => {
                tracing::warn!(
                    target: "meterguard::cache",
                    key = %key.key,
                    error = %e,
                    "cache invalidation failed"
                );
                Ok(false)
            }
        }
    }

    /// Delete every expired entry. A failed sweep removes nothing.
    pub async fn sweep_expired(&self) -> usize {
        let now = self.clock.now_millis();
        match self.store.remove_expired(now).await {
            Ok(removed) => {
                tracing::debug!(target: "meterguard::cache", removed, "expired entries swept");
                self.emit(CacheEvent::Swept { removed }).await;
                removed
            }
            Err(e) => {
                tracing::warn!(target: "meterguard::cache", error = %e, "cache sweep failed");
                0
            }
        }
    }

    /// Number of stored entries, expired ones included.
    pub async fn len(&self) -> Result<usize, StoreError> {
        self.store.len().await
    }

    fn read_failed(&self, key: &str, err: &StoreError) {
        tracing::warn!(
            target: "meterguard::cache",
            key = %key,
            error = %err,
            "cache read failed; serving as miss"
        );
    }

    async fn emit(&self, event: CacheEvent) {
        self.telemetry.emit(GuardEvent::Cache(event)).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::error::ValidationError;
    use crate::normalize::{hash, normalize};
    use crate::store::InMemoryStore;
    use crate::telemetry::MemorySink;
    use std::time::Duration;

    const HOUR: Duration = Duration::from_secs(3_600);

    fn cache(clock: &ManualClock) -> (ContentCache<InMemoryStore>, Arc<InMemoryStore>) {
        let store = Arc::new(InMemoryStore::new());
        let cache = ContentCache::new(store.clone(), CacheConfig::default()).with_clock(clock.clone());
        (cache, store)
    }

    #[tokio::test]
    async fn put_then_get_counts_hits() {
        let clock = ManualClock::at(1_000_000);
        let (cache, _) = cache(&clock);

        let stored = cache.put("pizza", b"p1".to_vec()).await.unwrap().unwrap();
        assert_eq!(stored.hit_count, 1);
        assert_eq!(stored.expires_at, stored.cached_at + 24 * HOUR.as_millis() as u64);

        for expected in 2..5 {
            let hit = cache.get("  PIZZA ").await.unwrap().unwrap();
            assert_eq!(hit.payload, b"p1");
            assert_eq!(hit.hit_count, expected);
        }
    }

    #[tokio::test]
    async fn entry_older_than_ttl_is_a_miss() {
        let clock = ManualClock::at(0);
        let (cache, _) = cache(&clock);
        cache.put("pizza", b"p1".to_vec()).await.unwrap();

        // At exactly expires_at the entry is still served.
        clock.advance(24 * HOUR);
        assert!(cache.get("pizza").await.unwrap().is_some());

        clock.advance(HOUR);
        assert!(cache.get("pizza").await.unwrap().is_none());
        assert!(cache.peek("pizza").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn refresh_after_expiry_keeps_popularity() {
        let clock = ManualClock::at(0);
        let (cache, _) = cache(&clock);
        cache.put("pizza", b"old".to_vec()).await.unwrap();
        cache.get("pizza").await.unwrap();
        clock.advance(25 * HOUR);
        assert!(cache.get("pizza").await.unwrap().is_none());

        let refreshed = cache.put("pizza", b"new".to_vec()).await.unwrap().unwrap();
        assert_eq!(refreshed.hit_count, 3);
        assert_eq!(refreshed.cached_at, clock.now_millis());
        let hit = cache.get("pizza").await.unwrap().unwrap();
        assert_eq!((hit.payload.as_slice(), hit.hit_count), (&b"new"[..], 4));
    }

    #[tokio::test]
    async fn colliding_entry_is_not_served() {
        let clock = ManualClock::at(0);
        let (cache, store) = cache(&clock);
        let sink = MemorySink::new();
        let cache = cache.with_telemetry(sink.clone());

        // Plant a row for another query under pizza's key.
        let key = hash(&normalize("pizza"));
        store
            .upsert(CacheEntry {
                query_hash: key.clone(),
                normalized_query: "not pizza".into(),
                payload: b"wrong".to_vec(),
                cached_at: 0,
                expires_at: u64::MAX,
                hit_count: 7,
            })
            .await
            .unwrap();

        assert!(cache.get("pizza").await.unwrap().is_none());
        assert!(cache.peek("pizza").await.unwrap().is_none());
        assert!(sink.events().contains(&GuardEvent::Cache(CacheEvent::Collision { key })));
    }

    #[tokio::test]
    async fn peek_does_not_count() {
        let clock = ManualClock::at(0);
        let (cache, _) = cache(&clock);
        cache.put("pizza", b"p".to_vec()).await.unwrap();
        for _ in 0..3 {
            assert_eq!(cache.peek("pizza").await.unwrap().unwrap().hit_count, 1);
        }
    }

    #[tokio::test]
    async fn invalidate_and_sweep() {
        let clock = ManualClock::at(0);
        let (cache, _) = cache(&clock);
        cache.put("a", b"1".to_vec()).await.unwrap();
        cache.put("b", b"2".to_vec()).await.unwrap();
        assert!(cache.invalidate("A").await.unwrap());
        assert!(!cache.invalidate("a").await.unwrap());

        clock.advance(12 * HOUR);
        cache.put("c", b"3".to_vec()).await.unwrap();
        clock.advance(13 * HOUR);
        assert_eq!(cache.sweep_expired().await, 1);
        assert_eq!(cache.len().await.unwrap(), 1);
        assert!(cache.get("c").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn blank_queries_are_rejected() {
        let clock = ManualClock::at(0);
        let (cache, _) = cache(&clock);
        let err = cache.get(" \t ").await.unwrap_err();
        assert!(matches!(err, GuardError::Invalid(ValidationError::EmptyQuery)));
        assert!(cache.put("", b"x".to_vec()).await.unwrap_err().is_invalid());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_hits_are_not_lost() {
        let clock = ManualClock::at(0);
        let (cache, _) = cache(&clock);
        cache.put("popular", b"p".to_vec()).await.unwrap();

        let barrier = Arc::new(tokio::sync::Barrier::new(50));
        let handles: Vec<_> = (0..50)
            .map(|_| {
                let c = cache.clone();
                let b = barrier.clone();
                tokio::spawn(async move {
                    b.wait().await;
                    c.get("popular").await.unwrap().is_some()
                })
            })
            .collect();
        for h in handles {
            assert!(h.await.unwrap());
        }
        assert_eq!(cache.peek("popular").await.unwrap().unwrap().hit_count, 51);
    }
}

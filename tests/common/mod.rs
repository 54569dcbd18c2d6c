#![allow(dead_code)]

use async_trait::async_trait;
use meterguard::store::{
    CacheEntry, CacheStore, HitLookup, RateLimitWindow, StoreError, UsagePeriod, UsageStore,
    WindowConsume, WindowStore,
};
use meterguard::{ActionType, InMemoryStore};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Wraps an [`InMemoryStore`] and fails every call while the switch is on.
#[derive(Debug, Clone, Default)]
pub struct FlakyStore {
    inner: InMemoryStore,
    failing: Arc<AtomicBool>,
}

impl FlakyStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    fn check(&self) -> Result<(), StoreError> {
        if self.failing.load(Ordering::SeqCst) {
            Err(StoreError::Unavailable("connection refused".into()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl CacheStore for FlakyStore {
    async fn record_hit(&self, key: &str, q: &str, now: u64) -> Result<HitLookup, StoreError> {
        self.check()?;
        self.inner.record_hit(key, q, now).await
    }
    async fn get(&self, key: &str) -> Result<Option<CacheEntry>, StoreError> {
        self.check()?;
        CacheStore::get(&self.inner, key).await
    }
    async fn upsert(&self, entry: CacheEntry) -> Result<CacheEntry, StoreError> {
        self.check()?;
        self.inner.upsert(entry).await
    }
    async fn remove(&self, key: &str) -> Result<bool, StoreError> {
        self.check()?;
        CacheStore::remove(&self.inner, key).await
    }
    async fn remove_expired(&self, now: u64) -> Result<usize, StoreError> {
        self.check()?;
        self.inner.remove_expired(now).await
    }
    async fn len(&self) -> Result<usize, StoreError> {
        self.check()?;
        self.inner.len().await
    }
}

#[async_trait]
impl UsageStore for FlakyStore {
    async fn increment(&self, key: &str, default_limit: u64, now: u64) -> Result<UsagePeriod, StoreError> {
        self.check()?;
        self.inner.increment(key, default_limit, now).await
    }
    async fn get(&self, key: &str) -> Result<Option<UsagePeriod>, StoreError> {
        self.check()?;
        UsageStore::get(&self.inner, key).await
    }
    async fn set_limit(&self, key: &str, limit: u64, now: u64) -> Result<UsagePeriod, StoreError> {
        self.check()?;
        self.inner.set_limit(key, limit, now).await
    }
}

#[async_trait]
impl WindowStore for FlakyStore {
    async fn consume(
        &self,
        subject_id: &str,
        action: ActionType,
        limit: u32,
        window_ms: u64,
        now: u64,
    ) -> Result<WindowConsume, StoreError> {
        self.check()?;
        self.inner.consume(subject_id, action, limit, window_ms, now).await
    }
    async fn get(&self, subject_id: &str, action: ActionType) -> Result<Option<RateLimitWindow>, StoreError> {
        self.check()?;
        WindowStore::get(&self.inner, subject_id, action).await
    }
    async fn remove(&self, subject_id: &str, action: Option<ActionType>) -> Result<usize, StoreError> {
        self.check()?;
        WindowStore::remove(&self.inner, subject_id, action).await
    }
    async fn remove_stale(&self, now: u64) -> Result<usize, StoreError> {
        self.check()?;
        self.inner.remove_stale(now).await
    }
}

/// Route `tracing` output to the test harness. Safe to call repeatedly.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

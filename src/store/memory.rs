use super::{
    CacheEntry, CacheStore, HitLookup, RateLimitWindow, StoreError, UsagePeriod, UsageStore,
    WindowConsume, WindowStore,
};
use crate::rate_limit::ActionType;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

type WindowKey = (String, ActionType);

/// In-process store implementing every storage trait.
///
/// Each table sits behind its own mutex, so every trait method is a single
/// critical section and therefore atomic. Clones share the same tables, which
/// lets one store back the cache, the meter, and the limiter at once.
#[derive(Default, Clone, Debug)]
pub struct InMemoryStore {
    cache: Arc<Mutex<HashMap<String, CacheEntry>>>,
    usage: Arc<Mutex<HashMap<String, UsagePeriod>>>,
    windows: Arc<Mutex<HashMap<WindowKey, RateLimitWindow>>>,
}

/// Point-in-time copy of every table, for persisting across restarts.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct StoreSnapshot {
    /// Cache rows.
    pub cache: Vec<CacheEntry>,
    /// Usage rows.
    pub usage: Vec<UsagePeriod>,
    /// Rate-limit rows.
    pub windows: Vec<RateLimitWindow>,
}

fn lock<'a, T>(m: &'a Mutex<T>, table: &'static str) -> Result<MutexGuard<'a, T>, StoreError> {
    m.lock().map_err(|_| StoreError::Poisoned(table))
}

impl InMemoryStore {
    /// An empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy out every table.
    pub fn snapshot(&self) -> Result<StoreSnapshot, StoreError> {
        Ok(StoreSnapshot {
            cache: lock(&self.cache, "cache")?.values().cloned().collect(),
            usage: lock(&self.usage, "usage")?.values().cloned().collect(),
            windows: lock(&self.windows, "windows")?.values().cloned().collect(),
        })
    }

    /// Rebuild a store from a snapshot.
    pub fn from_snapshot(snapshot: StoreSnapshot) -> Self {
        let cache = snapshot.cache.into_iter().map(|e| (e.query_hash.clone(), e)).collect();
        let usage = snapshot.usage.into_iter().map(|p| (p.period_key.clone(), p)).collect();
        let windows = snapshot
            .windows
            .into_iter()
            .map(|w| ((w.subject_id.clone(), w.action), w))
            .collect();
        Self {
            cache: Arc::new(Mutex::new(cache)),
            usage: Arc::new(Mutex::new(usage)),
            windows: Arc::new(Mutex::new(windows)),
        }
    }
}

#[async_trait]
impl CacheStore for InMemoryStore {
    async fn record_hit(
        &self,
        key: &str,
        normalized_query: &str,
        now_millis: u64,
    ) -> Result<HitLookup, StoreError> {
        let mut guard = lock(&self.cache, "cache")?;
        let Some(entry) = guard.get_mut(key) else {
            return Ok(HitLookup::Absent);
        };
        if entry.is_expired(now_millis) {
            return Ok(HitLookup::Expired);
        }
        if entry.normalized_query != normalized_query {
            return Ok(HitLookup::Collision);
        }
        entry.hit_count = entry.hit_count.saturating_add(1);
        Ok(HitLookup::Hit(entry.clone()))
    }

    async fn get(&self, key: &str) -> Result<Option<CacheEntry>, StoreError> {
        Ok(lock(&self.cache, "cache")?.get(key).cloned())
    }

    async fn upsert(&self, entry: CacheEntry) -> Result<CacheEntry, StoreError> {
        let mut guard = lock(&self.cache, "cache")?;
        let stored = match guard.get_mut(&entry.query_hash) {
            Some(existing) => {
                existing.normalized_query = entry.normalized_query;
                existing.payload = entry.payload;
                existing.cached_at = entry.cached_at;
                existing.expires_at = entry.expires_at;
                existing.hit_count = existing.hit_count.saturating_add(1);
                existing.clone()
            }
            None => {
                guard.insert(entry.query_hash.clone(), entry.clone());
                entry
            }
        };
        Ok(stored)
    }

    async fn remove(&self, key: &str) -> Result<bool, StoreError> {
        Ok(lock(&self.cache, "cache")?.remove(key).is_some())
    }

    async fn remove_expired(&self, now_millis: u64) -> Result<usize, StoreError> {
        let mut guard = lock(&self.cache, "cache")?;
        let before = guard.len();
        guard.retain(|_, entry| !entry.is_expired(now_millis));
        Ok(before - guard.len())
    }

    async fn len(&self) -> Result<usize, StoreError> {
        Ok(lock(&self.cache, "cache")?.len())
    }
}

#[async_trait]
impl UsageStore for InMemoryStore {
    async fn increment(
        &self,
        period_key: &str,
        default_limit: u64,
        now_millis: u64,
    ) -> Result<UsagePeriod, StoreError> {
        let mut guard = lock(&self.usage, "usage")?;
        let row = guard.entry(period_key.to_string()).or_insert_with(|| UsagePeriod {
            period_key: period_key.to_string(),
            used: 0,
            limit: default_limit,
            last_updated: now_millis,
        });
        row.used = row.used.saturating_add(1);
        row.last_updated = now_millis;
        Ok(row.clone())
    }

    async fn get(&self, period_key: &str) -> Result<Option<UsagePeriod>, StoreError> {
        Ok(lock(&self.usage, "usage")?.get(period_key).cloned())
    }

    async fn set_limit(
        &self,
        period_key: &str,
        limit: u64,
        now_millis: u64,
    ) -> Result<UsagePeriod, StoreError> {
        let mut guard = lock(&self.usage, "usage")?;
        let row = guard.entry(period_key.to_string()).or_insert_with(|| UsagePeriod {
            period_key: period_key.to_string(),
            used: 0,
            limit,
            last_updated: now_millis,
        });
        row.limit = limit;
        row.last_updated = now_millis;
        Ok(row.clone())
    }
}

#[async_trait]
impl WindowStore for InMemoryStore {
    async fn consume(
        &self,
        subject_id: &str,
        action: ActionType,
        limit: u32,
        window_ms: u64,
        now_millis: u64,
    ) -> Result<WindowConsume, StoreError> {
        let mut guard = lock(&self.windows, "windows")?;
        let fresh = || RateLimitWindow {
            subject_id: subject_id.to_string(),
            action,
            window_start: now_millis,
            window_ms,
            count: 0,
            limit,
        };
        let window = guard.entry((subject_id.to_string(), action)).or_insert_with(fresh);
        if window.is_expired(now_millis) {
            *window = fresh();
        }
        window.limit = limit;
        window.window_ms = window_ms;

        let consumed = window.count < limit;
        if consumed {
            window.count += 1;
        }
        Ok(WindowConsume { window: window.clone(), consumed })
    }

    async fn get(
        &self,
        subject_id: &str,
        action: ActionType,
    ) -> Result<Option<RateLimitWindow>, StoreError> {
        let guard = lock(&self.windows, "windows")?;
        Ok(guard.get(&(subject_id.to_string(), action)).cloned())
    }

    async fn remove(
        &self,
        subject_id: &str,
        action: Option<ActionType>,
    ) -> Result<usize, StoreError> {
        let mut guard = lock(&self.windows, "windows")?;
        let removed = match action {
            Some(action) => usize::from(guard.remove(&(subject_id.to_string(), action)).is_some()),
            None => {
                let before = guard.len();
                guard.retain(|(subject, _), _| subject != subject_id);
                before - guard.len()
            }
        };
        Ok(removed)
    }

    async fn remove_stale(&self, now_millis: u64) -> Result<usize, StoreError> {
        let mut guard = lock(&self.windows, "windows")?;
        let before = guard.len();
        guard.retain(|_, window| !window.is_stale(now_millis));
        Ok(before - guard.len())
    }
}

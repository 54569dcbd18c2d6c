//! Storage seam for the three persisted record types.
//!
//! Components never read-modify-write a counter themselves. Each trait exposes
//! the atomic primitive its component needs (`record_hit`, `increment`,
//! `consume`) so a backend can map it onto a single atomic statement: an
//! `UPDATE ... SET n = n + 1 RETURNING`, a Redis `INCR`/Lua script, or a
//! critical section in the [`memory::InMemoryStore`] reference backend.
//!
//! - [`CacheStore`] owns [`CacheEntry`] rows keyed by query hash.
//! - [`UsageStore`] owns [`UsagePeriod`] rows keyed by `YYYY-MM`.
//! - [`WindowStore`] owns [`RateLimitWindow`] rows keyed by `(subject, action)`.

use crate::rate_limit::ActionType;
use async_trait::async_trait;

pub mod memory;

pub use memory::InMemoryStore;

/// Storage failure reported by a backend.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    /// The backend could not be reached or rejected the operation.
    #[error("store unavailable: {0}")]
    Unavailable(String),
    /// A lock guarding in-process state was poisoned by a panicking writer.
    #[error("store lock poisoned: {0}")]
    Poisoned(&'static str),
}

/// A cached result for one canonical query.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct CacheEntry {
    /// Hex hash of `normalized_query`; unique.
    pub query_hash: String,
    /// Canonical query, re-checked on lookup to reject hash collisions.
    pub normalized_query: String,
    /// Opaque result blob.
    pub payload: Vec<u8>,
    /// Epoch millis of the last write.
    pub cached_at: u64,
    /// Always `cached_at + ttl`.
    pub expires_at: u64,
    /// Popularity counter; never decreases for a given key.
    pub hit_count: u64,
}

impl CacheEntry {
    /// An entry is expired once `expires_at` lies strictly in the past.
    pub fn is_expired(&self, now_millis: u64) -> bool {
        self.expires_at < now_millis
    }
}

/// Result of an atomic hit lookup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HitLookup {
    /// Fresh entry with a matching query; `hit_count` already incremented.
    Hit(CacheEntry),
    /// No entry under this key.
    Absent,
    /// Entry exists but its TTL lapsed; nothing was mutated.
    Expired,
    /// Entry exists for a different query with the same hash; nothing was mutated.
    Collision,
}

/// Monthly usage of the metered resource.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct UsagePeriod {
    /// `YYYY-MM`.
    pub period_key: String,
    /// Calls made this period.
    pub used: u64,
    /// Calls allowed this period; > 0.
    pub limit: u64,
    /// Epoch millis of the last mutation.
    pub last_updated: u64,
}

/// Fixed-window counter for one `(subject, action)` pair.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct RateLimitWindow {
    /// Caller identity.
    pub subject_id: String,
    /// Limited action.
    pub action: ActionType,
    /// Epoch millis when the window opened.
    pub window_start: u64,
    /// Window length in millis.
    pub window_ms: u64,
    /// Requests consumed in this window.
    pub count: u32,
    /// Tier limit applied on the last consume.
    pub limit: u32,
}

impl RateLimitWindow {
    /// `now > window_start + window_ms`.
    pub fn is_expired(&self, now_millis: u64) -> bool {
        now_millis > self.window_start.saturating_add(self.window_ms)
    }

    /// Expired by more than one further full window; safe to delete.
    pub fn is_stale(&self, now_millis: u64) -> bool {
        now_millis > self.window_start.saturating_add(self.window_ms.saturating_mul(2))
    }

    /// Millis until the window closes (zero once expired).
    pub fn reset_in_millis(&self, now_millis: u64) -> u64 {
        self.window_start.saturating_add(self.window_ms).saturating_sub(now_millis)
    }
}

/// Outcome of an atomic consume.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WindowConsume {
    /// Window state after the operation.
    pub window: RateLimitWindow,
    /// Whether a unit was consumed.
    pub consumed: bool,
}

/// Persistence for [`CacheEntry`] rows.
#[async_trait]
pub trait CacheStore: Send + Sync {
    /// Atomically: if a fresh entry for `key` holds `normalized_query`,
    /// increment its `hit_count` and return it. Expired and colliding entries
    /// are reported without mutation.
    async fn record_hit(
        &self,
        key: &str,
        normalized_query: &str,
        now_millis: u64,
    ) -> Result<HitLookup, StoreError>;

    /// Read an entry without touching its popularity.
    async fn get(&self, key: &str) -> Result<Option<CacheEntry>, StoreError>;

    /// Atomically insert `entry`, or overwrite the existing row's payload and
    /// timestamps while setting `hit_count = existing + 1`. Returns the stored row.
    async fn upsert(&self, entry: CacheEntry) -> Result<CacheEntry, StoreError>;

    /// Delete one entry; returns whether it existed.
    async fn remove(&self, key: &str) -> Result<bool, StoreError>;

    /// Delete every entry with `expires_at < now_millis`; returns the count.
    async fn remove_expired(&self, now_millis: u64) -> Result<usize, StoreError>;

    /// Number of stored entries, expired ones included.
    async fn len(&self) -> Result<usize, StoreError>;
}

/// Persistence for [`UsagePeriod`] rows.
#[async_trait]
pub trait UsageStore: Send + Sync {
    /// Atomically `used += 1`, creating the row with `used = 1` and
    /// `limit = default_limit` when absent. Returns the row after the increment.
    async fn increment(
        &self,
        period_key: &str,
        default_limit: u64,
        now_millis: u64,
    ) -> Result<UsagePeriod, StoreError>;

    /// Read a period row.
    async fn get(&self, period_key: &str) -> Result<Option<UsagePeriod>, StoreError>;

    /// Overwrite the limit, creating the row with `used = 0` when absent.
    async fn set_limit(
        &self,
        period_key: &str,
        limit: u64,
        now_millis: u64,
    ) -> Result<UsagePeriod, StoreError>;
}

/// Persistence for [`RateLimitWindow`] rows.
#[async_trait]
pub trait WindowStore: Send + Sync {
    /// Atomically: open a fresh window if none exists or the current one is
    /// expired, then consume one unit if `count < limit`.
    async fn consume(
        &self,
        subject_id: &str,
        action: ActionType,
        limit: u32,
        window_ms: u64,
        now_millis: u64,
    ) -> Result<WindowConsume, StoreError>;

    /// Read a window row as stored (expiry is the caller's concern).
    async fn get(
        &self,
        subject_id: &str,
        action: ActionType,
    ) -> Result<Option<RateLimitWindow>, StoreError>;

    /// Delete the subject's window for `action`, or all of its windows when `None`.
    async fn remove(&self, subject_id: &str, action: Option<ActionType>)
        -> Result<usize, StoreError>;

    /// Delete every window that [`RateLimitWindow::is_stale`] at `now_millis`.
    async fn remove_stale(&self, now_millis: u64) -> Result<usize, StoreError>;
}

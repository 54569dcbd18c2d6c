//! The guarded fetch path: cache, then admission, then the metered call.
//!
//! ```text
//! fetch(query)
//!   ├─ cache hit ──────────────────────────────► Cached
//!   └─ miss ─► decide ─ denied ────────────────► Err(Denied)
//!                 └─ allowed ─► call ─ err ────► Err(Inner)
//!                                 └─ ok ─► increment ─► put ─► Fresh
//! ```
//!
//! Usage is incremented exactly once per successful external call and never
//! on a cache hit, a denial, or a failed call.

use crate::admission::AdmissionController;
use crate::cache::ContentCache;
use crate::config::GuardConfig;
use crate::error::GuardError;
use crate::normalize::CacheKey;
use crate::store::{CacheStore, UsageStore};
use crate::usage::{UsageMeter, UsageSnapshot};
use std::future::Future;
use std::sync::Arc;

/// Where a fetched payload came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Fetched {
    /// Served from the cache; the metered resource was not touched.
    Cached {
        payload: Vec<u8>,
        /// Popularity after this hit.
        hit_count: u64,
    },
    /// Freshly produced by the external call.
    Fresh { payload: Vec<u8> },
}

impl Fetched {
    pub fn payload(&self) -> &[u8] {
        match self {
            Fetched::Cached { payload, .. } | Fetched::Fresh { payload } => payload,
        }
    }

    pub fn into_payload(self) -> Vec<u8> {
        match self {
            Fetched::Cached { payload, .. } | Fetched::Fresh { payload } => payload,
        }
    }

    pub fn is_cached(&self) -> bool {
        matches!(self, Fetched::Cached { .. })
    }
}

/// Cache plus admission control around one metered resource.
#[derive(Debug, Clone)]
pub struct SearchGuard<S> {
    cache: ContentCache<S>,
    admission: AdmissionController<S>,
}

impl<S> SearchGuard<S>
where
    S: CacheStore + UsageStore + 'static,
{
    /// Wire every component to one shared store using the system clock.
    pub fn new(store: Arc<S>, config: &GuardConfig) -> Self {
        let cache = ContentCache::new(store.clone(), config.cache);
        let meter = UsageMeter::new(store, config.usage);
        Self { cache, admission: AdmissionController::new(meter, config.admission) }
    }

    /// Assemble from individually configured components.
    pub fn from_parts(cache: ContentCache<S>, admission: AdmissionController<S>) -> Self {
        Self { cache, admission }
    }

    pub fn cache(&self) -> &ContentCache<S> {
        &self.cache
    }

    pub fn admission(&self) -> &AdmissionController<S> {
        &self.admission
    }

    /// Usage of the current period.
    pub async fn usage(&self) -> Result<UsageSnapshot, GuardError> {
        self.admission.meter().get_usage().await
    }

    /// Serve `query` from the cache, or call out if admission allows.
    ///
    /// `call` receives the normalized query. A denial comes back as
    /// [`GuardError::Denied`] carrying the reason code; serving a
    /// cache-only fallback is up to the caller.
    pub async fn fetch<F, Fut, E>(
        &self,
        query: &str,
        is_authenticated: bool,
        call: F,
    ) -> Result<Fetched, GuardError<E>>
    where
        F: FnOnce(String) -> Fut,
        Fut: Future<Output = Result<Vec<u8>, E>>,
    {
        let key = CacheKey::for_query(query)?;

        if let Some(hit) = self.cache.get(query).await.map_err(|e| e.widen::<E>())? {
            return Ok(Fetched::Cached { payload: hit.payload, hit_count: hit.hit_count });
        }

        self.admission.admit::<E>(is_authenticated).await?;

        let payload = call(key.normalized).await.map_err(GuardError::Inner)?;

        // The call already happened; a failed increment is alerted by the
        // meter but does not discard the result.
        let _ = self.admission.meter().increment().await;
        let _ = self.cache.put(query, payload.clone()).await;

        Ok(Fetched::Fresh { payload })
    }
}

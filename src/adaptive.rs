//! Live-updatable configuration handles.
//!
//! Admission thresholds and the rate-limit table can be replaced at runtime
//! (say, after a plan upgrade) without rebuilding the components that read
//! them. The default backend is `ArcSwap` for lock-free reads; the
//! `adaptive-rwlock` feature switches to an `RwLock`.

use std::sync::Arc;

#[cfg(feature = "adaptive-rwlock")]
use std::sync::RwLock;

#[cfg(not(feature = "adaptive-rwlock"))]
use arc_swap::ArcSwap;

/// Shared value with cheap snapshot reads and whole-value replacement.
#[derive(Debug)]
pub struct DynamicConfig<T> {
    #[cfg(not(feature = "adaptive-rwlock"))]
    inner: Arc<ArcSwap<T>>,
    #[cfg(feature = "adaptive-rwlock")]
    inner: Arc<RwLock<Arc<T>>>,
}

impl<T> Clone for DynamicConfig<T> {
    fn clone(&self) -> Self {
        Self { inner: self.inner.clone() }
    }
}

impl<T> DynamicConfig<T> {
    /// Create a handle holding `value`.
    pub fn new(value: T) -> Self {
        #[cfg(not(feature = "adaptive-rwlock"))]
        {
            Self { inner: Arc::new(ArcSwap::from_pointee(value)) }
        }
        #[cfg(feature = "adaptive-rwlock")]
        {
            Self { inner: Arc::new(RwLock::new(Arc::new(value))) }
        }
    }

    /// Snapshot the current value.
    #[cfg(not(feature = "adaptive-rwlock"))]
    pub fn get(&self) -> Arc<T> {
        self.inner.load_full()
    }

    /// Snapshot the current value. A poisoned lock still yields the last value.
    #[cfg(feature = "adaptive-rwlock")]
    pub fn get(&self) -> Arc<T> {
        match self.inner.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// Replace the value entirely.
    pub fn set(&self, value: T) {
        #[cfg(not(feature = "adaptive-rwlock"))]
        {
            self.inner.store(Arc::new(value));
        }
        #[cfg(feature = "adaptive-rwlock")]
        {
            let mut guard = match self.inner.write() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            *guard = Arc::new(value);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::DynamicConfig;

    #[test]
    fn clones_observe_updates() {
        let a = DynamicConfig::new(80.0_f64);
        let b = a.clone();
        assert_eq!(*b.get(), 80.0);
        a.set(90.0);
        assert_eq!(*b.get(), 90.0);
    }
}

//! Background cleanup of expired cache entries and stale rate-limit windows.
//!
//! Sweeps only delete rows that every reader already treats as absent, so
//! they can run at any time alongside normal traffic.
//!
//! ```rust,no_run
//! use meterguard::{ContentCache, InMemoryStore, RateLimiter, RateLimitPolicy, Sweeper};
//! use meterguard::config::CacheConfig;
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let store = Arc::new(InMemoryStore::new());
//! let handle = Sweeper::new(Duration::from_secs(300))?
//!     .with_target(ContentCache::new(store.clone(), CacheConfig::default()))
//!     .with_target(RateLimiter::new(store, RateLimitPolicy::default())?)
//!     .spawn();
//! // ...
//! handle.stop().await;
//! # Ok(())
//! # }
//! ```

use crate::cache::ContentCache;
use crate::error::{GuardError, ValidationError};
use crate::rate_limit::RateLimiter;
use crate::store::{CacheStore, WindowStore};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

/// Something that can delete its own dead rows.
#[async_trait]
pub trait Sweep: Send + Sync {
    /// Label used in logs.
    fn name(&self) -> &'static str;

    /// Delete dead rows; returns how many were removed.
    async fn sweep(&self) -> Result<usize, GuardError>;
}

#[async_trait]
impl<S> Sweep for ContentCache<S>
where
    S: CacheStore + 'static,
{
    fn name(&self) -> &'static str {
        "content_cache"
    }

    async fn sweep(&self) -> Result<usize, GuardError> {
        Ok(self.sweep_expired().await)
    }
}

#[async_trait]
impl<S> Sweep for RateLimiter<S>
where
    S: WindowStore + 'static,
{
    fn name(&self) -> &'static str {
        "rate_limiter"
    }

    async fn sweep(&self) -> Result<usize, GuardError> {
        self.sweep_stale().await
    }
}

/// Totals from one pass over every target.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Rows deleted across all targets.
    pub removed: usize,
    /// Targets whose sweep returned an error.
    pub failed: usize,
}

/// Runs every registered [`Sweep`] on a fixed interval.
#[derive(Clone)]
pub struct Sweeper {
    targets: Vec<Arc<dyn Sweep>>,
    interval: Duration,
}

impl std::fmt::Debug for Sweeper {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let names: Vec<_> = self.targets.iter().map(|t| t.name()).collect();
        f.debug_struct("Sweeper").field("targets", &names).field("interval", &self.interval).finish()
    }
}

impl Sweeper {
    /// A sweeper with no targets. A zero `interval` is rejected.
    pub fn new(interval: Duration) -> Result<Self, ValidationError> {
        if interval.is_zero() {
            return Err(ValidationError::InvalidDuration);
        }
        Ok(Self { targets: Vec::new(), interval })
    }

    /// Register another target; targets run in registration order.
    pub fn with_target<T: Sweep + 'static>(mut self, target: T) -> Self {
        self.targets.push(Arc::new(target));
        self
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Sweep every target once. A failing target does not stop the others.
    pub async fn run_once(&self) -> SweepReport {
        let mut report = SweepReport::default();
        for target in &self.targets {
            match target.sweep().await {
                Ok(removed) => report.removed += removed,
                Err(e) => {
                    report.failed += 1;
                    tracing::warn!(
                        target: "meterguard::sweeper",
                        sweep = target.name(),
                        error = %e,
                        "sweep failed"
                    );
                }
            }
        }
        tracing::debug!(
            target: "meterguard::sweeper",
            removed = report.removed,
            failed = report.failed,
            "sweep pass finished"
        );
        report
    }

    /// Start sweeping on the current tokio runtime. The first pass runs
    /// immediately.
    pub fn spawn(self) -> SweeperHandle {
        let (stop_tx, mut stop_rx) = watch::channel(false);
        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        self.run_once().await;
                    }
                    _ = stop_rx.changed() => break,
                }
            }
            tracing::debug!(target: "meterguard::sweeper", "sweeper stopped");
        });
        SweeperHandle { stop_tx, task }
    }
}

/// Owner of a running sweeper task.
#[derive(Debug)]
pub struct SweeperHandle {
    stop_tx: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl SweeperHandle {
    /// Signal the task and wait for it to finish its current pass.
    pub async fn stop(self) {
        let _ = self.stop_tx.send(true);
        let _ = self.task.await;
    }

    /// Whether the task has exited (stopped, or panicked in a target).
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

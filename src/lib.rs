#![forbid(unsafe_code)]
#![deny(warnings)]
#![cfg_attr(not(test), deny(clippy::all))]

//! # meterguard
//!
//! Quota-aware protection for a scarce, metered external resource (a paid
//! search provider, an AI backend) and for per-user actions that must not be
//! overused.
//!
//! ## Features
//!
//! - **Content cache** keyed by normalized query hash, with TTL expiry,
//!   collision checks and popularity tracking
//! - **Usage meter** counting calls per calendar month with atomic increments
//! - **Admission control** that throttles guests before members as the
//!   monthly quota runs out
//! - **Rate limiting** with fixed windows per subject and action, free and
//!   premium tiers, and a tower middleware
//! - **Pluggable storage** behind traits that expose atomic primitives
//!
//! Failure policy is asymmetric: the cache fails open (a broken cache is a
//! miss), the meter and the limiter fail closed.
//!
//! ## Quick Start
//!
//! ```rust
//! use meterguard::{Fetched, GuardConfig, InMemoryStore, SearchGuard};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() {
//!     let guard = SearchGuard::new(Arc::new(InMemoryStore::new()), &GuardConfig::default());
//!
//!     let result = guard
//!         .fetch("Coffee near me", false, |query| async move {
//!             // Call the metered provider here.
//!             Ok::<_, std::io::Error>(format!("results for {query}").into_bytes())
//!         })
//!         .await
//!         .unwrap();
//!     assert!(matches!(result, Fetched::Fresh { .. }));
//! }
//! ```

mod adaptive;

pub mod admission;
pub mod cache;
pub mod clock;
pub mod config;
pub mod error;
pub mod guard;
pub mod normalize;
pub mod rate_limit;
pub mod store;
pub mod sweeper;
pub mod telemetry;
pub mod usage;

// Re-exports
pub use adaptive::DynamicConfig;
pub use admission::{AdmissionController, AdmissionDecision, ReasonCode};
pub use cache::{CacheHit, ContentCache};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{AdmissionConfig, CacheConfig, GuardConfig, UsageConfig};
pub use error::{Component, GuardError, ValidationError};
pub use guard::{Fetched, SearchGuard};
pub use normalize::{hash, normalize, CacheKey};
pub use rate_limit::{
    ActionLimits, ActionType, RateLimitLayer, RateLimitOutcome, RateLimitPolicy, RateLimitService,
    RateLimitSubject, RateLimiter,
};
pub use store::{CacheStore, InMemoryStore, StoreError, UsageStore, WindowStore};
pub use sweeper::{Sweep, SweepReport, Sweeper, SweeperHandle};
pub use usage::{PeriodKey, UsageMeter, UsageSnapshot};

use crate::admission::ReasonCode;
use crate::error::Component;
use crate::rate_limit::ActionType;
use std::fmt;
use std::time::Duration;

#[cfg(feature = "telemetry-json")]
use serde_json::json;

/// Events emitted by the protection layer.
///
/// Every component reports what it decided so operators can watch cache
/// effectiveness, quota burn, and throttling without scraping logs.
#[derive(Debug, Clone, PartialEq)]
pub enum GuardEvent {
    /// Content cache events
    Cache(CacheEvent),
    /// Usage meter events
    Usage(UsageEvent),
    /// Admission controller events
    Admission(AdmissionEvent),
    /// Rate limiter events
    RateLimit(RateLimitEvent),
    /// A meter or limiter store failed and the component failed closed.
    ProtectionFailure {
        /// Component whose storage failed
        component: Component,
    },
}

/// Events emitted by the content cache.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheEvent {
    /// A fresh entry was served.
    Hit {
        /// Cache key
        key: String,
        /// Popularity after this hit
        hit_count: u64,
    },
    /// Nothing usable under this key (absent, expired, or read failure).
    Miss {
        /// Cache key
        key: String,
    },
    /// The key holds a different query with the same hash.
    Collision {
        /// Cache key
        key: String,
    },
    /// A result was written.
    Stored {
        /// Cache key
        key: String,
        /// Popularity after the write
        hit_count: u64,
    },
    /// An expiry sweep finished.
    Swept {
        /// Entries deleted
        removed: usize,
    },
}

/// Events emitted by the usage meter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UsageEvent {
    /// One call to the metered resource was recorded.
    Incremented {
        /// `YYYY-MM`
        period: String,
        /// Calls used after the increment
        used: u64,
        /// Period limit
        limit: u64,
    },
    /// An administrator replaced the period limit.
    LimitUpdated {
        /// `YYYY-MM`
        period: String,
        /// New limit
        limit: u64,
    },
}

/// Events emitted by the admission controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdmissionEvent {
    /// The metered resource may be called.
    Allowed {
        /// Whether the caller was authenticated
        authenticated: bool,
    },
    /// The call was refused.
    Denied {
        /// Stable reason code
        reason: ReasonCode,
    },
}

/// Events emitted by the rate limiter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateLimitEvent {
    /// A unit was consumed.
    Consumed {
        /// Limited action
        action: ActionType,
        /// Units left in the window
        remaining: u32,
    },
    /// The window is exhausted.
    Rejected {
        /// Limited action
        action: ActionType,
        /// Time until the window resets
        reset_in: Duration,
    },
    /// A stale-window sweep finished.
    Swept {
        /// Windows deleted
        removed: usize,
    },
}

impl fmt::Display for GuardEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GuardEvent::Cache(event) => write!(f, "Cache::{}", event),
            GuardEvent::Usage(event) => write!(f, "Usage::{}", event),
            GuardEvent::Admission(event) => write!(f, "Admission::{}", event),
            GuardEvent::RateLimit(event) => write!(f, "RateLimit::{}", event),
            GuardEvent::ProtectionFailure { component } => {
                write!(f, "ProtectionFailure({})", component)
            }
        }
    }
}

impl fmt::Display for CacheEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CacheEvent::Hit { key, hit_count } => write!(f, "Hit({}, hits={})", key, hit_count),
            CacheEvent::Miss { key } => write!(f, "Miss({})", key),
            CacheEvent::Collision { key } => write!(f, "Collision({})", key),
            CacheEvent::Stored { key, hit_count } => {
                write!(f, "Stored({}, hits={})", key, hit_count)
            }
            CacheEvent::Swept { removed } => write!(f, "Swept(removed={})", removed),
        }
    }
}

impl fmt::Display for UsageEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UsageEvent::Incremented { period, used, limit } => {
                write!(f, "Incremented({}, {}/{})", period, used, limit)
            }
            UsageEvent::LimitUpdated { period, limit } => {
                write!(f, "LimitUpdated({}, limit={})", period, limit)
            }
        }
    }
}

impl fmt::Display for AdmissionEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AdmissionEvent::Allowed { authenticated } => {
                write!(f, "Allowed(authenticated={})", authenticated)
            }
            AdmissionEvent::Denied { reason } => write!(f, "Denied({})", reason),
        }
    }
}

impl fmt::Display for RateLimitEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RateLimitEvent::Consumed { action, remaining } => {
                write!(f, "Consumed({}, remaining={})", action, remaining)
            }
            RateLimitEvent::Rejected { action, reset_in } => {
                write!(f, "Rejected({}, reset_in={:?})", action, reset_in)
            }
            RateLimitEvent::Swept { removed } => write!(f, "Swept(removed={})", removed),
        }
    }
}

#[cfg_attr(not(feature = "telemetry-json"), allow(dead_code))]
#[inline]
fn clamp_u64(val: u128) -> u64 {
    val.min(u128::from(u64::MAX)) as u64
}

/// Convert a GuardEvent into a JSON value for sinks.
#[cfg(feature = "telemetry-json")]
pub fn event_to_json(event: &GuardEvent) -> serde_json::Value {
    match event {
        GuardEvent::Cache(c) => match c {
            CacheEvent::Hit { key, hit_count } => {
                json!({ "kind": "cache_hit", "key": key, "hit_count": *hit_count })
            }
            CacheEvent::Miss { key } => json!({ "kind": "cache_miss", "key": key }),
            CacheEvent::Collision { key } => json!({ "kind": "cache_collision", "key": key }),
            CacheEvent::Stored { key, hit_count } => {
                json!({ "kind": "cache_stored", "key": key, "hit_count": *hit_count })
            }
            CacheEvent::Swept { removed } => json!({ "kind": "cache_swept", "removed": *removed }),
        },
        GuardEvent::Usage(u) => match u {
            UsageEvent::Incremented { period, used, limit } => json!({
                "kind": "usage_incremented",
                "period": period,
                "used": *used,
                "limit": *limit,
            }),
            UsageEvent::LimitUpdated { period, limit } => {
                json!({ "kind": "usage_limit_updated", "period": period, "limit": *limit })
            }
        },
        GuardEvent::Admission(a) => match a {
            AdmissionEvent::Allowed { authenticated } => {
                json!({ "kind": "admission_allowed", "authenticated": *authenticated })
            }
            AdmissionEvent::Denied { reason } => {
                json!({ "kind": "admission_denied", "reason": reason.as_str() })
            }
        },
        GuardEvent::RateLimit(r) => match r {
            RateLimitEvent::Consumed { action, remaining } => json!({
                "kind": "rate_limit_consumed",
                "action": action.as_str(),
                "remaining": *remaining,
            }),
            RateLimitEvent::Rejected { action, reset_in } => json!({
                "kind": "rate_limit_rejected",
                "action": action.as_str(),
                "reset_in_ms": clamp_u64(reset_in.as_millis()),
            }),
            RateLimitEvent::Swept { removed } => {
                json!({ "kind": "rate_limit_swept", "removed": *removed })
            }
        },
        GuardEvent::ProtectionFailure { component } => json!({
            "kind": "protection_failure",
            "component": component.to_string(),
        }),
    }
}

//! Validated configuration for the protection components.
//!
//! Each struct validates on construction, so a component holding one never has
//! to re-check its invariants. `Default` values are production settings.

use crate::error::ValidationError;
use crate::rate_limit::RateLimitPolicy;
use std::time::Duration;

/// Default cache time-to-live (24 hours).
pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(24 * 60 * 60);
/// Default monthly call allowance for the metered resource.
pub const DEFAULT_MONTHLY_LIMIT: u64 = 1_000;
/// Usage percentage at which a period is reported as near its limit.
pub const DEFAULT_NEAR_LIMIT_PERCENT: f64 = 80.0;
/// Usage percentage from which guests are refused.
pub const DEFAULT_GUEST_THROTTLE_PERCENT: f64 = 80.0;

fn check_percent(value: f64) -> Result<f64, ValidationError> {
    if value.is_finite() && value > 0.0 && value <= 100.0 {
        Ok(value)
    } else {
        Err(ValidationError::InvalidThreshold(value))
    }
}

/// Content cache settings.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(try_from = "CacheConfigRepr", into = "CacheConfigRepr"))]
pub struct CacheConfig {
    ttl: Duration,
}

impl CacheConfig {
    /// Create a config; `ttl` must be at least one millisecond.
    pub fn new(ttl: Duration) -> Result<Self, ValidationError> {
        if ttl.as_millis() == 0 {
            return Err(ValidationError::InvalidDuration);
        }
        Ok(Self { ttl })
    }

    /// Entry lifetime.
    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub(crate) fn ttl_millis(&self) -> u64 {
        u64::try_from(self.ttl.as_millis()).unwrap_or(u64::MAX)
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self { ttl: DEFAULT_CACHE_TTL }
    }
}

/// Usage meter settings.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(try_from = "UsageConfigRepr", into = "UsageConfigRepr"))]
pub struct UsageConfig {
    default_limit: u64,
    near_limit_percent: f64,
}

impl UsageConfig {
    /// Create a config. `default_limit` applies to periods without an
    /// administrative override and must be > 0.
    pub fn new(default_limit: u64, near_limit_percent: f64) -> Result<Self, ValidationError> {
        if default_limit == 0 {
            return Err(ValidationError::InvalidLimit { provided: 0 });
        }
        Ok(Self { default_limit, near_limit_percent: check_percent(near_limit_percent)? })
    }

    /// Limit for periods without an override.
    pub fn default_limit(&self) -> u64 {
        self.default_limit
    }

    /// Percentage at which `is_near_limit` flips.
    pub fn near_limit_percent(&self) -> f64 {
        self.near_limit_percent
    }
}

impl Default for UsageConfig {
    fn default() -> Self {
        Self { default_limit: DEFAULT_MONTHLY_LIMIT, near_limit_percent: DEFAULT_NEAR_LIMIT_PERCENT }
    }
}

/// Admission policy settings.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(try_from = "AdmissionConfigRepr", into = "AdmissionConfigRepr"))]
pub struct AdmissionConfig {
    guest_throttle_percent: f64,
}

impl AdmissionConfig {
    /// Create a config; the threshold must lie in `(0, 100]`.
    pub fn new(guest_throttle_percent: f64) -> Result<Self, ValidationError> {
        Ok(Self { guest_throttle_percent: check_percent(guest_throttle_percent)? })
    }

    /// Usage percentage from which unauthenticated callers are refused.
    pub fn guest_throttle_percent(&self) -> f64 {
        self.guest_throttle_percent
    }
}

impl Default for AdmissionConfig {
    fn default() -> Self {
        Self { guest_throttle_percent: DEFAULT_GUEST_THROTTLE_PERCENT }
    }
}

/// Everything needed to assemble a [`SearchGuard`](crate::SearchGuard) and a
/// [`RateLimiter`](crate::RateLimiter).
#[derive(Debug, Clone, Default)]
pub struct GuardConfig {
    /// Cache settings.
    pub cache: CacheConfig,
    /// Meter settings.
    pub usage: UsageConfig,
    /// Admission settings.
    pub admission: AdmissionConfig,
    /// Per-action limits.
    pub rate_limits: RateLimitPolicy,
}

// Serialized forms: durations in milliseconds, validated on the way in.

#[cfg(feature = "serde")]
#[derive(serde::Serialize, serde::Deserialize)]
struct CacheConfigRepr {
    ttl_ms: u64,
}

#[cfg(feature = "serde")]
impl TryFrom<CacheConfigRepr> for CacheConfig {
    type Error = ValidationError;
    fn try_from(repr: CacheConfigRepr) -> Result<Self, Self::Error> {
        CacheConfig::new(Duration::from_millis(repr.ttl_ms))
    }
}

#[cfg(feature = "serde")]
impl From<CacheConfig> for CacheConfigRepr {
    fn from(cfg: CacheConfig) -> Self {
        Self { ttl_ms: cfg.ttl_millis() }
    }
}

#[cfg(feature = "serde")]
#[derive(serde::Serialize, serde::Deserialize)]
struct UsageConfigRepr {
    default_limit: u64,
    near_limit_percent: f64,
}

#[cfg(feature = "serde")]
impl TryFrom<UsageConfigRepr> for UsageConfig {
    type Error = ValidationError;
    fn try_from(repr: UsageConfigRepr) -> Result<Self, Self::Error> {
        UsageConfig::new(repr.default_limit, repr.near_limit_percent)
    }
}

#[cfg(feature = "serde")]
impl From<UsageConfig> for UsageConfigRepr {
    fn from(cfg: UsageConfig) -> Self {
        Self { default_limit: cfg.default_limit, near_limit_percent: cfg.near_limit_percent }
    }
}

#[cfg(feature = "serde")]
#[derive(serde::Serialize, serde::Deserialize)]
struct AdmissionConfigRepr {
    guest_throttle_percent: f64,
}

#[cfg(feature = "serde")]
impl TryFrom<AdmissionConfigRepr> for AdmissionConfig {
    type Error = ValidationError;
    fn try_from(repr: AdmissionConfigRepr) -> Result<Self, Self::Error> {
        AdmissionConfig::new(repr.guest_throttle_percent)
    }
}

#[cfg(feature = "serde")]
impl From<AdmissionConfig> for AdmissionConfigRepr {
    fn from(cfg: AdmissionConfig) -> Self {
        Self { guest_throttle_percent: cfg.guest_throttle_percent }
    }
}

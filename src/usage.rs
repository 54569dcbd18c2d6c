//! Monthly usage meter for the metered external resource.
//!
//! Usage is bucketed by calendar month (`YYYY-MM`, UTC). The period key is
//! derived from the clock, so a new month starts a fresh counter without any
//! reset job. Every increment goes through the store's atomic primitive.
//!
//! Storage failures fail closed: they surface as
//! [`GuardError::ProtectionFailure`] and are logged with
//! `alert = "resource_protection_failure"`.

use crate::clock::{Clock, SystemClock};
use crate::config::UsageConfig;
use crate::error::{Component, GuardError, ValidationError};
use crate::store::{StoreError, UsagePeriod, UsageStore};
use crate::telemetry::{GuardEvent, Telemetry, TelemetrySink, UsageEvent};
use chrono::{DateTime, NaiveDate};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

/// A validated `YYYY-MM` period key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(try_from = "String", into = "String"))]
pub struct PeriodKey(String);

impl PeriodKey {
    /// The UTC month containing `millis` since the epoch.
    pub fn from_millis(millis: u64) -> Self {
        let millis = i64::try_from(millis).unwrap_or(i64::MAX);
        let key = DateTime::from_timestamp_millis(millis)
            .map(|dt| dt.format("%Y-%m").to_string())
            .unwrap_or_else(|| "9999-12".to_string());
        Self(key)
    }

    /// The key as stored, e.g. `2024-03`.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl FromStr for PeriodKey {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let well_formed = s.len() == 7
            && s.as_bytes()[4] == b'-'
            && NaiveDate::parse_from_str(&format!("{s}-01"), "%Y-%m-%d").is_ok();
        if well_formed {
            Ok(Self(s.to_string()))
        } else {
            Err(ValidationError::InvalidPeriodKey(s.to_string()))
        }
    }
}

impl TryFrom<String> for PeriodKey {
    type Error = ValidationError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<PeriodKey> for String {
    fn from(key: PeriodKey) -> Self {
        key.0
    }
}

impl fmt::Display for PeriodKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Derived view of one period's usage.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct UsageSnapshot {
    pub period: PeriodKey,
    /// Successful external calls counted so far.
    pub used: u64,
    /// Calls allowed this period.
    pub limit: u64,
    /// `limit - used`, floored at zero.
    pub remaining: u64,
    /// `used / limit * 100`; may exceed 100 after a limit cut.
    pub percent_used: f64,
    /// `percent_used` has reached the configured warning threshold.
    pub is_near_limit: bool,
    /// No calls remain.
    pub is_at_limit: bool,
}

impl UsageSnapshot {
    fn from_row(period: PeriodKey, used: u64, limit: u64, near_limit_percent: f64) -> Self {
        let remaining = limit.saturating_sub(used);
        let percent_used = if limit == 0 { 100.0 } else { used as f64 / limit as f64 * 100.0 };
        Self {
            period,
            used,
            limit,
            remaining,
            percent_used,
            is_near_limit: percent_used >= near_limit_percent,
            is_at_limit: remaining == 0,
        }
    }
}

/// Durable per-month counter over a [`UsageStore`].
#[derive(Debug, Clone)]
pub struct UsageMeter<S> {
    store: Arc<S>,
    config: UsageConfig,
    clock: Arc<dyn Clock>,
    telemetry: Telemetry,
}

impl<S> UsageMeter<S>
where
    S: UsageStore + 'static,
{
    /// Meter over `store` using the system clock.
    pub fn new(store: Arc<S>, config: UsageConfig) -> Self {
        Self { store, config, clock: Arc::new(SystemClock), telemetry: Telemetry::null() }
    }

    /// Override the clock that picks the period.
    pub fn with_clock<C: Clock + 'static>(mut self, clock: C) -> Self {
        self.clock = Arc::new(clock);
        self
    }

    pub fn with_telemetry<T>(mut self, sink: T) -> Self
    where
        T: TelemetrySink,
        T::Future: Send + 'static,
    {
        self.telemetry = Telemetry::new(sink);
        self
    }

    pub fn config(&self) -> &UsageConfig {
        &self.config
    }

    /// Period key for the current clock reading.
    pub fn current_period(&self) -> PeriodKey {
        PeriodKey::from_millis(self.clock.now_millis())
    }

    /// Usage of the current month.
    pub async fn get_usage(&self) -> Result<UsageSnapshot, GuardError> {
        self.get_usage_for(&self.current_period()).await
    }

    /// Usage of `period`. A period with no row reports zero usage against the
    /// default limit.
    pub async fn get_usage_for(&self, period: &PeriodKey) -> Result<UsageSnapshot, GuardError> {
        let row = match self.store.get(period.as_str()).await {
            Ok(row) => row,
            Err(e) => return Err(self.protection_failure("get_usage", &e).await),
        };
        let (used, limit) = row.map_or((0, self.config.default_limit()), |r| (r.used, r.limit));
        Ok(UsageSnapshot::from_row(period.clone(), used, limit, self.config.near_limit_percent()))
    }

    /// Count one call against the current month.
    pub async fn increment(&self) -> Result<UsageSnapshot, GuardError> {
        self.increment_for(&self.current_period()).await
    }

    /// Count one call against `period`, creating it with `used = 1` if absent.
    pub async fn increment_for(&self, period: &PeriodKey) -> Result<UsageSnapshot, GuardError> {
        let now = self.clock.now_millis();
        let row = match self.store.increment(period.as_str(), self.config.default_limit(), now).await
        {
            Ok(row) => row,
            Err(e) => return Err(self.protection_failure("increment", &e).await),
        };
        tracing::debug!(
            target: "meterguard::usage",
            period = %period,
            used = row.used,
            limit = row.limit,
            "usage incremented"
        );
        self.telemetry
            .emit(GuardEvent::Usage(UsageEvent::Incremented {
                period: period.to_string(),
                used: row.used,
                limit: row.limit,
            }))
            .await;
        Ok(self.snapshot(period, &row))
    }

    /// Administrative override of a period's limit.
    pub async fn update_limit(
        &self,
        period: &PeriodKey,
        new_limit: u64,
    ) -> Result<UsageSnapshot, GuardError> {
        if new_limit == 0 {
            return Err(ValidationError::InvalidLimit { provided: new_limit }.into());
        }
        let now = self.clock.now_millis();
        let row = match self.store.set_limit(period.as_str(), new_limit, now).await {
            Ok(row) => row,
            Err(e) => return Err(self.protection_failure("update_limit", &e).await),
        };
        tracing::info!(
            target: "meterguard::usage",
            period = %period,
            limit = new_limit,
            used = row.used,
            "usage limit updated"
        );
        self.telemetry
            .emit(GuardEvent::Usage(UsageEvent::LimitUpdated {
                period: period.to_string(),
                limit: new_limit,
            }))
            .await;
        Ok(self.snapshot(period, &row))
    }

    fn snapshot(&self, period: &PeriodKey, row: &UsagePeriod) -> UsageSnapshot {
        UsageSnapshot::from_row(period.clone(), row.used, row.limit, self.config.near_limit_percent())
    }

    async fn protection_failure(&self, op: &'static str, err: &StoreError) -> GuardError {
        tracing::error!(
            target: "meterguard::usage",
            alert = "resource_protection_failure",
            component = %Component::UsageMeter,
            op,
            error = %err,
            "usage store failed; failing closed"
        );
        self.telemetry
            .emit(GuardEvent::ProtectionFailure { component: Component::UsageMeter })
            .await;
        GuardError::ProtectionFailure { component: Component::UsageMeter, message: err.to_string() }
    }
}

//! Admission control in front of the metered resource.
//!
//! [`AdmissionController::decide`] must be consulted before every attempted
//! call. The policy is ordered and the first matching rule wins:
//!
//! 1. no quota left: deny with [`ReasonCode::ApiLimitReached`];
//! 2. usage at or above the guest threshold and the caller is anonymous: deny
//!    with [`ReasonCode::GuestThrottled`];
//! 3. otherwise allow.
//!
//! The threshold is a step: at exactly the configured percentage guests are
//! refused. When the meter cannot be read the controller denies with
//! [`ReasonCode::ProtectionUnavailable`].

use crate::adaptive::DynamicConfig;
use crate::config::AdmissionConfig;
use crate::error::GuardError;
use crate::store::UsageStore;
use crate::telemetry::{AdmissionEvent, GuardEvent, Telemetry, TelemetrySink};
use crate::usage::{UsageMeter, UsageSnapshot};
use std::fmt;
use std::sync::Arc;

/// Stable reason codes attached to a denial.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "SCREAMING_SNAKE_CASE"))]
pub enum ReasonCode {
    /// The period's quota is used up; fall back to cached or community results.
    ApiLimitReached,
    /// Remaining quota is reserved for authenticated callers.
    GuestThrottled,
    /// The usage meter could not be read.
    ProtectionUnavailable,
}

impl ReasonCode {
    /// Stable wire code, e.g. `GUEST_THROTTLED`.
    pub fn as_str(self) -> &'static str {
        match self {
            ReasonCode::ApiLimitReached => "API_LIMIT_REACHED",
            ReasonCode::GuestThrottled => "GUEST_THROTTLED",
            ReasonCode::ProtectionUnavailable => "PROTECTION_UNAVAILABLE",
        }
    }

    /// Default user-facing message.
    pub fn default_message(self) -> &'static str {
        match self {
            ReasonCode::ApiLimitReached => {
                "Live search is paused for this month. Showing saved and community results."
            }
            ReasonCode::GuestThrottled => "Live search is busy right now. Sign in to keep searching.",
            ReasonCode::ProtectionUnavailable => {
                "Live search is temporarily unavailable. Please try again shortly."
            }
        }
    }
}

impl fmt::Display for ReasonCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of [`AdmissionController::decide`].
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct AdmissionDecision {
    /// Whether the metered call may proceed.
    pub allowed: bool,
    /// Present exactly when `allowed` is false.
    pub reason: Option<ReasonCode>,
    /// Human-readable text for the UI.
    pub message: String,
}

impl AdmissionDecision {
    /// An allowed decision with no reason or message.
    pub fn allow() -> Self {
        Self { allowed: true, reason: None, message: String::new() }
    }

    /// A denial carrying `reason` and a message for the caller.
    pub fn deny(reason: ReasonCode, message: impl Into<String>) -> Self {
        Self { allowed: false, reason: Some(reason), message: message.into() }
    }

    /// Reason code as text, or `"ALLOWED"`.
    pub fn reason_label(&self) -> &'static str {
        self.reason.map_or("ALLOWED", ReasonCode::as_str)
    }

    /// Apply the ordered policy to a usage snapshot.
    pub fn evaluate(usage: &UsageSnapshot, is_authenticated: bool, config: &AdmissionConfig) -> Self {
        if usage.remaining == 0 {
            let reason = ReasonCode::ApiLimitReached;
            return Self::deny(reason, reason.default_message());
        }
        if usage.percent_used >= config.guest_throttle_percent() && !is_authenticated {
            let reason = ReasonCode::GuestThrottled;
            return Self::deny(reason, reason.default_message());
        }
        Self::allow()
    }
}

/// Decides whether the metered resource may be called.
#[derive(Debug, Clone)]
pub struct AdmissionController<S> {
    meter: UsageMeter<S>,
    config: DynamicConfig<AdmissionConfig>,
    telemetry: Telemetry,
}

impl<S> AdmissionController<S>
where
    S: UsageStore + 'static,
{
    /// Controller reading `meter`, with a live-swappable `config`.
    pub fn new(meter: UsageMeter<S>, config: AdmissionConfig) -> Self {
        Self { meter, config: DynamicConfig::new(config), telemetry: Telemetry::null() }
    }

    pub fn with_telemetry<T>(mut self, sink: T) -> Self
    where
        T: TelemetrySink,
        T::Future: Send + 'static,
    {
        self.telemetry = Telemetry::new(sink);
        self
    }

    /// The meter this controller reads.
    pub fn meter(&self) -> &UsageMeter<S> {
        &self.meter
    }

    /// Snapshot of the current settings.
    pub fn config(&self) -> Arc<AdmissionConfig> {
        self.config.get()
    }

    /// Replace the admission settings; clones see the change.
    pub fn set_config(&self, config: AdmissionConfig) {
        self.config.set(config);
    }

    /// Decide for the current period. Never fails: a meter error is a denial.
    pub async fn decide(&self, is_authenticated: bool) -> AdmissionDecision {
        let usage = match self.meter.get_usage().await {
            Ok(usage) => usage,
            Err(err) => {
                // The meter has already raised the protection-failure alert.
                let reason = ReasonCode::ProtectionUnavailable;
                tracing::warn!(
                    target: "meterguard::admission",
                    reason = %reason,
                    error = %err,
                    "usage unavailable; denying"
                );
                self.emit(AdmissionEvent::Denied { reason }).await;
                return AdmissionDecision::deny(reason, reason.default_message());
            }
        };

        let decision = AdmissionDecision::evaluate(&usage, is_authenticated, &self.config.get());
        match decision.reason {
            Some(reason) => {
                tracing::info!(
                    target: "meterguard::admission",
                    reason = %reason,
                    authenticated = is_authenticated,
                    used = usage.used,
                    limit = usage.limit,
                    percent_used = usage.percent_used,
                    "admission denied"
                );
                self.emit(AdmissionEvent::Denied { reason }).await;
            }
            None => {
                self.emit(AdmissionEvent::Allowed { authenticated: is_authenticated }).await;
            }
        }
        decision
    }

    /// [`decide`](Self::decide), with a denial as `Err`.
    pub async fn admit<E>(&self, is_authenticated: bool) -> Result<(), GuardError<E>> {
        let decision = self.decide(is_authenticated).await;
        if decision.allowed {
            Ok(())
        } else {
            Err(GuardError::Denied(decision))
        }
    }

    async fn emit(&self, event: AdmissionEvent) {
        self.telemetry.emit(GuardEvent::Admission(event)).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::config::UsageConfig;
    use crate::store::InMemoryStore;
    use crate::telemetry::MemorySink;

    async fn controller_at(used: u64, limit: u64) -> AdmissionController<InMemoryStore> {
        let meter = UsageMeter::new(Arc::new(InMemoryStore::new()), UsageConfig::default())
            .with_clock(ManualClock::at(0));
        meter.update_limit(&meter.current_period(), limit).await.unwrap();
        for _ in 0..used {
            meter.increment().await.unwrap();
        }
        AdmissionController::new(meter, AdmissionConfig::default())
    }

    #[tokio::test]
    async fn guests_throttled_near_limit() {
        let controller = controller_at(85, 100).await;

        let guest = controller.decide(false).await;
        assert!(!guest.allowed);
        assert_eq!(guest.reason, Some(ReasonCode::GuestThrottled));
        assert!(!guest.message.is_empty());

        let member = controller.decide(true).await;
        assert!(member.allowed);
        assert_eq!(member.reason, None);
    }

    #[tokio::test]
    async fn exhausted_quota_denies_everyone() {
        let controller = controller_at(100, 100).await;
        for authenticated in [false, true] {
            let decision = controller.decide(authenticated).await;
            assert!(!decision.allowed);
            assert_eq!(decision.reason, Some(ReasonCode::ApiLimitReached));
        }
    }

    #[tokio::test]
    async fn threshold_is_inclusive() {
        assert!(!controller_at(80, 100).await.decide(false).await.allowed);
        assert!(controller_at(79, 100).await.decide(false).await.allowed);
    }

    #[tokio::test]
    async fn threshold_can_change_at_runtime() {
        let controller = controller_at(85, 100).await;
        let sink = MemorySink::new();
        let controller = controller.with_telemetry(sink.clone());
        controller.set_config(AdmissionConfig::new(90.0).unwrap());
        assert!(controller.decide(false).await.allowed);
        assert_eq!(
            sink.events(),
            vec![GuardEvent::Admission(AdmissionEvent::Allowed { authenticated: false })]
        );
    }

    #[tokio::test]
    async fn admit_surfaces_denial_as_error() {
        let controller = controller_at(100, 100).await;
        let err = controller.admit::<std::io::Error>(true).await.unwrap_err();
        assert_eq!(err.decision().map(|d| d.reason_label()), Some("API_LIMIT_REACHED"));
    }

    #[test]
    fn reason_codes_are_stable() {
        assert_eq!(ReasonCode::ApiLimitReached.to_string(), "API_LIMIT_REACHED");
        assert_eq!(ReasonCode::GuestThrottled.to_string(), "GUEST_THROTTLED");
        assert_eq!(ReasonCode::ProtectionUnavailable.to_string(), "PROTECTION_UNAVAILABLE");
        assert_eq!(AdmissionDecision::allow().reason_label(), "ALLOWED");
    }
}

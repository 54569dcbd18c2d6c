use super::ActionType;
use crate::error::ValidationError;
use std::time::Duration;

const MINUTE: Duration = Duration::from_secs(60);
const HOUR: Duration = Duration::from_secs(60 * 60);
const DAY: Duration = Duration::from_secs(24 * 60 * 60);

/// Limits for one action.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ActionLimits {
    /// Requests per window for free callers.
    pub free: u32,
    /// Requests per window for premium callers; never below `free`.
    pub premium: u32,
    /// Fixed window length.
    #[cfg_attr(feature = "serde", serde(with = "duration_ms"))]
    pub window: Duration,
}

impl ActionLimits {
    /// Limits of `free` and `premium` requests per `window`.
    pub const fn new(free: u32, premium: u32, window: Duration) -> Self {
        Self { free, premium, window }
    }

    /// Limit for the caller's tier.
    pub fn for_tier(&self, is_premium: bool) -> u32 {
        if is_premium {
            self.premium
        } else {
            self.free
        }
    }

    pub(crate) fn window_millis(&self) -> u64 {
        u64::try_from(self.window.as_millis()).unwrap_or(u64::MAX)
    }

    /// The tier's limit scaled to requests per hour, so rows with different
    /// windows compare on one time base.
    pub fn hourly_rate(&self, is_premium: bool) -> u128 {
        let window = self.window.as_millis().max(1);
        u128::from(self.for_tier(is_premium)) * HOUR.as_millis() / window
    }
}

/// The enumerated `action -> limits` table.
///
/// Invariants, checked by [`validate`](Self::validate):
/// - every limit is > 0 and every window at least 1ms;
/// - `premium >= free` for every action;
/// - on both tiers, safety-critical actions get a per-window count and an
///   hourly rate strictly above every ordinary action's.
///
/// Deserialization goes through the same validation.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(try_from = "PolicyRepr", into = "PolicyRepr"))]
pub struct RateLimitPolicy {
    table: [ActionLimits; ActionType::COUNT],
}

impl Default for RateLimitPolicy {
    fn default() -> Self {
        let mut table = [ActionLimits::new(1, 1, MINUTE); ActionType::COUNT];
        for action in ActionType::ALL {
            table[action.index()] = match action {
                ActionType::AiChat => ActionLimits::new(20, 100, HOUR),
                ActionType::PostCreate => ActionLimits::new(10, 50, HOUR),
                ActionType::CommentCreate => ActionLimits::new(30, 150, HOUR),
                ActionType::MediaUpload => ActionLimits::new(10, 50, HOUR),
                ActionType::BroadcastStart => ActionLimits::new(3, 20, DAY),
                ActionType::Emergency => ActionLimits::new(10_000, 50_000, HOUR),
                ActionType::ApiCall => ActionLimits::new(100, 500, MINUTE),
            };
        }
        Self { table }
    }
}

impl RateLimitPolicy {
    /// Limits for `action`.
    pub fn limits(&self, action: ActionType) -> ActionLimits {
        self.table[action.index()]
    }

    /// Replace one row, re-validating the whole table.
    pub fn with_limits(
        mut self,
        action: ActionType,
        limits: ActionLimits,
    ) -> Result<Self, ValidationError> {
        self.table[action.index()] = limits;
        self.validate()?;
        Ok(self)
    }

    /// Check the tiering invariants.
    pub fn validate(&self) -> Result<(), ValidationError> {
        for action in ActionType::ALL {
            let row = self.limits(action);
            if row.free == 0 {
                return Err(ValidationError::InvalidLimit { provided: 0 });
            }
            if row.window.as_millis() == 0 {
                return Err(ValidationError::InvalidDuration);
            }
            if row.premium < row.free {
                return Err(ValidationError::PolicyViolation(format!(
                    "{} premium limit {} is below free limit {}",
                    action, row.premium, row.free
                )));
            }
        }

        for is_premium in [false, true] {
            self.check_safety_ceiling(is_premium)?;
        }
        Ok(())
    }

    fn check_safety_ceiling(&self, is_premium: bool) -> Result<(), ValidationError> {
        let tier = if is_premium { "premium" } else { "free" };
        let ordinary = || ActionType::ALL.into_iter().filter(|a| !a.is_safety_critical());
        let max_count = ordinary().map(|a| self.limits(a).for_tier(is_premium)).max().unwrap_or(0);
        let max_rate = ordinary().map(|a| self.limits(a).hourly_rate(is_premium)).max().unwrap_or(0);

        for action in ActionType::ALL.into_iter().filter(|a| a.is_safety_critical()) {
            let row = self.limits(action);
            let count = row.for_tier(is_premium);
            if count <= max_count {
                return Err(ValidationError::PolicyViolation(format!(
                    "{action} {tier} limit {count} must exceed every ordinary limit (max {max_count})"
                )));
            }
            let rate = row.hourly_rate(is_premium);
            if rate <= max_rate {
                return Err(ValidationError::PolicyViolation(format!(
                    "{action} {tier} rate {rate}/h must exceed every ordinary rate (max {max_rate}/h)"
                )));
            }
        }
        Ok(())
    }
}

#[cfg(feature = "serde")]
#[derive(serde::Serialize, serde::Deserialize)]
struct PolicyRepr {
    table: [ActionLimits; ActionType::COUNT],
}

#[cfg(feature = "serde")]
impl TryFrom<PolicyRepr> for RateLimitPolicy {
    type Error = ValidationError;
    fn try_from(repr: PolicyRepr) -> Result<Self, Self::Error> {
        let policy = Self { table: repr.table };
        policy.validate()?;
        Ok(policy)
    }
}

#[cfg(feature = "serde")]
impl From<RateLimitPolicy> for PolicyRepr {
    fn from(policy: RateLimitPolicy) -> Self {
        Self { table: policy.table }
    }
}

#[cfg(feature = "serde")]
mod duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_millis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_table_is_valid() {
        RateLimitPolicy::default().validate().expect("default policy must be valid");
    }

    #[test]
    fn emergency_ceiling_exceeds_ordinary_actions() {
        let policy = RateLimitPolicy::default();
        let emergency = policy.limits(ActionType::Emergency).free;
        for action in ActionType::ALL.into_iter().filter(|a| *a != ActionType::Emergency) {
            assert!(emergency > policy.limits(action).free, "{action} outranks emergency");
        }
    }

    #[test]
    fn premium_never_below_free() {
        let policy = RateLimitPolicy::default();
        for action in ActionType::ALL {
            let row = policy.limits(action);
            assert!(row.premium >= row.free, "{action}");
        }
    }

    #[test]
    fn with_limits_rejects_inverted_tiers() {
        let err = RateLimitPolicy::default()
            .with_limits(ActionType::AiChat, ActionLimits::new(50, 10, HOUR))
            .expect_err("premium below free must be rejected");
        assert!(matches!(err, ValidationError::PolicyViolation(_)));
    }

    #[test]
    fn with_limits_rejects_throttled_emergency() {
        let err = RateLimitPolicy::default()
            .with_limits(ActionType::Emergency, ActionLimits::new(5, 5, HOUR))
            .expect_err("emergency below ordinary must be rejected");
        assert!(err.to_string().contains("emergency"));
    }

    #[test]
    fn emergency_outranks_ordinary_actions_on_premium_tier() {
        let policy = RateLimitPolicy::default();
        let emergency = policy.limits(ActionType::Emergency);
        for action in ActionType::ALL.into_iter().filter(|a| !a.is_safety_critical()) {
            let row = policy.limits(action);
            assert!(emergency.premium > row.premium, "{action} premium outranks emergency");
            assert!(emergency.hourly_rate(true) > row.hourly_rate(true), "{action}");
            assert!(emergency.hourly_rate(false) > row.hourly_rate(false), "{action}");
        }
    }

    #[test]
    fn with_limits_rejects_premium_row_above_emergency() {
        let err = RateLimitPolicy::default()
            .with_limits(ActionType::AiChat, ActionLimits::new(20, 60_000, HOUR))
            .expect_err("ordinary premium above emergency premium must be rejected");
        assert!(err.to_string().contains("premium"));
    }

    #[test]
    fn with_limits_compares_rates_across_windows() {
        // 200 per minute is 12_000 per hour, above emergency's 10_000.
        let err = RateLimitPolicy::default()
            .with_limits(ActionType::ApiCall, ActionLimits::new(200, 500, MINUTE))
            .expect_err("faster ordinary window must be rejected");
        assert!(err.to_string().contains("/h"));
    }

    #[test]
    fn hourly_rate_scales_by_window() {
        assert_eq!(ActionLimits::new(100, 500, MINUTE).hourly_rate(false), 6_000);
        assert_eq!(ActionLimits::new(100, 500, MINUTE).hourly_rate(true), 30_000);
        assert_eq!(ActionLimits::new(3, 24, DAY).hourly_rate(true), 1);
    }

    #[cfg(feature = "serde")]
    #[test]
    fn deserialization_validates_the_table() {
        let mut json = serde_json::to_value(RateLimitPolicy::default()).unwrap();
        let back: RateLimitPolicy = serde_json::from_value(json.clone()).unwrap();
        assert_eq!(back, RateLimitPolicy::default());

        let emergency = ActionType::Emergency.index();
        json["table"][emergency]["free"] = serde_json::json!(1);
        assert!(serde_json::from_value::<RateLimitPolicy>(json).is_err());
    }

    #[test]
    fn with_limits_rejects_zero_values() {
        assert_eq!(
            RateLimitPolicy::default()
                .with_limits(ActionType::PostCreate, ActionLimits::new(0, 5, HOUR)),
            Err(ValidationError::InvalidLimit { provided: 0 })
        );
        assert_eq!(
            RateLimitPolicy::default()
                .with_limits(ActionType::PostCreate, ActionLimits::new(5, 5, Duration::ZERO)),
            Err(ValidationError::InvalidDuration)
        );
    }

    #[test]
    fn tier_selection() {
        let row = ActionLimits::new(3, 20, DAY);
        assert_eq!(row.for_tier(false), 3);
        assert_eq!(row.for_tier(true), 20);
        assert_eq!(row.window_millis(), 86_400_000);
    }
}

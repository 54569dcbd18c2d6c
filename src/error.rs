//! Error types for guarded operations.
use crate::admission::AdmissionDecision;
use crate::rate_limit::RateLimitOutcome;
use std::convert::Infallible;
use std::fmt;

/// Inputs rejected synchronously, before any storage access.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ValidationError {
    /// The query is empty or only whitespace.
    #[error("query must not be empty")]
    EmptyQuery,
    /// The subject identifier is empty.
    #[error("subject id must not be empty")]
    EmptySubject,
    /// The action type is not part of the configured table.
    #[error("unknown action type `{0}`")]
    UnknownAction(String),
    /// A period key that is not `YYYY-MM`.
    #[error("invalid period key `{0}` (expected YYYY-MM)")]
    InvalidPeriodKey(String),
    /// Limits must be > 0.
    #[error("limit must be > 0 (got {provided})")]
    InvalidLimit {
        /// Value provided by caller.
        provided: u64,
    },
    /// Cache TTL and window durations must be > 0.
    #[error("duration must be > 0")]
    InvalidDuration,
    /// Percent thresholds must lie in `(0, 100]`.
    #[error("threshold must be within (0, 100] percent (got {0})")]
    InvalidThreshold(f64),
    /// A rate-limit table that breaks the tiering invariants.
    #[error("rate limit policy violation: {0}")]
    PolicyViolation(String),
}

/// Which protection component produced an error or event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Component {
    /// The result cache.
    ContentCache,
    /// The monthly usage meter.
    UsageMeter,
    /// The per-action rate limiter.
    RateLimiter,
}

impl fmt::Display for Component {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Component::ContentCache => "content_cache",
            Component::UsageMeter => "usage_meter",
            Component::RateLimiter => "rate_limiter",
        };
        f.write_str(name)
    }
}

/// Unified error type for guarded operations.
///
/// `E` is the error of the wrapped external call; component operations that
/// never call out use the default `Infallible`.
#[derive(Debug, Clone)]
pub enum GuardError<E = Infallible> {
    /// The input was rejected before touching storage.
    Invalid(ValidationError),
    /// Admission control refused the call to the metered resource.
    Denied(AdmissionDecision),
    /// The caller exhausted its window for this action.
    RateLimited(RateLimitOutcome),
    /// A protection component's storage failed; the operation failed closed.
    ProtectionFailure {
        /// Component whose storage failed.
        component: Component,
        /// Rendered storage error.
        message: String,
    },
    /// The external call itself failed.
    Inner(E),
}

impl<E: fmt::Display> fmt::Display for GuardError<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Invalid(e) => write!(f, "invalid input: {}", e),
            Self::Denied(decision) => {
                write!(f, "admission denied ({}): {}", decision.reason_label(), decision.message)
            }
            Self::RateLimited(outcome) => write!(
                f,
                "rate limited (limit {}, resets in {:?})",
                outcome.limit, outcome.reset_in
            ),
            Self::ProtectionFailure { component, message } => {
                write!(f, "{} storage failure, failing closed: {}", component, message)
            }
            Self::Inner(e) => write!(f, "{}", e),
        }
    }
}

impl<E: std::error::Error + 'static> std::error::Error for GuardError<E> {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Inner(e) => Some(e),
            Self::Invalid(e) => Some(e),
            _ => None,
        }
    }
}

impl<E> From<ValidationError> for GuardError<E> {
    fn from(err: ValidationError) -> Self {
        GuardError::Invalid(err)
    }
}

impl GuardError<Infallible> {
    /// Re-type a component error for a caller whose external call fails with `E`.
    pub fn widen<E>(self) -> GuardError<E> {
        match self {
            Self::Invalid(e) => GuardError::Invalid(e),
            Self::Denied(d) => GuardError::Denied(d),
            Self::RateLimited(o) => GuardError::RateLimited(o),
            Self::ProtectionFailure { component, message } => {
                GuardError::ProtectionFailure { component, message }
            }
            Self::Inner(never) => match never {},
        }
    }
}

impl<E> GuardError<E> {
    /// Check if admission control denied the call.
    pub fn is_denied(&self) -> bool {
        matches!(self, Self::Denied(_))
    }
    /// Check if the rate limiter rejected the action.
    pub fn is_rate_limited(&self) -> bool {
        matches!(self, Self::RateLimited(_))
    }
    /// Check if a protection component failed closed.
    pub fn is_protection_failure(&self) -> bool {
        matches!(self, Self::ProtectionFailure { .. })
    }
    /// Check if the input was rejected.
    pub fn is_invalid(&self) -> bool {
        matches!(self, Self::Invalid(_))
    }
    /// Get the inner error if this is an Inner variant.
    pub fn into_inner(self) -> Option<E> {
        match self {
            Self::Inner(e) => Some(e),
            _ => None,
        }
    }
    /// Borrow the admission decision behind a denial.
    pub fn decision(&self) -> Option<&AdmissionDecision> {
        match self {
            Self::Denied(d) => Some(d),
            _ => None,
        }
    }
    /// Borrow the rate-limit outcome behind a rejection.
    pub fn rate_limit_outcome(&self) -> Option<&RateLimitOutcome> {
        match self {
            Self::RateLimited(o) => Some(o),
            _ => None,
        }
    }
}

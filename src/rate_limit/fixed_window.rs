use super::{ActionType, RateLimitOutcome, RateLimitPolicy};
use crate::adaptive::DynamicConfig;
use crate::clock::{Clock, SystemClock};
use crate::error::{Component, GuardError, ValidationError};
use crate::store::{StoreError, WindowStore};
use crate::telemetry::{GuardEvent, RateLimitEvent, Telemetry, TelemetrySink};
use std::sync::Arc;
use std::time::Duration;

/// Fixed-window rate limiter keyed by `(subject, action)`.
///
/// Per key the window is either absent or active with `(count, window_start)`.
/// A window whose `window_start + window` lies in the past is treated as
/// absent before any read or write. Clones share the same store and policy.
///
/// Storage failures fail closed: the caller is told it is limited.
#[derive(Debug, Clone)]
pub struct RateLimiter<S> {
    store: Arc<S>,
    policy: DynamicConfig<RateLimitPolicy>,
    clock: Arc<dyn Clock>,
    telemetry: Telemetry,
}

impl<S> RateLimiter<S>
where
    S: WindowStore + 'static,
{
    /// Create a limiter backed by `store`, validating the policy table.
    pub fn new(store: Arc<S>, policy: RateLimitPolicy) -> Result<Self, ValidationError> {
        policy.validate()?;
        Ok(Self {
            store,
            policy: DynamicConfig::new(policy),
            clock: Arc::new(SystemClock),
            telemetry: Telemetry::null(),
        })
    }

    /// Override the clock (useful for deterministic tests).
    pub fn with_clock<C: Clock + 'static>(mut self, clock: C) -> Self {
        self.clock = Arc::new(clock);
        self
    }

    /// Attach a telemetry sink.
    pub fn with_telemetry<T>(mut self, sink: T) -> Self
    where
        T: TelemetrySink,
        T::Future: Send + 'static,
    {
        self.telemetry = Telemetry::new(sink);
        self
    }

    /// Current policy snapshot.
    pub fn policy(&self) -> Arc<RateLimitPolicy> {
        self.policy.get()
    }

    /// Swap the policy at runtime; all clones observe the change.
    pub fn set_policy(&self, policy: RateLimitPolicy) -> Result<(), ValidationError> {
        policy.validate()?;
        self.policy.set(policy);
        Ok(())
    }

    /// Consume one unit for `(subject_id, action)` if the tier limit allows.
    ///
    /// On success `remaining = limit - count` after the increment. On
    /// exhaustion nothing is mutated and `remaining = 0`. Storage errors are
    /// logged as resource-protection failures and reported as exhaustion.
    pub async fn check_and_consume(
        &self,
        subject_id: &str,
        action: ActionType,
        is_premium: bool,
    ) -> Result<RateLimitOutcome, GuardError> {
        match self.consume(subject_id, action, is_premium).await {
            Err(GuardError::ProtectionFailure { .. }) => {
                Ok(self.closed_outcome(action, is_premium))
            }
            other => other,
        }
    }

    /// [`check_and_consume`](Self::check_and_consume) for an action given by name.
    pub async fn check_and_consume_named(
        &self,
        subject_id: &str,
        action: &str,
        is_premium: bool,
    ) -> Result<RateLimitOutcome, GuardError> {
        let action: ActionType = action.parse()?;
        self.check_and_consume(subject_id, action, is_premium).await
    }

    /// Like [`check_and_consume`](Self::check_and_consume), but exhaustion and
    /// storage failures are returned as errors.
    pub async fn acquire(
        &self,
        subject_id: &str,
        action: ActionType,
        is_premium: bool,
    ) -> Result<RateLimitOutcome, GuardError> {
        let outcome = self.consume(subject_id, action, is_premium).await?;
        if outcome.success {
            Ok(outcome)
        } else {
            Err(GuardError::RateLimited(outcome))
        }
    }

    /// Report what a consume would see, without mutating anything.
    pub async fn peek(
        &self,
        subject_id: &str,
        action: ActionType,
        is_premium: bool,
    ) -> Result<RateLimitOutcome, GuardError> {
        validate_subject(subject_id)?;
        let limits = self.policy.get().limits(action);
        let limit = limits.for_tier(is_premium);
        let now = self.clock.now_millis();

        match self.store.get(subject_id, action).await {
            Ok(Some(window)) if !window.is_expired(now) => Ok(RateLimitOutcome {
                success: window.count < limit,
                remaining: limit.saturating_sub(window.count),
                reset_in: Duration::from_millis(window.reset_in_millis(now)),
                limit,
            }),
            Ok(_) => Ok(RateLimitOutcome {
                success: true,
                remaining: limit,
                reset_in: limits.window,
                limit,
            }),
            Err(e) => {
                self.protection_failure("peek", &e).await;
                Ok(self.closed_outcome(action, is_premium))
            }
        }
    }

    /// Administrative clear of one window, or every window of the subject.
    pub async fn reset(
        &self,
        subject_id: &str,
        action: Option<ActionType>,
    ) -> Result<usize, GuardError> {
        validate_subject(subject_id)?;
        match self.store.remove(subject_id, action).await {
            Ok(removed) => {
                tracing::info!(
                    target: "meterguard::rate_limit",
                    subject = subject_id,
                    action = ?action,
                    removed,
                    "rate limit windows reset"
                );
                Ok(removed)
            }
            Err(e) => Err(self.protection_failure("reset", &e).await),
        }
    }

    /// Delete windows stale by more than one full window.
    pub async fn sweep_stale(&self) -> Result<usize, GuardError> {
        let now = self.clock.now_millis();
        match self.store.remove_stale(now).await {
            Ok(removed) => {
                tracing::debug!(target: "meterguard::rate_limit", removed, "stale windows swept");
                self.telemetry.emit(GuardEvent::RateLimit(RateLimitEvent::Swept { removed })).await;
                Ok(removed)
            }
            Err(e) => Err(self.protection_failure("sweep", &e).await),
        }
    }

    async fn consume(
        &self,
        subject_id: &str,
        action: ActionType,
        is_premium: bool,
    ) -> Result<RateLimitOutcome, GuardError> {
        validate_subject(subject_id)?;
        let limits = self.policy.get().limits(action);
        let limit = limits.for_tier(is_premium);
        let now = self.clock.now_millis();

        let consumed =
            match self.store.consume(subject_id, action, limit, limits.window_millis(), now).await {
                Ok(consumed) => consumed,
                Err(e) => return Err(self.protection_failure("consume", &e).await),
            };

        let reset_in = Duration::from_millis(consumed.window.reset_in_millis(now));
        if consumed.consumed {
            let remaining = limit.saturating_sub(consumed.window.count);
            self.telemetry
                .emit(GuardEvent::RateLimit(RateLimitEvent::Consumed { action, remaining }))
                .await;
            Ok(RateLimitOutcome { success: true, remaining, reset_in, limit })
        } else {
            tracing::debug!(
                target: "meterguard::rate_limit",
                subject = subject_id,
                action = %action,
                limit,
                reset_in_ms = reset_in.as_millis() as u64,
                "rate limit exhausted"
            );
            self.telemetry
                .emit(GuardEvent::RateLimit(RateLimitEvent::Rejected { action, reset_in }))
                .await;
            Ok(RateLimitOutcome { success: false, remaining: 0, reset_in, limit })
        }
    }

    fn closed_outcome(&self, action: ActionType, is_premium: bool) -> RateLimitOutcome {
        let limits = self.policy.get().limits(action);
        RateLimitOutcome {
            success: false,
            remaining: 0,
            reset_in: limits.window,
            limit: limits.for_tier(is_premium),
        }
    }

    async fn protection_failure(&self, op: &'static str, err: &StoreError) -> GuardError {
        tracing::error!(
            target: "meterguard::rate_limit",
            alert = "resource_protection_failure",
            component = %Component::RateLimiter,
            op,
            error = %err,
            "window store failed; treating caller as limited"
        );
        self.telemetry
            .emit(GuardEvent::ProtectionFailure { component: Component::RateLimiter })
            .await;
        GuardError::ProtectionFailure {
            component: Component::RateLimiter,
            message: err.to_string(),
        }
    }
}

fn validate_subject(subject_id: &str) -> Result<(), ValidationError> {
    if subject_id.trim().is_empty() {
        Err(ValidationError::EmptySubject)
    } else {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::rate_limit::ActionLimits;
    use crate::store::InMemoryStore;
    use crate::telemetry::MemorySink;

    fn limiter(clock: &ManualClock) -> RateLimiter<InMemoryStore> {
        RateLimiter::new(Arc::new(InMemoryStore::new()), RateLimitPolicy::default())
            .expect("valid policy")
            .with_clock(clock.clone())
    }

    #[tokio::test]
    async fn consumes_until_limit_then_rejects() {
        let clock = ManualClock::at(1_000);
        let limiter = limiter(&clock);
        let limit = limiter.policy().limits(ActionType::BroadcastStart).free;

        for expected_remaining in (0..limit).rev() {
            let outcome = limiter
                .check_and_consume("u1", ActionType::BroadcastStart, false)
                .await
                .unwrap();
            assert!(outcome.success);
            assert_eq!(outcome.remaining, expected_remaining);
            assert_eq!(outcome.limit, limit);
        }

        let denied =
            limiter.check_and_consume("u1", ActionType::BroadcastStart, false).await.unwrap();
        assert!(!denied.success);
        assert_eq!(denied.remaining, 0);
        assert_eq!(denied.reset_in, Duration::from_secs(86_400));
    }

    #[tokio::test]
    async fn window_resets_after_duration() {
        let clock = ManualClock::at(0);
        let limiter = limiter(&clock);
        let limits = limiter.policy().limits(ActionType::PostCreate);

        for _ in 0..limits.free {
            assert!(limiter.check_and_consume("u1", ActionType::PostCreate, false).await.unwrap().success);
        }
        assert!(!limiter.check_and_consume("u1", ActionType::PostCreate, false).await.unwrap().success);

        // Exactly at the boundary the window is still active.
        clock.advance(limits.window);
        assert!(!limiter.check_and_consume("u1", ActionType::PostCreate, false).await.unwrap().success);

        clock.advance(Duration::from_millis(1));
        let outcome = limiter.check_and_consume("u1", ActionType::PostCreate, false).await.unwrap();
        assert!(outcome.success);
        assert_eq!(outcome.remaining, limits.free - 1);
        assert_eq!(outcome.reset_in, limits.window);
    }

    #[tokio::test]
    async fn premium_tier_gets_premium_limit() {
        let clock = ManualClock::at(0);
        let limiter = limiter(&clock);
        let limits = limiter.policy().limits(ActionType::AiChat);
        let outcome = limiter.check_and_consume("vip", ActionType::AiChat, true).await.unwrap();
        assert_eq!(outcome.limit, limits.premium);
        assert_eq!(outcome.remaining, limits.premium - 1);
    }

    #[tokio::test]
    async fn subjects_and_actions_are_isolated() {
        let clock = ManualClock::at(0);
        let limiter = limiter(&clock);
        limiter.check_and_consume("u1", ActionType::MediaUpload, false).await.unwrap();
        let other_subject = limiter.peek("u2", ActionType::MediaUpload, false).await.unwrap();
        let other_action = limiter.peek("u1", ActionType::CommentCreate, false).await.unwrap();
        assert_eq!(other_subject.remaining, other_subject.limit);
        assert_eq!(other_action.remaining, other_action.limit);
    }

    #[tokio::test]
    async fn peek_never_mutates() {
        let clock = ManualClock::at(0);
        let limiter = limiter(&clock);
        limiter.check_and_consume("u1", ActionType::AiChat, false).await.unwrap();
        for _ in 0..5 {
            let peeked = limiter.peek("u1", ActionType::AiChat, false).await.unwrap();
            assert_eq!(peeked.remaining, peeked.limit - 1);
        }
        clock.advance(Duration::from_secs(3_601));
        let expired = limiter.peek("u1", ActionType::AiChat, false).await.unwrap();
        assert!(expired.success);
        assert_eq!(expired.remaining, expired.limit);
    }

    #[tokio::test]
    async fn reset_clears_windows() {
        let clock = ManualClock::at(0);
        let limiter = limiter(&clock);
        limiter.check_and_consume("u1", ActionType::AiChat, false).await.unwrap();
        limiter.check_and_consume("u1", ActionType::PostCreate, false).await.unwrap();
        assert_eq!(limiter.reset("u1", Some(ActionType::AiChat)).await.unwrap(), 1);
        assert_eq!(limiter.reset("u1", None).await.unwrap(), 1);
        assert_eq!(limiter.reset("u1", None).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn sweep_removes_only_stale_windows() {
        let clock = ManualClock::at(0);
        let sink = MemorySink::new();
        let limiter = limiter(&clock).with_telemetry(sink.clone());
        limiter.check_and_consume("old", ActionType::ApiCall, false).await.unwrap();
        clock.advance(Duration::from_secs(90));
        limiter.check_and_consume("new", ActionType::ApiCall, false).await.unwrap();

        // "old" opened at 0 with a 60s window: stale after 120s.
        clock.set(120_001);
        assert_eq!(limiter.sweep_stale().await.unwrap(), 1);
        assert!(sink
            .events()
            .contains(&GuardEvent::RateLimit(RateLimitEvent::Swept { removed: 1 })));
    }

    #[tokio::test]
    async fn rejects_invalid_inputs() {
        let clock = ManualClock::at(0);
        let limiter = limiter(&clock);
        let err = limiter.check_and_consume("  ", ActionType::AiChat, false).await.unwrap_err();
        assert!(matches!(err, GuardError::Invalid(ValidationError::EmptySubject)));
        let err = limiter.check_and_consume_named("u1", "teleport", false).await.unwrap_err();
        assert!(matches!(err, GuardError::Invalid(ValidationError::UnknownAction(_))));
        assert!(limiter.check_and_consume_named("u1", "emergency", false).await.unwrap().success);
    }

    #[tokio::test]
    async fn acquire_returns_rate_limited_error() {
        let clock = ManualClock::at(0);
        let limiter = limiter(&clock);
        limiter
            .set_policy(
                RateLimitPolicy::default()
                    .with_limits(ActionType::PostCreate, ActionLimits::new(1, 1, Duration::from_secs(60)))
                    .unwrap(),
            )
            .unwrap();
        assert!(limiter.acquire("u1", ActionType::PostCreate, false).await.is_ok());
        let err = limiter.acquire("u1", ActionType::PostCreate, false).await.unwrap_err();
        assert!(err.is_rate_limited());
        assert_eq!(err.rate_limit_outcome().map(|o| o.limit), Some(1));
    }

    #[tokio::test]
    async fn concurrent_consumers_never_overshoot() {
        let clock = ManualClock::at(0);
        let limiter = limiter(&clock);
        let limit = limiter.policy().limits(ActionType::CommentCreate).free as usize;
        let tasks = limit * 3;
        let barrier = Arc::new(tokio::sync::Barrier::new(tasks));
        let mut handles = vec![];
        for _ in 0..tasks {
            let l = limiter.clone();
            let b = barrier.clone();
            handles.push(tokio::spawn(async move {
                b.wait().await;
                l.check_and_consume("u1", ActionType::CommentCreate, false).await.unwrap().success
            }));
        }
        let successes = futures::future::join_all(handles)
            .await
            .into_iter()
            .filter(|r| *r.as_ref().expect("join error"))
            .count();
        assert_eq!(successes, limit);
    }
}

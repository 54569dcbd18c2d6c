use meterguard::config::{AdmissionConfig, UsageConfig};
use meterguard::telemetry::{AdmissionEvent, GuardEvent, MemorySink};
use meterguard::{AdmissionController, InMemoryStore, ManualClock, ReasonCode, UsageMeter};
use std::sync::Arc;

async fn controller(used: u64, limit: u64) -> AdmissionController<InMemoryStore> {
    let meter = UsageMeter::new(Arc::new(InMemoryStore::new()), UsageConfig::default())
        .with_clock(ManualClock::at(1_700_000_000_000));
    meter.update_limit(&meter.current_period(), limit).await.unwrap();
    for _ in 0..used {
        meter.increment().await.unwrap();
    }
    AdmissionController::new(meter, AdmissionConfig::default())
}

#[tokio::test]
async fn guest_is_throttled_at_85_of_100() {
    let decision = controller(85, 100).await.decide(false).await;
    assert!(!decision.allowed);
    assert_eq!(decision.reason, Some(ReasonCode::GuestThrottled));
    assert_eq!(decision.reason_label(), "GUEST_THROTTLED");
}

#[tokio::test]
async fn member_is_allowed_at_85_of_100() {
    let decision = controller(85, 100).await.decide(true).await;
    assert!(decision.allowed);
    assert_eq!(decision.reason, None);
}

#[tokio::test]
async fn exhausted_quota_denies_regardless_of_authentication() {
    let controller = controller(100, 100).await;
    for authenticated in [false, true] {
        let decision = controller.decide(authenticated).await;
        assert!(!decision.allowed);
        assert_eq!(decision.reason, Some(ReasonCode::ApiLimitReached));
        assert_eq!(decision.reason_label(), "API_LIMIT_REACHED");
    }
}

#[tokio::test]
async fn decisions_are_reported() {
    let sink = MemorySink::new();
    let controller = controller(85, 100).await.with_telemetry(sink.clone());
    controller.decide(false).await;
    controller.decide(true).await;
    assert_eq!(
        sink.events(),
        vec![
            GuardEvent::Admission(AdmissionEvent::Denied { reason: ReasonCode::GuestThrottled }),
            GuardEvent::Admission(AdmissionEvent::Allowed { authenticated: true }),
        ]
    );
}

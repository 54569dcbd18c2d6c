use meterguard::config::UsageConfig;
use meterguard::{InMemoryStore, ManualClock, UsageMeter};
use std::sync::Arc;
use tokio::sync::Barrier;

const TASKS: usize = 200;

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn concurrent_increments_are_never_lost() {
    let meter = UsageMeter::new(Arc::new(InMemoryStore::new()), UsageConfig::default())
        .with_clock(ManualClock::at(1_700_000_000_000));
    let barrier = Arc::new(Barrier::new(TASKS));

    let handles: Vec<_> = (0..TASKS)
        .map(|_| {
            let meter = meter.clone();
            let barrier = barrier.clone();
            tokio::spawn(async move {
                barrier.wait().await;
                meter.increment().await.expect("increment")
            })
        })
        .collect();

    let mut seen = Vec::with_capacity(TASKS);
    for handle in handles {
        seen.push(handle.await.expect("task panicked").used);
    }

    assert_eq!(meter.get_usage().await.unwrap().used, TASKS as u64);
    // Every increment observed a distinct post-increment value.
    seen.sort_unstable();
    assert_eq!(seen, (1..=TASKS as u64).collect::<Vec<_>>());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn meters_sharing_a_store_share_the_counter() {
    let store = Arc::new(InMemoryStore::new());
    let clock = ManualClock::at(1_700_000_000_000);
    let a = UsageMeter::new(store.clone(), UsageConfig::default()).with_clock(clock.clone());
    let b = UsageMeter::new(store, UsageConfig::default()).with_clock(clock);

    tokio::join!(
        async {
            for _ in 0..50 {
                a.increment().await.unwrap();
            }
        },
        async {
            for _ in 0..50 {
                b.increment().await.unwrap();
            }
        }
    );
    assert_eq!(a.get_usage().await.unwrap().used, 100);
}

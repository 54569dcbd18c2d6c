//! Guarded search: cache, admission control, and a rate-limited chat action.
use meterguard::telemetry::LogSink;
use meterguard::{
    ActionType, AdmissionController, ContentCache, GuardConfig, GuardError, InMemoryStore,
    RateLimiter, SearchGuard, UsageMeter,
};
use std::sync::Arc;

#[tokio::main]
async fn main() -> Result<(), GuardError<std::io::Error>> {
    tracing_subscriber::fmt().with_max_level(tracing::Level::DEBUG).init();

    let config = GuardConfig::default();
    let store = Arc::new(InMemoryStore::new());

    let cache = ContentCache::new(store.clone(), config.cache).with_telemetry(LogSink);
    let meter = UsageMeter::new(store.clone(), config.usage).with_telemetry(LogSink);
    let guard = SearchGuard::from_parts(cache, AdmissionController::new(meter, config.admission));

    for attempt in 1..=2 {
        let fetched = guard
            .fetch("Best women's shelters near me", false, |query| async move {
                Ok::<_, std::io::Error>(format!("3 results for '{query}'").into_bytes())
            })
            .await?;
        println!(
            "attempt {attempt}: cached={} payload={}",
            fetched.is_cached(),
            String::from_utf8_lossy(fetched.payload())
        );
    }

    let usage = guard.usage().await.map_err(|e| e.widen::<std::io::Error>())?;
    println!("usage {}: {}/{} ({:.1}%)", usage.period, usage.used, usage.limit, usage.percent_used);

    let limiter = RateLimiter::new(store, config.rate_limits)?.with_telemetry(LogSink);
    for attempt in 1..=4 {
        let outcome = limiter
            .check_and_consume("demo-user", ActionType::BroadcastStart, false)
            .await
            .map_err(|e| e.widen::<std::io::Error>())?;
        println!(
            "broadcast_start #{attempt}: success={} remaining={} resets in {:?}",
            outcome.success, outcome.remaining, outcome.reset_in
        );
    }

    Ok(())
}

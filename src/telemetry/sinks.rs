//! Concrete sinks. Each is a cheap-to-clone tower service over [`GuardEvent`].

use super::events::GuardEvent;
use std::collections::VecDeque;
use std::convert::Infallible;
use std::future::{ready, Ready};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};
use tower::{Service, ServiceExt};

/// Anything that can receive guard events.
pub trait TelemetrySink:
    Service<GuardEvent, Response = (), Error = Self::SinkError> + Clone + Send + 'static
{
    type SinkError: std::error::Error + Send + Sync + 'static;
}

/// Wait for `sink` to be ready, deliver `event`, and drop any error.
pub async fn emit_best_effort<S>(sink: S, event: GuardEvent)
where
    S: Service<GuardEvent, Response = ()> + Send + Clone + 'static,
    S::Future: Send + 'static,
{
    if let Ok(mut sink) = sink.ready_oneshot().await {
        let _ = sink.call(event).await;
    }
}

/// Discards every event.
#[derive(Clone, Debug, Default)]
pub struct NullSink;

impl Service<GuardEvent> for NullSink {
    type Response = ();
    type Error = Infallible;
    type Future = Ready<Result<(), Infallible>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, _event: GuardEvent) -> Self::Future {
        ready(Ok(()))
    }
}

impl TelemetrySink for NullSink {
    type SinkError = Infallible;
}

/// Writes each event as a `tracing` record under `meterguard::telemetry`.
///
/// Protection failures are logged at `error` with the
/// `resource_protection_failure` alert; everything else at `debug`.
#[derive(Clone, Debug, Default)]
pub struct LogSink;

impl Service<GuardEvent> for LogSink {
    type Response = ();
    type Error = Infallible;
    type Future = Ready<Result<(), Infallible>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, event: GuardEvent) -> Self::Future {
        match &event {
            GuardEvent::ProtectionFailure { component } => tracing::error!(
                target: "meterguard::telemetry",
                alert = "resource_protection_failure",
                component = %component,
                "{event}"
            ),
            _ => tracing::debug!(target: "meterguard::telemetry", "{event}"),
        }
        ready(Ok(()))
    }
}

impl TelemetrySink for LogSink {
    type SinkError = Infallible;
}

/// Keeps the most recent events in memory, dropping the oldest past
/// `capacity`. Clones share the buffer.
#[derive(Clone, Debug)]
pub struct MemorySink {
    buffer: Arc<Mutex<VecDeque<GuardEvent>>>,
    capacity: usize,
    dropped: Arc<AtomicU64>,
}

impl MemorySink {
    /// A sink holding up to 10 000 events.
    pub fn new() -> Self {
        Self::with_capacity(10_000)
    }

    /// A sink holding up to `capacity` events (at least one).
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buffer: Arc::new(Mutex::new(VecDeque::new())),
            capacity: capacity.max(1),
            dropped: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Recorded events, oldest first. Empty if the buffer lock was poisoned.
    pub fn events(&self) -> Vec<GuardEvent> {
        self.buffer.lock().map(|b| b.iter().cloned().collect()).unwrap_or_default()
    }

    pub fn clear(&self) {
        if let Ok(mut buffer) = self.buffer.lock() {
            buffer.clear();
        }
    }

    pub fn len(&self) -> usize {
        self.buffer.lock().map(|b| b.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// How many events were pushed out by the capacity bound.
    pub fn evicted(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

impl Default for MemorySink {
    fn default() -> Self {
        Self::new()
    }
}

impl Service<GuardEvent> for MemorySink {
    type Response = ();
    type Error = Infallible;
    type Future = Ready<Result<(), Infallible>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, event: GuardEvent) -> Self::Future {
        if let Ok(mut buffer) = self.buffer.lock() {
            if buffer.len() == self.capacity {
                buffer.pop_front();
                self.dropped.fetch_add(1, Ordering::Relaxed);
            }
            buffer.push_back(event);
        }
        ready(Ok(()))
    }
}

impl TelemetrySink for MemorySink {
    type SinkError = Infallible;
}

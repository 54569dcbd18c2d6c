//! Telemetry for the protection layer.
//!
//! Components emit structured [`GuardEvent`]s through a [`Telemetry`] handle.
//! Sinks are plain `tower::Service<GuardEvent>` implementations, so they can be
//! composed with standard tower combinators.
//!
//! # Event Types
//!
//! - **Cache**: `Hit`, `Miss`, `Collision`, `Stored`, `Swept`
//! - **Usage meter**: `Incremented`, `LimitUpdated`
//! - **Admission**: `Allowed`, `Denied`
//! - **Rate limiter**: `Consumed`, `Rejected`, `Swept`
//! - **All protection components**: `ProtectionFailure`
//!
//! Emission is best effort: a sink that is not ready or errors drops the event
//! and never fails the guarded operation.
//!
//! ```rust
//! use meterguard::telemetry::{MemorySink, Telemetry, GuardEvent, CacheEvent};
//!
//! # #[tokio::main]
//! # async fn main() {
//! let sink = MemorySink::new();
//! let telemetry = Telemetry::new(sink.clone());
//! telemetry.emit(GuardEvent::Cache(CacheEvent::Swept { removed: 3 })).await;
//! assert_eq!(sink.len(), 1);
//! # }
//! ```

pub mod events;
pub mod sinks;

#[cfg(feature = "telemetry-json")]
pub use events::event_to_json;
pub use events::{AdmissionEvent, CacheEvent, GuardEvent, RateLimitEvent, UsageEvent};
pub use sinks::{emit_best_effort, LogSink, MemorySink, NullSink, TelemetrySink};

use std::fmt;
use std::sync::{Arc, Mutex};
use tower::util::BoxCloneService;
use tower::{BoxError, ServiceExt};

type BoxedSink = BoxCloneService<GuardEvent, (), BoxError>;

/// Shareable handle to a type-erased sink.
///
/// Clones share the same sink. Components default to [`NullSink`].
#[derive(Clone)]
pub struct Telemetry {
    sink: Arc<Mutex<BoxedSink>>,
}

impl Telemetry {
    /// Wrap any [`TelemetrySink`].
    pub fn new<S>(sink: S) -> Self
    where
        S: TelemetrySink,
        S::Future: Send + 'static,
    {
        let erased = sink.map_err(|e: S::SinkError| -> BoxError { Box::new(e) });
        Self { sink: Arc::new(Mutex::new(BoxCloneService::new(erased))) }
    }

    /// A handle that discards everything.
    pub fn null() -> Self {
        Self::new(NullSink)
    }

    /// Deliver one event, best effort.
    pub async fn emit(&self, event: GuardEvent) {
        let sink = match self.sink.lock() {
            Ok(guard) => guard.clone(),
            Err(_) => return,
        };
        emit_best_effort(sink, event).await;
    }
}

impl Default for Telemetry {
    fn default() -> Self {
        Self::null()
    }
}

impl fmt::Debug for Telemetry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Telemetry").field("sink", &"<boxed sink>").finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn clones_share_the_sink() {
        let sink = MemorySink::new();
        let telemetry = Telemetry::new(sink.clone());
        let other = telemetry.clone();
        telemetry.emit(GuardEvent::Cache(CacheEvent::Swept { removed: 1 })).await;
        other.emit(GuardEvent::Cache(CacheEvent::Swept { removed: 2 })).await;
        assert_eq!(sink.len(), 2);
    }

    #[tokio::test]
    async fn null_telemetry_is_silent() {
        Telemetry::default().emit(GuardEvent::Cache(CacheEvent::Swept { removed: 0 })).await;
    }
}

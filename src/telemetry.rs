//! Structured events for the observable seams of the core: admission and
//! dispatch on the [`crate::scheduler::Scheduler`], state transitions on the
//! [`crate::circuit_breaker::CircuitBreaker`], message delivery on the
//! [`crate::bus::MessageBus`], and hook failures on the
//! [`crate::hooks::HookRegistry`].
//!
//! Plain async-trait sinks rather than `tower::Service` implementations:
//! nothing here sits in a `tower` pipeline, so a `tower::Service` impl
//! would just be ceremony around a single `call`.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;

use crate::circuit_breaker::CircuitState;
use crate::intent::Intent;

fn now_millis() -> i64 {
    SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_millis() as i64).unwrap_or(0)
}

#[derive(Debug, Clone)]
pub enum CoreEvent {
    SchedulerAdmitted { priority: &'static str },
    SchedulerRejected { priority: &'static str, queue_depth: usize },
    SchedulerDispatched { priority: &'static str, wait: std::time::Duration },
    BreakerStateChanged { provider_id: String, from: CircuitState, to: CircuitState },
    DataIoFellBackToEmergencyBuffer { key: String, intent: Intent },
    BusMessageDelivered { topic: String, subscriber_count: usize },
    HookObserverPanicked { event: String, observer_index: usize },
}

impl fmt::Display for CoreEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CoreEvent::SchedulerAdmitted { priority } => write!(f, "scheduler_admitted priority={priority}"),
            CoreEvent::SchedulerRejected { priority, queue_depth } => {
                write!(f, "scheduler_rejected priority={priority} queue_depth={queue_depth}")
            }
            CoreEvent::SchedulerDispatched { priority, wait } => {
                write!(f, "scheduler_dispatched priority={priority} wait={wait:?}")
            }
            CoreEvent::BreakerStateChanged { provider_id, from, to } => {
                write!(f, "breaker_state_changed provider={provider_id} from={from:?} to={to:?}")
            }
            CoreEvent::DataIoFellBackToEmergencyBuffer { key, intent } => {
                write!(f, "data_io_emergency_buffer key={key} intent={}", intent.as_str())
            }
            CoreEvent::BusMessageDelivered { topic, subscriber_count } => {
                write!(f, "bus_message_delivered topic={topic} subscribers={subscriber_count}")
            }
            CoreEvent::HookObserverPanicked { event, observer_index } => {
                write!(f, "hook_observer_panicked event={event} observer_index={observer_index}")
            }
        }
    }
}

/// A telemetry sink that consumes [`CoreEvent`]s. `emit` is expected to be
/// cheap and non-blocking; sinks that need to do real I/O should buffer and
/// flush on their own schedule rather than stalling the caller.
#[async_trait]
pub trait TelemetrySink: Send + Sync {
    async fn emit(&self, event: CoreEvent);
}

/// Discards every event. The default for components constructed without an
/// explicit sink.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullSink;

#[async_trait]
impl TelemetrySink for NullSink {
    async fn emit(&self, _event: CoreEvent) {}
}

/// Logs every event at `info` via `tracing`.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogSink;

#[async_trait]
impl TelemetrySink for LogSink {
    async fn emit(&self, event: CoreEvent) {
        tracing::info!(event = %event, timestamp_millis = now_millis(), "core_event");
    }
}

/// Retains events in a bounded ring buffer; intended for tests and local
/// debugging, not production use.
#[derive(Clone)]
pub struct MemorySink {
    events: Arc<Mutex<Vec<CoreEvent>>>,
    capacity: usize,
    evicted: Arc<AtomicU64>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::with_capacity(1_000)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self { events: Arc::new(Mutex::new(Vec::new())), capacity: capacity.max(1), evicted: Arc::new(AtomicU64::new(0)) }
    }

    pub fn events(&self) -> Vec<CoreEvent> {
        self.events.lock().expect("memory sink poisoned").clone()
    }

    pub fn len(&self) -> usize {
        self.events.lock().expect("memory sink poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn evicted(&self) -> u64 {
        self.evicted.load(Ordering::Relaxed)
    }
}

impl Default for MemorySink {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TelemetrySink for MemorySink {
    async fn emit(&self, event: CoreEvent) {
        let mut events = self.events.lock().expect("memory sink poisoned");
        if events.len() >= self.capacity {
            events.remove(0);
            self.evicted.fetch_add(1, Ordering::Relaxed);
        }
        events.push(event);
    }
}

/// Fans an event out to every sink in the set, isolating one sink's failure
/// (a panic during `emit`) from the rest by spawning each emit on its own
/// task — the same isolation shape used by [`crate::hooks::HookRegistry`].
#[derive(Clone, Default)]
pub struct MulticastSink {
    sinks: Vec<Arc<dyn TelemetrySink>>,
}

impl MulticastSink {
    pub fn new(sinks: Vec<Arc<dyn TelemetrySink>>) -> Self {
        Self { sinks }
    }
}

#[async_trait]
impl TelemetrySink for MulticastSink {
    async fn emit(&self, event: CoreEvent) {
        let mut tasks = Vec::with_capacity(self.sinks.len());
        for sink in &self.sinks {
            let sink = sink.clone();
            let event = event.clone();
            tasks.push(tokio::spawn(async move { sink.emit(event).await }));
        }
        for task in tasks {
            if let Err(e) = task.await {
                tracing::warn!(error = %e, "telemetry sink panicked during emit");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn null_sink_discards_everything() {
        let sink = NullSink;
        sink.emit(CoreEvent::SchedulerAdmitted { priority: "high" }).await;
    }

    #[tokio::test]
    async fn memory_sink_retains_events_up_to_capacity() {
        let sink = MemorySink::with_capacity(2);
        sink.emit(CoreEvent::SchedulerAdmitted { priority: "high" }).await;
        sink.emit(CoreEvent::SchedulerAdmitted { priority: "medium" }).await;
        sink.emit(CoreEvent::SchedulerAdmitted { priority: "low" }).await;

        assert_eq!(sink.len(), 2);
        assert_eq!(sink.evicted(), 1);
    }

    #[tokio::test]
    async fn multicast_sink_delivers_to_every_member() {
        let a = Arc::new(MemorySink::new());
        let b = Arc::new(MemorySink::new());
        let multicast = MulticastSink::new(vec![a.clone(), b.clone()]);

        multicast.emit(CoreEvent::BusMessageDelivered { topic: "t".into(), subscriber_count: 2 }).await;

        assert_eq!(a.len(), 1);
        assert_eq!(b.len(), 1);
    }
}

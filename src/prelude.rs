//! Convenient re-exports of the commonly used core types.
pub use crate::{
    background_sync::{BackgroundSync, BackgroundSyncHandle},
    bus::{Message, MessageBus, MessageHandler, MessageType},
    circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitSnapshot, CircuitState},
    circuit_breaker_registry::CircuitBreakerRegistry,
    config::{BackgroundSyncConfig, BusConfig, DataIoConfig, SchedulerConfig},
    data_io::DataIo,
    emergency_buffer::{EmergencyBuffer, EmergencyRecord, EmergencyStore, InMemoryStore},
    error::CoreError,
    hooks::{EventContext, EventType, HookRegistry, LifecycleObserver},
    intent::{Intent, IntentConfig, IntentRegistry, MessagePriority, TaskPriority},
    provider::{DiskProvider, MemoryProvider, Provider, ProviderError},
    scheduler::{GatherPolicy, Priority, Scheduler, SchedulerStats, SubmittedRequest},
    system_status::{AlwaysGreen, CachedOracle, SystemStatus, SystemStatusOracle, ThresholdOracle},
    telemetry::{CoreEvent, LogSink, MemorySink, MulticastSink, NullSink, TelemetrySink},
};

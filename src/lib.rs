#![forbid(unsafe_code)]

//! # evox-core
//!
//! A resilient core for services that must keep taking writes and serving
//! reads when their primary storage wavers: circuit-broken providers with
//! fallback and emergency-buffered writes, an intent-driven policy layer
//! that decides caching/consistency/masking per write, a three-priority
//! admission-controlled task scheduler, and a priority message bus with
//! request/reply correlation.
//!
//! ## Features
//!
//! - **Data intents** (`Critical`/`Standard`/`Ephemeral`/`Sensitive`/`Lazy`) drive
//!   caching, consistency, masking, and fallback policy per write
//! - **Circuit breakers** with half-open recovery, registered per provider id
//! - **Resilient data I/O** across primary/fallback providers with an emergency
//!   buffer of last resort and a background sync loop that drains it
//! - **Priority scheduler** with admission control and per-priority worker pools
//! - **Priority message bus** with strict-priority dispatch and request/reply
//! - **Lifecycle hooks** for service init, dispatch, data I/O errors, and system stress
//! - **Lock-free circuit-breaker state** using atomics
//!
//! ## Quick Start
//!
//! ```rust
//! use std::sync::Arc;
//! use evox_core::{DataIo, DataIoConfig, Intent, MemoryProvider};
//! use serde_json::json;
//!
//! #[tokio::main]
//! async fn main() {
//!     let primary = Arc::new(MemoryProvider::new("primary"));
//!     let data_io = DataIo::new(primary, DataIoConfig::default());
//!
//!     data_io.write("session:42", &json!({"user": "alice"}), Intent::Critical).await;
//!     let value = data_io.read("session:42", Intent::Critical).await;
//!     assert!(value.is_some());
//! }
//! ```

mod background_sync;
mod bus;
mod circuit_breaker;
mod circuit_breaker_registry;
mod clock;
mod config;
mod data_io;
mod emergency_buffer;
mod error;
mod hooks;
mod intent;
mod provider;
mod scheduler;
mod system_status;
mod telemetry;

// Re-exports
pub use background_sync::{BackgroundSync, BackgroundSyncHandle};
pub use bus::{Message, MessageBus, MessageHandler, MessageType};
pub use circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitSnapshot, CircuitState};
pub use circuit_breaker_registry::CircuitBreakerRegistry;
pub use clock::{Clock, MonotonicClock};
pub use config::{BackgroundSyncConfig, BusConfig, DataIoConfig, PriorityLimits, SchedulerConfig};
pub use data_io::DataIo;
pub use emergency_buffer::{EmergencyBuffer, EmergencyRecord, EmergencyStore, InMemoryStore};
pub use error::{BoxCoreError, CoreError};
pub use hooks::{EventContext, EventType, HookRegistry, LifecycleObserver};
pub use intent::{Intent, IntentConfig, IntentRegistry, MessagePriority, TaskPriority};
pub use provider::{DiskProvider, MemoryProvider, Provider, ProviderError, ProviderProperties};
pub use scheduler::{GatherPolicy, Priority, Scheduler, SchedulerStats, SubmittedRequest};
pub use system_status::{AlwaysGreen, CachedOracle, SystemStatus, SystemStatusOracle, ThresholdOracle};
pub use telemetry::{CoreEvent, LogSink, MemorySink, MulticastSink, NullSink, TelemetrySink};

pub mod prelude;

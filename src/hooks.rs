//! Lifecycle observer registry.
//!
//! Grounded on `evox/core/infrastructure/lifecycle.py`'s
//! `LifecycleHookManager`: subscribe/unsubscribe per event type, fan out to
//! every observer concurrently on trigger, isolate a raising observer from
//! its siblings, and track which `service_name` subscribed to which event
//! types for debugging. Handlers are `async_trait` objects rather than a
//! sync/async split — Rust has no meaningful runtime distinction between
//! the two at the trait-object level the way Python's
//! `iscoroutinefunction` check does.

use async_trait::async_trait;
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::system_status::SystemStatus;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventType {
    OnServiceInit,
    PreDispatch,
    PostDispatch,
    OnDataIoError,
    OnSystemStress,
}

/// Payload delivered to every observer of an event.
#[derive(Debug, Clone)]
pub struct EventContext {
    pub event_type: EventType,
    pub timestamp_millis: i64,
    pub service_name: Option<String>,
    pub request_info: Option<Value>,
    pub error_info: Option<Value>,
    pub system_status: Option<SystemStatus>,
    pub payload: Value,
}

impl EventContext {
    pub fn new(event_type: EventType) -> Self {
        Self {
            event_type,
            timestamp_millis: now_millis(),
            service_name: None,
            request_info: None,
            error_info: None,
            system_status: None,
            payload: Value::Null,
        }
    }

    pub fn with_service_name(mut self, name: impl Into<String>) -> Self {
        self.service_name = Some(name.into());
        self
    }

    pub fn with_payload(mut self, payload: Value) -> Self {
        self.payload = payload;
        self
    }

    pub fn with_error_info(mut self, error_info: Value) -> Self {
        self.error_info = Some(error_info);
        self
    }

    pub fn with_system_status(mut self, status: SystemStatus) -> Self {
        self.system_status = Some(status);
        self
    }
}

fn now_millis() -> i64 {
    SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_millis() as i64).unwrap_or(0)
}

/// A lifecycle observer. Implementations that do no `.await` in `handle`
/// behave exactly like a plain synchronous handler.
#[async_trait]
pub trait LifecycleObserver: Send + Sync {
    async fn handle(&self, ctx: &EventContext);
}

#[async_trait]
impl<F> LifecycleObserver for F
where
    F: Fn(&EventContext) + Send + Sync,
{
    async fn handle(&self, ctx: &EventContext) {
        (self)(ctx)
    }
}

struct Subscription {
    id: u64,
    service_name: Option<String>,
    observer: Arc<dyn LifecycleObserver>,
}

#[derive(Default)]
struct RegistryState {
    observers: HashMap<EventType, Vec<Subscription>>,
    service_subscriptions: HashMap<String, HashSet<EventType>>,
}

/// Process-wide (or per-service, if you construct several) event fan-out
/// point. Cheap to clone (shared `Arc` state).
#[derive(Clone)]
pub struct HookRegistry {
    state: Arc<Mutex<RegistryState>>,
    next_id: Arc<AtomicU64>,
}

impl Default for HookRegistry {
    fn default() -> Self {
        Self::new()
    }
}

pub struct SubscriptionHandle {
    pub event_type: EventType,
    pub id: u64,
}

impl HookRegistry {
    pub fn new() -> Self {
        Self { state: Arc::new(Mutex::new(RegistryState::default())), next_id: Arc::new(AtomicU64::new(1)) }
    }

    pub fn subscribe(
        &self,
        event_type: EventType,
        observer: Arc<dyn LifecycleObserver>,
        service_name: Option<&str>,
    ) -> SubscriptionHandle {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let mut state = self.state.lock().expect("hook registry poisoned");
        state
            .observers
            .entry(event_type)
            .or_default()
            .push(Subscription { id, service_name: service_name.map(String::from), observer });
        if let Some(name) = service_name {
            state.service_subscriptions.entry(name.to_string()).or_default().insert(event_type);
        }
        SubscriptionHandle { event_type, id }
    }

    pub fn unsubscribe(&self, handle: &SubscriptionHandle) -> bool {
        let mut state = self.state.lock().expect("hook registry poisoned");
        match state.observers.get_mut(&handle.event_type) {
            Some(subs) => {
                let before = subs.len();
                subs.retain(|s| s.id != handle.id);
                before != subs.len()
            }
            None => false,
        }
    }

    /// Fans out to every observer of `ctx.event_type` concurrently.
    /// A raising/panicking observer is isolated via `catch_unwind`-free
    /// `JoinError` capture (spawned tasks) so it never takes down its
    /// siblings.
    pub async fn trigger(&self, event_type: EventType, ctx: EventContext) {
        let observers: Vec<Arc<dyn LifecycleObserver>> = {
            let state = self.state.lock().expect("hook registry poisoned");
            match state.observers.get(&event_type) {
                Some(subs) => subs.iter().map(|s| s.observer.clone()).collect(),
                None => return,
            }
        };
        if observers.is_empty() {
            return;
        }

        let ctx = Arc::new(ctx);
        let mut tasks = Vec::with_capacity(observers.len());
        for observer in observers {
            let ctx = ctx.clone();
            tasks.push(tokio::spawn(async move { observer.handle(&ctx).await }));
        }
        for (idx, task) in tasks.into_iter().enumerate() {
            if let Err(e) = task.await {
                tracing::warn!(event = ?event_type, observer_index = idx, error = %e, "lifecycle observer panicked");
            }
        }
    }

    /// Convenience wrapper for firing a single event with a bare payload,
    /// skipping the rest of [`EventContext`]'s builder methods.
    pub async fn trigger_simple(&self, event_type: EventType, payload: Value) {
        self.trigger(event_type, EventContext::new(event_type).with_payload(payload)).await;
    }

    pub fn service_subscriptions(&self, service_name: &str) -> HashSet<EventType> {
        self.state
            .lock()
            .expect("hook registry poisoned")
            .service_subscriptions
            .get(service_name)
            .cloned()
            .unwrap_or_default()
    }

    pub fn all_service_subscriptions(&self) -> HashMap<String, HashSet<EventType>> {
        self.state.lock().expect("hook registry poisoned").service_subscriptions.clone()
    }
}

//! Keyed lookup table of per-provider circuit breakers.
//!
//! Same `Mutex<HashMap<String, _>>` registry shape used elsewhere for
//! keyed lookup tables, with a register/get/reset surface over
//! [`CircuitBreaker`].

use crate::circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitSnapshot};
use std::collections::HashMap;
use std::sync::Mutex;

/// Owns one [`CircuitBreaker`] per provider id. `DataIO` holds one of these;
/// it is also the handle operators use to inspect or reset a stuck breaker.
#[derive(Default)]
pub struct CircuitBreakerRegistry {
    inner: Mutex<HashMap<String, CircuitBreaker>>,
}

impl CircuitBreakerRegistry {
    pub fn new() -> Self {
        Self { inner: Mutex::new(HashMap::new()) }
    }

    /// Returns the breaker for `provider_id`, creating one with `config` on
    /// first access. Idempotent: a later call with a different `config` for
    /// an already-registered id is ignored (the existing breaker is kept).
    pub fn get_or_register(&self, provider_id: &str, config: CircuitBreakerConfig) -> CircuitBreaker {
        let mut guard = self.inner.lock().expect("circuit breaker registry mutex poisoned");
        guard
            .entry(provider_id.to_string())
            .or_insert_with(|| CircuitBreaker::new(provider_id.to_string(), config))
            .clone()
    }

    pub fn get(&self, provider_id: &str) -> Option<CircuitBreaker> {
        self.inner.lock().expect("circuit breaker registry mutex poisoned").get(provider_id).cloned()
    }

    /// Resets a named breaker to `Closed`. Returns `false` if no breaker is
    /// registered under that id.
    pub fn reset(&self, provider_id: &str) -> bool {
        match self.get(provider_id) {
            Some(cb) => {
                cb.reset();
                true
            }
            None => false,
        }
    }

    /// A point-in-time snapshot of every registered breaker, for operator
    /// dashboards / health endpoints.
    pub fn snapshot(&self) -> HashMap<String, CircuitSnapshot> {
        self.inner
            .lock()
            .expect("circuit breaker registry mutex poisoned")
            .iter()
            .map(|(id, cb)| (id.clone(), cb.snapshot()))
            .collect()
    }
}

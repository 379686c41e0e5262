//! The environmental "system status" oracle consulted by `DataIO`'s write
//! decision table.
//!
//! Grounded on `evox/core/intelligence.py`'s `SystemMonitor`: it samples
//! CPU/memory, caches the result for one second, and reduces the two
//! numbers to a single load factor via `max(cpu_load, memory_load)`. The
//! exact GREEN/YELLOW/RED threshold file referenced by
//! `data_io.py` (`..monitoring.intelligence.environmental_intelligence`)
//! was not present in the retrieved source, so the threshold mapping below
//! is authored directly as a single function returning a three-valued
//! status, cacheable for one second.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use crate::clock::{Clock, MonotonicClock};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SystemStatus {
    Green,
    Yellow,
    Red,
}

/// Source of truth for system load. Implementations are expected to be
/// cheap and side-effect-free; expensive probes should be wrapped in
/// [`CachedOracle`].
pub trait SystemStatusOracle: Send + Sync {
    fn status(&self) -> SystemStatus;
}

/// Reduces an externally-supplied load factor in `[0.0, 1.0]` to a
/// tri-state status. `load_factor` is expected to already be
/// `max(cpu_load, memory_load)`.
pub struct ThresholdOracle {
    load_factor: Box<dyn Fn() -> f64 + Send + Sync>,
    yellow_at: f64,
    red_at: f64,
}

impl ThresholdOracle {
    pub fn new(load_factor: impl Fn() -> f64 + Send + Sync + 'static) -> Self {
        Self { load_factor: Box::new(load_factor), yellow_at: 0.7, red_at: 0.9 }
    }

    pub fn with_thresholds(mut self, yellow_at: f64, red_at: f64) -> Self {
        self.yellow_at = yellow_at;
        self.red_at = red_at;
        self
    }
}

impl SystemStatusOracle for ThresholdOracle {
    fn status(&self) -> SystemStatus {
        let load = (self.load_factor)();
        if load >= self.red_at {
            SystemStatus::Red
        } else if load >= self.yellow_at {
            SystemStatus::Yellow
        } else {
            SystemStatus::Green
        }
    }
}

/// Always reports `Green`. The default when no oracle is wired in.
pub struct AlwaysGreen;

impl SystemStatusOracle for AlwaysGreen {
    fn status(&self) -> SystemStatus {
        SystemStatus::Green
    }
}

/// Memoizes any oracle for `cache_duration` (default 1s).
pub struct CachedOracle<O: SystemStatusOracle> {
    inner: O,
    cache_duration: Duration,
    clock: Box<dyn Clock>,
    cached: Mutex<SystemStatus>,
    cached_at_millis: AtomicU64,
}

impl<O: SystemStatusOracle> CachedOracle<O> {
    pub fn new(inner: O) -> Self {
        Self {
            inner,
            cache_duration: Duration::from_secs(1),
            clock: Box::new(MonotonicClock::default()),
            cached: Mutex::new(SystemStatus::Green),
            cached_at_millis: AtomicU64::new(0),
        }
    }

    pub fn with_cache_duration(mut self, duration: Duration) -> Self {
        self.cache_duration = duration;
        self
    }

    pub fn with_clock(mut self, clock: impl Clock + 'static) -> Self {
        self.clock = Box::new(clock);
        self
    }
}

impl<O: SystemStatusOracle> SystemStatusOracle for CachedOracle<O> {
    fn status(&self) -> SystemStatus {
        let now = self.clock.now_millis();
        let cached_at = self.cached_at_millis.load(Ordering::Acquire);
        if now.saturating_sub(cached_at) < self.cache_duration.as_millis() as u64 && cached_at != 0 {
            return *self.cached.lock().expect("system status cache poisoned");
        }
        let fresh = self.inner.status();
        *self.cached.lock().expect("system status cache poisoned") = fresh;
        self.cached_at_millis.store(now.max(1), Ordering::Release);
        fresh
    }
}

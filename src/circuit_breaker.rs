//! Per-provider circuit breaker: a lock-free three-state machine guarding
//! calls to a potentially-failing storage backend.
//!
//! Atomics-based state machine with CAS-driven transitions, generalized so
//! each instance is tagged with the `provider_id` it guards, which
//! [`crate::circuit_breaker_registry::CircuitBreakerRegistry`] uses as its
//! lookup key.

use crate::clock::{Clock, MonotonicClock};
use crate::error::CoreError;
use std::future::Future;
use std::sync::atomic::{AtomicU64, AtomicU8, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

const STATE_CLOSED: u8 = 0;
const STATE_OPEN: u8 = 1;
const STATE_HALF_OPEN: u8 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    pub failure_threshold: usize,
    pub recovery_timeout: Duration,
    pub half_open_max_calls: usize,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self { failure_threshold: 3, recovery_timeout: Duration::from_secs(30), half_open_max_calls: 1 }
    }
}

impl CircuitBreakerConfig {
    pub fn disabled() -> Self {
        Self {
            failure_threshold: usize::MAX,
            recovery_timeout: Duration::from_secs(0),
            half_open_max_calls: usize::MAX,
        }
    }
}

/// A point-in-time view of a breaker, for operator inspection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CircuitSnapshot {
    pub state: CircuitState,
    pub failure_count: usize,
}

struct Inner {
    state: AtomicU8,
    failure_count: AtomicUsize,
    opened_at_millis: AtomicU64,
    half_open_calls: AtomicUsize,
}

/// Guards calls to a single provider. Clone is cheap (shared `Arc` state).
#[derive(Clone)]
pub struct CircuitBreaker {
    provider_id: Arc<str>,
    inner: Arc<Inner>,
    config: CircuitBreakerConfig,
    clock: Arc<dyn Clock>,
}

impl CircuitBreaker {
    pub fn new(provider_id: impl Into<Arc<str>>, config: CircuitBreakerConfig) -> Self {
        Self {
            provider_id: provider_id.into(),
            inner: Arc::new(Inner {
                state: AtomicU8::new(STATE_CLOSED),
                failure_count: AtomicUsize::new(0),
                opened_at_millis: AtomicU64::new(0),
                half_open_calls: AtomicUsize::new(0),
            }),
            config,
            clock: Arc::new(MonotonicClock::default()),
        }
    }

    pub fn with_clock<C: Clock + 'static>(mut self, clock: C) -> Self {
        self.clock = Arc::new(clock);
        self
    }

    pub fn provider_id(&self) -> &str {
        &self.provider_id
    }

    pub fn snapshot(&self) -> CircuitSnapshot {
        let state = match self.inner.state.load(Ordering::Acquire) {
            STATE_CLOSED => CircuitState::Closed,
            STATE_OPEN => CircuitState::Open,
            STATE_HALF_OPEN => CircuitState::HalfOpen,
            _ => unreachable!("invalid circuit breaker state"),
        };
        CircuitSnapshot { state, failure_count: self.inner.failure_count.load(Ordering::Acquire) }
    }

    /// Non-mutating peek used by `DataIO`'s `Healthy(P)` predicate: true
    /// unless the breaker is `Open` and the recovery timeout has not yet
    /// elapsed. Does not consume a half-open probe slot.
    pub fn allows_request(&self) -> bool {
        match self.inner.state.load(Ordering::Acquire) {
            STATE_OPEN => {
                let opened_at = self.inner.opened_at_millis.load(Ordering::Acquire);
                let elapsed = self.now_millis().saturating_sub(opened_at);
                elapsed >= self.config.recovery_timeout.as_millis() as u64
            }
            _ => true,
        }
    }

    /// Reset to `Closed` with a zeroed failure count. Used by operators via
    /// `CircuitBreakerRegistry::reset` and by tests.
    pub fn reset(&self) {
        self.inner.state.store(STATE_CLOSED, Ordering::Release);
        self.inner.failure_count.store(0, Ordering::Release);
        self.inner.opened_at_millis.store(0, Ordering::Release);
        self.inner.half_open_calls.store(0, Ordering::Release);
    }

    pub async fn execute<T, E, Fut, Op>(&self, mut operation: Op) -> Result<T, CoreError<E>>
    where
        T: Send,
        Fut: Future<Output = Result<T, E>> + Send,
        Op: FnMut() -> Fut + Send,
    {
        loop {
            let current_state = self.inner.state.load(Ordering::Acquire);
            match current_state {
                STATE_OPEN => {
                    let opened_at = self.inner.opened_at_millis.load(Ordering::Acquire);
                    let elapsed = self.now_millis().saturating_sub(opened_at);
                    if elapsed >= self.config.recovery_timeout.as_millis() as u64 {
                        match self.inner.state.compare_exchange(
                            STATE_OPEN,
                            STATE_HALF_OPEN,
                            Ordering::AcqRel,
                            Ordering::Acquire,
                        ) {
                            Ok(_) => {
                                tracing::info!(provider = %self.provider_id, "circuit breaker -> half-open");
                                self.inner.half_open_calls.store(1, Ordering::Release);
                                break;
                            }
                            Err(STATE_HALF_OPEN) => continue,
                            Err(STATE_CLOSED) => break,
                            Err(_) => unreachable!("invalid state transition"),
                        }
                    } else {
                        return Err(CoreError::ProviderUnavailable {
                            provider_id: self.provider_id.to_string(),
                        });
                    }
                }
                STATE_HALF_OPEN => {
                    let current = self.inner.half_open_calls.fetch_add(1, Ordering::AcqRel);
                    if current >= self.config.half_open_max_calls {
                        self.inner.half_open_calls.fetch_sub(1, Ordering::Release);
                        return Err(CoreError::ProviderUnavailable {
                            provider_id: self.provider_id.to_string(),
                        });
                    }
                    break;
                }
                STATE_CLOSED => break,
                _ => unreachable!("invalid circuit breaker state"),
            }
        }

        let was_half_open = self.inner.state.load(Ordering::Acquire) == STATE_HALF_OPEN;
        let result = operation().await;

        if was_half_open {
            self.inner.half_open_calls.fetch_sub(1, Ordering::Release);
        }

        match &result {
            Ok(_) => self.on_success(),
            Err(_) => self.on_failure(),
        }

        result.map_err(|e| CoreError::ProviderFailure {
            provider_id: self.provider_id.to_string(),
            source: Box::new(e),
        })
    }

    fn on_success(&self) {
        match self.inner.state.load(Ordering::Acquire) {
            STATE_HALF_OPEN => {
                if self
                    .inner
                    .state
                    .compare_exchange(STATE_HALF_OPEN, STATE_CLOSED, Ordering::AcqRel, Ordering::Acquire)
                    .is_ok()
                {
                    self.inner.failure_count.store(0, Ordering::Release);
                    self.inner.opened_at_millis.store(0, Ordering::Release);
                    tracing::info!(provider = %self.provider_id, "circuit breaker -> closed");
                }
            }
            STATE_CLOSED => self.inner.failure_count.store(0, Ordering::Release),
            _ => {}
        }
    }

    fn on_failure(&self) {
        let current = self.inner.state.load(Ordering::Acquire);
        let failures = self.inner.failure_count.fetch_add(1, Ordering::AcqRel) + 1;

        match current {
            STATE_HALF_OPEN => {
                if self
                    .inner
                    .state
                    .compare_exchange(STATE_HALF_OPEN, STATE_OPEN, Ordering::AcqRel, Ordering::Acquire)
                    .is_ok()
                {
                    self.inner.opened_at_millis.store(self.now_millis(), Ordering::Release);
                    tracing::warn!(provider = %self.provider_id, failures, "circuit breaker: probe failed -> open");
                }
            }
            STATE_CLOSED => {
                if failures >= self.config.failure_threshold
                    && self
                        .inner
                        .state
                        .compare_exchange(STATE_CLOSED, STATE_OPEN, Ordering::AcqRel, Ordering::Acquire)
                        .is_ok()
                {
                    self.inner.opened_at_millis.store(self.now_millis(), Ordering::Release);
                    tracing::error!(
                        provider = %self.provider_id,
                        failures,
                        threshold = self.config.failure_threshold,
                        "circuit breaker -> open"
                    );
                }
            }
            _ => {}
        }
    }

    /// Record a failure outside of `execute` — used by `DataIO` for the
    /// "Healthy(P) but write to P raises" fallthrough row of the write
    /// decision table, where the failing call has already happened.
    pub fn record_failure(&self) {
        self.on_failure();
    }

    pub fn record_success(&self) {
        self.on_success();
    }

    fn now_millis(&self) -> u64 {
        self.clock.now_millis()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU64 as TestAtomicU64, AtomicUsize as TestAtomicUsize};

    #[derive(Debug, Clone)]
    struct ManualClock {
        now: Arc<TestAtomicU64>,
    }

    impl ManualClock {
        fn new() -> Self {
            Self { now: Arc::new(TestAtomicU64::new(0)) }
        }
        fn advance(&self, millis: u64) {
            self.now.fetch_add(millis, Ordering::SeqCst);
        }
    }

    impl Clock for ManualClock {
        fn now_millis(&self) -> u64 {
            self.now.load(Ordering::SeqCst)
        }
    }

    #[derive(Debug, Clone, PartialEq, Eq)]
    struct TestError(&'static str);

    #[tokio::test]
    async fn starts_closed_and_allows_requests() {
        let cb = CircuitBreaker::new("primary", CircuitBreakerConfig::default());
        assert_eq!(cb.snapshot().state, CircuitState::Closed);
        assert!(cb.allows_request());
        let result: Result<i32, CoreError<TestError>> =
            cb.execute(|| async { Ok::<_, TestError>(7) }).await;
        assert_eq!(result.unwrap(), 7);
    }

    #[tokio::test]
    async fn opens_after_threshold_failures() {
        let cb = CircuitBreaker::new(
            "primary",
            CircuitBreakerConfig { failure_threshold: 3, recovery_timeout: Duration::from_secs(10), half_open_max_calls: 1 },
        );
        for _ in 0..3 {
            let _: Result<(), CoreError<TestError>> =
                cb.execute(|| async { Err(TestError("boom")) }).await;
        }
        assert_eq!(cb.snapshot().state, CircuitState::Open);
        assert!(!cb.allows_request());

        let counted = Arc::new(TestAtomicUsize::new(0));
        let counted2 = counted.clone();
        let result: Result<(), CoreError<TestError>> = cb
            .execute(move || {
                let counted2 = counted2.clone();
                async move {
                    counted2.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                }
            })
            .await;
        assert!(result.unwrap_err().is_provider_unavailable());
        assert_eq!(counted.load(Ordering::SeqCst), 0, "must not invoke op while open");
    }

    #[tokio::test]
    async fn half_open_probe_closes_on_success() {
        let clock = ManualClock::new();
        let cb = CircuitBreaker::new(
            "primary",
            CircuitBreakerConfig { failure_threshold: 1, recovery_timeout: Duration::from_millis(100), half_open_max_calls: 1 },
        )
        .with_clock(clock.clone());

        let _: Result<(), CoreError<TestError>> = cb.execute(|| async { Err(TestError("x")) }).await;
        assert_eq!(cb.snapshot().state, CircuitState::Open);

        clock.advance(150);
        assert!(cb.allows_request());

        let result: Result<i32, CoreError<TestError>> = cb.execute(|| async { Ok(42) }).await;
        assert_eq!(result.unwrap(), 42);
        assert_eq!(cb.snapshot().state, CircuitState::Closed);
    }

    #[tokio::test]
    async fn half_open_probe_reopens_on_failure() {
        let clock = ManualClock::new();
        let cb = CircuitBreaker::new(
            "primary",
            CircuitBreakerConfig { failure_threshold: 1, recovery_timeout: Duration::from_millis(50), half_open_max_calls: 1 },
        )
        .with_clock(clock.clone());

        let _: Result<(), CoreError<TestError>> = cb.execute(|| async { Err(TestError("x")) }).await;
        clock.advance(60);
        let _: Result<(), CoreError<TestError>> = cb.execute(|| async { Err(TestError("y")) }).await;
        assert_eq!(cb.snapshot().state, CircuitState::Open);
    }

    #[tokio::test]
    async fn reset_returns_to_closed() {
        let cb = CircuitBreaker::new(
            "primary",
            CircuitBreakerConfig { failure_threshold: 1, recovery_timeout: Duration::from_secs(30), half_open_max_calls: 1 },
        );
        let _: Result<(), CoreError<TestError>> = cb.execute(|| async { Err(TestError("x")) }).await;
        assert_eq!(cb.snapshot().state, CircuitState::Open);
        cb.reset();
        assert_eq!(cb.snapshot().state, CircuitState::Closed);
        assert_eq!(cb.snapshot().failure_count, 0);
    }

    #[tokio::test]
    async fn disabled_breaker_never_opens() {
        let cb = CircuitBreaker::new("primary", CircuitBreakerConfig::disabled());
        for _ in 0..50 {
            let _: Result<(), CoreError<TestError>> = cb.execute(|| async { Err(TestError("x")) }).await;
        }
        assert_eq!(cb.snapshot().state, CircuitState::Closed);
    }
}

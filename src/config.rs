//! Plain, validated configuration structs for every subsystem.
//!
//! Small owned structs with sane defaults, constructed by the caller and
//! handed in, never parsed from a file by this crate — that belongs to an
//! outer config-file layer this crate doesn't own.

use crate::circuit_breaker::CircuitBreakerConfig;
use std::time::Duration;

/// Per-priority capacity for the [`crate::scheduler::Scheduler`].
#[derive(Debug, Clone, Copy)]
pub struct PriorityLimits {
    pub high: usize,
    pub medium: usize,
    pub low: usize,
}

#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    pub queue_limits: PriorityLimits,
    pub concurrency_limits: PriorityLimits,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            queue_limits: PriorityLimits { high: 50, medium: 100, low: 200 },
            concurrency_limits: PriorityLimits { high: 10, medium: 5, low: 2 },
        }
    }
}

#[derive(Debug, Clone)]
pub struct DataIoConfig {
    pub breaker: CircuitBreakerConfig,
    pub sensitive_patterns: Vec<String>,
}

impl Default for DataIoConfig {
    fn default() -> Self {
        Self {
            breaker: CircuitBreakerConfig::default(),
            sensitive_patterns: default_sensitive_patterns(),
        }
    }
}

/// Default sensitive-field name patterns, matched case-insensitively
/// against field names.
pub fn default_sensitive_patterns() -> Vec<String> {
    [
        "password", "secret", "token", "key", "auth", "credential", "ssn", "card", "cvv", "pin",
        "email", "phone", "address",
    ]
    .into_iter()
    .map(String::from)
    .collect()
}

#[derive(Debug, Clone)]
pub struct BackgroundSyncConfig {
    pub sync_interval: Duration,
}

impl Default for BackgroundSyncConfig {
    fn default() -> Self {
        Self { sync_interval: Duration::from_secs(10) }
    }
}

#[derive(Debug, Clone)]
pub struct BusConfig {
    /// Bound on the rolling error log kept in bus statistics.
    pub max_error_log_entries: usize,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self { max_error_log_entries: 100 }
    }
}

//! Unified error type for the execution core.

use std::fmt;
use std::time::Duration;

/// Unified error type for the scheduler, data I/O, and message bus.
///
/// Kept as a hand-rolled enum (rather than a `thiserror` derive) because the
/// generic `Inner(E)` variant and the `Display` impl for it need a `where`
/// bound the derive can't express cleanly.
#[derive(Debug)]
pub enum CoreError<E> {
    /// A priority queue was at capacity; the request was never admitted.
    QueueFull { priority: &'static str, limit: usize },
    /// The operation exceeded its deadline.
    Timeout { elapsed: Duration, timeout: Duration },
    /// The operation (or its waiting submitter) was cancelled before completion.
    Cancelled,
    /// The provider's circuit breaker is open, or its health probe reported false.
    ProviderUnavailable { provider_id: String },
    /// The provider's operation raised after being admitted.
    ProviderFailure { provider_id: String, source: Box<E> },
    /// The emergency buffer failed to encode or decode a record.
    SerializationError(String),
    /// A subscriber callback raised; isolated from its siblings.
    SubscriberCallbackError { subscriber_id: String, detail: String },
    /// A configuration value failed validation (e.g. an empty sensitive-field pattern).
    ValidationError(String),
}

impl<E: Clone> Clone for CoreError<E> {
    fn clone(&self) -> Self {
        match self {
            Self::QueueFull { priority, limit } => Self::QueueFull { priority, limit: *limit },
            Self::Timeout { elapsed, timeout } => {
                Self::Timeout { elapsed: *elapsed, timeout: *timeout }
            }
            Self::Cancelled => Self::Cancelled,
            Self::ProviderUnavailable { provider_id } => {
                Self::ProviderUnavailable { provider_id: provider_id.clone() }
            }
            Self::ProviderFailure { provider_id, source } => {
                Self::ProviderFailure { provider_id: provider_id.clone(), source: source.clone() }
            }
            Self::SerializationError(s) => Self::SerializationError(s.clone()),
            Self::SubscriberCallbackError { subscriber_id, detail } => {
                Self::SubscriberCallbackError { subscriber_id: subscriber_id.clone(), detail: detail.clone() }
            }
            Self::ValidationError(s) => Self::ValidationError(s.clone()),
        }
    }
}

impl<E: PartialEq> PartialEq for CoreError<E> {
    fn eq(&self, other: &Self) -> bool {
        use CoreError::*;
        match (self, other) {
            (QueueFull { priority: p1, limit: l1 }, QueueFull { priority: p2, limit: l2 }) => {
                p1 == p2 && l1 == l2
            }
            (Timeout { elapsed: a1, timeout: b1 }, Timeout { elapsed: a2, timeout: b2 }) => {
                a1 == a2 && b1 == b2
            }
            (Cancelled, Cancelled) => true,
            (ProviderUnavailable { provider_id: a }, ProviderUnavailable { provider_id: b }) => {
                a == b
            }
            (
                ProviderFailure { provider_id: p1, source: s1 },
                ProviderFailure { provider_id: p2, source: s2 },
            ) => p1 == p2 && s1 == s2,
            (SerializationError(a), SerializationError(b)) => a == b,
            (
                SubscriberCallbackError { subscriber_id: a1, detail: d1 },
                SubscriberCallbackError { subscriber_id: a2, detail: d2 },
            ) => a1 == a2 && d1 == d2,
            (ValidationError(a), ValidationError(b)) => a == b,
            _ => false,
        }
    }
}

impl<E: Eq> Eq for CoreError<E> {}

impl<E: fmt::Display> fmt::Display for CoreError<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::QueueFull { priority, limit } => {
                write!(f, "{priority} queue is full (limit {limit}); request not admitted")
            }
            Self::Timeout { elapsed, timeout } => {
                write!(f, "operation timed out after {elapsed:?} (limit: {timeout:?})")
            }
            Self::Cancelled => write!(f, "operation was cancelled"),
            Self::ProviderUnavailable { provider_id } => {
                write!(f, "provider '{provider_id}' is unavailable")
            }
            Self::ProviderFailure { provider_id, source } => {
                write!(f, "provider '{provider_id}' failed: {source}")
            }
            Self::SerializationError(detail) => write!(f, "serialization error: {detail}"),
            Self::SubscriberCallbackError { subscriber_id, detail } => {
                write!(f, "subscriber '{subscriber_id}' callback failed: {detail}")
            }
            Self::ValidationError(detail) => write!(f, "validation error: {detail}"),
        }
    }
}

impl<E: std::error::Error + 'static> std::error::Error for CoreError<E> {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::ProviderFailure { source, .. } => Some(source.as_ref()),
            _ => None,
        }
    }
}

impl<E> CoreError<E> {
    pub fn is_queue_full(&self) -> bool {
        matches!(self, Self::QueueFull { .. })
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }

    pub fn is_provider_unavailable(&self) -> bool {
        matches!(self, Self::ProviderUnavailable { .. })
    }

    pub fn is_provider_failure(&self) -> bool {
        matches!(self, Self::ProviderFailure { .. })
    }
}

/// Convenience alias for the common case where the inner provider error is
/// already type-erased (most Provider implementations box their errors).
pub type BoxCoreError = CoreError<Box<dyn std::error::Error + Send + Sync + 'static>>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;

    #[test]
    fn queue_full_display() {
        let err: CoreError<io::Error> = CoreError::QueueFull { priority: "high", limit: 50 };
        let msg = format!("{err}");
        assert!(msg.contains("high"));
        assert!(msg.contains("50"));
        assert!(err.is_queue_full());
    }

    #[test]
    fn timeout_display_and_predicate() {
        let err: CoreError<io::Error> =
            CoreError::Timeout { elapsed: Duration::from_millis(1200), timeout: Duration::from_secs(1) };
        assert!(err.is_timeout());
        assert!(format!("{err}").contains("timed out"));
    }

    #[test]
    fn provider_failure_sources_inner_error() {
        let io_err = io::Error::new(io::ErrorKind::Other, "disk full");
        let err = CoreError::ProviderFailure { provider_id: "primary".into(), source: Box::new(io_err) };
        assert!(err.is_provider_failure());
        assert_eq!(std::error::Error::source(&err).unwrap().to_string(), "disk full");
    }

    #[test]
    fn cancelled_is_unit_like() {
        let a: CoreError<io::Error> = CoreError::Cancelled;
        let b: CoreError<io::Error> = CoreError::Cancelled;
        assert_eq!(a, b);
        assert!(a.is_cancelled());
    }

    #[test]
    fn validation_error_carries_detail() {
        let err: CoreError<io::Error> = CoreError::ValidationError("empty pattern set".into());
        assert!(format!("{err}").contains("empty pattern set"));
    }
}

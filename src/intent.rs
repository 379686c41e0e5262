//! Intent tags and the configuration they resolve to.
//!
//! Grounded on `evox/core/data/intents/data_intents.py`'s `BuiltInDataIntent`
//! / `BaseIntentConfig` / `DataIntentRegistry` / `IntentResolver` split, and
//! `evox/core/intents.py`'s older `Intent` enum for the `Sensitive`/`Lazy`
//! tags the newer module folded away. Intent tags travel with the call as a
//! plain enum value, carried explicitly rather than derived by reflection
//! off a decorator.

use std::collections::HashMap;
use std::sync::RwLock;
use std::time::Duration;

/// A built-in intent tag. Custom intents are registered separately through
/// [`IntentRegistry`] and resolved by name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Intent {
    Critical,
    Standard,
    Ephemeral,
    Sensitive,
    Lazy,
}

impl Intent {
    pub fn as_str(&self) -> &'static str {
        match self {
            Intent::Critical => "critical",
            Intent::Standard => "standard",
            Intent::Ephemeral => "ephemeral",
            Intent::Sensitive => "sensitive",
            Intent::Lazy => "lazy",
        }
    }

    /// The built-in configuration for this intent. Custom intents never
    /// reach this path; see [`IntentRegistry::resolve`].
    pub fn config(&self) -> IntentConfig {
        match self {
            Intent::Critical => IntentConfig {
                cache_enabled: false,
                cache_ttl: Duration::from_secs(0),
                cache_aggressive: false,
                encrypt: true,
                strong_consistency: true,
                replication_required: true,
                audit_logging: true,
                task_priority: TaskPriority::High,
                message_priority: MessagePriority::High,
                fallback_enabled: true,
                emergency_buffer: true,
                droppable_under_stress: false,
            },
            Intent::Standard => IntentConfig {
                cache_enabled: true,
                cache_ttl: Duration::from_secs(60),
                cache_aggressive: false,
                encrypt: false,
                strong_consistency: false,
                replication_required: false,
                audit_logging: false,
                task_priority: TaskPriority::Normal,
                message_priority: MessagePriority::Normal,
                fallback_enabled: true,
                emergency_buffer: false,
                droppable_under_stress: false,
            },
            Intent::Ephemeral => IntentConfig {
                cache_enabled: true,
                cache_ttl: Duration::from_secs(300),
                cache_aggressive: true,
                encrypt: false,
                strong_consistency: false,
                replication_required: false,
                audit_logging: false,
                task_priority: TaskPriority::Low,
                message_priority: MessagePriority::Low,
                fallback_enabled: false,
                emergency_buffer: false,
                droppable_under_stress: true,
            },
            Intent::Sensitive => IntentConfig {
                cache_enabled: false,
                cache_ttl: Duration::from_secs(0),
                cache_aggressive: false,
                encrypt: true,
                strong_consistency: true,
                replication_required: false,
                audit_logging: true,
                task_priority: TaskPriority::Normal,
                message_priority: MessagePriority::Normal,
                fallback_enabled: true,
                emergency_buffer: false,
                droppable_under_stress: false,
            },
            Intent::Lazy => IntentConfig {
                cache_enabled: true,
                cache_ttl: Duration::from_secs(900),
                cache_aggressive: true,
                encrypt: false,
                strong_consistency: false,
                replication_required: false,
                audit_logging: false,
                task_priority: TaskPriority::Low,
                message_priority: MessagePriority::Low,
                fallback_enabled: false,
                emergency_buffer: false,
                droppable_under_stress: false,
            },
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskPriority {
    Low,
    Normal,
    High,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessagePriority {
    Low,
    Normal,
    High,
}

/// Resolved handling policy for a piece of data or a message. Mirrors
/// `BaseIntentConfig` field-for-field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IntentConfig {
    pub cache_enabled: bool,
    pub cache_ttl: Duration,
    pub cache_aggressive: bool,
    pub encrypt: bool,
    pub strong_consistency: bool,
    pub replication_required: bool,
    pub audit_logging: bool,
    pub task_priority: TaskPriority,
    pub message_priority: MessagePriority,
    pub fallback_enabled: bool,
    pub emergency_buffer: bool,
    /// Whether a write under this intent may be silently dropped (reporting
    /// success) when the system-status oracle is not `GREEN`.
    pub droppable_under_stress: bool,
}

/// Registry of custom, named intents layered on top of the five built-ins.
///
/// Grounded on `DataIntentRegistry` (stores configs by name) paired with
/// `IntentResolver` (dispatches built-in vs. custom) — here collapsed into
/// one type since Rust doesn't need the indirection a Python singleton uses.
/// [`crate::data_io::DataIo`] resolves every `write`/`read`/`delete` call
/// through an injected registry, so a custom registration under a built-in's
/// name (e.g. a tenant-specific `"critical"`) actually changes DataIO's
/// fallback/emergency-buffer/stress-drop behavior rather than sitting unused.
pub struct IntentRegistry {
    custom: RwLock<HashMap<String, IntentConfig>>,
}

impl Default for IntentRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl IntentRegistry {
    pub fn new() -> Self {
        Self { custom: RwLock::new(HashMap::new()) }
    }

    /// Registers (or overwrites) a named custom intent.
    pub fn register(&self, name: impl Into<String>, config: IntentConfig) {
        self.custom.write().expect("intent registry poisoned").insert(name.into(), config);
    }

    pub fn unregister(&self, name: &str) -> bool {
        self.custom.write().expect("intent registry poisoned").remove(name).is_some()
    }

    /// Resolves a named intent: checks custom registrations first, then
    /// falls back to a built-in whose `as_str()` matches `name`.
    pub fn resolve(&self, name: &str) -> Option<IntentConfig> {
        if let Some(cfg) = self.custom.read().expect("intent registry poisoned").get(name) {
            return Some(cfg.clone());
        }
        [Intent::Critical, Intent::Standard, Intent::Ephemeral, Intent::Sensitive, Intent::Lazy]
            .into_iter()
            .find(|i| i.as_str() == name)
            .map(|i| i.config())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn critical_requires_emergency_buffer_and_strong_consistency() {
        let cfg = Intent::Critical.config();
        assert!(cfg.emergency_buffer);
        assert!(cfg.strong_consistency);
        assert_eq!(cfg.task_priority, TaskPriority::High);
    }

    #[test]
    fn ephemeral_never_emergency_buffers() {
        let cfg = Intent::Ephemeral.config();
        assert!(!cfg.emergency_buffer);
        assert!(cfg.cache_aggressive);
    }

    #[test]
    fn registry_prefers_custom_over_builtin() {
        let registry = IntentRegistry::new();
        let mut custom = Intent::Standard.config();
        custom.audit_logging = true;
        registry.register("standard", custom.clone());
        let resolved = registry.resolve("standard").unwrap();
        assert_eq!(resolved, custom);
    }

    #[test]
    fn registry_falls_back_to_builtin() {
        let registry = IntentRegistry::new();
        let resolved = registry.resolve("critical").unwrap();
        assert_eq!(resolved, Intent::Critical.config());
    }

    #[test]
    fn unknown_intent_name_resolves_to_none() {
        let registry = IntentRegistry::new();
        assert!(registry.resolve("nonexistent").is_none());
    }

    #[test]
    fn unregister_removes_custom_entry() {
        let registry = IntentRegistry::new();
        registry.register("promo", Intent::Lazy.config());
        assert!(registry.unregister("promo"));
        assert!(!registry.unregister("promo"));
    }
}

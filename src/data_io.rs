//! The resilient data I/O policy engine: the write/read/delete decision
//! tables, wired to per-provider circuit breakers, the emergency buffer,
//! sensitive-field masking, and the system status oracle.
//!
//! Grounded on `evox/core/data/data_io.py`'s `DataIO` class, whose
//! `write`/`read`/`delete` methods implement the exact same primary →
//! fallback → emergency fallthrough and the same masking algorithm.

use std::sync::Arc;

use serde_json::{Map, Value};

use crate::circuit_breaker::CircuitBreakerConfig;
use crate::circuit_breaker_registry::CircuitBreakerRegistry;
use crate::config::DataIoConfig;
use crate::emergency_buffer::EmergencyBuffer;
use crate::hooks::{EventContext, EventType, HookRegistry};
use crate::intent::{Intent, IntentConfig, IntentRegistry};
use crate::provider::Provider;
use crate::system_status::{AlwaysGreen, SystemStatus, SystemStatusOracle};

/// Masks sensitive fields in `value` before it is persisted. A field is
/// masked when its name matches one of `patterns` (case-insensitive
/// substring match) or when the whole write declares `Intent::Sensitive`
/// (in which case every field — or the bare scalar value itself — is
/// masked). Masking is by field name only; a bare scalar payload is masked
/// in full only when the caller declares `Intent::Sensitive` for the
/// entire write.
pub fn mask_sensitive_fields(value: &Value, intent: Intent, patterns: &[String]) -> Value {
    match value {
        Value::Object(map) => {
            let mut masked = Map::with_capacity(map.len());
            for (field, field_value) in map {
                let field_is_sensitive = intent == Intent::Sensitive
                    || patterns.iter().any(|p| field.to_lowercase().contains(p.as_str()));
                masked.insert(
                    field.clone(),
                    if field_is_sensitive { mask_scalar(field_value) } else { field_value.clone() },
                );
            }
            Value::Object(masked)
        }
        other if intent == Intent::Sensitive => mask_scalar(other),
        other => other.clone(),
    }
}

fn mask_scalar(value: &Value) -> Value {
    match value {
        Value::String(s) => Value::String("*".repeat(s.chars().count())),
        _ => Value::String("***MASKED***".to_string()),
    }
}

pub struct DataIo {
    primary: Arc<dyn Provider>,
    fallback: Option<Arc<dyn Provider>>,
    emergency: EmergencyBuffer,
    breakers: CircuitBreakerRegistry,
    breaker_config: CircuitBreakerConfig,
    system_status: Arc<dyn SystemStatusOracle>,
    sensitive_patterns: Vec<String>,
    hooks: Option<Arc<HookRegistry>>,
    intents: Arc<IntentRegistry>,
}

impl DataIo {
    pub fn new(primary: Arc<dyn Provider>, config: DataIoConfig) -> Self {
        Self {
            primary,
            fallback: None,
            emergency: EmergencyBuffer::new(),
            breakers: CircuitBreakerRegistry::new(),
            breaker_config: config.breaker,
            system_status: Arc::new(AlwaysGreen),
            sensitive_patterns: config.sensitive_patterns,
            hooks: None,
            intents: Arc::new(IntentRegistry::new()),
        }
    }

    pub fn with_fallback(mut self, fallback: Arc<dyn Provider>) -> Self {
        self.fallback = Some(fallback);
        self
    }

    pub fn with_system_status_oracle(mut self, oracle: Arc<dyn SystemStatusOracle>) -> Self {
        self.system_status = oracle;
        self
    }

    pub fn with_hooks(mut self, hooks: Arc<HookRegistry>) -> Self {
        self.hooks = Some(hooks);
        self
    }

    /// Injects the [`IntentRegistry`] consulted by `write`/`read`/`delete`.
    /// A caller that registers a custom config under a built-in's name (e.g.
    /// `"critical"`) changes this `DataIo`'s fallback/emergency-buffer/
    /// stress-drop decisions for that intent.
    pub fn with_intent_registry(mut self, intents: Arc<IntentRegistry>) -> Self {
        self.intents = intents;
        self
    }

    /// Resolves `intent` to its effective [`IntentConfig`] through the
    /// injected registry, falling back to the built-in table when no custom
    /// override is registered under the intent's name.
    fn resolve_intent(&self, intent: Intent) -> IntentConfig {
        self.intents.resolve(intent.as_str()).unwrap_or_else(|| intent.config())
    }

    pub fn circuit_breakers(&self) -> &CircuitBreakerRegistry {
        &self.breakers
    }

    fn breaker_for(&self, provider: &Arc<dyn Provider>) -> crate::circuit_breaker::CircuitBreaker {
        self.breakers.get_or_register(provider.id(), self.breaker_config.clone())
    }

    async fn is_healthy(&self, provider: &Arc<dyn Provider>) -> bool {
        let breaker = self.breaker_for(provider);
        breaker.allows_request() && provider.check_health().await
    }

    async fn emit_data_io_error(&self, provider_id: &str, operation: &str, detail: String) {
        if let Some(hooks) = &self.hooks {
            hooks
                .trigger(
                    EventType::OnDataIoError,
                    EventContext::new(EventType::OnDataIoError)
                        .with_payload(serde_json::json!({
                            "provider_id": provider_id,
                            "operation": operation,
                            "detail": detail,
                        })),
                )
                .await;
        }
    }

    /// Masks sensitive fields, then tries primary, falls back to the
    /// fallback provider, and as a last resort buffers the write for
    /// intents that allow it. Every decision below reads the intent's
    /// resolved [`IntentConfig`] (registry override or built-in), not the
    /// `Intent` tag directly.
    pub async fn write(&self, key: &str, value: &Value, intent: Intent) -> bool {
        let config = self.resolve_intent(intent);
        let masked = mask_sensitive_fields(value, intent, &self.sensitive_patterns);
        let serialized = match serde_json::to_string(&masked) {
            Ok(s) => s,
            Err(e) => {
                self.emit_data_io_error(self.primary.id(), "write", e.to_string()).await;
                return false;
            }
        };

        if self.is_healthy(&self.primary).await {
            if config.droppable_under_stress && self.system_status.status() != SystemStatus::Green {
                tracing::debug!(key, "dropping write: system status is not green and intent allows it");
                return true;
            }

            let breaker = self.breaker_for(&self.primary);
            match self.primary.write(key, &serialized).await {
                Ok(()) => {
                    breaker.record_success();
                    true
                }
                Err(e) => {
                    breaker.record_failure();
                    self.emit_data_io_error(self.primary.id(), "write", e.to_string()).await;
                    if config.emergency_buffer {
                        self.emergency.write(key, &masked, intent)
                    } else {
                        false
                    }
                }
            }
        } else if config.emergency_buffer {
            self.emergency.write(key, &masked, intent)
        } else if config.fallback_enabled {
            match self.fallback.clone() {
                Some(fallback) => {
                    let breaker = self.breaker_for(&fallback);
                    match fallback.write(key, &serialized).await {
                        Ok(()) => {
                            breaker.record_success();
                            true
                        }
                        Err(e) => {
                            breaker.record_failure();
                            self.emit_data_io_error(fallback.id(), "write", e.to_string()).await;
                            false
                        }
                    }
                }
                None => false,
            }
        } else {
            false
        }
    }

    /// Try primary, then fallback, then the emergency buffer; return the
    /// first non-null value. Breaker state is consulted (to avoid hammering
    /// an open breaker) but never mutated by reads.
    pub async fn read(&self, key: &str, _intent: Intent) -> Option<Value> {
        if self.breaker_for(&self.primary).allows_request() {
            match self.primary.read(key).await {
                Ok(Some(raw)) => {
                    if let Ok(value) = serde_json::from_str(&raw) {
                        return Some(value);
                    }
                }
                Ok(None) => {}
                Err(e) => {
                    self.emit_data_io_error(self.primary.id(), "read", e.to_string()).await;
                }
            }
        }

        if let Some(fallback) = &self.fallback {
            if self.breaker_for(fallback).allows_request() {
                match fallback.read(key).await {
                    Ok(Some(raw)) => {
                        if let Ok(value) = serde_json::from_str(&raw) {
                            return Some(value);
                        }
                    }
                    Ok(None) => {}
                    Err(e) => {
                        self.emit_data_io_error(fallback.id(), "read", e.to_string()).await;
                    }
                }
            }
        }

        self.emergency.read(key)
    }

    /// Attempt deletion on every tier independently; succeed if any one did.
    pub async fn delete(&self, key: &str, _intent: Intent) -> bool {
        let mut deleted = false;

        match self.primary.delete(key).await {
            Ok(true) => deleted = true,
            Ok(false) => {}
            Err(e) => self.emit_data_io_error(self.primary.id(), "delete", e.to_string()).await,
        }

        if let Some(fallback) = &self.fallback {
            match fallback.delete(key).await {
                Ok(true) => deleted = true,
                Ok(false) => {}
                Err(e) => self.emit_data_io_error(fallback.id(), "delete", e.to_string()).await,
            }
        }

        if self.emergency.delete(key) {
            deleted = true;
        }

        deleted
    }

    pub fn emergency_buffer(&self) -> &EmergencyBuffer {
        &self.emergency
    }

    pub fn primary(&self) -> &Arc<dyn Provider> {
        &self.primary
    }

    pub fn fallback(&self) -> Option<&Arc<dyn Provider>> {
        self.fallback.as_ref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::MemoryProvider;
    use serde_json::json;
    use std::time::Duration;

    fn cfg() -> DataIoConfig {
        DataIoConfig {
            breaker: CircuitBreakerConfig { failure_threshold: 2, recovery_timeout: Duration::from_millis(50), half_open_max_calls: 1 },
            sensitive_patterns: crate::config::default_sensitive_patterns(),
        }
    }

    #[tokio::test]
    async fn healthy_primary_write_then_read_round_trips() {
        let primary = Arc::new(MemoryProvider::new("primary"));
        let dio = DataIo::new(primary, cfg());
        assert!(dio.write("k", &json!({"v": 1}), Intent::Standard).await);
        assert_eq!(dio.read("k", Intent::Standard).await, Some(json!({"v": 1})));
    }

    #[tokio::test]
    async fn critical_write_falls_back_to_emergency_when_primary_unhealthy() {
        let primary = Arc::new(MemoryProvider::new("primary"));
        primary.set_mock_unhealthy(true);
        let dio = DataIo::new(primary, cfg());

        assert!(dio.write("k1", &json!("v1"), Intent::Critical).await);
        assert_eq!(dio.emergency_buffer().list_pending().len(), 1);
        assert_eq!(dio.read("k1", Intent::Critical).await, Some(json!("v1")));
    }

    #[tokio::test]
    async fn standard_write_falls_back_to_fallback_provider_when_primary_unhealthy() {
        let primary = Arc::new(MemoryProvider::new("primary"));
        primary.set_mock_unhealthy(true);
        let fallback = Arc::new(MemoryProvider::new("fallback"));
        let dio = DataIo::new(primary, cfg()).with_fallback(fallback.clone());

        assert!(dio.write("k1", &json!("v1"), Intent::Standard).await);
        assert_eq!(fallback.read("k1").await.unwrap(), Some("\"v1\"".to_string()));
    }

    #[tokio::test]
    async fn standard_write_fails_when_primary_unhealthy_and_no_fallback() {
        let primary = Arc::new(MemoryProvider::new("primary"));
        primary.set_mock_unhealthy(true);
        let dio = DataIo::new(primary, cfg());
        assert!(!dio.write("k1", &json!("v1"), Intent::Standard).await);
    }

    #[tokio::test]
    async fn custom_registered_intent_config_overrides_builtin_routing() {
        let primary = Arc::new(MemoryProvider::new("primary"));
        primary.set_mock_unhealthy(true);

        let registry = IntentRegistry::new();
        let mut custom = Intent::Standard.config();
        custom.emergency_buffer = true;
        registry.register("standard", custom);

        let dio = DataIo::new(primary, cfg()).with_intent_registry(Arc::new(registry));

        // The built-in Standard config has no emergency buffer, so this
        // would fail (see standard_write_fails_when_primary_unhealthy_and_no_fallback
        // above). The registered override makes it succeed instead.
        assert!(dio.write("k1", &json!("v1"), Intent::Standard).await);
        assert_eq!(dio.emergency_buffer().list_pending().len(), 1);
    }

    #[tokio::test]
    async fn ephemeral_write_is_dropped_when_system_is_not_green() {
        let primary = Arc::new(MemoryProvider::new("primary"));
        let dio = DataIo::new(primary.clone(), cfg())
            .with_system_status_oracle(Arc::new(crate::system_status::ThresholdOracle::new(|| 0.99)));

        assert!(dio.write("k1", &json!("v1"), Intent::Ephemeral).await);
        assert_eq!(primary.read("k1").await.unwrap(), None, "ephemeral write must be skipped");
    }

    #[tokio::test]
    async fn sensitive_intent_masks_every_field() {
        let primary = Arc::new(MemoryProvider::new("primary"));
        let dio = DataIo::new(primary.clone(), cfg());

        dio.write("u1", &json!({"email": "a@b.com", "age": 31}), Intent::Sensitive).await;
        let raw = primary.read("u1").await.unwrap().unwrap();
        let stored: Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(stored["email"], json!("*********"));
        assert_eq!(stored["age"], json!("***MASKED***"));
    }

    #[tokio::test]
    async fn standard_intent_masks_only_pattern_matched_fields() {
        let primary = Arc::new(MemoryProvider::new("primary"));
        let dio = DataIo::new(primary.clone(), cfg());

        dio.write("u1", &json!({"email": "a@b.com", "city": "NYC"}), Intent::Standard).await;
        let raw = primary.read("u1").await.unwrap().unwrap();
        let stored: Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(stored["email"], json!("*********"));
        assert_eq!(stored["city"], json!("NYC"));
    }

    #[tokio::test]
    async fn delete_succeeds_if_any_tier_has_the_key() {
        let primary = Arc::new(MemoryProvider::new("primary"));
        let dio = DataIo::new(primary.clone(), cfg());
        dio.emergency_buffer().write("k1", &json!(1), Intent::Critical);

        assert!(dio.delete("k1", Intent::Critical).await);
        assert!(dio.emergency_buffer().read("k1").is_none());
    }

    #[tokio::test]
    async fn breaker_trips_after_threshold_write_failures() {
        struct AlwaysFailProvider(&'static str);
        #[async_trait::async_trait]
        impl Provider for AlwaysFailProvider {
            fn id(&self) -> &str {
                self.0
            }
            async fn read(&self, _key: &str) -> Result<Option<String>, crate::provider::ProviderError> {
                Ok(None)
            }
            async fn write(&self, _key: &str, _value: &str) -> Result<(), crate::provider::ProviderError> {
                Err(crate::provider::ProviderError::Io("down".into()))
            }
            async fn delete(&self, _key: &str) -> Result<bool, crate::provider::ProviderError> {
                Ok(false)
            }
            async fn check_health(&self) -> bool {
                true
            }
            fn is_healthy(&self) -> bool {
                true
            }
            fn last_health_check_millis(&self) -> i64 {
                0
            }
            fn properties(&self) -> crate::provider::ProviderProperties {
                Default::default()
            }
        }

        let primary: Arc<dyn Provider> = Arc::new(AlwaysFailProvider("primary"));
        let dio = DataIo::new(primary, cfg());

        for _ in 0..2 {
            assert!(!dio.write("k", &json!(1), Intent::Standard).await);
        }
        let snap = dio.circuit_breakers().get("primary").unwrap().snapshot();
        assert_eq!(snap.state, crate::circuit_breaker::CircuitState::Open);
    }
}

//! The storage backend contract and two bundled implementations.
//!
//! Grounded on `evox/core/providers/base_provider.py`'s abstract provider,
//! expressed as an `async_trait` trait object held behind `Arc<dyn _>` the
//! same way every other cross-cutting seam in this crate is.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};

/// Arbitrary capability flags a provider advertises (e.g. `supports_transactions`).
pub type ProviderProperties = HashMap<String, bool>;

/// Storage backend contract. `check_health` must be side-effect-free and
/// bounded-time; DataIO calls it on the hot path.
#[async_trait]
pub trait Provider: Send + Sync {
    fn id(&self) -> &str;

    async fn read(&self, key: &str) -> Result<Option<String>, ProviderError>;
    async fn write(&self, key: &str, value: &str) -> Result<(), ProviderError>;
    async fn delete(&self, key: &str) -> Result<bool, ProviderError>;

    /// Updates and returns `is_healthy`.
    async fn check_health(&self) -> bool;

    fn is_healthy(&self) -> bool;
    fn last_health_check_millis(&self) -> i64;
    fn properties(&self) -> ProviderProperties;
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum ProviderError {
    #[error("provider io error: {0}")]
    Io(String),
}

fn now_millis() -> i64 {
    SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_millis() as i64).unwrap_or(0)
}

/// Volatile in-memory provider. No transactions, no replication. Used as the
/// default fallback tier and extensively in tests.
pub struct MemoryProvider {
    id: String,
    store: Mutex<HashMap<String, String>>,
    healthy: AtomicBool,
    mock_unhealthy: AtomicBool,
    last_health_check: AtomicI64,
}

impl MemoryProvider {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            store: Mutex::new(HashMap::new()),
            healthy: AtomicBool::new(true),
            mock_unhealthy: AtomicBool::new(false),
            last_health_check: AtomicI64::new(0),
        }
    }

    /// Test/ops hook: force subsequent `check_health` calls to report false.
    pub fn set_mock_unhealthy(&self, unhealthy: bool) {
        self.mock_unhealthy.store(unhealthy, Ordering::Release);
    }
}

#[async_trait]
impl Provider for MemoryProvider {
    fn id(&self) -> &str {
        &self.id
    }

    async fn read(&self, key: &str) -> Result<Option<String>, ProviderError> {
        Ok(self.store.lock().expect("memory provider mutex poisoned").get(key).cloned())
    }

    async fn write(&self, key: &str, value: &str) -> Result<(), ProviderError> {
        self.store.lock().expect("memory provider mutex poisoned").insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool, ProviderError> {
        Ok(self.store.lock().expect("memory provider mutex poisoned").remove(key).is_some())
    }

    async fn check_health(&self) -> bool {
        self.last_health_check.store(now_millis(), Ordering::Release);
        let healthy = !self.mock_unhealthy.load(Ordering::Acquire);
        self.healthy.store(healthy, Ordering::Release);
        healthy
    }

    fn is_healthy(&self) -> bool {
        self.healthy.load(Ordering::Acquire)
    }

    fn last_health_check_millis(&self) -> i64 {
        self.last_health_check.load(Ordering::Acquire)
    }

    fn properties(&self) -> ProviderProperties {
        let mut props = HashMap::new();
        props.insert("supports_transactions".to_string(), false);
        props.insert("supports_replication".to_string(), false);
        props
    }
}

/// Transactional, on-disk provider. Backed by a plain JSON-lines file rather
/// than a real database driver, since this crate doesn't carry one — the
/// transaction boundary here is "one write = one atomic file replace".
pub struct DiskProvider {
    id: String,
    path: std::path::PathBuf,
    healthy: AtomicBool,
    mock_unhealthy: AtomicBool,
    last_health_check: AtomicI64,
    cache: Mutex<HashMap<String, String>>,
}

impl DiskProvider {
    pub fn new(id: impl Into<String>, path: impl Into<std::path::PathBuf>) -> Self {
        Self {
            id: id.into(),
            path: path.into(),
            healthy: AtomicBool::new(true),
            mock_unhealthy: AtomicBool::new(false),
            last_health_check: AtomicI64::new(0),
            cache: Mutex::new(HashMap::new()),
        }
    }

    pub fn set_mock_unhealthy(&self, unhealthy: bool) {
        self.mock_unhealthy.store(unhealthy, Ordering::Release);
    }

    fn load(&self) -> Result<HashMap<String, String>, ProviderError> {
        match std::fs::read_to_string(&self.path) {
            Ok(contents) if !contents.is_empty() => serde_json::from_str(&contents)
                .map_err(|e| ProviderError::Io(format!("decode {}: {e}", self.path.display()))),
            Ok(_) => Ok(HashMap::new()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(HashMap::new()),
            Err(e) => Err(ProviderError::Io(format!("read {}: {e}", self.path.display()))),
        }
    }

    fn persist(&self, map: &HashMap<String, String>) -> Result<(), ProviderError> {
        let encoded = serde_json::to_string(map)
            .map_err(|e| ProviderError::Io(format!("encode {}: {e}", self.path.display())))?;
        std::fs::write(&self.path, encoded)
            .map_err(|e| ProviderError::Io(format!("write {}: {e}", self.path.display())))
    }
}

#[async_trait]
impl Provider for DiskProvider {
    fn id(&self) -> &str {
        &self.id
    }

    async fn read(&self, key: &str) -> Result<Option<String>, ProviderError> {
        let map = self.load()?;
        *self.cache.lock().expect("disk provider cache poisoned") = map.clone();
        Ok(map.get(key).cloned())
    }

    async fn write(&self, key: &str, value: &str) -> Result<(), ProviderError> {
        let mut map = self.load()?;
        map.insert(key.to_string(), value.to_string());
        self.persist(&map)?;
        *self.cache.lock().expect("disk provider cache poisoned") = map;
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool, ProviderError> {
        let mut map = self.load()?;
        let existed = map.remove(key).is_some();
        if existed {
            self.persist(&map)?;
        }
        *self.cache.lock().expect("disk provider cache poisoned") = map;
        Ok(existed)
    }

    async fn check_health(&self) -> bool {
        self.last_health_check.store(now_millis(), Ordering::Release);
        let healthy = !self.mock_unhealthy.load(Ordering::Acquire) && self.load().is_ok();
        self.healthy.store(healthy, Ordering::Release);
        healthy
    }

    fn is_healthy(&self) -> bool {
        self.healthy.load(Ordering::Acquire)
    }

    fn last_health_check_millis(&self) -> i64 {
        self.last_health_check.load(Ordering::Acquire)
    }

    fn properties(&self) -> ProviderProperties {
        let mut props = HashMap::new();
        props.insert("supports_transactions".to_string(), true);
        props.insert("supports_replication".to_string(), false);
        props
    }
}

//! Durable, keyed store for writes that couldn't reach the primary
//! provider.
//!
//! Grounded on `evox/core/data/data_io.py`'s `EmergencySafetyBuffer`, which
//! backs this exact record shape with a SQLite table
//! (`emergency_buffer(id PK, key UNIQUE, data TEXT, intent TEXT,
//! created_at TIMESTAMP, pending_sync INT DEFAULT 1)`). The table schema is
//! preserved in the row-oriented API below; storage itself is a pluggable
//! [`EmergencyStore`] rather than a direct SQLite dependency — a
//! `SqliteStore` adapter can implement the same trait without this crate
//! taking on a database driver it does not otherwise need.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::intent::Intent;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct EmergencyRecord {
    pub key: String,
    pub data: String,
    pub intent: String,
    pub created_at_millis: i64,
    pub pending_sync: bool,
}

/// Durable backing for [`EmergencyBuffer`]. The bundled [`InMemoryStore`] is
/// sufficient for tests and single-process deployments that accept losing
/// the buffer on crash; production deployments inject a persistent
/// implementation (e.g. backed by sqlite or a local file).
pub trait EmergencyStore: Send + Sync {
    fn upsert(&self, record: EmergencyRecord);
    fn get(&self, key: &str) -> Option<EmergencyRecord>;
    fn remove(&self, key: &str) -> bool;
    fn list_pending(&self) -> Vec<EmergencyRecord>;
    fn mark_synced(&self, key: &str) -> bool;
    fn purge_synced(&self);
}

#[derive(Default)]
pub struct InMemoryStore {
    rows: Mutex<HashMap<String, EmergencyRecord>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl EmergencyStore for InMemoryStore {
    fn upsert(&self, record: EmergencyRecord) {
        self.rows.lock().expect("emergency store poisoned").insert(record.key.clone(), record);
    }

    fn get(&self, key: &str) -> Option<EmergencyRecord> {
        self.rows.lock().expect("emergency store poisoned").get(key).cloned()
    }

    fn remove(&self, key: &str) -> bool {
        self.rows.lock().expect("emergency store poisoned").remove(key).is_some()
    }

    fn list_pending(&self) -> Vec<EmergencyRecord> {
        self.rows
            .lock()
            .expect("emergency store poisoned")
            .values()
            .filter(|r| r.pending_sync)
            .cloned()
            .collect()
    }

    fn mark_synced(&self, key: &str) -> bool {
        let mut rows = self.rows.lock().expect("emergency store poisoned");
        match rows.get_mut(key) {
            Some(record) => {
                record.pending_sync = false;
                true
            }
            None => false,
        }
    }

    fn purge_synced(&self) {
        self.rows.lock().expect("emergency store poisoned").retain(|_, r| r.pending_sync);
    }
}

/// Serializes/deserializes an arbitrary JSON-able value into/out of an
/// [`EmergencyRecord`] and drives the `INSERT OR REPLACE` / pending-sync
/// lifecycle.
pub struct EmergencyBuffer<S: EmergencyStore = InMemoryStore> {
    store: S,
}

impl EmergencyBuffer<InMemoryStore> {
    pub fn new() -> Self {
        Self { store: InMemoryStore::new() }
    }
}

impl Default for EmergencyBuffer<InMemoryStore> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S: EmergencyStore> EmergencyBuffer<S> {
    pub fn with_store(store: S) -> Self {
        Self { store }
    }

    /// `INSERT OR REPLACE` by key; returns `false` only on serialization
    /// failure. Overwrites any prior record and resets `pending_sync=1`.
    pub fn write(&self, key: &str, value: &serde_json::Value, intent: Intent) -> bool {
        let data = match serde_json::to_string(value) {
            Ok(s) => s,
            Err(e) => {
                tracing::error!(key, error = %e, "emergency buffer: failed to serialize record");
                return false;
            }
        };
        self.store.upsert(EmergencyRecord {
            key: key.to_string(),
            data,
            intent: intent.as_str().to_string(),
            created_at_millis: now_millis(),
            pending_sync: true,
        });
        true
    }

    pub fn read(&self, key: &str) -> Option<serde_json::Value> {
        let record = self.store.get(key)?;
        match serde_json::from_str(&record.data) {
            Ok(value) => Some(value),
            Err(e) => {
                tracing::error!(key, error = %e, "emergency buffer: failed to decode record");
                None
            }
        }
    }

    pub fn delete(&self, key: &str) -> bool {
        self.store.remove(key)
    }

    /// Records considered recoverable: present AND `pending_sync=1`.
    pub fn list_pending(&self) -> Vec<EmergencyRecord> {
        self.store.list_pending()
    }

    pub fn mark_synced(&self, key: &str) -> bool {
        self.store.mark_synced(key)
    }

    pub fn purge_synced(&self) {
        self.store.purge_synced()
    }
}

fn now_millis() -> i64 {
    SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_millis() as i64).unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn write_then_read_round_trips() {
        let buf = EmergencyBuffer::new();
        assert!(buf.write("k1", &json!({"v": 1}), Intent::Critical));
        assert_eq!(buf.read("k1"), Some(json!({"v": 1})));
    }

    #[test]
    fn overwrite_replaces_and_resets_pending_sync() {
        let buf = EmergencyBuffer::new();
        buf.write("k1", &json!("first"), Intent::Critical);
        buf.mark_synced("k1");
        assert!(buf.list_pending().is_empty());

        buf.write("k1", &json!("second"), Intent::Critical);
        let pending = buf.list_pending();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].data, "\"second\"");
    }

    #[test]
    fn mark_synced_removes_from_pending_list() {
        let buf = EmergencyBuffer::new();
        buf.write("k1", &json!(1), Intent::Critical);
        buf.write("k2", &json!(2), Intent::Critical);
        assert_eq!(buf.list_pending().len(), 2);

        buf.mark_synced("k1");
        let pending = buf.list_pending();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].key, "k2");
    }

    #[test]
    fn purge_synced_drops_only_synced_rows() {
        let buf = EmergencyBuffer::new();
        buf.write("k1", &json!(1), Intent::Critical);
        buf.write("k2", &json!(2), Intent::Critical);
        buf.mark_synced("k1");
        buf.purge_synced();

        assert!(buf.read("k1").is_none());
        assert!(buf.read("k2").is_some());
    }

    #[test]
    fn delete_removes_record_entirely() {
        let buf = EmergencyBuffer::new();
        buf.write("k1", &json!(1), Intent::Critical);
        assert!(buf.delete("k1"));
        assert!(buf.read("k1").is_none());
        assert!(!buf.delete("k1"));
    }
}

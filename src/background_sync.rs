//! Periodic drainer that re-pushes emergency-buffered writes to the primary
//! provider once it's healthy again.
//!
//! Grounded on `evox/core/data/data_io.py`'s `BackgroundSyncManager`: a
//! plain fixed-interval loop, deliberately without an exponential-backoff
//! curve, that checks primary health, re-writes every pending record
//! through `DataIo` (re-entering the normal write path, including the
//! breaker), marks successes synced, and purges synced rows at the end of
//! each pass.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::config::BackgroundSyncConfig;
use crate::data_io::DataIo;
use crate::intent::Intent;

pub struct BackgroundSync {
    data_io: Arc<DataIo>,
    config: BackgroundSyncConfig,
    stop: Arc<AtomicBool>,
}

impl BackgroundSync {
    pub fn new(data_io: Arc<DataIo>, config: BackgroundSyncConfig) -> Self {
        Self { data_io, config, stop: Arc::new(AtomicBool::new(false)) }
    }

    /// Spawns the loop on the current tokio runtime. Returns a handle whose
    /// `stop()` asks the loop to finish its current pass and exit.
    pub fn spawn(self) -> BackgroundSyncHandle {
        let stop = self.stop.clone();
        let join = tokio::spawn(async move { self.run().await });
        BackgroundSyncHandle { stop, join }
    }

    async fn run(self) {
        let mut ticker = tokio::time::interval(self.config.sync_interval);
        ticker.tick().await; // first tick fires immediately; skip it
        loop {
            ticker.tick().await;
            if self.stop.load(Ordering::Acquire) {
                return;
            }
            self.run_once().await;
        }
    }

    /// One sync pass, exposed directly so tests don't have to wait on a
    /// real interval.
    pub async fn run_once(&self) {
        if !self.data_io.primary().check_health().await {
            tracing::debug!("background sync: primary still unhealthy, skipping pass");
            return;
        }

        let pending = self.data_io.emergency_buffer().list_pending();
        tracing::debug!(count = pending.len(), "background sync: draining pending records");

        for record in pending {
            let value: serde_json::Value = match serde_json::from_str(&record.data) {
                Ok(v) => v,
                Err(e) => {
                    tracing::error!(key = %record.key, error = %e, "background sync: undecodable record, skipping");
                    continue;
                }
            };
            let intent = parse_intent(&record.intent);
            if self.data_io.write(&record.key, &value, intent).await {
                self.data_io.emergency_buffer().mark_synced(&record.key);
            } else {
                tracing::warn!(key = %record.key, "background sync: re-push failed, will retry next cycle");
            }
        }

        self.data_io.emergency_buffer().purge_synced();
    }
}

fn parse_intent(raw: &str) -> Intent {
    match raw {
        "critical" => Intent::Critical,
        "standard" => Intent::Standard,
        "ephemeral" => Intent::Ephemeral,
        "sensitive" => Intent::Sensitive,
        "lazy" => Intent::Lazy,
        _ => Intent::Standard,
    }
}

pub struct BackgroundSyncHandle {
    stop: Arc<AtomicBool>,
    join: tokio::task::JoinHandle<()>,
}

impl BackgroundSyncHandle {
    /// Signals the loop to stop after its current sleep; does not abort an
    /// in-progress pass.
    pub fn stop(&self) {
        self.stop.store(true, Ordering::Release);
    }

    pub async fn join(self) {
        let _ = self.join.await;
    }
}

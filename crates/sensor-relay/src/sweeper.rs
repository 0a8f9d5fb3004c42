// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Retention sweeper
//!
//! Reclaims synced rows older than the retention window. Unsynced rows are
//! never touched regardless of age; a growing unsynced count is the signal
//! of a sustained link failure.

use crate::config::Config;
use crate::error::Result;
use crate::shutdown::ShutdownSignal;
use crate::store::BufferStore;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{interval, MissedTickBehavior};

pub struct RetentionSweeper<S: BufferStore> {
    store: Arc<S>,
    retention: chrono::Duration,
    sweep_interval: Duration,
    shutdown: ShutdownSignal,
}

impl<S: BufferStore> RetentionSweeper<S> {
    pub fn new(config: &Config, store: Arc<S>, shutdown: ShutdownSignal) -> Self {
        Self {
            store,
            retention: config.retention_window(),
            sweep_interval: config.sweep_interval(),
            shutdown,
        }
    }

    /// Sweep against the current time. Returns rows deleted.
    pub fn sweep_once(&self) -> Result<usize> {
        self.sweep_at(Utc::now())
    }

    /// Sweep as if the clock read `now`.
    pub fn sweep_at(&self, now: DateTime<Utc>) -> Result<usize> {
        let cutoff = now
            .checked_sub_signed(self.retention)
            .unwrap_or(DateTime::<Utc>::MIN_UTC);
        let deleted = self.store.delete_older_than(cutoff, true)?;
        if deleted > 0 {
            tracing::info!("Cleaned up {} old synced records (cutoff {})", deleted, cutoff);
        }
        Ok(deleted)
    }

    /// Sweep on every interval tick until shutdown.
    pub async fn run(&self) {
        let mut shutdown = self.shutdown.clone();
        let mut ticker = interval(self.sweep_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        tracing::info!(
            "Retention sweeper started (window: {} days, interval: {}s)",
            self.retention.num_days(),
            self.sweep_interval.as_secs()
        );

        loop {
            tokio::select! {
                _ = shutdown.wait() => break,
                _ = ticker.tick() => {
                    if let Err(e) = self.sweep_once() {
                        tracing::error!("Retention sweep failed: {}", e);
                    }
                }
            }
        }

        tracing::info!("Retention sweeper stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::RecordKind;
    use crate::shutdown::Shutdown;
    use crate::sqlite::SqliteBuffer;

    fn sweeper(days: u64) -> (RetentionSweeper<SqliteBuffer>, Arc<SqliteBuffer>, Shutdown) {
        let config = Config::builder().retention_days(days).build();
        let store = Arc::new(SqliteBuffer::new_in_memory().unwrap());
        let shutdown = Shutdown::new();
        let sweeper = RetentionSweeper::new(&config, Arc::clone(&store), shutdown.signal());
        (sweeper, store, shutdown)
    }

    #[test]
    fn test_sweep_keeps_recent_and_unsynced() {
        let (sweeper, store, _shutdown) = sweeper(7);
        let synced = store
            .insert(RecordKind::Event, Utc::now(), r#"{"n":1}"#, None)
            .unwrap();
        store
            .insert(RecordKind::Event, Utc::now(), r#"{"n":2}"#, None)
            .unwrap();
        store.mark_synced(RecordKind::Event, &[synced]).unwrap();

        // Nothing is old enough yet
        assert_eq!(sweeper.sweep_once().unwrap(), 0);

        // Eight days later only the synced row goes
        let later = Utc::now() + chrono::Duration::days(8);
        assert_eq!(sweeper.sweep_at(later).unwrap(), 1);

        let stats = store.stats().unwrap();
        assert_eq!(stats.event.total, 1);
        assert_eq!(stats.event.unsynced, 1);
    }

    #[test]
    fn test_huge_window_does_not_overflow() {
        let (sweeper, store, _shutdown) = sweeper(u64::MAX);
        let id = store
            .insert(RecordKind::Device, Utc::now(), r#"{"mac_addr":"x"}"#, None)
            .unwrap();
        store.mark_synced(RecordKind::Device, &[id]).unwrap();

        assert_eq!(sweeper.sweep_once().unwrap(), 0);
    }

    #[tokio::test]
    async fn test_run_stops_on_shutdown() {
        let (sweeper, _store, shutdown) = sweeper(7);
        let task = tokio::spawn(async move { sweeper.run().await });

        shutdown.trigger();
        tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .unwrap()
            .unwrap();
    }
}

// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Ingress router
//!
//! Every incoming record ends up in exactly one of two places:
//!
//! ```text
//!                 connected?  ──yes──► write_one ──ok──► Delivered
//!                     │                    │
//! SourceRecord ──►    no               err/timeout
//!                     │                    │
//!                     └────────► buffer.insert ──► Buffered { id, reason }
//! ```
//!
//! The only way a record is lost is `insert` itself failing, which is
//! returned to the caller and logged as record loss.

use crate::config::Config;
use crate::error::{RelayError, Result};
use crate::reconciler::ReconcilerHandle;
use crate::record::{RecordKind, SourceRecord};
use crate::sink::{RecordRef, Sink};
use crate::store::BufferStore;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Why a record took the durable path
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FallbackReason {
    /// Offline mode is forced
    Offline,
    /// The reconciler reported the sink down
    Disconnected,
    /// The direct write failed
    SinkError,
    /// The direct write did not finish in time
    Timeout,
    /// The record could not be converted for the sink
    Malformed,
}

impl FallbackReason {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Offline => "offline",
            Self::Disconnected => "disconnected",
            Self::SinkError => "sink_error",
            Self::Timeout => "timeout",
            Self::Malformed => "malformed",
        }
    }
}

impl fmt::Display for FallbackReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of [`IngressRouter::submit`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// Accepted by the sink on the fast path
    Delivered,
    /// Persisted in the buffer under `id`
    Buffered { id: i64, reason: FallbackReason },
}

impl Delivery {
    pub fn is_buffered(&self) -> bool {
        matches!(self, Self::Buffered { .. })
    }
}

/// Ingress counters.
#[derive(Debug)]
pub struct IngressStats {
    /// Records handed to `submit`.
    pub received: AtomicU64,

    /// Records confirmed by the sink on the fast path.
    pub delivered: AtomicU64,

    /// Records persisted in the buffer.
    pub buffered: AtomicU64,

    /// Records lost to a failed buffer insert.
    pub storage_faults: AtomicU64,

    /// Router creation time.
    pub created: Instant,
}

impl IngressStats {
    pub fn new() -> Self {
        Self {
            received: AtomicU64::new(0),
            delivered: AtomicU64::new(0),
            buffered: AtomicU64::new(0),
            storage_faults: AtomicU64::new(0),
            created: Instant::now(),
        }
    }

    /// Get snapshot of current stats.
    pub fn snapshot(&self) -> IngressStatsSnapshot {
        IngressStatsSnapshot {
            received: self.received.load(Ordering::Relaxed),
            delivered: self.delivered.load(Ordering::Relaxed),
            buffered: self.buffered.load(Ordering::Relaxed),
            storage_faults: self.storage_faults.load(Ordering::Relaxed),
            uptime_secs: self.created.elapsed().as_secs(),
        }
    }
}

impl Default for IngressStats {
    fn default() -> Self {
        Self::new()
    }
}

/// Snapshot of ingress statistics.
#[derive(Debug, Clone, Serialize)]
pub struct IngressStatsSnapshot {
    pub received: u64,
    pub delivered: u64,
    pub buffered: u64,
    pub storage_faults: u64,
    pub uptime_secs: u64,
}

impl IngressStatsSnapshot {
    /// Records per second since start.
    pub fn records_per_second(&self) -> f64 {
        if self.uptime_secs > 0 {
            self.received as f64 / self.uptime_secs as f64
        } else {
            0.0
        }
    }
}

/// Per-record delivery policy
pub struct IngressRouter<S: BufferStore, K: Sink> {
    store: Arc<S>,
    sink: Arc<K>,
    reconciler: ReconcilerHandle,
    offline: bool,
    sink_timeout: Duration,
    index_prefix: String,
    stats: IngressStats,
}

impl<S: BufferStore, K: Sink> IngressRouter<S, K> {
    pub fn new(config: &Config, store: Arc<S>, sink: Arc<K>, reconciler: ReconcilerHandle) -> Self {
        Self {
            store,
            sink,
            reconciler,
            offline: config.offline_mode,
            sink_timeout: config.sink_timeout(),
            index_prefix: config.index_prefix.clone(),
            stats: IngressStats::new(),
        }
    }

    pub fn stats(&self) -> &IngressStats {
        &self.stats
    }

    /// Deliver or buffer one record.
    ///
    /// Returns an error only when the record could not be persisted.
    pub async fn submit(&self, record: SourceRecord) -> Result<Delivery> {
        self.stats.received.fetch_add(1, Ordering::Relaxed);

        let kind = record.kind();
        let captured_at = record.captured_at();
        let payload = record.to_payload().map_err(|e| {
            self.stats.storage_faults.fetch_add(1, Ordering::Relaxed);
            tracing::error!("Record lost: cannot serialize {} record: {}", kind, e);
            RelayError::MalformedRecord(e.to_string())
        })?;

        let reason = if self.offline {
            FallbackReason::Offline
        } else if !self.reconciler.status().is_connected() || !self.sink.is_connected() {
            FallbackReason::Disconnected
        } else {
            match self.try_direct(kind, captured_at, &payload).await {
                None => {
                    self.stats.delivered.fetch_add(1, Ordering::Relaxed);
                    return Ok(Delivery::Delivered);
                }
                Some(reason) => reason,
            }
        };

        let id = self.buffer(kind, captured_at, &payload, reason)?;
        Ok(Delivery::Buffered { id, reason })
    }

    /// Fast path. `None` means delivered.
    async fn try_direct(
        &self,
        kind: RecordKind,
        captured_at: DateTime<Utc>,
        payload: &str,
    ) -> Option<FallbackReason> {
        let record = RecordRef {
            kind,
            captured_at,
            payload,
        };
        let doc = match self.sink.prepare(record, &self.index_prefix) {
            Ok(doc) => doc,
            Err(e) => {
                tracing::warn!("Cannot convert {} record for {} sink: {}", kind, self.sink.name(), e);
                return Some(FallbackReason::Malformed);
            }
        };

        match tokio::time::timeout(self.sink_timeout, self.sink.write_one(kind, &doc)).await {
            Ok(Ok(())) => None,
            Ok(Err(e)) => {
                tracing::warn!("Direct write failed, buffering {} record: {}", kind, e);
                self.reconciler.report_link_failure();
                Some(FallbackReason::SinkError)
            }
            Err(_) => {
                tracing::warn!(
                    "Direct write timed out after {:?}, buffering {} record",
                    self.sink_timeout,
                    kind
                );
                self.reconciler.report_link_failure();
                Some(FallbackReason::Timeout)
            }
        }
    }

    fn buffer(
        &self,
        kind: RecordKind,
        captured_at: DateTime<Utc>,
        payload: &str,
        reason: FallbackReason,
    ) -> Result<i64> {
        match self.store.insert(kind, captured_at, payload, Some(reason.as_str())) {
            Ok(id) => {
                self.stats.buffered.fetch_add(1, Ordering::Relaxed);
                tracing::debug!("Buffered {} record {} ({})", kind, id, reason);
                Ok(id)
            }
            Err(e) => {
                self.stats.storage_faults.fetch_add(1, Ordering::Relaxed);
                tracing::error!("Record lost: buffer insert for {} record failed: {}", kind, e);
                Err(e)
            }
        }
    }
}

impl<S: BufferStore + 'static, K: Sink + 'static> IngressRouter<S, K> {
    /// Feed the router from a bounded channel.
    ///
    /// The task ends once every sender is dropped.
    pub fn spawn_channel(
        self: Arc<Self>,
        capacity: usize,
    ) -> (mpsc::Sender<SourceRecord>, JoinHandle<()>) {
        let (tx, mut rx) = mpsc::channel(capacity.max(1));

        let task = tokio::spawn(async move {
            while let Some(record) = rx.recv().await {
                // Loss is already counted and logged by submit
                let _ = self.submit(record).await;
            }
            tracing::debug!("Ingress channel closed");
        });

        (tx, task)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reconciler::Reconciler;
    use crate::record::{DeviceRecord, EventRecord};
    use crate::shutdown::Shutdown;
    use crate::sink::MemorySink;
    use crate::sqlite::SqliteBuffer;

    struct Fixture {
        router: IngressRouter<SqliteBuffer, MemorySink>,
        reconciler: Reconciler<SqliteBuffer, MemorySink>,
        store: Arc<SqliteBuffer>,
        sink: Arc<MemorySink>,
        _shutdown: Shutdown,
    }

    fn fixture(config: Config) -> Fixture {
        let store = Arc::new(SqliteBuffer::new_in_memory().unwrap());
        let sink = Arc::new(MemorySink::new());
        let shutdown = Shutdown::new();
        let (reconciler, _commands) =
            Reconciler::new(&config, Arc::clone(&store), Arc::clone(&sink), shutdown.signal());
        let router =
            IngressRouter::new(&config, Arc::clone(&store), Arc::clone(&sink), reconciler.handle());
        Fixture {
            router,
            reconciler,
            store,
            sink,
            _shutdown: shutdown,
        }
    }

    fn device(mac: &str) -> SourceRecord {
        DeviceRecord {
            mac_addr: mac.to_string(),
            captured_at: Utc::now(),
            ..Default::default()
        }
        .into()
    }

    #[tokio::test]
    async fn test_disconnected_goes_to_buffer() {
        let f = fixture(Config::default());

        let outcome = f.router.submit(device("AA:00:00:00:00:01")).await.unwrap();
        assert!(matches!(
            outcome,
            Delivery::Buffered {
                reason: FallbackReason::Disconnected,
                ..
            }
        ));
        assert_eq!(f.store.stats().unwrap().unsynced_devices(), 1);
        assert_eq!(f.sink.single_calls(), 0);
    }

    #[tokio::test]
    async fn test_connected_delivers_directly() {
        let f = fixture(Config::default());
        f.reconciler.sync_once().await.unwrap();

        let outcome = f.router.submit(device("AA:00:00:00:00:02")).await.unwrap();
        assert_eq!(outcome, Delivery::Delivered);
        assert_eq!(f.sink.received_count(RecordKind::Device), 1);
        assert_eq!(f.store.stats().unwrap().device.total, 0);

        let stats = f.router.stats().snapshot();
        assert_eq!(stats.received, 1);
        assert_eq!(stats.delivered, 1);
    }

    #[tokio::test]
    async fn test_direct_failure_is_tagged_and_buffered() {
        let f = fixture(Config::default());
        f.reconciler.sync_once().await.unwrap();
        f.sink.fail_next_writes(1);

        let outcome = f.router.submit(device("AA:00:00:00:00:03")).await.unwrap();
        let Delivery::Buffered { id, reason } = outcome else {
            panic!("expected buffered, got {:?}", outcome);
        };
        assert_eq!(reason, FallbackReason::SinkError);

        let stored = f.store.get(RecordKind::Device, id).unwrap().unwrap();
        assert!(!stored.synced);
        assert_eq!(stored.fallback_reason.as_deref(), Some("sink_error"));
    }

    #[tokio::test]
    async fn test_direct_timeout_falls_back() {
        let f = fixture(Config::builder().sink_timeout_ms(20).build());
        f.reconciler.sync_once().await.unwrap();
        f.sink.set_latency(Some(Duration::from_millis(200)));

        let outcome = f.router.submit(device("AA:00:00:00:00:04")).await.unwrap();
        assert!(matches!(
            outcome,
            Delivery::Buffered {
                reason: FallbackReason::Timeout,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_offline_mode_never_touches_sink() {
        let f = fixture(Config::builder().offline_mode(true).build());
        f.sink.connect().await.unwrap();

        let event = EventRecord {
            captured_at: Utc::now(),
            event_type: "ALERT".into(),
            data: serde_json::json!({ "text": "deauth flood" }),
        };
        let outcome = f.router.submit(event.into()).await.unwrap();

        assert!(matches!(
            outcome,
            Delivery::Buffered {
                reason: FallbackReason::Offline,
                ..
            }
        ));
        assert_eq!(f.sink.single_calls(), 0);
        assert_eq!(f.store.stats().unwrap().unsynced_events(), 1);
    }

    #[tokio::test]
    async fn test_unconvertible_record_is_buffered_not_dropped() {
        let f = fixture(Config::default());
        f.reconciler.sync_once().await.unwrap();

        // No mac address: the sink cannot build a document id for it
        let outcome = f.router.submit(device("")).await.unwrap();
        assert!(matches!(
            outcome,
            Delivery::Buffered {
                reason: FallbackReason::Malformed,
                ..
            }
        ));
        assert!(f.reconciler.status().is_connected());
    }

    #[tokio::test]
    async fn test_channel_feeds_router() {
        let f = fixture(Config::default());
        let store = Arc::clone(&f.store);
        let router = Arc::new(f.router);

        let (tx, task) = Arc::clone(&router).spawn_channel(4);
        for i in 0..10 {
            tx.send(device(&format!("AA:00:00:00:01:{:02x}", i)))
                .await
                .unwrap();
        }
        drop(tx);
        task.await.unwrap();

        assert_eq!(router.stats().snapshot().buffered, 10);
        assert_eq!(store.stats().unwrap().unsynced_devices(), 10);
    }
}

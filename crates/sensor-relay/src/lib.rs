// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Sensor Relay
//!
//! Store-and-forward delivery of sensor sightings and events to a remote
//! sink over an unreliable link.
//!
//! # Features
//!
//! - **Durable Buffer** -- SQLite file, one table per record kind, crash safe
//! - **Fast Path** -- Records go straight to the sink while the link is up
//! - **Reconciler** -- Drains the buffer in bounded batches on a fixed interval
//! - **Retention** -- Synced rows are reclaimed after a configurable window
//!
//! # Architecture
//!
//! ```text
//! RelayService
//! +-- IngressRouter      (direct write or durable enqueue, per record)
//! +-- Reconciler         (owns link state, drains the buffer)
//! +-- RetentionSweeper   (deletes old synced rows)
//! +-- BufferStore        (SqliteBuffer)
//! +-- Sink               (memory, console, tcp adapters)
//! ```
//!
//! # Example
//!
//! ```ignore
//! use sensor_relay::{Config, RelayService, SqliteBuffer, TcpSink};
//! use std::sync::Arc;
//!
//! let config = Config::builder()
//!     .buffer_path("relay.db")
//!     .batch_size(500)
//!     .build();
//!
//! let store = Arc::new(SqliteBuffer::new(&config.buffer_path)?);
//! let sink = Arc::new(TcpSink::new("collector:9400"));
//! let relay = RelayService::new(config, store, sink).start()?;
//!
//! relay.submit(record).await?;
//! relay.shutdown().await;
//! ```

pub mod config;
pub mod error;
pub mod reconciler;
pub mod record;
pub mod router;
pub mod shutdown;
pub mod sink;
pub mod source;
pub mod sqlite;
pub mod store;
pub mod sweeper;

pub use config::{Config, ConfigBuilder, ConfigError};
pub use error::{RelayError, Result};
pub use reconciler::{LinkState, PassReport, Reconciler, ReconcilerHandle, StatusReader};
pub use record::{
    BufferedRecord, DeviceRecord, EventRecord, LocationInfo, RecordKind, SignalInfo, SourceRecord,
};
pub use router::{Delivery, FallbackReason, IngressRouter, IngressStats, IngressStatsSnapshot};
pub use shutdown::{Shutdown, ShutdownSignal};
pub use sink::{ConsoleSink, MemorySink, RecordRef, Sink, SinkDocument, SinkError, TcpSink};
pub use sqlite::SqliteBuffer;
pub use store::{BufferStats, BufferStore, KindStats};
pub use sweeper::RetentionSweeper;

use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Relay service
///
/// Wires one buffer and one sink to the router, reconciler and sweeper.
///
/// # Type Parameters
///
/// - `S` -- Buffer backend (e.g., `SqliteBuffer`)
/// - `K` -- Sink adapter
pub struct RelayService<S: BufferStore, K: Sink> {
    config: Config,
    store: Arc<S>,
    sink: Arc<K>,
}

impl<S: BufferStore + 'static, K: Sink + 'static> RelayService<S, K> {
    /// Create a new relay service
    pub fn new(config: Config, store: Arc<S>, sink: Arc<K>) -> Self {
        Self {
            config,
            store,
            sink,
        }
    }

    /// Start the background workers.
    ///
    /// Must be called inside a tokio runtime.
    pub fn start(self) -> Result<RelayHandle<S, K>> {
        self.config.validate()?;

        tracing::info!("Starting sensor relay");
        tracing::info!("  Buffer: {}", self.config.buffer_path);
        tracing::info!("  Sink: {}", self.sink.name());
        tracing::info!(
            "  Mode: {}",
            if self.config.offline_mode { "offline" } else { "online" }
        );

        let shutdown = Shutdown::new();

        let (reconciler, commands) = Reconciler::new(
            &self.config,
            Arc::clone(&self.store),
            Arc::clone(&self.sink),
            shutdown.signal(),
        );
        let reconciler = Arc::new(reconciler);
        let reconciler_handle = reconciler.handle();

        let router = Arc::new(IngressRouter::new(
            &self.config,
            Arc::clone(&self.store),
            Arc::clone(&self.sink),
            reconciler_handle.clone(),
        ));

        let sweeper = RetentionSweeper::new(&self.config, Arc::clone(&self.store), shutdown.signal());

        let reconciler_task = tokio::spawn(async move {
            if let Err(e) = reconciler.run(commands).await {
                tracing::error!("Reconciler exited with error: {}", e);
            }
        });
        let sweeper_task = tokio::spawn(async move { sweeper.run().await });

        Ok(RelayHandle {
            router,
            reconciler: reconciler_handle,
            store: self.store,
            sink: self.sink,
            shutdown,
            tasks: vec![reconciler_task, sweeper_task],
            ingress_capacity: self.config.ingress_capacity,
        })
    }

    /// Connect once and run a single reconciliation pass without starting
    /// any background worker (sync-only mode).
    pub async fn sync_once(self) -> Result<PassReport> {
        self.config.validate()?;

        let shutdown = Shutdown::new();
        let (reconciler, _commands) = Reconciler::new(
            &self.config,
            Arc::clone(&self.store),
            Arc::clone(&self.sink),
            shutdown.signal(),
        );

        let report = reconciler.sync_once().await;
        self.sink.close().await;
        report
    }
}

/// Handle to a running relay
pub struct RelayHandle<S: BufferStore, K: Sink> {
    router: Arc<IngressRouter<S, K>>,
    reconciler: ReconcilerHandle,
    store: Arc<S>,
    sink: Arc<K>,
    shutdown: Shutdown,
    tasks: Vec<JoinHandle<()>>,
    ingress_capacity: usize,
}

impl<S: BufferStore + 'static, K: Sink + 'static> RelayHandle<S, K> {
    pub fn router(&self) -> &Arc<IngressRouter<S, K>> {
        &self.router
    }

    /// Submit one record (the only ingress entry point).
    pub async fn submit(&self, record: SourceRecord) -> Result<Delivery> {
        self.router.submit(record).await
    }

    /// Current link state as published by the reconciler.
    pub fn status(&self) -> StatusReader {
        self.reconciler.status().clone()
    }

    /// Per-kind buffer counts.
    pub fn stats(&self) -> Result<BufferStats> {
        self.store.stats()
    }

    pub fn ingress_stats(&self) -> IngressStatsSnapshot {
        self.router.stats().snapshot()
    }

    /// Operator-triggered pass; returns the number of rows marked synced.
    pub async fn sync_now(&self) -> Result<usize> {
        self.reconciler.sync_now().await
    }

    /// Bounded channel into the router, sized by `ingress_capacity`.
    pub fn spawn_ingress(&self) -> (mpsc::Sender<SourceRecord>, JoinHandle<()>) {
        Arc::clone(&self.router).spawn_channel(self.ingress_capacity)
    }

    /// Stop the workers, wait for them, then release the sink.
    ///
    /// A pass that is already in flight finishes its current batch first.
    pub async fn shutdown(self) {
        tracing::info!("Shutting down sensor relay");
        self.shutdown.trigger();

        for task in self.tasks {
            if let Err(e) = task.await {
                tracing::error!("Worker task failed: {}", e);
            }
        }

        self.sink.close().await;
        tracing::info!("Sensor relay stopped");
    }
}

// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Reconciler
//!
//! Drains the durable buffer to the sink.
//!
//! # Operation
//!
//! 1. On every interval tick (or a manual trigger), connect if needed
//! 2. Pull up to `batch_size` unsynced records per kind
//! 3. Submit each kind as one bulk write, bounded by the sink timeout
//! 4. On success mark exactly the submitted ids synced; on any failure mark
//!    nothing and go back to `Disconnected`
//!
//! Retry is a fixed interval with no backoff: a failed pass is simply tried
//! again on the next tick.
//!
//! The link state is owned here and published through a `watch` channel;
//! everyone else gets a read-only [`StatusReader`].

use crate::config::Config;
use crate::error::{RelayError, Result};
use crate::record::RecordKind;
use crate::shutdown::ShutdownSignal;
use crate::sink::{RecordRef, Sink};
use crate::store::BufferStore;
use serde::Serialize;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::{interval, MissedTickBehavior};

/// Sink link state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum LinkState {
    Disconnected,
    Connecting,
    Connected,
    /// Connected with a pass in flight
    Draining,
}

impl LinkState {
    /// True when the sink is believed reachable.
    pub fn is_connected(self) -> bool {
        matches!(self, Self::Connected | Self::Draining)
    }
}

impl fmt::Display for LinkState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Draining => "draining",
        };
        f.write_str(s)
    }
}

/// Read-only view of the reconciler's link state
#[derive(Clone)]
pub struct StatusReader {
    rx: watch::Receiver<LinkState>,
}

impl StatusReader {
    pub fn state(&self) -> LinkState {
        *self.rx.borrow()
    }

    pub fn is_connected(&self) -> bool {
        self.state().is_connected()
    }

    /// Wait for the next state change and return the new state.
    pub async fn changed(&mut self) -> Option<LinkState> {
        self.rx.changed().await.ok()?;
        Some(*self.rx.borrow_and_update())
    }
}

/// Outcome of one reconciliation pass
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PassReport {
    /// Device records delivered
    pub device: usize,
    /// Event records delivered
    pub event: usize,
    /// Malformed records dropped (and marked)
    pub dropped: usize,
}

impl PassReport {
    /// Rows flipped to synced by this pass
    pub fn marked(&self) -> usize {
        self.device + self.event + self.dropped
    }

    fn add(&mut self, kind: RecordKind, delivered: usize, dropped: usize) {
        match kind {
            RecordKind::Device => self.device += delivered,
            RecordKind::Event => self.event += delivered,
        }
        self.dropped += dropped;
    }
}

enum Command {
    SyncNow(oneshot::Sender<Result<usize>>),
    LinkFailed,
}

/// Command stream consumed by [`Reconciler::run`]
pub struct Commands(mpsc::Receiver<Command>);

/// Cloneable handle for the router and operators
#[derive(Clone)]
pub struct ReconcilerHandle {
    status: StatusReader,
    commands: mpsc::Sender<Command>,
}

impl ReconcilerHandle {
    pub fn status(&self) -> &StatusReader {
        &self.status
    }

    /// Run one pass on the reconciler's worker and return the rows marked.
    pub async fn sync_now(&self) -> Result<usize> {
        let (reply, rx) = oneshot::channel();
        self.commands
            .send(Command::SyncNow(reply))
            .await
            .map_err(|_| RelayError::ShuttingDown)?;
        rx.await.map_err(|_| RelayError::ShuttingDown)?
    }

    /// Tell the reconciler a direct write failed.
    ///
    /// Never blocks; if the worker is busy the report is dropped and the
    /// next pass finds out on its own.
    pub fn report_link_failure(&self) {
        let _ = self.commands.try_send(Command::LinkFailed);
    }
}

struct InFlight<'a>(&'a AtomicBool);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Buffer-to-sink reconciler
pub struct Reconciler<S: BufferStore, K: Sink> {
    store: Arc<S>,
    sink: Arc<K>,
    batch_size: usize,
    sync_interval: Duration,
    sink_timeout: Duration,
    index_prefix: String,
    offline: bool,
    status: watch::Sender<LinkState>,
    handle: ReconcilerHandle,
    in_flight: AtomicBool,
    shutdown: ShutdownSignal,
}

impl<S: BufferStore, K: Sink> Reconciler<S, K> {
    /// Create a reconciler and the command stream its `run` loop consumes.
    pub fn new(
        config: &Config,
        store: Arc<S>,
        sink: Arc<K>,
        shutdown: ShutdownSignal,
    ) -> (Self, Commands) {
        let (status, status_rx) = watch::channel(LinkState::Disconnected);
        let (commands_tx, commands_rx) = mpsc::channel(64);

        let reconciler = Self {
            store,
            sink,
            batch_size: config.batch_size,
            sync_interval: config.sync_interval(),
            sink_timeout: config.sink_timeout(),
            index_prefix: config.index_prefix.clone(),
            offline: config.offline_mode,
            status,
            handle: ReconcilerHandle {
                status: StatusReader { rx: status_rx },
                commands: commands_tx,
            },
            in_flight: AtomicBool::new(false),
            shutdown,
        };

        (reconciler, Commands(commands_rx))
    }

    pub fn handle(&self) -> ReconcilerHandle {
        self.handle.clone()
    }

    pub fn status(&self) -> StatusReader {
        self.handle.status.clone()
    }

    /// Run one pass and return the number of rows marked synced.
    pub async fn sync_now(&self) -> Result<usize> {
        let report = self.sync_once().await?;
        tracing::info!("Manual sync: {} records synced", report.marked());
        Ok(report.marked())
    }

    /// Run one reconciliation pass.
    ///
    /// Sink failures end the pass early and leave the link `Disconnected`;
    /// they are not errors. Only storage faults and an overlapping pass are.
    pub async fn sync_once(&self) -> Result<PassReport> {
        if self
            .in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(RelayError::PassInFlight);
        }
        let _guard = InFlight(&self.in_flight);

        let mut report = PassReport::default();
        if self.offline || !self.ensure_connected().await {
            return Ok(report);
        }

        self.set_state(LinkState::Draining);

        for kind in RecordKind::ALL {
            if self.shutdown.is_set() {
                tracing::info!("Shutdown requested, stopping pass before {} batch", kind);
                break;
            }

            match self.drain_kind(kind).await {
                Ok((delivered, dropped)) => report.add(kind, delivered, dropped),
                Err(e) if e.is_storage_fault() => {
                    tracing::error!("Storage fault while draining {} records: {}", kind, e);
                    self.set_state(LinkState::Connected);
                    return Err(e);
                }
                Err(e) => {
                    tracing::warn!("Bulk write of {} records failed: {}", kind, e);
                    self.set_state(LinkState::Disconnected);
                    return Ok(report);
                }
            }
        }

        self.set_state(LinkState::Connected);
        Ok(report)
    }

    /// Background loop: a pass per interval, plus manual commands.
    pub async fn run(&self, commands: Commands) -> Result<()> {
        let Commands(mut commands) = commands;
        let mut shutdown = self.shutdown.clone();

        tracing::info!(
            "Reconciler started (sink: {}, interval: {}s, batch: {})",
            self.sink.name(),
            self.sync_interval.as_secs(),
            self.batch_size
        );

        let mut ticker = interval(self.sync_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = shutdown.wait() => break,

                _ = ticker.tick() => self.scheduled_pass().await,

                Some(cmd) = commands.recv() => match cmd {
                    Command::SyncNow(reply) => {
                        let _ = reply.send(self.sync_now().await);
                    }
                    Command::LinkFailed => self.mark_disconnected(),
                },
            }
        }

        tracing::info!("Reconciler stopped");
        Ok(())
    }

    async fn scheduled_pass(&self) {
        match self.sync_once().await {
            Ok(report) if report.marked() > 0 => {
                tracing::info!(
                    "Background sync: {} records synced ({} devices, {} events, {} dropped)",
                    report.marked(),
                    report.device,
                    report.event,
                    report.dropped
                );
            }
            Ok(_) => {}
            Err(RelayError::PassInFlight) => {
                tracing::debug!("Skipping tick, pass already in flight");
            }
            Err(e) => tracing::error!("Background sync error: {}", e),
        }
    }

    async fn ensure_connected(&self) -> bool {
        if self.current_state().is_connected() && self.sink.is_connected() {
            return true;
        }

        self.set_state(LinkState::Connecting);
        match tokio::time::timeout(self.sink_timeout, self.sink.connect()).await {
            Ok(Ok(())) => {
                tracing::info!("Connected to {} sink", self.sink.name());
                self.set_state(LinkState::Connected);
                true
            }
            Ok(Err(e)) => {
                tracing::warn!("Failed to connect to {} sink: {}", self.sink.name(), e);
                self.set_state(LinkState::Disconnected);
                false
            }
            Err(_) => {
                tracing::warn!(
                    "Connecting to {} sink timed out after {:?}",
                    self.sink.name(),
                    self.sink_timeout
                );
                self.set_state(LinkState::Disconnected);
                false
            }
        }
    }

    /// Deliver one batch of `kind`. Returns (delivered, dropped).
    async fn drain_kind(&self, kind: RecordKind) -> Result<(usize, usize)> {
        let records = self.store.pull_unsynced(kind, self.batch_size)?;
        if records.is_empty() {
            return Ok((0, 0));
        }

        let mut docs = Vec::with_capacity(records.len());
        let mut ids = Vec::with_capacity(records.len());
        let mut dropped = Vec::new();

        for record in &records {
            match self.sink.prepare(RecordRef::from(record), &self.index_prefix) {
                Ok(doc) => {
                    docs.push(doc);
                    ids.push(record.id);
                }
                Err(e) => {
                    tracing::warn!("Dropping malformed {} record {}: {}", kind, record.id, e);
                    dropped.push(record.id);
                }
            }
        }

        if !docs.is_empty() {
            match tokio::time::timeout(self.sink_timeout, self.sink.bulk_write(kind, &docs)).await
            {
                Ok(Ok(())) => {}
                Ok(Err(e)) => return Err(e.into()),
                Err(_) => return Err(RelayError::Timeout(self.sink_timeout.as_millis() as u64)),
            }
        }

        let delivered = ids.len();
        ids.extend_from_slice(&dropped);
        let marked = self.store.mark_synced(kind, &ids)?;
        tracing::debug!(
            "Synced {} {} records ({} newly marked, {} dropped)",
            delivered,
            kind,
            marked,
            dropped.len()
        );

        Ok((delivered, dropped.len()))
    }

    fn current_state(&self) -> LinkState {
        *self.status.borrow()
    }

    fn set_state(&self, state: LinkState) {
        let previous = self.status.send_replace(state);
        if previous != state {
            tracing::debug!("Link state: {} -> {}", previous, state);
        }
    }

    fn mark_disconnected(&self) {
        self.status.send_if_modified(|state| {
            if *state == LinkState::Connected {
                *state = LinkState::Disconnected;
                true
            } else {
                false
            }
        });
    }
}

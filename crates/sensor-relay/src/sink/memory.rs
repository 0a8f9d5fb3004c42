// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! In-process sink
//!
//! Keeps accepted documents in memory. Outages, rejected batches, partial
//! acceptance and latency can be injected, which makes it the stand-in for a
//! remote destination in tests and dry runs.

use super::{Sink, SinkDocument, SinkError};
use crate::record::RecordKind;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

/// Memory-backed sink with failure injection
pub struct MemorySink {
    available: AtomicBool,
    connected: AtomicBool,
    fail_next: AtomicUsize,
    partial_next: Mutex<Option<usize>>,
    latency: Mutex<Option<Duration>>,
    received: Mutex<Vec<(RecordKind, SinkDocument)>>,
    bulk_calls: AtomicUsize,
    single_calls: AtomicUsize,
}

impl MemorySink {
    /// Create a reachable sink (not yet connected)
    pub fn new() -> Self {
        Self {
            available: AtomicBool::new(true),
            connected: AtomicBool::new(false),
            fail_next: AtomicUsize::new(0),
            partial_next: Mutex::new(None),
            latency: Mutex::new(None),
            received: Mutex::new(Vec::new()),
            bulk_calls: AtomicUsize::new(0),
            single_calls: AtomicUsize::new(0),
        }
    }

    /// Bring the destination up or take it down.
    ///
    /// Taking it down also drops the current connection.
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
        if !available {
            self.connected.store(false, Ordering::SeqCst);
        }
    }

    /// Reject the next `n` writes without storing anything.
    pub fn fail_next_writes(&self, n: usize) {
        self.fail_next.store(n, Ordering::SeqCst);
    }

    /// Apply only the first `accepted` documents of the next bulk write,
    /// then report a partial failure.
    pub fn partial_next_bulk(&self, accepted: usize) {
        *self.partial_next.lock() = Some(accepted);
    }

    /// Delay every write by `latency`.
    pub fn set_latency(&self, latency: Option<Duration>) {
        *self.latency.lock() = latency;
    }

    /// All accepted documents, in arrival order.
    pub fn received(&self) -> Vec<(RecordKind, SinkDocument)> {
        self.received.lock().clone()
    }

    /// Number of accepted documents of `kind`.
    pub fn received_count(&self, kind: RecordKind) -> usize {
        self.received.lock().iter().filter(|(k, _)| *k == kind).count()
    }

    pub fn bulk_calls(&self) -> usize {
        self.bulk_calls.load(Ordering::SeqCst)
    }

    pub fn single_calls(&self) -> usize {
        self.single_calls.load(Ordering::SeqCst)
    }

    async fn accept(&self, kind: RecordKind, docs: &[SinkDocument]) -> Result<(), SinkError> {
        let latency = *self.latency.lock();
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }

        if !self.available.load(Ordering::SeqCst) {
            self.connected.store(false, Ordering::SeqCst);
            return Err(SinkError::Unavailable("destination down".into()));
        }
        if !self.connected.load(Ordering::SeqCst) {
            return Err(SinkError::NotConnected);
        }

        let failing = self
            .fail_next
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(SinkError::Rejected("injected failure".into()));
        }

        let partial = self.partial_next.lock().take();
        let mut received = self.received.lock();
        match partial {
            Some(accepted) if accepted < docs.len() => {
                received.extend(docs[..accepted].iter().map(|d| (kind, d.clone())));
                Err(SinkError::Partial {
                    accepted,
                    total: docs.len(),
                })
            }
            _ => {
                received.extend(docs.iter().map(|d| (kind, d.clone())));
                Ok(())
            }
        }
    }
}

impl Default for MemorySink {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Sink for MemorySink {
    fn name(&self) -> &str {
        "memory"
    }

    async fn connect(&self) -> Result<(), SinkError> {
        if self.available.load(Ordering::SeqCst) {
            self.connected.store(true, Ordering::SeqCst);
            Ok(())
        } else {
            Err(SinkError::Unavailable("destination down".into()))
        }
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn write_one(&self, kind: RecordKind, doc: &SinkDocument) -> Result<(), SinkError> {
        self.single_calls.fetch_add(1, Ordering::SeqCst);
        self.accept(kind, std::slice::from_ref(doc)).await
    }

    async fn bulk_write(&self, kind: RecordKind, docs: &[SinkDocument]) -> Result<(), SinkError> {
        self.bulk_calls.fetch_add(1, Ordering::SeqCst);
        self.accept(kind, docs).await
    }

    async fn close(&self) {
        self.connected.store(false, Ordering::SeqCst);
    }
}

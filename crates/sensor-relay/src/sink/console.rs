// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Console sink (for testing/debugging). Every document goes to the log.

use super::{Sink, SinkDocument, SinkError};
use crate::record::RecordKind;
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

#[derive(Default)]
pub struct ConsoleSink {
    connected: AtomicBool,
    written: AtomicU64,
}

impl ConsoleSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Documents logged so far
    pub fn written(&self) -> u64 {
        self.written.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl Sink for ConsoleSink {
    fn name(&self) -> &str {
        "console"
    }

    async fn connect(&self) -> Result<(), SinkError> {
        self.connected.store(true, Ordering::Relaxed);
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Relaxed)
    }

    async fn bulk_write(&self, kind: RecordKind, docs: &[SinkDocument]) -> Result<(), SinkError> {
        for doc in docs {
            let n = self.written.fetch_add(1, Ordering::Relaxed) + 1;
            match kind {
                RecordKind::Device => tracing::info!(
                    "[{}] Device {} ({}) -> {} signal={}dBm packets={}",
                    n,
                    doc.source["mac_addr"].as_str().unwrap_or("?"),
                    doc.source["name"].as_str().filter(|s| !s.is_empty()).unwrap_or("Unknown"),
                    doc.index,
                    doc.source["signal_dbm"],
                    doc.source["total_packets"],
                ),
                RecordKind::Event => {
                    tracing::info!("[{}] Event {} -> {}: {}", n, doc.id, doc.index, doc.source)
                }
            }
        }
        Ok(())
    }

    async fn close(&self) {
        self.connected.store(false, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_console_sink_counts() {
        let sink = ConsoleSink::new();
        sink.connect().await.unwrap();

        let doc = SinkDocument {
            index: "sensor-events-2026.03".into(),
            id: "1".into(),
            source: serde_json::json!({"event_type": "ALERT"}),
        };
        sink.write_one(RecordKind::Event, &doc).await.unwrap();
        assert_eq!(sink.written(), 1);
    }
}

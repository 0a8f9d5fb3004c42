// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Raw socket sink.
//!
//! Writes one JSON document per line to a TCP peer:
//!
//! ```text
//! {"index":"sensor-devices-2026.03","id":"AA:BB:..-1772366400","source":{...}}\n
//! ```
//!
//! A batch counts as delivered once every line is written and flushed.
//! Any I/O error drops the connection; the next `connect` opens a new one.

use super::{Sink, SinkDocument, SinkError};
use crate::record::RecordKind;
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::io::{AsyncWriteExt, BufWriter};
use tokio::net::TcpStream;
use tokio::sync::Mutex;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Newline-delimited JSON over TCP
pub struct TcpSink {
    addr: String,
    stream: Mutex<Option<BufWriter<TcpStream>>>,
    connected: AtomicBool,
}

impl TcpSink {
    /// Create a sink for `host:port`. Nothing is opened until `connect`.
    pub fn new(addr: impl Into<String>) -> Self {
        Self {
            addr: addr.into(),
            stream: Mutex::new(None),
            connected: AtomicBool::new(false),
        }
    }

    pub fn addr(&self) -> &str {
        &self.addr
    }

    async fn write_lines(
        writer: &mut BufWriter<TcpStream>,
        docs: &[SinkDocument],
    ) -> Result<(), SinkError> {
        for doc in docs {
            let mut line =
                serde_json::to_vec(doc).map_err(|e| SinkError::Malformed(e.to_string()))?;
            line.push(b'\n');
            writer.write_all(&line).await?;
        }
        writer.flush().await?;
        Ok(())
    }
}

#[async_trait]
impl Sink for TcpSink {
    fn name(&self) -> &str {
        "tcp"
    }

    async fn connect(&self) -> Result<(), SinkError> {
        let stream = tokio::time::timeout(CONNECT_TIMEOUT, TcpStream::connect(&self.addr))
            .await
            .map_err(|_| SinkError::Unavailable(format!("connect to {} timed out", self.addr)))?
            .map_err(|e| SinkError::Unavailable(format!("connect to {}: {}", self.addr, e)))?;
        stream.set_nodelay(true)?;

        *self.stream.lock().await = Some(BufWriter::new(stream));
        self.connected.store(true, Ordering::SeqCst);
        tracing::info!("Connected to TCP sink at {}", self.addr);
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn bulk_write(&self, _kind: RecordKind, docs: &[SinkDocument]) -> Result<(), SinkError> {
        let mut guard = self.stream.lock().await;
        let writer = guard.as_mut().ok_or(SinkError::NotConnected)?;

        let result = Self::write_lines(writer, docs).await;
        if let Err(SinkError::Io(ref e)) = result {
            tracing::warn!("TCP sink {} lost: {}", self.addr, e);
            *guard = None;
            self.connected.store(false, Ordering::SeqCst);
        }
        result
    }

    async fn close(&self) {
        if let Some(mut writer) = self.stream.lock().await.take() {
            let _ = writer.shutdown().await;
        }
        self.connected.store(false, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncBufReadExt, BufReader};
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn test_tcp_sink_writes_ndjson() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();

        let reader = tokio::spawn(async move {
            let (socket, _) = listener.accept().await.unwrap();
            let mut lines = BufReader::new(socket).lines();
            let mut out = Vec::new();
            while let Some(line) = lines.next_line().await.unwrap() {
                out.push(line);
            }
            out
        });

        let sink = TcpSink::new(addr);
        sink.connect().await.unwrap();
        assert!(sink.is_connected());

        let docs: Vec<_> = (0..3)
            .map(|i| SinkDocument {
                index: "sensor-events-2026.03".into(),
                id: format!("e{}", i),
                source: serde_json::json!({ "n": i }),
            })
            .collect();
        sink.bulk_write(RecordKind::Event, &docs).await.unwrap();
        sink.close().await;

        let lines = reader.await.unwrap();
        assert_eq!(lines.len(), 3);
        let first: serde_json::Value = serde_json::from_str(&lines[0]).unwrap();
        assert_eq!(first["id"], "e0");
        assert_eq!(first["source"]["n"], 0);
    }

    #[tokio::test]
    async fn test_tcp_sink_connect_refused() {
        // Bind then drop to get a port with no listener
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        drop(listener);

        let sink = TcpSink::new(addr);
        assert!(matches!(
            sink.connect().await,
            Err(SinkError::Unavailable(_))
        ));
        assert!(!sink.is_connected());
    }

    #[tokio::test]
    async fn test_tcp_sink_write_before_connect() {
        let sink = TcpSink::new("127.0.0.1:9");
        let doc = SinkDocument {
            index: "i".into(),
            id: "x".into(),
            source: serde_json::json!({}),
        };
        assert!(matches!(
            sink.write_one(RecordKind::Event, &doc).await,
            Err(SinkError::NotConnected)
        ));
    }
}

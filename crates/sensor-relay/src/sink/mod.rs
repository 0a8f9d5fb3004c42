// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Sink adapters
//!
//! A sink delivers documents to one remote destination. The relay core only
//! sees the [`Sink`] trait; destination schemas live in the adapters.
//!
//! ```text
//! BufferedRecord --prepare--> SinkDocument --bulk_write--> destination
//! ```
//!
//! Document ids are deterministic so a batch that is re-sent after a lost
//! acknowledgment overwrites instead of duplicating.

pub mod console;
pub mod memory;
pub mod tcp;

pub use console::ConsoleSink;
pub use memory::MemorySink;
pub use tcp::TcpSink;

use crate::record::{BufferedRecord, RecordKind};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

/// Sink adapter errors
#[derive(Debug, Error)]
pub enum SinkError {
    #[error("Sink unavailable: {0}")]
    Unavailable(String),

    #[error("Sink not connected")]
    NotConnected,

    #[error("Write rejected: {0}")]
    Rejected(String),

    #[error("Partial write: {accepted}/{total} documents accepted")]
    Partial { accepted: usize, total: usize },

    #[error("Malformed record: {0}")]
    Malformed(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Borrowed view of a record on its way to a sink
#[derive(Debug, Clone, Copy)]
pub struct RecordRef<'a> {
    pub kind: RecordKind,
    pub captured_at: DateTime<Utc>,
    pub payload: &'a str,
}

impl<'a> From<&'a BufferedRecord> for RecordRef<'a> {
    fn from(r: &'a BufferedRecord) -> Self {
        Self {
            kind: r.kind,
            captured_at: r.captured_at,
            payload: &r.payload,
        }
    }
}

/// A record in destination form
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SinkDocument {
    /// Destination partition, e.g. `sensor-devices-2026.03`
    pub index: String,
    /// Deterministic document id
    pub id: String,
    pub source: Value,
}

impl SinkDocument {
    /// Build the default document for a record.
    ///
    /// The partition comes from the capture time, not the enqueue time, so a
    /// record drained days later still lands next to its neighbours.
    pub fn from_record(record: RecordRef<'_>, index_prefix: &str) -> Result<Self, SinkError> {
        let mut source: Value = serde_json::from_str(record.payload)
            .map_err(|e| SinkError::Malformed(e.to_string()))?;

        let obj = source
            .as_object_mut()
            .ok_or_else(|| SinkError::Malformed("payload is not a JSON object".into()))?;

        let id = match record.kind {
            RecordKind::Device => {
                let mac = obj
                    .get("mac_addr")
                    .and_then(Value::as_str)
                    .filter(|m| !m.is_empty())
                    .ok_or_else(|| SinkError::Malformed("device without mac_addr".into()))?;
                format!("{}-{}", mac, record.captured_at.timestamp())
            }
            RecordKind::Event => {
                let bucket = record.captured_at.timestamp().div_euclid(60);
                format!(
                    "{:016x}",
                    fnv1a(&[
                        record.kind.as_str().as_bytes(),
                        record.payload.as_bytes(),
                        &bucket.to_le_bytes(),
                    ])
                )
            }
        };

        if record.kind == RecordKind::Device {
            let lat = obj.get("latitude").and_then(Value::as_f64);
            let lon = obj.get("longitude").and_then(Value::as_f64);
            if let (Some(lat), Some(lon)) = (lat, lon) {
                if lat != 0.0 && lon != 0.0 {
                    obj.insert(
                        "location".to_string(),
                        serde_json::json!({ "lat": lat, "lon": lon }),
                    );
                }
            }
        }

        Ok(Self {
            index: index_name(index_prefix, record.kind, record.captured_at),
            id,
            source,
        })
    }
}

/// Monthly partition name for a kind.
pub fn index_name(prefix: &str, kind: RecordKind, captured_at: DateTime<Utc>) -> String {
    let stream = match kind {
        RecordKind::Device => "devices",
        RecordKind::Event => "events",
    };
    format!("{}-{}-{}", prefix, stream, captured_at.format("%Y.%m"))
}

fn fnv1a(parts: &[&[u8]]) -> u64 {
    const OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
    const PRIME: u64 = 0x0000_0100_0000_01b3;

    parts
        .iter()
        .flat_map(|p| p.iter())
        .fold(OFFSET, |hash, b| (hash ^ u64::from(*b)).wrapping_mul(PRIME))
}

/// Destination adapter
///
/// All methods take `&self`; adapters keep their connection behind interior
/// mutability so the router and the reconciler can share one instance.
#[async_trait]
pub trait Sink: Send + Sync {
    /// Adapter name for logs
    fn name(&self) -> &str;

    /// Establish (or re-establish) the connection.
    async fn connect(&self) -> Result<(), SinkError>;

    /// Last known connection state.
    fn is_connected(&self) -> bool;

    /// Deliver one document (fast path).
    async fn write_one(&self, kind: RecordKind, doc: &SinkDocument) -> Result<(), SinkError> {
        self.bulk_write(kind, std::slice::from_ref(doc)).await
    }

    /// Deliver a batch. `Ok` means every document was accepted.
    async fn bulk_write(&self, kind: RecordKind, docs: &[SinkDocument]) -> Result<(), SinkError>;

    /// Convert a record to this sink's wire form.
    fn prepare(&self, record: RecordRef<'_>, index_prefix: &str) -> Result<SinkDocument, SinkError> {
        SinkDocument::from_record(record, index_prefix)
    }

    /// Release the connection.
    async fn close(&self) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(y: i32, m: u32, d: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, 12, 0, 0).unwrap()
    }

    #[test]
    fn test_index_name_uses_capture_month() {
        assert_eq!(
            index_name("sensor", RecordKind::Device, at(2026, 3, 1)),
            "sensor-devices-2026.03"
        );
        assert_eq!(
            index_name("lab", RecordKind::Event, at(2025, 12, 31)),
            "lab-events-2025.12"
        );
    }

    #[test]
    fn test_device_document_id_is_deterministic() {
        let payload = r#"{"mac_addr":"AA:BB:CC:00:11:22","latitude":48.1,"longitude":11.5}"#;
        let record = RecordRef {
            kind: RecordKind::Device,
            captured_at: at(2026, 3, 1),
            payload,
        };

        let a = SinkDocument::from_record(record, "sensor").unwrap();
        let b = SinkDocument::from_record(record, "sensor").unwrap();

        assert_eq!(a.id, b.id);
        assert!(a.id.starts_with("AA:BB:CC:00:11:22-"));
        assert_eq!(a.source["location"]["lat"], 48.1);
    }

    #[test]
    fn test_event_id_varies_with_content() {
        let first = RecordRef {
            kind: RecordKind::Event,
            captured_at: at(2026, 3, 1),
            payload: r#"{"event_type":"ALERT","n":1}"#,
        };
        let second = RecordRef {
            payload: r#"{"event_type":"ALERT","n":2}"#,
            ..first
        };

        let a = SinkDocument::from_record(first, "sensor").unwrap();
        let b = SinkDocument::from_record(second, "sensor").unwrap();
        assert_ne!(a.id, b.id);
        assert_eq!(a.id, SinkDocument::from_record(first, "sensor").unwrap().id);
    }

    #[test]
    fn test_malformed_payloads() {
        let not_json = RecordRef {
            kind: RecordKind::Event,
            captured_at: Utc::now(),
            payload: "{oops",
        };
        assert!(matches!(
            SinkDocument::from_record(not_json, "s"),
            Err(SinkError::Malformed(_))
        ));

        let no_mac = RecordRef {
            kind: RecordKind::Device,
            captured_at: Utc::now(),
            payload: r#"{"name":"x"}"#,
        };
        assert!(matches!(
            SinkDocument::from_record(no_mac, "s"),
            Err(SinkError::Malformed(_))
        ));
    }
}

// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Record types
//!
//! [`SourceRecord`] is the typed form a record has at the ingress boundary.
//! Once it enters the buffer it becomes a [`BufferedRecord`] whose payload is
//! opaque JSON text.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Record stream a row belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordKind {
    Device,
    Event,
}

impl RecordKind {
    /// Both kinds, in reconciliation order
    pub const ALL: [RecordKind; 2] = [RecordKind::Device, RecordKind::Event];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Device => "device",
            Self::Event => "event",
        }
    }

    /// Buffer table holding this kind
    pub(crate) fn table(self) -> &'static str {
        match self {
            Self::Device => "device_buffer",
            Self::Event => "event_buffer",
        }
    }
}

impl fmt::Display for RecordKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RecordKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "device" | "devices" => Ok(Self::Device),
            "event" | "events" => Ok(Self::Event),
            other => Err(format!("unknown record kind: {}", other)),
        }
    }
}

/// A row of the durable buffer
#[derive(Debug, Clone, PartialEq)]
pub struct BufferedRecord {
    /// Buffer-assigned id, strictly increasing per kind
    pub id: i64,
    pub kind: RecordKind,
    /// Producer timestamp, drives destination partitioning
    pub captured_at: DateTime<Utc>,
    /// Serialized record body (JSON text)
    pub payload: String,
    pub synced: bool,
    /// Insertion time, drives retention
    pub enqueued_at: DateTime<Utc>,
    /// Why the record took the durable path, when known
    pub fallback_reason: Option<String>,
}

/// Signal quality block of a device sighting
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct SignalInfo {
    pub signal_dbm: i64,
    pub noise_dbm: i64,
    pub snr_db: i64,
}

/// Averaged location block of a device sighting
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct LocationInfo {
    pub latitude: f64,
    pub longitude: f64,
    pub altitude: f64,
}

/// A device sighting
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct DeviceRecord {
    #[serde(rename = "timestamp")]
    pub captured_at: DateTime<Utc>,
    pub mac_addr: String,
    pub name: String,
    pub username: String,
    pub phy_type: String,
    pub manufacturer: String,
    /// Epoch seconds
    pub first_seen: i64,
    /// Epoch seconds
    pub last_seen: i64,
    pub channel: String,
    pub frequency: i64,
    pub total_packets: i64,
    pub tx_packets: i64,
    pub rx_packets: i64,
    pub data_size: i64,
    #[serde(flatten, default, skip_serializing_if = "Option::is_none")]
    pub signal: Option<SignalInfo>,
    #[serde(flatten, default, skip_serializing_if = "Option::is_none")]
    pub location: Option<LocationInfo>,
}

/// A discrete event (alert, system message)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventRecord {
    #[serde(rename = "timestamp")]
    pub captured_at: DateTime<Utc>,
    pub event_type: String,
    pub data: serde_json::Value,
}

/// Typed record as produced by a source
#[derive(Debug, Clone, PartialEq)]
pub enum SourceRecord {
    Device(DeviceRecord),
    Event(EventRecord),
}

impl SourceRecord {
    pub fn kind(&self) -> RecordKind {
        match self {
            Self::Device(_) => RecordKind::Device,
            Self::Event(_) => RecordKind::Event,
        }
    }

    pub fn captured_at(&self) -> DateTime<Utc> {
        match self {
            Self::Device(d) => d.captured_at,
            Self::Event(e) => e.captured_at,
        }
    }

    /// Serialize the record body for the buffer and the sink.
    pub fn to_payload(&self) -> serde_json::Result<String> {
        match self {
            Self::Device(d) => serde_json::to_string(d),
            Self::Event(e) => serde_json::to_string(e),
        }
    }
}

impl From<DeviceRecord> for SourceRecord {
    fn from(d: DeviceRecord) -> Self {
        Self::Device(d)
    }
}

impl From<EventRecord> for SourceRecord {
    fn from(e: EventRecord) -> Self {
        Self::Event(e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_parsing() {
        assert_eq!("device".parse::<RecordKind>().unwrap(), RecordKind::Device);
        assert_eq!("events".parse::<RecordKind>().unwrap(), RecordKind::Event);
        assert!("alert".parse::<RecordKind>().is_err());
        assert_eq!(RecordKind::Event.table(), "event_buffer");
    }

    #[test]
    fn test_device_payload_flattens_optional_blocks() {
        let device = DeviceRecord {
            mac_addr: "AA:BB:CC:DD:EE:FF".to_string(),
            signal: Some(SignalInfo {
                signal_dbm: -42,
                noise_dbm: -95,
                snr_db: 53,
            }),
            ..Default::default()
        };

        let payload = SourceRecord::from(device).to_payload().unwrap();
        let value: serde_json::Value = serde_json::from_str(&payload).unwrap();

        assert_eq!(value["mac_addr"], "AA:BB:CC:DD:EE:FF");
        assert_eq!(value["signal_dbm"], -42);
        assert!(value.get("latitude").is_none());
        assert!(value.get("timestamp").is_some());
    }

    #[test]
    fn test_event_kind() {
        let record = SourceRecord::Event(EventRecord {
            captured_at: Utc::now(),
            event_type: "ALERT".to_string(),
            data: serde_json::json!({"text": "deauth flood"}),
        });
        assert_eq!(record.kind(), RecordKind::Event);
    }
}

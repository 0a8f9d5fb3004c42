// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Source record normalisation
//!
//! Sensors report devices as flat maps keyed by dotted field names. This
//! module turns those maps into [`DeviceRecord`] / [`EventRecord`] at the
//! ingress boundary so nothing past the router handles untyped maps.
//!
//! The CLI source reads one JSON object per line:
//!
//! ```text
//! {"kind":"device","captured_at":"2026-03-01T12:00:00Z","data":{"kismet.device.base.macaddr":"..."}}
//! {"kind":"event","data":{"event_type":"ALERT","text":"..."}}
//! ```

use crate::record::{
    DeviceRecord, EventRecord, LocationInfo, RecordKind, SignalInfo, SourceRecord,
};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;

const FIELD_MACADDR: &str = "kismet.device.base.macaddr";
const FIELD_NAME: &str = "kismet.device.base.name";
const FIELD_USERNAME: &str = "kismet.device.base.username";
const FIELD_PHYNAME: &str = "kismet.device.base.phyname";
const FIELD_MANUF: &str = "kismet.device.base.manuf";
const FIELD_FIRST_TIME: &str = "kismet.device.base.first_time";
const FIELD_LAST_TIME: &str = "kismet.device.base.last_time";
const FIELD_CHANNEL: &str = "kismet.device.base.channel";
const FIELD_FREQUENCY: &str = "kismet.device.base.frequency";
const FIELD_PACKETS_TOTAL: &str = "kismet.device.base.packets.total";
const FIELD_PACKETS_TX: &str = "kismet.device.base.packets.tx";
const FIELD_PACKETS_RX: &str = "kismet.device.base.packets.rx";
const FIELD_DATASIZE: &str = "kismet.device.base.datasize";
const FIELD_SIGNAL: &str = "kismet.device.base.signal";
const FIELD_LOCATION: &str = "kismet.device.base.location";

const SIGNAL_LAST: &str = "kismet.common.signal.last_signal";
const SIGNAL_NOISE: &str = "kismet.common.signal.last_noise";
const SIGNAL_SNR: &str = "kismet.common.signal.last_snr";

const LOCATION_LAT: &str = "kismet.common.location.avg_lat";
const LOCATION_LON: &str = "kismet.common.location.avg_lon";
const LOCATION_ALT: &str = "kismet.common.location.avg_alt";

const EVENT_TYPE_KEYS: [&str; 2] = ["event_type", "kismet.eventbus.type"];

/// Errors while reading source input
#[derive(Debug, Error)]
pub enum SourceError {
    #[error("Invalid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Expected a JSON object for {0} data")]
    NotAnObject(RecordKind),
}

/// One line of source input
#[derive(Debug, Deserialize)]
struct SourceLine {
    kind: RecordKind,
    #[serde(default)]
    captured_at: Option<DateTime<Utc>>,
    data: Value,
}

/// Parse one NDJSON source line; missing `captured_at` means "now".
pub fn parse_line(line: &str) -> Result<SourceRecord, SourceError> {
    let parsed: SourceLine = serde_json::from_str(line)?;
    let captured_at = parsed.captured_at.unwrap_or_else(Utc::now);

    match parsed.kind {
        RecordKind::Device => device_from_json(&parsed.data, captured_at).map(Into::into),
        RecordKind::Event => event_from_json(&parsed.data, captured_at).map(Into::into),
    }
}

/// Map a raw device report to a [`DeviceRecord`].
///
/// Missing fields default to empty/zero. The signal and location blocks are
/// only filled when the report carries them.
pub fn device_from_json(
    raw: &Value,
    captured_at: DateTime<Utc>,
) -> Result<DeviceRecord, SourceError> {
    let obj = raw
        .as_object()
        .ok_or(SourceError::NotAnObject(RecordKind::Device))?;

    let signal = obj
        .get(FIELD_SIGNAL)
        .filter(|v| is_populated(v))
        .map(|s| SignalInfo {
            signal_dbm: int_field(s, SIGNAL_LAST),
            noise_dbm: int_field(s, SIGNAL_NOISE),
            snr_db: int_field(s, SIGNAL_SNR),
        });

    let location = obj
        .get(FIELD_LOCATION)
        .filter(|v| is_populated(v))
        .map(|l| LocationInfo {
            latitude: float_field(l, LOCATION_LAT),
            longitude: float_field(l, LOCATION_LON),
            altitude: float_field(l, LOCATION_ALT),
        });

    Ok(DeviceRecord {
        captured_at,
        mac_addr: str_field(raw, FIELD_MACADDR),
        name: str_field(raw, FIELD_NAME),
        username: str_field(raw, FIELD_USERNAME),
        phy_type: str_field(raw, FIELD_PHYNAME),
        manufacturer: str_field(raw, FIELD_MANUF),
        first_seen: int_field(raw, FIELD_FIRST_TIME),
        last_seen: int_field(raw, FIELD_LAST_TIME),
        channel: str_field(raw, FIELD_CHANNEL),
        frequency: int_field(raw, FIELD_FREQUENCY),
        total_packets: int_field(raw, FIELD_PACKETS_TOTAL),
        tx_packets: int_field(raw, FIELD_PACKETS_TX),
        rx_packets: int_field(raw, FIELD_PACKETS_RX),
        data_size: int_field(raw, FIELD_DATASIZE),
        signal,
        location,
    })
}

/// Map a raw event-bus message to an [`EventRecord`].
pub fn event_from_json(
    raw: &Value,
    captured_at: DateTime<Utc>,
) -> Result<EventRecord, SourceError> {
    if !raw.is_object() {
        return Err(SourceError::NotAnObject(RecordKind::Event));
    }

    let event_type = EVENT_TYPE_KEYS
        .iter()
        .find_map(|key| raw.get(*key).and_then(Value::as_str))
        .unwrap_or("unknown")
        .to_string();

    Ok(EventRecord {
        captured_at,
        event_type,
        data: raw.clone(),
    })
}

fn is_populated(v: &Value) -> bool {
    match v {
        Value::Null => false,
        Value::Object(map) => !map.is_empty(),
        _ => true,
    }
}

fn str_field(v: &Value, key: &str) -> String {
    match v.get(key) {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Number(n)) => n.to_string(),
        _ => String::new(),
    }
}

// Sensors emit some counters as floats; truncate rather than drop them.
fn int_field(v: &Value, key: &str) -> i64 {
    v.get(key)
        .and_then(|n| n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)))
        .unwrap_or(0)
}

fn float_field(v: &Value, key: &str) -> f64 {
    v.get(key).and_then(Value::as_f64).unwrap_or(0.0)
}

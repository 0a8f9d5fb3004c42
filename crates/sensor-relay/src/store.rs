// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Durable buffer abstraction
//!
//! Defines the trait for buffer backends. The buffer never interprets
//! payloads; it only tracks ids, timestamps and the synced flag.

use crate::error::Result;
use crate::record::{BufferedRecord, RecordKind};
use chrono::{DateTime, Utc};
use serde::Serialize;

/// Row counts for one record kind
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct KindStats {
    pub unsynced: u64,
    pub total: u64,
}

/// Row counts for the whole buffer
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BufferStats {
    pub device: KindStats,
    pub event: KindStats,
}

impl BufferStats {
    pub fn for_kind(&self, kind: RecordKind) -> KindStats {
        match kind {
            RecordKind::Device => self.device,
            RecordKind::Event => self.event,
        }
    }

    pub fn unsynced_devices(&self) -> u64 {
        self.device.unsynced
    }

    pub fn unsynced_events(&self) -> u64 {
        self.event.unsynced
    }

    pub fn total_unsynced(&self) -> u64 {
        self.device.unsynced + self.event.unsynced
    }
}

/// Durable buffer trait
///
/// Each call is one short transaction; implementations must be safe to call
/// from the ingress path and the reconciler at the same time.
///
/// # Implementations
///
/// - `SqliteBuffer` -- file-backed, crash safe
pub trait BufferStore: Send + Sync {
    /// Append a record and return its id.
    ///
    /// The record is durable when this returns. Fails with `StorageFault`
    /// only when the medium is unwritable.
    fn insert(
        &self,
        kind: RecordKind,
        captured_at: DateTime<Utc>,
        payload: &str,
        fallback_reason: Option<&str>,
    ) -> Result<i64>;

    /// Up to `limit` unsynced records of `kind`, oldest id first.
    fn pull_unsynced(&self, kind: RecordKind, limit: usize) -> Result<Vec<BufferedRecord>>;

    /// Flip `synced` for `ids` in one transaction.
    ///
    /// Already-synced or unknown ids are no-ops. Returns the number of rows
    /// that changed state.
    fn mark_synced(&self, kind: RecordKind, ids: &[i64]) -> Result<usize>;

    /// Delete rows enqueued before `cutoff` across all kinds.
    ///
    /// With `only_synced` set, unsynced rows are never touched.
    fn delete_older_than(&self, cutoff: DateTime<Utc>, only_synced: bool) -> Result<usize>;

    /// Per-kind unsynced/total counts.
    fn stats(&self) -> Result<BufferStats>;

    /// Fetch a single record.
    fn get(&self, kind: RecordKind, id: i64) -> Result<Option<BufferedRecord>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stats_accessors() {
        let stats = BufferStats {
            device: KindStats {
                unsynced: 5,
                total: 8,
            },
            event: KindStats {
                unsynced: 1,
                total: 1,
            },
        };

        assert_eq!(stats.unsynced_devices(), 5);
        assert_eq!(stats.unsynced_events(), 1);
        assert_eq!(stats.total_unsynced(), 6);
        assert_eq!(stats.for_kind(RecordKind::Device).total, 8);
    }
}

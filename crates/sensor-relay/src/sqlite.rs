// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! SQLite durable buffer
//!
//! One table per record kind so a backlog of one stream never sits in front
//! of the other.

use crate::error::{RelayError, Result};
use crate::record::{BufferedRecord, RecordKind};
use crate::store::{BufferStats, BufferStore, KindStats};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rusqlite::{params, Connection};
use std::path::Path;
use std::time::Duration;

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// SQLite buffer store
///
/// File-backed buffers run in WAL mode with two connections: one owned by
/// the ingress path (`insert`) and one shared by the reconciler and the
/// sweeper. Readers never block the inserting connection. In-memory buffers
/// share a single connection.
///
/// # Schema (per kind)
///
/// ```sql
/// CREATE TABLE device_buffer (
///     id INTEGER PRIMARY KEY AUTOINCREMENT,
///     captured_at INTEGER NOT NULL,   -- unix ms
///     payload TEXT NOT NULL,          -- JSON
///     synced INTEGER NOT NULL DEFAULT 0,
///     enqueued_at INTEGER NOT NULL,   -- unix ms
///     fallback_reason TEXT
/// );
/// CREATE INDEX idx_device_buffer_synced ON device_buffer(synced, id);
/// CREATE INDEX idx_device_buffer_captured ON device_buffer(captured_at);
/// ```
pub struct SqliteBuffer {
    ingress: Mutex<Connection>,
    worker: Option<Mutex<Connection>>,
}

impl SqliteBuffer {
    /// Open (or create) a file-based buffer
    pub fn new(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let ingress = Self::open_file(path)?;
        Self::init_schema(&ingress)?;
        let worker = Self::open_file(path)?;

        tracing::debug!("Opened durable buffer at {}", path.display());

        Ok(Self {
            ingress: Mutex::new(ingress),
            worker: Some(Mutex::new(worker)),
        })
    }

    /// Create an in-memory buffer (for testing)
    pub fn new_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Self::init_schema(&conn)?;
        Ok(Self {
            ingress: Mutex::new(conn),
            worker: None,
        })
    }

    fn open_file(path: &Path) -> Result<Connection> {
        let conn = Connection::open(path).map_err(|e| {
            RelayError::StorageFault(format!(
                "Failed to open buffer at {}: {}",
                path.display(),
                e
            ))
        })?;
        conn.busy_timeout(BUSY_TIMEOUT)?;
        // `journal_mode` reports the resulting mode as a row
        let _mode: String = conn.query_row("PRAGMA journal_mode = WAL", [], |row| row.get(0))?;
        conn.pragma_update(None, "synchronous", "FULL")?;
        Ok(conn)
    }

    fn init_schema(conn: &Connection) -> Result<()> {
        for kind in RecordKind::ALL {
            let table = kind.table();
            conn.execute_batch(&format!(
                "CREATE TABLE IF NOT EXISTS {table} (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    captured_at INTEGER NOT NULL,
                    payload TEXT NOT NULL,
                    synced INTEGER NOT NULL DEFAULT 0,
                    enqueued_at INTEGER NOT NULL,
                    fallback_reason TEXT
                );
                CREATE INDEX IF NOT EXISTS idx_{table}_synced ON {table}(synced, id);
                CREATE INDEX IF NOT EXISTS idx_{table}_captured ON {table}(captured_at);"
            ))?;
        }
        Ok(())
    }

    fn worker(&self) -> &Mutex<Connection> {
        self.worker.as_ref().unwrap_or(&self.ingress)
    }

    fn row_to_record(kind: RecordKind, row: &rusqlite::Row) -> rusqlite::Result<BufferedRecord> {
        Ok(BufferedRecord {
            id: row.get(0)?,
            kind,
            captured_at: from_millis(row.get(1)?),
            payload: row.get(2)?,
            synced: row.get::<_, i64>(3)? != 0,
            enqueued_at: from_millis(row.get(4)?),
            fallback_reason: row.get(5)?,
        })
    }
}

fn from_millis(ms: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(ms).unwrap_or_default()
}

fn kind_stats(conn: &Connection, kind: RecordKind) -> rusqlite::Result<KindStats> {
    conn.query_row(
        &format!(
            "SELECT COUNT(*), COALESCE(SUM(synced = 0), 0) FROM {}",
            kind.table()
        ),
        [],
        |row| {
            let total: i64 = row.get(0)?;
            let unsynced: i64 = row.get(1)?;
            Ok(KindStats {
                unsynced: unsynced.max(0) as u64,
                total: total.max(0) as u64,
            })
        },
    )
}

impl BufferStore for SqliteBuffer {
    fn insert(
        &self,
        kind: RecordKind,
        captured_at: DateTime<Utc>,
        payload: &str,
        fallback_reason: Option<&str>,
    ) -> Result<i64> {
        let conn = self.ingress.lock();
        conn.execute(
            &format!(
                "INSERT INTO {} (captured_at, payload, synced, enqueued_at, fallback_reason)
                 VALUES (?1, ?2, 0, ?3, ?4)",
                kind.table()
            ),
            params![
                captured_at.timestamp_millis(),
                payload,
                Utc::now().timestamp_millis(),
                fallback_reason,
            ],
        )?;

        Ok(conn.last_insert_rowid())
    }

    fn pull_unsynced(&self, kind: RecordKind, limit: usize) -> Result<Vec<BufferedRecord>> {
        let conn = self.worker().lock();
        let mut stmt = conn.prepare_cached(&format!(
            "SELECT id, captured_at, payload, synced, enqueued_at, fallback_reason
             FROM {}
             WHERE synced = 0
             ORDER BY id ASC
             LIMIT ?1",
            kind.table()
        ))?;

        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let records = stmt
            .query_map([limit], |row| Self::row_to_record(kind, row))?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(records)
    }

    fn mark_synced(&self, kind: RecordKind, ids: &[i64]) -> Result<usize> {
        if ids.is_empty() {
            return Ok(0);
        }

        let mut conn = self.worker().lock();
        let tx = conn.transaction()?;
        let mut changed = 0;
        {
            let mut update = tx.prepare(&format!(
                "UPDATE {} SET synced = 1 WHERE id = ?1 AND synced = 0",
                kind.table()
            ))?;
            for id in ids {
                changed += update.execute([id])?;
            }
        }
        tx.commit()?;

        Ok(changed)
    }

    fn delete_older_than(&self, cutoff: DateTime<Utc>, only_synced: bool) -> Result<usize> {
        let mut conn = self.worker().lock();
        let tx = conn.transaction()?;
        let mut deleted = 0;
        for kind in RecordKind::ALL {
            let filter = if only_synced { " AND synced = 1" } else { "" };
            deleted += tx.execute(
                &format!(
                    "DELETE FROM {} WHERE enqueued_at < ?1{}",
                    kind.table(),
                    filter
                ),
                [cutoff.timestamp_millis()],
            )?;
        }
        tx.commit()?;

        Ok(deleted)
    }

    fn stats(&self) -> Result<BufferStats> {
        let conn = self.worker().lock();
        Ok(BufferStats {
            device: kind_stats(&conn, RecordKind::Device)?,
            event: kind_stats(&conn, RecordKind::Event)?,
        })
    }

    fn get(&self, kind: RecordKind, id: i64) -> Result<Option<BufferedRecord>> {
        let conn = self.worker().lock();
        let mut stmt = conn.prepare(&format!(
            "SELECT id, captured_at, payload, synced, enqueued_at, fallback_reason
             FROM {} WHERE id = ?1",
            kind.table()
        ))?;

        let mut rows = stmt.query_map([id], |row| Self::row_to_record(kind, row))?;
        Ok(rows.next().transpose()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn insert_devices(store: &SqliteBuffer, n: usize) -> Vec<i64> {
        (0..n)
            .map(|i| {
                store
                    .insert(
                        RecordKind::Device,
                        Utc::now(),
                        &format!(r#"{{"mac_addr":"00:00:00:00:00:{:02x}"}}"#, i),
                        None,
                    )
                    .unwrap()
            })
            .collect()
    }

    #[test]
    fn test_insert_and_pull_in_id_order() {
        let store = SqliteBuffer::new_in_memory().unwrap();
        let ids = insert_devices(&store, 4);

        assert!(ids.windows(2).all(|w| w[0] < w[1]));

        let pulled = store.pull_unsynced(RecordKind::Device, 10).unwrap();
        assert_eq!(pulled.iter().map(|r| r.id).collect::<Vec<_>>(), ids);
        assert!(pulled.iter().all(|r| !r.synced));

        let limited = store.pull_unsynced(RecordKind::Device, 2).unwrap();
        assert_eq!(limited.len(), 2);
        assert_eq!(limited[0].id, ids[0]);
    }

    #[test]
    fn test_kinds_are_separate() {
        let store = SqliteBuffer::new_in_memory().unwrap();
        insert_devices(&store, 2);
        store
            .insert(RecordKind::Event, Utc::now(), r#"{"event_type":"x"}"#, Some("offline"))
            .unwrap();

        let events = store.pull_unsynced(RecordKind::Event, 10).unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].fallback_reason.as_deref(), Some("offline"));

        let stats = store.stats().unwrap();
        assert_eq!(stats.unsynced_devices(), 2);
        assert_eq!(stats.unsynced_events(), 1);
    }

    #[test]
    fn test_mark_synced_is_idempotent() {
        let store = SqliteBuffer::new_in_memory().unwrap();
        let ids = insert_devices(&store, 3);

        assert_eq!(store.mark_synced(RecordKind::Device, &ids[..1]).unwrap(), 1);
        assert_eq!(store.mark_synced(RecordKind::Device, &ids[..1]).unwrap(), 0);
        // unknown ids are ignored
        assert_eq!(store.mark_synced(RecordKind::Device, &[9999]).unwrap(), 0);

        let record = store.get(RecordKind::Device, ids[0]).unwrap().unwrap();
        assert!(record.synced);

        let stats = store.stats().unwrap();
        assert_eq!(stats.device.unsynced, 2);
        assert_eq!(stats.device.total, 3);
    }

    #[test]
    fn test_delete_older_than_keeps_unsynced() {
        let store = SqliteBuffer::new_in_memory().unwrap();
        let ids = insert_devices(&store, 3);
        store.mark_synced(RecordKind::Device, &ids[..2]).unwrap();

        let future = Utc::now() + chrono::Duration::days(30);
        assert_eq!(store.delete_older_than(future, true).unwrap(), 2);

        let remaining = store.pull_unsynced(RecordKind::Device, 10).unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].id, ids[2]);
    }

    #[test]
    fn test_delete_respects_cutoff() {
        let store = SqliteBuffer::new_in_memory().unwrap();
        let ids = insert_devices(&store, 2);
        store.mark_synced(RecordKind::Device, &ids).unwrap();

        let past = Utc::now() - chrono::Duration::days(1);
        assert_eq!(store.delete_older_than(past, true).unwrap(), 0);
        assert_eq!(store.stats().unwrap().device.total, 2);
    }

    #[test]
    fn test_ids_not_reused_after_delete() {
        let store = SqliteBuffer::new_in_memory().unwrap();
        let ids = insert_devices(&store, 2);
        store.mark_synced(RecordKind::Device, &ids).unwrap();
        store
            .delete_older_than(Utc::now() + chrono::Duration::days(1), true)
            .unwrap();

        let next = insert_devices(&store, 1);
        assert!(next[0] > ids[1]);
    }

    #[test]
    fn test_file_buffer_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("buffer.db");

        let id = {
            let store = SqliteBuffer::new(&path).unwrap();
            store
                .insert(RecordKind::Event, Utc::now(), r#"{"event_type":"boot"}"#, None)
                .unwrap()
        };

        let store = SqliteBuffer::new(&path).unwrap();
        let record = store.get(RecordKind::Event, id).unwrap().unwrap();
        assert!(!record.synced);
        assert_eq!(record.payload, r#"{"event_type":"boot"}"#);
    }
}

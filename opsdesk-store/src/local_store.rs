//! The on-device SQLite store behind the sync engine.
//!
//! One database file holds everything the engine persists: current entity
//! snapshots, committed version records, the offline operation queue, open
//! conflicts, and per-installation sync metadata. UI writes land in the
//! snapshots table unconditionally; everything else is bookkeeping owned by
//! the sync components.

use crate::error::{StorageError, StorageResult};
use opsdesk_types::{
    Conflict, ConflictId, ContentHash, DeviceId, EntityKey, EntitySnapshot, OperationId,
    OperationKind, QueuedOperation, Timestamp, Version, VersionRecord,
};
use rusqlite::{params, Connection, OptionalExtension};
use std::sync::{Arc, Mutex};
use tracing::{debug, info};

/// Persistent local store backed by SQLite.
///
/// Cloning is cheap; clones share one connection behind a mutex.
#[derive(Clone)]
pub struct LocalStore {
    conn: Arc<Mutex<Connection>>,
}

impl LocalStore {
    /// Opens (or creates) a store at the given path.
    pub fn new(path: &str) -> StorageResult<Self> {
        let conn = Connection::open(path)?;
        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        store.init_schema()?;
        Ok(store)
    }

    /// Opens an in-memory store (for testing).
    pub fn open_in_memory() -> StorageResult<Self> {
        let conn = Connection::open_in_memory()?;
        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        store.init_schema()?;
        Ok(store)
    }

    fn init_schema(&self) -> StorageResult<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS snapshots (
                entity_type TEXT NOT NULL,
                entity_id TEXT NOT NULL,
                data TEXT NOT NULL,
                content_hash TEXT NOT NULL,
                modified_at INTEGER NOT NULL,
                PRIMARY KEY (entity_type, entity_id)
            );

            CREATE TABLE IF NOT EXISTS versions (
                entity_type TEXT NOT NULL,
                entity_id TEXT NOT NULL,
                version INTEGER NOT NULL,
                content_hash TEXT NOT NULL,
                committed_at INTEGER NOT NULL,
                PRIMARY KEY (entity_type, entity_id)
            );

            CREATE TABLE IF NOT EXISTS offline_queue (
                id TEXT PRIMARY KEY,
                kind TEXT NOT NULL,
                entity_type TEXT NOT NULL,
                entity_id TEXT NOT NULL,
                payload TEXT NOT NULL,
                enqueued_at INTEGER NOT NULL,
                origin_device TEXT NOT NULL,
                retry_count INTEGER NOT NULL DEFAULT 0,
                priority INTEGER NOT NULL,
                last_error TEXT
            );

            CREATE INDEX IF NOT EXISTS idx_queue_drain
                ON offline_queue (priority DESC, enqueued_at ASC, id ASC);

            CREATE TABLE IF NOT EXISTS conflicts (
                id TEXT PRIMARY KEY,
                entity_type TEXT NOT NULL,
                entity_id TEXT NOT NULL,
                local_data TEXT NOT NULL,
                remote_data TEXT,
                local_version INTEGER NOT NULL,
                remote_version INTEGER,
                detected_at INTEGER NOT NULL,
                origin_device TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS sync_meta (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL
            );
            ",
        )?;
        debug!("local store schema ready");
        Ok(())
    }

    // ── Snapshots ────────────────────────────────────────────────

    /// Writes the current local data for an entity. This is the UI write
    /// path: it always succeeds and knows nothing about connectivity.
    pub fn put_snapshot(&self, key: &EntityKey, data: &serde_json::Value) -> StorageResult<()> {
        let conn = self.conn.lock().unwrap();
        let hash = ContentHash::of(data);
        conn.execute(
            "INSERT OR REPLACE INTO snapshots (entity_type, entity_id, data, content_hash, modified_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                key.entity_type,
                key.entity_id,
                data.to_string(),
                hash.as_str(),
                Timestamp::now().as_millis() as i64,
            ],
        )?;
        Ok(())
    }

    /// Loads the current snapshot for an entity, with its committed version
    /// (`Version::ZERO` if the entity was never committed).
    pub fn get_snapshot(&self, key: &EntityKey) -> StorageResult<Option<EntitySnapshot>> {
        let conn = self.conn.lock().unwrap();
        let row = conn
            .query_row(
                "SELECT s.data, s.content_hash, s.modified_at, v.version
                 FROM snapshots s
                 LEFT JOIN versions v
                   ON v.entity_type = s.entity_type AND v.entity_id = s.entity_id
                 WHERE s.entity_type = ?1 AND s.entity_id = ?2",
                params![key.entity_type, key.entity_id],
                |row| {
                    let data: String = row.get(0)?;
                    let hash: String = row.get(1)?;
                    let modified_at: i64 = row.get(2)?;
                    let version: Option<i64> = row.get(3)?;
                    Ok((data, hash, modified_at, version))
                },
            )
            .optional()?;

        let Some((data, hash, modified_at, version)) = row else {
            return Ok(None);
        };
        Ok(Some(EntitySnapshot {
            key: key.clone(),
            data: serde_json::from_str(&data)?,
            version: Version::new(version.unwrap_or(0) as u64),
            content_hash: ContentHash::from_hex(hash),
            modified_at: Timestamp::from_millis(modified_at as u64),
        }))
    }

    /// Removes an entity entirely: snapshot and version record.
    pub fn delete_entity(&self, key: &EntityKey) -> StorageResult<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "DELETE FROM snapshots WHERE entity_type = ?1 AND entity_id = ?2",
            params![key.entity_type, key.entity_id],
        )?;
        conn.execute(
            "DELETE FROM versions WHERE entity_type = ?1 AND entity_id = ?2",
            params![key.entity_type, key.entity_id],
        )?;
        Ok(())
    }

    // ── Version records ──────────────────────────────────────────

    /// Loads the committed version record for an entity.
    pub fn get_version_record(&self, key: &EntityKey) -> StorageResult<Option<VersionRecord>> {
        let conn = self.conn.lock().unwrap();
        let row = conn
            .query_row(
                "SELECT version, content_hash, committed_at FROM versions
                 WHERE entity_type = ?1 AND entity_id = ?2",
                params![key.entity_type, key.entity_id],
                |row| {
                    let version: i64 = row.get(0)?;
                    let hash: String = row.get(1)?;
                    let committed_at: i64 = row.get(2)?;
                    Ok((version, hash, committed_at))
                },
            )
            .optional()?;

        Ok(row.map(|(version, hash, committed_at)| VersionRecord {
            key: key.clone(),
            version: Version::new(version as u64),
            content_hash: ContentHash::from_hex(hash),
            committed_at: Timestamp::from_millis(committed_at as u64),
        }))
    }

    /// Writes (or replaces) the committed version record for an entity.
    pub fn put_version_record(&self, record: &VersionRecord) -> StorageResult<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT OR REPLACE INTO versions (entity_type, entity_id, version, content_hash, committed_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                record.key.entity_type,
                record.key.entity_id,
                record.version.get() as i64,
                record.content_hash.as_str(),
                record.committed_at.as_millis() as i64,
            ],
        )?;
        Ok(())
    }

    /// The committed version for an entity, `Version::ZERO` if never committed.
    pub fn committed_version(&self, key: &EntityKey) -> StorageResult<Version> {
        let conn = self.conn.lock().unwrap();
        let version: Option<i64> = conn
            .query_row(
                "SELECT version FROM versions WHERE entity_type = ?1 AND entity_id = ?2",
                params![key.entity_type, key.entity_id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(Version::new(version.unwrap_or(0) as u64))
    }

    /// Keys whose current snapshot hash differs from the committed hash.
    /// Entities that were never committed count as dirty.
    pub fn dirty_keys(&self) -> StorageResult<Vec<EntityKey>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT s.entity_type, s.entity_id
             FROM snapshots s
             LEFT JOIN versions v
               ON v.entity_type = s.entity_type AND v.entity_id = s.entity_id
             WHERE v.content_hash IS NULL OR v.content_hash != s.content_hash
             ORDER BY s.entity_type ASC, s.entity_id ASC",
        )?;
        let rows = stmt.query_map([], |row| {
            let entity_type: String = row.get(0)?;
            let entity_id: String = row.get(1)?;
            Ok(EntityKey::new(entity_type, entity_id))
        })?;

        let mut keys = Vec::new();
        for row in rows {
            keys.push(row?);
        }
        Ok(keys)
    }

    // ── Offline queue ────────────────────────────────────────────

    /// Appends an operation to the offline queue.
    pub fn enqueue(&self, op: &QueuedOperation) -> StorageResult<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO offline_queue
             (id, kind, entity_type, entity_id, payload, enqueued_at, origin_device, retry_count, priority, last_error)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            params![
                op.id.to_string(),
                op.kind.as_str(),
                op.key.entity_type,
                op.key.entity_id,
                op.payload.to_string(),
                op.enqueued_at.as_millis() as i64,
                op.origin_device.to_string(),
                op.retry_count as i64,
                op.priority as i64,
                op.last_error,
            ],
        )?;
        Ok(())
    }

    /// All queued operations in drain order: priority descending, then
    /// enqueue time ascending, then id ascending as the stable tiebreak.
    pub fn pending_operations(&self) -> StorageResult<Vec<QueuedOperation>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT id, kind, entity_type, entity_id, payload, enqueued_at, origin_device, retry_count, priority, last_error
             FROM offline_queue
             ORDER BY priority DESC, enqueued_at ASC, id ASC",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, String>(4)?,
                row.get::<_, i64>(5)?,
                row.get::<_, String>(6)?,
                row.get::<_, i64>(7)?,
                row.get::<_, i64>(8)?,
                row.get::<_, Option<String>>(9)?,
            ))
        })?;

        let mut ops = Vec::new();
        for row in rows {
            ops.push(operation_from_row(row?)?);
        }
        Ok(ops)
    }

    /// Number of queued operations.
    pub fn pending_count(&self) -> StorageResult<usize> {
        let conn = self.conn.lock().unwrap();
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM offline_queue", [], |row| row.get(0))?;
        Ok(count as usize)
    }

    /// Loads a single queued operation.
    pub fn get_operation(&self, id: OperationId) -> StorageResult<Option<QueuedOperation>> {
        let conn = self.conn.lock().unwrap();
        let row = conn
            .query_row(
                "SELECT id, kind, entity_type, entity_id, payload, enqueued_at, origin_device, retry_count, priority, last_error
                 FROM offline_queue WHERE id = ?1",
                params![id.to_string()],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, String>(3)?,
                        row.get::<_, String>(4)?,
                        row.get::<_, i64>(5)?,
                        row.get::<_, String>(6)?,
                        row.get::<_, i64>(7)?,
                        row.get::<_, i64>(8)?,
                        row.get::<_, Option<String>>(9)?,
                    ))
                },
            )
            .optional()?;

        row.map(operation_from_row).transpose()
    }

    /// Removes an operation the remote has confirmed. Returns whether a row
    /// was actually removed.
    pub fn mark_completed(&self, id: OperationId) -> StorageResult<bool> {
        let conn = self.conn.lock().unwrap();
        let removed = conn.execute(
            "DELETE FROM offline_queue WHERE id = ?1",
            params![id.to_string()],
        )?;
        Ok(removed > 0)
    }

    /// Bumps the retry counter after a confirmed remote failure and records
    /// the failure detail. Returns the new retry count, `None` if the
    /// operation is no longer queued.
    pub fn increment_retry(&self, id: OperationId, error: &str) -> StorageResult<Option<u32>> {
        let conn = self.conn.lock().unwrap();
        let updated = conn.execute(
            "UPDATE offline_queue SET retry_count = retry_count + 1, last_error = ?2 WHERE id = ?1",
            params![id.to_string(), error],
        )?;
        if updated == 0 {
            return Ok(None);
        }
        let count: i64 = conn.query_row(
            "SELECT retry_count FROM offline_queue WHERE id = ?1",
            params![id.to_string()],
            |row| row.get(0),
        )?;
        Ok(Some(count as u32))
    }

    /// Deletes queued operations enqueued strictly before `cutoff`.
    /// Returns how many were removed.
    pub fn purge_older_than(&self, cutoff: Timestamp) -> StorageResult<usize> {
        let conn = self.conn.lock().unwrap();
        let removed = conn.execute(
            "DELETE FROM offline_queue WHERE enqueued_at < ?1",
            params![cutoff.as_millis() as i64],
        )?;
        if removed > 0 {
            debug!(removed, "purged stale queued operations");
        }
        Ok(removed)
    }

    // ── Conflicts ────────────────────────────────────────────────

    /// Saves a conflict record.
    pub fn save_conflict(&self, conflict: &Conflict) -> StorageResult<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT OR REPLACE INTO conflicts
             (id, entity_type, entity_id, local_data, remote_data, local_version, remote_version, detected_at, origin_device)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                conflict.id.to_string(),
                conflict.key.entity_type,
                conflict.key.entity_id,
                conflict.local_data.to_string(),
                conflict.remote_data.as_ref().map(|d| d.to_string()),
                conflict.local_version.get() as i64,
                conflict.remote_version.map(|v| v.get() as i64),
                conflict.detected_at.as_millis() as i64,
                conflict.origin_device.to_string(),
            ],
        )?;
        Ok(())
    }

    /// Loads a conflict by id.
    pub fn get_conflict(&self, id: ConflictId) -> StorageResult<Option<Conflict>> {
        let conn = self.conn.lock().unwrap();
        let row = conn
            .query_row(
                "SELECT id, entity_type, entity_id, local_data, remote_data, local_version, remote_version, detected_at, origin_device
                 FROM conflicts WHERE id = ?1",
                params![id.to_string()],
                conflict_row,
            )
            .optional()?;

        row.map(conflict_from_row).transpose()
    }

    /// All open conflicts, oldest first.
    pub fn list_conflicts(&self) -> StorageResult<Vec<Conflict>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT id, entity_type, entity_id, local_data, remote_data, local_version, remote_version, detected_at, origin_device
             FROM conflicts ORDER BY detected_at ASC, id ASC",
        )?;
        let rows = stmt.query_map([], conflict_row)?;

        let mut conflicts = Vec::new();
        for row in rows {
            conflicts.push(conflict_from_row(row?)?);
        }
        Ok(conflicts)
    }

    /// Removes a resolved conflict. Returns whether a row was removed.
    pub fn remove_conflict(&self, id: ConflictId) -> StorageResult<bool> {
        let conn = self.conn.lock().unwrap();
        let removed = conn.execute(
            "DELETE FROM conflicts WHERE id = ?1",
            params![id.to_string()],
        )?;
        Ok(removed > 0)
    }

    /// Whether the entity has an open conflict.
    pub fn has_open_conflict(&self, key: &EntityKey) -> StorageResult<bool> {
        let conn = self.conn.lock().unwrap();
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM conflicts WHERE entity_type = ?1 AND entity_id = ?2",
            params![key.entity_type, key.entity_id],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    /// Keys that currently have an open conflict.
    pub fn conflicted_keys(&self) -> StorageResult<Vec<EntityKey>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt =
            conn.prepare("SELECT DISTINCT entity_type, entity_id FROM conflicts")?;
        let rows = stmt.query_map([], |row| {
            let entity_type: String = row.get(0)?;
            let entity_id: String = row.get(1)?;
            Ok(EntityKey::new(entity_type, entity_id))
        })?;

        let mut keys = Vec::new();
        for row in rows {
            keys.push(row?);
        }
        Ok(keys)
    }

    // ── Sync metadata ────────────────────────────────────────────

    /// The per-installation device id. Generated once on first call and
    /// persisted; stable across restarts.
    pub fn device_id(&self) -> StorageResult<DeviceId> {
        let conn = self.conn.lock().unwrap();
        let existing: Option<String> = conn
            .query_row(
                "SELECT value FROM sync_meta WHERE key = 'device_id'",
                [],
                |row| row.get(0),
            )
            .optional()?;

        if let Some(raw) = existing {
            return raw
                .parse()
                .map_err(|e| StorageError::InvalidData(format!("stored device_id: {e}")));
        }

        let id = DeviceId::generate();
        conn.execute(
            "INSERT INTO sync_meta (key, value) VALUES ('device_id', ?1)",
            params![id.to_string()],
        )?;
        info!(device_id = %id, "generated device id for this installation");
        Ok(id)
    }

    /// When the last successful sync cycle completed, if ever.
    pub fn last_sync_timestamp(&self) -> StorageResult<Option<Timestamp>> {
        let conn = self.conn.lock().unwrap();
        let raw: Option<String> = conn
            .query_row(
                "SELECT value FROM sync_meta WHERE key = 'last_sync'",
                [],
                |row| row.get(0),
            )
            .optional()?;

        match raw {
            Some(millis) => {
                let millis: u64 = millis
                    .parse()
                    .map_err(|e| StorageError::InvalidData(format!("stored last_sync: {e}")))?;
                Ok(Some(Timestamp::from_millis(millis)))
            }
            None => Ok(None),
        }
    }

    /// Records the completion time of a successful sync cycle.
    pub fn set_last_sync_timestamp(&self, ts: Timestamp) -> StorageResult<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT OR REPLACE INTO sync_meta (key, value) VALUES ('last_sync', ?1)",
            params![ts.as_millis().to_string()],
        )?;
        Ok(())
    }
}

type OperationRow = (
    String,
    String,
    String,
    String,
    String,
    i64,
    String,
    i64,
    i64,
    Option<String>,
);

fn operation_from_row(row: OperationRow) -> StorageResult<QueuedOperation> {
    let (id, kind, entity_type, entity_id, payload, enqueued_at, origin, retries, priority, last_error) = row;

    Ok(QueuedOperation {
        id: id
            .parse()
            .map_err(|e| StorageError::InvalidData(format!("operation id: {e}")))?,
        kind: OperationKind::parse(&kind)
            .ok_or_else(|| StorageError::InvalidData(format!("operation kind: {kind}")))?,
        key: EntityKey::new(entity_type, entity_id),
        payload: serde_json::from_str(&payload)?,
        enqueued_at: Timestamp::from_millis(enqueued_at as u64),
        origin_device: origin
            .parse()
            .map_err(|e| StorageError::InvalidData(format!("origin device: {e}")))?,
        retry_count: retries as u32,
        priority: priority as u8,
        last_error,
    })
}

type ConflictRow = (
    String,
    String,
    String,
    String,
    Option<String>,
    i64,
    Option<i64>,
    i64,
    String,
);

fn conflict_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<ConflictRow> {
    Ok((
        row.get(0)?,
        row.get(1)?,
        row.get(2)?,
        row.get(3)?,
        row.get(4)?,
        row.get(5)?,
        row.get(6)?,
        row.get(7)?,
        row.get(8)?,
    ))
}

fn conflict_from_row(row: ConflictRow) -> StorageResult<Conflict> {
    let (id, entity_type, entity_id, local_data, remote_data, local_ver, remote_ver, detected_at, origin) = row;

    let remote_data = match remote_data {
        Some(raw) => Some(serde_json::from_str(&raw)?),
        None => None,
    };
    Ok(Conflict {
        id: id
            .parse()
            .map_err(|e| StorageError::InvalidData(format!("conflict id: {e}")))?,
        key: EntityKey::new(entity_type, entity_id),
        local_data: serde_json::from_str(&local_data)?,
        remote_data,
        local_version: Version::new(local_ver as u64),
        remote_version: remote_ver.map(|v| Version::new(v as u64)),
        detected_at: Timestamp::from_millis(detected_at as u64),
        origin_device: origin
            .parse()
            .map_err(|e| StorageError::InvalidData(format!("origin device: {e}")))?,
    })
}

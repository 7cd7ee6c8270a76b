//! Change tracking.
//!
//! Dirtiness is decided by content, never by wall clocks: an entity needs
//! syncing when the hash of its current snapshot differs from the hash
//! recorded at its last commit. Device clocks drift and jump; hashes
//! don't. Versions are plain per-entity counters and only ever move
//! through [`ChangeTracker::commit`] (local push confirmed) or
//! [`ChangeTracker::accept_remote`] (remote data adopted).

use opsdesk_store::{LocalStore, StorageResult};
use opsdesk_types::{ContentHash, EntityKey, Version, VersionRecord};
use serde_json::Value;

/// Tracks which entities have uncommitted local edits.
#[derive(Clone)]
pub struct ChangeTracker {
    store: LocalStore,
}

impl ChangeTracker {
    pub fn new(store: LocalStore) -> Self {
        Self { store }
    }

    /// Records a local edit. This is the write path the application uses
    /// for every mutation, online or not.
    pub fn record_local_write(&self, key: &EntityKey, data: &Value) -> StorageResult<()> {
        self.store.put_snapshot(key, data)
    }

    /// Whether `current` differs from the last committed state of `key`.
    /// An entity that was never committed always counts as changed.
    pub fn has_changed(&self, key: &EntityKey, current: &Value) -> StorageResult<bool> {
        match self.store.get_version_record(key)? {
            Some(record) => Ok(record.content_hash != ContentHash::of(current)),
            None => Ok(true),
        }
    }

    /// Whether the stored snapshot of `key` has uncommitted edits.
    /// Entities with no local snapshot are never dirty.
    pub fn is_dirty(&self, key: &EntityKey) -> StorageResult<bool> {
        let Some(snapshot) = self.store.get_snapshot(key)? else {
            return Ok(false);
        };
        match self.store.get_version_record(key)? {
            Some(record) => Ok(record.content_hash != snapshot.content_hash),
            None => Ok(true),
        }
    }

    /// Commits `data` as pushed: bumps the version and records the hash.
    ///
    /// An existing snapshot is left alone. If the user edited the entity
    /// while the push was in flight, the snapshot hash no longer matches
    /// the committed hash and the entity stays dirty for the next cycle.
    /// A queue-only mutation may never have written a snapshot; the
    /// committed data is stored then, so the entity is readable locally.
    pub fn commit(&self, key: &EntityKey, data: &Value) -> StorageResult<VersionRecord> {
        if self.store.get_snapshot(key)?.is_none() {
            self.store.put_snapshot(key, data)?;
        }
        let version = self.store.committed_version(key)?.next();
        let record = VersionRecord::new(key.clone(), version, ContentHash::of(data));
        self.store.put_version_record(&record)?;
        Ok(record)
    }

    /// Adopts remote data at the remote's version, replacing the local
    /// snapshot. Re-applying the same data at the same version is a no-op.
    pub fn accept_remote(
        &self,
        key: &EntityKey,
        data: &Value,
        remote_version: Version,
    ) -> StorageResult<VersionRecord> {
        let hash = ContentHash::of(data);
        if let Some(existing) = self.store.get_version_record(key)? {
            if existing.version == remote_version && existing.content_hash == hash {
                return Ok(existing);
            }
        }
        let record = VersionRecord::new(key.clone(), remote_version, hash);
        self.store.put_snapshot(key, data)?;
        self.store.put_version_record(&record)?;
        Ok(record)
    }

    /// All keys whose snapshots differ from their committed state.
    pub fn dirty_entities(&self) -> StorageResult<Vec<EntityKey>> {
        self.store.dirty_keys()
    }

    /// Last committed version of `key`, `Version::ZERO` if never synced.
    pub fn committed_version(&self, key: &EntityKey) -> StorageResult<Version> {
        self.store.committed_version(key)
    }
}

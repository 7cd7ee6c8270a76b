//! Entity snapshots and version records.
//!
//! The local store keeps two bookkeeping rows per entity: the snapshot
//! (current local data, rewritten on every local write and every remote
//! apply) and the version record (the last *committed* version and content
//! hash). An entity is dirty when the snapshot's hash differs from the
//! version record's hash — that comparison is the whole change-detection
//! story, no timestamps involved.

use crate::{ContentHash, EntityKey, Timestamp, Version};
use serde::{Deserialize, Serialize};

/// The last known local state of a domain object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntitySnapshot {
    /// The entity this snapshot belongs to.
    pub key: EntityKey,
    /// Full JSON representation of the entity.
    pub data: serde_json::Value,
    /// Last committed version (`Version::ZERO` if never committed).
    pub version: Version,
    /// Hash of `data` as currently stored.
    pub content_hash: ContentHash,
    /// When the snapshot was last written.
    pub modified_at: Timestamp,
}

impl EntitySnapshot {
    /// Builds a snapshot for `data` at the current time, hashing it.
    #[must_use]
    pub fn new(key: EntityKey, data: serde_json::Value, version: Version) -> Self {
        let content_hash = ContentHash::of(&data);
        Self {
            key,
            data,
            version,
            content_hash,
            modified_at: Timestamp::now(),
        }
    }
}

/// The committed version bookkeeping for one entity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionRecord {
    /// The entity this record belongs to.
    pub key: EntityKey,
    /// The committed version counter.
    pub version: Version,
    /// Hash of the data as of the last commit.
    pub content_hash: ContentHash,
    /// When the last commit happened.
    pub committed_at: Timestamp,
}

impl VersionRecord {
    /// Creates a record for a commit happening now.
    #[must_use]
    pub fn new(key: EntityKey, version: Version, content_hash: ContentHash) -> Self {
        Self {
            key,
            version,
            content_hash,
            committed_at: Timestamp::now(),
        }
    }
}

//! Offline operations — durable records of mutations attempted while the
//! remote was unreachable.
//!
//! An operation lives in the queue until the remote confirms it, the remote
//! rejects it, or its retry budget is exhausted (at which point it becomes a
//! [`crate::Conflict`] with unknown remote data). The queue is the only path
//! by which a mutation survives a process restart while offline.

use crate::{DeviceId, EntityKey, OperationId, Timestamp};
use serde::{Deserialize, Serialize};
use std::fmt;

/// The kind of mutation an offline operation records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationKind {
    Create,
    Update,
    Delete,
}

impl OperationKind {
    /// Default queue priority: creates drain before updates, updates before
    /// deletes. Higher drains first.
    #[must_use]
    pub const fn default_priority(self) -> u8 {
        match self {
            Self::Create => 3,
            Self::Update => 2,
            Self::Delete => 1,
        }
    }

    /// Stable textual name (used in storage and on the wire).
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::Update => "update",
            Self::Delete => "delete",
        }
    }

    /// Parses the textual name back into a kind.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "create" => Some(Self::Create),
            "update" => Some(Self::Update),
            "delete" => Some(Self::Delete),
            _ => None,
        }
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A durable record of an attempted mutation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueuedOperation {
    /// Unique identifier for this operation.
    pub id: OperationId,
    /// What the mutation does.
    pub kind: OperationKind,
    /// The entity the mutation targets.
    pub key: EntityKey,
    /// The entity data carried by the mutation (`null` for deletes).
    pub payload: serde_json::Value,
    /// When the operation was enqueued.
    pub enqueued_at: Timestamp,
    /// The installation that produced the mutation.
    pub origin_device: DeviceId,
    /// Confirmed remote failures so far. Only ever increases.
    pub retry_count: u32,
    /// Queue priority; higher drains first, ties break by `enqueued_at`.
    pub priority: u8,
    /// Human-readable detail of the last confirmed failure, if any.
    pub last_error: Option<String>,
}

impl QueuedOperation {
    /// Creates a new operation with the kind's default priority.
    #[must_use]
    pub fn new(
        kind: OperationKind,
        key: EntityKey,
        payload: serde_json::Value,
        origin_device: DeviceId,
    ) -> Self {
        Self {
            id: OperationId::new(),
            kind,
            key,
            payload,
            enqueued_at: Timestamp::now(),
            origin_device,
            retry_count: 0,
            priority: kind.default_priority(),
            last_error: None,
        }
    }

    /// Creates a queued create.
    #[must_use]
    pub fn create(key: EntityKey, payload: serde_json::Value, origin_device: DeviceId) -> Self {
        Self::new(OperationKind::Create, key, payload, origin_device)
    }

    /// Creates a queued update.
    #[must_use]
    pub fn update(key: EntityKey, payload: serde_json::Value, origin_device: DeviceId) -> Self {
        Self::new(OperationKind::Update, key, payload, origin_device)
    }

    /// Creates a queued delete (no payload).
    #[must_use]
    pub fn delete(key: EntityKey, origin_device: DeviceId) -> Self {
        Self::new(
            OperationKind::Delete,
            key,
            serde_json::Value::Null,
            origin_device,
        )
    }

    /// Overrides the queue priority.
    #[must_use]
    pub fn with_priority(mut self, priority: u8) -> Self {
        self.priority = priority;
        self
    }

    /// Overrides the enqueue time (used when replaying persisted queues).
    #[must_use]
    pub fn with_enqueued_at(mut self, at: Timestamp) -> Self {
        self.enqueued_at = at;
        self
    }
}

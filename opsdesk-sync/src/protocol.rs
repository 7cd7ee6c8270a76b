//! Wire types for the remote sync service.
//!
//! Everything in this module crosses the HTTP boundary and is serialized
//! as camelCase JSON to match the service contract. Versions travel as
//! bare integers and timestamps as RFC 3339 strings; `null` entity data
//! in a [`RemoteChange`] means the entity was deleted remotely.

use opsdesk_types::{
    DeviceId, EntityKey, EntitySnapshot, OperationId, OperationKind, QueuedOperation,
    ResolutionChoice, Timestamp, Version,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One local mutation offered to the remote during an exchange.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocalChange {
    /// Queue id when this change originated from an offline operation.
    /// Dirty-entity pushes have no operation id.
    pub operation_id: Option<OperationId>,
    /// What kind of mutation this is.
    pub kind: OperationKind,
    /// Entity type, e.g. "sale" or "product".
    pub entity_type: String,
    /// Entity id within its type.
    pub entity_id: String,
    /// Full entity payload. `null` for deletes.
    pub data: Value,
    /// Last committed local version, used by the remote to detect clashes.
    pub base_version: Version,
}

impl LocalChange {
    /// Builds a change from a queued offline operation.
    pub fn from_operation(op: &QueuedOperation, base_version: Version) -> Self {
        Self {
            operation_id: Some(op.id),
            kind: op.kind,
            entity_type: op.key.entity_type.clone(),
            entity_id: op.key.entity_id.clone(),
            data: op.payload.clone(),
            base_version,
        }
    }

    /// Builds an update change from a dirty entity snapshot.
    pub fn from_snapshot(snapshot: &EntitySnapshot) -> Self {
        Self {
            operation_id: None,
            kind: OperationKind::Update,
            entity_type: snapshot.key.entity_type.clone(),
            entity_id: snapshot.key.entity_id.clone(),
            data: snapshot.data.clone(),
            base_version: snapshot.version,
        }
    }

    /// Key of the entity this change touches.
    pub fn key(&self) -> EntityKey {
        EntityKey::new(self.entity_type.clone(), self.entity_id.clone())
    }
}

/// Request body for `POST /sync/{deviceId}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncRequest {
    /// Changes accumulated locally since the last successful exchange.
    pub local_changes: Vec<LocalChange>,
    /// Completion time of the last successful cycle, RFC 3339.
    /// `null` on the first exchange a device ever makes.
    pub last_sync_timestamp: Option<String>,
    /// Device making the request.
    pub device_id: DeviceId,
}

impl SyncRequest {
    /// Creates a request, formatting the last-sync watermark for the wire.
    pub fn new(
        device_id: DeviceId,
        last_sync: Option<Timestamp>,
        local_changes: Vec<LocalChange>,
    ) -> Self {
        Self {
            local_changes,
            last_sync_timestamp: last_sync.map(|ts| ts.to_rfc3339()),
            device_id,
        }
    }
}

/// One remote-side mutation to apply locally.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteChange {
    /// Entity type.
    pub entity_type: String,
    /// Entity id within its type.
    pub entity_id: String,
    /// Full entity payload. `null` means the entity was deleted remotely.
    pub data: Value,
    /// Remote version of the entity after this change.
    pub version: Version,
}

impl RemoteChange {
    /// Key of the entity this change touches.
    pub fn key(&self) -> EntityKey {
        EntityKey::new(self.entity_type.clone(), self.entity_id.clone())
    }

    /// Whether this change deletes the entity.
    pub fn is_deletion(&self) -> bool {
        self.data.is_null()
    }
}

/// A clash the remote detected while applying one of our local changes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteConflict {
    /// Entity type.
    pub entity_type: String,
    /// Entity id within its type.
    pub entity_id: String,
    /// The remote's copy of the contested entity.
    pub remote_data: Value,
    /// The remote's version of the contested entity.
    pub remote_version: Version,
}

impl RemoteConflict {
    /// Key of the contested entity.
    pub fn key(&self) -> EntityKey {
        EntityKey::new(self.entity_type.clone(), self.entity_id.clone())
    }
}

/// A local operation the remote refused outright.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteRejection {
    /// Id of the refused operation.
    pub operation_id: OperationId,
    /// Human-readable reason, surfaced to the caller via events.
    pub reason: String,
}

/// Payload of a successful exchange.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncPayload {
    /// Remote mutations to apply locally, in application order.
    pub remote_changes: Vec<RemoteChange>,
    /// Clashes the remote detected against our pushed changes.
    pub conflicts: Vec<RemoteConflict>,
    /// Operations the remote refused. Older service builds omit the field.
    #[serde(default)]
    pub rejections: Vec<RemoteRejection>,
}

/// Envelope for `POST /sync/{deviceId}` responses.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncResponse {
    /// Whether the remote accepted the exchange as a whole.
    pub success: bool,
    /// Exchange payload, present when `success` is true.
    pub data: Option<SyncPayload>,
}

/// Request body for `POST /sync/resolve-conflict/{conflictId}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolveConflictRequest {
    /// Which side won, or `merge` for hand-edited data.
    pub resolution: ResolutionChoice,
    /// The data the winning side settled on.
    pub selected_data: Value,
    /// Device that resolved the conflict.
    pub device_id: DeviceId,
}

/// Response body for `GET /health`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthStatus {
    /// Whether the service itself answered.
    pub reachable: bool,
    /// Whether the service can reach its own database.
    pub database_ok: bool,
}

impl HealthStatus {
    /// True only when the service answered and its database is up.
    pub fn is_healthy(&self) -> bool {
        self.reachable && self.database_ok
    }
}

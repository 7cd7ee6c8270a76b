//! Conflict detection and resolution.
//!
//! Detection is a pure rule: a remote change clashes when its version is
//! strictly newer than the local committed version *and* the local copy
//! has uncommitted edits. Everything else is either safe to adopt or a
//! stale change to ignore. Resolution picks a winner, moves the entity's
//! version past both sides, and only then tells the remote.

use std::sync::Arc;

use opsdesk_store::LocalStore;
use opsdesk_types::{Conflict, ConflictId, DeviceId, EntitySnapshot, ResolutionChoice, Version};
use serde_json::Value;
use tokio::task;
use tracing::info;

use crate::error::{SyncError, SyncResult};
use crate::events::{EventBus, SyncEvent};
use crate::protocol::{RemoteChange, ResolveConflictRequest};
use crate::remote::RemoteService;
use crate::tracker::ChangeTracker;

/// How to settle a conflict.
#[derive(Debug, Clone, PartialEq)]
pub enum Resolution {
    /// Keep the local data.
    Local,
    /// Adopt the remote data. Only valid when the remote side is known.
    Remote,
    /// Use hand-merged data supplied by the caller.
    Merge(Value),
}

impl Resolution {
    /// The wire tag for this resolution.
    pub fn choice(&self) -> ResolutionChoice {
        match self {
            Resolution::Local => ResolutionChoice::Local,
            Resolution::Remote => ResolutionChoice::Remote,
            Resolution::Merge(_) => ResolutionChoice::Merge,
        }
    }
}

/// Returns the conflict a remote change raises against the local copy,
/// if any. `snapshot.version` must be the committed local version.
pub fn detect(
    snapshot: &EntitySnapshot,
    dirty: bool,
    change: &RemoteChange,
    device: DeviceId,
) -> Option<Conflict> {
    (dirty && change.version > snapshot.version).then(|| {
        Conflict::version_clash(
            snapshot.key.clone(),
            snapshot.data.clone(),
            snapshot.version,
            change.data.clone(),
            change.version,
            device,
        )
    })
}

/// Settles open conflicts and synchronizes the outcome with the remote.
pub struct ConflictResolver {
    store: LocalStore,
    tracker: ChangeTracker,
    remote: Arc<dyn RemoteService>,
    events: EventBus,
    device_id: DeviceId,
}

impl ConflictResolver {
    pub fn new(
        store: LocalStore,
        tracker: ChangeTracker,
        remote: Arc<dyn RemoteService>,
        events: EventBus,
        device_id: DeviceId,
    ) -> Self {
        Self {
            store,
            tracker,
            remote,
            events,
            device_id,
        }
    }

    /// All conflicts awaiting a decision, oldest first.
    pub async fn open_conflicts(&self) -> SyncResult<Vec<Conflict>> {
        let store = self.store.clone();
        let conflicts = task::spawn_blocking(move || store.list_conflicts())
            .await
            .map_err(|e| SyncError::Internal(format!("conflict listing task failed: {e}")))??;
        Ok(conflicts)
    }

    /// Resolves an open conflict and returns the data that won.
    ///
    /// The winning data is applied locally at a version past both sides,
    /// so whichever side lost cannot silently resurface as "newer". The
    /// conflict record survives until the remote acknowledges; if the
    /// notification fails the caller can retry, and re-applying the same
    /// resolution is a no-op.
    pub async fn resolve(
        &self,
        conflict_id: ConflictId,
        resolution: Resolution,
    ) -> SyncResult<Value> {
        let store = self.store.clone();
        let conflict = task::spawn_blocking(move || store.get_conflict(conflict_id))
            .await
            .map_err(|e| SyncError::Internal(format!("conflict lookup task failed: {e}")))??
            .ok_or(SyncError::UnknownConflict(conflict_id))?;

        let resolved = match &resolution {
            Resolution::Local => conflict.local_data.clone(),
            Resolution::Remote => conflict.remote_data.clone().ok_or_else(|| {
                SyncError::InvalidResolution(
                    "remote data is unknown for this conflict; choose local or merge".into(),
                )
            })?,
            Resolution::Merge(data) => data.clone(),
        };

        let version = conflict
            .local_version
            .max(conflict.remote_version.unwrap_or(Version::ZERO))
            .next();

        let tracker = self.tracker.clone();
        let key = conflict.key.clone();
        let data = resolved.clone();
        task::spawn_blocking(move || tracker.accept_remote(&key, &data, version))
            .await
            .map_err(|e| SyncError::Internal(format!("resolution apply task failed: {e}")))??;

        let request = ResolveConflictRequest {
            resolution: resolution.choice(),
            selected_data: resolved.clone(),
            device_id: self.device_id,
        };
        self.remote.resolve_conflict(conflict_id, &request).await?;

        let store = self.store.clone();
        task::spawn_blocking(move || store.remove_conflict(conflict_id))
            .await
            .map_err(|e| SyncError::Internal(format!("conflict removal task failed: {e}")))??;

        info!(
            "conflict {} on {} resolved as {} at {version}",
            conflict_id,
            conflict.key,
            request.resolution
        );
        self.events.publish(SyncEvent::ConflictResolved {
            id: conflict_id,
            key: conflict.key.clone(),
        });
        Ok(resolved)
    }
}

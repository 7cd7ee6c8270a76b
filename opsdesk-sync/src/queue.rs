//! Offline operation queue.
//!
//! Mutations made while the remote is unreachable land here and survive
//! restarts. Draining order is priority first (creates before updates
//! before deletes), then enqueue time. Failures are only counted after a
//! confirmed remote refusal; when an operation exhausts its retries it
//! leaves the queue and becomes a conflict so it stops blocking the rest
//! of the drain.

use opsdesk_store::{LocalStore, StorageResult};
use opsdesk_types::{
    Conflict, DeviceId, EntityKey, OperationId, OperationKind, QueuedOperation, Timestamp,
};
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::config::SyncConfig;
use crate::events::{EventBus, SyncEvent};

/// Durable queue of mutations awaiting a reachable remote.
#[derive(Clone)]
pub struct OfflineQueue {
    store: LocalStore,
    events: EventBus,
    config: SyncConfig,
}

impl OfflineQueue {
    pub fn new(store: LocalStore, events: EventBus, config: &SyncConfig) -> Self {
        Self {
            store,
            events,
            config: config.clone(),
        }
    }

    /// Enqueues a mutation with the configured priority for its kind.
    pub fn enqueue(
        &self,
        kind: OperationKind,
        key: EntityKey,
        payload: Value,
        origin: DeviceId,
    ) -> StorageResult<QueuedOperation> {
        let op = QueuedOperation::new(kind, key, payload, origin)
            .with_priority(self.config.priority_for(kind));
        self.store.enqueue(&op)?;
        debug!("queued {} for {} as {}", op.kind, op.key, op.id);
        Ok(op)
    }

    /// Pending operations in drain order.
    pub fn pending(&self) -> StorageResult<Vec<QueuedOperation>> {
        self.store.pending_operations()
    }

    /// Number of operations waiting to be pushed.
    pub fn pending_count(&self) -> StorageResult<usize> {
        self.store.pending_count()
    }

    /// Removes an operation the remote confirmed. Returns whether it was
    /// still queued.
    pub fn mark_completed(&self, id: OperationId) -> StorageResult<bool> {
        self.store.mark_completed(id)
    }

    /// Records a confirmed remote failure for a queued operation.
    ///
    /// Below the retry limit the operation stays queued with a bumped
    /// counter. At the limit it is converted: removed from the queue and
    /// recorded as a conflict with unknown remote data, which is also
    /// returned. Speculative failures (the exchange never reached the
    /// remote's answer) must not be recorded here.
    pub fn record_failure(&self, id: OperationId, error: &str) -> StorageResult<Option<Conflict>> {
        let Some(op) = self.store.get_operation(id)? else {
            return Ok(None);
        };
        let Some(retries) = self.store.increment_retry(id, error)? else {
            return Ok(None);
        };
        if retries < self.config.max_retries {
            debug!(
                "operation {} for {} failed ({error}), retry {retries} of {}",
                op.id, op.key, self.config.max_retries
            );
            return Ok(None);
        }

        // Conflict first, then dequeue: a crash between the two writes
        // must not lose the failure.
        let local_version = self.store.committed_version(&op.key)?;
        let conflict = Conflict::retries_exhausted(
            op.key.clone(),
            op.payload.clone(),
            local_version,
            op.origin_device,
        );
        self.store.save_conflict(&conflict)?;
        self.store.mark_completed(id)?;
        warn!(
            "operation {} for {} exhausted {retries} retries, converted to conflict {}",
            op.id, op.key, conflict.id
        );
        self.events.publish(SyncEvent::ConflictDetected(conflict.clone()));
        Ok(Some(conflict))
    }

    /// Purges operations that have sat in the queue longer than the
    /// configured staleness bound. Returns how many were removed.
    pub fn sweep_stale(&self) -> StorageResult<usize> {
        let cutoff = Timestamp::now() - self.config.stale_after;
        let removed = self.store.purge_older_than(cutoff)?;
        if removed > 0 {
            info!("swept {removed} stale operations from the offline queue");
        }
        Ok(removed)
    }
}

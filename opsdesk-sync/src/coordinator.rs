//! Sync cycle coordination.
//!
//! A cycle moves through Collecting, Exchanging and Applying, then back
//! to Idle. At most one cycle runs at a time; concurrent triggers from
//! the ticker, a reconnect nudge and a manual request collapse into one
//! cycle via an atomic entry flag that is cleared on every exit path.
//!
//! Applying follows a fixed precedence per remote change:
//!
//! * open conflict on the key: skip, the change waits for resolution
//! * remote version older than local: stale, rejected silently
//! * same version, clean local: adopt (identical data is a no-op)
//! * same version, dirty local: hold, the local push will settle it
//! * newer remote, dirty local: record exactly one conflict
//! * newer remote, clean local: adopt, or delete when the data is null
//!
//! A failed or timed-out exchange is transient: retry counters advance
//! for the operations that were in flight, nothing else changes, and the
//! next trigger starts from scratch.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use opsdesk_store::{LocalStore, StorageError, StorageResult};
use opsdesk_types::{Conflict, DeviceId, EntityKey, OperationId, OperationKind, Timestamp};
use serde_json::Value;
use tokio::sync::watch;
use tokio::task;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::config::SyncConfig;
use crate::error::{SyncError, SyncResult};
use crate::events::{CycleSummary, EventBus, SyncEvent};
use crate::monitor::ConnectivityMonitor;
use crate::protocol::{LocalChange, SyncPayload, SyncRequest};
use crate::queue::OfflineQueue;
use crate::remote::RemoteService;
use crate::resolver;
use crate::tracker::ChangeTracker;

/// Phase of the cycle currently running, `Idle` between cycles.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncPhase {
    Idle,
    Collecting,
    Exchanging,
    Applying,
}

/// Why a trigger did not start a cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// The connectivity monitor says we are offline.
    Offline,
    /// Another cycle is already running.
    AlreadySyncing,
    /// Nothing dirty, nothing queued.
    NothingToSync,
}

/// Result of one sync trigger.
#[derive(Debug, Clone, PartialEq)]
pub enum CycleOutcome {
    /// A cycle ran; the summary says how it went.
    Completed(CycleSummary),
    /// No cycle ran.
    Skipped(SkipReason),
}

/// Runs sync cycles against the remote service.
pub struct SyncCoordinator {
    store: LocalStore,
    tracker: ChangeTracker,
    queue: OfflineQueue,
    monitor: ConnectivityMonitor,
    remote: Arc<dyn RemoteService>,
    events: EventBus,
    config: SyncConfig,
    device_id: DeviceId,
    is_syncing: AtomicBool,
    phase_tx: watch::Sender<SyncPhase>,
    cooldowns: Mutex<HashMap<EntityKey, Instant>>,
}

/// Clears the entry flag and phase when a cycle ends, however it ends.
struct CycleGuard<'a> {
    coordinator: &'a SyncCoordinator,
}

impl Drop for CycleGuard<'_> {
    fn drop(&mut self) {
        self.coordinator.is_syncing.store(false, Ordering::SeqCst);
        self.coordinator.phase_tx.send_replace(SyncPhase::Idle);
    }
}

/// What a cycle gathered to push.
struct CollectedWork {
    changes: Vec<LocalChange>,
    last_sync: Option<Timestamp>,
}

/// What applying a response did to the local store.
#[derive(Default)]
struct ApplyReport {
    applied: usize,
    conflicts: Vec<Conflict>,
    rejected: Vec<(OperationId, EntityKey, String)>,
    touched: Vec<EntityKey>,
}

impl SyncCoordinator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        store: LocalStore,
        tracker: ChangeTracker,
        queue: OfflineQueue,
        monitor: ConnectivityMonitor,
        remote: Arc<dyn RemoteService>,
        events: EventBus,
        config: SyncConfig,
        device_id: DeviceId,
    ) -> Self {
        let (phase_tx, _) = watch::channel(SyncPhase::Idle);
        Self {
            store,
            tracker,
            queue,
            monitor,
            remote,
            events,
            config,
            device_id,
            is_syncing: AtomicBool::new(false),
            phase_tx,
            cooldowns: Mutex::new(HashMap::new()),
        }
    }

    /// Device this coordinator syncs on behalf of.
    pub fn device_id(&self) -> DeviceId {
        self.device_id
    }

    /// Whether a cycle is running right now.
    pub fn is_syncing(&self) -> bool {
        self.is_syncing.load(Ordering::SeqCst)
    }

    /// Current cycle phase.
    pub fn phase(&self) -> SyncPhase {
        *self.phase_tx.borrow()
    }

    /// Attempts one sync cycle.
    ///
    /// Skips without touching anything when offline or when a cycle is
    /// already running. Exchange failures and timeouts produce a
    /// completed-but-failed summary, not an error; errors are reserved
    /// for local storage trouble.
    pub async fn try_sync(&self) -> SyncResult<CycleOutcome> {
        if !self.monitor.is_online() {
            debug!("sync requested while offline, skipping");
            return Ok(CycleOutcome::Skipped(SkipReason::Offline));
        }
        if self
            .is_syncing
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            debug!("sync already in progress, skipping");
            return Ok(CycleOutcome::Skipped(SkipReason::AlreadySyncing));
        }
        // Dropped on every exit path, including panics and timeouts.
        let _guard = CycleGuard { coordinator: self };

        let outcome = self.run_cycle().await?;
        if let CycleOutcome::Completed(summary) = &outcome {
            self.events
                .publish(SyncEvent::CycleCompleted(summary.clone()));
        }
        Ok(outcome)
    }

    async fn run_cycle(&self) -> SyncResult<CycleOutcome> {
        self.phase_tx.send_replace(SyncPhase::Collecting);
        let collected = self.collect().await?;
        if collected.changes.is_empty() {
            debug!("nothing to sync");
            return Ok(CycleOutcome::Skipped(SkipReason::NothingToSync));
        }

        self.phase_tx.send_replace(SyncPhase::Exchanging);
        let request = SyncRequest::new(
            self.device_id,
            collected.last_sync,
            collected.changes.clone(),
        );
        info!(
            "sync cycle started: pushing {} changes",
            request.local_changes.len()
        );
        let exchange = tokio::time::timeout(
            self.config.exchange_timeout,
            self.remote.exchange(self.device_id, &request),
        )
        .await;

        let payload = match exchange {
            Ok(Ok(payload)) => payload,
            Ok(Err(e)) => {
                warn!("sync exchange failed: {e}");
                return self.fail_cycle(&collected, &e.to_string()).await;
            }
            Err(_) => {
                let err = SyncError::Timeout;
                warn!(
                    "sync exchange timed out after {:?}",
                    self.config.exchange_timeout
                );
                return self.fail_cycle(&collected, &err.to_string()).await;
            }
        };

        self.phase_tx.send_replace(SyncPhase::Applying);
        let report = {
            let store = self.store.clone();
            let tracker = self.tracker.clone();
            let device_id = self.device_id;
            let changes = collected.changes.clone();
            task::spawn_blocking(move || {
                let report = apply_payload(&store, &tracker, device_id, &payload, &changes)?;
                store.set_last_sync_timestamp(Timestamp::now())?;
                Ok::<_, StorageError>(report)
            })
            .await
            .map_err(|e| SyncError::Internal(format!("apply task failed: {e}")))??
        };

        let now = Instant::now();
        {
            let mut cooldowns = self.cooldowns.lock().unwrap();
            for key in &report.touched {
                cooldowns.insert(key.clone(), now);
            }
        }

        for conflict in &report.conflicts {
            self.events
                .publish(SyncEvent::ConflictDetected(conflict.clone()));
        }
        for (id, key, reason) in &report.rejected {
            self.events.publish(SyncEvent::OperationRejected {
                id: *id,
                key: key.clone(),
                reason: reason.clone(),
            });
        }

        let summary = CycleSummary {
            pushed: collected.changes.len(),
            applied: report.applied,
            conflicts: report.conflicts.len(),
            rejected: report.rejected.len(),
            failed: false,
        };
        info!(
            "sync cycle completed: pushed {}, applied {}, {} conflicts, {} rejections",
            summary.pushed, summary.applied, summary.conflicts, summary.rejected
        );
        Ok(CycleOutcome::Completed(summary))
    }

    /// Gathers everything worth pushing: queued operations first, then
    /// dirty entities not already covered by one. Keys with an open
    /// conflict or inside the cooldown window sit this cycle out.
    async fn collect(&self) -> SyncResult<CollectedWork> {
        let cooled = self.cooled_keys();
        let store = self.store.clone();
        let work = task::spawn_blocking(move || -> StorageResult<CollectedWork> {
            let conflicted: HashSet<EntityKey> = store.conflicted_keys()?.into_iter().collect();
            let last_sync = store.last_sync_timestamp()?;

            let mut changes = Vec::new();
            let mut queued_keys = HashSet::new();
            for op in store.pending_operations()? {
                if conflicted.contains(&op.key) || cooled.contains(&op.key) {
                    continue;
                }
                let base = store.committed_version(&op.key)?;
                queued_keys.insert(op.key.clone());
                changes.push(LocalChange::from_operation(&op, base));
            }
            for key in store.dirty_keys()? {
                if conflicted.contains(&key)
                    || cooled.contains(&key)
                    || queued_keys.contains(&key)
                {
                    continue;
                }
                if let Some(snapshot) = store.get_snapshot(&key)? {
                    changes.push(LocalChange::from_snapshot(&snapshot));
                }
            }
            Ok(CollectedWork { changes, last_sync })
        })
        .await
        .map_err(|e| SyncError::Internal(format!("collect task failed: {e}")))??;
        Ok(work)
    }

    /// Books a failed exchange: every queued operation that was in
    /// flight gets a retry tick, which may convert it to a conflict.
    async fn fail_cycle(&self, collected: &CollectedWork, reason: &str) -> SyncResult<CycleOutcome> {
        let queue = self.queue.clone();
        let reason = reason.to_string();
        let op_ids: Vec<OperationId> = collected
            .changes
            .iter()
            .filter_map(|change| change.operation_id)
            .collect();
        let conflicts = task::spawn_blocking(move || -> StorageResult<usize> {
            let mut converted = 0;
            for id in op_ids {
                if queue.record_failure(id, &reason)?.is_some() {
                    converted += 1;
                }
            }
            Ok(converted)
        })
        .await
        .map_err(|e| SyncError::Internal(format!("retry bookkeeping task failed: {e}")))??;

        Ok(CycleOutcome::Completed(CycleSummary {
            pushed: collected.changes.len(),
            applied: 0,
            conflicts,
            rejected: 0,
            failed: true,
        }))
    }

    /// Keys still inside the cooldown window. Expired stamps are pruned.
    fn cooled_keys(&self) -> HashSet<EntityKey> {
        let mut cooldowns = self.cooldowns.lock().unwrap();
        let window = self.config.cooldown;
        cooldowns.retain(|_, stamped| stamped.elapsed() < window);
        cooldowns.keys().cloned().collect()
    }
}

/// Applies an exchange response to the local store, in response order.
fn apply_payload(
    store: &LocalStore,
    tracker: &ChangeTracker,
    device_id: DeviceId,
    payload: &SyncPayload,
    changes: &[LocalChange],
) -> StorageResult<ApplyReport> {
    let mut report = ApplyReport::default();

    for change in &payload.remote_changes {
        let key = change.key();
        if store.has_open_conflict(&key)? {
            debug!("holding remote change for {key}: conflict already open");
            continue;
        }
        let local = store.committed_version(&key)?;
        let dirty = tracker.is_dirty(&key)?;

        if change.version < local {
            debug!(
                "rejecting stale remote change for {key}: {} < {local}",
                change.version
            );
            continue;
        }
        if change.version == local && dirty {
            debug!("holding remote change for {key}: local edits pending at the same version");
            continue;
        }
        if change.version > local && dirty {
            // Newer remote against uncommitted local edits: exactly one
            // conflict, and the local copy stays untouched.
            if let Some(snapshot) = store.get_snapshot(&key)? {
                if let Some(conflict) = resolver::detect(&snapshot, true, change, device_id) {
                    store.save_conflict(&conflict)?;
                    warn!(
                        "version clash on {key}: local {} is dirty, remote moved to {}",
                        snapshot.version, change.version
                    );
                    report.conflicts.push(conflict);
                    report.touched.push(key);
                }
            }
            continue;
        }

        // Clean local copy at or behind the remote: adopt.
        if change.is_deletion() {
            store.delete_entity(&key)?;
        } else {
            tracker.accept_remote(&key, &change.data, change.version)?;
        }
        report.applied += 1;
        report.touched.push(key);
    }

    // Conflicts the remote reported against our pushes. Record them
    // before touching the queue so a crash cannot lose the clash.
    for rc in &payload.conflicts {
        let key = rc.key();
        if store.has_open_conflict(&key)? {
            continue;
        }
        let local_version = store.committed_version(&key)?;
        let local_data = store
            .get_snapshot(&key)?
            .map(|s| s.data)
            .unwrap_or(Value::Null);
        let conflict = Conflict::version_clash(
            key.clone(),
            local_data,
            local_version,
            rc.remote_data.clone(),
            rc.remote_version,
            device_id,
        );
        store.save_conflict(&conflict)?;
        warn!("remote reported a clash on {key}, recorded conflict {}", conflict.id);
        report.conflicts.push(conflict);
        report.touched.push(key);
    }

    // Settle our own pushes: dequeue everything, then advance version
    // bookkeeping for the ones the remote actually accepted. A push whose
    // key picked up a conflict above stays uncommitted until resolution.
    let contested: HashSet<EntityKey> = payload
        .conflicts
        .iter()
        .map(|c| c.key())
        .chain(report.conflicts.iter().map(|c| c.key.clone()))
        .collect();
    let rejected_ids: HashMap<OperationId, String> = payload
        .rejections
        .iter()
        .map(|r| (r.operation_id, r.reason.clone()))
        .collect();
    for change in changes {
        let key = change.key();
        let conflicted = contested.contains(&key);
        match change.operation_id {
            Some(id) => {
                if let Some(reason) = rejected_ids.get(&id) {
                    store.mark_completed(id)?;
                    report.rejected.push((id, key, reason.clone()));
                    continue;
                }
                store.mark_completed(id)?;
                if conflicted {
                    continue;
                }
                if change.kind == OperationKind::Delete {
                    store.delete_entity(&key)?;
                } else {
                    tracker.commit(&key, &change.data)?;
                }
            }
            None => {
                if conflicted {
                    continue;
                }
                tracker.commit(&key, &change.data)?;
            }
        }
        report.touched.push(key);
    }

    Ok(report)
}

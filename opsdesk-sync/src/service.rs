//! Background sync service.
//!
//! [`SyncService::spawn`] assembles the engine on top of a [`LocalStore`]
//! and a [`RemoteService`] and runs one `select!` loop over everything
//! that can start a cycle: the periodic ticker, the monitor's reconnect
//! nudge and explicit commands. Every arm funnels into
//! `SyncCoordinator::try_sync`, so overlapping triggers cost nothing and
//! cannot overlap on the wire.

use std::sync::Arc;

use opsdesk_store::LocalStore;
use opsdesk_types::{Conflict, ConflictId, DeviceId, EntityKey, OperationKind, QueuedOperation};
use serde_json::Value;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::{self, JoinHandle};
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::config::SyncConfig;
use crate::coordinator::{CycleOutcome, SyncCoordinator};
use crate::error::{SyncError, SyncResult};
use crate::events::{EventBus, SyncEvent};
use crate::monitor::ConnectivityMonitor;
use crate::queue::OfflineQueue;
use crate::remote::RemoteService;
use crate::resolver::{ConflictResolver, Resolution};
use crate::tracker::ChangeTracker;

/// Commands the service loop accepts.
pub enum SyncCommand {
    /// Run a cycle now and report how it went.
    SyncNow(oneshot::Sender<SyncResult<CycleOutcome>>),
    /// Stop the service loop and its background tasks.
    Shutdown,
}

/// The background sync service.
pub struct SyncService;

impl SyncService {
    /// Wires up the engine and spawns its background loops.
    ///
    /// The returned handle is cheap to clone and is the application's
    /// entire interface to the engine: local writes, offline mutations,
    /// conflict handling and lifecycle all go through it.
    pub async fn spawn(
        store: LocalStore,
        remote: Arc<dyn RemoteService>,
        config: SyncConfig,
    ) -> SyncResult<SyncHandle> {
        let device_id = {
            let store = store.clone();
            task::spawn_blocking(move || store.device_id())
                .await
                .map_err(|e| SyncError::Internal(format!("device id task failed: {e}")))??
        };

        let events = EventBus::default();
        let (monitor, nudges) = ConnectivityMonitor::new(remote.clone(), &config, events.clone());
        let probe_loop = monitor.spawn_probe_loop();
        let tracker = ChangeTracker::new(store.clone());
        let queue = OfflineQueue::new(store.clone(), events.clone(), &config);
        let resolver = Arc::new(ConflictResolver::new(
            store.clone(),
            tracker.clone(),
            remote.clone(),
            events.clone(),
            device_id,
        ));
        let coordinator = Arc::new(SyncCoordinator::new(
            store.clone(),
            tracker.clone(),
            queue.clone(),
            monitor.clone(),
            remote,
            events.clone(),
            config.clone(),
            device_id,
        ));

        let (commands, command_rx) = mpsc::channel(16);
        tokio::spawn(run_loop(
            coordinator,
            queue.clone(),
            nudges,
            command_rx,
            probe_loop,
            config,
        ));
        info!("sync service started for device {device_id}");

        Ok(SyncHandle {
            commands,
            events,
            monitor,
            queue,
            tracker,
            resolver,
            device_id,
        })
    }
}

async fn run_loop(
    coordinator: Arc<SyncCoordinator>,
    queue: OfflineQueue,
    mut nudges: mpsc::Receiver<()>,
    mut commands: mpsc::Receiver<SyncCommand>,
    probe_loop: JoinHandle<()>,
    config: SyncConfig,
) {
    let mut ticker = tokio::time::interval(config.sync_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut sweeper = tokio::time::interval(config.sweep_interval);
    sweeper.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                if let Err(e) = coordinator.try_sync().await {
                    warn!("scheduled sync failed: {e}");
                }
            }
            _ = sweeper.tick() => {
                let queue = queue.clone();
                match task::spawn_blocking(move || queue.sweep_stale()).await {
                    Ok(Ok(_)) => {}
                    Ok(Err(e)) => warn!("stale queue sweep failed: {e}"),
                    Err(e) => warn!("stale queue sweep task panicked: {e}"),
                }
            }
            Some(()) = nudges.recv() => {
                debug!("connectivity nudge received");
                if let Err(e) = coordinator.try_sync().await {
                    warn!("reconnect sync failed: {e}");
                }
            }
            command = commands.recv() => {
                match command {
                    Some(SyncCommand::SyncNow(reply)) => {
                        let outcome = coordinator.try_sync().await;
                        let _ = reply.send(outcome);
                    }
                    Some(SyncCommand::Shutdown) | None => break,
                }
            }
        }
    }
    probe_loop.abort();
    info!("sync service stopped");
}

/// Application-facing handle to a running sync service.
#[derive(Clone)]
pub struct SyncHandle {
    commands: mpsc::Sender<SyncCommand>,
    events: EventBus,
    monitor: ConnectivityMonitor,
    queue: OfflineQueue,
    tracker: ChangeTracker,
    resolver: Arc<ConflictResolver>,
    device_id: DeviceId,
}

impl SyncHandle {
    /// Device identity of this installation.
    pub fn device_id(&self) -> DeviceId {
        self.device_id
    }

    /// Runs a sync cycle now and waits for its outcome.
    pub async fn sync_now(&self) -> SyncResult<CycleOutcome> {
        let (reply, response) = oneshot::channel();
        self.commands
            .send(SyncCommand::SyncNow(reply))
            .await
            .map_err(|_| SyncError::ChannelClosed)?;
        response.await.map_err(|_| SyncError::ChannelClosed)?
    }

    /// Subscribes to engine events published after this call.
    pub fn subscribe_events(&self) -> broadcast::Receiver<SyncEvent> {
        self.events.subscribe()
    }

    /// Stops the service loop. Idempotent; a second call is a no-op.
    pub async fn shutdown(&self) {
        let _ = self.commands.send(SyncCommand::Shutdown).await;
    }

    /// Current connectivity verdict.
    pub fn is_online(&self) -> bool {
        self.monitor.is_online()
    }

    /// Feeds a platform network event into the connectivity monitor.
    pub async fn set_network_available(&self, available: bool) {
        self.monitor.set_network_available(available).await;
    }

    /// Records a local edit; the next cycle will pick it up as dirty.
    pub async fn record_local_write(&self, key: &EntityKey, data: &Value) -> SyncResult<()> {
        let tracker = self.tracker.clone();
        let key = key.clone();
        let data = data.clone();
        task::spawn_blocking(move || tracker.record_local_write(&key, &data))
            .await
            .map_err(|e| SyncError::Internal(format!("local write task failed: {e}")))??;
        Ok(())
    }

    /// Queues a mutation for delivery once the remote is reachable.
    pub async fn enqueue(
        &self,
        kind: OperationKind,
        key: EntityKey,
        payload: Value,
    ) -> SyncResult<QueuedOperation> {
        let queue = self.queue.clone();
        let device_id = self.device_id;
        let op = task::spawn_blocking(move || queue.enqueue(kind, key, payload, device_id))
            .await
            .map_err(|e| SyncError::Internal(format!("enqueue task failed: {e}")))??;
        Ok(op)
    }

    /// Operations still waiting in the offline queue, in drain order.
    pub async fn pending_operations(&self) -> SyncResult<Vec<QueuedOperation>> {
        let queue = self.queue.clone();
        let ops = task::spawn_blocking(move || queue.pending())
            .await
            .map_err(|e| SyncError::Internal(format!("queue listing task failed: {e}")))??;
        Ok(ops)
    }

    /// Conflicts awaiting a decision, oldest first.
    pub async fn open_conflicts(&self) -> SyncResult<Vec<Conflict>> {
        self.resolver.open_conflicts().await
    }

    /// Resolves an open conflict and returns the data that won.
    pub async fn resolve_conflict(
        &self,
        conflict_id: ConflictId,
        resolution: Resolution,
    ) -> SyncResult<Value> {
        self.resolver.resolve(conflict_id, resolution).await
    }
}

//! Engine events.
//!
//! Components publish [`SyncEvent`]s onto a broadcast channel; the UI and
//! tests subscribe. Publishing never blocks and never fails: with no
//! subscribers the event is simply dropped.

use opsdesk_types::{Conflict, ConflictId, EntityKey, OperationId};
use tokio::sync::broadcast;

/// What happened during one sync cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CycleSummary {
    /// Local changes sent to the remote.
    pub pushed: usize,
    /// Remote changes applied locally.
    pub applied: usize,
    /// Conflicts recorded during this cycle.
    pub conflicts: usize,
    /// Operations the remote refused.
    pub rejected: usize,
    /// Whether the exchange failed (network error or timeout).
    pub failed: bool,
}

/// Events emitted by the sync engine.
#[derive(Debug, Clone)]
pub enum SyncEvent {
    /// The connectivity monitor changed its verdict.
    ConnectivityChanged { online: bool },
    /// A sync cycle ran to completion (successfully or not).
    CycleCompleted(CycleSummary),
    /// A new conflict was recorded.
    ConflictDetected(Conflict),
    /// An open conflict was resolved and removed.
    ConflictResolved { id: ConflictId, key: EntityKey },
    /// The remote refused a queued operation; it has been dropped.
    OperationRejected {
        id: OperationId,
        key: EntityKey,
        reason: String,
    },
}

/// Fan-out handle for [`SyncEvent`]s.
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<SyncEvent>,
}

impl EventBus {
    /// Creates a bus retaining up to `capacity` undelivered events per
    /// subscriber before the slowest subscriber starts lagging.
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Subscribes to events published after this call.
    pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
        self.tx.subscribe()
    }

    /// Publishes an event. A bus with no subscribers swallows it.
    pub fn publish(&self, event: SyncEvent) {
        let _ = self.tx.send(event);
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(64)
    }
}

//! Engine configuration.

use std::time::Duration;

use opsdesk_types::OperationKind;

/// Configuration for the sync engine.
///
/// The defaults are tuned for a point-of-sale deployment on a flaky
/// connection: frequent enough that a reconnect drains the queue quickly,
/// conservative enough that a flapping link does not thrash the remote.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// How often the service loop attempts a periodic sync cycle.
    pub sync_interval: Duration,
    /// How often the connectivity monitor probes the remote health endpoint.
    pub probe_interval: Duration,
    /// Grace period after connectivity returns before the first sync fires.
    pub settle_delay: Duration,
    /// Hard deadline for a single network exchange.
    pub exchange_timeout: Duration,
    /// Per-key window during which a just-synced entity is not re-sent.
    pub cooldown: Duration,
    /// Confirmed remote failures before a queued operation is converted
    /// into a conflict.
    pub max_retries: u32,
    /// Queued operations older than this are purged by the sweep.
    pub stale_after: Duration,
    /// How often the stale-queue sweep runs.
    pub sweep_interval: Duration,
    /// Queue priority assigned to create operations.
    pub create_priority: u8,
    /// Queue priority assigned to update operations.
    pub update_priority: u8,
    /// Queue priority assigned to delete operations.
    pub delete_priority: u8,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            sync_interval: Duration::from_secs(30),
            probe_interval: Duration::from_secs(30),
            settle_delay: Duration::from_secs(2),
            exchange_timeout: Duration::from_secs(10),
            cooldown: Duration::from_millis(2500),
            max_retries: 3,
            stale_after: Duration::from_secs(30 * 24 * 60 * 60), // 30 days
            sweep_interval: Duration::from_secs(60 * 60), // 1 hour
            create_priority: OperationKind::Create.default_priority(),
            update_priority: OperationKind::Update.default_priority(),
            delete_priority: OperationKind::Delete.default_priority(),
        }
    }
}

impl SyncConfig {
    /// Queue priority for an operation of the given kind.
    pub fn priority_for(&self, kind: OperationKind) -> u8 {
        match kind {
            OperationKind::Create => self.create_priority,
            OperationKind::Update => self.update_priority,
            OperationKind::Delete => self.delete_priority,
        }
    }
}

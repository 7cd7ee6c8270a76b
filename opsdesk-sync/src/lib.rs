//! Offline-first synchronization engine for OpsDesk.
//!
//! OpsDesk installations keep working when the backend is unreachable:
//! edits land in the local store, mutations queue up durably, and a
//! background service pushes everything and pulls remote changes once
//! connectivity returns. The pieces:
//!
//! - [`ConnectivityMonitor`]: verified connectivity, not just a network flag
//! - [`ChangeTracker`]: content-hash dirtiness and per-entity versions
//! - [`OfflineQueue`]: durable operation queue with priorities and retry limits
//! - [`SyncCoordinator`]: the collect/exchange/apply cycle
//! - [`ConflictResolver`]: version-clash detection and resolution
//! - [`SyncService`]: the background loop tying it all together
//!
//! # Example
//!
//! ```
//! use opsdesk_sync::SyncConfig;
//! use std::time::Duration;
//!
//! let config = SyncConfig {
//!     sync_interval: Duration::from_secs(60),
//!     ..SyncConfig::default()
//! };
//! assert_eq!(config.max_retries, 3);
//! ```

pub mod config;
pub mod coordinator;
pub mod error;
pub mod events;
pub mod monitor;
pub mod protocol;
pub mod queue;
pub mod remote;
pub mod resolver;
pub mod service;
pub mod tracker;

pub use config::SyncConfig;
pub use coordinator::{CycleOutcome, SkipReason, SyncCoordinator, SyncPhase};
pub use error::{SyncError, SyncResult};
pub use events::{CycleSummary, EventBus, SyncEvent};
pub use monitor::ConnectivityMonitor;
pub use protocol::{
    HealthStatus, LocalChange, RemoteChange, RemoteConflict, RemoteRejection,
    ResolveConflictRequest, SyncPayload, SyncRequest, SyncResponse,
};
pub use queue::OfflineQueue;
pub use remote::{HttpRemote, RemoteService};
pub use resolver::{ConflictResolver, Resolution};
pub use service::{SyncCommand, SyncHandle, SyncService};
pub use tracker::ChangeTracker;

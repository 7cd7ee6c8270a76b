//! Core type definitions for the OpsDesk sync engine.
//!
//! This crate defines the fundamental, domain-agnostic types the engine is
//! built on:
//! - Device, operation, conflict and entity identifiers
//! - Epoch-millisecond timestamps with RFC 3339 wire formatting
//! - Per-entity version counters and deterministic content hashes
//! - Entity snapshots, queued offline operations and conflict records
//!
//! Business entities (projects, sales, appointments, …) are opaque JSON here;
//! their shapes belong to the application layer, not to the engine.

mod conflict;
mod hash;
mod ids;
mod operation;
mod snapshot;
mod timestamp;
mod version;

pub use conflict::{Conflict, ResolutionChoice};
pub use hash::ContentHash;
pub use ids::{ConflictId, DeviceId, EntityKey, KeyParseError, OperationId};
pub use operation::{OperationKind, QueuedOperation};
pub use snapshot::{EntitySnapshot, VersionRecord};
pub use timestamp::Timestamp;
pub use version::Version;

/// Result type alias using the crate's error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in type operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("invalid UUID: {0}")]
    InvalidUuid(#[from] uuid::Error),

    #[error("invalid entity key: {0}")]
    InvalidKey(#[from] KeyParseError),

    #[error("invalid timestamp: {0}")]
    InvalidTimestamp(#[from] chrono::ParseError),
}

//! SQLite storage layer for the OpsDesk sync engine.
//!
//! One local database file backs everything the engine needs to survive a
//! restart while offline: entity snapshots, committed version records, the
//! offline operation queue, open conflicts, and sync metadata (device id,
//! last sync time).
//!
//! # Architecture
//!
//! - Entities are stored as JSON blobs keyed by `(entity_type, entity_id)`
//! - Dirty detection is hash-based: a snapshots/versions hash mismatch marks
//!   an entity as needing sync, wall-clock time is never consulted
//! - The queue and conflict tables are mutated only by the sync components
//! - Schema is created on open; `open_in_memory()` backs the test suites

mod error;
mod local_store;

pub use error::{StorageError, StorageResult};
pub use local_store::LocalStore;

//! Conflict records — detected divergences requiring a decision.
//!
//! A conflict is created when a remote change carries a higher version than
//! the locally committed one while the entity also has unreconciled local
//! edits, when the remote reports a clash on a pushed change, or when a
//! queued operation exhausts its retry budget (remote state unknown). It is
//! destroyed only by an explicit resolution call — later sync cycles never
//! auto-resolve it, and while it is open the entity's remote-apply path is
//! blocked.

use crate::{ConflictId, DeviceId, EntityKey, Timestamp, Version};
use serde::{Deserialize, Serialize};
use std::fmt;

/// A detected divergence between local and remote state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Conflict {
    /// Unique identifier for this conflict.
    pub id: ConflictId,
    /// The entity in conflict.
    pub key: EntityKey,
    /// The local data at detection time (kept for display and resolution).
    pub local_data: serde_json::Value,
    /// The remote data, if known. `None` when the conflict came from retry
    /// exhaustion and the remote state could not be fetched.
    pub remote_data: Option<serde_json::Value>,
    /// The locally committed version at detection time.
    pub local_version: Version,
    /// The remote version, if known.
    pub remote_version: Option<Version>,
    /// When the divergence was detected.
    pub detected_at: Timestamp,
    /// The installation that detected it.
    pub origin_device: DeviceId,
}

impl Conflict {
    /// Creates a conflict for a version clash with known remote state.
    #[must_use]
    pub fn version_clash(
        key: EntityKey,
        local_data: serde_json::Value,
        local_version: Version,
        remote_data: serde_json::Value,
        remote_version: Version,
        origin_device: DeviceId,
    ) -> Self {
        Self {
            id: ConflictId::new(),
            key,
            local_data,
            remote_data: Some(remote_data),
            local_version,
            remote_version: Some(remote_version),
            detected_at: Timestamp::now(),
            origin_device,
        }
    }

    /// Creates a conflict for a queued operation whose retries are exhausted;
    /// the remote state is unknown.
    #[must_use]
    pub fn retries_exhausted(
        key: EntityKey,
        local_data: serde_json::Value,
        local_version: Version,
        origin_device: DeviceId,
    ) -> Self {
        Self {
            id: ConflictId::new(),
            key,
            local_data,
            remote_data: None,
            local_version,
            remote_version: None,
            detected_at: Timestamp::now(),
            origin_device,
        }
    }

    /// Whether the remote side of the conflict is known.
    #[must_use]
    pub fn has_remote(&self) -> bool {
        self.remote_data.is_some()
    }
}

/// The caller's decision when resolving a conflict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResolutionChoice {
    /// Keep the local data.
    Local,
    /// Adopt the remote data (requires known remote state).
    Remote,
    /// Use caller-supplied merged data.
    Merge,
}

impl fmt::Display for ResolutionChoice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Local => "local",
            Self::Remote => "remote",
            Self::Merge => "merge",
        })
    }
}

//! Per-entity version counters.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A monotonically increasing version counter recorded per entity.
///
/// Advanced by exactly one on every committed local change; set to the
/// remote's value when a remote change is adopted. `Version::ZERO` means the
/// entity has never been committed.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
#[serde(transparent)]
pub struct Version(u64);

impl Version {
    /// The never-committed version.
    pub const ZERO: Self = Self(0);

    /// Creates a version from a raw counter value.
    #[must_use]
    pub const fn new(value: u64) -> Self {
        Self(value)
    }

    /// Returns the raw counter value.
    #[must_use]
    pub const fn get(&self) -> u64 {
        self.0
    }

    /// The next version (current + 1).
    #[must_use]
    pub const fn next(&self) -> Self {
        Self(self.0 + 1)
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "v{}", self.0)
    }
}

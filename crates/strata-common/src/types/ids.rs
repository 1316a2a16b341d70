//! Identifier newtypes.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A snapshot identifier.
///
/// Snapshot ids are drawn from a monotone per-database counter when a
/// transaction begins. They name the database state a transaction started
/// from; conflict validation itself compares per-cell version numbers, so
/// the id primarily serves diagnostics.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[repr(transparent)]
pub struct SnapshotId(u64);

impl SnapshotId {
    /// The first snapshot id handed out by a fresh database.
    pub const FIRST: Self = Self(1);

    /// Creates a snapshot id from a raw u64 value.
    #[inline]
    #[must_use]
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    /// Returns the raw u64 value.
    #[inline]
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Debug for SnapshotId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SnapshotId({})", self.0)
    }
}

impl fmt::Display for SnapshotId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for SnapshotId {
    #[inline]
    fn from(id: u64) -> Self {
        Self::new(id)
    }
}

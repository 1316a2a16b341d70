//! Cells and versions.
//!
//! A *cell* is the in-memory home of a single object or link-set. Its
//! `current` slot points at the latest committed [`ObjectVersion`];
//! transactions that write fork a private dirty copy and the commit
//! protocol swaps it in. Version numbers within a cell are strictly
//! monotone: every fork captures `current.version_no + 1`.
//!
//! ```text
//!  Cell "person^alice"
//!  ┌──────────────────────────────────────────────┐
//!  │ current ──▶ ObjectVersion { v: 3, payload }  │  committed, shared
//!  │ ref_count: 2     loaded: true                │
//!  └──────────────────────────────────────────────┘
//!        ▲                          ▲
//!   txn A holds v3 (clean)     txn B holds fork v4 (dirty, private)
//! ```

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering as AtomicOrdering};
use std::sync::Arc;

use parking_lot::{Mutex, MutexGuard};

use strata_common::types::{CellRef, Key};
use strata_links::LinkSet;

use crate::registry::{BoxedPayload, SharedPayload, TypeHandle};

/// The payload of a committed version: immutable once published.
pub(crate) enum VersionPayload {
    /// An opaque user object.
    Object(SharedPayload),
    /// A link-set with a frozen baseline and settled deltas.
    Links(LinkSet),
}

/// A committed version of a cell's payload.
///
/// Readers hold a shared pointer to a version and traverse its payload
/// without locking; the cell lock only serializes replacing `current`.
pub(crate) struct ObjectVersion {
    pub(crate) version_no: i64,
    pub(crate) payload: VersionPayload,
}

impl ObjectVersion {
    pub(crate) fn new(version_no: i64, payload: VersionPayload) -> Self {
        Self {
            version_no,
            payload,
        }
    }
}

impl fmt::Debug for ObjectVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match self.payload {
            VersionPayload::Object(_) => "object",
            VersionPayload::Links(_) => "links",
        };
        write!(f, "ObjectVersion(v{}, {kind})", self.version_no)
    }
}

/// The payload of a dirty version, private to one transaction until it is
/// committed or discarded.
pub(crate) enum WorkingPayload {
    /// A deep copy of the user object, free to mutate.
    Object(BoxedPayload),
    /// A link-set sharing the committed baseline, with fresh deltas.
    Links(LinkSet),
}

/// The in-memory home of one object or link-set.
pub(crate) struct Cell {
    type_handle: Arc<TypeHandle>,
    key: Key,
    link_name: Option<String>,
    /// The latest committed version. The lock serializes commit validation
    /// and replacement; it does not gate readers that already hold a
    /// version pointer.
    current: Mutex<Arc<ObjectVersion>>,
    /// Number of live transactions holding a version entry for this cell.
    /// A pinned cell survives cache flushes.
    ref_count: AtomicU32,
    loaded: AtomicBool,
}

impl Cell {
    /// Creates an unloaded cell holding the nil value at version 0.
    pub(crate) fn new(type_handle: Arc<TypeHandle>, cref: &CellRef) -> Self {
        let initial = if cref.is_links() {
            VersionPayload::Links(LinkSet::new())
        } else {
            VersionPayload::Object(Arc::from(type_handle.nil_value()))
        };
        Self {
            key: cref.key().clone(),
            link_name: cref.link_name().map(str::to_string),
            current: Mutex::new(Arc::new(ObjectVersion::new(0, initial))),
            ref_count: AtomicU32::new(0),
            loaded: AtomicBool::new(false),
            type_handle,
        }
    }

    pub(crate) fn type_handle(&self) -> &Arc<TypeHandle> {
        &self.type_handle
    }

    pub(crate) fn key(&self) -> &Key {
        &self.key
    }

    pub(crate) fn link_name(&self) -> Option<&str> {
        self.link_name.as_deref()
    }

    pub(crate) fn is_links(&self) -> bool {
        self.link_name.is_some()
    }

    pub(crate) fn loaded(&self) -> bool {
        self.loaded.load(AtomicOrdering::Acquire)
    }

    pub(crate) fn set_loaded(&self) {
        self.loaded.store(true, AtomicOrdering::Release);
    }

    /// Pins the cell against cache eviction.
    pub(crate) fn pin(&self) {
        self.ref_count.fetch_add(1, AtomicOrdering::Relaxed);
    }

    /// Releases one pin.
    pub(crate) fn unpin(&self) {
        let prior = self.ref_count.fetch_sub(1, AtomicOrdering::Relaxed);
        debug_assert!(prior > 0, "cell unpinned below zero");
    }

    pub(crate) fn ref_count(&self) -> u32 {
        self.ref_count.load(AtomicOrdering::Relaxed)
    }

    /// Locks the current slot, waiting if necessary.
    pub(crate) fn lock_current(&self) -> MutexGuard<'_, Arc<ObjectVersion>> {
        self.current.lock()
    }

    /// Tries to lock the current slot without waiting.
    pub(crate) fn try_lock_current(&self) -> Option<MutexGuard<'_, Arc<ObjectVersion>>> {
        self.current.try_lock()
    }

    /// Forks a dirty working payload from the committed version `current`,
    /// numbered one past it.
    pub(crate) fn fork_from(&self, current: &ObjectVersion) -> (i64, WorkingPayload) {
        let payload = match &current.payload {
            VersionPayload::Object(payload) => {
                WorkingPayload::Object(self.type_handle.deep_copy(payload.as_ref()))
            }
            VersionPayload::Links(links) => WorkingPayload::Links(links.new_version()),
        };
        (current.version_no + 1, payload)
    }

    /// Forks from whatever is committed right now.
    pub(crate) fn fork(&self) -> (i64, WorkingPayload) {
        let current = self.current.lock();
        self.fork_from(&current)
    }
}

impl fmt::Debug for Cell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Cell")
            .field("type", &self.type_handle.name())
            .field("key", &self.key)
            .field("link_name", &self.link_name)
            .field("ref_count", &self.ref_count())
            .field("loaded", &self.loaded())
            .finish()
    }
}

//! Transactions, working sets, and the commit coordinator.
//!
//! A transaction accumulates a *working set*: for every cell it touches,
//! either the committed version it read or the private dirty version it
//! forked for writing. Nothing escapes the working set until commit.
//!
//! Commit is optimistic, in two phases over the working set:
//!
//! ```text
//! ACTIVE ──commit()──▶ COMMITTING
//! COMMITTING ──conflict────▶ ABORTED    (terminal)
//! COMMITTING ──success─────▶ FINISHED   (terminal)
//! COMMITTING ──backend err─▶ ERROR      (terminal)
//! ```
//!
//! The lock phase try-locks every touched cell and retries the whole
//! attempt on any failure, so commits cannot deadlock regardless of lock
//! order. Validation compares each entry's version number against the
//! exact expected value; any mismatch aborts. Retries back off with a
//! gently growing randomized delay, since contention is expected to be
//! short-lived and latency-sensitive.

use std::any::Any;
use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::Ordering as AtomicOrdering;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use bytes::Bytes;
use parking_lot::MutexGuard;
use rand::Rng;
use tracing::{debug, error, trace};

use strata_common::types::{CellRef, Key, SnapshotId};
use strata_common::StrataResult;
use strata_links::LinkSet;
use strata_storage::ResultSet;

use crate::database::DbInner;
use crate::object::{Cell, ObjectVersion, VersionPayload, WorkingPayload};
use crate::registry::{BoxedPayload, SharedPayload, TypeHandle};

/// Starting backoff between commit attempts, in milliseconds.
const INITIAL_BACKOFF_MS: f64 = 10.0;
/// Backoff growth factor per failed attempt.
const BACKOFF_EXPONENT: f64 = 1.05;
/// Uniform jitter subtracted from the backoff, in milliseconds.
const JITTER_MS: u64 = 10;

/// Transaction lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxnState {
    /// User operations are accepted.
    Active,
    /// Commit is in progress.
    Committing,
    /// Commit succeeded.
    Finished,
    /// Commit was rejected by validation.
    Aborted,
    /// The backend failed during commit. The in-memory store has already
    /// installed this transaction's versions and is ahead of the backend.
    Error,
}

impl TxnState {
    /// Returns true if user operations are accepted.
    #[must_use]
    pub fn is_active(&self) -> bool {
        *self == TxnState::Active
    }

    /// Returns true if the transaction has reached a terminal state.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, TxnState::Finished | TxnState::Aborted | TxnState::Error)
    }
}

impl fmt::Display for TxnState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TxnState::Active => write!(f, "ACTIVE"),
            TxnState::Committing => write!(f, "COMMITTING"),
            TxnState::Finished => write!(f, "FINISHED"),
            TxnState::Aborted => write!(f, "ABORTED"),
            TxnState::Error => write!(f, "ERROR"),
        }
    }
}

/// What a working-set entry holds for its cell.
enum WorkingState {
    /// The committed version captured at first read.
    Clean(Arc<ObjectVersion>),
    /// A private dirty payload forked at first write.
    Dirty(WorkingPayload),
}

/// One working-set entry: a cell the transaction has touched, the version
/// number it is positioned at, and the payload state.
struct WorkingVersion {
    cell: Arc<Cell>,
    version_no: i64,
    state: WorkingState,
}

impl WorkingVersion {
    fn is_dirty(&self) -> bool {
        matches!(self.state, WorkingState::Dirty(_))
    }

    fn payload_any(&self) -> &(dyn Any + Send + Sync) {
        match &self.state {
            WorkingState::Clean(version) => match &version.payload {
                VersionPayload::Object(payload) => payload.as_ref(),
                VersionPayload::Links(_) => panic!("link cell addressed as an object"),
            },
            WorkingState::Dirty(WorkingPayload::Object(payload)) => payload.as_ref(),
            WorkingState::Dirty(WorkingPayload::Links(_)) => {
                panic!("link cell addressed as an object")
            }
        }
    }

    fn links(&self) -> &LinkSet {
        match &self.state {
            WorkingState::Clean(version) => match &version.payload {
                VersionPayload::Links(links) => links,
                VersionPayload::Object(_) => panic!("object cell addressed as links"),
            },
            WorkingState::Dirty(WorkingPayload::Links(links)) => links,
            WorkingState::Dirty(WorkingPayload::Object(_)) => {
                panic!("object cell addressed as links")
            }
        }
    }

    fn links_mut(&mut self) -> &mut LinkSet {
        match &mut self.state {
            WorkingState::Dirty(WorkingPayload::Links(links)) => links,
            WorkingState::Dirty(WorkingPayload::Object(_)) => {
                panic!("object cell addressed as links")
            }
            WorkingState::Clean(_) => panic!("mutating a version that was not forked"),
        }
    }

    fn object_mut(&mut self) -> &mut (dyn Any + Send + Sync) {
        match &mut self.state {
            WorkingState::Dirty(WorkingPayload::Object(payload)) => payload.as_mut(),
            WorkingState::Dirty(WorkingPayload::Links(_)) => {
                panic!("link cell addressed as an object")
            }
            WorkingState::Clean(_) => panic!("mutating a version that was not forked"),
        }
    }

    fn replace_object(&mut self, payload: BoxedPayload) {
        match &mut self.state {
            WorkingState::Dirty(WorkingPayload::Object(slot)) => *slot = payload,
            WorkingState::Dirty(WorkingPayload::Links(_)) => {
                panic!("link cell addressed as an object")
            }
            WorkingState::Clean(_) => panic!("mutating a version that was not forked"),
        }
    }
}

/// A transaction over the store.
///
/// A transaction is bound to one thread of control at a time (it is `Send`
/// but not internally synchronized). All user operations require the
/// `ACTIVE` state; using a transaction after commit is a defect in the
/// calling code and panics.
pub struct Transaction {
    db: Arc<DbInner>,
    snapshot: SnapshotId,
    state: TxnState,
    versions: HashMap<Bytes, WorkingVersion>,
}

impl Transaction {
    pub(crate) fn begin(db: Arc<DbInner>, snapshot: SnapshotId) -> Self {
        Self {
            db,
            snapshot,
            state: TxnState::Active,
            versions: HashMap::new(),
        }
    }

    /// The state a transaction can be ended with.
    #[must_use]
    pub fn state(&self) -> TxnState {
        self.state
    }

    /// The snapshot id this transaction began from.
    #[must_use]
    pub fn snapshot(&self) -> SnapshotId {
        self.snapshot
    }

    /// Resolves a cell reference to this transaction's working-set entry,
    /// reading or forking as needed.
    fn get_version(
        &mut self,
        type_handle: &Arc<TypeHandle>,
        cref: CellRef,
        for_write: bool,
        load: bool,
    ) -> StrataResult<&mut WorkingVersion> {
        if !self.state.is_active() {
            panic!("operation on {} transaction", self.state);
        }

        match self.versions.entry(cref.cache_key()) {
            Entry::Occupied(mut occupied) => {
                if for_write && !occupied.get().is_dirty() {
                    // First write after a read: fork from the committed
                    // current observed now.
                    let (version_no, payload) = occupied.get().cell.fork();
                    let entry = occupied.get_mut();
                    entry.version_no = version_no;
                    entry.state = WorkingState::Dirty(payload);
                }
                Ok(occupied.into_mut())
            }
            Entry::Vacant(vacant) => {
                let cell =
                    self.db
                        .cache
                        .ensure_cell(self.db.backend.as_ref(), type_handle, &cref, load)?;

                let (version_no, state) = {
                    let current = cell.lock_current();
                    cell.pin();
                    if for_write {
                        let (version_no, payload) = cell.fork_from(&current);
                        (version_no, WorkingState::Dirty(payload))
                    } else {
                        (current.version_no, WorkingState::Clean(Arc::clone(&current)))
                    }
                };

                Ok(vacant.insert(WorkingVersion {
                    cell,
                    version_no,
                    state,
                }))
            }
        }
    }

    fn link_ref(type_handle: &TypeHandle, link_name: &str, key: Key) -> CellRef {
        if type_handle.link(link_name).is_none() {
            panic!(
                "unknown link '{link_name}' on type '{}'",
                type_handle.name()
            );
        }
        CellRef::links(type_handle.name(), link_name, key)
    }

    /// Returns true iff the object holds a non-nil payload.
    pub fn exists(&mut self, type_name: &str, key: impl Into<Key>) -> StrataResult<bool> {
        let type_handle = self.db.registry.get(type_name);
        let entry = self.get_version(
            &type_handle,
            CellRef::object(type_name, key),
            false,
            true,
        )?;
        Ok(!type_handle.is_nil(entry.payload_any()))
    }

    /// Reads an object, passing an immutable view of its payload to `f`.
    ///
    /// An absent object reads as the type's nil value.
    pub fn read<T, R>(
        &mut self,
        type_name: &str,
        key: impl Into<Key>,
        f: impl FnOnce(&T) -> R,
    ) -> StrataResult<R>
    where
        T: Any + Send + Sync,
    {
        let type_handle = self.db.registry.get(type_name);
        let entry = self.get_version(
            &type_handle,
            CellRef::object(type_name, key),
            false,
            true,
        )?;
        let value = entry.payload_any().downcast_ref::<T>().unwrap_or_else(|| {
            panic!(
                "payload of type '{type_name}' is not a {}",
                std::any::type_name::<T>()
            )
        });
        Ok(f(value))
    }

    /// Writes an object, passing a mutable view of this transaction's
    /// private forked payload to `f`.
    pub fn write<T, R>(
        &mut self,
        type_name: &str,
        key: impl Into<Key>,
        f: impl FnOnce(&mut T) -> R,
    ) -> StrataResult<R>
    where
        T: Any + Send + Sync,
    {
        let type_handle = self.db.registry.get(type_name);
        let entry = self.get_version(&type_handle, CellRef::object(type_name, key), true, true)?;
        let value = entry.object_mut().downcast_mut::<T>().unwrap_or_else(|| {
            panic!(
                "payload of type '{type_name}' is not a {}",
                std::any::type_name::<T>()
            )
        });
        Ok(f(value))
    }

    /// Replaces an object's payload outright. The previous payload is not
    /// loaded.
    pub fn set<T>(&mut self, type_name: &str, key: impl Into<Key>, value: T) -> StrataResult<()>
    where
        T: Any + Send + Sync,
    {
        let type_handle = self.db.registry.get(type_name);
        let entry = self.get_version(&type_handle, CellRef::object(type_name, key), true, false)?;
        entry.replace_object(Box::new(value));
        Ok(())
    }

    /// Deletes an object by replacing its payload with the type's nil
    /// value.
    pub fn delete(&mut self, type_name: &str, key: impl Into<Key>) -> StrataResult<()> {
        let type_handle = self.db.registry.get(type_name);
        let entry = self.get_version(&type_handle, CellRef::object(type_name, key), true, true)?;
        let nil = entry.cell.type_handle().nil_value();
        entry.replace_object(nil);
        Ok(())
    }

    /// Materializes the current target keys of a link-set, sorted.
    pub fn read_links(
        &mut self,
        type_name: &str,
        link_name: &str,
        key: impl Into<Key>,
    ) -> StrataResult<Vec<Key>> {
        let type_handle = self.db.registry.get(type_name);
        let cref = Self::link_ref(&type_handle, link_name, key.into());
        let entry = self.get_version(&type_handle, cref, false, true)?;
        Ok(entry.links().read_keys())
    }

    /// Returns true iff `target` is in the link-set.
    pub fn has_link(
        &mut self,
        type_name: &str,
        link_name: &str,
        key: impl Into<Key>,
        target: impl Into<Key>,
    ) -> StrataResult<bool> {
        let type_handle = self.db.registry.get(type_name);
        let cref = Self::link_ref(&type_handle, link_name, key.into());
        let target = target.into();
        let entry = self.get_version(&type_handle, cref, false, true)?;
        Ok(entry.links().has(&target))
    }

    /// Adds `target` to the link-set. Idempotent.
    pub fn add_link(
        &mut self,
        type_name: &str,
        link_name: &str,
        key: impl Into<Key>,
        target: impl Into<Key>,
    ) -> StrataResult<()> {
        let type_handle = self.db.registry.get(type_name);
        let cref = Self::link_ref(&type_handle, link_name, key.into());
        let target = target.into();
        let entry = self.get_version(&type_handle, cref, true, true)?;
        entry.links_mut().add(&target);
        Ok(())
    }

    /// Removes `target` from the link-set. Idempotent.
    pub fn remove_link(
        &mut self,
        type_name: &str,
        link_name: &str,
        key: impl Into<Key>,
        target: impl Into<Key>,
    ) -> StrataResult<()> {
        let type_handle = self.db.registry.get(type_name);
        let cref = Self::link_ref(&type_handle, link_name, key.into());
        let target = target.into();
        let entry = self.get_version(&type_handle, cref, true, true)?;
        entry.links_mut().remove(&target);
        Ok(())
    }

    /// Replaces the link-set's target keys with exactly `targets`.
    pub fn set_links(
        &mut self,
        type_name: &str,
        link_name: &str,
        key: impl Into<Key>,
        targets: Vec<Key>,
    ) -> StrataResult<()> {
        let type_handle = self.db.registry.get(type_name);
        let cref = Self::link_ref(&type_handle, link_name, key.into());
        let entry = self.get_version(&type_handle, cref, true, true)?;
        entry.links_mut().set(targets);
        Ok(())
    }

    /// Enumerates the source keys that link to `target`.
    ///
    /// Reverse-link queries go straight to the backend: they reflect
    /// committed state at call time and do **not** observe this
    /// transaction's uncommitted link mutations.
    pub fn find(
        &self,
        type_name: &str,
        link_name: &str,
        target: &Key,
    ) -> StrataResult<ResultSet> {
        if !self.state.is_active() {
            panic!("operation on {} transaction", self.state);
        }
        self.db.backend.find(type_name, link_name, target)
    }

    /// Paginated variant of [`find`]: source keys lexicographically
    /// `>= from`, at most `limit` of them.
    ///
    /// [`find`]: Transaction::find
    pub fn find_from(
        &self,
        type_name: &str,
        link_name: &str,
        target: &Key,
        from: &Key,
        limit: usize,
    ) -> StrataResult<ResultSet> {
        if !self.state.is_active() {
            panic!("operation on {} transaction", self.state);
        }
        self.db
            .backend
            .find_from(type_name, link_name, target, from, limit)
    }

    /// Commits the transaction, retrying on lock contention with a
    /// randomized growing backoff. Returns true iff the transaction ended
    /// `FINISHED`.
    pub fn commit(&mut self) -> bool {
        if !self.state.is_active() {
            panic!("commit on {} transaction", self.state);
        }
        self.state = TxnState::Committing;

        let mut entries: Vec<WorkingVersion> =
            self.versions.drain().map(|(_, entry)| entry).collect();

        let mut delay_ms = INITIAL_BACKOFF_MS;
        loop {
            if self.try_commit(&mut entries) {
                break;
            }
            let jitter = rand::thread_rng().gen_range(0..JITTER_MS) as f64;
            let sleep_ms = (delay_ms - jitter).max(0.0);
            trace!(
                snapshot = %self.snapshot,
                sleep_ms,
                "commit contended, backing off"
            );
            thread::sleep(Duration::from_secs_f64(sleep_ms / 1_000.0));
            delay_ms *= BACKOFF_EXPONENT;
        }

        self.state == TxnState::Finished
    }

    /// One commit attempt. Returns false if the lock phase failed and the
    /// attempt should be retried; true once the commit is decided
    /// (finished, aborted, or errored).
    fn try_commit(&mut self, entries: &mut [WorkingVersion]) -> bool {
        let cells: Vec<Arc<Cell>> = entries.iter().map(|entry| Arc::clone(&entry.cell)).collect();

        // Lock phase: all-or-retry. No global lock order is needed because
        // nothing blocks while holding a cell lock here.
        let mut guards: Vec<MutexGuard<'_, Arc<ObjectVersion>>> =
            Vec::with_capacity(cells.len());
        for cell in &cells {
            match cell.try_lock_current() {
                Some(guard) => guards.push(guard),
                None => {
                    self.db.stats.lock_retries.fetch_add(1, AtomicOrdering::Relaxed);
                    return false;
                }
            }
        }

        // Validation phase: a dirty entry must sit exactly one past the
        // committed version it forked from; a clean entry must still match
        // the committed version it read.
        for (entry, guard) in entries.iter().zip(guards.iter()) {
            let expected = if entry.is_dirty() {
                guard.version_no + 1
            } else {
                guard.version_no
            };
            if entry.version_no != expected {
                for cell in &cells {
                    cell.unpin();
                }
                self.state = TxnState::Aborted;
                self.db.stats.aborted.fetch_add(1, AtomicOrdering::Relaxed);
                debug!(
                    snapshot = %self.snapshot,
                    type_name = entry.cell.type_handle().name(),
                    key = %entry.cell.key(),
                    held = entry.version_no,
                    expected,
                    "commit aborted on version conflict"
                );
                return true;
            }
        }

        // Apply phase: install every dirty version as its cell's current
        // and enqueue the matching backend write.
        let mut batch = self.db.backend.new_batch();
        for (entry, guard) in entries.iter_mut().zip(guards.iter_mut()) {
            if !entry.is_dirty() {
                continue;
            }
            let prior = std::mem::replace(
                &mut entry.state,
                WorkingState::Clean(Arc::clone(&**guard)),
            );
            let WorkingState::Dirty(payload) = prior else {
                continue;
            };

            let cell = &entry.cell;
            let new_current = match payload {
                WorkingPayload::Object(boxed) => {
                    let shared: SharedPayload = Arc::from(boxed);
                    let type_handle = cell.type_handle();
                    let encoded = if type_handle.is_nil(shared.as_ref()) {
                        None
                    } else {
                        match type_handle.encode(shared.as_ref()) {
                            Ok(bytes) => Some(bytes),
                            Err(err) => {
                                for cell in &cells {
                                    cell.unpin();
                                }
                                self.state = TxnState::Error;
                                self.db.stats.errors.fetch_add(1, AtomicOrdering::Relaxed);
                                error!(
                                    snapshot = %self.snapshot,
                                    %err,
                                    "payload encoding failed during commit"
                                );
                                return true;
                            }
                        }
                    };
                    batch.store(type_handle.name(), cell.key(), encoded);
                    Arc::new(ObjectVersion::new(
                        entry.version_no,
                        VersionPayload::Object(shared),
                    ))
                }
                WorkingPayload::Links(mut links) => {
                    batch.store_links(
                        cell.type_handle().name(),
                        cell.link_name().unwrap_or(""),
                        cell.key(),
                        links.added().as_slice(),
                        links.removed().as_slice(),
                    );
                    // The committed baseline absorbs the deltas.
                    links.freeze();
                    Arc::new(ObjectVersion::new(
                        entry.version_no,
                        VersionPayload::Links(links),
                    ))
                }
            };

            **guard = Arc::clone(&new_current);
            entry.state = WorkingState::Clean(new_current);
        }

        // Release references: clean and dirty entries alike.
        for cell in &cells {
            cell.unpin();
        }

        match batch.commit() {
            Ok(()) => {
                self.state = TxnState::Finished;
                self.db.stats.committed.fetch_add(1, AtomicOrdering::Relaxed);
            }
            Err(err) => {
                // The new versions are already installed; the in-memory
                // store is now ahead of the backend. Recovery is reopening
                // the database.
                self.state = TxnState::Error;
                self.db.stats.errors.fetch_add(1, AtomicOrdering::Relaxed);
                error!(
                    snapshot = %self.snapshot,
                    %err,
                    "batch commit failed; in-memory state is ahead of the backend"
                );
            }
        }
        true
    }
}

impl Drop for Transaction {
    fn drop(&mut self) {
        // A transaction abandoned while ACTIVE never went through the
        // commit path that releases its cell pins.
        if self.state.is_active() {
            for entry in self.versions.values() {
                entry.cell.unpin();
            }
        }
    }
}

impl fmt::Debug for Transaction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transaction")
            .field("snapshot", &self.snapshot)
            .field("state", &self.state)
            .field("working_set", &self.versions.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use strata_storage::MemoryBackend;

    use super::*;
    use crate::database::Db;
    use crate::registry::JsonType;

    fn string_db() -> Db {
        let db = Db::open(MemoryBackend::new());
        db.create_type("note", 1, Box::new(JsonType::<String>::new()), &[]);
        db
    }

    #[test]
    fn test_read_own_write() {
        let db = string_db();
        let mut txn = db.begin();

        assert!(!txn.exists("note", "a").unwrap());
        txn.set("note", "a", "hello".to_string()).unwrap();
        let seen = txn.read("note", "a", |s: &String| s.clone()).unwrap();
        assert_eq!(seen, "hello");
        assert!(txn.exists("note", "a").unwrap());

        assert!(txn.commit());
        assert_eq!(txn.state(), TxnState::Finished);
    }

    #[test]
    fn test_uncommitted_write_is_private() {
        let db = string_db();

        let mut writer = db.begin();
        writer.set("note", "a", "draft".to_string()).unwrap();

        let mut reader = db.begin();
        let seen = reader.read("note", "a", |s: &String| s.clone()).unwrap();
        assert_eq!(seen, "");

        assert!(writer.commit());
        // The reader's snapshot of the cell does not move.
        let seen = reader.read("note", "a", |s: &String| s.clone()).unwrap();
        assert_eq!(seen, "");
    }

    #[test]
    fn test_conflicting_writers_one_aborts() {
        let db = string_db();

        let mut first = db.begin();
        let mut second = db.begin();
        first.write("note", "a", |s: &mut String| s.push('1')).unwrap();
        second.write("note", "a", |s: &mut String| s.push('2')).unwrap();

        assert!(first.commit());
        assert!(!second.commit());
        assert_eq!(second.state(), TxnState::Aborted);
    }

    #[test]
    fn test_stale_read_aborts_commit() {
        let db = string_db();

        let mut reader = db.begin();
        let _ = reader.read("note", "a", |s: &String| s.len()).unwrap();
        reader.set("note", "other", "x".to_string()).unwrap();

        db.transact(
            |t| t.set("note", "a", "moved".to_string()),
            Duration::ZERO,
        )
        .unwrap();

        assert!(!reader.commit());
        assert_eq!(reader.state(), TxnState::Aborted);
    }

    #[test]
    fn test_version_numbers_monotone_across_commits() {
        let db = string_db();
        for _ in 0..3 {
            db.transact(
                |t| t.write("note", "a", |s: &mut String| s.push('x')),
                Duration::ZERO,
            )
            .unwrap();
        }

        let mut txn = db.begin();
        let len = txn.read("note", "a", |s: &String| s.len()).unwrap();
        assert_eq!(len, 3);
    }

    #[test]
    #[should_panic(expected = "operation on FINISHED transaction")]
    fn test_use_after_commit_panics() {
        let db = string_db();
        let mut txn = db.begin();
        txn.set("note", "a", "x".to_string()).unwrap();
        txn.commit();
        let _ = txn.exists("note", "a");
    }

    #[test]
    #[should_panic(expected = "commit on FINISHED transaction")]
    fn test_double_commit_panics() {
        let db = string_db();
        let mut txn = db.begin();
        txn.commit();
        txn.commit();
    }

    #[test]
    #[should_panic(expected = "unknown link")]
    fn test_undeclared_link_panics() {
        let db = string_db();
        let mut txn = db.begin();
        let _ = txn.add_link("note", "tags", "a", "t");
    }

    #[test]
    fn test_delete_reads_as_nil() {
        let db = string_db();
        db.transact(|t| t.set("note", "a", "body".to_string()), Duration::ZERO)
            .unwrap();
        db.transact(|t| t.delete("note", "a"), Duration::ZERO)
            .unwrap();

        let mut txn = db.begin();
        assert!(!txn.exists("note", "a").unwrap());
    }

    #[test]
    fn test_abandoned_transaction_releases_pins() {
        let db = string_db();
        {
            let mut txn = db.begin();
            txn.set("note", "a", "x".to_string()).unwrap();
            // Dropped without commit.
        }
        assert_eq!(db.flush_cache(), 1);
    }
}

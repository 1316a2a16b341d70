//! The database façade.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use strata_common::types::{Key, SnapshotId};
use strata_common::StrataResult;
use strata_storage::{Backend, ResultSet};

use crate::cache::ObjectCache;
use crate::registry::{Exemplar, LinkDef, TypeHandle, TypeRegistry};
use crate::transaction::{Transaction, TxnState};

/// Commit and cache counters.
#[derive(Debug, Default)]
pub struct DbStats {
    /// Transactions begun.
    pub started: AtomicU64,
    /// Transactions that ended `FINISHED`.
    pub committed: AtomicU64,
    /// Transactions that ended `ABORTED` on a version conflict.
    pub aborted: AtomicU64,
    /// Transactions that ended `ERROR` on a backend failure.
    pub errors: AtomicU64,
    /// Commit attempts retried because a cell lock was contended.
    pub lock_retries: AtomicU64,
}

pub(crate) struct DbInner {
    pub(crate) registry: TypeRegistry,
    pub(crate) cache: ObjectCache,
    pub(crate) backend: Box<dyn Backend>,
    pub(crate) next_snapshot: AtomicU64,
    pub(crate) stats: DbStats,
}

/// A handle to an open store.
///
/// Cloning is cheap and every clone addresses the same store; the object
/// cache lives behind the handle, so independent databases never share
/// state.
///
/// # Backend errors at commit
///
/// A commit applies its versions to the in-memory cache *before* the
/// backend batch is persisted. If the batch then fails, the transaction
/// ends in the `ERROR` state and the in-memory view stays optimistically
/// advanced; memory and storage are divergent from that point on. Treat
/// `ERROR` as requiring process-level recovery (reopen the database).
#[derive(Clone)]
pub struct Db {
    inner: Arc<DbInner>,
}

impl Db {
    /// Opens a store over `backend`.
    pub fn open(backend: impl Backend + 'static) -> Self {
        Self {
            inner: Arc::new(DbInner {
                registry: TypeRegistry::new(),
                cache: ObjectCache::new(),
                backend: Box::new(backend),
                next_snapshot: AtomicU64::new(SnapshotId::FIRST.as_u64()),
                stats: DbStats::default(),
            }),
        }
    }

    /// Registers a type, panicking if the name is already taken.
    ///
    /// The backend is notified of the schema. Link tags are assigned in
    /// declaration order.
    pub fn create_type(
        &self,
        name: &str,
        version: u16,
        exemplar: Box<dyn Exemplar>,
        links: &[LinkDef],
    ) -> Arc<TypeHandle> {
        let handle = self.inner.registry.register(name, version, exemplar, links);
        self.inner.backend.register_type(handle.schema());
        handle
    }

    /// Begins a transaction at a fresh snapshot.
    pub fn begin(&self) -> Transaction {
        let snapshot = SnapshotId::new(
            self.inner
                .next_snapshot
                .fetch_add(1, AtomicOrdering::SeqCst),
        );
        self.inner.stats.started.fetch_add(1, AtomicOrdering::Relaxed);
        Transaction::begin(Arc::clone(&self.inner), snapshot)
    }

    /// Runs `actor` in a fresh transaction and commits, retrying aborted
    /// attempts until `timeout` elapses. A zero timeout retries
    /// indefinitely.
    ///
    /// Returns `Ok(true)` once a run commits, `Ok(false)` on timeout or a
    /// backend `ERROR`, and the actor's error if one run fails.
    pub fn transact<F>(&self, mut actor: F, timeout: Duration) -> StrataResult<bool>
    where
        F: FnMut(&mut Transaction) -> StrataResult<()>,
    {
        let start = Instant::now();
        loop {
            let mut txn = self.begin();
            actor(&mut txn)?;
            if txn.commit() {
                return Ok(true);
            }
            if txn.state() == TxnState::Error {
                return Ok(false);
            }
            if !timeout.is_zero() && start.elapsed() > timeout {
                return Ok(false);
            }
        }
    }

    /// Enumerates committed sources linking to `target`. See
    /// [`Transaction::find`] for visibility caveats.
    pub fn find(
        &self,
        type_name: &str,
        link_name: &str,
        target: &Key,
    ) -> StrataResult<ResultSet> {
        self.inner.backend.find(type_name, link_name, target)
    }

    /// Paginated variant of [`find`].
    ///
    /// [`find`]: Db::find
    pub fn find_from(
        &self,
        type_name: &str,
        link_name: &str,
        target: &Key,
        from: &Key,
        limit: usize,
    ) -> StrataResult<ResultSet> {
        self.inner
            .backend
            .find_from(type_name, link_name, target, from, limit)
    }

    /// Evicts every cached cell no live transaction is pinning. Returns
    /// the number of cells evicted.
    pub fn flush_cache(&self) -> usize {
        self.inner.cache.flush()
    }

    /// The number of resident cache cells.
    #[must_use]
    pub fn cache_len(&self) -> usize {
        self.inner.cache.len()
    }

    /// Commit and cache counters.
    #[must_use]
    pub fn stats(&self) -> &DbStats {
        &self.inner.stats
    }

    /// Shuts the backend down. Transactions still in flight keep their
    /// in-memory view but can no longer rely on the backend.
    pub fn close(&self) {
        self.inner.backend.close();
    }
}

impl fmt::Debug for Db {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Db")
            .field("cache_len", &self.cache_len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use strata_storage::MemoryBackend;

    use super::*;
    use crate::registry::JsonType;

    fn string_db() -> Db {
        let db = Db::open(MemoryBackend::new());
        db.create_type("note", 1, Box::new(JsonType::<String>::new()), &[]);
        db
    }

    #[test]
    fn test_snapshots_are_monotone() {
        let db = string_db();
        let a = db.begin();
        let b = db.begin();
        assert!(a.snapshot() < b.snapshot());
    }

    #[test]
    #[should_panic(expected = "type already registered")]
    fn test_duplicate_type_panics() {
        let db = string_db();
        db.create_type("note", 1, Box::new(JsonType::<String>::new()), &[]);
    }

    #[test]
    fn test_transact_commits_and_counts() {
        let db = string_db();
        let committed = db
            .transact(|t| t.set("note", "a", "x".to_string()), Duration::ZERO)
            .unwrap();
        assert!(committed);
        assert_eq!(db.stats().committed.load(AtomicOrdering::Relaxed), 1);
        assert_eq!(db.stats().started.load(AtomicOrdering::Relaxed), 1);
    }

    #[test]
    fn test_flush_then_reload() {
        let db = string_db();
        db.transact(|t| t.set("note", "a", "kept".to_string()), Duration::ZERO)
            .unwrap();

        assert_eq!(db.flush_cache(), 1);
        assert_eq!(db.cache_len(), 0);

        let mut txn = db.begin();
        let value = txn.read("note", "a", |s: &String| s.clone()).unwrap();
        assert_eq!(value, "kept");
    }
}

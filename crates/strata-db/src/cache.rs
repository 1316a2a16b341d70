//! The process-wide object cache.
//!
//! Maps canonical cache keys to cells. Loading is coherent: a cell becomes
//! reachable from the cache before its payload is fetched, but the loader
//! acquires the cell lock while still holding the map shard, so no other
//! party can observe an unloaded cell racing with the load.

use std::sync::Arc;

use bytes::Bytes;
use dashmap::DashMap;
use tracing::debug;

use strata_common::types::CellRef;
use strata_common::StrataResult;
use strata_links::{LinkBag, LinkSet};
use strata_storage::Backend;

use crate::object::{Cell, ObjectVersion, VersionPayload};
use crate::registry::TypeHandle;

pub(crate) struct ObjectCache {
    cells: DashMap<Bytes, Arc<Cell>>,
}

impl ObjectCache {
    pub(crate) fn new() -> Self {
        Self {
            cells: DashMap::new(),
        }
    }

    /// Resolves `cref` to its cell, constructing and (if `load`) loading it
    /// on first touch.
    ///
    /// A load failure surfaces as an error and leaves the cell unloaded;
    /// the next touch retries the fetch.
    pub(crate) fn ensure_cell(
        &self,
        backend: &dyn Backend,
        type_handle: &Arc<TypeHandle>,
        cref: &CellRef,
        load: bool,
    ) -> StrataResult<Arc<Cell>> {
        let cache_key = cref.cache_key();

        if let Some(cell) = self.cells.get(&cache_key) {
            if cell.loaded() || !load {
                return Ok(Arc::clone(&cell));
            }
        }

        let entry = self
            .cells
            .entry(cache_key)
            .or_insert_with(|| Arc::new(Cell::new(Arc::clone(type_handle), cref)));
        let cell = Arc::clone(entry.value());
        if cell.loaded() || !load {
            return Ok(cell);
        }

        // Hand-off: take the cell lock while the map shard is still held,
        // then let the shard go before touching the backend.
        let mut current = cell.lock_current();
        drop(entry);

        if !cell.loaded() {
            // A current that has advanced past version 0 was produced by a
            // commit and is already authoritative; only a pristine cell
            // takes the backend's payload.
            if current.version_no == 0 {
                let initial = if cref.is_links() {
                    let baseline =
                        backend.get_links(cref.type_name(), cell.link_name().unwrap_or(""), cref.key())?;
                    VersionPayload::Links(LinkSet::from_baseline(LinkBag::from_keys(baseline)))
                } else {
                    match backend.get(cref.type_name(), cref.key())? {
                        Some(bytes) => VersionPayload::Object(Arc::from(type_handle.decode(&bytes)?)),
                        None => VersionPayload::Object(Arc::from(type_handle.nil_value())),
                    }
                };
                *current = Arc::new(ObjectVersion::new(0, initial));
            }
            cell.set_loaded();
        }

        drop(current);
        Ok(cell)
    }

    /// Evicts every cell no live transaction is pinning. Returns the number
    /// of cells removed.
    pub(crate) fn flush(&self) -> usize {
        let before = self.cells.len();
        self.cells.retain(|_, cell| cell.ref_count() > 0);
        let removed = before - self.cells.len();
        debug!(removed, remaining = self.cells.len(), "cache flushed");
        removed
    }

    /// The number of resident cells.
    pub(crate) fn len(&self) -> usize {
        self.cells.len()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering as AtomicOrdering};

    use bytes::Bytes;
    use strata_common::types::{Key, TypeSchema};
    use strata_storage::{MemoryBackend, ResultSet, WriteBatch};

    use super::*;
    use crate::registry::{JsonType, TypeRegistry};

    /// Counts object loads so tests can assert load-once behavior.
    struct CountingBackend {
        inner: MemoryBackend,
        gets: AtomicUsize,
    }

    impl CountingBackend {
        fn new() -> Self {
            Self {
                inner: MemoryBackend::new(),
                gets: AtomicUsize::new(0),
            }
        }
    }

    impl Backend for CountingBackend {
        fn register_type(&self, schema: &TypeSchema) {
            self.inner.register_type(schema);
        }

        fn get(&self, type_name: &str, key: &Key) -> StrataResult<Option<Bytes>> {
            self.gets.fetch_add(1, AtomicOrdering::SeqCst);
            self.inner.get(type_name, key)
        }

        fn get_links(
            &self,
            type_name: &str,
            link_name: &str,
            key: &Key,
        ) -> StrataResult<Vec<Key>> {
            self.inner.get_links(type_name, link_name, key)
        }

        fn find(&self, type_name: &str, link_name: &str, target: &Key) -> StrataResult<ResultSet> {
            self.inner.find(type_name, link_name, target)
        }

        fn find_from(
            &self,
            type_name: &str,
            link_name: &str,
            target: &Key,
            from: &Key,
            limit: usize,
        ) -> StrataResult<ResultSet> {
            self.inner.find_from(type_name, link_name, target, from, limit)
        }

        fn new_batch(&self) -> Box<dyn WriteBatch> {
            self.inner.new_batch()
        }

        fn close(&self) {
            self.inner.close();
        }
    }

    fn handle() -> Arc<TypeHandle> {
        let registry = TypeRegistry::new();
        registry.register("person", 1, Box::new(JsonType::<String>::new()), &[])
    }

    #[test]
    fn test_ensure_cell_loads_once() {
        let backend = CountingBackend::new();
        let cache = ObjectCache::new();
        let th = handle();
        let cref = CellRef::object("person", "alice");

        let first = cache.ensure_cell(&backend, &th, &cref, true).unwrap();
        let second = cache.ensure_cell(&backend, &th, &cref, true).unwrap();

        assert!(Arc::ptr_eq(&first, &second));
        assert!(first.loaded());
        assert_eq!(backend.gets.load(AtomicOrdering::SeqCst), 1);
    }

    #[test]
    fn test_ensure_cell_without_load_stays_unloaded() {
        let backend = CountingBackend::new();
        let cache = ObjectCache::new();
        let th = handle();
        let cref = CellRef::object("person", "alice");

        let cell = cache.ensure_cell(&backend, &th, &cref, false).unwrap();
        assert!(!cell.loaded());
        assert_eq!(backend.gets.load(AtomicOrdering::SeqCst), 0);

        // A later loading touch fetches.
        let cell = cache.ensure_cell(&backend, &th, &cref, true).unwrap();
        assert!(cell.loaded());
        assert_eq!(backend.gets.load(AtomicOrdering::SeqCst), 1);
    }

    #[test]
    fn test_flush_keeps_pinned_cells() {
        let backend = CountingBackend::new();
        let cache = ObjectCache::new();
        let th = handle();

        let pinned = cache
            .ensure_cell(&backend, &th, &CellRef::object("person", "a"), true)
            .unwrap();
        pinned.pin();
        cache
            .ensure_cell(&backend, &th, &CellRef::object("person", "b"), true)
            .unwrap();
        cache
            .ensure_cell(&backend, &th, &CellRef::object("person", "c"), true)
            .unwrap();

        assert_eq!(cache.len(), 3);
        assert_eq!(cache.flush(), 2);
        assert_eq!(cache.len(), 1);

        pinned.unpin();
        assert_eq!(cache.flush(), 1);
        assert_eq!(cache.len(), 0);
    }

    #[test]
    fn test_absent_object_loads_as_nil() {
        let backend = CountingBackend::new();
        let cache = ObjectCache::new();
        let th = handle();

        let cell = cache
            .ensure_cell(&backend, &th, &CellRef::object("person", "ghost"), true)
            .unwrap();
        let current = cell.lock_current();
        assert_eq!(current.version_no, 0);
        match &current.payload {
            VersionPayload::Object(payload) => assert!(th.is_nil(payload.as_ref())),
            VersionPayload::Links(_) => panic!("object cell holds links"),
        }
    }
}

//! The in-process memory backend.

use std::collections::{BTreeSet, HashMap};
use std::ops::Bound;
use std::sync::Arc;

use bytes::Bytes;
use parking_lot::RwLock;
use tracing::debug;

use strata_common::types::{Key, TypeSchema};
use strata_common::StrataResult;

use crate::backend::{Backend, WriteBatch};
use crate::result::ResultSet;

/// Address of a stored object payload.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
struct ObjectAddr {
    type_name: String,
    key: Key,
}

/// Address of a link-set baseline. Read as (type, link, target) it also
/// addresses a reverse-index entry.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
struct LinkAddr {
    type_name: String,
    link_name: String,
    key: Key,
}

impl LinkAddr {
    fn new(type_name: &str, link_name: &str, key: &Key) -> Self {
        Self {
            type_name: type_name.to_string(),
            link_name: link_name.to_string(),
            key: key.clone(),
        }
    }
}

#[derive(Default)]
struct Inner {
    schemas: HashMap<String, TypeSchema>,
    objects: HashMap<ObjectAddr, Bytes>,
    /// Committed link baselines, keyed by source.
    links: HashMap<LinkAddr, BTreeSet<Key>>,
    /// Reverse index keyed by target: which sources link here.
    reverse: HashMap<LinkAddr, BTreeSet<Key>>,
}

/// An in-process [`Backend`] holding everything in maps.
///
/// Object payloads are kept in their encoded form, so a flush-and-reload
/// cycle exercises the same codec path a durable backend would. A reverse
/// index, maintained incrementally from link-set deltas, answers
/// `find`/`find_from` without scanning.
///
/// Cloning produces another handle to the same store.
#[derive(Clone, Default)]
pub struct MemoryBackend {
    inner: Arc<RwLock<Inner>>,
}

impl MemoryBackend {
    /// Creates an empty memory backend.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of stored (non-nil) objects, for tests and
    /// diagnostics.
    #[must_use]
    pub fn object_count(&self) -> usize {
        self.inner.read().objects.len()
    }
}

impl Backend for MemoryBackend {
    fn register_type(&self, schema: &TypeSchema) {
        let mut inner = self.inner.write();
        inner
            .schemas
            .entry(schema.name.clone())
            .or_insert_with(|| schema.clone());
    }

    fn get(&self, type_name: &str, key: &Key) -> StrataResult<Option<Bytes>> {
        let addr = ObjectAddr {
            type_name: type_name.to_string(),
            key: key.clone(),
        };
        Ok(self.inner.read().objects.get(&addr).cloned())
    }

    fn get_links(&self, type_name: &str, link_name: &str, key: &Key) -> StrataResult<Vec<Key>> {
        let addr = LinkAddr::new(type_name, link_name, key);
        Ok(self
            .inner
            .read()
            .links
            .get(&addr)
            .map(|targets| targets.iter().cloned().collect())
            .unwrap_or_default())
    }

    fn find(&self, type_name: &str, link_name: &str, target: &Key) -> StrataResult<ResultSet> {
        let addr = LinkAddr::new(type_name, link_name, target);
        Ok(self
            .inner
            .read()
            .reverse
            .get(&addr)
            .map(|sources| ResultSet::new(sources.iter().cloned().collect()))
            .unwrap_or_default())
    }

    fn find_from(
        &self,
        type_name: &str,
        link_name: &str,
        target: &Key,
        from: &Key,
        limit: usize,
    ) -> StrataResult<ResultSet> {
        let addr = LinkAddr::new(type_name, link_name, target);
        Ok(self
            .inner
            .read()
            .reverse
            .get(&addr)
            .map(|sources| {
                let page: Vec<Key> = sources
                    .range((Bound::Included(from.clone()), Bound::Unbounded))
                    .take(limit)
                    .cloned()
                    .collect();
                ResultSet::new(page)
            })
            .unwrap_or_default())
    }

    fn new_batch(&self) -> Box<dyn WriteBatch> {
        Box::new(MemoryBatch {
            inner: Arc::clone(&self.inner),
            ops: Vec::new(),
        })
    }

    fn close(&self) {
        debug!("memory backend closed");
    }
}

enum BatchOp {
    Store {
        addr: ObjectAddr,
        encoded: Option<Bytes>,
    },
    StoreLinks {
        addr: LinkAddr,
        added: Vec<Key>,
        removed: Vec<Key>,
    },
}

/// A pending batch against a [`MemoryBackend`].
///
/// Writes are buffered and applied under a single write lock at commit,
/// so readers observe either none or all of the batch.
struct MemoryBatch {
    inner: Arc<RwLock<Inner>>,
    ops: Vec<BatchOp>,
}

impl WriteBatch for MemoryBatch {
    fn store(&mut self, type_name: &str, key: &Key, encoded: Option<Bytes>) {
        self.ops.push(BatchOp::Store {
            addr: ObjectAddr {
                type_name: type_name.to_string(),
                key: key.clone(),
            },
            encoded,
        });
    }

    fn store_links(
        &mut self,
        type_name: &str,
        link_name: &str,
        key: &Key,
        added: &[Key],
        removed: &[Key],
    ) {
        self.ops.push(BatchOp::StoreLinks {
            addr: LinkAddr::new(type_name, link_name, key),
            added: added.to_vec(),
            removed: removed.to_vec(),
        });
    }

    fn commit(self: Box<Self>) -> StrataResult<()> {
        let mut inner = self.inner.write();
        for op in self.ops {
            match op {
                BatchOp::Store { addr, encoded } => match encoded {
                    Some(bytes) => {
                        inner.objects.insert(addr, bytes);
                    }
                    None => {
                        inner.objects.remove(&addr);
                    }
                },
                BatchOp::StoreLinks {
                    addr,
                    added,
                    removed,
                } => {
                    let source = addr.key.clone();
                    for target in &removed {
                        let rev = LinkAddr::new(&addr.type_name, &addr.link_name, target);
                        if let Some(sources) = inner.reverse.get_mut(&rev) {
                            sources.remove(&source);
                            if sources.is_empty() {
                                inner.reverse.remove(&rev);
                            }
                        }
                    }
                    for target in &added {
                        let rev = LinkAddr::new(&addr.type_name, &addr.link_name, target);
                        inner
                            .reverse
                            .entry(rev)
                            .or_default()
                            .insert(source.clone());
                    }

                    let baseline = inner.links.entry(addr.clone()).or_default();
                    for target in &removed {
                        baseline.remove(target);
                    }
                    for target in added {
                        baseline.insert(target);
                    }
                    if baseline.is_empty() {
                        inner.links.remove(&addr);
                    }
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(s: &str) -> Key {
        Key::from(s)
    }

    fn names(keys: &[Key]) -> Vec<String> {
        keys.iter().map(|k| k.to_string()).collect()
    }

    #[test]
    fn test_object_store_and_reload() {
        let backend = MemoryBackend::new();

        let mut batch = backend.new_batch();
        batch.store("person", &key("alice"), Some(Bytes::from_static(b"p1")));
        batch.commit().unwrap();

        assert_eq!(
            backend.get("person", &key("alice")).unwrap(),
            Some(Bytes::from_static(b"p1"))
        );
        assert_eq!(backend.get("person", &key("bob")).unwrap(), None);
    }

    #[test]
    fn test_nil_store_removes_object() {
        let backend = MemoryBackend::new();

        let mut batch = backend.new_batch();
        batch.store("person", &key("alice"), Some(Bytes::from_static(b"p1")));
        batch.commit().unwrap();

        let mut batch = backend.new_batch();
        batch.store("person", &key("alice"), None);
        batch.commit().unwrap();

        assert_eq!(backend.get("person", &key("alice")).unwrap(), None);
        assert_eq!(backend.object_count(), 0);
    }

    #[test]
    fn test_link_baseline_applies_deltas() {
        let backend = MemoryBackend::new();

        let mut batch = backend.new_batch();
        batch.store_links("person", "friends", &key("a"), &[key("b"), key("c")], &[]);
        batch.commit().unwrap();

        let mut batch = backend.new_batch();
        batch.store_links("person", "friends", &key("a"), &[key("d")], &[key("b")]);
        batch.commit().unwrap();

        let baseline = backend.get_links("person", "friends", &key("a")).unwrap();
        assert_eq!(names(&baseline), ["c", "d"]);
    }

    #[test]
    fn test_absent_links_load_empty() {
        let backend = MemoryBackend::new();
        assert!(backend
            .get_links("person", "friends", &key("a"))
            .unwrap()
            .is_empty());
    }

    #[test]
    fn test_reverse_index_answers_find() {
        let backend = MemoryBackend::new();

        let mut batch = backend.new_batch();
        batch.store_links("person", "friends", &key("a"), &[key("t")], &[]);
        batch.store_links("person", "friends", &key("b"), &[key("t")], &[]);
        batch.store_links("person", "friends", &key("c"), &[key("other")], &[]);
        batch.commit().unwrap();

        let rs = backend.find("person", "friends", &key("t")).unwrap();
        assert_eq!(names(rs.all()), ["a", "b"]);

        let mut batch = backend.new_batch();
        batch.store_links("person", "friends", &key("a"), &[], &[key("t")]);
        batch.commit().unwrap();

        let rs = backend.find("person", "friends", &key("t")).unwrap();
        assert_eq!(names(rs.all()), ["b"]);
    }

    #[test]
    fn test_find_from_paginates() {
        let backend = MemoryBackend::new();

        let mut batch = backend.new_batch();
        for source in ["a", "b", "c", "d"] {
            batch.store_links("person", "friends", &key(source), &[key("t")], &[]);
        }
        batch.commit().unwrap();

        let page = backend
            .find_from("person", "friends", &key("t"), &key("b"), 2)
            .unwrap();
        assert_eq!(names(page.all()), ["b", "c"]);

        let tail = backend
            .find_from("person", "friends", &key("t"), &key("d"), 10)
            .unwrap();
        assert_eq!(names(tail.all()), ["d"]);
    }

    #[test]
    fn test_batch_is_not_visible_before_commit() {
        let backend = MemoryBackend::new();

        let mut batch = backend.new_batch();
        batch.store("person", &key("alice"), Some(Bytes::from_static(b"p1")));
        batch.store_links("person", "friends", &key("alice"), &[key("bob")], &[]);

        assert_eq!(backend.get("person", &key("alice")).unwrap(), None);
        assert!(backend
            .find("person", "friends", &key("bob"))
            .unwrap()
            .is_empty());

        batch.commit().unwrap();
        assert!(backend.get("person", &key("alice")).unwrap().is_some());
    }

    #[test]
    fn test_register_type_is_idempotent() {
        let backend = MemoryBackend::new();
        let schema = TypeSchema::new("person", 1);
        backend.register_type(&schema);
        backend.register_type(&schema);
        assert_eq!(backend.inner.read().schemas.len(), 1);
    }
}

//! The backend contract consumed by the store core.

use bytes::Bytes;
use strata_common::types::{Key, TypeSchema};
use strata_common::StrataResult;

use crate::result::ResultSet;

/// A durable key/value and link-index store.
///
/// The core calls `get`/`get_links` on cache misses, `find`/`find_from`
/// for reverse-link queries, and `new_batch` once per commit attempt that
/// reaches the apply phase. Object payloads cross this boundary already
/// encoded; the backend never inspects them.
pub trait Backend: Send + Sync {
    /// Notifies the backend of a registered type. Idempotent per name.
    fn register_type(&self, schema: &TypeSchema);

    /// Loads the encoded payload of an object, or `None` if absent.
    fn get(&self, type_name: &str, key: &Key) -> StrataResult<Option<Bytes>>;

    /// Loads the committed baseline of a link-set as sorted keys.
    ///
    /// An absent link-set loads as the empty baseline.
    fn get_links(&self, type_name: &str, link_name: &str, key: &Key) -> StrataResult<Vec<Key>>;

    /// Enumerates the source keys that link to `target`.
    fn find(&self, type_name: &str, link_name: &str, target: &Key) -> StrataResult<ResultSet>;

    /// Paginated variant of [`find`]: source keys lexicographically
    /// `>= from`, at most `limit` of them.
    ///
    /// [`find`]: Backend::find
    fn find_from(
        &self,
        type_name: &str,
        link_name: &str,
        target: &Key,
        from: &Key,
        limit: usize,
    ) -> StrataResult<ResultSet>;

    /// Begins a commit unit.
    fn new_batch(&self) -> Box<dyn WriteBatch>;

    /// Shuts the backend down.
    fn close(&self);
}

/// A batch of writes persisted atomically with respect to readers.
pub trait WriteBatch: Send {
    /// Enqueues an object write.
    ///
    /// `encoded` is the payload produced by the type's codec; `None` means
    /// the object is nil and its stored form should be removed.
    fn store(&mut self, type_name: &str, key: &Key, encoded: Option<Bytes>);

    /// Enqueues a link-set write, expressed as deltas against the last
    /// frozen baseline.
    fn store_links(
        &mut self,
        type_name: &str,
        link_name: &str,
        key: &Key,
        added: &[Key],
        removed: &[Key],
    );

    /// Atomically persists every enqueued write.
    fn commit(self: Box<Self>) -> StrataResult<()>;
}

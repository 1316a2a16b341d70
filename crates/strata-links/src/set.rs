//! Incremental link-sets.

use std::fmt;

use strata_common::types::Key;

use crate::bag::LinkBag;

/// An incremental overlay over a frozen baseline of link targets.
///
/// A `LinkSet` records mutations as deltas instead of rewriting the whole
/// target list: `added` holds keys joined since the baseline was frozen,
/// `removed` holds baseline keys taken away. The projected current keys are
/// `(original \ removed) ∪ added`, sorted.
///
/// Deltas are kept normalized at every observable point:
///
/// - `added ∩ original = ∅`
/// - `removed ⊆ original`
///
/// so a key is never simultaneously added and part of the baseline, and
/// `removed` never names a key the baseline does not hold. [`freeze`]
/// absorbs the deltas into a new baseline after a commit.
///
/// [`freeze`]: LinkSet::freeze
#[derive(Clone, Default, PartialEq, Eq)]
pub struct LinkSet {
    original: LinkBag,
    added: LinkBag,
    removed: LinkBag,
}

impl LinkSet {
    /// Creates an empty link-set with an empty baseline.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a link-set over a loaded baseline, with no deltas.
    #[must_use]
    pub fn from_baseline(original: LinkBag) -> Self {
        Self {
            original,
            added: LinkBag::new(),
            removed: LinkBag::new(),
        }
    }

    /// Forks a working copy sharing this set's baseline, with fresh deltas.
    ///
    /// Used when a transaction first writes a link cell: the frozen
    /// baseline is shared structurally, the deltas start empty.
    #[must_use]
    pub fn new_version(&self) -> Self {
        Self::from_baseline(self.original.clone())
    }

    /// Adds a link target. Idempotent.
    pub fn add(&mut self, key: &Key) {
        self.removed = self.removed.remove(key);
        if !self.original.has(key) {
            self.added = self.added.add(key);
        }
    }

    /// Removes a link target. Idempotent.
    pub fn remove(&mut self, key: &Key) {
        self.added = self.added.remove(key);
        if self.original.has(key) {
            self.removed = self.removed.add(key);
        }
    }

    /// Replaces the working set with exactly `keys`.
    ///
    /// Expressed as deltas against the baseline: baseline keys missing from
    /// `keys` become removals, keys outside the baseline become additions.
    /// Subsequent `add`/`remove` calls compose as usual.
    pub fn set(&mut self, keys: Vec<Key>) {
        let target = LinkBag::from_keys(keys);
        self.removed = self
            .original
            .iter()
            .filter(|k| !target.has(k))
            .cloned()
            .collect();
        self.added = target
            .iter()
            .filter(|k| !self.original.has(k))
            .cloned()
            .collect();
    }

    /// Returns true iff `key` is in the projected current keys.
    #[must_use]
    pub fn has(&self, key: &Key) -> bool {
        if self.removed.has(key) {
            return false;
        }
        self.added.has(key) || self.original.has(key)
    }

    /// Materializes the projected current keys as a sorted `Vec`.
    #[must_use]
    pub fn read_keys(&self) -> Vec<Key> {
        let mut keys: Vec<Key> = self
            .original
            .iter()
            .filter(|k| !self.removed.has(k))
            .cloned()
            .collect();
        keys.extend(self.added.iter().cloned());
        keys.sort();
        keys
    }

    /// Commits the working keys as the new baseline and clears the deltas.
    pub fn freeze(&mut self) {
        self.original = LinkBag::from_keys(self.read_keys());
        self.added = LinkBag::new();
        self.removed = LinkBag::new();
    }

    /// Returns true if no deltas are pending against the baseline.
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty()
    }

    /// The frozen baseline.
    #[must_use]
    pub fn original(&self) -> &LinkBag {
        &self.original
    }

    /// Keys added since the last freeze.
    #[must_use]
    pub fn added(&self) -> &LinkBag {
        &self.added
    }

    /// Baseline keys removed since the last freeze.
    #[must_use]
    pub fn removed(&self) -> &LinkBag {
        &self.removed
    }
}

impl fmt::Debug for LinkSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LinkSet")
            .field("original", &self.original)
            .field("added", &self.added)
            .field("removed", &self.removed)
            .finish()
    }
}

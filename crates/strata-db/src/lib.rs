//! # strata-db
//!
//! The transactional object store core.
//!
//! Strata maintains typed, keyed objects and typed directional link-sets
//! between them, serving concurrent transactions under optimistic
//! concurrency control with snapshot isolation:
//!
//! - **Object cache**: a process-wide map from cache key to *cell*, the
//!   in-memory home of one object or link-set, pinned by reference
//!   counting and flushable when idle.
//! - **Version chains**: each cell's `current` is an immutable committed
//!   version; writers fork private copy-on-write versions.
//! - **Transactions**: a working set of read and forked versions, with a
//!   two-phase optimistic commit: try-lock every touched cell, validate
//!   version numbers, apply, and back off with randomized growing delays
//!   on contention.
//!
//! Durability and reverse-link indexing live behind the pluggable
//! [`Backend`] trait.
//!
//! ## Example
//!
//! ```rust
//! use std::time::Duration;
//! use strata_db::{Db, JsonType, MemoryBackend};
//!
//! let db = Db::open(MemoryBackend::new());
//! db.create_type("note", 1, Box::new(JsonType::<String>::new()), &[]);
//!
//! let committed = db
//!     .transact(|t| t.set("note", "a", "hello".to_string()), Duration::ZERO)
//!     .unwrap();
//! assert!(committed);
//!
//! let mut txn = db.begin();
//! let body = txn.read("note", "a", |s: &String| s.clone()).unwrap();
//! assert_eq!(body, "hello");
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

mod cache;
mod database;
mod object;
mod registry;
mod transaction;

pub use database::{Db, DbStats};
pub use registry::{BoxedPayload, Exemplar, JsonType, LinkDef, SharedPayload, TypeHandle};
pub use transaction::{Transaction, TxnState};

// Re-export the companion crates' surface commonly used alongside the core.
pub use strata_common::{CellRef, Key, SnapshotId, StrataError, StrataResult};
pub use strata_links::{LinkBag, LinkSet};
pub use strata_storage::{Backend, MemoryBackend, ResultSet, WriteBatch};

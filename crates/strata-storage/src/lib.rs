//! # strata-storage
//!
//! Storage backends for Strata.
//!
//! The store core consumes a narrow capability set from its backend: load
//! an object payload by (type, key), load a link-set baseline by (type,
//! link, key), resolve reverse-link queries, and commit a batch of object
//! and link-set writes atomically. This crate defines that contract (the
//! [`Backend`] and [`WriteBatch`] traits plus the [`ResultSet`] query
//! result) and ships [`MemoryBackend`], an in-process implementation with
//! a reverse link index.

#![warn(missing_docs)]
#![warn(clippy::all)]

mod backend;
mod memory;
mod result;

pub use backend::{Backend, WriteBatch};
pub use memory::MemoryBackend;
pub use result::ResultSet;

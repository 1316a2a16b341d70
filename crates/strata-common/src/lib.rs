//! # strata-common
//!
//! Common types, errors, and utilities for Strata.
//!
//! This crate provides the foundational types used across all Strata
//! components:
//!
//! - **Types**: object keys ([`Key`]), cell references ([`CellRef`]),
//!   snapshot identifiers ([`SnapshotId`]), and type schemas ([`TypeSchema`])
//! - **Errors**: unified error handling with [`StrataError`]
//!
//! ## Example
//!
//! ```rust
//! use strata_common::types::{CellRef, Key};
//!
//! let key = Key::from_bytes(b"user:1234");
//! let cell = CellRef::object("person", key);
//! assert_eq!(cell.cache_key().as_ref(), b"person^user:1234");
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod error;
pub mod types;

pub use error::{StrataError, StrataResult};
pub use types::{CellRef, Key, LinkDecl, SnapshotId, TypeSchema};

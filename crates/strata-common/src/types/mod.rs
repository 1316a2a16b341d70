//! Core types shared across Strata components.

mod ids;
mod keys;
mod refs;
mod schema;

pub use ids::SnapshotId;
pub use keys::Key;
pub use refs::CellRef;
pub use schema::{LinkDecl, TypeSchema};

//! Type schemas exchanged with the storage backend.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A declared link on a registered type.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkDecl {
    /// The type name link targets belong to.
    pub target_type: String,
    /// A small stable tag the backend may use in its persisted layout.
    pub tag: u16,
}

/// The schema part of a type descriptor: everything the storage backend
/// needs to know about a registered type.
///
/// The in-memory type descriptor additionally carries the exemplar
/// capability set (nil value, deep copy, codec); that half stays inside the
/// core and never crosses the backend boundary.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypeSchema {
    /// The registered type name, unique per database.
    pub name: String,
    /// The schema version tag.
    pub version: u16,
    /// Declared links by link name, ordered for stable iteration.
    pub links: BTreeMap<String, LinkDecl>,
}

impl TypeSchema {
    /// Creates a schema with no declared links.
    pub fn new(name: impl Into<String>, version: u16) -> Self {
        Self {
            name: name.into(),
            version,
            links: BTreeMap::new(),
        }
    }

    /// Returns the declaration for a link name, if declared.
    #[must_use]
    pub fn link(&self, link_name: &str) -> Option<&LinkDecl> {
        self.links.get(link_name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_schema_links() {
        let mut schema = TypeSchema::new("person", 1);
        schema.links.insert(
            "friends".to_string(),
            LinkDecl {
                target_type: "person".to_string(),
                tag: 1,
            },
        );

        assert_eq!(schema.link("friends").unwrap().target_type, "person");
        assert!(schema.link("enemies").is_none());
    }
}

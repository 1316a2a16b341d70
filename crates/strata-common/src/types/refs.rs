//! Cell references and canonical cache keys.

use std::fmt;

use bytes::Bytes;

use super::Key;

/// A reference to a cell: the in-memory home of either a user object or a
/// link-set.
///
/// Every cell has a canonical cache key string that identifies it in the
/// process-wide cache:
///
/// - object cells render as `"<type>^<key>"`
/// - link cells render as `"^<type>^<link>^<key>"`
///
/// The leading `^` distinguishes link cells from object cells; `^` cannot
/// start a type name.
#[derive(Clone, PartialEq, Eq, Hash)]
pub enum CellRef {
    /// A user object, addressed by type name and key.
    Object {
        /// The registered type name.
        type_name: String,
        /// The object key.
        key: Key,
    },
    /// A link-set, addressed by type name, link name, and owning key.
    Links {
        /// The registered type name owning the link.
        type_name: String,
        /// The declared link name.
        link_name: String,
        /// The key of the owning object.
        key: Key,
    },
}

impl CellRef {
    /// Creates a reference to an object cell.
    pub fn object(type_name: impl Into<String>, key: impl Into<Key>) -> Self {
        Self::Object {
            type_name: type_name.into(),
            key: key.into(),
        }
    }

    /// Creates a reference to a link cell.
    pub fn links(
        type_name: impl Into<String>,
        link_name: impl Into<String>,
        key: impl Into<Key>,
    ) -> Self {
        Self::Links {
            type_name: type_name.into(),
            link_name: link_name.into(),
            key: key.into(),
        }
    }

    /// Returns the type name this cell belongs to.
    #[must_use]
    pub fn type_name(&self) -> &str {
        match self {
            Self::Object { type_name, .. } | Self::Links { type_name, .. } => type_name,
        }
    }

    /// Returns the object key this cell is addressed by.
    #[must_use]
    pub fn key(&self) -> &Key {
        match self {
            Self::Object { key, .. } | Self::Links { key, .. } => key,
        }
    }

    /// Returns the link name for a link cell, or `None` for an object cell.
    #[must_use]
    pub fn link_name(&self) -> Option<&str> {
        match self {
            Self::Object { .. } => None,
            Self::Links { link_name, .. } => Some(link_name),
        }
    }

    /// Returns true if this references a link cell.
    #[inline]
    #[must_use]
    pub fn is_links(&self) -> bool {
        matches!(self, Self::Links { .. })
    }

    /// Builds the canonical cache key for this reference.
    ///
    /// The key is a byte string so that arbitrary (non-UTF-8) object keys
    /// stay distinct.
    #[must_use]
    pub fn cache_key(&self) -> Bytes {
        match self {
            Self::Object { type_name, key } => {
                let mut buf = Vec::with_capacity(type_name.len() + 1 + key.len());
                buf.extend_from_slice(type_name.as_bytes());
                buf.push(b'^');
                buf.extend_from_slice(key);
                Bytes::from(buf)
            }
            Self::Links {
                type_name,
                link_name,
                key,
            } => {
                let mut buf =
                    Vec::with_capacity(type_name.len() + link_name.len() + key.len() + 3);
                buf.push(b'^');
                buf.extend_from_slice(type_name.as_bytes());
                buf.push(b'^');
                buf.extend_from_slice(link_name.as_bytes());
                buf.push(b'^');
                buf.extend_from_slice(key);
                Bytes::from(buf)
            }
        }
    }
}

impl fmt::Debug for CellRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CellRef({self})")
    }
}

impl fmt::Display for CellRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Object { type_name, key } => write!(f, "{type_name}^{key}"),
            Self::Links {
                type_name,
                link_name,
                key,
            } => write!(f, "^{type_name}^{link_name}^{key}"),
        }
    }
}

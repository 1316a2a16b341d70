//! Error types for Strata.
//!
//! Operational failures (backend I/O, payload codec problems) flow through
//! [`StrataError`]. API misuse (registering a type twice, operating on a
//! transaction that is no longer active, naming an unknown type or link)
//! is a defect in the calling code and panics instead of returning an
//! error.

use thiserror::Error;

/// The unified error type for Strata operations.
#[derive(Debug, Error)]
pub enum StrataError {
    /// The storage backend failed to serve a load or commit a batch.
    #[error("backend failure: {0}")]
    Backend(String),

    /// A payload could not be encoded or decoded at the backend boundary.
    #[error("payload codec failure for type '{type_name}': {message}")]
    Codec {
        /// The registered type whose payload was being converted.
        type_name: String,
        /// Description of the underlying codec failure.
        message: String,
    },
}

impl StrataError {
    /// Shorthand for a backend failure with a formatted message.
    pub fn backend(message: impl Into<String>) -> Self {
        Self::Backend(message.into())
    }

    /// Shorthand for a codec failure.
    pub fn codec(type_name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Codec {
            type_name: type_name.into(),
            message: message.into(),
        }
    }
}

/// Result type for Strata operations.
pub type StrataResult<T> = Result<T, StrataError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = StrataError::backend("connection refused");
        assert_eq!(err.to_string(), "backend failure: connection refused");

        let err = StrataError::codec("person", "unexpected end of input");
        assert_eq!(
            err.to_string(),
            "payload codec failure for type 'person': unexpected end of input"
        );
    }
}

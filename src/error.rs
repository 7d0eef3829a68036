//! Error types for compound document decoding.

use thiserror::Error;

/// Errors raised while decoding a compound document or extracting a stream.
///
/// A stream name that simply does not exist is not an error; the query
/// surface returns `Ok(None)` for it.
#[derive(Error, Debug)]
pub enum CompDocError {
    /// The input is not a compound document at all
    #[error("not an OLE2 compound document: {0}")]
    Format(String),

    /// A structural impossibility: invalid sector references, unterminated
    /// or runaway chains, sectors claimed by two structures
    #[error("compound document corruption: {0}")]
    Corrupt(String),

    /// A path segment named a stream where a storage was required
    #[error("path component '{0}' is not a storage")]
    NotStorage(String),

    /// The path resolved to a storage where a stream was required
    #[error("requested component '{0}' is a storage, not a stream")]
    Storage(String),
}

/// Result type for compound document operations.
pub type Result<T> = std::result::Result<T, CompDocError>;

impl From<crate::binary::BinaryError> for CompDocError {
    fn from(err: crate::binary::BinaryError) -> Self {
        CompDocError::Corrupt(err.to_string())
    }
}

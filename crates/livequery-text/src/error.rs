//! Errors of the text engine.

use thiserror::Error;

/// Result type for text engine operations.
pub type Result<T> = std::result::Result<T, TextError>;

/// Errors that can occur while indexing or persisting.
#[derive(Debug, Clone, Error)]
pub enum TextError {
    /// A document id was added twice without an intervening remove.
    #[error("document already indexed: {0}")]
    DuplicateDoc(String),

    /// A persisted index could not be decoded.
    #[error("index decode failed: {0}")]
    Serialization(String),

    /// A persisted index carries an unsupported format version.
    #[error("incompatible index format version {found} (expected {expected})")]
    IncompatibleVersion { found: u32, expected: u32 },
}

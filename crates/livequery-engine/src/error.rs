//! Engine errors.

use livequery_text::TextError;
use thiserror::Error;

/// Result type for engine operations.
pub type Result<T> = std::result::Result<T, EngineError>;

/// Errors raised by the local engine.
#[derive(Debug, Clone, Error)]
pub enum EngineError {
    /// Search was requested on a map that has no full-text index.
    #[error("Full-text search not enabled for map: {0}")]
    NotEnabled(String),

    /// A caller-supplied argument was unusable.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// An index mutation failed; the enclosing store operation must not
    /// commit.
    #[error(transparent)]
    Text(#[from] TextError),
}

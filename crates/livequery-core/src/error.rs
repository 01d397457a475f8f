//! Errors raised at the client delivery boundary.

use thiserror::Error;

/// Failure to hand a frame to a client connection.
///
/// Delivery errors never propagate into subscription state; the caller
/// logs and drops, and the connection layer owns the client teardown.
#[derive(Debug, Clone, Error)]
pub enum SinkError {
    /// The socket is not open.
    #[error("client socket is not open")]
    Closed,
    /// The transport rejected the write.
    #[error("client send failed: {0}")]
    Send(String),
}

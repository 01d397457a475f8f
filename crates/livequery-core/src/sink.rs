//! Client connection boundary.

use crate::error::SinkError;
use crate::frames::ClientFrame;
use async_trait::async_trait;

/// Write access to one client connection.
///
/// The connection layer owns the socket; the engine only writes when
/// [`ClientSink::is_open`] reports true. A failed send is reported to the
/// caller, which logs and drops without touching subscription state.
#[async_trait]
pub trait ClientSink: Send + Sync {
    /// True when the underlying connection accepts writes.
    fn is_open(&self) -> bool;

    /// Deliver a frame to the client.
    async fn send(&self, frame: ClientFrame) -> Result<(), SinkError>;
}

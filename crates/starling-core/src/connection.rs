//! Client connection capability
//!
//! A [`Connection`] is "something with a stable remote identifier that
//! accepts a byte frame". Both client transports (WebSocket in-tree,
//! WebTransport as an external adapter) satisfy it, and the fabric never
//! learns which one it is talking to.

use async_trait::async_trait;
use bytes::Bytes;

use crate::error::ConnectionError;

/// Capability the fabric needs from a client connection
///
/// Writes may fail; callers on the dispatch path log and continue, because
/// one dead subscriber must not abort delivery to the rest of a channel.
#[async_trait]
pub trait Connection: Send + Sync {
    /// The client's remote address, stable for the connection's lifetime.
    ///
    /// Doubles as the peer's session id, so it must be unique per node.
    fn remote_address(&self) -> &str;

    /// Deliver one encoded signalling frame to the client
    async fn write(&self, frame: Bytes) -> Result<(), ConnectionError>;
}

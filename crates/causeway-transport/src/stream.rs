//! The message stream contract.
//!
//! A [`MessageStream`] is a bidirectional, ordered envelope pipe between two
//! peers. The session layer is written entirely against this trait: the
//! handshake runs over it before a connection exists, and an established
//! connection's read and write tasks share one stream from opposite ends.
//!
//! Methods take `&self` so a single stream can be driven concurrently by
//! both tasks; implementations carry interior mutability per direction.

use crate::envelope::Envelope;
use crate::error::TransportError;

/// A bidirectional envelope transport between two peers.
pub trait MessageStream: Send + Sync + 'static {
    /// Write one envelope to the peer.
    ///
    /// Fails with [`TransportError::Closed`] once the stream has been closed
    /// on either side.
    fn send(
        &self,
        envelope: Envelope,
    ) -> impl Future<Output = Result<(), TransportError>> + Send;

    /// Read the next envelope from the peer.
    ///
    /// Blocks until an envelope arrives, the peer hangs up
    /// ([`TransportError::Closed`]), or the transport fails.
    fn recv(&self) -> impl Future<Output = Result<Envelope, TransportError>> + Send;

    /// Close the stream. Idempotent; pending and future `recv`/`send` calls
    /// fail with [`TransportError::Closed`].
    fn close(&self) -> impl Future<Output = ()> + Send;
}

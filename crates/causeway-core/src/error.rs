//! Error types for the session layer.
//!
//! Errors are grouped by origin: transport failures terminate a running
//! connection, handshake failures abort before a connection exists, and
//! registry/dispatcher failures are returned synchronously to the caller.
//! The transient/permanent split mirrors how callers react - transient
//! errors are candidates for a fresh dial, permanent ones are not.

use std::borrow::Cow;
use std::time::Duration;

use causeway_crypto::CryptoError;
use causeway_transport::{EnvelopeKind, TransportError};
use thiserror::Error;

use crate::id::ConnectionId;

/// Errors produced by connections, handshakes, the dispatcher, and the
/// registry
#[derive(Debug, Error, Clone)]
pub enum Error {
    // ============ Transport ============
    /// The underlying stream failed or hung up
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    // ============ Crypto ============
    /// Signing or verification could not be performed
    #[error("crypto error: {0}")]
    Crypto(#[from] CryptoError),

    /// An inbound envelope failed signature verification
    #[error("signature verification failed for peer {0}")]
    SignatureVerification(ConnectionId),

    // ============ Handshake ============
    /// The peer sent the wrong message type during the handshake
    #[error("unexpected handshake message: {0:?}")]
    NotExpectedMessage(EnvelopeKind),

    /// The handshake payload could not be decoded or its key recovered
    #[error("invalid peer info: {0}")]
    InvalidPeerInfo(String),

    /// A handshake receive step exceeded its deadline
    #[error("handshake timed out after {0:?}")]
    HandshakeTimeout(Duration),

    /// The dial could not establish a socket in time
    #[error("dial timed out after {0:?}")]
    DialTimeout(Duration),

    // ============ Registry ============
    /// A connection with this identity is already registered
    #[error("connection {0} already registered")]
    AlreadyExists(ConnectionId),

    /// No connection registered under this identity
    #[error("connection {0} not found")]
    NotFound(ConnectionId),

    // ============ Dispatcher ============
    /// The protocol tag is already bound to a handler
    #[error("protocol {0:?} already registered")]
    ProtocolAlreadyRegistered(String),

    // ============ Configuration & State ============
    /// The address did not parse as `host:port`
    #[error("invalid address {0:?}")]
    InvalidAddress(String),

    /// Operation not valid in the current lifecycle state
    #[error("invalid state: {0}")]
    InvalidState(Cow<'static, str>),
}

impl Error {
    /// Create an invalid-state error with static context (zero allocation)
    #[must_use]
    pub const fn invalid_state(context: &'static str) -> Self {
        Error::InvalidState(Cow::Borrowed(context))
    }

    /// Returns true if this error is transient and a fresh dial may succeed
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Error::Transport(_) | Error::HandshakeTimeout(_) | Error::DialTimeout(_)
        )
    }

    /// Returns true if this error will not succeed without intervention
    #[must_use]
    pub fn is_permanent(&self) -> bool {
        !self.is_transient()
    }
}

/// Result type for session-layer operations
pub type Result<T> = std::result::Result<T, Error>;

//! Transport error types.

use thiserror::Error;

/// Errors surfaced by streams and the framing codec
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// Frame did not start with the network magic
    #[error("invalid network magic: expected {expected:02x?}, got {actual:02x?}")]
    InvalidMagic {
        /// The magic this network expects
        expected: [u8; 4],
        /// The bytes actually read
        actual: [u8; 4],
    },

    /// Frame length exceeded the envelope size limit
    #[error("frame too large: {size} bytes (max {max})")]
    FrameTooLarge {
        /// Declared frame length
        size: usize,
        /// Enforced maximum
        max: usize,
    },

    /// Envelope could not be encoded or decoded
    #[error("codec error: {0}")]
    Codec(String),

    /// Underlying socket error
    #[error("io error: {0}")]
    Io(String),

    /// Stream was closed locally or the peer hung up
    #[error("stream closed")]
    Closed,
}

impl From<std::io::Error> for TransportError {
    fn from(err: std::io::Error) -> Self {
        TransportError::Io(err.to_string())
    }
}

impl From<bincode::Error> for TransportError {
    fn from(err: bincode::Error) -> Self {
        TransportError::Codec(err.to_string())
    }
}

/// Result type for transport operations
pub type Result<T> = std::result::Result<T, TransportError>;

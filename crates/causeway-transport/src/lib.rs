//! # Causeway Transport
//!
//! Wire layer for the Causeway session stack.
//!
//! This crate provides:
//! - The [`Envelope`] wire message and its control/application kinds
//! - Length-prefixed framing ([`EnvelopeCodec`])
//! - The [`MessageStream`] contract the session layer is written against
//! - A TCP-backed stream and an in-memory pair for tests
//!
//! ## Architecture
//!
//! ```text
//! +----------------------------------------------------------+
//! |                      MessageStream                       |
//! |      (ordered, bidirectional envelope pipe, &self)       |
//! +---------------------------+------------------------------+
//! |      TcpMessageStream     |      MemoryMessageStream     |
//! |  (framed TCP socket, IO)  |  (channel pair, for tests)   |
//! +---------------------------+------------------------------+
//! |                      EnvelopeCodec                       |
//! |          (magic | be32 length | bincode body)            |
//! +----------------------------------------------------------+
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_op_in_unsafe_fn)]

pub mod codec;
pub mod envelope;
pub mod error;
pub mod memory;
pub mod stream;
pub mod tcp;

pub use codec::{EnvelopeCodec, MAX_ENVELOPE_SIZE, NETWORK_MAGIC};
pub use envelope::{Envelope, EnvelopeKind};
pub use error::TransportError;
pub use stream::MessageStream;
pub use tcp::TcpMessageStream;

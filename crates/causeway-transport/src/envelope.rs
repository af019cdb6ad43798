//! The wire envelope.
//!
//! An [`Envelope`] is the only unit ever written to or read from a stream.
//! Application traffic travels as [`EnvelopeKind::Normal`] envelopes routed
//! by their protocol tag; the two `PeerInfo` kinds are reserved for the
//! identity handshake that runs before a connection exists.

use serde::{Deserialize, Serialize};

/// Distinguishes handshake control messages from application traffic.
///
/// The variant order is the wire encoding (`Normal = 0`); do not reorder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum EnvelopeKind {
    /// Application message, routed by protocol tag
    #[default]
    Normal,
    /// Handshake: the accepting side asks the peer to identify itself
    RequestPeerInfo,
    /// Handshake: a peer's identity payload
    ResponsePeerInfo,
}

/// The single message type carried on a stream.
///
/// `signature` is computed over `payload` only. `public_key` re-asserts the
/// claimed sender key per message, redundantly with the key bound at
/// handshake time, so either can be used for verification.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Envelope {
    /// Protocol tag selecting the application handler; empty for handshake
    /// envelopes
    pub protocol: String,
    /// Opaque message body
    pub payload: Vec<u8>,
    /// Detached signature over `payload`
    pub signature: Vec<u8>,
    /// Byte-encoded claimed sender public key
    pub public_key: Vec<u8>,
    /// Control/application discriminator
    pub kind: EnvelopeKind,
}

impl Envelope {
    /// The handshake opener sent by the accepting side. Carries no payload.
    #[must_use]
    pub fn request_peer_info() -> Self {
        Self {
            kind: EnvelopeKind::RequestPeerInfo,
            ..Self::default()
        }
    }

    /// A handshake identity response carrying a serialized `PeerInfo`.
    #[must_use]
    pub fn response_peer_info(payload: Vec<u8>, signature: Vec<u8>, public_key: Vec<u8>) -> Self {
        Self {
            protocol: String::new(),
            payload,
            signature,
            public_key,
            kind: EnvelopeKind::ResponsePeerInfo,
        }
    }

    /// Whether this envelope is application traffic rather than handshake
    /// control.
    #[must_use]
    pub fn is_normal(&self) -> bool {
        self.kind == EnvelopeKind::Normal
    }
}

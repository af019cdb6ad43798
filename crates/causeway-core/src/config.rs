//! Session-layer configuration.

use std::time::Duration;

/// What to do with an inbound envelope whose signature does not verify.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum VerifyPolicy {
    /// Log and discard the envelope; the connection stays up.
    #[default]
    Drop,
    /// Tear the connection down and surface the failure from `start()`.
    Disconnect,
}

/// Timeouts for the identity handshake.
///
/// The accepting side speaks first, so the dialing side waits longest: its
/// opening receive covers connection setup on the remote, while the
/// follow-up receives only cover one message turnaround.
#[derive(Debug, Clone)]
pub struct HandshakeConfig {
    /// How long the dialing side waits for the accepting side's
    /// `RequestPeerInfo` opener.
    pub request_timeout: Duration,
    /// How long either side waits for a `ResponsePeerInfo`.
    pub response_timeout: Duration,
}

impl Default for HandshakeConfig {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(10),
            response_timeout: Duration::from_secs(3),
        }
    }
}

/// Per-connection tuning.
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// Capacity of the inbound and outbound envelope queues.
    pub queue_capacity: usize,
    /// Policy for inbound envelopes that fail verification.
    pub verify_policy: VerifyPolicy,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 200,
            verify_policy: VerifyPolicy::default(),
        }
    }
}

/// Options for dialing a remote peer.
#[derive(Debug, Clone)]
pub struct DialOpts {
    /// Socket connect deadline.
    pub timeout: Duration,
    /// Handshake timeouts.
    pub handshake: HandshakeConfig,
    /// Configuration for the resulting connection.
    pub connection: ConnectionConfig,
}

impl Default for DialOpts {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(3),
            handshake: HandshakeConfig::default(),
            connection: ConnectionConfig::default(),
        }
    }
}

/// Options for an accepting server.
#[derive(Debug, Clone, Default)]
pub struct ServerConfig {
    /// Handshake timeouts applied to every accepted stream.
    pub handshake: HandshakeConfig,
    /// Configuration for accepted connections.
    pub connection: ConnectionConfig,
}

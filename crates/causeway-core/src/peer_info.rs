//! Peer identity payloads.
//!
//! [`PeerInfo`] is what travels inside a handshake envelope: enough to
//! reconstruct the sender's typed public key, plus its reachable address and
//! free-form metadata. [`HostInfo`] is the local node's identity, from which
//! the outgoing `PeerInfo` is built.
//!
//! `PeerInfo` is JSON-encoded on the wire. The envelope framing around it is
//! compact binary, but the handshake payload stays self-describing so nodes
//! can evolve the metadata map without re-framing.

use std::collections::BTreeMap;

use causeway_crypto::{KeyGenOption, KeyRecoverer, VerifyingKey};
use serde::{Deserialize, Serialize};

use crate::address::Address;
use crate::error::{Error, Result};
use crate::id::ConnectionId;

/// Identity payload exchanged during the handshake.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerInfo {
    /// Reachable address of the sender, informational only
    pub address: String,
    /// Byte-encoded public key
    pub public_key: Vec<u8>,
    /// Whether `public_key` holds private key material; always false on the
    /// wire
    pub is_private: bool,
    /// Scheme needed to recover the key from its bytes
    pub key_gen_option: KeyGenOption,
    /// Free-form peer attributes
    pub metadata: BTreeMap<String, String>,
}

impl PeerInfo {
    /// Serialize for embedding in a handshake envelope payload.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidPeerInfo`] if encoding fails.
    pub fn to_payload(&self) -> Result<Vec<u8>> {
        serde_json::to_vec(self).map_err(|err| Error::InvalidPeerInfo(err.to_string()))
    }

    /// Decode from a handshake envelope payload.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidPeerInfo`] if the payload is not a valid
    /// `PeerInfo`.
    pub fn from_payload(payload: &[u8]) -> Result<Self> {
        serde_json::from_slice(payload).map_err(|err| Error::InvalidPeerInfo(err.to_string()))
    }

    /// Recover the typed public key this payload describes.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidPeerInfo`] if the key bytes do not decode
    /// under the declared scheme.
    pub fn recover_key(&self, recoverer: &dyn KeyRecoverer) -> Result<VerifyingKey> {
        recoverer
            .recover_key_from_bytes(&self.public_key, self.is_private, self.key_gen_option)
            .map_err(|err| Error::InvalidPeerInfo(err.to_string()))
    }
}

/// The local node's identity, handed to `dial` and `Server`.
#[derive(Debug, Clone)]
pub struct HostInfo {
    /// Address this node advertises to peers
    pub address: Address,
    /// This node's public key
    pub public_key: VerifyingKey,
    /// Scheme tag sent alongside the key bytes
    pub key_gen_option: KeyGenOption,
    /// Attributes advertised to peers
    pub metadata: BTreeMap<String, String>,
}

impl HostInfo {
    /// Identity with the default key scheme and no metadata.
    #[must_use]
    pub fn new(address: Address, public_key: VerifyingKey) -> Self {
        Self {
            address,
            public_key,
            key_gen_option: KeyGenOption::default(),
            metadata: BTreeMap::new(),
        }
    }

    /// Attach an advertised attribute.
    #[must_use]
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// This node's own connection identity, as peers will derive it.
    #[must_use]
    pub fn connection_id(&self) -> ConnectionId {
        ConnectionId::from_public_key(&self.public_key)
    }

    /// Build the identity payload peers receive during the handshake.
    #[must_use]
    pub fn to_peer_info(&self) -> PeerInfo {
        PeerInfo {
            address: self.address.to_string(),
            public_key: self.public_key.to_bytes().to_vec(),
            is_private: false,
            key_gen_option: self.key_gen_option,
            metadata: self.metadata.clone(),
        }
    }
}

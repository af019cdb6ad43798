//! Connection identity.
//!
//! A [`ConnectionId`] is the deterministic identity of a remote peer: the
//! BLAKE3 digest of the peer's raw public-key bytes. Both ends of a session
//! hash the same wire bytes, so the identity each side derives for the other
//! is identical, and dialing the same peer twice yields the same id. The
//! registry is keyed by this value.

use std::fmt;

use causeway_crypto::VerifyingKey;

/// Deterministic peer identity derived from a public key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId([u8; 32]);

impl ConnectionId {
    /// Derive the identity for a public key.
    #[must_use]
    pub fn from_public_key(key: &VerifyingKey) -> Self {
        Self(*blake3::hash(&key.to_bytes()).as_bytes())
    }

    /// Build from a raw digest (used by tests and storage layers).
    #[must_use]
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// The raw digest bytes.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Short hex prefix for log lines.
    #[must_use]
    pub fn short(&self) -> String {
        hex::encode(&self.0[..8])
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use causeway_crypto::SigningKey;
    use rand_core::OsRng;

    #[test]
    fn test_same_key_same_id() {
        let key = SigningKey::generate(&mut OsRng).verifying_key();
        assert_eq!(
            ConnectionId::from_public_key(&key),
            ConnectionId::from_public_key(&key)
        );
    }

    #[test]
    fn test_different_keys_different_ids() {
        let a = SigningKey::generate(&mut OsRng).verifying_key();
        let b = SigningKey::generate(&mut OsRng).verifying_key();
        assert_ne!(
            ConnectionId::from_public_key(&a),
            ConnectionId::from_public_key(&b)
        );
    }

    #[test]
    fn test_survives_key_byte_roundtrip() {
        // The id must be derivable from the wire encoding alone, since that
        // is all the remote side ever sees.
        let key = SigningKey::generate(&mut OsRng).verifying_key();
        let recovered = VerifyingKey::from_bytes(&key.to_bytes()).unwrap();
        assert_eq!(
            ConnectionId::from_public_key(&key),
            ConnectionId::from_public_key(&recovered)
        );
    }

    #[test]
    fn test_display_is_full_hex() {
        let id = ConnectionId::from_bytes([0xab; 32]);
        assert_eq!(id.to_string().len(), 64);
        assert!(id.to_string().starts_with("abab"));
        assert_eq!(id.short().len(), 16);
    }
}

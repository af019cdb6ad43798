//! The crypto contract supplied to connections and servers.
//!
//! The session layer never generates, stores, or persists keys; it consumes
//! three capabilities from the embedding application:
//! - [`Signer`]: sign an outgoing payload
//! - [`Verifier`]: verify an incoming payload against the sender's key
//! - [`KeyRecoverer`]: turn wire-encoded key bytes back into a typed key
//!
//! [`Crypto`] bundles the three behind `Arc`s so one bundle can be shared by
//! every connection of a node. [`Ed25519KeyService`] is the default
//! implementation, backed by a single Ed25519 keypair.

use crate::error::CryptoError;
use crate::signatures::{Signature, SigningKey, VerifyingKey};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Key scheme tag carried inside the handshake payload.
///
/// Both peers must agree on the scheme before key bytes can be recovered.
/// The tag is a closed set; decoding an unknown tag fails the handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum KeyGenOption {
    /// Ed25519 signing keys (32-byte public keys, 64-byte signatures)
    #[default]
    Ed25519,
}

impl fmt::Display for KeyGenOption {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeyGenOption::Ed25519 => write!(f, "ed25519"),
        }
    }
}

/// Signs outgoing envelope payloads.
pub trait Signer: Send + Sync {
    /// Sign a payload, returning the detached signature.
    ///
    /// # Errors
    ///
    /// Returns [`CryptoError::SigningFailed`] if the signature cannot be
    /// produced.
    fn sign(&self, payload: &[u8]) -> Result<Signature, CryptoError>;
}

/// Verifies incoming envelope payloads.
pub trait Verifier: Send + Sync {
    /// Check `signature` over `payload` against `peer_key`.
    ///
    /// Returns `Ok(false)` for a well-formed signature that does not match.
    ///
    /// # Errors
    ///
    /// Fails only on malformed input (wrong signature length, corrupt key).
    fn verify(
        &self,
        peer_key: &VerifyingKey,
        signature: &[u8],
        payload: &[u8],
    ) -> Result<bool, CryptoError>;
}

/// Recovers typed keys from their wire encoding.
pub trait KeyRecoverer: Send + Sync {
    /// Rebuild a verifying key from wire bytes.
    ///
    /// With `is_private` set, `key_bytes` is a 32-byte private seed and the
    /// derived verifying key is returned; otherwise `key_bytes` is the
    /// public key itself.
    ///
    /// # Errors
    ///
    /// Returns a [`CryptoError`] if the bytes do not decode under `scheme`.
    fn recover_key_from_bytes(
        &self,
        key_bytes: &[u8],
        is_private: bool,
        scheme: KeyGenOption,
    ) -> Result<VerifyingKey, CryptoError>;
}

/// The crypto capabilities handed to a connection or server at construction.
#[derive(Clone)]
pub struct Crypto {
    /// Signs outgoing payloads
    pub signer: Arc<dyn Signer>,
    /// Verifies incoming payloads
    pub verifier: Arc<dyn Verifier>,
    /// Recovers peer keys during the handshake
    pub key_recoverer: Arc<dyn KeyRecoverer>,
}

impl Crypto {
    /// Bundle explicit implementations of the three capabilities.
    pub fn new(
        signer: Arc<dyn Signer>,
        verifier: Arc<dyn Verifier>,
        key_recoverer: Arc<dyn KeyRecoverer>,
    ) -> Self {
        Self {
            signer,
            verifier,
            key_recoverer,
        }
    }

    /// Default Ed25519 bundle backed by one signing key.
    #[must_use]
    pub fn ed25519(signing_key: SigningKey) -> Self {
        let service = Arc::new(Ed25519KeyService::new(signing_key));
        Self {
            signer: service.clone(),
            verifier: service.clone(),
            key_recoverer: service,
        }
    }
}

impl fmt::Debug for Crypto {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Crypto").finish_non_exhaustive()
    }
}

/// Default [`Crypto`] implementation over a single Ed25519 keypair.
pub struct Ed25519KeyService {
    signing_key: SigningKey,
}

impl Ed25519KeyService {
    /// Create a service that signs with `signing_key`.
    #[must_use]
    pub fn new(signing_key: SigningKey) -> Self {
        Self { signing_key }
    }

    /// The verifying key matching this service's signing key.
    #[must_use]
    pub fn verifying_key(&self) -> VerifyingKey {
        self.signing_key.verifying_key()
    }
}

impl Signer for Ed25519KeyService {
    fn sign(&self, payload: &[u8]) -> Result<Signature, CryptoError> {
        Ok(self.signing_key.sign(payload))
    }
}

impl Verifier for Ed25519KeyService {
    fn verify(
        &self,
        peer_key: &VerifyingKey,
        signature: &[u8],
        payload: &[u8],
    ) -> Result<bool, CryptoError> {
        let signature = Signature::from_slice(signature)?;
        match peer_key.verify(payload, &signature) {
            Ok(()) => Ok(true),
            Err(CryptoError::InvalidSignature) => Ok(false),
            Err(err) => Err(err),
        }
    }
}

impl KeyRecoverer for Ed25519KeyService {
    fn recover_key_from_bytes(
        &self,
        key_bytes: &[u8],
        is_private: bool,
        scheme: KeyGenOption,
    ) -> Result<VerifyingKey, CryptoError> {
        let KeyGenOption::Ed25519 = scheme;
        if is_private {
            let seed: [u8; 32] =
                key_bytes
                    .try_into()
                    .map_err(|_| CryptoError::InvalidKeyLength {
                        expected: 32,
                        actual: key_bytes.len(),
                    })?;
            Ok(SigningKey::from_bytes(&seed).verifying_key())
        } else {
            VerifyingKey::from_slice(key_bytes)
        }
    }
}

//! # Causeway Crypto
//!
//! Cryptographic contract for the Causeway session layer.
//!
//! This crate provides:
//! - Ed25519 signing and verification newtypes
//! - The [`Signer`] / [`Verifier`] / [`KeyRecoverer`] traits consumed by
//!   connections and servers
//! - [`Crypto`], the bundle handed to the session layer at construction
//! - [`Ed25519KeyService`], the default implementation
//!
//! The session layer signs every outgoing envelope over its payload and
//! verifies every incoming envelope before dispatch; key generation and
//! storage stay with the embedding application.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_op_in_unsafe_fn)]

pub mod error;
pub mod service;
pub mod signatures;

pub use error::CryptoError;
pub use service::{Crypto, Ed25519KeyService, KeyGenOption, KeyRecoverer, Signer, Verifier};
pub use signatures::{Signature, SigningKey, VerifyingKey};

/// Ed25519 public key size
pub const PUBLIC_KEY_SIZE: usize = 32;

/// Ed25519 private seed size
pub const SECRET_KEY_SIZE: usize = 32;

/// Ed25519 signature size
pub const SIGNATURE_SIZE: usize = 64;

//! # Causeway Core
//!
//! The session layer of the Causeway stack: authenticated, signed,
//! protocol-routed logical connections between peer-to-peer nodes.
//!
//! This crate provides:
//! - [`Connection`]: one stream, two background data-movement tasks, and a
//!   caller-driven dispatch loop with serialized handler invocation
//! - The identity [`handshake`] that authenticates a peer before a
//!   connection exists
//! - [`Mux`]: the protocol-tag dispatcher
//! - [`ConnectionRegistry`]: the concurrent map of live connections
//! - [`dial`] and [`Server`] for the two sides of session establishment
//!
//! ## Establishing a session
//!
//! ```text
//! dialing side:    dial(addr) -> TCP -> handshake -> Connection -> start()
//! accepting side:  accept     ->        handshake -> Connection -> on_connection
//! ```
//!
//! Once started, a connection autonomously moves envelopes and dispatches
//! verified inbound messages to its handler until it is closed or the
//! transport fails. Reconnection is the application's decision.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_op_in_unsafe_fn)]

pub mod address;
pub mod client;
pub mod config;
pub mod connection;
pub mod error;
pub mod handshake;
pub mod id;
pub mod message;
pub mod mux;
pub mod peer_info;
pub mod registry;
pub mod server;

pub use address::Address;
pub use client::dial;
pub use config::{ConnectionConfig, DialOpts, HandshakeConfig, ServerConfig, VerifyPolicy};
pub use connection::{Connection, ConnectionState};
pub use error::{Error, Result};
pub use handshake::HandshakeOutcome;
pub use id::ConnectionId;
pub use message::{HandlerFuture, Message, OnError, OnSuccess, RequestHandler};
pub use mux::Mux;
pub use peer_info::{HostInfo, PeerInfo};
pub use registry::ConnectionRegistry;
pub use server::Server;

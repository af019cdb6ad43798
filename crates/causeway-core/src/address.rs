//! Reachable peer addresses.
//!
//! Addresses are informational - the registry indexes connections by
//! identity, never by address - but dial and listen need a validated
//! `host:port` to hand to the socket layer.

use std::fmt;
use std::net::SocketAddr;
use std::str::FromStr;

use crate::error::Error;

/// A validated `host:port` network address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Address(SocketAddr);

impl Address {
    /// The underlying socket address.
    #[must_use]
    pub fn socket_addr(&self) -> SocketAddr {
        self.0
    }
}

impl FromStr for Address {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Error> {
        s.trim()
            .parse::<SocketAddr>()
            .map(Address)
            .map_err(|_| Error::InvalidAddress(s.to_string()))
    }
}

impl From<SocketAddr> for Address {
    fn from(addr: SocketAddr) -> Self {
        Address(addr)
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

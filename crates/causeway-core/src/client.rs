//! Dialing remote peers.

use std::sync::Arc;

use causeway_crypto::Crypto;
use causeway_transport::{TcpMessageStream, TransportError};
use tokio::net::TcpStream;

use crate::address::Address;
use crate::config::DialOpts;
use crate::connection::Connection;
use crate::error::{Error, Result};
use crate::handshake;
use crate::peer_info::HostInfo;

/// Dial `address`, run the handshake, and return the authenticated
/// connection.
///
/// The connection is returned in the `Created` state: bind a handler with
/// [`Connection::handle`] and drive it with [`Connection::start`].
///
/// # Errors
///
/// [`Error::InvalidAddress`] for an unparseable address,
/// [`Error::DialTimeout`] if the socket cannot connect in time, or any
/// handshake error. No connection exists on failure; the socket is closed.
pub async fn dial(
    address: &str,
    local: &HostInfo,
    opts: DialOpts,
    crypto: Crypto,
) -> Result<Arc<Connection<TcpMessageStream>>> {
    let target: Address = address.parse()?;

    let socket = tokio::time::timeout(opts.timeout, TcpStream::connect(target.socket_addr()))
        .await
        .map_err(|_| Error::DialTimeout(opts.timeout))?
        .map_err(TransportError::from)?;

    let stream = TcpMessageStream::new(socket);
    let outcome = handshake::initiator(&stream, local, &crypto, &opts.handshake).await?;

    let connection = Arc::new(Connection::new(
        stream,
        outcome.peer_key,
        target,
        local.public_key,
        crypto,
        opts.connection,
    ));
    tracing::info!(
        peer = %connection.id().short(),
        address = %target,
        "dialed peer"
    );
    Ok(connection)
}

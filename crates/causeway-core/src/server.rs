//! Accepting peers.
//!
//! A [`Server`] owns the accept loop: every accepted socket gets its own
//! task that runs the responder handshake and, on success, hands the new
//! connection to the registered `on_connection` callback. Handshake
//! failures never produce a connection; they are reported to `on_error`.
//! The server itself holds no connection state - tracking live sessions is
//! the registry's job.

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::Mutex as StdMutex;

use causeway_crypto::Crypto;
use causeway_transport::{TcpMessageStream, TransportError};
use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;

use crate::config::ServerConfig;
use crate::connection::Connection;
use crate::error::{Error, Result};
use crate::handshake;
use crate::peer_info::HostInfo;

/// Invoked with each connection produced by a successful accept handshake.
pub type OnConnection = dyn Fn(Arc<Connection<TcpMessageStream>>) + Send + Sync;

/// Invoked with each accept-path failure.
pub type OnError = dyn Fn(Error) + Send + Sync;

struct ServerInner {
    local: HostInfo,
    crypto: Crypto,
    config: ServerConfig,
    on_connection: StdMutex<Option<Arc<OnConnection>>>,
    on_error: StdMutex<Option<Arc<OnError>>>,
    shutdown: CancellationToken,
}

/// Accepts streams, authenticates them, and emits connections.
#[derive(Clone)]
pub struct Server {
    inner: Arc<ServerInner>,
}

impl Server {
    /// A server with default handshake and connection configuration.
    #[must_use]
    pub fn new(local: HostInfo, crypto: Crypto) -> Self {
        Self::with_config(local, crypto, ServerConfig::default())
    }

    /// A server with explicit configuration.
    #[must_use]
    pub fn with_config(local: HostInfo, crypto: Crypto, config: ServerConfig) -> Self {
        Self {
            inner: Arc::new(ServerInner {
                local,
                crypto,
                config,
                on_connection: StdMutex::new(None),
                on_error: StdMutex::new(None),
                shutdown: CancellationToken::new(),
            }),
        }
    }

    /// Register the callback receiving authenticated connections.
    ///
    /// Register before [`listen`](Self::listen); connections accepted
    /// without a callback are closed and dropped.
    pub fn on_connection(
        &self,
        handler: impl Fn(Arc<Connection<TcpMessageStream>>) + Send + Sync + 'static,
    ) {
        *self
            .inner
            .on_connection
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(Arc::new(handler));
    }

    /// Register the callback receiving accept-path errors.
    pub fn on_error(&self, handler: impl Fn(Error) + Send + Sync + 'static) {
        *self
            .inner
            .on_error
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(Arc::new(handler));
    }

    /// Bind `address` and serve until [`stop`](Self::stop).
    ///
    /// # Errors
    ///
    /// [`Error::InvalidAddress`] for an unparseable address, or the bind
    /// failure as a transport error.
    pub async fn listen(&self, address: &str) -> Result<()> {
        let address: crate::address::Address = address.parse()?;
        let listener = TcpListener::bind(address.socket_addr())
            .await
            .map_err(TransportError::from)?;
        tracing::info!(%address, "listening");
        self.serve(listener).await
    }

    /// Serve an already-bound listener until [`stop`](Self::stop).
    ///
    /// # Errors
    ///
    /// Returns only on shutdown; individual accept failures are reported
    /// through `on_error` and do not end the loop.
    pub async fn serve(&self, listener: TcpListener) -> Result<()> {
        loop {
            tokio::select! {
                _ = self.inner.shutdown.cancelled() => {
                    tracing::info!("server stopped");
                    return Ok(());
                }
                accepted = listener.accept() => match accepted {
                    Ok((socket, remote)) => {
                        let server = self.clone();
                        tokio::spawn(async move {
                            server.handle_accept(socket, remote).await;
                        });
                    }
                    Err(err) => {
                        tracing::warn!("accept failed: {}", err);
                        self.report_error(Error::Transport(TransportError::from(err)));
                    }
                },
            }
        }
    }

    /// Stop the accept loop. Connections already emitted are unaffected.
    pub fn stop(&self) {
        self.inner.shutdown.cancel();
    }

    async fn handle_accept(&self, socket: TcpStream, remote: SocketAddr) {
        let stream = TcpMessageStream::new(socket);
        let outcome = handshake::responder(
            &stream,
            &self.inner.local,
            &self.inner.crypto,
            &self.inner.config.handshake,
        )
        .await;

        match outcome {
            Ok(outcome) => {
                let connection = Arc::new(Connection::new(
                    stream,
                    outcome.peer_key,
                    remote.into(),
                    self.inner.local.public_key,
                    self.inner.crypto.clone(),
                    self.inner.config.connection.clone(),
                ));
                tracing::info!(
                    peer = %connection.id().short(),
                    address = %remote,
                    "accepted peer"
                );

                let handler = self
                    .inner
                    .on_connection
                    .lock()
                    .unwrap_or_else(|poisoned| poisoned.into_inner())
                    .clone();
                match handler {
                    Some(handler) => handler(connection),
                    None => {
                        tracing::warn!("no connection handler registered, dropping peer");
                        connection.close().await;
                    }
                }
            }
            Err(error) => {
                tracing::warn!(address = %remote, "inbound handshake failed: {}", error);
                self.report_error(error);
            }
        }
    }

    fn report_error(&self, error: Error) {
        let handler = self
            .inner
            .on_error
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone();
        if let Some(handler) = handler {
            handler(error);
        }
    }
}

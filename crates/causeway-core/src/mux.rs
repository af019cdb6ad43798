//! Protocol-tag message dispatcher.
//!
//! The [`Mux`] maps protocol tags to handler functions and implements
//! [`RequestHandler`], so it plugs straight into a connection's dispatch
//! loop. Registration is permanent for the mux's lifetime; an envelope for
//! an unregistered tag is ignored, which lets nodes run with handler sets
//! that differ by version without erroring on every unknown message.

use std::sync::Arc;
use std::sync::Mutex as StdMutex;

use causeway_transport::MessageStream;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;

use crate::connection::Connection;
use crate::error::{Error, Result};
use crate::message::{HandlerFuture, Message, RequestHandler};

/// Handler invoked for every verified envelope carrying its protocol tag.
pub type HandlerFunc<S> = Box<dyn Fn(Message<S>) -> HandlerFuture + Send + Sync>;

/// Sink invoked when a connection's loop terminates abnormally.
pub type ErrorFunc<S> = Box<dyn Fn(Arc<Connection<S>>, Error) + Send + Sync>;

/// Protocol-name-keyed handler registry.
pub struct Mux<S: MessageStream> {
    handlers: DashMap<String, HandlerFunc<S>>,
    error_sink: StdMutex<Option<ErrorFunc<S>>>,
}

impl<S: MessageStream> Mux<S> {
    /// An empty mux.
    #[must_use]
    pub fn new() -> Self {
        Self {
            handlers: DashMap::new(),
            error_sink: StdMutex::new(None),
        }
    }

    /// Bind `handler` to `protocol`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ProtocolAlreadyRegistered`] if the tag is already
    /// bound; the existing handler stays in place.
    pub fn handle(
        &self,
        protocol: impl Into<String>,
        handler: impl Fn(Message<S>) -> HandlerFuture + Send + Sync + 'static,
    ) -> Result<()> {
        let protocol = protocol.into();
        match self.handlers.entry(protocol) {
            Entry::Occupied(occupied) => {
                Err(Error::ProtocolAlreadyRegistered(occupied.key().clone()))
            }
            Entry::Vacant(vacant) => {
                vacant.insert(Box::new(handler));
                Ok(())
            }
        }
    }

    /// Bind the single optional error sink.
    pub fn handle_error(
        &self,
        error_func: impl Fn(Arc<Connection<S>>, Error) + Send + Sync + 'static,
    ) {
        *self
            .error_sink
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(Box::new(error_func));
    }
}

impl<S: MessageStream> Default for Mux<S> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S: MessageStream> RequestHandler<S> for Mux<S> {
    fn serve_request(&self, message: Message<S>) -> HandlerFuture {
        match self.handlers.get(&message.envelope.protocol) {
            Some(handler) => handler.value()(message),
            None => {
                tracing::trace!(
                    protocol = %message.envelope.protocol,
                    "no handler registered, ignoring envelope"
                );
                Box::pin(async {})
            }
        }
    }

    fn serve_error(&self, connection: Arc<Connection<S>>, error: Error) {
        let sink = self
            .error_sink
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if let Some(sink) = sink.as_ref() {
            sink(connection, error);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use causeway_crypto::{Crypto, SigningKey};
    use causeway_transport::memory::{self, MemoryMessageStream};
    use causeway_transport::{Envelope, TransportError};
    use rand_core::OsRng;
    use tokio::sync::mpsc;

    use crate::config::ConnectionConfig;

    fn test_connection() -> Arc<Connection<MemoryMessageStream>> {
        let local = SigningKey::generate(&mut OsRng);
        let peer = SigningKey::generate(&mut OsRng).verifying_key();
        let (near, _far) = memory::pair();
        Arc::new(Connection::new(
            near,
            peer,
            "127.0.0.1:7846".parse().unwrap(),
            local.verifying_key(),
            Crypto::ed25519(local),
            ConnectionConfig::default(),
        ))
    }

    fn message_for(protocol: &str, payload: &[u8]) -> Message<MemoryMessageStream> {
        Message {
            envelope: Envelope {
                protocol: protocol.to_string(),
                payload: payload.to_vec(),
                ..Envelope::default()
            },
            data: payload.to_vec(),
            connection: test_connection(),
        }
    }

    #[tokio::test]
    async fn test_routes_to_registered_handler() {
        let mux = Mux::new();
        let (seen_tx, mut seen_rx) = mpsc::unbounded_channel();

        mux.handle("chat", move |message: Message<MemoryMessageStream>| {
            let seen_tx = seen_tx.clone();
            Box::pin(async move {
                let _ = seen_tx.send(message.data);
            })
        })
        .unwrap();

        mux.serve_request(message_for("chat", b"hello")).await;

        assert_eq!(seen_rx.recv().await.unwrap(), b"hello");
    }

    #[tokio::test]
    async fn test_handler_invoked_exactly_once_per_message() {
        let mux = Mux::new();
        let (seen_tx, mut seen_rx) = mpsc::unbounded_channel();

        mux.handle("chat", move |message: Message<MemoryMessageStream>| {
            let seen_tx = seen_tx.clone();
            Box::pin(async move {
                let _ = seen_tx.send(message.data);
            })
        })
        .unwrap();

        mux.serve_request(message_for("chat", b"one")).await;

        assert_eq!(seen_rx.recv().await.unwrap(), b"one");
        assert!(seen_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_unknown_protocol_is_ignored() {
        let mux: Mux<MemoryMessageStream> = Mux::new();
        // Must neither panic nor error.
        mux.serve_request(message_for("unknown", b"payload")).await;
    }

    #[test]
    fn test_duplicate_registration_rejected() {
        let mux: Mux<MemoryMessageStream> = Mux::new();

        mux.handle("sync", |_| Box::pin(async {})).unwrap();
        let err = mux.handle("sync", |_| Box::pin(async {})).unwrap_err();

        assert!(matches!(err, Error::ProtocolAlreadyRegistered(p) if p == "sync"));
    }

    #[test]
    fn test_error_sink_invoked() {
        let mux: Mux<MemoryMessageStream> = Mux::new();
        let (error_tx, mut error_rx) = mpsc::unbounded_channel();

        mux.handle_error(move |_connection, error| {
            let _ = error_tx.send(error);
        });

        mux.serve_error(
            test_connection(),
            Error::Transport(TransportError::Closed),
        );

        assert!(matches!(
            error_rx.try_recv(),
            Ok(Error::Transport(TransportError::Closed))
        ));
    }

    #[test]
    fn test_error_without_sink_is_noop() {
        let mux: Mux<MemoryMessageStream> = Mux::new();
        mux.serve_error(test_connection(), Error::Transport(TransportError::Closed));
    }
}

//! Dispatched messages and handler contracts.
//!
//! A [`Message`] is what the dispatch loop hands to the application: the
//! verified envelope, its payload bytes, and the originating connection so
//! the handler can respond in place. [`RequestHandler`] is the contract the
//! dispatch loop drives; the protocol mux implements it, and applications
//! can implement it directly when they want full control.

use std::pin::Pin;
use std::sync::Arc;

use causeway_transport::{Envelope, MessageStream};

use crate::connection::Connection;
use crate::error::Error;

/// Invoked once when a queued send is written to the stream.
pub type OnSuccess = Box<dyn FnOnce() + Send>;

/// Invoked once when a queued send fails to sign or write.
pub type OnError = Box<dyn FnOnce(Error) + Send>;

/// A queued outbound envelope and its completion callbacks.
pub(crate) struct Outbound {
    pub(crate) envelope: Envelope,
    pub(crate) on_success: Option<OnSuccess>,
    pub(crate) on_error: Option<OnError>,
}

/// Future returned by a request handler, awaited by the dispatch loop.
///
/// Dispatch within one connection is strictly serialized: the loop awaits
/// each handler future before verifying the next envelope.
pub type HandlerFuture = Pin<Box<dyn Future<Output = ()> + Send>>;

/// A verified inbound envelope, bound to the connection it arrived on.
pub struct Message<S: MessageStream> {
    /// The verified envelope
    pub envelope: Envelope,
    /// The envelope payload, the application message body
    pub data: Vec<u8>,
    /// The connection the envelope arrived on
    pub connection: Arc<Connection<S>>,
}

impl<S: MessageStream> Message<S> {
    /// Send a reply on the originating connection.
    pub async fn respond(
        &self,
        payload: Vec<u8>,
        protocol: &str,
        on_success: Option<OnSuccess>,
        on_error: Option<OnError>,
    ) {
        self.connection
            .send(payload, protocol, on_success, on_error)
            .await;
    }
}

/// Receives verified inbound messages and terminal connection errors.
pub trait RequestHandler<S: MessageStream>: Send + Sync {
    /// Handle one verified inbound message.
    fn serve_request(&self, message: Message<S>) -> HandlerFuture;

    /// Observe a connection's terminal error. Invoked at most once per
    /// connection, from its dispatch loop, just before `start()` returns
    /// the same error.
    fn serve_error(&self, connection: Arc<Connection<S>>, error: Error);
}

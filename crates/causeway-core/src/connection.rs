//! Connection lifecycle and concurrency core.
//!
//! A [`Connection`] exclusively owns one message stream and moves envelopes
//! in both directions until it is closed or the transport fails. Three
//! execution contexts cooperate per connection:
//!
//! ```text
//!                    +-------------+
//!   stream.recv ---> |  read task  | ---> inbound queue ----+
//!                    +-------------+      error signal --+  |
//!                                                        v  v
//!                    +--------------------------------------------+
//!   start() -------> |  dispatch loop (caller's task)             |
//!                    |  select { stop | error | inbound }         |
//!                    |  verify -> handler.serve_request (serial)  |
//!                    +--------------------------------------------+
//!                    +-------------+
//!   send() ........> | write task  | ---> stream.send, callbacks
//!    (sign+enqueue)  +-------------+
//! ```
//!
//! The read and write tasks are spawned by `start()`; the dispatch loop runs
//! in the caller's own task and is the only place verification and dispatch
//! happen, so at most one handler runs per connection at any time. Outbound
//! envelopes are signed and enqueued under a per-connection lock and written
//! in FIFO order by the single writer.

use std::sync::Mutex as StdMutex;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

use causeway_crypto::{Crypto, VerifyingKey};
use causeway_transport::{Envelope, EnvelopeKind, MessageStream};
use tokio::sync::{Mutex, mpsc};
use tokio_util::sync::CancellationToken;

use crate::address::Address;
use crate::config::{ConnectionConfig, VerifyPolicy};
use crate::error::{Error, Result};
use crate::id::ConnectionId;
use crate::message::{Message, OnError, OnSuccess, Outbound, RequestHandler};

const STATE_CREATED: u8 = 0;
const STATE_RUNNING: u8 = 1;
const STATE_CLOSED: u8 = 2;

/// Lifecycle state of a connection. Transitions only move forward:
/// `Created -> Running -> Closed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Constructed, not yet started
    Created,
    /// Background tasks and dispatch loop are live
    Running,
    /// Torn down; the stream has been closed exactly once
    Closed,
}

/// An authenticated, bidirectional session bound to one stream.
pub struct Connection<S: MessageStream> {
    id: ConnectionId,
    peer_key: VerifyingKey,
    address: Address,
    local_key_bytes: Vec<u8>,
    stream: Arc<S>,
    crypto: Crypto,
    config: ConnectionConfig,
    state: AtomicU8,
    cancel: CancellationToken,
    outbound_tx: mpsc::Sender<Outbound>,
    outbound_rx: StdMutex<Option<mpsc::Receiver<Outbound>>>,
    handler: StdMutex<Option<Arc<dyn RequestHandler<S>>>>,
    send_lock: Mutex<()>,
}

impl<S: MessageStream> std::fmt::Debug for Connection<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("peer_key", &self.peer_key)
            .field("address", &self.address)
            .field("state", &self.state.load(Ordering::Relaxed))
            .finish()
    }
}

impl<S: MessageStream> Connection<S> {
    /// Bind a connection to a stream and the peer identity produced by the
    /// handshake. The connection is `Created`; it moves no bytes until
    /// [`start`](Self::start) is called.
    #[must_use]
    pub fn new(
        stream: S,
        peer_key: VerifyingKey,
        address: Address,
        local_key: VerifyingKey,
        crypto: Crypto,
        config: ConnectionConfig,
    ) -> Self {
        let (outbound_tx, outbound_rx) = mpsc::channel(config.queue_capacity);
        Self {
            id: ConnectionId::from_public_key(&peer_key),
            peer_key,
            address,
            local_key_bytes: local_key.to_bytes().to_vec(),
            stream: Arc::new(stream),
            crypto,
            config,
            state: AtomicU8::new(STATE_CREATED),
            cancel: CancellationToken::new(),
            outbound_tx,
            outbound_rx: StdMutex::new(Some(outbound_rx)),
            handler: StdMutex::new(None),
            send_lock: Mutex::new(()),
        }
    }

    /// The peer's identity, derived from its public key.
    #[must_use]
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// The peer's public key as bound by the handshake.
    #[must_use]
    pub fn peer_key(&self) -> &VerifyingKey {
        &self.peer_key
    }

    /// The remote address: the dialed address on the dialing side, the
    /// socket's remote address on the accepting side.
    #[must_use]
    pub fn address(&self) -> &Address {
        &self.address
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        match self.state.load(Ordering::SeqCst) {
            STATE_CREATED => ConnectionState::Created,
            STATE_RUNNING => ConnectionState::Running,
            _ => ConnectionState::Closed,
        }
    }

    /// Bind the handler invoked for verified inbound envelopes.
    ///
    /// Normally bound once before `start()`; rebinding takes effect from the
    /// next dispatched envelope.
    pub fn handle(&self, handler: Arc<dyn RequestHandler<S>>) {
        *self
            .handler
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(handler);
    }

    fn handler(&self) -> Option<Arc<dyn RequestHandler<S>>> {
        self.handler
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// Sign `payload` and queue it for writing.
    ///
    /// Never blocks on the network; blocks only while the outbound queue is
    /// full. At most one of `on_success`/`on_error` is invoked, from the
    /// write task, once the write completes or fails. A signing failure or a
    /// closed connection fails this send through `on_error` without
    /// affecting the connection lifecycle.
    pub async fn send(
        &self,
        payload: Vec<u8>,
        protocol: &str,
        on_success: Option<OnSuccess>,
        on_error: Option<OnError>,
    ) {
        if self.state() == ConnectionState::Closed {
            if let Some(on_error) = on_error {
                on_error(Error::invalid_state("connection closed"));
            }
            return;
        }

        // Sign-and-enqueue is the one multi-writer section; the lock keeps
        // envelope order identical to send-call order.
        let _guard = self.send_lock.lock().await;

        let signature = match self.crypto.signer.sign(&payload) {
            Ok(signature) => signature,
            Err(err) => {
                tracing::warn!(peer = %self.id.short(), "failed to sign outgoing envelope: {}", err);
                if let Some(on_error) = on_error {
                    on_error(Error::Crypto(err));
                }
                return;
            }
        };

        let envelope = Envelope {
            protocol: protocol.to_string(),
            payload,
            signature: signature.to_vec(),
            public_key: self.local_key_bytes.clone(),
            kind: EnvelopeKind::Normal,
        };

        let outbound = Outbound {
            envelope,
            on_success,
            on_error,
        };
        if let Err(mpsc::error::SendError(rejected)) = self.outbound_tx.send(outbound).await {
            if let Some(on_error) = rejected.on_error {
                on_error(Error::invalid_state("connection closed"));
            }
        }
    }

    /// Run the connection until it is closed or the transport fails.
    ///
    /// Transitions `Created -> Running`, spawns the read and write tasks,
    /// and drives the dispatch loop in the calling task. Returns `Ok(())`
    /// after a clean [`close`](Self::close); returns the terminal error
    /// after a transport failure, invoking the bound handler's
    /// `serve_error` exactly once first.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidState`] if the connection was already started or
    /// closed; otherwise the terminal transport or verification error.
    pub async fn start(self: Arc<Self>) -> Result<()> {
        self.state
            .compare_exchange(
                STATE_CREATED,
                STATE_RUNNING,
                Ordering::SeqCst,
                Ordering::SeqCst,
            )
            .map_err(|actual| {
                if actual == STATE_CLOSED {
                    Error::invalid_state("connection closed")
                } else {
                    Error::invalid_state("connection already started")
                }
            })?;

        let outbound_rx = self
            .outbound_rx
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take()
            .ok_or(Error::invalid_state("connection already started"))?;

        let (inbound_tx, mut inbound_rx) = mpsc::channel(self.config.queue_capacity);
        let (error_tx, mut error_rx) = mpsc::channel(1);

        tokio::spawn(Self::read_loop(
            Arc::clone(&self.stream),
            inbound_tx,
            error_tx,
            self.cancel.clone(),
        ));
        tokio::spawn(Self::write_loop(
            Arc::clone(&self.stream),
            outbound_rx,
            self.cancel.clone(),
        ));

        tracing::debug!(peer = %self.id.short(), address = %self.address, "connection running");

        let result = loop {
            tokio::select! {
                _ = self.cancel.cancelled() => break Ok(()),
                received = error_rx.recv() => match received {
                    Some(error) => break Err(error),
                    None => break Ok(()),
                },
                received = inbound_rx.recv() => match received {
                    Some(envelope) => {
                        if let Err(error) = Self::dispatch(&self, envelope).await {
                            break Err(error);
                        }
                    }
                    None => {
                        // Read task is gone; surface its terminal error if
                        // it left one.
                        match error_rx.try_recv() {
                            Ok(error) => break Err(error),
                            Err(_) => break Ok(()),
                        }
                    }
                },
            }
        };

        match result {
            Ok(()) => {
                tracing::debug!(peer = %self.id.short(), "connection stopped");
                Ok(())
            }
            Err(error) => {
                tracing::warn!(peer = %self.id.short(), "connection failed: {}", error);
                if let Some(handler) = self.handler() {
                    handler.serve_error(Arc::clone(&self), error.clone());
                }
                Err(error)
            }
        }
    }

    /// Stop both loops and close the stream.
    ///
    /// Idempotent under concurrent callers: exactly one performs the
    /// teardown, the rest return immediately.
    pub async fn close(&self) {
        let previous = self.state.swap(STATE_CLOSED, Ordering::SeqCst);
        if previous == STATE_CLOSED {
            return;
        }
        self.cancel.cancel();
        self.stream.close().await;
        tracing::debug!(peer = %self.id.short(), "connection closed");
    }

    /// Verify one inbound envelope and hand it to the handler.
    async fn dispatch(this: &Arc<Self>, envelope: Envelope) -> Result<()> {
        let verified = match this.crypto.verifier.verify(
            &this.peer_key,
            &envelope.signature,
            &envelope.payload,
        ) {
            Ok(verified) => verified,
            Err(err) => {
                tracing::warn!(peer = %this.id.short(), "malformed signature on inbound envelope: {}", err);
                false
            }
        };

        if !verified {
            match this.config.verify_policy {
                VerifyPolicy::Drop => {
                    tracing::warn!(
                        peer = %this.id.short(),
                        protocol = %envelope.protocol,
                        "dropping envelope that failed verification"
                    );
                    return Ok(());
                }
                VerifyPolicy::Disconnect => {
                    this.close().await;
                    return Err(Error::SignatureVerification(this.id));
                }
            }
        }

        if let Some(handler) = this.handler() {
            let message = Message {
                data: envelope.payload.clone(),
                envelope,
                connection: Arc::clone(this),
            };
            handler.serve_request(message).await;
        }
        Ok(())
    }

    /// Pulls envelopes off the stream into the inbound queue. A transport
    /// error lands on the error signal unless the connection is already
    /// closing.
    async fn read_loop(
        stream: Arc<S>,
        inbound_tx: mpsc::Sender<Envelope>,
        error_tx: mpsc::Sender<Error>,
        cancel: CancellationToken,
    ) {
        loop {
            let received = tokio::select! {
                _ = cancel.cancelled() => return,
                received = stream.recv() => received,
            };
            match received {
                Ok(envelope) => {
                    if inbound_tx.send(envelope).await.is_err() {
                        return;
                    }
                }
                Err(err) => {
                    if !cancel.is_cancelled() {
                        let _ = error_tx.send(Error::Transport(err)).await;
                    }
                    return;
                }
            }
        }
    }

    /// Drains the outbound queue onto the stream in FIFO order, firing each
    /// envelope's completion callback. A failed write fails that envelope
    /// only; the read side surfaces the broken transport.
    async fn write_loop(
        stream: Arc<S>,
        mut outbound_rx: mpsc::Receiver<Outbound>,
        cancel: CancellationToken,
    ) {
        loop {
            let outbound = tokio::select! {
                _ = cancel.cancelled() => return,
                received = outbound_rx.recv() => match received {
                    Some(outbound) => outbound,
                    None => return,
                },
            };
            match stream.send(outbound.envelope).await {
                Ok(()) => {
                    if let Some(on_success) = outbound.on_success {
                        on_success();
                    }
                }
                Err(err) => {
                    if let Some(on_error) = outbound.on_error {
                        on_error(Error::Transport(err));
                    }
                }
            }
        }
    }
}

impl<S: MessageStream> Drop for Connection<S> {
    fn drop(&mut self) {
        // Belt-and-braces: wake any loop still parked on the token. The
        // stream itself is closed by `close()`, or by its own drop.
        self.cancel.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::HandlerFuture;
    use causeway_crypto::SigningKey;
    use causeway_transport::TransportError;
    use causeway_transport::memory::{self, MemoryMessageStream};
    use rand_core::OsRng;
    use std::sync::atomic::AtomicUsize;
    use tokio::sync::mpsc::UnboundedSender;

    async fn wait_until_running<S: MessageStream>(connection: &Connection<S>) {
        while connection.state() != ConnectionState::Running {
            tokio::task::yield_now().await;
        }
    }

    /// Counts close() calls to observe exactly-once teardown.
    struct CountingStream {
        inner: MemoryMessageStream,
        closes: Arc<AtomicUsize>,
    }

    impl MessageStream for CountingStream {
        async fn send(&self, envelope: Envelope) -> std::result::Result<(), TransportError> {
            self.inner.send(envelope).await
        }

        async fn recv(&self) -> std::result::Result<Envelope, TransportError> {
            self.inner.recv().await
        }

        async fn close(&self) {
            self.closes.fetch_add(1, Ordering::SeqCst);
            self.inner.close().await;
        }
    }

    /// Forwards every dispatched payload to a channel.
    struct Recorder {
        sink: UnboundedSender<Vec<u8>>,
        errors: UnboundedSender<Error>,
    }

    impl<S: MessageStream> RequestHandler<S> for Recorder {
        fn serve_request(&self, message: Message<S>) -> HandlerFuture {
            let _ = self.sink.send(message.data.clone());
            Box::pin(async {})
        }

        fn serve_error(&self, _connection: Arc<Connection<S>>, error: Error) {
            let _ = self.errors.send(error);
        }
    }

    struct Node {
        signing_key: SigningKey,
        crypto: Crypto,
    }

    fn node() -> Node {
        let signing_key = SigningKey::generate(&mut OsRng);
        let crypto = Crypto::ed25519(SigningKey::from_bytes(&signing_key.to_bytes()));
        Node {
            signing_key,
            crypto,
        }
    }

    fn connection_over<S: MessageStream>(
        stream: S,
        local: &Node,
        peer_key: VerifyingKey,
        config: ConnectionConfig,
    ) -> Arc<Connection<S>> {
        Arc::new(Connection::new(
            stream,
            peer_key,
            "127.0.0.1:7846".parse().unwrap(),
            local.signing_key.verifying_key(),
            local.crypto.clone(),
            config,
        ))
    }

    fn signed_envelope(from: &Node, protocol: &str, payload: &[u8]) -> Envelope {
        Envelope {
            protocol: protocol.to_string(),
            payload: payload.to_vec(),
            signature: from.signing_key.sign(payload).to_vec(),
            public_key: from.signing_key.verifying_key().to_bytes().to_vec(),
            kind: EnvelopeKind::Normal,
        }
    }

    #[tokio::test]
    async fn test_send_signs_and_writes_in_order() {
        let local = node();
        let remote = node();
        let (near, far) = memory::pair();
        let connection = connection_over(
            near,
            &local,
            remote.signing_key.verifying_key(),
            ConnectionConfig::default(),
        );

        let runner = tokio::spawn(Arc::clone(&connection).start());

        connection.send(b"m1".to_vec(), "echo", None, None).await;
        connection.send(b"m2".to_vec(), "echo", None, None).await;

        let first = far.recv().await.unwrap();
        let second = far.recv().await.unwrap();
        assert_eq!(first.payload, b"m1");
        assert_eq!(second.payload, b"m2");
        assert_eq!(first.protocol, "echo");
        assert_eq!(first.kind, EnvelopeKind::Normal);

        // Signature must verify against the sender's key.
        local
            .signing_key
            .verifying_key()
            .verify(
                &first.payload,
                &causeway_crypto::Signature::from_slice(&first.signature).unwrap(),
            )
            .unwrap();

        connection.close().await;
        assert!(runner.await.unwrap().is_ok());
    }

    #[tokio::test]
    async fn test_send_callbacks_fire_on_success() {
        let local = node();
        let remote = node();
        let (near, far) = memory::pair();
        let connection = connection_over(
            near,
            &local,
            remote.signing_key.verifying_key(),
            ConnectionConfig::default(),
        );
        let runner = tokio::spawn(Arc::clone(&connection).start());

        let (done_tx, mut done_rx) = mpsc::unbounded_channel();
        connection
            .send(
                b"ping".to_vec(),
                "echo",
                Some(Box::new(move || {
                    let _ = done_tx.send(());
                })),
                None,
            )
            .await;

        far.recv().await.unwrap();
        done_rx.recv().await.unwrap();

        connection.close().await;
        runner.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_verified_envelope_reaches_handler() {
        let local = node();
        let remote = node();
        let (near, far) = memory::pair();
        let connection = connection_over(
            near,
            &local,
            remote.signing_key.verifying_key(),
            ConnectionConfig::default(),
        );

        let (sink, mut received) = mpsc::unbounded_channel();
        let (errors, _error_rx) = mpsc::unbounded_channel();
        connection.handle(Arc::new(Recorder { sink, errors }));

        let runner = tokio::spawn(Arc::clone(&connection).start());

        far.send(signed_envelope(&remote, "chat", b"hello"))
            .await
            .unwrap();

        assert_eq!(received.recv().await.unwrap(), b"hello");

        connection.close().await;
        runner.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_bad_signature_dropped_by_default() {
        let local = node();
        let remote = node();
        let stranger = node();
        let (near, far) = memory::pair();
        let connection = connection_over(
            near,
            &local,
            remote.signing_key.verifying_key(),
            ConnectionConfig::default(),
        );

        let (sink, mut received) = mpsc::unbounded_channel();
        let (errors, _error_rx) = mpsc::unbounded_channel();
        connection.handle(Arc::new(Recorder { sink, errors }));

        let runner = tokio::spawn(Arc::clone(&connection).start());

        // Signed by the wrong key: silently dropped.
        far.send(signed_envelope(&stranger, "chat", b"forged"))
            .await
            .unwrap();
        // A good envelope afterwards still arrives, proving the loop lived.
        far.send(signed_envelope(&remote, "chat", b"genuine"))
            .await
            .unwrap();

        assert_eq!(received.recv().await.unwrap(), b"genuine");

        connection.close().await;
        runner.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_bad_signature_disconnects_under_strict_policy() {
        let local = node();
        let remote = node();
        let stranger = node();
        let (near, far) = memory::pair();
        let config = ConnectionConfig {
            verify_policy: VerifyPolicy::Disconnect,
            ..ConnectionConfig::default()
        };
        let connection = connection_over(near, &local, remote.signing_key.verifying_key(), config);

        let (sink, _received) = mpsc::unbounded_channel();
        let (errors, mut error_rx) = mpsc::unbounded_channel();
        connection.handle(Arc::new(Recorder { sink, errors }));

        let runner = tokio::spawn(Arc::clone(&connection).start());

        far.send(signed_envelope(&stranger, "chat", b"forged"))
            .await
            .unwrap();

        let result = runner.await.unwrap();
        assert!(matches!(result, Err(Error::SignatureVerification(_))));
        assert!(matches!(
            error_rx.recv().await,
            Some(Error::SignatureVerification(_))
        ));
        assert_eq!(connection.state(), ConnectionState::Closed);
    }

    #[tokio::test]
    async fn test_transport_failure_ends_start_and_serves_error() {
        let local = node();
        let remote = node();
        let (near, far) = memory::pair();
        let connection = connection_over(
            near,
            &local,
            remote.signing_key.verifying_key(),
            ConnectionConfig::default(),
        );

        let (sink, _received) = mpsc::unbounded_channel();
        let (errors, mut error_rx) = mpsc::unbounded_channel();
        connection.handle(Arc::new(Recorder { sink, errors }));

        let runner = tokio::spawn(Arc::clone(&connection).start());

        // Peer hangs up.
        far.close().await;

        let result = runner.await.unwrap();
        assert!(matches!(
            result,
            Err(Error::Transport(TransportError::Closed))
        ));
        assert!(matches!(
            error_rx.recv().await,
            Some(Error::Transport(TransportError::Closed))
        ));
    }

    #[tokio::test]
    async fn test_close_is_idempotent_and_closes_stream_once() {
        let local = node();
        let remote = node();
        let (near, _far) = memory::pair();
        let closes = Arc::new(AtomicUsize::new(0));
        let connection = connection_over(
            CountingStream {
                inner: near,
                closes: Arc::clone(&closes),
            },
            &local,
            remote.signing_key.verifying_key(),
            ConnectionConfig::default(),
        );

        let runner = tokio::spawn(Arc::clone(&connection).start());
        wait_until_running(&connection).await;

        let mut closers = Vec::new();
        for _ in 0..8 {
            let connection = Arc::clone(&connection);
            closers.push(tokio::spawn(async move { connection.close().await }));
        }
        for closer in closers {
            closer.await.unwrap();
        }

        assert_eq!(closes.load(Ordering::SeqCst), 1);
        assert_eq!(connection.state(), ConnectionState::Closed);
        assert!(runner.await.unwrap().is_ok());
    }

    #[tokio::test]
    async fn test_start_twice_is_invalid_state() {
        let local = node();
        let remote = node();
        let (near, _far) = memory::pair();
        let connection = connection_over(
            near,
            &local,
            remote.signing_key.verifying_key(),
            ConnectionConfig::default(),
        );

        let runner = tokio::spawn(Arc::clone(&connection).start());
        wait_until_running(&connection).await;

        let second = Arc::clone(&connection).start().await;
        assert!(matches!(second, Err(Error::InvalidState(_))));

        connection.close().await;
        runner.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_send_after_close_fails_via_callback() {
        let local = node();
        let remote = node();
        let (near, _far) = memory::pair();
        let connection = connection_over(
            near,
            &local,
            remote.signing_key.verifying_key(),
            ConnectionConfig::default(),
        );

        connection.close().await;

        let (failed_tx, mut failed_rx) = mpsc::unbounded_channel();
        connection
            .send(
                b"too late".to_vec(),
                "echo",
                None,
                Some(Box::new(move |err| {
                    let _ = failed_tx.send(err);
                })),
            )
            .await;

        assert!(matches!(
            failed_rx.recv().await,
            Some(Error::InvalidState(_))
        ));
    }

    #[tokio::test]
    async fn test_accessors() {
        let local = node();
        let remote = node();
        let (near, _far) = memory::pair();
        let peer_key = remote.signing_key.verifying_key();
        let connection =
            connection_over(near, &local, peer_key, ConnectionConfig::default());

        assert_eq!(connection.peer_key(), &peer_key);
        assert_eq!(connection.id(), ConnectionId::from_public_key(&peer_key));
        assert_eq!(connection.address().to_string(), "127.0.0.1:7846");
        assert_eq!(connection.state(), ConnectionState::Created);
    }
}

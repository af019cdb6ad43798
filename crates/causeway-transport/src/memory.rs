//! In-memory message stream pair.
//!
//! [`pair`] returns two streams wired back to back over bounded channels.
//! Handshake and connection tests run over these instead of sockets; the
//! semantics mirror [`TcpMessageStream`]: ordered delivery, and closing one
//! end surfaces [`TransportError::Closed`] to the other.
//!
//! [`TcpMessageStream`]: crate::tcp::TcpMessageStream

use std::sync::Mutex as StdMutex;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::{Mutex, mpsc};
use tokio_util::sync::CancellationToken;

use crate::envelope::Envelope;
use crate::error::{Result, TransportError};
use crate::stream::MessageStream;

/// Default channel capacity for a memory stream pair.
const DEFAULT_CAPACITY: usize = 64;

/// One end of an in-memory stream pair.
pub struct MemoryMessageStream {
    outgoing: StdMutex<Option<mpsc::Sender<Envelope>>>,
    incoming: Mutex<mpsc::Receiver<Envelope>>,
    closed: CancellationToken,
    close_started: AtomicBool,
}

/// Create two connected in-memory streams.
#[must_use]
pub fn pair() -> (MemoryMessageStream, MemoryMessageStream) {
    pair_with_capacity(DEFAULT_CAPACITY)
}

/// Create two connected in-memory streams with explicit channel capacity.
#[must_use]
pub fn pair_with_capacity(capacity: usize) -> (MemoryMessageStream, MemoryMessageStream) {
    let (a_to_b_tx, a_to_b_rx) = mpsc::channel(capacity);
    let (b_to_a_tx, b_to_a_rx) = mpsc::channel(capacity);

    let a = MemoryMessageStream {
        outgoing: StdMutex::new(Some(a_to_b_tx)),
        incoming: Mutex::new(b_to_a_rx),
        closed: CancellationToken::new(),
        close_started: AtomicBool::new(false),
    };
    let b = MemoryMessageStream {
        outgoing: StdMutex::new(Some(b_to_a_tx)),
        incoming: Mutex::new(a_to_b_rx),
        closed: CancellationToken::new(),
        close_started: AtomicBool::new(false),
    };
    (a, b)
}

impl MemoryMessageStream {
    fn sender(&self) -> Result<mpsc::Sender<Envelope>> {
        self.outgoing
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
            .ok_or(TransportError::Closed)
    }
}

impl MessageStream for MemoryMessageStream {
    async fn send(&self, envelope: Envelope) -> Result<()> {
        if self.closed.is_cancelled() {
            return Err(TransportError::Closed);
        }
        let sender = self.sender()?;
        sender
            .send(envelope)
            .await
            .map_err(|_| TransportError::Closed)
    }

    async fn recv(&self) -> Result<Envelope> {
        if self.closed.is_cancelled() {
            return Err(TransportError::Closed);
        }
        let mut incoming = self.incoming.lock().await;
        tokio::select! {
            _ = self.closed.cancelled() => Err(TransportError::Closed),
            received = incoming.recv() => received.ok_or(TransportError::Closed),
        }
    }

    async fn close(&self) {
        if self.close_started.swap(true, Ordering::SeqCst) {
            return;
        }
        self.closed.cancel();
        // Dropping the sender is the hangup signal the peer observes.
        self.outgoing
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
    }
}

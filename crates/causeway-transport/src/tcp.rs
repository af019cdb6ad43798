//! TCP-backed message stream.
//!
//! Wraps a connected [`TcpStream`] in the envelope framing codec. The socket
//! is split into owned halves, each behind its own async mutex, so the read
//! and write directions never contend with each other.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};

use bytes::BytesMut;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::Mutex;
use tokio_util::codec::{Decoder, Encoder};
use tokio_util::sync::CancellationToken;

use crate::codec::EnvelopeCodec;
use crate::envelope::Envelope;
use crate::error::{Result, TransportError};
use crate::stream::MessageStream;

struct ReadHalf {
    socket: OwnedReadHalf,
    buffer: BytesMut,
    codec: EnvelopeCodec,
}

struct WriteHalf {
    socket: OwnedWriteHalf,
    buffer: BytesMut,
    codec: EnvelopeCodec,
}

/// An envelope stream over a connected TCP socket.
pub struct TcpMessageStream {
    reader: Mutex<ReadHalf>,
    writer: Mutex<WriteHalf>,
    peer_addr: Option<SocketAddr>,
    closed: CancellationToken,
    close_started: AtomicBool,
}

impl TcpMessageStream {
    /// Wrap a connected socket.
    #[must_use]
    pub fn new(socket: TcpStream) -> Self {
        let peer_addr = socket.peer_addr().ok();
        let (read, write) = socket.into_split();
        Self {
            reader: Mutex::new(ReadHalf {
                socket: read,
                buffer: BytesMut::with_capacity(8 * 1024),
                codec: EnvelopeCodec::new(),
            }),
            writer: Mutex::new(WriteHalf {
                socket: write,
                buffer: BytesMut::new(),
                codec: EnvelopeCodec::new(),
            }),
            peer_addr,
            closed: CancellationToken::new(),
            close_started: AtomicBool::new(false),
        }
    }

    /// The remote address of the underlying socket, if it was still
    /// connected at wrap time.
    #[must_use]
    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.peer_addr
    }

    async fn recv_inner(&self) -> Result<Envelope> {
        let mut reader = self.reader.lock().await;
        let ReadHalf {
            socket,
            buffer,
            codec,
        } = &mut *reader;

        loop {
            if let Some(envelope) = codec.decode(buffer)? {
                return Ok(envelope);
            }

            let read = tokio::select! {
                _ = self.closed.cancelled() => return Err(TransportError::Closed),
                read = socket.read_buf(buffer) => read?,
            };
            if read == 0 {
                // Peer shut down its write side.
                return Err(TransportError::Closed);
            }
        }
    }
}

impl MessageStream for TcpMessageStream {
    async fn send(&self, envelope: Envelope) -> Result<()> {
        if self.closed.is_cancelled() {
            return Err(TransportError::Closed);
        }

        let mut writer = self.writer.lock().await;
        let WriteHalf {
            socket,
            buffer,
            codec,
        } = &mut *writer;

        buffer.clear();
        codec.encode(envelope, buffer)?;
        socket.write_all(buffer).await?;
        Ok(())
    }

    async fn recv(&self) -> Result<Envelope> {
        if self.closed.is_cancelled() {
            return Err(TransportError::Closed);
        }
        self.recv_inner().await
    }

    async fn close(&self) {
        if self.close_started.swap(true, Ordering::SeqCst) {
            return;
        }
        self.closed.cancel();

        let mut writer = self.writer.lock().await;
        if let Err(err) = writer.socket.shutdown().await {
            tracing::debug!("tcp shutdown after close: {}", err);
        }
    }
}

//! Length-prefixed envelope framing.
//!
//! Envelopes are framed on the wire as:
//! - 4 bytes: network magic
//! - 4 bytes: big-endian body length
//! - N bytes: bincode-serialized [`Envelope`]
//!
//! The length is validated against [`MAX_ENVELOPE_SIZE`] on both paths, so a
//! malicious peer cannot make the reader buffer an arbitrarily large frame.

use bytes::{Buf, BufMut, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::envelope::Envelope;
use crate::error::{Result, TransportError};

/// Network magic prefixing every frame.
pub const NETWORK_MAGIC: [u8; 4] = *b"CWY1";

/// Maximum serialized envelope size (4 MiB).
pub const MAX_ENVELOPE_SIZE: usize = 4 * 1024 * 1024;

/// Frame header size: magic + length.
const HEADER_SIZE: usize = 8;

/// Codec turning a byte stream into envelopes and back.
#[derive(Debug, Default)]
pub struct EnvelopeCodec {
    /// Body length parsed from the current header, if one has been read.
    pending_length: Option<usize>,
}

impl EnvelopeCodec {
    /// Create a new codec.
    #[must_use]
    pub fn new() -> Self {
        Self {
            pending_length: None,
        }
    }

    fn read_header(&mut self, src: &mut BytesMut) -> Result<Option<usize>> {
        if src.len() < HEADER_SIZE {
            return Ok(None);
        }

        let magic: [u8; 4] = src[0..4].try_into().expect("header slice is 4 bytes");
        if magic != NETWORK_MAGIC {
            return Err(TransportError::InvalidMagic {
                expected: NETWORK_MAGIC,
                actual: magic,
            });
        }

        let length = u32::from_be_bytes(src[4..8].try_into().expect("header slice is 4 bytes"));
        let length = length as usize;
        if length > MAX_ENVELOPE_SIZE {
            return Err(TransportError::FrameTooLarge {
                size: length,
                max: MAX_ENVELOPE_SIZE,
            });
        }

        Ok(Some(length))
    }
}

impl Decoder for EnvelopeCodec {
    type Item = Envelope;
    type Error = TransportError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Envelope>> {
        let length = match self.pending_length {
            Some(length) => length,
            None => match self.read_header(src)? {
                Some(length) => {
                    self.pending_length = Some(length);
                    length
                }
                None => return Ok(None),
            },
        };

        if src.len() < HEADER_SIZE + length {
            src.reserve(HEADER_SIZE + length - src.len());
            return Ok(None);
        }

        src.advance(HEADER_SIZE);
        let body = src.split_to(length);
        self.pending_length = None;

        let envelope = bincode::deserialize(&body)?;
        Ok(Some(envelope))
    }
}

impl Encoder<Envelope> for EnvelopeCodec {
    type Error = TransportError;

    fn encode(&mut self, envelope: Envelope, dst: &mut BytesMut) -> Result<()> {
        let body = bincode::serialize(&envelope)?;
        if body.len() > MAX_ENVELOPE_SIZE {
            return Err(TransportError::FrameTooLarge {
                size: body.len(),
                max: MAX_ENVELOPE_SIZE,
            });
        }

        dst.reserve(HEADER_SIZE + body.len());
        dst.put_slice(&NETWORK_MAGIC);
        dst.put_u32(body.len() as u32);
        dst.put_slice(&body);

        Ok(())
    }
}

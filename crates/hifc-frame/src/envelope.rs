use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::{FrameError, Result};
use crate::handler::SENSOR;

/// Envelope head: kind (2) + stream (2) + length (2) + handler (1) + reserved (1).
pub const ENVELOPE_HEADER_SIZE: usize = 8;

/// Largest payload the 16-bit length field can describe.
pub const MAX_ENVELOPE_PAYLOAD: usize = u16::MAX as usize;

/// Bytes of reconstructed timestamp appended to stream payloads.
pub const STREAM_TIMESTAMP_LEN: usize = 6;

/// Trailing status byte of stream payloads.
pub const STREAM_STATUS_LEN: usize = 1;

/// What an envelope carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EnvelopeKind {
    /// A burst of fixed-width samples from a stream channel.
    Stream = 0,
    /// A structured message read from a logical channel.
    Message = 1,
    /// An error report.
    Error = 2,
}

impl EnvelopeKind {
    pub fn from_u16(value: u16) -> Result<Self> {
        match value {
            0 => Ok(Self::Stream),
            1 => Ok(Self::Message),
            2 => Ok(Self::Error),
            other => Err(FrameError::InvalidKind(other)),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Stream => "stream",
            Self::Message => "message",
            Self::Error => "error",
        }
    }
}

/// A received unit handed to the dispatch registry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    pub kind: EnvelopeKind,
    /// Stream index for [`EnvelopeKind::Stream`]; zero otherwise.
    pub stream: u16,
    /// Handler id the envelope is routed by.
    pub handler: u8,
    pub payload: Bytes,
}

impl Envelope {
    /// A structured message; the handler tag is taken from the caller.
    pub fn message(handler: u8, payload: impl Into<Bytes>) -> Self {
        Self {
            kind: EnvelopeKind::Message,
            stream: 0,
            handler,
            payload: payload.into(),
        }
    }

    /// A stream burst, always routed to the sensor handler.
    pub fn stream(stream: u16, payload: impl Into<Bytes>) -> Self {
        Self {
            kind: EnvelopeKind::Stream,
            stream,
            handler: SENSOR,
            payload: payload.into(),
        }
    }

    pub fn error(handler: u8, payload: impl Into<Bytes>) -> Self {
        Self {
            kind: EnvelopeKind::Error,
            stream: 0,
            handler,
            payload: payload.into(),
        }
    }

    /// The total wire size of this envelope (head + payload).
    pub fn wire_size(&self) -> usize {
        ENVELOPE_HEADER_SIZE + self.payload.len()
    }

    /// View a stream payload as samples, timestamp and status.
    ///
    /// Returns `None` for non-stream envelopes or payloads shorter than the
    /// timestamp and status trailer.
    pub fn stream_samples(&self) -> Option<StreamSamples<'_>> {
        if self.kind != EnvelopeKind::Stream {
            return None;
        }
        let trailer = STREAM_TIMESTAMP_LEN + STREAM_STATUS_LEN;
        let len = self.payload.len().checked_sub(trailer)?;
        let mut ts = [0u8; 8];
        ts[..STREAM_TIMESTAMP_LEN].copy_from_slice(&self.payload[len..len + STREAM_TIMESTAMP_LEN]);
        Some(StreamSamples {
            stream: self.stream,
            samples: &self.payload[..len],
            timestamp: u64::from_le_bytes(ts),
            status: self.payload[len + STREAM_TIMESTAMP_LEN],
        })
    }
}

/// Borrowed view of a stream envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamSamples<'a> {
    pub stream: u16,
    pub samples: &'a [u8],
    pub timestamp: u64,
    pub status: u8,
}

/// Encode an envelope into its trace wire form.
///
/// Wire format (all little-endian):
/// ```text
/// ┌───────────┬────────────┬────────────┬───────────┬──────────┬─────────────┐
/// │ Kind (2B) │ Stream(2B) │ Length(2B) │ Handler   │ Reserved │ Payload     │
/// │           │            │            │ (1B)      │ (1B)     │ (Length)    │
/// └───────────┴────────────┴────────────┴───────────┴──────────┴─────────────┘
/// ```
pub fn encode_envelope(envelope: &Envelope, dst: &mut BytesMut) -> Result<()> {
    if envelope.payload.len() > MAX_ENVELOPE_PAYLOAD {
        return Err(FrameError::PayloadTooLarge {
            size: envelope.payload.len(),
            max: MAX_ENVELOPE_PAYLOAD,
        });
    }
    dst.reserve(envelope.wire_size());
    dst.put_u16_le(envelope.kind as u16);
    dst.put_u16_le(envelope.stream);
    dst.put_u16_le(envelope.payload.len() as u16);
    dst.put_u8(envelope.handler);
    dst.put_u8(0);
    dst.put_slice(&envelope.payload);
    Ok(())
}

/// Decode an envelope from a buffer.
///
/// Returns `Ok(None)` if the buffer doesn't contain a complete envelope yet.
/// On success, consumes the envelope bytes from the buffer.
pub fn decode_envelope(src: &mut BytesMut) -> Result<Option<Envelope>> {
    if src.len() < ENVELOPE_HEADER_SIZE {
        return Ok(None);
    }

    let kind = EnvelopeKind::from_u16(u16::from_le_bytes([src[0], src[1]]))?;
    let stream = u16::from_le_bytes([src[2], src[3]]);
    let payload_len = usize::from(u16::from_le_bytes([src[4], src[5]]));
    let handler = src[6];

    if src.len() < ENVELOPE_HEADER_SIZE + payload_len {
        return Ok(None);
    }

    src.advance(ENVELOPE_HEADER_SIZE);
    let payload = src.split_to(payload_len).freeze();

    Ok(Some(Envelope {
        kind,
        stream,
        handler,
        payload,
    }))
}

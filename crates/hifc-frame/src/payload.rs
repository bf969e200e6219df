use bytes::{BufMut, BytesMut};

use crate::error::{FrameError, Result};

/// Payload header: handler (1) + flags (1) + api (2) + size (2) + reserved (2).
pub const PAYLOAD_HEADER_SIZE: usize = 8;

/// More payload fragments follow.
pub const PAYLOAD_CONTINUES: u8 = 0x08;
/// Last payload fragment.
pub const PAYLOAD_FINAL: u8 = 0x04;
/// More request fragments follow.
pub const REQUEST_CONTINUES: u8 = 0x02;
/// Last request fragment.
pub const REQUEST_FINAL: u8 = 0x01;

/// Header at the front of every structured message payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PayloadHeader {
    pub handler: u8,
    pub flags: u8,
    pub api: u16,
    /// Size of the body following the header.
    pub size: u16,
}

impl PayloadHeader {
    pub fn new(handler: u8, api: u16, size: u16) -> Self {
        Self {
            handler,
            flags: 0,
            api,
            size,
        }
    }

    pub fn with_flags(mut self, flags: u8) -> Self {
        self.flags = flags;
        self
    }

    pub fn put(&self, dst: &mut BytesMut) {
        dst.reserve(PAYLOAD_HEADER_SIZE);
        dst.put_u8(self.handler);
        dst.put_u8(self.flags);
        dst.put_u16_le(self.api);
        dst.put_u16_le(self.size);
        dst.put_u16_le(0);
    }

    /// Parse the header from the start of `payload`.
    pub fn parse(payload: &[u8]) -> Result<Self> {
        if payload.len() < PAYLOAD_HEADER_SIZE {
            return Err(FrameError::Truncated {
                len: payload.len(),
                needed: PAYLOAD_HEADER_SIZE,
            });
        }
        Ok(Self {
            handler: payload[0],
            flags: payload[1],
            api: u16::from_le_bytes([payload[2], payload[3]]),
            size: u16::from_le_bytes([payload[4], payload[5]]),
        })
    }
}

/// Build `[header][body]` for a structured message.
pub fn build_message(handler: u8, api: u16, flags: u8, body: &[u8]) -> Result<BytesMut> {
    let size = u16::try_from(body.len()).map_err(|_| FrameError::PayloadTooLarge {
        size: body.len(),
        max: u16::MAX as usize,
    })?;
    let mut out = BytesMut::with_capacity(PAYLOAD_HEADER_SIZE + body.len());
    PayloadHeader::new(handler, api, size)
        .with_flags(flags)
        .put(&mut out);
    out.put_slice(body);
    Ok(out)
}

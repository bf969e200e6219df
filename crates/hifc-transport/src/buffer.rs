use bytes::{Bytes, BytesMut};

use crate::command::{CommandHeader, HeaderLayout};
use crate::error::{Result, TransportError};

/// Bytes reserved in front of every payload for the in-place wire header.
pub const HEADER_RESERVE: usize = 4;

/// Bytes reserved after every payload for tail dummies / turnaround clocks.
pub const TAIL_RESERVE: usize = 2;

const _: () = assert!(HeaderLayout::MAX_LEN <= HEADER_RESERVE);
const _: () = assert!(HeaderLayout::Bare.len() <= HEADER_RESERVE);
const _: () = assert!(HeaderLayout::Command.len() <= HEADER_RESERVE);
const _: () = assert!(HeaderLayout::Length.len() <= HEADER_RESERVE);
const _: () = assert!(HeaderLayout::Offset.len() <= HEADER_RESERVE);

/// A transaction buffer with a reserved header region.
///
/// ```text
/// ┌──────────────────┬─────────────────────┬───────────────┐
/// │ header reserve   │ payload             │ tail reserve  │
/// │ (4B)             │ (payload_len)       │ (2B)          │
/// └──────────────────┴─────────────────────┴───────────────┘
/// ```
///
/// The wire header is written right-aligned into the reserve so it directly
/// precedes the payload, and the whole frame goes out as one contiguous slice.
pub struct FramedBuffer {
    buf: BytesMut,
    payload_len: usize,
}

impl FramedBuffer {
    /// Build a buffer around an outbound payload. This is the only copy made.
    pub fn with_payload(payload: &[u8]) -> Self {
        let mut buf = BytesMut::zeroed(HEADER_RESERVE + payload.len() + TAIL_RESERVE);
        buf[HEADER_RESERVE..HEADER_RESERVE + payload.len()].copy_from_slice(payload);
        Self {
            buf,
            payload_len: payload.len(),
        }
    }

    /// Build a zeroed buffer able to receive `transfer_len` bytes.
    pub fn for_read(transfer_len: usize) -> Self {
        Self {
            buf: BytesMut::zeroed(HEADER_RESERVE + transfer_len + TAIL_RESERVE),
            payload_len: transfer_len,
        }
    }

    /// Length of the payload region.
    pub fn payload_len(&self) -> usize {
        self.payload_len
    }

    /// Total bytes including both reserves.
    pub fn total_len(&self) -> usize {
        self.buf.len()
    }

    pub fn header_region(&self) -> &[u8] {
        &self.buf[..HEADER_RESERVE]
    }

    pub fn header_region_mut(&mut self) -> &mut [u8] {
        &mut self.buf[..HEADER_RESERVE]
    }

    pub fn payload_region(&self) -> &[u8] {
        &self.buf[HEADER_RESERVE..HEADER_RESERVE + self.payload_len]
    }

    pub fn payload_region_mut(&mut self) -> &mut [u8] {
        &mut self.buf[HEADER_RESERVE..HEADER_RESERVE + self.payload_len]
    }

    /// Write `header` so that it ends exactly where the payload begins.
    ///
    /// Returns the index of the first header byte.
    pub fn place_header(&mut self, header: &CommandHeader) -> Result<usize> {
        let start = HEADER_RESERVE - header.layout().len();
        header.write_to(&mut self.buf[start..HEADER_RESERVE])?;
        Ok(start)
    }

    /// Borrow `start..end` of the whole buffer.
    pub fn span(&self, start: usize, end: usize) -> Result<&[u8]> {
        self.check_span(start, end)?;
        Ok(&self.buf[start..end])
    }

    /// Mutably borrow `start..end` of the whole buffer.
    pub fn span_mut(&mut self, start: usize, end: usize) -> Result<&mut [u8]> {
        self.check_span(start, end)?;
        Ok(&mut self.buf[start..end])
    }

    /// Borrow `len` received bytes starting at absolute `offset`.
    pub fn received(&self, offset: usize, len: usize) -> Result<&[u8]> {
        self.span(offset, offset + len)
    }

    /// Consume the buffer, keeping only `len` received bytes at `offset`.
    pub fn into_received(mut self, offset: usize, len: usize) -> Result<Bytes> {
        self.check_span(offset, offset + len)?;
        let mut data = self.buf.split_off(offset);
        data.truncate(len);
        Ok(data.freeze())
    }

    fn check_span(&self, start: usize, end: usize) -> Result<()> {
        if start > end || end > self.buf.len() {
            return Err(TransportError::BufferTooSmall {
                capacity: self.buf.len(),
                needed: end,
            });
        }
        Ok(())
    }
}

impl std::fmt::Debug for FramedBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FramedBuffer")
            .field("payload_len", &self.payload_len)
            .field("total_len", &self.buf.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::{LockFlag, RD_PENDING_EVENTS, VRW_CHANNEL_0, VRW_OFFSET_CHANNEL_0};

    #[test]
    fn payload_sits_after_header_reserve() {
        let buf = FramedBuffer::with_payload(b"abc");
        assert_eq!(buf.total_len(), HEADER_RESERVE + 3 + TAIL_RESERVE);
        assert_eq!(buf.payload_region(), b"abc");
        assert_eq!(buf.header_region(), &[0, 0, 0, 0]);
    }

    #[test]
    fn header_is_right_aligned_against_payload() {
        let mut buf = FramedBuffer::with_payload(&[0xAA; 5]);
        let header = CommandHeader::new(VRW_CHANNEL_0 + 2, 5, 0, LockFlag::Unlock).unwrap();
        let start = buf.place_header(&header).unwrap();

        assert_eq!(start, 1);
        assert_eq!(buf.span(start, HEADER_RESERVE + 1).unwrap(), &[0xA2, 5, 0, 0xAA]);
    }

    #[test]
    fn offset_header_fills_entire_reserve() {
        let mut buf = FramedBuffer::with_payload(&[1; 256]);
        let header =
            CommandHeader::new(VRW_OFFSET_CHANNEL_0 + 3, 256, 1, LockFlag::Lock).unwrap();
        let start = buf.place_header(&header).unwrap();

        assert_eq!(start, 0);
        assert_eq!(buf.header_region(), &[0xC3, 1, 0x00, 0x41]);
    }

    #[test]
    fn single_byte_header_leaves_leading_reserve_untouched() {
        let mut buf = FramedBuffer::for_read(8);
        let header = CommandHeader::new(RD_PENDING_EVENTS, 8, 0, LockFlag::Unlock).unwrap();
        let start = buf.place_header(&header).unwrap();

        assert_eq!(start, 3);
        assert_eq!(buf.header_region(), &[0, 0, 0, RD_PENDING_EVENTS]);
    }

    #[test]
    fn received_bounds_checked() {
        let buf = FramedBuffer::for_read(4);
        assert!(buf.received(HEADER_RESERVE, 4).is_ok());
        let err = buf.received(HEADER_RESERVE + 1, 16).unwrap_err();
        assert!(matches!(err, TransportError::BufferTooSmall { .. }));
    }

    #[test]
    fn into_received_keeps_only_data() {
        let mut buf = FramedBuffer::for_read(4);
        buf.payload_region_mut().copy_from_slice(&[9, 8, 7, 6]);
        let data = buf.into_received(HEADER_RESERVE + 1, 2).unwrap();
        assert_eq!(data.as_ref(), &[8, 7]);
    }
}

//! Command opcodes and wire-format classification.
//!
//! Every bus transaction starts with a one-byte opcode. The numeric range of
//! the opcode selects the header layout that follows it:
//!
//! ```text
//! Command  ┌────────┐
//!          │ opcode │
//!          └────────┘
//! Length   ┌────────┬────────┬──────────────────┐
//!          │ opcode │ len_lo │ flag:2 | len_hi:6 │
//!          └────────┴────────┴──────────────────┘
//! Offset   ┌────────┬────────┬────────┬──────────────────┐
//!          │ opcode │ offset │ len_lo │ flag:2 | len_hi:6 │
//!          └────────┴────────┴────────┴──────────────────┘
//! ```

use crate::error::{Result, TransportError};

/// No-op read, used to wake the controller.
pub const NOP: u8 = 0x00;
/// Read the 64-bit pending-event bitmap.
pub const RD_PENDING_EVENTS: u8 = 0x09;
/// Read the 2-byte length of logical read buffer 0.
pub const RD_MESSAGE_LEN_0: u8 = 0x10;
/// Read the 2-byte length of logical read buffer 1.
pub const RD_MESSAGE_LEN_1: u8 = 0x11;
/// Read the streamed-sample descriptor of stream 0. Streams 1..=21 follow.
pub const RD_STREAM_DESC_0: u8 = 0x30;
/// Highest fixed-read opcode.
pub const RD_STREAM_DESC_21: u8 = 0x45;

/// Put the controller to sleep.
pub const WT_SLEEP: u8 = 0x50;
/// Mask 32 bits of the pending-event register.
pub const WT_MASK_32: u8 = 0x53;
/// Mask all 64 bits of the pending-event register.
pub const WT_MASK_64: u8 = 0x55;
/// Unmask 32 bits of the pending-event register.
pub const WT_UNMASK_32: u8 = 0x57;
/// Unmask all 64 bits of the pending-event register.
pub const WT_UNMASK_64: u8 = 0x59;
/// Clear a latched 16-bit status word.
pub const WT_CLEAR_16: u8 = 0x5A;
/// Highest fixed-write opcode.
pub const WT_STREAM_21: u8 = 0x75;

/// Fixed read-write access to logical channel 0. Channels 1..=31 follow.
pub const RW_CHANNEL_0: u8 = 0x80;
/// Variable read-write access to logical channel 0 (no address offset).
pub const VRW_CHANNEL_0: u8 = 0xA0;
/// Variable read-write access to logical channel 0 with an address offset.
pub const VRW_OFFSET_CHANNEL_0: u8 = 0xC0;
/// Variable streaming read of stream 0. Streams 1..=21 follow.
pub const VRD_STREAM_0: u8 = 0xE0;
/// Highest variable streaming-read opcode.
pub const VRD_STREAM_21: u8 = 0xF5;

/// Largest value the 14-bit length field can carry.
pub const MAX_COMMAND_LEN: usize = 0x3FFF;

/// Wire-layout variant selected by an opcode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CommandFormat {
    /// Write with the opcode as sole header.
    FixedWrite1,
    /// Write with an opcode + length header.
    FixedWrite2,
    /// Write with an opcode + offset + length header.
    FixedWrite3,
    /// Bare opcode read.
    FixedRead0,
    /// Read with the opcode as sole header.
    FixedRead1,
    /// Fixed-size read-write on a logical channel.
    FixedReadWrite1,
    /// Variable read-write on a logical channel.
    VariableReadWrite2,
    /// Variable read-write on a logical channel with address offset.
    VariableReadWrite3,
    /// Variable-length read of a stream channel.
    VariableStreamRead,
    /// The opcode is not assigned.
    Unsupported,
}

impl CommandFormat {
    /// Classify an opcode. Total over `u8`; unknown values map to [`CommandFormat::Unsupported`].
    pub const fn classify(opcode: u8) -> Self {
        match opcode {
            NOP => Self::FixedRead0,
            0x01..=RD_STREAM_DESC_21 => Self::FixedRead1,
            WT_SLEEP..=WT_STREAM_21 => Self::FixedWrite1,
            RW_CHANNEL_0..=0x9F => Self::FixedReadWrite1,
            VRW_CHANNEL_0..=0xBF => Self::VariableReadWrite2,
            VRW_OFFSET_CHANNEL_0..=0xDF => Self::VariableReadWrite3,
            VRD_STREAM_0..=VRD_STREAM_21 => Self::VariableStreamRead,
            _ => Self::Unsupported,
        }
    }

    /// Header layout used on the wire, or `None` when unsupported.
    pub const fn layout(self) -> Option<HeaderLayout> {
        match self {
            Self::FixedRead0 => Some(HeaderLayout::Bare),
            Self::FixedWrite1 | Self::FixedRead1 | Self::FixedReadWrite1 => {
                Some(HeaderLayout::Command)
            }
            Self::FixedWrite2 | Self::VariableReadWrite2 | Self::VariableStreamRead => {
                Some(HeaderLayout::Length)
            }
            Self::FixedWrite3 | Self::VariableReadWrite3 => Some(HeaderLayout::Offset),
            Self::Unsupported => None,
        }
    }

    pub const fn is_supported(self) -> bool {
        !matches!(self, Self::Unsupported)
    }
}

/// Header field arrangement in front of the payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HeaderLayout {
    /// Opcode only; the controller returns no payload.
    Bare,
    /// Opcode only.
    Command,
    /// Opcode, 14-bit length and lock flag.
    Length,
    /// Opcode, address offset, 14-bit length and lock flag.
    Offset,
}

impl HeaderLayout {
    /// Header size in bytes.
    pub const fn len(self) -> usize {
        match self {
            Self::Bare | Self::Command => 1,
            Self::Length => 3,
            Self::Offset => 4,
        }
    }

    /// The largest header any layout produces.
    pub const MAX_LEN: usize = Self::Offset.len();
}

/// Continuation flag carried in the top two bits of the length field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum LockFlag {
    /// Final transaction of a logical transfer.
    #[default]
    Unlock = 0,
    /// More data follows on the same channel slot.
    Lock = 1,
}

impl LockFlag {
    pub const fn from_bits(bits: u8) -> Self {
        if bits & 0b11 == 0 {
            Self::Unlock
        } else {
            Self::Lock
        }
    }

    pub const fn bits(self) -> u8 {
        self as u8
    }
}

/// Encode the two length/flag bytes: `[len_lo, flag:2 | len_hi:6]`.
pub fn encode_length(len: usize, flag: LockFlag) -> Result<[u8; 2]> {
    if len > MAX_COMMAND_LEN {
        return Err(TransportError::LengthOverflow {
            len,
            max: MAX_COMMAND_LEN,
        });
    }
    Ok([
        (len & 0xFF) as u8,
        ((flag.bits() & 0b11) << 6) | ((len >> 8) & 0x3F) as u8,
    ])
}

/// Decode `[len_lo, flag:2 | len_hi:6]` back into a length and flag.
pub fn decode_length(bytes: [u8; 2]) -> (usize, LockFlag) {
    let len = usize::from(bytes[0]) | (usize::from(bytes[1] & 0x3F) << 8);
    (len, LockFlag::from_bits(bytes[1] >> 6))
}

/// A fully described command header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommandHeader {
    pub opcode: u8,
    pub format: CommandFormat,
    pub offset: u8,
    pub len: usize,
    pub flag: LockFlag,
}

impl CommandHeader {
    /// Describe a command, classifying its opcode.
    pub fn new(opcode: u8, len: usize, offset: u8, flag: LockFlag) -> Result<Self> {
        let format = CommandFormat::classify(opcode);
        if !format.is_supported() {
            return Err(TransportError::UnsupportedCommand(opcode));
        }
        if len > MAX_COMMAND_LEN {
            return Err(TransportError::LengthOverflow {
                len,
                max: MAX_COMMAND_LEN,
            });
        }
        Ok(Self {
            opcode,
            format,
            offset,
            len,
            flag,
        })
    }

    pub fn layout(&self) -> HeaderLayout {
        // `new` and `parse` reject unsupported opcodes.
        self.format.layout().unwrap_or(HeaderLayout::Command)
    }

    /// Write the header into `dst`, which must be exactly `layout().len()` bytes.
    pub fn write_to(&self, dst: &mut [u8]) -> Result<()> {
        let layout = self.layout();
        if dst.len() != layout.len() {
            return Err(TransportError::BufferTooSmall {
                capacity: dst.len(),
                needed: layout.len(),
            });
        }
        dst[0] = self.opcode;
        match layout {
            HeaderLayout::Bare | HeaderLayout::Command => {}
            HeaderLayout::Length => {
                dst[1..3].copy_from_slice(&encode_length(self.len, self.flag)?);
            }
            HeaderLayout::Offset => {
                dst[1] = self.offset;
                dst[2..4].copy_from_slice(&encode_length(self.len, self.flag)?);
            }
        }
        Ok(())
    }

    /// Encode the header into a fresh byte vector.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let mut out = vec![0u8; self.layout().len()];
        self.write_to(&mut out)?;
        Ok(out)
    }

    /// Decode a header from wire bytes, classifying the leading opcode.
    ///
    /// Fields the layout does not carry decode as zero / [`LockFlag::Unlock`].
    pub fn parse(wire: &[u8]) -> Result<Self> {
        let opcode = *wire
            .first()
            .ok_or(TransportError::MalformedHeader("empty header"))?;
        let format = CommandFormat::classify(opcode);
        let layout = format
            .layout()
            .ok_or(TransportError::UnsupportedCommand(opcode))?;
        if wire.len() < layout.len() {
            return Err(TransportError::MalformedHeader("truncated header"));
        }
        let (offset, len, flag) = match layout {
            HeaderLayout::Bare | HeaderLayout::Command => (0, 0, LockFlag::Unlock),
            HeaderLayout::Length => {
                let (len, flag) = decode_length([wire[1], wire[2]]);
                (0, len, flag)
            }
            HeaderLayout::Offset => {
                let (len, flag) = decode_length([wire[2], wire[3]]);
                (wire[1], len, flag)
            }
        };
        Ok(Self {
            opcode,
            format,
            offset,
            len,
            flag,
        })
    }
}

//! Double-buffered channel arbitration.
//!
//! The controller exposes two read buffers and two write buffers. Successive
//! selections in each direction alternate strictly between them, regardless
//! of which caller performs the selection.

use hifc_transport::command::{RD_MESSAGE_LEN_0, VRW_CHANNEL_0, VRW_OFFSET_CHANNEL_0};
use serde::Serialize;

/// Logical channel of read buffer 0. Read buffer 1 is the next channel.
const READ_CHANNEL_BASE: u8 = 0;
/// Logical channel of write buffer 0. Write buffer 1 is the next channel.
const WRITE_CHANNEL_BASE: u8 = 2;

/// One of the two buffers in a direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum BufferSlot {
    Zero,
    One,
}

impl BufferSlot {
    /// The other slot.
    pub const fn next(self) -> Self {
        match self {
            Self::Zero => Self::One,
            Self::One => Self::Zero,
        }
    }

    pub const fn index(self) -> u8 {
        match self {
            Self::Zero => 0,
            Self::One => 1,
        }
    }

    /// Opcode reading the 2-byte length of this read buffer.
    pub const fn length_opcode(self) -> u8 {
        RD_MESSAGE_LEN_0 + self.index()
    }

    /// Opcode reading the contents of this read buffer.
    pub const fn read_opcode(self) -> u8 {
        VRW_CHANNEL_0 + READ_CHANNEL_BASE + self.index()
    }

    /// Logical channel backing this write buffer.
    pub const fn write_channel(self) -> u8 {
        WRITE_CHANNEL_BASE + self.index()
    }

    /// Opcode writing this buffer without an address offset.
    pub const fn write_opcode(self) -> u8 {
        VRW_CHANNEL_0 + self.write_channel()
    }

    /// Opcode writing this buffer at an address offset.
    pub const fn write_offset_opcode(self) -> u8 {
        VRW_OFFSET_CHANNEL_0 + self.write_channel()
    }
}

/// Selector state for both directions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelArbiter {
    read: BufferSlot,
    write: BufferSlot,
}

impl ChannelArbiter {
    pub const fn new() -> Self {
        Self {
            read: BufferSlot::Zero,
            write: BufferSlot::Zero,
        }
    }

    /// Take the next read buffer. Never blocks.
    pub fn select_read(&mut self) -> BufferSlot {
        let slot = self.read;
        self.read = slot.next();
        slot
    }

    /// Take the next write buffer. Never blocks.
    pub fn select_write(&mut self) -> BufferSlot {
        let slot = self.write;
        self.write = slot.next();
        slot
    }

    /// Return both directions to their initial selection.
    pub fn reset(&mut self) {
        *self = Self::new();
    }

    /// The slots the next selections will return, as `(read, write)`.
    pub fn peek(&self) -> (BufferSlot, BufferSlot) {
        (self.read, self.write)
    }
}

impl Default for ChannelArbiter {
    fn default() -> Self {
        Self::new()
    }
}

//! Segmented sends over the write channels.
//!
//! Payloads longer than one bus transaction are split into chunks. Every
//! chunk but the last is sent with [`LockFlag::Lock`] so the controller keeps
//! the write buffer assembled until the final [`LockFlag::Unlock`] chunk.

use std::ops::Range;

use hifc_transport::{Bus, FramedBuffer, LockFlag};
use tracing::{debug, trace};

use crate::arbiter::BufferSlot;
use crate::error::{EngineError, Result};

/// Largest payload carried by one write transaction.
pub const MAX_CHUNK: usize = 256;

/// Chunk offsets travel as one byte counting [`MAX_CHUNK`] pages.
pub const MAX_CHUNKS: usize = 256;

/// Largest payload one logical send can carry.
pub const MAX_MESSAGE: usize = MAX_CHUNK * MAX_CHUNKS;

/// One transaction of a logical send.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Chunk {
    /// Byte offset into the logical payload.
    pub offset: usize,
    pub len: usize,
    pub flag: LockFlag,
}

impl Chunk {
    pub fn range(&self) -> Range<usize> {
        self.offset..self.offset + self.len
    }

    pub fn is_final(&self) -> bool {
        self.flag == LockFlag::Unlock
    }

    /// Offset byte carried in the command header.
    pub fn wire_offset(&self) -> u8 {
        // Bounded by MAX_CHUNKS in plan_chunks.
        (self.offset / MAX_CHUNK) as u8
    }

    /// Write opcode for this chunk on `slot`.
    ///
    /// A chunk that is both first and final needs no address offset.
    pub fn opcode(&self, slot: BufferSlot) -> u8 {
        if self.offset == 0 && self.is_final() {
            slot.write_opcode()
        } else {
            slot.write_offset_opcode()
        }
    }
}

/// Split a payload of `len` bytes into transaction-sized chunks.
pub fn plan_chunks(len: usize) -> Result<Vec<Chunk>> {
    if len > MAX_MESSAGE {
        return Err(EngineError::MessageTooLarge {
            size: len,
            max: MAX_MESSAGE,
        });
    }
    if len == 0 {
        return Ok(vec![Chunk {
            offset: 0,
            len: 0,
            flag: LockFlag::Unlock,
        }]);
    }

    let mut chunks = Vec::with_capacity(len.div_ceil(MAX_CHUNK));
    let mut offset = 0;
    while offset < len {
        let remaining = len - offset;
        let (chunk_len, flag) = if remaining > MAX_CHUNK {
            (MAX_CHUNK, LockFlag::Lock)
        } else {
            (remaining, LockFlag::Unlock)
        };
        chunks.push(Chunk {
            offset,
            len: chunk_len,
            flag,
        });
        offset += chunk_len;
    }
    Ok(chunks)
}

/// Write one chunk of `payload` to `slot`.
pub fn send_chunk(bus: &mut dyn Bus, slot: BufferSlot, chunk: Chunk, payload: &[u8]) -> Result<()> {
    let opcode = chunk.opcode(slot);
    let mut buf = FramedBuffer::with_payload(&payload[chunk.range()]);
    debug!(
        opcode,
        slot = slot.index(),
        offset = chunk.offset,
        len = chunk.len,
        last = chunk.is_final(),
        "sending chunk"
    );
    trace!(chunk = ?&payload[chunk.range()], "chunk payload");
    bus.send_command(opcode, &mut buf, chunk.wire_offset(), chunk.flag)?;
    Ok(())
}

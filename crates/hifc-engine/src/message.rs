//! Structured message reads from the double-buffered read channels.

use hifc_frame::Envelope;
use hifc_transport::{Bus, FramedBuffer, LockFlag};
use tracing::{debug, trace, warn};

use crate::arbiter::BufferSlot;
use crate::error::Result;

const LENGTH_FIELD_LEN: usize = 2;

/// Read the 2-byte message length of a read buffer.
pub fn read_message_len(bus: &mut dyn Bus, slot: BufferSlot) -> Result<usize> {
    let mut buf = FramedBuffer::for_read(LENGTH_FIELD_LEN);
    let offset = bus.recv_command(
        slot.length_opcode(),
        &mut buf,
        LENGTH_FIELD_LEN,
        0,
        LockFlag::Unlock,
        LENGTH_FIELD_LEN,
    )?;
    let bytes = buf.received(offset, LENGTH_FIELD_LEN)?;
    Ok(usize::from(u16::from_le_bytes([bytes[0], bytes[1]])))
}

/// Read the message waiting in `slot`.
///
/// The envelope's handler tag is the first payload byte. Returns `None` when
/// the controller reports an empty buffer.
pub fn read_message(bus: &mut dyn Bus, slot: BufferSlot) -> Result<Option<Envelope>> {
    let len = read_message_len(bus, slot)?;
    if len == 0 {
        warn!(slot = slot.index(), "read buffer reported zero length, dropping");
        return Ok(None);
    }

    let mut buf = FramedBuffer::for_read(len);
    let offset = bus.recv_command(slot.read_opcode(), &mut buf, len, 0, LockFlag::Unlock, len)?;
    let payload = buf.into_received(offset, len)?;
    let handler = payload[0];

    debug!(slot = slot.index(), len, handler, "message received");
    trace!(payload = ?payload, "message payload");
    Ok(Some(Envelope::message(handler, payload)))
}

#[cfg(test)]
mod tests {
    use hifc_frame::{EnvelopeKind, RTC};

    use super::*;
    use crate::testing::FakeBus;

    #[test]
    fn length_then_payload_from_selected_slot() {
        let (mut bus, handle) = FakeBus::new();
        handle.respond(0x11, 5u16.to_le_bytes());
        handle.respond(0xA1, vec![RTC, 1, 2, 3, 4]);

        let envelope = read_message(&mut bus, BufferSlot::One).unwrap().unwrap();
        assert_eq!(envelope.kind, EnvelopeKind::Message);
        assert_eq!(envelope.handler, RTC);
        assert_eq!(envelope.payload.as_ref(), &[RTC, 1, 2, 3, 4]);

        let reads = handle.received();
        assert_eq!(
            reads.iter().map(|r| r.opcode).collect::<Vec<_>>(),
            vec![0x11, 0xA1]
        );
        assert_eq!((reads[1].len, reads[1].transfer_len), (5, 5));
    }

    #[test]
    fn zero_length_is_dropped() {
        let (mut bus, handle) = FakeBus::new();
        handle.respond(0x10, [0u8, 0]);

        assert!(read_message(&mut bus, BufferSlot::Zero).unwrap().is_none());
        assert_eq!(handle.received().len(), 1);
    }

    #[test]
    fn transport_failure_is_returned() {
        let (mut bus, handle) = FakeBus::new();
        handle.fail(0x10);
        assert!(read_message(&mut bus, BufferSlot::Zero).is_err());
    }
}

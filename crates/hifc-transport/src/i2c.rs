use std::sync::Arc;

use tracing::{debug, trace};

use crate::buffer::{FramedBuffer, HEADER_RESERVE};
use crate::command::{CommandHeader, LockFlag};
use crate::error::{Result, TransportError};
use crate::traits::{Bus, I2cDevice, InterruptLine};

/// Dummy bytes clocked after a write payload.
pub const I2C_WRITE_TAIL: usize = 1;

/// Status bytes the controller sends ahead of read data.
pub const I2C_READ_LEAD: usize = 1;

/// I2C adapter configuration.
#[derive(Debug, Clone)]
pub struct I2cConfig {
    /// Largest single write or read the adapter will issue.
    pub max_transfer: usize,
}

impl Default for I2cConfig {
    fn default() -> Self {
        Self {
            max_transfer: 64 * 1024,
        }
    }
}

/// Command transport over an I2C target.
///
/// Writes go out as a single transaction `[header][payload][dummy]`. Reads
/// send the header alone, then read `[status][data...]` into the payload region.
pub struct I2cTransport<D> {
    device: D,
    irq: Arc<dyn InterruptLine>,
    config: I2cConfig,
}

impl<D: I2cDevice> I2cTransport<D> {
    pub fn new(device: D, irq: Arc<dyn InterruptLine>) -> Self {
        Self::with_config(device, irq, I2cConfig::default())
    }

    pub fn with_config(device: D, irq: Arc<dyn InterruptLine>, config: I2cConfig) -> Self {
        Self {
            device,
            irq,
            config,
        }
    }

    /// Borrow the underlying device.
    pub fn get_ref(&self) -> &D {
        &self.device
    }

    /// Mutably borrow the underlying device.
    pub fn get_mut(&mut self) -> &mut D {
        &mut self.device
    }

    /// Consume the adapter and return the device.
    pub fn into_inner(self) -> D {
        self.device
    }

    fn check_transfer(&self, len: usize) -> Result<()> {
        if len > self.config.max_transfer {
            return Err(TransportError::TransferTooLarge {
                len,
                max: self.config.max_transfer,
            });
        }
        Ok(())
    }
}

impl<D: I2cDevice> Bus for I2cTransport<D> {
    fn name(&self) -> &'static str {
        "i2c"
    }

    fn send_command(
        &mut self,
        opcode: u8,
        buf: &mut FramedBuffer,
        offset: u8,
        flag: LockFlag,
    ) -> Result<()> {
        let header = CommandHeader::new(opcode, buf.payload_len(), offset, flag)?;
        let start = buf.place_header(&header)?;
        let end = HEADER_RESERVE + buf.payload_len() + I2C_WRITE_TAIL;
        self.check_transfer(end - start)?;

        let frame = buf.span(start, end)?;
        trace!(opcode, bytes = ?frame, "i2c send");
        let written = self.device.write(frame)?;
        if written != frame.len() {
            return Err(TransportError::ShortTransfer {
                expected: frame.len(),
                actual: written,
            });
        }

        debug!(opcode, len = buf.payload_len(), offset, ?flag, "i2c command sent");
        Ok(())
    }

    fn recv_command(
        &mut self,
        opcode: u8,
        buf: &mut FramedBuffer,
        len: usize,
        offset: u8,
        flag: LockFlag,
        transfer_len: usize,
    ) -> Result<usize> {
        let header = CommandHeader::new(opcode, len, offset, flag)?;
        let start = buf.place_header(&header)?;

        let command = buf.span(start, HEADER_RESERVE)?;
        trace!(opcode, bytes = ?command, "i2c recv command");
        let written = self.device.write(command)?;
        if written != command.len() {
            return Err(TransportError::ShortTransfer {
                expected: command.len(),
                actual: written,
            });
        }

        let rx_len = I2C_READ_LEAD + transfer_len;
        self.check_transfer(rx_len)?;
        let rx = buf.span_mut(HEADER_RESERVE, HEADER_RESERVE + rx_len)?;
        let read = self.device.read(rx)?;
        if read != rx_len {
            return Err(TransportError::ShortTransfer {
                expected: rx_len,
                actual: read,
            });
        }

        debug!(opcode, len, transfer_len, "i2c command received");
        Ok(HEADER_RESERVE + I2C_READ_LEAD)
    }

    fn interrupt_line(&self) -> Arc<dyn InterruptLine> {
        Arc::clone(&self.irq)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;

    use super::*;
    use crate::command::{
        RD_MESSAGE_LEN_0, RD_PENDING_EVENTS, VRD_STREAM_0, VRW_CHANNEL_0, VRW_OFFSET_CHANNEL_0,
        WT_MASK_64,
    };
    use crate::traits::SoftInterruptLine;

    #[derive(Default)]
    struct RecordingI2c {
        writes: Vec<Vec<u8>>,
        responses: VecDeque<Vec<u8>>,
        short_write: bool,
    }

    impl I2cDevice for RecordingI2c {
        fn write(&mut self, bytes: &[u8]) -> std::io::Result<usize> {
            self.writes.push(bytes.to_vec());
            if self.short_write {
                return Ok(bytes.len() - 1);
            }
            Ok(bytes.len())
        }

        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            let response = self
                .responses
                .pop_front()
                .ok_or_else(|| std::io::Error::other("nack"))?;
            let n = response.len().min(buf.len());
            buf[..n].copy_from_slice(&response[..n]);
            Ok(n)
        }
    }

    fn transport(device: RecordingI2c) -> I2cTransport<RecordingI2c> {
        I2cTransport::new(device, Arc::new(SoftInterruptLine::new()))
    }

    #[test]
    fn fixed_write_frame_has_single_tail_dummy() {
        let mut bus = transport(RecordingI2c::default());
        let mut buf = FramedBuffer::with_payload(&0x0102_u64.to_le_bytes());

        bus.send_command(WT_MASK_64, &mut buf, 0, LockFlag::Unlock)
            .unwrap();

        let frame = &bus.get_ref().writes[0];
        assert_eq!(frame.len(), 1 + 8 + I2C_WRITE_TAIL);
        assert_eq!(frame[0], WT_MASK_64);
        assert_eq!(&frame[1..9], &0x0102_u64.to_le_bytes());
    }

    #[test]
    fn variable_write_carries_length_header() {
        let mut bus = transport(RecordingI2c::default());
        let mut buf = FramedBuffer::with_payload(&[7; 300]);

        bus.send_command(VRW_CHANNEL_0 + 2, &mut buf, 0, LockFlag::Unlock)
            .unwrap();

        let frame = &bus.get_ref().writes[0];
        assert_eq!(&frame[..3], &[0xA2, 0x2C, 0x01]);
        assert_eq!(frame.len(), 3 + 300 + I2C_WRITE_TAIL);
    }

    #[test]
    fn offset_write_carries_offset_and_lock() {
        let mut bus = transport(RecordingI2c::default());
        let mut buf = FramedBuffer::with_payload(&[1; 256]);

        bus.send_command(VRW_OFFSET_CHANNEL_0 + 3, &mut buf, 1, LockFlag::Lock)
            .unwrap();

        let frame = &bus.get_ref().writes[0];
        assert_eq!(&frame[..4], &[0xC3, 0x01, 0x00, 0x41]);
    }

    #[test]
    fn fixed_read_skips_status_byte() {
        let device = RecordingI2c {
            responses: VecDeque::from([vec![0xEE, 0x34, 0x12]]),
            ..RecordingI2c::default()
        };
        let mut bus = transport(device);
        let mut buf = FramedBuffer::for_read(2);

        let offset = bus
            .recv_command(RD_MESSAGE_LEN_0, &mut buf, 0, 0, LockFlag::Unlock, 2)
            .unwrap();

        assert_eq!(offset, HEADER_RESERVE + I2C_READ_LEAD);
        assert_eq!(buf.received(offset, 2).unwrap(), &[0x34, 0x12]);
        assert_eq!(bus.get_ref().writes[0], vec![RD_MESSAGE_LEN_0]);
    }

    #[test]
    fn stream_read_sends_length_header() {
        let mut response = vec![0x00];
        response.extend_from_slice(&[5; 19]);
        let device = RecordingI2c {
            responses: VecDeque::from([response]),
            ..RecordingI2c::default()
        };
        let mut bus = transport(device);
        let mut buf = FramedBuffer::for_read(19);

        bus.recv_command(VRD_STREAM_0 + 2, &mut buf, 12, 0, LockFlag::Unlock, 19)
            .unwrap();

        assert_eq!(bus.get_ref().writes[0], vec![0xE2, 12, 0x00]);
    }

    #[test]
    fn short_read_reported() {
        let device = RecordingI2c {
            responses: VecDeque::from([vec![0x00, 0x01]]),
            ..RecordingI2c::default()
        };
        let mut bus = transport(device);
        let mut buf = FramedBuffer::for_read(8);

        let err = bus
            .recv_command(RD_PENDING_EVENTS, &mut buf, 0, 0, LockFlag::Unlock, 8)
            .unwrap_err();
        assert!(matches!(
            err,
            TransportError::ShortTransfer {
                expected: 9,
                actual: 2
            }
        ));
    }

    #[test]
    fn short_write_reported() {
        let device = RecordingI2c {
            short_write: true,
            ..RecordingI2c::default()
        };
        let mut bus = transport(device);
        let mut buf = FramedBuffer::with_payload(&[0; 4]);

        let err = bus
            .send_command(WT_MASK_64, &mut buf, 0, LockFlag::Unlock)
            .unwrap_err();
        assert!(matches!(err, TransportError::ShortTransfer { .. }));
    }

    #[test]
    fn nack_propagates_as_io_error() {
        let mut bus = transport(RecordingI2c::default());
        let mut buf = FramedBuffer::for_read(8);

        let err = bus
            .recv_command(RD_PENDING_EVENTS, &mut buf, 0, 0, LockFlag::Unlock, 8)
            .unwrap_err();
        assert!(matches!(err, TransportError::Io(_)));
    }

    #[test]
    fn unsupported_opcode_never_reaches_bus() {
        let mut bus = transport(RecordingI2c::default());
        let mut buf = FramedBuffer::with_payload(b"x");

        let err = bus
            .send_command(0x46, &mut buf, 0, LockFlag::Unlock)
            .unwrap_err();
        assert!(matches!(err, TransportError::UnsupportedCommand(0x46)));
        assert!(bus.get_ref().writes.is_empty());
    }

    #[test]
    fn oversized_transfer_rejected() {
        let config = I2cConfig { max_transfer: 16 };
        let mut bus = I2cTransport::with_config(
            RecordingI2c::default(),
            Arc::new(SoftInterruptLine::new()),
            config,
        );
        let mut buf = FramedBuffer::with_payload(&[0; 32]);

        let err = bus
            .send_command(VRW_CHANNEL_0 + 2, &mut buf, 0, LockFlag::Unlock)
            .unwrap_err();
        assert!(matches!(err, TransportError::TransferTooLarge { .. }));
    }
}

use std::sync::Arc;

use tracing::{debug, trace};

use crate::buffer::{FramedBuffer, HEADER_RESERVE};
use crate::command::{CommandHeader, HeaderLayout, LockFlag};
use crate::error::{Result, TransportError};
use crate::traits::{Bus, InterruptLine, SpiDevice};

/// Turnaround clocks appended after every transfer.
pub const SPI_TAIL: usize = 2;

/// Clocks between the first header byte and the first valid read byte.
pub const SPI_READ_LEAD: usize = 3;

/// SPI adapter configuration.
#[derive(Debug, Clone)]
pub struct SpiConfig {
    /// Largest single full-duplex transfer.
    pub max_transfer: usize,
}

impl Default for SpiConfig {
    fn default() -> Self {
        Self {
            max_transfer: 64 * 1024,
        }
    }
}

/// Command transport over a full-duplex SPI device.
///
/// Every command is one in-place transfer starting at the header. Read data
/// is clocked back into the same buffer [`SPI_READ_LEAD`] bytes after the
/// first header byte, so no header or payload is ever copied.
pub struct SpiTransport<D> {
    device: D,
    irq: Arc<dyn InterruptLine>,
    config: SpiConfig,
}

impl<D: SpiDevice> SpiTransport<D> {
    pub fn new(device: D, irq: Arc<dyn InterruptLine>) -> Self {
        Self::with_config(device, irq, SpiConfig::default())
    }

    pub fn with_config(device: D, irq: Arc<dyn InterruptLine>, config: SpiConfig) -> Self {
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

    fn transfer(&mut self, buf: &mut FramedBuffer, start: usize, end: usize) -> Result<()> {
        if end - start > self.config.max_transfer {
            return Err(TransportError::TransferTooLarge {
                len: end - start,
                max: self.config.max_transfer,
            });
        }
        let frame = buf.span_mut(start, end)?;
        trace!(bytes = ?frame, "spi transfer out");
        self.device.transfer_in_place(frame)?;
        trace!(bytes = ?frame, "spi transfer in");
        Ok(())
    }
}

impl<D: SpiDevice> Bus for SpiTransport<D> {
    fn name(&self) -> &'static str {
        "spi"
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
        let end = HEADER_RESERVE + buf.payload_len() + SPI_TAIL;
        self.transfer(buf, start, end)?;

        debug!(opcode, len = buf.payload_len(), offset, ?flag, "spi command sent");
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

        if header.layout() == HeaderLayout::Bare {
            self.transfer(buf, start, HEADER_RESERVE)?;
            debug!(opcode, "spi bare command clocked");
            return Ok(HEADER_RESERVE);
        }

        let end = HEADER_RESERVE + transfer_len + SPI_TAIL;
        self.transfer(buf, start, end)?;

        debug!(opcode, len, transfer_len, "spi command received");
        Ok(start + SPI_READ_LEAD)
    }

    fn interrupt_line(&self) -> Arc<dyn InterruptLine> {
        Arc::clone(&self.irq)
    }
}

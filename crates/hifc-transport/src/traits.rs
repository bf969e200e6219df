use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use crate::buffer::FramedBuffer;
use crate::command::LockFlag;
use crate::error::Result;

/// A command-level bus to the companion controller.
///
/// This is the seam the protocol engine talks through. Both I2C and SPI
/// adapters implement it; tests substitute scripted implementations.
pub trait Bus: Send {
    /// Short transport name for logs ("i2c", "spi").
    fn name(&self) -> &'static str;

    /// Issue a write command carrying `buf`'s payload region.
    fn send_command(
        &mut self,
        opcode: u8,
        buf: &mut FramedBuffer,
        offset: u8,
        flag: LockFlag,
    ) -> Result<()>;

    /// Issue a read command.
    ///
    /// `len` is the length advertised in the header, `transfer_len` the number
    /// of bytes the controller returns. On success returns the absolute index
    /// into `buf` where the `transfer_len` received bytes start.
    fn recv_command(
        &mut self,
        opcode: u8,
        buf: &mut FramedBuffer,
        len: usize,
        offset: u8,
        flag: LockFlag,
        transfer_len: usize,
    ) -> Result<usize>;

    /// The physical interrupt line of the controller.
    fn interrupt_line(&self) -> Arc<dyn InterruptLine>;

    /// Re-arm the physical interrupt line after a dispatch pass.
    fn enable_interrupt_line(&self) {
        self.interrupt_line().enable();
    }
}

impl<B: Bus + ?Sized> Bus for Box<B> {
    fn name(&self) -> &'static str {
        (**self).name()
    }

    fn send_command(
        &mut self,
        opcode: u8,
        buf: &mut FramedBuffer,
        offset: u8,
        flag: LockFlag,
    ) -> Result<()> {
        (**self).send_command(opcode, buf, offset, flag)
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
        (**self).recv_command(opcode, buf, len, offset, flag, transfer_len)
    }

    fn interrupt_line(&self) -> Arc<dyn InterruptLine> {
        (**self).interrupt_line()
    }

    fn enable_interrupt_line(&self) {
        (**self).enable_interrupt_line()
    }
}

/// Raw I2C access to one target address.
pub trait I2cDevice: Send {
    /// Write `bytes` in one bus transaction.
    fn write(&mut self, bytes: &[u8]) -> std::io::Result<usize>;

    /// Read into `buf` in one bus transaction.
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize>;
}

/// Raw full-duplex SPI access to one chip select.
pub trait SpiDevice: Send {
    /// Clock `buf` out and overwrite it with the bytes clocked in.
    fn transfer_in_place(&mut self, buf: &mut [u8]) -> std::io::Result<()>;
}

/// The controller's interrupt request line.
pub trait InterruptLine: Send + Sync {
    fn enable(&self);
    fn disable(&self);
    fn is_enabled(&self) -> bool;
}

/// An in-process interrupt line backed by an atomic flag.
///
/// Used when the physical line is polled rather than wired to a handler.
#[derive(Debug)]
pub struct SoftInterruptLine {
    enabled: AtomicBool,
    enables: AtomicU64,
}

impl SoftInterruptLine {
    pub fn new() -> Self {
        Self {
            enabled: AtomicBool::new(true),
            enables: AtomicU64::new(0),
        }
    }

    /// Number of times the line has been re-armed.
    pub fn enable_count(&self) -> u64 {
        self.enables.load(Ordering::SeqCst)
    }
}

impl Default for SoftInterruptLine {
    fn default() -> Self {
        Self::new()
    }
}

impl InterruptLine for SoftInterruptLine {
    fn enable(&self) {
        self.enabled.store(true, Ordering::SeqCst);
        self.enables.fetch_add(1, Ordering::SeqCst);
    }

    fn disable(&self) {
        self.enabled.store(false, Ordering::SeqCst);
    }

    fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }
}

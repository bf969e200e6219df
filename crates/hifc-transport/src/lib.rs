//! Command framing and bus transport for a companion micro-controller.
//!
//! Every exchange with the controller is a command: a one-byte opcode whose
//! range selects a header layout, followed by payload bytes. This crate
//! provides:
//! - the opcode table and format classifier ([`CommandFormat`])
//! - a [`FramedBuffer`] that reserves room for the header in front of the
//!   payload so it can be written in place
//! - I2C and SPI adapters implementing the [`Bus`] trait
//! - Linux `i2c-dev` / `spidev` device backends
//!
//! This is the lowest layer of hifc. Everything else talks through [`Bus`].

pub mod buffer;
pub mod command;
pub mod error;
pub mod i2c;
pub mod spi;
pub mod traits;

#[cfg(target_os = "linux")]
pub mod linux;

pub use buffer::{FramedBuffer, HEADER_RESERVE, TAIL_RESERVE};
pub use command::{CommandFormat, CommandHeader, HeaderLayout, LockFlag, MAX_COMMAND_LEN};
pub use error::{Result, TransportError};
pub use i2c::{I2cConfig, I2cTransport};
pub use spi::{SpiConfig, SpiTransport};
pub use traits::{Bus, I2cDevice, InterruptLine, SoftInterruptLine, SpiDevice};

#[cfg(target_os = "linux")]
pub use linux::{I2cDev, SpiDev, SpiDevConfig};

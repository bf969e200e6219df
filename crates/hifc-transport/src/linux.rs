//! Linux `i2c-dev` and `spidev` character-device backends.

use std::fs::{File, OpenOptions};
use std::io::{Read, Write};
use std::os::fd::AsRawFd;
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::error::{Result, TransportError};
use crate::traits::{I2cDevice, SpiDevice};

/// `I2C_SLAVE` from `<linux/i2c-dev.h>`.
const I2C_SLAVE: libc::c_ulong = 0x0703;

/// `SPI_IOC_MESSAGE(1)` from `<linux/spi/spidev.h>`:
/// `_IOW('k', 0, struct spi_ioc_transfer[1])`.
const SPI_IOC_MESSAGE_1: libc::c_ulong = 0x4020_6b00;

/// `SPI_IOC_WR_MODE` from `<linux/spi/spidev.h>`.
const SPI_IOC_WR_MODE: libc::c_ulong = 0x4001_6b01;

/// `SPI_IOC_WR_MAX_SPEED_HZ` from `<linux/spi/spidev.h>`.
const SPI_IOC_WR_MAX_SPEED_HZ: libc::c_ulong = 0x4004_6b04;

/// Mirrors `struct spi_ioc_transfer`.
#[repr(C)]
#[derive(Debug, Default)]
struct SpiIocTransfer {
    tx_buf: u64,
    rx_buf: u64,
    len: u32,
    speed_hz: u32,
    delay_usecs: u16,
    bits_per_word: u8,
    cs_change: u8,
    tx_nbits: u8,
    rx_nbits: u8,
    word_delay_usecs: u8,
    pad: u8,
}

/// Argument size encoded in bits 16..30 of an `_IOW` number.
const fn ioc_size(request: libc::c_ulong) -> usize {
    ((request >> 16) & 0x3FFF) as usize
}

// SPI_IOC_MESSAGE_1 hard-codes the transfer size; a layout change must fail the build.
const _: () = assert!(std::mem::size_of::<SpiIocTransfer>() == 32);
const _: () = assert!(std::mem::size_of::<SpiIocTransfer>() == ioc_size(SPI_IOC_MESSAGE_1));

/// An I2C target behind `/dev/i2c-N`.
#[derive(Debug)]
pub struct I2cDev {
    file: File,
    path: PathBuf,
    address: u16,
}

impl I2cDev {
    /// Open the adapter node and bind it to a 7-bit target address.
    pub fn open(path: impl AsRef<Path>, address: u16) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(&path)
            .map_err(|source| TransportError::Open {
                path: path.clone(),
                source,
            })?;

        // SAFETY: `file` is an open i2c-dev descriptor; I2C_SLAVE takes the
        // address by value.
        let rc = unsafe {
            libc::ioctl(
                file.as_raw_fd(),
                I2C_SLAVE as _,
                libc::c_ulong::from(address),
            )
        };
        if rc < 0 {
            return Err(TransportError::Configure {
                path,
                source: std::io::Error::last_os_error(),
            });
        }

        info!(?path, address = format_args!("0x{address:02x}"), "i2c device opened");
        Ok(Self {
            file,
            path,
            address,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn address(&self) -> u16 {
        self.address
    }
}

impl I2cDevice for I2cDev {
    fn write(&mut self, bytes: &[u8]) -> std::io::Result<usize> {
        self.file.write(bytes)
    }

    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        self.file.read(buf)
    }
}

/// SPI device configuration.
#[derive(Debug, Clone)]
pub struct SpiDevConfig {
    /// SPI mode (CPOL/CPHA bits).
    pub mode: u8,
    /// Maximum clock rate in Hz.
    pub max_speed_hz: u32,
    /// Word size; 0 means the driver default of 8.
    pub bits_per_word: u8,
}

impl Default for SpiDevConfig {
    fn default() -> Self {
        Self {
            mode: 0,
            max_speed_hz: 8_000_000,
            bits_per_word: 8,
        }
    }
}

/// A chip select behind `/dev/spidevB.C`.
#[derive(Debug)]
pub struct SpiDev {
    file: File,
    path: PathBuf,
    config: SpiDevConfig,
}

impl SpiDev {
    /// Open the device node with default configuration.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        Self::open_with_config(path, SpiDevConfig::default())
    }

    /// Open the device node and apply mode and clock rate.
    pub fn open_with_config(path: impl AsRef<Path>, config: SpiDevConfig) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(&path)
            .map_err(|source| TransportError::Open {
                path: path.clone(),
                source,
            })?;

        let fd = file.as_raw_fd();
        let mode = config.mode;
        let speed = config.max_speed_hz;

        // SAFETY: both ioctls read a value of the pointed-to type, and the
        // pointers are valid for the duration of the call.
        let rc = unsafe { libc::ioctl(fd, SPI_IOC_WR_MODE as _, &mode as *const u8) };
        if rc < 0 {
            return Err(TransportError::Configure {
                path,
                source: std::io::Error::last_os_error(),
            });
        }
        // SAFETY: see above.
        let rc = unsafe { libc::ioctl(fd, SPI_IOC_WR_MAX_SPEED_HZ as _, &speed as *const u32) };
        if rc < 0 {
            return Err(TransportError::Configure {
                path,
                source: std::io::Error::last_os_error(),
            });
        }

        info!(?path, mode, speed_hz = speed, "spi device opened");
        Ok(Self { file, path, config })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl SpiDevice for SpiDev {
    fn transfer_in_place(&mut self, buf: &mut [u8]) -> std::io::Result<()> {
        let len = u32::try_from(buf.len())
            .map_err(|_| std::io::Error::other("spi transfer exceeds u32 length"))?;
        let ptr = buf.as_mut_ptr() as u64;
        let transfer = SpiIocTransfer {
            tx_buf: ptr,
            rx_buf: ptr,
            len,
            speed_hz: self.config.max_speed_hz,
            bits_per_word: self.config.bits_per_word,
            ..SpiIocTransfer::default()
        };

        // SAFETY: `transfer` describes `buf`, which stays borrowed mutably for
        // the duration of the ioctl. spidev permits tx_buf == rx_buf.
        let rc = unsafe {
            libc::ioctl(
                self.file.as_raw_fd(),
                SPI_IOC_MESSAGE_1 as _,
                &transfer as *const SpiIocTransfer,
            )
        };
        if rc < 0 {
            return Err(std::io::Error::last_os_error());
        }
        debug!(len, "spi transfer complete");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ioctl_numbers_match_kernel_encoding() {
        // _IOW(type, nr, size) = 1 << 30 | size << 16 | type << 8 | nr
        let iow = |ty: u8, nr: u8, size: usize| -> libc::c_ulong {
            (1 << 30) | ((size as libc::c_ulong) << 16) | ((ty as libc::c_ulong) << 8) | nr as libc::c_ulong
        };
        assert_eq!(iow(b'k', 0, 32), SPI_IOC_MESSAGE_1);
        assert_eq!(iow(b'k', 1, 1), SPI_IOC_WR_MODE);
        assert_eq!(iow(b'k', 4, 4), SPI_IOC_WR_MAX_SPEED_HZ);
    }

    #[test]
    fn spi_transfer_layout_matches_kernel_struct() {
        assert_eq!(ioc_size(SPI_IOC_MESSAGE_1), 32);
        assert_eq!(std::mem::align_of::<SpiIocTransfer>(), 8);
        assert_eq!(std::mem::offset_of!(SpiIocTransfer, len), 16);
        assert_eq!(std::mem::offset_of!(SpiIocTransfer, delay_usecs), 24);
        assert_eq!(std::mem::offset_of!(SpiIocTransfer, word_delay_usecs), 30);
    }

    #[test]
    fn open_missing_i2c_node_reports_path() {
        let err = I2cDev::open("/dev/hifc-does-not-exist", 0x24).unwrap_err();
        assert!(matches!(err, TransportError::Open { .. }));
        assert!(err.to_string().contains("/dev/hifc-does-not-exist"));
    }

    #[test]
    fn open_missing_spi_node_reports_path() {
        let err = SpiDev::open("/dev/hifc-spidev-does-not-exist").unwrap_err();
        assert!(matches!(err, TransportError::Open { .. }));
    }
}

use std::path::PathBuf;

/// Errors that can occur in bus transport operations.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// Failed to open the bus device node.
    #[error("failed to open {path}: {source}")]
    Open {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Failed to configure the bus device (target address, mode, speed).
    #[error("failed to configure {path}: {source}")]
    Configure {
        path: PathBuf,
        source: std::io::Error,
    },

    /// An I/O error occurred on the bus (NACK, arbitration loss, timeout).
    #[error("bus I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The opcode does not classify to any supported wire format.
    #[error("unsupported command opcode 0x{0:02x}")]
    UnsupportedCommand(u8),

    /// The payload length does not fit the 14-bit length field.
    #[error("command length too large ({len} bytes, max {max})")]
    LengthOverflow { len: usize, max: usize },

    /// The full transfer exceeds what the bus adapter can move in one transaction.
    #[error("transfer too large ({len} bytes, max {max})")]
    TransferTooLarge { len: usize, max: usize },

    /// The framed buffer cannot hold the requested transfer.
    #[error("buffer too small ({capacity} bytes, need {needed})")]
    BufferTooSmall { capacity: usize, needed: usize },

    /// The device moved fewer bytes than the transaction required.
    #[error("short transfer ({actual} of {expected} bytes)")]
    ShortTransfer { expected: usize, actual: usize },

    /// The wire header could not be decoded.
    #[error("malformed command header: {0}")]
    MalformedHeader(&'static str),
}

pub type Result<T> = std::result::Result<T, TransportError>;

/// Errors that can occur during envelope encoding/decoding.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    /// The envelope head carries an unknown kind discriminator.
    #[error("invalid envelope kind {0}")]
    InvalidKind(u16),

    /// The payload exceeds what the 16-bit length field can carry.
    #[error("payload too large ({size} bytes, max {max})")]
    PayloadTooLarge { size: usize, max: usize },

    /// A structured payload is shorter than its fixed header.
    #[error("payload truncated ({len} bytes, need {needed})")]
    Truncated { len: usize, needed: usize },

    /// An I/O error occurred while reading or writing a trace stream.
    #[error("trace I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The trace stream ended in the middle of an envelope.
    #[error("trace stream closed (incomplete envelope)")]
    ConnectionClosed,
}

pub type Result<T> = std::result::Result<T, FrameError>;

use std::path::PathBuf;
use std::time::Duration;

/// Errors that can occur in engine operations.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// Bus-level failure (NACK, short transfer) or unsupported opcode.
    #[error("transport error: {0}")]
    Transport(#[from] hifc_transport::TransportError),

    /// Envelope or payload encoding error.
    #[error("frame error: {0}")]
    Frame(#[from] hifc_frame::FrameError),

    /// Every work record in the pool is in use.
    #[error("task pool exhausted ({capacity} records in use)")]
    PoolExhausted { capacity: usize },

    /// A synchronous wait expired; the work item was reclaimed.
    #[error("operation timed out after {0:?}")]
    Timeout(Duration),

    /// A synchronous wait expired while the work item was mid-transaction.
    /// The engine is now faulted.
    #[error("transaction stalled after {0:?}; engine faulted")]
    Stalled(Duration),

    /// The engine is faulted and refuses further transactions.
    #[error("engine faulted; reset required")]
    Faulted,

    /// The worker thread has stopped.
    #[error("engine shut down")]
    Shutdown,

    /// The outbound message exceeds what segmented send can address.
    #[error("message too large ({size} bytes, max {max})")]
    MessageTooLarge { size: usize, max: usize },

    /// The controller returned data that does not parse.
    #[error("invalid response: {0}")]
    InvalidResponse(String),

    /// Invalid engine configuration.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// Failed to read a configuration file.
    #[error("failed to read {path}: {source}")]
    ConfigIo {
        path: PathBuf,
        source: std::io::Error,
    },

    /// JSON serialization/deserialization error.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// Failed to spawn the worker thread.
    #[error("failed to spawn worker: {0}")]
    Spawn(std::io::Error),
}

pub type Result<T> = std::result::Result<T, EngineError>;

//! Priority-scheduled protocol engine for a companion MCU link.
//!
//! The engine owns one [`Bus`](hifc_transport::Bus) and a single worker
//! thread. Everything that touches the bus runs as a task on that thread:
//! - Interrupt passes read the pending-event register and spawn work per bit
//! - Stream reads drain the sample FIFOs
//! - Message reads alternate between the two read buffers
//! - Sends alternate between the two write buffers, split into chunks
//!
//! Received envelopes go to the first [`MessageHandler`] registered for
//! their handler id, or to the trace sink when nobody consumes them.

pub mod arbiter;
pub mod config;
pub mod engine;
pub mod error;
pub mod irq;
pub mod message;
mod pending;
pub mod registry;
pub mod scheduler;
pub mod send;
pub mod stream;
pub mod system;

#[cfg(test)]
mod testing;

pub use arbiter::{BufferSlot, ChannelArbiter};
pub use config::EngineConfig;
pub use engine::{Engine, EngineBuilder, EngineStats};
pub use error::{EngineError, Result};
pub use irq::{classify_bit, plan_pass, EventWork};
pub use registry::{Disposition, MessageHandler, RegistrationId, Registry};
pub use scheduler::{Priority, TaskId};
pub use send::{plan_chunks, Chunk, MAX_CHUNK, MAX_MESSAGE};
pub use stream::{CounterSnapshot, StreamDescriptor, BYTES_PER_SAMPLE, STREAM_COUNT};
pub use system::{ErrorReport, SystemService, SystemStatus, VersionKind};

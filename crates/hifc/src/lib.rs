//! Host-side protocol engine for a companion micro-controller.
//!
//! hifc drives a small MCU over I2C or SPI: it classifies and frames
//! commands, services the controller's interrupt line with a priority
//! scheduler, drains streamed sensor samples, exchanges structured messages
//! through double-buffered channels and mirrors unclaimed traffic to a
//! passive trace channel.
//!
//! # Crate Structure
//!
//! - [`transport`]: opcode classifier, framed buffers, I2C/SPI adapters
//! - [`frame`]: message envelopes, payload headers, trace capture
//! - [`engine`]: scheduler, interrupt dispatcher, send/receive, registry

/// Re-export transport types.
pub mod transport {
    pub use hifc_transport::*;
}

/// Re-export frame types.
pub mod frame {
    pub use hifc_frame::*;
}

/// Re-export engine types.
pub mod engine {
    pub use hifc_engine::*;
}

pub use hifc_engine::{Engine, EngineBuilder, EngineConfig, EngineError};

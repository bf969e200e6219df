//! Message envelopes and passive trace capture for hifc.
//!
//! Everything the engine receives from the controller is wrapped in an
//! [`Envelope`] before dispatch:
//! - A 2-byte kind (stream burst, structured message, error)
//! - A 2-byte stream index
//! - A 2-byte payload length
//! - A 1-byte handler id the envelope is routed by
//!
//! The same wire form is what the trace channel records, so a capture can be
//! replayed with [`TraceReader`].

pub mod envelope;
pub mod error;
pub mod handler;
pub mod payload;
pub mod reader;
pub mod trace;
pub mod writer;

#[cfg(feature = "async")]
pub mod codec;

pub use envelope::{
    decode_envelope, encode_envelope, Envelope, EnvelopeKind, StreamSamples,
    ENVELOPE_HEADER_SIZE, MAX_ENVELOPE_PAYLOAD, STREAM_STATUS_LEN, STREAM_TIMESTAMP_LEN,
};
pub use error::{FrameError, Result};
pub use handler::{handler_name, ACTIVITY_LOG, AP_STORAGE, AUDIO, RTC, SENSOR, SYSTEM};
pub use payload::{build_message, PayloadHeader, PAYLOAD_HEADER_SIZE};
pub use reader::TraceReader;
pub use trace::{record_envelope, NullTrace, TraceBuffer, TraceSink, DEFAULT_TRACE_CAPACITY};
pub use writer::TraceWriter;

#[cfg(feature = "async")]
pub use codec::TraceCodec;

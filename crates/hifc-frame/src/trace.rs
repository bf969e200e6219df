//! Passive observation channel.
//!
//! Envelopes that no consumer claimed are mirrored here verbatim, in their
//! wire form, so external tooling can follow controller traffic without
//! taking part in the protocol.

use std::sync::{Mutex, MutexGuard, PoisonError};

use bytes::{Bytes, BytesMut};
use tracing::debug;

use crate::envelope::{encode_envelope, Envelope};
use crate::error::Result;

/// Default in-memory trace capacity: 512 KiB.
pub const DEFAULT_TRACE_CAPACITY: usize = 512 * 1024;

/// An append-only byte sink.
pub trait TraceSink: Send + Sync {
    /// Append one record. Sinks never block the caller on back-pressure.
    fn record(&self, bytes: &[u8]);
}

/// Encode `envelope` and append it to `sink`.
pub fn record_envelope(sink: &dyn TraceSink, envelope: &Envelope) -> Result<()> {
    let mut buf = BytesMut::with_capacity(envelope.wire_size());
    encode_envelope(envelope, &mut buf)?;
    sink.record(&buf);
    Ok(())
}

/// Discards every record.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullTrace;

impl TraceSink for NullTrace {
    fn record(&self, _bytes: &[u8]) {}
}

/// Bounded in-memory trace.
///
/// Once full, new records are dropped whole and counted; existing records are
/// never overwritten. Readers drain the buffer to make room.
#[derive(Debug)]
pub struct TraceBuffer {
    state: Mutex<TraceState>,
    capacity: usize,
}

#[derive(Debug, Default)]
struct TraceState {
    buf: BytesMut,
    records: u64,
    dropped: u64,
}

impl TraceBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            state: Mutex::new(TraceState::default()),
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Bytes currently buffered.
    pub fn len(&self) -> usize {
        self.lock().buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Records accepted since creation.
    pub fn records(&self) -> u64 {
        self.lock().records
    }

    /// Records rejected because the buffer was full.
    pub fn dropped(&self) -> u64 {
        self.lock().dropped
    }

    /// Copy out the buffered bytes without consuming them.
    pub fn snapshot(&self) -> Bytes {
        Bytes::copy_from_slice(&self.lock().buf)
    }

    /// Take all buffered bytes, leaving the buffer empty.
    pub fn drain(&self) -> Bytes {
        self.lock().buf.split().freeze()
    }

    fn lock(&self) -> MutexGuard<'_, TraceState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for TraceBuffer {
    fn default() -> Self {
        Self::new(DEFAULT_TRACE_CAPACITY)
    }
}

impl TraceSink for TraceBuffer {
    fn record(&self, bytes: &[u8]) {
        let mut state = self.lock();
        if state.buf.len() + bytes.len() > self.capacity {
            state.dropped += 1;
            debug!(
                len = bytes.len(),
                dropped = state.dropped,
                "trace buffer full, record dropped"
            );
            return;
        }
        state.buf.extend_from_slice(bytes);
        state.records += 1;
    }
}

use std::io::{ErrorKind, Read};

use bytes::BytesMut;

use crate::envelope::{decode_envelope, Envelope};
use crate::error::{FrameError, Result};

const INITIAL_BUFFER_CAPACITY: usize = 8 * 1024;
const READ_CHUNK_SIZE: usize = 8 * 1024;

/// Reads complete envelopes back out of a captured trace stream.
///
/// Handles partial reads internally; callers always get complete envelopes.
pub struct TraceReader<T> {
    inner: T,
    buf: BytesMut,
}

impl<T: Read> TraceReader<T> {
    pub fn new(inner: T) -> Self {
        Self {
            inner,
            buf: BytesMut::with_capacity(INITIAL_BUFFER_CAPACITY),
        }
    }

    /// Read the next complete envelope (blocking).
    ///
    /// Returns `Err(FrameError::ConnectionClosed)` when EOF is reached.
    pub fn read_envelope(&mut self) -> Result<Envelope> {
        self.next_envelope()?.ok_or(FrameError::ConnectionClosed)
    }

    /// Read the next envelope, or `None` on EOF at an envelope boundary.
    ///
    /// EOF in the middle of an envelope is `Err(FrameError::ConnectionClosed)`.
    pub fn next_envelope(&mut self) -> Result<Option<Envelope>> {
        loop {
            if let Some(envelope) = decode_envelope(&mut self.buf)? {
                return Ok(Some(envelope));
            }

            let mut chunk = [0u8; READ_CHUNK_SIZE];
            let read = match self.inner.read(&mut chunk) {
                Ok(n) => n,
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) => return Err(FrameError::Io(err)),
            };

            if read == 0 {
                if self.buf.is_empty() {
                    return Ok(None);
                }
                return Err(FrameError::ConnectionClosed);
            }

            self.buf.extend_from_slice(&chunk[..read]);
        }
    }

    /// Borrow the underlying stream.
    pub fn get_ref(&self) -> &T {
        &self.inner
    }

    /// Consume the reader and return the inner stream.
    pub fn into_inner(self) -> T {
        self.inner
    }
}

impl<T: Read> Iterator for TraceReader<T> {
    type Item = Result<Envelope>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_envelope().transpose()
    }
}

use std::io::{ErrorKind, Write};
use std::sync::{Mutex, PoisonError};

use bytes::BytesMut;
use tracing::warn;

use crate::envelope::{encode_envelope, Envelope};
use crate::error::{FrameError, Result};
use crate::trace::TraceSink;

const INITIAL_BUFFER_CAPACITY: usize = 4 * 1024;

/// Writes trace records to any `Write` stream (capture file, pipe).
pub struct TraceWriter<T> {
    inner: T,
    buf: BytesMut,
}

impl<T: Write> TraceWriter<T> {
    pub fn new(inner: T) -> Self {
        Self {
            inner,
            buf: BytesMut::with_capacity(INITIAL_BUFFER_CAPACITY),
        }
    }

    /// Encode and write one envelope (blocking).
    pub fn write_envelope(&mut self, envelope: &Envelope) -> Result<()> {
        self.buf.clear();
        encode_envelope(envelope, &mut self.buf)?;
        let encoded = self.buf.split();
        self.write_record(&encoded)
    }

    /// Write pre-encoded record bytes and flush.
    pub fn write_record(&mut self, bytes: &[u8]) -> Result<()> {
        let mut offset = 0usize;
        while offset < bytes.len() {
            match self.inner.write(&bytes[offset..]) {
                Ok(0) => return Err(FrameError::ConnectionClosed),
                Ok(n) => offset += n,
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) => return Err(FrameError::Io(err)),
            }
        }
        self.flush()
    }

    /// Flush the underlying stream.
    pub fn flush(&mut self) -> Result<()> {
        loop {
            match self.inner.flush() {
                Ok(()) => return Ok(()),
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) => return Err(FrameError::Io(err)),
            }
        }
    }

    /// Borrow the underlying stream.
    pub fn get_ref(&self) -> &T {
        &self.inner
    }

    /// Consume the writer and return the inner stream.
    pub fn into_inner(self) -> T {
        self.inner
    }
}

/// A writer shared between the engine and its owner.
impl<T: Write + Send> TraceSink for Mutex<TraceWriter<T>> {
    fn record(&self, bytes: &[u8]) {
        let mut writer = self.lock().unwrap_or_else(PoisonError::into_inner);
        if let Err(err) = writer.write_record(bytes) {
            warn!(error = %err, len = bytes.len(), "trace write failed, record dropped");
        }
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use super::*;
    use crate::handler::{AUDIO, SYSTEM};
    use crate::reader::TraceReader;
    use crate::trace::record_envelope;

    #[test]
    fn written_envelopes_read_back() {
        let mut writer = TraceWriter::new(Cursor::new(Vec::new()));
        writer
            .write_envelope(&Envelope::message(SYSTEM, &b"ready"[..]))
            .unwrap();
        writer
            .write_envelope(&Envelope::stream(4, vec![0u8; 7]))
            .unwrap();

        let bytes = writer.into_inner().into_inner();
        let mut reader = TraceReader::new(Cursor::new(bytes));
        assert_eq!(reader.read_envelope().unwrap().payload.as_ref(), b"ready");
        assert_eq!(reader.read_envelope().unwrap().stream, 4);
    }

    #[test]
    fn shared_writer_acts_as_sink() {
        let sink = Mutex::new(TraceWriter::new(Cursor::new(Vec::new())));
        record_envelope(&sink, &Envelope::message(AUDIO, &b"pcm"[..])).unwrap();

        let bytes = sink.into_inner().unwrap().into_inner().into_inner();
        let envelope = TraceReader::new(Cursor::new(bytes)).read_envelope().unwrap();
        assert_eq!(envelope.handler, AUDIO);
    }

    #[test]
    fn handles_interrupted_write_and_flush() {
        let mut writer = TraceWriter::new(InterruptedOnce::default());
        writer.write_record(b"retry").unwrap();
        assert_eq!(writer.get_ref().data, b"retry");
    }

    #[test]
    fn zero_write_reports_closed() {
        let mut writer = TraceWriter::new(ZeroWriter);
        let err = writer.write_record(b"x").unwrap_err();
        assert!(matches!(err, FrameError::ConnectionClosed));
    }

    #[test]
    fn sink_swallows_write_errors() {
        let sink = Mutex::new(TraceWriter::new(ZeroWriter));
        sink.record(b"lost");
    }

    #[derive(Default)]
    struct InterruptedOnce {
        wrote_once: bool,
        flushed_once: bool,
        data: Vec<u8>,
    }

    impl Write for InterruptedOnce {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            if !self.wrote_once {
                self.wrote_once = true;
                return Err(std::io::Error::from(ErrorKind::Interrupted));
            }
            self.data.extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            if !self.flushed_once {
                self.flushed_once = true;
                return Err(std::io::Error::from(ErrorKind::Interrupted));
            }
            Ok(())
        }
    }

    struct ZeroWriter;

    impl Write for ZeroWriter {
        fn write(&mut self, _buf: &[u8]) -> std::io::Result<usize> {
            Ok(0)
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }
}

//! `tokio_util` codec for trace streams.

use bytes::BytesMut;
use tokio_util::codec::{Decoder, Encoder};

use crate::envelope::{decode_envelope, encode_envelope, Envelope};
use crate::error::FrameError;

/// Decodes and encodes trace envelopes on async byte streams.
#[derive(Debug, Default, Clone, Copy)]
pub struct TraceCodec;

impl Decoder for TraceCodec {
    type Item = Envelope;
    type Error = FrameError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        decode_envelope(src)
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        match decode_envelope(src)? {
            Some(envelope) => Ok(Some(envelope)),
            None if src.is_empty() => Ok(None),
            None => Err(FrameError::ConnectionClosed),
        }
    }
}

impl Encoder<Envelope> for TraceCodec {
    type Error = FrameError;

    fn encode(&mut self, item: Envelope, dst: &mut BytesMut) -> Result<(), Self::Error> {
        encode_envelope(&item, dst)
    }
}

impl Encoder<&Envelope> for TraceCodec {
    type Error = FrameError;

    fn encode(&mut self, item: &Envelope, dst: &mut BytesMut) -> Result<(), Self::Error> {
        encode_envelope(item, dst)
    }
}

#[cfg(test)]
mod tests {
    use futures_util::{SinkExt, StreamExt};
    use tokio_util::codec::{FramedRead, FramedWrite};

    use super::*;
    use crate::handler::{SENSOR, SYSTEM};

    #[tokio::test]
    async fn stream_of_envelopes_roundtrips() {
        let mut sink = FramedWrite::new(Vec::new(), TraceCodec);
        sink.send(Envelope::message(SYSTEM, &b"hello"[..]))
            .await
            .unwrap();
        sink.send(Envelope::stream(5, vec![3u8; 13])).await.unwrap();
        let bytes = sink.into_inner();

        let mut stream = FramedRead::new(bytes.as_slice(), TraceCodec);
        let first = stream.next().await.unwrap().unwrap();
        let second = stream.next().await.unwrap().unwrap();

        assert_eq!(first.payload.as_ref(), b"hello");
        assert_eq!((second.stream, second.handler), (5, SENSOR));
        assert!(stream.next().await.is_none());
    }

    #[tokio::test]
    async fn truncated_stream_errors_at_eof() {
        let mut buf = BytesMut::new();
        encode_envelope(&Envelope::message(SYSTEM, &b"partial"[..]), &mut buf).unwrap();
        buf.truncate(buf.len() - 2);
        let bytes = buf.to_vec();

        let mut stream = FramedRead::new(bytes.as_slice(), TraceCodec);
        let err = stream.next().await.unwrap().unwrap_err();
        assert!(matches!(err, FrameError::ConnectionClosed));
    }
}

//! Burst reads of sampled stream channels.
//!
//! The controller keeps a producer/consumer counter pair per stream and
//! snapshots it twice in one descriptor read, before and after latching the
//! burst. The snapshot pair decides which timestamp is authoritative.

use hifc_frame::{Envelope, STREAM_STATUS_LEN, STREAM_TIMESTAMP_LEN};
use hifc_transport::command::{RD_STREAM_DESC_0, VRD_STREAM_0};
use hifc_transport::{Bus, FramedBuffer, LockFlag};
use tracing::{debug, trace};

use crate::error::{EngineError, Result};

/// Number of stream channels.
pub const STREAM_COUNT: usize = 22;

/// Bytes per sample for each stream. Zero means the stream does not carry
/// fixed-width samples.
pub const BYTES_PER_SAMPLE: [usize; STREAM_COUNT] = [
    0, // 0: unused
    0, // 1: unused
    6, // 2: accelerometer
    6, // 3: gyroscope
    0, // 4: temperature
    6, // 5: magnetometer
    6, // 6: barometer
    0, // 7: pulse and vibration
    0, // 8: temperature
    4, // 9: ambient light (APDS9930)
    2, // 10: ambient light (BH1721FVC)
    0, // 11: voice
    0, 0, 0, 0, 0, 0, 0, 0, 0, 0,
];

/// Size of one counter snapshot on the wire.
const SNAPSHOT_LEN: usize = 8;

/// Size of the pre/post descriptor pair.
pub const DESCRIPTOR_LEN: usize = 2 * SNAPSHOT_LEN;

/// Timestamp high word is shifted by this many bits.
const TIMESTAMP_MSB_SHIFT: u32 = 15;

/// One snapshot of a stream's counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CounterSnapshot {
    /// Samples available to the host.
    pub available: u16,
    pub timestamp_lsb: u16,
    pub timestamp_msb: u32,
}

impl CounterSnapshot {
    fn parse(bytes: &[u8]) -> Self {
        Self {
            available: u16::from_le_bytes([bytes[0], bytes[1]]),
            timestamp_lsb: u16::from_le_bytes([bytes[2], bytes[3]]),
            timestamp_msb: u32::from_le_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]),
        }
    }

    pub fn timestamp(&self) -> u64 {
        (u64::from(self.timestamp_msb) << TIMESTAMP_MSB_SHIFT) + u64::from(self.timestamp_lsb)
    }
}

/// The pre/post counter snapshots read in one transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StreamDescriptor {
    pub pre: CounterSnapshot,
    pub post: CounterSnapshot,
}

impl StreamDescriptor {
    pub fn parse(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < DESCRIPTOR_LEN {
            return Err(EngineError::InvalidResponse(format!(
                "stream descriptor is {} bytes, expected {DESCRIPTOR_LEN}",
                bytes.len()
            )));
        }
        Ok(Self {
            pre: CounterSnapshot::parse(&bytes[..SNAPSHOT_LEN]),
            post: CounterSnapshot::parse(&bytes[SNAPSHOT_LEN..DESCRIPTOR_LEN]),
        })
    }

    /// Samples in the burst.
    pub fn sample_count(&self) -> u16 {
        self.post.available
    }

    /// The pre-read timestamp if the counter did not move, else the post-read one.
    pub fn timestamp(&self) -> u64 {
        if self.pre.available == self.post.available {
            self.pre.timestamp()
        } else {
            self.post.timestamp()
        }
    }
}

/// Sample width of `stream`, or `None` when out of range.
pub fn bytes_per_sample(stream: u8) -> Option<usize> {
    BYTES_PER_SAMPLE.get(usize::from(stream)).copied()
}

/// Read the descriptor of `stream`.
pub fn read_descriptor(bus: &mut dyn Bus, stream: u8) -> Result<StreamDescriptor> {
    check_stream(stream)?;
    let mut buf = FramedBuffer::for_read(DESCRIPTOR_LEN);
    let offset = bus.recv_command(
        RD_STREAM_DESC_0 + stream,
        &mut buf,
        DESCRIPTOR_LEN,
        0,
        LockFlag::Unlock,
        DESCRIPTOR_LEN,
    )?;
    StreamDescriptor::parse(buf.received(offset, DESCRIPTOR_LEN)?)
}

/// Read one burst from `stream` and wrap it in a stream envelope.
///
/// The payload is `[samples][timestamp: 6 bytes LE][status]`.
pub fn read_stream(bus: &mut dyn Bus, stream: u8) -> Result<Envelope> {
    let width = check_stream(stream)?;
    let descriptor = read_descriptor(bus, stream)?;
    let samples_len = usize::from(descriptor.sample_count()) * width;
    let transfer_len = samples_len + STREAM_TIMESTAMP_LEN + STREAM_STATUS_LEN;
    let timestamp = descriptor.timestamp();

    debug!(
        stream,
        samples = descriptor.sample_count(),
        samples_len,
        timestamp,
        "reading stream burst"
    );

    let mut buf = FramedBuffer::for_read(transfer_len);
    let offset = bus.recv_command(
        VRD_STREAM_0 + stream,
        &mut buf,
        samples_len,
        0,
        LockFlag::Unlock,
        transfer_len,
    )?;

    let ts_start = offset + samples_len;
    buf.span_mut(ts_start, ts_start + STREAM_TIMESTAMP_LEN)?
        .copy_from_slice(&timestamp.to_le_bytes()[..STREAM_TIMESTAMP_LEN]);

    let payload = buf.into_received(offset, transfer_len)?;
    trace!(stream, payload = ?payload, "stream burst");
    Ok(Envelope::stream(u16::from(stream), payload))
}

fn check_stream(stream: u8) -> Result<usize> {
    bytes_per_sample(stream).ok_or_else(|| {
        EngineError::InvalidResponse(format!("stream {stream} out of range (0..{STREAM_COUNT})"))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeBus;

    fn descriptor_bytes(pre: (u16, u16, u32), post: (u16, u16, u32)) -> Vec<u8> {
        let mut out = Vec::with_capacity(DESCRIPTOR_LEN);
        for (avail, lsb, msb) in [pre, post] {
            out.extend_from_slice(&avail.to_le_bytes());
            out.extend_from_slice(&lsb.to_le_bytes());
            out.extend_from_slice(&msb.to_le_bytes());
        }
        out
    }

    #[test]
    fn steady_counter_uses_pre_timestamp() {
        let descriptor =
            StreamDescriptor::parse(&descriptor_bytes((4, 0x10, 2), (4, 0x20, 3))).unwrap();
        assert_eq!(descriptor.sample_count(), 4);
        assert_eq!(descriptor.timestamp(), (2 << 15) + 0x10);
    }

    #[test]
    fn moving_counter_uses_post_timestamp() {
        let descriptor =
            StreamDescriptor::parse(&descriptor_bytes((3, 0x10, 2), (5, 0x20, 3))).unwrap();
        assert_eq!(descriptor.sample_count(), 5);
        assert_eq!(descriptor.timestamp(), (3 << 15) + 0x20);
    }

    #[test]
    fn freshness_over_a_range_of_snapshots() {
        for pre_avail in 0u16..6 {
            for post_avail in 0u16..6 {
                let pre = CounterSnapshot {
                    available: pre_avail,
                    timestamp_lsb: 100 + pre_avail,
                    timestamp_msb: 7,
                };
                let post = CounterSnapshot {
                    available: post_avail,
                    timestamp_lsb: 200 + post_avail,
                    timestamp_msb: 9,
                };
                let descriptor = StreamDescriptor { pre, post };
                let expected = if pre_avail == post_avail {
                    pre.timestamp()
                } else {
                    post.timestamp()
                };
                assert_eq!(descriptor.timestamp(), expected);
            }
        }
    }

    #[test]
    fn short_descriptor_rejected() {
        let err = StreamDescriptor::parse(&[0u8; 10]).unwrap_err();
        assert!(matches!(err, EngineError::InvalidResponse(_)));
    }

    #[test]
    fn width_table_is_exact() {
        assert_eq!(BYTES_PER_SAMPLE.len(), 22);
        assert_eq!(&BYTES_PER_SAMPLE[..12], &[0, 0, 6, 6, 0, 6, 6, 0, 0, 4, 2, 0]);
        assert!(BYTES_PER_SAMPLE[12..].iter().all(|&w| w == 0));
        assert_eq!(bytes_per_sample(22), None);
    }

    #[test]
    fn burst_carries_samples_timestamp_and_status() {
        let (mut bus, handle) = FakeBus::new();
        handle.respond(
            RD_STREAM_DESC_0 + 5,
            descriptor_bytes((2, 0x0102, 1), (2, 0x0304, 1)),
        );
        // Two magnetometer samples, six placeholder timestamp bytes, status.
        let mut burst: Vec<u8> = (1..=12).collect();
        burst.extend_from_slice(&[0xEE; 6]);
        burst.push(0x5A);
        handle.respond(VRD_STREAM_0 + 5, burst);

        let envelope = read_stream(&mut bus, 5).unwrap();
        assert_eq!(envelope.stream, 5);
        assert_eq!(envelope.handler, hifc_frame::SENSOR);

        let samples = envelope.stream_samples().unwrap();
        assert_eq!(samples.samples, &(1..=12).collect::<Vec<u8>>()[..]);
        assert_eq!(samples.timestamp, (1 << 15) + 0x0102);
        assert_eq!(samples.status, 0x5A);

        let reads = handle.received();
        assert_eq!(reads.len(), 2);
        assert_eq!(reads[1].opcode, VRD_STREAM_0 + 5);
        assert_eq!(reads[1].len, 12);
        assert_eq!(reads[1].transfer_len, 12 + 6 + 1);
    }

    #[test]
    fn zero_width_stream_still_reads_trailer() {
        let (mut bus, handle) = FakeBus::new();
        handle.respond(RD_STREAM_DESC_0, descriptor_bytes((9, 1, 0), (9, 1, 0)));
        handle.respond(VRD_STREAM_0, vec![0, 0, 0, 0, 0, 0, 0x01]);

        let envelope = read_stream(&mut bus, 0).unwrap();
        let samples = envelope.stream_samples().unwrap();
        assert!(samples.samples.is_empty());
        assert_eq!(samples.timestamp, 1);
        assert_eq!(samples.status, 0x01);
    }

    #[test]
    fn out_of_range_stream_never_touches_bus() {
        let (mut bus, handle) = FakeBus::new();
        assert!(read_stream(&mut bus, 22).is_err());
        assert!(handle.received().is_empty());
    }
}

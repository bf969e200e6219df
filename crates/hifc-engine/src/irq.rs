//! Pending-event dispatch.
//!
//! One pass reads the controller's 64-bit pending-event register, masks what
//! it saw, spawns one work item per set bit, then queues an unmask of the
//! handled bits behind that work. Passes run on the worker thread, so two
//! passes never overlap.
//!
//! ```text
//!  63        36 35  34  33  32  31  30  29    22 21       0
//! ┌────────────┬───┬───┬───┬───┬───┬───┬────────┬──────────┐
//! │  unused    │W1 │W0 │R1 │R0 │rsv│RDY│  EXT   │  STREAM  │
//! └────────────┴───┴───┴───┴───┴───┴───┴────────┴──────────┘
//! ```

use std::sync::Arc;

use hifc_transport::command::{
    RD_PENDING_EVENTS, WT_CLEAR_16, WT_MASK_64, WT_UNMASK_32, WT_UNMASK_64,
};
use hifc_transport::{Bus, FramedBuffer, LockFlag};
use tracing::{debug, info, warn};

use crate::engine::{Shared, WorkerContext};
use crate::error::Result;
use crate::message::read_message;
use crate::scheduler::Priority;
use crate::stream::read_stream;

/// First stream data-available bit.
pub const STREAM_FIRST: u32 = 0;
/// Last stream data-available bit.
pub const STREAM_LAST: u32 = 21;
/// First external-signal bit.
pub const EXT_FIRST: u32 = 22;
/// Last external-signal bit.
pub const EXT_LAST: u32 = 29;
/// Controller ready / reset notification.
pub const CONTROLLER_READY: u32 = 30;
pub const RESERVED: u32 = 31;
/// Read buffer 0 holds a message.
pub const READ_READY_0: u32 = 32;
/// Read buffer 1 holds a message.
pub const READ_READY_1: u32 = 33;
/// Write buffer 0 is free.
pub const WRITE_READY_0: u32 = 34;
/// Write buffer 1 is free.
pub const WRITE_READY_1: u32 = 35;
/// Highest bit a pass examines.
pub const LAST_EXAMINED: u32 = 62;

/// Bits the pass leaves masked: they are re-armed on demand.
pub const UNMASK_EXCLUDED: u64 =
    (1 << CONTROLLER_READY) | (1 << WRITE_READY_0) | (1 << WRITE_READY_1);

const PENDING_EVENTS_LEN: usize = 8;

/// Latch cleared when the controller reports ready.
const CONTROLLER_READY_LATCH: u16 = 1 << 8;

/// Logical channels whose write-ready bits a send asks to be signaled.
const WRITE_NOTIFY_MASK: u32 = (1 << 2) | (1 << 3);

/// Work spawned for one set bit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventWork {
    StreamRead(u8),
    MessageRead,
    PopPendingSend,
    ExternalSignal(u8),
    ControllerReset,
    Unsupported(u32),
}

impl EventWork {
    /// Priority the work runs at, or `None` for bits that spawn nothing.
    pub fn priority(&self) -> Option<Priority> {
        match self {
            Self::StreamRead(_) => Some(Priority::Stream),
            Self::MessageRead | Self::ExternalSignal(_) => Some(Priority::Message),
            Self::PopPendingSend | Self::ControllerReset => Some(Priority::Irq),
            Self::Unsupported(_) => None,
        }
    }
}

/// Map one bit of the pending-event register to its work.
pub fn classify_bit(bit: u32) -> EventWork {
    match bit {
        STREAM_FIRST..=STREAM_LAST => EventWork::StreamRead(bit as u8),
        EXT_FIRST..=EXT_LAST => EventWork::ExternalSignal(bit as u8),
        CONTROLLER_READY => EventWork::ControllerReset,
        READ_READY_0 | READ_READY_1 => EventWork::MessageRead,
        WRITE_READY_0 | WRITE_READY_1 => EventWork::PopPendingSend,
        _ => EventWork::Unsupported(bit),
    }
}

/// Work for every examined bit set in `bitmap`, lowest bit first.
pub fn plan_pass(bitmap: u64) -> Vec<EventWork> {
    (0..=LAST_EXAMINED)
        .filter(|bit| bitmap & (1u64 << bit) != 0)
        .map(classify_bit)
        .collect()
}

/// Bits to unmask after a pass over `bitmap`.
pub fn unmask_value(bitmap: u64) -> u64 {
    bitmap & !UNMASK_EXCLUDED
}

pub fn read_pending_events(bus: &mut dyn Bus) -> Result<u64> {
    let mut buf = FramedBuffer::for_read(PENDING_EVENTS_LEN);
    let offset = bus.recv_command(
        RD_PENDING_EVENTS,
        &mut buf,
        PENDING_EVENTS_LEN,
        0,
        LockFlag::Unlock,
        PENDING_EVENTS_LEN,
    )?;
    let mut bytes = [0u8; PENDING_EVENTS_LEN];
    bytes.copy_from_slice(buf.received(offset, PENDING_EVENTS_LEN)?);
    Ok(u64::from_le_bytes(bytes))
}

fn write_fixed(bus: &mut dyn Bus, opcode: u8, bytes: &[u8]) -> Result<()> {
    let mut buf = FramedBuffer::with_payload(bytes);
    bus.send_command(opcode, &mut buf, 0, LockFlag::Unlock)?;
    Ok(())
}

pub fn mask_events(bus: &mut dyn Bus, bitmap: u64) -> Result<()> {
    write_fixed(bus, WT_MASK_64, &bitmap.to_le_bytes())
}

/// Unmask the bits a pass handled. Returns whether a command was sent.
pub fn unmask_handled(bus: &mut dyn Bus, bitmap: u64) -> Result<bool> {
    let value = unmask_value(bitmap);
    if value == 0 {
        return Ok(false);
    }
    write_fixed(bus, WT_UNMASK_64, &value.to_le_bytes())?;
    Ok(true)
}

/// Ask the controller to signal when a write buffer frees up.
pub fn request_write_notification(bus: &mut dyn Bus) -> Result<()> {
    write_fixed(bus, WT_UNMASK_32, &WRITE_NOTIFY_MASK.to_le_bytes())
}

/// Mark the controller ready, reset arbitration and clear its ready latch.
pub(crate) fn controller_reset(ctx: &mut WorkerContext<'_>) -> Result<()> {
    ctx.shared.mark_controller_ready();
    info!("controller ready, channel arbitration reset");
    write_fixed(ctx.bus, WT_CLEAR_16, &CONTROLLER_READY_LATCH.to_le_bytes())
}

/// Run one dispatch pass. Always re-arms the interrupt line.
pub(crate) fn dispatch_pass(ctx: &mut WorkerContext<'_>) {
    let shared = Arc::clone(ctx.shared);
    shared.stats.passes.bump();

    match read_pending_events(ctx.bus) {
        Ok(bitmap) => handle_events(ctx, bitmap),
        Err(e) => warn!(error = %e, "failed to read pending events"),
    }

    shared.finish_pass();
    ctx.bus.enable_interrupt_line();
}

fn handle_events(ctx: &mut WorkerContext<'_>, bitmap: u64) {
    let shared = Arc::clone(ctx.shared);
    debug!(bitmap = format_args!("{bitmap:#018x}"), "pending events");

    let ready = shared.is_controller_ready() || bitmap & (1 << CONTROLLER_READY) != 0;
    if !ready {
        debug!("controller not ready, events ignored");
        return;
    }

    if let Err(e) = mask_events(ctx.bus, bitmap) {
        warn!(error = %e, "failed to mask pending events");
    }

    for work in plan_pass(bitmap) {
        spawn_work(&shared, work);
    }

    let queued = shared.spawn(Priority::Message, "unmask", move |ctx| {
        match unmask_handled(ctx.bus, bitmap) {
            Ok(sent) => debug!(sent, "unmask handled events"),
            Err(e) => warn!(error = %e, "failed to unmask events"),
        }
    });
    if let Err(e) = queued {
        // Bits left masked would never be raised again.
        warn!(error = %e, "unmask not scheduled, unmasking inline");
        if let Err(e) = unmask_handled(ctx.bus, bitmap) {
            warn!(error = %e, "failed to unmask events");
        }
    }
}

fn spawn_work(shared: &Shared, work: EventWork) {
    let queued = match work {
        EventWork::StreamRead(stream) => {
            shared.spawn(Priority::Stream, "stream-read", move |ctx| {
                match read_stream(ctx.bus, stream) {
                    Ok(envelope) => {
                        ctx.shared.stats.stream_reads.bump();
                        ctx.shared.deliver(&envelope);
                    }
                    Err(e) => warn!(stream, error = %e, "stream read failed"),
                }
            })
        }
        EventWork::MessageRead => shared.spawn(Priority::Message, "message-read", |ctx| {
            let slot = ctx.shared.select_read();
            match read_message(ctx.bus, slot) {
                Ok(Some(envelope)) => {
                    ctx.shared.stats.messages_received.bump();
                    ctx.shared.deliver(&envelope);
                }
                Ok(None) => {}
                Err(e) => warn!(slot = slot.index(), error = %e, "message read failed"),
            }
        }),
        EventWork::PopPendingSend => shared.spawn(Priority::Irq, "pop-pending-send", |ctx| {
            match ctx.shared.release_pending_send() {
                Some(_) => debug!("pending send released"),
                None => debug!("write buffer ready with no pending send"),
            }
        }),
        EventWork::ExternalSignal(bit) => {
            shared.spawn(Priority::Message, "external-signal", move |ctx| {
                ctx.shared.stats.external_signals.bump();
                debug!(bit, "external signal");
            })
        }
        EventWork::ControllerReset => shared.spawn(Priority::Irq, "controller-reset", |ctx| {
            if let Err(e) = controller_reset(ctx) {
                warn!(error = %e, "failed to clear controller ready latch");
            }
        }),
        EventWork::Unsupported(bit) => {
            shared.stats.unsupported_bits.bump();
            warn!(bit, "unsupported pending event");
            return;
        }
    };

    if let Err(e) = queued {
        shared.stats.dropped.bump();
        warn!(?work, error = %e, "event work not scheduled, left for the next pass");
    }
}

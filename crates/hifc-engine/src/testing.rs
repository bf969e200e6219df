//! Scripted bus used by the engine tests.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};

use hifc_transport::command::RD_PENDING_EVENTS;
use hifc_transport::{
    Bus, CommandHeader, FramedBuffer, InterruptLine, LockFlag, SoftInterruptLine, TransportError,
    HEADER_RESERVE,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct SentCommand {
    pub opcode: u8,
    pub payload: Vec<u8>,
    pub offset: u8,
    pub flag: LockFlag,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct RecvCommand {
    pub opcode: u8,
    pub len: usize,
    pub offset: u8,
    pub flag: LockFlag,
    pub transfer_len: usize,
}

#[derive(Default)]
struct FakeState {
    sent: Vec<SentCommand>,
    received: Vec<RecvCommand>,
    responses: HashMap<u8, VecDeque<Vec<u8>>>,
    pending_events: u64,
    failing: HashSet<u8>,
    held: Option<u8>,
    blocked: bool,
}

struct Shared {
    state: Mutex<FakeState>,
    changed: Condvar,
    irq: Arc<SoftInterruptLine>,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, FakeState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Block while `opcode` is held.
    fn gate(&self, opcode: u8) {
        let mut state = self.lock();
        if state.held != Some(opcode) {
            return;
        }
        state.blocked = true;
        self.changed.notify_all();
        while state.held == Some(opcode) {
            state = self
                .changed
                .wait(state)
                .unwrap_or_else(PoisonError::into_inner);
        }
        state.blocked = false;
    }
}

/// A bus that records every command and replays scripted responses.
pub(crate) struct FakeBus {
    shared: Arc<Shared>,
}

/// Test-side view of a [`FakeBus`].
#[derive(Clone)]
pub(crate) struct FakeHandle {
    shared: Arc<Shared>,
}

impl FakeBus {
    pub(crate) fn new() -> (Self, FakeHandle) {
        let shared = Arc::new(Shared {
            state: Mutex::new(FakeState::default()),
            changed: Condvar::new(),
            irq: Arc::new(SoftInterruptLine::new()),
        });
        (
            Self {
                shared: Arc::clone(&shared),
            },
            FakeHandle { shared },
        )
    }
}

impl FakeHandle {
    /// Queue a response for the next read of `opcode`.
    pub(crate) fn respond(&self, opcode: u8, bytes: impl Into<Vec<u8>>) {
        self.shared
            .lock()
            .responses
            .entry(opcode)
            .or_default()
            .push_back(bytes.into());
    }

    /// Value returned by the next pending-event read, cleared once read.
    pub(crate) fn raise_events(&self, bits: u64) {
        self.shared.lock().pending_events |= bits;
    }

    /// Make every command with `opcode` fail.
    pub(crate) fn fail(&self, opcode: u8) {
        self.shared.lock().failing.insert(opcode);
    }

    /// Block the next command with `opcode` until [`FakeHandle::release`].
    pub(crate) fn hold(&self, opcode: u8) {
        self.shared.lock().held = Some(opcode);
    }

    pub(crate) fn release(&self) {
        self.shared.lock().held = None;
        self.shared.changed.notify_all();
    }

    /// Wait until a command is parked on the held opcode.
    pub(crate) fn wait_blocked(&self) {
        let mut state = self.shared.lock();
        while !state.blocked {
            state = self
                .shared
                .changed
                .wait(state)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    pub(crate) fn sent(&self) -> Vec<SentCommand> {
        self.shared.lock().sent.clone()
    }

    pub(crate) fn sent_opcodes(&self) -> Vec<u8> {
        self.shared.lock().sent.iter().map(|c| c.opcode).collect()
    }

    pub(crate) fn received(&self) -> Vec<RecvCommand> {
        self.shared.lock().received.clone()
    }

    pub(crate) fn clear_log(&self) {
        let mut state = self.shared.lock();
        state.sent.clear();
        state.received.clear();
    }

    pub(crate) fn irq(&self) -> Arc<SoftInterruptLine> {
        Arc::clone(&self.shared.irq)
    }
}

impl Bus for FakeBus {
    fn name(&self) -> &'static str {
        "fake"
    }

    fn send_command(
        &mut self,
        opcode: u8,
        buf: &mut FramedBuffer,
        offset: u8,
        flag: LockFlag,
    ) -> hifc_transport::Result<()> {
        CommandHeader::new(opcode, buf.payload_len(), offset, flag)?;
        self.shared.gate(opcode);

        let mut state = self.shared.lock();
        if state.failing.contains(&opcode) {
            return Err(TransportError::ShortTransfer {
                expected: buf.payload_len(),
                actual: 0,
            });
        }
        state.sent.push(SentCommand {
            opcode,
            payload: buf.payload_region().to_vec(),
            offset,
            flag,
        });
        Ok(())
    }

    fn recv_command(
        &mut self,
        opcode: u8,
        buf: &mut FramedBuffer,
        len: usize,
        offset: u8,
        flag: LockFlag,
        transfer_len: usize,
    ) -> hifc_transport::Result<usize> {
        CommandHeader::new(opcode, len, offset, flag)?;
        self.shared.gate(opcode);

        let mut state = self.shared.lock();
        state.received.push(RecvCommand {
            opcode,
            len,
            offset,
            flag,
            transfer_len,
        });
        if state.failing.contains(&opcode) {
            return Err(TransportError::ShortTransfer {
                expected: transfer_len,
                actual: 0,
            });
        }

        let scripted = state
            .responses
            .get_mut(&opcode)
            .and_then(VecDeque::pop_front);
        let response = match scripted {
            Some(bytes) => bytes,
            None if opcode == RD_PENDING_EVENTS => {
                let bits = std::mem::take(&mut state.pending_events);
                bits.to_le_bytes().to_vec()
            }
            None => Vec::new(),
        };
        drop(state);

        let n = response.len().min(transfer_len);
        buf.span_mut(HEADER_RESERVE, HEADER_RESERVE + n)?
            .copy_from_slice(&response[..n]);
        Ok(HEADER_RESERVE)
    }

    fn interrupt_line(&self) -> Arc<dyn InterruptLine> {
        self.shared.irq.clone()
    }
}

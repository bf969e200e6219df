//! The engine context object.
//!
//! An [`Engine`] owns the bus (moved onto its worker thread), the scheduler,
//! the channel arbiter, the pending-send queue and the dispatch registry.
//! Every bus transaction runs on the worker thread; callers only ever wait on
//! a bounded completion.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::JoinHandle;
use std::time::Duration;

use bytes::Bytes;
use hifc_frame::{build_message, Envelope, TraceBuffer, TraceSink};
use hifc_transport::{Bus, InterruptLine, LockFlag};
use serde::Serialize;
use tracing::{debug, error, info, trace, warn};

use crate::arbiter::{BufferSlot, ChannelArbiter};
use crate::config::EngineConfig;
use crate::error::{EngineError, Result};
use crate::irq;
use crate::pending::PendingSendQueue;
use crate::registry::{Disposition, MessageHandler, RegistrationId, Registry};
use crate::scheduler::{Priority, TaskId, TaskPool, TaskQueue};
use crate::send::{plan_chunks, send_chunk, Chunk};

/// What a work item sees while it runs on the worker thread.
pub(crate) struct WorkerContext<'a> {
    pub(crate) bus: &'a mut dyn Bus,
    pub(crate) shared: &'a Arc<Shared>,
}

#[derive(Debug, Default)]
pub(crate) struct Counter(AtomicU64);

impl Counter {
    pub(crate) fn bump(&self) {
        self.0.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn get(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }
}

#[derive(Debug, Default)]
pub(crate) struct Counters {
    pub(crate) executed: Counter,
    pub(crate) dropped: Counter,
    pub(crate) timeouts: Counter,
    pub(crate) stalls: Counter,
    pub(crate) passes: Counter,
    pub(crate) stream_reads: Counter,
    pub(crate) messages_received: Counter,
    pub(crate) consumed: Counter,
    pub(crate) forwarded: Counter,
    pub(crate) sends: Counter,
    pub(crate) chunks_sent: Counter,
    pub(crate) abandoned: Counter,
    pub(crate) external_signals: Counter,
    pub(crate) unsupported_bits: Counter,
}

/// Point-in-time engine counters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EngineStats {
    pub tasks_executed: u64,
    /// Work discarded while faulted or not scheduled for lack of pool slots.
    pub tasks_dropped: u64,
    pub timeouts: u64,
    pub stalls: u64,
    pub dispatch_passes: u64,
    pub stream_reads: u64,
    pub messages_received: u64,
    pub envelopes_consumed: u64,
    pub envelopes_forwarded: u64,
    pub sends: u64,
    pub chunks_sent: u64,
    /// Segmented sends closed early after a chunk failed.
    pub sends_abandoned: u64,
    pub external_signals: u64,
    pub unsupported_bits: u64,
    pub queued_tasks: usize,
    pub pending_sends: usize,
    pub pool_in_use: usize,
    pub pool_capacity: usize,
    /// Read buffer the next message read will use.
    pub next_read_slot: u8,
    /// Write buffer the next logical send will use.
    pub next_write_slot: u8,
    pub faulted: bool,
    pub controller_ready: bool,
}

/// State shared between callers and the worker thread.
pub(crate) struct Shared {
    config: EngineConfig,
    pub(crate) queue: TaskQueue,
    pool: TaskPool,
    pending: PendingSendQueue,
    arbiter: Mutex<ChannelArbiter>,
    registry: Registry,
    irq: Arc<dyn InterruptLine>,
    faulted: AtomicBool,
    controller_ready: AtomicBool,
    pass_scheduled: AtomicBool,
    running: AtomicBool,
    send_lock: Mutex<()>,
    pub(crate) stats: Counters,
}

impl Shared {
    fn ensure_healthy(&self) -> Result<()> {
        if !self.running.load(Ordering::Acquire) {
            return Err(EngineError::Shutdown);
        }
        if self.faulted.load(Ordering::Acquire) {
            return Err(EngineError::Faulted);
        }
        Ok(())
    }

    pub(crate) fn is_faulted(&self) -> bool {
        self.faulted.load(Ordering::Acquire)
    }

    pub(crate) fn is_controller_ready(&self) -> bool {
        self.controller_ready.load(Ordering::Acquire)
    }

    pub(crate) fn mark_controller_ready(&self) {
        self.controller_ready.store(true, Ordering::Release);
        self.lock_arbiter().reset();
    }

    pub(crate) fn select_read(&self) -> BufferSlot {
        self.lock_arbiter().select_read()
    }

    pub(crate) fn select_write(&self) -> BufferSlot {
        self.lock_arbiter().select_write()
    }

    fn lock_arbiter(&self) -> MutexGuard<'_, ChannelArbiter> {
        self.arbiter.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn finish_pass(&self) {
        self.pass_scheduled.store(false, Ordering::Release);
    }

    pub(crate) fn release_pending_send(&self) -> Option<TaskId> {
        self.pending.pop_into(&self.queue)
    }

    /// Hand a received envelope to the registry.
    pub(crate) fn deliver(&self, envelope: &Envelope) {
        match self.registry.dispatch(envelope) {
            Disposition::Consumed => self.stats.consumed.bump(),
            Disposition::Forward => self.stats.forwarded.bump(),
        }
    }

    /// Queue fire-and-forget work.
    pub(crate) fn spawn<F>(&self, priority: Priority, label: &'static str, f: F) -> Result<TaskId>
    where
        F: FnOnce(&mut WorkerContext<'_>) + Send + 'static,
    {
        let task = self.pool.create(priority, label, Box::new(f))?;
        let id = task.id();
        trace!(task = label, priority = priority.as_str(), "task queued");
        self.queue.push(task);
        Ok(id)
    }

    /// Queue work and wait for its result.
    pub(crate) fn submit_sync<T, F>(&self, priority: Priority, label: &'static str, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut WorkerContext<'_>) -> Result<T> + Send + 'static,
    {
        self.ensure_healthy()?;
        let (tx, rx) = mpsc::sync_channel(1);
        let id = self.spawn(priority, label, move |ctx| {
            let _ = tx.send(f(ctx));
        })?;
        self.await_completion(id, label, rx)
    }

    /// Park send work until the controller reports a free write buffer.
    ///
    /// A write-ready notification request is queued at interrupt priority so
    /// the controller knows to signal.
    pub(crate) fn submit_gated<F>(&self, label: &'static str, f: F) -> Result<()>
    where
        F: FnOnce(&mut WorkerContext<'_>) -> Result<()> + Send + 'static,
    {
        if !self.config.gate_sends_on_write_ready {
            return self.submit_sync(Priority::Message, label, f);
        }

        self.ensure_healthy()?;
        let (tx, rx) = mpsc::sync_channel(1);
        let task = self.pool.create(
            Priority::Message,
            label,
            Box::new(move |ctx: &mut WorkerContext<'_>| {
                let _ = tx.send(f(ctx));
            }),
        )?;
        let id = task.id();
        self.pending.push(task);

        let notify = self.spawn(Priority::Irq, "write-notify", |ctx| {
            if let Err(e) = irq::request_write_notification(ctx.bus) {
                warn!(error = %e, "write notification request failed");
            }
        });
        if let Err(e) = notify {
            self.pending.remove(id);
            return Err(e);
        }

        self.await_completion(id, label, rx)
    }

    /// Unlock `slot` after a segmented send failed at byte `offset`.
    ///
    /// Earlier chunks went out with [`LockFlag::Lock`]; a zero-length final
    /// chunk makes the controller drop the partial message. The close is not
    /// gated: the slot is still held by the abandoned message.
    fn close_abandoned(&self, slot: BufferSlot, offset: usize, payload: Bytes) {
        self.stats.abandoned.bump();
        let close = Chunk {
            offset,
            len: 0,
            flag: LockFlag::Unlock,
        };
        warn!(slot = slot.index(), offset, "closing abandoned segmented send");
        let closed = self.submit_sync(Priority::Message, "send-close", move |ctx| {
            send_chunk(ctx.bus, slot, close, &payload)
        });
        if let Err(e) = closed {
            error!(
                slot = slot.index(),
                error = %e,
                "write buffer left locked until the controller resets"
            );
        }
    }

    fn await_completion<T>(
        &self,
        id: TaskId,
        label: &'static str,
        rx: Receiver<Result<T>>,
    ) -> Result<T> {
        let timeout = self.config.sync_timeout();
        match rx.recv_timeout(timeout) {
            Ok(result) => result,
            Err(RecvTimeoutError::Disconnected) => {
                if self.is_faulted() {
                    Err(EngineError::Faulted)
                } else {
                    Err(EngineError::Shutdown)
                }
            }
            Err(RecvTimeoutError::Timeout) => {
                if self.pending.remove(id) || self.queue.cancel(id) {
                    self.stats.timeouts.bump();
                    warn!(task = label, ?timeout, "work timed out before it started");
                    return Err(EngineError::Timeout(timeout));
                }
                if let Ok(result) = rx.try_recv() {
                    return result;
                }
                self.stats.stalls.bump();
                self.faulted.store(true, Ordering::Release);
                error!(task = label, ?timeout, "work stalled mid-transaction, engine faulted");
                Err(EngineError::Stalled(timeout))
            }
        }
    }
}

fn run_worker(mut bus: Box<dyn Bus>, shared: Arc<Shared>) {
    info!(bus = bus.name(), "worker started");
    while let Some(task) = shared.queue.pop_blocking() {
        if shared.is_faulted() {
            warn!(task = task.label(), "engine faulted, dropping task");
            shared.stats.dropped.bump();
            drop(task);
        } else {
            trace!(task = task.label(), priority = task.priority().as_str(), "task start");
            let mut ctx = WorkerContext {
                bus: &mut *bus,
                shared: &shared,
            };
            task.run(&mut ctx);
            shared.stats.executed.bump();
        }
        shared.queue.finish();
    }
    info!("worker stopped");
}

/// Configures and starts an [`Engine`].
pub struct EngineBuilder {
    bus: Box<dyn Bus>,
    config: EngineConfig,
    trace: Option<Arc<dyn TraceSink>>,
}

impl EngineBuilder {
    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    /// Send unclaimed envelopes to `sink` instead of an in-memory buffer.
    pub fn trace_sink(mut self, sink: Arc<dyn TraceSink>) -> Self {
        self.trace = Some(sink);
        self
    }

    /// Validate the configuration and start the worker thread.
    pub fn start(self) -> Result<Engine> {
        self.config.validate()?;

        let (trace, trace_buffer): (Arc<dyn TraceSink>, _) = match self.trace {
            Some(sink) => (sink, None),
            None => {
                let buffer = Arc::new(TraceBuffer::new(self.config.trace_capacity));
                (buffer.clone(), Some(buffer))
            }
        };

        let irq = self.bus.interrupt_line();
        let shared = Arc::new(Shared {
            queue: TaskQueue::new(),
            pool: TaskPool::new(self.config.task_pool_size),
            pending: PendingSendQueue::new(),
            arbiter: Mutex::new(ChannelArbiter::new()),
            registry: Registry::new(trace),
            irq,
            faulted: AtomicBool::new(false),
            controller_ready: AtomicBool::new(false),
            pass_scheduled: AtomicBool::new(false),
            running: AtomicBool::new(true),
            send_lock: Mutex::new(()),
            stats: Counters::default(),
            config: self.config,
        });

        let bus = self.bus;
        let worker_shared = Arc::clone(&shared);
        let worker = std::thread::Builder::new()
            .name(shared.config.worker_name.clone())
            .spawn(move || run_worker(bus, worker_shared))
            .map_err(EngineError::Spawn)?;

        debug!(
            pool = shared.config.task_pool_size,
            timeout_ms = shared.config.sync_timeout_ms,
            gated = shared.config.gate_sends_on_write_ready,
            "engine started"
        );

        Ok(Engine {
            shared,
            worker: Mutex::new(Some(worker)),
            trace_buffer,
        })
    }
}

/// Host-side protocol engine for one companion controller.
///
/// `Engine` is `Send + Sync`; share it behind an `Arc` to call it from
/// several threads.
pub struct Engine {
    shared: Arc<Shared>,
    worker: Mutex<Option<JoinHandle<()>>>,
    trace_buffer: Option<Arc<TraceBuffer>>,
}

impl Engine {
    pub fn builder(bus: impl Bus + 'static) -> EngineBuilder {
        EngineBuilder {
            bus: Box::new(bus),
            config: EngineConfig::default(),
            trace: None,
        }
    }

    pub fn start(bus: impl Bus + 'static, config: EngineConfig) -> Result<Self> {
        Self::builder(bus).config(config).start()
    }

    pub fn config(&self) -> &EngineConfig {
        &self.shared.config
    }

    /// Route envelopes tagged `handler_id` to `handler`.
    pub fn register(
        &self,
        handler_id: u8,
        handler: impl MessageHandler + 'static,
    ) -> RegistrationId {
        self.shared.registry.register(handler_id, Arc::new(handler))
    }

    pub fn register_arc(&self, handler_id: u8, handler: Arc<dyn MessageHandler>) -> RegistrationId {
        self.shared.registry.register(handler_id, handler)
    }

    pub fn unregister(&self, id: RegistrationId) -> bool {
        self.shared.registry.unregister(id)
    }

    /// Send a structured message: a payload header for `handler_id` and
    /// `api_id` followed by `body`.
    pub fn send(&self, handler_id: u8, api_id: u16, body: &[u8]) -> Result<()> {
        let message = build_message(handler_id, api_id, 0, body)?;
        self.send_raw(&message)
    }

    /// Send `payload` verbatim, segmenting it when it exceeds one transaction.
    ///
    /// Whole logical sends are serialized: chunks of two callers never
    /// interleave.
    pub fn send_raw(&self, payload: &[u8]) -> Result<()> {
        let shared = &self.shared;
        shared.ensure_healthy()?;
        let chunks = plan_chunks(payload.len())?;
        let payload = Bytes::copy_from_slice(payload);

        let _guard = shared
            .send_lock
            .lock()
            .unwrap_or_else(PoisonError::into_inner);

        if let [chunk] = chunks.as_slice() {
            let chunk = *chunk;
            shared.submit_gated("send", move |ctx| {
                let slot = ctx.shared.select_write();
                send_chunk(ctx.bus, slot, chunk, &payload)?;
                ctx.shared.stats.chunks_sent.bump();
                Ok(())
            })?;
        } else {
            let slot = shared.select_write();
            debug!(
                len = payload.len(),
                chunks = chunks.len(),
                slot = slot.index(),
                "segmented send"
            );
            for chunk in chunks {
                let data = payload.clone();
                let sent = shared.submit_gated("send-chunk", move |ctx| {
                    send_chunk(ctx.bus, slot, chunk, &data)?;
                    ctx.shared.stats.chunks_sent.bump();
                    Ok(())
                });
                if let Err(e) = sent {
                    if chunk.offset > 0 {
                        shared.close_abandoned(slot, chunk.offset, payload);
                    }
                    return Err(e);
                }
            }
        }

        shared.stats.sends.bump();
        Ok(())
    }

    /// Entry point for the controller's interrupt line.
    ///
    /// Disables the line and schedules a dispatch pass; the pass re-enables
    /// it. Returns `false` when no pass was scheduled: the engine is faulted,
    /// shut down, or a pass is already outstanding.
    pub fn interrupt(&self) -> bool {
        let shared = &self.shared;
        if shared.ensure_healthy().is_err() {
            return false;
        }
        if shared.pass_scheduled.swap(true, Ordering::AcqRel) {
            return false;
        }

        shared.irq.disable();
        match shared.spawn(Priority::Irq, "dispatch-pass", irq::dispatch_pass) {
            Ok(_) => true,
            Err(e) => {
                warn!(error = %e, "dispatch pass not scheduled");
                shared.finish_pass();
                shared.irq.enable();
                false
            }
        }
    }

    /// Read the pending-event register without dispatching it.
    pub fn read_pending_events(&self) -> Result<u64> {
        self.shared
            .submit_sync(Priority::Irq, "read-pending-events", |ctx| {
                irq::read_pending_events(ctx.bus)
            })
    }

    pub fn is_faulted(&self) -> bool {
        self.shared.is_faulted()
    }

    /// Leave the faulted state and re-arm the interrupt line.
    pub fn clear_fault(&self) {
        if self.shared.faulted.swap(false, Ordering::AcqRel) {
            info!("engine fault cleared");
        }
        self.shared.finish_pass();
        self.shared.irq.enable();
    }

    pub fn is_controller_ready(&self) -> bool {
        self.shared.is_controller_ready()
    }

    /// Sends parked until the controller reports a free write buffer.
    pub fn pending_sends(&self) -> usize {
        self.shared.pending.len()
    }

    pub fn queued_tasks(&self) -> usize {
        self.shared.queue.len()
    }

    /// Wait until the worker has nothing queued or running.
    pub fn wait_idle(&self, timeout: Duration) -> bool {
        self.shared.queue.wait_idle(timeout)
    }

    pub fn stats(&self) -> EngineStats {
        let shared = &self.shared;
        let stats = &shared.stats;
        let (next_read, next_write) = shared.lock_arbiter().peek();
        EngineStats {
            tasks_executed: stats.executed.get(),
            tasks_dropped: stats.dropped.get(),
            timeouts: stats.timeouts.get(),
            stalls: stats.stalls.get(),
            dispatch_passes: stats.passes.get(),
            stream_reads: stats.stream_reads.get(),
            messages_received: stats.messages_received.get(),
            envelopes_consumed: stats.consumed.get(),
            envelopes_forwarded: stats.forwarded.get(),
            sends: stats.sends.get(),
            chunks_sent: stats.chunks_sent.get(),
            sends_abandoned: stats.abandoned.get(),
            external_signals: stats.external_signals.get(),
            unsupported_bits: stats.unsupported_bits.get(),
            queued_tasks: shared.queue.len(),
            pending_sends: shared.pending.len(),
            pool_in_use: shared.pool.in_use(),
            pool_capacity: shared.pool.capacity(),
            next_read_slot: next_read.index(),
            next_write_slot: next_write.index(),
            faulted: shared.is_faulted(),
            controller_ready: shared.is_controller_ready(),
        }
    }

    /// The in-memory trace, unless a custom sink was configured.
    pub fn trace_buffer(&self) -> Option<&Arc<TraceBuffer>> {
        self.trace_buffer.as_ref()
    }

    pub fn trace_sink(&self) -> &Arc<dyn TraceSink> {
        self.shared.registry.trace()
    }

    /// Stop the worker. Queued and parked work is dropped; waiters see
    /// [`EngineError::Shutdown`].
    pub fn shutdown(&self) {
        let handle = self
            .worker
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        let Some(handle) = handle else {
            return;
        };

        self.shared.running.store(false, Ordering::Release);
        self.shared.pending.clear();
        self.shared.queue.close();
        if handle.join().is_err() {
            error!("worker thread panicked");
        }
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        self.shutdown();
    }
}

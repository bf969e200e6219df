//! Priority-ordered work queue drained by the single worker thread.
//!
//! Work records are allocated from a fixed-size [`TaskPool`]; a record's pool
//! slot is returned when the record is dropped, whether after execution,
//! cancellation or shutdown.

use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use serde::Serialize;

use crate::engine::WorkerContext;
use crate::error::{EngineError, Result};

/// Scheduling rank of a work record. Higher ranks run first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    /// Structured message traffic.
    Message = 0,
    /// Stream channel bursts.
    Stream = 1,
    /// Interrupt-level bookkeeping.
    Irq = 2,
}

impl Priority {
    const COUNT: usize = 3;

    /// All ranks, most urgent first.
    pub const DESCENDING: [Priority; Self::COUNT] = [Self::Irq, Self::Stream, Self::Message];

    fn lane(self) -> usize {
        self as usize
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Message => "message",
            Self::Stream => "stream",
            Self::Irq => "irq",
        }
    }
}

/// Identifies a work record for cancellation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TaskId(u64);

pub(crate) type Job = Box<dyn FnOnce(&mut WorkerContext<'_>) + Send>;

/// A unit of work plus its pool slot.
pub(crate) struct Task {
    id: TaskId,
    priority: Priority,
    label: &'static str,
    job: Job,
    _slot: PoolSlot,
}

impl Task {
    pub(crate) fn id(&self) -> TaskId {
        self.id
    }

    pub(crate) fn priority(&self) -> Priority {
        self.priority
    }

    pub(crate) fn label(&self) -> &'static str {
        self.label
    }

    /// Execute the job. The pool slot is released when `self` drops here.
    pub(crate) fn run(self, ctx: &mut WorkerContext<'_>) {
        (self.job)(ctx);
    }
}

impl fmt::Debug for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Task")
            .field("id", &self.id)
            .field("priority", &self.priority)
            .field("label", &self.label)
            .finish()
    }
}

struct PoolSlot {
    in_use: Arc<AtomicUsize>,
}

impl Drop for PoolSlot {
    fn drop(&mut self) {
        self.in_use.fetch_sub(1, Ordering::AcqRel);
    }
}

/// Fixed-capacity allocator for work records.
pub(crate) struct TaskPool {
    capacity: usize,
    in_use: Arc<AtomicUsize>,
    next_id: AtomicU64,
}

impl TaskPool {
    pub(crate) fn new(capacity: usize) -> Self {
        Self {
            capacity,
            in_use: Arc::new(AtomicUsize::new(0)),
            next_id: AtomicU64::new(1),
        }
    }

    /// Allocate a work record, failing when every slot is taken.
    pub(crate) fn create(&self, priority: Priority, label: &'static str, job: Job) -> Result<Task> {
        let mut current = self.in_use.load(Ordering::Acquire);
        loop {
            if current >= self.capacity {
                return Err(EngineError::PoolExhausted {
                    capacity: self.capacity,
                });
            }
            match self.in_use.compare_exchange_weak(
                current,
                current + 1,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => break,
                Err(observed) => current = observed,
            }
        }

        Ok(Task {
            id: TaskId(self.next_id.fetch_add(1, Ordering::Relaxed)),
            priority,
            label,
            job,
            _slot: PoolSlot {
                in_use: Arc::clone(&self.in_use),
            },
        })
    }

    pub(crate) fn in_use(&self) -> usize {
        self.in_use.load(Ordering::Acquire)
    }

    pub(crate) fn capacity(&self) -> usize {
        self.capacity
    }
}

#[derive(Default)]
struct QueueState {
    lanes: [VecDeque<Task>; Priority::COUNT],
    active: bool,
    closed: bool,
}

impl QueueState {
    fn queued(&self) -> usize {
        self.lanes.iter().map(VecDeque::len).sum()
    }
}

/// Per-priority FIFO lanes drained high to low.
///
/// Equivalent to a single list where insertion goes before the first entry of
/// strictly lower priority: FIFO within a rank, higher ranks first.
pub(crate) struct TaskQueue {
    state: Mutex<QueueState>,
    ready: Condvar,
    idle: Condvar,
}

impl TaskQueue {
    pub(crate) fn new() -> Self {
        Self {
            state: Mutex::new(QueueState::default()),
            ready: Condvar::new(),
            idle: Condvar::new(),
        }
    }

    /// Enqueue a task and wake the worker. Tasks pushed after close are dropped.
    pub(crate) fn push(&self, task: Task) {
        let mut state = self.lock();
        if state.closed {
            tracing::debug!(task = task.label(), "queue closed, dropping task");
            return;
        }
        state.lanes[task.priority().lane()].push_back(task);
        drop(state);
        self.ready.notify_one();
    }

    /// Block until a task is available. Returns `None` once closed.
    pub(crate) fn pop_blocking(&self) -> Option<Task> {
        let mut state = self.lock();
        loop {
            if state.closed {
                return None;
            }
            for priority in Priority::DESCENDING {
                if let Some(task) = state.lanes[priority.lane()].pop_front() {
                    state.active = true;
                    return Some(task);
                }
            }
            state = self
                .ready
                .wait(state)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    /// Mark the task returned by the last `pop_blocking` as finished.
    pub(crate) fn finish(&self) {
        let mut state = self.lock();
        state.active = false;
        if state.queued() == 0 {
            self.idle.notify_all();
        }
    }

    /// Remove a task that has not started. Returns whether it was found.
    pub(crate) fn cancel(&self, id: TaskId) -> bool {
        let mut state = self.lock();
        for lane in state.lanes.iter_mut() {
            if let Some(pos) = lane.iter().position(|task| task.id() == id) {
                lane.remove(pos);
                return true;
            }
        }
        false
    }

    pub(crate) fn len(&self) -> usize {
        self.lock().queued()
    }

    /// Wait until nothing is queued and nothing is running.
    pub(crate) fn wait_idle(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut state = self.lock();
        loop {
            if state.closed || (state.queued() == 0 && !state.active) {
                return true;
            }
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            state = self
                .idle
                .wait_timeout(state, deadline - now)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
    }

    /// Stop the worker and drop everything still queued.
    pub(crate) fn close(&self) {
        let mut state = self.lock();
        state.closed = true;
        for lane in state.lanes.iter_mut() {
            lane.clear();
        }
        drop(state);
        self.ready.notify_all();
        self.idle.notify_all();
    }

    fn lock(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

//! Sends waiting for the controller to report a free write buffer.

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::scheduler::{Task, TaskId, TaskQueue};

/// Strict FIFO of parked send tasks.
pub(crate) struct PendingSendQueue {
    entries: Mutex<VecDeque<Task>>,
}

impl PendingSendQueue {
    pub(crate) fn new() -> Self {
        Self {
            entries: Mutex::new(VecDeque::new()),
        }
    }

    pub(crate) fn push(&self, task: Task) {
        self.lock().push_back(task);
    }

    /// Drop a parked task that has not been released yet.
    pub(crate) fn remove(&self, id: TaskId) -> bool {
        let mut entries = self.lock();
        match entries.iter().position(|task| task.id() == id) {
            Some(pos) => {
                entries.remove(pos);
                true
            }
            None => false,
        }
    }

    /// Move the oldest parked task onto the run queue.
    ///
    /// The hand-off happens under this queue's lock so a concurrent `remove`
    /// sees the task in exactly one of the two queues.
    pub(crate) fn pop_into(&self, queue: &TaskQueue) -> Option<TaskId> {
        let mut entries = self.lock();
        let task = entries.pop_front()?;
        let id = task.id();
        queue.push(task);
        Some(id)
    }

    pub(crate) fn len(&self) -> usize {
        self.lock().len()
    }

    pub(crate) fn clear(&self) {
        self.lock().clear();
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<Task>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

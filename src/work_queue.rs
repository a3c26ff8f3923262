//! Closable FIFO feeding the polling dispatcher's worker pool.

use std::collections::VecDeque;
use std::sync::{Condvar, Mutex};

/// Synchronized FIFO of jobs with blocking, shutdown-aware consumers.
pub struct WorkQueue<T> {
    inner: Mutex<QueueState<T>>,
    available: Condvar,
}

struct QueueState<T> {
    jobs: VecDeque<T>,
    closed: bool,
}

impl<T> WorkQueue<T> {
    /// Create an empty, open queue.
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(QueueState {
                jobs: VecDeque::new(),
                closed: false,
            }),
            available: Condvar::new(),
        }
    }

    /// Enqueue a job; hands it back if the queue is closed.
    pub fn push(&self, job: T) -> Result<(), T> {
        let mut guard = self.inner.lock().expect("work queue mutex poisoned");
        if guard.closed {
            return Err(job);
        }
        guard.jobs.push_back(job);
        self.available.notify_one();
        Ok(())
    }

    /// Block until a job is available, or return None once closed and empty.
    pub fn pop_or_closed(&self) -> Option<T> {
        let mut guard = self.inner.lock().expect("work queue mutex poisoned");
        loop {
            if let Some(job) = guard.jobs.pop_front() {
                return Some(job);
            }
            if guard.closed {
                return None;
            }
            guard = self.available.wait(guard).expect("condvar wait failed");
        }
    }

    /// Stop accepting jobs and wake all blocked workers.
    ///
    /// Jobs already queued are still handed out before `pop_or_closed`
    /// reports closure.
    pub fn close(&self) {
        let mut guard = self.inner.lock().expect("work queue mutex poisoned");
        guard.closed = true;
        self.available.notify_all();
    }

    /// Remove and return every job not yet picked up.
    pub fn drain(&self) -> Vec<T> {
        let mut guard = self.inner.lock().expect("work queue mutex poisoned");
        guard.jobs.drain(..).collect()
    }

    /// Current number of queued jobs.
    pub fn len(&self) -> usize {
        let guard = self.inner.lock().expect("work queue mutex poisoned");
        guard.jobs.len()
    }
}

impl<T> Default for WorkQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

//! Bounded task pool
//!
//! Browsers drive all their work through a `TaskPool`: jobs are boxed futures that only do I/O
//! and return a result to the driver loop. At most `width` jobs are in flight; the rest wait in
//! FIFO order. Since only the driver touches browser state, no locking is needed for it.

use futures::future::BoxFuture;
use futures::stream::{FuturesUnordered, StreamExt};
use std::collections::VecDeque;

/// Default number of jobs in flight.
pub const DEFAULT_WIDTH: usize = 250;

pub struct TaskPool<T> {
    width: usize,
    queued: VecDeque<BoxFuture<'static, T>>,
    running: FuturesUnordered<BoxFuture<'static, T>>,
    paused: bool,
}

impl<T> TaskPool<T> {
    pub fn new(width: usize) -> Self {
        Self {
            width: width.max(1),
            queued: VecDeque::new(),
            running: FuturesUnordered::new(),
            paused: false,
        }
    }

    pub fn add(&mut self, job: BoxFuture<'static, T>) {
        if !self.paused {
            self.queued.push_back(job);
        }
    }

    /// Stops starting new jobs and drops everything still queued. Running jobs finish.
    pub fn pause_and_clear(&mut self) {
        self.paused = true;
        self.queued.clear();
    }

    pub fn is_paused(&self) -> bool {
        self.paused
    }

    /// Waits for the next finished job. `None` once the pool is idle.
    pub async fn next(&mut self) -> Option<T> {
        while !self.paused && self.running.len() < self.width {
            match self.queued.pop_front() {
                Some(job) => self.running.push(job),
                None => break,
            }
        }
        if self.running.is_empty() {
            return None;
        }
        self.running.next().await
    }
}

impl<T> Default for TaskPool<T> {
    fn default() -> Self {
        Self::new(DEFAULT_WIDTH)
    }
}

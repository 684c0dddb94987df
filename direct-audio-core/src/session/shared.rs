use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use crate::processing::ring_buffer::RingBuffer;

/// Monotonic event counters updated from the real-time thread.
#[derive(Debug, Default)]
pub(crate) struct LineCounters {
    pub callbacks: AtomicU64,
    pub underrun_bytes: AtomicU64,
    pub overrun_bytes: AtomicU64,
    pub pull_failures: AtomicU64,
    pub flushes: AtomicU64,
}

/// State shared between a session and its hardware callback.
#[derive(Debug)]
pub(crate) struct SharedLine {
    pub ring: RingBuffer,
    pub counters: LineCounters,
    draining: AtomicBool,
    signal: Mutex<()>,
    data_ready: Condvar,
}

impl SharedLine {
    pub fn new(ring: RingBuffer, draining: bool) -> Self {
        Self {
            ring,
            counters: LineCounters::default(),
            draining: AtomicBool::new(draining),
            signal: Mutex::new(()),
            data_ready: Condvar::new(),
        }
    }

    pub fn is_draining(&self) -> bool {
        self.draining.load(Ordering::Acquire)
    }

    /// Setting the flag also wakes blocked readers.
    pub fn set_draining(&self, draining: bool) {
        self.draining.store(draining, Ordering::Release);
        if draining {
            self.notify();
        }
    }

    /// Wake readers waiting in `wait_for_data`.
    ///
    /// The signal lock is held only for the broadcast, so a reader cannot
    /// miss a wakeup between checking its predicate and going to sleep.
    pub fn notify(&self) {
        let _guard = self.signal.lock();
        self.data_ready.notify_all();
    }

    /// Block until `wanted` bytes are readable, the line drains, or
    /// `timeout` elapses.
    pub fn wait_for_data(&self, wanted: usize, timeout: Option<Duration>) {
        let deadline = timeout.map(|t| Instant::now() + t);
        let mut guard = self.signal.lock();
        while !self.is_draining() && self.ring.valid_byte_count() < wanted {
            match deadline {
                Some(deadline) => {
                    if self.data_ready.wait_until(&mut guard, deadline).timed_out() {
                        break;
                    }
                }
                None => self.data_ready.wait(&mut guard),
            }
        }
    }
}

//! Delivery counters shared by the facade, writer loop and registry.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

/// Point-in-time snapshot of writer activity.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WriterStats {
    /// Records accepted into the queue.
    pub accepted: u64,
    /// Records appended to their handle.
    pub written: u64,
    /// Records dropped because the queue was full.
    pub dropped_queue_full: u64,
    /// Records dropped because the writer was stopped.
    pub dropped_stopped: u64,
    /// Queued records discarded by `stop()`.
    pub dropped_shutdown: u64,
    pub open_failures: u64,
    pub write_failures: u64,
    pub close_failures: u64,
    pub handles_opened: u64,
    /// Handles closed cleanly. Failed closes count in `close_failures`.
    pub handles_closed: u64,
    /// Handles open at snapshot time.
    pub open_handles: u64,
}

impl WriterStats {
    /// Records that never reached a file.
    #[must_use]
    pub fn dropped(&self) -> u64 {
        self.dropped_queue_full
            + self.dropped_stopped
            + self.dropped_shutdown
            + self.open_failures
            + self.write_failures
    }
}

#[derive(Debug, Default)]
pub(crate) struct WriterCounters {
    pub accepted: AtomicU64,
    pub written: AtomicU64,
    pub dropped_queue_full: AtomicU64,
    pub dropped_stopped: AtomicU64,
    pub dropped_shutdown: AtomicU64,
    pub open_failures: AtomicU64,
    pub write_failures: AtomicU64,
    pub close_failures: AtomicU64,
    pub handles_opened: AtomicU64,
    pub handles_closed: AtomicU64,
}

impl WriterCounters {
    pub fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add(counter: &AtomicU64, n: u64) {
        counter.fetch_add(n, Ordering::Relaxed);
    }

    pub fn snapshot(&self, open_handles: usize) -> WriterStats {
        let load = |c: &AtomicU64| c.load(Ordering::Relaxed);
        WriterStats {
            accepted: load(&self.accepted),
            written: load(&self.written),
            dropped_queue_full: load(&self.dropped_queue_full),
            dropped_stopped: load(&self.dropped_stopped),
            dropped_shutdown: load(&self.dropped_shutdown),
            open_failures: load(&self.open_failures),
            write_failures: load(&self.write_failures),
            close_failures: load(&self.close_failures),
            handles_opened: load(&self.handles_opened),
            handles_closed: load(&self.handles_closed),
            open_handles: open_handles as u64,
        }
    }
}

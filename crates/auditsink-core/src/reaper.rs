//! Idle handle reaper.
//!
//! Ticks on a fixed interval independent of write traffic and closes every
//! registry entry whose last activity is older than the idle timeout.

use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crossbeam::channel::{self, Receiver};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::registry::FileHandleRegistry;
use crate::worker::spawn_named;

/// Summary of one eviction pass.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ReapReport {
    /// Entries examined.
    pub scanned: usize,
    /// Entries closed cleanly.
    pub closed: usize,
    /// Entries whose close failed (removed anyway).
    pub close_failures: usize,
    /// Paths closed cleanly.
    pub closed_paths: Vec<PathBuf>,
    /// Close errors encountered during the pass.
    pub errors: Vec<String>,
}

impl ReapReport {
    /// Entries removed from the registry, cleanly or not.
    #[must_use]
    pub fn removed(&self) -> usize {
        self.closed + self.close_failures
    }
}

/// Timing for the reaper loop.
#[derive(Debug, Clone, Copy)]
pub struct ReaperSchedule {
    pub idle_timeout: Duration,
    pub interval: Duration,
}

/// Run eviction passes until `shutdown` is disconnected.
///
/// The shutdown receiver never carries a message; dropping its sender is the
/// signal.
pub fn run_idle_reaper(
    registry: &FileHandleRegistry,
    schedule: ReaperSchedule,
    shutdown: &Receiver<()>,
) {
    let ticker = channel::tick(schedule.interval);

    info!(
        interval_ms = schedule.interval.as_millis() as u64,
        idle_timeout_ms = schedule.idle_timeout.as_millis() as u64,
        "Idle reaper started"
    );

    loop {
        channel::select! {
            recv(shutdown) -> _ => break,
            recv(ticker) -> tick => {
                let now = tick.unwrap_or_else(|_| Instant::now());
                let report = registry.evict_idle(now, schedule.idle_timeout);
                log_report(&report);
            }
        }
    }

    info!("Idle reaper shutting down");
}

fn log_report(report: &ReapReport) {
    if report.removed() > 0 {
        debug!(
            scanned = report.scanned,
            closed = report.closed,
            paths = ?report.closed_paths,
            "Idle reaper closed audit files"
        );
    }
    if report.close_failures > 0 {
        warn!(
            close_failures = report.close_failures,
            "Idle reaper removed handles whose close failed"
        );
    }
}

/// Spawn [`run_idle_reaper`] on a named thread.
pub(crate) fn spawn_idle_reaper(
    name: String,
    registry: Arc<FileHandleRegistry>,
    schedule: ReaperSchedule,
    shutdown: Receiver<()>,
) -> io::Result<JoinHandle<()>> {
    spawn_named(name, move || run_idle_reaper(&registry, schedule, &shutdown))
}

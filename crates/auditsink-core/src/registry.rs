//! Path → open handle registry.
//!
//! The registry is the only owner of raw handles. It opens on demand, reuses
//! an open handle for later writes to the same path, evicts a handle after a
//! write failure, and closes handles that have been idle past a threshold.
//!
//! One mutex guards the map and, through it, every handle: the writer loop
//! and the idle reaper never operate on the same entry concurrently.

use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use serde::Serialize;
use tracing::{debug, error, warn};

use crate::error::WriterError;
use crate::handle::{AuditHandle, HandleFactory};
use crate::reaper::ReapReport;
use crate::stats::WriterCounters;

struct HandleEntry {
    handle: Box<dyn AuditHandle>,
    opened_at: Instant,
    last_activity: Instant,
    writes: u64,
    // Correlation id of the last record routed to this handle, reported if
    // the eventual close fails.
    last_correlation_id: String,
}

/// Read-only view of one registry entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HandleInfo {
    pub path: PathBuf,
    pub writes: u64,
    #[serde(skip)]
    pub opened_at: Instant,
    #[serde(skip)]
    pub last_activity: Instant,
}

pub struct FileHandleRegistry {
    factory: Arc<dyn HandleFactory>,
    entries: Mutex<HashMap<PathBuf, HandleEntry>>,
    counters: Arc<WriterCounters>,
}

impl FileHandleRegistry {
    #[must_use]
    pub fn new(factory: Arc<dyn HandleFactory>) -> Self {
        Self::with_counters(factory, Arc::new(WriterCounters::default()))
    }

    pub(crate) fn with_counters(
        factory: Arc<dyn HandleFactory>,
        counters: Arc<WriterCounters>,
    ) -> Self {
        Self {
            factory,
            entries: Mutex::new(HashMap::new()),
            counters,
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<PathBuf, HandleEntry>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn entry_for<'a>(
        &self,
        entries: &'a mut HashMap<PathBuf, HandleEntry>,
        path: &Path,
        correlation_id: &str,
        now: Instant,
    ) -> Result<&'a mut HandleEntry, WriterError> {
        let entry = match entries.entry(path.to_path_buf()) {
            Entry::Occupied(occupied) => occupied.into_mut(),
            Entry::Vacant(vacant) => {
                let handle = self.factory.open(path).map_err(|source| {
                    WriterCounters::bump(&self.counters.open_failures);
                    WriterError::open(path, correlation_id, source)
                })?;
                WriterCounters::bump(&self.counters.handles_opened);
                debug!(path = %path.display(), correlation_id, "Opened audit file");
                vacant.insert(HandleEntry {
                    handle,
                    opened_at: now,
                    last_activity: now,
                    writes: 0,
                    last_correlation_id: String::new(),
                })
            }
        };
        entry.last_activity = now;
        entry.last_correlation_id.clear();
        entry.last_correlation_id.push_str(correlation_id);
        Ok(entry)
    }

    /// Return the open entry for `path`, opening one if needed.
    ///
    /// Refreshes the entry's last-activity time. On factory failure nothing is
    /// installed.
    pub fn get_or_open(&self, path: &Path, correlation_id: &str) -> Result<HandleInfo, WriterError> {
        let mut entries = self.lock();
        let entry = self.entry_for(&mut entries, path, correlation_id, Instant::now())?;
        Ok(HandleInfo {
            path: path.to_path_buf(),
            writes: entry.writes,
            opened_at: entry.opened_at,
            last_activity: entry.last_activity,
        })
    }

    /// Append `payload` to the handle for `path`.
    ///
    /// A failed write evicts the entry so the next write reopens the file.
    pub fn write(&self, path: &Path, correlation_id: &str, payload: &str) -> Result<(), WriterError> {
        let mut entries = self.lock();
        let entry = self.entry_for(&mut entries, path, correlation_id, Instant::now())?;

        match entry.handle.write(payload) {
            Ok(()) => {
                entry.writes += 1;
                WriterCounters::bump(&self.counters.written);
                Ok(())
            }
            Err(source) => {
                WriterCounters::bump(&self.counters.write_failures);
                if let Some(stale) = entries.remove(path) {
                    if let Err(close_err) = self.close_entry(path, stale) {
                        warn!(
                            path = %path.display(),
                            correlation_id,
                            error = %close_err,
                            "Ignoring close failure while evicting failed audit handle"
                        );
                    }
                }
                Err(WriterError::write(path, correlation_id, source))
            }
        }
    }

    /// Close and remove every entry idle for at least `threshold` as of `now`.
    ///
    /// Entries whose close fails are removed anyway.
    pub fn evict_idle(&self, now: Instant, threshold: Duration) -> ReapReport {
        let mut entries = self.lock();
        let mut report = ReapReport {
            scanned: entries.len(),
            ..ReapReport::default()
        };

        let idle: Vec<PathBuf> = entries
            .iter()
            .filter(|(_, entry)| now.saturating_duration_since(entry.last_activity) >= threshold)
            .map(|(path, _)| path.clone())
            .collect();

        for path in idle {
            if let Some(entry) = entries.remove(&path) {
                self.close_into_report(&path, entry, &mut report);
            }
        }

        report
    }

    /// Close every entry, best-effort.
    pub fn close_all(&self) -> ReapReport {
        let mut entries = self.lock();
        let mut report = ReapReport {
            scanned: entries.len(),
            ..ReapReport::default()
        };
        for (path, entry) in entries.drain() {
            self.close_into_report(&path, entry, &mut report);
        }
        report
    }

    fn close_into_report(&self, path: &Path, entry: HandleEntry, report: &mut ReapReport) {
        let correlation_id = entry.last_correlation_id.clone();
        match self.close_entry(path, entry) {
            Ok(()) => {
                report.closed += 1;
                report.closed_paths.push(path.to_path_buf());
            }
            Err(err) => {
                error!(
                    kind = err.kind(),
                    path = %path.display(),
                    correlation_id = %correlation_id,
                    error = %err,
                    "Audit close failed for query {correlation_id}; handle dropped from registry"
                );
                report.close_failures += 1;
                report.errors.push(err.to_string());
            }
        }
    }

    fn close_entry(&self, path: &Path, entry: HandleEntry) -> Result<(), WriterError> {
        match entry.handle.close() {
            Ok(()) => {
                WriterCounters::bump(&self.counters.handles_closed);
                Ok(())
            }
            Err(source) => {
                WriterCounters::bump(&self.counters.close_failures);
                Err(WriterError::close(path, source))
            }
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    #[must_use]
    pub fn contains(&self, path: &Path) -> bool {
        self.lock().contains_key(path)
    }

    /// Paths with an open handle, sorted.
    #[must_use]
    pub fn open_paths(&self) -> Vec<PathBuf> {
        let mut paths: Vec<PathBuf> = self.lock().keys().cloned().collect();
        paths.sort();
        paths
    }

    /// Snapshot of every entry, sorted by path.
    #[must_use]
    pub fn entries(&self) -> Vec<HandleInfo> {
        let mut infos: Vec<HandleInfo> = self
            .lock()
            .iter()
            .map(|(path, entry)| HandleInfo {
                path: path.clone(),
                writes: entry.writes,
                opened_at: entry.opened_at,
                last_activity: entry.last_activity,
            })
            .collect();
        infos.sort_by(|a, b| a.path.cmp(&b.path));
        infos
    }
}

impl std::fmt::Debug for FileHandleRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileHandleRegistry")
            .field("open_paths", &self.open_paths())
            .finish_non_exhaustive()
    }
}

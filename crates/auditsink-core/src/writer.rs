//! Asynchronous audit-log file writer.
//!
//! [`AuditLogFileWriter`] is the only type producers touch. `write()` never
//! blocks and never fails from the caller's point of view: a record that
//! cannot be queued is logged with its correlation id and dropped. A started
//! writer owns two background threads, the writer loop draining the queue
//! into the handle registry and the idle reaper closing unused handles.
//!
//! ```text
//! STOPPED --start()--> STARTED --stop()--> STOPPED
//! ```

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock, PoisonError, RwLock};
use std::thread::JoinHandle;
use std::time::Duration;

use crossbeam::channel::{self, Sender};
use tracing::{error, info, warn};

use crate::config::WriterConfig;
use crate::error::{Error, WriterError};
use crate::handle::{FsHandleFactory, HandleFactory};
use crate::queue::{BoundedWorkQueue, OfferError};
use crate::reaper::{ReapReport, ReaperSchedule, spawn_idle_reaper};
use crate::record::{LogSerializer, SerializedLog, WriteRequest};
use crate::registry::FileHandleRegistry;
use crate::stats::{WriterCounters, WriterStats};
use crate::worker::{run_writer_loop, spawn_named};

static GLOBAL: OnceLock<AuditLogFileWriter> = OnceLock::new();

struct Running {
    writer: JoinHandle<()>,
    reaper: JoinHandle<()>,
    // Dropping this wakes the reaper's select and ends its loop.
    reaper_shutdown: Sender<()>,
}

pub struct AuditLogFileWriter {
    config: WriterConfig,
    registry: Arc<FileHandleRegistry>,
    counters: Arc<WriterCounters>,
    queue: RwLock<Option<Arc<BoundedWorkQueue>>>,
    running: Mutex<Option<Running>>,
}

impl AuditLogFileWriter {
    /// Build a stopped writer around `factory`.
    pub fn new(config: WriterConfig, factory: Arc<dyn HandleFactory>) -> crate::Result<Self> {
        config.validate()?;
        Ok(Self::build(config, factory))
    }

    fn build(config: WriterConfig, factory: Arc<dyn HandleFactory>) -> Self {
        let counters = Arc::new(WriterCounters::default());
        let registry = Arc::new(FileHandleRegistry::with_counters(
            factory,
            Arc::clone(&counters),
        ));
        Self {
            config,
            registry,
            counters,
            queue: RwLock::new(None),
            running: Mutex::new(None),
        }
    }

    /// The process-wide writer, created stopped on first use with the default
    /// configuration and the filesystem handle factory.
    pub fn global() -> &'static Self {
        GLOBAL.get_or_init(|| {
            let config = WriterConfig::default();
            let factory = Arc::new(FsHandleFactory::from_config(&config));
            Self::build(config, factory)
        })
    }

    #[must_use]
    pub fn config(&self) -> &WriterConfig {
        &self.config
    }

    /// Start the writer loop and idle reaper. No-op when already started.
    pub fn start(&self) -> crate::Result<()> {
        let mut running = self.lock_running();
        if running.is_some() {
            return Ok(());
        }

        let queue = Arc::new(BoundedWorkQueue::new(self.config.queue_capacity));
        let prefix = &self.config.thread_name_prefix;

        let writer = {
            let queue = Arc::clone(&queue);
            let registry = Arc::clone(&self.registry);
            spawn_named(format!("{prefix}-loop"), move || {
                run_writer_loop(&queue, &registry);
            })
            .map_err(|e| Error::Runtime(format!("failed to spawn audit writer thread: {e}")))?
        };

        let (reaper_shutdown, reaper_rx) = channel::bounded::<()>(0);
        let schedule = ReaperSchedule {
            idle_timeout: self.config.idle_timeout(),
            interval: self.config.reap_interval(),
        };
        let reaper = match spawn_idle_reaper(
            format!("{prefix}-reaper"),
            Arc::clone(&self.registry),
            schedule,
            reaper_rx,
        ) {
            Ok(handle) => handle,
            Err(e) => {
                queue.shutdown();
                if writer.join().is_err() {
                    error!("Audit writer thread panicked during aborted start");
                }
                return Err(Error::Runtime(format!(
                    "failed to spawn audit reaper thread: {e}"
                )));
            }
        };

        *self.queue.write().unwrap_or_else(PoisonError::into_inner) = Some(queue);
        *running = Some(Running {
            writer,
            reaper,
            reaper_shutdown,
        });

        info!(
            queue_capacity = self.config.queue_capacity,
            idle_timeout_ms = self.config.idle_timeout_ms,
            reap_interval_ms = self.config.reap_interval_ms,
            "Audit log file writer started"
        );
        Ok(())
    }

    /// Stop both background threads and close every open handle.
    ///
    /// Records still queued are dropped and counted. Close failures are
    /// logged and reported, never returned as errors. No-op when stopped.
    pub fn stop(&self) -> ReapReport {
        let mut running = self.lock_running();
        let Some(Running {
            writer,
            reaper,
            reaper_shutdown,
        }) = running.take()
        else {
            return ReapReport::default();
        };

        let queue = self
            .queue
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(queue) = queue {
            let discarded = queue.shutdown();
            if discarded > 0 {
                WriterCounters::add(&self.counters.dropped_shutdown, discarded as u64);
                warn!(discarded, "Audit writer stopped with queued records; dropping them");
            }
        }

        drop(reaper_shutdown);
        if writer.join().is_err() {
            error!("Audit writer thread panicked");
        }
        if reaper.join().is_err() {
            error!("Audit reaper thread panicked");
        }

        let report = self.registry.close_all();
        info!(
            closed = report.closed,
            close_failures = report.close_failures,
            "Audit log file writer stopped"
        );
        report
    }

    /// Queue `record` for appending to `path`.
    ///
    /// Never blocks. A record is dropped, with an error log naming its
    /// correlation id, when the writer is stopped or the queue is full.
    pub fn write(&self, path: impl Into<PathBuf>, record: SerializedLog) {
        let queue = self
            .queue
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();

        let Some(queue) = queue else {
            WriterCounters::bump(&self.counters.dropped_stopped);
            log_dropped(&WriterError::Stopped {
                correlation_id: record.correlation_id,
            });
            return;
        };

        match queue.offer(WriteRequest::new(path, record)) {
            Ok(()) => WriterCounters::bump(&self.counters.accepted),
            Err(OfferError::Full(request)) => {
                WriterCounters::bump(&self.counters.dropped_queue_full);
                log_dropped(&WriterError::QueueFull {
                    capacity: queue.capacity(),
                    correlation_id: request.into_record().correlation_id,
                });
            }
            Err(OfferError::Closed(request)) => {
                // Lost a race with stop().
                WriterCounters::bump(&self.counters.dropped_stopped);
                log_dropped(&WriterError::Stopped {
                    correlation_id: request.into_record().correlation_id,
                });
            }
        }
    }

    /// Serialize `event` and queue it. Events the serializer skips are ignored.
    pub fn write_event<E, S>(&self, path: impl Into<PathBuf>, serializer: &S, event: &E)
    where
        S: LogSerializer<E> + ?Sized,
    {
        if let Some(record) = serializer.serialize(event) {
            self.write(path, record);
        }
    }

    /// Wait until every record accepted so far has been processed.
    ///
    /// Returns `true` immediately when stopped.
    pub fn wait_drained(&self, timeout: Duration) -> bool {
        let queue = self
            .queue
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        queue.is_none_or(|queue| queue.wait_drained(timeout))
    }

    #[must_use]
    pub fn is_started(&self) -> bool {
        self.lock_running().is_some()
    }

    /// Counter snapshot.
    ///
    /// Reads the open-handle count from the registry, so this waits while
    /// the writer loop is inside a slow open or write.
    #[must_use]
    pub fn stats(&self) -> WriterStats {
        self.counters.snapshot(self.registry.len())
    }

    /// Paths that currently have an open handle, sorted.
    ///
    /// Blocks behind an in-progress open or write, like [`stats`](Self::stats).
    #[must_use]
    pub fn open_handles(&self) -> Vec<PathBuf> {
        self.registry.open_paths()
    }

    /// Blocks behind an in-progress open or write.
    #[must_use]
    pub fn has_open_handle(&self, path: &Path) -> bool {
        self.registry.contains(path)
    }

    /// Current queue depth; zero when stopped.
    #[must_use]
    pub fn queue_len(&self) -> usize {
        self.queue
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .map_or(0, |queue| queue.len())
    }

    fn lock_running(&self) -> MutexGuard<'_, Option<Running>> {
        self.running.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for AuditLogFileWriter {
    fn drop(&mut self) {
        if self.is_started() {
            self.stop();
        }
    }
}

impl std::fmt::Debug for AuditLogFileWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuditLogFileWriter")
            .field("config", &self.config)
            .field("started", &self.is_started())
            .field("queue_len", &self.queue_len())
            .finish_non_exhaustive()
    }
}

fn log_dropped(err: &WriterError) {
    let correlation_id = err.correlation_id().unwrap_or_default();
    error!(
        kind = err.kind(),
        correlation_id,
        "Error writing to audit log queue, dropping record for query {correlation_id}: {err}"
    );
}

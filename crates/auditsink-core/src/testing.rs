//! Test doubles for the writer's collaborators.
//!
//! [`RecordingHandleFactory`] records every open, write and close per handle
//! instance and can be told to fail or stall. [`CapturedLogs`] collects
//! `tracing` output in memory so tests can assert on logged errors.

use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use crossbeam::channel::{self, Receiver, Sender};
use tracing_subscriber::fmt::MakeWriter;

use crate::handle::{AuditHandle, HandleFactory};

/// Everything observed on one handle instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandleLog {
    /// Distinct per opened handle, starting at 1.
    pub id: u64,
    pub path: PathBuf,
    /// Payloads in the order they were written.
    pub writes: Vec<String>,
    /// Number of `close` calls (failed closes included).
    pub closes: usize,
}

/// Notification published whenever a recorded handle is closed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClosedHandle {
    pub id: u64,
    pub path: PathBuf,
    pub ok: bool,
}

#[derive(Default)]
struct State {
    handles: Vec<HandleLog>,
    open_attempts: HashMap<PathBuf, usize>,
    fail_open: HashMap<PathBuf, usize>,
    fail_write: HashMap<PathBuf, usize>,
    fail_close: HashMap<PathBuf, usize>,
    gate: Option<(Receiver<()>, Sender<PathBuf>)>,
}

impl State {
    fn log_mut(&mut self, id: u64) -> Option<&mut HandleLog> {
        self.handles.iter_mut().find(|h| h.id == id)
    }
}

struct Inner {
    state: Mutex<State>,
    next_id: AtomicU64,
    closed_tx: Sender<ClosedHandle>,
    closed_rx: Receiver<ClosedHandle>,
}

impl Inner {
    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Consume one scheduled failure for `path`, if any.
fn take_failure(failures: &mut HashMap<PathBuf, usize>, path: &Path) -> bool {
    match failures.get_mut(path) {
        Some(remaining) if *remaining > 0 => {
            if *remaining != usize::MAX {
                *remaining -= 1;
            }
            true
        }
        _ => false,
    }
}

/// Handle factory that records calls instead of touching the filesystem.
#[derive(Clone)]
pub struct RecordingHandleFactory {
    inner: Arc<Inner>,
}

impl Default for RecordingHandleFactory {
    fn default() -> Self {
        let (closed_tx, closed_rx) = channel::unbounded();
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(State::default()),
                next_id: AtomicU64::new(1),
                closed_tx,
                closed_rx,
            }),
        }
    }
}

impl RecordingHandleFactory {
    /// Failure count meaning "every time".
    pub const ALWAYS: usize = usize::MAX;

    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `times` opens of `path` fail.
    pub fn fail_open(&self, path: impl Into<PathBuf>, times: usize) {
        self.inner.lock().fail_open.insert(path.into(), times);
    }

    /// Make the next `times` writes to `path` fail.
    pub fn fail_write(&self, path: impl Into<PathBuf>, times: usize) {
        self.inner.lock().fail_write.insert(path.into(), times);
    }

    /// Make the next `times` closes of handles for `path` fail.
    pub fn fail_close(&self, path: impl Into<PathBuf>, times: usize) {
        self.inner.lock().fail_close.insert(path.into(), times);
    }

    /// Block every `open` until the returned gate is released or dropped.
    #[must_use]
    pub fn hold_opens(&self) -> OpenGate {
        let (release_tx, release_rx) = channel::bounded::<()>(0);
        let (entered_tx, entered_rx) = channel::unbounded();
        self.inner.lock().gate = Some((release_rx, entered_tx));
        OpenGate {
            release: Some(release_tx),
            entered: entered_rx,
        }
    }

    /// All handles ever opened, in open order.
    #[must_use]
    pub fn handles(&self) -> Vec<HandleLog> {
        self.inner.lock().handles.clone()
    }

    /// Handles opened for `path`, in open order.
    #[must_use]
    pub fn handles_for(&self, path: impl AsRef<Path>) -> Vec<HandleLog> {
        let path = path.as_ref();
        self.inner
            .lock()
            .handles
            .iter()
            .filter(|h| h.path == path)
            .cloned()
            .collect()
    }

    /// Number of `open` calls for `path`, failed ones included.
    #[must_use]
    pub fn open_attempts(&self, path: impl AsRef<Path>) -> usize {
        self.inner
            .lock()
            .open_attempts
            .get(path.as_ref())
            .copied()
            .unwrap_or(0)
    }

    /// Wait for the next close notification.
    pub fn wait_for_close(&self, timeout: Duration) -> Option<ClosedHandle> {
        self.inner.closed_rx.recv_timeout(timeout).ok()
    }

    /// Close notifications already published and not yet consumed.
    #[must_use]
    pub fn drain_closes(&self) -> Vec<ClosedHandle> {
        self.inner.closed_rx.try_iter().collect()
    }
}

impl HandleFactory for RecordingHandleFactory {
    fn open(&self, path: &Path) -> io::Result<Box<dyn AuditHandle>> {
        let gate = {
            let mut state = self.inner.lock();
            *state.open_attempts.entry(path.to_path_buf()).or_insert(0) += 1;
            state.gate.clone()
        };

        if let Some((release, entered)) = gate {
            let _ = entered.send(path.to_path_buf());
            // Returns once the gate's sender is dropped.
            let _ = release.recv();
        }

        let mut state = self.inner.lock();
        if take_failure(&mut state.fail_open, path) {
            return Err(io::Error::other(format!(
                "mock open failure for {}",
                path.display()
            )));
        }

        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        state.handles.push(HandleLog {
            id,
            path: path.to_path_buf(),
            writes: Vec::new(),
            closes: 0,
        });

        Ok(Box::new(RecordingHandle {
            id,
            path: path.to_path_buf(),
            inner: Arc::clone(&self.inner),
        }))
    }
}

impl std::fmt::Debug for RecordingHandleFactory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecordingHandleFactory")
            .field("handles", &self.inner.lock().handles.len())
            .finish_non_exhaustive()
    }
}

struct RecordingHandle {
    id: u64,
    path: PathBuf,
    inner: Arc<Inner>,
}

impl AuditHandle for RecordingHandle {
    fn write(&mut self, payload: &str) -> io::Result<()> {
        let mut state = self.inner.lock();
        if take_failure(&mut state.fail_write, &self.path) {
            return Err(io::Error::other("mock write failure"));
        }
        if let Some(log) = state.log_mut(self.id) {
            log.writes.push(payload.to_string());
        }
        Ok(())
    }

    fn close(self: Box<Self>) -> io::Result<()> {
        let failed = {
            let mut state = self.inner.lock();
            if let Some(log) = state.log_mut(self.id) {
                log.closes += 1;
            }
            take_failure(&mut state.fail_close, &self.path)
        };

        let _ = self.inner.closed_tx.send(ClosedHandle {
            id: self.id,
            path: self.path.clone(),
            ok: !failed,
        });

        if failed {
            Err(io::Error::other("mock close failure"))
        } else {
            Ok(())
        }
    }
}

/// Holds opens on a [`RecordingHandleFactory`] until released.
pub struct OpenGate {
    release: Option<Sender<()>>,
    entered: Receiver<PathBuf>,
}

impl OpenGate {
    /// Wait until some thread is blocked inside `open`.
    pub fn wait_entered(&self, timeout: Duration) -> Option<PathBuf> {
        self.entered.recv_timeout(timeout).ok()
    }

    /// Let blocked and future opens proceed.
    pub fn release(mut self) {
        self.release.take();
    }
}

impl Drop for OpenGate {
    fn drop(&mut self) {
        self.release.take();
    }
}

/// In-memory `tracing` sink for log assertions.
#[derive(Clone, Default)]
pub struct CapturedLogs {
    buffer: Arc<Mutex<Vec<u8>>>,
}

impl CapturedLogs {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A plain-text subscriber writing into this buffer at DEBUG and above.
    #[must_use]
    pub fn subscriber(&self) -> impl tracing::Subscriber + Send + Sync + 'static {
        tracing_subscriber::fmt()
            .with_writer(self.clone())
            .with_max_level(tracing::Level::DEBUG)
            .with_ansi(false)
            .with_target(false)
            .finish()
    }

    #[must_use]
    pub fn contents(&self) -> String {
        String::from_utf8_lossy(&self.buffer.lock().unwrap_or_else(PoisonError::into_inner))
            .into_owned()
    }

    /// Lines logged at ERROR level.
    #[must_use]
    pub fn error_lines(&self) -> Vec<String> {
        self.contents()
            .lines()
            .filter(|line| line.contains("ERROR"))
            .map(str::to_string)
            .collect()
    }
}

impl io::Write for CapturedLogs {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.buffer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl<'a> MakeWriter<'a> for CapturedLogs {
    type Writer = Self;

    fn make_writer(&'a self) -> Self::Writer {
        self.clone()
    }
}

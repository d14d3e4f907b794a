//! File-handle factory abstraction.
//!
//! The registry never opens files itself; it asks a [`HandleFactory`] for an
//! append-mode [`AuditHandle`]. [`FsHandleFactory`] opens real files. Tests
//! substitute [`RecordingHandleFactory`](crate::testing::RecordingHandleFactory).

use std::fs::{File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

use crate::config::WriterConfig;

/// An open, writable append-mode resource bound to one path.
pub trait AuditHandle: Send {
    /// Append `payload` followed by a newline.
    fn write(&mut self, payload: &str) -> io::Result<()>;

    /// Flush and release the handle.
    fn close(self: Box<Self>) -> io::Result<()>;
}

/// Opens append handles for audit targets.
pub trait HandleFactory: Send + Sync + 'static {
    /// Open `path` for appending, creating it if absent.
    fn open(&self, path: &Path) -> io::Result<Box<dyn AuditHandle>>;
}

/// Create the parent directory of `path` if it is missing.
///
/// `dir_mode` is applied only to a directory this call created.
pub(crate) fn ensure_parent_dir(path: &Path, dir_mode: Option<u32>) -> io::Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            let existed = parent.exists();
            std::fs::create_dir_all(parent)?;
            #[cfg(unix)]
            if let (false, Some(mode)) = (existed, dir_mode) {
                use std::os::unix::fs::PermissionsExt;
                std::fs::set_permissions(parent, std::fs::Permissions::from_mode(mode))?;
            }
            #[cfg(not(unix))]
            let _ = (existed, dir_mode);
        }
    }
    Ok(())
}

/// Production factory: real files opened with `create + append`.
#[derive(Debug, Clone)]
pub struct FsHandleFactory {
    file_mode: Option<u32>,
    create_dirs: bool,
}

impl Default for FsHandleFactory {
    fn default() -> Self {
        Self {
            file_mode: WriterConfig::default().file_mode,
            create_dirs: true,
        }
    }
}

impl FsHandleFactory {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn from_config(config: &WriterConfig) -> Self {
        Self {
            file_mode: config.file_mode,
            create_dirs: true,
        }
    }

    /// Permission bits for files this factory creates (unix only).
    #[must_use]
    pub fn with_file_mode(mut self, mode: Option<u32>) -> Self {
        self.file_mode = mode;
        self
    }

    /// Whether missing parent directories are created on open.
    #[must_use]
    pub fn with_create_dirs(mut self, create_dirs: bool) -> Self {
        self.create_dirs = create_dirs;
        self
    }
}

impl HandleFactory for FsHandleFactory {
    fn open(&self, path: &Path) -> io::Result<Box<dyn AuditHandle>> {
        if self.create_dirs {
            ensure_parent_dir(path, None)?;
        }

        let mut options = OpenOptions::new();
        options.create(true).append(true);
        #[cfg(unix)]
        if let Some(mode) = self.file_mode {
            use std::os::unix::fs::OpenOptionsExt;
            options.mode(mode);
        }

        let file = options.open(path)?;
        Ok(Box::new(FsHandle {
            path: path.to_path_buf(),
            writer: BufWriter::new(file),
        }))
    }
}

/// Buffered append handle over a real file.
///
/// Each record is flushed to the OS after it is written; `close` additionally
/// syncs file data to disk.
#[derive(Debug)]
pub struct FsHandle {
    path: PathBuf,
    writer: BufWriter<File>,
}

impl FsHandle {
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl AuditHandle for FsHandle {
    fn write(&mut self, payload: &str) -> io::Result<()> {
        self.writer.write_all(payload.as_bytes())?;
        self.writer.write_all(b"\n")?;
        self.writer.flush()
    }

    fn close(self: Box<Self>) -> io::Result<()> {
        let file = self.writer.into_inner().map_err(io::IntoInnerError::into_error)?;
        file.sync_data()
    }
}

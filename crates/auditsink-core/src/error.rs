//! Error types for auditsink-core

use std::fmt::Write;
use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;

/// Remediation command for resolving an error
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct RemediationCommand {
    /// Short label describing the command purpose
    pub label: String,
    /// Command to run
    pub command: String,
}

/// Actionable remediation guidance for an error
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct Remediation {
    /// One-line summary of how to fix the issue
    pub summary: String,
    /// Suggested commands to resolve or diagnose the issue
    pub commands: Vec<RemediationCommand>,
    /// Additional alternative guidance
    pub alternatives: Vec<String>,
}

impl Remediation {
    /// Create a new remediation with a summary
    #[must_use]
    pub fn new(summary: impl Into<String>) -> Self {
        Self {
            summary: summary.into(),
            commands: Vec::new(),
            alternatives: Vec::new(),
        }
    }

    /// Add a command
    #[must_use]
    pub fn command(mut self, label: impl Into<String>, command: impl Into<String>) -> Self {
        self.commands.push(RemediationCommand {
            label: label.into(),
            command: command.into(),
        });
        self
    }

    /// Add an alternative suggestion
    #[must_use]
    pub fn alternative(mut self, alternative: impl Into<String>) -> Self {
        self.alternatives.push(alternative.into());
        self
    }

    /// Render remediation text for human-readable output
    #[must_use]
    pub fn render_plain(&self) -> String {
        let mut output = String::new();
        let _ = writeln!(output, "To fix:");
        let _ = writeln!(output, "  {}", self.summary);

        if !self.commands.is_empty() {
            let _ = writeln!(output, "  Commands:");
            for cmd in &self.commands {
                let _ = writeln!(output, "    - {}: {}", cmd.label, cmd.command);
            }
        }

        if !self.alternatives.is_empty() {
            let _ = writeln!(output, "  Alternatives:");
            for alt in &self.alternatives {
                let _ = writeln!(output, "    - {alt}");
            }
        }

        output
    }
}

/// Result type alias using the library's Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for auditsink-core
#[derive(Error, Debug)]
pub enum Error {
    /// Audit writer errors
    #[error("Writer error: {0}")]
    Writer(#[from] WriterError),

    /// Configuration errors
    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Runtime errors (thread spawn failures, poisoned state)
    #[error("Runtime error: {0}")]
    Runtime(String),
}

impl Error {
    /// Return remediation guidance when available.
    #[must_use]
    pub fn remediation(&self) -> Option<Remediation> {
        match self {
            Self::Writer(err) => Some(err.remediation()),
            Self::Config(err) => Some(err.remediation()),
            Self::Io(_) => Some(
                Remediation::new("Check filesystem permissions and paths, then retry.")
                    .alternative("Verify the audit directory exists and is writable."),
            ),
            Self::Runtime(_) => Some(
                Remediation::new("Restart the audit writer.")
                    .command("Check thread limits", "ulimit -u")
                    .alternative("If the issue persists, inspect the process logs."),
            ),
        }
    }
}

/// Failures inside the audit writer subsystem.
///
/// None of these ever reach a producer calling `write()`; they are logged at
/// the point of detection and counted in the writer stats.
#[derive(Error, Debug)]
pub enum WriterError {
    /// Bounded queue was at capacity; the record was dropped.
    #[error(
        "audit queue full (capacity {}), dropped record for query {}",
        .capacity,
        .correlation_id
    )]
    QueueFull {
        capacity: usize,
        correlation_id: String,
    },

    /// Writer was stopped; the record was dropped.
    #[error("audit writer is stopped, dropped record for query {}", .correlation_id)]
    Stopped { correlation_id: String },

    /// The handle factory could not open the target.
    #[error(
        "failed to open audit file {} for query {}: {}",
        .path.display(),
        .correlation_id,
        .source
    )]
    Open {
        path: PathBuf,
        correlation_id: String,
        #[source]
        source: io::Error,
    },

    /// Writing the payload to an open handle failed.
    #[error(
        "failed to write audit file {} for query {}: {}",
        .path.display(),
        .correlation_id,
        .source
    )]
    Write {
        path: PathBuf,
        correlation_id: String,
        #[source]
        source: io::Error,
    },

    /// Closing a handle failed. The entry is dropped from the registry anyway.
    #[error("failed to close audit file {}: {}", .path.display(), .source)]
    Close {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl WriterError {
    pub(crate) fn open(path: &Path, correlation_id: &str, source: io::Error) -> Self {
        Self::Open {
            path: path.to_path_buf(),
            correlation_id: correlation_id.to_string(),
            source,
        }
    }

    pub(crate) fn write(path: &Path, correlation_id: &str, source: io::Error) -> Self {
        Self::Write {
            path: path.to_path_buf(),
            correlation_id: correlation_id.to_string(),
            source,
        }
    }

    pub(crate) fn close(path: &Path, source: io::Error) -> Self {
        Self::Close {
            path: path.to_path_buf(),
            source,
        }
    }

    /// Correlation id of the affected record, if the failure concerns one.
    #[must_use]
    pub fn correlation_id(&self) -> Option<&str> {
        match self {
            Self::QueueFull { correlation_id, .. }
            | Self::Stopped { correlation_id }
            | Self::Open { correlation_id, .. }
            | Self::Write { correlation_id, .. } => Some(correlation_id),
            Self::Close { .. } => None,
        }
    }

    /// Target path of the failure, if any.
    #[must_use]
    pub fn path(&self) -> Option<&Path> {
        match self {
            Self::Open { path, .. } | Self::Write { path, .. } | Self::Close { path, .. } => {
                Some(path)
            }
            Self::QueueFull { .. } | Self::Stopped { .. } => None,
        }
    }

    /// Stable short name used as the `kind` log field.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::QueueFull { .. } => "queue_full",
            Self::Stopped { .. } => "stopped",
            Self::Open { .. } => "open",
            Self::Write { .. } => "write",
            Self::Close { .. } => "close",
        }
    }

    #[must_use]
    pub fn remediation(&self) -> Remediation {
        match self {
            Self::QueueFull { capacity, .. } => Remediation::new(format!(
                "The audit queue ({capacity} records) overflowed. Raise writer.queue_capacity or reduce event volume."
            ))
            .alternative("Check for a slow or failing audit filesystem stalling the writer."),
            Self::Stopped { .. } => {
                Remediation::new("Start the audit writer before emitting records.")
                    .alternative("Records written while stopped are dropped.")
            }
            Self::Open { path, .. } => Remediation::new(format!(
                "Could not open {}. Check that the directory exists and is writable.",
                path.display()
            ))
            .command("Check path", format!("ls -ld \"{}\"", parent_display(path))),
            Self::Write { path, .. } => Remediation::new(format!(
                "Writing to {} failed. Check free space and filesystem health.",
                path.display()
            ))
            .command("Check free space", format!("df -h \"{}\"", parent_display(path)))
            .alternative("The next record for this path reopens the file automatically."),
            Self::Close { path, .. } => Remediation::new(format!(
                "Closing {} failed; buffered records may be lost.",
                path.display()
            ))
            .command("Check free space", format!("df -h \"{}\"", parent_display(path))),
        }
    }
}

fn parent_display(path: &Path) -> String {
    path.parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."))
        .display()
        .to_string()
}

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Config file not found: {0}")]
    FileNotFound(String),

    #[error("Failed to read config file {0}: {1}")]
    ReadFailed(String, String),

    #[error("Failed to parse config: {0}")]
    ParseFailed(String),

    #[error("Failed to serialize config: {0}")]
    SerializeFailed(String),

    #[error("Validation error: {0}")]
    ValidationError(String),
}

impl ConfigError {
    #[must_use]
    pub fn remediation(&self) -> Remediation {
        match self {
            Self::FileNotFound(path) => Remediation::new(format!(
                "Config file not found: {path}. Verify the path and retry."
            ))
            .command("Check path", format!("ls -l \"{path}\""))
            .alternative("Pass --config with the correct path."),
            Self::ReadFailed(path, _) => Remediation::new(format!(
                "Failed to read config file: {path}. Check permissions."
            ))
            .command("Check permissions", format!("ls -l \"{path}\""))
            .alternative("Ensure the file is readable by the current user."),
            Self::ParseFailed(_) => Remediation::new("Config parse failed. Fix the syntax and retry.")
                .command("Print defaults", "auditsink config")
                .alternative("Validate the TOML syntax of the config file."),
            Self::SerializeFailed(_) => {
                Remediation::new("Failed to serialize configuration. Check config values.")
                    .alternative("Recreate the config from known-good defaults.")
            }
            Self::ValidationError(_) => {
                Remediation::new("Config validation failed. Fix the invalid fields and retry.")
                    .command("Print defaults", "auditsink config")
            }
        }
    }
}

/// Format an error with remediation guidance for display.
#[must_use]
pub fn format_error_with_remediation(error: &Error) -> String {
    let mut output = format!("Error: {error}");
    if let Some(remediation) = error.remediation() {
        output.push('\n');
        output.push('\n');
        output.push_str(&remediation.render_plain());
    }
    output
}

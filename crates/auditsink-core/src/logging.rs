//! Structured logging for auditsink
//!
//! Diagnostics go through `tracing`; this module installs the global
//! subscriber with configurable format and destination.
//!
//! # Usage
//!
//! ```ignore
//! use auditsink_core::logging::{init_logging, LogConfig};
//!
//! init_logging(&LogConfig::default())?;
//! ```
//!
//! # Correlation Fields
//!
//! Use these field names consistently in writer events:
//! - `correlation_id`: query id of the affected audit record
//! - `path`: target audit file
//! - `kind`: failure kind (`queue_full`, `stopped`, `open`, `write`, `close`)
//!
//! Audit payloads are never logged; they may contain query text.

pub use crate::config::LogFormat;
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock};
use tracing::Level;
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::fmt::time::SystemTime;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{EnvFilter, Layer, Registry, fmt};

use crate::handle::ensure_parent_dir;

/// Global flag to track if logging has been initialized
static LOGGING_INITIALIZED: OnceLock<bool> = OnceLock::new();

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Log level filter (trace, debug, info, warn, error)
    /// Can be overridden by RUST_LOG environment variable
    pub level: String,

    /// Output format (pretty or json)
    pub format: LogFormat,

    /// Optional path to a diagnostic log file
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file: Option<PathBuf>,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Pretty,
            file: None,
        }
    }
}

/// Error type for logging initialization
#[derive(Debug, thiserror::Error)]
pub enum LogError {
    #[error("logging already initialized")]
    AlreadyInitialized,

    #[error("invalid log level: {0}")]
    InvalidLevel(String),

    #[error("failed to create log file: {0}")]
    FileCreate(#[from] io::Error),

    #[error("failed to set global subscriber: {0}")]
    SetSubscriber(#[from] tracing::subscriber::SetGlobalDefaultError),
}

/// Initialize the global logging subscriber
///
/// Call once at startup. Later calls return
/// `Err(LogError::AlreadyInitialized)`. `RUST_LOG` overrides the configured
/// level, e.g. `RUST_LOG=auditsink_core=debug`.
pub fn init_logging(config: &LogConfig) -> Result<(), LogError> {
    if LOGGING_INITIALIZED.get().is_some() {
        return Err(LogError::AlreadyInitialized);
    }

    config
        .level
        .parse::<LogLevel>()
        .map_err(|_| LogError::InvalidLevel(config.level.clone()))?;

    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level));

    let mut layers = vec![output_layer(config.format, std::io::stderr, true)];
    if let Some(path) = &config.file {
        let file = open_log_file(path)?;
        layers.push(output_layer(config.format, Arc::new(file), false));
    }

    tracing::subscriber::set_global_default(
        tracing_subscriber::registry().with(layers).with(env_filter),
    )?;
    let _ = LOGGING_INITIALIZED.set(true);

    tracing::info!(
        log_level = %config.level,
        log_format = %config.format,
        log_file = ?config.file,
        "Logging initialized"
    );

    Ok(())
}

type BoxedLayer = Box<dyn Layer<Registry> + Send + Sync + 'static>;

/// One formatting layer writing to `writer` in `format`.
fn output_layer<W>(format: LogFormat, writer: W, ansi: bool) -> BoxedLayer
where
    W: for<'w> MakeWriter<'w> + Send + Sync + 'static,
{
    match format {
        LogFormat::Pretty => fmt::layer()
            .with_writer(writer)
            .with_target(true)
            .with_thread_names(true)
            .with_span_events(FmtSpan::NONE)
            .with_ansi(ansi)
            .boxed(),
        LogFormat::Json => fmt::layer()
            .json()
            .with_timer(SystemTime)
            .with_writer(writer)
            .with_target(true)
            .with_thread_names(true)
            .with_current_span(true)
            .with_span_list(false)
            .flatten_event(true)
            .boxed(),
    }
}

/// Open the diagnostic log file for appending.
///
/// A missing parent directory is created 0700 and a new file 0600 (unix).
fn open_log_file(path: &Path) -> io::Result<File> {
    ensure_parent_dir(path, Some(0o700))?;
    let existed = path.exists();
    let file = OpenOptions::new().create(true).append(true).open(path)?;
    #[cfg(unix)]
    if !existed {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))?;
    }
    #[cfg(not(unix))]
    let _ = existed;
    Ok(file)
}

/// Check if logging has been initialized
pub fn is_logging_initialized() -> bool {
    LOGGING_INITIALIZED.get().is_some()
}

/// Log levels that can be used for filtering
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl From<LogLevel> for Level {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Trace => Self::TRACE,
            LogLevel::Debug => Self::DEBUG,
            LogLevel::Info => Self::INFO,
            LogLevel::Warn => Self::WARN,
            LogLevel::Error => Self::ERROR,
        }
    }
}

impl std::str::FromStr for LogLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "trace" => Ok(Self::Trace),
            "debug" => Ok(Self::Debug),
            "info" => Ok(Self::Info),
            "warn" | "warning" => Ok(Self::Warn),
            "error" => Ok(Self::Error),
            _ => Err(format!(
                "unknown log level: {s}. Expected one of: trace, debug, info, warn, error"
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::CapturedLogs;

    #[test]
    fn log_level_from_str() {
        assert_eq!("trace".parse::<LogLevel>().unwrap(), LogLevel::Trace);
        assert_eq!("DEBUG".parse::<LogLevel>().unwrap(), LogLevel::Debug);
        assert_eq!("Info".parse::<LogLevel>().unwrap(), LogLevel::Info);
        assert_eq!("warning".parse::<LogLevel>().unwrap(), LogLevel::Warn);
        assert_eq!("error".parse::<LogLevel>().unwrap(), LogLevel::Error);
        assert!("".parse::<LogLevel>().is_err());
    }

    #[test]
    fn log_level_from_str_error_message() {
        let err = "verbose".parse::<LogLevel>().unwrap_err();
        assert!(err.contains("unknown log level: verbose"));
        assert!(err.contains("trace, debug, info, warn, error"));
    }

    #[test]
    fn log_level_ordering() {
        assert!(LogLevel::Trace < LogLevel::Debug);
        assert!(LogLevel::Info < LogLevel::Warn);
        assert!(LogLevel::Warn < LogLevel::Error);
    }

    #[test]
    fn log_level_into_tracing_level() {
        assert_eq!(Level::from(LogLevel::Trace), Level::TRACE);
        assert_eq!(Level::from(LogLevel::Error), Level::ERROR);
    }

    #[test]
    fn log_config_serde_defaults_from_empty_json() {
        let config: LogConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config.level, "info");
        assert_eq!(config.format, LogFormat::Pretty);
        assert!(config.file.is_none());
    }

    #[test]
    fn log_config_serde_roundtrip() {
        let config = LogConfig {
            level: "debug".to_string(),
            format: LogFormat::Json,
            file: Some(PathBuf::from("/tmp/auditsink.log")),
        };
        let json = serde_json::to_string(&config).unwrap();
        let parsed: LogConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.level, config.level);
        assert_eq!(parsed.format, config.format);
        assert_eq!(parsed.file, config.file);
    }

    #[test]
    fn log_error_display() {
        assert_eq!(
            LogError::AlreadyInitialized.to_string(),
            "logging already initialized"
        );
        assert_eq!(
            LogError::InvalidLevel("verbose".to_string()).to_string(),
            "invalid log level: verbose"
        );
        let err: LogError = io::Error::new(io::ErrorKind::NotFound, "no such file").into();
        assert!(matches!(err, LogError::FileCreate(_)));
    }

    #[test]
    fn json_logs_are_parseable_and_carry_correlation_id() {
        let logs = CapturedLogs::new();
        let subscriber = tracing_subscriber::registry()
            .with(vec![output_layer(LogFormat::Json, logs.clone(), false)])
            .with(EnvFilter::new("info"));

        tracing::subscriber::with_default(subscriber, || {
            tracing::error!(correlation_id = "q-1", path = "/tmp/a.log", "dropped");
        });

        let output = logs.contents();
        let line = output.lines().find(|l| !l.trim().is_empty()).unwrap();
        let parsed: serde_json::Value = serde_json::from_str(line).unwrap();
        assert!(parsed.get("timestamp").is_some());
        assert_eq!(
            parsed.get("correlation_id").and_then(|v| v.as_str()),
            Some("q-1")
        );
    }

    #[test]
    fn pretty_layer_respects_filter() {
        let logs = CapturedLogs::new();
        let subscriber = tracing_subscriber::registry()
            .with(vec![output_layer(LogFormat::Pretty, logs.clone(), false)])
            .with(EnvFilter::new("warn"));

        tracing::subscriber::with_default(subscriber, || {
            tracing::info!("hidden");
            tracing::warn!(path = "/tmp/a.log", "shown");
        });

        let output = logs.contents();
        assert!(!output.contains("hidden"));
        assert!(output.contains("shown"));
        assert!(!output.contains('\u{1b}'));
    }

    #[cfg(unix)]
    #[test]
    fn log_file_is_created_private() {
        use std::os::unix::fs::PermissionsExt;

        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("diag").join("auditsink.log");
        drop(open_log_file(&path).unwrap());

        let file_mode = std::fs::metadata(&path).unwrap().permissions().mode() & 0o777;
        let dir_mode = std::fs::metadata(path.parent().unwrap())
            .unwrap()
            .permissions()
            .mode()
            & 0o777;
        assert_eq!(file_mode, 0o600);
        assert_eq!(dir_mode, 0o700);
    }
}

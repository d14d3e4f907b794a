//! Configuration management for auditsink
//!
//! Handles loading and validation of `auditsink.toml` files. Every field has a
//! default, so an empty file (or no file at all) yields a working writer.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::logging::LogConfig;

/// Environment variable naming an explicit config file.
pub const CONFIG_ENV_VAR: &str = "AUDITSINK_CONFIG";

/// Default config file name looked up under the user config directory.
pub const CONFIG_FILE_NAME: &str = "auditsink.toml";

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Writer subsystem settings
    #[serde(default)]
    pub writer: WriterConfig,

    /// Logging settings
    #[serde(default)]
    pub logging: LogConfig,
}

/// Tunables for the asynchronous writer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WriterConfig {
    /// Maximum number of queued records before new ones are dropped.
    pub queue_capacity: usize,
    /// A handle unused for this long is closed by the reaper.
    pub idle_timeout_ms: u64,
    /// How often the reaper scans for idle handles.
    pub reap_interval_ms: u64,
    /// Prefix for the writer and reaper thread names.
    pub thread_name_prefix: String,
    /// Unix permission bits applied to newly created audit files.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_mode: Option<u32>,
}

impl Default for WriterConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 10_000,
            idle_timeout_ms: 5_000,
            reap_interval_ms: 1_000,
            thread_name_prefix: "audit-writer".to_string(),
            file_mode: Some(0o600),
        }
    }
}

impl WriterConfig {
    #[must_use]
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_millis(self.idle_timeout_ms)
    }

    #[must_use]
    pub fn reap_interval(&self) -> Duration {
        Duration::from_millis(self.reap_interval_ms)
    }

    /// Reject values that would make the writer useless or spin.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.queue_capacity == 0 {
            return Err(ConfigError::ValidationError(
                "writer.queue_capacity must be > 0".to_string(),
            ));
        }
        if self.idle_timeout_ms == 0 {
            return Err(ConfigError::ValidationError(
                "writer.idle_timeout_ms must be > 0".to_string(),
            ));
        }
        if self.reap_interval_ms == 0 {
            return Err(ConfigError::ValidationError(
                "writer.reap_interval_ms must be > 0".to_string(),
            ));
        }
        if self.thread_name_prefix.trim().is_empty() {
            return Err(ConfigError::ValidationError(
                "writer.thread_name_prefix must not be empty".to_string(),
            ));
        }
        if let Some(mode) = self.file_mode {
            if mode > 0o7777 {
                return Err(ConfigError::ValidationError(format!(
                    "writer.file_mode {mode:#o} is not a permission mask"
                )));
            }
        }
        Ok(())
    }
}

/// Log output format
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-friendly output
    #[default]
    Pretty,
    /// JSON lines
    Json,
}

impl fmt::Display for LogFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pretty => write!(f, "pretty"),
            Self::Json => write!(f, "json"),
        }
    }
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pretty" => Ok(Self::Pretty),
            "json" => Ok(Self::Json),
            _ => Err(format!("unknown log format: {s}. Expected pretty or json")),
        }
    }
}

/// Resolve the config file to use.
///
/// Order: explicit path, then `AUDITSINK_CONFIG`, then
/// `<config_dir>/auditsink/auditsink.toml` if it exists.
pub fn resolve_config_path(explicit: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit {
        return Some(path.to_path_buf());
    }

    if let Some(path) = std::env::var_os(CONFIG_ENV_VAR) {
        if !path.is_empty() {
            return Some(PathBuf::from(path));
        }
    }

    dirs::config_dir()
        .map(|dir| dir.join("auditsink").join(CONFIG_FILE_NAME))
        .filter(|path| path.exists())
}

impl Config {
    /// Load configuration, falling back to defaults when no file is found.
    ///
    /// An explicitly named file (argument or environment) must exist.
    pub fn load(explicit: Option<&Path>) -> crate::Result<Self> {
        let named = explicit.is_some() || std::env::var_os(CONFIG_ENV_VAR).is_some();
        match resolve_config_path(explicit) {
            Some(path) if named || path.exists() => Self::load_from(&path),
            _ => {
                let config = Self::default();
                config.validate()?;
                Ok(config)
            }
        }
    }

    /// Load configuration from a specific path
    pub fn load_from(path: &Path) -> crate::Result<Self> {
        let shown = path.display().to_string();
        if !path.exists() {
            return Err(ConfigError::FileNotFound(shown).into());
        }
        let raw = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::ReadFailed(shown.clone(), e.to_string()))?;
        let config = Self::from_toml(&raw)?;
        tracing::debug!(path = %shown, "Loaded audit writer config");
        Ok(config)
    }

    /// Parse and validate a TOML document.
    pub fn from_toml(raw: &str) -> crate::Result<Self> {
        let config: Self =
            toml::from_str(raw).map_err(|e| ConfigError::ParseFailed(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Render the effective configuration as TOML.
    pub fn to_toml(&self) -> crate::Result<String> {
        toml::to_string_pretty(self)
            .map_err(|e| ConfigError::SerializeFailed(e.to_string()).into())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.writer.validate()?;
        self.logging
            .level
            .parse::<crate::logging::LogLevel>()
            .map_err(ConfigError::ValidationError)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;

    #[test]
    fn default_config_is_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.writer.queue_capacity, 10_000);
        assert_eq!(config.writer.idle_timeout(), Duration::from_secs(5));
        assert_eq!(config.writer.reap_interval(), Duration::from_secs(1));
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn empty_toml_yields_defaults() {
        let config = Config::from_toml("").unwrap();
        assert_eq!(config.writer, WriterConfig::default());
        assert_eq!(config.logging.format, LogFormat::Pretty);
    }

    #[test]
    fn partial_writer_section_keeps_other_defaults() {
        let config = Config::from_toml(
            r#"
            [writer]
            queue_capacity = 64
            idle_timeout_ms = 250
            "#,
        )
        .unwrap();
        assert_eq!(config.writer.queue_capacity, 64);
        assert_eq!(config.writer.idle_timeout_ms, 250);
        assert_eq!(config.writer.reap_interval_ms, 1_000);
        assert_eq!(config.writer.thread_name_prefix, "audit-writer");
    }

    #[test]
    fn logging_section_parses_format() {
        let config = Config::from_toml(
            r#"
            [logging]
            level = "debug"
            format = "json"
            "#,
        )
        .unwrap();
        assert_eq!(config.logging.level, "debug");
        assert_eq!(config.logging.format, LogFormat::Json);
    }

    #[test]
    fn zero_capacity_is_rejected() {
        let err = Config::from_toml("[writer]\nqueue_capacity = 0\n").unwrap_err();
        assert!(matches!(
            err,
            Error::Config(ConfigError::ValidationError(ref msg)) if msg.contains("queue_capacity")
        ));
    }

    #[test]
    fn zero_intervals_are_rejected() {
        let mut writer = WriterConfig {
            idle_timeout_ms: 0,
            ..WriterConfig::default()
        };
        assert!(writer.validate().is_err());
        writer.idle_timeout_ms = 10;
        writer.reap_interval_ms = 0;
        assert!(writer.validate().is_err());
    }

    #[test]
    fn bogus_file_mode_is_rejected() {
        let writer = WriterConfig {
            file_mode: Some(0o17777),
            ..WriterConfig::default()
        };
        assert!(writer.validate().is_err());
    }

    #[test]
    fn invalid_log_level_is_rejected() {
        let err = Config::from_toml("[logging]\nlevel = \"verbose\"\n").unwrap_err();
        assert!(matches!(err, Error::Config(ConfigError::ValidationError(_))));
    }

    #[test]
    fn malformed_toml_is_parse_error() {
        let err = Config::from_toml("[writer\nqueue_capacity = ").unwrap_err();
        assert!(matches!(err, Error::Config(ConfigError::ParseFailed(_))));
    }

    #[test]
    fn toml_render_roundtrips() {
        let mut config = Config::default();
        config.writer.queue_capacity = 7;
        let rendered = config.to_toml().unwrap();
        assert!(rendered.contains("queue_capacity = 7"));
        let parsed = Config::from_toml(&rendered).unwrap();
        assert_eq!(parsed.writer, config.writer);
    }

    #[test]
    fn load_from_missing_file_is_not_found() {
        let tmp = tempfile::TempDir::new().unwrap();
        let err = Config::load_from(&tmp.path().join("missing.toml")).unwrap_err();
        assert!(matches!(err, Error::Config(ConfigError::FileNotFound(_))));
    }

    #[test]
    fn load_with_explicit_path_reads_file() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join(CONFIG_FILE_NAME);
        std::fs::write(&path, "[writer]\nreap_interval_ms = 20\n").unwrap();
        let config = Config::load(Some(&path)).unwrap();
        assert_eq!(config.writer.reap_interval_ms, 20);
    }

    #[test]
    fn explicit_path_wins_resolution() {
        let path = Path::new("/etc/auditsink/custom.toml");
        assert_eq!(resolve_config_path(Some(path)), Some(path.to_path_buf()));
    }

    #[test]
    fn log_format_from_str() {
        assert_eq!("pretty".parse::<LogFormat>().unwrap(), LogFormat::Pretty);
        assert_eq!("JSON".parse::<LogFormat>().unwrap(), LogFormat::Json);
        assert!("xml".parse::<LogFormat>().is_err());
        assert_eq!(LogFormat::Json.to_string(), "json");
    }
}

//! auditsink CLI - append audit records through the asynchronous writer
//!
//! # Commands
//!
//! - `append` - read records from stdin and deliver them to audit files
//! - `config` - print the effective configuration as TOML

use std::io::{self, BufRead};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, bail};
use clap::{Parser, Subcommand};
use serde::Deserialize;

use auditsink_core::config::{Config, LogFormat};
use auditsink_core::error::format_error_with_remediation;
use auditsink_core::logging::init_logging;
use auditsink_core::{AuditLogFileWriter, FsHandleFactory, SerializedLog, WriterStats};

/// auditsink - asynchronous audit-log file writer
#[derive(Parser)]
#[command(name = "auditsink")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Config file (defaults to $AUDITSINK_CONFIG, then the user config dir)
    #[arg(short, long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Diagnostic log level (trace, debug, info, warn, error)
    #[arg(long, global = true, env = "AUDITSINK_LOG_LEVEL")]
    log_level: Option<String>,

    /// Diagnostic log format (pretty, json)
    #[arg(long, global = true)]
    log_format: Option<LogFormat>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Append records read from stdin
    ///
    /// Examples:
    ///   echo '{"event":"created"}' | auditsink append --file audit.log --query-id q1
    ///   auditsink append --json < records.jsonl
    Append {
        /// Target file for records that do not name one
        #[arg(short, long, value_name = "PATH")]
        file: Option<PathBuf>,

        /// Correlation id for plain-text records
        #[arg(short, long, default_value = "cli")]
        query_id: String,

        /// Treat each line as a JSON object with `correlation_id`, `payload`
        /// and optional `path`
        #[arg(long)]
        json: bool,

        /// How long to wait for queued records before stopping
        #[arg(long, default_value = "30000", value_name = "MS")]
        drain_timeout_ms: u64,

        /// Print delivery statistics as JSON on stdout
        #[arg(long)]
        stats: bool,
    },
    /// Print the effective configuration as TOML
    Config,
}

/// One line of `append --json` input.
#[derive(Debug, Deserialize)]
struct JsonRecord {
    #[serde(default)]
    path: Option<PathBuf>,
    correlation_id: String,
    payload: serde_json::Value,
}

impl JsonRecord {
    fn into_parts(self, default_path: Option<&Path>) -> anyhow::Result<(PathBuf, SerializedLog)> {
        let path = match (self.path, default_path) {
            (Some(path), _) => path,
            (None, Some(path)) => path.to_path_buf(),
            (None, None) => bail!(
                "record for query {} has no path and --file was not given",
                self.correlation_id
            ),
        };
        // String payloads are written verbatim, anything else as compact JSON.
        let payload = match self.payload {
            serde_json::Value::String(text) => text,
            other => other.to_string(),
        };
        Ok((path, SerializedLog::new(self.correlation_id, payload)))
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            if let Some(core) = err.downcast_ref::<auditsink_core::Error>() {
                eprintln!("{}", format_error_with_remediation(core));
            } else {
                eprintln!("Error: {err:#}");
            }
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> anyhow::Result<()> {
    let mut config = Config::load(cli.config.as_deref())?;
    if let Some(level) = cli.log_level {
        config.logging.level = level;
    }
    if let Some(format) = cli.log_format {
        config.logging.format = format;
    }
    config.validate()?;

    match cli.command {
        Commands::Config => {
            print!("{}", config.to_toml()?);
            Ok(())
        }
        Commands::Append {
            file,
            query_id,
            json,
            drain_timeout_ms,
            stats,
        } => {
            init_logging(&config.logging).context("failed to initialize logging")?;
            if file.is_none() && !json {
                bail!("--file is required unless --json records name their own path");
            }
            let summary = append(
                &config,
                file.as_deref(),
                &query_id,
                json,
                Duration::from_millis(drain_timeout_ms),
            )?;
            if stats {
                println!("{}", serde_json::to_string_pretty(&summary)?);
            }
            let lost = summary.dropped();
            if lost > 0 {
                bail!("{lost} audit record(s) were not delivered; see the log for details");
            }
            Ok(())
        }
    }
}

fn append(
    config: &Config,
    file: Option<&Path>,
    query_id: &str,
    json: bool,
    drain_timeout: Duration,
) -> anyhow::Result<WriterStats> {
    let factory = Arc::new(FsHandleFactory::from_config(&config.writer));
    let writer = AuditLogFileWriter::new(config.writer.clone(), factory)?;
    writer.start()?;

    // Records already accepted are drained even when the input is bad.
    let fed = feed(&writer, file, query_id, json);
    if !writer.wait_drained(drain_timeout) {
        tracing::warn!(
            timeout_ms = drain_timeout.as_millis() as u64,
            "Timed out waiting for queued audit records"
        );
    }
    writer.stop();
    fed?;
    Ok(writer.stats())
}

fn feed(
    writer: &AuditLogFileWriter,
    file: Option<&Path>,
    query_id: &str,
    json: bool,
) -> anyhow::Result<()> {
    let stdin = io::stdin();
    for (index, line) in stdin.lock().lines().enumerate() {
        let line = line.context("failed to read stdin")?;
        if line.trim().is_empty() {
            continue;
        }

        if json {
            let record: JsonRecord = serde_json::from_str(&line)
                .with_context(|| format!("invalid JSON record on line {}", index + 1))?;
            let (path, record) = record.into_parts(file)?;
            writer.write(path, record);
        } else if let Some(path) = file {
            writer.write(path, SerializedLog::new(query_id, line));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_parses_append_flags() {
        let cli = Cli::parse_from([
            "auditsink",
            "--log-level",
            "debug",
            "append",
            "--file",
            "/tmp/a.log",
            "--query-id",
            "q-1",
            "--stats",
        ]);
        assert_eq!(cli.log_level.as_deref(), Some("debug"));
        match cli.command {
            Commands::Append {
                file,
                query_id,
                json,
                stats,
                ..
            } => {
                assert_eq!(file, Some(PathBuf::from("/tmp/a.log")));
                assert_eq!(query_id, "q-1");
                assert!(!json);
                assert!(stats);
            }
            Commands::Config => panic!("expected append"),
        }
    }

    #[test]
    fn json_record_prefers_own_path() {
        let record: JsonRecord = serde_json::from_str(
            r#"{"path":"/tmp/own.log","correlation_id":"q-1","payload":"text"}"#,
        )
        .unwrap();
        let (path, log) = record.into_parts(Some(Path::new("/tmp/default.log"))).unwrap();
        assert_eq!(path, PathBuf::from("/tmp/own.log"));
        assert_eq!(log.payload, "text");
    }

    #[test]
    fn json_record_object_payload_is_compacted() {
        let record: JsonRecord =
            serde_json::from_str(r#"{"correlation_id":"q-2","payload":{"data":"value"}}"#)
                .unwrap();
        let (path, log) = record.into_parts(Some(Path::new("/tmp/default.log"))).unwrap();
        assert_eq!(path, PathBuf::from("/tmp/default.log"));
        assert_eq!(log.payload, r#"{"data":"value"}"#);
        assert_eq!(log.correlation_id, "q-2");
    }

    #[test]
    fn json_record_without_any_path_is_rejected() {
        let record: JsonRecord =
            serde_json::from_str(r#"{"correlation_id":"q-3","payload":"x"}"#).unwrap();
        let err = record.into_parts(None).unwrap_err();
        assert!(err.to_string().contains("q-3"));
    }
}

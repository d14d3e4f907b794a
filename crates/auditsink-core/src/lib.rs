//! auditsink-core: asynchronous audit-log file delivery
//!
//! Query-engine event listeners hand serialized audit records to an
//! [`AuditLogFileWriter`] without ever blocking. A single background thread
//! appends each record to its target file, keeping one open handle per path
//! and closing handles that go idle.
//!
//! # Architecture
//!
//! ```text
//! producer → write(path, record) → BoundedWorkQueue → writer loop
//!                                                        ↓
//!                               idle reaper → FileHandleRegistry → HandleFactory
//! ```
//!
//! # Modules
//!
//! - `writer`: the `AuditLogFileWriter` facade and its lifecycle
//! - `queue`: bounded, non-blocking-producer work queue
//! - `registry`: path → open handle map with idle eviction
//! - `worker`: the writer loop
//! - `reaper`: periodic idle-handle eviction
//! - `handle`: handle factory seam and the filesystem implementation
//! - `record`: serialized records and the serializer seam
//! - `stats`: delivery counters
//! - `config`: Configuration management
//! - `logging`: tracing subscriber setup
//! - `testing`: recording test doubles (`testing` feature)
//!
//! # Safety
//!
//! This crate forbids unsafe code.

#![forbid(unsafe_code)]

pub mod config;
pub mod error;
pub mod handle;
pub mod logging;
pub mod queue;
pub mod reaper;
pub mod record;
pub mod registry;
pub mod stats;
#[cfg(any(test, feature = "testing"))]
pub mod testing;
pub mod worker;
pub mod writer;

pub use config::{Config, WriterConfig};
pub use error::{ConfigError, Error, Remediation, Result, WriterError};
pub use handle::{AuditHandle, FsHandleFactory, HandleFactory};
pub use queue::{BoundedWorkQueue, OfferError};
pub use reaper::ReapReport;
pub use record::{LogSerializer, PassthroughSerializer, SerializedLog, WriteRequest};
pub use registry::FileHandleRegistry;
pub use stats::WriterStats;
pub use writer::AuditLogFileWriter;

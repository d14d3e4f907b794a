//! Audit record values flowing through the writer.
//!
//! A serializer turns a domain event into a [`SerializedLog`]; the writer pairs
//! it with a target path to form a [`WriteRequest`].

use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

/// A serialized audit event plus the id used to correlate it with its query.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SerializedLog {
    /// Correlation id (typically the query id).
    pub correlation_id: String,
    /// Opaque payload appended verbatim to the audit file.
    pub payload: String,
}

impl SerializedLog {
    #[must_use]
    pub fn new(correlation_id: impl Into<String>, payload: impl Into<String>) -> Self {
        Self {
            correlation_id: correlation_id.into(),
            payload: payload.into(),
        }
    }
}

/// Turns domain events into serialized audit records.
///
/// Implementations decide what to log and how; the writer treats the output
/// as opaque.
pub trait LogSerializer<E>: Send + Sync {
    /// Serialize `event`, or return `None` if it should not be written.
    fn serialize(&self, event: &E) -> Option<SerializedLog>;
}

/// Serializer for events that already are `(correlation_id, payload)` pairs.
#[derive(Debug, Clone, Copy, Default)]
pub struct PassthroughSerializer;

impl LogSerializer<SerializedLog> for PassthroughSerializer {
    fn serialize(&self, event: &SerializedLog) -> Option<SerializedLog> {
        Some(event.clone())
    }
}

impl LogSerializer<(String, String)> for PassthroughSerializer {
    fn serialize(&self, event: &(String, String)) -> Option<SerializedLog> {
        Some(SerializedLog::new(event.0.clone(), event.1.clone()))
    }
}

/// One queued append. Immutable once enqueued.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteRequest {
    target: Arc<Path>,
    record: SerializedLog,
}

impl WriteRequest {
    #[must_use]
    pub fn new(target: impl Into<PathBuf>, record: SerializedLog) -> Self {
        Self {
            target: Arc::from(target.into()),
            record,
        }
    }

    #[must_use]
    pub fn target(&self) -> &Path {
        &self.target
    }

    #[must_use]
    pub fn correlation_id(&self) -> &str {
        &self.record.correlation_id
    }

    #[must_use]
    pub fn payload(&self) -> &str {
        &self.record.payload
    }

    #[must_use]
    pub fn into_record(self) -> SerializedLog {
        self.record
    }
}

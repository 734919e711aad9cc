//! Collector backend seam
//!
//! Everything the instrumentation layer sends leaves the process through
//! these traits:
//!
//! - [`TelemetryBackend`]: SDK start, breadcrumbs, logs, session
//!   properties, user identity, session/device ids and network records
//! - [`Tracer`] / [`ActiveSpan`]: the tracer provider and its live spans
//!
//! ## Implementations
//!
//! - `MemoryBackend`: records every call, can be told to fail. Used by
//!   tests and by the demo's `--dump` mode.
//! - `LogBackend`: writes every call as a structured `tracing` event.

mod log;
mod memory;

pub use log::LogBackend;
pub use memory::{MemoryBackend, PropertyRecord, SpanKind, SpanRecord};

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::TelemetryResult;
use crate::events::LogEntry;
use crate::network::{NetworkErrorRecord, NetworkRequestRecord};

/// String attribute bag carried by spans
pub type Attributes = BTreeMap<String, String>;

/// Terminal status of a span
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SpanStatus {
    Unset,
    Ok,
    Error,
}

impl SpanStatus {
    /// Map a success flag to a terminal status
    pub fn from_success(success: bool) -> Self {
        if success {
            SpanStatus::Ok
        } else {
            SpanStatus::Error
        }
    }
}

/// A span whose duration was measured elsewhere
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletedSpan {
    pub name: String,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub attributes: Attributes,
    pub status: SpanStatus,
}

/// A live span owned by the span registry
pub trait ActiveSpan: Send + Sync {
    /// Set or overwrite one attribute
    fn set_attribute(&mut self, key: &str, value: &str);

    /// Set the terminal status
    fn set_status(&mut self, status: SpanStatus);

    /// Close the span
    fn end(self: Box<Self>, end_time: DateTime<Utc>);
}

/// Tracer provider exposed by the backend
pub trait Tracer: Send + Sync {
    /// Open a span with initial attributes
    fn start_span(
        &self,
        name: &str,
        attributes: &Attributes,
        start_time: DateTime<Utc>,
    ) -> TelemetryResult<Box<dyn ActiveSpan>>;

    /// Open a screen-view span
    fn start_view_span(
        &self,
        screen_name: &str,
        start_time: DateTime<Utc>,
    ) -> TelemetryResult<Box<dyn ActiveSpan>>;

    /// Emit an already-closed span
    fn record_completed_span(&self, span: CompletedSpan) -> TelemetryResult<()>;
}

/// Backend collector interface
#[async_trait]
pub trait TelemetryBackend: Send + Sync {
    /// Backend name (for logging)
    fn name(&self) -> &str;

    /// Start the SDK. Returns the backend's "started" flag.
    async fn start(&self, app_id: &str) -> TelemetryResult<bool>;

    /// Tracer provider, if the backend has one
    fn tracer(&self) -> Option<Arc<dyn Tracer>>;

    /// Append a breadcrumb
    async fn add_breadcrumb(&self, message: &str) -> TelemetryResult<()>;

    /// Send a structured log
    async fn log_message(&self, entry: LogEntry) -> TelemetryResult<()>;

    async fn set_user_identifier(&self, user_id: &str) -> TelemetryResult<()>;

    async fn clear_user_identifier(&self) -> TelemetryResult<()>;

    /// Attach a property to the current session
    async fn add_session_property(
        &self,
        key: &str,
        value: &str,
        permanent: bool,
    ) -> TelemetryResult<()>;

    async fn remove_session_property(&self, key: &str) -> TelemetryResult<()>;

    /// Current backend session id, `None` when unavailable
    async fn current_session_id(&self) -> TelemetryResult<Option<String>>;

    /// Device id, `None` when unavailable
    async fn current_device_id(&self) -> TelemetryResult<Option<String>>;

    /// End the current backend session. The backend opens a new one.
    async fn end_session(&self) -> TelemetryResult<()>;

    async fn record_network_request(&self, record: NetworkRequestRecord) -> TelemetryResult<()>;

    async fn record_network_error(&self, record: NetworkErrorRecord) -> TelemetryResult<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_from_success() {
        assert_eq!(SpanStatus::from_success(true), SpanStatus::Ok);
        assert_eq!(SpanStatus::from_success(false), SpanStatus::Error);
        assert_eq!(serde_json::to_string(&SpanStatus::Error).unwrap(), "\"error\"");
    }
}

//! Collector backend that reports through `tracing`
//!
//! Every call becomes one event under the `storefront_telemetry::collector`
//! target. Useful for local runs where no real collector is reachable.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;

use crate::backend::{
    ActiveSpan, Attributes, CompletedSpan, SpanStatus, TelemetryBackend, Tracer,
};
use crate::error::{TelemetryError, TelemetryResult};
use crate::events::{LogEntry, Severity};
use crate::network::{NetworkErrorRecord, NetworkRequestRecord};

const TARGET: &str = "storefront_telemetry::collector";

/// Collector backend writing to the local `tracing` subscriber
pub struct LogBackend {
    session_id: RwLock<Option<String>>,
    device_id: String,
}

impl LogBackend {
    pub fn new() -> Self {
        Self {
            session_id: RwLock::new(None),
            device_id: uuid::Uuid::new_v4().to_string(),
        }
    }
}

impl Default for LogBackend {
    fn default() -> Self {
        Self::new()
    }
}

struct LogSpan {
    name: String,
    start_time: DateTime<Utc>,
    attributes: Attributes,
    status: SpanStatus,
}

impl ActiveSpan for LogSpan {
    fn set_attribute(&mut self, key: &str, value: &str) {
        self.attributes.insert(key.to_string(), value.to_string());
    }

    fn set_status(&mut self, status: SpanStatus) {
        self.status = status;
    }

    fn end(self: Box<Self>, end_time: DateTime<Utc>) {
        tracing::info!(
            target: TARGET,
            span = %self.name,
            status = ?self.status,
            duration_ms = (end_time - self.start_time).num_milliseconds(),
            attributes = ?self.attributes,
            "span ended"
        );
    }
}

struct LogTracer;

impl Tracer for LogTracer {
    fn start_span(
        &self,
        name: &str,
        attributes: &Attributes,
        start_time: DateTime<Utc>,
    ) -> TelemetryResult<Box<dyn ActiveSpan>> {
        tracing::debug!(target: TARGET, span = %name, "span started");
        Ok(Box::new(LogSpan {
            name: name.to_string(),
            start_time,
            attributes: attributes.clone(),
            status: SpanStatus::Unset,
        }))
    }

    fn start_view_span(
        &self,
        screen_name: &str,
        start_time: DateTime<Utc>,
    ) -> TelemetryResult<Box<dyn ActiveSpan>> {
        let mut attributes = Attributes::new();
        attributes.insert("view.name".to_string(), screen_name.to_string());
        self.start_span(screen_name, &attributes, start_time)
    }

    fn record_completed_span(&self, span: CompletedSpan) -> TelemetryResult<()> {
        tracing::info!(
            target: TARGET,
            span = %span.name,
            status = ?span.status,
            duration_ms = (span.end_time - span.start_time).num_milliseconds(),
            attributes = ?span.attributes,
            "completed span recorded"
        );
        Ok(())
    }
}

#[async_trait]
impl TelemetryBackend for LogBackend {
    fn name(&self) -> &str {
        "log"
    }

    async fn start(&self, app_id: &str) -> TelemetryResult<bool> {
        let session_id = uuid::Uuid::new_v4().to_string();
        tracing::info!(target: TARGET, %app_id, %session_id, "sdk started");
        *self.session_id.write() = Some(session_id);
        Ok(true)
    }

    fn tracer(&self) -> Option<Arc<dyn Tracer>> {
        Some(Arc::new(LogTracer))
    }

    async fn add_breadcrumb(&self, message: &str) -> TelemetryResult<()> {
        tracing::info!(target: TARGET, text = %message, "breadcrumb");
        Ok(())
    }

    async fn log_message(&self, entry: LogEntry) -> TelemetryResult<()> {
        match entry.severity {
            Severity::Info => tracing::info!(
                target: TARGET,
                text = %entry.message,
                properties = ?entry.properties,
                "log"
            ),
            Severity::Warning => tracing::warn!(
                target: TARGET,
                text = %entry.message,
                properties = ?entry.properties,
                escalated = entry.escalated,
                "log"
            ),
            Severity::Error => tracing::error!(
                target: TARGET,
                text = %entry.message,
                properties = ?entry.properties,
                escalated = entry.escalated,
                "log"
            ),
        }
        Ok(())
    }

    async fn set_user_identifier(&self, user_id: &str) -> TelemetryResult<()> {
        tracing::info!(target: TARGET, %user_id, "user identifier set");
        Ok(())
    }

    async fn clear_user_identifier(&self) -> TelemetryResult<()> {
        tracing::info!(target: TARGET, "user identifier cleared");
        Ok(())
    }

    async fn add_session_property(
        &self,
        key: &str,
        value: &str,
        permanent: bool,
    ) -> TelemetryResult<()> {
        tracing::info!(target: TARGET, %key, %value, permanent, "session property set");
        Ok(())
    }

    async fn remove_session_property(&self, key: &str) -> TelemetryResult<()> {
        tracing::info!(target: TARGET, %key, "session property removed");
        Ok(())
    }

    async fn current_session_id(&self) -> TelemetryResult<Option<String>> {
        Ok(self.session_id.read().clone())
    }

    async fn current_device_id(&self) -> TelemetryResult<Option<String>> {
        Ok(Some(self.device_id.clone()))
    }

    async fn end_session(&self) -> TelemetryResult<()> {
        let mut session_id = self.session_id.write();
        let Some(previous) = session_id.take() else {
            return Err(TelemetryError::NotInitialized);
        };
        *session_id = Some(uuid::Uuid::new_v4().to_string());
        tracing::info!(target: TARGET, session_id = %previous, "session ended");
        Ok(())
    }

    async fn record_network_request(&self, record: NetworkRequestRecord) -> TelemetryResult<()> {
        tracing::info!(
            target: TARGET,
            url = %record.url,
            method = %record.method,
            status_code = record.status_code,
            bytes_sent = record.bytes_sent,
            bytes_received = record.bytes_received,
            duration_ms = record.duration_ms(),
            "network request"
        );
        Ok(())
    }

    async fn record_network_error(&self, record: NetworkErrorRecord) -> TelemetryResult<()> {
        tracing::warn!(
            target: TARGET,
            url = %record.url,
            method = %record.method,
            error_type = %record.error_type,
            error_message = %record.error_message,
            duration_ms = record.duration_ms(),
            "network error"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_log_backend_session_rotates() {
        let backend = LogBackend::new();
        assert!(backend.current_session_id().await.unwrap().is_none());

        assert!(backend.start("sfios").await.unwrap());
        let first = backend.current_session_id().await.unwrap();
        assert!(first.is_some());

        backend.end_session().await.unwrap();
        let second = backend.current_session_id().await.unwrap();
        assert!(second.is_some());
        assert_ne!(first, second);
    }

    #[tokio::test]
    async fn test_log_backend_end_before_start() {
        let backend = LogBackend::new();
        let result = backend.end_session().await;
        assert!(matches!(result, Err(TelemetryError::NotInitialized)));
        assert!(backend.current_session_id().await.unwrap().is_none());
    }

    #[test]
    fn test_log_backend_has_tracer() {
        let backend = LogBackend::new();
        let tracer = backend.tracer().unwrap();
        let span = tracer.start_view_span("home", Utc::now()).unwrap();
        span.end(Utc::now());
    }
}

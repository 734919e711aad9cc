//! In-memory collector backend
//!
//! Records every call for inspection. Cloning shares the same recording,
//! so a test can keep one handle while the instrumentation owns another.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::backend::{
    ActiveSpan, Attributes, CompletedSpan, SpanStatus, TelemetryBackend, Tracer,
};
use crate::error::{TelemetryError, TelemetryResult};
use crate::events::LogEntry;
use crate::network::{NetworkErrorRecord, NetworkRequestRecord};

/// How a recorded span was produced
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SpanKind {
    Live,
    View,
    Completed,
}

/// A span that reached the collector
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpanRecord {
    pub name: String,
    pub kind: SpanKind,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub attributes: Attributes,
    pub status: SpanStatus,
}

/// A session property as the collector sees it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PropertyRecord {
    pub value: String,
    pub permanent: bool,
}

#[derive(Debug, Default, Serialize)]
struct Recording {
    app_id: Option<String>,
    session_id: Option<String>,
    device_id: String,
    sessions_ended: u64,
    user_id: Option<String>,
    breadcrumbs: Vec<String>,
    logs: Vec<LogEntry>,
    properties: BTreeMap<String, PropertyRecord>,
    spans: Vec<SpanRecord>,
    network_requests: Vec<NetworkRequestRecord>,
    network_errors: Vec<NetworkErrorRecord>,
}

struct Shared {
    recording: Mutex<Recording>,
    starts: bool,
    has_tracer: bool,
    ids_available: AtomicBool,
    fail_transport: AtomicBool,
    spans_started: AtomicU64,
    start_delay_ms: AtomicU64,
    start_calls: AtomicU64,
}

/// Collector backend that keeps everything in memory
#[derive(Clone)]
pub struct MemoryBackend {
    shared: Arc<Shared>,
}

impl MemoryBackend {
    /// Backend that starts successfully and provides a tracer
    pub fn new() -> Self {
        Self::build(true, true)
    }

    /// Backend whose `start` reports `false`
    pub fn refusing_start() -> Self {
        Self::build(false, true)
    }

    /// Backend that starts but has no tracer provider
    pub fn without_tracer() -> Self {
        Self::build(true, false)
    }

    fn build(starts: bool, has_tracer: bool) -> Self {
        let recording = Recording {
            device_id: uuid::Uuid::new_v4().to_string(),
            ..Recording::default()
        };
        Self {
            shared: Arc::new(Shared {
                recording: Mutex::new(recording),
                starts,
                has_tracer,
                ids_available: AtomicBool::new(true),
                fail_transport: AtomicBool::new(false),
                spans_started: AtomicU64::new(0),
                start_delay_ms: AtomicU64::new(0),
                start_calls: AtomicU64::new(0),
            }),
        }
    }

    /// Make every subsequent send fail with a transport error
    pub fn set_fail_transport(&self, fail: bool) {
        self.shared.fail_transport.store(fail, Ordering::SeqCst);
    }

    /// Make session/device id lookups report "unavailable"
    pub fn set_ids_available(&self, available: bool) {
        self.shared.ids_available.store(available, Ordering::SeqCst);
    }

    /// Make `start` take this long before answering
    pub fn set_start_delay(&self, delay: Duration) {
        let millis = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX);
        self.shared.start_delay_ms.store(millis, Ordering::SeqCst);
    }

    /// Number of times `start` was called
    pub fn start_calls(&self) -> u64 {
        self.shared.start_calls.load(Ordering::SeqCst)
    }

    pub fn app_id(&self) -> Option<String> {
        self.shared.recording.lock().app_id.clone()
    }

    pub fn breadcrumbs(&self) -> Vec<String> {
        self.shared.recording.lock().breadcrumbs.clone()
    }

    pub fn logs(&self) -> Vec<LogEntry> {
        self.shared.recording.lock().logs.clone()
    }

    pub fn properties(&self) -> BTreeMap<String, PropertyRecord> {
        self.shared.recording.lock().properties.clone()
    }

    pub fn property(&self, key: &str) -> Option<PropertyRecord> {
        self.shared.recording.lock().properties.get(key).cloned()
    }

    pub fn user_id(&self) -> Option<String> {
        self.shared.recording.lock().user_id.clone()
    }

    /// Spans that have ended, in end order
    pub fn spans(&self) -> Vec<SpanRecord> {
        self.shared.recording.lock().spans.clone()
    }

    /// First ended span with the given name
    pub fn span_named(&self, name: &str) -> Option<SpanRecord> {
        self.shared
            .recording
            .lock()
            .spans
            .iter()
            .find(|s| s.name == name)
            .cloned()
    }

    /// Number of live and view spans ever opened
    pub fn spans_started(&self) -> u64 {
        self.shared.spans_started.load(Ordering::SeqCst)
    }

    pub fn network_requests(&self) -> Vec<NetworkRequestRecord> {
        self.shared.recording.lock().network_requests.clone()
    }

    pub fn network_errors(&self) -> Vec<NetworkErrorRecord> {
        self.shared.recording.lock().network_errors.clone()
    }

    pub fn sessions_ended(&self) -> u64 {
        self.shared.recording.lock().sessions_ended
    }

    /// Whole recording as JSON
    pub fn snapshot(&self) -> TelemetryResult<serde_json::Value> {
        let recording = self.shared.recording.lock();
        Ok(serde_json::to_value(&*recording)?)
    }

    fn check_transport(&self) -> TelemetryResult<()> {
        if self.shared.fail_transport.load(Ordering::SeqCst) {
            Err(TelemetryError::Transport("collector unreachable".to_string()))
        } else {
            Ok(())
        }
    }

    fn check_tracer(&self) -> TelemetryResult<()> {
        if self.shared.has_tracer {
            Ok(())
        } else {
            Err(TelemetryError::TracerUnavailable)
        }
    }

    fn open_span(
        &self,
        name: &str,
        kind: SpanKind,
        attributes: Attributes,
        start_time: DateTime<Utc>,
    ) -> TelemetryResult<Box<dyn ActiveSpan>> {
        self.check_tracer()?;
        self.check_transport()?;
        self.shared.spans_started.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(MemorySpan {
            shared: self.shared.clone(),
            record: SpanRecord {
                name: name.to_string(),
                kind,
                start_time,
                end_time: start_time,
                attributes,
                status: SpanStatus::Unset,
            },
        }))
    }
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

struct MemorySpan {
    shared: Arc<Shared>,
    record: SpanRecord,
}

impl ActiveSpan for MemorySpan {
    fn set_attribute(&mut self, key: &str, value: &str) {
        self.record.attributes.insert(key.to_string(), value.to_string());
    }

    fn set_status(&mut self, status: SpanStatus) {
        self.record.status = status;
    }

    fn end(self: Box<Self>, end_time: DateTime<Utc>) {
        let mut record = self.record;
        record.end_time = end_time;
        self.shared.recording.lock().spans.push(record);
    }
}

impl Tracer for MemoryBackend {
    fn start_span(
        &self,
        name: &str,
        attributes: &Attributes,
        start_time: DateTime<Utc>,
    ) -> TelemetryResult<Box<dyn ActiveSpan>> {
        self.open_span(name, SpanKind::Live, attributes.clone(), start_time)
    }

    fn start_view_span(
        &self,
        screen_name: &str,
        start_time: DateTime<Utc>,
    ) -> TelemetryResult<Box<dyn ActiveSpan>> {
        let mut attributes = Attributes::new();
        attributes.insert("view.name".to_string(), screen_name.to_string());
        self.open_span(screen_name, SpanKind::View, attributes, start_time)
    }

    fn record_completed_span(&self, span: CompletedSpan) -> TelemetryResult<()> {
        self.check_tracer()?;
        self.check_transport()?;
        self.shared.recording.lock().spans.push(SpanRecord {
            name: span.name,
            kind: SpanKind::Completed,
            start_time: span.start_time,
            end_time: span.end_time,
            attributes: span.attributes,
            status: span.status,
        });
        Ok(())
    }
}

#[async_trait]
impl TelemetryBackend for MemoryBackend {
    fn name(&self) -> &str {
        "memory"
    }

    async fn start(&self, app_id: &str) -> TelemetryResult<bool> {
        self.shared.start_calls.fetch_add(1, Ordering::SeqCst);
        let delay_ms = self.shared.start_delay_ms.load(Ordering::SeqCst);
        if delay_ms > 0 {
            tokio::time::sleep(Duration::from_millis(delay_ms)).await;
        }

        if !self.shared.starts {
            return Ok(false);
        }
        let mut recording = self.shared.recording.lock();
        recording.app_id = Some(app_id.to_string());
        recording.session_id = Some(uuid::Uuid::new_v4().to_string());
        Ok(true)
    }

    fn tracer(&self) -> Option<Arc<dyn Tracer>> {
        if self.shared.has_tracer {
            Some(Arc::new(self.clone()))
        } else {
            None
        }
    }

    async fn add_breadcrumb(&self, message: &str) -> TelemetryResult<()> {
        self.check_transport()?;
        self.shared.recording.lock().breadcrumbs.push(message.to_string());
        Ok(())
    }

    async fn log_message(&self, entry: LogEntry) -> TelemetryResult<()> {
        self.check_transport()?;
        self.shared.recording.lock().logs.push(entry);
        Ok(())
    }

    async fn set_user_identifier(&self, user_id: &str) -> TelemetryResult<()> {
        self.check_transport()?;
        self.shared.recording.lock().user_id = Some(user_id.to_string());
        Ok(())
    }

    async fn clear_user_identifier(&self) -> TelemetryResult<()> {
        self.check_transport()?;
        self.shared.recording.lock().user_id = None;
        Ok(())
    }

    async fn add_session_property(
        &self,
        key: &str,
        value: &str,
        permanent: bool,
    ) -> TelemetryResult<()> {
        self.check_transport()?;
        self.shared.recording.lock().properties.insert(
            key.to_string(),
            PropertyRecord {
                value: value.to_string(),
                permanent,
            },
        );
        Ok(())
    }

    async fn remove_session_property(&self, key: &str) -> TelemetryResult<()> {
        self.check_transport()?;
        self.shared.recording.lock().properties.remove(key);
        Ok(())
    }

    async fn current_session_id(&self) -> TelemetryResult<Option<String>> {
        self.check_transport()?;
        if !self.shared.ids_available.load(Ordering::SeqCst) {
            return Ok(None);
        }
        Ok(self.shared.recording.lock().session_id.clone())
    }

    async fn current_device_id(&self) -> TelemetryResult<Option<String>> {
        self.check_transport()?;
        if !self.shared.ids_available.load(Ordering::SeqCst) {
            return Ok(None);
        }
        Ok(Some(self.shared.recording.lock().device_id.clone()))
    }

    async fn end_session(&self) -> TelemetryResult<()> {
        self.check_transport()?;
        let mut recording = self.shared.recording.lock();
        recording.sessions_ended += 1;
        recording.properties.retain(|_, p| p.permanent);
        recording.session_id = Some(uuid::Uuid::new_v4().to_string());
        Ok(())
    }

    async fn record_network_request(&self, record: NetworkRequestRecord) -> TelemetryResult<()> {
        self.check_transport()?;
        self.shared.recording.lock().network_requests.push(record);
        Ok(())
    }

    async fn record_network_error(&self, record: NetworkErrorRecord) -> TelemetryResult<()> {
        self.check_transport()?;
        self.shared.recording.lock().network_errors.push(record);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::Severity;

    #[tokio::test]
    async fn test_start_assigns_session() {
        let backend = MemoryBackend::new();

        assert!(backend.start("sfios").await.unwrap());
        assert_eq!(backend.app_id().as_deref(), Some("sfios"));
        assert!(backend.current_session_id().await.unwrap().is_some());
        assert!(backend.current_device_id().await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_refusing_start() {
        let backend = MemoryBackend::refusing_start();
        assert!(!backend.start("sfios").await.unwrap());
        assert!(backend.app_id().is_none());
    }

    #[tokio::test]
    async fn test_fail_transport() {
        let backend = MemoryBackend::new();
        backend.set_fail_transport(true);

        let result = backend.add_breadcrumb("hello").await;
        assert!(matches!(result, Err(TelemetryError::Transport(_))));
        assert!(backend.breadcrumbs().is_empty());

        backend.set_fail_transport(false);
        backend.add_breadcrumb("hello").await.unwrap();
        assert_eq!(backend.breadcrumbs(), vec!["hello".to_string()]);
    }

    #[tokio::test]
    async fn test_end_session_keeps_permanent_properties() {
        let backend = MemoryBackend::new();
        backend.start("sfios").await.unwrap();
        let first = backend.current_session_id().await.unwrap();

        backend.add_session_property("user_logged_in", "true", true).await.unwrap();
        backend.add_session_property("cart_value", "12.50", false).await.unwrap();
        backend.end_session().await.unwrap();

        assert!(backend.property("user_logged_in").is_some());
        assert!(backend.property("cart_value").is_none());
        assert_eq!(backend.sessions_ended(), 1);
        assert_ne!(backend.current_session_id().await.unwrap(), first);
    }

    #[test]
    fn test_span_recorded_on_end() {
        let backend = MemoryBackend::new();
        let now = Utc::now();

        let mut span = backend.start_span("checkout", &Attributes::new(), now).unwrap();
        span.set_attribute("step", "payment");
        span.set_status(SpanStatus::Error);
        assert!(backend.spans().is_empty());

        span.end(now);

        let record = backend.span_named("checkout").unwrap();
        assert_eq!(record.kind, SpanKind::Live);
        assert_eq!(record.status, SpanStatus::Error);
        assert_eq!(record.attributes.get("step").map(String::as_str), Some("payment"));
        assert_eq!(backend.spans_started(), 1);
    }

    #[test]
    fn test_tracer_unavailable() {
        let backend = MemoryBackend::without_tracer();
        assert!(backend.tracer().is_none());

        let result = backend.start_span("checkout", &Attributes::new(), Utc::now());
        assert!(matches!(result, Err(TelemetryError::TracerUnavailable)));
        assert_eq!(backend.spans_started(), 0);
    }

    #[tokio::test]
    async fn test_snapshot_serializes() {
        let backend = MemoryBackend::new();
        backend.start("sfios").await.unwrap();
        backend
            .log_message(LogEntry::new(Severity::Info, "hello", BTreeMap::new()))
            .await
            .unwrap();

        let snapshot = backend.snapshot().unwrap();
        assert_eq!(snapshot["logs"][0]["message"], "hello");
        assert_eq!(snapshot["app_id"], "sfios");
    }
}

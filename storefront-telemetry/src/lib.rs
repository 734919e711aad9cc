//! Storefront Telemetry - instrumentation layer for the storefront demo
//!
//! The storefront exists to produce realistic telemetry. This crate is the
//! part that does it:
//! - Manages the observability session and its spans
//! - Brackets outbound calls with spans and network records
//! - Keeps session-scoped key/value properties
//! - Optionally schedules a probabilistic crash to exercise crash reporting
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     INSTRUMENTATION                         │
//! │                                                             │
//! │  ┌─────────────┐  ┌─────────────┐  ┌─────────────┐          │
//! │  │  Session    │  │    Span     │  │   Event     │          │
//! │  │ Properties  │  │  Registry   │  │  Emitter    │          │
//! │  └─────────────┘  └─────────────┘  └─────────────┘          │
//! │         │                │                │                 │
//! │  ┌─────────────┐         │         ┌─────────────┐          │
//! │  │  Network    │─────────┘         │   Crash     │          │
//! │  │  Wrapper    │                   │  Scheduler  │          │
//! │  └─────────────┘                   └─────────────┘          │
//! │                          │                                  │
//! │  ┌───────────────────────┼───────────────────────┐          │
//! │  │            COLLECTOR BACKEND                   │          │
//! │  │      ┌────────┐   ┌────────┐   ┌────────┐      │          │
//! │  │      │ Memory │   │  Log   │   │  SDK   │      │          │
//! │  │      └────────┘   └────────┘   └────────┘      │          │
//! │  └───────────────────────────────────────────────┘          │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Usage
//!
//! ```rust,ignore
//! use storefront_telemetry::{Instrumentation, TelemetryConfig, ApiRequest};
//!
//! let telemetry = Instrumentation::builder(TelemetryConfig::default().apply_env()).build()?;
//! telemetry.initialize().await;
//!
//! let products = telemetry
//!     .track_api_call(ApiRequest::get("/products"), api.fetch_products())
//!     .await?;
//!
//! telemetry.end_session().await;
//! ```

pub mod backend;
pub mod config;
pub mod crash;
pub mod error;
pub mod events;
pub mod network;
pub mod properties;
pub mod session;
pub mod spans;
pub mod timing;
pub mod tracking;

pub use backend::{
    ActiveSpan, Attributes, CompletedSpan, LogBackend, MemoryBackend, SpanStatus,
    TelemetryBackend, Tracer,
};
pub use config::{AppIds, CrashConfig, Platform, TelemetryConfig};
pub use crash::{
    AbortFaultInjector, CrashState, FaultInjector, FaultOrigin, FixedRandom, InjectedFault,
    RandomSource, RecordingFaultInjector, SeededRandom, ThreadRandom,
};
pub use error::{TelemetryError, TelemetryResult};
pub use events::{LogEntry, LogProperties, Severity};
pub use network::{ApiRequest, HttpMethod, NetworkErrorRecord, NetworkRequestRecord};
pub use spans::SpanHandle;
pub use timing::{MockTimerBackend, TimerBackend, TokioTimerBackend};
pub use tracking::PurchaseSummary;

use std::future::Future;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::crash::CrashScheduler;
use crate::events::EventEmitter;
use crate::network::NetworkInstrumentation;
use crate::properties::SessionPropertyStore;
use crate::session::Session;
use crate::spans::SpanRegistry;

/// The instrumentation context
///
/// Construct one at application start, call [`initialize`](Self::initialize)
/// and pass it (usually behind an `Arc`) to every call site. Every method is
/// a no-op until initialization succeeds, and none of them surface collector
/// failures.
pub struct Instrumentation {
    config: TelemetryConfig,
    backend: Arc<dyn TelemetryBackend>,
    session: Arc<Session>,
    properties: SessionPropertyStore,
    spans: Arc<SpanRegistry>,
    events: Arc<EventEmitter>,
    network: NetworkInstrumentation,
    crash: CrashScheduler,
    init_lock: tokio::sync::Mutex<()>,
}

impl Instrumentation {
    /// Start building an instrumentation context
    pub fn builder(config: TelemetryConfig) -> InstrumentationBuilder {
        InstrumentationBuilder::new(config)
    }

    /// Create with a custom backend and default crash collaborators
    pub fn with_backend<B: TelemetryBackend + 'static>(
        config: TelemetryConfig,
        backend: B,
    ) -> TelemetryResult<Self> {
        Self::builder(config).backend(backend).build()
    }

    /// Start the backend session
    ///
    /// Seeds default session properties and evaluates the crash scheduler.
    /// Returns `false` if the backend did not start; the context then stays
    /// inert. Calling again once initialized returns `true` and does nothing.
    /// Overlapping calls run one at a time.
    pub async fn initialize(&self) -> bool {
        if self.session.is_initialized() {
            tracing::debug!("Telemetry already initialized");
            return true;
        }

        let _guard = self.init_lock.lock().await;
        if self.session.is_initialized() {
            return true;
        }

        let app_id = self.config.app_id();
        match self.backend.start(app_id).await {
            Ok(true) => {}
            Ok(false) => {
                let error = TelemetryError::BackendStart {
                    app_id: app_id.to_string(),
                };
                tracing::warn!(backend = self.backend.name(), %error, "Telemetry backend did not start");
                return false;
            }
            Err(e) => {
                tracing::warn!(%app_id, error = %e, "Telemetry backend failed to start");
                return false;
            }
        }

        self.session.mark_initialized();

        match self.backend.tracer() {
            Some(tracer) => self.spans.attach_tracer(tracer),
            None => tracing::warn!("Tracer provider unavailable, spans disabled"),
        }

        self.properties
            .set("app_version", &self.config.app_version, false)
            .await;
        self.properties
            .set("environment", &self.config.environment, false)
            .await;
        self.properties
            .set("platform", self.config.platform.as_str(), false)
            .await;
        for (key, value) in &self.config.default_properties {
            self.properties.set(key, value, false).await;
        }

        self.events.breadcrumb("App initialized").await;

        let crash_state = self.crash.evaluate(&self.properties, self.events.clone()).await;

        tracing::info!(
            %app_id,
            backend = self.backend.name(),
            ci_mode = self.config.ci_mode,
            crash = ?crash_state,
            "Telemetry initialized"
        );
        true
    }

    /// Whether `initialize` has succeeded
    pub fn is_initialized(&self) -> bool {
        self.session.is_initialized()
    }

    /// Configuration this context was built with
    pub fn config(&self) -> &TelemetryConfig {
        &self.config
    }

    // ── Events ─────────────────────────────────────────────────────────

    /// Record a breadcrumb
    pub async fn breadcrumb(&self, message: &str) {
        self.events.breadcrumb(message).await;
    }

    /// Send a log with the severity's default escalation
    pub async fn log(&self, severity: Severity, message: &str, properties: Option<LogProperties>) {
        self.events.log(severity, message, properties).await;
    }

    /// Send a log, optionally overriding escalation
    pub async fn log_with(
        &self,
        severity: Severity,
        message: &str,
        properties: Option<LogProperties>,
        escalated: Option<bool>,
    ) {
        self.events.log_with(severity, message, properties, escalated).await;
    }

    /// Send an ERROR log describing a handled error
    pub async fn log_handled_error<E: std::error::Error>(
        &self,
        error: &E,
        properties: Option<LogProperties>,
    ) {
        self.events.log_handled_error(error, properties).await;
    }

    // ── Spans ──────────────────────────────────────────────────────────

    /// Open a live span
    pub fn start_span(&self, name: &str, attributes: Option<&Attributes>) -> Option<SpanHandle> {
        self.spans.start_span(name, attributes)
    }

    /// Close a live span with OK or ERROR status
    pub fn end_span(&self, handle: &SpanHandle, success: bool) {
        self.spans.end_span(handle, success);
    }

    /// Set an attribute on a live span
    pub fn add_span_attribute(&self, handle: &SpanHandle, key: &str, value: &str) {
        self.spans.add_attribute(handle, key, value);
    }

    /// Emit a span whose start and end are already known
    pub fn record_completed_span(
        &self,
        name: &str,
        start_time: DateTime<Utc>,
        end_time: DateTime<Utc>,
        attributes: Option<Attributes>,
        success: bool,
    ) {
        self.spans
            .record_completed_span(name, start_time, end_time, attributes, success);
    }

    /// Open a screen-view span
    pub fn start_screen_view_span(&self, screen_name: &str) -> Option<SpanHandle> {
        self.spans.start_screen_view_span(screen_name)
    }

    /// Number of live spans
    pub fn live_span_count(&self) -> usize {
        self.spans.len()
    }

    // ── Network ────────────────────────────────────────────────────────

    /// Record a completed network request
    pub async fn record_network_request(&self, record: NetworkRequestRecord) {
        self.network.record_network_request(record).await;
    }

    /// Record a failed network request
    pub async fn record_network_error(&self, record: NetworkErrorRecord) {
        self.network.record_network_error(record).await;
    }

    /// Bracket an outbound call with a span and a network record
    pub async fn track_api_call<T, E, F>(&self, request: ApiRequest, operation: F) -> Result<T, E>
    where
        T: Serialize,
        E: std::fmt::Display,
        F: Future<Output = Result<T, E>>,
    {
        self.network.track_api_call(request, operation).await
    }

    // ── Session ────────────────────────────────────────────────────────

    /// Set or overwrite a session property
    pub async fn set_session_property(&self, key: &str, value: &str, permanent: bool) {
        self.properties.set(key, value, permanent).await;
    }

    /// Remove a session property
    pub async fn remove_session_property(&self, key: &str) {
        self.properties.remove(key).await;
    }

    /// Attach a user identifier to the session
    pub async fn set_user_identifier(&self, user_id: &str) {
        if !self.session.is_initialized() {
            return;
        }
        if let Err(e) = self.backend.set_user_identifier(user_id).await {
            tracing::warn!(error = %e, "Failed to set user identifier");
        }
    }

    /// Detach the user identifier
    pub async fn clear_user_identifier(&self) {
        if !self.session.is_initialized() {
            return;
        }
        if let Err(e) = self.backend.clear_user_identifier().await {
            tracing::warn!(error = %e, "Failed to clear user identifier");
        }
    }

    /// Backend session id, fetched on first use and cached for the session
    pub async fn get_session_id(&self) -> Option<String> {
        if !self.session.is_initialized() {
            return None;
        }
        if let Some(id) = self.session.cached_session_id() {
            return Some(id);
        }

        match self.backend.current_session_id().await {
            Ok(Some(id)) => {
                self.session.cache_session_id(&id);
                Some(id)
            }
            Ok(None) => None,
            Err(e) => {
                tracing::warn!(error = %e, "Failed to fetch session id");
                None
            }
        }
    }

    /// Device id, fetched on first use and cached
    pub async fn get_device_id(&self) -> Option<String> {
        if !self.session.is_initialized() {
            return None;
        }
        if let Some(id) = self.session.cached_device_id() {
            return Some(id);
        }

        match self.backend.current_device_id().await {
            Ok(Some(id)) => {
                self.session.cache_device_id(&id);
                Some(id)
            }
            Ok(None) => None,
            Err(e) => {
                tracing::warn!(error = %e, "Failed to fetch device id");
                None
            }
        }
    }

    /// End the backend session
    ///
    /// Live spans are closed with ERROR status and session-scoped
    /// properties are dropped. The backend opens a fresh session.
    pub async fn end_session(&self) {
        if !self.session.is_initialized() {
            return;
        }

        let leaked = self.spans.end_all(false);
        if leaked > 0 {
            tracing::warn!(count = leaked, "Ending session with live spans");
        }

        self.events.breadcrumb("Session ended").await;
        self.properties.clear_session_scoped();

        if let Err(e) = self.backend.end_session().await {
            tracing::warn!(error = %e, "Failed to end session");
        }
        self.session.clear_session_id();
    }

    // ── Crash simulation ───────────────────────────────────────────────

    /// Current crash scheduler state
    pub fn crash_state(&self) -> CrashState {
        self.crash.state()
    }

    /// Report and inject a fault immediately
    pub async fn trigger_test_crash(&self, reason: &str) {
        self.crash.trigger_now(&self.events, reason).await;
    }
}

/// Builder for [`Instrumentation`]
pub struct InstrumentationBuilder {
    config: TelemetryConfig,
    backend: Option<Arc<dyn TelemetryBackend>>,
    timers: Option<Arc<dyn TimerBackend>>,
    random: Option<Arc<dyn RandomSource>>,
    faults: Option<Arc<dyn FaultInjector>>,
}

impl InstrumentationBuilder {
    fn new(config: TelemetryConfig) -> Self {
        Self {
            config,
            backend: None,
            timers: None,
            random: None,
            faults: None,
        }
    }

    /// Collector backend (default: `LogBackend`)
    pub fn backend<B: TelemetryBackend + 'static>(mut self, backend: B) -> Self {
        self.backend = Some(Arc::new(backend));
        self
    }

    /// Timer backend for the crash scheduler (default: `TokioTimerBackend`)
    pub fn timer_backend(mut self, timers: Arc<dyn TimerBackend>) -> Self {
        self.timers = Some(timers);
        self
    }

    /// Random source for the crash decision (default: `ThreadRandom`)
    pub fn random_source<R: RandomSource + 'static>(mut self, random: R) -> Self {
        self.random = Some(Arc::new(random));
        self
    }

    /// Fault injector (default: `AbortFaultInjector`)
    pub fn fault_injector<I: FaultInjector + 'static>(mut self, faults: I) -> Self {
        self.faults = Some(Arc::new(faults));
        self
    }

    /// Validate the configuration and assemble the context
    pub fn build(self) -> TelemetryResult<Instrumentation> {
        self.config.validate()?;

        let backend = self
            .backend
            .unwrap_or_else(|| Arc::new(LogBackend::new()));
        let timers = self
            .timers
            .unwrap_or_else(|| Arc::new(TokioTimerBackend::new()));
        let random = self.random.unwrap_or_else(|| Arc::new(ThreadRandom));
        let faults = self.faults.unwrap_or_else(|| Arc::new(AbortFaultInjector));

        let session = Arc::new(Session::new());
        let spans = Arc::new(SpanRegistry::new(session.clone()));

        Ok(Instrumentation {
            properties: SessionPropertyStore::new(backend.clone(), session.clone()),
            events: Arc::new(EventEmitter::new(backend.clone(), session.clone())),
            network: NetworkInstrumentation::new(
                backend.clone(),
                session.clone(),
                spans.clone(),
                &self.config.api_base_url,
            ),
            crash: CrashScheduler::new(
                self.config.crash.clone(),
                self.config.ci_mode,
                random,
                timers,
                faults,
            ),
            spans,
            session,
            backend,
            config: self.config,
            init_lock: tokio::sync::Mutex::new(()),
        })
    }
}

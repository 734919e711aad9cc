//! Span registry
//!
//! Two kinds of spans flow through here:
//!
//! - **Live spans** are opened with [`SpanRegistry::start_span`], tracked
//!   under an opaque [`SpanHandle`] and closed with
//!   [`SpanRegistry::end_span`]. Used for work whose duration is not known
//!   up front.
//! - **Completed spans** are emitted in one shot with
//!   [`SpanRegistry::record_completed_span`] and never enter the registry.
//!
//! Every operation fails soft: before initialization, without a tracer, or
//! with an unknown handle, calls return `None` or do nothing.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};

use crate::backend::{ActiveSpan, Attributes, CompletedSpan, SpanStatus, Tracer};
use crate::session::Session;

/// Opaque token for a live span
///
/// Built from the span name, the creation timestamp and a per-registry
/// sequence number, so two spans started in the same millisecond under the
/// same name still get distinct handles.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SpanHandle(String);

impl SpanHandle {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SpanHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

struct LiveSpan {
    name: String,
    started_at: DateTime<Utc>,
    span: Box<dyn ActiveSpan>,
}

/// Registry of in-flight spans
pub struct SpanRegistry {
    session: Arc<Session>,
    tracer: RwLock<Option<Arc<dyn Tracer>>>,
    live: Mutex<HashMap<SpanHandle, LiveSpan>>,
    sequence: AtomicU64,
}

impl SpanRegistry {
    pub(crate) fn new(session: Arc<Session>) -> Self {
        Self {
            session,
            tracer: RwLock::new(None),
            live: Mutex::new(HashMap::new()),
            sequence: AtomicU64::new(0),
        }
    }

    /// Install the tracer obtained at initialization
    pub(crate) fn attach_tracer(&self, tracer: Arc<dyn Tracer>) {
        *self.tracer.write() = Some(tracer);
    }

    fn active_tracer(&self) -> Option<Arc<dyn Tracer>> {
        if !self.session.is_initialized() {
            return None;
        }
        self.tracer.read().clone()
    }

    fn next_handle(&self, prefix: &str, now: DateTime<Utc>) -> SpanHandle {
        let seq = self.sequence.fetch_add(1, Ordering::SeqCst);
        SpanHandle(format!("{}_{}_{}", prefix, now.timestamp_millis(), seq))
    }

    fn register(&self, handle: SpanHandle, name: &str, now: DateTime<Utc>, span: Box<dyn ActiveSpan>) {
        self.live.lock().insert(
            handle,
            LiveSpan {
                name: name.to_string(),
                started_at: now,
                span,
            },
        );
    }

    /// Open a live span with optional initial attributes
    pub fn start_span(&self, name: &str, attributes: Option<&Attributes>) -> Option<SpanHandle> {
        let tracer = self.active_tracer()?;
        let now = Utc::now();
        let empty = Attributes::new();

        let span = match tracer.start_span(name, attributes.unwrap_or(&empty), now) {
            Ok(span) => span,
            Err(e) => {
                tracing::warn!(span = %name, error = %e, "Failed to start span");
                return None;
            }
        };

        let handle = self.next_handle(name, now);
        self.register(handle.clone(), name, now, span);
        tracing::debug!(%handle, "span started");
        Some(handle)
    }

    /// Open a screen-view span, handle prefixed `screen_<screen_name>`
    pub fn start_screen_view_span(&self, screen_name: &str) -> Option<SpanHandle> {
        let tracer = self.active_tracer()?;
        let now = Utc::now();

        let span = match tracer.start_view_span(screen_name, now) {
            Ok(span) => span,
            Err(e) => {
                tracing::warn!(screen = %screen_name, error = %e, "Failed to start view span");
                return None;
            }
        };

        let handle = self.next_handle(&format!("screen_{}", screen_name), now);
        self.register(handle.clone(), screen_name, now, span);
        Some(handle)
    }

    /// Set an attribute on a live span; unknown handles are ignored
    pub fn add_attribute(&self, handle: &SpanHandle, key: &str, value: &str) {
        if let Some(live) = self.live.lock().get_mut(handle) {
            live.span.set_attribute(key, value);
        }
    }

    /// Close a live span with OK or ERROR status and forget its handle
    ///
    /// Ending an unknown or already-ended handle is a no-op.
    pub fn end_span(&self, handle: &SpanHandle, success: bool) {
        let Some(mut live) = self.live.lock().remove(handle) else {
            return;
        };

        live.span.set_status(SpanStatus::from_success(success));
        let now = Utc::now();
        tracing::debug!(
            %handle,
            span = %live.name,
            duration_ms = (now - live.started_at).num_milliseconds(),
            success,
            "span ended"
        );
        live.span.end(now);
    }

    /// Emit a span whose timing is already known
    pub fn record_completed_span(
        &self,
        name: &str,
        start_time: DateTime<Utc>,
        end_time: DateTime<Utc>,
        attributes: Option<Attributes>,
        success: bool,
    ) {
        let Some(tracer) = self.active_tracer() else {
            return;
        };

        let span = CompletedSpan {
            name: name.to_string(),
            start_time,
            end_time,
            attributes: attributes.unwrap_or_default(),
            status: SpanStatus::from_success(success),
        };

        if let Err(e) = tracer.record_completed_span(span) {
            tracing::warn!(span = %name, error = %e, "Failed to record completed span");
        }
    }

    /// End every live span, returning how many were closed
    pub(crate) fn end_all(&self, success: bool) -> usize {
        let drained: Vec<(SpanHandle, LiveSpan)> = self.live.lock().drain().collect();
        let count = drained.len();
        let now = Utc::now();

        for (_, mut live) in drained {
            live.span.set_status(SpanStatus::from_success(success));
            live.span.end(now);
        }

        count
    }

    /// Number of live spans
    pub fn len(&self) -> usize {
        self.live.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.live.lock().is_empty()
    }
}

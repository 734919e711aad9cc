//! # Scheduled tasks
//!
//! One-shot, cancellable delayed tasks behind a [`TimerBackend`] trait so
//! the crash scheduler can run against real tokio timers in production and
//! against a virtual clock in tests.
//!
//! ```text
//! ┌─────────────────────────────────────────────┐
//! │              TimerBackend (trait)           │
//! ├──────────────────────┬──────────────────────┤
//! │ TokioTimerBackend    │ MockTimerBackend     │
//! │ (tokio::time)        │ (virtual clock)      │
//! └──────────────────────┴──────────────────────┘
//! ```
//!
//! ## Example
//!
//! ```rust,ignore
//! use storefront_telemetry::timing::{MockTimerBackend, TimerBackend};
//!
//! let timers = MockTimerBackend::new();
//! timers.schedule_once("flush", Duration::from_secs(5), Box::pin(async {}))?;
//!
//! // Nothing runs until virtual time passes the deadline
//! for task in timers.advance(Duration::from_secs(5)) {
//!     task.await;
//! }
//! ```

pub mod backends;

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use crate::error::TelemetryResult;

pub use backends::{MockTimerBackend, RecordedTimer, TokioTimerBackend};

/// Work run when a timer fires
pub type TimerTask = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;

/// Abstract timer backend
pub trait TimerBackend: Send + Sync {
    /// Schedule a one-shot task. Reusing an id replaces the earlier timer.
    fn schedule_once(&self, id: &str, delay: Duration, task: TimerTask) -> TelemetryResult<()>;

    /// Cancel a pending timer. Returns whether one was pending.
    fn cancel(&self, id: &str) -> TelemetryResult<bool>;

    /// Whether a timer is still pending
    fn exists(&self, id: &str) -> bool;

    /// Time left before a pending timer fires
    fn time_remaining(&self, id: &str) -> Option<Duration>;

    /// Backend name (for logging)
    fn name(&self) -> &'static str;
}

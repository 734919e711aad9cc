//! Error types for the telemetry layer
//!
//! These errors only ever travel between the instrumentation layer and the
//! collector backend. The public [`Instrumentation`](crate::Instrumentation)
//! surface catches them, reports them on the local `tracing` channel and
//! carries on.

use thiserror::Error;

/// Result type for collector and timer operations
pub type TelemetryResult<T> = Result<T, TelemetryError>;

/// Errors that can occur while talking to the collector
#[derive(Error, Debug)]
pub enum TelemetryError {
    /// An operation that needs a started session ran before `initialize`
    #[error("Telemetry session not initialized. Call initialize first.")]
    NotInitialized,

    /// The backend SDK refused to start
    #[error("Backend failed to start for app id '{app_id}'")]
    BackendStart { app_id: String },

    /// The backend has no tracer provider
    #[error("Tracer provider unavailable")]
    TracerUnavailable,

    /// Sending telemetry failed
    #[error("Transport error: {0}")]
    Transport(String),

    /// Scheduling or cancelling a timer failed
    #[error("Timer error: {0}")]
    Timer(String),

    /// Configuration is inconsistent
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

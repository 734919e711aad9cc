//! Breadcrumbs and structured logs

use std::collections::BTreeMap;
use std::error::Error as StdError;
use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::backend::TelemetryBackend;
use crate::session::Session;

/// Property bag attached to a log entry
pub type LogProperties = BTreeMap<String, String>;

/// Log severity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Warning,
    Error,
}

impl Severity {
    /// Warnings and errors use expedited delivery unless told otherwise
    pub fn escalated_by_default(&self) -> bool {
        !matches!(self, Severity::Info)
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Info => write!(f, "info"),
            Severity::Warning => write!(f, "warning"),
            Severity::Error => write!(f, "error"),
        }
    }
}

/// A structured log sent to the collector
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    pub severity: Severity,
    pub message: String,
    pub properties: LogProperties,
    /// Flagged for expedited delivery
    pub escalated: bool,
    pub timestamp: DateTime<Utc>,
}

impl LogEntry {
    pub fn new(severity: Severity, message: &str, properties: LogProperties) -> Self {
        Self {
            severity,
            message: message.to_string(),
            properties,
            escalated: severity.escalated_by_default(),
            timestamp: Utc::now(),
        }
    }
}

/// Sends breadcrumbs and logs, swallowing transport failures
pub struct EventEmitter {
    backend: Arc<dyn TelemetryBackend>,
    session: Arc<Session>,
}

impl EventEmitter {
    pub(crate) fn new(backend: Arc<dyn TelemetryBackend>, session: Arc<Session>) -> Self {
        Self { backend, session }
    }

    /// Append a property-less event marker
    pub async fn breadcrumb(&self, message: &str) {
        if !self.session.is_initialized() {
            return;
        }

        if let Err(e) = self.backend.add_breadcrumb(message).await {
            tracing::warn!(breadcrumb = %message, error = %e, "Failed to add breadcrumb");
        }
    }

    /// Send a log with the severity's default escalation
    pub async fn log(&self, severity: Severity, message: &str, properties: Option<LogProperties>) {
        self.log_with(severity, message, properties, None).await;
    }

    /// Send a log, optionally overriding escalation
    pub async fn log_with(
        &self,
        severity: Severity,
        message: &str,
        properties: Option<LogProperties>,
        escalated: Option<bool>,
    ) {
        if !self.session.is_initialized() {
            return;
        }

        let mut entry = LogEntry::new(severity, message, properties.unwrap_or_default());
        if let Some(escalated) = escalated {
            entry.escalated = escalated;
        }

        if let Err(e) = self.backend.log_message(entry).await {
            tracing::warn!(%severity, error = %e, "Failed to send log");
        }
    }

    /// Report a handled error as an ERROR log
    ///
    /// Adds `error.type` and, when the error has a cause chain,
    /// `error.source` to the properties.
    pub async fn log_handled_error<E>(&self, error: &E, properties: Option<LogProperties>)
    where
        E: StdError,
    {
        let mut properties = properties.unwrap_or_default();
        properties.insert("error.type".to_string(), short_type_name::<E>().to_string());

        let chain = source_chain(error);
        if !chain.is_empty() {
            properties.insert("error.source".to_string(), chain.join(": "));
        }

        self.log(Severity::Error, &error.to_string(), Some(properties)).await;
    }
}

fn short_type_name<T: ?Sized>() -> &'static str {
    let full = std::any::type_name::<T>();
    let base = full.split('<').next().unwrap_or(full);
    base.rsplit("::").next().unwrap_or(base)
}

fn source_chain(error: &dyn StdError) -> Vec<String> {
    let mut chain = Vec::new();
    let mut current = error.source();
    while let Some(cause) = current {
        chain.push(cause.to_string());
        current = cause.source();
    }
    chain
}

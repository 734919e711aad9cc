//! Network instrumentation
//!
//! [`NetworkInstrumentation::track_api_call`] brackets an outbound call:
//!
//! 1. start span `api_<endpoint>` tagged with URL, method and request id
//! 2. await the operation
//! 3. emit a request record (success) or error record (failure), tag the
//!    span, end it with the matching status
//! 4. hand the operation's own result back unchanged
//!
//! Telemetry failures never reach the caller; business failures always do.

use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::backend::{Attributes, TelemetryBackend};
use crate::session::Session;
use crate::spans::SpanRegistry;

/// Status code reported for successful calls. The mock transport never
/// produces anything else.
pub const SUCCESS_STATUS: u16 = 200;

/// Error type reported for failed calls
pub const API_ERROR_TYPE: &str = "api_error";

/// HTTP method of a tracked request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    Get,
    Post,
    Put,
    Patch,
    Delete,
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let method = match self {
            HttpMethod::Get => "GET",
            HttpMethod::Post => "POST",
            HttpMethod::Put => "PUT",
            HttpMethod::Patch => "PATCH",
            HttpMethod::Delete => "DELETE",
        };
        f.write_str(method)
    }
}

/// Descriptor of an outbound call
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiRequest {
    /// Path relative to the API base URL, e.g. `/products`
    pub endpoint: String,
    pub method: HttpMethod,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub body: Option<serde_json::Value>,
}

impl ApiRequest {
    pub fn new(endpoint: &str, method: HttpMethod) -> Self {
        Self {
            endpoint: endpoint.to_string(),
            method,
            body: None,
        }
    }

    pub fn get(endpoint: &str) -> Self {
        Self::new(endpoint, HttpMethod::Get)
    }

    pub fn post(endpoint: &str, body: serde_json::Value) -> Self {
        Self::new(endpoint, HttpMethod::Post).with_body(body)
    }

    pub fn with_body(mut self, body: serde_json::Value) -> Self {
        self.body = Some(body);
        self
    }
}

/// A completed request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NetworkRequestRecord {
    pub url: String,
    pub method: HttpMethod,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub status_code: u16,
    pub bytes_sent: u64,
    pub bytes_received: u64,
}

impl NetworkRequestRecord {
    pub fn duration_ms(&self) -> i64 {
        (self.end_time - self.start_time).num_milliseconds()
    }
}

/// A failed request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NetworkErrorRecord {
    pub url: String,
    pub method: HttpMethod,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub error_type: String,
    pub error_message: String,
}

impl NetworkErrorRecord {
    pub fn duration_ms(&self) -> i64 {
        (self.end_time - self.start_time).num_milliseconds()
    }
}

/// Wraps outbound calls with spans and network records
pub struct NetworkInstrumentation {
    backend: Arc<dyn TelemetryBackend>,
    session: Arc<Session>,
    spans: Arc<SpanRegistry>,
    base_url: String,
    request_counter: AtomicU64,
}

impl NetworkInstrumentation {
    pub(crate) fn new(
        backend: Arc<dyn TelemetryBackend>,
        session: Arc<Session>,
        spans: Arc<SpanRegistry>,
        base_url: &str,
    ) -> Self {
        Self {
            backend,
            session,
            spans,
            base_url: base_url.trim_end_matches('/').to_string(),
            request_counter: AtomicU64::new(0),
        }
    }

    /// Next process-unique request id
    pub fn next_request_id(&self) -> String {
        let n = self.request_counter.fetch_add(1, Ordering::SeqCst) + 1;
        format!("req_{}_{}", n, Utc::now().timestamp_millis())
    }

    fn url_for(&self, endpoint: &str) -> String {
        format!("{}{}", self.base_url, endpoint)
    }

    /// Send a request record; failures are logged locally
    pub async fn record_network_request(&self, record: NetworkRequestRecord) {
        if !self.session.is_initialized() {
            return;
        }
        if let Err(e) = self.backend.record_network_request(record).await {
            tracing::warn!(error = %e, "Failed to record network request");
        }
    }

    /// Send an error record; failures are logged locally
    pub async fn record_network_error(&self, record: NetworkErrorRecord) {
        if !self.session.is_initialized() {
            return;
        }
        if let Err(e) = self.backend.record_network_error(record).await {
            tracing::warn!(error = %e, "Failed to record network error");
        }
    }

    /// Run `operation` inside an `api_<endpoint>` span
    ///
    /// Returns exactly what `operation` returned.
    pub async fn track_api_call<T, E, F>(&self, request: ApiRequest, operation: F) -> Result<T, E>
    where
        T: Serialize,
        E: fmt::Display,
        F: Future<Output = Result<T, E>>,
    {
        let url = self.url_for(&request.endpoint);
        let request_id = self.next_request_id();

        let mut attributes = Attributes::new();
        attributes.insert("http.url".to_string(), url.clone());
        attributes.insert("http.method".to_string(), request.method.to_string());
        attributes.insert("request.id".to_string(), request_id);

        let handle = self
            .spans
            .start_span(&format!("api_{}", request.endpoint), Some(&attributes));
        let start_time = Utc::now();
        let started = tokio::time::Instant::now();

        let outcome = operation.await;

        let elapsed = started.elapsed();
        let end_time = start_time
            + chrono::Duration::from_std(elapsed).unwrap_or_else(|_| chrono::Duration::zero());
        let duration_ms = elapsed.as_millis();

        match outcome {
            Ok(value) => {
                let bytes_sent = request.body.as_ref().map(serialized_len).unwrap_or(0);
                self.record_network_request(NetworkRequestRecord {
                    url,
                    method: request.method,
                    start_time,
                    end_time,
                    status_code: SUCCESS_STATUS,
                    bytes_sent,
                    bytes_received: serialized_len(&value),
                })
                .await;

                if let Some(handle) = &handle {
                    self.spans.add_attribute(handle, "http.status_code", &SUCCESS_STATUS.to_string());
                    self.spans.add_attribute(handle, "duration_ms", &duration_ms.to_string());
                    self.spans.end_span(handle, true);
                }

                Ok(value)
            }
            Err(error) => {
                let message = error.to_string();
                self.record_network_error(NetworkErrorRecord {
                    url,
                    method: request.method,
                    start_time,
                    end_time,
                    error_type: API_ERROR_TYPE.to_string(),
                    error_message: message.clone(),
                })
                .await;

                if let Some(handle) = &handle {
                    self.spans.add_attribute(handle, "error.message", &message);
                    self.spans.end_span(handle, false);
                }

                Err(error)
            }
        }
    }
}

/// Serialized JSON length, the byte-count proxy for payloads
fn serialized_len<T: Serialize + ?Sized>(value: &T) -> u64 {
    serde_json::to_vec(value).map(|bytes| bytes.len() as u64).unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{MemoryBackend, SpanStatus};

    fn network(backend: &MemoryBackend) -> NetworkInstrumentation {
        let session = Arc::new(Session::initialized());
        let spans = Arc::new(SpanRegistry::new(session.clone()));
        spans.attach_tracer(Arc::new(backend.clone()));
        NetworkInstrumentation::new(Arc::new(backend.clone()), session, spans, "https://api.test/")
    }

    #[test]
    fn test_request_ids_increase() {
        let backend = MemoryBackend::new();
        let network = network(&backend);

        let first = network.next_request_id();
        let second = network.next_request_id();

        assert!(first.starts_with("req_1_"));
        assert!(second.starts_with("req_2_"));
    }

    #[test]
    fn test_method_display() {
        assert_eq!(HttpMethod::Get.to_string(), "GET");
        assert_eq!(HttpMethod::Delete.to_string(), "DELETE");
        assert_eq!(serde_json::to_string(&HttpMethod::Patch).unwrap(), "\"PATCH\"");
    }

    #[test]
    fn test_serialized_len() {
        assert_eq!(serialized_len(&serde_json::json!({"a": 1})), 7);
        assert_eq!(serialized_len("hi"), 4);
    }

    #[tokio::test]
    async fn test_success_path() {
        let backend = MemoryBackend::new();
        let network = network(&backend);

        let body = serde_json::json!({"product_id": "p-1", "quantity": 2});
        let expected_sent = serialized_len(&body);
        let result: Result<Vec<u32>, String> = network
            .track_api_call(ApiRequest::post("/cart", body), async { Ok(vec![1, 2, 3]) })
            .await;

        assert_eq!(result.unwrap(), vec![1, 2, 3]);

        let requests = backend.network_requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].url, "https://api.test/cart");
        assert_eq!(requests[0].method, HttpMethod::Post);
        assert_eq!(requests[0].status_code, 200);
        assert_eq!(requests[0].bytes_sent, expected_sent);
        assert_eq!(requests[0].bytes_received, 7);
        assert!(backend.network_errors().is_empty());

        let span = backend.span_named("api_/cart").unwrap();
        assert_eq!(span.status, SpanStatus::Ok);
        assert_eq!(span.attributes.get("http.method").map(String::as_str), Some("POST"));
        assert!(span.attributes.contains_key("request.id"));
    }

    #[tokio::test]
    async fn test_failure_path_reraises() {
        let backend = MemoryBackend::new();
        let network = network(&backend);

        let result: Result<(), String> = network
            .track_api_call(ApiRequest::get("/orders"), async {
                Err("Payment declined".to_string())
            })
            .await;

        assert_eq!(result.unwrap_err(), "Payment declined");

        let errors = backend.network_errors();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].error_type, "api_error");
        assert_eq!(errors[0].error_message, "Payment declined");
        assert!(backend.network_requests().is_empty());

        let span = backend.span_named("api_/orders").unwrap();
        assert_eq!(span.status, SpanStatus::Error);
    }

    #[tokio::test]
    async fn test_transport_failure_does_not_affect_result() {
        let backend = MemoryBackend::new();
        let network = network(&backend);
        backend.set_fail_transport(true);

        let result: Result<u8, String> = network
            .track_api_call(ApiRequest::get("/products"), async { Ok(7) })
            .await;

        assert_eq!(result.unwrap(), 7);
        assert!(backend.network_requests().is_empty());
    }

    #[tokio::test]
    async fn test_uninitialized_still_runs_operation() {
        let backend = MemoryBackend::new();
        let session = Arc::new(Session::new());
        let spans = Arc::new(SpanRegistry::new(session.clone()));
        let network =
            NetworkInstrumentation::new(Arc::new(backend.clone()), session, spans, "https://api.test");

        let result: Result<&str, String> = network
            .track_api_call(ApiRequest::get("/products"), async { Ok("ok") })
            .await;

        assert_eq!(result.unwrap(), "ok");
        assert!(backend.network_requests().is_empty());
        assert!(backend.spans().is_empty());
    }
}

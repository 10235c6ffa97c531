use bytes::Bytes;
use hyper::header;
use hyper::{HeaderMap, Method, StatusCode};
use uuid::Uuid;

/// One inbound request flowing through the dispatch pipeline.
///
/// Built either from a proxied HTTP request or from the JSON body of
/// `POST /gateway/dispatch`; destroyed when the response is flushed.
#[derive(Debug, Clone)]
pub struct DispatchRequest {
    /// Unique id assigned on arrival, echoed in error payloads
    pub request_id: String,

    pub method: Method,

    /// Request path without the query string
    pub path: String,

    /// Case-insensitive, multi-valued header map
    pub headers: HeaderMap,

    /// Fully buffered request body
    pub body: Bytes,

    /// Query parameters in arrival order
    pub parameters: Vec<(String, String)>,
}

impl DispatchRequest {
    pub fn new(method: Method, path: String) -> Self {
        Self {
            request_id: Uuid::new_v4().to_string(),
            method,
            path,
            headers: HeaderMap::new(),
            body: Bytes::new(),
            parameters: Vec::new(),
        }
    }

    /// The inbound Host header, if present and valid UTF-8
    pub fn host(&self) -> Option<&str> {
        self.headers
            .get(header::HOST)
            .and_then(|v| v.to_str().ok())
    }
}

/// Outcome of one dispatch, produced by the dispatcher.
///
/// `success` means the upstream was reached and its response relayed; the
/// relayed status may still be an error status. A failed dispatch carries a
/// human-readable message in `body`.
#[derive(Debug, Clone)]
pub struct DispatchResult {
    pub success: bool,

    /// Upstream response body, or the failure message
    pub body: Bytes,

    /// Endpoint the request was sent to, if one was selected
    pub target_endpoint: Option<String>,

    /// Wall-clock processing duration in milliseconds
    pub duration_ms: u64,

    /// Upstream status, or 500 for synthesized failures
    pub status: StatusCode,

    /// Upstream response headers; empty for synthesized failures
    pub headers: HeaderMap,
}

impl DispatchResult {
    pub fn upstream(
        body: Bytes,
        target_endpoint: String,
        duration_ms: u64,
        status: StatusCode,
        headers: HeaderMap,
    ) -> Self {
        Self {
            success: true,
            body,
            target_endpoint: Some(target_endpoint),
            duration_ms,
            status,
            headers,
        }
    }

    pub fn failure(message: impl Into<String>, duration_ms: u64) -> Self {
        Self {
            success: false,
            body: Bytes::from(message.into()),
            target_endpoint: None,
            duration_ms,
            status: StatusCode::INTERNAL_SERVER_ERROR,
            headers: HeaderMap::new(),
        }
    }

    /// The body as text, for JSON `message` fields
    pub fn message(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

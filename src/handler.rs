//! Per-request handler state.
//!
//! A [`Handler`] is created for every dispatched request and lives exactly as long
//! as that dispatch. Its identity (`id`, `route`, `request`) is fixed at creation;
//! the response side (`status`, `body_written`, `sent_bytes`) sits behind a lock
//! so the process-execution collaborator and the control plane, which both reach
//! the handler through the registry, can update it from other threads.

use crate::ids::HandlerId;
use http::header::{HeaderMap, HeaderName, HeaderValue, REFERER, USER_AGENT};
use http::{Method, Version};
use parking_lot::Mutex;
use serde::Deserialize;
use std::io;
use std::sync::Arc;

/// Route configuration selected by the router.
///
/// Only `debug` is interpreted by the dispatch bridge; the remaining fields are
/// carried for the process-execution collaborator.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct Route {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub method: String,
    #[serde(default)]
    pub pattern: String,
    #[serde(default)]
    pub entrypoint: Option<String>,
    #[serde(default)]
    pub command: String,
    /// Capture the process's stdout/stderr and relay it to the log.
    #[serde(default)]
    pub debug: bool,
}

/// The parts of the inbound request this core reads.
#[derive(Debug, Clone)]
pub struct RequestInfo {
    pub remote_addr: Option<String>,
    pub method: Method,
    /// Request target exactly as received (path plus query).
    pub uri: String,
    pub version: Version,
    pub headers: HeaderMap,
    pub body: Vec<u8>,
}

impl RequestInfo {
    #[must_use]
    pub fn new(method: Method, uri: impl Into<String>) -> Self {
        Self {
            remote_addr: None,
            method,
            uri: uri.into(),
            version: Version::HTTP_11,
            headers: HeaderMap::new(),
            body: Vec::new(),
        }
    }

    /// Capture an `http::Request`, body included.
    #[must_use]
    pub fn from_http<B: AsRef<[u8]>>(req: &http::Request<B>) -> Self {
        Self {
            remote_addr: None,
            method: req.method().clone(),
            uri: req.uri().to_string(),
            version: req.version(),
            headers: req.headers().clone(),
            body: req.body().as_ref().to_vec(),
        }
    }

    #[must_use]
    pub fn with_remote_addr(mut self, addr: impl Into<String>) -> Self {
        self.remote_addr = Some(addr.into());
        self
    }

    #[must_use]
    pub fn with_version(mut self, version: Version) -> Self {
        self.version = version;
        self
    }

    #[must_use]
    pub fn with_body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = body.into();
        self
    }

    /// Add a header; names or values that are not valid HTTP are skipped.
    #[must_use]
    pub fn with_header(self, name: &str, value: &str) -> Self {
        self.with_raw_header(name, value.as_bytes())
    }

    #[must_use]
    pub fn with_raw_header(mut self, name: &str, value: &[u8]) -> Self {
        if let (Ok(name), Ok(value)) = (
            HeaderName::from_bytes(name.as_bytes()),
            HeaderValue::from_bytes(value),
        ) {
            self.headers.append(name, value);
        }
        self
    }

    /// Header value as text, or `""` when absent or not valid UTF-8.
    #[must_use]
    pub fn header(&self, name: impl http::header::AsHeaderName) -> &str {
        self.headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
    }

    #[must_use]
    pub fn referer(&self) -> &str {
        self.header(REFERER)
    }

    #[must_use]
    pub fn user_agent(&self) -> &str {
        self.header(USER_AGENT)
    }

    /// Protocol string as it appears on the request line.
    #[must_use]
    pub fn proto(&self) -> &'static str {
        match self.version {
            Version::HTTP_09 => "HTTP/0.9",
            Version::HTTP_10 => "HTTP/1.0",
            Version::HTTP_2 => "HTTP/2.0",
            Version::HTTP_3 => "HTTP/3.0",
            _ => "HTTP/1.1",
        }
    }
}

/// Outbound response channel of a single request.
pub trait ResponseSink: Send {
    /// Transmit the status line and headers. Called at most once per request.
    fn send_header(&mut self, status: u16);

    /// Append body bytes, returning how many were accepted.
    fn write_body(&mut self, chunk: &[u8]) -> io::Result<usize>;
}

struct ResponseState {
    status: u16,
    body_written: bool,
    sent_bytes: u64,
    sink: Box<dyn ResponseSink>,
}

impl ResponseState {
    fn send_header_once(&mut self) -> bool {
        if self.body_written {
            return false;
        }
        if self.status != 0 {
            self.sink.send_header(self.status);
        }
        self.body_written = true;
        true
    }
}

/// Per-request context visible through the registry while its dispatch runs.
pub struct Handler {
    id: HandlerId,
    route: Arc<Route>,
    request: Option<RequestInfo>,
    response: Mutex<ResponseState>,
}

impl Handler {
    pub const DEFAULT_STATUS: u16 = 200;

    #[must_use]
    pub fn new(
        id: HandlerId,
        route: Arc<Route>,
        request: Option<RequestInfo>,
        sink: Box<dyn ResponseSink>,
    ) -> Self {
        Self {
            id,
            route,
            request,
            response: Mutex::new(ResponseState {
                status: Self::DEFAULT_STATUS,
                body_written: false,
                sent_bytes: 0,
                sink,
            }),
        }
    }

    #[must_use]
    pub fn id(&self) -> HandlerId {
        self.id
    }

    #[must_use]
    pub fn route(&self) -> &Route {
        &self.route
    }

    #[must_use]
    pub fn request(&self) -> Option<&RequestInfo> {
        self.request.as_ref()
    }

    #[must_use]
    pub fn status(&self) -> u16 {
        self.response.lock().status
    }

    /// Set the status to send. Has no effect on the wire once headers are out,
    /// but is still what the access log reports.
    pub fn set_status(&self, status: u16) {
        self.response.lock().status = status;
    }

    #[must_use]
    pub fn body_written(&self) -> bool {
        self.response.lock().body_written
    }

    #[must_use]
    pub fn sent_bytes(&self) -> u64 {
        self.response.lock().sent_bytes
    }

    /// Send the response header with the current status unless it has already
    /// been sent. Returns `true` if this call sent it.
    pub fn send_header(&self) -> bool {
        self.response.lock().send_header_once()
    }

    /// Write body bytes, sending the header first if nobody has yet.
    pub fn write_body(&self, chunk: &[u8]) -> io::Result<usize> {
        let mut state = self.response.lock();
        state.send_header_once();
        let written = state.sink.write_body(chunk)?;
        state.sent_bytes += written as u64;
        Ok(written)
    }
}

impl std::fmt::Debug for Handler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.response.lock();
        f.debug_struct("Handler")
            .field("id", &self.id)
            .field("route", &self.route.id)
            .field("status", &state.status)
            .field("body_written", &state.body_written)
            .field("sent_bytes", &state.sent_bytes)
            .finish()
    }
}

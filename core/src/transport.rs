//! HTTP transport abstraction.
//!
//! The request dispatcher never talks to an HTTP library directly; it drives an
//! [`HttpTransport`] injected at composition time. Production code uses the
//! reqwest-backed transport in `cloudsync-runtime`; tests use the scripted
//! `MockTransport` from `cloudsync-testing`.

use crate::api::{ClassifiedError, Method};
use serde_json::Value;
use std::future::Future;
use std::pin::Pin;
use thiserror::Error;

/// Name of the cookie carrying the CSRF token
pub const CSRF_COOKIE: &str = "csrftoken";

/// Header used to echo the CSRF token back on mutating verbs
pub const CSRF_HEADER: &str = "X-CSRFToken";

/// A fully-resolved HTTP call
#[derive(Debug, Clone, PartialEq)]
pub struct HttpRequest {
    /// HTTP verb
    pub method: Method,
    /// Path relative to the API origin
    pub url: String,
    /// Extra headers (e.g. the CSRF token)
    pub headers: Vec<(String, String)>,
    /// JSON body
    pub body: Option<Value>,
}

impl HttpRequest {
    /// Look up a header by case-insensitive name
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }
}

/// A response as seen by the dispatcher
#[derive(Debug, Clone, PartialEq)]
pub struct HttpResponse {
    /// HTTP status code
    pub status: u16,
    /// Decoded body. Non-JSON text bodies arrive as `Value::String`;
    /// empty bodies are `None`.
    pub body: Option<Value>,
}

impl HttpResponse {
    /// Create a response
    #[must_use]
    pub const fn new(status: u16, body: Option<Value>) -> Self {
        Self { status, body }
    }

    /// 2xx
    #[must_use]
    pub const fn is_success(&self) -> bool {
        self.status >= 200 && self.status < 300
    }
}

/// Errors raised below the HTTP layer (no response was received)
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// The client has no connectivity to the API origin
    #[error("Client is offline: {0}")]
    Offline(String),

    /// The request failed without producing a response (timeout, reset, ...)
    #[error("No response from server: {0}")]
    NoResponse(String),
}

impl From<&TransportError> for ClassifiedError {
    fn from(error: &TransportError) -> Self {
        match error {
            TransportError::Offline(_) => Self::offline(),
            TransportError::NoResponse(_) => Self::no_response(),
        }
    }
}

/// Type alias for the future returned by [`HttpTransport::execute`]
pub type TransportFuture<'a> =
    Pin<Box<dyn Future<Output = Result<HttpResponse, TransportError>> + Send + 'a>>;

/// Performs HTTP calls against the API origin with session credentials
///
/// Implementations send and accept JSON and include the session cookies on
/// every call.
pub trait HttpTransport: Send + Sync {
    /// Execute a request
    ///
    /// Returns `Ok` for every response that arrived, whatever its status.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError`] only when no response was received.
    fn execute(&self, request: HttpRequest) -> TransportFuture<'_>;

    /// Current CSRF token, read from the `csrftoken` cookie
    fn csrf_token(&self) -> Option<String>;
}

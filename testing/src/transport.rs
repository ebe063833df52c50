//! Scripted HTTP transport.
//!
//! Replies are registered per `(method, url)` route and consumed in order;
//! the last reply of a route repeats forever. Unrouted requests get a 404.

use cloudsync_core::api::Method;
use cloudsync_core::transport::{
    HttpRequest, HttpResponse, HttpTransport, TransportError, TransportFuture,
};
use serde_json::{Value, json};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

/// A scripted reply
#[derive(Debug, Clone)]
pub enum Reply {
    /// A response with the given status and body
    Response(HttpResponse),
    /// No response at all
    Error(TransportError),
}

/// In-memory [`HttpTransport`] for tests
///
/// # Example
///
/// ```
/// use cloudsync_core::Method;
/// use cloudsync_testing::MockTransport;
/// use serde_json::json;
///
/// let transport = MockTransport::new()
///     .with_csrf_token("token")
///     .respond(Method::Get, "/api/tenancies/", 200, Some(json!([])));
/// assert!(transport.requests().is_empty());
/// ```
#[derive(Debug, Default)]
pub struct MockTransport {
    routes: Mutex<HashMap<(Method, String), VecDeque<Reply>>>,
    requests: Mutex<Vec<HttpRequest>>,
    csrf_token: Mutex<Option<String>>,
    latency: Duration,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl MockTransport {
    /// Create an empty transport
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Delay every reply by `latency` (respects paused tokio time)
    #[must_use]
    pub const fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Set the CSRF cookie value
    #[must_use]
    pub fn with_csrf_token(self, token: impl Into<String>) -> Self {
        self.set_csrf_token(Some(token.into()));
        self
    }

    /// Queue a response for a route
    #[must_use]
    pub fn respond(self, method: Method, url: impl Into<String>, status: u16, body: Option<Value>) -> Self {
        self.push(method, url, Reply::Response(HttpResponse::new(status, body)));
        self
    }

    /// Queue a transport error for a route
    #[must_use]
    pub fn fail_with(self, method: Method, url: impl Into<String>, error: TransportError) -> Self {
        self.push(method, url, Reply::Error(error));
        self
    }

    /// Queue a reply on an already shared transport
    pub fn push(&self, method: Method, url: impl Into<String>, reply: Reply) {
        lock(&self.routes)
            .entry((method, url.into()))
            .or_default()
            .push_back(reply);
    }

    /// Replace the CSRF cookie value
    pub fn set_csrf_token(&self, token: Option<String>) {
        *lock(&self.csrf_token) = token;
    }

    /// Every request received so far, in arrival order
    #[must_use]
    pub fn requests(&self) -> Vec<HttpRequest> {
        lock(&self.requests).clone()
    }

    /// Number of requests received for a route
    #[must_use]
    pub fn count(&self, method: Method, url: &str) -> usize {
        lock(&self.requests)
            .iter()
            .filter(|r| r.method == method && r.url == url)
            .count()
    }

    /// Highest number of requests that were being answered at once
    #[must_use]
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    fn next_reply(&self, request: &HttpRequest) -> Reply {
        let mut routes = lock(&self.routes);
        match routes.get_mut(&(request.method, request.url.clone())) {
            Some(queue) if queue.len() > 1 => queue
                .pop_front()
                .unwrap_or_else(|| Reply::Response(HttpResponse::new(404, None))),
            Some(queue) => queue
                .front()
                .cloned()
                .unwrap_or_else(|| Reply::Response(HttpResponse::new(404, None))),
            None => Reply::Response(HttpResponse::new(404, Some(json!({"detail": "Not found."})))),
        }
    }
}

impl HttpTransport for MockTransport {
    fn execute(&self, request: HttpRequest) -> TransportFuture<'_> {
        Box::pin(async move {
            lock(&self.requests).push(request.clone());
            let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(current, Ordering::SeqCst);

            if !self.latency.is_zero() {
                tokio::time::sleep(self.latency).await;
            }
            let reply = self.next_reply(&request);
            self.in_flight.fetch_sub(1, Ordering::SeqCst);

            match reply {
                Reply::Response(response) => Ok(response),
                Reply::Error(error) => Err(error),
            }
        })
    }

    fn csrf_token(&self) -> Option<String> {
        lock(&self.csrf_token).clone()
    }
}

//! Request dispatcher.
//!
//! Performs the HTTP call described by each [`ApiRequest`] and replies with
//! exactly one continuation action. At most `max_concurrent` requests are in
//! flight at any time; the rest wait in a FIFO queue.
//!
//! Every failed request is also published on a broadcast channel as an
//! [`ApiFailure`], carrying the original envelope so that observers (retrier,
//! session sentinel, notifications) can react to it.
//!
//! ## Usage
//!
//! ```ignore
//! let dispatcher = Dispatcher::spawn(transport, DispatcherConfig::default());
//! let reply = dispatcher.submit(ApiRequest::new(Method::Get, "/api/tenancies/", Loaded, Failed));
//! let action = reply.await?;
//! ```

use cloudsync_core::api::{ApiFailure, ApiRequest, ClassifiedError};
use cloudsync_core::transport::{CSRF_HEADER, HttpRequest, HttpTransport};
use serde_json::Value;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Instant;
use tokio::sync::{Semaphore, broadcast, mpsc, oneshot};
use tracing::{debug, warn};

/// Default number of concurrent requests
pub const DEFAULT_MAX_CONCURRENT: usize = 2;

/// Dispatcher configuration
#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    /// Maximum number of requests in flight
    pub max_concurrent: usize,
    /// Capacity of the failure broadcast channel
    pub failure_capacity: usize,
}

impl DispatcherConfig {
    /// Set the concurrency limit (clamped to at least one)
    #[must_use]
    pub const fn with_max_concurrent(mut self, max_concurrent: usize) -> Self {
        self.max_concurrent = if max_concurrent == 0 { 1 } else { max_concurrent };
        self
    }

    /// Set the failure broadcast capacity
    #[must_use]
    pub const fn with_failure_capacity(mut self, capacity: usize) -> Self {
        self.failure_capacity = capacity;
        self
    }
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            max_concurrent: DEFAULT_MAX_CONCURRENT,
            failure_capacity: 256,
        }
    }
}

struct Job<A> {
    request: ApiRequest<A>,
    reply: oneshot::Sender<A>,
}

struct Shared<A> {
    transport: Arc<dyn HttpTransport>,
    failures: broadcast::Sender<ApiFailure<A>>,
    in_flight: AtomicUsize,
    queued: AtomicUsize,
}

/// Handle to a running dispatcher
///
/// Cloning is cheap; all clones feed the same queue.
pub struct Dispatcher<A> {
    queue: mpsc::UnboundedSender<Job<A>>,
    shared: Arc<Shared<A>>,
    max_concurrent: usize,
}

impl<A> Clone for Dispatcher<A> {
    fn clone(&self) -> Self {
        Self {
            queue: self.queue.clone(),
            shared: Arc::clone(&self.shared),
            max_concurrent: self.max_concurrent,
        }
    }
}

impl<A> std::fmt::Debug for Dispatcher<A> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("max_concurrent", &self.max_concurrent)
            .field("in_flight", &self.in_flight())
            .field("queued", &self.queued())
            .finish_non_exhaustive()
    }
}

impl<A: Send + 'static> Dispatcher<A> {
    /// Start the dispatcher worker on the current tokio runtime
    #[must_use]
    pub fn spawn(transport: Arc<dyn HttpTransport>, config: DispatcherConfig) -> Self {
        let max_concurrent = config.max_concurrent.max(1);
        let (queue, jobs) = mpsc::unbounded_channel();
        let (failures, _) = broadcast::channel(config.failure_capacity.max(1));

        let shared = Arc::new(Shared {
            transport,
            failures,
            in_flight: AtomicUsize::new(0),
            queued: AtomicUsize::new(0),
        });

        tokio::spawn(run(jobs, Arc::new(Semaphore::new(max_concurrent)), Arc::clone(&shared)));
        debug!(max_concurrent, "Request dispatcher started");

        Self {
            queue,
            shared,
            max_concurrent,
        }
    }

    /// Queue a request
    ///
    /// The returned receiver resolves to the continuation action once the
    /// request has completed.
    pub fn submit(&self, request: ApiRequest<A>) -> oneshot::Receiver<A> {
        let (reply, rx) = oneshot::channel();
        metrics::counter!("dispatcher.requests.total", "method" => request.method.as_str())
            .increment(1);

        self.shared.queued.fetch_add(1, Ordering::SeqCst);
        if let Err(mpsc::error::SendError(job)) = self.queue.send(Job { request, reply }) {
            self.shared.queued.fetch_sub(1, Ordering::SeqCst);
            warn!(url = %job.request.url, "Dispatcher worker stopped, dropping request");
        }
        rx
    }

    /// Subscribe to the failure stream
    #[must_use]
    pub fn subscribe_failures(&self) -> broadcast::Receiver<ApiFailure<A>> {
        self.shared.failures.subscribe()
    }
}

impl<A> Dispatcher<A> {
    /// Requests currently being performed
    #[must_use]
    pub fn in_flight(&self) -> usize {
        self.shared.in_flight.load(Ordering::SeqCst)
    }

    /// Requests waiting for a free slot
    #[must_use]
    pub fn queued(&self) -> usize {
        self.shared.queued.load(Ordering::SeqCst)
    }

    /// Configured concurrency limit
    #[must_use]
    pub const fn max_concurrent(&self) -> usize {
        self.max_concurrent
    }
}

/// Worker loop: a slot is acquired before the next job is taken off the
/// queue, so jobs start in submission order.
async fn run<A: Send + 'static>(
    mut jobs: mpsc::UnboundedReceiver<Job<A>>,
    slots: Arc<Semaphore>,
    shared: Arc<Shared<A>>,
) {
    loop {
        let Ok(permit) = Arc::clone(&slots).acquire_owned().await else {
            break;
        };
        let Some(job) = jobs.recv().await else {
            break;
        };
        shared.queued.fetch_sub(1, Ordering::SeqCst);

        let shared = Arc::clone(&shared);
        tokio::spawn(async move {
            let _permit = permit;
            let action = perform(&shared, job.request).await;
            if job.reply.send(action).is_err() {
                debug!("Reply receiver dropped before the request completed");
            }
        });
    }
    debug!("Request dispatcher stopped");
}

async fn perform<A>(shared: &Shared<A>, request: ApiRequest<A>) -> A {
    let mut headers = Vec::new();
    if request.method.is_mutating() {
        if let Some(token) = shared.transport.csrf_token() {
            headers.push((CSRF_HEADER.to_string(), token));
        }
    }

    let http = HttpRequest {
        method: request.method,
        url: request.url.clone(),
        headers,
        body: request.body.clone(),
    };

    let in_flight = shared.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
    #[allow(clippy::cast_precision_loss)]
    metrics::gauge!("dispatcher.in_flight").set(in_flight as f64);
    debug!(method = %request.method, url = %request.url, in_flight, "Performing request");

    let start = Instant::now();
    let result = shared.transport.execute(http).await;
    metrics::histogram!("dispatcher.request.duration_seconds").record(start.elapsed().as_secs_f64());

    let in_flight = shared.in_flight.fetch_sub(1, Ordering::SeqCst) - 1;
    #[allow(clippy::cast_precision_loss)]
    metrics::gauge!("dispatcher.in_flight").set(in_flight as f64);

    match result {
        Ok(response) if response.is_success() => {
            debug!(method = %request.method, url = %request.url, status = response.status, "Request succeeded");
            request.succeed(response.body.unwrap_or(Value::Null))
        },
        Ok(response) => {
            let error = ClassifiedError::from_response(response.status, response.body.as_ref());
            fail(shared, request, error)
        },
        Err(error) => {
            warn!(url = %request.url, error = %error, "Request produced no response");
            fail(shared, request, ClassifiedError::from(&error))
        },
    }
}

fn fail<A>(shared: &Shared<A>, request: ApiRequest<A>, error: ClassifiedError) -> A {
    warn!(
        method = %request.method,
        url = %request.url,
        status = error.status_code,
        message = %error.message,
        "Request failed"
    );
    metrics::counter!("dispatcher.failures.total", "status" => error.status_code.to_string())
        .increment(1);

    let action = request.fail(error.clone());
    // Err only means nobody is subscribed.
    let _ = shared.failures.send(ApiFailure { error, request });
    action
}

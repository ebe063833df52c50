//! Forwarding of request failures to a notification sink.
//!
//! Rendering notifications is left to the consumer. The notifier only
//! decides which failures deserve one:
//! - silent requests never notify
//! - 401 is owned by the session sentinel
//! - 503 is retried and not a hard failure

use crate::store::Store;
use cloudsync_core::api::{ApiFailure, ClassifiedError, Method};
use cloudsync_core::reducer::Reducer;
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// A failure worth showing to the user
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    /// Verb of the failed request
    pub method: Method,
    /// URL of the failed request
    pub url: String,
    /// The classified error
    pub error: ClassifiedError,
}

impl<A> From<&ApiFailure<A>> for Notification {
    fn from(failure: &ApiFailure<A>) -> Self {
        Self {
            method: failure.request.method,
            url: failure.request.url.clone(),
            error: failure.error.clone(),
        }
    }
}

/// Receives notifications
pub trait NotificationSink: Send + Sync {
    /// Deliver one notification
    fn notify(&self, notification: Notification);
}

/// Sink that logs notifications as warnings
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingNotifier;

impl NotificationSink for TracingNotifier {
    fn notify(&self, notification: Notification) {
        warn!(
            method = %notification.method,
            url = %notification.url,
            status = notification.error.status_code,
            "{}",
            notification.error.message
        );
    }
}

/// Whether a failure is surfaced to the user
#[must_use]
pub fn should_notify<A>(failure: &ApiFailure<A>) -> bool {
    !failure.request.silent && !failure.error.is_unauthorized() && !failure.error.is_unavailable()
}

/// Start forwarding failures of `store` to `sink`
///
/// Returns `None` if the store has no dispatcher.
pub fn spawn_notifier<S, A, E, R>(
    store: &Store<S, A, E, R>,
    sink: Arc<dyn NotificationSink>,
) -> Option<JoinHandle<()>>
where
    R: Reducer<State = S, Action = A, Environment = E> + Send + Sync + 'static,
    A: Send + Sync + Clone + 'static,
    S: Send + Sync + 'static,
    E: Send + Sync + 'static,
{
    let mut failures = store.subscribe_failures()?;

    Some(tokio::spawn(async move {
        loop {
            match failures.recv().await {
                Ok(failure) if should_notify(&failure) => {
                    metrics::counter!("notifier.notifications.total").increment(1);
                    sink.notify(Notification::from(&failure));
                },
                Ok(_) => {},
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "Notifier lagged behind the failure stream");
                },
                Err(RecvError::Closed) => break,
            }
        }
        debug!("Notifier stopped");
    }))
}

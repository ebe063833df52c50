//! Re-dispatch of requests that failed with 503.
//!
//! A 503 (including the synthetic 503 produced when the client is offline)
//! is treated as a transient outage: the original envelope is submitted again
//! after a fixed delay. There is no backoff and no attempt limit, so a request
//! keeps being retried for as long as the outage lasts.
//!
//! # Example
//!
//! ```ignore
//! use cloudsync_runtime::{spawn_retrier, DEFAULT_RETRY_DELAY};
//!
//! let _retrier = spawn_retrier(&store, DEFAULT_RETRY_DELAY);
//! ```

use crate::store::Store;
use cloudsync_core::reducer::Reducer;
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Delay between a 503 and the re-dispatch of the same request
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(10);

/// Start the retrier for `store`
///
/// Every failure with status 503 schedules one re-dispatch of the failed
/// envelope after `delay`. Other failures are ignored.
///
/// Returns `None` if the store has no dispatcher.
pub fn spawn_retrier<S, A, E, R>(store: &Store<S, A, E, R>, delay: Duration) -> Option<JoinHandle<()>>
where
    R: Reducer<State = S, Action = A, Environment = E> + Send + Sync + 'static,
    A: Send + Sync + Clone + 'static,
    S: Send + Sync + 'static,
    E: Send + Sync + 'static,
{
    let mut failures = store.subscribe_failures()?;
    let store = store.clone();

    Some(tokio::spawn(async move {
        loop {
            match failures.recv().await {
                Ok(failure) if failure.error.is_unavailable() => {
                    metrics::counter!("retrier.scheduled.total").increment(1);
                    info!(
                        method = %failure.request.method,
                        url = %failure.request.url,
                        delay_secs = delay.as_secs_f64(),
                        "Service unavailable, scheduling retry"
                    );

                    let store = store.clone();
                    tokio::spawn(async move {
                        tokio::time::sleep(delay).await;
                        debug!(url = %failure.request.url, "Retrying request");
                        if let Err(error) = store.dispatch(failure.request) {
                            warn!(%error, "Retry could not be dispatched");
                        }
                    });
                },
                Ok(_) => {},
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "Retrier lagged behind the failure stream");
                },
                Err(RecvError::Closed) => break,
            }
        }
        debug!("Retrier stopped");
    }))
}

//! Session termination on 401.
//!
//! Any request failing with 401 means the session cookie is no longer
//! accepted. The sentinel sends a single "session terminated" action to the
//! store for each such failure; reducers reset their state in response.
//! If the sentinel falls behind the failure stream, the skipped failures may
//! have included a 401, so it terminates the session then as well.

use crate::store::Store;
use cloudsync_core::api::ApiFailure;
use cloudsync_core::reducer::Reducer;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Start the session sentinel for `store`
///
/// `terminated` is the action sent once per 401 failure.
///
/// Returns `None` if the store has no dispatcher.
pub fn spawn_session_sentinel<S, A, E, R>(
    store: &Store<S, A, E, R>,
    terminated: A,
) -> Option<JoinHandle<()>>
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
            let received = failures.recv().await;
            match &received {
                Ok(failure) if failure.error.is_unauthorized() => {
                    warn!(url = %failure.request.url, "Session rejected by server, terminating");
                },
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "Session sentinel lagged behind the failure stream, terminating");
                },
                Err(RecvError::Closed) => break,
                Ok(_) => {},
            }
            if terminates(&received) {
                metrics::counter!("sentinel.terminations.total").increment(1);
                store.send(terminated.clone()).await;
            }
        }
        debug!("Session sentinel stopped");
    }))
}

/// Whether a received failure ends the session
///
/// A lagged receiver may have missed a 401.
fn terminates<A>(received: &Result<ApiFailure<A>, RecvError>) -> bool {
    match received {
        Ok(failure) => failure.error.is_unauthorized(),
        Err(RecvError::Lagged(_)) => true,
        Err(RecvError::Closed) => false,
    }
}

//! # Cloudsync Testing
//!
//! Testing utilities and helpers for the cloudsync engine.
//!
//! This crate provides:
//! - Mock implementations of Environment traits, the HTTP transport and
//!   the notification sink
//! - Test helpers for driving a [`Store`](cloudsync_runtime::Store) to a state
//! - Property-based testing strategies for collection payloads
//! - Assertion helpers for reducers
//!
//! ## Example
//!
//! ```ignore
//! use cloudsync_testing::{helpers::eventually, MockTransport};
//!
//! #[tokio::test(start_paused = true)]
//! async fn loads_volumes() {
//!     let transport = Arc::new(
//!         MockTransport::new().respond(Method::Get, "/api/volumes/", 200, Some(json!([]))),
//!     );
//!     let portal = Portal::start(transport, PortalConfig::default());
//!
//!     portal.store().send(PortalAction::Volumes(ResourceAction::FetchList)).await;
//!     eventually(portal.store(), |s| s.volumes.initialised, Duration::from_secs(1)).await;
//! }
//! ```

use chrono::{DateTime, Utc};
use cloudsync_core::environment::Clock;


/// Scripted HTTP transport
pub mod transport;

/// Mock implementations for testing.
pub mod mocks {
    use super::{Clock, DateTime, Utc};
    use cloudsync_runtime::{Notification, NotificationSink};
    use std::sync::{Mutex, PoisonError};

    /// Fixed clock for deterministic tests
    ///
    /// Always returns the same time, making tests reproducible.
    ///
    /// # Example
    ///
    /// ```
    /// use cloudsync_testing::mocks::FixedClock;
    /// use cloudsync_core::environment::Clock;
    /// use chrono::Utc;
    ///
    /// let clock = FixedClock::new(Utc::now());
    /// assert_eq!(clock.now(), clock.now());
    /// ```
    #[derive(Debug, Clone)]
    pub struct FixedClock {
        time: DateTime<Utc>,
    }

    impl FixedClock {
        /// Create a new fixed clock with the given time
        #[must_use]
        pub const fn new(time: DateTime<Utc>) -> Self {
            Self { time }
        }
    }

    impl Clock for FixedClock {
        fn now(&self) -> DateTime<Utc> {
            self.time
        }
    }

    /// Create a default fixed clock for tests (2025-01-01 00:00:00 UTC)
    #[must_use]
    pub fn test_clock() -> FixedClock {
        FixedClock::new(DateTime::<Utc>::UNIX_EPOCH + chrono::Duration::days(20_089))
    }

    /// Notification sink that keeps everything it receives
    #[derive(Debug, Default)]
    pub struct RecordingNotifier {
        received: Mutex<Vec<Notification>>,
    }

    impl RecordingNotifier {
        /// Create an empty recorder
        #[must_use]
        pub fn new() -> Self {
            Self::default()
        }

        /// Notifications received so far, in order
        #[must_use]
        pub fn notifications(&self) -> Vec<Notification> {
            self.received
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .clone()
        }
    }

    impl NotificationSink for RecordingNotifier {
        fn notify(&self, notification: Notification) {
            self.received
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .push(notification);
        }
    }
}

/// Test helpers for running stores.
pub mod helpers {
    use cloudsync_core::reducer::Reducer;
    use cloudsync_runtime::Store;
    use std::time::Duration;

    /// Wait until `predicate` holds for the store state
    ///
    /// Polls every millisecond. Works with paused tokio time, where the
    /// polling sleeps auto-advance the clock.
    ///
    /// # Panics
    ///
    /// Panics if the predicate does not hold within `timeout`.
    #[allow(clippy::panic)] // Test helper
    pub async fn eventually<S, A, E, R, F>(store: &Store<S, A, E, R>, predicate: F, timeout: Duration)
    where
        R: Reducer<State = S, Action = A, Environment = E> + Send + Sync + 'static,
        A: Send + Sync + Clone + 'static,
        S: Send + Sync + 'static,
        E: Send + Sync + 'static,
        F: Fn(&S) -> bool,
    {
        let reached = tokio::time::timeout(timeout, async {
            while !store.state(&predicate).await {
                tokio::time::sleep(Duration::from_millis(1)).await;
            }
        })
        .await;
        assert!(reached.is_ok(), "State condition not reached within {timeout:?}");
    }

    /// Install a tracing subscriber honouring `RUST_LOG`, once per process
    pub fn init_tracing() {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    }
}

/// Property-based testing utilities using proptest.
pub mod properties {
    use proptest::prelude::*;
    use serde_json::{Map, Value};

    /// Short lowercase identifiers
    pub fn arb_id() -> impl Strategy<Value = String> {
        "[a-z0-9]{1,8}"
    }

    /// Flat JSON scalars
    pub fn arb_scalar() -> impl Strategy<Value = Value> {
        prop_oneof![
            Just(Value::Null),
            any::<bool>().prop_map(Value::Bool),
            any::<i32>().prop_map(Value::from),
            "[a-zA-Z ]{0,12}".prop_map(Value::String),
        ]
    }

    /// A JSON object with a few scalar fields (no `id`)
    pub fn arb_fields() -> impl Strategy<Value = Map<String, Value>> {
        prop::collection::btree_map("[a-z_]{1,6}", arb_scalar(), 0..5)
            .prop_map(|fields| fields.into_iter().filter(|(k, _)| k != "id").collect())
    }

    /// A resource payload: an object with a string `id` and some fields
    pub fn arb_payload() -> impl Strategy<Value = Value> {
        (arb_id(), arb_fields()).prop_map(|(id, mut fields)| {
            fields.insert("id".to_string(), Value::String(id));
            Value::Object(fields)
        })
    }

    /// A list payload with unique ids
    pub fn arb_list_payload() -> impl Strategy<Value = Value> {
        prop::collection::btree_map(arb_id(), arb_fields(), 0..6).prop_map(|items| {
            Value::Array(
                items
                    .into_iter()
                    .map(|(id, mut fields)| {
                        fields.insert("id".to_string(), Value::String(id));
                        Value::Object(fields)
                    })
                    .collect(),
            )
        })
    }
}

// Re-export commonly used items
pub use mocks::{FixedClock, RecordingNotifier, test_clock};
pub use reducer_test::{ReducerTest, assertions};
pub use transport::{MockTransport, Reply};

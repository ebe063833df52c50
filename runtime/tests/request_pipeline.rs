//! Integration tests for the request pipeline
//!
//! Store + dispatcher + retrier + sentinel + notifier against a scripted
//! transport, with paused tokio time.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)] // Test code can use unwrap/expect/panic

use cloudsync_core::api::{ApiRequest, ClassifiedError, Method};
use cloudsync_core::transport::{CSRF_HEADER, TransportError};
use cloudsync_core::{Effect, Reducer, SmallVec, smallvec};
use cloudsync_runtime::{
    Dispatcher, DispatcherConfig, Store, spawn_notifier, spawn_retrier, spawn_session_sentinel,
};
use cloudsync_testing::helpers::eventually;
use cloudsync_testing::{MockTransport, RecordingNotifier};
use serde_json::{Value, json};
use std::sync::Arc;
use std::time::Duration;

// ============================================================================
// Test Fixtures
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
enum TestAction {
    Call {
        method: Method,
        url: &'static str,
        silent: bool,
    },
    Succeeded(&'static str, Value),
    Failed(&'static str, ClassifiedError),
    Terminated,
}

#[derive(Debug, Clone, Default)]
struct TestState {
    outcomes: Vec<TestAction>,
    terminations: usize,
}

impl TestState {
    fn successes(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|a| matches!(a, TestAction::Succeeded(..)))
            .count()
    }
}

#[derive(Clone)]
struct TestReducer;

impl Reducer for TestReducer {
    type State = TestState;
    type Action = TestAction;
    type Environment = ();

    fn reduce(
        &self,
        state: &mut Self::State,
        action: Self::Action,
        _env: &Self::Environment,
    ) -> SmallVec<[Effect<Self::Action>; 4]> {
        match action {
            TestAction::Call { method, url, silent } => {
                let request = ApiRequest::new(
                    method,
                    url,
                    move |payload| TestAction::Succeeded(url, payload),
                    move |error| TestAction::Failed(url, error),
                );
                let request = if silent { request.silent() } else { request };
                smallvec![Effect::Api(request)]
            },
            TestAction::Terminated => {
                state.terminations += 1;
                smallvec![]
            },
            outcome => {
                state.outcomes.push(outcome);
                smallvec![]
            },
        }
    }
}

type TestStore = Store<TestState, TestAction, (), TestReducer>;

fn store_over(transport: &Arc<MockTransport>) -> TestStore {
    let dispatcher = Dispatcher::spawn(transport.clone(), DispatcherConfig::default());
    Store::with_dispatcher(TestState::default(), TestReducer, (), dispatcher)
}

const fn get(url: &'static str) -> TestAction {
    TestAction::Call {
        method: Method::Get,
        url,
        silent: false,
    }
}

const TIMEOUT: Duration = Duration::from_secs(60);

// ============================================================================
// Dispatcher
// ============================================================================

#[tokio::test(start_paused = true)]
async fn at_most_two_requests_are_in_flight_and_admission_is_fifo() {
    let urls = ["/api/m/1/", "/api/m/2/", "/api/m/3/", "/api/m/4/", "/api/m/5/"];
    let mut transport = MockTransport::new().with_latency(Duration::from_millis(100));
    for url in urls {
        transport = transport.respond(Method::Get, url, 200, Some(json!({"url": url})));
    }
    let transport = Arc::new(transport);
    let store = store_over(&transport);

    for url in urls {
        store.send(get(url)).await;
    }
    eventually(&store, |s| s.successes() == 5, TIMEOUT).await;

    assert_eq!(transport.max_in_flight(), 2);
    let order: Vec<String> = transport.requests().into_iter().map(|r| r.url).collect();
    assert_eq!(order, urls);
    let dispatcher = store.dispatcher().unwrap();
    assert_eq!(dispatcher.in_flight(), 0);
    assert_eq!(dispatcher.queued(), 0);
}

#[tokio::test(start_paused = true)]
async fn csrf_header_is_sent_only_with_mutating_verbs() {
    let transport = Arc::new(
        MockTransport::new()
            .with_csrf_token("s3cret")
            .respond(Method::Get, "/api/volumes/", 200, Some(json!([])))
            .respond(Method::Delete, "/api/volumes/1/", 204, None),
    );
    let store = store_over(&transport);

    store.send(get("/api/volumes/")).await;
    store
        .send(TestAction::Call {
            method: Method::Delete,
            url: "/api/volumes/1/",
            silent: false,
        })
        .await;
    eventually(&store, |s| s.outcomes.len() == 2, TIMEOUT).await;

    let requests = transport.requests();
    let get = requests.iter().find(|r| r.method == Method::Get).unwrap();
    let delete = requests.iter().find(|r| r.method == Method::Delete).unwrap();
    assert_eq!(get.header(CSRF_HEADER), None);
    assert_eq!(delete.header(CSRF_HEADER), Some("s3cret"));
}

#[tokio::test(start_paused = true)]
async fn empty_success_body_is_null() {
    let transport = Arc::new(MockTransport::new().respond(Method::Get, "/api/empty/", 204, None));
    let store = store_over(&transport);

    store.send(get("/api/empty/")).await;
    eventually(&store, |s| s.outcomes.len() == 1, TIMEOUT).await;

    let outcomes = store.state(|s| s.outcomes.clone()).await;
    assert_eq!(outcomes, vec![TestAction::Succeeded("/api/empty/", Value::Null)]);
}

#[tokio::test(start_paused = true)]
async fn failures_are_classified_and_published_with_their_envelope() {
    let transport = Arc::new(MockTransport::new().respond(
        Method::Get,
        "/api/sizes/",
        400,
        Some(json!({"detail": "Bad tenancy"})),
    ));
    let store = store_over(&transport);
    let mut failures = store.subscribe_failures().unwrap();

    store.send(get("/api/sizes/")).await;

    let failure = failures.recv().await.unwrap();
    assert_eq!(failure.error, ClassifiedError::new("Bad tenancy", 400));
    assert_eq!(failure.request.url, "/api/sizes/");
    assert_eq!(failure.request.method, Method::Get);

    eventually(&store, |s| s.outcomes.len() == 1, TIMEOUT).await;
    let outcomes = store.state(|s| s.outcomes.clone()).await;
    assert_eq!(
        outcomes,
        vec![TestAction::Failed("/api/sizes/", ClassifiedError::new("Bad tenancy", 400))]
    );
}

#[tokio::test(start_paused = true)]
async fn offline_is_reported_as_unavailable() {
    let transport = Arc::new(MockTransport::new().fail_with(
        Method::Get,
        "/api/images/",
        TransportError::Offline("dns lookup failed".into()),
    ));
    let store = store_over(&transport);
    let mut failures = store.subscribe_failures().unwrap();

    store.send(get("/api/images/")).await;

    let failure = failures.recv().await.unwrap();
    assert!(failure.error.is_unavailable());
    assert_eq!(failure.error, ClassifiedError::offline());
}

#[tokio::test(start_paused = true)]
async fn missing_response_uses_sentinel_status() {
    let transport = Arc::new(MockTransport::new().fail_with(
        Method::Get,
        "/api/images/",
        TransportError::NoResponse("connection reset".into()),
    ));
    let store = store_over(&transport);
    let mut failures = store.subscribe_failures().unwrap();

    store.send(get("/api/images/")).await;

    let failure = failures.recv().await.unwrap();
    assert_eq!(failure.error.status_code, ClassifiedError::NO_RESPONSE);
    assert_eq!(failure.error.message, "Error communicating with API server");
}

// ============================================================================
// Retrier
// ============================================================================

#[tokio::test(start_paused = true)]
async fn unavailable_request_is_redispatched_once_after_the_delay() {
    let transport = Arc::new(
        MockTransport::new()
            .respond(Method::Get, "/api/quotas/", 503, None)
            .respond(Method::Get, "/api/quotas/", 200, Some(json!([{"id": "q"}]))),
    );
    let store = store_over(&transport);
    let _retrier = spawn_retrier(&store, Duration::from_secs(10)).unwrap();
    let start = tokio::time::Instant::now();

    store.send(get("/api/quotas/")).await;
    tokio::time::sleep(Duration::from_secs(9)).await;
    assert_eq!(transport.count(Method::Get, "/api/quotas/"), 1, "no retry before the delay");

    eventually(&store, |s| s.successes() == 1, TIMEOUT).await;
    assert!(start.elapsed() >= Duration::from_secs(10));
    assert_eq!(transport.count(Method::Get, "/api/quotas/"), 2);

    let outcomes = store.state(|s| s.outcomes.clone()).await;
    assert!(matches!(outcomes[0], TestAction::Failed(_, ref e) if e.is_unavailable()));
    assert_eq!(outcomes[1], TestAction::Succeeded("/api/quotas/", json!([{"id": "q"}])));
}

#[tokio::test(start_paused = true)]
async fn persistent_outage_is_retried_without_limit() {
    let transport = Arc::new(MockTransport::new().respond(Method::Get, "/api/quotas/", 503, None));
    let store = store_over(&transport);
    let _retrier = spawn_retrier(&store, Duration::from_secs(10)).unwrap();

    store.send(get("/api/quotas/")).await;
    tokio::time::sleep(Duration::from_secs(35)).await;

    assert_eq!(transport.count(Method::Get, "/api/quotas/"), 4);
}

#[tokio::test(start_paused = true)]
async fn other_failures_are_not_retried() {
    let transport = Arc::new(MockTransport::new().respond(Method::Get, "/api/quotas/", 500, None));
    let store = store_over(&transport);
    let _retrier = spawn_retrier(&store, Duration::from_secs(10)).unwrap();

    store.send(get("/api/quotas/")).await;
    tokio::time::sleep(Duration::from_secs(30)).await;

    assert_eq!(transport.count(Method::Get, "/api/quotas/"), 1);
}

#[test]
fn epics_need_a_dispatcher() {
    let store = Store::new(TestState::default(), TestReducer, ());
    assert!(spawn_retrier(&store, Duration::from_secs(1)).is_none());
    assert!(spawn_session_sentinel(&store, TestAction::Terminated).is_none());
    assert!(spawn_notifier(&store, Arc::new(RecordingNotifier::new())).is_none());
}

// ============================================================================
// Session sentinel
// ============================================================================

#[tokio::test(start_paused = true)]
async fn each_unauthorized_failure_terminates_once() {
    let transport = Arc::new(
        MockTransport::new()
            .respond(Method::Get, "/api/session/", 401, Some(json!({"detail": "Not logged in"})))
            .respond(Method::Get, "/api/volumes/", 200, Some(json!([]))),
    );
    let store = store_over(&transport);
    let _sentinel = spawn_session_sentinel(&store, TestAction::Terminated).unwrap();

    store.send(get("/api/session/")).await;
    store.send(get("/api/volumes/")).await;
    eventually(&store, |s| s.outcomes.len() == 2 && s.terminations == 1, TIMEOUT).await;

    tokio::time::sleep(Duration::from_secs(1)).await;
    assert_eq!(store.state(|s| s.terminations).await, 1);
}

// ============================================================================
// Notifier
// ============================================================================

#[tokio::test(start_paused = true)]
async fn only_visible_hard_failures_are_notified() {
    let transport = Arc::new(
        MockTransport::new()
            .respond(Method::Post, "/api/volumes/", 400, Some(json!({"detail": "Name required"})))
            .respond(Method::Get, "/api/session/", 401, None)
            .respond(Method::Get, "/api/quotas/", 503, None)
            .respond(Method::Get, "/api/sizes/", 500, Some(json!("boom"))),
    );
    let store = store_over(&transport);
    let sink = Arc::new(RecordingNotifier::new());
    let _notifier = spawn_notifier(&store, sink.clone()).unwrap();

    store
        .send(TestAction::Call {
            method: Method::Post,
            url: "/api/volumes/",
            silent: false,
        })
        .await;
    store
        .send(TestAction::Call {
            method: Method::Get,
            url: "/api/sizes/",
            silent: true,
        })
        .await;
    store.send(get("/api/session/")).await;
    store.send(get("/api/quotas/")).await;
    eventually(&store, |s| s.outcomes.len() == 4, TIMEOUT).await;
    tokio::time::sleep(Duration::from_millis(10)).await;

    let notifications = sink.notifications();
    assert_eq!(notifications.len(), 1, "{notifications:?}");
    assert_eq!(notifications[0].url, "/api/volumes/");
    assert_eq!(notifications[0].error.message, "Name required");
}

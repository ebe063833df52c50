//! End-to-end tests of the portal engine over a scripted transport
//!
//! Time is paused: latencies, retry delays and poll intervals elapse
//! instantly but in order.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)] // Test code can use unwrap/expect/panic

use cloudsync_core::api::Method;
use cloudsync_portal::resources::ClusterOp;
use cloudsync_portal::{Portal, PortalAction, PortalConfig, PortalState, ResourceAction, SessionAction};
use cloudsync_testing::helpers::{eventually, init_tracing};
use cloudsync_testing::{MockTransport, RecordingNotifier, test_clock};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

const TIMEOUT: Duration = Duration::from_secs(120);
const VOLUMES: &str = "/api/tenancies/t1/volumes/";

async fn start(transport: &Arc<MockTransport>) -> (Portal, Arc<RecordingNotifier>) {
    init_tracing();
    let sink = Arc::new(RecordingNotifier::new());
    let portal = Portal::builder(PortalConfig::default())
        .with_clock(Arc::new(test_clock()))
        .with_sink(sink.clone())
        .start(transport.clone())
        .await;
    (portal, sink)
}

async fn until(portal: &Portal, predicate: impl Fn(&PortalState) -> bool) {
    eventually(portal.store(), predicate, TIMEOUT).await;
}

fn volumes(action: ResourceAction) -> PortalAction {
    PortalAction::Volumes(action)
}

async fn select_t1(portal: &Portal) {
    portal.send(PortalAction::SelectTenancy(Some("t1".into()))).await;
}

#[tokio::test(start_paused = true)]
async fn session_is_initialised_on_start() {
    let transport = Arc::new(MockTransport::new().respond(
        Method::Get,
        "/api/session/",
        200,
        Some(json!({"user_id": 7, "username": "jbloggs"})),
    ));
    let (portal, sink) = start(&transport).await;

    until(&portal, |s| s.session.username.is_some()).await;
    let session = portal.state(|s| s.session.clone()).await;
    assert!(!session.initialising);
    assert_eq!(session.user_id.as_deref(), Some("7"));
    assert!(sink.notifications().is_empty());
}

#[tokio::test(start_paused = true)]
async fn anonymous_start_is_silent() {
    let transport = Arc::new(MockTransport::new().respond(Method::Get, "/api/session/", 401, None));
    let (portal, sink) = start(&transport).await;

    until(&portal, |s| !s.session.initialising).await;
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert!(portal.state(|s| s.session.username.is_none()).await);
    assert!(sink.notifications().is_empty());
}

#[tokio::test(start_paused = true)]
async fn empty_collection_then_create() {
    let transport = Arc::new(
        MockTransport::new()
            .respond(Method::Get, VOLUMES, 200, Some(json!([])))
            .respond(Method::Post, VOLUMES, 201, Some(json!({"id": "1", "name": "x"}))),
    );
    let (portal, _) = start(&transport).await;
    select_t1(&portal).await;

    portal.send(volumes(ResourceAction::FetchList)).await;
    until(&portal, |s| s.volumes.initialised).await;
    assert!(portal.state(|s| s.volumes.data.is_empty()).await);

    portal.send(volumes(ResourceAction::Create(json!({"name": "x"})))).await;
    assert!(portal.state(|s| s.volumes.creating).await);
    until(&portal, |s| !s.volumes.creating).await;

    let state = portal.state(|s| s.volumes.clone()).await;
    assert_eq!(state.data.len(), 1);
    assert_eq!(state.data["1"].data, json!({"id": "1", "name": "x"}).as_object().cloned().unwrap());
    assert!(state.create_error.is_none());

    let post = transport
        .requests()
        .into_iter()
        .find(|r| r.method == Method::Post)
        .unwrap();
    assert_eq!(post.body, Some(json!({"name": "x"})));
}

#[tokio::test(start_paused = true)]
async fn delete_flags_then_removes() {
    let transport = Arc::new(
        MockTransport::new()
            .with_latency(Duration::from_millis(200))
            .respond(Method::Get, VOLUMES, 200, Some(json!([{"id": "1"}, {"id": "2"}])))
            .respond(Method::Delete, "/api/tenancies/t1/volumes/1/", 204, None),
    );
    let (portal, _) = start(&transport).await;
    select_t1(&portal).await;
    portal.send(volumes(ResourceAction::FetchList)).await;
    until(&portal, |s| s.volumes.initialised).await;

    portal.send(volumes(ResourceAction::Delete("1".into()))).await;
    assert!(portal.state(|s| s.volumes.data["1"].deleting).await);

    until(&portal, |s| !s.volumes.data.contains_key("1")).await;
    assert!(portal.state(|s| s.volumes.data.contains_key("2")).await);
}

#[tokio::test(start_paused = true)]
async fn fetch_one_merges_over_existing_fields() {
    let transport = Arc::new(
        MockTransport::new()
            .respond(Method::Get, VOLUMES, 200, Some(json!([{"id": "1", "name": "a", "size": 10}])))
            .respond(
                Method::Get,
                "/api/tenancies/t1/volumes/1/",
                200,
                Some(json!({"id": "1", "name": "b", "status": "AVAILABLE"})),
            ),
    );
    let (portal, _) = start(&transport).await;
    select_t1(&portal).await;
    portal.send(volumes(ResourceAction::FetchList)).await;
    until(&portal, |s| s.volumes.initialised).await;

    portal.send(volumes(ResourceAction::FetchOne("1".into()))).await;
    until(&portal, |s| s.volumes.data["1"].get("status").is_some()).await;

    let item = portal.state(|s| s.volumes.data["1"].clone()).await;
    assert!(!item.fetching);
    assert_eq!(
        serde_json::Value::Object(item.data),
        json!({"id": "1", "name": "b", "size": 10, "status": "AVAILABLE"})
    );
}

#[tokio::test(start_paused = true)]
async fn never_more_than_two_requests_in_flight() {
    let mut transport = MockTransport::new().with_latency(Duration::from_millis(100));
    for id in 0..5 {
        transport = transport.respond(
            Method::Get,
            format!("/api/tenancies/t1/volumes/{id}/"),
            200,
            Some(json!({"id": id.to_string()})),
        );
    }
    let transport = Arc::new(transport);
    let (portal, _) = start(&transport).await;
    select_t1(&portal).await;

    for id in 0..5 {
        portal.send(volumes(ResourceAction::FetchOne(id.to_string()))).await;
    }
    until(&portal, |s| s.volumes.data.len() == 5).await;

    assert!(transport.max_in_flight() <= 2, "{} in flight", transport.max_in_flight());
    assert_eq!(transport.requests().len(), 6, "session plus five items");
}

#[tokio::test(start_paused = true)]
async fn unauthorized_failure_ends_the_session_despite_ten_requests_in_flight() {
    let mut transport = MockTransport::new()
        .with_latency(Duration::from_secs(1))
        .respond(Method::Get, "/api/session/", 200, Some(json!({"user_id": 1, "username": "jbloggs"})))
        .respond(Method::Get, "/api/tenancies/t1/machines/", 401, Some(json!({"detail": "Session expired"})));
    for id in 0..10 {
        transport = transport.respond(
            Method::Get,
            format!("/api/tenancies/t1/volumes/{id}/"),
            200,
            Some(json!({"id": id.to_string()})),
        );
    }
    let transport = Arc::new(transport);
    let (portal, sink) = start(&transport).await;
    until(&portal, |s| s.session.username.is_some()).await;
    select_t1(&portal).await;

    portal.send(PortalAction::Machines(ResourceAction::FetchList)).await;
    for id in 0..10 {
        portal.send(volumes(ResourceAction::FetchOne(id.to_string()))).await;
    }
    until(&portal, |s| s.session.username.is_none()).await;

    let state = portal.state(Clone::clone).await;
    assert!(!state.session.initialising);
    assert!(state.session.user_id.is_none());
    assert!(state.tenancy.is_none());
    assert!(state.machines.endpoint.is_none());

    // The ten volume fetches finish after the reset and are discarded.
    tokio::time::sleep(Duration::from_secs(10)).await;
    assert_eq!(transport.count(Method::Get, "/api/tenancies/t1/volumes/9/"), 1);
    let state = portal.state(Clone::clone).await;
    assert!(state.volumes.data.is_empty());
    assert!(state.session.username.is_none());
    assert!(sink.notifications().is_empty(), "401 is not a notification");
}

#[tokio::test(start_paused = true)]
async fn retried_fetch_ends_like_a_first_time_success() {
    let list = json!([{"id": "t1", "name": "Research"}]);
    let flaky = Arc::new(
        MockTransport::new()
            .respond(Method::Get, "/api/tenancies/", 503, Some(json!({"detail": "Maintenance"})))
            .respond(Method::Get, "/api/tenancies/", 200, Some(list.clone())),
    );
    let healthy = Arc::new(MockTransport::new().respond(Method::Get, "/api/tenancies/", 200, Some(list)));

    let (flaky_portal, sink) = start(&flaky).await;
    let (healthy_portal, _) = start(&healthy).await;
    let start_time = tokio::time::Instant::now();
    for portal in [&flaky_portal, &healthy_portal] {
        portal.send(PortalAction::Tenancies(ResourceAction::FetchList)).await;
    }

    until(&flaky_portal, |s| s.tenancies.fetch_error.is_some()).await;
    until(&flaky_portal, |s| s.tenancies.initialised).await;
    until(&healthy_portal, |s| s.tenancies.initialised).await;

    assert!(start_time.elapsed() >= Duration::from_secs(10));
    assert_eq!(flaky.count(Method::Get, "/api/tenancies/"), 2);
    assert_eq!(
        flaky_portal.state(|s| s.tenancies.clone()).await,
        healthy_portal.state(|s| s.tenancies.clone()).await
    );
    assert!(sink.notifications().is_empty(), "503 is not a notification");
}

#[tokio::test(start_paused = true)]
async fn fetch_if_needed_only_fetches_once() {
    let transport = Arc::new(
        MockTransport::new()
            .with_latency(Duration::from_millis(50))
            .respond(Method::Get, "/api/tenancies/", 200, Some(json!([]))),
    );
    let (portal, _) = start(&transport).await;

    for _ in 0..3 {
        portal.send(PortalAction::Tenancies(ResourceAction::FetchListIfNeeded)).await;
    }
    until(&portal, |s| s.tenancies.initialised).await;
    portal.send(PortalAction::Tenancies(ResourceAction::FetchListIfNeeded)).await;
    tokio::time::sleep(Duration::from_secs(1)).await;

    assert_eq!(transport.count(Method::Get, "/api/tenancies/"), 1);
    assert!(portal.state(|s| s.tenancies.fetched_at.is_some()).await);
}

#[tokio::test(start_paused = true)]
async fn switching_tenancy_discards_the_old_response() {
    let transport = Arc::new(
        MockTransport::new()
            .with_latency(Duration::from_secs(1))
            .respond(Method::Get, VOLUMES, 200, Some(json!([{"id": "old"}])))
            .respond(Method::Get, "/api/tenancies/t2/volumes/", 200, Some(json!([{"id": "new"}]))),
    );
    let (portal, _) = start(&transport).await;
    select_t1(&portal).await;
    portal.send(volumes(ResourceAction::FetchList)).await;
    portal.send(PortalAction::SelectTenancy(Some("t2".into()))).await;
    portal.send(volumes(ResourceAction::FetchList)).await;

    until(&portal, |s| s.volumes.initialised).await;
    tokio::time::sleep(Duration::from_secs(5)).await;

    let state = portal.state(|s| s.volumes.clone()).await;
    assert_eq!(state.data.keys().collect::<Vec<_>>(), vec!["new"]);
    assert_eq!(transport.count(Method::Get, VOLUMES), 1);
}

#[tokio::test(start_paused = true)]
async fn transitioning_items_are_polled_until_settled() {
    let transport = Arc::new(
        MockTransport::new()
            .respond(Method::Get, VOLUMES, 200, Some(json!([{"id": "1", "status": "CREATING"}])))
            .respond(Method::Get, "/api/tenancies/t1/volumes/1/", 200, Some(json!({"status": "CREATING"})))
            .respond(Method::Get, "/api/tenancies/t1/volumes/1/", 200, Some(json!({"status": "AVAILABLE"}))),
    );
    let (portal, _) = start(&transport).await;
    select_t1(&portal).await;
    portal.send(volumes(ResourceAction::FetchList)).await;

    until(&portal, |s| s.volumes.data.get("1").and_then(|i| i.str_field("status")) == Some("AVAILABLE")).await;
    tokio::time::sleep(Duration::from_secs(60)).await;

    assert_eq!(transport.count(Method::Get, "/api/tenancies/t1/volumes/1/"), 2);
    assert!(portal.state(|s| s.volumes.polling.is_empty()).await);
}

#[tokio::test(start_paused = true)]
async fn failed_create_is_recorded_and_notified() {
    let transport = Arc::new(
        MockTransport::new()
            .respond(Method::Get, VOLUMES, 200, Some(json!([])))
            .respond(Method::Post, VOLUMES, 400, Some(json!({"detail": "Size must be positive"}))),
    );
    let (portal, sink) = start(&transport).await;
    select_t1(&portal).await;

    portal.send(volumes(ResourceAction::Create(json!({"size": -1})))).await;
    until(&portal, |s| !s.volumes.creating).await;
    tokio::time::sleep(Duration::from_millis(10)).await;

    let error = portal.state(|s| s.volumes.create_error.clone()).await.unwrap();
    assert_eq!(error.status_code, 400);
    assert_eq!(error.message, "Size must be positive");

    let notifications = sink.notifications();
    assert_eq!(notifications.len(), 1);
    assert_eq!(notifications[0].method, Method::Post);
}

#[tokio::test(start_paused = true)]
async fn missing_cluster_service_is_an_empty_unsupported_collection() {
    let transport = Arc::new(MockTransport::new());
    let (portal, sink) = start(&transport).await;
    select_t1(&portal).await;

    portal.send(PortalAction::Clusters(ResourceAction::FetchList)).await;
    until(&portal, |s| s.clusters.initialised).await;
    tokio::time::sleep(Duration::from_millis(10)).await;

    let clusters = portal.state(|s| s.clusters.clone()).await;
    assert!(clusters.unsupported);
    assert!(clusters.fetch_error.is_none());
    assert!(sink.notifications().is_empty());
}

#[tokio::test(start_paused = true)]
async fn patched_cluster_is_refetched() {
    let clusters = "/api/tenancies/t1/clusters/";
    let transport = Arc::new(
        MockTransport::new()
            .respond(Method::Get, clusters, 200, Some(json!([{"id": "c1", "status": "READY", "version": 1}])))
            .respond(Method::Post, "/api/tenancies/t1/clusters/c1/patch/", 202, Some(json!({"status": "CONFIGURING"})))
            .respond(Method::Get, "/api/tenancies/t1/clusters/c1/", 200, Some(json!({"status": "READY", "version": 2}))),
    );
    let (portal, _) = start(&transport).await;
    select_t1(&portal).await;
    portal.send(PortalAction::Clusters(ResourceAction::FetchList)).await;
    until(&portal, |s| s.clusters.initialised).await;

    portal.send(PortalAction::Clusters(ResourceAction::Custom(ClusterOp::Patch("c1".into())))).await;
    assert!(portal.state(|s| s.clusters.data["c1"].flags.patching).await);

    until(&portal, |s| s.clusters.data["c1"].get("version") == Some(&json!(2))).await;
    let item = portal.state(|s| s.clusters.data["c1"].clone()).await;
    assert!(!item.flags.patching);
    assert!(!item.fetching);
    assert_eq!(item.str_field("status"), Some("READY"));

    let post = transport
        .requests()
        .into_iter()
        .find(|r| r.method == Method::Post)
        .unwrap();
    assert_eq!(post.url, "/api/tenancies/t1/clusters/c1/patch/");
}

#[tokio::test(start_paused = true)]
async fn explicit_termination_resets_like_a_401() {
    let transport = Arc::new(
        MockTransport::new().respond(Method::Get, "/api/tenancies/", 200, Some(json!([{"id": "t1"}]))),
    );
    let (portal, _) = start(&transport).await;
    portal.send(PortalAction::Tenancies(ResourceAction::FetchList)).await;
    until(&portal, |s| s.tenancies.initialised).await;

    portal.send(PortalAction::Session(SessionAction::Terminated)).await;
    let tenancies = portal.state(|s| s.tenancies.clone()).await;
    assert!(!tenancies.initialised);
    assert!(tenancies.data.is_empty());
}

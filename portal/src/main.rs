//! Cloudsync demo client.
//!
//! Connects to a portal API, initialises the session, loads the tenancies
//! and the machines and volumes of the first one, then prints a summary.
//!
//! ```text
//! cloudsync [config.toml]
//! ```

use anyhow::Context;
use cloudsync_portal::{Portal, PortalAction, PortalConfig, PortalState, ResourceAction};
use cloudsync_runtime::metrics::MetricsServer;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const LOAD_TIMEOUT: Duration = Duration::from_secs(30);

async fn wait_until(portal: &Portal, what: &str, predicate: impl Fn(&PortalState) -> bool) -> bool {
    let reached = tokio::time::timeout(LOAD_TIMEOUT, async {
        while !portal.state(&predicate).await {
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    })
    .await
    .is_ok();
    if !reached {
        warn!(what, "Gave up waiting");
    }
    reached
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "cloudsync=info,cloudsync_runtime=info,cloudsync_portal=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = match std::env::args().nth(1) {
        Some(path) => PortalConfig::load(&path).with_context(|| format!("loading {path}"))?,
        None => PortalConfig::from_env()?,
    };
    info!(base_url = %config.base_url, "Configuration loaded");

    let mut metrics = None;
    if let Some(addr) = config.metrics_addr {
        let mut server = MetricsServer::new(addr);
        server.start().context("starting metrics exporter")?;
        metrics = Some(server);
    }

    let portal = Portal::builder(config).connect().await?;

    wait_until(&portal, "session", |s| !s.session.initialising).await;
    let username = portal.state(|s| s.session.username.clone()).await;
    println!("Logged in as: {}", username.as_deref().unwrap_or("<anonymous>"));

    portal.send(PortalAction::Tenancies(ResourceAction::FetchListIfNeeded)).await;
    wait_until(&portal, "tenancies", |s| !s.tenancies.fetching).await;

    let (tenancies, error) = portal
        .state(|s| {
            let mut names: Vec<(String, String)> = s
                .tenancies
                .data
                .iter()
                .map(|(id, item)| (id.clone(), item.str_field("name").unwrap_or(id).to_string()))
                .collect();
            names.sort_by(|a, b| a.1.cmp(&b.1));
            (names, s.tenancies.fetch_error.clone())
        })
        .await;
    if let Some(error) = error {
        println!("Could not load tenancies: {error}");
    }
    println!("Tenancies: {}", tenancies.len());
    for (_, name) in &tenancies {
        println!("  - {name}");
    }

    if let Some((id, name)) = tenancies.first() {
        portal.send(PortalAction::SelectTenancy(Some(id.clone()))).await;
        portal.send(PortalAction::Machines(ResourceAction::FetchList)).await;
        portal.send(PortalAction::Volumes(ResourceAction::FetchList)).await;
        wait_until(&portal, "machines and volumes", |s| {
            !s.machines.fetching && !s.volumes.fetching
        })
        .await;

        let (machines, volumes) = portal
            .state(|s| (s.machines.data.len(), s.volumes.data.len()))
            .await;
        println!("Tenancy {name}: {machines} machines, {volumes} volumes");
    }

    if let Some(rendered) = metrics.as_ref().and_then(MetricsServer::render) {
        info!(bytes = rendered.len(), "Metrics snapshot rendered");
    }
    Ok(())
}

//! Root composition: one store holding the session and every collection.
//!
//! Each collection reducer is scoped to its field of [`PortalState`] and its
//! variant of [`PortalAction`]. The [`RootReducer`] handles the actions that
//! cut across collections: selecting a tenancy and losing the session.

use crate::config::PortalConfig;
use crate::resource::{CollectionState, ResourceAction, ResourceConfig, ResourceEnvironment, ResourceReducer};
use crate::resources::{
    CLUSTER_TYPES, CLUSTERS, ClusterFlags, ClusterOp, ClusterReducer, EXTERNAL_IPS, IMAGES,
    KUBERNETES_CLUSTER_TEMPLATES, KUBERNETES_CLUSTERS, KubernetesFlags, KubernetesOp, KubernetesReducer,
    MACHINES, MachineOp, MachineReducer, QUOTAS, SIZES, TENANCIES, VOLUMES,
};
use crate::session::{SessionAction, SessionReducer, SessionState};
use cloudsync_core::composition::{CombinedReducer, SharedReducer, combine_reducers, scope_reducer};
use cloudsync_core::environment::{Clock, SystemClock};
use cloudsync_core::transport::HttpTransport;
use cloudsync_core::{Effect, Reducer, SmallVec, smallvec};
use cloudsync_runtime::{
    Dispatcher, DispatcherConfig, EffectHandle, NotificationSink, ReqwestTransport, Store, TracingNotifier,
    TransportSetupError, spawn_notifier, spawn_retrier, spawn_session_sentinel,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info};

/// The whole client-side cache
#[derive(Debug, Clone, PartialEq)]
pub struct PortalState {
    /// Current session
    pub session: SessionState,
    /// Selected tenancy, which scopes every collection but `tenancies`
    pub tenancy: Option<String>,
    /// Tenancies
    pub tenancies: CollectionState,
    /// Quotas
    pub quotas: CollectionState,
    /// Images
    pub images: CollectionState,
    /// Sizes
    pub sizes: CollectionState,
    /// Machines
    pub machines: CollectionState,
    /// Volumes
    pub volumes: CollectionState,
    /// External IPs
    pub external_ips: CollectionState,
    /// Cluster types
    pub cluster_types: CollectionState,
    /// Clusters
    pub clusters: CollectionState<ClusterFlags>,
    /// Kubernetes cluster templates
    pub kubernetes_cluster_templates: CollectionState,
    /// Kubernetes clusters
    pub kubernetes_clusters: CollectionState<KubernetesFlags>,
}

impl Default for PortalState {
    fn default() -> Self {
        Self {
            session: SessionState::default(),
            tenancy: None,
            tenancies: TENANCIES.initial_state(),
            quotas: QUOTAS.initial_state(),
            images: IMAGES.initial_state(),
            sizes: SIZES.initial_state(),
            machines: MACHINES.initial_state(),
            volumes: VOLUMES.initial_state(),
            external_ips: EXTERNAL_IPS.initial_state(),
            cluster_types: CLUSTER_TYPES.initial_state(),
            clusters: CLUSTERS.initial_state(),
            kubernetes_cluster_templates: KUBERNETES_CLUSTER_TEMPLATES.initial_state(),
            kubernetes_clusters: KUBERNETES_CLUSTERS.initial_state(),
        }
    }
}

fn rebind<F>(collection: &mut CollectionState<F>, config: &ResourceConfig<F>, tenancy: Option<&str>) {
    collection.reset(tenancy.map(|tenancy| config.tenancy_endpoint(tenancy)));
}

impl PortalState {
    /// Point every tenancy-scoped collection at `tenancy`, discarding its contents
    fn bind_tenancy(&mut self, tenancy: Option<String>) {
        let id = tenancy.as_deref();
        rebind(&mut self.quotas, &QUOTAS, id);
        rebind(&mut self.images, &IMAGES, id);
        rebind(&mut self.sizes, &SIZES, id);
        rebind(&mut self.machines, &MACHINES, id);
        rebind(&mut self.volumes, &VOLUMES, id);
        rebind(&mut self.external_ips, &EXTERNAL_IPS, id);
        rebind(&mut self.cluster_types, &CLUSTER_TYPES, id);
        rebind(&mut self.clusters, &CLUSTERS, id);
        rebind(&mut self.kubernetes_cluster_templates, &KUBERNETES_CLUSTER_TEMPLATES, id);
        rebind(&mut self.kubernetes_clusters, &KUBERNETES_CLUSTERS, id);
        self.tenancy = tenancy;
    }
}

/// Every action the portal store understands
#[derive(Debug, Clone, PartialEq)]
pub enum PortalAction {
    /// Session actions
    Session(SessionAction),
    /// Select the tenancy that scopes the other collections (`None` clears it)
    SelectTenancy(Option<String>),
    /// Tenancies
    Tenancies(ResourceAction),
    /// Quotas
    Quotas(ResourceAction),
    /// Images
    Images(ResourceAction),
    /// Sizes
    Sizes(ResourceAction),
    /// Machines
    Machines(ResourceAction<MachineOp>),
    /// Volumes
    Volumes(ResourceAction),
    /// External IPs
    ExternalIps(ResourceAction),
    /// Cluster types
    ClusterTypes(ResourceAction),
    /// Clusters
    Clusters(ResourceAction<ClusterOp>),
    /// Kubernetes cluster templates
    KubernetesClusterTemplates(ResourceAction),
    /// Kubernetes clusters
    KubernetesClusters(ResourceAction<KubernetesOp>),
}

/// Dependencies of the portal reducers
#[derive(Debug, Clone)]
pub struct PortalEnvironment {
    /// Shared by every collection
    pub resources: ResourceEnvironment,
}

impl PortalEnvironment {
    /// Environment with the given clock and poll interval
    #[must_use]
    pub fn new(clock: Arc<dyn Clock>, poll_interval: Duration) -> Self {
        Self {
            resources: ResourceEnvironment { clock, poll_interval },
        }
    }
}

/// Cross-collection actions
#[derive(Debug, Clone, Copy, Default)]
pub struct RootReducer;

impl Reducer for RootReducer {
    type State = PortalState;
    type Action = PortalAction;
    type Environment = PortalEnvironment;

    fn reduce(
        &self,
        state: &mut Self::State,
        action: Self::Action,
        _env: &Self::Environment,
    ) -> SmallVec<[Effect<Self::Action>; 4]> {
        match action {
            PortalAction::SelectTenancy(tenancy) => {
                if state.tenancy != tenancy {
                    info!(tenancy = ?tenancy, "Selecting tenancy");
                    state.bind_tenancy(tenancy);
                }
            },
            PortalAction::Session(SessionAction::Terminated) => {
                debug!("Session terminated, discarding cached collections");
                let endpoint = state.tenancies.endpoint.take();
                state.tenancies.reset(endpoint);
                state.bind_tenancy(None);
            },
            _ => {},
        }
        smallvec![]
    }
}

macro_rules! scoped {
    ($reducer:expr, $field:ident, $variant:ident) => {
        Arc::new(scope_reducer(
            $reducer,
            |state: &mut PortalState| &mut state.$field,
            |action: PortalAction| match action {
                PortalAction::$variant(action) => Some(action),
                _ => None,
            },
            PortalAction::$variant,
            |env: &PortalEnvironment| &env.resources,
        )) as SharedReducer<PortalState, PortalAction, PortalEnvironment>
    };
}

/// The portal's root reducer
pub type PortalReducer = CombinedReducer<PortalState, PortalAction, PortalEnvironment>;

/// The portal's store
pub type PortalStore = Store<PortalState, PortalAction, PortalEnvironment, PortalReducer>;

/// Combine the session, cross-collection and collection reducers
#[must_use]
pub fn portal_reducer() -> PortalReducer {
    let session: SharedReducer<PortalState, PortalAction, PortalEnvironment> = Arc::new(scope_reducer(
        SessionReducer,
        |state: &mut PortalState| &mut state.session,
        |action: PortalAction| match action {
            PortalAction::Session(action) => Some(action),
            _ => None,
        },
        PortalAction::Session,
        |_: &PortalEnvironment| &(),
    ));
    let root: SharedReducer<PortalState, PortalAction, PortalEnvironment> = Arc::new(RootReducer);

    combine_reducers(vec![
        session,
        root,
        scoped!(ResourceReducer::new(TENANCIES), tenancies, Tenancies),
        scoped!(ResourceReducer::new(QUOTAS), quotas, Quotas),
        scoped!(ResourceReducer::new(IMAGES), images, Images),
        scoped!(ResourceReducer::new(SIZES), sizes, Sizes),
        scoped!(MachineReducer::default(), machines, Machines),
        scoped!(ResourceReducer::new(VOLUMES), volumes, Volumes),
        scoped!(ResourceReducer::new(EXTERNAL_IPS), external_ips, ExternalIps),
        scoped!(ResourceReducer::new(CLUSTER_TYPES), cluster_types, ClusterTypes),
        scoped!(ClusterReducer::default(), clusters, Clusters),
        scoped!(
            ResourceReducer::new(KUBERNETES_CLUSTER_TEMPLATES),
            kubernetes_cluster_templates,
            KubernetesClusterTemplates
        ),
        scoped!(KubernetesReducer::default(), kubernetes_clusters, KubernetesClusters),
    ])
}

/// Builder for [`Portal`]
pub struct PortalBuilder {
    config: PortalConfig,
    clock: Arc<dyn Clock>,
    sink: Arc<dyn NotificationSink>,
}

impl PortalBuilder {
    /// Use `clock` for collection timestamps
    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Deliver notifications to `sink`
    #[must_use]
    pub fn with_sink(mut self, sink: Arc<dyn NotificationSink>) -> Self {
        self.sink = sink;
        self
    }

    /// Start the portal over `transport`
    ///
    /// Spawns the dispatcher and the retrier, sentinel and notifier epics,
    /// then initialises the session. Must be called inside a tokio runtime.
    pub async fn start(self, transport: Arc<dyn HttpTransport>) -> Portal {
        let config = self.config;
        let dispatcher = Dispatcher::spawn(
            transport,
            DispatcherConfig::default().with_max_concurrent(config.max_concurrent_requests),
        );
        let store = Store::with_dispatcher(
            PortalState::default(),
            portal_reducer(),
            PortalEnvironment::new(self.clock, config.poll_interval()),
            dispatcher,
        );

        let tasks = [
            spawn_retrier(&store, config.retry_delay()),
            spawn_session_sentinel(&store, PortalAction::Session(SessionAction::Terminated)),
            spawn_notifier(&store, self.sink),
        ]
        .into_iter()
        .flatten()
        .collect();

        info!(
            max_concurrent = config.max_concurrent_requests,
            retry_delay_secs = config.retry_delay_secs,
            "Portal started"
        );
        store.send(PortalAction::Session(SessionAction::Initialise)).await;

        Portal { store, tasks }
    }

    /// Start the portal against `config.base_url` over HTTP
    ///
    /// # Errors
    ///
    /// Returns [`TransportSetupError`] if the base URL is invalid or the HTTP
    /// client cannot be built.
    pub async fn connect(self) -> Result<Portal, TransportSetupError> {
        let transport = ReqwestTransport::with_timeout(&self.config.base_url, self.config.request_timeout())?;
        Ok(self.start(Arc::new(transport)).await)
    }
}

/// The running engine
///
/// Lives for the whole process; dropping it stops the background epics.
pub struct Portal {
    store: PortalStore,
    tasks: Vec<JoinHandle<()>>,
}

impl Portal {
    /// Builder with the system clock and a logging notification sink
    #[must_use]
    pub fn builder(config: PortalConfig) -> PortalBuilder {
        PortalBuilder {
            config,
            clock: Arc::new(SystemClock),
            sink: Arc::new(TracingNotifier),
        }
    }

    /// The underlying store
    #[must_use]
    pub const fn store(&self) -> &PortalStore {
        &self.store
    }

    /// Send an action
    pub async fn send(&self, action: PortalAction) -> EffectHandle {
        self.store.send(action).await
    }

    /// Read the state
    pub async fn state<F, T>(&self, f: F) -> T
    where
        F: FnOnce(&PortalState) -> T,
    {
        self.store.state(f).await
    }
}

impl Drop for Portal {
    fn drop(&mut self) {
        for task in &self.tasks {
            task.abort();
        }
    }
}

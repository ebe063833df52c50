//! Kubernetes clusters, with kubeconfig generation.

use crate::resource::{
    CollectionState, Effects, Id, Item, NotFoundPolicy, ResourceAction, ResourceConfig, ResourceEnvironment,
    ResourceReducer, Scope, item_operation, status_in,
};
use cloudsync_core::api::ClassifiedError;
use cloudsync_core::{Effect, Reducer, SmallVec, smallvec};
use serde_json::Value;
use tracing::{debug, warn};

/// Per-cluster flags
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct KubernetesFlags {
    /// A kubeconfig is being generated
    pub generating_kubeconfig: bool,
    /// The last generated kubeconfig
    pub kubeconfig: Option<String>,
}

/// Kubernetes-specific operations
#[derive(Debug, Clone, PartialEq)]
pub enum KubernetesOp {
    /// Generate a kubeconfig for a cluster
    GenerateKubeconfig(Id),
    /// A kubeconfig was generated
    KubeconfigGenerated {
        /// Epoch the request was issued in
        epoch: u64,
        /// Cluster id
        id: Id,
        /// Response body, `{"kubeconfig": "..."}`
        payload: Value,
    },
    /// Kubeconfig generation failed
    KubeconfigFailed {
        /// Epoch the request was issued in
        epoch: u64,
        /// Cluster id
        id: Id,
        /// Why
        error: ClassifiedError,
    },
}

/// Kubernetes clusters
pub const KUBERNETES_CLUSTERS: ResourceConfig<KubernetesFlags> =
    ResourceConfig::new("kubernetes_clusters", Scope::Tenancy)
        .with_not_found(NotFoundPolicy::Unsupported)
        .with_is_active(kubernetes_is_active);

fn kubernetes_is_active(item: &Item<KubernetesFlags>) -> bool {
    status_in(item, &["PENDING", "RECONCILING", "DELETING"])
}

/// Kubernetes clusters reducer
#[derive(Debug, Clone)]
pub struct KubernetesReducer {
    inner: ResourceReducer<KubernetesFlags, KubernetesOp>,
}

impl Default for KubernetesReducer {
    fn default() -> Self {
        Self {
            inner: ResourceReducer::new(KUBERNETES_CLUSTERS),
        }
    }
}

impl KubernetesReducer {
    fn generate(state: &mut CollectionState<KubernetesFlags>, id: &str) -> Effects<KubernetesOp> {
        let Some(effect) = item_operation(
            state,
            id,
            "generate_kubeconfig",
            |epoch, id, payload| KubernetesOp::KubeconfigGenerated { epoch, id, payload },
            |epoch, id, error| KubernetesOp::KubeconfigFailed { epoch, id, error },
        ) else {
            return smallvec![];
        };
        debug!(%id, "Generating kubeconfig");
        if let Some(item) = state.data.get_mut(id) {
            item.flags.generating_kubeconfig = true;
            item.begin_operation();
        }
        smallvec![effect]
    }
}

impl Reducer for KubernetesReducer {
    type State = CollectionState<KubernetesFlags>;
    type Action = ResourceAction<KubernetesOp>;
    type Environment = ResourceEnvironment;

    fn reduce(
        &self,
        state: &mut Self::State,
        action: Self::Action,
        env: &Self::Environment,
    ) -> SmallVec<[Effect<Self::Action>; 4]> {
        let ResourceAction::Custom(op) = action else {
            return self.inner.reduce(state, action, env);
        };
        match op {
            KubernetesOp::GenerateKubeconfig(id) => Self::generate(state, &id),
            KubernetesOp::KubeconfigGenerated { epoch, id, payload } => {
                if !state.is_current(epoch) {
                    return smallvec![];
                }
                let Some(item) = state.data.get_mut(&id) else {
                    return smallvec![];
                };
                item.flags.generating_kubeconfig = false;
                match payload.get("kubeconfig").and_then(Value::as_str) {
                    Some(kubeconfig) => item.flags.kubeconfig = Some(kubeconfig.to_string()),
                    None => warn!(%id, "Kubeconfig response without kubeconfig"),
                }
                self.inner.fetch_one(state, id)
            },
            KubernetesOp::KubeconfigFailed { epoch, id, error } => {
                if !state.is_current(epoch) {
                    return smallvec![];
                }
                if let Some(item) = state.data.get_mut(&id) {
                    item.flags.generating_kubeconfig = false;
                    item.fail_operation(error);
                }
                smallvec![]
            },
        }
    }
}

//! Clusters, with the `patch` operation.
//!
//! Patching upgrades a cluster's packages in place. The response only tells
//! us the patch was accepted, so the cluster is re-fetched afterwards.

use crate::resource::{
    CollectionState, Effects, Id, Item, NotFoundPolicy, ResourceAction, ResourceConfig, ResourceEnvironment,
    ResourceReducer, Scope, item_operation, status_in,
};
use cloudsync_core::api::ClassifiedError;
use cloudsync_core::{Effect, Reducer, SmallVec, smallvec};
use serde_json::Value;
use tracing::debug;

/// Per-cluster flags
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ClusterFlags {
    /// A patch is in flight
    pub patching: bool,
}

/// Cluster-specific operations
#[derive(Debug, Clone, PartialEq)]
pub enum ClusterOp {
    /// Patch a cluster
    Patch(Id),
    /// The patch was accepted
    Patched {
        /// Epoch the request was issued in
        epoch: u64,
        /// Cluster id
        id: Id,
        /// Response body
        payload: Value,
    },
    /// The patch was rejected
    PatchFailed {
        /// Epoch the request was issued in
        epoch: u64,
        /// Cluster id
        id: Id,
        /// Why
        error: ClassifiedError,
    },
}

/// Clusters managed by the cluster-as-a-service backend
pub const CLUSTERS: ResourceConfig<ClusterFlags> = ResourceConfig::new("clusters", Scope::Tenancy)
    .with_not_found(NotFoundPolicy::Unsupported)
    .with_is_active(cluster_is_active);

fn cluster_is_active(item: &Item<ClusterFlags>) -> bool {
    status_in(item, &["CONFIGURING", "DELETING"])
}

/// Clusters reducer
#[derive(Debug, Clone)]
pub struct ClusterReducer {
    inner: ResourceReducer<ClusterFlags, ClusterOp>,
}

impl Default for ClusterReducer {
    fn default() -> Self {
        Self {
            inner: ResourceReducer::new(CLUSTERS),
        }
    }
}

impl ClusterReducer {
    fn patch(state: &mut CollectionState<ClusterFlags>, id: &str) -> Effects<ClusterOp> {
        let Some(effect) = item_operation(
            state,
            id,
            "patch",
            |epoch, id, payload| ClusterOp::Patched { epoch, id, payload },
            |epoch, id, error| ClusterOp::PatchFailed { epoch, id, error },
        ) else {
            return smallvec![];
        };
        debug!(%id, "Patching cluster");
        if let Some(item) = state.data.get_mut(id) {
            item.flags.patching = true;
            item.begin_operation();
        }
        smallvec![effect]
    }
}

impl Reducer for ClusterReducer {
    type State = CollectionState<ClusterFlags>;
    type Action = ResourceAction<ClusterOp>;
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
            ClusterOp::Patch(id) => Self::patch(state, &id),
            ClusterOp::Patched { epoch, id, payload } => {
                if !state.is_current(epoch) {
                    return smallvec![];
                }
                if let Some(item) = state.data.get_mut(&id) {
                    item.flags.patching = false;
                }
                self.inner.merge_into(state, &id, payload);
                self.inner.fetch_one(state, id)
            },
            ClusterOp::PatchFailed { epoch, id, error } => {
                if !state.is_current(epoch) {
                    return smallvec![];
                }
                if let Some(item) = state.data.get_mut(&id) {
                    item.flags.patching = false;
                    item.fail_operation(error);
                }
                smallvec![]
            },
        }
    }
}

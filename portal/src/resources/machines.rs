//! Machines, with power operations.

use crate::resource::{
    CollectionState, Effects, Id, Item, Payload, ResourceAction, ResourceConfig, ResourceEnvironment,
    ResourceReducer, Scope, item_operation, status_in,
};
use cloudsync_core::api::ClassifiedError;
use cloudsync_core::{Effect, Reducer, SmallVec, smallvec};
use serde_json::Value;
use tracing::debug;

/// Virtual machines
pub const MACHINES: ResourceConfig = ResourceConfig::new("machines", Scope::Tenancy)
    .with_is_active(machine_is_active)
    .with_transform(flatten_status);

/// Power operations on a machine
#[derive(Debug, Clone, PartialEq)]
pub enum MachineOp {
    /// Power the machine on
    Start(Id),
    /// Power the machine off
    Stop(Id),
    /// Reboot the machine
    Restart(Id),
    /// A power operation was accepted
    Succeeded {
        /// Epoch the request was issued in
        epoch: u64,
        /// Machine id
        id: Id,
        /// Response body
        payload: Value,
    },
    /// A power operation was rejected
    Failed {
        /// Epoch the request was issued in
        epoch: u64,
        /// Machine id
        id: Id,
        /// Why
        error: ClassifiedError,
    },
}

fn machine_is_active(item: &Item) -> bool {
    let has_task = item.str_field("task").is_some_and(|task| !task.is_empty());
    has_task || status_in(item, &["BUILD", "REBUILD", "RESIZE", "REBOOT", "HARD_REBOOT", "MIGRATING"])
}

/// `{"status": {"name": .., "type": .., "details": ..}}` becomes
/// `status`, `status_type` and `status_details` fields
fn flatten_status(mut payload: Payload) -> Payload {
    match payload.remove("status") {
        Some(Value::Object(mut status)) => {
            for (from, to) in [("name", "status"), ("type", "status_type"), ("details", "status_details")] {
                if let Some(value) = status.remove(from) {
                    payload.insert(to.to_string(), value);
                }
            }
        },
        Some(status) => {
            payload.insert("status".to_string(), status);
        },
        None => {},
    }
    payload
}

/// Machines reducer: power operations on top of the generic operations
#[derive(Debug, Clone)]
pub struct MachineReducer {
    inner: ResourceReducer<(), MachineOp>,
}

impl Default for MachineReducer {
    fn default() -> Self {
        Self {
            inner: ResourceReducer::new(MACHINES),
        }
    }
}

impl MachineReducer {
    fn power(&self, state: &mut CollectionState, id: &str, operation: &'static str) -> Effects<MachineOp> {
        let Some(effect) = item_operation(
            state,
            id,
            operation,
            |epoch, id, payload| MachineOp::Succeeded { epoch, id, payload },
            |epoch, id, error| MachineOp::Failed { epoch, id, error },
        ) else {
            return smallvec![];
        };
        debug!(%id, operation, "Machine power operation");
        if let Some(item) = state.data.get_mut(id) {
            item.updating = true;
            item.begin_operation();
        }
        smallvec![effect]
    }
}

impl Reducer for MachineReducer {
    type State = CollectionState;
    type Action = ResourceAction<MachineOp>;
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
            MachineOp::Start(id) => self.power(state, &id, "start"),
            MachineOp::Stop(id) => self.power(state, &id, "stop"),
            MachineOp::Restart(id) => self.power(state, &id, "restart"),
            MachineOp::Succeeded { epoch, id, payload } => {
                if !state.is_current(epoch) {
                    return smallvec![];
                }
                if let Some(item) = state.data.get_mut(&id) {
                    item.updating = false;
                }
                self.inner.merge_into(state, &id, payload);
                self.inner.fetch_one(state, id)
            },
            MachineOp::Failed { epoch, id, error } => {
                if !state.is_current(epoch) {
                    return smallvec![];
                }
                if let Some(item) = state.data.get_mut(&id) {
                    item.updating = false;
                    item.fail_operation(error);
                }
                smallvec![]
            },
        }
    }
}

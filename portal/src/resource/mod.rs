//! Resource store factory.
//!
//! A resource is described by a [`ResourceConfig`]: a name, an endpoint
//! scope, a 404 policy and two hooks (`is_active`, `transform`). From that
//! description [`ResourceReducer`] provides list fetch, single-item fetch,
//! create, update and delete over a [`CollectionState`], plus polling of
//! active items.
//!
//! Resources with extra operations wrap the generic reducer, handle their
//! [`ResourceAction::Custom`] actions and delegate everything else.

mod reducer;
mod types;

pub use reducer::{Effects, ResourceReducer, item_operation};
pub use types::{
    CollectionState, Id, Item, NoFlags, NoOp, NotFoundPolicy, Outcome, Payload, ResourceAction,
    ResourceConfig, ResourceEnvironment, Scope, as_payload, list_items, payload_id, status_in,
};

/// Build the reducer and initial state for a resource
#[must_use]
pub fn resource<F, X>(config: ResourceConfig<F>) -> (ResourceReducer<F, X>, CollectionState<F>)
where
    F: Default,
    X: 'static,
{
    (ResourceReducer::new(config), config.initial_state())
}

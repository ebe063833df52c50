//! The generic CRUD reducer produced for every resource.

use super::types::{
    CollectionState, Id, Item, NoFlags, NoOp, NotFoundPolicy, Outcome, ResourceAction,
    ResourceConfig, ResourceEnvironment, as_payload, list_items, payload_id,
};
use cloudsync_core::api::{ApiRequest, ClassifiedError, Method};
use cloudsync_core::{Effect, Reducer, SmallVec, smallvec};
use serde_json::Value;
use std::collections::HashMap;
use std::marker::PhantomData;
use tracing::{debug, trace, warn};

/// Effects returned by resource reducers
pub type Effects<X> = SmallVec<[Effect<ResourceAction<X>>; 4]>;

/// Build an envelope whose continuations are tagged with `epoch`
fn request<X, S, E>(method: Method, url: String, epoch: u64, on_success: S, on_failure: E) -> ApiRequest<ResourceAction<X>>
where
    X: 'static,
    S: Fn(Value) -> Outcome + Send + Sync + 'static,
    E: Fn(ClassifiedError) -> Outcome + Send + Sync + 'static,
{
    ApiRequest::new(
        method,
        url,
        move |payload| ResourceAction::Completed {
            epoch,
            outcome: on_success(payload),
        },
        move |error| ResourceAction::Completed {
            epoch,
            outcome: on_failure(error),
        },
    )
}

/// `POST {endpoint}{id}/{operation}/` for a custom item operation
///
/// Both continuations receive the epoch the request was issued in, so the
/// resource can drop outcomes that arrive after a reset. Returns `None` when
/// the collection is unbound.
pub fn item_operation<F, X, S, E>(
    state: &CollectionState<F>,
    id: &str,
    operation: &str,
    on_success: S,
    on_failure: E,
) -> Option<Effect<ResourceAction<X>>>
where
    X: 'static,
    S: Fn(u64, Id, Value) -> X + Send + Sync + 'static,
    E: Fn(u64, Id, ClassifiedError) -> X + Send + Sync + 'static,
{
    let url = format!("{}{operation}/", state.item_url(id)?);
    let epoch = state.epoch;
    let success_id = id.to_string();
    let failure_id = id.to_string();
    Some(Effect::Api(ApiRequest::new(
        Method::Post,
        url,
        move |payload| ResourceAction::Custom(on_success(epoch, success_id.clone(), payload)),
        move |error| ResourceAction::Custom(on_failure(epoch, failure_id.clone(), error)),
    )))
}

/// Generic list/fetch/create/update/delete reducer for one resource
///
/// `F` is the item flag type, `X` the custom-operation type. Custom
/// operations are ignored here; resources that have them wrap this reducer
/// and fall through to it for everything else.
pub struct ResourceReducer<F = NoFlags, X = NoOp> {
    config: ResourceConfig<F>,
    _custom: PhantomData<fn() -> X>,
}

impl<F, X> Clone for ResourceReducer<F, X> {
    fn clone(&self) -> Self {
        Self {
            config: self.config,
            _custom: PhantomData,
        }
    }
}

impl<F, X> std::fmt::Debug for ResourceReducer<F, X> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResourceReducer")
            .field("config", &self.config)
            .finish()
    }
}

impl<F, X> ResourceReducer<F, X>
where
    F: Default,
    X: 'static,
{
    /// Create the reducer for `config`
    #[must_use]
    pub const fn new(config: ResourceConfig<F>) -> Self {
        Self {
            config,
            _custom: PhantomData,
        }
    }

    /// The resource description
    #[must_use]
    pub const fn config(&self) -> &ResourceConfig<F> {
        &self.config
    }

    /// Reads of optional collections fail silently; a 404 there is expected
    fn read(&self, request: ApiRequest<ResourceAction<X>>) -> Effect<ResourceAction<X>> {
        match self.config.not_found {
            NotFoundPolicy::Error => Effect::Api(request),
            NotFoundPolicy::Unsupported => Effect::Api(request.silent()),
        }
    }

    fn fetch_list(&self, state: &mut CollectionState<F>) -> Effects<X> {
        let Some(url) = state.endpoint.clone() else {
            debug!(resource = self.config.name, "Collection not bound, ignoring list fetch");
            return smallvec![];
        };
        if state.fetching {
            trace!(resource = self.config.name, "List fetch already in flight");
            return smallvec![];
        }
        state.fetching = true;
        smallvec![self.read(request(
            Method::Get,
            url,
            state.epoch,
            Outcome::ListLoaded,
            Outcome::ListFailed,
        ))]
    }

    /// Start a single-item fetch
    ///
    /// Only known items are flagged, but the request is made either way.
    pub fn fetch_one(&self, state: &mut CollectionState<F>, id: Id) -> Effects<X> {
        let Some(url) = state.item_url(&id) else {
            debug!(resource = self.config.name, %id, "Collection not bound, ignoring fetch");
            return smallvec![];
        };
        if let Some(item) = state.data.get_mut(&id) {
            item.fetching = true;
        }
        let failed_id = id.clone();
        smallvec![self.read(request(
            Method::Get,
            url,
            state.epoch,
            move |payload| Outcome::OneLoaded(id.clone(), payload),
            move |error| Outcome::OneFailed(failed_id.clone(), error),
        ))]
    }

    fn create(&self, state: &mut CollectionState<F>, body: Value) -> Effects<X> {
        let Some(url) = state.endpoint.clone() else {
            debug!(resource = self.config.name, "Collection not bound, ignoring create");
            return smallvec![];
        };
        state.creating = true;
        state.create_error = None;
        smallvec![Effect::Api(
            request(Method::Post, url, state.epoch, Outcome::Created, Outcome::CreateFailed).with_body(body)
        )]
    }

    fn update(&self, state: &mut CollectionState<F>, id: Id, body: Value) -> Effects<X> {
        let Some(url) = state.item_url(&id) else {
            debug!(resource = self.config.name, %id, "Collection not bound, ignoring update");
            return smallvec![];
        };
        if let Some(item) = state.data.get_mut(&id) {
            item.updating = true;
            item.begin_operation();
        }
        let failed_id = id.clone();
        smallvec![Effect::Api(
            request(
                Method::Patch,
                url,
                state.epoch,
                move |payload| Outcome::Updated(id.clone(), payload),
                move |error| Outcome::UpdateFailed(failed_id.clone(), error),
            )
            .with_body(body)
        )]
    }

    fn delete(&self, state: &mut CollectionState<F>, id: Id) -> Effects<X> {
        let Some(url) = state.item_url(&id) else {
            debug!(resource = self.config.name, %id, "Collection not bound, ignoring delete");
            return smallvec![];
        };
        if let Some(item) = state.data.get_mut(&id) {
            item.deleting = true;
            item.begin_operation();
        }
        let failed_id = id.clone();
        smallvec![Effect::Api(request(
            Method::Delete,
            url,
            state.epoch,
            move |_| Outcome::Deleted(id.clone()),
            move |error| Outcome::DeleteFailed(failed_id.clone(), error),
        ))]
    }

    /// Apply the transform to a response body; `None` unless it is an object
    #[must_use]
    pub fn transform(&self, body: Value) -> Option<super::types::Payload> {
        as_payload(body).map(self.config.transform)
    }

    /// Merge a response body into a known item
    ///
    /// Returns `false` if the item is unknown or the body is not an object.
    pub fn merge_into(&self, state: &mut CollectionState<F>, id: &str, body: Value) -> bool {
        let Some(item) = state.data.get_mut(id) else {
            return false;
        };
        match self.transform(body) {
            Some(payload) => {
                item.merge(payload);
                true
            },
            None => false,
        }
    }

    /// Schedule one poll of `id` if it is active and none is pending
    pub fn schedule_poll(
        &self,
        state: &mut CollectionState<F>,
        id: &str,
        env: &ResourceEnvironment,
    ) -> Option<Effect<ResourceAction<X>>> {
        let item = state.data.get(id)?;
        if !(self.config.is_active)(item) || state.polling.contains(id) {
            return None;
        }
        state.polling.insert(id.to_string());
        trace!(resource = self.config.name, %id, "Scheduling poll");
        Some(Effect::Delay {
            duration: env.poll_interval,
            action: Box::new(ResourceAction::Poll {
                epoch: state.epoch,
                id: id.to_string(),
            }),
        })
    }

    fn list_loaded(&self, state: &mut CollectionState<F>, body: Value, env: &ResourceEnvironment) -> Effects<X> {
        let mut data = HashMap::new();
        for value in list_items(body) {
            let Some(payload) = self.transform(value) else {
                warn!(resource = self.config.name, "Ignoring non-object list entry");
                continue;
            };
            let Some(id) = payload_id(&payload) else {
                warn!(resource = self.config.name, "Ignoring list entry without id");
                continue;
            };
            if state.deleted.contains(&id) {
                trace!(resource = self.config.name, %id, "Ignoring deleted item in list");
                continue;
            }
            // Transient flags of items that are still present survive the refresh.
            let item = match state.data.remove(&id) {
                Some(mut existing) => {
                    existing.data = payload;
                    existing
                },
                None => Item::new(payload),
            };
            data.insert(id, item);
        }

        state.data = data;
        state.polling.retain(|id| state.data.contains_key(id));
        state.initialised = true;
        state.fetching = false;
        state.unsupported = false;
        state.fetch_error = None;
        state.fetched_at = Some(env.clock.now());
        debug!(resource = self.config.name, count = state.data.len(), "Collection loaded");

        let ids: Vec<Id> = state.data.keys().cloned().collect();
        ids.iter()
            .filter_map(|id| self.schedule_poll(state, id, env))
            .collect()
    }

    fn list_failed(&self, state: &mut CollectionState<F>, error: ClassifiedError) {
        state.fetching = false;
        if error.is_not_found() && self.config.not_found == NotFoundPolicy::Unsupported {
            debug!(resource = self.config.name, "Collection not supported by the backend");
            state.initialised = true;
            state.unsupported = true;
            state.data.clear();
            state.polling.clear();
            state.fetch_error = None;
        } else {
            state.fetch_error = Some(error);
        }
    }

    fn one_loaded(&self, state: &mut CollectionState<F>, id: Id, body: Value, env: &ResourceEnvironment) -> Effects<X> {
        if state.deleted.contains(&id) {
            debug!(resource = self.config.name, %id, "Dropping read of deleted item");
            return smallvec![];
        }
        let Some(payload) = self.transform(body) else {
            warn!(resource = self.config.name, %id, "Ignoring non-object item payload");
            if let Some(item) = state.data.get_mut(&id) {
                item.fetching = false;
            }
            return smallvec![];
        };
        let item = state
            .data
            .entry(id.clone())
            .or_insert_with(|| Item::new(serde_json::Map::new()));
        item.merge(payload);
        item.fetching = false;
        item.fetch_error = None;

        self.schedule_poll(state, &id, env).into_iter().collect()
    }

    fn one_failed(&self, state: &mut CollectionState<F>, id: &str, error: ClassifiedError) {
        if error.is_not_found() && self.config.not_found == NotFoundPolicy::Unsupported {
            state.data.remove(id);
            state.polling.remove(id);
            return;
        }
        if let Some(item) = state.data.get_mut(id) {
            item.fetching = false;
            item.fetch_error = Some(error);
        }
    }

    fn created(&self, state: &mut CollectionState<F>, body: Value, env: &ResourceEnvironment) -> Effects<X> {
        state.creating = false;
        state.create_error = None;

        let Some(payload) = self.transform(body) else {
            warn!(resource = self.config.name, "Create response is not an object");
            return smallvec![];
        };
        let Some(id) = payload_id(&payload) else {
            warn!(resource = self.config.name, "Create response has no id");
            return smallvec![];
        };
        state.deleted.remove(&id);
        state
            .data
            .entry(id.clone())
            .or_insert_with(|| Item::new(serde_json::Map::new()))
            .merge(payload);

        self.schedule_poll(state, &id, env).into_iter().collect()
    }

    fn updated(&self, state: &mut CollectionState<F>, id: Id, body: Value, env: &ResourceEnvironment) -> Effects<X> {
        let Some(item) = state.data.get_mut(&id) else {
            trace!(resource = self.config.name, %id, "Update of unknown item");
            return smallvec![];
        };
        item.updating = false;
        if !self.merge_into(state, &id, body) {
            warn!(resource = self.config.name, %id, "Update response is not an object");
        }
        self.schedule_poll(state, &id, env).into_iter().collect()
    }

    fn complete(&self, state: &mut CollectionState<F>, outcome: Outcome, env: &ResourceEnvironment) -> Effects<X> {
        match outcome {
            Outcome::ListLoaded(body) => self.list_loaded(state, body, env),
            Outcome::ListFailed(error) => {
                self.list_failed(state, error);
                smallvec![]
            },
            Outcome::OneLoaded(id, body) => self.one_loaded(state, id, body, env),
            Outcome::OneFailed(id, error) => {
                self.one_failed(state, &id, error);
                smallvec![]
            },
            Outcome::Created(body) => self.created(state, body, env),
            Outcome::CreateFailed(error) => {
                state.creating = false;
                state.create_error = Some(error);
                smallvec![]
            },
            Outcome::Updated(id, body) => self.updated(state, id, body, env),
            Outcome::UpdateFailed(id, error) => {
                if let Some(item) = state.data.get_mut(&id) {
                    item.updating = false;
                    item.fail_operation(error);
                }
                smallvec![]
            },
            Outcome::Deleted(id) => {
                state.data.remove(&id);
                state.polling.remove(&id);
                state.deleted.insert(id);
                smallvec![]
            },
            Outcome::DeleteFailed(id, error) => {
                if let Some(item) = state.data.get_mut(&id) {
                    item.deleting = false;
                    item.fail_operation(error);
                }
                smallvec![]
            },
        }
    }
}

impl<F, X> Reducer for ResourceReducer<F, X>
where
    F: Default,
    X: 'static,
{
    type State = CollectionState<F>;
    type Action = ResourceAction<X>;
    type Environment = ResourceEnvironment;

    fn reduce(
        &self,
        state: &mut Self::State,
        action: Self::Action,
        env: &Self::Environment,
    ) -> SmallVec<[Effect<Self::Action>; 4]> {
        match action {
            ResourceAction::FetchList => self.fetch_list(state),
            ResourceAction::FetchListIfNeeded => {
                if state.fetching || state.initialised {
                    smallvec![]
                } else {
                    self.fetch_list(state)
                }
            },
            ResourceAction::FetchOne(id) => self.fetch_one(state, id),
            ResourceAction::Create(body) => self.create(state, body),
            ResourceAction::Update(id, body) => self.update(state, id, body),
            ResourceAction::Delete(id) => self.delete(state, id),
            ResourceAction::Poll { epoch, id } => {
                if !state.is_current(epoch) {
                    return smallvec![];
                }
                state.polling.remove(&id);
                match state.data.get(&id) {
                    Some(item) if (self.config.is_active)(item) => self.fetch_one(state, id),
                    _ => smallvec![],
                }
            },
            ResourceAction::Bind(endpoint) => {
                debug!(resource = self.config.name, endpoint = ?endpoint, "Binding collection");
                state.reset(endpoint);
                smallvec![]
            },
            ResourceAction::Reset => {
                let endpoint = state.endpoint.take();
                state.reset(endpoint);
                smallvec![]
            },
            ResourceAction::Completed { epoch, outcome } => {
                if state.is_current(epoch) {
                    self.complete(state, outcome, env)
                } else {
                    debug!(resource = self.config.name, "Dropping outcome of a request issued before reset");
                    smallvec![]
                }
            },
            ResourceAction::Custom(_) => smallvec![],
        }
    }
}

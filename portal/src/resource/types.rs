//! Collection state, items and actions shared by every resource.

use chrono::{DateTime, Utc};
use cloudsync_core::api::ClassifiedError;
use cloudsync_core::environment::Clock;
use serde_json::{Map, Value};
use std::collections::{HashMap, HashSet};
use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

/// Server-assigned identifier of an item
pub type Id = String;

/// A JSON object as returned by the backend
pub type Payload = Map<String, Value>;

/// Where a resource's collection endpoint comes from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scope {
    /// A fixed endpoint, e.g. `/api/tenancies/`
    Global(&'static str),
    /// `/api/tenancies/{tenancy}/{name}/`, bound when a tenancy is selected
    Tenancy,
}

/// How a 404 is interpreted
///
/// Some backends only expose certain collections when a feature is enabled
/// and answer 404 otherwise.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotFoundPolicy {
    /// A 404 is an ordinary error
    Error,
    /// A 404 on the list means "feature not available"; on an item, "gone"
    Unsupported,
}

/// Static description of one resource
///
/// `F` is the type of the resource-specific item flags.
pub struct ResourceConfig<F = ()> {
    /// Resource name, also the last path segment of tenancy-scoped endpoints
    pub name: &'static str,
    /// Endpoint scope
    pub scope: Scope,
    /// 404 interpretation
    pub not_found: NotFoundPolicy,
    /// Whether the item is still transitioning and should be polled
    pub is_active: fn(&Item<F>) -> bool,
    /// Applied to every payload before it is stored
    pub transform: fn(Payload) -> Payload,
}

impl<F> Clone for ResourceConfig<F> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<F> Copy for ResourceConfig<F> {}

impl<F> std::fmt::Debug for ResourceConfig<F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResourceConfig")
            .field("name", &self.name)
            .field("scope", &self.scope)
            .field("not_found", &self.not_found)
            .finish_non_exhaustive()
    }
}

impl<F> ResourceConfig<F> {
    /// A resource that is never active and stores payloads as-is
    #[must_use]
    pub const fn new(name: &'static str, scope: Scope) -> Self {
        Self {
            name,
            scope,
            not_found: NotFoundPolicy::Error,
            is_active: never_active,
            transform: identity,
        }
    }

    /// Set the 404 policy
    #[must_use]
    pub const fn with_not_found(mut self, policy: NotFoundPolicy) -> Self {
        self.not_found = policy;
        self
    }

    /// Set the polling predicate
    #[must_use]
    pub const fn with_is_active(mut self, is_active: fn(&Item<F>) -> bool) -> Self {
        self.is_active = is_active;
        self
    }

    /// Set the payload transform
    #[must_use]
    pub const fn with_transform(mut self, transform: fn(Payload) -> Payload) -> Self {
        self.transform = transform;
        self
    }

    /// Endpoint for a tenancy-scoped resource under `tenancy`
    #[must_use]
    pub fn tenancy_endpoint(&self, tenancy: &str) -> String {
        format!("/api/tenancies/{tenancy}/{}/", self.name)
    }

    /// Endpoint the collection starts with
    #[must_use]
    pub const fn initial_endpoint(&self) -> Option<&'static str> {
        match self.scope {
            Scope::Global(endpoint) => Some(endpoint),
            Scope::Tenancy => None,
        }
    }

    /// Fresh collection state for this resource
    #[must_use]
    pub fn initial_state(&self) -> CollectionState<F> {
        CollectionState::new(self.initial_endpoint().map(str::to_string))
    }
}

const fn never_active<F>(_: &Item<F>) -> bool {
    false
}

const fn identity(payload: Payload) -> Payload {
    payload
}

/// Per-item flags for resources without custom operations
pub type NoFlags = ();

/// Custom-operation type for resources without custom operations
pub type NoOp = Infallible;

/// One cached item: the transformed payload plus transient flags
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Item<F = ()> {
    /// Transformed server payload
    pub data: Payload,
    /// A single-item fetch is in flight
    pub fetching: bool,
    /// An update is in flight
    pub updating: bool,
    /// A delete is in flight
    pub deleting: bool,
    /// Error of the last single-item fetch
    pub fetch_error: Option<ClassifiedError>,
    /// Error of the last failed update, delete or custom operation
    pub operation_error: Option<ClassifiedError>,
    /// Resource-specific flags
    pub flags: F,
}

impl<F: Default> Item<F> {
    /// Wrap a payload with all flags cleared
    #[must_use]
    pub fn new(data: Payload) -> Self {
        Self {
            data,
            fetching: false,
            updating: false,
            deleting: false,
            fetch_error: None,
            operation_error: None,
            flags: F::default(),
        }
    }
}

impl<F> Item<F> {
    /// Field accessor
    #[must_use]
    pub fn get(&self, field: &str) -> Option<&Value> {
        self.data.get(field)
    }

    /// String field accessor
    #[must_use]
    pub fn str_field(&self, field: &str) -> Option<&str> {
        self.data.get(field).and_then(Value::as_str)
    }

    /// Record the start of an update, delete or custom operation
    pub fn begin_operation(&mut self) {
        self.operation_error = None;
    }

    /// Record a failed update, delete or custom operation
    pub fn fail_operation(&mut self, error: ClassifiedError) {
        self.operation_error = Some(error);
    }

    /// Overlay `update` on the payload: fields in `update` win, others are kept
    pub fn merge(&mut self, update: Payload) {
        for (key, value) in update {
            self.data.insert(key, value);
        }
    }
}

/// Cached state of one server-side collection
#[derive(Debug, Clone, PartialEq)]
pub struct CollectionState<F = ()> {
    /// The first list fetch has completed
    pub initialised: bool,
    /// A list fetch is in flight
    pub fetching: bool,
    /// A create is in flight
    pub creating: bool,
    /// The backend does not offer this collection (404 under [`NotFoundPolicy::Unsupported`])
    pub unsupported: bool,
    /// Items keyed by id
    pub data: HashMap<Id, Item<F>>,
    /// Error of the last list fetch
    pub fetch_error: Option<ClassifiedError>,
    /// Error of the last create
    pub create_error: Option<ClassifiedError>,
    /// When the last list fetch succeeded
    pub fetched_at: Option<DateTime<Utc>>,
    /// Collection endpoint; `None` until a tenancy is selected
    pub endpoint: Option<String>,
    /// Incremented on every reset; outcomes of older requests are dropped
    pub epoch: u64,
    /// Items with a poll scheduled
    pub polling: HashSet<Id>,
    /// Items deleted in this epoch; late reads of them are dropped
    pub deleted: HashSet<Id>,
}

impl<F> CollectionState<F> {
    /// Empty collection at `endpoint`
    #[must_use]
    pub fn new(endpoint: Option<String>) -> Self {
        Self {
            initialised: false,
            fetching: false,
            creating: false,
            unsupported: false,
            data: HashMap::new(),
            fetch_error: None,
            create_error: None,
            fetched_at: None,
            endpoint,
            epoch: 0,
            polling: HashSet::new(),
            deleted: HashSet::new(),
        }
    }

    /// Return to the empty shape at `endpoint`, invalidating in-flight requests
    pub fn reset(&mut self, endpoint: Option<String>) {
        let epoch = self.epoch.wrapping_add(1);
        *self = Self::new(endpoint);
        self.epoch = epoch;
    }

    /// Whether an outcome tagged with `epoch` still applies
    #[must_use]
    pub const fn is_current(&self, epoch: u64) -> bool {
        self.epoch == epoch
    }

    /// Item URL, if the collection is bound
    #[must_use]
    pub fn item_url(&self, id: &str) -> Option<String> {
        self.endpoint.as_ref().map(|endpoint| format!("{endpoint}{id}/"))
    }

    /// Look up an item
    #[must_use]
    pub fn get(&self, id: &str) -> Option<&Item<F>> {
        self.data.get(id)
    }
}

impl<F> Default for CollectionState<F> {
    fn default() -> Self {
        Self::new(None)
    }
}

/// Outcome of a request issued by the generic operations
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    /// List fetch succeeded with the raw response body
    ListLoaded(Value),
    /// List fetch failed
    ListFailed(ClassifiedError),
    /// Single-item fetch succeeded
    OneLoaded(Id, Value),
    /// Single-item fetch failed
    OneFailed(Id, ClassifiedError),
    /// Create succeeded with the new item
    Created(Value),
    /// Create failed
    CreateFailed(ClassifiedError),
    /// Update succeeded with the (possibly partial) item
    Updated(Id, Value),
    /// Update failed
    UpdateFailed(Id, ClassifiedError),
    /// Delete succeeded
    Deleted(Id),
    /// Delete failed
    DeleteFailed(Id, ClassifiedError),
}

/// Actions understood by every resource
///
/// `X` carries resource-specific operations; resources without any use
/// [`NoOp`].
#[derive(Debug, Clone, PartialEq)]
pub enum ResourceAction<X = NoOp> {
    /// Fetch the whole collection (no-op while a list fetch is in flight)
    FetchList,
    /// Fetch the collection unless it is fetching or initialised
    FetchListIfNeeded,
    /// Fetch one item
    FetchOne(Id),
    /// Create an item from a JSON body
    Create(Value),
    /// Partially update an item
    Update(Id, Value),
    /// Delete an item
    Delete(Id),
    /// Scheduled re-fetch of an active item
    Poll {
        /// Epoch the poll was scheduled in
        epoch: u64,
        /// Item to poll
        id: Id,
    },
    /// Reset the collection and point it at a new endpoint (`None` unbinds)
    Bind(Option<String>),
    /// Reset the collection, keeping its endpoint
    Reset,
    /// A request finished
    Completed {
        /// Epoch the request was issued in
        epoch: u64,
        /// What happened
        outcome: Outcome,
    },
    /// Resource-specific operation
    Custom(X),
}

/// Dependencies of the resource reducers
#[derive(Clone)]
pub struct ResourceEnvironment {
    /// Time source for `fetched_at`
    pub clock: Arc<dyn Clock>,
    /// Delay between polls of an active item
    pub poll_interval: Duration,
}

impl std::fmt::Debug for ResourceEnvironment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResourceEnvironment")
            .field("poll_interval", &self.poll_interval)
            .finish_non_exhaustive()
    }
}

/// Turn a JSON value into the payload of one item
///
/// Returns `None` unless the value is an object.
#[must_use]
pub fn as_payload(value: Value) -> Option<Payload> {
    match value {
        Value::Object(map) => Some(map),
        _ => None,
    }
}

/// Extract the id of a payload (string or number `id` field)
#[must_use]
pub fn payload_id(payload: &Payload) -> Option<Id> {
    match payload.get("id")? {
        Value::String(id) => Some(id.clone()),
        Value::Number(id) => Some(id.to_string()),
        _ => None,
    }
}

/// Items of a list response: a plain array or a paginated `{ "results": [...] }`
#[must_use]
pub fn list_items(body: Value) -> Vec<Value> {
    match body {
        Value::Array(items) => items,
        Value::Object(mut map) => match map.remove("results") {
            Some(Value::Array(items)) => items,
            _ => Vec::new(),
        },
        _ => Vec::new(),
    }
}

/// `true` when the item's `status` field is one of `statuses`
#[must_use]
pub fn status_in<F>(item: &Item<F>, statuses: &[&str]) -> bool {
    item.str_field("status")
        .is_some_and(|status| statuses.iter().any(|s| s.eq_ignore_ascii_case(status)))
}

//! Session state.
//!
//! `Initialise` asks the backend who we are. Both a failed initialisation
//! and `Terminated` (sent by the session sentinel on any 401) leave the
//! anonymous state. There is no re-authentication.

use cloudsync_core::api::{ApiRequest, ClassifiedError, Method};
use cloudsync_core::{Effect, Reducer, SmallVec, smallvec};
use serde_json::Value;
use tracing::{debug, info};

/// Endpoint describing the current session
pub const SESSION_ENDPOINT: &str = "/api/session/";

/// Who is logged in
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionState {
    /// The initialisation request is in flight
    pub initialising: bool,
    /// Id of the authenticated user
    pub user_id: Option<String>,
    /// Name of the authenticated user
    pub username: Option<String>,
}

impl SessionState {
    /// Whether a user is logged in
    #[must_use]
    pub const fn is_authenticated(&self) -> bool {
        self.username.is_some()
    }

    fn clear(&mut self) {
        *self = Self::default();
    }
}

/// Session actions
#[derive(Debug, Clone, PartialEq)]
pub enum SessionAction {
    /// Load the session from the backend
    Initialise,
    /// The backend described the session
    InitialisationSucceeded(Value),
    /// The session could not be loaded (usually: not logged in)
    InitialisationFailed(ClassifiedError),
    /// The backend rejected our session
    Terminated,
}

/// Session reducer
#[derive(Debug, Clone, Copy, Default)]
pub struct SessionReducer;

impl Reducer for SessionReducer {
    type State = SessionState;
    type Action = SessionAction;
    type Environment = ();

    fn reduce(
        &self,
        state: &mut Self::State,
        action: Self::Action,
        _env: &Self::Environment,
    ) -> SmallVec<[Effect<Self::Action>; 4]> {
        match action {
            SessionAction::Initialise => {
                state.initialising = true;
                smallvec![Effect::Api(
                    ApiRequest::new(
                        Method::Get,
                        SESSION_ENDPOINT,
                        SessionAction::InitialisationSucceeded,
                        SessionAction::InitialisationFailed,
                    )
                    .silent()
                )]
            },
            SessionAction::InitialisationSucceeded(payload) => {
                state.initialising = false;
                state.user_id = match payload.get("user_id") {
                    Some(Value::String(id)) => Some(id.clone()),
                    Some(Value::Number(id)) => Some(id.to_string()),
                    _ => None,
                };
                state.username = payload.get("username").and_then(Value::as_str).map(str::to_string);
                info!(username = ?state.username, "Session initialised");
                smallvec![]
            },
            SessionAction::InitialisationFailed(error) => {
                debug!(status = error.status_code, "No session");
                state.clear();
                smallvec![]
            },
            SessionAction::Terminated => {
                state.clear();
                smallvec![]
            },
        }
    }
}

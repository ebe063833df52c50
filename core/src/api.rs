//! Action envelopes and error classification.
//!
//! An [`ApiRequest`] describes one asynchronous HTTP operation together with
//! its success and failure continuations. Reducers return it inside
//! [`Effect::Api`](crate::effect::Effect::Api); the runtime's request
//! dispatcher performs the call and feeds exactly one continuation back.
//!
//! Failures are normalised into a [`ClassifiedError`] so that downstream
//! consumers (retrier, session sentinel, notifications, reducers) can branch on
//! the status code alone.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use thiserror::Error;

/// Message used when the backend answered without a usable body, or not at all.
pub const DEFAULT_ERROR_MESSAGE: &str = "Error communicating with API server";

/// Message used when the client has lost connectivity.
pub const OFFLINE_ERROR_MESSAGE: &str = "No internet connection";

/// HTTP verbs understood by the dispatcher
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Method {
    /// `GET`
    Get,
    /// `POST`
    Post,
    /// `PATCH`
    Patch,
    /// `PUT`
    Put,
    /// `DELETE`
    Delete,
}

impl Method {
    /// Whether the verb mutates server state (and therefore carries a CSRF token)
    #[must_use]
    pub const fn is_mutating(self) -> bool {
        !matches!(self, Self::Get)
    }

    /// Upper-case verb name
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Post => "POST",
            Self::Patch => "PATCH",
            Self::Put => "PUT",
            Self::Delete => "DELETE",
        }
    }
}

impl std::fmt::Display for Method {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An error normalised to `{ message, status_code }`
///
/// `status_code` is the HTTP status of the response, or
/// [`ClassifiedError::NO_RESPONSE`] when no response was received at all.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[error("{message} (status {status_code})")]
#[serde(rename_all = "camelCase")]
pub struct ClassifiedError {
    /// Human readable message
    pub message: String,
    /// HTTP status code, or `0` when there was no response
    pub status_code: u16,
}

impl ClassifiedError {
    /// Sentinel status for "the transport produced no response"
    pub const NO_RESPONSE: u16 = 0;

    /// Create a classified error
    #[must_use]
    pub fn new(message: impl Into<String>, status_code: u16) -> Self {
        Self {
            message: message.into(),
            status_code,
        }
    }

    /// Classify a non-success HTTP response
    ///
    /// - a JSON object with a string `detail` field uses that field as the message
    /// - any other body is stringified
    /// - no body at all yields [`DEFAULT_ERROR_MESSAGE`]
    #[must_use]
    pub fn from_response(status_code: u16, body: Option<&Value>) -> Self {
        let message = match body {
            None | Some(Value::Null) => DEFAULT_ERROR_MESSAGE.to_string(),
            Some(Value::String(text)) if text.is_empty() => DEFAULT_ERROR_MESSAGE.to_string(),
            Some(Value::String(text)) => text.clone(),
            Some(body) => match body.get("detail") {
                Some(Value::String(detail)) => detail.clone(),
                _ => body.to_string(),
            },
        };
        Self::new(message, status_code)
    }

    /// The client is offline; reported as 503 so it is retried like a backend outage
    #[must_use]
    pub fn offline() -> Self {
        Self::new(OFFLINE_ERROR_MESSAGE, 503)
    }

    /// The request produced no response at all
    #[must_use]
    pub fn no_response() -> Self {
        Self::new(DEFAULT_ERROR_MESSAGE, Self::NO_RESPONSE)
    }

    /// 401: the session is gone
    #[must_use]
    pub const fn is_unauthorized(&self) -> bool {
        self.status_code == 401
    }

    /// 404
    #[must_use]
    pub const fn is_not_found(&self) -> bool {
        self.status_code == 404
    }

    /// 503: transient infrastructure failure
    #[must_use]
    pub const fn is_unavailable(&self) -> bool {
        self.status_code == 503
    }
}

type SuccessFn<A> = Arc<dyn Fn(Value) -> A + Send + Sync>;
type FailureFn<A> = Arc<dyn Fn(ClassifiedError) -> A + Send + Sync>;

/// The action envelope: one HTTP operation and its continuations
///
/// Cloning an envelope is cheap (continuations are shared), which is what lets
/// the retrier re-dispatch the original request without losing its identity.
pub struct ApiRequest<A> {
    /// HTTP verb
    pub method: Method,
    /// Path relative to the API origin, e.g. `/api/tenancies/`
    pub url: String,
    /// JSON body, if any
    pub body: Option<Value>,
    /// Failures of silent requests are never surfaced as notifications
    pub silent: bool,
    on_success: SuccessFn<A>,
    on_failure: FailureFn<A>,
}

impl<A> ApiRequest<A> {
    /// Create an envelope without a body
    pub fn new<S, F>(method: Method, url: impl Into<String>, on_success: S, on_failure: F) -> Self
    where
        S: Fn(Value) -> A + Send + Sync + 'static,
        F: Fn(ClassifiedError) -> A + Send + Sync + 'static,
    {
        Self {
            method,
            url: url.into(),
            body: None,
            silent: false,
            on_success: Arc::new(on_success),
            on_failure: Arc::new(on_failure),
        }
    }

    /// Attach a JSON body
    #[must_use]
    pub fn with_body(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }

    /// Mark the request as failing silently
    #[must_use]
    pub const fn silent(mut self) -> Self {
        self.silent = true;
        self
    }

    /// Build the success action for a decoded response body
    pub fn succeed(&self, payload: Value) -> A {
        (self.on_success)(payload)
    }

    /// Build the failure action for a classified error
    pub fn fail(&self, error: ClassifiedError) -> A {
        (self.on_failure)(error)
    }

    /// Lift the continuations into a parent action type
    #[must_use]
    pub fn map<B>(self, f: Arc<dyn Fn(A) -> B + Send + Sync>) -> ApiRequest<B>
    where
        A: 'static,
        B: 'static,
    {
        let on_success = self.on_success;
        let on_failure = self.on_failure;
        let g = Arc::clone(&f);

        ApiRequest {
            method: self.method,
            url: self.url,
            body: self.body,
            silent: self.silent,
            on_success: Arc::new(move |payload| f(on_success(payload))),
            on_failure: Arc::new(move |error| g(on_failure(error))),
        }
    }
}

impl<A> Clone for ApiRequest<A> {
    fn clone(&self) -> Self {
        Self {
            method: self.method,
            url: self.url.clone(),
            body: self.body.clone(),
            silent: self.silent,
            on_success: Arc::clone(&self.on_success),
            on_failure: Arc::clone(&self.on_failure),
        }
    }
}

impl<A> std::fmt::Debug for ApiRequest<A> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiRequest")
            .field("method", &self.method)
            .field("url", &self.url)
            .field("body", &self.body)
            .field("silent", &self.silent)
            .finish_non_exhaustive()
    }
}

/// A failure message: the classified error plus the envelope that produced it
///
/// Published by the dispatcher for every failed request, so observers can
/// correlate the error with (and re-dispatch) the original envelope.
pub struct ApiFailure<A> {
    /// The classified error
    pub error: ClassifiedError,
    /// The original envelope
    pub request: ApiRequest<A>,
}

impl<A> Clone for ApiFailure<A> {
    fn clone(&self) -> Self {
        Self {
            error: self.error.clone(),
            request: self.request.clone(),
        }
    }
}

impl<A> std::fmt::Debug for ApiFailure<A> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiFailure")
            .field("error", &self.error)
            .field("request", &self.request)
            .finish()
    }
}

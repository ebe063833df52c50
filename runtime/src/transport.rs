//! reqwest-backed HTTP transport.
//!
//! Holds the session cookie jar: the backend authenticates with a session
//! cookie and hands out the CSRF token as the `csrftoken` cookie, both of
//! which live in the jar shared with the client.

use crate::error::TransportSetupError;
use cloudsync_core::api::Method;
use cloudsync_core::transport::{
    CSRF_COOKIE, HttpRequest, HttpResponse, HttpTransport, TransportError, TransportFuture,
};
use reqwest::cookie::{CookieStore, Jar};
use reqwest::header::ACCEPT;
use reqwest::{Client, Url};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;

/// Production [`HttpTransport`]
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    client: Client,
    base_url: Url,
    jar: Arc<Jar>,
}

impl ReqwestTransport {
    /// Create a transport for the API origin `base_url`
    ///
    /// # Errors
    ///
    /// Returns [`TransportSetupError`] if `base_url` is not an absolute URL or
    /// the client cannot be built.
    pub fn new(base_url: &str) -> Result<Self, TransportSetupError> {
        Self::with_timeout(base_url, None)
    }

    /// Create a transport with a per-request timeout
    ///
    /// # Errors
    ///
    /// See [`ReqwestTransport::new`].
    pub fn with_timeout(
        base_url: &str,
        timeout: Option<Duration>,
    ) -> Result<Self, TransportSetupError> {
        let base_url = Url::parse(base_url).map_err(|e| TransportSetupError::InvalidBaseUrl {
            url: base_url.to_string(),
            reason: e.to_string(),
        })?;

        let jar = Arc::new(Jar::default());
        let mut builder = Client::builder().cookie_provider(Arc::clone(&jar));
        if let Some(timeout) = timeout {
            builder = builder.timeout(timeout);
        }

        Ok(Self {
            client: builder.build()?,
            base_url,
            jar,
        })
    }

    /// The API origin
    #[must_use]
    pub const fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Store a cookie as if the origin had set it
    ///
    /// Used when the session cookie is obtained out of band (e.g. from a
    /// login flow that is not part of this engine).
    pub fn add_cookie(&self, cookie: &str) {
        self.jar.add_cookie_str(cookie, &self.base_url);
    }
}

const fn to_reqwest(method: Method) -> reqwest::Method {
    match method {
        Method::Get => reqwest::Method::GET,
        Method::Post => reqwest::Method::POST,
        Method::Patch => reqwest::Method::PATCH,
        Method::Put => reqwest::Method::PUT,
        Method::Delete => reqwest::Method::DELETE,
    }
}

fn classify(error: &reqwest::Error) -> TransportError {
    if error.is_connect() {
        TransportError::Offline(error.to_string())
    } else {
        TransportError::NoResponse(error.to_string())
    }
}

/// Decode a response body: JSON when it parses, text otherwise, `None` when empty
fn decode_body(text: String) -> Option<Value> {
    if text.trim().is_empty() {
        return None;
    }
    Some(serde_json::from_str(&text).unwrap_or(Value::String(text)))
}

/// Find a cookie value in a `Cookie` header (`a=1; b=2`)
fn cookie_value(header: &str, name: &str) -> Option<String> {
    header.split(';').find_map(|pair| {
        let (key, value) = pair.trim().split_once('=')?;
        (key == name).then(|| value.to_string())
    })
}

impl HttpTransport for ReqwestTransport {
    fn execute(&self, request: HttpRequest) -> TransportFuture<'_> {
        Box::pin(async move {
            let url = self
                .base_url
                .join(&request.url)
                .map_err(|e| TransportError::NoResponse(format!("invalid url '{}': {e}", request.url)))?;

            let mut builder = self
                .client
                .request(to_reqwest(request.method), url)
                .header(ACCEPT, "application/json");
            for (name, value) in &request.headers {
                builder = builder.header(name.as_str(), value.as_str());
            }
            if let Some(body) = &request.body {
                builder = builder.json(body);
            }

            let response = builder.send().await.map_err(|e| classify(&e))?;
            let status = response.status().as_u16();
            let text = response.text().await.map_err(|e| classify(&e))?;

            Ok(HttpResponse::new(status, decode_body(text)))
        })
    }

    fn csrf_token(&self) -> Option<String> {
        let header = self.jar.cookies(&self.base_url)?;
        cookie_value(header.to_str().ok()?, CSRF_COOKIE)
    }
}

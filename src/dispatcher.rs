use crate::errors::ApiError;
use crate::oauth::OAuthSession;
use crate::token::TokenState;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE};
use reqwest::{Method, StatusCode};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use url::Url;

/// Version segment of every resource path.
pub const API_VERSION: u8 = 4;

/// Result of one HTTP attempt that did not fail outright.
enum Outcome {
    Success(Value),
    Unauthorized(Value),
}

/// Issues calls against `{origin}/api/v4/{path}` for one entity service.
///
/// A dispatcher holds the session, not a token. Every call reads the token that
/// is current at that moment, so a rotation done through one dispatcher is seen
/// by all others on their next call.
#[derive(Clone)]
pub struct RequestDispatcher {
    session: Arc<OAuthSession>,
    timeout: Option<Duration>,
}

impl RequestDispatcher {
    pub fn new(session: Arc<OAuthSession>) -> Self {
        Self {
            session,
            timeout: None,
        }
    }

    /// Overrides the client-wide request timeout for calls made through this dispatcher.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn set_timeout(&mut self, timeout: Duration) {
        self.timeout = Some(timeout);
    }

    pub fn session(&self) -> &Arc<OAuthSession> {
        &self.session
    }

    pub fn endpoint(&self, path: &str) -> Result<Url, ApiError> {
        let relative = format!("api/v{}/{}", API_VERSION, path.trim_start_matches('/'));
        self.session
            .origin()?
            .join(&relative)
            .map_err(|e| {
                ApiError::MissingConfiguration(format!("Invalid resource path '{}': {}", path, e))
            })
    }

    pub async fn get(&self, path: &str, query: &[(String, String)]) -> Result<Value, ApiError> {
        self.send(Method::GET, path, query, None).await
    }

    pub async fn post(&self, path: &str, body: &Value) -> Result<Value, ApiError> {
        self.send(Method::POST, path, &[], Some(body)).await
    }

    pub async fn patch(&self, path: &str, body: &Value) -> Result<Value, ApiError> {
        self.send(Method::PATCH, path, &[], Some(body)).await
    }

    pub async fn delete(&self, path: &str) -> Result<Value, ApiError> {
        self.send(Method::DELETE, path, &[], None).await
    }

    /// Performs one logical call, refreshing the token at most once.
    ///
    /// An already-expired token is refreshed before the first attempt; a 401 on
    /// the first attempt triggers the refresh instead. Either way there are never
    /// more than two attempts, and a 401 after a refresh is terminal.
    pub async fn send(
        &self,
        method: Method,
        path: &str,
        query: &[(String, String)],
        body: Option<&Value>,
    ) -> Result<Value, ApiError> {
        let url = self.endpoint(path)?;

        let mut token = self.session.access_token().ok_or_else(|| {
            ApiError::MissingConfiguration(
                "access token is not set; call set_access_token or exchange an authorization code"
                    .to_string(),
            )
        })?;

        let mut refreshed = false;
        if token.is_expired() {
            tracing::debug!("Access token expired before {} {}, refreshing", method, path);
            token = self.session.refresh(&token).await?;
            refreshed = true;
        }

        let payload = match self.attempt(&method, &url, query, body, &token).await? {
            Outcome::Success(value) => return Ok(value),
            Outcome::Unauthorized(payload) => payload,
        };

        if refreshed {
            tracing::warn!("{} {} rejected with a freshly refreshed token", method, path);
            return Err(ApiError::AuthExchange(format!(
                "request rejected after token refresh: {}",
                payload
            )));
        }

        tracing::warn!("{} {} returned 401, refreshing access token", method, path);
        token = self.session.refresh(&token).await?;

        match self.attempt(&method, &url, query, body, &token).await? {
            Outcome::Success(value) => Ok(value),
            Outcome::Unauthorized(payload) => {
                tracing::warn!("{} {} rejected again after token refresh", method, path);
                Err(ApiError::AuthExchange(format!(
                    "request rejected after token refresh: {}",
                    payload
                )))
            }
        }
    }

    async fn attempt(
        &self,
        method: &Method,
        url: &Url,
        query: &[(String, String)],
        body: Option<&Value>,
        token: &TokenState,
    ) -> Result<Outcome, ApiError> {
        let mut request = self
            .session
            .http()
            .request(method.clone(), url.clone())
            .header(AUTHORIZATION, token.authorization_header())
            .header(CONTENT_TYPE, "application/json");

        if !query.is_empty() {
            request = request.query(query);
        }
        if let Some(body) = body {
            request = request.json(body);
        }
        if let Some(timeout) = self.timeout {
            request = request.timeout(timeout);
        }

        let response = request.send().await.map_err(|e| {
            tracing::warn!("{} {} failed: {}", method, url.path(), e);
            ApiError::from(e)
        })?;

        let status = response.status();
        let bytes = response.bytes().await.map_err(ApiError::from)?;
        tracing::debug!("{} {} -> {}", method, url.path(), status);

        if status == StatusCode::UNAUTHORIZED {
            return Ok(Outcome::Unauthorized(error_payload(&bytes)));
        }

        if !status.is_success() {
            return Err(ApiError::ApiRequest {
                status: status.as_u16(),
                payload: error_payload(&bytes),
            });
        }

        if status == StatusCode::NO_CONTENT || bytes.is_empty() {
            return Ok(Outcome::Success(Value::Null));
        }

        serde_json::from_slice(&bytes)
            .map(Outcome::Success)
            .map_err(|e| ApiError::Network(format!("malformed response body: {}", e)))
    }
}

/// Error bodies are JSON problem documents most of the time, but proxies in
/// front of the API answer with plain text.
fn error_payload(bytes: &[u8]) -> Value {
    serde_json::from_slice(bytes)
        .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(bytes).into_owned()))
}

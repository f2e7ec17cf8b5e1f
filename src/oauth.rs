//! OAuth2 session for one amoCRM account.
//!
//! The session owns the tenant domain, the client credentials and the current
//! [`TokenState`]. It performs the two token-endpoint exchanges
//! (`authorization_code` and `refresh_token`) and notifies the registered
//! callback whenever a refresh rotates the token.
//!
//! Refreshes are single-flight: callers that detect the same expired token
//! queue on one async mutex, and only the first performs the exchange. The
//! others find the token already rotated and reuse it.

use crate::config::Config;
use crate::domain::{TenantDomain, DEFAULT_TOP_LEVEL_SUFFIX, PROVIDER_DOMAIN};
use crate::errors::ApiError;
use crate::token::{TokenResponse, TokenState};
use chrono::Utc;
use serde_json::{json, Value};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use url::Url;

/// Handler receiving every rotated token so the host application can persist it.
pub type RefreshCallback = Arc<dyn Fn(&TokenState) + Send + Sync>;

const TOKEN_PATH: &str = "oauth2/access_token";

/// How the consent page hands the authorization code back.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AuthorizationMode {
    /// Redirect the popup's opener via `window.postMessage`.
    #[default]
    PostMessage,
    /// Redirect inside the popup itself.
    Popup,
}

impl AuthorizationMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuthorizationMode::PostMessage => "post_message",
            AuthorizationMode::Popup => "popup",
        }
    }
}

/// Tenant domain as the caller supplied it, next to its parsed form.
#[derive(Clone)]
struct AccountDomain {
    raw: String,
    parsed: TenantDomain,
}

pub struct OAuthSession {
    client_id: String,
    client_secret: String,
    redirect_uri: String,
    http: reqwest::Client,
    base_url_override: Option<Url>,
    domain: RwLock<Option<AccountDomain>>,
    token: RwLock<Option<Arc<TokenState>>>,
    refresh_callback: RwLock<Option<RefreshCallback>>,
    refresh_guard: tokio::sync::Mutex<()>,
}

impl OAuthSession {
    /// Creates a session with default timeouts and no base domain.
    pub fn new(
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
        redirect_uri: impl Into<String>,
    ) -> Result<Self, ApiError> {
        Self::from_config(&Config::new(client_id, client_secret, redirect_uri))
    }

    pub fn from_config(config: &Config) -> Result<Self, ApiError> {
        let http = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .connect_timeout(config.connect_timeout)
            .user_agent(config.user_agent.as_str())
            .build()
            .map_err(|e| ApiError::Network(format!("Failed to create HTTP client: {}", e)))?;

        let base_url_override = config
            .base_url_override
            .as_deref()
            .map(parse_origin)
            .transpose()?;

        let session = Self {
            client_id: config.client_id.clone(),
            client_secret: config.client_secret.clone(),
            redirect_uri: config.redirect_uri.clone(),
            http,
            base_url_override,
            domain: RwLock::new(None),
            token: RwLock::new(None),
            refresh_callback: RwLock::new(None),
            refresh_guard: tokio::sync::Mutex::new(()),
        };

        if let Some(ref domain) = config.base_domain {
            session.set_base_domain(domain)?;
        }

        Ok(session)
    }

    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    pub fn redirect_uri(&self) -> &str {
        &self.redirect_uri
    }

    pub(crate) fn http(&self) -> &reqwest::Client {
        &self.http
    }

    /// Records the tenant host used for the token endpoint and resource endpoints.
    /// Calling it again overwrites the previous value.
    pub fn set_base_domain(&self, domain: &str) -> Result<(), ApiError> {
        let parsed = TenantDomain::parse(domain)?;
        tracing::debug!("Account base domain set to {}", parsed);
        *write(&self.domain) = Some(AccountDomain {
            raw: domain.to_string(),
            parsed,
        });
        Ok(())
    }

    pub fn base_domain(&self) -> Option<TenantDomain> {
        read(&self.domain).as_ref().map(|d| d.parsed.clone())
    }

    /// The domain exactly as it was last passed to [`set_base_domain`](Self::set_base_domain).
    pub fn account_base_domain(&self) -> Option<String> {
        read(&self.domain).as_ref().map(|d| d.raw.clone())
    }

    pub fn set_access_token_refresh_callback<F>(&self, callback: F)
    where
        F: Fn(&TokenState) + Send + Sync + 'static,
    {
        *write(&self.refresh_callback) = Some(Arc::new(callback));
    }

    /// Installs a token obtained elsewhere (usually loaded from storage).
    /// The refresh callback is not invoked for it.
    pub fn set_access_token(&self, token: TokenState) {
        *write(&self.token) = Some(Arc::new(token));
    }

    /// Snapshot of the current token.
    pub fn access_token(&self) -> Option<Arc<TokenState>> {
        read(&self.token).clone()
    }

    /// Origin every endpoint is resolved against.
    pub fn origin(&self) -> Result<Url, ApiError> {
        let domain = self.base_domain().ok_or_else(|| {
            ApiError::MissingConfiguration(
                "account base domain is not set; call set_account_base_domain first".to_string(),
            )
        })?;

        match self.base_url_override {
            Some(ref url) => Ok(url.clone()),
            None => parse_origin(&domain.base_url()),
        }
    }

    pub fn token_endpoint(&self) -> Result<Url, ApiError> {
        self.origin()?
            .join(TOKEN_PATH)
            .map_err(|e| ApiError::MissingConfiguration(format!("Invalid token endpoint: {}", e)))
    }

    /// Consent page URL that starts the authorization-code flow.
    pub fn authorization_url(
        &self,
        state: &str,
        mode: AuthorizationMode,
    ) -> Result<String, ApiError> {
        let tld = self
            .base_domain()
            .map(|d| d.top_level_suffix)
            .unwrap_or_else(|| DEFAULT_TOP_LEVEL_SUFFIX.to_string());

        let url = Url::parse_with_params(
            &format!("https://www.{}.{}/oauth", PROVIDER_DOMAIN, tld),
            &[
                ("client_id", self.client_id.as_str()),
                ("state", state),
                ("mode", mode.as_str()),
            ],
        )
        .map_err(|e| {
            ApiError::MissingConfiguration(format!("Failed to build authorization URL: {}", e))
        })?;

        Ok(url.into())
    }

    /// Exchanges an authorization code for the first token pair and installs it.
    pub async fn exchange_authorization_code(&self, code: &str) -> Result<TokenState, ApiError> {
        let issued_at = Utc::now();
        let response = self
            .request_token(json!({
                "grant_type": "authorization_code",
                "code": code,
            }))
            .await?;

        let token = TokenState::from_response(response, issued_at)?;
        self.set_access_token(token.clone());

        tracing::info!(
            "✓ Authorization code exchanged, token expires at {}",
            token.expires_at
        );
        Ok(token)
    }

    /// Rotates `stale` using its refresh token.
    ///
    /// If another caller already replaced `stale` while this one waited for the
    /// guard, the current token is returned and no exchange happens. On a real
    /// rotation the new token becomes current first, then the callback runs,
    /// then this returns.
    pub async fn refresh(&self, stale: &TokenState) -> Result<Arc<TokenState>, ApiError> {
        let _singleflight = self.refresh_guard.lock().await;

        // The stored refresh token wins over the caller's snapshot: it may have
        // been replaced through set_access_token without a new access token.
        let refresh_token = match self.access_token() {
            Some(current) if current.access_token != stale.access_token => {
                tracing::debug!("Access token already rotated by a concurrent caller");
                return Ok(current);
            }
            Some(current) => current.refresh_token.clone(),
            None => stale.refresh_token.clone(),
        };

        tracing::info!("Refreshing access token");
        let issued_at = Utc::now();
        let response = self
            .request_token(json!({
                "grant_type": "refresh_token",
                "refresh_token": refresh_token,
            }))
            .await
            .map_err(|e| {
                tracing::warn!("Access token refresh failed: {}", e);
                e
            })?;

        let rotated = Arc::new(TokenState::from_response(response, issued_at).map_err(|e| {
            tracing::warn!("Access token refresh failed: {}", e);
            e
        })?);
        *write(&self.token) = Some(rotated.clone());

        let callback = read(&self.refresh_callback).clone();
        if let Some(callback) = callback {
            callback(rotated.as_ref());
        }

        tracing::info!(
            "✓ Access token refreshed, expires at {}",
            rotated.expires_at
        );
        Ok(rotated)
    }

    async fn request_token(&self, grant: Value) -> Result<TokenResponse, ApiError> {
        let url = self.token_endpoint()?;

        let mut body = json!({
            "client_id": self.client_id,
            "client_secret": self.client_secret,
            "redirect_uri": self.redirect_uri,
        });
        if let (Some(body), Value::Object(grant)) = (body.as_object_mut(), grant) {
            body.extend(grant);
        }

        let response = self
            .http
            .post(url)
            .json(&body)
            .send()
            .await
            .map_err(ApiError::from)?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(ApiError::AuthExchange(format!(
                "token endpoint returned {}: {}",
                status, error_text
            )));
        }

        response
            .json::<TokenResponse>()
            .await
            .map_err(|e| ApiError::AuthExchange(format!("invalid token response: {}", e)))
    }
}

fn parse_origin(raw: &str) -> Result<Url, ApiError> {
    let mut url = Url::parse(raw)
        .map_err(|e| ApiError::MissingConfiguration(format!("Invalid base URL '{}': {}", raw, e)))?;
    if !url.path().ends_with('/') {
        let path = format!("{}/", url.path());
        url.set_path(&path);
    }
    Ok(url)
}

fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session() -> OAuthSession {
        OAuthSession::new("client-id", "secret", "https://example.com/callback").unwrap()
    }

    #[test]
    fn test_token_endpoint_requires_domain() {
        let session = session();
        assert!(matches!(
            session.token_endpoint(),
            Err(ApiError::MissingConfiguration(_))
        ));

        session.set_base_domain("example.amocrm.ru").unwrap();
        assert_eq!(
            session.token_endpoint().unwrap().as_str(),
            "https://example.amocrm.ru/oauth2/access_token"
        );
    }

    #[test]
    fn test_set_base_domain_overwrites() {
        let session = session();
        session.set_base_domain("first").unwrap();
        session.set_base_domain("second").unwrap();
        assert_eq!(session.base_domain().unwrap().subdomain, "second");
        assert_eq!(session.account_base_domain().as_deref(), Some("second"));
    }

    #[test]
    fn test_override_keeps_domain_requirement() {
        let config = Config::new("id", "secret", "https://example.com/cb")
            .with_base_url_override("http://127.0.0.1:8080");
        let session = OAuthSession::from_config(&config).unwrap();
        assert!(session.origin().is_err());

        session.set_base_domain("example").unwrap();
        assert_eq!(session.origin().unwrap().as_str(), "http://127.0.0.1:8080/");
    }

    #[test]
    fn test_authorization_url() {
        let session = session();
        session.set_base_domain("example.amocrm.ru").unwrap();
        let url = session
            .authorization_url("xyz", AuthorizationMode::Popup)
            .unwrap();
        assert_eq!(
            url,
            "https://www.amocrm.ru/oauth?client_id=client-id&state=xyz&mode=popup"
        );
    }
}

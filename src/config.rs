use std::time::Duration;

pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(20);
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
pub const DEFAULT_USER_AGENT: &str = "amoCRM-API-Library/1.0";

#[derive(Debug, Clone)]
pub struct Config {
    pub client_id: String,
    pub client_secret: String,
    pub redirect_uri: String,
    pub base_domain: Option<String>,
    /// Fixed origin for token and resource endpoints (proxies, sandboxes).
    pub base_url_override: Option<String>,
    pub request_timeout: Duration,
    pub connect_timeout: Duration,
    pub user_agent: String,
}

impl Config {
    pub fn new(
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
        redirect_uri: impl Into<String>,
    ) -> Self {
        Self {
            client_id: client_id.into(),
            client_secret: client_secret.into(),
            redirect_uri: redirect_uri.into(),
            base_domain: None,
            base_url_override: None,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            user_agent: DEFAULT_USER_AGENT.to_string(),
        }
    }

    pub fn with_base_domain(mut self, domain: impl Into<String>) -> Self {
        self.base_domain = Some(domain.into());
        self
    }

    pub fn with_base_url_override(mut self, base_url: impl Into<String>) -> Self {
        self.base_url_override = Some(base_url.into());
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        let config = Self {
            client_id: required_var("AMOCRM_CLIENT_ID")?,
            client_secret: required_var("AMOCRM_CLIENT_SECRET")?,
            redirect_uri: required_var("AMOCRM_REDIRECT_URI").and_then(|uri| {
                if !uri.starts_with("http://") && !uri.starts_with("https://") {
                    anyhow::bail!("AMOCRM_REDIRECT_URI must start with http:// or https://");
                }
                Ok(uri)
            })?,
            base_domain: std::env::var("AMOCRM_BASE_DOMAIN")
                .ok()
                .filter(|s| !s.trim().is_empty()),
            base_url_override: std::env::var("AMOCRM_BASE_URL")
                .ok()
                .filter(|s| !s.trim().is_empty())
                .map(|url| {
                    if !url.starts_with("http://") && !url.starts_with("https://") {
                        anyhow::bail!("AMOCRM_BASE_URL must start with http:// or https://");
                    }
                    Ok(url)
                })
                .transpose()?,
            request_timeout: seconds_var("AMOCRM_REQUEST_TIMEOUT_SECS", DEFAULT_REQUEST_TIMEOUT)?,
            connect_timeout: seconds_var("AMOCRM_CONNECT_TIMEOUT_SECS", DEFAULT_CONNECT_TIMEOUT)?,
            user_agent: DEFAULT_USER_AGENT.to_string(),
        };

        // Log successful configuration load (without sensitive values)
        tracing::info!("Configuration loaded successfully");
        tracing::debug!("Client ID: {}", config.client_id);
        tracing::debug!("Redirect URI: {}", config.redirect_uri);
        if let Some(ref domain) = config.base_domain {
            tracing::debug!("Account base domain: {}", domain);
        }
        if let Some(ref base_url) = config.base_url_override {
            tracing::info!("Base URL override configured: {}", base_url);
        }
        tracing::debug!(
            "Timeouts: request {:?}, connect {:?}",
            config.request_timeout,
            config.connect_timeout
        );

        Ok(config)
    }
}

fn required_var(name: &str) -> anyhow::Result<String> {
    std::env::var(name)
        .map_err(|_| anyhow::anyhow!("{} environment variable required", name))
        .and_then(|value| {
            if value.trim().is_empty() {
                anyhow::bail!("{} cannot be empty", name);
            }
            Ok(value)
        })
}

fn seconds_var(name: &str, default: Duration) -> anyhow::Result<Duration> {
    match std::env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse::<u64>()
            .ok()
            .filter(|secs| *secs > 0)
            .map(Duration::from_secs)
            .ok_or_else(|| anyhow::anyhow!("{} must be a positive number of seconds", name)),
        Err(_) => Ok(default),
    }
}

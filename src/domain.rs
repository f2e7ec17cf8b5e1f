use crate::errors::ApiError;
use std::fmt;

/// Provider name in the middle of every tenant host.
pub const PROVIDER_DOMAIN: &str = "amocrm";

/// Top-level suffix used when the caller passes a bare subdomain.
pub const DEFAULT_TOP_LEVEL_SUFFIX: &str = "com";

/// A single CRM account's host: `{subdomain}.amocrm.{top_level_suffix}`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TenantDomain {
    pub subdomain: String,
    pub top_level_suffix: String,
}

impl TenantDomain {
    pub fn new(subdomain: impl Into<String>, top_level_suffix: impl Into<String>) -> Self {
        Self {
            subdomain: subdomain.into(),
            top_level_suffix: top_level_suffix.into(),
        }
    }

    /// Parses either a bare subdomain (`"example"`) or a full account host
    /// (`"example.amocrm.ru"`, optionally with scheme and trailing slash).
    pub fn parse(input: &str) -> Result<Self, ApiError> {
        let trimmed = input.trim();
        let host = trimmed
            .strip_prefix("https://")
            .or_else(|| trimmed.strip_prefix("http://"))
            .unwrap_or(trimmed)
            .trim_end_matches('/');

        if host.is_empty() {
            return Err(ApiError::MissingConfiguration(
                "account base domain is empty".to_string(),
            ));
        }

        let labels: Vec<&str> = host.split('.').collect();
        let domain = match labels.as_slice() {
            [subdomain] => Self::new(*subdomain, DEFAULT_TOP_LEVEL_SUFFIX),
            [subdomain, provider, tld] if provider.eq_ignore_ascii_case(PROVIDER_DOMAIN) => {
                Self::new(*subdomain, *tld)
            }
            _ => {
                return Err(ApiError::MissingConfiguration(format!(
                    "account base domain '{}' does not match {{subdomain}}.{}.{{tld}}",
                    input, PROVIDER_DOMAIN
                )))
            }
        };

        if !is_valid_label(&domain.subdomain) || !is_valid_label(&domain.top_level_suffix) {
            return Err(ApiError::MissingConfiguration(format!(
                "account base domain '{}' is malformed",
                input
            )));
        }

        Ok(Self {
            subdomain: domain.subdomain.to_ascii_lowercase(),
            top_level_suffix: domain.top_level_suffix.to_ascii_lowercase(),
        })
    }

    pub fn host(&self) -> String {
        format!(
            "{}.{}.{}",
            self.subdomain, PROVIDER_DOMAIN, self.top_level_suffix
        )
    }

    /// Origin of the account, with trailing slash so relative joins keep the host.
    pub fn base_url(&self) -> String {
        format!("https://{}/", self.host())
    }
}

impl fmt::Display for TenantDomain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.host())
    }
}

fn is_valid_label(label: &str) -> bool {
    !label.is_empty()
        && !label.starts_with('-')
        && !label.ends_with('-')
        && label.chars().all(|c| c.is_ascii_alphanumeric() || c == '-')
}

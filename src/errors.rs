use serde_json::Value;
use std::fmt;

/// Errors surfaced by the client, its dispatcher and the entity services.
#[derive(Debug, Clone)]
pub enum ApiError {
    /// Required setup (base domain, credentials, access token) is absent.
    MissingConfiguration(String),
    /// An entity-type scope outside the accepted enumeration.
    InvalidEntityType(String),
    /// Token issuance or refresh failed at the provider. The caller has to
    /// re-authenticate with a fresh authorization code.
    AuthExchange(String),
    /// Non-2xx, non-authentication response from a resource endpoint.
    ApiRequest {
        /// HTTP status code.
        status: u16,
        /// Parsed error body (a JSON string when the body was not JSON).
        payload: Value,
    },
    /// Transport failure: timeout, refused connection, malformed response.
    Network(String),
    /// Error with context chain added by an entity service.
    WithContext {
        /// The underlying source of the error.
        source: Box<ApiError>,
        /// Additional context message.
        context: String,
    },
}

impl ApiError {
    /// Returns the innermost error, skipping any context wrappers.
    pub fn root(&self) -> &ApiError {
        match self {
            ApiError::WithContext { source, .. } => source.root(),
            other => other,
        }
    }

    /// True when the caller must run the authorization-code flow again.
    pub fn is_auth_failure(&self) -> bool {
        matches!(self.root(), ApiError::AuthExchange(_))
    }

    /// Only transport failures are worth retrying, and only by the caller.
    pub fn is_retryable(&self) -> bool {
        matches!(self.root(), ApiError::Network(_))
    }

    /// Status code of an API request failure, if that is what this is.
    pub fn status(&self) -> Option<u16> {
        match self.root() {
            ApiError::ApiRequest { status, .. } => Some(*status),
            _ => None,
        }
    }
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ApiError::MissingConfiguration(msg) => write!(f, "Missing configuration: {}", msg),
            ApiError::InvalidEntityType(value) => write!(f, "Invalid entity type: {}", value),
            ApiError::AuthExchange(msg) => write!(f, "Auth exchange error: {}", msg),
            ApiError::ApiRequest { status, payload } => {
                write!(f, "API request failed with status {}: {}", status, payload)
            }
            ApiError::Network(msg) => write!(f, "Network error: {}", msg),
            ApiError::WithContext { source, context } => write!(f, "{}: {}", context, source),
        }
    }
}

impl std::error::Error for ApiError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ApiError::WithContext { source, .. } => Some(source.as_ref()),
            _ => None,
        }
    }
}

impl From<reqwest::Error> for ApiError {
    /// Converts a `reqwest::Error` into an `ApiError`.
    ///
    /// Every reqwest failure is transport-level from our point of view; status
    /// handling happens before a response body is touched.
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            ApiError::Network(format!("request timed out: {}", err))
        } else if err.is_decode() {
            ApiError::Network(format!("malformed response: {}", err))
        } else {
            ApiError::Network(err.to_string())
        }
    }
}

/// Extension trait for adding context to errors.
/// Similar to `anyhow::Context` but for our `ApiError` type.
pub trait ResultExt<T> {
    /// Add context to an error.
    fn context(self, context: impl Into<String>) -> Result<T, ApiError>;

    /// Add context lazily (only evaluated on error).
    fn with_context<F>(self, f: F) -> Result<T, ApiError>
    where
        F: FnOnce() -> String;
}

impl<T> ResultExt<T> for Result<T, ApiError> {
    fn context(self, context: impl Into<String>) -> Result<T, ApiError> {
        self.map_err(|e| ApiError::WithContext {
            source: Box::new(e),
            context: context.into(),
        })
    }

    fn with_context<F>(self, f: F) -> Result<T, ApiError>
    where
        F: FnOnce() -> String,
    {
        self.map_err(|e| ApiError::WithContext {
            source: Box::new(e),
            context: f(),
        })
    }
}

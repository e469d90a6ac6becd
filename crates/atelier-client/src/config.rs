use std::time::Duration;

use url::Url;

use crate::{error::ClientError, retry::RetryPolicy};

/// Default per-request timeout.
/// 30s allows for slow command responses while still failing fast.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Default lifetime of a password-derived credential. The service invalidates
/// idle sessions after roughly half an hour; refreshing just under that keeps
/// a cached token from going stale mid-request.
pub const DEFAULT_CREDENTIAL_TTL: Duration = Duration::from_secs(30 * 60);

/// Default number of re-authentication retries after a 401/403.
pub const DEFAULT_MAX_AUTH_RETRIES: u32 = 3;

pub const DEFAULT_USER_AGENT: &str =
    concat!("atelier-client/", env!("CARGO_PKG_VERSION"));

/// How the client authenticates against the service.
#[derive(Debug, Clone)]
pub enum AuthCredentials {
    /// A pre-issued token, supplied once and never exchanged or expired.
    AccessToken(String),
    /// Login credentials for the password exchange; the resulting token
    /// expires after [`ClientConfig::credential_ttl`].
    Password { email: String, password: String },
}

/// Configuration for the transport layer.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Base URL of the service API, e.g. `https://design.example.com/api`.
    pub base_url: Url,

    /// Access token or login credentials.
    pub credentials: AuthCredentials,

    /// Overall timeout applied to every HTTP request.
    pub request_timeout: Duration,

    /// Lifetime of a password-derived credential before it is re-exchanged.
    pub credential_ttl: Duration,

    /// Maximum re-authentication attempts after a credential rejection.
    pub max_auth_retries: u32,

    /// Backoff policy exposed to callers that retry whole operations.
    pub retry: RetryPolicy,

    /// When true, request/response body previews are logged at debug level.
    pub verbose_logging: bool,
}

impl ClientConfig {
    pub fn new(base_url: Url, credentials: AuthCredentials) -> Self {
        Self {
            base_url,
            credentials,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            credential_ttl: DEFAULT_CREDENTIAL_TTL,
            max_auth_retries: DEFAULT_MAX_AUTH_RETRIES,
            retry: RetryPolicy::default(),
            verbose_logging: false,
        }
    }

    /// Create a configuration from environment variables.
    ///
    /// Environment variables:
    /// - `ATELIER_BASE_URL`: base URL of the service API (required)
    /// - `ATELIER_ACCESS_TOKEN`: pre-issued access token
    /// - `ATELIER_EMAIL` / `ATELIER_PASSWORD`: login credentials, used when no
    ///   access token is set
    /// - `ATELIER_REQUEST_TIMEOUT_SECS`: per-request timeout (default: 30)
    /// - `ATELIER_MAX_AUTH_RETRIES`: re-authentication budget (default: 3)
    /// - `ATELIER_VERBOSE`: log body previews when truthy (default: false)
    pub fn from_env() -> Result<Self, ClientError> {
        let base_url = std::env::var("ATELIER_BASE_URL")
            .map_err(|_| ClientError::configuration("ATELIER_BASE_URL is not set"))?;
        let base_url = Url::parse(&base_url).map_err(|e| {
            ClientError::configuration(format!("invalid ATELIER_BASE_URL: {e}"))
        })?;

        let credentials = match std::env::var("ATELIER_ACCESS_TOKEN") {
            Ok(token) if !token.trim().is_empty() => AuthCredentials::AccessToken(token),
            _ => {
                let email = std::env::var("ATELIER_EMAIL").unwrap_or_default();
                let password = std::env::var("ATELIER_PASSWORD").unwrap_or_default();
                if email.is_empty() || password.is_empty() {
                    return Err(ClientError::configuration(
                        "either ATELIER_ACCESS_TOKEN or ATELIER_EMAIL/ATELIER_PASSWORD must be set",
                    ));
                }
                AuthCredentials::Password { email, password }
            }
        };

        let request_timeout = std::env::var("ATELIER_REQUEST_TIMEOUT_SECS")
            .ok()
            .and_then(|s| s.parse().ok())
            .map(Duration::from_secs)
            .unwrap_or(DEFAULT_REQUEST_TIMEOUT);

        let max_auth_retries = std::env::var("ATELIER_MAX_AUTH_RETRIES")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(DEFAULT_MAX_AUTH_RETRIES);

        let verbose_logging = std::env::var("ATELIER_VERBOSE").ok().is_some_and(|v| {
            matches!(
                v.trim().to_ascii_lowercase().as_str(),
                "1" | "true" | "yes" | "on"
            )
        });

        let mut config = Self::new(base_url, credentials);
        config.request_timeout = request_timeout;
        config.max_auth_retries = max_auth_retries;
        config.verbose_logging = verbose_logging;
        Ok(config)
    }

    /// Join a command path onto the base URL.
    pub(crate) fn endpoint(&self, path: &str) -> Result<Url, ClientError> {
        let mut url = self.base_url.clone();
        {
            let mut segments = url.path_segments_mut().map_err(|_| {
                ClientError::configuration("base URL cannot be a base for paths")
            })?;
            segments.pop_if_empty();
            for segment in path.split('/').filter(|s| !s.is_empty()) {
                segments.push(segment);
            }
        }
        Ok(url)
    }
}

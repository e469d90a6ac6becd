use std::time::Duration;

use reqwest::StatusCode;

#[derive(Debug, Clone, thiserror::Error)]
pub enum ClientError {
    #[error("authentication failed: {reason}")]
    AuthenticationFailed { reason: String },

    #[error("request to {endpoint} intercepted by an edge proxy challenge")]
    ProxyBlocked { endpoint: String },

    #[error("request failed with HTTP {status} for {endpoint}")]
    Api {
        status: StatusCode,
        endpoint: String,
    },

    #[error("network error during {operation}: {reason}")]
    Network {
        operation: &'static str,
        reason: String,
    },

    #[error("{operation} timed out after {timeout:?}")]
    Timeout {
        operation: &'static str,
        timeout: Duration,
    },

    #[error("failed to decode wire response from {endpoint}: {source}")]
    Decode {
        endpoint: String,
        source: transit_codec::TransitError,
    },

    #[error("invalid response from {endpoint}: {reason}")]
    InvalidResponse { endpoint: String, reason: String },

    #[error("configuration error: {reason}")]
    Configuration { reason: String },
}

impl ClientError {
    pub fn authentication_failed(reason: impl Into<String>) -> Self {
        Self::AuthenticationFailed {
            reason: reason.into(),
        }
    }

    pub fn api(status: StatusCode, endpoint: impl Into<String>) -> Self {
        Self::Api {
            status,
            endpoint: endpoint.into(),
        }
    }

    pub fn invalid_response(endpoint: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidResponse {
            endpoint: endpoint.into(),
            reason: reason.into(),
        }
    }

    pub fn configuration(reason: impl Into<String>) -> Self {
        Self::Configuration {
            reason: reason.into(),
        }
    }

    /// Whether a caller-side retry could plausibly help.
    ///
    /// Credential rejection is recovered inside the transport and never
    /// reaches here as retryable; a proxy challenge will reproduce on every
    /// resend.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Network { .. } | Self::Timeout { .. } => true,
            Self::Api { status, .. } => status.is_server_error(),
            Self::AuthenticationFailed { .. }
            | Self::ProxyBlocked { .. }
            | Self::Decode { .. }
            | Self::InvalidResponse { .. }
            | Self::Configuration { .. } => false,
        }
    }
}

//! HTTP seam between the transport layer and the network.
//!
//! The session manager and transport client talk to an [`HttpBackend`] trait
//! object so tests can script responses; [`ReqwestBackend`] is the production
//! implementation.

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::header::HeaderMap;
use reqwest::{Client, Method, StatusCode};
use url::Url;

use crate::{config::DEFAULT_USER_AGENT, error::ClientError};

/// A fully prepared outbound request.
#[derive(Debug)]
pub struct HttpRequest {
    pub method: Method,
    pub url: Url,
    pub headers: HeaderMap,
    pub body: Option<Bytes>,
    pub timeout: Duration,
    /// Short operation name carried into timeout/network errors.
    pub operation: &'static str,
}

/// A fully buffered response.
#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

#[async_trait]
pub trait HttpBackend: Send + Sync {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, ClientError>;
}

/// Production backend over a shared `reqwest::Client`.
///
/// Clone is cheap; the client pools connections internally.
#[derive(Debug, Clone)]
pub struct ReqwestBackend {
    client: Client,
}

impl ReqwestBackend {
    pub fn new() -> Result<Self, ClientError> {
        let client = Client::builder()
            .user_agent(DEFAULT_USER_AGENT)
            .build()
            .map_err(|e| {
                ClientError::configuration(format!("failed to build HTTP client: {e}"))
            })?;
        Ok(Self { client })
    }
}

#[async_trait]
impl HttpBackend for ReqwestBackend {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, ClientError> {
        let mut builder = self
            .client
            .request(request.method, request.url)
            .headers(request.headers)
            .timeout(request.timeout);
        if let Some(body) = request.body {
            builder = builder.body(body);
        }

        let response = builder
            .send()
            .await
            .map_err(|e| classify_reqwest_error(e, request.operation, request.timeout))?;

        let status = response.status();
        let headers = response.headers().clone();
        let body = response
            .bytes()
            .await
            .map_err(|e| classify_reqwest_error(e, request.operation, request.timeout))?;

        Ok(HttpResponse {
            status,
            headers,
            body,
        })
    }
}

/// Map a reqwest failure onto the client taxonomy: deadline expiry becomes
/// `Timeout`, everything else is a transport-level `Network` error.
fn classify_reqwest_error(
    error: reqwest::Error,
    operation: &'static str,
    timeout: Duration,
) -> ClientError {
    if error.is_timeout() {
        ClientError::Timeout { operation, timeout }
    } else {
        ClientError::Network {
            operation,
            reason: error.to_string(),
        }
    }
}

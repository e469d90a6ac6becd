//! Resilient transport client.
//!
//! Wraps the session manager and the HTTP backend into the request surface
//! the rest of the system uses: attach the credential, apply the wire codec
//! when asked, recover from credential rejection by re-authenticating, and
//! surface edge-proxy challenges as their own failure mode instead of an
//! authentication loop.

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::header::{ACCEPT, CONTENT_TYPE, COOKIE, HeaderMap, HeaderName, HeaderValue, SERVER};
use reqwest::{Method, StatusCode};
use serde_json::Value;
use tracing::{debug, warn};

use crate::config::ClientConfig;
use crate::error::ClientError;
use crate::http::{HttpBackend, HttpRequest, HttpResponse, ReqwestBackend};
use crate::session::{AUTH_COOKIE, SessionManager, WIRE_CONTENT_TYPE};

const JSON_CONTENT_TYPE: &str = "application/json";

/// Header values never written to logs.
const SENSITIVE_HEADERS: [&str; 4] = ["authorization", "cookie", "set-cookie", "x-api-key"];
const REDACTED: &str = "[REDACTED]";

/// Logged body previews are cut at this many characters.
const BODY_PREVIEW_LIMIT: usize = 512;

/// Substrings of a challenge interstitial page served in place of the API
/// response when an edge proxy intercepts the request.
const PROXY_BODY_MARKERS: [&str; 3] =
    ["Just a moment", "Attention Required", "cf-browser-verification"];

/// Header the proxy sets on mitigated (challenged or blocked) responses.
const PROXY_MITIGATED_HEADER: &str = "cf-mitigated";

/// Authenticated request surface over the design service.
///
/// All requests share one [`SessionManager`]: callers that need a credential
/// while an exchange is in flight join it instead of starting their own.
pub struct Transport {
    session: Arc<SessionManager>,
    backend: Arc<dyn HttpBackend>,
    config: Arc<ClientConfig>,
}

impl Transport {
    /// Build a transport over the production HTTP backend.
    pub fn new(config: ClientConfig) -> Result<Self, ClientError> {
        let backend: Arc<dyn HttpBackend> = Arc::new(ReqwestBackend::new()?);
        Ok(Self::with_backend(Arc::new(config), backend))
    }

    /// Build a transport over a caller-supplied backend. Used by tests to
    /// script responses.
    pub fn with_backend(config: Arc<ClientConfig>, backend: Arc<dyn HttpBackend>) -> Self {
        let session = SessionManager::new(Arc::clone(&config), Arc::clone(&backend));
        Self {
            session,
            backend,
            config,
        }
    }

    pub fn session(&self) -> &Arc<SessionManager> {
        &self.session
    }

    pub async fn credential(&self) -> Result<String, ClientError> {
        self.session.credential().await
    }

    pub async fn identity(&self) -> Result<Option<String>, ClientError> {
        self.session.identity().await
    }

    pub fn clear_session(&self) {
        self.session.clear_session();
    }

    pub fn is_authenticated(&self) -> bool {
        self.session.is_authenticated()
    }

    /// Issue an authenticated request.
    ///
    /// With `use_wire_format`, the body is wire-encoded before sending and
    /// the response is wire-decoded after parsing; otherwise both travel as
    /// plain JSON. An empty response body yields `Value::Null`.
    pub async fn request(
        &self,
        method: Method,
        path: &str,
        body: Option<&Value>,
        use_wire_format: bool,
    ) -> Result<Value, ClientError> {
        let payload = match body {
            Some(value) if use_wire_format => Some(serialize(&transit_codec::encode(value))?),
            Some(value) => Some(serialize(value)?),
            None => None,
        };
        let response = self.execute(method, path, payload, use_wire_format).await?;
        self.parse_body(path, &response, use_wire_format)
    }

    /// POST a body the caller has already shaped for the wire, decoding only
    /// the response. For payloads built directly in tagged form.
    pub async fn request_with_wire_format(
        &self,
        path: &str,
        body: &Value,
    ) -> Result<Value, ClientError> {
        let payload = Some(serialize(body)?);
        let response = self.execute(Method::POST, path, payload, true).await?;
        self.parse_body(path, &response, true)
    }

    /// The send loop: credential, headers, dispatch, then classification.
    ///
    /// Order matters on the failure side. A proxy challenge is checked before
    /// the status code, because challenges arrive as 403s and must not burn
    /// the re-authentication budget. A 401/403 clears the session and loops,
    /// up to `max_auth_retries` extra passes. Everything else maps straight
    /// to an error or a success.
    async fn execute(
        &self,
        method: Method,
        path: &str,
        payload: Option<Bytes>,
        wire: bool,
    ) -> Result<HttpResponse, ClientError> {
        let url = self.config.endpoint(path)?;
        let content_type = if wire {
            WIRE_CONTENT_TYPE
        } else {
            JSON_CONTENT_TYPE
        };

        let mut auth_attempts = 0u32;
        loop {
            let token = self.session.credential().await?;

            let mut headers = HeaderMap::new();
            headers.insert(
                COOKIE,
                HeaderValue::from_str(&format!("{AUTH_COOKIE}={token}")).map_err(|_| {
                    ClientError::configuration("credential is not valid as a header value")
                })?,
            );
            headers.insert(ACCEPT, HeaderValue::from_static(content_type));
            if payload.is_some() {
                headers.insert(CONTENT_TYPE, HeaderValue::from_static(content_type));
            }

            debug!(
                method = %method,
                path,
                headers = ?redact_headers(&headers),
                "Request started"
            );
            if self.config.verbose_logging {
                if let Some(body) = &payload {
                    debug!(preview = %body_preview(body), "Request body");
                }
            }

            let started = Instant::now();
            let response = self
                .backend
                .send(HttpRequest {
                    method: method.clone(),
                    url: url.clone(),
                    headers,
                    body: payload.clone(),
                    timeout: self.config.request_timeout,
                    operation: "request",
                })
                .await?;
            debug!(
                status = %response.status,
                elapsed_ms = started.elapsed().as_millis() as u64,
                path,
                "Request completed"
            );

            if is_proxy_challenge(&response) {
                warn!(status = %response.status, path, "Edge proxy challenge detected");
                return Err(ClientError::ProxyBlocked {
                    endpoint: path.to_owned(),
                });
            }

            if matches!(
                response.status,
                StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN
            ) {
                if auth_attempts < self.config.max_auth_retries {
                    auth_attempts += 1;
                    warn!(
                        status = %response.status,
                        attempt = auth_attempts,
                        budget = self.config.max_auth_retries,
                        path,
                        "Credential rejected; re-authenticating"
                    );
                    self.session.clear_session();
                    continue;
                }
                return Err(ClientError::api(response.status, path));
            }

            if !response.status.is_success() {
                return Err(ClientError::api(response.status, path));
            }

            if self.config.verbose_logging {
                debug!(preview = %body_preview(&response.body), "Response body");
            }
            return Ok(response);
        }
    }

    fn parse_body(
        &self,
        path: &str,
        response: &HttpResponse,
        wire: bool,
    ) -> Result<Value, ClientError> {
        if response.body.is_empty() {
            return Ok(Value::Null);
        }
        let value: Value = serde_json::from_slice(&response.body).map_err(|e| {
            ClientError::invalid_response(path, format!("body is not valid JSON: {e}"))
        })?;
        if !wire {
            return Ok(value);
        }
        transit_codec::decode(&value).map_err(|source| ClientError::Decode {
            endpoint: path.to_owned(),
            source,
        })
    }
}

/// The capability other components depend on, kept narrow so tests can stand
/// in a scripted implementation.
#[async_trait]
pub trait Api: Send + Sync {
    async fn request(
        &self,
        method: Method,
        path: &str,
        body: Option<&Value>,
        use_wire_format: bool,
    ) -> Result<Value, ClientError>;

    async fn request_with_wire_format(&self, path: &str, body: &Value)
    -> Result<Value, ClientError>;

    async fn credential(&self) -> Result<String, ClientError>;
}

#[async_trait]
impl Api for Transport {
    async fn request(
        &self,
        method: Method,
        path: &str,
        body: Option<&Value>,
        use_wire_format: bool,
    ) -> Result<Value, ClientError> {
        Transport::request(self, method, path, body, use_wire_format).await
    }

    async fn request_with_wire_format(
        &self,
        path: &str,
        body: &Value,
    ) -> Result<Value, ClientError> {
        Transport::request_with_wire_format(self, path, body).await
    }

    async fn credential(&self) -> Result<String, ClientError> {
        Transport::credential(self).await
    }
}

fn serialize(value: &Value) -> Result<Bytes, ClientError> {
    serde_json::to_vec(value)
        .map(Bytes::from)
        .map_err(|e| ClientError::configuration(format!("failed to serialize request body: {e}")))
}

/// A non-success response that carries the proxy's challenge fingerprints
/// instead of an API answer.
fn is_proxy_challenge(response: &HttpResponse) -> bool {
    if response.status.is_success() {
        return false;
    }
    if response.headers.contains_key(PROXY_MITIGATED_HEADER) {
        return true;
    }
    let from_proxy = response
        .headers
        .get(SERVER)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|server| server.to_ascii_lowercase().contains("cloudflare"));
    if !from_proxy && !looks_like_html(&response.body) {
        return false;
    }
    let body = String::from_utf8_lossy(&response.body);
    PROXY_BODY_MARKERS.iter().any(|marker| body.contains(marker))
}

fn looks_like_html(body: &[u8]) -> bool {
    let head = String::from_utf8_lossy(&body[..body.len().min(64)]);
    let head = head.trim_start();
    head.starts_with("<!DOCTYPE") || head.starts_with("<html")
}

/// Header map rendered for logging, with credential-bearing values masked.
fn redact_headers(headers: &HeaderMap) -> Vec<(String, String)> {
    headers
        .iter()
        .map(|(name, value)| {
            let shown = if is_sensitive(name) {
                REDACTED.to_owned()
            } else {
                value.to_str().unwrap_or(REDACTED).to_owned()
            };
            (name.as_str().to_owned(), shown)
        })
        .collect()
}

fn is_sensitive(name: &HeaderName) -> bool {
    SENSITIVE_HEADERS.contains(&name.as_str())
}

/// Lossy, length-capped body rendering for debug logs.
fn body_preview(body: &[u8]) -> String {
    let text = String::from_utf8_lossy(body);
    if text.chars().count() <= BODY_PREVIEW_LIMIT {
        return text.into_owned();
    }
    let truncated: String = text.chars().take(BODY_PREVIEW_LIMIT).collect();
    format!("{truncated}… ({} bytes total)", body.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AuthCredentials;
    use parking_lot::Mutex;
    use reqwest::header::SET_COOKIE;
    use serde_json::json;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicU32, Ordering};
    use url::Url;

    /// Backend that answers the login exchange itself and pops scripted
    /// responses for everything else.
    struct ScriptedBackend {
        responses: Mutex<VecDeque<Result<HttpResponse, ClientError>>>,
        api_calls: AtomicU32,
        login_calls: AtomicU32,
        last_request_body: Mutex<Option<Bytes>>,
    }

    impl ScriptedBackend {
        fn new(responses: Vec<Result<HttpResponse, ClientError>>) -> Arc<Self> {
            Arc::new(Self {
                responses: Mutex::new(responses.into()),
                api_calls: AtomicU32::new(0),
                login_calls: AtomicU32::new(0),
                last_request_body: Mutex::new(None),
            })
        }
    }

    #[async_trait]
    impl HttpBackend for ScriptedBackend {
        async fn send(&self, request: HttpRequest) -> Result<HttpResponse, ClientError> {
            if request.url.path().ends_with("login-with-password") {
                self.login_calls.fetch_add(1, Ordering::SeqCst);
                let mut headers = HeaderMap::new();
                headers.insert(
                    SET_COOKIE,
                    HeaderValue::from_static("auth-token=fresh-token; Path=/"),
                );
                return Ok(response(
                    StatusCode::OK,
                    headers,
                    br#"{"id": "profile-1"}"#.to_vec(),
                ));
            }
            self.api_calls.fetch_add(1, Ordering::SeqCst);
            *self.last_request_body.lock() = request.body.clone();
            self.responses
                .lock()
                .pop_front()
                .expect("script exhausted: unexpected API request")
        }
    }

    fn response(status: StatusCode, headers: HeaderMap, body: Vec<u8>) -> HttpResponse {
        HttpResponse {
            status,
            headers,
            body: Bytes::from(body),
        }
    }

    fn ok_json(body: serde_json::Value) -> Result<HttpResponse, ClientError> {
        Ok(response(
            StatusCode::OK,
            HeaderMap::new(),
            serde_json::to_vec(&body).unwrap(),
        ))
    }

    fn status_only(status: StatusCode) -> Result<HttpResponse, ClientError> {
        Ok(response(status, HeaderMap::new(), Vec::new()))
    }

    fn transport(backend: Arc<ScriptedBackend>) -> Transport {
        let config = ClientConfig::new(
            Url::parse("https://design.example.com/api").unwrap(),
            AuthCredentials::Password {
                email: "ada@example.com".into(),
                password: "hunter22".into(),
            },
        );
        Transport::with_backend(Arc::new(config), backend)
    }

    fn transport_with(
        backend: Arc<ScriptedBackend>,
        tune: impl FnOnce(&mut ClientConfig),
    ) -> Transport {
        let mut config = ClientConfig::new(
            Url::parse("https://design.example.com/api").unwrap(),
            AuthCredentials::Password {
                email: "ada@example.com".into(),
                password: "hunter22".into(),
            },
        );
        tune(&mut config);
        Transport::with_backend(Arc::new(config), backend)
    }

    #[tokio::test]
    async fn rejected_credential_triggers_one_reauthentication() {
        let backend = ScriptedBackend::new(vec![
            status_only(StatusCode::UNAUTHORIZED),
            ok_json(json!({"ok": true})),
        ]);
        let client = transport(backend.clone());

        let value = client
            .request(Method::GET, "/rpc/query/files", None, false)
            .await
            .unwrap();
        assert_eq!(value, json!({"ok": true}));
        assert_eq!(backend.api_calls.load(Ordering::SeqCst), 2);
        // Initial login plus exactly one re-authentication.
        assert_eq!(backend.login_calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn persistent_rejection_exhausts_the_budget() {
        let backend = ScriptedBackend::new(vec![
            status_only(StatusCode::UNAUTHORIZED),
            status_only(StatusCode::UNAUTHORIZED),
            status_only(StatusCode::UNAUTHORIZED),
        ]);
        let client = transport_with(backend.clone(), |c| c.max_auth_retries = 2);

        let err = client
            .request(Method::GET, "/rpc/query/files", None, false)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ClientError::Api {
                status: StatusCode::UNAUTHORIZED,
                ..
            }
        ));
        // Budget of 2 means three total passes over the endpoint.
        assert_eq!(backend.api_calls.load(Ordering::SeqCst), 3);
        assert_eq!(backend.login_calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn forbidden_is_also_treated_as_credential_rejection() {
        let backend = ScriptedBackend::new(vec![
            status_only(StatusCode::FORBIDDEN),
            ok_json(json!(null)),
        ]);
        let client = transport(backend.clone());

        client
            .request(Method::GET, "/rpc/query/files", None, false)
            .await
            .unwrap();
        assert_eq!(backend.login_calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn proxy_challenge_short_circuits_without_reauthentication() {
        let page = b"<!DOCTYPE html><title>Just a moment...</title>".to_vec();
        let mut headers = HeaderMap::new();
        headers.insert(SERVER, HeaderValue::from_static("cloudflare"));
        headers.insert(
            HeaderName::from_static("cf-mitigated"),
            HeaderValue::from_static("challenge"),
        );
        let backend = ScriptedBackend::new(vec![Ok(response(
            StatusCode::FORBIDDEN,
            headers,
            page,
        ))]);
        let client = transport(backend.clone());

        let err = client
            .request(Method::GET, "/rpc/query/files", None, false)
            .await
            .unwrap_err();
        assert!(matches!(err, ClientError::ProxyBlocked { .. }));
        assert_eq!(backend.api_calls.load(Ordering::SeqCst), 1);
        // Only the initial login; the 403 never counts against the budget.
        assert_eq!(backend.login_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn plain_service_403_is_not_mistaken_for_a_challenge() {
        let backend = ScriptedBackend::new(vec![
            Ok(response(
                StatusCode::FORBIDDEN,
                HeaderMap::new(),
                br#"{"~:code": "~:insufficient-permissions"}"#.to_vec(),
            )),
            ok_json(json!(null)),
        ]);
        let client = transport(backend.clone());

        // No challenge fingerprints, so this goes down the re-auth path.
        client
            .request(Method::GET, "/rpc/query/files", None, false)
            .await
            .unwrap();
        assert_eq!(backend.login_calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn other_statuses_fail_without_retry() {
        let backend =
            ScriptedBackend::new(vec![status_only(StatusCode::INTERNAL_SERVER_ERROR)]);
        let client = transport(backend.clone());

        let err = client
            .request(Method::GET, "/rpc/query/files", None, false)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ClientError::Api {
                status: StatusCode::INTERNAL_SERVER_ERROR,
                ..
            }
        ));
        assert!(err.is_retryable());
        assert_eq!(backend.api_calls.load(Ordering::SeqCst), 1);
        assert_eq!(backend.login_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn network_errors_propagate_without_reauthentication() {
        let backend = ScriptedBackend::new(vec![Err(ClientError::Network {
            operation: "request",
            reason: "connection reset".into(),
        })]);
        let client = transport(backend.clone());

        let err = client
            .request(Method::GET, "/rpc/query/files", None, false)
            .await
            .unwrap_err();
        assert!(matches!(err, ClientError::Network { .. }));
        assert_eq!(backend.login_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn wire_format_encodes_request_and_decodes_response() {
        let backend = ScriptedBackend::new(vec![ok_json(json!([
            "^ ",
            "^0",
            "~u5b1f76e1-bd42-4e01-8539-d3b938bd7c80",
            "^1",
            "board"
        ]))]);
        let client = transport(backend.clone());

        let value = client
            .request(
                Method::POST,
                "/rpc/command/get-file",
                Some(&json!({"file-id": "5b1f76e1-bd42-4e01-8539-d3b938bd7c80"})),
                true,
            )
            .await
            .unwrap();
        assert_eq!(
            value,
            json!({
                "id": "5b1f76e1-bd42-4e01-8539-d3b938bd7c80",
                "name": "board"
            })
        );

        let sent = backend.last_request_body.lock().clone().unwrap();
        let sent = String::from_utf8(sent.to_vec()).unwrap();
        assert!(sent.contains("~:file-id"));
        assert!(sent.contains("~u5b1f76e1-bd42-4e01-8539-d3b938bd7c80"));
    }

    #[tokio::test]
    async fn pre_shaped_wire_body_is_sent_untouched() {
        let backend = ScriptedBackend::new(vec![ok_json(json!({"~:ok": true}))]);
        let client = transport(backend.clone());

        let body = json!({"~:id": "~uabc", "~:features": ["^ ", "~:layout", true]});
        let value = client
            .request_with_wire_format("/rpc/command/update-file", &body)
            .await
            .unwrap();
        assert_eq!(value, json!({"ok": true}));

        let sent = backend.last_request_body.lock().clone().unwrap();
        let sent: Value = serde_json::from_slice(&sent).unwrap();
        assert_eq!(sent, body);
    }

    #[tokio::test]
    async fn empty_response_body_becomes_null() {
        let backend = ScriptedBackend::new(vec![status_only(StatusCode::OK)]);
        let client = transport(backend);

        let value = client
            .request(Method::POST, "/rpc/command/logout", None, false)
            .await
            .unwrap();
        assert_eq!(value, Value::Null);
    }

    #[tokio::test]
    async fn malformed_json_is_an_invalid_response() {
        let backend = ScriptedBackend::new(vec![Ok(response(
            StatusCode::OK,
            HeaderMap::new(),
            b"<html>oops</html>".to_vec(),
        ))]);
        let client = transport(backend);

        let err = client
            .request(Method::GET, "/rpc/query/files", None, false)
            .await
            .unwrap_err();
        assert!(matches!(err, ClientError::InvalidResponse { .. }));
    }

    #[tokio::test]
    async fn undecodable_wire_body_is_a_decode_error() {
        // Dangling key: flattened map with an odd number of entries.
        let backend = ScriptedBackend::new(vec![ok_json(json!(["^ ", "~:id"]))]);
        let client = transport(backend);

        let err = client
            .request(Method::GET, "/rpc/query/files", None, true)
            .await
            .unwrap_err();
        assert!(matches!(err, ClientError::Decode { .. }));
    }

    #[test]
    fn sensitive_headers_are_redacted() {
        let mut headers = HeaderMap::new();
        headers.insert(COOKIE, HeaderValue::from_static("auth-token=secret"));
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));

        let rendered = redact_headers(&headers);
        let cookie = rendered.iter().find(|(n, _)| n == "cookie").unwrap();
        assert_eq!(cookie.1, REDACTED);
        let accept = rendered.iter().find(|(n, _)| n == "accept").unwrap();
        assert_eq!(accept.1, "application/json");
    }

    #[test]
    fn body_preview_is_capped() {
        let short = body_preview(b"{\"ok\":true}");
        assert_eq!(short, "{\"ok\":true}");

        let long = body_preview(&vec![b'x'; 2048]);
        assert!(long.starts_with(&"x".repeat(BODY_PREVIEW_LIMIT)));
        assert!(long.contains("2048 bytes total"));
    }

    #[test]
    fn challenge_detection_requires_fingerprints() {
        // Marker text inside a successful response body is not a challenge.
        let ok = response(
            StatusCode::OK,
            HeaderMap::new(),
            b"{\"note\": \"Just a moment\"}".to_vec(),
        );
        assert!(!is_proxy_challenge(&ok));

        // Interstitial HTML without the proxy server header still counts.
        let html = response(
            StatusCode::SERVICE_UNAVAILABLE,
            HeaderMap::new(),
            b"<html><body>Attention Required!</body></html>".to_vec(),
        );
        assert!(is_proxy_challenge(&html));

        let bare = response(StatusCode::FORBIDDEN, HeaderMap::new(), Vec::new());
        assert!(!is_proxy_challenge(&bare));
    }
}

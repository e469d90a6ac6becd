//! Session manager: credential lifecycle for the design service.
//!
//! Owns acquisition, TTL-bounded caching, and single-flight deduplication of
//! the password login exchange, plus lazy derivation of the profile id tied
//! to the credential.
//!
//! The single-flight slot holds a [`Shared`] future: the first caller that
//! finds no usable credential creates and stores the exchange future, every
//! caller that arrives while it is pending awaits the same handle, and the
//! future's single exit path commits or wipes the session state and clears
//! the slot. An epoch counter keeps an exchange that raced with
//! [`SessionManager::clear_session`] from resurrecting wiped state.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use bytes::Bytes;
use futures::FutureExt;
use futures::future::{BoxFuture, Shared};
use parking_lot::Mutex;
use reqwest::header::{CONTENT_TYPE, COOKIE, HeaderMap, HeaderValue, SET_COOKIE};
use reqwest::{Method, StatusCode};
use serde_json::{Value, json};
use tracing::{debug, info, warn};

use crate::config::{AuthCredentials, ClientConfig};
use crate::error::ClientError;
use crate::http::{HttpBackend, HttpRequest};

/// Cookie carrying the bearer token on every authenticated call.
pub(crate) const AUTH_COOKIE: &str = "auth-token";

/// Content type for wire-encoded bodies.
pub(crate) const WIRE_CONTENT_TYPE: &str = "application/transit+json";

const LOGIN_PATH: &str = "/rpc/command/login-with-password";
const PROFILE_PATH: &str = "/rpc/command/get-profile";

/// How a credential was obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CredentialMode {
    /// Supplied at construction; never expires, never exchanged.
    Direct,
    /// Obtained through the login exchange; expires after the configured TTL.
    Derived,
}

/// An opaque bearer token plus its provenance.
#[derive(Debug, Clone)]
pub struct Credential {
    token: String,
    acquired_at: Instant,
    mode: CredentialMode,
}

impl Credential {
    fn direct(token: String) -> Self {
        Self {
            token,
            acquired_at: Instant::now(),
            mode: CredentialMode::Direct,
        }
    }

    fn derived(token: String) -> Self {
        Self {
            token,
            acquired_at: Instant::now(),
            mode: CredentialMode::Derived,
        }
    }

    pub fn token(&self) -> &str {
        &self.token
    }

    pub fn mode(&self) -> CredentialMode {
        self.mode
    }

    /// A derived credential older than the TTL must not be reused.
    pub fn is_expired(&self, ttl: Duration) -> bool {
        self.mode == CredentialMode::Derived && self.acquired_at.elapsed() >= ttl
    }
}

/// The outcome is cloned to every single-flight waiter; errors keep their
/// kind, so a transient login failure stays retryable for the caller.
type ExchangeResult = Result<Credential, ClientError>;
type ExchangeHandle = Shared<BoxFuture<'static, ExchangeResult>>;

#[derive(Default)]
struct SessionSlot {
    credential: Option<Credential>,
    identity: Option<String>,
    inflight: Option<ExchangeHandle>,
    /// Bumped by `clear_session`; an exchange only commits into the epoch it
    /// started in.
    epoch: u64,
}

/// Produces a currently-valid credential on demand, minimizing redundant
/// authentication round-trips.
///
/// One instance per configured target must be shared by all collaborators;
/// separate instances do not coordinate their exchanges.
pub struct SessionManager {
    slot: Arc<Mutex<SessionSlot>>,
    backend: Arc<dyn HttpBackend>,
    config: Arc<ClientConfig>,
    identity_fetch_started: AtomicBool,
}

impl SessionManager {
    pub fn new(config: Arc<ClientConfig>, backend: Arc<dyn HttpBackend>) -> Arc<Self> {
        let mut slot = SessionSlot::default();
        if let AuthCredentials::AccessToken(token) = &config.credentials {
            slot.credential = Some(Credential::direct(token.clone()));
        }
        Arc::new(Self {
            slot: Arc::new(Mutex::new(slot)),
            backend,
            config,
            identity_fetch_started: AtomicBool::new(false),
        })
    }

    /// Return a currently-valid bearer token, running the login exchange if
    /// needed. Safe to call from any number of tasks concurrently; at most
    /// one network-level exchange is in flight at a time.
    pub async fn credential(self: &Arc<Self>) -> Result<String, ClientError> {
        if let AuthCredentials::AccessToken(token) = &self.config.credentials {
            let mut slot = self.slot.lock();
            if slot.credential.is_none() {
                slot.credential = Some(Credential::direct(token.clone()));
            }
            drop(slot);
            self.spawn_identity_resolution();
            return Ok(token.clone());
        }

        let handle = {
            let mut slot = self.slot.lock();
            if let Some(credential) = &slot.credential {
                if !credential.is_expired(self.config.credential_ttl) {
                    return Ok(credential.token().to_owned());
                }
                debug!("Cached credential expired; re-authenticating");
            }
            match &slot.inflight {
                Some(handle) => handle.clone(),
                None => self.start_exchange(&mut slot),
            }
        };

        Ok(handle.await?.token().to_owned())
    }

    /// Return the cached profile id, deriving it first if necessary.
    ///
    /// Triggers [`Self::credential`], so a missing credential is acquired on
    /// the way. An absent identity is fetched inline; `Ok(None)` means the
    /// fetch failed, which is logged, never propagated.
    pub async fn identity(self: &Arc<Self>) -> Result<Option<String>, ClientError> {
        let token = self.credential().await?;

        if let Some(id) = self.slot.lock().identity.clone() {
            return Ok(Some(id));
        }

        if let Some(id) = fetch_profile_id(self.backend.as_ref(), &self.config, &token).await {
            self.slot.lock().identity.get_or_insert(id.clone());
            return Ok(Some(id));
        }

        Ok(self.slot.lock().identity.clone())
    }

    /// Wipe credential, identity, and any in-flight exchange. Subsequent
    /// [`Self::credential`] calls start fresh.
    pub fn clear_session(&self) {
        let mut slot = self.slot.lock();
        slot.credential = None;
        slot.identity = None;
        slot.inflight = None;
        slot.epoch += 1;
        // Re-arm the background identity resolution so the next credential
        // request re-derives the identity wiped above.
        self.identity_fetch_started.store(false, Ordering::SeqCst);
        debug!("Session cleared");
    }

    /// True iff a credential exists and has not expired.
    pub fn is_authenticated(&self) -> bool {
        self.slot
            .lock()
            .credential
            .as_ref()
            .is_some_and(|c| !c.is_expired(self.config.credential_ttl))
    }

    /// Build the exchange future, store it as the sole in-flight handle, and
    /// hand it back for awaiting. Caller holds the slot lock.
    fn start_exchange(self: &Arc<Self>, slot: &mut SessionSlot) -> ExchangeHandle {
        let epoch = slot.epoch;
        let backend = Arc::clone(&self.backend);
        let config = Arc::clone(&self.config);
        let shared_slot = Arc::clone(&self.slot);

        let handle = async move {
            let result = perform_exchange(backend.as_ref(), &config).await;

            // Single exit path: release the slot whatever happened, and wipe
            // any half-valid state on failure. A bumped epoch means the
            // session was reset mid-exchange; the result then bypasses the
            // slot entirely.
            let mut slot = shared_slot.lock();
            if slot.epoch == epoch {
                slot.inflight = None;
                match &result {
                    Ok((credential, identity)) => {
                        slot.credential = Some(credential.clone());
                        slot.identity = identity.clone();
                    }
                    Err(_) => {
                        slot.credential = None;
                        slot.identity = None;
                    }
                }
            }
            result.map(|(credential, _)| credential)
        }
        .boxed()
        .shared();

        slot.inflight = Some(handle.clone());
        handle
    }

    /// Direct mode never exchanges, but the profile id is still resolved in
    /// the background the first time a credential is requested. One fetch per
    /// session; a session reset re-arms it.
    fn spawn_identity_resolution(self: &Arc<Self>) {
        if self.identity_fetch_started.swap(true, Ordering::SeqCst) {
            return;
        }
        let manager = Arc::clone(self);
        tokio::spawn(async move {
            let AuthCredentials::AccessToken(token) = &manager.config.credentials else {
                return;
            };
            if let Some(id) =
                fetch_profile_id(manager.backend.as_ref(), &manager.config, token).await
            {
                manager.slot.lock().identity.get_or_insert(id);
            }
        });
    }
}

/// The login exchange: post the credentials as a wire-encoded tagged map,
/// pull the token out of the session cookie, and scan the response for the
/// profile id (with one best-effort follow-up fetch if absent).
async fn perform_exchange(
    backend: &dyn HttpBackend,
    config: &ClientConfig,
) -> Result<(Credential, Option<String>), ClientError> {
    let AuthCredentials::Password { email, password } = &config.credentials else {
        return Err(ClientError::authentication_failed(
            "access-token mode does not use the login exchange",
        ));
    };
    if email.is_empty() || password.is_empty() {
        return Err(ClientError::authentication_failed(
            "login credentials are not configured",
        ));
    }

    debug!(email = %email, "Starting authentication exchange");

    let body = transit_codec::encode(&json!({ "email": email, "password": password }));
    let payload = serde_json::to_vec(&body).map_err(|e| {
        ClientError::configuration(format!("failed to serialize login body: {e}"))
    })?;

    let mut headers = HeaderMap::new();
    headers.insert(CONTENT_TYPE, HeaderValue::from_static(WIRE_CONTENT_TYPE));

    let response = backend
        .send(HttpRequest {
            method: Method::POST,
            url: config.endpoint(LOGIN_PATH)?,
            headers,
            body: Some(Bytes::from(payload)),
            timeout: config.request_timeout,
            operation: "login",
        })
        .await?;

    if matches!(
        response.status,
        StatusCode::BAD_REQUEST | StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN
    ) {
        return Err(ClientError::authentication_failed(format!(
            "login rejected with HTTP {}",
            response.status
        )));
    }
    if !response.status.is_success() {
        return Err(ClientError::api(response.status, LOGIN_PATH));
    }

    let token = extract_auth_cookie(&response.headers).ok_or_else(|| {
        ClientError::authentication_failed("login succeeded but returned no session token")
    })?;

    let mut identity = extract_profile_id(&response.body);
    if identity.is_none() {
        identity = fetch_profile_id(backend, config, &token).await;
    }

    info!(identity = ?identity.as_deref(), "Authentication exchange completed");
    Ok((Credential::derived(token), identity))
}

/// Pull the bearer token out of the `Set-Cookie` response headers.
/// The cookie value follows the fixed `auth-token=<value>` pattern.
fn extract_auth_cookie(headers: &HeaderMap) -> Option<String> {
    for value in headers.get_all(SET_COOKIE) {
        let Ok(cookie) = value.to_str() else { continue };
        let Some(pair) = cookie.split(';').next() else {
            continue;
        };
        let Some((name, token)) = pair.split_once('=') else {
            continue;
        };
        if name.trim() == AUTH_COOKIE && !token.trim().is_empty() {
            return Some(token.trim().to_owned());
        }
    }
    None
}

/// Format-tolerant profile-id scan.
///
/// The login response body has been observed as a plain object with an `id`
/// field, a keyword-tagged (`~:id`) or cache-coded (`^0`) field, and as an
/// array-encoded tagged map. Decoding through the wire codec normalizes all
/// of those; a raw-field lookup covers bodies the codec rejects.
fn extract_profile_id(body: &[u8]) -> Option<String> {
    let value: Value = serde_json::from_slice(body).ok()?;
    let decoded = match transit_codec::decode(&value) {
        Ok(decoded) => decoded,
        Err(_) => value,
    };
    decoded
        .get("id")
        .and_then(Value::as_str)
        .filter(|id| !id.is_empty())
        .map(str::to_owned)
}

/// One follow-up profile fetch. Failures here only cost us the identity, so
/// they are logged and swallowed.
async fn fetch_profile_id(
    backend: &dyn HttpBackend,
    config: &ClientConfig,
    token: &str,
) -> Option<String> {
    let url = match config.endpoint(PROFILE_PATH) {
        Ok(url) => url,
        Err(e) => {
            warn!(error = %e, "Skipping profile fetch");
            return None;
        }
    };
    let mut headers = HeaderMap::new();
    match HeaderValue::from_str(&format!("{AUTH_COOKIE}={token}")) {
        Ok(value) => {
            headers.insert(COOKIE, value);
        }
        Err(e) => {
            warn!(error = %e, "Credential not usable as a cookie header; skipping profile fetch");
            return None;
        }
    }

    let response = backend
        .send(HttpRequest {
            method: Method::GET,
            url,
            headers,
            body: None,
            timeout: config.request_timeout,
            operation: "profile-fetch",
        })
        .await;

    match response {
        Ok(response) if response.status.is_success() => {
            let identity = extract_profile_id(&response.body);
            if identity.is_none() {
                warn!("Profile response carried no id field");
            }
            identity
        }
        Ok(response) => {
            warn!(status = %response.status, "Profile fetch failed; identity stays unresolved");
            None
        }
        Err(e) => {
            warn!(error = %e, "Profile fetch failed; identity stays unresolved");
            None
        }
    }
}

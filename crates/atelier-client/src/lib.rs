//! Authenticated transport layer for the design collaboration service.
//!
//! Three cooperating pieces:
//!
//! - [`SessionManager`]: credential acquisition and caching. Password
//!   credentials are exchanged for a session token through the login
//!   endpoint, with single-flight deduplication so concurrent callers share
//!   one exchange, and a TTL after which the token is silently re-derived.
//! - [`Transport`]: the request surface. Attaches the credential, applies
//!   the wire codec on demand, recovers from credential rejection by
//!   re-authenticating up to a budget, and reports edge-proxy challenges as
//!   [`ClientError::ProxyBlocked`] instead of looping on them.
//! - [`retry_with_backoff`]: a generic exponential-backoff driver for
//!   callers that retry whole operations; [`ClientError::is_retryable`] is
//!   the matching predicate.
//!
//! Wire bodies use the tagged, cache-referencing JSON encoding from the
//! companion `transit-codec` crate.
//!
//! ```no_run
//! use atelier_client::{AuthCredentials, ClientConfig, Transport};
//! use reqwest::Method;
//! use url::Url;
//!
//! # async fn run() -> Result<(), atelier_client::ClientError> {
//! let config = ClientConfig::new(
//!     Url::parse("https://design.example.com/api").unwrap(),
//!     AuthCredentials::Password {
//!         email: "ada@example.com".into(),
//!         password: "secret".into(),
//!     },
//! );
//! let client = Transport::new(config)?;
//! let files = client
//!     .request(Method::GET, "/rpc/query/files", None, true)
//!     .await?;
//! # Ok(())
//! # }
//! ```

mod config;
mod error;
mod http;
mod retry;
mod session;
mod transport;

pub use config::{AuthCredentials, ClientConfig};
pub use error::ClientError;
pub use http::{HttpBackend, HttpRequest, HttpResponse, ReqwestBackend};
pub use retry::{RetryPolicy, retry_with_backoff};
pub use session::{Credential, CredentialMode, SessionManager};
pub use transport::{Api, Transport};

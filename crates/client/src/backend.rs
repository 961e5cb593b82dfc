//! Contracts of the external identity service and profile store.
//!
//! Only the capabilities the session engine consumes are modeled here; the
//! wire protocol belongs to the backend adapter (see `rest` for one).

use async_trait::async_trait;
use thiserror::Error;

use pmo_auth::{AuthUser, Session, UserProfile};
use pmo_core::UserId;
use pmo_events::{AuthEvent, Subscription};

/// Failure of a single collaborator round trip.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BackendError {
    #[error("network error: {0}")]
    Network(String),
    #[error("API error ({0}): {1}")]
    Api(u16, String),
    #[error("parse error: {0}")]
    Parse(String),
    #[error("no active session")]
    NoSession,
}

/// Identity/session service plus profile store.
///
/// Every method is a single round trip; no retries happen behind it.
/// "Not found" is `Ok(None)`, not an error.
#[async_trait]
pub trait IdentityBackend: Send + Sync {
    async fn current_session(&self) -> Result<Option<Session>, BackendError>;

    async fn current_user(&self) -> Result<Option<AuthUser>, BackendError>;

    async fn fetch_profile(&self, id: UserId) -> Result<Option<UserProfile>, BackendError>;

    /// Best-effort; callers must not let a failure block local sign-out.
    async fn sign_out(&self) -> Result<(), BackendError>;
}

/// Push channel of identity-change notifications.
///
/// The returned subscription delivers each event once, in order. Dropping or
/// closing it unsubscribes.
pub trait AuthEventSource: Send + Sync {
    fn subscribe_auth_events(&self) -> Subscription<AuthEvent>;
}

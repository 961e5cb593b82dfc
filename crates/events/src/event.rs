use serde::{Deserialize, Serialize};

use pmo_auth::Session;

/// Kind of identity change reported by the backend.
///
/// Parsed from the backend's wire names. Kinds this client does not act on are
/// still representable so they can be logged and skipped.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum AuthEventKind {
    SignedIn,
    SignedOut,
    TokenRefreshed,
    UserUpdated,
    PasswordRecovery,
    Other(String),
}

impl AuthEventKind {
    pub fn as_str(&self) -> &str {
        match self {
            AuthEventKind::SignedIn => "SIGNED_IN",
            AuthEventKind::SignedOut => "SIGNED_OUT",
            AuthEventKind::TokenRefreshed => "TOKEN_REFRESHED",
            AuthEventKind::UserUpdated => "USER_UPDATED",
            AuthEventKind::PasswordRecovery => "PASSWORD_RECOVERY",
            AuthEventKind::Other(name) => name,
        }
    }
}

impl From<&str> for AuthEventKind {
    fn from(value: &str) -> Self {
        match value {
            "SIGNED_IN" => AuthEventKind::SignedIn,
            "SIGNED_OUT" => AuthEventKind::SignedOut,
            "TOKEN_REFRESHED" => AuthEventKind::TokenRefreshed,
            "USER_UPDATED" => AuthEventKind::UserUpdated,
            "PASSWORD_RECOVERY" => AuthEventKind::PasswordRecovery,
            other => AuthEventKind::Other(other.to_string()),
        }
    }
}

impl From<String> for AuthEventKind {
    fn from(value: String) -> Self {
        AuthEventKind::from(value.as_str())
    }
}

impl From<AuthEventKind> for String {
    fn from(value: AuthEventKind) -> Self {
        value.as_str().to_string()
    }
}

impl core::fmt::Display for AuthEventKind {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single push notification from the identity backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthEvent {
    pub kind: AuthEventKind,
    #[serde(default)]
    pub session: Option<Session>,
}

impl AuthEvent {
    pub fn new(kind: AuthEventKind, session: Option<Session>) -> Self {
        Self { kind, session }
    }

    pub fn signed_in(session: Session) -> Self {
        Self::new(AuthEventKind::SignedIn, Some(session))
    }

    pub fn signed_out() -> Self {
        Self::new(AuthEventKind::SignedOut, None)
    }

    pub fn token_refreshed(session: Session) -> Self {
        Self::new(AuthEventKind::TokenRefreshed, Some(session))
    }
}

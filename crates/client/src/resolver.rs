//! Session handshake: session → user → profile, collapsed to one outcome.

use std::sync::Arc;

use pmo_auth::{AuthState, UserProfile};
use pmo_core::UserId;

use crate::backend::IdentityBackend;

/// Consolidated result of a session handshake.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    Authenticated(UserProfile),
    /// The identity backend vouches for the user, but no profile record
    /// could be fetched.
    Degraded { user_id: UserId },
    Unauthenticated,
}

impl Resolution {
    pub fn is_authenticated(&self) -> bool {
        !matches!(self, Resolution::Unauthenticated)
    }

    pub fn label(&self) -> &'static str {
        match self {
            Resolution::Authenticated(_) => "authenticated",
            Resolution::Degraded { .. } => "degraded",
            Resolution::Unauthenticated => "unauthenticated",
        }
    }

    /// The settled `AuthState` this outcome produces.
    pub fn into_state(self) -> AuthState {
        match self {
            Resolution::Authenticated(profile) => AuthState::authenticated(profile),
            Resolution::Degraded { .. } => AuthState::degraded(),
            Resolution::Unauthenticated => AuthState::unauthenticated(),
        }
    }
}

/// Performs the handshake against the identity backend and profile store.
///
/// Never fails: collaborator errors collapse to `Unauthenticated` (session or
/// user step) or `Degraded` (profile step). No retries.
#[derive(Clone)]
pub struct SessionResolver {
    backend: Arc<dyn IdentityBackend>,
}

impl SessionResolver {
    pub fn new(backend: Arc<dyn IdentityBackend>) -> Self {
        Self { backend }
    }

    pub async fn resolve(&self) -> Resolution {
        match self.backend.current_session().await {
            Ok(Some(_session)) => {}
            Ok(None) => {
                tracing::debug!("no current session");
                return Resolution::Unauthenticated;
            }
            Err(err) => {
                tracing::warn!(error = %err, "session lookup failed");
                return Resolution::Unauthenticated;
            }
        }

        let user = match self.backend.current_user().await {
            Ok(Some(user)) => user,
            Ok(None) => {
                tracing::debug!("session present but no current user");
                return Resolution::Unauthenticated;
            }
            Err(err) => {
                tracing::warn!(error = %err, "user lookup failed");
                return Resolution::Unauthenticated;
            }
        };

        profile_outcome(self.backend.as_ref(), user.id).await
    }
}

/// Profile step shared by the resolver and the `SIGNED_IN` push handler:
/// identity is already proven, so a missing profile degrades rather than
/// signs out.
pub(crate) async fn profile_outcome(backend: &dyn IdentityBackend, user_id: UserId) -> Resolution {
    match backend.fetch_profile(user_id).await {
        Ok(Some(profile)) => Resolution::Authenticated(profile),
        Ok(None) => {
            tracing::info!(%user_id, "authenticated user has no profile record yet");
            Resolution::Degraded { user_id }
        }
        Err(err) => {
            tracing::warn!(%user_id, error = %err, "profile lookup failed");
            Resolution::Degraded { user_id }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FakeBackend, Step};
    use pmo_auth::Role;

    #[tokio::test]
    async fn full_handshake_yields_profile() {
        let backend = FakeBackend::signed_in_as(Role::TECH_LEAD);
        let resolver = SessionResolver::new(backend.clone());

        let Resolution::Authenticated(profile) = resolver.resolve().await else {
            panic!("expected authenticated resolution");
        };
        assert_eq!(profile.role, Role::TECH_LEAD);
        assert_eq!(backend.calls().session, 1);
        assert_eq!(backend.calls().user, 1);
        assert_eq!(backend.calls().profile, 1);
    }

    #[tokio::test]
    async fn missing_session_stops_early() {
        let backend = FakeBackend::signed_out();
        let resolver = SessionResolver::new(backend.clone());

        assert_eq!(resolver.resolve().await, Resolution::Unauthenticated);
        assert_eq!(backend.calls().user, 0);
        assert_eq!(backend.calls().profile, 0);
    }

    #[tokio::test]
    async fn session_or_user_errors_are_unauthenticated() {
        let backend = FakeBackend::signed_in_as(Role::VIEWER);
        backend.set_session(Step::Fail);
        assert_eq!(
            SessionResolver::new(backend.clone()).resolve().await,
            Resolution::Unauthenticated
        );

        let backend = FakeBackend::signed_in_as(Role::VIEWER);
        backend.set_user(Step::Fail);
        assert_eq!(
            SessionResolver::new(backend.clone()).resolve().await,
            Resolution::Unauthenticated
        );

        let backend = FakeBackend::signed_in_as(Role::VIEWER);
        backend.set_user(Step::Missing);
        assert_eq!(
            SessionResolver::new(backend.clone()).resolve().await,
            Resolution::Unauthenticated
        );
    }

    #[tokio::test]
    async fn missing_or_failing_profile_is_degraded() {
        let backend = FakeBackend::signed_in_as(Role::VIEWER);
        let user_id = backend.user_id();
        backend.set_profile(Step::Missing);
        assert_eq!(
            SessionResolver::new(backend.clone()).resolve().await,
            Resolution::Degraded { user_id }
        );

        backend.set_profile(Step::Fail);
        let outcome = SessionResolver::new(backend.clone()).resolve().await;
        assert!(outcome.is_authenticated());
        assert_eq!(outcome.into_state(), AuthState::degraded());
    }
}

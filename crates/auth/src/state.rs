//! Canonical in-memory auth state and its persisted projection.

use serde::{Deserialize, Serialize};

use crate::{Role, UserProfile, roles};

/// Who the current user is and whether that has been validated yet.
///
/// Produced only by the client's state machine; everything else reads
/// snapshots of it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthState {
    pub user: Option<UserProfile>,
    pub is_authenticated: bool,
    pub is_loading: bool,
    pub is_initialized: bool,
}

impl Default for AuthState {
    /// Process-start state: nothing known, validation pending.
    fn default() -> Self {
        Self {
            user: None,
            is_authenticated: false,
            is_loading: true,
            is_initialized: false,
        }
    }
}

impl AuthState {
    /// Seed the state from a snapshot written by a previous process.
    ///
    /// The cached identity is shown optimistically, but loading/initialized
    /// are forced back to pending so the session is always re-validated.
    pub fn rehydrate(snapshot: SessionSnapshot) -> Self {
        Self {
            user: snapshot.user,
            is_authenticated: snapshot.is_authenticated,
            ..Self::default()
        }
    }

    /// Authenticated with a profile.
    pub fn authenticated(user: UserProfile) -> Self {
        Self {
            user: Some(user),
            is_authenticated: true,
            is_loading: false,
            is_initialized: true,
        }
    }

    /// Authenticated by the identity backend, but no profile record exists.
    pub fn degraded() -> Self {
        Self {
            user: None,
            is_authenticated: true,
            is_loading: false,
            is_initialized: true,
        }
    }

    pub fn unauthenticated() -> Self {
        Self {
            user: None,
            is_authenticated: false,
            is_loading: false,
            is_initialized: true,
        }
    }

    /// Settled and still waiting on nothing.
    pub fn is_settled(&self) -> bool {
        self.is_initialized && !self.is_loading
    }

    pub fn is_degraded(&self) -> bool {
        self.is_authenticated && self.user.is_none()
    }

    pub fn role(&self) -> Option<&Role> {
        self.user.as_ref().map(|u| &u.role)
    }

    /// Exact role match.
    pub fn has_role(&self, role: &Role) -> bool {
        self.role() == Some(role)
    }

    pub fn has_minimum_role(&self, role: &Role) -> bool {
        self.role()
            .is_some_and(|user_role| roles::at_least(user_role, role))
    }

    /// The durable subset of this state.
    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            user: self.user.clone(),
            is_authenticated: self.is_authenticated,
        }
    }
}

/// Durable projection of [`AuthState`].
///
/// Deliberately excludes the loading/initialized flags.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSnapshot {
    #[serde(default)]
    pub user: Option<UserProfile>,
    #[serde(default)]
    pub is_authenticated: bool,
}

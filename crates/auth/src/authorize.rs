//! Access guard consulted by the routing layer before entering a view.
//!
//! - No IO
//! - No panics
//! - Reads an `AuthState` snapshot only

use serde::Serialize;

use crate::{AuthState, Role};

/// Outcome of a navigation check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum Access {
    /// The session has not been validated yet; render a loading indicator.
    Pending,
    Allow,
    Deny(Denial),
}

impl Access {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Access::Allow)
    }

    pub fn is_pending(&self) -> bool {
        matches!(self, Access::Pending)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Denial {
    Unauthenticated,
    InsufficientRole {
        required: Role,
        /// `None` when authenticated without a profile.
        actual: Option<Role>,
    },
}

/// Where the router should send a denied navigation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Redirect {
    Login,
    Forbidden,
}

impl Denial {
    pub fn redirect(&self) -> Redirect {
        match self {
            Denial::Unauthenticated => Redirect::Login,
            Denial::InsufficientRole { .. } => Redirect::Forbidden,
        }
    }
}

/// Decide whether the current user may enter a view.
pub fn can_enter(state: &AuthState, required_role: Option<&Role>) -> Access {
    if state.is_loading || !state.is_initialized {
        return Access::Pending;
    }
    if !state.is_authenticated {
        return Access::Deny(Denial::Unauthenticated);
    }
    match required_role {
        Some(required) if !state.has_minimum_role(required) => {
            Access::Deny(Denial::InsufficientRole {
                required: required.clone(),
                actual: state.role().cloned(),
            })
        }
        _ => Access::Allow,
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Access Explanation (Audit Trail)
// ─────────────────────────────────────────────────────────────────────────────

/// Human-readable account of a guard decision, for logs and debug panels.
#[derive(Debug, Clone, Serialize)]
pub struct AccessExplanation {
    pub access: Access,
    pub required_role: Option<Role>,
    pub reason: String,
    pub redirect: Option<Redirect>,
}

/// Explain why [`can_enter`] returns what it returns for this state.
pub fn explain_access(state: &AuthState, required_role: Option<&Role>) -> AccessExplanation {
    let access = can_enter(state, required_role);

    let reason = match &access {
        Access::Pending => "session is still being validated".to_string(),
        Access::Deny(Denial::Unauthenticated) => "no authenticated session".to_string(),
        Access::Deny(Denial::InsufficientRole { required, actual: Some(actual) }) => {
            if actual.is_known() {
                format!("role '{actual}' is below required role '{required}'")
            } else {
                format!("role '{actual}' is not recognized; '{required}' is required")
            }
        }
        Access::Deny(Denial::InsufficientRole { required, actual: None }) => {
            format!("authenticated without a profile; role '{required}' cannot be established")
        }
        Access::Allow => match (required_role, state.role()) {
            (Some(required), Some(actual)) => {
                format!("role '{actual}' satisfies required role '{required}'")
            }
            _ => "authenticated session".to_string(),
        },
    };

    let redirect = match &access {
        Access::Deny(denial) => Some(denial.redirect()),
        _ => None,
    };

    AccessExplanation {
        access,
        required_role: required_role.cloned(),
        reason,
        redirect,
    }
}

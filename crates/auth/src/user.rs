//! Application-level user profile.

use serde::{Deserialize, Serialize};

use pmo_core::UserId;

use crate::Role;

/// Profile record for an authenticated user.
///
/// Owned by the external profile store and keyed by the identity backend's
/// user id. Held read-only: a new profile replaces the old one wholesale.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserProfile {
    pub id: UserId,
    pub display_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar_url: Option<String>,
    pub role: Role,
}

impl UserProfile {
    pub fn new(id: UserId, display_name: impl Into<String>, role: Role) -> Self {
        Self {
            id,
            display_name: display_name.into(),
            email: None,
            avatar_url: None,
            role,
        }
    }

    pub fn with_email(mut self, email: impl Into<String>) -> Self {
        self.email = Some(email.into());
        self
    }
}

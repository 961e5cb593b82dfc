use std::borrow::Cow;

use serde::{Deserialize, Serialize};

use pmo_core::DomainError;

/// Role names from least to most privileged.
///
/// Fixed at compile time; the position in this table is the role's rank.
const ROLE_ORDER: [&str; 7] = [
    "viewer",
    "client_stakeholder",
    "developer",
    "tech_lead",
    "project_manager",
    "org_admin",
    "super_admin",
];

/// Role identifier attached to a user profile.
///
/// Roles stay opaque strings at this layer so that a profile carrying a role
/// this build does not know about can still be represented. Such a role has
/// rank `-1` and fails every privilege comparison.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Role(Cow<'static, str>);

impl Role {
    pub const VIEWER: Role = Role(Cow::Borrowed("viewer"));
    pub const CLIENT_STAKEHOLDER: Role = Role(Cow::Borrowed("client_stakeholder"));
    pub const DEVELOPER: Role = Role(Cow::Borrowed("developer"));
    pub const TECH_LEAD: Role = Role(Cow::Borrowed("tech_lead"));
    pub const PROJECT_MANAGER: Role = Role(Cow::Borrowed("project_manager"));
    pub const ORG_ADMIN: Role = Role(Cow::Borrowed("org_admin"));
    pub const SUPER_ADMIN: Role = Role(Cow::Borrowed("super_admin"));

    pub fn new(name: impl Into<Cow<'static, str>>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Position in the privilege order, or `-1` if the role is unknown.
    pub fn rank(&self) -> i32 {
        ROLE_ORDER
            .iter()
            .position(|name| *name == self.as_str())
            .map_or(-1, |idx| idx as i32)
    }

    pub fn is_known(&self) -> bool {
        self.rank() >= 0
    }

    /// Every known role, least privileged first.
    pub fn all_known() -> impl Iterator<Item = Role> {
        ROLE_ORDER.iter().map(|name| Role(Cow::Borrowed(*name)))
    }

    /// `true` iff `self` is at least as privileged as `required`.
    pub fn at_least(&self, required: &Role) -> bool {
        at_least(self, required)
    }
}

/// Privilege comparison over the fixed role order.
///
/// Fail-closed: an unknown role on either side never satisfies the check.
pub fn at_least(user_role: &Role, required_role: &Role) -> bool {
    let user = user_role.rank();
    let required = required_role.rank();
    if user < 0 || required < 0 {
        return false;
    }
    user >= required
}

impl core::fmt::Display for Role {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}

impl core::str::FromStr for Role {
    type Err = DomainError;

    /// Strict parse: only the seven known role names are accepted.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Role::all_known()
            .find(|role| role.as_str() == s)
            .ok_or_else(|| DomainError::validation(format!("unknown role '{s}'")))
    }
}

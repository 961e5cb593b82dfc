//! `pmo-auth` — pure identity and authorization model for the PMO client.
//!
//! This crate is intentionally decoupled from IO, async and storage: it holds
//! the role order, the profile/session types, the canonical `AuthState` shape,
//! and the access guard the router consults.

pub mod authorize;
pub mod roles;
pub mod session;
pub mod state;
pub mod user;

pub use authorize::{Access, AccessExplanation, Denial, Redirect, can_enter, explain_access};
pub use roles::{Role, at_least};
pub use session::{AuthUser, Session};
pub use state::{AuthState, SessionSnapshot};
pub use user::UserProfile;

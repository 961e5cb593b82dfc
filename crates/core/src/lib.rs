//! `pmo-core` — identifier and error primitives shared by every PMO crate.
//!
//! No IO, no async, no knowledge of the identity backend.

pub mod error;
pub mod id;

pub use error::DomainError;
pub use id::UserId;

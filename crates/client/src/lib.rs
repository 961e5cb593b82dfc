//! `pmo-client`
//!
//! **Responsibility:** Client-side session and authorization engine.
//!
//! This crate provides:
//! - The `AuthStore` state machine (rehydrate, validate, sign out)
//! - A push listener that applies backend identity events
//! - Snapshot persistence so the last known identity survives restarts
//!
//! The backend stays the authority. The local snapshot is only a display
//! hint until `AuthStore::initialize` has validated it.

pub mod backend;
pub mod cache;
pub mod config;
pub mod listener;
pub mod resolver;
pub mod store;

#[cfg(feature = "http")]
pub mod rest;

#[cfg(test)]
mod testing;

pub use backend::{AuthEventSource, BackendError, IdentityBackend};
pub use cache::{FileSnapshotStore, MemorySnapshotStore, SnapshotStore};
pub use config::{ClientConfig, ConfigError};
pub use listener::{ListenerHandle, SessionListener};
pub use resolver::{Resolution, SessionResolver};
pub use store::AuthStore;

#[cfg(feature = "http")]
pub use rest::RestBackend;

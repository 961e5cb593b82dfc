//! `pmo-events` — identity-change notifications and the channel they travel on.
//!
//! The identity backend pushes `AuthEvent`s at any time, including while the
//! client is still validating its session. This crate only models the events
//! and their delivery; reacting to them is the client's job.

pub mod bus;
pub mod event;
pub mod in_memory_bus;

pub use bus::{EventBus, Subscription};
pub use event::{AuthEvent, AuthEventKind};
pub use in_memory_bus::{InMemoryBusError, InMemoryEventBus};

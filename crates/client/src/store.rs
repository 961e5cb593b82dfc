//! The auth state machine.
//!
//! `AuthStore` owns the one canonical `AuthState` of the process. Consumers
//! read snapshots (`state`, `subscribe`) and never mutate it; every change
//! goes through the transitions below, each applied under a single lock so no
//! reader observes a half-applied transition.
//!
//! ## Racing sources of truth
//!
//! - the snapshot persisted by a previous process (read once, in `new`)
//! - the session handshake started by `initialize`
//! - push events, applied by the session listener at any time
//!
//! Every transition other than a handshake completion bumps a generation
//! counter. A handshake only applies its result if its generation is still the
//! pending one, so a late completion (after a push event or a sign-out) is
//! dropped instead of overwriting newer state. Push results computed across an
//! await (the profile fetch after `SIGNED_IN`) are checked the same way.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::watch;

use pmo_auth::{Access, AuthState, Role, SessionSnapshot, UserProfile, can_enter};

use crate::backend::IdentityBackend;
use crate::cache::SnapshotStore;
use crate::config::ClientConfig;
use crate::resolver::{Resolution, SessionResolver};

/// Cheaply cloneable handle to the process-wide auth state.
#[derive(Clone)]
pub struct AuthStore {
    shared: Arc<Shared>,
}

struct Shared {
    backend: Arc<dyn IdentityBackend>,
    resolver: SessionResolver,
    snapshots: Arc<dyn SnapshotStore>,
    config: ClientConfig,
    inner: Mutex<Inner>,
    state_tx: watch::Sender<AuthState>,
}

#[derive(Debug)]
struct Inner {
    state: AuthState,
    generation: u64,
    /// Generation of the handshake allowed to settle the state, if any.
    pending_init: Option<u64>,
    /// Last projection written to the snapshot store.
    persisted: Option<SessionSnapshot>,
}

enum InitStart {
    AlreadyInitialized,
    JoinInFlight,
    Run(u64),
}

impl AuthStore {
    /// Create the store, rehydrating from the snapshot store exactly once.
    pub fn new(
        backend: Arc<dyn IdentityBackend>,
        snapshots: Arc<dyn SnapshotStore>,
        config: ClientConfig,
    ) -> Self {
        let persisted = snapshots.read_snapshot();
        let state = match persisted.clone() {
            Some(snapshot) => {
                tracing::info!(
                    cached_authenticated = snapshot.is_authenticated,
                    cached_profile = snapshot.user.is_some(),
                    "rehydrated session snapshot; re-validation pending"
                );
                AuthState::rehydrate(snapshot)
            }
            None => AuthState::default(),
        };

        let (state_tx, _) = watch::channel(state.clone());
        Self {
            shared: Arc::new(Shared {
                resolver: SessionResolver::new(backend.clone()),
                backend,
                snapshots,
                config,
                inner: Mutex::new(Inner {
                    state,
                    generation: 0,
                    pending_init: None,
                    persisted,
                }),
                state_tx,
            }),
        }
    }

    /// Read-only snapshot of the current state.
    pub fn state(&self) -> AuthState {
        self.shared.state_tx.borrow().clone()
    }

    /// Observe every transition from now on.
    pub fn subscribe(&self) -> watch::Receiver<AuthState> {
        self.shared.state_tx.subscribe()
    }

    pub fn generation(&self) -> u64 {
        self.lock().generation
    }

    pub fn has_role(&self, role: &Role) -> bool {
        self.state().has_role(role)
    }

    pub fn has_minimum_role(&self, role: &Role) -> bool {
        self.state().has_minimum_role(role)
    }

    /// Access guard over the current snapshot.
    pub fn can_enter(&self, required_role: Option<&Role>) -> Access {
        can_enter(&self.state(), required_role)
    }

    /// Validate the session against the backend, bounded by `init_timeout`.
    ///
    /// Runs at most once per process: once initialized this only clears a
    /// stray loading flag, and a call made while a handshake is in flight
    /// waits for that handshake instead of starting another. Never fails;
    /// errors and timeouts settle as unauthenticated.
    pub async fn initialize(&self) {
        let start = {
            let mut inner = self.lock();
            if inner.state.is_initialized {
                if inner.state.is_loading {
                    let mut next = inner.state.clone();
                    next.is_loading = false;
                    self.commit(&mut inner, next);
                }
                InitStart::AlreadyInitialized
            } else if inner.pending_init.is_some() {
                InitStart::JoinInFlight
            } else {
                inner.generation += 1;
                let generation = inner.generation;
                inner.pending_init = Some(generation);
                let mut next = inner.state.clone();
                next.is_loading = true;
                self.commit(&mut inner, next);
                InitStart::Run(generation)
            }
        };

        let generation = match start {
            InitStart::AlreadyInitialized => {
                tracing::debug!("initialize skipped; already initialized");
                return;
            }
            InitStart::JoinInFlight => {
                tracing::debug!("initialize joined the in-flight session validation");
                self.wait_initialized().await;
                return;
            }
            InitStart::Run(generation) => generation,
        };

        tracing::debug!(generation, "validating session");

        // The handshake task owns the timeout and settles the state itself, so
        // the outcome lands within `init_timeout` even if this caller is
        // dropped. A late settle is discarded by the generation check.
        let handshake = {
            let store = self.clone();
            let timeout = self.shared.config.init_timeout;
            tokio::spawn(async move {
                let resolution = match tokio::time::timeout(timeout, store.shared.resolver.resolve()).await {
                    Ok(resolution) => resolution,
                    Err(_) => {
                        tracing::warn!(
                            generation,
                            timeout_ms = timeout.as_millis() as u64,
                            "session validation timed out; continuing unauthenticated"
                        );
                        Resolution::Unauthenticated
                    }
                };
                store.settle_init(generation, resolution);
            })
        };

        let mut state_rx = self.subscribe();

        tokio::select! {
            joined = handshake => {
                if let Err(err) = joined {
                    tracing::error!(generation, error = %err, "session validation task failed");
                    self.settle_init(generation, Resolution::Unauthenticated);
                }
            }
            _ = state_rx.wait_for(|state| state.is_initialized) => {
                tracing::debug!(generation, "initialization settled by another transition");
            }
        }
    }

    /// Sign out at the backend, then clear the local session regardless of
    /// whether the backend call succeeded.
    pub async fn sign_out(&self) {
        let timeout = self.shared.config.sign_out_timeout;
        match tokio::time::timeout(timeout, self.shared.backend.sign_out()).await {
            Ok(Ok(())) => tracing::info!("signed out at the identity backend"),
            Ok(Err(err)) => {
                tracing::warn!(error = %err, "backend sign-out failed; clearing local session anyway")
            }
            Err(_) => tracing::warn!(
                timeout_ms = timeout.as_millis() as u64,
                "backend sign-out timed out; clearing local session anyway"
            ),
        }

        self.overwrite(AuthState::unauthenticated());
    }

    /// Push-driven overwrite: a profile means authenticated, `None` means
    /// signed out.
    pub(crate) fn set_user(&self, user: Option<UserProfile>) {
        let next = match user {
            Some(profile) => AuthState::authenticated(profile),
            None => AuthState::unauthenticated(),
        };
        self.overwrite(next);
    }

    /// Push-driven overwrite computed from state observed at `observed`.
    ///
    /// Dropped if any other transition landed in between (a sign-out during
    /// the profile fetch, for one).
    pub(crate) fn apply_push(&self, observed: u64, next: AuthState) -> bool {
        let mut inner = self.lock();
        if inner.generation != observed {
            tracing::debug!(
                observed,
                current = inner.generation,
                "discarding superseded push transition"
            );
            return false;
        }
        self.supersede(&mut inner);
        self.commit(&mut inner, next);
        true
    }

    pub(crate) fn backend(&self) -> &Arc<dyn IdentityBackend> {
        &self.shared.backend
    }

    /// Apply a handshake result unless it has been superseded.
    fn settle_init(&self, generation: u64, resolution: Resolution) -> bool {
        let mut inner = self.lock();
        if inner.pending_init != Some(generation) {
            tracing::debug!(
                generation,
                current = inner.generation,
                outcome = resolution.label(),
                "discarding stale session validation result"
            );
            return false;
        }

        inner.pending_init = None;
        tracing::info!(generation, outcome = resolution.label(), "session initialized");
        self.commit(&mut inner, resolution.into_state());
        true
    }

    /// Replace the state wholesale, superseding any in-flight handshake.
    fn overwrite(&self, next: AuthState) {
        let mut inner = self.lock();
        self.supersede(&mut inner);
        self.commit(&mut inner, next);
    }

    /// Invalidate any in-flight handshake before a newer transition lands.
    fn supersede(&self, inner: &mut Inner) {
        inner.generation += 1;
        if let Some(stale) = inner.pending_init.take() {
            tracing::debug!(stale, "in-flight session validation superseded");
        }
    }

    /// Install `next` as the canonical state, write the durable projection
    /// through if it changed, and notify observers.
    fn commit(&self, inner: &mut Inner, next: AuthState) {
        let snapshot = next.snapshot();
        if inner.persisted.as_ref() != Some(&snapshot) {
            self.shared.snapshots.write_snapshot(&snapshot);
            inner.persisted = Some(snapshot);
        }

        tracing::debug!(
            authenticated = next.is_authenticated,
            has_profile = next.user.is_some(),
            loading = next.is_loading,
            initialized = next.is_initialized,
            "auth state transition"
        );
        inner.state = next.clone();
        self.shared.state_tx.send_replace(next);
    }

    async fn wait_initialized(&self) {
        let mut state_rx = self.subscribe();
        // The sender lives as long as `self`, so this cannot observe a closed
        // channel.
        let _ = state_rx.wait_for(|state| state.is_initialized).await;
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.shared.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl core::fmt::Debug for AuthStore {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("AuthStore")
            .field("state", &self.state())
            .field("config", &self.shared.config)
            .finish_non_exhaustive()
    }
}

//! Background task translating identity push events into state transitions.

use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use pmo_events::{AuthEvent, AuthEventKind, Subscription};

use crate::backend::AuthEventSource;
use crate::resolver::profile_outcome;
use crate::store::AuthStore;

/// Subscribes the auth store to the backend's push channel.
pub struct SessionListener;

impl SessionListener {
    /// Subscribe to `source` and start handling its events.
    pub fn start(store: AuthStore, source: &dyn AuthEventSource) -> ListenerHandle {
        Self::spawn(store, source.subscribe_auth_events())
    }

    /// Start handling events from an existing subscription.
    ///
    /// Events are handled strictly one at a time, in delivery order: the next
    /// event is not received until the previous one (including its profile
    /// fetch) has been applied, so a slow fetch can never overwrite the result
    /// of a later event.
    pub fn spawn(store: AuthStore, mut subscription: Subscription<AuthEvent>) -> ListenerHandle {
        let (shutdown_tx, mut shutdown_rx) = oneshot::channel::<()>();

        let join = tokio::spawn(async move {
            tracing::info!("session listener started");
            // A dropped handle only detaches the listener; it keeps running
            // for the life of the process.
            let mut detached = false;

            loop {
                let event = tokio::select! {
                    biased;
                    signal = &mut shutdown_rx, if !detached => {
                        if signal.is_ok() {
                            tracing::info!("session listener unsubscribed");
                            subscription.close();
                            break;
                        }
                        detached = true;
                        continue;
                    }
                    event = subscription.recv() => match event {
                        Some(event) => event,
                        None => {
                            tracing::info!("auth event stream closed");
                            break;
                        }
                    },
                };

                handle_event(&store, event).await;
            }

            tracing::info!("session listener stopped");
        });

        ListenerHandle {
            shutdown: Some(shutdown_tx),
            join,
        }
    }
}

/// Unsubscribe handle for a running [`SessionListener`].
///
/// Dropping it leaves the listener running.
#[derive(Debug)]
pub struct ListenerHandle {
    shutdown: Option<oneshot::Sender<()>>,
    join: JoinHandle<()>,
}

impl ListenerHandle {
    /// Unsubscribe. The event being handled (if any) completes first; events
    /// still queued are not applied.
    pub async fn shutdown(mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        if let Err(err) = self.join.await {
            tracing::error!(error = %err, "session listener task failed");
        }
    }

    /// Wait for the listener to stop on its own (event stream closed).
    pub async fn join(self) {
        let Self { shutdown, join } = self;
        if let Err(err) = join.await {
            tracing::error!(error = %err, "session listener task failed");
        }
        drop(shutdown);
    }
}

async fn handle_event(store: &AuthStore, event: AuthEvent) {
    tracing::debug!(kind = %event.kind, "auth event received");

    match event.kind {
        AuthEventKind::SignedIn => {
            let Some(session) = event.session else {
                tracing::warn!("SIGNED_IN event without a session payload; ignored");
                return;
            };
            let observed = store.generation();
            let outcome = profile_outcome(store.backend().as_ref(), session.user_id()).await;
            let label = outcome.label();
            if !store.apply_push(observed, outcome.into_state()) {
                tracing::info!(outcome = label, "SIGNED_IN result superseded during profile fetch; dropped");
            }
        }
        AuthEventKind::SignedOut => store.set_user(None),
        AuthEventKind::TokenRefreshed => {
            tracing::debug!("token refreshed; auth state unchanged");
        }
        other => {
            tracing::debug!(kind = %other, "ignoring unhandled auth event");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    use pmo_auth::{AuthState, AuthUser, Role, UserProfile};
    use pmo_core::UserId;
    use pmo_events::{EventBus, InMemoryEventBus};

    use crate::cache::MemorySnapshotStore;
    use crate::config::ClientConfig;
    use crate::testing::{FakeBackend, Step, session_for};

    fn store_for(backend: Arc<FakeBackend>) -> AuthStore {
        AuthStore::new(backend, Arc::new(MemorySnapshotStore::new()), ClientConfig::default())
    }

    #[tokio::test]
    async fn signed_in_event_loads_profile() {
        let backend = FakeBackend::signed_in_as(Role::TECH_LEAD);
        let store = store_for(backend.clone());
        let bus = InMemoryEventBus::new();
        let handle = SessionListener::spawn(store.clone(), bus.subscribe());

        bus.publish(AuthEvent::signed_in(backend.session())).unwrap();
        drop(bus);
        handle.join().await;

        assert_eq!(store.state(), AuthState::authenticated(backend.profile()));
    }

    #[tokio::test]
    async fn signed_in_without_profile_is_degraded() {
        let backend = FakeBackend::signed_in_as(Role::TECH_LEAD);
        let stranger = session_for(AuthUser {
            id: UserId::new(),
            email: None,
        });
        let store = store_for(backend.clone());
        let bus = InMemoryEventBus::new();
        let handle = SessionListener::spawn(store.clone(), bus.subscribe());

        bus.publish(AuthEvent::signed_in(stranger)).unwrap();
        drop(bus);
        handle.join().await;

        assert_eq!(store.state(), AuthState::degraded());
    }

    #[tokio::test]
    async fn profile_error_on_sign_in_is_degraded() {
        let backend = FakeBackend::signed_in_as(Role::VIEWER);
        backend.set_profile(Step::Fail);
        let store = store_for(backend.clone());
        let bus = InMemoryEventBus::new();
        let handle = SessionListener::spawn(store.clone(), bus.subscribe());

        bus.publish(AuthEvent::signed_in(backend.session())).unwrap();
        drop(bus);
        handle.join().await;

        assert_eq!(store.state(), AuthState::degraded());
    }

    #[tokio::test(start_paused = true)]
    async fn later_sign_out_wins_over_slow_profile_fetch() {
        let backend = FakeBackend::signed_in_as(Role::DEVELOPER);
        backend.set_profile_delay(Duration::from_secs(5));
        let store = store_for(backend.clone());
        let bus = InMemoryEventBus::new();
        let handle = SessionListener::spawn(store.clone(), bus.subscribe());

        bus.publish(AuthEvent::signed_in(backend.session())).unwrap();
        bus.publish(AuthEvent::signed_out()).unwrap();
        drop(bus);
        handle.join().await;

        let state = store.state();
        assert!(!state.is_authenticated);
        assert!(state.is_initialized);
        assert_eq!(backend.calls().profile, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn sign_out_during_profile_fetch_is_not_undone() {
        let backend = FakeBackend::signed_in_as(Role::DEVELOPER);
        backend.set_profile_delay(Duration::from_secs(5));
        let snapshots = Arc::new(MemorySnapshotStore::new());
        let store = AuthStore::new(backend.clone(), snapshots.clone(), ClientConfig::default());
        let bus = InMemoryEventBus::new();
        let handle = SessionListener::spawn(store.clone(), bus.subscribe());

        bus.publish(AuthEvent::signed_in(backend.session())).unwrap();
        tokio::time::sleep(Duration::from_secs(1)).await;
        store.sign_out().await;
        assert!(!store.state().is_authenticated);

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(backend.calls().profile, 1);
        assert_eq!(store.state(), AuthState::unauthenticated());
        assert_eq!(snapshots.current(), Some(pmo_auth::SessionSnapshot::default()));

        drop(bus);
        handle.join().await;
    }

    #[tokio::test]
    async fn token_refresh_and_unknown_events_change_nothing() {
        let backend = FakeBackend::signed_in_as(Role::VIEWER);
        let store = store_for(backend.clone());
        store.initialize().await;
        let before = store.state();
        let generation = store.generation();

        let bus = InMemoryEventBus::new();
        let handle = SessionListener::spawn(store.clone(), bus.subscribe());
        bus.publish(AuthEvent::token_refreshed(backend.session())).unwrap();
        bus.publish(AuthEvent::new(AuthEventKind::from("MFA_CHALLENGE_VERIFIED"), None))
            .unwrap();
        bus.publish(AuthEvent::new(AuthEventKind::SignedIn, None)).unwrap();
        drop(bus);
        handle.join().await;

        assert_eq!(store.state(), before);
        assert_eq!(store.generation(), generation);
        assert_eq!(backend.calls().profile, 1);
    }

    #[tokio::test]
    async fn sign_in_event_replaces_previous_user() {
        let backend = FakeBackend::signed_in_as(Role::VIEWER);
        let admin = UserProfile::new(UserId::new(), "Admin", Role::ORG_ADMIN);
        backend.add_profile(admin.clone());
        let store = store_for(backend.clone());
        store.initialize().await;

        let bus = InMemoryEventBus::new();
        let handle = SessionListener::spawn(store.clone(), bus.subscribe());
        bus.publish(AuthEvent::signed_in(session_for(AuthUser {
            id: admin.id,
            email: None,
        })))
        .unwrap();
        drop(bus);
        handle.join().await;

        assert!(store.has_role(&Role::ORG_ADMIN));
        assert_eq!(store.state().user, Some(admin));
    }

    #[tokio::test]
    async fn shutdown_unsubscribes() {
        let backend = FakeBackend::signed_in_as(Role::VIEWER);
        let store = store_for(backend.clone());
        let bus = Arc::new(InMemoryEventBus::new());
        let handle = SessionListener::spawn(store.clone(), bus.subscribe());

        handle.shutdown().await;
        bus.publish(AuthEvent::signed_out()).unwrap();

        assert_eq!(bus.subscriber_count(), 0);
        assert_eq!(store.state(), AuthState::default());
    }

    #[tokio::test]
    async fn dropped_handle_keeps_listening() {
        let backend = FakeBackend::signed_in_as(Role::VIEWER);
        let store = store_for(backend.clone());
        let bus = InMemoryEventBus::new();
        drop(SessionListener::spawn(store.clone(), bus.subscribe()));

        let mut rx = store.subscribe();
        bus.publish(AuthEvent::signed_out()).unwrap();
        rx.wait_for(|state| state.is_initialized).await.unwrap();

        assert_eq!(store.state(), AuthState::unauthenticated());
    }
}

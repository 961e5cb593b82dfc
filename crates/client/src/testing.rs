//! Scripted identity backend for unit tests.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use pmo_auth::{AuthUser, Role, Session, UserProfile};
use pmo_core::UserId;

use crate::backend::{BackendError, IdentityBackend};

/// What a scripted call does.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Step {
    Found,
    Missing,
    Fail,
    /// Never settles.
    Hang,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct Calls {
    pub session: usize,
    pub user: usize,
    pub profile: usize,
    pub sign_out: usize,
}

#[derive(Debug)]
struct Script {
    session: Step,
    user: Step,
    profile: Step,
    sign_out: Step,
    session_delay: Duration,
    profile_delay: Duration,
}

#[derive(Debug)]
pub(crate) struct FakeBackend {
    user: AuthUser,
    script: Mutex<Script>,
    profiles: Mutex<HashMap<UserId, UserProfile>>,
    calls: Mutex<Calls>,
}

impl FakeBackend {
    pub fn signed_in_as(role: Role) -> Arc<Self> {
        let user = AuthUser {
            id: UserId::new(),
            email: Some("member@example.com".to_string()),
        };
        let profile = UserProfile::new(user.id, "Member", role).with_email("member@example.com");

        Arc::new(Self {
            user,
            script: Mutex::new(Script {
                session: Step::Found,
                user: Step::Found,
                profile: Step::Found,
                sign_out: Step::Found,
                session_delay: Duration::ZERO,
                profile_delay: Duration::ZERO,
            }),
            profiles: Mutex::new(HashMap::from([(profile.id, profile)])),
            calls: Mutex::new(Calls::default()),
        })
    }

    pub fn signed_out() -> Arc<Self> {
        let backend = Self::signed_in_as(Role::VIEWER);
        backend.set_session(Step::Missing);
        backend
    }

    pub fn user_id(&self) -> UserId {
        self.user.id
    }

    pub fn profile(&self) -> UserProfile {
        self.profiles.lock().unwrap()[&self.user.id].clone()
    }

    pub fn session(&self) -> Session {
        session_for(self.user.clone())
    }

    pub fn add_profile(&self, profile: UserProfile) {
        self.profiles.lock().unwrap().insert(profile.id, profile);
    }

    pub fn calls(&self) -> Calls {
        *self.calls.lock().unwrap()
    }

    pub fn set_session(&self, step: Step) {
        self.script.lock().unwrap().session = step;
    }

    pub fn set_user(&self, step: Step) {
        self.script.lock().unwrap().user = step;
    }

    pub fn set_profile(&self, step: Step) {
        self.script.lock().unwrap().profile = step;
    }

    pub fn set_sign_out(&self, step: Step) {
        self.script.lock().unwrap().sign_out = step;
    }

    pub fn set_session_delay(&self, delay: Duration) {
        self.script.lock().unwrap().session_delay = delay;
    }

    pub fn set_profile_delay(&self, delay: Duration) {
        self.script.lock().unwrap().profile_delay = delay;
    }

    fn record(&self, f: impl FnOnce(&mut Calls)) {
        f(&mut self.calls.lock().unwrap());
    }
}

pub(crate) fn session_for(user: AuthUser) -> Session {
    Session {
        access_token: format!("token-{}", user.id),
        refresh_token: None,
        expires_at: None,
        user,
    }
}

async fn play<T>(step: Step, delay: Duration, found: impl FnOnce() -> Option<T>) -> Result<Option<T>, BackendError> {
    if !delay.is_zero() {
        tokio::time::sleep(delay).await;
    }
    match step {
        Step::Found => Ok(found()),
        Step::Missing => Ok(None),
        Step::Fail => Err(BackendError::Network("connection reset".to_string())),
        Step::Hang => std::future::pending().await,
    }
}

#[async_trait]
impl IdentityBackend for FakeBackend {
    async fn current_session(&self) -> Result<Option<Session>, BackendError> {
        self.record(|c| c.session += 1);
        let (step, delay) = {
            let script = self.script.lock().unwrap();
            (script.session, script.session_delay)
        };
        play(step, delay, || Some(self.session())).await
    }

    async fn current_user(&self) -> Result<Option<AuthUser>, BackendError> {
        self.record(|c| c.user += 1);
        let step = self.script.lock().unwrap().user;
        play(step, Duration::ZERO, || Some(self.user.clone())).await
    }

    async fn fetch_profile(&self, id: UserId) -> Result<Option<UserProfile>, BackendError> {
        self.record(|c| c.profile += 1);
        let (step, delay) = {
            let script = self.script.lock().unwrap();
            (script.profile, script.profile_delay)
        };
        play(step, delay, || self.profiles.lock().unwrap().get(&id).cloned()).await
    }

    async fn sign_out(&self) -> Result<(), BackendError> {
        self.record(|c| c.sign_out += 1);
        let step = self.script.lock().unwrap().sign_out;
        play(step, Duration::ZERO, || Some(())).await.map(|_| ())
    }
}

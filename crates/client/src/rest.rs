//! HTTP identity backend for a hosted auth + REST profile service.
//!
//! Speaks the common `/auth/v1` (sessions) and `/rest/v1` (tables) dialect.
//! The session is kept in memory and, when a session file is configured,
//! mirrored to disk so a later process can resume it. Identity changes made
//! through this backend are pushed to subscribers as `AuthEvent`s.

use std::path::PathBuf;
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};
use serde::Deserialize;
use serde_json::json;

use pmo_auth::{AuthUser, Role, Session, UserProfile};
use pmo_core::UserId;
use pmo_events::{AuthEvent, EventBus, InMemoryEventBus, Subscription};

use crate::backend::{AuthEventSource, BackendError, IdentityBackend};
use crate::cache::JsonFile;
use crate::config::{ClientConfig, ConfigError, ENV_BACKEND_API_KEY, ENV_BACKEND_URL};

const PROFILES_TABLE: &str = "profiles";

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default)]
    expires_in: Option<i64>,
    user: AuthUser,
}

impl TokenResponse {
    fn into_session(self) -> Session {
        Session {
            access_token: self.access_token,
            refresh_token: self.refresh_token,
            expires_at: self
                .expires_in
                .map(|secs| Utc::now() + ChronoDuration::seconds(secs)),
            user: self.user,
        }
    }
}

/// Row shape of the profile table.
#[derive(Debug, Deserialize)]
struct ProfileRow {
    id: UserId,
    #[serde(default)]
    full_name: Option<String>,
    #[serde(default)]
    email: Option<String>,
    #[serde(default)]
    avatar_url: Option<String>,
    role: Role,
}

impl From<ProfileRow> for UserProfile {
    fn from(row: ProfileRow) -> Self {
        let display_name = row
            .full_name
            .clone()
            .or_else(|| row.email.clone())
            .unwrap_or_default();
        UserProfile {
            id: row.id,
            display_name,
            email: row.email,
            avatar_url: row.avatar_url,
            role: row.role,
        }
    }
}

/// `reqwest`-based [`IdentityBackend`] and [`AuthEventSource`].
pub struct RestBackend {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    session: Mutex<Option<Session>>,
    /// Token file mirroring `session` (0600 on unix).
    session_file: Option<JsonFile>,
    events: InMemoryEventBus<AuthEvent>,
}

impl RestBackend {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            session: Mutex::new(None),
            session_file: None,
            events: InMemoryEventBus::new(),
        }
    }

    /// Mirror the session to `path`, resuming whatever session it holds.
    pub fn with_session_file(mut self, path: impl Into<PathBuf>) -> Self {
        let file = JsonFile::new(path);
        let restored = match file.read::<Session>() {
            Ok(restored) => restored,
            Err(err) => {
                tracing::warn!(path = %file.path().display(), "ignoring unreadable session file: {err:?}");
                None
            }
        };
        if let Some(session) = &restored {
            tracing::debug!(user_id = %session.user_id(), "resumed stored session");
        }

        self.session = Mutex::new(restored);
        self.session_file = Some(file);
        self
    }

    pub fn from_config(config: &ClientConfig) -> Result<Self, ConfigError> {
        let url = config
            .backend_url
            .clone()
            .ok_or(ConfigError::Missing(ENV_BACKEND_URL))?;
        let key = config
            .backend_api_key
            .clone()
            .ok_or(ConfigError::Missing(ENV_BACKEND_API_KEY))?;
        let backend = Self::new(url, key);
        Ok(match config.session_path() {
            Some(path) => backend.with_session_file(path),
            None => backend,
        })
    }

    /// Exchange credentials for a session and announce `SIGNED_IN`.
    pub async fn sign_in_with_password(&self, email: &str, password: &str) -> Result<Session, BackendError> {
        let session = self
            .token_grant("password", json!({ "email": email, "password": password }))
            .await?;
        tracing::info!(user_id = %session.user_id(), "signed in");
        self.replace_session(Some(session.clone()));
        self.emit(AuthEvent::signed_in(session.clone()));
        Ok(session)
    }

    /// Trade the refresh token for a new session and announce `TOKEN_REFRESHED`.
    pub async fn refresh(&self) -> Result<Session, BackendError> {
        let refresh_token = self
            .held_session()
            .and_then(|s| s.refresh_token)
            .ok_or(BackendError::NoSession)?;
        let session = self
            .token_grant("refresh_token", json!({ "refresh_token": refresh_token }))
            .await?;
        self.replace_session(Some(session.clone()));
        self.emit(AuthEvent::token_refreshed(session.clone()));
        Ok(session)
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn held_session(&self) -> Option<Session> {
        self.slot().clone()
    }

    /// Swap the held session and mirror it to the session file.
    fn replace_session(&self, session: Option<Session>) -> Option<Session> {
        if let Some(file) = &self.session_file {
            let mirrored = match &session {
                Some(session) => file.write(session),
                None => file.remove(),
            };
            if let Err(err) = mirrored {
                tracing::warn!(path = %file.path().display(), "failed to update session file: {err:?}");
            }
        }
        std::mem::replace(&mut *self.slot(), session)
    }

    fn slot(&self) -> MutexGuard<'_, Option<Session>> {
        self.session.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn emit(&self, event: AuthEvent) {
        let kind = event.kind.clone();
        if let Err(err) = self.events.publish(event) {
            tracing::error!(%kind, error = ?err, "failed to publish auth event");
        }
    }

    /// Bearer for data requests: the user's token when signed in, otherwise
    /// the project key.
    fn bearer(&self) -> String {
        self.held_session()
            .map(|s| s.access_token)
            .unwrap_or_else(|| self.api_key.clone())
    }

    async fn token_grant(&self, grant_type: &str, body: serde_json::Value) -> Result<Session, BackendError> {
        let resp = self
            .client
            .post(self.url("/auth/v1/token"))
            .query(&[("grant_type", grant_type)])
            .header("apikey", &self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| BackendError::Network(e.to_string()))?;

        let token: TokenResponse = ensure_success(resp)
            .await?
            .json()
            .await
            .map_err(|e| BackendError::Parse(e.to_string()))?;
        Ok(token.into_session())
    }
}

async fn ensure_success(resp: reqwest::Response) -> Result<reqwest::Response, BackendError> {
    let status = resp.status();
    if status.is_success() {
        Ok(resp)
    } else {
        Err(BackendError::Api(status.as_u16(), resp.text().await.unwrap_or_default()))
    }
}

#[async_trait]
impl IdentityBackend for RestBackend {
    async fn current_session(&self) -> Result<Option<Session>, BackendError> {
        let Some(session) = self.held_session() else {
            return Ok(None);
        };
        if !session.is_expired(Utc::now()) {
            return Ok(Some(session));
        }
        if session.refresh_token.is_none() {
            return Ok(None);
        }

        tracing::debug!("access token expired; refreshing");
        match self.refresh().await {
            Ok(session) => Ok(Some(session)),
            Err(BackendError::Api(status, _)) => {
                tracing::info!(status, "refresh token rejected; dropping stored session");
                self.replace_session(None);
                Ok(None)
            }
            Err(err) => Err(err),
        }
    }

    async fn current_user(&self) -> Result<Option<AuthUser>, BackendError> {
        let Some(session) = self.held_session() else {
            return Ok(None);
        };

        let resp = self
            .client
            .get(self.url("/auth/v1/user"))
            .header("apikey", &self.api_key)
            .bearer_auth(&session.access_token)
            .send()
            .await
            .map_err(|e| BackendError::Network(e.to_string()))?;

        if resp.status() == reqwest::StatusCode::UNAUTHORIZED {
            tracing::debug!("access token rejected by identity backend");
            return Ok(None);
        }

        let user: AuthUser = ensure_success(resp)
            .await?
            .json()
            .await
            .map_err(|e| BackendError::Parse(e.to_string()))?;
        Ok(Some(user))
    }

    async fn fetch_profile(&self, id: UserId) -> Result<Option<UserProfile>, BackendError> {
        let resp = self
            .client
            .get(self.url(&format!("/rest/v1/{PROFILES_TABLE}")))
            .query(&[("id", format!("eq.{id}")), ("select", "*".to_string())])
            .header("apikey", &self.api_key)
            .bearer_auth(self.bearer())
            .send()
            .await
            .map_err(|e| BackendError::Network(e.to_string()))?;

        let rows: Vec<ProfileRow> = ensure_success(resp)
            .await?
            .json()
            .await
            .map_err(|e| BackendError::Parse(e.to_string()))?;
        Ok(rows.into_iter().next().map(UserProfile::from))
    }

    async fn sign_out(&self) -> Result<(), BackendError> {
        let Some(session) = self.replace_session(None) else {
            self.emit(AuthEvent::signed_out());
            return Ok(());
        };

        let result = match self
            .client
            .post(self.url("/auth/v1/logout"))
            .header("apikey", &self.api_key)
            .bearer_auth(&session.access_token)
            .send()
            .await
        {
            Ok(resp) => ensure_success(resp).await.map(|_| ()),
            Err(e) => Err(BackendError::Network(e.to_string())),
        };

        // The local session is gone either way.
        self.emit(AuthEvent::signed_out());
        result
    }
}

impl AuthEventSource for RestBackend {
    fn subscribe_auth_events(&self) -> Subscription<AuthEvent> {
        self.events.subscribe()
    }
}

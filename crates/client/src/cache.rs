//! Persisted session snapshot (survives process restarts).
//!
//! Holds only `{ user, isAuthenticated }`. It is read once at startup and
//! written through whenever that projection changes. Failures are logged and
//! swallowed: a missing or unreadable snapshot just means "start cold".

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use anyhow::Context;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use pmo_auth::SessionSnapshot;

use crate::config::ClientConfig;

/// On-disk format version. Snapshots with any other version are ignored.
pub const SNAPSHOT_VERSION: u32 = 1;

/// Durable key-value slot for the session snapshot.
///
/// Synchronous and local; implementations never surface errors.
pub trait SnapshotStore: Send + Sync {
    fn read_snapshot(&self) -> Option<SessionSnapshot>;

    fn write_snapshot(&self, snapshot: &SessionSnapshot);
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StoredSnapshot {
    version: u32,
    saved_at: DateTime<Utc>,
    state: SessionSnapshot,
}

/// A JSON document on disk, replaced atomically on every write.
#[derive(Debug, Clone)]
pub(crate) struct JsonFile {
    path: PathBuf,
}

impl JsonFile {
    pub(crate) fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub(crate) fn path(&self) -> &Path {
        &self.path
    }

    /// `Ok(None)` when the file does not exist.
    pub(crate) fn read<T: DeserializeOwned>(&self) -> anyhow::Result<Option<T>> {
        let raw = match std::fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(None),
            Err(err) => {
                return Err(err).with_context(|| format!("failed to read {:?}", self.path));
            }
        };

        let value = serde_json::from_str(&raw)
            .with_context(|| format!("failed to deserialize {:?}", self.path))?;
        Ok(Some(value))
    }

    pub(crate) fn write<T: Serialize>(&self, value: &T) -> anyhow::Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("failed to create cache directory at {:?}", parent))?;
        }

        let body = serde_json::to_vec_pretty(value)
            .with_context(|| format!("failed to serialize {:?}", self.path))?;

        // Write-then-rename so a crash never leaves a torn file behind.
        let mut tmp = self.path.clone().into_os_string();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);
        std::fs::write(&tmp, body).with_context(|| format!("failed to write {:?}", tmp))?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&tmp, std::fs::Permissions::from_mode(0o600))
                .with_context(|| format!("failed to restrict permissions on {:?}", tmp))?;
        }
        std::fs::rename(&tmp, &self.path)
            .with_context(|| format!("failed to move {:?} into place", self.path))?;
        Ok(())
    }

    /// Delete the file; a missing file is not an error.
    pub(crate) fn remove(&self) -> anyhow::Result<()> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err).with_context(|| format!("failed to remove {:?}", self.path)),
        }
    }
}

/// JSON file-backed snapshot store.
#[derive(Debug, Clone)]
pub struct FileSnapshotStore {
    file: JsonFile,
}

impl FileSnapshotStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            file: JsonFile::new(path),
        }
    }

    /// Store at `<cache_dir>/<storage_key>.json`, or `None` if no cache
    /// directory can be determined on this platform.
    pub fn from_config(config: &ClientConfig) -> Option<Self> {
        config.snapshot_path().map(Self::new)
    }

    pub fn path(&self) -> &Path {
        self.file.path()
    }

    fn try_write(&self, snapshot: &SessionSnapshot) -> anyhow::Result<()> {
        self.file.write(&StoredSnapshot {
            version: SNAPSHOT_VERSION,
            saved_at: Utc::now(),
            state: snapshot.clone(),
        })
    }
}

impl SnapshotStore for FileSnapshotStore {
    fn read_snapshot(&self) -> Option<SessionSnapshot> {
        match self.file.read::<StoredSnapshot>() {
            Ok(Some(stored)) if stored.version == SNAPSHOT_VERSION => {
                tracing::debug!(saved_at = %stored.saved_at, "loaded session snapshot");
                Some(stored.state)
            }
            Ok(Some(stored)) => {
                tracing::warn!(
                    version = stored.version,
                    expected = SNAPSHOT_VERSION,
                    "ignoring session snapshot with unsupported version"
                );
                None
            }
            Ok(None) => None,
            Err(err) => {
                tracing::warn!(path = %self.path().display(), "ignoring unreadable session snapshot: {err:?}");
                None
            }
        }
    }

    fn write_snapshot(&self, snapshot: &SessionSnapshot) {
        if let Err(err) = self.try_write(snapshot) {
            tracing::error!(path = %self.path().display(), "failed to persist session snapshot: {err:?}");
        }
    }
}

/// In-process snapshot store for tests and for hosts without durable storage.
#[derive(Debug, Default)]
pub struct MemorySnapshotStore {
    slot: Mutex<Option<SessionSnapshot>>,
    writes: AtomicUsize,
}

impl MemorySnapshotStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_snapshot(snapshot: SessionSnapshot) -> Self {
        Self {
            slot: Mutex::new(Some(snapshot)),
            writes: AtomicUsize::new(0),
        }
    }

    /// Whatever was last written (or seeded).
    pub fn current(&self) -> Option<SessionSnapshot> {
        self.slot.lock().ok().and_then(|slot| slot.clone())
    }

    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }
}

impl SnapshotStore for MemorySnapshotStore {
    fn read_snapshot(&self) -> Option<SessionSnapshot> {
        self.current()
    }

    fn write_snapshot(&self, snapshot: &SessionSnapshot) {
        if let Ok(mut slot) = self.slot.lock() {
            *slot = Some(snapshot.clone());
            self.writes.fetch_add(1, Ordering::SeqCst);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pmo_auth::{Role, UserProfile};
    use pmo_core::UserId;

    fn signed_in_snapshot() -> SessionSnapshot {
        SessionSnapshot {
            user: Some(UserProfile::new(UserId::new(), "Grace", Role::PROJECT_MANAGER)),
            is_authenticated: true,
        }
    }

    #[test]
    fn missing_file_reads_as_absent() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileSnapshotStore::new(dir.path().join("auth-storage.json"));
        assert_eq!(store.read_snapshot(), None);
    }

    #[test]
    fn written_snapshot_is_read_back_by_a_new_store() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("auth-storage.json");
        let snapshot = signed_in_snapshot();

        FileSnapshotStore::new(&path).write_snapshot(&snapshot);

        let fresh = FileSnapshotStore::new(&path);
        assert_eq!(fresh.read_snapshot(), Some(snapshot));

        let raw: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(raw["version"], SNAPSHOT_VERSION);
        assert_eq!(raw["state"]["isAuthenticated"], true);
        assert!(raw["state"].get("isLoading").is_none());
    }

    #[test]
    fn corrupt_or_foreign_version_is_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("auth-storage.json");
        let store = FileSnapshotStore::new(&path);

        std::fs::write(&path, "{ not json").unwrap();
        assert_eq!(store.read_snapshot(), None);

        std::fs::write(
            &path,
            r#"{"version":0,"savedAt":"2024-01-01T00:00:00Z","state":{"user":null,"isAuthenticated":true}}"#,
        )
        .unwrap();
        assert_eq!(store.read_snapshot(), None);
    }

    #[test]
    fn json_file_remove_tolerates_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let file = JsonFile::new(dir.path().join("auth-storage-session.json"));
        file.write(&serde_json::json!({ "access_token": "a" })).unwrap();
        assert!(file.path().exists());

        file.remove().unwrap();
        assert!(!file.path().exists());
        file.remove().unwrap();
        assert_eq!(file.read::<serde_json::Value>().unwrap(), None);
    }

    #[test]
    fn memory_store_counts_writes() {
        let store = MemorySnapshotStore::with_snapshot(signed_in_snapshot());
        assert!(store.read_snapshot().is_some());

        store.write_snapshot(&SessionSnapshot::default());
        assert_eq!(store.current(), Some(SessionSnapshot::default()));
        assert_eq!(store.write_count(), 1);
    }
}

//! Local file-based state storage backend.
//!
//! State lives in `<dir>/state.json` and is replaced atomically through a
//! temporary file. The lock is a separate `<dir>/state.lock` created with
//! exclusive-create semantics.

use async_trait::async_trait;
use chrono::Duration;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

use crate::error::{MetaKubeError, Result, StateError};

use super::lock::{LockInfo, LOCK_EXPIRY_SECS};
use super::store::StateStore;
use super::types::ClusterState;

/// State file name.
const STATE_FILE: &str = "state.json";

/// Lock file name.
const LOCK_FILE: &str = "state.lock";

/// Local file-based state store.
#[derive(Debug)]
pub struct LocalStateStore {
    base_dir: PathBuf,
    state_path: PathBuf,
    lock_path: PathBuf,
    lock_ttl: Duration,
}

impl LocalStateStore {
    /// Creates a store rooted at `base_dir`.
    #[must_use]
    pub fn with_base_dir(base_dir: impl Into<PathBuf>) -> Self {
        let base_dir = base_dir.into();
        Self {
            state_path: base_dir.join(STATE_FILE),
            lock_path: base_dir.join(LOCK_FILE),
            base_dir,
            lock_ttl: Duration::seconds(LOCK_EXPIRY_SECS),
        }
    }

    /// Overrides the lock lifetime.
    #[must_use]
    pub fn with_lock_ttl(mut self, ttl: Duration) -> Self {
        self.lock_ttl = ttl;
        self
    }

    /// How often a held lock should be refreshed: a third of its lifetime.
    #[must_use]
    pub fn refresh_interval(&self) -> std::time::Duration {
        (self.lock_ttl / 3)
            .to_std()
            .unwrap_or(std::time::Duration::from_secs(1))
    }

    /// Path of the state file.
    #[must_use]
    pub fn state_path(&self) -> &Path {
        &self.state_path
    }

    async fn ensure_dir(&self) -> Result<()> {
        if !self.base_dir.exists() {
            debug!("Creating state directory: {}", self.base_dir.display());
            fs::create_dir_all(&self.base_dir)
                .await
                .map_err(|e| state_write(format!("Failed to create state directory: {e}")))?;
        }
        Ok(())
    }

    async fn read_lock_file(&self) -> Result<Option<LockInfo>> {
        let content = match fs::read_to_string(&self.lock_path).await {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(corrupted(format!("Failed to read lock file: {e}"))),
        };

        serde_json::from_str(&content)
            .map(Some)
            .map_err(|e| corrupted(format!("Failed to parse lock file: {e}")))
    }

    /// Writes the lock only if no lock file exists.
    ///
    /// Returns `false` when another lock file is in the way.
    async fn create_lock_file(&self, lock: &LockInfo) -> Result<bool> {
        self.ensure_dir().await?;

        let content = serde_json::to_string_pretty(lock).map_err(|e| {
            MetaKubeError::State(StateError::serialization(format!("Failed to serialize lock: {e}")))
        })?;

        let mut file = match fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&self.lock_path)
            .await
        {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::AlreadyExists => return Ok(false),
            Err(e) => return Err(lock_failed(format!("Failed to create lock file: {e}"))),
        };

        file.write_all(content.as_bytes())
            .await
            .map_err(|e| lock_failed(format!("Failed to write lock file: {e}")))?;
        file.sync_all()
            .await
            .map_err(|e| lock_failed(format!("Failed to sync lock file: {e}")))?;

        Ok(true)
    }

    /// Replaces the lock file through a temporary file.
    async fn write_lock_file(&self, lock: &LockInfo) -> Result<()> {
        let content = serde_json::to_string_pretty(lock).map_err(|e| {
            MetaKubeError::State(StateError::serialization(format!("Failed to serialize lock: {e}")))
        })?;

        let temp_path = self.lock_path.with_extension("lock.tmp");
        fs::write(&temp_path, content)
            .await
            .map_err(|e| lock_failed(format!("Failed to write lock file: {e}")))?;
        fs::rename(&temp_path, &self.lock_path)
            .await
            .map_err(|e| lock_failed(format!("Failed to replace lock file: {e}")))
    }

    async fn remove_lock_file(&self) -> Result<()> {
        match fs::remove_file(&self.lock_path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(lock_failed(format!("Failed to delete lock file: {e}"))),
        }
    }
}

#[async_trait]
impl StateStore for LocalStateStore {
    async fn load(&self) -> Result<Option<ClusterState>> {
        let content = match fs::read_to_string(&self.state_path).await {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!("State file does not exist: {}", self.state_path.display());
                return Ok(None);
            }
            Err(e) => return Err(corrupted(format!("Failed to read state file: {e}"))),
        };

        debug!("Loaded state from: {}", self.state_path.display());
        serde_json::from_str(&content)
            .map(Some)
            .map_err(|e| corrupted(format!("Failed to parse state file: {e}")))
    }

    async fn save(&self, state: &ClusterState) -> Result<()> {
        self.ensure_dir().await?;

        let content = serde_json::to_string_pretty(state).map_err(|e| {
            MetaKubeError::State(StateError::serialization(format!("Failed to serialize state: {e}")))
        })?;

        let temp_path = self.state_path.with_extension("json.tmp");
        let mut file = fs::File::create(&temp_path)
            .await
            .map_err(|e| state_write(format!("Failed to create temp state file: {e}")))?;
        file.write_all(content.as_bytes())
            .await
            .map_err(|e| state_write(format!("Failed to write state file: {e}")))?;
        file.sync_all()
            .await
            .map_err(|e| state_write(format!("Failed to sync state file: {e}")))?;
        drop(file);

        fs::rename(&temp_path, &self.state_path)
            .await
            .map_err(|e| state_write(format!("Failed to rename state file: {e}")))?;

        info!("Saved state to: {}", self.state_path.display());
        Ok(())
    }

    async fn delete(&self) -> Result<()> {
        match fs::remove_file(&self.state_path).await {
            Ok(()) => {
                info!("Deleted state file: {}", self.state_path.display());
                Ok(())
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(state_write(format!("Failed to delete state file: {e}"))),
        }
    }

    async fn acquire_lock(&self, holder: &str, operation: &str) -> Result<LockInfo> {
        let lock = LockInfo::with_ttl(holder, operation, self.lock_ttl);
        if self.create_lock_file(&lock).await? {
            debug!("Acquired state lock {} (expires in {}s)", lock.lock_id, lock.remaining_secs());
            return Ok(lock);
        }

        match self.read_lock_file().await? {
            Some(existing) if !existing.is_expired() => {
                Err(MetaKubeError::State(StateError::LockedByOther {
                    holder: existing.holder,
                    since: existing.acquired_at.to_rfc3339(),
                }))
            }
            _ => {
                warn!("Taking over expired state lock");
                self.remove_lock_file().await?;
                if self.create_lock_file(&lock).await? {
                    Ok(lock)
                } else {
                    Err(lock_failed("Lock was taken concurrently"))
                }
            }
        }
    }

    async fn refresh_lock(&self, lock_id: &str) -> Result<LockInfo> {
        match self.read_lock_file().await? {
            Some(mut lock) if lock.lock_id == lock_id => {
                lock.refresh(self.lock_ttl);
                self.write_lock_file(&lock).await?;
                Ok(lock)
            }
            Some(other) => Err(lock_failed(format!(
                "Lock {lock_id} was taken over by {}",
                other.holder
            ))),
            None => Err(lock_failed(format!("Lock {lock_id} no longer exists"))),
        }
    }

    async fn release_lock(&self, lock_id: &str) -> Result<()> {
        match self.read_lock_file().await? {
            Some(existing) if existing.lock_id == lock_id => {
                self.remove_lock_file().await?;
                debug!("Released state lock {lock_id}");
            }
            Some(existing) => {
                debug!("Lock {lock_id} no longer held; found {}", existing.lock_id);
            }
            None => {}
        }
        Ok(())
    }

    async fn force_unlock(&self) -> Result<Option<LockInfo>> {
        let existing = self.read_lock_file().await?;
        self.remove_lock_file().await?;
        Ok(existing)
    }

    async fn lock_info(&self) -> Result<Option<LockInfo>> {
        self.read_lock_file().await
    }

    fn location(&self) -> String {
        self.state_path.display().to_string()
    }
}

fn corrupted(message: String) -> MetaKubeError {
    MetaKubeError::State(StateError::Corrupted { message })
}

fn state_write(message: String) -> MetaKubeError {
    MetaKubeError::State(StateError::write(message))
}

fn lock_failed(message: impl Into<String>) -> MetaKubeError {
    MetaKubeError::State(StateError::LockFailed {
        message: message.into(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConfigParser;
    use crate::metakube::ClusterLocator;
    use crate::state::{hold_lock, HistoryEntry, Operation};
    use chrono::Utc;
    use tempfile::TempDir;

    const MANIFEST: &str = r"
cluster:
  project_id: prj
  name: demo
  dc: dbl1
  version: '1.17'
  provider:
    tenant: t1
    username: ops
    password: secret
  node_pool:
    name: workers
    replicas: 2
    flavor: m1.small
    image: Ubuntu Bionic
";

    fn store() -> (LocalStateStore, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let store = LocalStateStore::with_base_dir(temp_dir.path().join(".metakube"));
        (store, temp_dir)
    }

    fn state() -> ClusterState {
        let manifest = ConfigParser::new().parse_yaml(MANIFEST, None).unwrap();
        ClusterState::new(&ClusterLocator::new("prj", "seed", "c1"), &manifest.cluster)
    }

    #[tokio::test]
    async fn test_save_and_load() {
        let (store, _temp) = store();

        let mut saved = state();
        saved.add_history(HistoryEntry::new(Operation::Create, Vec::new()));
        store.save(&saved).await.unwrap();

        let loaded = store.load().await.unwrap().unwrap();
        assert_eq!(loaded.cluster_id, "c1");
        assert_eq!(loaded.applied, saved.applied);
        assert_eq!(loaded.history.len(), 1);
        assert!(!store.state_path().with_extension("json.tmp").exists());

        let raw = std::fs::read_to_string(store.state_path()).unwrap();
        assert!(!raw.contains("secret"));
    }

    #[tokio::test]
    async fn test_load_missing_and_delete_twice() {
        let (store, _temp) = store();
        assert!(store.load().await.unwrap().is_none());

        store.save(&state()).await.unwrap();
        store.delete().await.unwrap();
        store.delete().await.unwrap();
        assert!(store.load().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_corrupted_state_is_reported() {
        let (store, _temp) = store();
        std::fs::create_dir_all(store.state_path().parent().unwrap()).unwrap();
        std::fs::write(store.state_path(), "{not json").unwrap();

        let err = store.load().await.unwrap_err();
        assert!(matches!(err, MetaKubeError::State(StateError::Corrupted { .. })));
    }

    #[tokio::test]
    async fn test_lock_acquire_release() {
        let (store, _temp) = store();

        let lock = store.acquire_lock("holder-1", "apply").await.unwrap();
        assert!(store.lock_info().await.unwrap().is_some());

        store.release_lock(&lock.lock_id).await.unwrap();
        assert!(store.lock_info().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_lock_conflict() {
        let (store, _temp) = store();

        let _first = store.acquire_lock("holder-1", "apply").await.unwrap();
        let err = store.acquire_lock("holder-2", "destroy").await.unwrap_err();
        assert!(matches!(
            err,
            MetaKubeError::State(StateError::LockedByOther { ref holder, .. }) if holder == "holder-1"
        ));
    }

    #[tokio::test]
    async fn test_expired_lock_is_taken_over() {
        let (store, _temp) = store();

        let mut stale = LockInfo::new("crashed", "apply");
        stale.expires_at = Utc::now() - Duration::seconds(1);
        assert!(store.create_lock_file(&stale).await.unwrap());

        let lock = store.acquire_lock("holder-2", "apply").await.unwrap();
        assert_eq!(store.lock_info().await.unwrap().unwrap().lock_id, lock.lock_id);
    }

    #[tokio::test]
    async fn test_release_ignores_foreign_lock() {
        let (store, _temp) = store();

        let _held = store.acquire_lock("holder-1", "apply").await.unwrap();
        store.release_lock("someone-else").await.unwrap();
        assert!(store.lock_info().await.unwrap().is_some());

        let removed = store.force_unlock().await.unwrap().unwrap();
        assert_eq!(removed.holder, "holder-1");
        assert!(store.lock_info().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_unrefreshed_lock_expires() {
        let (store, _temp) = store();
        let store = store.with_lock_ttl(Duration::milliseconds(50));

        let _first = store.acquire_lock("holder-1", "apply").await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(120)).await;

        let second = store.acquire_lock("holder-2", "apply").await.unwrap();
        assert_eq!(second.holder, "holder-2");
    }

    #[tokio::test]
    async fn test_held_lock_outlives_its_lifetime() {
        let (store, _temp) = store();
        let store = store.with_lock_ttl(Duration::milliseconds(300));

        let lock = store.acquire_lock("holder-1", "apply").await.unwrap();
        let second = hold_lock(&store, &lock, store.refresh_interval(), async {
            // Three lifetimes pass while the first invocation is still working.
            tokio::time::sleep(std::time::Duration::from_millis(900)).await;
            store.acquire_lock("holder-2", "apply").await
        })
        .await;

        assert!(matches!(
            second,
            Err(MetaKubeError::State(StateError::LockedByOther { ref holder, .. })) if holder == "holder-1"
        ));
        store.release_lock(&lock.lock_id).await.unwrap();
        assert!(store.lock_info().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_refresh_rejects_foreign_lock() {
        let (store, _temp) = store();

        let held = store.acquire_lock("holder-1", "apply").await.unwrap();
        let refreshed = store.refresh_lock(&held.lock_id).await.unwrap();
        assert!(refreshed.expires_at >= held.expires_at);

        assert!(store.refresh_lock("someone-else").await.is_err());
        store.force_unlock().await.unwrap();
        assert!(store.refresh_lock(&held.lock_id).await.is_err());
    }
}

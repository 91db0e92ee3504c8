//! State store trait definition.

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::MissedTickBehavior;
use tracing::{debug, warn};

use crate::error::Result;
use super::lock::LockInfo;
use super::types::ClusterState;

/// Trait for state storage backends.
#[async_trait]
pub trait StateStore: Send + Sync {
    /// Loads the recorded state.
    ///
    /// Returns `None` if nothing has been recorded yet.
    async fn load(&self) -> Result<Option<ClusterState>>;

    /// Saves the recorded state.
    async fn save(&self, state: &ClusterState) -> Result<()>;

    /// Deletes the recorded state.
    async fn delete(&self) -> Result<()>;

    /// Takes the lock, or fails if a live lock is held by someone else.
    async fn acquire_lock(&self, holder: &str, operation: &str) -> Result<LockInfo>;

    /// Extends the lock held under `lock_id`.
    ///
    /// Fails when the lock is gone or now belongs to someone else.
    async fn refresh_lock(&self, lock_id: &str) -> Result<LockInfo>;

    /// Releases the lock if `lock_id` still holds it.
    async fn release_lock(&self, lock_id: &str) -> Result<()>;

    /// Removes any lock regardless of holder.
    async fn force_unlock(&self) -> Result<Option<LockInfo>>;

    /// Current lock, live or expired.
    async fn lock_info(&self) -> Result<Option<LockInfo>>;

    /// Where the state lives, for display.
    fn location(&self) -> String;
}

/// Runs `work` while refreshing `lock` every `every`.
///
/// Waits inside `work` can outlast the lock lifetime; the refresh keeps
/// a second invocation from taking the lock over as expired. A failed
/// refresh is logged and retried on the next beat.
pub async fn hold_lock<S, F>(store: &S, lock: &LockInfo, every: Duration, work: F) -> F::Output
where
    S: StateStore + ?Sized,
    F: Future,
{
    let mut heartbeat = tokio::time::interval(every.max(Duration::from_millis(1)));
    heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // The first tick completes at once; the lock was just taken.
    heartbeat.tick().await;

    tokio::pin!(work);
    loop {
        tokio::select! {
            output = &mut work => return output,
            _ = heartbeat.tick() => match store.refresh_lock(&lock.lock_id).await {
                Ok(refreshed) => debug!("Refreshed state lock until {}", refreshed.expires_at),
                Err(e) => warn!("Failed to refresh state lock: {e}"),
            },
        }
    }
}

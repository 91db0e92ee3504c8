//! State lock serialising invocations against one cluster.
//!
//! Only one writer may drive a cluster at a time. The lock expires so a
//! crashed invocation cannot block the next one forever.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Lock lifetime in seconds.
pub const LOCK_EXPIRY_SECS: i64 = 300;

/// A held state lock.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LockInfo {
    /// Unique lock identifier.
    pub lock_id: String,
    /// Who holds the lock.
    pub holder: String,
    /// Command that took the lock.
    #[serde(default)]
    pub operation: String,
    /// When the lock was acquired.
    pub acquired_at: DateTime<Utc>,
    /// When the lock expires.
    pub expires_at: DateTime<Utc>,
}

impl LockInfo {
    /// Creates a fresh lock for `holder` with the default lifetime.
    #[must_use]
    pub fn new(holder: &str, operation: &str) -> Self {
        Self::with_ttl(holder, operation, Duration::seconds(LOCK_EXPIRY_SECS))
    }

    /// Creates a fresh lock for `holder` that expires after `ttl`.
    #[must_use]
    pub fn with_ttl(holder: &str, operation: &str, ttl: Duration) -> Self {
        let now = Utc::now();
        Self {
            lock_id: Uuid::new_v4().to_string(),
            holder: holder.to_string(),
            operation: operation.to_string(),
            acquired_at: now,
            expires_at: now + ttl,
        }
    }

    /// Pushes the expiry `ttl` into the future.
    pub fn refresh(&mut self, ttl: Duration) {
        self.expires_at = Utc::now() + ttl;
    }

    /// Returns true once the lock may be taken over.
    #[must_use]
    pub fn is_expired(&self) -> bool {
        Utc::now() > self.expires_at
    }

    /// Seconds left before expiry.
    #[must_use]
    pub fn remaining_secs(&self) -> i64 {
        (self.expires_at - Utc::now()).num_seconds().max(0)
    }
}

/// Builds a holder id of the form `hostname-pid-uuid`.
#[must_use]
pub fn generate_holder_id() -> String {
    let hostname = hostname::get()
        .map_or_else(|_| String::from("unknown"), |h| h.to_string_lossy().into_owned());
    let uuid = Uuid::new_v4().simple().to_string();

    format!("{hostname}-{}-{}", std::process::id(), &uuid[..8])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fresh_lock_is_live() {
        let lock = LockInfo::new("me", "apply");
        assert_eq!(lock.holder, "me");
        assert_eq!(lock.operation, "apply");
        assert!(!lock.is_expired());
        assert!(lock.remaining_secs() > LOCK_EXPIRY_SECS - 5);
    }

    #[test]
    fn test_old_lock_is_expired() {
        let mut lock = LockInfo::new("me", "apply");
        lock.expires_at = Utc::now() - Duration::seconds(1);
        assert!(lock.is_expired());
        assert_eq!(lock.remaining_secs(), 0);
    }

    #[test]
    fn test_refresh_extends_expiry() {
        let mut lock = LockInfo::with_ttl("me", "apply", Duration::seconds(-1));
        assert!(lock.is_expired());

        lock.refresh(Duration::seconds(60));
        assert!(!lock.is_expired());
        assert!(lock.remaining_secs() > 55);
    }

    #[test]
    fn test_holder_id_contains_pid() {
        let first = generate_holder_id();
        let second = generate_holder_id();
        assert_ne!(first, second);
        assert!(first.contains(&std::process::id().to_string()));
    }
}

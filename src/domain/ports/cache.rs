//! Correlation cache port
//!
//! The cache is the single source of truth for "is a call in flight" and must
//! be shared by every router instance fronting the same stations.

use std::time::Duration;

use async_trait::async_trait;

use crate::domain::error::CacheError;

/// Well-known namespaces.
pub mod namespace {
    /// Pending-call slots, keyed by station identifier.
    pub const TRANSACTIONS: &str = "Transactions";
    /// Callback URLs, keyed by correlation id.
    pub const CALLBACK_URL: &str = "CallbackURL";
    /// Live connection records, keyed by station identifier.
    pub const CONNECTIONS: &str = "Connections";
}

/// Key (within the station's own namespace) holding its last boot status.
pub const BOOT_STATUS: &str = "boot_status";

#[async_trait]
pub trait Cache: Send + Sync {
    async fn get(&self, key: &str, namespace: &str) -> Result<Option<String>, CacheError>;

    /// Unconditional write. Returns `true` once stored.
    async fn set(
        &self,
        key: &str,
        value: &str,
        namespace: &str,
        ttl: Option<Duration>,
    ) -> Result<bool, CacheError>;

    /// Atomic write that only succeeds when the key is absent.
    async fn set_if_not_exist(
        &self,
        key: &str,
        value: &str,
        namespace: &str,
        ttl: Option<Duration>,
    ) -> Result<bool, CacheError>;

    /// Returns `true` if something was removed.
    async fn remove(&self, key: &str, namespace: &str) -> Result<bool, CacheError>;

    async fn exists(&self, key: &str, namespace: &str) -> Result<bool, CacheError>;

    /// Block until the key changes (set, removed or expired) or `wait`
    /// elapses, then return its current value.
    async fn on_change(
        &self,
        key: &str,
        wait: Duration,
        namespace: &str,
    ) -> Result<Option<String>, CacheError>;
}

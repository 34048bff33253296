//! In-process correlation cache
//!
//! Backed by a `DashMap` keyed by `(namespace, key)`. Expiry runs on a
//! spawned timer per write; a generation number keeps a stale timer from
//! deleting a newer value. Each key has a `Notify` that `on_change` waits on.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::mapref::entry::Entry as MapEntry;
use dashmap::DashMap;
use tokio::sync::Notify;
use tracing::trace;

use crate::domain::ports::Cache;
use crate::domain::CacheError;

type Slot = (String, String);

#[derive(Debug)]
struct Entry {
    value: String,
    generation: u64,
}

#[derive(Default)]
struct Store {
    entries: DashMap<Slot, Entry>,
    watchers: DashMap<Slot, Arc<Notify>>,
    generation: AtomicU64,
}

impl Store {
    fn notify(&self, slot: &Slot) {
        if let Some(notify) = self.watchers.get(slot) {
            notify.notify_waiters();
        }
    }
}

/// Cloning shares the underlying store.
#[derive(Clone, Default)]
pub struct MemoryCache {
    store: Arc<Store>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.store.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.store.entries.is_empty()
    }

    fn slot(key: &str, namespace: &str) -> Slot {
        (namespace.to_string(), key.to_string())
    }

    fn next_generation(&self) -> u64 {
        self.store.generation.fetch_add(1, Ordering::Relaxed) + 1
    }

    fn schedule_expiry(&self, slot: Slot, generation: u64, ttl: Option<Duration>) {
        let Some(ttl) = ttl else { return };
        let store = Arc::downgrade(&self.store);
        tokio::spawn(async move {
            tokio::time::sleep(ttl).await;
            let Some(store) = store.upgrade() else { return };
            let removed = store
                .entries
                .remove_if(&slot, |_, entry| entry.generation == generation)
                .is_some();
            if removed {
                trace!(namespace = %slot.0, key = %slot.1, "Cache entry expired");
                store.notify(&slot);
            }
        });
    }
}

#[async_trait]
impl Cache for MemoryCache {
    async fn get(&self, key: &str, namespace: &str) -> Result<Option<String>, CacheError> {
        Ok(self
            .store
            .entries
            .get(&Self::slot(key, namespace))
            .map(|e| e.value.clone()))
    }

    async fn set(
        &self,
        key: &str,
        value: &str,
        namespace: &str,
        ttl: Option<Duration>,
    ) -> Result<bool, CacheError> {
        let slot = Self::slot(key, namespace);
        let generation = self.next_generation();
        self.store.entries.insert(
            slot.clone(),
            Entry {
                value: value.to_string(),
                generation,
            },
        );
        self.store.notify(&slot);
        self.schedule_expiry(slot, generation, ttl);
        Ok(true)
    }

    async fn set_if_not_exist(
        &self,
        key: &str,
        value: &str,
        namespace: &str,
        ttl: Option<Duration>,
    ) -> Result<bool, CacheError> {
        let slot = Self::slot(key, namespace);
        let generation = self.next_generation();
        match self.store.entries.entry(slot.clone()) {
            MapEntry::Occupied(_) => return Ok(false),
            MapEntry::Vacant(vacant) => {
                vacant.insert(Entry {
                    value: value.to_string(),
                    generation,
                });
            }
        }
        self.store.notify(&slot);
        self.schedule_expiry(slot, generation, ttl);
        Ok(true)
    }

    async fn remove(&self, key: &str, namespace: &str) -> Result<bool, CacheError> {
        let slot = Self::slot(key, namespace);
        let removed = self.store.entries.remove(&slot).is_some();
        if removed {
            self.store.notify(&slot);
        }
        Ok(removed)
    }

    async fn exists(&self, key: &str, namespace: &str) -> Result<bool, CacheError> {
        Ok(self
            .store
            .entries
            .contains_key(&Self::slot(key, namespace)))
    }

    async fn on_change(
        &self,
        key: &str,
        wait: Duration,
        namespace: &str,
    ) -> Result<Option<String>, CacheError> {
        let slot = Self::slot(key, namespace);
        let notify = self
            .store
            .watchers
            .entry(slot.clone())
            .or_insert_with(|| Arc::new(Notify::new()))
            .clone();

        let notified = notify.notified();
        tokio::pin!(notified);
        notified.as_mut().enable();

        if tokio::time::timeout(wait, notified).await.is_err() {
            trace!(namespace, key, "No change within wait window");
        }
        self.get(key, namespace).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn set_if_not_exist_is_exclusive() {
        let cache = MemoryCache::new();
        assert!(cache.set_if_not_exist("1:CS1", "Reset:a", "Transactions", None).await.unwrap());
        assert!(!cache.set_if_not_exist("1:CS1", "Reset:b", "Transactions", None).await.unwrap());
        assert_eq!(
            cache.get("1:CS1", "Transactions").await.unwrap().as_deref(),
            Some("Reset:a")
        );
        // namespaces are independent
        assert!(cache.set_if_not_exist("1:CS1", "x", "Other", None).await.unwrap());
    }

    #[tokio::test]
    async fn entries_expire() {
        let cache = MemoryCache::new();
        cache
            .set("k", "v", "ns", Some(Duration::from_millis(10)))
            .await
            .unwrap();
        assert!(cache.exists("k", "ns").await.unwrap());
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!cache.exists("k", "ns").await.unwrap());
    }

    #[tokio::test]
    async fn stale_timer_keeps_newer_value() {
        let cache = MemoryCache::new();
        cache
            .set("k", "old", "ns", Some(Duration::from_millis(10)))
            .await
            .unwrap();
        cache.set("k", "new", "ns", None).await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(cache.get("k", "ns").await.unwrap().as_deref(), Some("new"));
    }

    #[tokio::test]
    async fn on_change_wakes_on_remove() {
        let cache = MemoryCache::new();
        cache.set("k", "v", "ns", None).await.unwrap();

        let waiter = {
            let cache = cache.clone();
            tokio::spawn(async move { cache.on_change("k", Duration::from_secs(5), "ns").await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(cache.remove("k", "ns").await.unwrap());

        let value = tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("waiter should wake")
            .unwrap()
            .unwrap();
        assert_eq!(value, None);
    }

    #[tokio::test]
    async fn on_change_times_out_with_current_value() {
        let cache = MemoryCache::new();
        cache.set("k", "v", "ns", None).await.unwrap();
        let value = cache
            .on_change("k", Duration::from_millis(10), "ns")
            .await
            .unwrap();
        assert_eq!(value.as_deref(), Some("v"));
        assert!(!cache.remove("missing", "ns").await.unwrap());
    }
}

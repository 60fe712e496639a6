use std::sync::Arc;

use dashmap::DashMap;
use futures::future::BoxFuture;
use tokio::time::{Duration, Instant};

use crate::dao::store::{RoomStore, ScanPage, StoreResult, TTL_ABSENT, TTL_NO_EXPIRY};

/// Value stored alongside its absolute expiry deadline.
#[derive(Debug, Clone)]
struct StoredValue {
    data: Vec<u8>,
    expires_at: Option<Instant>,
}

impl StoredValue {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|deadline| deadline <= now)
    }
}

/// In-memory [`RoomStore`] with per-key TTL.
///
/// Backs tests and degraded/development mode; production deployments inject a
/// real backend instead. Expiry is lazy: expired keys are dropped when a read
/// or scan touches them.
#[derive(Clone, Default)]
pub struct MemoryRoomStore {
    entries: Arc<DashMap<String, StoredValue>>,
}

impl MemoryRoomStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live (non-expired) keys, used by tests.
    pub fn len(&self) -> usize {
        let now = Instant::now();
        self.entries
            .iter()
            .filter(|entry| !entry.value().is_expired(now))
            .count()
    }

    /// Whether the store holds no live keys.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn live_value(&self, key: &str) -> Option<StoredValue> {
        let now = Instant::now();
        // The read guard must be released before the lazy delete below:
        // `remove_if` write-locks the same shard.
        let (value, expired) = match self.entries.get(key) {
            Some(entry) if !entry.value().is_expired(now) => (Some(entry.value().clone()), false),
            Some(_) => (None, true),
            None => (None, false),
        };
        if expired {
            self.entries.remove_if(key, |_, value| value.is_expired(now));
        }
        value
    }
}

impl RoomStore for MemoryRoomStore {
    fn get(&self, key: String) -> BoxFuture<'static, StoreResult<Option<Vec<u8>>>> {
        let store = self.clone();
        Box::pin(async move { Ok(store.live_value(&key).map(|value| value.data)) })
    }

    fn set_with_ttl(
        &self,
        key: String,
        value: Vec<u8>,
        ttl_seconds: u64,
    ) -> BoxFuture<'static, StoreResult<()>> {
        let store = self.clone();
        Box::pin(async move {
            store.entries.insert(
                key,
                StoredValue {
                    data: value,
                    expires_at: Some(Instant::now() + Duration::from_secs(ttl_seconds)),
                },
            );
            Ok(())
        })
    }

    fn delete(&self, key: String) -> BoxFuture<'static, StoreResult<u64>> {
        let store = self.clone();
        Box::pin(async move { Ok(u64::from(store.entries.remove(&key).is_some())) })
    }

    fn delete_many(&self, keys: Vec<String>) -> BoxFuture<'static, StoreResult<u64>> {
        let store = self.clone();
        Box::pin(async move {
            let mut removed = 0;
            for key in keys {
                removed += u64::from(store.entries.remove(&key).is_some());
            }
            Ok(removed)
        })
    }

    fn exists(&self, key: String) -> BoxFuture<'static, StoreResult<bool>> {
        let store = self.clone();
        Box::pin(async move { Ok(store.live_value(&key).is_some()) })
    }

    fn ttl(&self, key: String) -> BoxFuture<'static, StoreResult<i64>> {
        let store = self.clone();
        Box::pin(async move {
            let Some(value) = store.live_value(&key) else {
                return Ok(TTL_ABSENT);
            };
            match value.expires_at {
                Some(deadline) => {
                    let remaining = deadline.saturating_duration_since(Instant::now());
                    Ok(remaining.as_secs() as i64)
                }
                None => Ok(TTL_NO_EXPIRY),
            }
        })
    }

    fn scan_page(
        &self,
        cursor: u64,
        prefix: String,
        page_size: usize,
    ) -> BoxFuture<'static, StoreResult<ScanPage>> {
        let store = self.clone();
        Box::pin(async move {
            // Deterministic scan order so cursors stay meaningful between
            // pages. Expired keys are still reported: the sweeper classifies
            // them through `ttl` and removes them.
            let mut matching: Vec<String> = store
                .entries
                .iter()
                .filter(|entry| entry.key().starts_with(&prefix))
                .map(|entry| entry.key().clone())
                .collect();
            matching.sort();

            let start = cursor as usize;
            let keys: Vec<String> = matching.iter().skip(start).take(page_size).cloned().collect();
            let consumed = start + keys.len();
            let next_cursor = if consumed >= matching.len() {
                0
            } else {
                consumed as u64
            };
            Ok(ScanPage { next_cursor, keys })
        })
    }
}

use dashmap::DashMap;
use tokio::time::{Duration, Instant};
use tracing::debug;
use uuid::Uuid;

use crate::state::room::RoomSnapshot;

/// One cached snapshot with its absolute expiry deadline.
#[derive(Debug, Clone)]
struct CacheEntry {
    snapshot: RoomSnapshot,
    expires_at: Instant,
}

/// In-process, size- and TTL-bounded cache of the last snapshot broadcast per
/// room.
///
/// The cached value is the "previous" input to the differ. The cache is
/// advisory: losing it (process restart) only costs one extra full-diff
/// broadcast, never data. Its TTL mirrors the durable store's room TTL so a
/// cached entry never outlives the authoritative record and serves stale
/// diffs for a room the store has already forgotten.
pub struct BroadcastCache {
    entries: DashMap<Uuid, CacheEntry>,
    max_entries: usize,
    ttl: Duration,
}

impl BroadcastCache {
    /// Create a cache bounded to `max_entries` snapshots, each valid for
    /// `ttl`.
    pub fn new(max_entries: usize, ttl: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            max_entries,
            ttl,
        }
    }

    /// Last broadcast snapshot for `room_id`, or `None` on a miss.
    ///
    /// A logically expired entry behaves as a miss and is deleted lazily; no
    /// entry is ever returned past its expiry deadline.
    pub fn get(&self, room_id: &Uuid) -> Option<RoomSnapshot> {
        let now = Instant::now();
        // The read guard must be released before the lazy delete below:
        // `remove_if` write-locks the same shard.
        let (snapshot, expired) = match self.entries.get(room_id) {
            Some(entry) if entry.expires_at > now => (Some(entry.snapshot.clone()), false),
            Some(_) => (None, true),
            None => (None, false),
        };
        if expired {
            self.entries
                .remove_if(room_id, |_, entry| entry.expires_at <= now);
        }
        snapshot
    }

    /// Store `snapshot` as the last broadcast state for its room, stamping a
    /// fresh expiry, then enforce the capacity bound.
    ///
    /// The clone taken here deep-copies the participant map and selection
    /// history, so later mutations of the caller's snapshot cannot leak into
    /// cached state.
    pub fn put(&self, snapshot: &RoomSnapshot) {
        self.entries.insert(
            snapshot.id,
            CacheEntry {
                snapshot: snapshot.clone(),
                expires_at: Instant::now() + self.ttl,
            },
        );
        self.enforce_capacity();
    }

    /// Drop the entry for `room_id`, returning whether one was present. Used
    /// when a room is deleted.
    pub fn invalidate(&self, room_id: &Uuid) -> bool {
        self.entries.remove(room_id).is_some()
    }

    /// Remove every logically expired entry. Runs on a fixed interval,
    /// independent of read/write traffic.
    pub fn sweep_expired(&self) -> usize {
        let now = Instant::now();
        let before = self.entries.len();
        self.entries.retain(|_, entry| entry.expires_at > now);
        let removed = before.saturating_sub(self.entries.len());
        if removed > 0 {
            debug!(removed, "swept expired broadcast cache entries");
        }
        removed
    }

    /// Evict oldest-expiring entries until the cache is back at capacity.
    pub fn enforce_capacity(&self) {
        while self.entries.len() > self.max_entries {
            let oldest = self
                .entries
                .iter()
                .min_by_key(|entry| entry.value().expires_at)
                .map(|entry| *entry.key());
            let Some(room_id) = oldest else {
                break;
            };
            self.entries.remove(&room_id);
            debug!(room = %room_id, "evicted broadcast cache entry over capacity");
        }
    }

    /// Number of live entries, used by tests and metrics.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the cache holds no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

use std::error::Error;

use futures::future::BoxFuture;
use thiserror::Error;
use uuid::Uuid;

/// Result alias for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// TTL probe result: the key does not exist.
pub const TTL_ABSENT: i64 = -2;
/// TTL probe result: the key exists but carries no expiry.
pub const TTL_NO_EXPIRY: i64 = -1;

/// Error raised by durable store backends regardless of the underlying
/// database.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Backend could not be reached or refused the operation.
    #[error("store unavailable: {message}")]
    Unavailable {
        /// Human-readable context for the failure.
        message: String,
        /// Underlying backend error.
        #[source]
        source: Box<dyn Error + Send + Sync>,
    },
    /// The backend answered but the operation itself failed.
    #[error("store operation failed: {0}")]
    Operation(String),
}

impl StoreError {
    /// Construct an unavailable error from any backend failure.
    pub fn unavailable(message: String, source: impl Error + Send + Sync + 'static) -> Self {
        StoreError::Unavailable {
            message,
            source: Box::new(source),
        }
    }
}

/// One page of a cursor-driven keyspace scan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanPage {
    /// Cursor to pass to the next call; `0` means the scan is complete.
    pub next_cursor: u64,
    /// Keys found in this page.
    pub keys: Vec<String>,
}

/// Abstraction over the durable key-value store holding serialized room
/// snapshots under TTL-bound keys.
///
/// The store is the system of record; this crate only consumes it. Production
/// deployments inject a real backend, tests and degraded mode use
/// [`MemoryRoomStore`](crate::dao::memory::MemoryRoomStore).
pub trait RoomStore: Send + Sync {
    /// Fetch the raw value stored under `key`.
    fn get(&self, key: String) -> BoxFuture<'static, StoreResult<Option<Vec<u8>>>>;
    /// Store `value` under `key`, replacing any previous value and resetting
    /// the expiry to `ttl_seconds` from now.
    fn set_with_ttl(
        &self,
        key: String,
        value: Vec<u8>,
        ttl_seconds: u64,
    ) -> BoxFuture<'static, StoreResult<()>>;
    /// Delete `key`, returning how many keys were removed (0 or 1).
    fn delete(&self, key: String) -> BoxFuture<'static, StoreResult<u64>>;
    /// Delete every key in `keys` in one call, returning the removed count.
    fn delete_many(&self, keys: Vec<String>) -> BoxFuture<'static, StoreResult<u64>>;
    /// Whether `key` currently exists (expired keys count as absent).
    fn exists(&self, key: String) -> BoxFuture<'static, StoreResult<bool>>;
    /// Remaining TTL for `key` in seconds: [`TTL_ABSENT`] when the key does
    /// not exist, [`TTL_NO_EXPIRY`] when it never expires, `>= 0` otherwise.
    fn ttl(&self, key: String) -> BoxFuture<'static, StoreResult<i64>>;
    /// Scan one bounded page of keys starting with `prefix`.
    fn scan_page(
        &self,
        cursor: u64,
        prefix: String,
        page_size: usize,
    ) -> BoxFuture<'static, StoreResult<ScanPage>>;
}

/// Build the store key for a room id under the configured namespace prefix.
pub fn room_key(prefix: &str, room_id: Uuid) -> String {
    format!("{prefix}{room_id}")
}

/// Recover the room id from a store key, if the key belongs to the room
/// namespace.
pub fn room_id_from_key(prefix: &str, key: &str) -> Option<Uuid> {
    key.strip_prefix(prefix)
        .and_then(|suffix| Uuid::parse_str(suffix).ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn room_key_round_trip() {
        let id = Uuid::new_v4();
        let key = room_key("rooms:", id);
        assert_eq!(room_id_from_key("rooms:", &key), Some(id));
    }

    #[test]
    fn foreign_keys_are_rejected() {
        assert_eq!(room_id_from_key("rooms:", "sessions:abc"), None);
        assert_eq!(room_id_from_key("rooms:", "rooms:not-a-uuid"), None);
    }
}

//! Periodic sweep removing expired rooms and their broadcast artifacts.
//!
//! The durable store expires room keys on its own; the sweeper's job is the
//! surrounding debris: cache entries, pending debounce windows, and channels
//! that would otherwise linger after the authoritative record is gone. It
//! also deletes keys whose remaining TTL is inside the expiry threshold so a
//! room never resurfaces milliseconds before its natural expiry.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::watch;
use tokio::time::{Duration, Instant, MissedTickBehavior, interval};
use tracing::{debug, info, warn};

use crate::config::SyncConfig;
use crate::dao::store::{TTL_ABSENT, room_id_from_key};
use crate::services::broadcaster::RoomBroadcaster;
use crate::state::cache::BroadcastCache;
use crate::state::channels::room_channel;
use crate::state::{StoreSlot, TransportSlot};

/// Keys requested from the store per scan call. The per-run ceiling is the
/// configured max scan count; this only shapes the paging.
const SCAN_PAGE_SIZE: usize = 100;

/// Outcome of one sweep run.
#[derive(Debug, Clone, Default)]
pub struct CleanupMetrics {
    /// A previous run was still in flight and this trigger did nothing.
    pub skipped: bool,
    /// The run hit its wall-clock budget and stopped early.
    pub timed_out: bool,
    /// Keys examined.
    pub scanned: usize,
    /// Keys classified as expired or expiring.
    pub expired: usize,
    /// Keys actually removed from the store.
    pub deleted: u64,
    /// Broadcast-cache entries evicted alongside their rooms.
    pub cache_evictions: usize,
    /// Room channels torn down alongside their rooms.
    pub channels_removed: usize,
    /// Per-item failures encountered; never aborts the run.
    pub errors: Vec<String>,
    /// Wall-clock time the run took.
    pub duration: Duration,
}

/// Background janitor for the room keyspace.
pub struct CleanupSweeper {
    store: Arc<StoreSlot>,
    cache: Arc<BroadcastCache>,
    transport: Arc<TransportSlot>,
    broadcaster: Arc<RoomBroadcaster>,
    key_prefix: String,
    expiry_threshold_secs: i64,
    max_scan: usize,
    timeout: Duration,
    interval: Duration,
    running: AtomicBool,
}

impl CleanupSweeper {
    /// Build a sweeper over the store, cache, and transport slots.
    pub fn new(
        config: &SyncConfig,
        store: Arc<StoreSlot>,
        cache: Arc<BroadcastCache>,
        transport: Arc<TransportSlot>,
        broadcaster: Arc<RoomBroadcaster>,
    ) -> Self {
        Self {
            store,
            cache,
            transport,
            broadcaster,
            key_prefix: config.key_prefix.clone(),
            expiry_threshold_secs: config.cleanup_expiry_threshold.as_secs() as i64,
            max_scan: config.cleanup_max_scan,
            timeout: config.cleanup_timeout,
            interval: config.cleanup_interval,
            running: AtomicBool::new(false),
        }
    }

    /// Run one sweep. Single-flight: a trigger arriving while a run is in
    /// progress returns immediately with `skipped` set.
    pub async fn run(&self) -> CleanupMetrics {
        if self.running.swap(true, Ordering::SeqCst) {
            debug!("cleanup sweep already in flight; skipping trigger");
            return CleanupMetrics {
                skipped: true,
                ..CleanupMetrics::default()
            };
        }

        let metrics = self.sweep().await;
        self.running.store(false, Ordering::SeqCst);

        if metrics.errors.is_empty() {
            info!(
                scanned = metrics.scanned,
                expired = metrics.expired,
                deleted = metrics.deleted,
                cache_evictions = metrics.cache_evictions,
                channels_removed = metrics.channels_removed,
                timed_out = metrics.timed_out,
                duration_ms = metrics.duration.as_millis() as u64,
                "cleanup sweep finished"
            );
        } else {
            warn!(
                scanned = metrics.scanned,
                deleted = metrics.deleted,
                errors = metrics.errors.len(),
                timed_out = metrics.timed_out,
                "cleanup sweep finished with errors"
            );
        }
        metrics
    }

    /// Run sweeps on a fixed interval until `shutdown` flips to true.
    pub async fn run_periodic(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.run().await;
                }
                result = shutdown.changed() => {
                    if result.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        debug!("cleanup sweeper stopped");
    }

    async fn sweep(&self) -> CleanupMetrics {
        let started = Instant::now();
        let deadline = started + self.timeout;
        let mut metrics = CleanupMetrics::default();

        let Some(store) = self.store.current().await else {
            metrics
                .errors
                .push("no durable store installed".to_string());
            metrics.duration = started.elapsed();
            return metrics;
        };

        let mut cursor = 0u64;
        loop {
            if metrics.scanned >= self.max_scan {
                break;
            }
            if Instant::now() >= deadline {
                metrics.timed_out = true;
                break;
            }

            let page_size = SCAN_PAGE_SIZE.min(self.max_scan - metrics.scanned);
            let page = match store
                .scan_page(cursor, self.key_prefix.clone(), page_size)
                .await
            {
                Ok(page) => page,
                Err(err) => {
                    metrics.errors.push(format!("scan failed: {err}"));
                    break;
                }
            };
            metrics.scanned += page.keys.len();

            let mut doomed = Vec::new();
            for key in &page.keys {
                if Instant::now() >= deadline {
                    metrics.timed_out = true;
                    break;
                }
                match store.ttl(key.clone()).await {
                    Ok(ttl) if ttl == TTL_ABSENT => doomed.push(key.clone()),
                    Ok(ttl) if (0..=self.expiry_threshold_secs).contains(&ttl) => {
                        doomed.push(key.clone());
                    }
                    // Healthy or persistent keys are left alone.
                    Ok(_) => {}
                    Err(err) => {
                        metrics.errors.push(format!("ttl probe for {key} failed: {err}"));
                    }
                }
            }
            metrics.expired += doomed.len();

            if !doomed.is_empty() {
                match store.delete_many(doomed.clone()).await {
                    Ok(count) => metrics.deleted += count,
                    Err(err) => {
                        // Fall back to one-by-one deletion so a single bad
                        // key cannot shield the rest of the batch.
                        metrics
                            .errors
                            .push(format!("batch delete failed: {err}"));
                        for key in &doomed {
                            match store.delete(key.clone()).await {
                                Ok(count) => metrics.deleted += count,
                                Err(err) => metrics
                                    .errors
                                    .push(format!("delete of {key} failed: {err}")),
                            }
                        }
                    }
                }
                self.teardown_rooms(&doomed, &mut metrics).await;
            }

            if page.next_cursor == 0 || metrics.timed_out {
                break;
            }
            cursor = page.next_cursor;
        }

        metrics.duration = started.elapsed();
        metrics
    }

    /// Drop the in-process artifacts of rooms whose store keys were removed.
    async fn teardown_rooms(&self, keys: &[String], metrics: &mut CleanupMetrics) {
        let transport = self.transport.current().await;
        for key in keys {
            let Some(room_id) = room_id_from_key(&self.key_prefix, key) else {
                metrics
                    .errors
                    .push(format!("key {key} does not name a room"));
                continue;
            };
            self.broadcaster.cancel_pending(&room_id);
            if self.cache.invalidate(&room_id) {
                metrics.cache_evictions += 1;
            }
            if let Some(transport) = &transport {
                let channel = room_channel(room_id);
                transport.disconnect_all(channel.clone()).await;
                transport.remove_channel(channel).await;
                metrics.channels_removed += 1;
            }
            debug!(room = %room_id, "removed expired room");
        }
    }
}

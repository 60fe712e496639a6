//! Shared state of the synchronization core: the broadcast cache, the
//! collaborator slots, and the [`SyncCore`] composition root.

/// Last-broadcast-state cache.
pub mod cache;
/// Per-room channel transport.
pub mod channels;
/// Room domain model.
pub mod room;

use std::sync::{Arc, Mutex};

use tokio::sync::{RwLock, watch};
use tokio::task::JoinHandle;
use tokio::time::{MissedTickBehavior, interval};
use tracing::{debug, info};
use uuid::Uuid;

use crate::config::SyncConfig;
use crate::dao::store::RoomStore;
use crate::services::broadcaster::RoomBroadcaster;
use crate::services::cleanup::CleanupSweeper;
use crate::state::cache::BroadcastCache;
use crate::state::channels::{ChannelRegistry, room_channel};

/// Shared handle to the synchronization core.
pub type SharedCore = Arc<SyncCore>;

/// Swappable slot for the durable store backend.
///
/// The core starts with an empty slot and runs degraded until a backend is
/// installed; publish paths keep working because they only need the cache and
/// transport, while the cleanup sweeper reports the missing store.
#[derive(Default)]
pub struct StoreSlot {
    inner: RwLock<Option<Arc<dyn RoomStore>>>,
}

impl StoreSlot {
    /// Create an empty slot.
    pub fn new() -> Self {
        Self::default()
    }

    /// Handle to the installed backend, if any.
    pub async fn current(&self) -> Option<Arc<dyn RoomStore>> {
        self.inner.read().await.as_ref().cloned()
    }

    /// Install a backend, replacing any previous one.
    pub async fn install(&self, store: Arc<dyn RoomStore>) {
        *self.inner.write().await = Some(store);
    }

    /// Remove the backend, entering degraded mode.
    pub async fn clear(&self) {
        self.inner.write().await.take();
    }
}

/// Swappable slot for the channel transport, same shape as [`StoreSlot`].
#[derive(Default)]
pub struct TransportSlot {
    inner: RwLock<Option<Arc<dyn ChannelRegistry>>>,
}

impl TransportSlot {
    /// Create an empty slot.
    pub fn new() -> Self {
        Self::default()
    }

    /// Handle to the installed transport, if any.
    pub async fn current(&self) -> Option<Arc<dyn ChannelRegistry>> {
        self.inner.read().await.as_ref().cloned()
    }

    /// Install a transport, replacing any previous one.
    pub async fn install(&self, registry: Arc<dyn ChannelRegistry>) {
        *self.inner.write().await = Some(registry);
    }

    /// Remove the transport. Publishes fail fast until a new one arrives.
    pub async fn clear(&self) {
        self.inner.write().await.take();
    }
}

/// Composition root wiring the cache, broadcaster, and sweeper together and
/// owning their background tasks.
pub struct SyncCore {
    config: SyncConfig,
    cache: Arc<BroadcastCache>,
    store: Arc<StoreSlot>,
    transport: Arc<TransportSlot>,
    broadcaster: Arc<RoomBroadcaster>,
    sweeper: Arc<CleanupSweeper>,
    degraded: watch::Sender<bool>,
    shutdown: watch::Sender<bool>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl SyncCore {
    /// Build the core and spawn its background tasks. Must run inside a Tokio
    /// runtime.
    ///
    /// The core starts degraded: publishes work once a transport is
    /// installed, the sweeper once a store is.
    pub fn create(config: SyncConfig) -> SharedCore {
        let cache = Arc::new(BroadcastCache::new(
            config.cache_max_entries,
            config.cache_ttl,
        ));
        let store = Arc::new(StoreSlot::new());
        let transport = Arc::new(TransportSlot::new());
        let broadcaster = Arc::new(RoomBroadcaster::new(
            &config,
            Arc::clone(&cache),
            Arc::clone(&transport),
        ));
        let sweeper = Arc::new(CleanupSweeper::new(
            &config,
            Arc::clone(&store),
            Arc::clone(&cache),
            Arc::clone(&transport),
            Arc::clone(&broadcaster),
        ));
        let (degraded, _) = watch::channel(true);
        let (shutdown, _) = watch::channel(false);

        let core = Arc::new(Self {
            config,
            cache,
            store,
            transport,
            broadcaster,
            sweeper,
            degraded,
            shutdown,
            tasks: Mutex::new(Vec::new()),
        });
        core.spawn_background();
        info!("synchronization core started");
        core
    }

    fn spawn_background(&self) {
        let sweeper_task = tokio::spawn(
            Arc::clone(&self.sweeper).run_periodic(self.shutdown.subscribe()),
        );

        let cache_task = {
            let cache = Arc::clone(&self.cache);
            let period = self.config.cleanup_interval;
            let mut shutdown = self.shutdown.subscribe();
            tokio::spawn(async move {
                let mut ticker = interval(period);
                ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
                loop {
                    tokio::select! {
                        _ = ticker.tick() => {
                            let removed = cache.sweep_expired();
                            if removed > 0 {
                                debug!(removed, "swept expired broadcast-cache entries");
                            }
                        }
                        result = shutdown.changed() => {
                            if result.is_err() || *shutdown.borrow() {
                                break;
                            }
                        }
                    }
                }
            })
        };

        if let Ok(mut tasks) = self.tasks.lock() {
            tasks.push(sweeper_task);
            tasks.push(cache_task);
        }
    }

    /// Signal background tasks to stop and detach them.
    pub fn shutdown(&self) {
        let _ = self.shutdown.send(true);
        if let Ok(mut tasks) = self.tasks.lock() {
            for task in tasks.drain(..) {
                task.abort();
            }
        }
        info!("synchronization core stopped");
    }

    /// Runtime configuration the core was built with.
    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// The broadcast entry point.
    pub fn broadcaster(&self) -> &RoomBroadcaster {
        &self.broadcaster
    }

    /// The cleanup sweeper, for manually triggered sweeps.
    pub fn sweeper(&self) -> &CleanupSweeper {
        &self.sweeper
    }

    /// The per-room last-broadcast-state cache.
    pub fn cache(&self) -> &BroadcastCache {
        &self.cache
    }

    /// Install a durable store backend and leave degraded mode.
    pub async fn install_store(&self, store: Arc<dyn RoomStore>) {
        self.store.install(store).await;
        self.update_degraded(false).await;
    }

    /// Remove the durable store backend and enter degraded mode.
    pub async fn clear_store(&self) {
        self.store.clear().await;
        self.update_degraded(true).await;
    }

    /// Install the channel transport.
    pub async fn install_transport(&self, registry: Arc<dyn ChannelRegistry>) {
        self.transport.install(registry).await;
    }

    /// Whether the core currently lacks a durable store.
    pub async fn is_degraded(&self) -> bool {
        self.store.current().await.is_none()
    }

    /// Subscribe to degraded-flag changes.
    pub fn degraded_watcher(&self) -> watch::Receiver<bool> {
        self.degraded.subscribe()
    }

    /// Drop every in-process artifact of a room: its pending debounce
    /// window, its cache entry, and its channel. The durable store record is
    /// the caller's responsibility.
    pub async fn forget_room(&self, room_id: Uuid) {
        self.broadcaster.cancel_pending(&room_id);
        self.cache.invalidate(&room_id);
        if let Some(transport) = self.transport.current().await {
            let channel = room_channel(room_id);
            transport.disconnect_all(channel.clone()).await;
            transport.remove_channel(channel).await;
        }
        debug!(room = %room_id, "forgot room");
    }

    async fn update_degraded(&self, value: bool) {
        if *self.degraded.borrow() != value {
            let _ = self.degraded.send(value);
        }
    }
}

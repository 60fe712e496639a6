//! Broadcast orchestration: validate, debounce, diff, emit, cache, measure.

use std::sync::Arc;

use futures::future::BoxFuture;
use time::OffsetDateTime;
use tokio::time::{Duration, Instant, sleep};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::config::SyncConfig;
use crate::dto::events::{EVENT_ROOM_STATE_UPDATE, RoomStateUpdate, ServerEvent};
use crate::error::BroadcastError;
use crate::services::debounce::{DebounceGate, FlushSink};
use crate::services::diff::diff;
use crate::services::validation::validate_snapshot;
use crate::state::cache::BroadcastCache;
use crate::state::channels::{ChannelRegistry, room_channel};
use crate::state::TransportSlot;
use crate::state::room::RoomSnapshot;

/// Soft latency budget for one broadcast; exceeding it is a warning signal,
/// never a failure.
const LATENCY_BUDGET: Duration = Duration::from_millis(500);
/// Client count past which a room is logged as unusually large.
const LARGE_ROOM_WATERMARK: usize = 50;

/// Why a publish call finished the way it did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BroadcastDisposition {
    /// The event reached the transport.
    Delivered,
    /// Nothing differed from the cached state and the call was not forced.
    NoChanges,
    /// Nobody is subscribed to the room channel.
    NoSubscribers,
    /// The pending window was cancelled before flushing.
    Cancelled,
}

/// Performance record returned by every publish call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BroadcastMetrics {
    /// Room the publish applied to.
    pub room_id: Uuid,
    /// Outcome classification.
    pub disposition: BroadcastDisposition,
    /// Live subscribers the event was delivered to (zero when skipped).
    pub client_count: usize,
    /// Emission attempts made (zero when skipped).
    pub attempts: u32,
    /// Time spent diffing, in milliseconds.
    pub diff_ms: u64,
    /// Time spent emitting (including backoff), in milliseconds.
    pub emit_ms: u64,
    /// End-to-end flush time, in milliseconds.
    pub total_ms: u64,
}

impl BroadcastMetrics {
    /// Zeroed metrics for a skipped publish.
    pub fn skipped(room_id: Uuid, disposition: BroadcastDisposition) -> Self {
        Self {
            room_id,
            disposition,
            client_count: 0,
            attempts: 0,
            diff_ms: 0,
            emit_ms: 0,
            total_ms: 0,
        }
    }
}

/// Outcome of a publish call; cloneable so coalesced waiters share it.
pub type BroadcastResult = Result<BroadcastMetrics, BroadcastError>;

/// Retry knobs for the emission loop.
#[derive(Debug, Clone)]
struct RetryPolicy {
    max_attempts: u32,
    base_delay: Duration,
    max_delay: Duration,
}

struct BroadcasterInner {
    cache: Arc<BroadcastCache>,
    transport: Arc<TransportSlot>,
    presentation_time: std::time::Duration,
    retry: RetryPolicy,
}

/// Adapter letting the debounce gate drive the broadcaster's flush path.
struct GateSink(Arc<BroadcasterInner>);

impl FlushSink for GateSink {
    fn flush(&self, snapshot: RoomSnapshot, force: bool) -> BoxFuture<'static, BroadcastResult> {
        let inner = Arc::clone(&self.0);
        Box::pin(async move { inner.flush_now(snapshot, force).await })
    }
}

/// Entry point of the synchronization core: turns room snapshots into
/// `room_state_update` events on the room's channel.
///
/// The broadcast is a best-effort notification layer: a failure here never
/// rolls back the durable store write that preceded it, and the next
/// successful broadcast catches up by diffing against the last cached state.
/// When nobody is subscribed the cache is deliberately left untouched so the
/// next observer diffs against the last state anyone actually saw; the
/// possibly larger reconnection diff is an accepted trade-off.
pub struct RoomBroadcaster {
    inner: Arc<BroadcasterInner>,
    gate: DebounceGate,
}

impl RoomBroadcaster {
    /// Build a broadcaster over the given cache and transport slot.
    pub fn new(
        config: &SyncConfig,
        cache: Arc<BroadcastCache>,
        transport: Arc<TransportSlot>,
    ) -> Self {
        let inner = Arc::new(BroadcasterInner {
            cache,
            transport,
            presentation_time: config.presentation_time,
            retry: RetryPolicy {
                max_attempts: config.retry_max_attempts,
                base_delay: config.retry_base_delay,
                max_delay: config.retry_max_delay,
            },
        });
        let gate = DebounceGate::new(
            config.debounce_delay,
            config.debounce_max_wait,
            Arc::new(GateSink(Arc::clone(&inner))),
        );
        Self { inner, gate }
    }

    /// Publish a room snapshot to its channel subscribers.
    ///
    /// Validation failures abort before any side effect. Unless `force` or
    /// `immediate` is set the snapshot is routed through the debounce gate
    /// and may be coalesced with neighbouring updates.
    pub async fn publish(
        &self,
        snapshot: RoomSnapshot,
        force: bool,
        immediate: bool,
    ) -> BroadcastResult {
        validate_snapshot(&snapshot).map_err(BroadcastError::from)?;

        if force || immediate {
            self.inner.flush_now(snapshot, force).await
        } else {
            self.gate.schedule(snapshot, force).await
        }
    }

    /// Cancel any pending debounce window for `room_id` without flushing.
    pub fn cancel_pending(&self, room_id: &Uuid) {
        self.gate.cancel(room_id);
    }

    /// Rooms currently held in a pending debounce window, used by tests.
    pub fn pending_rooms(&self) -> usize {
        self.gate.pending_rooms()
    }
}

impl BroadcasterInner {
    async fn flush_now(&self, snapshot: RoomSnapshot, force: bool) -> BroadcastResult {
        let started = Instant::now();
        let room_id = snapshot.id;

        let Some(transport) = self.transport.current().await else {
            return Err(BroadcastError::TransportUnavailable);
        };

        let previous = self.cache.get(&room_id);
        let diff_started = Instant::now();
        let changes = diff(previous.as_ref(), &snapshot);
        let diff_ms = diff_started.elapsed().as_millis() as u64;

        if !changes.has_changes && !force {
            debug!(room = %room_id, "snapshot unchanged; skipping broadcast");
            return Ok(BroadcastMetrics {
                diff_ms,
                total_ms: started.elapsed().as_millis() as u64,
                ..BroadcastMetrics::skipped(room_id, BroadcastDisposition::NoChanges)
            });
        }

        let channel = room_channel(room_id);
        let client_count = transport.subscriber_count(channel.clone()).await;
        if client_count == 0 {
            // No cache refresh either: the next observer should diff against
            // the last state somebody actually received.
            debug!(room = %room_id, "no subscribers; skipping broadcast");
            return Ok(BroadcastMetrics {
                diff_ms,
                total_ms: started.elapsed().as_millis() as u64,
                ..BroadcastMetrics::skipped(room_id, BroadcastDisposition::NoSubscribers)
            });
        }

        let payload = RoomStateUpdate::from_snapshot(
            &snapshot,
            self.presentation_time,
            OffsetDateTime::now_utc(),
        );
        let event = ServerEvent::json(Some(EVENT_ROOM_STATE_UPDATE.to_string()), &payload)
            .map_err(|err| BroadcastError::Encode(err.to_string()))?;

        let emit_started = Instant::now();
        let attempts = self
            .emit_with_retry(transport.as_ref(), &channel, event, room_id)
            .await?;
        let emit_ms = emit_started.elapsed().as_millis() as u64;

        self.cache.put(&snapshot);

        let total_ms = started.elapsed().as_millis() as u64;
        if total_ms > LATENCY_BUDGET.as_millis() as u64 {
            warn!(
                room = %room_id,
                total_ms,
                budget_ms = LATENCY_BUDGET.as_millis() as u64,
                "broadcast exceeded its latency budget"
            );
        }
        if client_count > LARGE_ROOM_WATERMARK {
            warn!(room = %room_id, client_count, "broadcast to an unusually large room");
        }
        debug!(room = %room_id, client_count, attempts, diff_ms, emit_ms, total_ms, "broadcast delivered");

        Ok(BroadcastMetrics {
            room_id,
            disposition: BroadcastDisposition::Delivered,
            client_count,
            attempts,
            diff_ms,
            emit_ms,
            total_ms,
        })
    }

    /// Emit with capped exponential backoff: an explicit attempt loop, never
    /// recursion. Returns the number of attempts on success.
    async fn emit_with_retry(
        &self,
        transport: &dyn ChannelRegistry,
        channel: &str,
        event: ServerEvent,
        room_id: Uuid,
    ) -> Result<u32, BroadcastError> {
        let mut delay = self.retry.base_delay;
        let mut attempt = 1u32;
        loop {
            match transport.broadcast(channel.to_string(), event.clone()).await {
                Ok(_) => return Ok(attempt),
                Err(err) => {
                    if attempt >= self.retry.max_attempts {
                        return Err(BroadcastError::EmitFailed {
                            attempts: attempt,
                            message: err.to_string(),
                        });
                    }
                    warn!(
                        room = %room_id,
                        attempt,
                        error = %err,
                        backoff_ms = delay.as_millis() as u64,
                        "broadcast attempt failed; backing off"
                    );
                    sleep(delay).await;
                    delay = (delay * 2).min(self.retry.max_delay);
                    attempt += 1;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::room::test_fixtures::snapshot_with;
    use crate::state::room::{ParticipantStatus, RoomStatus, SelectionEntry};
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};

    /// Transport double with a configurable subscriber count and an optional
    /// number of leading failures.
    struct MockTransport {
        subscribers: AtomicUsize,
        failures_left: AtomicU32,
        emitted: Mutex<Vec<ServerEvent>>,
        attempt_at: Mutex<Vec<Instant>>,
    }

    impl MockTransport {
        fn with_subscribers(count: usize) -> Arc<Self> {
            Arc::new(Self {
                subscribers: AtomicUsize::new(count),
                failures_left: AtomicU32::new(0),
                emitted: Mutex::new(Vec::new()),
                attempt_at: Mutex::new(Vec::new()),
            })
        }

        fn failing(count: usize, failures: u32) -> Arc<Self> {
            let transport = Self::with_subscribers(count);
            transport.failures_left.store(failures, Ordering::SeqCst);
            transport
        }

        fn emit_count(&self) -> usize {
            self.emitted.lock().unwrap().len()
        }
    }

    impl ChannelRegistry for MockTransport {
        fn subscriber_count(&self, _channel: String) -> BoxFuture<'static, usize> {
            let count = self.subscribers.load(Ordering::SeqCst);
            Box::pin(async move { count })
        }

        fn broadcast(
            &self,
            _channel: String,
            event: ServerEvent,
        ) -> BoxFuture<'static, Result<usize, crate::state::channels::EmitError>> {
            self.attempt_at.lock().unwrap().push(Instant::now());
            let fail = self
                .failures_left
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| {
                    left.checked_sub(1)
                })
                .is_ok();
            if !fail {
                self.emitted.lock().unwrap().push(event);
            }
            let count = self.subscribers.load(Ordering::SeqCst);
            Box::pin(async move {
                if fail {
                    Err(crate::state::channels::EmitError("transport down".into()))
                } else {
                    Ok(count)
                }
            })
        }

        fn disconnect_all(&self, _channel: String) -> BoxFuture<'static, ()> {
            Box::pin(async {})
        }

        fn remove_channel(&self, _channel: String) -> BoxFuture<'static, ()> {
            Box::pin(async {})
        }
    }

    async fn build(
        transport: Option<Arc<MockTransport>>,
    ) -> (RoomBroadcaster, Arc<BroadcastCache>, Arc<TransportSlot>) {
        let config = SyncConfig::default();
        let cache = Arc::new(BroadcastCache::new(
            config.cache_max_entries,
            config.cache_ttl,
        ));
        let slot = Arc::new(TransportSlot::new());
        if let Some(transport) = transport {
            slot.install(transport).await;
        }
        let broadcaster = RoomBroadcaster::new(&config, Arc::clone(&cache), Arc::clone(&slot));
        (broadcaster, cache, slot)
    }

    #[tokio::test(start_paused = true)]
    async fn first_broadcast_delivers_and_populates_the_cache() {
        // Empty cache, one subscriber: the full state goes out.
        let transport = MockTransport::with_subscribers(1);
        let (broadcaster, cache, _slot) = build(Some(transport.clone())).await;
        let (_, snapshot) = snapshot_with(RoomStatus::Waiting, &["alice"]);

        let metrics = broadcaster
            .publish(snapshot.clone(), false, true)
            .await
            .unwrap();

        assert_eq!(metrics.disposition, BroadcastDisposition::Delivered);
        assert_eq!(metrics.client_count, 1);
        assert_eq!(metrics.attempts, 1);
        assert_eq!(transport.emit_count(), 1);
        assert_eq!(cache.get(&snapshot.id).map(|s| s.id), Some(snapshot.id));
    }

    #[tokio::test(start_paused = true)]
    async fn unchanged_snapshot_is_not_rebroadcast() {
        // A second publish of an identical snapshot is a no-op.
        let transport = MockTransport::with_subscribers(1);
        let (broadcaster, _cache, _slot) = build(Some(transport.clone())).await;
        let (_, snapshot) = snapshot_with(RoomStatus::Waiting, &["alice"]);

        broadcaster
            .publish(snapshot.clone(), false, true)
            .await
            .unwrap();
        let second = broadcaster
            .publish(snapshot.clone(), false, true)
            .await
            .unwrap();

        assert_eq!(second.disposition, BroadcastDisposition::NoChanges);
        assert_eq!(second.client_count, 0);
        assert_eq!(transport.emit_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn force_bypasses_the_no_change_skip() {
        let transport = MockTransport::with_subscribers(1);
        let (broadcaster, _cache, _slot) = build(Some(transport.clone())).await;
        let (_, snapshot) = snapshot_with(RoomStatus::Waiting, &["alice"]);

        broadcaster
            .publish(snapshot.clone(), false, true)
            .await
            .unwrap();
        let second = broadcaster.publish(snapshot, true, false).await.unwrap();

        assert_eq!(second.disposition, BroadcastDisposition::Delivered);
        assert_eq!(transport.emit_count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn zero_subscribers_skips_emission_and_cache_refresh() {
        let transport = MockTransport::with_subscribers(0);
        let (broadcaster, cache, _slot) = build(Some(transport.clone())).await;
        let (_, snapshot) = snapshot_with(RoomStatus::Waiting, &["alice"]);

        let metrics = broadcaster
            .publish(snapshot.clone(), false, true)
            .await
            .unwrap();

        assert_eq!(metrics.disposition, BroadcastDisposition::NoSubscribers);
        assert_eq!(transport.emit_count(), 0);
        assert!(cache.get(&snapshot.id).is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn invalid_snapshot_fails_before_any_side_effect() {
        let transport = MockTransport::with_subscribers(1);
        let (broadcaster, cache, _slot) = build(Some(transport.clone())).await;
        let (_, mut snapshot) = snapshot_with(RoomStatus::Waiting, &[]);
        snapshot.wheel_config.max_spin_duration_ms = 0;

        let err = broadcaster
            .publish(snapshot.clone(), false, true)
            .await
            .unwrap_err();

        assert!(matches!(err, BroadcastError::Validation(_)));
        assert_eq!(transport.emit_count(), 0);
        assert!(cache.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn missing_transport_is_a_distinct_error() {
        let (broadcaster, _cache, _slot) = build(None).await;
        let (_, snapshot) = snapshot_with(RoomStatus::Waiting, &[]);

        let err = broadcaster.publish(snapshot, false, true).await.unwrap_err();
        assert!(matches!(err, BroadcastError::TransportUnavailable));
    }

    #[tokio::test(start_paused = true)]
    async fn retry_exhaustion_surfaces_after_max_attempts() {
        let transport = MockTransport::failing(1, 10);
        let (broadcaster, cache, _slot) = build(Some(transport.clone())).await;
        let (_, snapshot) = snapshot_with(RoomStatus::Waiting, &["alice"]);

        let err = broadcaster
            .publish(snapshot.clone(), false, true)
            .await
            .unwrap_err();

        match err {
            BroadcastError::EmitFailed { attempts, .. } => assert_eq!(attempts, 3),
            other => panic!("expected emit failure, got {other:?}"),
        }
        // Exactly max-attempts tries, with non-decreasing backoff in between.
        let attempt_at = transport.attempt_at.lock().unwrap();
        assert_eq!(attempt_at.len(), 3);
        let first_gap = attempt_at[1] - attempt_at[0];
        let second_gap = attempt_at[2] - attempt_at[1];
        assert!(second_gap >= first_gap);
        // A failed emission leaves the cache untouched.
        assert!(cache.get(&snapshot.id).is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn transient_failures_are_retried_to_success() {
        let transport = MockTransport::failing(1, 2);
        let (broadcaster, _cache, _slot) = build(Some(transport.clone())).await;
        let (_, snapshot) = snapshot_with(RoomStatus::Waiting, &["alice"]);

        let metrics = broadcaster.publish(snapshot, false, true).await.unwrap();
        assert_eq!(metrics.disposition, BroadcastDisposition::Delivered);
        assert_eq!(metrics.attempts, 3);
        assert_eq!(transport.emit_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn presenter_selection_broadcasts_wheel_and_timer_state() {
        // A spin landing: the presenter appears and a selection is recorded
        // in one update.
        let transport = MockTransport::with_subscribers(1);
        let (broadcaster, _cache, _slot) = build(Some(transport.clone())).await;
        let (organizer, mut before) = snapshot_with(RoomStatus::Active, &["alice"]);
        before.current_presenter_id = None;
        broadcaster
            .publish(before.clone(), false, true)
            .await
            .unwrap();

        let mut after = before.clone();
        let presenter = *after.participants.keys().nth(1).unwrap();
        after.current_presenter_id = Some(presenter);
        {
            let participant = after.participants.get_mut(&presenter).unwrap();
            participant.status = ParticipantStatus::Active;
            participant.last_updated_at = OffsetDateTime::now_utc();
        }
        after.selection_history.push(SelectionEntry {
            id: Uuid::new_v4(),
            participant_id: presenter,
            participant_name: "alice".into(),
            initiated_by: organizer,
            selected_at: OffsetDateTime::now_utc(),
            spin_duration_ms: 4000,
        });

        let metrics = broadcaster.publish(after, false, true).await.unwrap();
        assert_eq!(metrics.disposition, BroadcastDisposition::Delivered);

        let emitted = transport.emitted.lock().unwrap();
        let payload: serde_json::Value = serde_json::from_str(&emitted[1].data).unwrap();
        assert_eq!(payload["wheelState"]["isSpinning"], false);
        assert_eq!(
            payload["wheelState"]["selectedParticipant"],
            presenter.to_string()
        );
        assert_eq!(payload["timerState"]["isActive"], true);
        assert_eq!(payload["currentPresenter"], presenter.to_string());
    }

    #[tokio::test(start_paused = true)]
    async fn debounced_publishes_coalesce_through_the_gate() {
        let transport = MockTransport::with_subscribers(1);
        let (broadcaster, _cache, _slot) = build(Some(transport.clone())).await;
        let broadcaster = Arc::new(broadcaster);
        let (_, base) = snapshot_with(RoomStatus::Waiting, &["alice"]);

        let mut handles = Vec::new();
        for seconds in 1..=3 {
            let broadcaster = Arc::clone(&broadcaster);
            let mut snapshot = base.clone();
            snapshot.last_updated_at = base.last_updated_at + time::Duration::seconds(seconds);
            handles.push(tokio::spawn(async move {
                broadcaster.publish(snapshot, false, false).await
            }));
            tokio::time::advance(Duration::from_millis(5)).await;
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        assert_eq!(transport.emit_count(), 1);
    }
}

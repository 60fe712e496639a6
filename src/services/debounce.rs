//! Per-room debounce/coalescing of broadcast requests.
//!
//! Rapid updates to one room within the debounce window collapse into a
//! single flush carrying the latest snapshot. A maximum-wait ceiling forces a
//! flush even under continuous churn so no room is starved of updates.

use std::sync::Arc;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use futures::future::BoxFuture;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Duration, Instant, sleep};
use tracing::debug;
use uuid::Uuid;

use crate::services::broadcaster::{BroadcastDisposition, BroadcastMetrics, BroadcastResult};
use crate::state::room::RoomSnapshot;

/// Downstream flush path the gate invokes when a pending window closes.
///
/// Implemented by the broadcaster; a trait seam so the gate can be exercised
/// against mocks.
pub trait FlushSink: Send + Sync + 'static {
    /// Emit the coalesced snapshot for its room.
    fn flush(&self, snapshot: RoomSnapshot, force: bool) -> BoxFuture<'static, BroadcastResult>;
}

/// Pending broadcast window for one room.
///
/// Created on the first queued update, updated in place while the timer is
/// armed, destroyed by the timer firing, a forced flush, or cancellation.
struct PendingEntry {
    latest: RoomSnapshot,
    force: bool,
    first_queued: Instant,
    generation: u64,
    timer: JoinHandle<()>,
    outcome: watch::Sender<Option<BroadcastResult>>,
}

struct GateInner {
    delay: Duration,
    max_wait: Duration,
    sink: Arc<dyn FlushSink>,
    pending: DashMap<Uuid, PendingEntry>,
}

/// Debounce/coalescing gate in front of the broadcaster's flush path.
///
/// Per room the gate is a small state machine: Idle, then Pending while a
/// timer is armed, then Flushing, then back to Idle. Every caller coalesced
/// into one window resolves with the same outcome.
#[derive(Clone)]
pub struct DebounceGate {
    inner: Arc<GateInner>,
}

impl DebounceGate {
    /// Create a gate flushing after `delay` of quiet, or at the `max_wait`
    /// ceiling under continuous churn.
    pub fn new(delay: Duration, max_wait: Duration, sink: Arc<dyn FlushSink>) -> Self {
        Self {
            inner: Arc::new(GateInner {
                delay,
                max_wait,
                sink,
                pending: DashMap::new(),
            }),
        }
    }

    /// Queue `snapshot` for its room and await the coalesced outcome.
    ///
    /// Within a pending window the latest snapshot wins and the force flag is
    /// OR-accumulated. A call arriving after the window has aged past the
    /// max-wait ceiling flushes immediately instead of re-arming the timer.
    pub async fn schedule(
        &self,
        snapshot: RoomSnapshot,
        force: bool,
    ) -> BroadcastResult {
        let room_id = snapshot.id;
        let mut rx = match self.inner.pending.entry(room_id) {
            Entry::Occupied(mut occupied) => {
                let entry = occupied.get_mut();
                entry.latest = snapshot;
                entry.force |= force;

                if entry.first_queued.elapsed() >= self.inner.max_wait {
                    // Ceiling reached: flush the latest snapshot now instead
                    // of letting churn re-arm the timer forever.
                    let entry = occupied.remove();
                    entry.timer.abort();
                    debug!(room = %room_id, "debounce max wait reached; flushing immediately");
                    let result = self.inner.sink.flush(entry.latest, entry.force).await;
                    let _ = entry.outcome.send(Some(result.clone()));
                    return result;
                }

                entry.generation += 1;
                entry.timer.abort();
                entry.timer = arm_timer(Arc::clone(&self.inner), room_id, entry.generation);
                entry.outcome.subscribe()
            }
            Entry::Vacant(vacant) => {
                let (tx, rx) = watch::channel(None);
                vacant.insert(PendingEntry {
                    latest: snapshot,
                    force,
                    first_queued: Instant::now(),
                    generation: 0,
                    timer: arm_timer(Arc::clone(&self.inner), room_id, 0),
                    outcome: tx,
                });
                rx
            }
        };

        match rx.wait_for(|value| value.is_some()).await {
            Ok(value) => (*value).clone().expect("checked by wait_for"),
            // Window torn down without a result; treat as cancelled.
            Err(_) => Ok(BroadcastMetrics::skipped(room_id, BroadcastDisposition::Cancelled)),
        }
    }

    /// Tear down any pending window for `room_id` without invoking the flush
    /// path. Waiters resolve with a cancelled outcome.
    pub fn cancel(&self, room_id: &Uuid) {
        if let Some((_, entry)) = self.inner.pending.remove(room_id) {
            entry.timer.abort();
            let _ = entry.outcome.send(Some(Ok(BroadcastMetrics::skipped(
                *room_id,
                BroadcastDisposition::Cancelled,
            ))));
            debug!(room = %room_id, "cancelled pending debounce window");
        }
    }

    /// Number of rooms with a pending window, used by tests.
    pub fn pending_rooms(&self) -> usize {
        self.inner.pending.len()
    }
}

/// Arm the flush timer for one pending window. The generation check makes a
/// stale timer (re-armed or cancelled while sleeping) a no-op.
fn arm_timer(inner: Arc<GateInner>, room_id: Uuid, generation: u64) -> JoinHandle<()> {
    tokio::spawn(async move {
        sleep(inner.delay).await;
        let Some((_, entry)) = inner
            .pending
            .remove_if(&room_id, |_, entry| entry.generation == generation)
        else {
            return;
        };
        let result = inner.sink.flush(entry.latest, entry.force).await;
        let _ = entry.outcome.send(Some(result));
    })
}

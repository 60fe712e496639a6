use dashmap::DashMap;
use futures::future::BoxFuture;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::broadcast;
use tracing::debug;
use uuid::Uuid;

use crate::dto::events::ServerEvent;

/// Error raised by a transport while emitting to a channel.
#[derive(Debug, Clone, Error)]
#[error("channel emit failed: {0}")]
pub struct EmitError(pub String);

/// Logical channel name for a room.
pub fn room_channel(room_id: Uuid) -> String {
    format!("room:{room_id}")
}

/// Abstraction over the per-room publish/subscribe transport.
///
/// The core only consumes this: it never creates or owns the transport's
/// lifecycle. Implementations must tolerate unknown channel names (treated as
/// zero subscribers).
pub trait ChannelRegistry: Send + Sync {
    /// Number of live subscribers on `channel`.
    fn subscriber_count(&self, channel: String) -> BoxFuture<'static, usize>;
    /// Deliver `event` to every subscriber of `channel`, returning the
    /// receiver count.
    fn broadcast(
        &self,
        channel: String,
        event: ServerEvent,
    ) -> BoxFuture<'static, Result<usize, EmitError>>;
    /// Disconnect every subscriber currently attached to `channel`.
    fn disconnect_all(&self, channel: String) -> BoxFuture<'static, ()>;
    /// Remove the channel itself so no further subscriptions target it.
    fn remove_channel(&self, channel: String) -> BoxFuture<'static, ()>;
}

/// [`ChannelRegistry`] backed by one Tokio broadcast channel per room.
///
/// Dropping a channel's sender closes every outstanding receiver, which is
/// how both `disconnect_all` and `remove_channel` tear a room down.
#[derive(Clone)]
pub struct BroadcastRegistry {
    channels: Arc<DashMap<String, broadcast::Sender<ServerEvent>>>,
    capacity: usize,
}

impl BroadcastRegistry {
    /// Create a registry whose per-channel buffers hold `capacity` events.
    pub fn new(capacity: usize) -> Self {
        Self {
            channels: Arc::new(DashMap::new()),
            capacity,
        }
    }

    /// Register a subscriber on `channel`, creating the channel on first use.
    pub fn subscribe(&self, channel: &str) -> broadcast::Receiver<ServerEvent> {
        self.channels
            .entry(channel.to_string())
            .or_insert_with(|| broadcast::channel(self.capacity).0)
            .subscribe()
    }

    /// Number of channels currently known, used by tests.
    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }
}

impl ChannelRegistry for BroadcastRegistry {
    fn subscriber_count(&self, channel: String) -> BoxFuture<'static, usize> {
        let channels = Arc::clone(&self.channels);
        Box::pin(async move {
            channels
                .get(&channel)
                .map(|sender| sender.receiver_count())
                .unwrap_or(0)
        })
    }

    fn broadcast(
        &self,
        channel: String,
        event: ServerEvent,
    ) -> BoxFuture<'static, Result<usize, EmitError>> {
        let channels = Arc::clone(&self.channels);
        Box::pin(async move {
            let Some(sender) = channels.get(&channel).map(|entry| entry.value().clone()) else {
                return Ok(0);
            };
            if sender.receiver_count() == 0 {
                return Ok(0);
            }
            sender
                .send(event)
                .map_err(|err| EmitError(err.to_string()))
        })
    }

    fn disconnect_all(&self, channel: String) -> BoxFuture<'static, ()> {
        let channels = Arc::clone(&self.channels);
        Box::pin(async move {
            if channels.remove(&channel).is_some() {
                debug!(%channel, "disconnected all channel subscribers");
            }
        })
    }

    fn remove_channel(&self, channel: String) -> BoxFuture<'static, ()> {
        let channels = Arc::clone(&self.channels);
        Box::pin(async move {
            channels.remove(&channel);
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(data: &str) -> ServerEvent {
        ServerEvent {
            event: Some("room_state_update".into()),
            data: data.into(),
        }
    }

    #[tokio::test]
    async fn subscriber_count_tracks_receivers() {
        let registry = BroadcastRegistry::new(16);
        let channel = room_channel(Uuid::new_v4());

        assert_eq!(registry.subscriber_count(channel.clone()).await, 0);
        let _rx1 = registry.subscribe(&channel);
        let _rx2 = registry.subscribe(&channel);
        assert_eq!(registry.subscriber_count(channel).await, 2);
    }

    #[tokio::test]
    async fn broadcast_reaches_every_subscriber() {
        let registry = BroadcastRegistry::new(16);
        let channel = room_channel(Uuid::new_v4());
        let mut rx1 = registry.subscribe(&channel);
        let mut rx2 = registry.subscribe(&channel);

        let delivered = registry
            .broadcast(channel, event("payload"))
            .await
            .unwrap();
        assert_eq!(delivered, 2);
        assert_eq!(rx1.recv().await.unwrap().data, "payload");
        assert_eq!(rx2.recv().await.unwrap().data, "payload");
    }

    #[tokio::test]
    async fn broadcast_to_unknown_channel_is_a_noop() {
        let registry = BroadcastRegistry::new(16);
        let delivered = registry
            .broadcast(room_channel(Uuid::new_v4()), event("payload"))
            .await
            .unwrap();
        assert_eq!(delivered, 0);
    }

    #[tokio::test]
    async fn disconnect_all_closes_receivers() {
        let registry = BroadcastRegistry::new(16);
        let channel = room_channel(Uuid::new_v4());
        let mut rx = registry.subscribe(&channel);

        registry.disconnect_all(channel.clone()).await;
        registry.remove_channel(channel.clone()).await;

        assert!(rx.recv().await.is_err());
        assert_eq!(registry.subscriber_count(channel).await, 0);
        assert_eq!(registry.channel_count(), 0);
    }
}

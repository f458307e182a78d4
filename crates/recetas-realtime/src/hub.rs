use std::collections::HashMap;
use std::sync::Arc;

use futures_util::stream::BoxStream;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{RwLock, broadcast};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use uuid::Uuid;

use recetas_types::InsertedRow;
use recetas_types::events::{RealtimeEvent, channel_topic, table_topic};

/// Stream of rows inserted into one table. Dropping it unsubscribes.
pub type InsertStream = BoxStream<'static, InsertedRow>;

/// Stream of payloads for one event name on one broadcast channel.
/// Ends when the channel handle is closed.
pub type BroadcastStream = BoxStream<'static, serde_json::Value>;

#[derive(Debug, thiserror::Error)]
pub enum RealtimeError {
    #[error("channel '{0}' is closed")]
    Closed(String),
}

/// Handle to an open broadcast channel.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ChannelHandle {
    id: Uuid,
    name: String,
}

impl ChannelHandle {
    pub fn name(&self) -> &str {
        &self.name
    }
}

/// Fans realtime events out to every subscriber of a topic.
#[derive(Clone)]
pub struct Hub {
    inner: Arc<HubInner>,
}

struct HubInner {
    /// One broadcast sender per topic, created lazily
    topics: RwLock<HashMap<String, broadcast::Sender<RealtimeEvent>>>,

    /// Open channel handles: handle id -> close signal
    channels: RwLock<HashMap<Uuid, CancellationToken>>,

    capacity: usize,
}

impl Default for Hub {
    fn default() -> Self {
        Self::new()
    }
}

impl Hub {
    pub fn new() -> Self {
        Self::with_capacity(1024)
    }

    /// `capacity` bounds how far a slow subscriber may lag before events are skipped.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            inner: Arc::new(HubInner {
                topics: RwLock::new(HashMap::new()),
                channels: RwLock::new(HashMap::new()),
                capacity,
            }),
        }
    }

    async fn sender(&self, topic: &str) -> broadcast::Sender<RealtimeEvent> {
        if let Some(tx) = self.inner.topics.read().await.get(topic) {
            return tx.clone();
        }
        self.inner
            .topics
            .write()
            .await
            .entry(topic.to_string())
            .or_insert_with(|| broadcast::channel(self.inner.capacity).0)
            .clone()
    }

    /// Publish an event to every current subscriber of its topic.
    pub async fn publish(&self, event: RealtimeEvent) {
        let tx = self.sender(&event.topic()).await;
        // No subscribers is not an error
        let _ = tx.send(event);
    }

    /// Notify subscribers that a row was inserted into `table`.
    pub async fn publish_insert(&self, table: &str, row: InsertedRow) {
        debug!(table, id = %row.id, "row inserted");
        self.publish(RealtimeEvent::RowInserted {
            table: table.to_string(),
            row,
        })
        .await;
    }

    /// Subscribe to inserts on `table`. Events published after this call returns
    /// are delivered, even if the stream is polled later.
    pub async fn subscribe_insert(&self, table: &str) -> InsertStream {
        let mut rx = self.sender(&table_topic(table)).await.subscribe();
        let table = table.to_string();

        Box::pin(async_stream::stream! {
            loop {
                match rx.recv().await {
                    Ok(RealtimeEvent::RowInserted { row, .. }) => yield row,
                    Ok(_) => continue,
                    Err(RecvError::Lagged(n)) => {
                        warn!("Insert subscriber on '{}' lagged by {} events", table, n);
                        continue;
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        })
    }

    /// Open a broadcast channel.
    pub async fn open_channel(&self, name: &str) -> ChannelHandle {
        let handle = ChannelHandle {
            id: Uuid::new_v4(),
            name: name.to_string(),
        };
        self.inner
            .channels
            .write()
            .await
            .insert(handle.id, CancellationToken::new());
        debug!(channel = name, "broadcast channel opened");
        handle
    }

    async fn close_signal(&self, handle: &ChannelHandle) -> Result<CancellationToken, RealtimeError> {
        self.inner
            .channels
            .read()
            .await
            .get(&handle.id)
            .cloned()
            .ok_or_else(|| RealtimeError::Closed(handle.name.clone()))
    }

    /// Broadcast `payload` under `event` on the handle's channel.
    pub async fn broadcast(
        &self,
        handle: &ChannelHandle,
        event: &str,
        payload: serde_json::Value,
    ) -> Result<(), RealtimeError> {
        self.close_signal(handle).await?;
        self.publish(RealtimeEvent::Broadcast {
            channel: handle.name.clone(),
            event: event.to_string(),
            payload,
        })
        .await;
        Ok(())
    }

    /// Receive payloads broadcast under `event` on the handle's channel.
    pub async fn on_broadcast(
        &self,
        handle: &ChannelHandle,
        event: &str,
    ) -> Result<BroadcastStream, RealtimeError> {
        let closed = self.close_signal(handle).await?;
        let mut rx = self.sender(&channel_topic(&handle.name)).await.subscribe();
        let name = handle.name.clone();
        let wanted = event.to_string();

        Ok(Box::pin(async_stream::stream! {
            loop {
                let next = tokio::select! {
                    _ = closed.cancelled() => break,
                    result = rx.recv() => result,
                };
                match next {
                    Ok(RealtimeEvent::Broadcast { event, payload, .. }) if event == wanted => {
                        yield payload
                    }
                    Ok(_) => continue,
                    Err(RecvError::Lagged(n)) => {
                        warn!("Broadcast subscriber on '{}' lagged by {} events", name, n);
                        continue;
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        }))
    }

    /// Close a channel handle. Its broadcast streams end. Idempotent.
    pub async fn close(&self, handle: &ChannelHandle) {
        if let Some(token) = self.inner.channels.write().await.remove(&handle.id) {
            token.cancel();
            debug!(channel = %handle.name, "broadcast channel closed");
        }
    }

    /// Number of open channel handles.
    pub async fn open_channels(&self) -> usize {
        self.inner.channels.read().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use futures_util::StreamExt;

    fn row(id: &str) -> InsertedRow {
        InsertedRow {
            id: id.into(),
            content: "hola".into(),
            author_id: "u1".into(),
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_insert_subscribers_see_only_their_table() {
        let hub = Hub::new();
        let mut messages = hub.subscribe_insert("mensajes").await;

        hub.publish_insert("recetas", row("r1")).await;
        hub.publish_insert("mensajes", row("m1")).await;

        let got = messages.next().await.unwrap();
        assert_eq!(got.id, "m1");
    }

    #[tokio::test]
    async fn test_broadcast_filters_by_event_name() {
        let hub = Hub::new();
        let handle = hub.open_channel("typing-channel").await;
        let mut typing = hub.on_broadcast(&handle, "typing").await.unwrap();

        hub.broadcast(&handle, "other", serde_json::json!(1)).await.unwrap();
        hub.broadcast(&handle, "typing", serde_json::json!(2)).await.unwrap();

        assert_eq!(typing.next().await.unwrap(), serde_json::json!(2));
    }

    #[tokio::test]
    async fn test_close_ends_streams_and_rejects_broadcasts() {
        let hub = Hub::new();
        let handle = hub.open_channel("typing-channel").await;
        let mut typing = hub.on_broadcast(&handle, "typing").await.unwrap();
        assert_eq!(hub.open_channels().await, 1);

        hub.close(&handle).await;
        hub.close(&handle).await;

        assert!(typing.next().await.is_none());
        assert!(matches!(
            hub.broadcast(&handle, "typing", serde_json::Value::Null).await,
            Err(RealtimeError::Closed(_))
        ));
        assert_eq!(hub.open_channels().await, 0);
    }

    #[tokio::test]
    async fn test_two_handles_share_a_channel_name() {
        let hub = Hub::new();
        let a = hub.open_channel("typing-channel").await;
        let b = hub.open_channel("typing-channel").await;
        let mut from_b = hub.on_broadcast(&b, "typing").await.unwrap();

        hub.broadcast(&a, "typing", serde_json::json!("hi")).await.unwrap();
        assert_eq!(from_b.next().await.unwrap(), serde_json::json!("hi"));
    }
}

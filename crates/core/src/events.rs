//! Event recording and fan-out.
//!
//! Every notification is first appended to the project's message history in
//! the cache, then pushed to live subscribers through an [`EventBus`]. The
//! history is the source of truth: a subscriber that connects late, or misses
//! live messages, replays it on connect.

use std::collections::HashSet;
use std::pin::Pin;

use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use redis::AsyncCommands;
use serde_json::json;
use std::sync::Arc;
use tk_protocol::ipc::{EventType, SseMessageRecord};
use tk_protocol::pipeline_models::ProcessingStep;
use tk_protocol::process_models::AgentState;
use tokio::sync::broadcast;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::{Stream, StreamExt};
use tracing::{debug, warn};

use crate::cache::CacheService;
use crate::store::{store_err, RedisStore, StoreResult};

pub type RecordStream = Pin<Box<dyn Stream<Item = SseMessageRecord> + Send>>;

/// Live fan-out of records to subscribers of a project.
#[async_trait]
pub trait EventBus: Send + Sync {
    async fn publish(&self, record: &SseMessageRecord) -> StoreResult<()>;

    /// Records published for `project_id` from now on.
    async fn subscribe(&self, project_id: &str) -> StoreResult<RecordStream>;
}

/// In-process bus over a tokio broadcast channel.
pub struct BroadcastEventBus {
    tx: broadcast::Sender<SseMessageRecord>,
}

impl BroadcastEventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }
}

impl Default for BroadcastEventBus {
    fn default() -> Self {
        Self::new(1024)
    }
}

#[async_trait]
impl EventBus for BroadcastEventBus {
    async fn publish(&self, record: &SseMessageRecord) -> StoreResult<()> {
        // No receivers is not an error; the history still has the record.
        let _ = self.tx.send(record.clone());
        Ok(())
    }

    async fn subscribe(&self, project_id: &str) -> StoreResult<RecordStream> {
        let project_id = project_id.to_string();
        let stream = BroadcastStream::new(self.tx.subscribe()).filter_map(move |item| match item {
            Ok(record) if record.project_id == project_id => Some(record),
            Ok(_) => None,
            Err(BroadcastStreamRecvError::Lagged(skipped)) => {
                warn!(project_id = %project_id, skipped, "subscriber lagged, records dropped");
                None
            }
        });
        Ok(Box::pin(stream))
    }
}

/// Cross-process bus over Redis pub/sub, one channel per project.
#[derive(Clone)]
pub struct RedisEventBus {
    client: redis::Client,
    conn: MultiplexedConnection,
    prefix: String,
}

impl RedisEventBus {
    /// Publish over the store's shared connection; subscriptions open their
    /// own connection from the same client.
    pub fn from_store(store: &RedisStore, prefix: impl Into<String>) -> Self {
        Self {
            client: store.client().clone(),
            conn: store.conn(),
            prefix: prefix.into(),
        }
    }

    pub fn channel(&self, project_id: &str) -> String {
        format!("{}:events:{}", self.prefix, project_id)
    }
}

#[async_trait]
impl EventBus for RedisEventBus {
    async fn publish(&self, record: &SseMessageRecord) -> StoreResult<()> {
        let payload = serde_json::to_string(record)?;
        let mut conn = self.conn.clone();
        let receivers: i64 = conn
            .publish(self.channel(&record.project_id), payload)
            .await
            .map_err(store_err)?;
        debug!(project_id = %record.project_id, receivers, "event published");
        Ok(())
    }

    async fn subscribe(&self, project_id: &str) -> StoreResult<RecordStream> {
        let mut pubsub = self.client.get_async_pubsub().await.map_err(store_err)?;
        pubsub
            .subscribe(self.channel(project_id))
            .await
            .map_err(store_err)?;

        let stream = pubsub.into_on_message().filter_map(|msg| {
            let payload: String = msg.get_payload().ok()?;
            match serde_json::from_str(&payload) {
                Ok(record) => Some(record),
                Err(e) => {
                    warn!(error = %e, "dropping unreadable event");
                    None
                }
            }
        });
        Ok(Box::pin(stream))
    }
}

/// Records notifications and hands them to the bus.
#[derive(Clone)]
pub struct EventPublisher {
    cache: CacheService,
    bus: Arc<dyn EventBus>,
}

impl EventPublisher {
    pub fn new(cache: CacheService, bus: Arc<dyn EventBus>) -> Self {
        Self { cache, bus }
    }

    /// Record and broadcast one notification.
    ///
    /// # Errors
    ///
    /// Fails only if the record cannot be written to the message history. A
    /// bus failure is logged; subscribers recover from the history.
    pub async fn publish(
        &self,
        project_id: &str,
        event_type: EventType,
        event_data: serde_json::Value,
    ) -> StoreResult<SseMessageRecord> {
        let record = SseMessageRecord::new(project_id, event_type, event_data);
        self.cache.append_message(&record).await?;
        if let Err(e) = self.bus.publish(&record).await {
            warn!(project_id, error = %e, "live broadcast failed");
        }
        Ok(record)
    }

    pub async fn publish_state(&self, state: &AgentState) -> StoreResult<SseMessageRecord> {
        let data = serde_json::to_value(state)?;
        self.publish(&state.project_id, EventType::StateUpdate, data)
            .await
    }

    pub async fn publish_progress(
        &self,
        project_id: &str,
        progress: u8,
        message: &str,
    ) -> StoreResult<SseMessageRecord> {
        self.publish(
            project_id,
            EventType::Progress,
            json!({ "progress": progress, "message": message }),
        )
        .await
    }

    pub async fn publish_error(
        &self,
        project_id: &str,
        step: Option<ProcessingStep>,
        message: &str,
    ) -> StoreResult<SseMessageRecord> {
        self.publish(
            project_id,
            EventType::Error,
            json!({ "step": step, "error": message }),
        )
        .await
    }

    /// History on connect, then live records.
    ///
    /// The live subscription is opened before the history is read so nothing
    /// published in between is lost; records seen in both are delivered once.
    pub async fn subscribe(&self, project_id: &str) -> StoreResult<RecordStream> {
        let mut live = self.bus.subscribe(project_id).await?;
        let history = self.cache.messages(project_id).await?;

        let stream = async_stream::stream! {
            let mut replayed: HashSet<_> = history.iter().map(|r| r.message_id).collect();
            for record in history {
                yield record;
            }
            while let Some(record) = live.next().await {
                if replayed.remove(&record.message_id) {
                    continue;
                }
                yield record;
            }
        };
        Ok(Box::pin(stream))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CacheConfig;
    use crate::store::MemoryStore;
    use tk_protocol::pipeline_models::PipelineState;

    fn publisher() -> (EventPublisher, Arc<BroadcastEventBus>) {
        let cache = CacheService::new(Arc::new(MemoryStore::new()), "t", CacheConfig::default());
        let bus = Arc::new(BroadcastEventBus::new(16));
        (EventPublisher::new(cache, bus.clone()), bus)
    }

    #[tokio::test]
    async fn test_broadcast_bus_filters_by_project() {
        let bus = BroadcastEventBus::new(16);
        let mut stream = bus.subscribe("p1").await.unwrap();

        let other = SseMessageRecord::new("p2", EventType::Progress, json!({}));
        let mine = SseMessageRecord::new("p1", EventType::Progress, json!({ "n": 1 }));
        bus.publish(&other).await.unwrap();
        bus.publish(&mine).await.unwrap();

        assert_eq!(stream.next().await, Some(mine));
    }

    #[tokio::test]
    async fn test_publish_without_subscribers_is_recorded() {
        let (publisher, _bus) = publisher();
        let state = AgentState::new("p1", PipelineState::Extracted, 20, "done");
        publisher.publish_state(&state).await.unwrap();

        let history = publisher.cache.messages("p1").await.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].event_type, EventType::StateUpdate);
        assert_eq!(history[0].event_data["current_state"], "EXTRACTED");
    }

    #[tokio::test]
    async fn test_subscribe_replays_history_then_live() {
        let (publisher, _bus) = publisher();
        let early = publisher
            .publish_progress("p1", 10, "early")
            .await
            .unwrap();

        let mut stream = publisher.subscribe("p1").await.unwrap();
        let late = publisher
            .publish_error("p1", Some(ProcessingStep::Extract), "bad file")
            .await
            .unwrap();

        assert_eq!(stream.next().await, Some(early));
        assert_eq!(stream.next().await, Some(late));
    }

    #[tokio::test]
    async fn test_subscribe_delivers_replayed_record_once() {
        let (publisher, bus) = publisher();
        let record = publisher.publish_progress("p1", 10, "once").await.unwrap();

        let mut stream = publisher.subscribe("p1").await.unwrap();
        // The same record arriving live, as with a publish racing the subscribe.
        bus.publish(&record).await.unwrap();
        let next = publisher.publish_progress("p1", 20, "next").await.unwrap();

        let received: Vec<SseMessageRecord> = (&mut stream).take(2).collect().await;
        assert_eq!(received, vec![record, next]);
    }
}

//! Persistent FIFO of step requests.
//!
//! Auto-chaining hands the next step to this queue instead of running it in
//! the current call stack, so a hand-off survives the process that made it.
//! Delivery is at-least-once: a request may run twice, which the executor
//! tolerates because a repeated step is no longer legal and is rejected
//! without side effects.

use std::sync::Arc;

use tk_protocol::ipc::StepRequest;
use tracing::{debug, warn};

use crate::store::{KvStore, StoreResult};

#[derive(Clone)]
pub struct StepQueue {
    store: Arc<dyn KvStore>,
    key: String,
}

impl StepQueue {
    pub fn new(store: Arc<dyn KvStore>, prefix: &str) -> Self {
        Self {
            store,
            key: format!("{prefix}:queue:steps"),
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub async fn enqueue(&self, request: &StepRequest) -> StoreResult<()> {
        let raw = serde_json::to_string(request)?;
        self.store.push_back(&self.key, &raw).await?;
        debug!(
            project_id = %request.project_id,
            step = %request.step,
            attempt = request.attempt,
            "step enqueued"
        );
        Ok(())
    }

    /// Next request, skipping entries that no longer parse.
    pub async fn dequeue(&self) -> StoreResult<Option<StepRequest>> {
        while let Some(raw) = self.store.pop_front(&self.key).await? {
            match serde_json::from_str(&raw) {
                Ok(request) => return Ok(Some(request)),
                Err(e) => warn!(error = %e, "dropping unreadable step request"),
            }
        }
        Ok(None)
    }

    /// Requests waiting, oldest first.
    pub async fn pending(&self) -> StoreResult<Vec<StepRequest>> {
        let raw = self.store.list(&self.key).await?;
        Ok(raw
            .iter()
            .filter_map(|entry| serde_json::from_str(entry).ok())
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use tk_protocol::pipeline_models::ProcessingStep;

    #[tokio::test]
    async fn test_requests_come_back_in_order() {
        let queue = StepQueue::new(Arc::new(MemoryStore::new()), "t");
        let first = StepRequest::new("p1", ProcessingStep::AnalyzeH1);
        let second = StepRequest::new("p2", ProcessingStep::Finalize);
        queue.enqueue(&first).await.unwrap();
        queue.enqueue(&second).await.unwrap();

        assert_eq!(queue.pending().await.unwrap().len(), 2);
        assert_eq!(queue.dequeue().await.unwrap(), Some(first));
        assert_eq!(queue.dequeue().await.unwrap(), Some(second));
        assert_eq!(queue.dequeue().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_garbage_entries_are_skipped() {
        let store = Arc::new(MemoryStore::new());
        let queue = StepQueue::new(store.clone(), "t");
        store.push_back(queue.key(), "not json").await.unwrap();
        let request = StepRequest::new("p1", ProcessingStep::AnalyzeH1);
        queue.enqueue(&request).await.unwrap();

        assert_eq!(queue.dequeue().await.unwrap(), Some(request));
    }
}

//! Wiring of every engine component from an [`EngineConfig`].
//!
//! [`Engine::start`] opens the store connection (for the Redis backend) and
//! builds the component graph once; [`Engine::shutdown`] tears it down.

use std::sync::Arc;

use tracing::info;

use crate::cache::CacheService;
use crate::collaborators::Collaborators;
use crate::config::{EngineConfig, StoreBackend};
use crate::engine::PipelineExecutor;
use crate::error::PipelineResult;
use crate::events::{BroadcastEventBus, EventBus, EventPublisher, RedisEventBus};
use crate::lock::DistributedLock;
use crate::queue::StepQueue;
use crate::registry::StateRegistry;
use crate::service::PipelineService;
use crate::state::StateManager;
use crate::store::{KvStore, MemoryStore, RedisStore, StoreError};
use crate::worker::Worker;

pub struct Engine {
    config: EngineConfig,
    store: Arc<dyn KvStore>,
    redis: Option<RedisStore>,
    executor: Arc<PipelineExecutor>,
    service: PipelineService,
    worker: Worker,
}

impl Engine {
    /// Build an engine with the built-in collaborators.
    pub async fn start(config: EngineConfig) -> PipelineResult<Self> {
        Self::start_with(config, Collaborators::builtin()).await
    }

    /// Build an engine with custom collaborators.
    ///
    /// # Errors
    ///
    /// - `Store` if the Redis backend is selected and cannot be reached
    /// - `Configuration` if the registry tables are inconsistent
    pub async fn start_with(
        config: EngineConfig,
        collaborators: Collaborators,
    ) -> PipelineResult<Self> {
        let prefix = config.store.key_prefix.clone();

        let (store, redis, bus): (Arc<dyn KvStore>, Option<RedisStore>, Arc<dyn EventBus>) =
            match config.store.backend {
                StoreBackend::Memory => (
                    Arc::new(MemoryStore::new()),
                    None,
                    Arc::new(BroadcastEventBus::default()),
                ),
                StoreBackend::Redis => {
                    let url = config.store.redis_url.as_deref().ok_or_else(|| {
                        StoreError::Connection("store.redis_url is not set".into())
                    })?;
                    let redis = RedisStore::connect(url).await?;
                    let bus = Arc::new(RedisEventBus::from_store(&redis, prefix.clone()));
                    (Arc::new(redis.clone()), Some(redis), bus)
                }
            };
        store.ping().await?;

        let registry = Arc::new(StateRegistry::standard());
        registry.validate()?;

        let cache = CacheService::new(Arc::clone(&store), prefix.clone(), config.cache.clone());
        let events = EventPublisher::new(cache.clone(), bus);
        let states = StateManager::new(Arc::clone(&registry), cache.clone(), events.clone());
        let lock = DistributedLock::new(Arc::clone(&store), config.lock.to_options());
        let queue = StepQueue::new(Arc::clone(&store), &prefix);

        let executor = Arc::new(PipelineExecutor::new(
            Arc::clone(&registry),
            states,
            cache.clone(),
            lock.clone(),
            queue,
            &collaborators,
        ));
        let service = PipelineService::new(registry, Arc::clone(&executor), cache, events, lock);
        let worker = Worker::new(Arc::clone(&executor), config.worker.clone());

        info!(backend = ?config.store.backend, prefix = %prefix, "engine started");
        Ok(Self {
            config,
            store,
            redis,
            executor,
            service,
            worker,
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<dyn KvStore> {
        &self.store
    }

    pub fn service(&self) -> &PipelineService {
        &self.service
    }

    pub fn executor(&self) -> &Arc<PipelineExecutor> {
        &self.executor
    }

    pub fn worker(&self) -> &Worker {
        &self.worker
    }

    /// Release the store connection.
    pub fn shutdown(self) {
        if let Some(redis) = self.redis {
            redis.close();
        }
        info!("engine stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::PipelineError;

    #[tokio::test]
    async fn test_memory_engine_starts() {
        let engine = Engine::start(EngineConfig::default()).await.unwrap();
        assert!(matches!(
            engine.service().get_status("p1").await,
            Err(PipelineError::NotStarted(_))
        ));
        engine.shutdown();
    }

    #[tokio::test]
    async fn test_redis_backend_requires_url() {
        let mut config = EngineConfig::default();
        config.store.backend = StoreBackend::Redis;
        assert!(matches!(
            Engine::start(config).await,
            Err(PipelineError::Store(StoreError::Connection(_)))
        ));
    }
}

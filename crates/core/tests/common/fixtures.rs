//! Test fixtures: an in-memory engine and sample tender files.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tempfile::TempDir;
use tk_core::cache::CacheService;
use tk_core::collaborators::Collaborators;
use tk_core::config::{CacheConfig, WorkerConfig};
use tk_core::engine::PipelineExecutor;
use tk_core::events::{BroadcastEventBus, EventPublisher};
use tk_core::lock::{Backoff, DistributedLock, LockOptions};
use tk_core::queue::StepQueue;
use tk_core::registry::StateRegistry;
use tk_core::service::PipelineService;
use tk_core::state::StateManager;
use tk_core::store::{KvStore, MemoryStore};
use tk_core::worker::Worker;
use tk_protocol::document_models::{DocumentNode, TenderDocument};

/// Every component of one engine, sharing a single in-memory store.
#[allow(dead_code)]
pub struct TestEngine {
    pub store: Arc<dyn KvStore>,
    pub cache: CacheService,
    pub lock: DistributedLock,
    pub executor: Arc<PipelineExecutor>,
    pub service: PipelineService,
    pub worker: Worker,
    /// Holds the uploaded source files.
    pub dir: TempDir,
}

/// Lock options that wait briefly for a busy project instead of failing at once.
pub fn test_lock_options() -> LockOptions {
    LockOptions {
        ttl: Duration::from_secs(5),
        retries: 200,
        backoff: Backoff::Fixed(Duration::from_millis(5)),
        timeout: Some(Duration::from_secs(5)),
        extend_interval: None,
    }
}

pub fn test_worker_config() -> WorkerConfig {
    WorkerConfig {
        poll_interval_ms: 10,
        max_attempts: 3,
        chain_delay_ms: 0,
    }
}

/// Build an engine around the built-in collaborators.
#[allow(dead_code)]
pub fn create_test_engine() -> TestEngine {
    create_engine_with(Collaborators::builtin(), test_lock_options())
}

/// Build an engine with custom collaborators and lock behavior.
pub fn create_engine_with(collaborators: Collaborators, lock_options: LockOptions) -> TestEngine {
    build_engine(
        Arc::new(MemoryStore::new()),
        &collaborators,
        lock_options,
        |executor| executor,
    )
}

/// Build an engine over `store`; `customize` may rebind step handlers.
#[allow(dead_code)]
pub fn build_engine(
    store: Arc<dyn KvStore>,
    collaborators: &Collaborators,
    lock_options: LockOptions,
    customize: impl FnOnce(PipelineExecutor) -> PipelineExecutor,
) -> TestEngine {
    let cache = CacheService::new(Arc::clone(&store), "test", CacheConfig::default());
    let events = EventPublisher::new(cache.clone(), Arc::new(BroadcastEventBus::default()));
    let registry = Arc::new(StateRegistry::standard());
    let states = StateManager::new(Arc::clone(&registry), cache.clone(), events.clone());
    let lock = DistributedLock::new(Arc::clone(&store), lock_options);
    let queue = StepQueue::new(Arc::clone(&store), "test");

    let executor = Arc::new(customize(PipelineExecutor::new(
        Arc::clone(&registry),
        states,
        cache.clone(),
        lock.clone(),
        queue,
        collaborators,
    )));
    let service = PipelineService::new(
        registry,
        Arc::clone(&executor),
        cache.clone(),
        events,
        lock.clone(),
    );
    let worker = Worker::new(Arc::clone(&executor), test_worker_config());

    TestEngine {
        store,
        cache,
        lock,
        executor,
        service,
        worker,
        dir: tempfile::tempdir().expect("Failed to create temp dir"),
    }
}

/// A two-chapter tender with numbered sections and one subsection.
pub fn sample_tender() -> TenderDocument {
    let mut document = TenderDocument::new(vec![
        DocumentNode::paragraph("第一章 总则"),
        DocumentNode::paragraph("1.1 项目概况"),
        DocumentNode::paragraph("1.1.1 Budget"),
        DocumentNode::paragraph("The budget ceiling is fixed for the whole contract."),
        DocumentNode::paragraph("第二章 投标要求"),
        DocumentNode::paragraph("2.1 Qualifications"),
        DocumentNode::paragraph("Bidders must hold a valid license."),
    ]);
    document.title = Some("Municipal road maintenance tender".into());
    document
}

impl TestEngine {
    /// Write `document` as an uploaded JSON file and return its path.
    pub fn write_source(&self, name: &str, document: &TenderDocument) -> String {
        let path: PathBuf = self.dir.path().join(format!("{name}.json"));
        std::fs::write(
            &path,
            serde_json::to_string_pretty(document).expect("Failed to serialize document"),
        )
        .expect("Failed to write source file");
        path.to_string_lossy().into_owned()
    }

    /// Upload the sample tender for `project_id` and return its path.
    #[allow(dead_code)]
    pub fn upload_sample(&self, project_id: &str) -> String {
        self.write_source(project_id, &sample_tender())
    }
}

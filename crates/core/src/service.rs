//! Control surface used by the API layer and the CLI.
//!
//! Every operation is keyed by project id. Operations that change state go
//! through the executor (and so through the project lock); reads go straight
//! to the cache.

use std::sync::Arc;

use serde::Serialize;
use tk_protocol::document_models::TenderDocument;
use tk_protocol::ipc::Op;
use tk_protocol::pipeline_models::{DocumentVariant, PipelineState, ProcessingStep};
use tk_protocol::process_models::{AgentState, ProjectStatus};
use tracing::{debug, info};

use crate::cache::{CacheService, CleanupReport, StoredDocument};
use crate::engine::{PipelineExecutor, RecoveryAction};
use crate::error::{PipelineError, PipelineResult};
use crate::events::{EventPublisher, RecordStream};
use crate::lock::DistributedLock;
use crate::registry::StateRegistry;

/// Result of one [`Op`].
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum OpOutcome {
    State(AgentState),
    Status(ProjectStatus),
    Document(StoredDocument),
    Cleanup(CleanupReport),
}

#[derive(Clone)]
pub struct PipelineService {
    registry: Arc<StateRegistry>,
    executor: Arc<PipelineExecutor>,
    cache: CacheService,
    events: EventPublisher,
    lock: DistributedLock,
}

impl PipelineService {
    pub fn new(
        registry: Arc<StateRegistry>,
        executor: Arc<PipelineExecutor>,
        cache: CacheService,
        events: EventPublisher,
        lock: DistributedLock,
    ) -> Self {
        Self {
            registry,
            executor,
            cache,
            events,
            lock,
        }
    }

    /// Create the project if needed and record where its upload lives.
    ///
    /// The source can only change while extraction has not succeeded yet.
    pub async fn register_upload(
        &self,
        project_id: &str,
        source: &str,
    ) -> PipelineResult<AgentState> {
        let key = self.cache.lock_key(project_id);
        self.lock
            .with_lock(&key, || async {
                let state = self.executor.states().initialize(project_id).await?;
                let accepts_upload = state.current_state == PipelineState::AwaitingUpload
                    || (state.is_failed() && state.step == Some(ProcessingStep::Extract));
                if !accepts_upload {
                    return Err(PipelineError::InvalidAction {
                        project_id: project_id.to_string(),
                        state: state.current_state,
                        step: ProcessingStep::Extract,
                    });
                }
                self.cache.save_source(project_id, source).await?;
                info!(project_id, source, "upload registered");
                Ok::<_, PipelineError>(state)
            })
            .await
    }

    /// Register the upload and run extraction. Later steps follow through
    /// the queue.
    pub async fn start(&self, project_id: &str, source: &str) -> PipelineResult<AgentState> {
        let state = self.register_upload(project_id, source).await?;
        if state.is_failed() {
            return self.retry(project_id).await;
        }
        self.executor.process(project_id, ProcessingStep::Extract).await
    }

    /// Run `step` now. Rejected unless it is the legal next step.
    pub async fn advance(
        &self,
        project_id: &str,
        step: ProcessingStep,
    ) -> PipelineResult<AgentState> {
        self.executor.process(project_id, step).await
    }

    /// Accept the reviewed document. `None` approves the document as produced.
    pub async fn submit_review(
        &self,
        project_id: &str,
        document: Option<TenderDocument>,
    ) -> PipelineResult<AgentState> {
        self.executor
            .process_with(project_id, ProcessingStep::SubmitReview, document)
            .await
    }

    /// Re-run the step that failed.
    pub async fn retry(&self, project_id: &str) -> PipelineResult<AgentState> {
        let state = self.current(project_id).await?;
        let step = self
            .registry
            .legal_step(state.current_state, state.step)?
            .filter(|_| state.is_failed())
            .ok_or_else(|| PipelineError::NotRetryable {
                project_id: project_id.to_string(),
                state: state.current_state,
            })?;
        info!(project_id, %step, "retrying failed step");
        self.executor.process(project_id, step).await
    }

    pub async fn get_status(&self, project_id: &str) -> PipelineResult<ProjectStatus> {
        let snapshot = self
            .cache
            .load_snapshot(project_id)
            .await?
            .ok_or_else(|| PipelineError::NotStarted(project_id.to_string()))?;
        let current = snapshot.state.current_state;
        let config = self.registry.state_config(current)?;

        Ok(ProjectStatus {
            display_status: self.registry.display_status(current),
            requires_input: config.requires_input,
            next_step: self.registry.legal_step(current, snapshot.state.step)?,
            documents: snapshot.documents,
            state: snapshot.state,
        })
    }

    /// The committed revision of `variant`.
    pub async fn get_document(
        &self,
        project_id: &str,
        variant: DocumentVariant,
    ) -> PipelineResult<StoredDocument> {
        let snapshot = self
            .cache
            .load_snapshot(project_id)
            .await?
            .ok_or_else(|| PipelineError::NotStarted(project_id.to_string()))?;
        let missing = || PipelineError::MissingDocument {
            project_id: project_id.to_string(),
            variant,
        };
        let committed = snapshot.document(variant).ok_or_else(missing)?;
        self.cache
            .load_document(project_id, variant)
            .await?
            .filter(|stored| stored.revision == committed.revision)
            .ok_or_else(missing)
    }

    pub async fn history(&self, project_id: &str) -> PipelineResult<Vec<AgentState>> {
        self.executor.states().history(project_id).await
    }

    /// Delete everything stored for the project. Afterwards it reads as not
    /// started.
    pub async fn cleanup(&self, project_id: &str) -> PipelineResult<CleanupReport> {
        let key = self.cache.lock_key(project_id);
        self.lock
            .with_lock(&key, || async {
                let report = self.cache.cleanup(project_id).await;
                info!(project_id, complete = report.is_complete(), "project cleaned up");
                Ok::<_, PipelineError>(report)
            })
            .await
    }

    /// Event history, then live events.
    pub async fn subscribe(&self, project_id: &str) -> PipelineResult<RecordStream> {
        Ok(self.events.subscribe(project_id).await?)
    }

    pub async fn recover(&self, project_id: &str) -> PipelineResult<RecoveryAction> {
        self.executor.recover(project_id).await
    }

    /// Dispatch a client request received over the wire.
    pub async fn handle(&self, op: Op) -> PipelineResult<OpOutcome> {
        debug!(?op, "handling op");
        Ok(match op {
            Op::Start { project_id, source } => {
                OpOutcome::State(self.start(&project_id, &source).await?)
            }
            Op::Advance { project_id, step } => {
                OpOutcome::State(self.advance(&project_id, step).await?)
            }
            Op::SubmitReview {
                project_id,
                document,
            } => OpOutcome::State(self.submit_review(&project_id, document).await?),
            Op::Retry { project_id } => OpOutcome::State(self.retry(&project_id).await?),
            Op::GetStatus { project_id } => OpOutcome::Status(self.get_status(&project_id).await?),
            Op::GetDocument {
                project_id,
                variant,
            } => OpOutcome::Document(self.get_document(&project_id, variant).await?),
            Op::Cleanup { project_id } => OpOutcome::Cleanup(self.cleanup(&project_id).await?),
        })
    }

    async fn current(&self, project_id: &str) -> PipelineResult<AgentState> {
        self.executor
            .states()
            .get_current_state(project_id)
            .await?
            .ok_or_else(|| PipelineError::NotStarted(project_id.to_string()))
    }
}

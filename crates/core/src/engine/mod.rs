//! Pipeline execution engine.
//!
//! The PipelineExecutor runs one step of one project at a time:
//! 1. Takes the project lock
//! 2. Reconciles a stale in-progress state left by a dead worker
//! 3. Checks the requested step is the legal next step
//! 4. Loads the step input, then enters the step's running state and runs
//!    its handler
//! 5. Transitions to the completed state, or to FAILED on a handler error
//! 6. Enqueues the next step when the new state chains automatically
//!
//! Steps never call each other. Auto-chaining goes through the
//! [`StepQueue`], so a worker restart loses no hand-off.

pub mod handlers;

use std::sync::Arc;

use serde::Serialize;
use tk_protocol::document_models::TenderDocument;
use tk_protocol::ipc::StepRequest;
use tk_protocol::pipeline_models::{PipelineState, ProcessingStep};
use tk_protocol::process_models::{AgentState, DocumentRef, StateSnapshot};
use tracing::{debug, info, warn};

use crate::cache::CacheService;
use crate::collaborators::Collaborators;
use crate::error::{PipelineError, PipelineResult};
use crate::lock::DistributedLock;
use crate::queue::StepQueue;
use crate::registry::{ConfigurationError, StateRegistry, StepConfig, StepInput};
use crate::state::{StateManager, Transition};

pub use handlers::{dispatch_table, DispatchTable, StepContext, StepHandler};

/// What recovery did to one project.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum RecoveryAction {
    /// The project was mid-step with no live worker and is now FAILED.
    Failed { state: PipelineState },
    /// The project sat in an auto-transition state; its next step was queued.
    Requeued { step: ProcessingStep },
    Untouched,
}

pub struct PipelineExecutor {
    registry: Arc<StateRegistry>,
    states: StateManager,
    cache: CacheService,
    lock: DistributedLock,
    queue: StepQueue,
    handlers: DispatchTable,
}

impl PipelineExecutor {
    /// Create an executor whose dispatch table is wired to `collaborators`.
    ///
    /// # Arguments
    ///
    /// * `registry` - State and step tables
    /// * `states` - Applies transitions
    /// * `cache` - Reads step inputs and source references
    /// * `lock` - Serializes steps per project
    /// * `queue` - Receives auto-chained steps
    /// * `collaborators` - Services the step handlers call
    pub fn new(
        registry: Arc<StateRegistry>,
        states: StateManager,
        cache: CacheService,
        lock: DistributedLock,
        queue: StepQueue,
        collaborators: &Collaborators,
    ) -> Self {
        Self {
            registry,
            states,
            cache,
            lock,
            queue,
            handlers: dispatch_table(collaborators),
        }
    }

    /// Replace the handler bound to `step`.
    pub fn with_handler(
        mut self,
        step: ProcessingStep,
        handler: Arc<dyn StepHandler>,
    ) -> Self {
        self.handlers.insert(step, handler);
        self
    }

    pub fn states(&self) -> &StateManager {
        &self.states
    }

    pub fn queue(&self) -> &StepQueue {
        &self.queue
    }

    /// Run `step` for `project_id`.
    pub async fn process(
        &self,
        project_id: &str,
        step: ProcessingStep,
    ) -> PipelineResult<AgentState> {
        self.process_with(project_id, step, None).await
    }

    /// Run `step` with a caller-supplied document (the reviewed document).
    ///
    /// # Errors
    ///
    /// - `NotStarted` if the project has no snapshot
    /// - `Interrupted` if a previous run died mid-step; the project is now FAILED
    /// - `InvalidAction` if `step` is not the legal next step; nothing is written
    /// - `Processing` if the step's logic failed; the project is now FAILED
    /// - `Lock` / `Store` on infrastructure failure; state is not advanced
    pub async fn process_with(
        &self,
        project_id: &str,
        step: ProcessingStep,
        payload: Option<TenderDocument>,
    ) -> PipelineResult<AgentState> {
        let key = self.cache.lock_key(project_id);
        self.lock
            .with_lock(&key, || self.run_step(project_id, step, payload))
            .await
    }

    async fn run_step(
        &self,
        project_id: &str,
        step: ProcessingStep,
        payload: Option<TenderDocument>,
    ) -> PipelineResult<AgentState> {
        let snapshot = self.load_reconciled(project_id).await?;
        let current = &snapshot.state;

        let legal = self
            .registry
            .legal_step(current.current_state, current.step)?;
        if legal != Some(step) {
            return Err(PipelineError::InvalidAction {
                project_id: project_id.to_string(),
                state: current.current_state,
                step,
            });
        }

        let step_config = self.registry.step_config(step)?.clone();
        let handler = self
            .handlers
            .get(&step)
            .cloned()
            .ok_or(ConfigurationError::MissingHandler(step))?;

        // Reads come first so a store error leaves the project where it was.
        let (ctx, input_ref) = match self
            .load_input(project_id, &snapshot, &step_config, payload)
            .await
        {
            Ok(loaded) => loaded,
            Err(e @ (PipelineError::MissingDocument { .. } | PipelineError::MissingSource(_))) => {
                return self.fail_step(project_id, step, e.to_string()).await;
            }
            Err(e) => return Err(e),
        };

        if let Some(running) = step_config.running_state {
            self.states
                .transition_to_state(project_id, Transition::to(running).step(step))
                .await?;
        }

        let progress = match step_config.running_state {
            Some(running) => self.registry.state_config(running)?.progress,
            None => current.progress,
        };
        self.states
            .report_progress(project_id, progress, &format!("{step} started"))
            .await;

        debug!(project_id, %step, "running step handler");
        let document = match handler.run(ctx).await {
            Ok(document) => document,
            Err(e) => return self.fail_step(project_id, step, e.to_string()).await,
        };

        let mut transition = Transition::to(step_config.completed_state).step(step);
        transition = match (step_config.result_key, input_ref) {
            (Some(variant), _) => transition.produced(variant, document),
            (None, Some(carried)) => transition.carried(carried),
            (None, None) => transition,
        };
        let state = self.states.transition_to_state(project_id, transition).await?;

        if state.is_failed() {
            return Err(PipelineError::Processing {
                project_id: project_id.to_string(),
                step,
                message: state.error.clone().unwrap_or_default(),
            });
        }

        self.chain(&state).await?;
        Ok(state)
    }

    /// Load the snapshot, failing a stale in-progress state first.
    ///
    /// Under the project lock nobody else can be running a step, so an
    /// in-progress state can only be left over from a dead run.
    async fn load_reconciled(&self, project_id: &str) -> PipelineResult<StateSnapshot> {
        let snapshot = self
            .states
            .snapshot(project_id)
            .await?
            .ok_or_else(|| PipelineError::NotStarted(project_id.to_string()))?;
        let state = snapshot.state.current_state;

        if self.registry.state_config(state)?.in_progress {
            warn!(project_id, %state, "found stale in-progress state");
            self.states
                .fail(
                    project_id,
                    snapshot.state.step,
                    format!("interrupted while {state}"),
                )
                .await?;
            return Err(PipelineError::Interrupted {
                project_id: project_id.to_string(),
                state,
            });
        }
        Ok(snapshot)
    }

    async fn load_input(
        &self,
        project_id: &str,
        snapshot: &StateSnapshot,
        step_config: &StepConfig,
        payload: Option<TenderDocument>,
    ) -> PipelineResult<(StepContext, Option<DocumentRef>)> {
        let mut ctx = StepContext {
            project_id: project_id.to_string(),
            step: step_config.step,
            source: None,
            input: None,
        };

        let variant = match step_config.input {
            StepInput::Source => {
                let source = self
                    .cache
                    .load_source(project_id)
                    .await?
                    .ok_or_else(|| PipelineError::MissingSource(project_id.to_string()))?;
                ctx.source = Some(source);
                return Ok((ctx, None));
            }
            StepInput::Submitted { .. } if payload.is_some() => {
                ctx.input = payload;
                return Ok((ctx, None));
            }
            StepInput::Submitted { fallback } => fallback,
            StepInput::Variant(variant) => variant,
        };

        // Only a committed revision counts; an orphan from a crashed run does not.
        let missing = || PipelineError::MissingDocument {
            project_id: project_id.to_string(),
            variant,
        };
        let committed = snapshot.document(variant).ok_or_else(missing)?;
        let stored = self
            .cache
            .load_document(project_id, variant)
            .await?
            .filter(|stored| stored.revision == committed.revision)
            .ok_or_else(missing)?;

        ctx.input = Some(stored.document);
        Ok((ctx, Some(committed)))
    }

    async fn fail_step(
        &self,
        project_id: &str,
        step: ProcessingStep,
        message: String,
    ) -> PipelineResult<AgentState> {
        self.states.fail(project_id, Some(step), &message).await?;
        Err(PipelineError::Processing {
            project_id: project_id.to_string(),
            step,
            message,
        })
    }

    /// Queue the next step if `state` chains automatically.
    async fn chain(&self, state: &AgentState) -> PipelineResult<Option<ProcessingStep>> {
        let config = self.registry.state_config(state.current_state)?;
        let next = match (config.auto_transition, config.next_step) {
            (true, Some(next)) => next,
            _ => return Ok(None),
        };

        // The state is committed; if the hand-off is lost, recovery re-drives it.
        if let Err(e) = self
            .queue
            .enqueue(&StepRequest::new(&state.project_id, next))
            .await
        {
            warn!(
                project_id = %state.project_id,
                step = %next,
                error = %e,
                "auto-chain not queued"
            );
            return Ok(None);
        }
        Ok(Some(next))
    }

    /// Apply the recovery rule to one project.
    ///
    /// An in-progress state is failed as interrupted. A state that chains
    /// automatically has its next step queued again; a duplicate request is
    /// harmless.
    pub async fn recover(&self, project_id: &str) -> PipelineResult<RecoveryAction> {
        let key = self.cache.lock_key(project_id);
        self.lock
            .with_lock(&key, || async {
                match self.load_reconciled(project_id).await {
                    Err(PipelineError::Interrupted { state, .. }) => {
                        Ok::<_, PipelineError>(RecoveryAction::Failed { state })
                    }
                    Err(e) => Err(e),
                    Ok(snapshot) => Ok(match self.chain(&snapshot.state).await? {
                        Some(step) => RecoveryAction::Requeued { step },
                        None => RecoveryAction::Untouched,
                    }),
                }
            })
            .await
    }

    /// Recover every project that still has a snapshot.
    pub async fn recover_all(&self) -> PipelineResult<Vec<(String, RecoveryAction)>> {
        let mut actions = Vec::new();
        for project_id in self.cache.known_projects().await? {
            match self.recover(&project_id).await {
                Ok(action) => {
                    if action != RecoveryAction::Untouched {
                        info!(project_id = %project_id, ?action, "project recovered");
                    }
                    actions.push((project_id, action));
                }
                // Cleaned up between the scan and the lock.
                Err(PipelineError::NotStarted(_)) => {}
                Err(e) => return Err(e),
            }
        }
        Ok(actions)
    }
}

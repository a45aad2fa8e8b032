//! Persistent state machine for tender projects.
//!
//! The StateManager is the only component that writes project state. Each
//! transition is validated against the [`StateRegistry`] and then applied in
//! a fixed order:
//!
//! 1. the produced document variant (if the target state persists results)
//! 2. the snapshot, which is the commit point
//! 3. the state history entry
//! 4. the event notification
//!
//! A crash after step 1 leaves an orphaned document revision that no
//! snapshot references; re-running the step overwrites it. Steps 3 and 4 run
//! after the commit and only log their failures.
//!
//! The manager takes no locks. Callers hold the project lock.

use std::sync::Arc;

use tk_protocol::pipeline_models::{PipelineState, ProcessingStep};
use tk_protocol::process_models::{AgentState, StateSnapshot};
use tracing::{error, info, warn};

use crate::cache::CacheService;
use crate::error::{PipelineError, PipelineResult};
use crate::events::EventPublisher;
use crate::registry::StateRegistry;
use crate::state::process::{Transition, TransitionDocument};
use crate::store::StoreError;

#[derive(Clone)]
pub struct StateManager {
    registry: Arc<StateRegistry>,
    cache: CacheService,
    events: EventPublisher,
}

impl StateManager {
    pub fn new(registry: Arc<StateRegistry>, cache: CacheService, events: EventPublisher) -> Self {
        Self {
            registry,
            cache,
            events,
        }
    }

    pub fn registry(&self) -> &StateRegistry {
        &self.registry
    }

    /// Put a new project into `AWAITING_UPLOAD`.
    ///
    /// Idempotent: an existing project is returned unchanged.
    pub async fn initialize(&self, project_id: &str) -> PipelineResult<AgentState> {
        if let Some(existing) = self.get_current_state(project_id).await? {
            return Ok(existing);
        }
        self.transition_to_state(
            project_id,
            Transition::to(PipelineState::AwaitingUpload),
        )
        .await
    }

    pub async fn get_current_state(&self, project_id: &str) -> PipelineResult<Option<AgentState>> {
        Ok(self.snapshot(project_id).await?.map(|s| s.state))
    }

    pub async fn snapshot(&self, project_id: &str) -> PipelineResult<Option<StateSnapshot>> {
        Ok(self.cache.load_snapshot(project_id).await?)
    }

    /// Every recorded state, oldest first.
    pub async fn history(&self, project_id: &str) -> PipelineResult<Vec<AgentState>> {
        Ok(self.cache.state_history(project_id).await?)
    }

    /// Move to FAILED with `reason`, recording the step that failed.
    ///
    /// A project that is already FAILED stays FAILED with the new reason.
    pub async fn fail(
        &self,
        project_id: &str,
        step: Option<ProcessingStep>,
        reason: impl Into<String>,
    ) -> PipelineResult<AgentState> {
        self.transition_to_state(project_id, Transition::failed(step, reason))
            .await
    }

    /// Publish a progress notification without changing state. A failed
    /// publish is logged and swallowed.
    pub async fn report_progress(&self, project_id: &str, progress: u8, message: &str) {
        if let Err(e) = self
            .events
            .publish_progress(project_id, progress, message)
            .await
        {
            warn!(project_id, error = %e, "progress event not recorded");
        }
    }

    /// Validate and apply one transition.
    ///
    /// # Errors
    ///
    /// - `InvalidTransition` if the registry does not allow the move; nothing
    ///   is written
    /// - `Configuration` if the target state has no registry entry
    /// - `Store` if the document or snapshot could not be written
    pub async fn transition_to_state(
        &self,
        project_id: &str,
        mut transition: Transition,
    ) -> PipelineResult<AgentState> {
        let snapshot = self.cache.load_snapshot(project_id).await?;
        let from = snapshot.as_ref().map(|s| s.state.current_state);
        let mut target = transition.effective_target();

        // A failed retry replaces the recorded error in place.
        let refresh = from == Some(PipelineState::Failed) && target == PipelineState::Failed;
        if !refresh && !self.registry.is_transition_allowed(from, target)? {
            return Err(PipelineError::InvalidTransition {
                project_id: project_id.to_string(),
                from,
                to: target,
            });
        }
        let target_config = self.registry.state_config(target)?;
        let mut snapshot = snapshot.unwrap_or_else(|| {
            StateSnapshot::new(AgentState::new(project_id, target, 0, ""))
        });
        let previous = snapshot.state.clone();

        let mut document_ref = None;
        match transition.document.take() {
            Some(TransitionDocument::Produced { variant, document }) if target_config.persist => {
                match self.cache.store_document(project_id, variant, &document).await {
                    Ok(stored) => {
                        snapshot.record_document(stored);
                        document_ref = Some(stored);
                    }
                    Err(StoreError::Serialization(reason)) => {
                        target = PipelineState::Failed;
                        transition.error = Some(format!("result could not be stored: {reason}"));
                        transition.message = transition.error.clone();
                    }
                    Err(e) => return Err(e.into()),
                }
            }
            Some(TransitionDocument::Produced { variant, .. }) => {
                warn!(
                    project_id,
                    %variant,
                    state = %target,
                    "state does not persist results, document dropped"
                );
            }
            Some(TransitionDocument::Carried(existing)) => document_ref = Some(existing),
            None => {}
        }

        let target_config = self.registry.state_config(target)?;
        let progress = match (target, transition.progress) {
            (_, Some(progress)) => progress,
            (PipelineState::Failed, None) if from.is_some() => previous.progress,
            _ => target_config.progress,
        };
        let message = transition
            .message
            .clone()
            .unwrap_or_else(|| target_config.description.to_string());

        let mut state = AgentState::new(project_id, target, progress, message);
        state.step = transition.step.or(previous.step.filter(|_| target == PipelineState::Failed));
        state.error = transition.error.clone();
        state.result_document_ref = document_ref.or(if target == PipelineState::Failed {
            previous.result_document_ref
        } else {
            None
        });
        snapshot.state = state.clone();

        self.cache.save_snapshot(&snapshot).await?;

        if let Err(e) = self.cache.append_state_history(&state).await {
            warn!(project_id, error = %e, "state history not recorded");
        }
        if let Err(e) = self.events.publish_state(&state).await {
            warn!(project_id, error = %e, "state event not recorded");
        }

        if let Some(reason) = &state.error {
            error!(project_id, step = ?state.step, from = ?from, %reason, "project failed");
            if let Err(e) = self
                .events
                .publish_error(project_id, state.step, reason)
                .await
            {
                warn!(project_id, error = %e, "error event not recorded");
            }
        } else {
            info!(project_id, from = ?from, to = %target, progress, "state transition");
        }
        Ok(state)
    }
}

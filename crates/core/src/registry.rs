//! Declarative state and step registry.
//!
//! The registry is pure configuration: one [`StateConfig`] per
//! [`PipelineState`] and one [`StepConfig`] per [`ProcessingStep`]. Every
//! other component asks the registry what is legal instead of hard-coding
//! transitions, so the whole state machine can be read off the two tables
//! below.
//!
//! A lookup that finds no entry is a [`ConfigurationError`]. That is a code
//! defect, never a runtime condition, and is never retried.

use thiserror::Error;
use tk_protocol::pipeline_models::{DisplayStatus, DocumentVariant, PipelineState, ProcessingStep};

/// A registry lookup found no entry.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigurationError {
    #[error("no registry entry for state {0}")]
    MissingState(PipelineState),

    #[error("no registry entry for step {0}")]
    MissingStep(ProcessingStep),

    #[error("no handler registered for step {0}")]
    MissingHandler(ProcessingStep),

    #[error("registry is inconsistent: {0}")]
    Inconsistent(String),
}

/// How a project behaves while it sits in one state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateConfig {
    pub state: PipelineState,
    /// The machine halts here until a caller acts.
    pub requires_input: bool,
    /// A failure of `next_step` may be retried from FAILED.
    pub can_retry: bool,
    /// Entering this state stores the producing step's document.
    pub persist: bool,
    /// An "-ing" state: some step is running while the project sits here.
    pub in_progress: bool,
    pub next_step: Option<ProcessingStep>,
    /// Where the machine lands once `next_step` succeeds.
    pub next_state: Option<PipelineState>,
    /// `next_step` is scheduled without waiting for a caller.
    pub auto_transition: bool,
    pub progress: u8,
    pub description: &'static str,
}

/// Where a step reads its input document from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepInput {
    /// The uploaded file reference.
    Source,
    /// The stored output of an earlier step.
    Variant(DocumentVariant),
    /// A document supplied by the caller, falling back to a stored variant.
    Submitted { fallback: DocumentVariant },
}

/// What a step does and where its result goes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepConfig {
    pub step: ProcessingStep,
    pub input: StepInput,
    /// Variant the result is stored under. `None` carries the input forward.
    pub result_key: Option<DocumentVariant>,
    /// State held while the step runs. Steps without I/O skip it.
    pub running_state: Option<PipelineState>,
    pub completed_state: PipelineState,
    pub description: &'static str,
}

impl StepConfig {
    /// First state entered when the step starts.
    pub fn entry_state(&self) -> PipelineState {
        self.running_state.unwrap_or(self.completed_state)
    }
}

const fn stable(
    state: PipelineState,
    next_step: Option<ProcessingStep>,
    next_state: Option<PipelineState>,
    auto_transition: bool,
    progress: u8,
    description: &'static str,
) -> StateConfig {
    StateConfig {
        state,
        requires_input: !auto_transition && next_step.is_some(),
        can_retry: next_step.is_some(),
        persist: false,
        in_progress: false,
        next_step,
        next_state,
        auto_transition,
        progress,
        description,
    }
}

const fn running(state: PipelineState, progress: u8, description: &'static str) -> StateConfig {
    StateConfig {
        state,
        requires_input: false,
        can_retry: false,
        persist: false,
        in_progress: true,
        next_step: None,
        next_state: None,
        auto_transition: false,
        progress,
        description,
    }
}

const fn persisted(mut config: StateConfig) -> StateConfig {
    config.persist = true;
    config
}

use DocumentVariant as V;
use PipelineState as S;
use ProcessingStep as T;

const STATES: [StateConfig; 13] = [
    stable(
        S::AwaitingUpload,
        Some(T::Extract),
        Some(S::Extracted),
        false,
        0,
        "Waiting for the tender document",
    ),
    running(S::Extracting, 5, "Extracting document structure"),
    persisted(stable(
        S::Extracted,
        Some(T::AnalyzeH1),
        Some(S::H1Analyzed),
        true,
        20,
        "Document extracted",
    )),
    running(S::AnalyzingH1, 25, "Detecting chapter headings"),
    persisted(stable(
        S::H1Analyzed,
        Some(T::AnalyzeH2h3),
        Some(S::H2h3Analyzed),
        true,
        40,
        "Chapter headings detected",
    )),
    running(S::AnalyzingH2h3, 45, "Detecting section headings"),
    persisted(stable(
        S::H2h3Analyzed,
        Some(T::AddIntroduction),
        Some(S::IntroAdded),
        true,
        60,
        "Section headings detected",
    )),
    running(S::AddingIntro, 65, "Adding chapter introductions"),
    persisted(stable(
        S::IntroAdded,
        Some(T::PrepareReview),
        Some(S::AwaitingReview),
        true,
        80,
        "Introductions added",
    )),
    stable(
        S::AwaitingReview,
        Some(T::SubmitReview),
        Some(S::Reviewed),
        false,
        85,
        "Waiting for review",
    ),
    persisted(stable(
        S::Reviewed,
        Some(T::Finalize),
        Some(S::Completed),
        true,
        95,
        "Review submitted",
    )),
    stable(S::Completed, None, None, false, 100, "Structured document ready"),
    stable(S::Failed, None, None, false, 0, "Processing failed"),
];

const STEPS: [StepConfig; 7] = [
    StepConfig {
        step: T::Extract,
        input: StepInput::Source,
        result_key: Some(V::Raw),
        running_state: Some(S::Extracting),
        completed_state: S::Extracted,
        description: "Convert the uploaded file into a document tree",
    },
    StepConfig {
        step: T::AnalyzeH1,
        input: StepInput::Variant(V::Raw),
        result_key: Some(V::H1Tagged),
        running_state: Some(S::AnalyzingH1),
        completed_state: S::H1Analyzed,
        description: "Tag level-1 headings",
    },
    StepConfig {
        step: T::AnalyzeH2h3,
        input: StepInput::Variant(V::H1Tagged),
        result_key: Some(V::H2h3Tagged),
        running_state: Some(S::AnalyzingH2h3),
        completed_state: S::H2h3Analyzed,
        description: "Tag level-2 and level-3 headings",
    },
    StepConfig {
        step: T::AddIntroduction,
        input: StepInput::Variant(V::H2h3Tagged),
        result_key: Some(V::IntroAdded),
        running_state: Some(S::AddingIntro),
        completed_state: S::IntroAdded,
        description: "Insert chapter introductions",
    },
    StepConfig {
        step: T::PrepareReview,
        input: StepInput::Variant(V::IntroAdded),
        result_key: None,
        running_state: None,
        completed_state: S::AwaitingReview,
        description: "Hand the document to the reviewer",
    },
    StepConfig {
        step: T::SubmitReview,
        input: StepInput::Submitted {
            fallback: V::IntroAdded,
        },
        result_key: Some(V::Final),
        running_state: None,
        completed_state: S::Reviewed,
        description: "Accept the reviewed document",
    },
    StepConfig {
        step: T::Finalize,
        input: StepInput::Variant(V::Final),
        result_key: None,
        running_state: None,
        completed_state: S::Completed,
        description: "Seal the reviewed document",
    },
];

/// Lookup front-end over the state and step tables.
#[derive(Debug, Clone)]
pub struct StateRegistry {
    states: Vec<StateConfig>,
    steps: Vec<StepConfig>,
}

impl Default for StateRegistry {
    fn default() -> Self {
        Self::standard()
    }
}

impl StateRegistry {
    /// The tender pipeline.
    pub fn standard() -> Self {
        Self::new(STATES.to_vec(), STEPS.to_vec())
    }

    /// A registry over custom tables. [`StateRegistry::validate`] should be
    /// called before use.
    pub fn new(states: Vec<StateConfig>, steps: Vec<StepConfig>) -> Self {
        Self { states, steps }
    }

    pub fn state_config(&self, state: PipelineState) -> Result<&StateConfig, ConfigurationError> {
        self.states
            .iter()
            .find(|c| c.state == state)
            .ok_or(ConfigurationError::MissingState(state))
    }

    pub fn step_config(&self, step: ProcessingStep) -> Result<&StepConfig, ConfigurationError> {
        self.steps
            .iter()
            .find(|c| c.step == step)
            .ok_or(ConfigurationError::MissingStep(step))
    }

    /// The step that runs while a project sits in `state`, if it is an "-ing" state.
    pub fn step_running_in(&self, state: PipelineState) -> Option<&StepConfig> {
        self.steps.iter().find(|c| c.running_state == Some(state))
    }

    /// The stable state whose next step is `step`.
    pub fn origin_of(&self, step: ProcessingStep) -> Option<&StateConfig> {
        self.states.iter().find(|c| c.next_step == Some(step))
    }

    /// The step a caller may run from `state`.
    ///
    /// From FAILED this is the step that failed, provided its origin state
    /// allows retries.
    pub fn legal_step(
        &self,
        state: PipelineState,
        failed_step: Option<ProcessingStep>,
    ) -> Result<Option<ProcessingStep>, ConfigurationError> {
        if state == PipelineState::Failed {
            let Some(step) = failed_step else {
                return Ok(None);
            };
            let retryable = self.origin_of(step).is_some_and(|origin| origin.can_retry);
            return Ok(retryable.then_some(step));
        }
        Ok(self.state_config(state)?.next_step)
    }

    /// Every state a project in `from` may move to.
    pub fn allowed_targets(
        &self,
        from: PipelineState,
    ) -> Result<Vec<PipelineState>, ConfigurationError> {
        let config = self.state_config(from)?;
        let mut targets = Vec::new();

        if from == PipelineState::Failed {
            for origin in self.states.iter().filter(|c| c.can_retry) {
                if let Some(step) = origin.next_step {
                    targets.push(self.step_config(step)?.entry_state());
                }
            }
        } else if config.in_progress {
            if let Some(step) = self.step_running_in(from) {
                targets.push(step.completed_state);
            }
        } else if let Some(step) = config.next_step {
            targets.push(self.step_config(step)?.entry_state());
        }

        if !from.is_terminal() {
            targets.push(PipelineState::Failed);
        }
        targets.dedup();
        Ok(targets)
    }

    /// Whether `from -> to` is legal. `None` means the project has no state yet.
    pub fn is_transition_allowed(
        &self,
        from: Option<PipelineState>,
        to: PipelineState,
    ) -> Result<bool, ConfigurationError> {
        match from {
            None => Ok(to == PipelineState::AwaitingUpload),
            Some(from) => Ok(self.allowed_targets(from)?.contains(&to)),
        }
    }

    /// Coarse user-facing status for a state.
    pub fn display_status(&self, state: PipelineState) -> DisplayStatus {
        match state {
            PipelineState::AwaitingUpload => DisplayStatus::Pending,
            PipelineState::AwaitingReview => DisplayStatus::AwaitingReview,
            PipelineState::Completed => DisplayStatus::Completed,
            PipelineState::Failed => DisplayStatus::Failed,
            _ => DisplayStatus::Processing,
        }
    }

    /// Check that every state and step has an entry and that the entries
    /// agree with each other.
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        for state in PipelineState::ALL {
            self.state_config(state)?;
        }
        for step in ProcessingStep::ALL {
            self.step_config(step)?;
        }
        for config in &self.states {
            let (Some(step), Some(next_state)) = (config.next_step, config.next_state) else {
                continue;
            };
            let step_config = self.step_config(step)?;
            if step_config.completed_state != next_state {
                return Err(ConfigurationError::Inconsistent(format!(
                    "{} declares next_state {} but {} completes in {}",
                    config.state, next_state, step, step_config.completed_state
                )));
            }
        }
        for step in &self.steps {
            let completed = self.state_config(step.completed_state)?;
            if completed.persist && step.result_key.is_none() {
                return Err(ConfigurationError::Inconsistent(format!(
                    "{} persists but {} declares no result key",
                    completed.state, step.step
                )));
            }
            if let Some(running) = step.running_state {
                if !self.state_config(running)?.in_progress {
                    return Err(ConfigurationError::Inconsistent(format!(
                        "{} runs in {} which is not an in-progress state",
                        step.step, running
                    )));
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_standard_registry_is_consistent() {
        StateRegistry::standard().validate().unwrap();
    }

    #[test]
    fn test_missing_state_is_configuration_error() {
        let registry = StateRegistry::new(Vec::new(), STEPS.to_vec());
        assert_eq!(
            registry.state_config(PipelineState::Extracted),
            Err(ConfigurationError::MissingState(PipelineState::Extracted))
        );
        assert!(registry.validate().is_err());
    }

    #[test]
    fn test_inconsistent_next_state_is_detected() {
        let mut states = STATES.to_vec();
        states[2].next_state = Some(PipelineState::Completed);
        let registry = StateRegistry::new(states, STEPS.to_vec());
        assert!(matches!(
            registry.validate(),
            Err(ConfigurationError::Inconsistent(_))
        ));
    }

    #[test]
    fn test_main_chain_transitions() {
        let registry = StateRegistry::standard();
        let allowed = |from, to| registry.is_transition_allowed(Some(from), to).unwrap();

        assert!(registry
            .is_transition_allowed(None, PipelineState::AwaitingUpload)
            .unwrap());
        assert!(!registry
            .is_transition_allowed(None, PipelineState::Extracting)
            .unwrap());

        assert!(allowed(PipelineState::AwaitingUpload, PipelineState::Extracting));
        assert!(allowed(PipelineState::Extracting, PipelineState::Extracted));
        assert!(allowed(PipelineState::Extracted, PipelineState::AnalyzingH1));
        assert!(allowed(PipelineState::IntroAdded, PipelineState::AwaitingReview));
        assert!(allowed(PipelineState::AwaitingReview, PipelineState::Reviewed));
        assert!(allowed(PipelineState::Reviewed, PipelineState::Completed));

        assert!(!allowed(PipelineState::AwaitingUpload, PipelineState::Extracted));
        assert!(!allowed(PipelineState::Extracted, PipelineState::H1Analyzed));
        assert!(!allowed(PipelineState::H1Analyzed, PipelineState::AnalyzingH1));
    }

    #[test]
    fn test_failed_reachable_from_every_non_terminal_state() {
        let registry = StateRegistry::standard();
        for state in PipelineState::ALL {
            let reachable = registry
                .is_transition_allowed(Some(state), PipelineState::Failed)
                .unwrap();
            assert_eq!(reachable, !state.is_terminal(), "{state}");
        }
    }

    #[test]
    fn test_terminal_states_have_no_automatic_successor() {
        let registry = StateRegistry::standard();
        for state in [PipelineState::Completed, PipelineState::Failed] {
            let config = registry.state_config(state).unwrap();
            assert!(!config.auto_transition);
            assert_eq!(config.next_step, None);
        }
        assert!(registry
            .allowed_targets(PipelineState::Completed)
            .unwrap()
            .is_empty());
    }

    #[test]
    fn test_legal_step_from_failed_is_the_failed_step() {
        let registry = StateRegistry::standard();
        assert_eq!(
            registry
                .legal_step(PipelineState::Failed, Some(ProcessingStep::AnalyzeH1))
                .unwrap(),
            Some(ProcessingStep::AnalyzeH1)
        );
        assert_eq!(
            registry.legal_step(PipelineState::Failed, None).unwrap(),
            None
        );
        assert_eq!(
            registry.legal_step(PipelineState::Extracted, None).unwrap(),
            Some(ProcessingStep::AnalyzeH1)
        );
    }

    #[test]
    fn test_failed_can_reenter_each_retryable_step() {
        let registry = StateRegistry::standard();
        let targets = registry.allowed_targets(PipelineState::Failed).unwrap();
        assert!(targets.contains(&PipelineState::Extracting));
        assert!(targets.contains(&PipelineState::AnalyzingH2h3));
        assert!(targets.contains(&PipelineState::Reviewed));
        assert!(!targets.contains(&PipelineState::Failed));
    }

    #[test]
    fn test_in_progress_states_have_running_steps() {
        let registry = StateRegistry::standard();
        for config in STATES.iter().filter(|c| c.in_progress) {
            assert!(registry.step_running_in(config.state).is_some());
        }
        assert_eq!(
            registry
                .step_running_in(PipelineState::AddingIntro)
                .map(|s| s.step),
            Some(ProcessingStep::AddIntroduction)
        );
    }

    #[test]
    fn test_review_is_the_only_input_gate_after_upload() {
        let registry = StateRegistry::standard();
        let gates: Vec<_> = STATES
            .iter()
            .filter(|c| c.requires_input)
            .map(|c| c.state)
            .collect();
        assert_eq!(
            gates,
            vec![PipelineState::AwaitingUpload, PipelineState::AwaitingReview]
        );
        assert_eq!(
            registry.display_status(PipelineState::AnalyzingH1),
            DisplayStatus::Processing
        );
    }
}

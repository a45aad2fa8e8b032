//! Queue consumer that drives auto-chained steps.

use std::sync::Arc;

use tk_protocol::ipc::StepRequest;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::config::WorkerConfig;
use crate::engine::{PipelineExecutor, RecoveryAction};
use crate::error::{PipelineError, PipelineResult};
use crate::queue::StepQueue;
use crate::store::StoreResult;

/// What happened to one dequeued request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Delivery {
    Completed,
    /// Infrastructure failure; queued again with the next attempt number.
    Requeued,
    /// Not retried: rejected, failed for good, or out of attempts.
    Dropped,
}

#[derive(Clone)]
pub struct Worker {
    executor: Arc<PipelineExecutor>,
    queue: StepQueue,
    config: WorkerConfig,
}

impl Worker {
    pub fn new(executor: Arc<PipelineExecutor>, config: WorkerConfig) -> Self {
        let queue = executor.queue().clone();
        Self {
            executor,
            queue,
            config,
        }
    }

    /// Apply the recovery rule to every known project.
    pub async fn recover_all(&self) -> PipelineResult<Vec<(String, RecoveryAction)>> {
        self.executor.recover_all().await
    }

    /// Handle one request if the queue has one.
    pub async fn run_once(&self) -> StoreResult<Option<Delivery>> {
        let Some(request) = self.queue.dequeue().await? else {
            return Ok(None);
        };
        Ok(Some(self.handle(request).await?))
    }

    async fn handle(&self, request: StepRequest) -> StoreResult<Delivery> {
        let project_id = request.project_id.as_str();
        debug!(
            project_id,
            step = %request.step,
            attempt = request.attempt,
            "handling step request"
        );

        match self.executor.process(project_id, request.step).await {
            Ok(state) => {
                debug!(project_id, state = %state.current_state, "step request done");
                Ok(Delivery::Completed)
            }
            Err(e) if e.is_transient() && request.attempt < self.config.max_attempts => {
                warn!(
                    project_id,
                    step = %request.step,
                    attempt = request.attempt,
                    error = %e,
                    "re-enqueueing step"
                );
                self.queue.enqueue(&request.redelivery()).await?;
                Ok(Delivery::Requeued)
            }
            Err(e) if e.is_transient() => {
                error!(
                    project_id,
                    step = %request.step,
                    error = %e,
                    "step request out of attempts"
                );
                Ok(Delivery::Dropped)
            }
            Err(PipelineError::InvalidAction { state, .. }) => {
                // A duplicate delivery or a request overtaken by another caller.
                info!(project_id, step = %request.step, %state, "stale step request dropped");
                Ok(Delivery::Dropped)
            }
            Err(e) => {
                warn!(project_id, step = %request.step, error = %e, "step request failed");
                Ok(Delivery::Dropped)
            }
        }
    }

    /// Process requests until the queue is empty. Returns how many were handled.
    pub async fn drain(&self) -> StoreResult<usize> {
        let mut handled = 0;
        while self.run_once().await?.is_some() {
            handled += 1;
        }
        Ok(handled)
    }

    /// Poll the queue until `shutdown` flips to `true`.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!("worker started");
        while !*shutdown.borrow() {
            let idle = match self.run_once().await {
                Ok(Some(_)) => {
                    tokio::time::sleep(self.config.chain_delay()).await;
                    continue;
                }
                Ok(None) => self.config.poll_interval(),
                Err(e) => {
                    warn!(error = %e, "queue poll failed");
                    self.config.poll_interval()
                }
            };

            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
                _ = tokio::time::sleep(idle) => {}
            }
        }
        info!("worker stopped");
    }
}

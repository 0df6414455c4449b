use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::hooks::{CancellationHook, HookDecision, PreExecutionHook};
use super::queue::{QueuedJob, StepJob, TaskQueue};
use super::retry::RetryPolicies;
use crate::config::QueueConfig;
use crate::error::{BrokerError, Result};
use crate::logging::{log_pipeline_operation, log_step_operation};
use crate::models::Operation;
use crate::pipeline::{Pipeline, StepContext, StepId, StepRegistry};
use crate::state_machine::{OperationEvent, OperationStateMachine};

/// What happened to one dequeued job
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobOutcome {
    /// The step succeeded; the next one (if any) was enqueued
    Completed { operation_id: i64, step: StepId },
    /// The operation was canceled; nothing further is enqueued
    Canceled { operation_id: i64, step: StepId },
    /// The step failed and was rescheduled
    Retrying {
        operation_id: i64,
        step: StepId,
        attempt: u32,
    },
    /// The step failed for good and the operation is now `failed`
    Failed {
        operation_id: i64,
        step: StepId,
        error: String,
    },
    /// The operation already reached a terminal state
    Skipped { operation_id: i64, step: StepId },
}

impl JobOutcome {
    pub fn operation_id(&self) -> i64 {
        match self {
            Self::Completed { operation_id, .. }
            | Self::Canceled { operation_id, .. }
            | Self::Retrying { operation_id, .. }
            | Self::Failed { operation_id, .. }
            | Self::Skipped { operation_id, .. } => *operation_id,
        }
    }

    pub fn step(&self) -> StepId {
        match self {
            Self::Completed { step, .. }
            | Self::Canceled { step, .. }
            | Self::Retrying { step, .. }
            | Self::Failed { step, .. }
            | Self::Skipped { step, .. } => *step,
        }
    }
}

/// Executes pipeline steps from a [`TaskQueue`]
///
/// Steps of one operation run strictly in order: a job only enqueues its
/// successor after its own step returned successfully.
pub struct Scheduler {
    queue: Arc<dyn TaskQueue>,
    registry: Arc<StepRegistry>,
    context: StepContext,
    hooks: Vec<Arc<dyn PreExecutionHook>>,
    policies: RetryPolicies,
    queue_config: QueueConfig,
}

impl std::fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scheduler")
            .field("queue", &self.queue)
            .field("registry", &self.registry)
            .field("hooks", &self.hooks.iter().map(|h| h.name()).collect::<Vec<_>>())
            .field("policies", &self.policies)
            .finish()
    }
}

impl Scheduler {
    /// Scheduler with the built-in steps and the cancellation hook
    pub fn new(context: StepContext, queue: Arc<dyn TaskQueue>) -> Self {
        let policies = RetryPolicies::from_config(&context.config.retry);
        let queue_config = context.config.queue.clone();
        Self {
            queue,
            registry: Arc::new(StepRegistry::standard()),
            context,
            hooks: vec![Arc::new(CancellationHook)],
            policies,
            queue_config,
        }
    }

    pub fn with_registry(mut self, registry: StepRegistry) -> Self {
        self.registry = Arc::new(registry);
        self
    }

    pub fn with_hook(mut self, hook: Arc<dyn PreExecutionHook>) -> Self {
        self.hooks.push(hook);
        self
    }

    pub fn context(&self) -> &StepContext {
        &self.context
    }

    pub fn queue(&self) -> &Arc<dyn TaskQueue> {
        &self.queue
    }

    /// Enqueue the first step of a pipeline for an operation
    pub async fn enqueue_pipeline(&self, operation: &Operation, pipeline: &Pipeline) -> Result<()> {
        if pipeline.is_empty() {
            return Err(BrokerError::invalid_state(format!(
                "empty {} pipeline for {}",
                pipeline.action, pipeline.kind
            )));
        }

        self.queue
            .send(
                &StepJob::first(operation.id, pipeline.steps.clone()),
                Duration::ZERO,
            )
            .await?;

        log_pipeline_operation(
            operation.id,
            &operation.service_instance_id,
            pipeline.action.as_str(),
            "enqueued",
            Some(format!("{} steps", pipeline.len()).as_str()),
        );
        Ok(())
    }

    /// Run the next ready job, if any
    pub async fn run_next(&self) -> Result<Option<JobOutcome>> {
        let Some(queued) = self.queue.read(self.queue_config.visibility_timeout()).await? else {
            return Ok(None);
        };

        let outcome = self.run_job(&queued).await?;
        self.queue.delete(queued.id).await?;
        Ok(Some(outcome))
    }

    /// Run jobs until none is ready; returns every outcome in order
    pub async fn run_until_idle(&self) -> Result<Vec<JobOutcome>> {
        let mut outcomes = Vec::new();
        while let Some(outcome) = self.run_next().await? {
            outcomes.push(outcome);
        }
        Ok(outcomes)
    }

    async fn run_job(&self, queued: &QueuedJob) -> Result<JobOutcome> {
        let job = &queued.job;
        let step_id = job.step()?;
        let mut operation = self.context.load_operation(job.operation_id).await?;

        if operation.state.is_terminal() {
            debug!(
                operation_id = operation.id,
                step = %step_id,
                state = %operation.state,
                "Skipping step of finished operation"
            );
            return Ok(JobOutcome::Skipped {
                operation_id: operation.id,
                step: step_id,
            });
        }

        for hook in &self.hooks {
            if let HookDecision::Cancel { reason } = hook.before_step(&operation, step_id).await {
                info!(
                    operation_id = operation.id,
                    step = %step_id,
                    hook = hook.name(),
                    reason = %reason,
                    "Step canceled before execution"
                );
                log_step_operation(operation.id, step_id.as_str(), job.attempt, "canceled", Some(reason.as_str()));
                return Ok(JobOutcome::Canceled {
                    operation_id: operation.id,
                    step: step_id,
                });
            }
        }

        let step = self.registry.get(step_id)?;
        self.context.describe(&mut operation, step.description()).await?;
        log_step_operation(operation.id, step_id.as_str(), job.attempt, "started", None);

        match step.execute(&self.context, &operation).await {
            Ok(()) => {
                log_step_operation(operation.id, step_id.as_str(), job.attempt, "completed", None);
                if let Some(next) = job.next() {
                    self.queue.send(&next, Duration::ZERO).await?;
                }
                Ok(JobOutcome::Completed {
                    operation_id: operation.id,
                    step: step_id,
                })
            }
            Err(error) => self.handle_failure(job, step_id, step.retry_class(), error).await,
        }
    }

    async fn handle_failure(
        &self,
        job: &StepJob,
        step_id: StepId,
        retry_class: super::retry::RetryClass,
        error: BrokerError,
    ) -> Result<JobOutcome> {
        // the step may have run while a cancel request arrived
        let mut operation = self.context.load_operation(job.operation_id).await?;
        if operation.is_canceled() {
            info!(
                operation_id = operation.id,
                step = %step_id,
                error = %error,
                "Step failed after cancellation; not failing the operation"
            );
            return Ok(JobOutcome::Canceled {
                operation_id: operation.id,
                step: step_id,
            });
        }

        let message = error.to_string();
        operation.error_message = Some(message.clone());

        if let Some(delay) = self.policies.next_delay(retry_class, job.attempt, &error) {
            warn!(
                operation_id = operation.id,
                step = %step_id,
                attempt = job.attempt,
                category = %error.category(),
                delay_secs = delay.as_secs(),
                error = %error,
                "Step failed; retrying"
            );
            self.context.store.update_operation(&operation).await?;
            self.queue.send(&job.retry(), delay).await?;
            log_step_operation(operation.id, step_id.as_str(), job.attempt, "retrying", Some(message.as_str()));
            return Ok(JobOutcome::Retrying {
                operation_id: operation.id,
                step: step_id,
                attempt: job.attempt + 1,
            });
        }

        error!(
            operation_id = operation.id,
            step = %step_id,
            attempt = job.attempt,
            category = %error.category(),
            error = %error,
            "Step failed; failing operation"
        );
        OperationStateMachine::apply(&mut operation, &OperationEvent::fail_with_error(&message))?;
        self.context.store.update_operation(&operation).await?;
        log_step_operation(operation.id, step_id.as_str(), job.attempt, "failed", Some(message.as_str()));
        log_pipeline_operation(
            operation.id,
            &operation.service_instance_id,
            operation.action.as_str(),
            "failed",
            Some(message.as_str()),
        );

        Ok(JobOutcome::Failed {
            operation_id: operation.id,
            step: step_id,
            error: message,
        })
    }

    /// Spawn `workers` tasks polling the queue until shutdown
    pub fn start(self: Arc<Self>, workers: usize) -> SchedulerHandle {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let poll_interval = self.queue_config.poll_interval();

        let handles = (0..workers.max(1))
            .map(|worker| {
                let scheduler = Arc::clone(&self);
                let mut shutdown = shutdown_rx.clone();
                tokio::spawn(async move {
                    info!(worker = worker, "Scheduler worker started");
                    loop {
                        if *shutdown.borrow() {
                            break;
                        }
                        match scheduler.run_next().await {
                            Ok(Some(_)) => continue,
                            Ok(None) => {}
                            Err(e) => error!(worker = worker, error = %e, "Scheduler worker error"),
                        }
                        tokio::select! {
                            _ = tokio::time::sleep(poll_interval) => {}
                            _ = shutdown.changed() => {}
                        }
                    }
                    info!(worker = worker, "Scheduler worker stopped");
                })
            })
            .collect();

        SchedulerHandle {
            shutdown_tx,
            handles,
        }
    }
}

/// Owns running scheduler workers
#[derive(Debug)]
pub struct SchedulerHandle {
    shutdown_tx: watch::Sender<bool>,
    handles: Vec<JoinHandle<()>>,
}

impl SchedulerHandle {
    pub fn worker_count(&self) -> usize {
        self.handles.len()
    }

    /// Signal shutdown and wait for workers to finish their current step
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(true);
        for result in join_all(self.handles).await {
            if let Err(e) = result {
                error!(error = %e, "Scheduler worker panicked");
            }
        }
        info!("Scheduler stopped");
    }
}

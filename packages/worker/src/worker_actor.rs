//! Worker actor for executing jobs.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures_util::FutureExt;
use lane_core::{Broker, BrokerError, JobId, JobRecord, JobUpdate, TaskError, panic_message};
use ractor::{Actor, ActorProcessingErr, ActorRef};
use serde_json::Value;

use crate::config::WorkerConfig;
use crate::error::WorkerResult;
use crate::messages::{WorkerMessage, WorkerStats};
use crate::task::{TaskDefinition, TaskOutput, TaskRegistry};

/// State for the worker actor.
pub struct WorkerActorState {
    pub config: WorkerConfig,
    pub broker: Arc<dyn Broker>,
    pub tasks: Arc<TaskRegistry>,
    /// Job being processed, if any.
    pub current_job: Option<JobId>,
    pub stats: WorkerStats,
    /// Whether the worker should continue running.
    pub running: bool,
}

impl WorkerActorState {
    pub fn new(args: WorkerArgs) -> Self {
        Self {
            config: args.config,
            broker: args.broker,
            tasks: args.tasks,
            current_job: None,
            stats: WorkerStats::default(),
            running: true,
        }
    }

    /// Check if the worker is idle.
    pub fn is_idle(&self) -> bool {
        self.current_job.is_none()
    }
}

/// Worker actor arguments.
pub struct WorkerArgs {
    pub config: WorkerConfig,
    pub broker: Arc<dyn Broker>,
    pub tasks: Arc<TaskRegistry>,
}

/// Worker actor that pulls jobs from one lane and runs their tasks.
pub struct WorkerActor;

impl Actor for WorkerActor {
    type Msg = WorkerMessage;
    type State = WorkerActorState;
    type Arguments = WorkerArgs;

    async fn pre_start(
        &self,
        myself: ActorRef<Self::Msg>,
        args: Self::Arguments,
    ) -> Result<Self::State, ActorProcessingErr> {
        tracing::info!(
            "Starting worker {} on lane '{}' ({} tasks)",
            args.config.worker_id,
            args.config.lane,
            args.tasks.len()
        );

        let state = WorkerActorState::new(args);

        // Poll loop; ends once the actor stops accepting messages.
        let poll_interval = state.config.poll_interval();
        let myself_clone = myself.clone();
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(poll_interval).await;
                if myself_clone.send_message(WorkerMessage::Poll).is_err() {
                    break;
                }
            }
        });

        Ok(state)
    }

    async fn post_stop(
        &self,
        _myself: ActorRef<Self::Msg>,
        state: &mut Self::State,
    ) -> Result<(), ActorProcessingErr> {
        tracing::info!(
            "Worker {} stopped: {} processed, {} completed, {} failed",
            state.config.worker_id,
            state.stats.processed,
            state.stats.completed,
            state.stats.failed
        );
        Ok(())
    }

    async fn handle(
        &self,
        myself: ActorRef<Self::Msg>,
        message: Self::Msg,
        state: &mut Self::State,
    ) -> Result<(), ActorProcessingErr> {
        match message {
            WorkerMessage::Poll => {
                if !state.running || !state.is_idle() {
                    return Ok(());
                }

                match state.broker.dequeue(&state.config.lane).await {
                    Ok(Some(job)) => {
                        myself.send_message(WorkerMessage::ProcessJob { job: Box::new(job) })?;
                    }
                    Ok(None) => {}
                    Err(BrokerError::Closed) => {
                        tracing::info!(
                            "Broker closed, stopping worker {}",
                            state.config.worker_id
                        );
                        state.running = false;
                        myself.stop(Some("broker closed".to_string()));
                    }
                    Err(err) => {
                        tracing::warn!(
                            "Worker {} failed to poll lane '{}': {}",
                            state.config.worker_id,
                            state.config.lane,
                            err
                        );
                    }
                }
            }

            WorkerMessage::ProcessJob { job } => {
                let job = *job;
                let job_id = job.id;
                state.current_job = Some(job_id);
                state.stats.processed += 1;

                if let Err(err) = process_job(state, job).await {
                    tracing::warn!(
                        "Worker {} could not record outcome of job {}: {}",
                        state.config.worker_id,
                        job_id,
                        err
                    );
                }

                state.current_job = None;

                // Keep draining the lane without waiting for the next tick.
                if state.running {
                    myself.send_message(WorkerMessage::Poll)?;
                }
            }

            WorkerMessage::IsIdle { reply } => {
                let _ = reply.send(state.is_idle());
            }

            WorkerMessage::GetStats { reply } => {
                let _ = reply.send(state.stats);
            }

            WorkerMessage::Shutdown => {
                tracing::info!("Shutting down worker: {}", state.config.worker_id);
                state.running = false;
                myself.stop(None);
            }
        }

        Ok(())
    }
}

/// Drive one dequeued job to COMPLETED or FAILED.
///
/// Each attempt moves the job to RUNNING with its attempt count bumped.
/// A failed attempt with budget left goes through RETRYING and runs again.
async fn process_job(state: &mut WorkerActorState, job: JobRecord) -> WorkerResult<()> {
    let broker = state.broker.clone();
    let job_id = job.id;

    let Some(task) = state.tasks.get(&job.task_path).cloned() else {
        tracing::warn!("No task registered for path '{}' (job {})", job.task_path, job_id);
        broker
            .update_job(job_id, JobUpdate::running().with_attempts(job.attempts + 1))
            .await?;
        let error = TaskError::new(format!("No task registered for path: {}", job.task_path));
        broker.update_job(job_id, JobUpdate::failed(error)).await?;
        state.stats.failed += 1;
        return Ok(());
    };

    let timeout = task
        .config()
        .timeout()
        .unwrap_or_else(|| state.config.default_timeout());
    let budget = state.config.attempt_budget();
    let mut tries = 0;

    loop {
        tries += 1;
        let attempts = job.attempts + tries;
        broker
            .update_job(job_id, JobUpdate::running().with_attempts(attempts))
            .await?;

        match run_task(&task, job.data.clone(), timeout).await {
            Ok(result) => {
                broker
                    .update_job(job_id, JobUpdate::completed(result))
                    .await?;
                state.stats.completed += 1;
                tracing::debug!("Job {} completed after {} attempt(s)", job_id, tries);
                return Ok(());
            }
            Err(error) if tries < budget => {
                tracing::debug!("Job {} attempt {} failed, retrying: {}", job_id, attempts, error);
                broker.update_job(job_id, JobUpdate::retrying()).await?;
                state.stats.retried += 1;
            }
            Err(error) => {
                tracing::debug!("Job {} failed: {}", job_id, error);
                broker.update_job(job_id, JobUpdate::failed(error)).await?;
                state.stats.failed += 1;
                return Ok(());
            }
        }
    }
}

/// Run `task` under `timeout`, turning a timeout or a panic into a task error.
async fn run_task(task: &TaskDefinition, input: Value, timeout: Duration) -> TaskOutput {
    let running = AssertUnwindSafe(task.run(input)).catch_unwind();
    match tokio::time::timeout(timeout, running).await {
        Ok(Ok(output)) => output,
        Ok(Err(panic)) => Err(TaskError::new(format!(
            "Task panicked: {}",
            panic_message(panic.as_ref())
        ))),
        Err(_) => Err(TaskError::new(format!(
            "Task timed out after {}ms",
            timeout.as_millis()
        ))),
    }
}

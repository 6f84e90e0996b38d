//! Worker runtime for the lane task queue.
//!
//! Tasks are registered by dotted path in a [`TaskRegistry`]. A
//! [`WorkerActor`] polls one lane of a [`Broker`](lane_core::Broker),
//! runs the matching task, and records the outcome with `update_job`.
//!
//! # Usage
//!
//! ```ignore
//! use lane_worker::{TaskRegistry, WorkerConfig, WorkerMessage, start_worker};
//!
//! let mut tasks = TaskRegistry::new();
//! tasks.task("math.add", |input: AddInput| async move {
//!     Ok::<_, TaskError>(input.a + input.b)
//! })?;
//!
//! let (worker, handle) = start_worker(WorkerConfig::new("math"), broker, tasks).await?;
//! // ...
//! worker.send_message(WorkerMessage::Shutdown)?;
//! handle.await?;
//! ```

use std::sync::Arc;

use lane_core::Broker;

mod config;
mod error;
mod messages;
mod task;
mod worker_actor;

pub use config::{DEFAULT_LANE, TaskConfig, WorkerConfig};
pub use error::{WorkerError, WorkerResult};
pub use messages::{WorkerMessage, WorkerStats};
pub use task::{HandlerFuture, TaskDefinition, TaskHandler, TaskOutput, TaskRegistry};
pub use worker_actor::{WorkerActor, WorkerActorState, WorkerArgs};

/// Re-export ractor types for convenience.
pub use ractor::{Actor, ActorRef, RpcReplyPort, concurrency};

/// Spawn a worker actor for `config.lane`.
///
/// Returns the actor reference and the join handle that resolves once the
/// actor has stopped.
pub async fn start_worker(
    config: WorkerConfig,
    broker: Arc<dyn Broker>,
    tasks: TaskRegistry,
) -> WorkerResult<(ActorRef<WorkerMessage>, tokio::task::JoinHandle<()>)> {
    let args = WorkerArgs {
        config,
        broker,
        tasks: Arc::new(tasks),
    };
    let (actor, handle) = Actor::spawn(None, WorkerActor, args).await?;
    Ok((actor, handle))
}

#![allow(dead_code)]

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use lane_core::{Broker, InMemoryBroker};
use lane_worker::{ActorRef, TaskRegistry, WorkerConfig, WorkerMessage, start_worker};
use tokio::task::JoinHandle;

/// Upper bound for any await on a job in tests.
pub const WAIT_LIMIT: Duration = Duration::from_secs(10);

pub async fn within<F: Future>(future: F) -> F::Output {
    tokio::time::timeout(WAIT_LIMIT, future)
        .await
        .expect("timed out waiting for worker")
}

/// Worker config with a short poll interval.
pub fn fast_config(lane: &str) -> WorkerConfig {
    WorkerConfig::new(lane)
        .with_worker_id(format!("test-{lane}"))
        .with_poll_interval_ms(10)
}

pub struct TestWorker {
    pub broker: Arc<InMemoryBroker>,
    pub actor: ActorRef<WorkerMessage>,
    pub join: JoinHandle<()>,
}

impl TestWorker {
    pub async fn start(config: WorkerConfig, tasks: TaskRegistry) -> Self {
        let broker = InMemoryBroker::shared();
        let (actor, join) = start_worker(config, broker.clone() as Arc<dyn Broker>, tasks)
            .await
            .expect("worker spawns");
        Self {
            broker,
            actor,
            join,
        }
    }

    pub async fn shutdown(self) {
        self.actor
            .send_message(WorkerMessage::Shutdown)
            .expect("worker accepts shutdown");
        within(self.join).await.expect("worker stops cleanly");
    }
}

//! Worker error types.

use lane_core::BrokerError;
use thiserror::Error;

/// Result type for worker operations.
pub type WorkerResult<T> = Result<T, WorkerError>;

#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("Failed to spawn worker: {0}")]
    Spawn(#[from] ractor::SpawnErr),

    #[error(transparent)]
    Broker(#[from] BrokerError),

    #[error("Serialization error: {0}")]
    Codec(#[from] serde_json::Error),

    #[error("Task already registered: {0}")]
    DuplicateTask(String),

    #[error("Invalid task path: {0:?}")]
    InvalidTaskPath(String),
}

//! Error taxonomy for brokers and job handles.

use thiserror::Error;

use crate::job::{JobId, JobStatus, TaskError};

/// Result type for broker operations.
pub type BrokerResult<T> = Result<T, BrokerError>;

/// Result type for job handle operations.
pub type JobResult<T> = Result<T, JobError>;

/// Errors raised by a [`Broker`](crate::Broker) implementation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BrokerError {
    #[error("Job {0} not found")]
    JobNotFound(JobId),

    #[error("Job {0} already exists")]
    DuplicateJob(JobId),

    #[error("Job {job_id} cannot move from {from} to {to}")]
    InvalidTransition {
        job_id: JobId,
        from: JobStatus,
        to: JobStatus,
    },

    #[error("Lane '{0}' is full")]
    LaneFull(String),

    #[error("Operation not supported by this broker: {0}")]
    Unsupported(&'static str),

    #[error("Broker is closed")]
    Closed,

    #[error("Broker backend error: {0}")]
    Backend(String),
}

/// Errors surfaced to callers of a [`JobHandle`](crate::JobHandle).
#[derive(Debug, Error)]
pub enum JobError {
    #[error("Job {0} not found")]
    NotFound(JobId),

    /// The job reached COMPLETED without a stored result.
    #[error("Job {0} completed but no result available")]
    MissingResult(JobId),

    /// The job reached FAILED; carries the stored task error.
    #[error("{0}")]
    TaskFailed(TaskError),

    /// The broker dropped the job (lane cleared or broker closed) while waiting.
    #[error("Job {0} was discarded by the broker")]
    Discarded(JobId),

    #[error("Job handle for {0} was destroyed")]
    Destroyed(JobId),

    #[error(transparent)]
    Broker(BrokerError),

    #[error("Job payload codec error: {0}")]
    Codec(#[from] serde_json::Error),
}

impl From<BrokerError> for JobError {
    fn from(err: BrokerError) -> Self {
        match err {
            BrokerError::JobNotFound(id) => JobError::NotFound(id),
            other => JobError::Broker(other),
        }
    }
}

impl JobError {
    /// Whether this error means the job record does not exist.
    pub fn is_not_found(&self) -> bool {
        matches!(self, JobError::NotFound(_))
    }
}

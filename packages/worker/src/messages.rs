//! Message types for the worker actor.

use lane_core::JobRecord;
use ractor::RpcReplyPort;
use serde::Serialize;

/// Messages for the WorkerActor.
#[derive(Debug)]
pub enum WorkerMessage {
    /// Try to take the next job from the worker's lane.
    Poll,

    /// Run a job that has already been dequeued.
    ProcessJob { job: Box<JobRecord> },

    /// Check if worker is idle.
    IsIdle { reply: RpcReplyPort<bool> },

    /// Get the worker's counters.
    GetStats { reply: RpcReplyPort<WorkerStats> },

    /// Shutdown the worker.
    Shutdown,
}

/// Counters kept by a worker.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct WorkerStats {
    /// Jobs taken from the lane.
    pub processed: u64,
    pub completed: u64,
    pub failed: u64,
    /// Attempts that were retried in place.
    pub retried: u64,
}

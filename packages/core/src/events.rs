//! Event types re-emitted by job handles.

use serde::{Deserialize, Serialize};

use crate::{JobId, JobRecord, JobStatus};

/// Channels a [`JobHandle`](crate::JobHandle) emits on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum JobEventKind {
    /// Every observed status change.
    StateChange,
    /// The job reached `Completed`.
    Completed,
    /// The job reached `Failed`.
    Failed,
}

impl JobEventKind {
    /// The terminal event matching `status`, if any.
    pub fn for_terminal(status: JobStatus) -> Option<Self> {
        match status {
            JobStatus::Completed => Some(JobEventKind::Completed),
            JobStatus::Failed => Some(JobEventKind::Failed),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            JobEventKind::StateChange => "stateChange",
            JobEventKind::Completed => "completed",
            JobEventKind::Failed => "failed",
        }
    }
}

impl std::fmt::Display for JobEventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Payload of every handle event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobEvent {
    /// Job record as of the change.
    pub job: JobRecord,
    /// Status before the change. `None` when the handle found the job
    /// already terminal instead of observing the transition.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub previous_status: Option<JobStatus>,
}

impl JobEvent {
    pub fn job_id(&self) -> JobId {
        self.job.id
    }

    /// Get a short description of this event for logging.
    pub fn description(&self) -> String {
        match self.previous_status {
            Some(previous) => format!("Job {} {} -> {}", self.job.id, previous, self.job.status),
            None => format!("Job {} is {}", self.job.id, self.job.status),
        }
    }
}

//! Job records and their lifecycle.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use ulid::Ulid;

const JOB_ID_PREFIX: &str = "job_";

/// Unique identifier for a job.
///
/// Backed by a ULID: a millisecond timestamp followed by 80 random bits,
/// so ids sort by creation time and never collide in practice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct JobId(pub Ulid);

impl JobId {
    /// Create a new unique job ID.
    pub fn new() -> Self {
        Self(Ulid::new())
    }

    /// Parse a job ID, with or without the `job_` prefix.
    pub fn parse(s: &str) -> Result<Self, ulid::DecodeError> {
        let raw = s.strip_prefix(JOB_ID_PREFIX).unwrap_or(s);
        Ok(Self(Ulid::from_string(raw)?))
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for JobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}{}", JOB_ID_PREFIX, self.0)
    }
}

impl TryFrom<String> for JobId {
    type Error = ulid::DecodeError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<JobId> for String {
    fn from(id: JobId) -> Self {
        id.to_string()
    }
}

/// Current status of a job in its lifecycle.
///
/// `Pending -> Running -> {Completed, Failed}`, with `Running <-> Retrying`.
/// `Completed` and `Failed` are terminal.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    /// Job is waiting to be processed.
    #[default]
    Pending,
    /// Job is being executed by a worker.
    Running,
    /// Job finished successfully.
    Completed,
    /// Job finished with an error.
    Failed,
    /// Job failed an attempt and is about to run again.
    Retrying,
}

impl JobStatus {
    /// Check if the job is in a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }

    /// Whether the lifecycle graph has an edge from `self` to `next`.
    pub fn can_transition_to(&self, next: JobStatus) -> bool {
        matches!(
            (self, next),
            (JobStatus::Pending, JobStatus::Running)
                | (JobStatus::Running, JobStatus::Completed)
                | (JobStatus::Running, JobStatus::Failed)
                | (JobStatus::Running, JobStatus::Retrying)
                | (JobStatus::Retrying, JobStatus::Running)
        )
    }

    /// Get a simple status string for display.
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Running => "running",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::Retrying => "retrying",
        }
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error stored on a failed job.
///
/// Deserializes from a bare string as well as from the structured form,
/// so workers that only record a message still produce a `TaskError`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "TaskErrorRepr")]
pub struct TaskError {
    /// Human-readable error message.
    pub message: String,
    /// Optional structured context.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum TaskErrorRepr {
    Message(String),
    Structured {
        message: String,
        #[serde(default)]
        details: Option<serde_json::Value>,
    },
}

impl From<TaskErrorRepr> for TaskError {
    fn from(repr: TaskErrorRepr) -> Self {
        match repr {
            TaskErrorRepr::Message(message) => Self::new(message),
            TaskErrorRepr::Structured { message, details } => Self { message, details },
        }
    }
}

impl TaskError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            details: None,
        }
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }
}

impl std::fmt::Display for TaskError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.message)
    }
}

impl std::error::Error for TaskError {}

impl From<String> for TaskError {
    fn from(message: String) -> Self {
        Self::new(message)
    }
}

impl From<&str> for TaskError {
    fn from(message: &str) -> Self {
        Self::new(message)
    }
}

/// The persisted state of one unit of work.
///
/// Input and output payloads are kept as JSON so any broker backend can
/// store them; typed access goes through [`JobRecord::input`] and
/// [`JobRecord::output`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobRecord {
    /// Unique identifier for this job.
    pub id: JobId,
    /// Current status.
    pub status: JobStatus,
    /// Dotted path of the task handler, e.g. `email.send`.
    pub task_path: String,
    /// Input payload.
    pub data: serde_json::Value,
    /// Output payload, set once the job completed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    /// Stored error, set once the job failed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<TaskError>,
    /// When the job was created.
    pub created_at: DateTime<Utc>,
    /// First transition into running.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    /// Transition into a terminal state.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    /// Number of attempts so far.
    #[serde(default)]
    pub attempts: u32,
}

impl JobRecord {
    /// Create a new pending job with a fresh id.
    pub fn new(task_path: impl Into<String>, data: serde_json::Value) -> Self {
        Self {
            id: JobId::new(),
            status: JobStatus::Pending,
            task_path: task_path.into(),
            data,
            result: None,
            error: None,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            attempts: 0,
        }
    }

    /// Check if the job is in a terminal state.
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Decode the input payload.
    pub fn input<I: serde::de::DeserializeOwned>(&self) -> Result<I, serde_json::Error> {
        I::deserialize(&self.data)
    }

    /// Decode the output payload, if any.
    pub fn output<O: serde::de::DeserializeOwned>(&self) -> Result<Option<O>, serde_json::Error> {
        self.result.as_ref().map(O::deserialize).transpose()
    }

    /// Apply a partial update in place and return the previous status.
    ///
    /// Timestamps not supplied by the update are stamped on the first
    /// entry into running and on entry into a terminal state. Afterwards
    /// only a `Completed` record keeps a result and only a `Failed` record
    /// keeps an error.
    pub fn apply(&mut self, update: JobUpdate, now: DateTime<Utc>) -> JobStatus {
        let previous = self.status;

        if let Some(result) = update.result {
            self.result = Some(result);
        }
        if let Some(error) = update.error {
            self.error = Some(error);
        }
        if let Some(attempts) = update.attempts {
            self.attempts = attempts;
        }
        if let Some(started_at) = update.started_at {
            self.started_at = Some(started_at);
        }
        if let Some(completed_at) = update.completed_at {
            self.completed_at = Some(completed_at);
        }

        if let Some(status) = update.status {
            self.status = status;
            if status != previous {
                match status {
                    JobStatus::Running => {
                        self.started_at.get_or_insert(now);
                    }
                    JobStatus::Completed | JobStatus::Failed => {
                        self.completed_at.get_or_insert(now);
                    }
                    JobStatus::Pending | JobStatus::Retrying => {}
                }
            }
        }

        // Payloads follow the resulting status, whatever the update carried.
        match self.status {
            JobStatus::Completed => self.error = None,
            JobStatus::Failed => self.result = None,
            JobStatus::Pending | JobStatus::Running | JobStatus::Retrying => {
                self.result = None;
                self.error = None;
            }
        }

        previous
    }
}

/// Build a pending job record for `task_path` from a typed input.
///
/// Pure: nothing is stored until the record is passed to
/// [`Broker::enqueue`](crate::Broker::enqueue).
pub fn create_job<I: Serialize>(
    task_path: impl Into<String>,
    input: &I,
) -> Result<JobRecord, serde_json::Error> {
    Ok(JobRecord::new(task_path, serde_json::to_value(input)?))
}

/// Partial set of fields applied by [`Broker::update_job`](crate::Broker::update_job).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct JobUpdate {
    pub status: Option<JobStatus>,
    pub result: Option<serde_json::Value>,
    pub error: Option<TaskError>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub attempts: Option<u32>,
}

impl JobUpdate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Update that only changes the status.
    pub fn status(status: JobStatus) -> Self {
        Self::new().with_status(status)
    }

    pub fn running() -> Self {
        Self::status(JobStatus::Running)
    }

    pub fn retrying() -> Self {
        Self::status(JobStatus::Retrying)
    }

    pub fn completed(result: serde_json::Value) -> Self {
        Self::status(JobStatus::Completed).with_result(result)
    }

    pub fn failed(error: impl Into<TaskError>) -> Self {
        Self::status(JobStatus::Failed).with_error(error)
    }

    pub fn with_status(mut self, status: JobStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn with_result(mut self, result: serde_json::Value) -> Self {
        self.result = Some(result);
        self
    }

    pub fn with_error(mut self, error: impl Into<TaskError>) -> Self {
        self.error = Some(error.into());
        self
    }

    pub fn with_attempts(mut self, attempts: u32) -> Self {
        self.attempts = Some(attempts);
        self
    }

    pub fn with_started_at(mut self, started_at: DateTime<Utc>) -> Self {
        self.started_at = Some(started_at);
        self
    }

    pub fn with_completed_at(mut self, completed_at: DateTime<Utc>) -> Self {
        self.completed_at = Some(completed_at);
        self
    }
}

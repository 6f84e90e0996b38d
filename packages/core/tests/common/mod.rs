#![allow(dead_code)]

pub mod conformance;

use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use lane_core::{
    Broker, JobId, JobNotification, JobRecord, JobStatus, NotificationListener, SubscriptionId,
    create_job,
};
use serde_json::json;

/// Upper bound for any await on a job in tests.
pub const WAIT_LIMIT: Duration = Duration::from_secs(5);

pub async fn within<F: Future>(future: F) -> F::Output {
    tokio::time::timeout(WAIT_LIMIT, future)
        .await
        .expect("timed out waiting for job")
}

pub fn job(task_path: &str) -> JobRecord {
    create_job(task_path, &json!({ "data": "test" })).expect("payload serializes")
}

/// Collects every notification delivered to its listeners.
#[derive(Clone, Default)]
pub struct Recorder {
    seen: Arc<Mutex<Vec<JobNotification>>>,
}

impl Recorder {
    pub fn listener(&self) -> NotificationListener {
        let seen = self.seen.clone();
        Arc::new(move |notification: &JobNotification| {
            seen.lock().unwrap().push(notification.clone());
        })
    }

    pub fn subscribe(&self, broker: &dyn Broker, job_id: JobId) -> SubscriptionId {
        broker.subscribe(job_id, self.listener())
    }

    pub fn notifications(&self) -> Vec<JobNotification> {
        self.seen.lock().unwrap().clone()
    }

    pub fn len(&self) -> usize {
        self.seen.lock().unwrap().len()
    }

    /// `(previous, current)` pairs of every state change seen.
    pub fn transitions(&self) -> Vec<(JobStatus, JobStatus)> {
        self.notifications()
            .into_iter()
            .filter_map(|notification| match notification {
                JobNotification::StateChanged(change) => {
                    Some((change.previous_status, change.job.status))
                }
                JobNotification::Discarded { .. } => None,
            })
            .collect()
    }

    pub fn discarded(&self) -> bool {
        self.notifications()
            .iter()
            .any(|notification| matches!(notification, JobNotification::Discarded { .. }))
    }
}

//! The contract every queue backend implements.
//!
//! A broker owns three pieces of state: lanes (named FIFO queues of job
//! ids), job records keyed by id, and per-job subscriptions. Producers
//! call [`Broker::enqueue`], workers call [`Broker::dequeue`] and
//! [`Broker::update_job`], and job handles call [`Broker::get_job`] and
//! [`Broker::subscribe`].
//!
//! # Guarantees
//!
//! - `enqueue` either stores the record and appends it to the lane, or fails.
//!   Unknown lanes are created on first use.
//! - `dequeue` never blocks, never hands the same entry to two callers and
//!   returns jobs of a lane in enqueue order.
//! - `update_job` notifies every subscriber of the job before it returns,
//!   and only when the status actually changed. Updates to the same job
//!   are serialized, so notifications arrive in the order updates were
//!   applied and `previous_status` always reflects the prior update.
//! - `get_job` returns the record as of the last acknowledged update.
//! - A panicking subscriber never prevents delivery to the others and
//!   never fails the update.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::emitter::{Listener, ListenerId};
use crate::error::{BrokerError, BrokerResult};
use crate::{JobId, JobRecord, JobStatus, JobUpdate};

/// Identity of a per-job subscription, used to unsubscribe.
pub type SubscriptionId = ListenerId;

/// Callback invoked with per-job notifications.
pub type NotificationListener = Listener<JobNotification>;

/// A status change applied by [`Broker::update_job`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StateChange {
    pub job_id: JobId,
    /// Record after the update.
    pub job: JobRecord,
    pub previous_status: JobStatus,
}

/// Notification delivered to the subscribers of one job id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum JobNotification {
    /// The job's status changed.
    StateChanged(StateChange),
    /// The broker dropped the job and its subscriptions (lane cleared or
    /// broker closed). This is the last notification for the job id.
    Discarded { job_id: JobId },
}

impl JobNotification {
    pub fn job_id(&self) -> JobId {
        match self {
            JobNotification::StateChanged(change) => change.job_id,
            JobNotification::Discarded { job_id } => *job_id,
        }
    }
}

/// Storage and distribution backend for jobs.
#[async_trait]
pub trait Broker: Send + Sync + 'static {
    /// Store `job` and append its id to `lane`.
    async fn enqueue(&self, lane: &str, job: JobRecord) -> BrokerResult<()>;

    /// Remove and return the oldest queued job of `lane`, or `None` when
    /// the lane is empty or unknown.
    async fn dequeue(&self, lane: &str) -> BrokerResult<Option<JobRecord>>;

    /// Apply `update` to the stored record and return the updated record.
    ///
    /// Fails with [`BrokerError::JobNotFound`] for unknown ids.
    async fn update_job(&self, job_id: JobId, update: JobUpdate) -> BrokerResult<JobRecord>;

    /// Current record for `job_id`, or `None` if it is unknown.
    async fn get_job(&self, job_id: JobId) -> BrokerResult<Option<JobRecord>>;

    /// Release broker-held resources.
    async fn close(&self) -> BrokerResult<()>;

    /// Number of queued jobs in `lane`.
    async fn size(&self, _lane: &str) -> BrokerResult<usize> {
        Err(BrokerError::Unsupported("size"))
    }

    /// Drop every queued job of `lane` together with its subscriptions.
    async fn clear(&self, _lane: &str) -> BrokerResult<()> {
        Err(BrokerError::Unsupported("clear"))
    }

    /// Whether the backend is able to serve requests.
    async fn is_healthy(&self) -> bool {
        true
    }

    /// Register `listener` for notifications about `job_id`.
    ///
    /// The job does not need to exist yet.
    fn subscribe(&self, job_id: JobId, listener: NotificationListener) -> SubscriptionId;

    /// Remove a subscription. Unknown ids are ignored.
    fn unsubscribe(&self, job_id: JobId, subscription: SubscriptionId);
}

#[async_trait]
impl<B> Broker for Arc<B>
where
    B: Broker + ?Sized,
{
    async fn enqueue(&self, lane: &str, job: JobRecord) -> BrokerResult<()> {
        (**self).enqueue(lane, job).await
    }

    async fn dequeue(&self, lane: &str) -> BrokerResult<Option<JobRecord>> {
        (**self).dequeue(lane).await
    }

    async fn update_job(&self, job_id: JobId, update: JobUpdate) -> BrokerResult<JobRecord> {
        (**self).update_job(job_id, update).await
    }

    async fn get_job(&self, job_id: JobId) -> BrokerResult<Option<JobRecord>> {
        (**self).get_job(job_id).await
    }

    async fn close(&self) -> BrokerResult<()> {
        (**self).close().await
    }

    async fn size(&self, lane: &str) -> BrokerResult<usize> {
        (**self).size(lane).await
    }

    async fn clear(&self, lane: &str) -> BrokerResult<()> {
        (**self).clear(lane).await
    }

    async fn is_healthy(&self) -> bool {
        (**self).is_healthy().await
    }

    fn subscribe(&self, job_id: JobId, listener: NotificationListener) -> SubscriptionId {
        (**self).subscribe(job_id, listener)
    }

    fn unsubscribe(&self, job_id: JobId, subscription: SubscriptionId) {
        (**self).unsubscribe(job_id, subscription)
    }
}

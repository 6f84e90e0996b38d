//! In-memory broker for development, tests, and single-process deployments.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::Utc;

use crate::broker::{Broker, JobNotification, NotificationListener, StateChange, SubscriptionId};
use crate::config::BrokerConfig;
use crate::emitter::EventEmitter;
use crate::error::{BrokerError, BrokerResult};
use crate::{JobId, JobRecord, JobUpdate, lock_unpoisoned as lock};

/// Storage for one job.
struct JobSlot {
    /// Held for the whole update-and-notify step so updates to one job are
    /// serialized and notified in the order they were applied.
    gate: Mutex<()>,
    record: Mutex<JobRecord>,
}

impl JobSlot {
    fn new(record: JobRecord) -> Self {
        Self {
            gate: Mutex::new(()),
            record: Mutex::new(record),
        }
    }

    fn snapshot(&self) -> JobRecord {
        lock(&self.record).clone()
    }
}

/// Broker keeping lanes, records, and subscriptions in process memory.
///
/// Lock order is a slot's `gate`, then `lanes`, then `jobs`, then the
/// slot's `record`. Listener callbacks run with only the slot's `gate` held.
pub struct InMemoryBroker {
    config: BrokerConfig,
    lanes: Mutex<HashMap<String, VecDeque<JobId>>>,
    jobs: Mutex<HashMap<JobId, Arc<JobSlot>>>,
    listeners: EventEmitter<JobId, JobNotification>,
    closed: AtomicBool,
}

impl InMemoryBroker {
    /// Create a broker with the default configuration.
    pub fn new() -> Self {
        Self::with_config(BrokerConfig::default())
    }

    pub fn with_config(config: BrokerConfig) -> Self {
        Self {
            config,
            lanes: Mutex::new(HashMap::new()),
            jobs: Mutex::new(HashMap::new()),
            listeners: EventEmitter::new(),
            closed: AtomicBool::new(false),
        }
    }

    /// Create a shared broker ready to hand to handles and workers.
    pub fn shared() -> Arc<Self> {
        Arc::new(Self::new())
    }

    pub fn config(&self) -> &BrokerConfig {
        &self.config
    }

    /// Number of job records currently stored, queued or not.
    pub fn job_count(&self) -> usize {
        lock(&self.jobs).len()
    }

    /// Number of subscriptions registered for `job_id`.
    pub fn subscriber_count(&self, job_id: JobId) -> usize {
        self.listeners.listener_count(&job_id)
    }

    fn slot(&self, job_id: JobId) -> Option<Arc<JobSlot>> {
        lock(&self.jobs).get(&job_id).cloned()
    }

    fn ensure_open(&self) -> BrokerResult<()> {
        if self.closed.load(Ordering::Acquire) {
            Err(BrokerError::Closed)
        } else {
            Ok(())
        }
    }

    /// Send the final notification for a removed job and forget its
    /// subscribers.
    fn discard(&self, job_id: JobId, slot: &JobSlot) {
        let _gate = lock(&slot.gate);
        self.listeners.emit(&job_id, &JobNotification::Discarded { job_id });
        self.listeners.remove_all_listeners(Some(&job_id));
    }
}

impl Default for InMemoryBroker {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Broker for InMemoryBroker {
    async fn enqueue(&self, lane: &str, job: JobRecord) -> BrokerResult<()> {
        self.ensure_open()?;
        let job_id = job.id;

        let mut lanes = lock(&self.lanes);
        let mut jobs = lock(&self.jobs);
        if jobs.contains_key(&job_id) {
            return Err(BrokerError::DuplicateJob(job_id));
        }

        let queue = lanes.entry(lane.to_string()).or_default();
        if let Some(max_size) = self.config.max_lane_size
            && queue.len() >= max_size
        {
            return Err(BrokerError::LaneFull(lane.to_string()));
        }

        jobs.insert(job_id, Arc::new(JobSlot::new(job)));
        queue.push_back(job_id);

        tracing::debug!("Job {} enqueued on lane '{}'", job_id, lane);
        Ok(())
    }

    async fn dequeue(&self, lane: &str) -> BrokerResult<Option<JobRecord>> {
        self.ensure_open()?;

        let mut lanes = lock(&self.lanes);
        let Some(queue) = lanes.get_mut(lane) else {
            return Ok(None);
        };

        let jobs = lock(&self.jobs);
        // Entries whose record is gone are skipped rather than returned.
        while let Some(job_id) = queue.pop_front() {
            if let Some(slot) = jobs.get(&job_id) {
                tracing::debug!("Job {} dequeued from lane '{}'", job_id, lane);
                return Ok(Some(slot.snapshot()));
            }
        }
        Ok(None)
    }

    async fn update_job(&self, job_id: JobId, update: JobUpdate) -> BrokerResult<JobRecord> {
        self.ensure_open()?;
        let slot = self.slot(job_id).ok_or(BrokerError::JobNotFound(job_id))?;

        let _gate = lock(&slot.gate);
        // A concurrent clear/close may have dropped the slot before the gate was taken.
        let still_stored = lock(&self.jobs)
            .get(&job_id)
            .is_some_and(|current| Arc::ptr_eq(current, &slot));
        if !still_stored {
            return Err(BrokerError::JobNotFound(job_id));
        }

        let (job, previous_status) = {
            let mut record = lock(&slot.record);
            if let Some(next) = update.status
                && self.config.enforce_transitions
                && next != record.status
                && !record.status.can_transition_to(next)
            {
                return Err(BrokerError::InvalidTransition {
                    job_id,
                    from: record.status,
                    to: next,
                });
            }
            let previous_status = record.apply(update, Utc::now());
            (record.clone(), previous_status)
        };

        if job.status != previous_status {
            tracing::debug!("Job {} {} -> {}", job_id, previous_status, job.status);
            let notification = JobNotification::StateChanged(StateChange {
                job_id,
                job: job.clone(),
                previous_status,
            });
            self.listeners.emit(&job_id, &notification);
        }

        Ok(job)
    }

    async fn get_job(&self, job_id: JobId) -> BrokerResult<Option<JobRecord>> {
        Ok(self.slot(job_id).map(|slot| slot.snapshot()))
    }

    async fn close(&self) -> BrokerResult<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }

        let slots: Vec<(JobId, Arc<JobSlot>)> = {
            let mut lanes = lock(&self.lanes);
            let mut jobs = lock(&self.jobs);
            lanes.clear();
            jobs.drain().collect()
        };
        for (job_id, slot) in &slots {
            self.discard(*job_id, slot);
        }
        self.listeners.remove_all_listeners(None);

        tracing::info!("In-memory broker closed, {} jobs discarded", slots.len());
        Ok(())
    }

    async fn size(&self, lane: &str) -> BrokerResult<usize> {
        Ok(lock(&self.lanes).get(lane).map_or(0, VecDeque::len))
    }

    async fn clear(&self, lane: &str) -> BrokerResult<()> {
        let removed: Vec<(JobId, Arc<JobSlot>)> = {
            let mut lanes = lock(&self.lanes);
            let Some(queue) = lanes.remove(lane) else {
                return Ok(());
            };
            let mut jobs = lock(&self.jobs);
            queue
                .into_iter()
                .filter_map(|job_id| jobs.remove(&job_id).map(|slot| (job_id, slot)))
                .collect()
        };
        for (job_id, slot) in &removed {
            self.discard(*job_id, slot);
        }

        tracing::debug!("Lane '{}' cleared, {} jobs discarded", lane, removed.len());
        Ok(())
    }

    async fn is_healthy(&self) -> bool {
        !self.closed.load(Ordering::Acquire)
    }

    fn subscribe(&self, job_id: JobId, listener: NotificationListener) -> SubscriptionId {
        self.listeners.on_shared(job_id, listener)
    }

    fn unsubscribe(&self, job_id: JobId, subscription: SubscriptionId) {
        self.listeners.off(&job_id, subscription);
    }
}

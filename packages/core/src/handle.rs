//! Client-side handle bound to one job id.

use std::marker::PhantomData;
use std::mem;
use std::sync::{Arc, Mutex, Weak};

use serde::de::DeserializeOwned;
use tokio::sync::oneshot;

use crate::broker::{Broker, JobNotification, NotificationListener, SubscriptionId};
use crate::emitter::{EventEmitter, ListenerId};
use crate::error::{JobError, JobResult};
use crate::events::{JobEvent, JobEventKind};
use crate::{JobId, JobRecord, JobStatus, TaskError, lock_unpoisoned as lock};

type Waiter = oneshot::Sender<JobResult<JobRecord>>;

/// Where the handle is in its own lifecycle.
enum Phase {
    /// Waiting for a terminal notification.
    Open,
    /// A terminal record was observed; it can never change again.
    Terminal(JobRecord),
    /// The broker dropped the job.
    Discarded,
    Destroyed,
}

struct WaiterSet {
    phase: Phase,
    pending: Vec<Waiter>,
}

enum Registration {
    Ready(JobResult<JobRecord>),
    Pending(oneshot::Receiver<JobResult<JobRecord>>),
}

struct HandleInner {
    job_id: JobId,
    broker: Arc<dyn Broker>,
    events: EventEmitter<JobEventKind, JobEvent>,
    waiters: Mutex<WaiterSet>,
    subscription: Mutex<Option<SubscriptionId>>,
}

impl HandleInner {
    fn on_notification(&self, notification: &JobNotification) {
        match notification {
            JobNotification::StateChanged(change) => {
                self.observe(change.job.clone(), Some(change.previous_status));
            }
            JobNotification::Discarded { job_id } => {
                let waiters = {
                    let mut set = lock(&self.waiters);
                    if matches!(set.phase, Phase::Open) {
                        set.phase = Phase::Discarded;
                    }
                    mem::take(&mut set.pending)
                };
                for waiter in waiters {
                    let _ = waiter.send(Err(JobError::Discarded(*job_id)));
                }
            }
        }
    }

    /// Emit events for `job` and, when it is terminal, resolve every
    /// pending waiter.
    ///
    /// The terminal branch runs at most once per handle: the first caller
    /// flips the phase and takes the pending set under the same lock, so a
    /// waiter registered afterwards resolves from the stored record instead
    /// of waiting for an event that already happened.
    fn observe(&self, job: JobRecord, previous_status: Option<JobStatus>) {
        let Some(terminal_kind) = JobEventKind::for_terminal(job.status) else {
            if matches!(lock(&self.waiters).phase, Phase::Open) {
                let event = JobEvent {
                    job,
                    previous_status,
                };
                self.events.emit(&JobEventKind::StateChange, &event);
            }
            return;
        };

        let waiters = {
            let mut set = lock(&self.waiters);
            if !matches!(set.phase, Phase::Open) {
                return;
            }
            set.phase = Phase::Terminal(job.clone());
            mem::take(&mut set.pending)
        };

        tracing::debug!("Job {} reached {}", job.id, job.status);
        let event = JobEvent {
            job,
            previous_status,
        };
        self.events.emit(&JobEventKind::StateChange, &event);
        self.events.emit(&terminal_kind, &event);

        for waiter in waiters {
            let _ = waiter.send(Ok(event.job.clone()));
        }
    }

    /// Reject the waiters registered so far without closing the handle.
    fn reject_pending(&self, error: impl Fn() -> JobError) {
        let waiters = mem::take(&mut lock(&self.waiters).pending);
        for waiter in waiters {
            let _ = waiter.send(Err(error()));
        }
    }

    fn register_waiter(&self) -> Registration {
        let mut set = lock(&self.waiters);
        match &set.phase {
            Phase::Open => {
                let (tx, rx) = oneshot::channel();
                set.pending.push(tx);
                Registration::Pending(rx)
            }
            Phase::Terminal(job) => Registration::Ready(Ok(job.clone())),
            Phase::Discarded => Registration::Ready(Err(JobError::Discarded(self.job_id))),
            Phase::Destroyed => Registration::Ready(Err(JobError::Destroyed(self.job_id))),
        }
    }

    /// Covers a job that finished before the subscription was registered.
    async fn check_initial_state(&self) {
        match self.broker.get_job(self.job_id).await {
            Ok(Some(job)) if job.is_terminal() => self.observe(job, None),
            Ok(Some(_)) => {}
            Ok(None) => self.reject_pending(|| JobError::NotFound(self.job_id)),
            Err(err) => {
                tracing::warn!("Initial state check for job {} failed: {}", self.job_id, err);
                self.reject_pending(|| JobError::from(err.clone()));
            }
        }
    }

    fn destroy(&self) {
        if let Some(subscription) = lock(&self.subscription).take() {
            self.broker.unsubscribe(self.job_id, subscription);
        }
        self.events.remove_all_listeners(None);

        let waiters = {
            let mut set = lock(&self.waiters);
            set.phase = Phase::Destroyed;
            mem::take(&mut set.pending)
        };
        for waiter in waiters {
            let _ = waiter.send(Err(JobError::Destroyed(self.job_id)));
        }
    }
}

impl Drop for HandleInner {
    fn drop(&mut self) {
        self.destroy();
    }
}

/// Handle for observing and awaiting one job.
///
/// `I` and `O` are the task's input and output types; the broker stores
/// them as JSON and the handle decodes on access.
///
/// Creating a handle subscribes to the broker for the job id and checks,
/// in a background task, whether the job already finished. A handle made
/// for a finished job therefore still emits exactly one `completed` or
/// `failed` event.
///
/// Clones share the same subscription and waiters. The subscription is
/// released by [`JobHandle::destroy`] or when the last clone is dropped.
pub struct JobHandle<I = serde_json::Value, O = serde_json::Value> {
    inner: Arc<HandleInner>,
    _types: PhantomData<fn() -> (I, O)>,
}

impl<I, O> Clone for JobHandle<I, O> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
            _types: PhantomData,
        }
    }
}

impl<I, O> std::fmt::Debug for JobHandle<I, O> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobHandle")
            .field("job_id", &self.inner.job_id)
            .finish_non_exhaustive()
    }
}

impl<I, O> JobHandle<I, O>
where
    I: DeserializeOwned,
    O: DeserializeOwned,
{
    /// Bind a handle to `job_id` on `broker`.
    ///
    /// The initial state check runs on the current Tokio runtime. Outside
    /// a runtime it is skipped; waiting still works because
    /// [`JobHandle::wait_for_completion`] reads the record first.
    pub fn new(broker: Arc<dyn Broker>, job_id: JobId) -> Self {
        let inner = Arc::new(HandleInner {
            job_id,
            broker,
            events: EventEmitter::new(),
            waiters: Mutex::new(WaiterSet {
                phase: Phase::Open,
                pending: Vec::new(),
            }),
            subscription: Mutex::new(None),
        });

        let weak: Weak<HandleInner> = Arc::downgrade(&inner);
        let listener: NotificationListener = Arc::new(move |notification: &JobNotification| {
            if let Some(inner) = weak.upgrade() {
                inner.on_notification(notification);
            }
        });
        let subscription = inner.broker.subscribe(job_id, listener);
        *lock(&inner.subscription) = Some(subscription);

        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                let task_inner = inner.clone();
                runtime.spawn(async move {
                    task_inner.check_initial_state().await;
                });
            }
            Err(_) => {
                tracing::debug!(
                    "No Tokio runtime, skipping initial state check for job {}",
                    job_id
                );
            }
        }

        Self {
            inner,
            _types: PhantomData,
        }
    }

    /// The job id this handle is bound to.
    pub fn id(&self) -> JobId {
        self.inner.job_id
    }

    /// Fetch the current record from the broker.
    pub async fn get_job_data(&self) -> JobResult<JobRecord> {
        self.inner
            .broker
            .get_job(self.inner.job_id)
            .await?
            .ok_or(JobError::NotFound(self.inner.job_id))
    }

    /// Fetch and decode the job's input payload.
    pub async fn input(&self) -> JobResult<I> {
        Ok(self.get_job_data().await?.input()?)
    }

    /// Wait for the job to complete and return its decoded result.
    ///
    /// A failed job surfaces its stored error as [`JobError::TaskFailed`].
    /// A completed job without a result is a broker/worker contract
    /// violation and fails with [`JobError::MissingResult`].
    pub async fn wait(&self) -> JobResult<O> {
        let job = self.wait_for_completion().await?;

        if job.status == JobStatus::Failed {
            let error = job
                .error
                .unwrap_or_else(|| TaskError::new(format!("Job {} failed", job.id)));
            return Err(JobError::TaskFailed(error));
        }

        match job.result {
            Some(result) => Ok(serde_json::from_value(result)?),
            None => Err(JobError::MissingResult(job.id)),
        }
    }

    /// Wait for the job to reach `Completed` or `Failed` and return the
    /// record. A failed job is not an error here.
    ///
    /// There is no built-in timeout. Callers that give up waiting should
    /// call [`JobHandle::destroy`] to release the handle.
    pub async fn wait_for_completion(&self) -> JobResult<JobRecord> {
        let job = self.get_job_data().await?;
        if job.is_terminal() {
            return Ok(job);
        }

        match self.inner.register_waiter() {
            Registration::Ready(result) => result,
            Registration::Pending(rx) => rx
                .await
                .unwrap_or_else(|_| Err(JobError::Destroyed(self.inner.job_id))),
        }
    }

    /// Register a listener for `kind`.
    pub fn on<F>(&self, kind: JobEventKind, listener: F) -> ListenerId
    where
        F: Fn(&JobEvent) + Send + Sync + 'static,
    {
        self.inner.events.on(kind, listener)
    }

    /// Register a listener for the next `kind` event only.
    pub fn once<F>(&self, kind: JobEventKind, listener: F) -> ListenerId
    where
        F: Fn(&JobEvent) + Send + Sync + 'static,
    {
        self.inner.events.once(kind, listener)
    }

    /// Remove a listener. Unknown ids are ignored.
    pub fn off(&self, kind: JobEventKind, id: ListenerId) {
        self.inner.events.off(&kind, id);
    }

    /// Unsubscribe from the broker, drop all listeners and reject pending
    /// waiters with [`JobError::Destroyed`].
    ///
    /// Safe to call repeatedly and from inside an event listener.
    pub fn destroy(&self) {
        self.inner.destroy();
    }
}

//! Core of the lane task queue.
//!
//! This crate contains the pieces every producer, worker, and backend
//! shares:
//! - `EventEmitter` for synchronous, failure-isolated publish/subscribe
//! - `JobRecord`, `JobStatus` and the job lifecycle
//! - the `Broker` contract and the `InMemoryBroker` reference backend
//! - `JobHandle` for observing and awaiting a job
//!
//! # Usage
//!
//! ```ignore
//! use lane_core::{Broker, InMemoryBroker, JobHandle, create_job};
//!
//! let broker = InMemoryBroker::shared();
//! let job = create_job("math.add", &serde_json::json!({ "a": 1, "b": 2 }))?;
//! let handle: JobHandle = JobHandle::new(broker.clone(), job.id);
//! broker.enqueue("default", job).await?;
//!
//! // A worker dequeues from "default" and calls update_job...
//! let sum = handle.wait().await?;
//! ```

use std::sync::{Mutex, MutexGuard, PoisonError};

mod broker;
mod config;
mod emitter;
mod error;
mod events;
mod handle;
mod job;
mod memory;

pub use broker::{Broker, JobNotification, NotificationListener, StateChange, SubscriptionId};
pub use config::BrokerConfig;
pub use emitter::{EventEmitter, Listener, ListenerId, panic_message};
pub use error::{BrokerError, BrokerResult, JobError, JobResult};
pub use events::{JobEvent, JobEventKind};
pub use handle::JobHandle;
pub use job::{JobId, JobRecord, JobStatus, JobUpdate, TaskError, create_job};
pub use memory::InMemoryBroker;

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Lock a mutex, recovering the data if a previous holder panicked.
pub(crate) fn lock_unpoisoned<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

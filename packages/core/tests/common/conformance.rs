//! Behaviour every `Broker` backend must show.

use std::collections::HashSet;
use std::error::Error;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use lane_core::{Broker, BrokerError, JobId, JobNotification, JobStatus, JobUpdate};
use serde_json::json;

use super::{Recorder, job};

type TestResult = Result<(), Box<dyn Error>>;

/// Run the whole suite, building a fresh broker for every case.
pub async fn run_all<F>(make: F) -> TestResult
where
    F: Fn() -> Arc<dyn Broker>,
{
    lanes_are_fifo(make()).await?;
    unknown_lane_is_empty(make()).await?;
    enqueue_creates_lane_and_counts(make()).await?;
    dequeued_job_stays_queryable(make()).await?;
    update_of_unknown_job_fails(make()).await?;
    status_change_notifies_only_its_job(make()).await?;
    redundant_update_is_not_notified(make()).await?;
    notifications_follow_update_order(make()).await?;
    get_job_reflects_last_update(make()).await?;
    terminal_record_keeps_result_xor_error(make()).await?;
    concurrent_updates_form_one_chain(make()).await?;
    panicking_subscriber_is_isolated(make()).await?;
    unsubscribe_is_by_identity(make()).await?;
    clear_forgets_lane_jobs_and_subscriptions(make()).await?;
    concurrent_dequeues_never_share_entries(make()).await?;
    Ok(())
}

pub async fn lanes_are_fifo(broker: Arc<dyn Broker>) -> TestResult {
    let (a, b, c) = (job("t.a"), job("t.b"), job("t.c"));
    let ids = [a.id, b.id, c.id];
    broker.enqueue("fifo", a).await?;
    broker.enqueue("fifo", b).await?;
    broker.enqueue("other", job("t.x")).await?;
    broker.enqueue("fifo", c).await?;

    for expected in ids {
        let next = broker.dequeue("fifo").await?.ok_or("lane drained early")?;
        assert_eq!(next.id, expected);
    }
    assert!(broker.dequeue("fifo").await?.is_none());
    Ok(())
}

pub async fn unknown_lane_is_empty(broker: Arc<dyn Broker>) -> TestResult {
    assert!(broker.dequeue("nowhere").await?.is_none());
    assert_eq!(broker.size("nowhere").await?, 0);
    Ok(())
}

pub async fn enqueue_creates_lane_and_counts(broker: Arc<dyn Broker>) -> TestResult {
    broker.enqueue("fresh", job("t")).await?;
    broker.enqueue("fresh", job("t")).await?;
    assert_eq!(broker.size("fresh").await?, 2);

    broker.dequeue("fresh").await?;
    assert_eq!(broker.size("fresh").await?, 1);
    assert!(broker.is_healthy().await);
    Ok(())
}

pub async fn dequeued_job_stays_queryable(broker: Arc<dyn Broker>) -> TestResult {
    let record = job("t");
    let id = record.id;
    broker.enqueue("lane", record).await?;
    broker.dequeue("lane").await?;

    let stored = broker.get_job(id).await?.ok_or("record vanished after dequeue")?;
    assert_eq!(stored.id, id);
    assert_eq!(stored.status, JobStatus::Pending);
    Ok(())
}

pub async fn update_of_unknown_job_fails(broker: Arc<dyn Broker>) -> TestResult {
    let missing = JobId::new();
    let err = broker
        .update_job(missing, JobUpdate::running())
        .await
        .expect_err("update of unknown job must fail");
    assert_eq!(err, BrokerError::JobNotFound(missing));
    assert!(broker.get_job(missing).await?.is_none());
    Ok(())
}

pub async fn status_change_notifies_only_its_job(broker: Arc<dyn Broker>) -> TestResult {
    let (target, bystander) = (job("t"), job("t"));
    let (target_id, bystander_id) = (target.id, bystander.id);
    broker.enqueue("lane", target).await?;
    broker.enqueue("lane", bystander).await?;

    let first = Recorder::default();
    let second = Recorder::default();
    let other = Recorder::default();
    first.subscribe(broker.as_ref(), target_id);
    second.subscribe(broker.as_ref(), target_id);
    other.subscribe(broker.as_ref(), bystander_id);

    let updated = broker.update_job(target_id, JobUpdate::running()).await?;
    assert_eq!(updated.status, JobStatus::Running);

    for recorder in [&first, &second] {
        assert_eq!(recorder.transitions(), vec![(JobStatus::Pending, JobStatus::Running)]);
        let notifications = recorder.notifications();
        assert_eq!(notifications[0].job_id(), target_id);
    }
    assert_eq!(other.len(), 0);
    Ok(())
}

pub async fn redundant_update_is_not_notified(broker: Arc<dyn Broker>) -> TestResult {
    let record = job("t");
    let id = record.id;
    broker.enqueue("lane", record).await?;
    let recorder = Recorder::default();
    recorder.subscribe(broker.as_ref(), id);

    broker.update_job(id, JobUpdate::running()).await?;
    broker.update_job(id, JobUpdate::running()).await?;
    broker.update_job(id, JobUpdate::new().with_attempts(2)).await?;

    assert_eq!(recorder.len(), 1);
    assert_eq!(broker.get_job(id).await?.ok_or("missing")?.attempts, 2);
    Ok(())
}

pub async fn notifications_follow_update_order(broker: Arc<dyn Broker>) -> TestResult {
    let record = job("t");
    let id = record.id;
    broker.enqueue("lane", record).await?;
    let recorder = Recorder::default();
    recorder.subscribe(broker.as_ref(), id);

    broker.update_job(id, JobUpdate::running()).await?;
    broker.update_job(id, JobUpdate::retrying()).await?;
    broker.update_job(id, JobUpdate::running()).await?;
    broker
        .update_job(id, JobUpdate::completed(json!({ "x": 1 })))
        .await?;

    assert_eq!(
        recorder.transitions(),
        vec![
            (JobStatus::Pending, JobStatus::Running),
            (JobStatus::Running, JobStatus::Retrying),
            (JobStatus::Retrying, JobStatus::Running),
            (JobStatus::Running, JobStatus::Completed),
        ]
    );
    Ok(())
}

pub async fn get_job_reflects_last_update(broker: Arc<dyn Broker>) -> TestResult {
    let record = job("t");
    let id = record.id;
    broker.enqueue("lane", record).await?;

    broker.update_job(id, JobUpdate::running()).await?;
    broker
        .update_job(id, JobUpdate::completed(json!({ "x": 1 })))
        .await?;

    let stored = broker.get_job(id).await?.ok_or("missing")?;
    assert_eq!(stored.status, JobStatus::Completed);
    assert_eq!(stored.result, Some(json!({ "x": 1 })));
    assert!(stored.error.is_none());
    assert!(stored.started_at.is_some());
    assert!(stored.completed_at.is_some());
    Ok(())
}

pub async fn terminal_record_keeps_result_xor_error(broker: Arc<dyn Broker>) -> TestResult {
    let (completed, failed) = (job("t"), job("t"));
    let (completed_id, failed_id) = (completed.id, failed.id);
    broker.enqueue("lane", completed).await?;
    broker.enqueue("lane", failed).await?;

    broker
        .update_job(completed_id, JobUpdate::running().with_result(json!("early")))
        .await?;
    let running = broker.get_job(completed_id).await?.ok_or("missing")?;
    assert!(running.result.is_none());

    broker
        .update_job(completed_id, JobUpdate::completed(json!({ "x": 1 })))
        .await?;
    let late = broker
        .update_job(completed_id, JobUpdate::new().with_error("late"))
        .await?;
    assert_eq!(late.result, Some(json!({ "x": 1 })));
    assert!(late.error.is_none());
    let stored = broker.get_job(completed_id).await?.ok_or("missing")?;
    assert!(stored.error.is_none(), "error stored on a completed record");

    broker.update_job(failed_id, JobUpdate::running()).await?;
    broker.update_job(failed_id, JobUpdate::failed("boom")).await?;
    broker
        .update_job(failed_id, JobUpdate::new().with_result(json!(2)))
        .await?;
    let stored = broker.get_job(failed_id).await?.ok_or("missing")?;
    assert!(stored.result.is_none(), "result stored on a failed record");
    assert_eq!(stored.error.map(|error| error.message), Some("boom".to_string()));
    Ok(())
}

pub async fn concurrent_updates_form_one_chain(broker: Arc<dyn Broker>) -> TestResult {
    const WRITERS: usize = 8;
    const UPDATES: usize = 50;
    let record = job("t");
    let id = record.id;
    broker.enqueue("lane", record).await?;
    broker.update_job(id, JobUpdate::running()).await?;

    let recorder = Recorder::default();
    recorder.subscribe(broker.as_ref(), id);

    let mut writers = Vec::new();
    for writer in 0..WRITERS {
        let broker = broker.clone();
        writers.push(tokio::spawn(async move {
            for step in 0..UPDATES {
                let update = if (writer + step) % 2 == 0 {
                    JobUpdate::running()
                } else {
                    JobUpdate::retrying()
                };
                broker.update_job(id, update).await?;
                tokio::task::yield_now().await;
            }
            Ok::<_, BrokerError>(())
        }));
    }
    for writer in writers {
        writer.await??;
    }

    let transitions = recorder.transitions();
    assert!(!transitions.is_empty());
    let mut current = JobStatus::Running;
    for (previous, next) in &transitions {
        assert_eq!(*previous, current, "previous status skipped an applied update");
        assert_ne!(previous, next, "update without a status change was notified");
        current = *next;
    }
    assert_eq!(recorder.len(), transitions.len());
    assert_eq!(broker.get_job(id).await?.ok_or("missing")?.status, current);
    Ok(())
}

pub async fn panicking_subscriber_is_isolated(broker: Arc<dyn Broker>) -> TestResult {
    let record = job("t");
    let id = record.id;
    broker.enqueue("lane", record).await?;

    let calls = Arc::new(AtomicUsize::new(0));
    let counted = calls.clone();
    broker.subscribe(id, Arc::new(failing_subscriber));
    broker.subscribe(
        id,
        Arc::new(move |_: &JobNotification| {
            counted.fetch_add(1, Ordering::SeqCst);
        }),
    );

    let updated = broker.update_job(id, JobUpdate::running()).await?;
    assert_eq!(updated.status, JobStatus::Running);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    Ok(())
}

fn failing_subscriber(_: &JobNotification) {
    panic!("subscriber failure");
}

pub async fn unsubscribe_is_by_identity(broker: Arc<dyn Broker>) -> TestResult {
    let record = job("t");
    let id = record.id;
    broker.enqueue("lane", record).await?;

    let removed = Recorder::default();
    let kept = Recorder::default();
    let subscription = removed.subscribe(broker.as_ref(), id);
    kept.subscribe(broker.as_ref(), id);

    broker.unsubscribe(id, subscription);
    broker.unsubscribe(id, subscription);
    broker.unsubscribe(JobId::new(), subscription);
    broker.update_job(id, JobUpdate::running()).await?;

    assert_eq!(removed.len(), 0);
    assert_eq!(kept.len(), 1);
    Ok(())
}

pub async fn clear_forgets_lane_jobs_and_subscriptions(broker: Arc<dyn Broker>) -> TestResult {
    let (queued, elsewhere) = (job("t"), job("t"));
    let (queued_id, elsewhere_id) = (queued.id, elsewhere.id);
    broker.enqueue("doomed", queued).await?;
    broker.enqueue("kept", elsewhere).await?;

    let recorder = Recorder::default();
    recorder.subscribe(broker.as_ref(), queued_id);

    broker.clear("doomed").await?;
    broker.clear("doomed").await?;

    assert_eq!(broker.size("doomed").await?, 0);
    assert!(broker.dequeue("doomed").await?.is_none());
    assert!(broker.get_job(queued_id).await?.is_none());
    assert!(broker.get_job(elsewhere_id).await?.is_some());
    assert!(recorder.discarded());

    let before = recorder.len();
    let err = broker
        .update_job(queued_id, JobUpdate::running())
        .await
        .expect_err("cleared job must be gone");
    assert_eq!(err, BrokerError::JobNotFound(queued_id));
    assert_eq!(recorder.len(), before);
    Ok(())
}

pub async fn concurrent_dequeues_never_share_entries(broker: Arc<dyn Broker>) -> TestResult {
    const JOBS: usize = 200;
    for _ in 0..JOBS {
        broker.enqueue("busy", job("t")).await?;
    }

    let mut tasks = Vec::new();
    for _ in 0..8 {
        let broker = broker.clone();
        tasks.push(tokio::spawn(async move {
            let mut taken = Vec::new();
            while let Ok(Some(record)) = broker.dequeue("busy").await {
                taken.push(record.id);
                tokio::task::yield_now().await;
            }
            taken
        }));
    }

    let mut seen = HashSet::new();
    for task in tasks {
        for id in task.await? {
            assert!(seen.insert(id), "job {id} dequeued twice");
        }
    }
    assert_eq!(seen.len(), JOBS);
    Ok(())
}

// Copyright (C) 2025 Trenova contributors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Shared fixtures for trenova-jobs integration tests.

#![allow(dead_code)]

use std::time::Duration;

use chrono::Utc;
use serde_json::json;
use trenova_core::id::new_id;
use trenova_jobs::{
    JobBroker, JobError, JobOptions, JobType, LEASE_EXPIRED, Priority, Queue, Task, TaskState,
};

pub fn task(job_type: JobType, options: JobOptions) -> Task {
    Task::new(
        job_type,
        &json!({"jobId": new_id("job"), "timestamp": Utc::now().timestamp()}),
        options,
        None,
    )
    .unwrap()
}

pub fn delayed_task(job_type: JobType, options: JobOptions, delay: chrono::Duration) -> Task {
    Task::new(
        job_type,
        &json!({"jobId": new_id("job"), "timestamp": Utc::now().timestamp()}),
        options,
        Some(Utc::now() + delay),
    )
    .unwrap()
}

/// Poll `check` every 20ms until it returns true or `timeout` elapses.
pub async fn eventually<F, Fut>(timeout: Duration, mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if check().await {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    false
}

/// Behaviour every broker backend must share. Each section uses its own
/// queue so sections do not see each other's tasks.
pub async fn broker_contract(broker: &dyn JobBroker) {
    // Priority first, then arrival order.
    let low = task(JobType::DataBackup, JobOptions::on(Queue::System).with_priority(Priority::Low));
    let mut low_later =
        task(JobType::DataBackup, JobOptions::on(Queue::System).with_priority(Priority::Low));
    low_later.enqueued_at = low.enqueued_at + chrono::Duration::milliseconds(5);
    let high =
        task(JobType::DataBackup, JobOptions::on(Queue::System).with_priority(Priority::High));
    for t in [&low, &low_later, &high] {
        let info = broker.enqueue(t.clone()).await.unwrap();
        assert_eq!(info.state, TaskState::Pending);
    }
    let mut order = Vec::new();
    while let Some(t) = broker.dequeue(Queue::System).await.unwrap() {
        assert_eq!(t.state, TaskState::Active);
        order.push(t.id);
    }
    assert_eq!(order, vec![high.id.clone(), low.id.clone(), low_later.id.clone()]);

    // Future tasks wait in the scheduled set until forwarded.
    let later = delayed_task(
        JobType::ComplianceCheck,
        JobOptions::on(Queue::Compliance),
        chrono::Duration::hours(1),
    );
    let info = broker.enqueue(later.clone()).await.unwrap();
    assert_eq!(info.state, TaskState::Scheduled);
    assert!(broker.dequeue(Queue::Compliance).await.unwrap().is_none());
    assert_eq!(broker.stats().await.unwrap().scheduled, 1);
    assert_eq!(broker.forward_due(Utc::now()).await.unwrap(), 0);
    assert_eq!(
        broker.forward_due(Utc::now() + chrono::Duration::hours(2)).await.unwrap(),
        1
    );
    let forwarded = broker.dequeue(Queue::Compliance).await.unwrap().unwrap();
    assert_eq!(forwarded.id, later.id);

    // Unique keys reject duplicates until the holder completes.
    let key = new_id("uniq");
    let options = JobOptions::email().with_unique_key(key.clone());
    let first = task(JobType::SendEmail, options.clone());
    broker.enqueue(first.clone()).await.unwrap();
    let err = broker
        .enqueue(task(JobType::SendEmail, options.clone()))
        .await
        .unwrap_err();
    assert!(matches!(err, JobError::Duplicate(_)));
    let running = broker.dequeue(Queue::Email).await.unwrap().unwrap();
    assert_eq!(running.id, first.id);

    // Completion keeps the result and frees the unique key.
    broker.complete(&running, "sent").await.unwrap();
    assert_eq!(broker.result(&first.id).await.unwrap().as_deref(), Some("sent"));
    let info = broker.task_info(&first.id).await.unwrap().unwrap();
    assert_eq!(info.state, TaskState::Completed);
    let again = task(JobType::SendEmail, options);
    broker.enqueue(again.clone()).await.unwrap();
    assert_eq!(broker.dequeue(Queue::Email).await.unwrap().unwrap().id, again.id);

    // Retries go through the retry set with the failure recorded.
    let flaky = task(JobType::DelayShipment, JobOptions::delay_shipment());
    broker.enqueue(flaky.clone()).await.unwrap();
    let attempt = broker.dequeue(Queue::Shipment).await.unwrap().unwrap();
    broker
        .retry(&attempt, "store unavailable", Utc::now() - chrono::Duration::seconds(1))
        .await
        .unwrap();
    let info = broker.task_info(&flaky.id).await.unwrap().unwrap();
    assert_eq!(info.state, TaskState::Retry);
    assert_eq!(info.retried, 1);
    assert_eq!(info.last_error.as_deref(), Some("store unavailable"));
    assert_eq!(broker.stats().await.unwrap().retry, 1);
    assert_eq!(broker.forward_due(Utc::now()).await.unwrap(), 1);
    let second = broker.dequeue(Queue::Shipment).await.unwrap().unwrap();
    assert_eq!(second.id, flaky.id);
    assert_eq!(second.retried, 1);

    // Archived tasks stay inspectable.
    broker.archive(&second, "gave up").await.unwrap();
    let info = broker.task_info(&flaky.id).await.unwrap().unwrap();
    assert_eq!(info.state, TaskState::Archived);
    let stats = broker.stats().await.unwrap();
    let shipment = stats.queues.iter().find(|q| q.queue == Queue::Shipment).unwrap();
    assert_eq!(shipment.pending, 0);
    assert_eq!(shipment.archived, 1);

    // Only tasks that have not started can be cancelled.
    let pending = delayed_task(
        JobType::GenerateReports,
        JobOptions::on(Queue::Critical),
        chrono::Duration::minutes(30),
    );
    broker.enqueue(pending.clone()).await.unwrap();
    assert!(broker.cancel(&pending.id).await.unwrap());
    assert!(broker.task_info(&pending.id).await.unwrap().is_none());
    assert!(!broker.cancel(&pending.id).await.unwrap());
    assert!(!broker.cancel(&flaky.id).await.unwrap());

    // A task whose worker never settles it is reclaimed once its lease ends.
    let lost = task(
        JobType::DataBackup,
        JobOptions::on(Queue::Default).with_timeout(Duration::from_secs(60)),
    );
    broker.enqueue(lost.clone()).await.unwrap();
    let leased = broker.dequeue(Queue::Default).await.unwrap().unwrap();
    assert!(broker.stats().await.unwrap().active >= 1);
    assert_eq!(broker.recover_expired(Utc::now()).await.unwrap(), 0);
    let expired = leased.lease_deadline(Utc::now()) + chrono::Duration::seconds(1);
    assert!(broker.recover_expired(expired).await.unwrap() >= 1);
    let info = broker.task_info(&lost.id).await.unwrap().unwrap();
    assert_eq!(info.state, TaskState::Pending);
    assert_eq!(info.retried, 1);
    assert_eq!(info.last_error.as_deref(), Some(LEASE_EXPIRED));
    let again = broker.dequeue(Queue::Default).await.unwrap().unwrap();
    assert_eq!(again.id, lost.id);
    broker.complete(&again, "restored").await.unwrap();
    assert_eq!(broker.recover_expired(expired).await.unwrap(), 0);

    // Without retries left the reclaimed task is archived.
    let last_try = task(
        JobType::DataBackup,
        JobOptions::on(Queue::Default).with_max_retry(0),
    );
    broker.enqueue(last_try.clone()).await.unwrap();
    let leased = broker.dequeue(Queue::Default).await.unwrap().unwrap();
    let expired = leased.lease_deadline(Utc::now()) + chrono::Duration::seconds(1);
    assert!(broker.recover_expired(expired).await.unwrap() >= 1);
    let info = broker.task_info(&last_try.id).await.unwrap().unwrap();
    assert_eq!(info.state, TaskState::Archived);
    assert!(broker.dequeue(Queue::Default).await.unwrap().is_none());
    assert_eq!(broker.stats().await.unwrap().scheduled, 0);
}

/// Skip the test when no Redis server is configured.
#[macro_export]
macro_rules! skip_if_no_redis {
    () => {
        if std::env::var("TEST_TRENOVA_REDIS_URL").is_err() {
            eprintln!("Skipping test: TEST_TRENOVA_REDIS_URL not set");
            return;
        }
    };
}

//! Queue scheduling, batch aggregation, and the end-to-end import flow
//! through the orchestration manager.

use std::sync::Arc;

use merchx_core::clock::ManualClock;
use merchx_core::testing::StubProvider;
use merchx_core::{Clock, ErrorKind, ProviderId};
use merchx_queue::{JobOptions, JobStatus, JobStore, ManagerJobExecutor};
use merchx_tests::{manager_over, queue_over};
use serde_json::json;
use time::Duration;

#[tokio::test]
async fn failing_job_walks_the_backoff_ladder_then_fails_terminally() {
    let clock = Arc::new(ManualClock::starting_now());
    // Every provider call fails, so every job execution fails.
    let provider = Arc::new(StubProvider::new(ProviderId::Paapi).failing(99, ErrorKind::Transient));
    let manager = manager_over(vec![provider], ProviderId::Paapi, None, clock.clone());
    let (queue, _store) = queue_over(Arc::new(ManagerJobExecutor::new(manager)), clock.clone());

    let id = queue
        .add("import_product", json!({"asin": "B0DOOMED"}), JobOptions::default())
        .await;

    // Attempt 1 of max_retries=3: rescheduled at +120s.
    queue.process_queue(None).await;
    let job = queue.get_job(id).expect("exists");
    assert_eq!(job.status, JobStatus::Pending);
    assert_eq!(job.scheduled_at, clock.now() + Duration::seconds(120));

    // Attempt 2: +240s.
    clock.advance(Duration::seconds(121));
    queue.process_queue(None).await;
    let job = queue.get_job(id).expect("exists");
    assert_eq!(job.status, JobStatus::Pending);
    assert_eq!(job.scheduled_at, clock.now() + Duration::seconds(240));

    // Attempt 3 reaches max_retries: terminal, schedule untouched.
    clock.advance(Duration::seconds(241));
    queue.process_queue(None).await;
    let job = queue.get_job(id).expect("exists");
    assert_eq!(job.status, JobStatus::Failed);
    assert_eq!(job.attempts, 3);
    assert!(job.error_message.is_some());
}

#[tokio::test]
async fn batch_progress_and_completion_flip() {
    let clock = Arc::new(ManualClock::starting_now());
    let provider = Arc::new(StubProvider::new(ProviderId::Paapi));
    let manager = manager_over(vec![provider], ProviderId::Paapi, None, clock.clone());
    let (queue, _store) = queue_over(Arc::new(ManagerJobExecutor::new(manager)), clock.clone());

    let mut jobs = Vec::new();
    for index in 0..10 {
        // Three jobs use an action the executor rejects, so they fail.
        let action = if index < 3 { "no_such_action" } else { "import_product" };
        jobs.push((action.to_string(), json!({"asin": format!("B{index:03}")})));
    }
    let options = JobOptions {
        max_retries: Some(1),
        ..JobOptions::default()
    };
    let (batch_id, ids) = queue.add_bulk(jobs, options).await;
    assert_eq!(ids.len(), 10);

    // Hold one job back so the batch stays incomplete.
    let held = *ids.last().expect("ids present");
    let mut held_job = queue.get_job(held).expect("exists");
    held_job.scheduled_at = clock.now() + Duration::seconds(600);
    queue.store().update(held_job);

    queue.process_queue(Some(20)).await;

    let status = queue.get_batch_status(&batch_id);
    assert_eq!(status.counts.total, 10);
    assert_eq!(status.counts.completed, 6);
    assert_eq!(status.counts.failed, 3);
    assert_eq!(status.counts.pending, 1);
    assert_eq!(status.progress, 90.0);
    assert!(!status.is_complete);

    // Releasing the held job completes the batch.
    clock.advance(Duration::seconds(601));
    queue.process_queue(Some(20)).await;

    let status = queue.get_batch_status(&batch_id);
    assert_eq!(status.counts.completed, 7);
    assert_eq!(status.progress, 100.0);
    assert!(status.is_complete);
}

#[tokio::test]
async fn two_limited_passes_drain_a_batch_of_five_imports() {
    let clock = Arc::new(ManualClock::starting_now());
    let provider = Arc::new(StubProvider::new(ProviderId::Paapi));
    let manager = manager_over(vec![provider], ProviderId::Paapi, None, clock.clone());
    let (queue, _store) = queue_over(Arc::new(ManagerJobExecutor::new(manager)), clock.clone());

    let jobs: Vec<(String, serde_json::Value)> = (0..5)
        .map(|index| {
            (
                String::from("import_product"),
                json!({"asin": format!("B0IMPORT{index}")}),
            )
        })
        .collect();
    let (batch_id, ids) = queue.add_bulk(jobs, JobOptions::default()).await;
    assert_eq!(ids.len(), 5);

    // Pass 1 with limit 3: exactly three jobs leave pending.
    let outcome = queue.process_queue(Some(3)).await;
    assert_eq!(outcome.report().expect("ran").processed, 3);
    let still_pending = queue
        .get_batch_jobs(&batch_id)
        .iter()
        .filter(|job| job.status == JobStatus::Pending)
        .count();
    assert_eq!(still_pending, 2);

    // Pass 2: the rest drain.
    let outcome = queue.process_queue(Some(3)).await;
    assert_eq!(outcome.report().expect("ran").processed, 2);

    let status = queue.get_batch_status(&batch_id);
    assert_eq!(status.counts.total, 5);
    assert_eq!(status.counts.completed, 5);
    assert!(status.is_complete);

    // Completed jobs carry the imported product payload.
    let job = queue.get_job(ids[0]).expect("exists");
    let result = job.result.expect("result recorded");
    assert_eq!(result["asin"], "B0IMPORT0");
}

#[tokio::test]
async fn retention_sweep_removes_only_old_terminal_jobs() {
    let clock = Arc::new(ManualClock::starting_now());
    let provider = Arc::new(StubProvider::new(ProviderId::Paapi));
    let manager = manager_over(vec![provider], ProviderId::Paapi, None, clock.clone());
    let (queue, _store) = queue_over(Arc::new(ManagerJobExecutor::new(manager)), clock.clone());

    queue
        .add("import_product", json!({"asin": "B0OLD"}), JobOptions::default())
        .await;
    queue.process_queue(None).await;

    // Still inside the retention window.
    clock.advance(Duration::days(10));
    assert_eq!(queue.cleanup_old_jobs(None), 0);

    clock.advance(Duration::days(25));
    assert_eq!(queue.cleanup_old_jobs(None), 1);
    assert_eq!(queue.statistics().counts.total, 0);
}

#[tokio::test]
async fn bulk_search_jobs_store_search_results() {
    let clock = Arc::new(ManualClock::starting_now());
    let provider = Arc::new(StubProvider::new(ProviderId::Rainforest));
    let manager = manager_over(vec![provider], ProviderId::Rainforest, None, clock.clone());
    let (queue, _store) = queue_over(Arc::new(ManagerJobExecutor::new(manager)), clock.clone());

    let id = queue
        .add("bulk_search", json!({"keyword": "usb cable"}), JobOptions::default())
        .await;
    queue.process_queue(None).await;

    let job = queue.get_job(id).expect("exists");
    assert_eq!(job.status, JobStatus::Completed);
    let result = job.result.expect("result recorded");
    assert_eq!(result["products"].as_array().expect("list").len(), 3);
}

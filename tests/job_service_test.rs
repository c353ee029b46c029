//! End-to-end service tests: scheduler, store, queue and worker pool wired
//! together with a scripted extractor standing in for the tool.

mod common;

use common::{fast_workers, start_service, wait_state, wait_terminal, ScriptedExtractor, Step};
use std::time::Duration;
use ytdl_queue::config::WorkerConfig;
use ytdl_queue::errors::{CancelError, ExtractError, SubmitError};
use ytdl_queue::models::{FailureKind, JobOptions, JobState, SubmitRequest};

const TOOL_TIMEOUT: Duration = Duration::from_secs(10);

fn request(url: &str) -> SubmitRequest {
    SubmitRequest {
        url: url.to_string(),
        options: JobOptions::default(),
    }
}

#[tokio::test]
async fn submitted_job_runs_to_success() {
    let extractor = ScriptedExtractor::new(vec![Step::succeed()]);
    let service = start_service(extractor, fast_workers(2), TOOL_TIMEOUT);

    let outcome = service
        .scheduler
        .submit(request("https://www.youtube.com/watch?v=dQw4w9WgXcQ"))
        .await
        .unwrap();
    assert!(outcome.created);

    let job = wait_terminal(&service.store, outcome.job.id, Duration::from_secs(2)).await;
    assert_eq!(job.state, JobState::Succeeded);
    assert_eq!(job.attempts, 1);
    let media = job.result.unwrap();
    assert!(media.stream_url.starts_with("https://cdn.example.com/"));
    assert_eq!(media.quality, "720p");

    assert!(service.pool.drain().await.clean);
}

#[tokio::test]
async fn concurrent_submissions_share_one_execution() {
    let extractor = ScriptedExtractor::new(vec![Step::succeed_after(Duration::from_millis(100))]);
    let service = start_service(extractor.clone(), fast_workers(2), TOOL_TIMEOUT);

    let first = service
        .scheduler
        .submit(request("https://www.youtube.com/watch?v=dQw4w9WgXcQ"))
        .await
        .unwrap();
    // Same video through a different URL shape while the first is in flight.
    let second = service
        .scheduler
        .submit(request("https://youtu.be/dQw4w9WgXcQ"))
        .await
        .unwrap();

    assert!(first.created);
    assert!(!second.created);
    assert_eq!(first.job.id, second.job.id);

    let job = wait_terminal(&service.store, first.job.id, Duration::from_secs(2)).await;
    assert_eq!(job.state, JobState::Succeeded);
    assert_eq!(extractor.invocations(), 1);

    // A resubmission after success reuses the still-fresh result without
    // another invocation.
    let reused = service
        .scheduler
        .submit(request("https://youtu.be/dQw4w9WgXcQ"))
        .await
        .unwrap();
    assert!(!reused.created);
    assert_eq!(reused.job.id, first.job.id);
    assert_eq!(extractor.invocations(), 1);

    service.pool.drain().await;
}

#[tokio::test]
async fn different_options_run_as_separate_jobs() {
    let extractor = ScriptedExtractor::new(vec![Step::succeed(), Step::succeed()]);
    let service = start_service(extractor.clone(), fast_workers(2), TOOL_TIMEOUT);

    let plain = service
        .scheduler
        .submit(request("https://youtu.be/dQw4w9WgXcQ"))
        .await
        .unwrap();
    let audio = service
        .scheduler
        .submit(SubmitRequest {
            url: "https://youtu.be/dQw4w9WgXcQ".to_string(),
            options: JobOptions {
                audio_only: true,
                ..Default::default()
            },
        })
        .await
        .unwrap();

    assert_ne!(plain.job.id, audio.job.id);
    wait_terminal(&service.store, plain.job.id, Duration::from_secs(2)).await;
    wait_terminal(&service.store, audio.job.id, Duration::from_secs(2)).await;
    assert_eq!(extractor.invocations(), 2);

    service.pool.drain().await;
}

#[tokio::test]
async fn transient_failure_retries_then_succeeds() {
    let extractor = ScriptedExtractor::new(vec![
        Step::fail(ExtractError::NetworkFailure("connection reset".into())),
        Step::succeed(),
    ]);
    let service = start_service(extractor, fast_workers(1), TOOL_TIMEOUT);

    let outcome = service
        .scheduler
        .submit(request("https://youtu.be/dQw4w9WgXcQ"))
        .await
        .unwrap();
    let job = wait_terminal(&service.store, outcome.job.id, Duration::from_secs(3)).await;

    assert_eq!(job.state, JobState::Succeeded);
    assert_eq!(job.attempts, 2);
    // The interim error is cleared by the success.
    assert!(job.error.is_none());

    service.pool.drain().await;
}

#[tokio::test]
async fn retries_stop_at_the_limit() {
    let extractor = ScriptedExtractor::new(vec![
        Step::fail(ExtractError::NetworkFailure("reset 1".into())),
        Step::fail(ExtractError::NetworkFailure("reset 2".into())),
        Step::fail(ExtractError::NetworkFailure("reset 3".into())),
        Step::fail(ExtractError::NetworkFailure("never reached".into())),
    ]);
    // retry_limit 2: three attempts total.
    let service = start_service(extractor.clone(), fast_workers(1), TOOL_TIMEOUT);

    let outcome = service
        .scheduler
        .submit(request("https://youtu.be/dQw4w9WgXcQ"))
        .await
        .unwrap();
    let job = wait_terminal(&service.store, outcome.job.id, Duration::from_secs(3)).await;

    assert_eq!(job.state, JobState::Failed);
    assert_eq!(job.attempts, 3);
    assert_eq!(extractor.invocations(), 3);
    let error = job.error.unwrap();
    assert_eq!(error.kind, FailureKind::NetworkFailure);
    assert!(error.message.contains("reset 3"));

    service.pool.drain().await;
}

#[tokio::test]
async fn invalid_target_fails_without_retry() {
    let extractor = ScriptedExtractor::new(vec![Step::fail(ExtractError::InvalidTarget(
        "video unavailable".into(),
    ))]);
    let service = start_service(extractor.clone(), fast_workers(1), TOOL_TIMEOUT);

    let outcome = service
        .scheduler
        .submit(request("https://youtu.be/dQw4w9WgXcQ"))
        .await
        .unwrap();
    let job = wait_terminal(&service.store, outcome.job.id, Duration::from_secs(2)).await;

    assert_eq!(job.state, JobState::Failed);
    assert_eq!(job.attempts, 1);
    assert_eq!(extractor.invocations(), 1);
    assert_eq!(job.error.unwrap().kind, FailureKind::InvalidTarget);

    service.pool.drain().await;
}

#[tokio::test]
async fn timeouts_retry_and_then_fail_as_timeout() {
    let extractor = ScriptedExtractor::new(vec![Step::Hang, Step::Hang]);
    let workers = WorkerConfig {
        count: 1,
        retry_limit: 1,
        retry_backoff_seconds: 0,
        shutdown_grace_seconds: 2,
    };
    // Every invocation hangs past the 50ms bound.
    let service = start_service(extractor.clone(), workers, Duration::from_millis(50));

    let outcome = service
        .scheduler
        .submit(request("https://youtu.be/dQw4w9WgXcQ"))
        .await
        .unwrap();
    let job = wait_terminal(&service.store, outcome.job.id, Duration::from_secs(3)).await;

    assert_eq!(job.state, JobState::Failed);
    assert_eq!(job.attempts, 2);
    assert_eq!(extractor.invocations(), 2);
    assert_eq!(job.error.unwrap().kind, FailureKind::Timeout);

    service.pool.drain().await;
}

#[tokio::test]
async fn pending_job_cancels_without_ever_running() {
    let extractor = ScriptedExtractor::new(vec![]);
    // No workers: submissions stay pending.
    let service = start_service(extractor.clone(), fast_workers(0), TOOL_TIMEOUT);

    let outcome = service
        .scheduler
        .submit(request("https://youtu.be/dQw4w9WgXcQ"))
        .await
        .unwrap();
    assert_eq!(outcome.job.state, JobState::Pending);

    let cancelled = service.scheduler.cancel(outcome.job.id).await.unwrap();
    assert_eq!(cancelled.state, JobState::Failed);
    assert_eq!(cancelled.attempts, 0);
    assert_eq!(cancelled.error.unwrap().kind, FailureKind::Cancelled);
    assert_eq!(extractor.invocations(), 0);
    assert!(service.queue.is_empty());

    assert!(service.pool.drain().await.clean);
}

#[tokio::test]
async fn running_job_cancels_well_before_its_timeout() {
    let extractor = ScriptedExtractor::new(vec![Step::Hang]);
    let service = start_service(extractor, fast_workers(1), Duration::from_secs(60));

    let outcome = service
        .scheduler
        .submit(request("https://youtu.be/dQw4w9WgXcQ"))
        .await
        .unwrap();
    wait_state(
        &service.store,
        outcome.job.id,
        JobState::Running,
        Duration::from_secs(2),
    )
    .await;

    let accepted = service.scheduler.cancel(outcome.job.id).await.unwrap();
    assert!(accepted.cancel_requested);

    // Terminal long before the 60s invocation bound.
    let job = wait_terminal(&service.store, outcome.job.id, Duration::from_secs(2)).await;
    assert_eq!(job.state, JobState::Failed);
    assert_eq!(job.error.unwrap().kind, FailureKind::Cancelled);

    // A second cancel reports the job as already settled.
    assert_eq!(
        service.scheduler.cancel(outcome.job.id).await.unwrap_err(),
        CancelError::AlreadyTerminal
    );

    service.pool.drain().await;
}

#[tokio::test]
async fn single_worker_preserves_submission_order() {
    let extractor = ScriptedExtractor::new(vec![
        Step::succeed_after(Duration::from_millis(30)),
        Step::succeed_after(Duration::from_millis(30)),
        Step::succeed_after(Duration::from_millis(30)),
    ]);
    let service = start_service(extractor, fast_workers(1), TOOL_TIMEOUT);

    let mut ids = Vec::new();
    for video in ["aaaaaaaaaaa", "bbbbbbbbbbb", "ccccccccccc"] {
        let outcome = service
            .scheduler
            .submit(request(&format!("https://youtu.be/{video}")))
            .await
            .unwrap();
        ids.push(outcome.job.id);
    }

    let mut completed = Vec::new();
    for id in &ids {
        let job = wait_terminal(&service.store, *id, Duration::from_secs(3)).await;
        completed.push(job.completed_at.unwrap());
    }
    assert!(completed[0] <= completed[1]);
    assert!(completed[1] <= completed[2]);

    service.pool.drain().await;
}

#[tokio::test]
async fn drain_waits_for_in_flight_work() {
    let extractor = ScriptedExtractor::new(vec![Step::succeed_after(Duration::from_millis(100))]);
    let service = start_service(extractor, fast_workers(1), TOOL_TIMEOUT);

    let outcome = service
        .scheduler
        .submit(request("https://youtu.be/dQw4w9WgXcQ"))
        .await
        .unwrap();
    wait_state(
        &service.store,
        outcome.job.id,
        JobState::Running,
        Duration::from_secs(2),
    )
    .await;

    let report = service.pool.drain().await;
    assert!(report.clean);
    assert_eq!(report.aborted, 0);

    let job = service.store.view(outcome.job.id).await.unwrap();
    assert_eq!(job.state, JobState::Succeeded);
}

#[tokio::test]
async fn drain_kills_work_that_outlives_the_grace_period() {
    let extractor = ScriptedExtractor::new(vec![Step::Hang]);
    let workers = WorkerConfig {
        count: 1,
        retry_limit: 0,
        retry_backoff_seconds: 0,
        shutdown_grace_seconds: 0,
    };
    let service = start_service(extractor, workers, Duration::from_secs(60));

    let outcome = service
        .scheduler
        .submit(request("https://youtu.be/dQw4w9WgXcQ"))
        .await
        .unwrap();
    wait_state(
        &service.store,
        outcome.job.id,
        JobState::Running,
        Duration::from_secs(2),
    )
    .await;

    let report = service.pool.drain().await;
    assert!(!report.clean);
    assert_eq!(report.aborted, 1);

    let job = service.store.view(outcome.job.id).await.unwrap();
    assert_eq!(job.state, JobState::Failed);
    assert_eq!(job.error.unwrap().kind, FailureKind::Cancelled);
}

#[tokio::test]
async fn submissions_after_drain_are_refused() {
    let extractor = ScriptedExtractor::new(vec![]);
    let service = start_service(extractor, fast_workers(1), TOOL_TIMEOUT);

    service.pool.drain().await;

    let err = service
        .scheduler
        .submit(request("https://youtu.be/dQw4w9WgXcQ"))
        .await
        .unwrap_err();
    assert_eq!(err, SubmitError::ShuttingDown);
}

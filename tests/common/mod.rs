//! Shared fixtures for integration tests: a scripted extractor and a
//! fully wired service with fast timings.

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::Utc;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use ytdl_queue::config::{JobConfig, WorkerConfig};
use ytdl_queue::errors::ExtractError;
use ytdl_queue::extractor::{ExtractRequest, Extractor};
use ytdl_queue::jobs::{CancelRegistry, JobScheduler, JobStore, PendingQueue, WorkerPool};
use ytdl_queue::models::{JobView, ResolvedMedia};

/// One scripted invocation outcome, consumed in order.
pub enum Step {
    Succeed { delay: Duration, media: ResolvedMedia },
    Fail { delay: Duration, error: ExtractError },
    /// Block until cancelled or the caller's timeout elapses.
    Hang,
}

impl Step {
    pub fn succeed() -> Self {
        Step::Succeed {
            delay: Duration::ZERO,
            media: sample_media("dQw4w9WgXcQ"),
        }
    }

    pub fn succeed_after(delay: Duration) -> Self {
        Step::Succeed {
            delay,
            media: sample_media("dQw4w9WgXcQ"),
        }
    }

    pub fn fail(error: ExtractError) -> Self {
        Step::Fail {
            delay: Duration::ZERO,
            error,
        }
    }
}

/// Extractor that replays a script instead of spawning processes. Runs
/// out of script entries, it succeeds immediately.
pub struct ScriptedExtractor {
    steps: Mutex<VecDeque<Step>>,
    invocations: Mutex<usize>,
}

impl ScriptedExtractor {
    pub fn new(steps: Vec<Step>) -> Arc<Self> {
        Arc::new(Self {
            steps: Mutex::new(steps.into()),
            invocations: Mutex::new(0),
        })
    }

    pub fn invocations(&self) -> usize {
        *self.invocations.lock().unwrap()
    }
}

#[async_trait]
impl Extractor for ScriptedExtractor {
    async fn run(
        &self,
        _request: &ExtractRequest,
        timeout: Duration,
        cancel: CancellationToken,
    ) -> Result<ResolvedMedia, ExtractError> {
        *self.invocations.lock().unwrap() += 1;
        let step = self.steps.lock().unwrap().pop_front();
        match step {
            Some(Step::Succeed { delay, media }) => {
                if !delay.is_zero() {
                    tokio::select! {
                        _ = tokio::time::sleep(delay) => {}
                        _ = cancel.cancelled() => return Err(ExtractError::Cancelled),
                    }
                }
                Ok(media)
            }
            Some(Step::Fail { delay, error }) => {
                if !delay.is_zero() {
                    tokio::select! {
                        _ = tokio::time::sleep(delay) => {}
                        _ = cancel.cancelled() => return Err(ExtractError::Cancelled),
                    }
                }
                Err(error)
            }
            Some(Step::Hang) => {
                tokio::select! {
                    _ = cancel.cancelled() => Err(ExtractError::Cancelled),
                    _ = tokio::time::sleep(timeout) => Err(ExtractError::Timeout(timeout)),
                }
            }
            None => Ok(sample_media("dQw4w9WgXcQ")),
        }
    }

    fn name(&self) -> &'static str {
        "scripted"
    }
}

pub fn sample_media(video_id: &str) -> ResolvedMedia {
    ResolvedMedia {
        video_id: Some(video_id.to_string()),
        stream_url: format!("https://cdn.example.com/{video_id}?expire=1893456000"),
        expires_at: Utc::now() + chrono::Duration::hours(2),
        quality: "720p".to_string(),
        mime: "video/mp4".to_string(),
        title: Some("sample clip".to_string()),
        duration_seconds: Some(212.0),
    }
}

/// Worker settings tuned for tests: two workers, immediate retries, a
/// short grace period.
pub fn fast_workers(count: usize) -> WorkerConfig {
    WorkerConfig {
        count,
        retry_limit: 2,
        retry_backoff_seconds: 0,
        shutdown_grace_seconds: 2,
    }
}

pub struct TestService {
    pub store: JobStore,
    pub queue: Arc<PendingQueue>,
    pub scheduler: JobScheduler,
    pub pool: WorkerPool,
}

/// Wire up store, queue, scheduler and worker pool the way the binary
/// does, with the given extractor standing in for the real tool.
pub fn start_service(
    extractor: Arc<dyn Extractor>,
    workers: WorkerConfig,
    timeout: Duration,
) -> TestService {
    let store = JobStore::new();
    let queue = Arc::new(PendingQueue::new());
    let cancellations = CancelRegistry::new();
    let scheduler = JobScheduler::new(
        store.clone(),
        queue.clone(),
        cancellations.clone(),
        JobConfig::default(),
    );
    let pool = WorkerPool::new(
        store.clone(),
        queue.clone(),
        cancellations,
        extractor,
        workers,
        timeout,
    );
    pool.spawn_workers();
    TestService {
        store,
        queue,
        scheduler,
        pool,
    }
}

/// Poll until the job reaches a terminal state.
pub async fn wait_terminal(store: &JobStore, id: Uuid, within: Duration) -> JobView {
    let deadline = tokio::time::Instant::now() + within;
    loop {
        if let Some(view) = store.view(id).await {
            if view.state.is_terminal() {
                return view;
            }
        }
        if tokio::time::Instant::now() >= deadline {
            panic!("job {id} did not reach a terminal state within {within:?}");
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

/// Poll until the job is observed in the given state.
pub async fn wait_state(
    store: &JobStore,
    id: Uuid,
    state: ytdl_queue::models::JobState,
    within: Duration,
) -> JobView {
    let deadline = tokio::time::Instant::now() + within;
    loop {
        if let Some(view) = store.view(id).await {
            if view.state == state {
                return view;
            }
        }
        if tokio::time::Instant::now() >= deadline {
            panic!("job {id} did not reach {state} within {within:?}");
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

//! Worker pool: fixed set of executors draining the pending queue.
//!
//! Each worker claims one job at a time, runs the extractor without
//! holding any store lock, then records the outcome. Transient failures
//! requeue with exponential backoff until the retry limit; cancellation
//! and shutdown kill the in-flight invocation and wait for the kill to be
//! acknowledged before the job is marked failed.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::WorkerConfig;
use crate::errors::{ExtractError, StoreError};
use crate::extractor::{ExtractRequest, Extractor};
use crate::jobs::queue::PendingQueue;
use crate::jobs::store::{JobStore, Transition};
use crate::models::{FailureKind, JobFailure};

/// Retries never back off longer than this.
const MAX_RETRY_DELAY: Duration = Duration::from_secs(300);

/// After the grace period expires and kills are signalled, how long the
/// pool waits for workers to acknowledge them.
const KILL_ACK_WAIT: Duration = Duration::from_secs(10);

/// Cancellation tokens for in-flight invocations, keyed by job id.
///
/// Registered just after a worker claims a job, removed when the
/// invocation returns. Firing a token kills the underlying process.
#[derive(Clone, Default)]
pub struct CancelRegistry {
    inner: Arc<RwLock<HashMap<Uuid, CancellationToken>>>,
}

impl CancelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn register(&self, id: Uuid) -> CancellationToken {
        let token = CancellationToken::new();
        self.inner.write().await.insert(id, token.clone());
        token
    }

    pub async fn unregister(&self, id: Uuid) {
        self.inner.write().await.remove(&id);
    }

    /// Fire the token for one job. Returns whether an in-flight invocation
    /// was actually signalled.
    pub async fn cancel(&self, id: Uuid) -> bool {
        match self.inner.read().await.get(&id) {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    /// Fire every registered token. Returns how many were signalled.
    pub async fn cancel_all(&self) -> usize {
        let inner = self.inner.read().await;
        for token in inner.values() {
            token.cancel();
        }
        inner.len()
    }

    pub async fn len(&self) -> usize {
        self.inner.read().await.len()
    }
}

/// Outcome of draining the pool at shutdown.
#[derive(Debug, Clone, Copy)]
pub struct DrainReport {
    /// All in-flight work finished within the grace period.
    pub clean: bool,
    /// Invocations that had to be killed.
    pub aborted: usize,
}

#[derive(Clone)]
struct WorkerContext {
    store: JobStore,
    queue: Arc<PendingQueue>,
    cancellations: CancelRegistry,
    extractor: Arc<dyn Extractor>,
    config: WorkerConfig,
    timeout: Duration,
}

pub struct WorkerPool {
    context: WorkerContext,
    tracker: TaskTracker,
}

impl WorkerPool {
    pub fn new(
        store: JobStore,
        queue: Arc<PendingQueue>,
        cancellations: CancelRegistry,
        extractor: Arc<dyn Extractor>,
        config: WorkerConfig,
        timeout: Duration,
    ) -> Self {
        Self {
            context: WorkerContext {
                store,
                queue,
                cancellations,
                extractor,
                config,
                timeout,
            },
            tracker: TaskTracker::new(),
        }
    }

    /// Start the configured number of executors.
    pub fn spawn_workers(&self) {
        for worker_id in 0..self.context.config.count {
            let ctx = self.context.clone();
            self.tracker.spawn(worker_loop(worker_id, ctx));
        }
        self.tracker.close();
        info!(
            count = self.context.config.count,
            extractor = self.context.extractor.name(),
            "worker pool started"
        );
    }

    /// Stop taking new work and wait for in-flight extractions.
    ///
    /// Within the grace period the drain is clean. Past it, every
    /// registered invocation is killed, the pool waits for the kills to be
    /// acknowledged, and the report comes back not clean.
    pub async fn drain(&self) -> DrainReport {
        self.context.queue.close();
        let grace = self.context.config.shutdown_grace();
        info!(grace_seconds = grace.as_secs(), "draining worker pool");

        if tokio::time::timeout(grace, self.tracker.wait()).await.is_ok() {
            info!("worker pool drained cleanly");
            return DrainReport {
                clean: true,
                aborted: 0,
            };
        }

        let aborted = self.context.cancellations.cancel_all().await;
        warn!(
            in_flight = aborted,
            "grace period expired, killing in-flight extractions"
        );
        if tokio::time::timeout(KILL_ACK_WAIT, self.tracker.wait())
            .await
            .is_err()
        {
            error!("workers did not stop after kill signals");
        }
        DrainReport {
            clean: false,
            aborted,
        }
    }
}

async fn worker_loop(worker_id: usize, ctx: WorkerContext) {
    debug!(worker_id, "worker started");
    while let Some(job_id) = ctx.queue.pop().await {
        run_job(worker_id, &ctx, job_id).await;
    }
    debug!(worker_id, "worker stopped");
}

async fn run_job(worker_id: usize, ctx: &WorkerContext, job_id: Uuid) {
    // Claim the job. Jobs cancelled or swept while queued fail the claim
    // and are skipped; the store already holds their final state.
    let job = match ctx.store.update(job_id, Transition::Start).await {
        Ok(job) => job,
        Err(StoreError::NotFound) => {
            debug!(worker_id, %job_id, "queued job no longer in store, skipping");
            return;
        }
        Err(_) => {
            debug!(worker_id, %job_id, "queued job not claimable, skipping");
            return;
        }
    };
    info!(
        worker_id,
        job_id = %job.id,
        target = %job.target,
        attempt = job.attempts,
        "starting extraction"
    );

    let cancel = ctx.cancellations.register(job_id).await;
    // A cancel request may have landed between the claim and the token
    // registration; fold it into the token.
    if let Some(current) = ctx.store.get(job_id).await {
        if current.cancel_requested {
            cancel.cancel();
        }
    }

    let request = ExtractRequest {
        target: job.target.clone(),
        video_id: job.video_id.clone(),
        options: job.options.clone(),
    };
    let started = std::time::Instant::now();
    let outcome = ctx.extractor.run(&request, ctx.timeout, cancel.clone()).await;
    ctx.cancellations.unregister(job_id).await;
    let elapsed_ms = started.elapsed().as_millis() as u64;

    match outcome {
        Ok(media) => match ctx.store.update(job_id, Transition::Succeed(media)).await {
            Ok(done) => info!(
                worker_id,
                job_id = %done.id,
                elapsed_ms,
                quality = %done.result.as_ref().map(|m| m.quality.as_str()).unwrap_or(""),
                "extraction succeeded"
            ),
            Err(e) => error!(worker_id, %job_id, error = %e, "failed to record success"),
        },
        Err(err) => {
            if cancel.is_cancelled() || err == ExtractError::Cancelled {
                let reason = JobFailure::new(FailureKind::Cancelled, "cancelled during extraction");
                match ctx.store.update(job_id, Transition::Cancel(reason)).await {
                    Ok(_) => info!(worker_id, %job_id, elapsed_ms, "extraction cancelled"),
                    Err(e) => {
                        error!(worker_id, %job_id, error = %e, "failed to record cancellation")
                    }
                }
                return;
            }

            let failure = JobFailure::new(err.failure_kind(), err.to_string());
            // attempts on the claim snapshot is this attempt's number.
            if err.is_retryable() && job.attempts <= ctx.config.retry_limit {
                requeue_with_backoff(worker_id, ctx, job_id, job.attempts, failure).await;
            } else {
                match ctx.store.update(job_id, Transition::Fail(failure.clone())).await {
                    Ok(done) => warn!(
                        worker_id,
                        job_id = %done.id,
                        kind = ?failure.kind,
                        attempts = done.attempts,
                        elapsed_ms,
                        "job failed terminally: {}",
                        failure.message
                    ),
                    Err(e) => error!(worker_id, %job_id, error = %e, "failed to record failure"),
                }
            }
        }
    }
}

async fn requeue_with_backoff(
    worker_id: usize,
    ctx: &WorkerContext,
    job_id: Uuid,
    attempt: u32,
    failure: JobFailure,
) {
    match ctx
        .store
        .update(job_id, Transition::Requeue(failure.clone()))
        .await
    {
        Ok(_) => {
            let delay = retry_delay(ctx.config.backoff_base(), attempt);
            warn!(
                worker_id,
                %job_id,
                attempt,
                delay_ms = delay.as_millis() as u64,
                "retryable failure, requeueing: {}",
                failure.message
            );
            let queue = ctx.queue.clone();
            tokio::spawn(async move {
                tokio::time::sleep(delay).await;
                if queue.push(job_id).is_err() {
                    debug!(%job_id, "queue closed before retry could be scheduled");
                }
            });
        }
        Err(e) => error!(worker_id, %job_id, error = %e, "failed to requeue job"),
    }
}

/// Exponential backoff with +/-50% jitter so synchronized retries spread
/// out: base * 2^(attempt-1), capped.
fn retry_delay(base: Duration, attempt: u32) -> Duration {
    let doubled = base.saturating_mul(2u32.saturating_pow(attempt.saturating_sub(1)));
    let capped = doubled.min(MAX_RETRY_DELAY);
    capped.mul_f64(0.5 + fastrand::f64())
}

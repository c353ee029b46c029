//! Job scheduler: the service's front door.
//!
//! Validates targets synchronously, deduplicates submissions by
//! fingerprint, exposes status reads and drives cancellation. All real
//! state lives in the [`JobStore`]; the scheduler is cheap to clone and
//! share with the web layer.

use std::sync::Arc;
use tracing::{debug, info, warn};
use url::Url;
use uuid::Uuid;

use crate::config::JobConfig;
use crate::errors::{CancelError, StoreError, SubmitError};
use crate::jobs::queue::PendingQueue;
use crate::jobs::store::{CancelApplied, JobCounts, JobStore, Transition};
use crate::jobs::worker::CancelRegistry;
use crate::models::{
    self, FailureKind, Fingerprint, JobFailure, JobView, SubmitOutcome, SubmitRequest,
};

#[derive(Clone)]
pub struct JobScheduler {
    store: JobStore,
    queue: Arc<PendingQueue>,
    cancellations: CancelRegistry,
    config: JobConfig,
}

impl JobScheduler {
    pub fn new(
        store: JobStore,
        queue: Arc<PendingQueue>,
        cancellations: CancelRegistry,
        config: JobConfig,
    ) -> Self {
        Self {
            store,
            queue,
            cancellations,
            config,
        }
    }

    /// Accept a submission. Invalid targets are rejected here, before any
    /// job record exists. Duplicates of in-flight or still-fresh work
    /// attach to the existing job instead of creating a new one.
    pub async fn submit(&self, request: SubmitRequest) -> Result<SubmitOutcome, SubmitError> {
        let target = request.url.trim();
        if target.is_empty() {
            return Err(SubmitError::EmptyTarget);
        }
        let parsed = Url::parse(target)
            .map_err(|e| SubmitError::invalid_target(format!("not a valid url: {e}")))?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(SubmitError::invalid_target(format!(
                "unsupported scheme '{}'",
                parsed.scheme()
            )));
        }
        if parsed.host_str().is_none() {
            return Err(SubmitError::invalid_target("missing host"));
        }

        let video_id = models::extract_video_id(target);
        let canonical = models::canonical_target(&parsed, video_id.as_deref());
        let fingerprint = Fingerprint::compute(&canonical, &request.options);

        if let Some(existing) = self
            .store
            .find_reusable(&fingerprint, self.config.freshness_grace())
            .await
        {
            debug!(job_id = %existing.id, state = %existing.state, "submission matched existing job");
            return Ok(SubmitOutcome {
                job: existing.view(),
                created: false,
            });
        }

        match self
            .store
            .create(target.to_string(), video_id, request.options, fingerprint)
            .await
        {
            Ok(job) => {
                if self.queue.push(job.id).is_err() {
                    // Shutdown raced the submission; retire the record we
                    // just made so nothing dangles.
                    let reason = JobFailure::new(FailureKind::Cancelled, "service shutting down");
                    let _ = self.store.update(job.id, Transition::Cancel(reason)).await;
                    return Err(SubmitError::ShuttingDown);
                }
                info!(job_id = %job.id, target = %job.target, "job accepted");
                Ok(SubmitOutcome {
                    job: job.view(),
                    created: true,
                })
            }
            Err(StoreError::AlreadyExists { existing }) => {
                // Lost a concurrent create for the same fingerprint;
                // attach to the winner.
                debug!(job_id = %existing, "submission lost create race, attaching");
                match self.store.view(existing).await {
                    Some(view) => Ok(SubmitOutcome {
                        job: view,
                        created: false,
                    }),
                    None => Err(SubmitError::internal("deduplicated job vanished")),
                }
            }
            Err(other) => {
                warn!(error = %other, "unexpected store error during create");
                Err(SubmitError::internal(other.to_string()))
            }
        }
    }

    pub async fn status(&self, id: Uuid) -> Option<JobView> {
        self.store.view(id).await
    }

    pub async fn list(&self) -> Vec<JobView> {
        self.store.list_views().await
    }

    pub async fn stats(&self) -> JobCounts {
        self.store.counts().await
    }

    /// Cancel a job. Pending jobs finish immediately without ever running;
    /// running jobs get their invocation signalled and are finished by the
    /// worker once the kill is acknowledged.
    pub async fn cancel(&self, id: Uuid) -> Result<JobView, CancelError> {
        let reason = JobFailure::new(FailureKind::Cancelled, "cancelled by request");
        match self.store.cancel(id, reason).await? {
            CancelApplied::Finished(job) => {
                self.queue.remove(id);
                info!(job_id = %id, "pending job cancelled");
                Ok(job.view())
            }
            CancelApplied::Signalled(job) => {
                let signalled = self.cancellations.cancel(id).await;
                info!(job_id = %id, signalled, "cancellation requested for running job");
                Ok(job.view())
            }
        }
    }
}

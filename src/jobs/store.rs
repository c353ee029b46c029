//! In-memory job store.
//!
//! Single owner of all job records. Every mutation goes through one write
//! lock, which is what makes fingerprint deduplication and state
//! transitions atomic. Records are lost on restart; clients resubmit.

use chrono::Utc;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{broadcast, RwLock};
use uuid::Uuid;

use crate::errors::{CancelError, StoreError};
use crate::models::{
    Fingerprint, Job, JobEvent, JobFailure, JobOptions, JobState, JobView, ResolvedMedia,
};

pub type EventSender = broadcast::Sender<JobEvent>;
pub type EventReceiver = broadcast::Receiver<JobEvent>;

const EVENT_CHANNEL_CAPACITY: usize = 1024;

/// Validated state transitions applied through [`JobStore::update`].
#[derive(Debug, Clone)]
pub enum Transition {
    /// Pending -> Running: a worker claims the job for one attempt.
    Start,
    /// Running -> Succeeded with the resolved payload.
    Succeed(ResolvedMedia),
    /// Running -> Failed, terminally.
    Fail(JobFailure),
    /// Running -> Pending for another attempt. The failure is retained so
    /// status reads show the most recent error while the job waits.
    Requeue(JobFailure),
    /// Pending or Running -> Failed with a cancellation reason.
    Cancel(JobFailure),
}

impl Transition {
    fn name(&self) -> &'static str {
        match self {
            Transition::Start => "start",
            Transition::Succeed(_) => "succeed",
            Transition::Fail(_) => "fail",
            Transition::Requeue(_) => "requeue",
            Transition::Cancel(_) => "cancel",
        }
    }
}

/// How an atomic cancellation landed.
#[derive(Debug, Clone)]
pub enum CancelApplied {
    /// The job was still pending and is now terminally failed.
    Finished(Job),
    /// The job is running; it was flagged and the caller should signal the
    /// in-flight invocation.
    Signalled(Job),
}

/// Per-state job counts for health reporting.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct JobCounts {
    pub pending: usize,
    pub running: usize,
    pub succeeded: usize,
    pub failed: usize,
}

impl JobCounts {
    pub fn total(&self) -> usize {
        self.pending + self.running + self.succeeded + self.failed
    }
}

#[derive(Debug, Default)]
struct StoreInner {
    jobs: HashMap<Uuid, Job>,
    /// Latest job per fingerprint. Repointed only when the holder is
    /// terminal, so at most one non-terminal job exists per fingerprint.
    by_fingerprint: HashMap<Fingerprint, Uuid>,
}

#[derive(Clone)]
pub struct JobStore {
    inner: Arc<RwLock<StoreInner>>,
    events: EventSender,
}

impl Default for JobStore {
    fn default() -> Self {
        Self::new()
    }
}

impl JobStore {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            inner: Arc::new(RwLock::new(StoreInner::default())),
            events,
        }
    }

    pub fn subscribe(&self) -> EventReceiver {
        self.events.subscribe()
    }

    /// Create a new pending job, failing if a non-terminal job already
    /// holds the same fingerprint. Check and insert happen under one lock.
    pub async fn create(
        &self,
        target: String,
        video_id: Option<String>,
        options: JobOptions,
        fingerprint: Fingerprint,
    ) -> Result<Job, StoreError> {
        let job = {
            let mut inner = self.inner.write().await;
            if let Some(existing_id) = inner.by_fingerprint.get(&fingerprint) {
                if let Some(existing) = inner.jobs.get(existing_id) {
                    if !existing.is_terminal() {
                        return Err(StoreError::AlreadyExists {
                            existing: existing.id,
                        });
                    }
                }
            }
            let job = Job::new(target, video_id, options, fingerprint.clone());
            inner.by_fingerprint.insert(fingerprint, job.id);
            inner.jobs.insert(job.id, job.clone());
            job
        };
        self.publish(&job);
        Ok(job)
    }

    pub async fn get(&self, id: Uuid) -> Option<Job> {
        self.inner.read().await.jobs.get(&id).cloned()
    }

    pub async fn view(&self, id: Uuid) -> Option<JobView> {
        self.inner.read().await.jobs.get(&id).map(Job::view)
    }

    /// Job currently holding the fingerprint, if it can absorb a new
    /// submission: any non-terminal job, or a succeeded one whose result
    /// is still fresh under `grace`.
    pub async fn find_reusable(
        &self,
        fingerprint: &Fingerprint,
        grace: chrono::Duration,
    ) -> Option<Job> {
        let inner = self.inner.read().await;
        let id = inner.by_fingerprint.get(fingerprint)?;
        let job = inner.jobs.get(id)?;
        if !job.is_terminal() || job.is_fresh(grace, Utc::now()) {
            return Some(job.clone());
        }
        None
    }

    /// Apply a state transition. Returns the updated snapshot, or
    /// [`StoreError::InvalidTransition`] when the job's current state does
    /// not admit it. Terminal jobs admit nothing.
    pub async fn update(&self, id: Uuid, transition: Transition) -> Result<Job, StoreError> {
        let snapshot = {
            let mut inner = self.inner.write().await;
            let job = inner.jobs.get_mut(&id).ok_or(StoreError::NotFound)?;
            apply(job, transition)?;
            job.clone()
        };
        self.publish(&snapshot);
        Ok(snapshot)
    }

    /// Atomic cancellation: pending jobs finish immediately, running jobs
    /// are flagged for the caller to signal. Read and mutation happen
    /// under one lock so a worker claim cannot slip in between.
    pub async fn cancel(&self, id: Uuid, reason: JobFailure) -> Result<CancelApplied, CancelError> {
        let applied = {
            let mut inner = self.inner.write().await;
            let job = inner.jobs.get_mut(&id).ok_or(CancelError::NotFound)?;
            if job.is_terminal() {
                return Err(CancelError::AlreadyTerminal);
            }
            job.cancel_requested = true;
            if job.state == JobState::Pending {
                job.state = JobState::Failed;
                job.error = Some(reason);
                job.completed_at = Some(Utc::now());
                CancelApplied::Finished(job.clone())
            } else {
                CancelApplied::Signalled(job.clone())
            }
        };
        if let CancelApplied::Finished(job) = &applied {
            self.publish(job);
        }
        Ok(applied)
    }

    pub async fn list_views(&self) -> Vec<JobView> {
        let inner = self.inner.read().await;
        let mut views: Vec<JobView> = inner.jobs.values().map(Job::view).collect();
        views.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        views
    }

    pub async fn counts(&self) -> JobCounts {
        let inner = self.inner.read().await;
        let mut counts = JobCounts::default();
        for job in inner.jobs.values() {
            match job.state {
                JobState::Pending => counts.pending += 1,
                JobState::Running => counts.running += 1,
                JobState::Succeeded => counts.succeeded += 1,
                JobState::Failed => counts.failed += 1,
            }
        }
        counts
    }

    pub async fn len(&self) -> usize {
        self.inner.read().await.jobs.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.inner.read().await.jobs.is_empty()
    }

    /// Remove terminal jobs that completed more than `max_age` ago.
    /// Returns how many were swept.
    pub async fn cleanup_finished(&self, max_age: chrono::Duration) -> usize {
        let cutoff = Utc::now() - max_age;
        let mut inner = self.inner.write().await;
        let expired: Vec<(Uuid, Fingerprint)> = inner
            .jobs
            .values()
            .filter(|job| {
                job.is_terminal() && job.completed_at.map(|at| at < cutoff).unwrap_or(false)
            })
            .map(|job| (job.id, job.fingerprint.clone()))
            .collect();
        for (id, fingerprint) in &expired {
            inner.jobs.remove(id);
            if inner.by_fingerprint.get(fingerprint) == Some(id) {
                inner.by_fingerprint.remove(fingerprint);
            }
        }
        expired.len()
    }

    fn publish(&self, job: &Job) {
        // Nobody listening is fine.
        let _ = self.events.send(JobEvent {
            job_id: job.id,
            state: job.state,
            attempts: job.attempts,
            updated_at: Utc::now(),
        });
    }
}

fn apply(job: &mut Job, transition: Transition) -> Result<(), StoreError> {
    use JobState::*;
    match (transition, job.state) {
        (Transition::Start, Pending) => {
            job.state = Running;
            job.attempts += 1;
            job.started_at = Some(Utc::now());
        }
        (Transition::Succeed(media), Running) => {
            job.state = Succeeded;
            job.result = Some(media);
            job.error = None;
            job.completed_at = Some(Utc::now());
        }
        (Transition::Fail(failure), Running) => {
            job.state = Failed;
            job.error = Some(failure);
            job.completed_at = Some(Utc::now());
        }
        (Transition::Requeue(failure), Running) => {
            job.state = Pending;
            job.error = Some(failure);
        }
        (Transition::Cancel(reason), Pending | Running) => {
            job.state = Failed;
            job.error = Some(reason);
            job.completed_at = Some(Utc::now());
            job.cancel_requested = true;
        }
        (other, from) => {
            return Err(StoreError::InvalidTransition {
                id: job.id,
                from,
                attempted: other.name(),
            })
        }
    }
    Ok(())
}

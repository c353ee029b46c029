//! Core data model for download jobs.
//!
//! A [`Job`] is the unit of work tracked by the service: one media target
//! plus its extraction options, identified by a [`Fingerprint`] so repeated
//! submissions of the same work coalesce onto one record.

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::sync::OnceLock;
use url::Url;
use uuid::Uuid;

/// Default height threshold that earns the large format-scoring bonus.
pub const DEFAULT_MIN_HEIGHT: u32 = 720;

static VIDEO_ID_RE: OnceLock<Regex> = OnceLock::new();

/// Extract the 11-character video id from the common URL shapes:
/// `watch?v=`, `youtu.be/` and `/shorts/`.
pub fn extract_video_id(url: &str) -> Option<String> {
    let re = VIDEO_ID_RE.get_or_init(|| {
        Regex::new(r"(?:v=|be/|shorts/)([\w-]{11})").expect("video id pattern is valid")
    });
    re.captures(url).map(|caps| caps[1].to_string())
}

/// Canonical form of a target used for fingerprinting.
///
/// Targets with a recognizable video id collapse to `yt:<id>` so that
/// `youtu.be/X` and `watch?v=X` deduplicate to the same job. Anything else
/// uses the normalized URL as parsed.
pub fn canonical_target(url: &Url, video_id: Option<&str>) -> String {
    match video_id {
        Some(id) => format!("yt:{id}"),
        None => url.as_str().trim_end_matches('/').to_string(),
    }
}

/// Identity of a piece of work: hash of the canonical target plus every
/// option that changes the extraction outcome.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Fingerprint(String);

impl Fingerprint {
    pub fn compute(canonical_target: &str, options: &JobOptions) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(canonical_target.as_bytes());
        hasher.update(b"\n");
        hasher.update(options.canonical_string().as_bytes());
        let digest = hasher.finalize();
        let hex: String = digest.iter().map(|b| format!("{b:02x}")).collect();
        Fingerprint(hex)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Options that shape what the extractor resolves for a target.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobOptions {
    /// Explicit format selector passed straight to the tool, bypassing
    /// progressive-format scoring.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub format: Option<String>,
    /// Resolve an audio-only stream instead of a progressive video format.
    #[serde(default)]
    pub audio_only: bool,
    /// Height threshold that earns the scoring bonus. Defaults to 720.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_height: Option<u32>,
}

impl JobOptions {
    pub fn effective_min_height(&self) -> u32 {
        self.min_height.unwrap_or(DEFAULT_MIN_HEIGHT)
    }

    /// Stable textual form folded into the fingerprint.
    fn canonical_string(&self) -> String {
        format!(
            "format={};audio_only={};min_height={}",
            self.format.as_deref().unwrap_or(""),
            self.audio_only,
            self.min_height.map(|h| h.to_string()).unwrap_or_default(),
        )
    }
}

/// Lifecycle of a job. `Succeeded` and `Failed` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    Pending,
    Running,
    Succeeded,
    Failed,
}

impl JobState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobState::Succeeded | JobState::Failed)
    }
}

impl std::fmt::Display for JobState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            JobState::Pending => "pending",
            JobState::Running => "running",
            JobState::Succeeded => "succeeded",
            JobState::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Failure classification surfaced to clients and used for retry decisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    Timeout,
    ToolNotFound,
    InvalidTarget,
    NetworkFailure,
    Cancelled,
    Unknown,
}

/// Terminal (or most recent) failure attached to a job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobFailure {
    pub kind: FailureKind,
    pub message: String,
}

impl JobFailure {
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

/// Payload of a successful extraction: a direct stream URL plus the
/// metadata clients need to play it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolvedMedia {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub video_id: Option<String>,
    pub stream_url: String,
    /// Instant the resolved URL stops being usable.
    pub expires_at: DateTime<Utc>,
    pub quality: String,
    pub mime: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_seconds: Option<f64>,
}

/// A tracked download job. Owned by the job store; everything outside the
/// store works on cloned snapshots.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: Uuid,
    pub fingerprint: Fingerprint,
    /// Target URL exactly as submitted.
    pub target: String,
    pub video_id: Option<String>,
    pub options: JobOptions,
    pub state: JobState,
    /// Number of execution attempts started so far.
    pub attempts: u32,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub result: Option<ResolvedMedia>,
    pub error: Option<JobFailure>,
    pub cancel_requested: bool,
}

impl Job {
    pub fn new(
        target: String,
        video_id: Option<String>,
        options: JobOptions,
        fingerprint: Fingerprint,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            fingerprint,
            target,
            video_id,
            options,
            state: JobState::Pending,
            attempts: 0,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            result: None,
            error: None,
            cancel_requested: false,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }

    /// Whether a succeeded job's result can still be handed out: the stream
    /// URL must remain valid for more than `grace` beyond `now`.
    pub fn is_fresh(&self, grace: chrono::Duration, now: DateTime<Utc>) -> bool {
        if self.state != JobState::Succeeded {
            return false;
        }
        match &self.result {
            Some(media) => media.expires_at - now > grace,
            None => false,
        }
    }

    pub fn view(&self) -> JobView {
        JobView {
            id: self.id,
            state: self.state,
            target: self.target.clone(),
            video_id: self.video_id.clone(),
            attempts: self.attempts,
            created_at: self.created_at,
            started_at: self.started_at,
            completed_at: self.completed_at,
            result: self.result.clone(),
            error: self.error.clone(),
            cancel_requested: self.cancel_requested,
        }
    }
}

/// Client-facing projection of a job, returned by every status endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobView {
    pub id: Uuid,
    pub state: JobState,
    pub target: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub video_id: Option<String>,
    pub attempts: u32,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<ResolvedMedia>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<JobFailure>,
    pub cancel_requested: bool,
}

/// Broadcast on every state change so observers can follow job progress
/// without polling.
#[derive(Debug, Clone, Serialize)]
pub struct JobEvent {
    pub job_id: Uuid,
    pub state: JobState,
    pub attempts: u32,
    pub updated_at: DateTime<Utc>,
}

/// Body of `POST /jobs`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmitRequest {
    pub url: String,
    #[serde(default)]
    pub options: JobOptions,
}

/// Result of a submission: the job to watch plus whether this call created it.
#[derive(Debug, Clone)]
pub struct SubmitOutcome {
    pub job: JobView,
    pub created: bool,
}

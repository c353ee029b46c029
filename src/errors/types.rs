//! Error type definitions for the download-job service.

use std::time::Duration;
use thiserror::Error;
use uuid::Uuid;

use crate::models::{FailureKind, JobState};

/// Top-level application error.
#[derive(Error, Debug)]
pub enum AppError {
    #[error("submit error: {0}")]
    Submit(#[from] SubmitError),

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("cancel error: {0}")]
    Cancel(#[from] CancelError),

    #[error("extraction error: {0}")]
    Extract(#[from] ExtractError),

    #[error("configuration error: {message}")]
    Configuration { message: String },

    #[error("internal error: {message}")]
    Internal { message: String },
}

impl AppError {
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }
}

/// Rejections raised while validating and accepting a submission.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SubmitError {
    #[error("missing url")]
    EmptyTarget,

    #[error("invalid target: {reason}")]
    InvalidTarget { reason: String },

    #[error("service is shutting down")]
    ShuttingDown,

    #[error("internal error: {message}")]
    Internal { message: String },
}

impl SubmitError {
    pub fn invalid_target(reason: impl Into<String>) -> Self {
        Self::InvalidTarget {
            reason: reason.into(),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }
}

/// Job store failures. `AlreadyExists` carries the id of the job holding
/// the fingerprint so callers can attach to it.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("a job for this fingerprint is already tracked: {existing}")]
    AlreadyExists { existing: Uuid },

    #[error("job not found")]
    NotFound,

    #[error("invalid transition for job {id}: {from} does not accept {attempted}")]
    InvalidTransition {
        id: Uuid,
        from: JobState,
        attempted: &'static str,
    },
}

/// Cancellation failures surfaced by the scheduler.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelError {
    #[error("job not found")]
    NotFound,

    #[error("job already reached a terminal state")]
    AlreadyTerminal,
}

/// Failures of a single extractor invocation.
///
/// `Timeout` and `NetworkFailure` are transient and worth retrying; the
/// rest either cannot improve on retry or, for `Cancelled`, must not retry.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ExtractError {
    #[error("extraction timed out after {0:?}")]
    Timeout(Duration),

    #[error("extractor tool not found: {0}")]
    ToolNotFound(String),

    #[error("invalid or unsupported target: {0}")]
    InvalidTarget(String),

    #[error("network failure: {0}")]
    NetworkFailure(String),

    #[error("extraction cancelled")]
    Cancelled,

    #[error("extraction failed: {0}")]
    Unknown(String),
}

impl ExtractError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Timeout(_) | Self::NetworkFailure(_))
    }

    pub fn failure_kind(&self) -> FailureKind {
        match self {
            Self::Timeout(_) => FailureKind::Timeout,
            Self::ToolNotFound(_) => FailureKind::ToolNotFound,
            Self::InvalidTarget(_) => FailureKind::InvalidTarget,
            Self::NetworkFailure(_) => FailureKind::NetworkFailure,
            Self::Cancelled => FailureKind::Cancelled,
            Self::Unknown(_) => FailureKind::Unknown,
        }
    }
}

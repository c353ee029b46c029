//! Media extraction.
//!
//! [`Extractor`] is the seam between the job machinery and the external
//! tool: the worker pool only knows it hands a target in and gets a
//! [`ResolvedMedia`] or a classified [`ExtractError`] back, bounded by a
//! timeout and a cancellation token.

use async_trait::async_trait;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::errors::ExtractError;
use crate::models::{JobOptions, ResolvedMedia};

pub mod format;
pub mod ytdlp;

pub use ytdlp::YtDlpExtractor;

/// One unit of work handed to the extraction tool.
#[derive(Debug, Clone)]
pub struct ExtractRequest {
    pub target: String,
    pub video_id: Option<String>,
    pub options: JobOptions,
}

/// Capability interface over the external media-extraction tool.
#[async_trait]
pub trait Extractor: Send + Sync {
    /// Resolve one target within `timeout`. Implementations terminate the
    /// underlying work and return [`ExtractError::Cancelled`] promptly
    /// when `cancel` fires; partial output is never reused.
    async fn run(
        &self,
        request: &ExtractRequest,
        timeout: Duration,
        cancel: CancellationToken,
    ) -> Result<ResolvedMedia, ExtractError>;

    /// Tool name for logs.
    fn name(&self) -> &'static str {
        "extractor"
    }
}

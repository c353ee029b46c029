//! yt-dlp subprocess invoker.
//!
//! Runs the tool in metadata mode (`-j`) with piped output, bounded by the
//! caller's timeout and cancellation token. Kills are request-and-confirm:
//! the child is killed and its exit awaited within a bounded window so no
//! orphaned process keeps downloading.

use async_trait::async_trait;
use base64::Engine as _;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::{format, ExtractRequest, Extractor};
use crate::config::ExtractorConfig;
use crate::errors::ExtractError;
use crate::models::ResolvedMedia;

const SELF_UPDATE_TIMEOUT: Duration = Duration::from_secs(60);

/// stderr fragments that mean the target itself is bad. Not retryable.
const INVALID_TARGET_MARKERS: &[&str] = &[
    "unsupported url",
    "is not a valid url",
    "unable to extract",
    "video unavailable",
    "private video",
    "this video is not available",
    "requested format is not available",
    "age-restricted",
];

/// stderr fragments that mean the network or the remote side hiccuped.
/// Worth retrying.
const NETWORK_MARKERS: &[&str] = &[
    "unable to download webpage",
    "unable to download video data",
    "connection reset",
    "connection refused",
    "timed out",
    "temporary failure in name resolution",
    "getaddrinfo failed",
    "network is unreachable",
    "http error 429",
    "http error 5",
];

pub struct YtDlpExtractor {
    command: String,
    cookies_file: Option<PathBuf>,
    user_agent: String,
    accept_language: String,
    force_kill: Duration,
}

impl YtDlpExtractor {
    pub fn new(config: &ExtractorConfig, cookies_file: Option<PathBuf>) -> Self {
        Self {
            command: config.command.clone(),
            cookies_file,
            user_agent: config.user_agent.clone(),
            accept_language: config.accept_language.clone(),
            force_kill: config.force_kill(),
        }
    }

    /// Run the tool's self-update (`-U`). Called once at startup unless
    /// disabled; failures are for the caller to log, not fatal.
    pub async fn self_update(&self) -> Result<(), ExtractError> {
        info!(command = %self.command, "checking for extractor updates");
        let mut child = self.spawn(&["-U".to_string()])?;
        let stdout = collect_pipe(child.stdout.take());
        let stderr = collect_pipe(child.stderr.take());

        let status = tokio::select! {
            status = child.wait() => status
                .map_err(|e| ExtractError::Unknown(format!("failed waiting for update: {e}")))?,
            _ = tokio::time::sleep(SELF_UPDATE_TIMEOUT) => {
                self.terminate(&mut child).await;
                return Err(ExtractError::Timeout(SELF_UPDATE_TIMEOUT));
            }
        };

        let output = stdout.await.unwrap_or_default();
        let errors = stderr.await.unwrap_or_default();
        if status.success() {
            let summary = String::from_utf8_lossy(&output);
            info!(
                result = %summary.lines().last().unwrap_or("").trim(),
                "extractor update check complete"
            );
            Ok(())
        } else {
            Err(ExtractError::Unknown(format!(
                "update check exited with {status}: {}",
                summary_line(&String::from_utf8_lossy(&errors))
            )))
        }
    }

    fn build_args(&self, request: &ExtractRequest) -> Vec<String> {
        let mut args = vec![
            "-j".to_string(),
            "--no-warnings".to_string(),
            "--no-playlist".to_string(),
            "--user-agent".to_string(),
            self.user_agent.clone(),
            "--add-header".to_string(),
            format!("Accept-Language:{}", self.accept_language),
        ];
        if let Some(cookies) = &self.cookies_file {
            args.push("--cookies".to_string());
            args.push(cookies.display().to_string());
        }
        if let Some(format) = &request.options.format {
            args.push("-f".to_string());
            args.push(format.clone());
        }
        args.push(request.target.clone());
        args
    }

    fn spawn(&self, args: &[String]) -> Result<Child, ExtractError> {
        Command::new(&self.command)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| match e.kind() {
                std::io::ErrorKind::NotFound => ExtractError::ToolNotFound(self.command.clone()),
                _ => ExtractError::Unknown(format!("failed to spawn {}: {e}", self.command)),
            })
    }

    async fn terminate(&self, child: &mut Child) {
        match tokio::time::timeout(self.force_kill, child.kill()).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!(error = %e, "failed to kill extractor process"),
            Err(_) => warn!(
                wait_seconds = self.force_kill.as_secs(),
                "extractor process did not confirm termination"
            ),
        }
    }
}

#[async_trait]
impl Extractor for YtDlpExtractor {
    async fn run(
        &self,
        request: &ExtractRequest,
        timeout: Duration,
        cancel: CancellationToken,
    ) -> Result<ResolvedMedia, ExtractError> {
        let args = self.build_args(request);
        debug!(command = %self.command, target = %request.target, "invoking extractor");

        let mut child = self.spawn(&args)?;
        let stdout = collect_pipe(child.stdout.take());
        let stderr = collect_pipe(child.stderr.take());

        let status = tokio::select! {
            status = child.wait() => status
                .map_err(|e| ExtractError::Unknown(format!("failed waiting for {}: {e}", self.command)))?,
            _ = tokio::time::sleep(timeout) => {
                warn!(
                    target = %request.target,
                    timeout_seconds = timeout.as_secs(),
                    "extraction timed out, killing process"
                );
                self.terminate(&mut child).await;
                return Err(ExtractError::Timeout(timeout));
            }
            _ = cancel.cancelled() => {
                debug!(target = %request.target, "cancellation requested, killing process");
                self.terminate(&mut child).await;
                return Err(ExtractError::Cancelled);
            }
        };

        let stdout = stdout.await.unwrap_or_default();
        let stderr = stderr.await.unwrap_or_default();

        if !status.success() {
            return Err(classify_failure(
                status.code(),
                &String::from_utf8_lossy(&stderr),
            ));
        }

        let info: serde_json::Value = serde_json::from_slice(&stdout)
            .map_err(|e| ExtractError::Unknown(format!("unparseable tool output: {e}")))?;
        format::resolve_media(&info, &request.options)
            .ok_or_else(|| ExtractError::InvalidTarget("no compatible progressive format".into()))
    }

    fn name(&self) -> &'static str {
        "yt-dlp"
    }
}

/// Drain one of the child's pipes in the background so the child never
/// blocks on a full pipe buffer.
fn collect_pipe<R>(pipe: Option<R>) -> tokio::task::JoinHandle<Vec<u8>>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut buf = Vec::new();
        if let Some(mut pipe) = pipe {
            let _ = pipe.read_to_end(&mut buf).await;
        }
        buf
    })
}

/// Map a non-zero exit onto the failure taxonomy by scanning stderr.
fn classify_failure(code: Option<i32>, stderr: &str) -> ExtractError {
    let lower = stderr.to_ascii_lowercase();
    if INVALID_TARGET_MARKERS.iter().any(|m| lower.contains(m)) {
        return ExtractError::InvalidTarget(summary_line(stderr));
    }
    if NETWORK_MARKERS.iter().any(|m| lower.contains(m)) {
        return ExtractError::NetworkFailure(summary_line(stderr));
    }
    match code {
        Some(code) => ExtractError::Unknown(format!("exit status {code}: {}", summary_line(stderr))),
        None => ExtractError::Unknown(format!("killed by signal: {}", summary_line(stderr))),
    }
}

/// The operative line of a stderr dump: the last `ERROR` line when there
/// is one, else the last non-empty line.
fn summary_line(stderr: &str) -> String {
    stderr
        .lines()
        .rev()
        .find(|line| line.contains("ERROR"))
        .or_else(|| stderr.lines().rev().find(|line| !line.trim().is_empty()))
        .unwrap_or("no error output")
        .trim()
        .to_string()
}

/// Write the base64 cookie payload from the environment to the configured
/// path for the tool to read. Bad payloads are logged and skipped.
pub fn provision_cookies(config: &ExtractorConfig) -> Option<PathBuf> {
    let encoded = config.cookies_b64.as_deref()?.trim().to_string();
    if encoded.is_empty() {
        return None;
    }
    let data = match base64::engine::general_purpose::STANDARD.decode(&encoded) {
        Ok(data) => data,
        Err(e) => {
            warn!(error = %e, "ignoring undecodable cookie payload");
            return None;
        }
    };
    if let Some(parent) = config.cookies_path.parent() {
        if !parent.as_os_str().is_empty() {
            if let Err(e) = std::fs::create_dir_all(parent) {
                warn!(error = %e, path = %config.cookies_path.display(), "failed to create cookie directory");
                return None;
            }
        }
    }
    match std::fs::write(&config.cookies_path, data) {
        Ok(()) => {
            info!(path = %config.cookies_path.display(), "cookie file provisioned");
            Some(config.cookies_path.clone())
        }
        Err(e) => {
            warn!(error = %e, path = %config.cookies_path.display(), "failed to write cookie file");
            None
        }
    }
}

//! Configuration management.
//!
//! Settings come from an optional TOML file with sane defaults for every
//! field, then a small set of environment overrides applied on top:
//! `PORT`, `YTDLP_NO_UPDATE` and `YTDLP_COOKIES_B64`.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::warn;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub web: WebConfig,
    pub workers: WorkerConfig,
    pub extractor: ExtractorConfig,
    pub jobs: JobConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WebConfig {
    pub host: String,
    pub port: u16,
}

impl Default for WebConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    /// Number of concurrent executors, each running at most one extraction.
    pub count: usize,
    /// Additional attempts allowed after the first one fails transiently.
    pub retry_limit: u32,
    /// Base delay before a retry; doubles per attempt with jitter.
    pub retry_backoff_seconds: u64,
    /// How long shutdown waits for in-flight extractions before killing them.
    pub shutdown_grace_seconds: u64,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            count: 4,
            retry_limit: 2,
            retry_backoff_seconds: 5,
            shutdown_grace_seconds: 30,
        }
    }
}

impl WorkerConfig {
    pub fn backoff_base(&self) -> Duration {
        Duration::from_secs(self.retry_backoff_seconds)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_seconds)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtractorConfig {
    /// Tool binary, resolved through PATH unless absolute.
    pub command: String,
    /// Wall-clock bound for a single invocation.
    pub timeout_seconds: u64,
    /// Skip the tool's self-update at startup.
    pub no_update: bool,
    /// Where a decoded cookie payload is written for the tool to read.
    pub cookies_path: PathBuf,
    /// Base64 cookie payload, taken from the environment only.
    #[serde(skip)]
    pub cookies_b64: Option<String>,
    /// How long a kill is given to be acknowledged before giving up.
    pub force_kill_seconds: u64,
    pub user_agent: String,
    pub accept_language: String,
}

impl Default for ExtractorConfig {
    fn default() -> Self {
        Self {
            command: "yt-dlp".to_string(),
            timeout_seconds: 120,
            no_update: false,
            cookies_path: PathBuf::from("./data/cookies.txt"),
            cookies_b64: None,
            force_kill_seconds: 5,
            user_agent: "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 \
                         (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36"
                .to_string(),
            accept_language: "es-ES,es;q=0.9,en;q=0.8".to_string(),
        }
    }
}

impl ExtractorConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }

    pub fn force_kill(&self) -> Duration {
        Duration::from_secs(self.force_kill_seconds)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct JobConfig {
    /// A succeeded job is reused only while its stream URL stays valid for
    /// at least this long.
    pub freshness_grace_seconds: i64,
    /// Terminal jobs older than this are swept from the store.
    pub retention_seconds: i64,
    pub sweep_interval_seconds: u64,
}

impl Default for JobConfig {
    fn default() -> Self {
        Self {
            freshness_grace_seconds: 1800,
            retention_seconds: 21600,
            sweep_interval_seconds: 60,
        }
    }
}

impl JobConfig {
    pub fn freshness_grace(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.freshness_grace_seconds)
    }

    pub fn retention(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.retention_seconds)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_seconds)
    }
}

impl Config {
    /// Load configuration from a TOML file, falling back to defaults when
    /// the file does not exist, then apply environment overrides.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let mut config = if path.exists() {
            let contents = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file: {}", path.display()))?;
            toml::from_str(&contents)
                .with_context(|| format!("Failed to parse config file: {}", path.display()))?
        } else {
            Self::default()
        };
        config.apply_env_overrides();
        Ok(config)
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(port) = std::env::var("PORT") {
            match port.parse() {
                Ok(port) => self.web.port = port,
                Err(_) => warn!(value = %port, "ignoring unparseable PORT override"),
            }
        }
        if let Ok(value) = std::env::var("YTDLP_NO_UPDATE") {
            if flag_enabled(&value) {
                self.extractor.no_update = true;
            }
        }
        if let Ok(value) = std::env::var("YTDLP_COOKIES_B64") {
            if !value.trim().is_empty() {
                self.extractor.cookies_b64 = Some(value);
            }
        }
    }
}

/// Environment-flag semantics: any non-empty value other than `0` or
/// `false` enables the flag.
pub fn flag_enabled(value: &str) -> bool {
    let value = value.trim();
    !value.is_empty() && value != "0" && !value.eq_ignore_ascii_case("false")
}

// Runtime configuration for the download core
//
// Defaults are usable as-is; `from_env` overlays VDL_* variables.

use std::path::PathBuf;
use std::time::Duration;

use tracing::warn;

use super::bootstrap::BootstrapConfig;
use super::extractors::ExtractorConfig;
use super::utils::RetryPolicy;

/// Top-level configuration consumed by the supervisor
#[derive(Debug, Clone)]
pub struct DownloaderConfig {
    /// Default destination when a request does not name one
    pub download_dir: PathBuf,
    /// Per-call network timeout (extraction, bootstrap fetch, stream open)
    pub network_timeout: Duration,
    /// Maximum gap between two received chunks before a transfer fails
    pub stall_timeout: Duration,
    /// Keep `.part` files when a task is cancelled
    pub keep_partial_on_cancel: bool,
    /// Number of tasks allowed past Queued at once
    pub max_concurrent: usize,
    /// Retry policy for extraction and bootstrap fetch
    pub retry: RetryPolicy,
    /// Minimum interval between progress events for one task
    pub progress_interval: Duration,
    pub extractor: ExtractorConfig,
    pub bootstrap: BootstrapConfig,
}

impl Default for DownloaderConfig {
    fn default() -> Self {
        Self {
            download_dir: default_download_dir(),
            network_timeout: Duration::from_secs(30),
            stall_timeout: Duration::from_secs(60),
            keep_partial_on_cancel: false,
            max_concurrent: 3,
            retry: RetryPolicy::default(),
            progress_interval: Duration::from_millis(100),
            extractor: ExtractorConfig::default(),
            bootstrap: BootstrapConfig::default(),
        }
    }
}

impl DownloaderConfig {
    /// Defaults overlaid with `VDL_*` environment variables.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Some(dir) = env_path("VDL_DOWNLOAD_DIR") {
            config.download_dir = dir;
        }
        if let Some(secs) = env_parse::<u64>("VDL_NETWORK_TIMEOUT_SECS") {
            config = config.with_network_timeout(Duration::from_secs(secs));
        }
        if let Some(secs) = env_parse::<u64>("VDL_STALL_TIMEOUT_SECS") {
            config.stall_timeout = Duration::from_secs(secs);
        }
        if let Some(keep) = env_flag("VDL_KEEP_PARTIAL") {
            config.keep_partial_on_cancel = keep;
        }
        if let Some(n) = env_parse::<usize>("VDL_MAX_CONCURRENT") {
            config.max_concurrent = n.max(1);
        }
        if let Some(dir) = env_path("VDL_TOOLS_DIR") {
            config.bootstrap.tools_dir = dir;
        }
        if let Some(path) = env_path("VDL_YTDLP") {
            config.extractor.ytdlp_path = Some(path);
        }

        config
    }

    pub fn with_download_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.download_dir = dir.into();
        self
    }

    /// Applies to every network call, including the extractor subprocess.
    pub fn with_network_timeout(mut self, timeout: Duration) -> Self {
        self.network_timeout = timeout;
        self.extractor.timeout_seconds = timeout.as_secs().max(1) as u32;
        self
    }

    pub fn with_stall_timeout(mut self, timeout: Duration) -> Self {
        self.stall_timeout = timeout;
        self
    }

    pub fn with_keep_partial_on_cancel(mut self, keep: bool) -> Self {
        self.keep_partial_on_cancel = keep;
        self
    }

    pub fn with_max_concurrent(mut self, n: usize) -> Self {
        self.max_concurrent = n.max(1);
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_bootstrap(mut self, bootstrap: BootstrapConfig) -> Self {
        self.bootstrap = bootstrap;
        self
    }
}

/// User's Downloads folder, or `~/Downloads`, or the working directory.
pub fn default_download_dir() -> PathBuf {
    dirs::download_dir()
        .or_else(|| dirs::home_dir().map(|h| h.join("Downloads")))
        .unwrap_or_else(|| PathBuf::from("."))
}

fn env_path(key: &str) -> Option<PathBuf> {
    std::env::var_os(key)
        .filter(|v| !v.is_empty())
        .map(PathBuf::from)
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    let raw = std::env::var(key).ok()?;
    match raw.trim().parse() {
        Ok(v) => Some(v),
        Err(_) => {
            warn!("Ignoring {}={:?}: not a valid value", key, raw);
            None
        }
    }
}

fn env_flag(key: &str) -> Option<bool> {
    let raw = std::env::var(key).ok()?;
    match raw.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => {
            warn!("Ignoring {}={:?}: expected a boolean", key, raw);
            None
        }
    }
}

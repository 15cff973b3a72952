//! Dependency bootstrapper for the muxing tool.
//!
//! `ensure_ready` returns the path of a usable ffmpeg, installing it into the
//! tools directory on first use. Installation is single-flight: every caller
//! that arrives while an install is running awaits the same shared future and
//! receives the same outcome. A failed install clears the slot so a later
//! call starts over.
//!
//! The installed binary is the only state that outlives the process.

mod archive;
mod catalog;
mod source;

pub use archive::{extract_member, is_usable_tool, make_executable};
pub use catalog::{ArchiveFormat, Platform, ToolArchive};
pub use source::{ArchiveSource, HttpArchiveSource};

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock};

use futures::future::{BoxFuture, FutureExt, Shared};
use serde::Serialize;
use tracing::{debug, info, warn};

use super::config::DownloaderConfig;
use super::errors::BootstrapError;
use super::utils::{retry_with_backoff, RetryPolicy};

/// Where and how the tool is installed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BootstrapConfig {
    /// Directory holding the installed tool
    pub tools_dir: PathBuf,
    /// Accept an ffmpeg already on PATH instead of installing one
    pub prefer_system_tool: bool,
    /// Override the platform's default archive
    pub archive: Option<ToolArchive>,
}

impl Default for BootstrapConfig {
    fn default() -> Self {
        Self {
            tools_dir: default_tools_dir(),
            prefer_system_tool: true,
            archive: None,
        }
    }
}

impl BootstrapConfig {
    pub fn with_tools_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.tools_dir = dir.into();
        self
    }

    pub fn with_prefer_system_tool(mut self, prefer: bool) -> Self {
        self.prefer_system_tool = prefer;
        self
    }

    pub fn with_archive(mut self, archive: ToolArchive) -> Self {
        self.archive = Some(archive);
        self
    }

    /// Fixed install location: `<tools_dir>/ffmpeg[.exe]`.
    pub fn tool_path(&self) -> PathBuf {
        let file_name = Platform::detect()
            .map(|p| p.tool_file_name())
            .unwrap_or("ffmpeg");
        self.tools_dir.join(file_name)
    }
}

/// `<local data dir>/video-downloader/tools`
pub fn default_tools_dir() -> PathBuf {
    dirs::data_local_dir()
        .or_else(dirs::home_dir)
        .unwrap_or_else(|| PathBuf::from("."))
        .join("video-downloader")
        .join("tools")
}

type InstallFuture = Shared<BoxFuture<'static, Result<PathBuf, BootstrapError>>>;

/// Process-wide install state.
struct BootstrapState {
    tool_path: PathBuf,
    installed: bool,
    in_flight: Option<InstallFuture>,
}

/// Read-only view of the bootstrap state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BootstrapStatus {
    pub tool_path: PathBuf,
    pub installed: bool,
    pub installing: bool,
}

pub struct Bootstrapper {
    config: BootstrapConfig,
    source: Arc<dyn ArchiveSource>,
    retry: RetryPolicy,
    state: Arc<Mutex<BootstrapState>>,
}

static GLOBAL: OnceLock<Arc<Bootstrapper>> = OnceLock::new();

impl Bootstrapper {
    pub fn new(config: BootstrapConfig, source: Arc<dyn ArchiveSource>, retry: RetryPolicy) -> Self {
        let state = BootstrapState {
            tool_path: config.tool_path(),
            installed: false,
            in_flight: None,
        };
        Self {
            config,
            source,
            retry,
            state: Arc::new(Mutex::new(state)),
        }
    }

    /// HTTP-backed bootstrapper using the downloader's timeouts and retry policy.
    pub fn from_config(config: &DownloaderConfig) -> Self {
        Self::new(
            config.bootstrap.clone(),
            Arc::new(HttpArchiveSource::new(config.network_timeout)),
            config.retry,
        )
    }

    /// The process-wide instance. The first configuration to reach it wins.
    pub fn global(config: &DownloaderConfig) -> Arc<Bootstrapper> {
        GLOBAL
            .get_or_init(|| Arc::new(Self::from_config(config)))
            .clone()
    }

    pub fn status(&self) -> BootstrapStatus {
        let state = lock(&self.state);
        BootstrapStatus {
            tool_path: state.tool_path.clone(),
            installed: state.installed,
            installing: state.in_flight.is_some(),
        }
    }

    /// Path of a usable tool, installing it if needed.
    pub async fn ensure_ready(&self) -> Result<PathBuf, BootstrapError> {
        let install = {
            let mut state = lock(&self.state);

            if state.installed && is_usable_tool(&state.tool_path) {
                return Ok(state.tool_path.clone());
            }

            if let Some(install) = state.in_flight.clone() {
                debug!("Tool install already running, waiting on it");
                install
            } else {
                if let Some(path) = self.locate_existing() {
                    state.tool_path = path.clone();
                    state.installed = true;
                    return Ok(path);
                }
                let install = self.start_install();
                state.in_flight = Some(install.clone());
                install
            }
        };

        install.await
    }

    fn locate_existing(&self) -> Option<PathBuf> {
        let installed = self.config.tool_path();
        if is_usable_tool(&installed) {
            debug!("Tool present at {}", installed.display());
            return Some(installed);
        }

        if self.config.prefer_system_tool {
            if let Ok(path) = which::which("ffmpeg") {
                info!("Using system ffmpeg at {}", path.display());
                return Some(path);
            }
        }

        None
    }

    /// Spawn the install so it finishes, and records its outcome, even when
    /// every waiter is gone. The shared wrapper only relays the result.
    ///
    /// Called with the state lock held, so the spawned task cannot publish
    /// before `in_flight` is set.
    fn start_install(&self) -> InstallFuture {
        let config = self.config.clone();
        let source = self.source.clone();
        let retry = self.retry;
        let state = self.state.clone();

        let handle = {
            let state = state.clone();
            tokio::spawn(async move {
                let outcome = install(&config, source.as_ref(), &retry).await;
                publish(&state, &outcome);
                outcome
            })
        };

        async move {
            match handle.await {
                Ok(outcome) => outcome,
                Err(e) => {
                    let outcome = Err(BootstrapError::filesystem(format!("Install task aborted: {}", e)));
                    publish(&state, &outcome);
                    outcome
                }
            }
        }
        .boxed()
        .shared()
    }
}

fn publish(state: &Mutex<BootstrapState>, outcome: &Result<PathBuf, BootstrapError>) {
    let mut guard = lock(state);
    guard.in_flight = None;
    match outcome {
        Ok(path) => {
            guard.tool_path = path.clone();
            guard.installed = true;
        }
        Err(e) => warn!("Tool install failed: {}", e),
    }
}

fn lock(state: &Mutex<BootstrapState>) -> MutexGuard<'_, BootstrapState> {
    state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

async fn install(
    config: &BootstrapConfig,
    source: &dyn ArchiveSource,
    retry: &RetryPolicy,
) -> Result<PathBuf, BootstrapError> {
    let archive = config
        .archive
        .clone()
        .or_else(ToolArchive::current)
        .ok_or(BootstrapError::UnsupportedPlatform)?;
    let tool_path = config.tool_path();

    tokio::fs::create_dir_all(&config.tools_dir).await?;
    let download_path = config.tools_dir.join("ffmpeg.archive.part");
    let staging_path = config.tools_dir.join("ffmpeg.staging.part");

    info!("Installing ffmpeg from {} into {}", archive.url, config.tools_dir.display());

    let result = async {
        let bytes = retry_with_backoff(retry, "tool fetch", BootstrapError::is_transient, || {
            source.fetch(&archive, &download_path)
        })
        .await?;
        if bytes == 0 {
            return Err(BootstrapError::corrupt("Empty archive payload"));
        }

        let (from, member, to) = (download_path.clone(), archive.clone(), staging_path.clone());
        tokio::task::spawn_blocking(move || extract_member(&from, &member, &to))
            .await
            .map_err(|e| BootstrapError::filesystem(format!("Extraction task failed: {}", e)))??;

        replace_file(&staging_path, &tool_path).await?;

        if !is_usable_tool(&tool_path) {
            return Err(BootstrapError::corrupt("Installed tool failed sanity check"));
        }
        Ok(tool_path.clone())
    }
    .await;

    let _ = tokio::fs::remove_file(&download_path).await;
    if result.is_err() {
        let _ = tokio::fs::remove_file(&staging_path).await;
    } else {
        info!("ffmpeg installed at {}", tool_path.display());
    }
    result
}

async fn replace_file(from: &Path, to: &Path) -> Result<(), BootstrapError> {
    if tokio::fs::try_exists(to).await.unwrap_or(false) {
        tokio::fs::remove_file(to).await?;
    }
    tokio::fs::rename(from, to).await?;
    Ok(())
}

//! Video download orchestration core.
//!
//! A front-end submits [`DownloadRequest`]s to a [`TaskSupervisor`] and
//! observes them by polling [`TaskSupervisor::query`] or through
//! [`TaskSupervisor::subscribe`]. The supervisor resolves streams through an
//! external extraction engine, makes sure the muxing tool is installed, and
//! runs each download as a cancellable background task.

pub mod downloader;

pub use downloader::*;

/// Install a `tracing` subscriber filtered by `RUST_LOG` (default `info`).
///
/// Safe to call more than once; only the first call installs anything.
pub fn init_logging() {
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    let _ = tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .try_init();
}

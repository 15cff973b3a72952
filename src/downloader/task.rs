// Download task - one cancellable run through the lifecycle
//
// Queued -> Bootstrapping -> Resolving -> Active -> Completed | Failed | Cancelled
//
// The task operates on a value-type job plus cloned Arc dependencies. All
// writes to its registry record go through the supervisor's registry, and
// every suspension point races the job's cancellation token.

use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::bootstrap::Bootstrapper;
use super::errors::TransferError;
use super::extractors::ExtractionAdapter;
use super::format_selector::FormatSelector;
use super::models::{DownloadRequest, StreamDescriptor, TaskId, TaskOutcome, TaskState};
use super::supervisor::Registry;
use super::traits::Muxer;
use super::transfer::{fetch_part, remove_files, Interrupted, ProgressTracker};
use super::utils::{part_path, sanitize_file_name};

/// Dependencies shared by every task of one supervisor.
#[derive(Clone)]
pub(crate) struct TaskDeps {
    pub bootstrapper: Arc<Bootstrapper>,
    pub adapter: ExtractionAdapter,
    pub muxer: Arc<dyn Muxer>,
    pub limiter: Arc<Semaphore>,
    pub registry: Arc<Registry>,
    pub stall_timeout: Duration,
    pub progress_interval: Duration,
    pub keep_partial_on_cancel: bool,
}

/// A single accepted submission.
pub(crate) struct DownloadJob {
    pub id: TaskId,
    pub request: DownloadRequest,
    pub destination_dir: PathBuf,
    /// Claimed at submission when the request names the file
    pub target: Option<PathBuf>,
    pub cancel: CancellationToken,
}

/// Drive `job` to a terminal state and record the outcome.
pub(crate) async fn run_task(job: DownloadJob, deps: TaskDeps) {
    let mut files = Vec::new();
    let result = drive(&job, &deps, &mut files).await;

    let outcome = match result {
        Ok(path) => {
            // Intermediate parts are gone once the final file exists
            remove_files(&files).await;
            info!("[{}] Completed: {}", job.id, path.display());
            TaskOutcome::Completed { path }
        }
        Err(Interrupted::Cancelled) => {
            let partial_files = if deps.keep_partial_on_cancel {
                existing(&files).await
            } else {
                remove_files(&files).await;
                Vec::new()
            };
            info!("[{}] Cancelled ({} partial files kept)", job.id, partial_files.len());
            TaskOutcome::Cancelled { partial_files }
        }
        Err(Interrupted::Failed(error)) => {
            remove_files(&files).await;
            warn!("[{}] Failed ({}): {}", job.id, error.kind(), error);
            TaskOutcome::Failed { error }
        }
    };

    deps.registry.finish(job.id, outcome);
}

async fn drive(job: &DownloadJob, deps: &TaskDeps, files: &mut Vec<PathBuf>) -> Result<PathBuf, Interrupted> {
    let id = job.id;

    // Held until this function returns, i.e. until the task is terminal
    let _permit = checkpoint(&job.cancel, deps.limiter.clone().acquire_owned())
        .await?
        .map_err(|_| Interrupted::Cancelled)?;

    deps.registry.transition(id, TaskState::Bootstrapping);
    let tool = checkpoint(&job.cancel, deps.bootstrapper.ensure_ready()).await??;
    debug!("[{}] Muxing tool ready at {}", id, tool.display());

    deps.registry.transition(id, TaskState::Resolving);
    let media = checkpoint(&job.cancel, deps.adapter.resolve(&job.request.url)).await??;
    let descriptor = FormatSelector::select(media.descriptors, &job.request.selection)?;
    info!(
        "[{}] Selected format {} ({}, {})",
        id,
        descriptor.format_id,
        descriptor.label,
        if descriptor.requires_mux { "muxed" } else { "single stream" }
    );

    tokio::fs::create_dir_all(&job.destination_dir)
        .await
        .map_err(TransferError::from)?;
    let target = match &job.target {
        Some(path) => path.clone(),
        None => {
            let derived = job.destination_dir.join(format!(
                "{}.{}",
                sanitize_file_name(&media.title),
                descriptor.container
            ));
            deps.registry.claim_derived(id, derived)
        }
    };
    deps.registry.set_stream(id, descriptor.clone(), target.clone());

    if job.cancel.is_cancelled() {
        return Err(Interrupted::Cancelled);
    }
    deps.registry.transition(id, TaskState::Active);

    let mut tracker = ProgressTracker::new(descriptor.approx_size, deps.progress_interval);
    let format_ids = descriptor.part_format_ids();
    let single = format_ids.len() == 1;

    for format_id in &format_ids {
        let part = part_path(&target, &format!("f{}", format_id));
        files.push(part.clone());

        let stream = checkpoint(&job.cancel, deps.adapter.open_stream(&job.request.url, format_id)).await??;
        if single {
            tracker.set_total(stream.total);
        }

        fetch_part(stream, &part, &job.cancel, deps.stall_timeout, |n| {
            if let Some(progress) = tracker.advance(n) {
                deps.registry.update_progress(id, progress);
            }
        })
        .await?;
    }

    if descriptor.requires_mux {
        finish_muxed(job, deps, &tool, &descriptor, &target, files).await?;
    } else {
        promote(&files[0], &target).await?;
    }

    deps.registry.update_progress(id, tracker.finish());
    Ok(target)
}

async fn finish_muxed(
    job: &DownloadJob,
    deps: &TaskDeps,
    tool: &Path,
    descriptor: &StreamDescriptor,
    target: &Path,
    files: &mut Vec<PathBuf>,
) -> Result<(), Interrupted> {
    let inputs = files.clone();
    let staged = muxing_path(target, &descriptor.container);
    files.push(staged.clone());

    debug!("[{}] Muxing {} parts with {}", job.id, inputs.len(), deps.muxer.name());
    checkpoint(&job.cancel, deps.muxer.mux(tool, &inputs, &staged)).await??;
    promote(&staged, target).await?;
    Ok(())
}

/// Run `fut` unless the task is cancelled first.
async fn checkpoint<T>(cancel: &CancellationToken, fut: impl Future<Output = T>) -> Result<T, Interrupted> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(Interrupted::Cancelled),
        value = fut => Ok(value),
    }
}

/// `<stem>.part.<ext>` so the muxer still infers the container
fn muxing_path(target: &Path, container: &str) -> PathBuf {
    let stem = target
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_else(|| "download".to_string());
    target.with_file_name(format!("{}.part.{}", stem, container))
}

/// Move a finished file onto its final name.
async fn promote(from: &Path, to: &Path) -> Result<(), TransferError> {
    if tokio::fs::try_exists(to).await.unwrap_or(false) {
        tokio::fs::remove_file(to).await?;
    }
    tokio::fs::rename(from, to).await?;
    Ok(())
}

async fn existing(paths: &[PathBuf]) -> Vec<PathBuf> {
    let mut kept = Vec::new();
    for path in paths {
        if tokio::fs::try_exists(path).await.unwrap_or(false) {
            kept.push(path.clone());
        }
    }
    kept
}

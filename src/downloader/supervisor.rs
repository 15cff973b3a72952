// Task supervisor - submit / cancel / query / clear over a task registry
//
// Every call here is synchronous and short: the registry is a std Mutex held
// only for map operations, and all download work runs on spawned tasks.
// Terminal tasks stay in the registry until the caller clears them.

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::runtime::Handle;
use tokio::sync::{broadcast, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::bootstrap::{BootstrapStatus, Bootstrapper};
use super::config::DownloaderConfig;
use super::errors::{ExtractionError, SupervisorError};
use super::extractors::{CliInfoExtractor, ExtractionAdapter, InfoExtractor, ResolvedMedia};
use super::models::{
    DownloadRequest, StreamDescriptor, TaskEvent, TaskId, TaskOutcome, TaskProgress, TaskSnapshot,
    TaskState,
};
use super::mux::FfmpegMuxer;
use super::task::{run_task, DownloadJob, TaskDeps};
use super::traits::{Muxer, ProgressEmitter};
use super::utils::unique_path;

const EVENT_CAPACITY: usize = 1024;

struct TaskRecord {
    snapshot: TaskSnapshot,
    cancel: CancellationToken,
    /// Destination path this task holds exclusively while live
    claim: Option<PathBuf>,
}

#[derive(Default)]
struct RegistryInner {
    tasks: HashMap<TaskId, TaskRecord>,
    claims: HashSet<PathBuf>,
}

/// Task records plus the destination claims of live tasks.
///
/// Progress and result fields are written only by the owning task through
/// this type; callers only flip the cancellation flag.
pub(crate) struct Registry {
    inner: Mutex<RegistryInner>,
    emitter: ProgressEmitter,
}

impl Registry {
    fn new(emitter: ProgressEmitter) -> Self {
        Self {
            inner: Mutex::new(RegistryInner::default()),
            emitter,
        }
    }

    fn lock(&self) -> MutexGuard<'_, RegistryInner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Insert a Queued record, claiming `claim` if given.
    fn insert(&self, id: TaskId, url: String, claim: Option<PathBuf>, cancel: CancellationToken) -> Result<(), SupervisorError> {
        let mut inner = self.lock();

        if let Some(path) = &claim {
            if !inner.claims.insert(path.clone()) {
                return Err(SupervisorError::DestinationCollision {
                    path: path.display().to_string(),
                });
            }
        }

        let snapshot = TaskSnapshot {
            id,
            url,
            state: TaskState::Queued,
            progress: TaskProgress::default(),
            stream: None,
            destination: claim.clone(),
            outcome: None,
            cancel_requested: false,
        };
        inner.tasks.insert(
            id,
            TaskRecord {
                snapshot,
                cancel,
                claim,
            },
        );
        self.emitter.state(id, TaskState::Queued);
        Ok(())
    }

    /// Move a live task forward. Returns false when the graph forbids it.
    pub(crate) fn transition(&self, id: TaskId, next: TaskState) -> bool {
        let mut inner = self.lock();
        let Some(record) = inner.tasks.get_mut(&id) else {
            return false;
        };
        if !record.snapshot.state.can_transition_to(next) {
            debug!("[{}] Ignoring transition {} -> {}", id, record.snapshot.state, next);
            return false;
        }

        debug!("[{}] {} -> {}", id, record.snapshot.state, next);
        record.snapshot.state = next;
        self.emitter.state(id, next);
        true
    }

    /// Record progress of an Active task; stale or out-of-order updates are dropped.
    pub(crate) fn update_progress(&self, id: TaskId, progress: TaskProgress) {
        let mut inner = self.lock();
        let Some(record) = inner.tasks.get_mut(&id) else {
            return;
        };
        if record.snapshot.state != TaskState::Active
            || progress.bytes_downloaded < record.snapshot.progress.bytes_downloaded
        {
            return;
        }

        record.snapshot.progress = progress.clone();
        self.emitter.progress(id, progress);
    }

    /// Claim a free variant of `preferred` (`name (1).ext`, ...).
    pub(crate) fn claim_derived(&self, id: TaskId, preferred: PathBuf) -> PathBuf {
        let mut inner = self.lock();
        let path = unique_path(&preferred, |p| !inner.claims.contains(p) && !p.exists());
        if path != preferred {
            info!("[{}] {} is taken, using {}", id, preferred.display(), path.display());
        }

        inner.claims.insert(path.clone());
        if let Some(record) = inner.tasks.get_mut(&id) {
            record.claim = Some(path.clone());
        }
        path
    }

    pub(crate) fn set_stream(&self, id: TaskId, stream: StreamDescriptor, destination: PathBuf) {
        let mut inner = self.lock();
        if let Some(record) = inner.tasks.get_mut(&id) {
            record.snapshot.stream = Some(stream);
            record.snapshot.destination = Some(destination);
        }
    }

    /// Record the terminal outcome and release the destination claim.
    pub(crate) fn finish(&self, id: TaskId, outcome: TaskOutcome) {
        let next = match &outcome {
            TaskOutcome::Completed { .. } => TaskState::Completed,
            TaskOutcome::Failed { .. } => TaskState::Failed,
            TaskOutcome::Cancelled { .. } => TaskState::Cancelled,
        };

        let mut inner = self.lock();
        let RegistryInner { tasks, claims } = &mut *inner;
        let Some(record) = tasks.get_mut(&id) else {
            return;
        };
        if !record.snapshot.state.can_transition_to(next) {
            debug!("[{}] Dropping outcome in state {}", id, record.snapshot.state);
            return;
        }

        if let Some(path) = record.claim.take() {
            claims.remove(&path);
        }
        record.snapshot.state = next;
        record.snapshot.outcome = Some(outcome);
        self.emitter.state(id, next);
    }

    fn cancel(&self, id: TaskId) -> bool {
        let mut inner = self.lock();
        match inner.tasks.get_mut(&id) {
            Some(record) if !record.snapshot.state.is_terminal() => {
                record.snapshot.cancel_requested = true;
                record.cancel.cancel();
                true
            }
            _ => false,
        }
    }

    fn snapshot(&self, id: TaskId) -> Option<TaskSnapshot> {
        self.lock().tasks.get(&id).map(|r| r.snapshot.clone())
    }

    fn remove_terminal(&self, id: TaskId) -> Result<TaskSnapshot, SupervisorError> {
        let mut inner = self.lock();
        let record = inner
            .tasks
            .get(&id)
            .ok_or(SupervisorError::NotFound { id: id.0 })?;
        if !record.snapshot.state.is_terminal() {
            return Err(SupervisorError::InvalidState {
                id: id.0,
                state: record.snapshot.state.to_string(),
            });
        }

        inner
            .tasks
            .remove(&id)
            .map(|r| r.snapshot)
            .ok_or(SupervisorError::NotFound { id: id.0 })
    }

    fn list(&self) -> Vec<TaskSnapshot> {
        let mut all: Vec<TaskSnapshot> = self.lock().tasks.values().map(|r| r.snapshot.clone()).collect();
        all.sort_by_key(|s| s.id);
        all
    }
}

/// Owns every download task of the process (or of a test).
pub struct TaskSupervisor {
    registry: Arc<Registry>,
    deps: TaskDeps,
    next_id: AtomicU64,
    download_dir: PathBuf,
    runtime: Handle,
}

impl TaskSupervisor {
    /// Supervisor backed by the yt-dlp CLI, ffmpeg, and the process-wide
    /// bootstrapper.
    ///
    /// Must be called from within a Tokio runtime; tasks are spawned on it.
    pub fn new(config: DownloaderConfig) -> Self {
        let extractor: Arc<dyn InfoExtractor> = Arc::new(CliInfoExtractor::new(&config.extractor));
        let muxer: Arc<dyn Muxer> = Arc::new(FfmpegMuxer::default());
        let bootstrapper = Bootstrapper::global(&config);
        Self::with_components(config, extractor, bootstrapper, muxer)
    }

    /// Supervisor with explicit capabilities, e.g. fakes in tests.
    pub fn with_components(
        config: DownloaderConfig,
        extractor: Arc<dyn InfoExtractor>,
        bootstrapper: Arc<Bootstrapper>,
        muxer: Arc<dyn Muxer>,
    ) -> Self {
        let (sender, _) = broadcast::channel(EVENT_CAPACITY);
        let registry = Arc::new(Registry::new(ProgressEmitter::new(sender)));

        let adapter = ExtractionAdapter::new(
            extractor,
            config.extractor.clone(),
            config.retry,
            config.network_timeout,
        );
        let deps = TaskDeps {
            bootstrapper,
            adapter,
            muxer,
            limiter: Arc::new(Semaphore::new(config.max_concurrent.max(1))),
            registry: registry.clone(),
            stall_timeout: config.stall_timeout,
            progress_interval: config.progress_interval,
            keep_partial_on_cancel: config.keep_partial_on_cancel,
        };

        Self {
            registry,
            deps,
            next_id: AtomicU64::new(1),
            download_dir: config.download_dir,
            runtime: Handle::current(),
        }
    }

    /// Accept a request and return immediately with its id.
    ///
    /// Requests without a directory go to the configured download directory.
    /// Fails only when the request names an explicit file that is not a plain
    /// file name, or that another live task already targets. Derived names are
    /// de-duplicated later instead.
    pub fn submit(&self, request: DownloadRequest) -> Result<TaskId, SupervisorError> {
        let destination_dir = request.destination_or(&self.download_dir);
        let target = request.explicit_target(&destination_dir)?;

        let id = TaskId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let cancel = CancellationToken::new();

        self.registry
            .insert(id, request.url.clone(), target.clone(), cancel.clone())?;
        info!("[{}] Queued {} ({})", id, request.url, request.selection);

        let job = DownloadJob {
            id,
            request,
            destination_dir,
            target,
            cancel,
        };
        self.runtime.spawn(run_task(job, self.deps.clone()));
        Ok(id)
    }

    /// Request cancellation. True when the task existed and was not terminal.
    pub fn cancel(&self, id: TaskId) -> bool {
        let cancelled = self.registry.cancel(id);
        if cancelled {
            info!("[{}] Cancellation requested", id);
        }
        cancelled
    }

    pub fn query(&self, id: TaskId) -> Result<TaskSnapshot, SupervisorError> {
        self.registry
            .snapshot(id)
            .ok_or(SupervisorError::NotFound { id: id.0 })
    }

    /// Remove a terminal task and return its final snapshot.
    pub fn clear(&self, id: TaskId) -> Result<TaskSnapshot, SupervisorError> {
        let snapshot = self.registry.remove_terminal(id)?;
        debug!("[{}] Cleared", id);
        Ok(snapshot)
    }

    /// All known tasks, oldest first.
    pub fn list(&self) -> Vec<TaskSnapshot> {
        self.registry.list()
    }

    /// State changes and progress of every task.
    pub fn subscribe(&self) -> broadcast::Receiver<TaskEvent> {
        self.registry.emitter.subscribe()
    }

    /// Resolve formats without starting a task, so a caller can pick a
    /// descriptor and submit it with `StreamSelection::Descriptor`.
    pub async fn resolve(&self, url: &str) -> Result<ResolvedMedia, ExtractionError> {
        self.deps.adapter.resolve(url).await
    }

    pub fn bootstrap_status(&self) -> BootstrapStatus {
        self.deps.bootstrapper.status()
    }

    /// Wait until `id` is terminal and return its final snapshot.
    pub async fn wait(&self, id: TaskId) -> Result<TaskSnapshot, SupervisorError> {
        let mut events = self.subscribe();
        loop {
            let snapshot = self.query(id)?;
            if snapshot.is_terminal() {
                return Ok(snapshot);
            }

            // Any event (or a lag) is a cue to look again
            loop {
                match events.recv().await {
                    Ok(TaskEvent::StateChanged { id: event_id, state }) if event_id == id && state.is_terminal() => break,
                    Ok(_) => continue,
                    Err(broadcast::error::RecvError::Lagged(_)) => break,
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        }
    }
}

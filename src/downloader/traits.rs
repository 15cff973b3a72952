// Capability traits consumed by download tasks

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::sync::broadcast;
use tracing::trace;

use super::errors::TransferError;
use super::models::{TaskEvent, TaskId, TaskProgress, TaskState};

/// Trait for muxing tool implementations
#[async_trait]
pub trait Muxer: Send + Sync {
    /// Name of the muxer (for logging)
    fn name(&self) -> &'static str;

    /// Combine `inputs` into `output` using the tool at `tool`.
    ///
    /// A non-zero exit is reported as `TransferError::MuxFailure`.
    async fn mux(&self, tool: &Path, inputs: &[PathBuf], output: &Path) -> Result<(), TransferError>;
}

/// Progress emitter helper
#[derive(Clone)]
pub struct ProgressEmitter {
    sender: broadcast::Sender<TaskEvent>,
}

impl ProgressEmitter {
    pub fn new(sender: broadcast::Sender<TaskEvent>) -> Self {
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<TaskEvent> {
        self.sender.subscribe()
    }

    pub fn emit(&self, event: TaskEvent) {
        // No subscribers is not an error
        if self.sender.send(event).is_err() {
            trace!("Dropped task event: no subscribers");
        }
    }

    pub fn state(&self, id: TaskId, state: TaskState) {
        self.emit(TaskEvent::StateChanged { id, state });
    }

    pub fn progress(&self, id: TaskId, progress: TaskProgress) {
        self.emit(TaskEvent::Progress { id, progress });
    }
}

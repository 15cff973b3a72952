// Downloader module - production-grade download orchestration core

pub mod bootstrap;
pub mod config;
pub mod errors;
pub mod extractors;
pub mod format_selector;
pub mod models;
pub mod mux;
pub mod supervisor;
pub mod traits;
pub mod transfer;
pub mod utils;

mod task;

pub use bootstrap::{BootstrapConfig, BootstrapStatus, Bootstrapper};
pub use config::DownloaderConfig;
pub use errors::{BootstrapError, ExtractionError, SupervisorError, TaskError, TransferError};
pub use extractors::{ExtractionAdapter, InfoExtractor, ResolvedMedia};
pub use format_selector::{FormatSelector, StreamDescriptors};
pub use models::{
    DownloadRequest, StreamDescriptor, StreamSelection, TaskEvent, TaskId, TaskOutcome,
    TaskProgress, TaskSnapshot, TaskState,
};
pub use supervisor::TaskSupervisor;
pub use traits::Muxer;

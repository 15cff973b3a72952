// Error types for the download core
//
// Every failure is a structured kind plus a detail string. Errors are Clone so a
// single bootstrap outcome can be handed to every waiting task, and Serialize so
// a front-end can render them without parsing messages.

use serde::Serialize;
use thiserror::Error;

/// Failures while making the muxing tool available
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BootstrapError {
    /// Host unreachable, connection reset, request timed out
    #[error("Network failure while fetching tool: {message}")]
    NetworkFailure { message: String },

    /// Server answered with a non-success status
    #[error("Unexpected HTTP status {status} while fetching tool")]
    HttpStatus { status: u16 },

    /// Empty payload, unreadable archive, or binary missing from it
    #[error("Corrupt tool archive: {message}")]
    CorruptArchive { message: String },

    /// Could not write the tool to its install location
    #[error("Filesystem failure installing tool: {message}")]
    FilesystemFailure { message: String },

    /// No prebuilt archive exists for this OS/arch
    #[error("No tool build available for this platform")]
    UnsupportedPlatform,
}

impl BootstrapError {
    pub fn network(message: impl Into<String>) -> Self {
        Self::NetworkFailure {
            message: message.into(),
        }
    }

    pub fn corrupt(message: impl Into<String>) -> Self {
        Self::CorruptArchive {
            message: message.into(),
        }
    }

    pub fn filesystem(message: impl Into<String>) -> Self {
        Self::FilesystemFailure {
            message: message.into(),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::NetworkFailure { .. } => "network_failure",
            Self::HttpStatus { .. } => "http_status",
            Self::CorruptArchive { .. } => "corrupt_archive",
            Self::FilesystemFailure { .. } => "filesystem_failure",
            Self::UnsupportedPlatform => "unsupported_platform",
        }
    }

    /// Only network hiccups and server-side statuses are worth retrying.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::NetworkFailure { .. } => true,
            Self::HttpStatus { status } => *status == 429 || *status >= 500,
            _ => false,
        }
    }
}

impl From<std::io::Error> for BootstrapError {
    fn from(err: std::io::Error) -> Self {
        Self::filesystem(err.to_string())
    }
}

/// Failures while resolving a URL into streams
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ExtractionError {
    /// Not a syntactically valid web address
    #[error("Invalid URL: {url}")]
    InvalidUrl { url: String },

    /// Unsupported site, removed or missing video
    #[error("Unsupported or unavailable content: {message}")]
    Unsupported { message: String },

    /// Private, age-restricted, geo-blocked, members-only, DRM
    #[error("Restricted content: {message}")]
    Restricted { message: String },

    /// Engine could not reach the site
    #[error("Network failure during extraction: {message}")]
    NetworkFailure { message: String },

    /// Engine output was not what we expect
    #[error("Could not parse extractor output: {message}")]
    ParseFailure { message: String },

    /// The extraction engine itself is missing or failed to start
    #[error("Extraction engine unavailable: {message}")]
    EngineUnavailable { message: String },

    /// The requested selection matched none of the resolved streams
    #[error("No stream matches the requested selection: {selection}")]
    NoMatchingStream { selection: String },
}

impl ExtractionError {
    pub fn unsupported(message: impl Into<String>) -> Self {
        Self::Unsupported {
            message: message.into(),
        }
    }

    pub fn restricted(message: impl Into<String>) -> Self {
        Self::Restricted {
            message: message.into(),
        }
    }

    pub fn network(message: impl Into<String>) -> Self {
        Self::NetworkFailure {
            message: message.into(),
        }
    }

    pub fn parse(message: impl Into<String>) -> Self {
        Self::ParseFailure {
            message: message.into(),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::InvalidUrl { .. } => "invalid_url",
            Self::Unsupported { .. } => "unsupported",
            Self::Restricted { .. } => "restricted",
            Self::NetworkFailure { .. } => "network_failure",
            Self::ParseFailure { .. } => "parse_failure",
            Self::EngineUnavailable { .. } => "engine_unavailable",
            Self::NoMatchingStream { .. } => "no_matching_stream",
        }
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, Self::NetworkFailure { .. })
    }
}

/// Failures while moving bytes to disk or muxing them
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TransferError {
    #[error("Network failure during transfer: {message}")]
    NetworkFailure { message: String },

    #[error("Filesystem failure during transfer: {message}")]
    FilesystemFailure { message: String },

    /// Muxing tool exited unsuccessfully
    #[error("Muxing failed (exit code {exit_code:?}): {message}")]
    MuxFailure {
        exit_code: Option<i32>,
        message: String,
    },

    /// No bytes arrived within the stall window
    #[error("Transfer stalled for more than {seconds}s")]
    Timeout { seconds: u64 },
}

impl TransferError {
    pub fn network(message: impl Into<String>) -> Self {
        Self::NetworkFailure {
            message: message.into(),
        }
    }

    pub fn filesystem(message: impl Into<String>) -> Self {
        Self::FilesystemFailure {
            message: message.into(),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::NetworkFailure { .. } => "network_failure",
            Self::FilesystemFailure { .. } => "filesystem_failure",
            Self::MuxFailure { .. } => "mux_failure",
            Self::Timeout { .. } => "timeout",
        }
    }
}

impl From<std::io::Error> for TransferError {
    fn from(err: std::io::Error) -> Self {
        Self::filesystem(err.to_string())
    }
}

/// Errors returned synchronously by Supervisor calls
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SupervisorError {
    #[error("Unknown task id: {id}")]
    NotFound { id: u64 },

    #[error("Task {id} is not in a terminal state ({state})")]
    InvalidState { id: u64, state: String },

    /// Another live task already targets this file
    #[error("Destination already in use: {path}")]
    DestinationCollision { path: String },

    /// Explicit file name is not a single plain path component
    #[error("Invalid output file name: {name:?}")]
    InvalidFileName { name: String },
}

/// Error recorded in a task's terminal Failed state
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize)]
#[serde(tag = "stage", content = "error", rename_all = "snake_case")]
pub enum TaskError {
    #[error(transparent)]
    Bootstrap(#[from] BootstrapError),

    #[error(transparent)]
    Extraction(#[from] ExtractionError),

    #[error(transparent)]
    Transfer(#[from] TransferError),
}

impl TaskError {
    /// Stable `stage.kind` tag, e.g. `extraction.restricted`.
    pub fn kind(&self) -> String {
        match self {
            Self::Bootstrap(e) => format!("bootstrap.{}", e.kind()),
            Self::Extraction(e) => format!("extraction.{}", e.kind()),
            Self::Transfer(e) => format!("transfer.{}", e.kind()),
        }
    }
}

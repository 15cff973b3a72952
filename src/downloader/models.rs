// Common data models for the download core

use serde::{Deserialize, Serialize};
use std::fmt;
use std::ffi::OsStr;
use std::path::{Component, Path, PathBuf};

use super::errors::{SupervisorError, TaskError};

/// A downloadable stream option produced by the extraction adapter
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamDescriptor {
    /// Engine format id (e.g. "22", "137")
    pub format_id: String,
    /// Companion audio format id when the stream must be muxed
    pub audio_format_id: Option<String>,
    /// Output container extension (mp4, webm, m4a)
    pub container: String,
    /// Resolution or bitrate label (e.g. "1080p", "128k")
    pub label: String,
    /// Video height in pixels, if this stream has video
    pub height: Option<u32>,
    /// Approximate size in bytes (video + audio for muxed streams)
    pub approx_size: Option<u64>,
    /// True when separate audio and video must be combined
    pub requires_mux: bool,
    /// True when the stream carries audio only
    pub audio_only: bool,
}

impl StreamDescriptor {
    /// Format ids to fetch, in order: video (or combined) first, then audio.
    pub fn part_format_ids(&self) -> Vec<&str> {
        let mut ids = vec![self.format_id.as_str()];
        if self.requires_mux {
            if let Some(audio) = &self.audio_format_id {
                ids.push(audio.as_str());
            }
        }
        ids
    }

    /// Combined audio+video in a single stream.
    pub fn is_combined(&self) -> bool {
        !self.requires_mux && !self.audio_only
    }
}

/// How a task picks its stream once formats are resolved
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "policy", content = "value", rename_all = "snake_case")]
pub enum StreamSelection {
    /// Highest quality, combined audio+video preferred over muxed
    #[default]
    Best,
    /// Exact engine format id
    FormatId(String),
    /// Resolution label such as "720p"
    Resolution(String),
    /// Best audio-only stream
    AudioOnly,
    /// Caller already picked a descriptor from a previous resolve
    Descriptor(Box<StreamDescriptor>),
}

impl fmt::Display for StreamSelection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Best => write!(f, "best"),
            Self::FormatId(id) => write!(f, "format {}", id),
            Self::Resolution(label) => write!(f, "resolution {}", label),
            Self::AudioOnly => write!(f, "audio only"),
            Self::Descriptor(d) => write!(f, "format {}", d.format_id),
        }
    }
}

/// A single submission to the supervisor
#[derive(Debug, Clone)]
pub struct DownloadRequest {
    pub url: String,
    pub selection: StreamSelection,
    /// Falls back to `DownloaderConfig::download_dir` when unset
    pub destination_dir: Option<PathBuf>,
    /// Explicit output file name; derived from the title when absent
    pub file_name: Option<String>,
}

impl DownloadRequest {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            selection: StreamSelection::Best,
            destination_dir: None,
            file_name: None,
        }
    }

    pub fn with_destination_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.destination_dir = Some(dir.into());
        self
    }

    pub fn with_selection(mut self, selection: StreamSelection) -> Self {
        self.selection = selection;
        self
    }

    pub fn with_file_name(mut self, name: impl Into<String>) -> Self {
        self.file_name = Some(name.into());
        self
    }

    /// Directory the output lands in, `default_dir` unless the request names one.
    pub fn destination_or(&self, default_dir: &Path) -> PathBuf {
        self.destination_dir
            .clone()
            .unwrap_or_else(|| default_dir.to_path_buf())
    }

    /// Target path known at submission time, if the caller named the file.
    ///
    /// The name must be a single plain component so the target stays inside
    /// `dir`; separators, `..`, and absolute paths are rejected.
    pub fn explicit_target(&self, dir: &Path) -> Result<Option<PathBuf>, SupervisorError> {
        let Some(name) = &self.file_name else {
            return Ok(None);
        };
        if !is_plain_file_name(name) {
            return Err(SupervisorError::InvalidFileName { name: name.clone() });
        }
        Ok(Some(dir.join(name)))
    }
}

fn is_plain_file_name(name: &str) -> bool {
    let mut components = Path::new(name).components();
    match (components.next(), components.next()) {
        (Some(Component::Normal(part)), None) => part == OsStr::new(name),
        _ => false,
    }
}

/// Opaque task identifier handed out by the supervisor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TaskId(pub u64);

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "task-{}", self.0)
    }
}

/// Lifecycle of a download task. Only moves forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    Queued,
    Bootstrapping,
    Resolving,
    Active,
    Completed,
    Failed,
    Cancelled,
}

impl TaskState {
    fn rank(self) -> u8 {
        match self {
            Self::Queued => 0,
            Self::Bootstrapping => 1,
            Self::Resolving => 2,
            Self::Active => 3,
            Self::Completed | Self::Failed | Self::Cancelled => 4,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    /// Forward-only transition graph. Failed/Cancelled are reachable from any
    /// live state, Completed only from Active.
    pub fn can_transition_to(self, next: TaskState) -> bool {
        if self.is_terminal() {
            return false;
        }
        match next {
            Self::Completed => self == Self::Active,
            Self::Failed | Self::Cancelled => true,
            _ => next.rank() == self.rank() + 1,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Bootstrapping => "bootstrapping",
            Self::Resolving => "resolving",
            Self::Active => "active",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Byte-level progress of a task
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TaskProgress {
    pub bytes_downloaded: u64,
    pub total_bytes: Option<u64>,
    /// 0.0..=1.0, None while the total is unknown
    pub fraction: Option<f64>,
    /// Smoothed transfer rate
    pub speed_bps: f64,
    pub eta_seconds: Option<u64>,
}

/// Terminal result of a task
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum TaskOutcome {
    Completed { path: PathBuf },
    Failed { error: TaskError },
    /// Partial files are listed only when retained by configuration
    Cancelled { partial_files: Vec<PathBuf> },
}

/// Immutable copy of a task as seen by the caller
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TaskSnapshot {
    pub id: TaskId,
    pub url: String,
    pub state: TaskState,
    pub progress: TaskProgress,
    pub stream: Option<StreamDescriptor>,
    /// Final target path once claimed
    pub destination: Option<PathBuf>,
    pub outcome: Option<TaskOutcome>,
    pub cancel_requested: bool,
}

impl TaskSnapshot {
    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }

    pub fn completed_path(&self) -> Option<&PathBuf> {
        match &self.outcome {
            Some(TaskOutcome::Completed { path }) => Some(path),
            _ => None,
        }
    }

    pub fn error(&self) -> Option<&TaskError> {
        match &self.outcome {
            Some(TaskOutcome::Failed { error }) => Some(error),
            _ => None,
        }
    }
}

/// Events published on the supervisor's subscription channel
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TaskEvent {
    StateChanged { id: TaskId, state: TaskState },
    Progress { id: TaskId, progress: TaskProgress },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_forward_transitions() {
        assert!(TaskState::Queued.can_transition_to(TaskState::Bootstrapping));
        assert!(TaskState::Bootstrapping.can_transition_to(TaskState::Resolving));
        assert!(TaskState::Resolving.can_transition_to(TaskState::Active));
        assert!(TaskState::Active.can_transition_to(TaskState::Completed));
    }

    #[test]
    fn test_no_skipping_or_going_back() {
        assert!(!TaskState::Queued.can_transition_to(TaskState::Active));
        assert!(!TaskState::Resolving.can_transition_to(TaskState::Completed));
        assert!(!TaskState::Active.can_transition_to(TaskState::Resolving));
        assert!(!TaskState::Active.can_transition_to(TaskState::Active));
    }

    #[test]
    fn test_failure_and_cancel_from_any_live_state() {
        for state in [
            TaskState::Queued,
            TaskState::Bootstrapping,
            TaskState::Resolving,
            TaskState::Active,
        ] {
            assert!(state.can_transition_to(TaskState::Failed));
            assert!(state.can_transition_to(TaskState::Cancelled));
        }
    }

    #[test]
    fn test_terminal_states_are_final() {
        for terminal in [TaskState::Completed, TaskState::Failed, TaskState::Cancelled] {
            assert!(terminal.is_terminal());
            for next in [
                TaskState::Queued,
                TaskState::Active,
                TaskState::Completed,
                TaskState::Failed,
                TaskState::Cancelled,
            ] {
                assert!(!terminal.can_transition_to(next));
            }
        }
    }

    #[test]
    fn test_part_ids_for_muxed_stream() {
        let d = StreamDescriptor {
            format_id: "137".to_string(),
            audio_format_id: Some("140".to_string()),
            container: "mp4".to_string(),
            label: "1080p".to_string(),
            height: Some(1080),
            approx_size: None,
            requires_mux: true,
            audio_only: false,
        };
        assert_eq!(d.part_format_ids(), vec!["137", "140"]);
        assert!(!d.is_combined());
    }

    #[test]
    fn test_explicit_target() {
        let dir = Path::new("/tmp/out");
        let req = DownloadRequest::new("https://example.com/v").with_file_name("a.mp4");
        assert_eq!(req.explicit_target(dir), Ok(Some(dir.join("a.mp4"))));
        let req = DownloadRequest::new("https://example.com/v");
        assert_eq!(req.explicit_target(dir), Ok(None));
    }

    #[test]
    fn test_explicit_name_cannot_leave_the_directory() {
        let dir = Path::new("/tmp/out");
        for name in ["../x.mp4", "/abs.mp4", "a/../x.mp4", "sub/x.mp4", "x.mp4/", ".", ""] {
            let req = DownloadRequest::new("https://example.com/v").with_file_name(name);
            assert_eq!(
                req.explicit_target(dir),
                Err(SupervisorError::InvalidFileName { name: name.to_string() }),
                "{}",
                name
            );
        }
    }

    #[test]
    fn test_destination_falls_back_to_default() {
        let default_dir = Path::new("/tmp/default");
        let req = DownloadRequest::new("https://example.com/v");
        assert_eq!(req.destination_or(default_dir), default_dir);
        let req = req.with_destination_dir("/tmp/chosen");
        assert_eq!(req.destination_or(default_dir), PathBuf::from("/tmp/chosen"));
    }
}

//! Shared fakes for supervisor integration tests.

#![allow(dead_code)]

use std::collections::HashMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use tempfile::TempDir;
use tokio::sync::broadcast;

use video_downloader_core::bootstrap::{make_executable, ArchiveFormat, ArchiveSource, ToolArchive};
use video_downloader_core::extractors::{ByteStream, EngineFormat, ExtractorConfig, MediaInfo};
use video_downloader_core::utils::RetryPolicy;
use video_downloader_core::{
    BootstrapConfig, BootstrapError, Bootstrapper, DownloaderConfig, ExtractionError, InfoExtractor,
    Muxer, TaskEvent, TaskId, TaskProgress, TaskState, TaskSupervisor, TransferError,
};

pub const URL: &str = "https://example.com/watch?v=abc";

// ============================================================================
// Extraction engine
// ============================================================================

/// Scripted body of one format
#[derive(Clone)]
pub struct FakeStream {
    pub chunks: Vec<Bytes>,
    pub total: Option<u64>,
    pub chunk_delay: Duration,
    /// Stop sending after the last chunk without closing the stream
    pub hang: bool,
}

impl FakeStream {
    pub fn new(data: &[u8], chunk_size: usize) -> Self {
        Self {
            chunks: data.chunks(chunk_size).map(Bytes::copy_from_slice).collect(),
            total: Some(data.len() as u64),
            chunk_delay: Duration::ZERO,
            hang: false,
        }
    }

    /// Sends the first `sent` chunks of `chunk_count`, then goes silent.
    pub fn stalling(chunk_size: usize, chunk_count: usize, sent: usize) -> Self {
        Self {
            chunks: (0..sent).map(|_| Bytes::from(vec![b'x'; chunk_size])).collect(),
            total: Some((chunk_size * chunk_count) as u64),
            chunk_delay: Duration::ZERO,
            hang: true,
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.chunk_delay = delay;
        self
    }
}

pub struct FakeExtractor {
    info: Result<MediaInfo, ExtractionError>,
    streams: HashMap<String, FakeStream>,
    pub extract_calls: AtomicU32,
}

impl FakeExtractor {
    pub fn new(info: MediaInfo) -> Self {
        Self {
            info: Ok(info),
            streams: HashMap::new(),
            extract_calls: AtomicU32::new(0),
        }
    }

    pub fn failing(error: ExtractionError) -> Self {
        Self {
            info: Err(error),
            streams: HashMap::new(),
            extract_calls: AtomicU32::new(0),
        }
    }

    pub fn with_stream(mut self, format_id: &str, stream: FakeStream) -> Self {
        self.streams.insert(format_id.to_string(), stream);
        self
    }
}

#[async_trait]
impl InfoExtractor for FakeExtractor {
    fn name(&self) -> &'static str {
        "fake"
    }

    async fn extract(&self, _url: &str, _config: &ExtractorConfig) -> Result<MediaInfo, ExtractionError> {
        self.extract_calls.fetch_add(1, Ordering::SeqCst);
        self.info.clone()
    }

    async fn open_stream(
        &self,
        _url: &str,
        format_id: &str,
        _config: &ExtractorConfig,
    ) -> Result<ByteStream, TransferError> {
        let stream = self
            .streams
            .get(format_id)
            .cloned()
            .ok_or_else(|| TransferError::network(format!("no stream for {}", format_id)))?;

        let delay = stream.chunk_delay;
        let body = futures::stream::iter(stream.chunks).then(move |chunk| async move {
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            Ok::<Bytes, TransferError>(chunk)
        });

        let body = if stream.hang {
            body.chain(futures::stream::pending()).boxed()
        } else {
            body.boxed()
        };

        Ok(ByteStream {
            total: stream.total,
            body,
        })
    }
}

pub fn combined_format(id: &str, height: u32, size: u64) -> EngineFormat {
    EngineFormat {
        format_id: id.to_string(),
        ext: "mp4".to_string(),
        height: Some(height),
        vcodec: Some("avc1.42001E".to_string()),
        acodec: Some("mp4a.40.2".to_string()),
        filesize: Some(size),
        ..Default::default()
    }
}

pub fn video_only_format(id: &str, height: u32, size: u64) -> EngineFormat {
    EngineFormat {
        format_id: id.to_string(),
        ext: "mp4".to_string(),
        height: Some(height),
        vcodec: Some("avc1.640028".to_string()),
        acodec: Some("none".to_string()),
        filesize: Some(size),
        video_only: true,
        ..Default::default()
    }
}

pub fn audio_only_format(id: &str, size: u64) -> EngineFormat {
    EngineFormat {
        format_id: id.to_string(),
        ext: "m4a".to_string(),
        vcodec: Some("none".to_string()),
        acodec: Some("mp4a.40.2".to_string()),
        filesize: Some(size),
        abr: Some(128.0),
        audio_only: true,
        ..Default::default()
    }
}

pub fn video_info(title: &str, formats: Vec<EngineFormat>) -> MediaInfo {
    MediaInfo {
        id: "abc".to_string(),
        title: title.to_string(),
        uploader: "tester".to_string(),
        duration_seconds: 42,
        webpage_url: URL.to_string(),
        formats,
    }
}

// ============================================================================
// Archive source
// ============================================================================

/// Serves an in-memory zip holding `bin/ffmpeg.exe` and counts fetches.
pub struct FakeArchiveSource {
    pub fetches: AtomicU32,
    payload: Vec<u8>,
    delay: Duration,
}

impl FakeArchiveSource {
    pub fn new() -> Self {
        Self {
            fetches: AtomicU32::new(0),
            payload: tool_zip(),
            delay: Duration::from_millis(50),
        }
    }

    pub fn fetch_count(&self) -> u32 {
        self.fetches.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ArchiveSource for FakeArchiveSource {
    async fn fetch(&self, _archive: &ToolArchive, dest: &Path) -> Result<u64, BootstrapError> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(self.delay).await;
        tokio::fs::write(dest, &self.payload).await?;
        Ok(self.payload.len() as u64)
    }
}

pub fn tool_zip() -> Vec<u8> {
    let mut cursor = std::io::Cursor::new(Vec::new());
    {
        let mut zip = zip::ZipWriter::new(&mut cursor);
        let options = zip::write::SimpleFileOptions::default();
        zip.start_file("ffmpeg-build/bin/ffmpeg.exe", options).unwrap();
        zip.write_all(b"#!/bin/sh\nexit 0\n").unwrap();
        zip.finish().unwrap();
    }
    cursor.into_inner()
}

// ============================================================================
// Muxer
// ============================================================================

/// Concatenates its inputs, or fails with a fixed exit code.
#[derive(Default)]
pub struct FakeMuxer {
    pub calls: Mutex<Vec<Vec<PathBuf>>>,
    pub fail_with: Option<i32>,
}

impl FakeMuxer {
    pub fn failing(code: i32) -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
            fail_with: Some(code),
        }
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

#[async_trait]
impl Muxer for FakeMuxer {
    fn name(&self) -> &'static str {
        "fake-mux"
    }

    async fn mux(&self, _tool: &Path, inputs: &[PathBuf], output: &Path) -> Result<(), TransferError> {
        self.calls.lock().unwrap().push(inputs.to_vec());

        if let Some(code) = self.fail_with {
            return Err(TransferError::MuxFailure {
                exit_code: Some(code),
                message: "Invalid data found when processing input".to_string(),
            });
        }

        let mut merged = Vec::new();
        for input in inputs {
            merged.extend(tokio::fs::read(input).await?);
        }
        tokio::fs::write(output, merged).await?;
        Ok(())
    }
}

// ============================================================================
// Harness
// ============================================================================

pub struct Harness {
    pub dir: TempDir,
    pub supervisor: TaskSupervisor,
    pub bootstrapper: Arc<Bootstrapper>,
    pub source: Arc<FakeArchiveSource>,
    pub muxer: Arc<FakeMuxer>,
    pub extractor: Arc<FakeExtractor>,
}

pub fn quick_retry() -> RetryPolicy {
    RetryPolicy {
        max_attempts: 3,
        initial_backoff: Duration::from_millis(1),
        max_backoff: Duration::from_millis(5),
    }
}

pub fn harness(extractor: FakeExtractor) -> Harness {
    harness_with(extractor, FakeMuxer::default(), |config| config)
}

/// Must be called inside a Tokio runtime.
pub fn harness_with(
    extractor: FakeExtractor,
    muxer: FakeMuxer,
    configure: impl FnOnce(DownloaderConfig) -> DownloaderConfig,
) -> Harness {
    let dir = TempDir::new().unwrap();

    let bootstrap_config = BootstrapConfig::default()
        .with_tools_dir(dir.path().join("tools"))
        .with_prefer_system_tool(false)
        .with_archive(ToolArchive::new(
            "https://example.com/ffmpeg.zip",
            ArchiveFormat::Zip,
            "bin/ffmpeg.exe",
        ));

    let mut config = DownloaderConfig::default()
        .with_download_dir(dir.path().join("downloads"))
        .with_stall_timeout(Duration::from_secs(10))
        .with_retry(quick_retry())
        .with_bootstrap(bootstrap_config.clone());
    config.progress_interval = Duration::ZERO;
    let config = configure(config);

    let source = Arc::new(FakeArchiveSource::new());
    let bootstrapper = Arc::new(Bootstrapper::new(bootstrap_config, source.clone(), quick_retry()));
    let muxer = Arc::new(muxer);
    let extractor = Arc::new(extractor);

    let supervisor =
        TaskSupervisor::with_components(config, extractor.clone(), bootstrapper.clone(), muxer.clone());

    Harness {
        dir,
        supervisor,
        bootstrapper,
        source,
        muxer,
        extractor,
    }
}

impl Harness {
    pub fn download_dir(&self) -> PathBuf {
        self.dir.path().join("downloads")
    }

    /// Put a usable tool in place so bootstrapping skips the fetch.
    pub fn preinstall_tool(&self) {
        let tool = self.bootstrapper.status().tool_path;
        std::fs::create_dir_all(tool.parent().unwrap()).unwrap();
        std::fs::write(&tool, b"#!/bin/sh\nexit 0\n").unwrap();
        make_executable(&tool).unwrap();
    }

    /// Files left in the download directory (empty if it does not exist).
    pub fn downloaded_files(&self) -> Vec<PathBuf> {
        let mut files: Vec<PathBuf> = std::fs::read_dir(self.download_dir())
            .map(|entries| entries.filter_map(|e| e.ok()).map(|e| e.path()).collect())
            .unwrap_or_default();
        files.sort();
        files
    }
}

/// Drain already-delivered events for `id`.
pub fn drain_events(rx: &mut broadcast::Receiver<TaskEvent>, id: TaskId) -> (Vec<TaskState>, Vec<TaskProgress>) {
    let mut states = Vec::new();
    let mut progress = Vec::new();
    while let Ok(event) = rx.try_recv() {
        match event {
            TaskEvent::StateChanged { id: event_id, state } if event_id == id => states.push(state),
            TaskEvent::Progress { id: event_id, progress: p } if event_id == id => progress.push(p),
            _ => {}
        }
    }
    (states, progress)
}

/// Wait for a progress event of `id` at or above `fraction`.
pub async fn wait_for_fraction(rx: &mut broadcast::Receiver<TaskEvent>, id: TaskId, fraction: f64) -> TaskProgress {
    let deadline = Duration::from_secs(5);
    tokio::time::timeout(deadline, async {
        loop {
            match rx.recv().await {
                Ok(TaskEvent::Progress { id: event_id, progress })
                    if event_id == id && progress.fraction.unwrap_or(0.0) >= fraction =>
                {
                    return progress;
                }
                Ok(_) => continue,
                Err(e) => panic!("event channel failed: {}", e),
            }
        }
    })
    .await
    .expect("progress threshold not reached")
}

/// Wait until `id` reports `state`.
pub async fn wait_for_state(rx: &mut broadcast::Receiver<TaskEvent>, id: TaskId, state: TaskState) {
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            match rx.recv().await {
                Ok(TaskEvent::StateChanged { id: event_id, state: s }) if event_id == id && s == state => return,
                Ok(_) => continue,
                Err(e) => panic!("event channel failed: {}", e),
            }
        }
    })
    .await
    .expect("state not reached")
}

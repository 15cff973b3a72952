// Byte transfer to `.part` files with progress accounting
//
// Every chunk wait races the task's cancellation token and the stall timer,
// so cancellation is observed at least once per chunk and a silent source
// fails with `TransferError::Timeout` instead of hanging.

use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use futures::StreamExt;
use tokio::io::AsyncWriteExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::errors::{BootstrapError, ExtractionError, TaskError, TransferError};
use super::extractors::ByteStream;
use super::models::TaskProgress;

/// Why a task stopped before completing
#[derive(Debug, Clone, PartialEq)]
pub enum Interrupted {
    Cancelled,
    Failed(TaskError),
}

impl From<TransferError> for Interrupted {
    fn from(err: TransferError) -> Self {
        Self::Failed(err.into())
    }
}

impl From<ExtractionError> for Interrupted {
    fn from(err: ExtractionError) -> Self {
        Self::Failed(err.into())
    }
}

impl From<BootstrapError> for Interrupted {
    fn from(err: BootstrapError) -> Self {
        Self::Failed(err.into())
    }
}

/// Rate-limiter for progress updates.
pub struct ProgressThrottle {
    last_emit: Option<Instant>,
    min_interval: Duration,
}

impl ProgressThrottle {
    pub const fn new(min_interval: Duration) -> Self {
        Self {
            last_emit: None,
            min_interval,
        }
    }

    /// Check if enough time has passed to emit another progress update.
    pub fn should_emit(&mut self) -> bool {
        let now = Instant::now();
        match self.last_emit {
            Some(last) if now.duration_since(last) < self.min_interval => false,
            _ => {
                self.last_emit = Some(now);
                true
            }
        }
    }
}

/// Exponentially weighted transfer speed in bytes per second.
pub struct SpeedEstimator {
    window_start: Instant,
    window_bytes: u64,
    speed: Option<f64>,
}

impl SpeedEstimator {
    const WINDOW: Duration = Duration::from_millis(500);
    const ALPHA: f64 = 0.3;

    pub fn new() -> Self {
        Self {
            window_start: Instant::now(),
            window_bytes: 0,
            speed: None,
        }
    }

    pub fn record(&mut self, bytes: u64) {
        self.window_bytes += bytes;
        let elapsed = self.window_start.elapsed();
        if elapsed < Self::WINDOW {
            return;
        }

        let sample = self.window_bytes as f64 / elapsed.as_secs_f64();
        self.speed = Some(match self.speed {
            Some(prev) => Self::ALPHA * sample + (1.0 - Self::ALPHA) * prev,
            None => sample,
        });
        self.window_start = Instant::now();
        self.window_bytes = 0;
    }

    pub fn bytes_per_second(&self) -> f64 {
        self.speed.unwrap_or(0.0)
    }
}

impl Default for SpeedEstimator {
    fn default() -> Self {
        Self::new()
    }
}

/// Cumulative progress of one task across all of its parts.
///
/// Bytes only grow; the fraction never moves backwards even when the
/// expected total is refined mid-transfer.
pub struct ProgressTracker {
    progress: TaskProgress,
    throttle: ProgressThrottle,
    speed: SpeedEstimator,
}

impl ProgressTracker {
    pub fn new(total_bytes: Option<u64>, interval: Duration) -> Self {
        Self {
            progress: TaskProgress {
                total_bytes: total_bytes.filter(|t| *t > 0),
                ..TaskProgress::default()
            },
            throttle: ProgressThrottle::new(interval),
            speed: SpeedEstimator::new(),
        }
    }

    pub fn set_total(&mut self, total_bytes: Option<u64>) {
        if let Some(total) = total_bytes.filter(|t| *t > 0) {
            self.progress.total_bytes = Some(total);
        }
    }

    /// Account for `bytes` more; returns a snapshot when one is due.
    pub fn advance(&mut self, bytes: u64) -> Option<TaskProgress> {
        self.progress.bytes_downloaded += bytes;
        self.speed.record(bytes);
        self.refresh();

        if self.throttle.should_emit() {
            Some(self.progress.clone())
        } else {
            None
        }
    }

    /// Final snapshot after every byte has landed.
    pub fn finish(&mut self) -> TaskProgress {
        if self.progress.total_bytes.is_none() {
            self.progress.total_bytes = Some(self.progress.bytes_downloaded);
        }
        self.progress.fraction = Some(1.0);
        self.progress.eta_seconds = Some(0);
        self.progress.clone()
    }

    fn refresh(&mut self) {
        let speed = self.speed.bytes_per_second();
        self.progress.speed_bps = speed;

        let Some(total) = self.progress.total_bytes else {
            self.progress.fraction = None;
            self.progress.eta_seconds = None;
            return;
        };

        let raw = (self.progress.bytes_downloaded as f64 / total as f64).min(1.0);
        let previous = self.progress.fraction.unwrap_or(0.0);
        self.progress.fraction = Some(raw.max(previous));

        let remaining = total.saturating_sub(self.progress.bytes_downloaded);
        self.progress.eta_seconds = (speed > 0.0).then(|| (remaining as f64 / speed).ceil() as u64);
    }
}

/// Write `stream` into `dest`, reporting each chunk to `on_bytes`.
pub async fn fetch_part(
    mut stream: ByteStream,
    dest: &Path,
    cancel: &CancellationToken,
    stall_timeout: Duration,
    mut on_bytes: impl FnMut(u64),
) -> Result<u64, Interrupted> {
    let mut file = tokio::fs::File::create(dest).await.map_err(TransferError::from)?;
    let mut written: u64 = 0;

    loop {
        let next = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                // Kept partials must hold every byte already written
                let _ = file.flush().await;
                return Err(Interrupted::Cancelled);
            }
            next = tokio::time::timeout(stall_timeout, stream.body.next()) => next,
        };

        let chunk = match next {
            Err(_) => {
                return Err(TransferError::Timeout {
                    seconds: stall_timeout.as_secs(),
                }
                .into())
            }
            Ok(None) => break,
            Ok(Some(Err(e))) => return Err(e.into()),
            Ok(Some(Ok(chunk))) => chunk,
        };

        file.write_all(&chunk).await.map_err(TransferError::from)?;
        written += chunk.len() as u64;
        on_bytes(chunk.len() as u64);
    }

    file.flush().await.map_err(TransferError::from)?;

    if let Some(total) = stream.total {
        if written < total {
            return Err(TransferError::network(format!(
                "Connection closed after {} of {} bytes",
                written, total
            ))
            .into());
        }
    }

    debug!("Wrote {} bytes to {}", written, dest.display());
    Ok(written)
}

/// Best-effort removal of leftover files.
pub async fn remove_files(paths: &[PathBuf]) {
    for path in paths {
        match tokio::fs::remove_file(path).await {
            Ok(()) => debug!("Removed {}", path.display()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!("Could not remove {}: {}", path.display(), e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use tempfile::TempDir;

    fn byte_stream(chunks: Vec<Result<Bytes, TransferError>>, total: Option<u64>) -> ByteStream {
        ByteStream {
            total,
            body: futures::stream::iter(chunks).boxed(),
        }
    }

    #[test]
    fn test_throttle_respects_interval() {
        let mut throttle = ProgressThrottle::new(Duration::from_millis(50));
        assert!(throttle.should_emit());
        assert!(!throttle.should_emit());

        std::thread::sleep(Duration::from_millis(60));
        assert!(throttle.should_emit());
    }

    #[test]
    fn test_tracker_fraction_never_decreases() {
        let mut tracker = ProgressTracker::new(Some(100), Duration::ZERO);
        let first = tracker.advance(50).unwrap();
        assert_eq!(first.fraction, Some(0.5));

        // A larger exact total would lower the raw fraction
        tracker.set_total(Some(200));
        let second = tracker.advance(10).unwrap();
        assert_eq!(second.bytes_downloaded, 60);
        assert_eq!(second.fraction, Some(0.5));

        let done = tracker.finish();
        assert_eq!(done.fraction, Some(1.0));
    }

    #[test]
    fn test_tracker_unknown_total_is_indeterminate() {
        let mut tracker = ProgressTracker::new(None, Duration::ZERO);
        let p = tracker.advance(10).unwrap();
        assert_eq!(p.fraction, None);
        assert_eq!(p.eta_seconds, None);
        assert_eq!(tracker.finish().total_bytes, Some(10));
    }

    #[tokio::test]
    async fn test_fetch_part_writes_all_chunks() {
        let dir = TempDir::new().unwrap();
        let dest = dir.path().join("clip.mp4.f18.part");
        let stream = byte_stream(
            vec![Ok(Bytes::from_static(b"hello ")), Ok(Bytes::from_static(b"world"))],
            Some(11),
        );

        let mut seen = Vec::new();
        let written = fetch_part(stream, &dest, &CancellationToken::new(), Duration::from_secs(5), |n| {
            seen.push(n)
        })
        .await
        .unwrap();

        assert_eq!(written, 11);
        assert_eq!(seen, vec![6, 5]);
        assert_eq!(std::fs::read(&dest).unwrap(), b"hello world");
    }

    #[tokio::test]
    async fn test_fetch_part_short_body_is_network_failure() {
        let dir = TempDir::new().unwrap();
        let stream = byte_stream(vec![Ok(Bytes::from_static(b"abc"))], Some(10));

        let err = fetch_part(stream, &dir.path().join("p"), &CancellationToken::new(), Duration::from_secs(5), |_| {})
            .await
            .unwrap_err();
        assert_eq!(err, Interrupted::Failed(TaskError::Transfer(TransferError::network("Connection closed after 3 of 10 bytes"))));
    }

    #[tokio::test]
    async fn test_fetch_part_stall_times_out() {
        let dir = TempDir::new().unwrap();
        let stream = ByteStream {
            total: None,
            body: futures::stream::pending().boxed(),
        };

        let err = fetch_part(stream, &dir.path().join("p"), &CancellationToken::new(), Duration::from_millis(50), |_| {})
            .await
            .unwrap_err();
        assert_eq!(err, Interrupted::Failed(TaskError::Transfer(TransferError::Timeout { seconds: 0 })));
    }

    #[tokio::test]
    async fn test_fetch_part_observes_cancellation() {
        let dir = TempDir::new().unwrap();
        let stream = ByteStream {
            total: None,
            body: futures::stream::pending().boxed(),
        };
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = fetch_part(stream, &dir.path().join("p"), &cancel, Duration::from_secs(30), |_| {})
            .await
            .unwrap_err();
        assert_eq!(err, Interrupted::Cancelled);
    }

    #[tokio::test]
    async fn test_remove_files_ignores_missing() {
        let dir = TempDir::new().unwrap();
        let present = dir.path().join("a.part");
        std::fs::write(&present, b"x").unwrap();

        remove_files(&[present.clone(), dir.path().join("missing.part")]).await;
        assert!(!present.exists());
    }
}

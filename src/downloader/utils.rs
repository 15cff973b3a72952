// Helper functions shared by the extractor, bootstrapper and muxer

use std::future::Future;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use lazy_static::lazy_static;
use regex::Regex;
use thiserror::Error;
use tokio::io::AsyncReadExt;
use tokio::process::Command as TokioCommand;
use tokio::time::timeout;
use tracing::{debug, warn};

/// Failure to run an external program to completion
#[derive(Debug, Clone, Error)]
pub enum CommandError {
    #[error("Failed to start {program}: {message}")]
    Spawn { program: String, message: String },

    #[error("Timed out after {seconds}s")]
    TimedOut { seconds: u64 },

    #[error("I/O error talking to {program}: {message}")]
    Io { program: String, message: String },
}

/// Run command with timeout, capturing stdout and stderr
pub async fn run_output_with_timeout(
    program: &Path,
    args: &[String],
    timeout_secs: u64,
) -> Result<std::process::Output, CommandError> {
    let name = program.display().to_string();
    let io_err = |message: String| CommandError::Io {
        program: name.clone(),
        message,
    };

    let mut child = TokioCommand::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| CommandError::Spawn {
            program: name.clone(),
            message: e.to_string(),
        })?;

    let mut stdout_pipe = child
        .stdout
        .take()
        .ok_or_else(|| io_err("stdout not captured".to_string()))?;
    let mut stderr_pipe = child
        .stderr
        .take()
        .ok_or_else(|| io_err("stderr not captured".to_string()))?;

    let stdout_task = tokio::spawn(async move {
        let mut buf = Vec::new();
        stdout_pipe.read_to_end(&mut buf).await.map(|_| buf)
    });
    let stderr_task = tokio::spawn(async move {
        let mut buf = Vec::new();
        stderr_pipe.read_to_end(&mut buf).await.map(|_| buf)
    });

    match timeout(Duration::from_secs(timeout_secs), child.wait()).await {
        Ok(status_res) => {
            let status = status_res.map_err(|e| io_err(e.to_string()))?;
            let stdout = stdout_task
                .await
                .map_err(|e| io_err(e.to_string()))?
                .map_err(|e| io_err(e.to_string()))?;
            let stderr = stderr_task
                .await
                .map_err(|e| io_err(e.to_string()))?
                .map_err(|e| io_err(e.to_string()))?;
            Ok(std::process::Output {
                status,
                stdout,
                stderr,
            })
        }
        Err(_) => {
            let _ = child.kill().await;
            stdout_task.abort();
            stderr_task.abort();
            Err(CommandError::TimedOut {
                seconds: timeout_secs,
            })
        }
    }
}

/// Bounded retry with exponential backoff
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts including the first one
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(500),
            max_backoff: Duration::from_secs(5),
        }
    }
}

impl RetryPolicy {
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    /// Backoff before attempt `attempt + 1` (attempt counts from 1).
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.initial_backoff
            .saturating_mul(factor)
            .min(self.max_backoff)
    }
}

/// Run `op` until it succeeds, fails permanently, or attempts run out.
pub async fn retry_with_backoff<T, E, F, Fut>(
    policy: &RetryPolicy,
    label: &str,
    is_transient: impl Fn(&E) -> bool,
    mut op: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 1;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if attempt < max_attempts && is_transient(&e) => {
                let wait = policy.backoff_for(attempt);
                warn!(
                    "{} failed (attempt {}/{}): {}; retrying in {:?}",
                    label, attempt, max_attempts, e, wait
                );
                tokio::time::sleep(wait).await;
                attempt += 1;
            }
            Err(e) => {
                debug!("{} giving up after {} attempt(s)", label, attempt);
                return Err(e);
            }
        }
    }
}

lazy_static! {
    static ref UNSAFE_FILENAME_RE: Regex = Regex::new(r#"[<>:"/\\|?*\x00-\x1f]+"#).unwrap();
    static ref WHITESPACE_RE: Regex = Regex::new(r"\s+").unwrap();
}

/// Make a video title safe to use as a file name on every platform
pub fn sanitize_file_name(title: &str) -> String {
    let cleaned = UNSAFE_FILENAME_RE.replace_all(title, "_");
    let collapsed = WHITESPACE_RE.replace_all(cleaned.trim(), " ");
    let trimmed: String = collapsed
        .trim_matches(|c: char| c == '.' || c == ' ')
        .chars()
        .take(150)
        .collect();

    if trimmed.is_empty() {
        "video".to_string()
    } else {
        trimmed
    }
}

/// First `name (n).ext` variant of `path` accepted by `is_free`
pub fn unique_path(path: &Path, is_free: impl Fn(&Path) -> bool) -> PathBuf {
    if is_free(path) {
        return path.to_path_buf();
    }

    let parent = path.parent().map(Path::to_path_buf).unwrap_or_default();
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_else(|| "video".to_string());
    let ext = path.extension().map(|e| e.to_string_lossy().to_string());

    (1u32..)
        .map(|n| {
            let name = match &ext {
                Some(ext) => format!("{} ({}).{}", stem, n, ext),
                None => format!("{} ({})", stem, n),
            };
            parent.join(name)
        })
        .find(|candidate| is_free(candidate))
        .unwrap_or_else(|| path.to_path_buf())
}

/// `<file>.<suffix>.part` sibling used while bytes are in flight
pub fn part_path(target: &Path, suffix: &str) -> PathBuf {
    let name = target
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| "download".to_string());
    target.with_file_name(format!("{}.{}.part", name, suffix))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn test_sanitize_file_name() {
        assert_eq!(sanitize_file_name("My: Video / Part 1?"), "My_ Video _ Part 1_");
        assert_eq!(sanitize_file_name("  spaced   out  "), "spaced out");
        assert_eq!(sanitize_file_name("..."), "video");
        assert_eq!(sanitize_file_name(""), "video");
    }

    #[test]
    fn test_unique_path_renames() {
        let taken = [PathBuf::from("/d/a.mp4"), PathBuf::from("/d/a (1).mp4")];
        let path = unique_path(Path::new("/d/a.mp4"), |p| !taken.iter().any(|t| t == p));
        assert_eq!(path, PathBuf::from("/d/a (2).mp4"));
    }

    #[test]
    fn test_unique_path_free() {
        let path = unique_path(Path::new("/d/a.mp4"), |_| true);
        assert_eq!(path, PathBuf::from("/d/a.mp4"));
    }

    #[test]
    fn test_part_path() {
        let p = part_path(Path::new("/d/clip.mp4"), "f137");
        assert_eq!(p, PathBuf::from("/d/clip.mp4.f137.part"));
    }

    #[test]
    fn test_backoff_grows_and_caps() {
        let policy = RetryPolicy {
            max_attempts: 5,
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_millis(300),
        };
        assert_eq!(policy.backoff_for(1), Duration::from_millis(100));
        assert_eq!(policy.backoff_for(2), Duration::from_millis(200));
        assert_eq!(policy.backoff_for(3), Duration::from_millis(300));
    }

    #[tokio::test]
    async fn test_retry_stops_on_permanent_error() {
        let calls = AtomicU32::new(0);
        let policy = RetryPolicy {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(1),
            max_backoff: Duration::from_millis(1),
        };
        let result: Result<(), String> = retry_with_backoff(
            &policy,
            "test",
            |e: &String| e == "transient",
            || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err("permanent".to_string()) }
            },
        )
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_retry_transient_until_exhausted() {
        let calls = AtomicU32::new(0);
        let policy = RetryPolicy {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(1),
            max_backoff: Duration::from_millis(1),
        };
        let result: Result<(), String> = retry_with_backoff(
            &policy,
            "test",
            |e: &String| e == "transient",
            || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err("transient".to_string()) }
            },
        )
        .await;
        assert_eq!(result, Err("transient".to_string()));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_retry_recovers() {
        let calls = AtomicU32::new(0);
        let policy = RetryPolicy {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(1),
            max_backoff: Duration::from_millis(1),
        };
        let result: Result<u32, String> = retry_with_backoff(
            &policy,
            "test",
            |_: &String| true,
            || {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n == 0 {
                        Err("transient".to_string())
                    } else {
                        Ok(n)
                    }
                }
            },
        )
        .await;
        assert_eq!(result, Ok(1));
    }
}

// Muxing through the bootstrapped ffmpeg binary

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use super::errors::TransferError;
use super::traits::Muxer;
use super::utils::{run_output_with_timeout, CommandError};

/// Stream-copies inputs into one container with `ffmpeg -c copy`
pub struct FfmpegMuxer {
    timeout_secs: u64,
}

impl FfmpegMuxer {
    pub fn new(timeout_secs: u64) -> Self {
        Self { timeout_secs }
    }

    fn build_args(inputs: &[PathBuf], output: &Path) -> Vec<String> {
        let mut args = vec![
            "-hide_banner".to_string(),
            "-loglevel".to_string(),
            "error".to_string(),
            "-y".to_string(),
        ];
        for input in inputs {
            args.push("-i".to_string());
            args.push(input.to_string_lossy().to_string());
        }
        for index in 0..inputs.len() {
            args.push("-map".to_string());
            args.push(index.to_string());
        }
        args.extend(["-c".to_string(), "copy".to_string()]);
        args.push(output.to_string_lossy().to_string());
        args
    }
}

impl Default for FfmpegMuxer {
    fn default() -> Self {
        Self::new(600)
    }
}

#[async_trait]
impl Muxer for FfmpegMuxer {
    fn name(&self) -> &'static str {
        "ffmpeg"
    }

    async fn mux(&self, tool: &Path, inputs: &[PathBuf], output: &Path) -> Result<(), TransferError> {
        let args = Self::build_args(inputs, output);
        debug!("[FfmpegMuxer] {} {}", tool.display(), args.join(" "));

        let result = run_output_with_timeout(tool, &args, self.timeout_secs)
            .await
            .map_err(|e| match e {
                CommandError::TimedOut { seconds } => TransferError::MuxFailure {
                    exit_code: None,
                    message: format!("ffmpeg timed out after {}s", seconds),
                },
                other => TransferError::MuxFailure {
                    exit_code: None,
                    message: other.to_string(),
                },
            })?;

        if !result.status.success() {
            let stderr = String::from_utf8_lossy(&result.stderr);
            let message = stderr
                .lines()
                .rev()
                .map(str::trim)
                .find(|l| !l.is_empty())
                .unwrap_or("ffmpeg failed")
                .to_string();
            warn!("[FfmpegMuxer] exit {:?}: {}", result.status.code(), message);
            return Err(TransferError::MuxFailure {
                exit_code: result.status.code(),
                message,
            });
        }

        info!("[FfmpegMuxer] Merged {} inputs into {}", inputs.len(), output.display());
        Ok(())
    }
}

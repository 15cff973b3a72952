// CLI InfoExtractor - uses native `yt-dlp` binary
//
// Resolution runs `yt-dlp --dump-json`; stream fetch runs `yt-dlp -f <id> -o -`
// and hands stdout to the caller as a byte stream.

use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use std::path::PathBuf;
use std::process::Stdio;
use tokio::process::{Child, Command as TokioCommand};
use tokio_util::io::ReaderStream;
use tracing::{debug, info, warn};

use super::diagnostics::classify_engine_error;
use super::traits::{ByteStream, EngineFormat, ExtractorConfig, InfoExtractor, MediaInfo};
use crate::downloader::errors::{ExtractionError, TransferError};
use crate::downloader::utils::{run_output_with_timeout, CommandError};

/// CLI-based info extractor using yt-dlp binary
pub struct CliInfoExtractor {
    ytdlp_path: PathBuf,
}

impl CliInfoExtractor {
    pub fn new(config: &ExtractorConfig) -> Self {
        Self {
            ytdlp_path: config.ytdlp_path.clone().unwrap_or_else(Self::find_ytdlp),
        }
    }

    /// Find yt-dlp binary
    fn find_ytdlp() -> PathBuf {
        let common_paths = [
            "/opt/homebrew/bin/yt-dlp", // Homebrew on Apple Silicon
            "/usr/local/bin/yt-dlp",    // Homebrew on Intel Mac
            "/usr/bin/yt-dlp",          // System installation
        ];

        if let Ok(path) = which::which("yt-dlp") {
            return path;
        }

        common_paths
            .iter()
            .map(PathBuf::from)
            .find(|p| p.exists())
            .unwrap_or_else(|| PathBuf::from("yt-dlp"))
    }

    /// Flags shared by resolution and fetch
    fn common_args(config: &ExtractorConfig) -> Vec<String> {
        let mut args = vec![
            "--no-playlist".to_string(),
            "--no-warnings".to_string(),
            "--socket-timeout".to_string(),
            config.timeout_seconds.to_string(),
        ];

        if let Some(path) = &config.cookies_path {
            args.push("--cookies".to_string());
            args.push(path.clone());
        }

        if let Some(proxy) = &config.proxy {
            args.push("--proxy".to_string());
            args.push(proxy.clone());
        }

        args
    }

    fn build_info_args(url: &str, config: &ExtractorConfig) -> Vec<String> {
        let mut args = vec!["--dump-json".to_string()];
        args.extend(Self::common_args(config));
        args.push(url.to_string());
        args
    }

    fn build_fetch_args(url: &str, format_id: &str, config: &ExtractorConfig) -> Vec<String> {
        let mut args = vec![
            "--quiet".to_string(),
            "--no-part".to_string(),
            "-f".to_string(),
            format_id.to_string(),
            "-o".to_string(),
            "-".to_string(),
        ];
        args.extend(Self::common_args(config));
        args.push(url.to_string());
        args
    }

    /// Parse `--dump-json` output into MediaInfo.
    ///
    /// The engine prints one JSON object per line, one per playlist entry.
    /// Only single items are downloadable, so more than one object (or a
    /// playlist object) is reported as unsupported rather than malformed.
    pub(crate) fn parse_json(stdout: &[u8]) -> Result<MediaInfo, ExtractionError> {
        let json_str = String::from_utf8_lossy(stdout);
        let mut values =
            serde_json::Deserializer::from_str(json_str.trim()).into_iter::<serde_json::Value>();

        let json = match values.next() {
            Some(Ok(value)) => value,
            Some(Err(e)) => return Err(ExtractionError::parse(format!("Invalid JSON: {}", e))),
            None => return Err(ExtractionError::parse("Empty engine output")),
        };

        match values.next() {
            None => {}
            Some(Ok(_)) => return Err(Self::playlist_error(&json)),
            Some(Err(e)) => return Err(ExtractionError::parse(format!("Invalid JSON: {}", e))),
        }

        if json["_type"].as_str() == Some("playlist") || json.get("entries").is_some() {
            return Err(Self::playlist_error(&json));
        }

        let formats = Self::parse_formats(&json)?;

        Ok(MediaInfo {
            id: json["id"].as_str().unwrap_or("unknown").to_string(),
            title: json["title"].as_str().unwrap_or("Unknown").to_string(),
            uploader: json["uploader"].as_str().unwrap_or("Unknown").to_string(),
            duration_seconds: json["duration"].as_f64().unwrap_or(0.0) as u64,
            webpage_url: json["webpage_url"].as_str().unwrap_or("").to_string(),
            formats,
        })
    }

    fn playlist_error(first: &serde_json::Value) -> ExtractionError {
        let title = first["playlist_title"]
            .as_str()
            .or_else(|| first["title"].as_str())
            .unwrap_or("untitled");
        ExtractionError::unsupported(format!(
            "Playlist URL ({}); submit entries individually",
            title
        ))
    }

    fn parse_formats(json: &serde_json::Value) -> Result<Vec<EngineFormat>, ExtractionError> {
        let formats_array = json["formats"]
            .as_array()
            .ok_or_else(|| ExtractionError::parse("No formats array in JSON"))?;

        let mut formats = Vec::with_capacity(formats_array.len());

        for f in formats_array {
            let Some(format_id) = f["format_id"].as_str() else {
                return Err(ExtractionError::parse("Format entry without format_id"));
            };
            let vcodec = f["vcodec"].as_str().map(|s| s.to_string());
            let acodec = f["acodec"].as_str().map(|s| s.to_string());

            let video_only = vcodec.as_ref().map_or(false, |v| v != "none")
                && acodec.as_ref().map_or(true, |a| a == "none");
            let audio_only = acodec.as_ref().map_or(false, |a| a != "none")
                && vcodec.as_ref().map_or(true, |v| v == "none");

            formats.push(EngineFormat {
                format_id: format_id.to_string(),
                ext: f["ext"].as_str().unwrap_or("").to_string(),
                resolution: f["resolution"].as_str().map(|s| s.to_string()),
                width: f["width"].as_u64().map(|w| w as u32),
                height: f["height"].as_u64().map(|h| h as u32),
                vcodec,
                acodec,
                filesize: f["filesize"].as_u64(),
                filesize_approx: f["filesize_approx"].as_u64(),
                tbr: f["tbr"].as_f64().map(|t| t as f32),
                abr: f["abr"].as_f64().map(|a| a as f32),
                video_only,
                audio_only,
            });
        }

        Ok(formats)
    }
}

#[async_trait]
impl InfoExtractor for CliInfoExtractor {
    fn name(&self) -> &'static str {
        "cli-yt-dlp"
    }

    async fn extract(
        &self,
        url: &str,
        config: &ExtractorConfig,
    ) -> Result<MediaInfo, ExtractionError> {
        let args = Self::build_info_args(url, config);
        debug!("[CliExtractor] {} {}", self.ytdlp_path.display(), args.join(" "));

        let output = run_output_with_timeout(&self.ytdlp_path, &args, config.timeout_seconds as u64)
            .await
            .map_err(|e| match e {
                CommandError::TimedOut { .. } => ExtractionError::network(e.to_string()),
                CommandError::Spawn { .. } | CommandError::Io { .. } => {
                    ExtractionError::EngineUnavailable {
                        message: e.to_string(),
                    }
                }
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            warn!("[CliExtractor] yt-dlp failed for {}: {}", url, stderr.trim());
            return Err(classify_engine_error(&stderr));
        }

        let info = Self::parse_json(&output.stdout)?;
        info!(
            "[CliExtractor] Resolved '{}' with {} formats",
            info.title,
            info.formats.len()
        );
        Ok(info)
    }

    async fn open_stream(
        &self,
        url: &str,
        format_id: &str,
        config: &ExtractorConfig,
    ) -> Result<ByteStream, TransferError> {
        let args = Self::build_fetch_args(url, format_id, config);
        debug!("[CliExtractor] {} {}", self.ytdlp_path.display(), args.join(" "));

        let mut child = TokioCommand::new(&self.ytdlp_path)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| TransferError::network(format!("Failed to start yt-dlp: {}", e)))?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| TransferError::network("yt-dlp stdout not captured"))?;

        Ok(ByteStream {
            total: None,
            body: child_stream(child, ReaderStream::new(stdout)).boxed(),
        })
    }
}

/// Stream stdout chunks, then surface a non-zero exit as a network failure.
/// Dropping the stream kills the child.
fn child_stream(
    child: Child,
    reader: ReaderStream<tokio::process::ChildStdout>,
) -> impl futures::Stream<Item = Result<Bytes, TransferError>> {
    futures::stream::unfold(Some((child, reader)), |state| async move {
        let (mut child, mut reader) = state?;
        match reader.next().await {
            Some(Ok(chunk)) => Some((Ok(chunk), Some((child, reader)))),
            Some(Err(e)) => Some((Err(TransferError::network(e.to_string())), None)),
            None => match child.wait().await {
                Ok(status) if status.success() => None,
                Ok(status) => Some((
                    Err(TransferError::network(format!(
                        "yt-dlp exited with {}",
                        status
                    ))),
                    None,
                )),
                Err(e) => Some((Err(TransferError::network(e.to_string())), None)),
            },
        }
    })
}

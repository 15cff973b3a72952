// The extraction engine seam
//
// An engine turns a URL into metadata plus its native format list, and can
// open the byte stream of any one of those formats.

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

use crate::downloader::errors::{ExtractionError, TransferError};

/// Engine invocation settings
#[derive(Debug, Clone)]
pub struct ExtractorConfig {
    /// yt-dlp binary; PATH and the usual install locations when unset
    pub ytdlp_path: Option<PathBuf>,
    pub proxy: Option<String>,
    /// Netscape cookies file handed to the engine
    pub cookies_path: Option<String>,
    pub timeout_seconds: u32,
}

impl Default for ExtractorConfig {
    fn default() -> Self {
        Self {
            ytdlp_path: None,
            proxy: None,
            cookies_path: None,
            timeout_seconds: 30,
        }
    }
}

impl ExtractorConfig {
    pub fn with_proxy(mut self, proxy: Option<String>) -> Self {
        self.proxy = proxy;
        self
    }

    pub fn with_cookies_path(mut self, path: Option<String>) -> Self {
        self.cookies_path = path;
        self
    }

    pub fn with_timeout(mut self, seconds: u32) -> Self {
        self.timeout_seconds = seconds;
        self
    }
}

/// One entry of the engine's format list, before any selection
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EngineFormat {
    /// Engine-native id, e.g. "137"
    pub format_id: String,
    pub ext: String,
    /// "1920x1080", "audio only", ...
    pub resolution: Option<String>,
    pub width: Option<u32>,
    pub height: Option<u32>,
    /// "none" when the stream carries no video
    pub vcodec: Option<String>,
    /// "none" when the stream carries no audio
    pub acodec: Option<String>,
    pub filesize: Option<u64>,
    pub filesize_approx: Option<u64>,
    /// kbit/s
    pub tbr: Option<f32>,
    /// kbit/s
    pub abr: Option<f32>,
    pub video_only: bool,
    pub audio_only: bool,
}

impl EngineFormat {
    /// Exact size if known, else the engine's estimate.
    pub fn effective_size(&self) -> Option<u64> {
        self.filesize.or(self.filesize_approx)
    }

    pub fn is_combined(&self) -> bool {
        !self.video_only && !self.audio_only && codec_present(self.vcodec.as_deref())
    }

    pub fn is_aac(&self) -> bool {
        matches!(self.acodec.as_deref(), Some(c) if c.starts_with("mp4a"))
    }
}

fn codec_present(codec: Option<&str>) -> bool {
    matches!(codec, Some(c) if !c.is_empty() && c != "none")
}


/// Resolved media: identity plus every format the engine offers
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MediaInfo {
    pub id: String,
    pub title: String,
    pub uploader: String,
    pub duration_seconds: u64,
    pub webpage_url: String,
    pub formats: Vec<EngineFormat>,
}

/// Body of a single stream fetch
pub struct ByteStream {
    /// Expected length, when the source knows it
    pub total: Option<u64>,
    pub body: BoxStream<'static, Result<Bytes, TransferError>>,
}

impl fmt::Debug for ByteStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ByteStream")
            .field("total", &self.total)
            .finish_non_exhaustive()
    }
}

#[async_trait]
pub trait InfoExtractor: Send + Sync {
    /// Used in logs
    fn name(&self) -> &'static str;

    async fn extract(&self, url: &str, config: &ExtractorConfig) -> Result<MediaInfo, ExtractionError>;

    /// Open the byte stream of `format_id` as listed by `extract`.
    async fn open_stream(
        &self,
        url: &str,
        format_id: &str,
        config: &ExtractorConfig,
    ) -> Result<ByteStream, TransferError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codec_flags() {
        let muxed = EngineFormat {
            vcodec: Some("avc1.64001F".to_string()),
            acodec: Some("mp4a.40.2".to_string()),
            ..Default::default()
        };
        assert!(muxed.is_combined() && muxed.is_aac());

        let silent = EngineFormat {
            vcodec: Some("vp9".to_string()),
            acodec: Some("none".to_string()),
            video_only: true,
            ..Default::default()
        };
        assert!(!silent.is_combined());
        assert!(!silent.is_aac());

        let audio = EngineFormat {
            vcodec: Some("none".to_string()),
            audio_only: true,
            ..Default::default()
        };
        assert!(!audio.is_combined());
    }

    #[test]
    fn test_effective_size_prefers_exact() {
        let f = EngineFormat {
            filesize: Some(10),
            filesize_approx: Some(12),
            ..Default::default()
        };
        assert_eq!(f.effective_size(), Some(10));
        assert_eq!(
            EngineFormat {
                filesize_approx: Some(12),
                ..Default::default()
            }
            .effective_size(),
            Some(12)
        );
    }
}

// Extraction adapter - validated, time-bounded, retried resolution
//
// Wraps an InfoExtractor so the rest of the core sees one call:
// `resolve(url) -> ResolvedMedia` with structured error kinds.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info};
use url::Url;

use super::traits::{ByteStream, ExtractorConfig, InfoExtractor};
use crate::downloader::errors::{ExtractionError, TransferError};
use crate::downloader::format_selector::{FormatSelector, StreamDescriptors};
use crate::downloader::utils::{retry_with_backoff, RetryPolicy};

/// Result of resolving one URL
#[derive(Debug)]
pub struct ResolvedMedia {
    pub id: String,
    pub title: String,
    /// Distinct video heights offered by the source, highest first
    pub resolutions: Vec<String>,
    pub descriptors: StreamDescriptors,
}

#[derive(Clone)]
pub struct ExtractionAdapter {
    extractor: Arc<dyn InfoExtractor>,
    config: ExtractorConfig,
    retry: RetryPolicy,
    timeout: Duration,
}

impl ExtractionAdapter {
    pub fn new(
        extractor: Arc<dyn InfoExtractor>,
        config: ExtractorConfig,
        retry: RetryPolicy,
        timeout: Duration,
    ) -> Self {
        Self {
            extractor,
            config,
            retry,
            timeout,
        }
    }

    /// Resolve `url` into stream descriptors.
    ///
    /// Only the URL syntax is checked here; whether the content is supported
    /// is reported by the engine.
    pub async fn resolve(&self, url: &str) -> Result<ResolvedMedia, ExtractionError> {
        validate_url(url)?;

        let info = retry_with_backoff(
            &self.retry,
            "extraction",
            ExtractionError::is_transient,
            || async {
                match tokio::time::timeout(self.timeout, self.extractor.extract(url, &self.config)).await {
                    Ok(result) => result,
                    Err(_) => Err(ExtractionError::network(format!(
                        "{} did not answer within {}s",
                        self.extractor.name(),
                        self.timeout.as_secs()
                    ))),
                }
            },
        )
        .await?;

        info!(
            "[{}] {} -> '{}' ({} formats)",
            self.extractor.name(),
            url,
            info.title,
            info.formats.len()
        );

        let resolutions = FormatSelector::available_resolutions(&info.formats);
        Ok(ResolvedMedia {
            id: info.id,
            title: info.title,
            resolutions,
            descriptors: FormatSelector::build_descriptors(info.formats),
        })
    }

    /// Open the byte stream for one format id, bounded by the network timeout.
    pub async fn open_stream(&self, url: &str, format_id: &str) -> Result<ByteStream, TransferError> {
        debug!("[{}] opening format {}", self.extractor.name(), format_id);
        tokio::time::timeout(
            self.timeout,
            self.extractor.open_stream(url, format_id, &self.config),
        )
        .await
        .map_err(|_| TransferError::Timeout {
            seconds: self.timeout.as_secs(),
        })?
    }
}

/// Accept absolute http(s) URLs with a host
pub fn validate_url(raw: &str) -> Result<Url, ExtractionError> {
    let invalid = || ExtractionError::InvalidUrl {
        url: raw.to_string(),
    };

    let parsed = Url::parse(raw.trim()).map_err(|_| invalid())?;
    match parsed.scheme() {
        "http" | "https" if parsed.host_str().is_some() => Ok(parsed),
        _ => Err(invalid()),
    }
}

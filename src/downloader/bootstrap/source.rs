//! Fetching tool archives.

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use tokio::fs::File;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};

use super::catalog::ToolArchive;
use crate::downloader::errors::BootstrapError;

/// Capability to fetch an archive to a local file.
#[async_trait]
pub trait ArchiveSource: Send + Sync {
    /// Writes the archive to `dest` and returns the number of bytes written.
    async fn fetch(&self, archive: &ToolArchive, dest: &Path) -> Result<u64, BootstrapError>;
}

/// Streams archives over HTTP(S) with reqwest.
pub struct HttpArchiveSource {
    client: reqwest::Client,
    /// Maximum silence between two chunks
    read_timeout: Duration,
}

impl HttpArchiveSource {
    pub fn new(timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .connect_timeout(timeout)
            .user_agent(concat!("video-downloader-core/", env!("CARGO_PKG_VERSION")))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());

        Self {
            client,
            read_timeout: timeout,
        }
    }
}

#[async_trait]
impl ArchiveSource for HttpArchiveSource {
    async fn fetch(&self, archive: &ToolArchive, dest: &Path) -> Result<u64, BootstrapError> {
        info!("Downloading {} to {}", archive.url, dest.display());

        let response = tokio::time::timeout(self.read_timeout, self.client.get(&archive.url).send())
            .await
            .map_err(|_| BootstrapError::network(format!("No response from {}", archive.url)))?
            .map_err(|e| BootstrapError::network(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(BootstrapError::HttpStatus {
                status: status.as_u16(),
            });
        }
        debug!("Content-Length: {:?}", response.content_length());

        let mut file = File::create(dest).await?;
        let mut stream = response.bytes_stream();
        let mut written: u64 = 0;

        loop {
            let next = tokio::time::timeout(self.read_timeout, stream.next())
                .await
                .map_err(|_| BootstrapError::network("Archive download stalled"))?;
            let Some(chunk) = next else { break };
            let chunk = chunk.map_err(|e| BootstrapError::network(e.to_string()))?;
            file.write_all(&chunk).await?;
            written += chunk.len() as u64;
        }
        file.flush().await?;

        if written == 0 {
            return Err(BootstrapError::corrupt("Empty archive payload"));
        }

        info!("Downloaded {} bytes from {}", written, archive.url);
        Ok(written)
    }
}

use crate::error::{Result, ScoutError};
use crate::scrapers::browser::USER_AGENT;
use async_trait::async_trait;
use reqwest::Client;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tracing::debug;

/// Downloads one image to disk.
#[async_trait]
pub trait ImageFetcher: Send + Sync {
    async fn download(&self, url: &str, dest: &Path) -> Result<()>;
}

/// Streams images over HTTP with the same browser identity as the crawler.
pub struct HttpImageFetcher {
    client: Client,
}

impl HttpImageFetcher {
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(USER_AGENT)
            .build()?;
        Ok(Self { client })
    }
}

/// Sibling path the body is streamed into before it is moved to `dest`.
fn partial_path(dest: &Path) -> PathBuf {
    let mut name = dest.file_name().map(OsString::from).unwrap_or_default();
    name.push(".part");
    dest.with_file_name(name)
}

impl HttpImageFetcher {
    async fn stream_to(&self, url: &str, path: &Path) -> Result<usize> {
        let mut response = self.client.get(url).send().await?.error_for_status()?;

        let mut file = tokio::fs::File::create(path).await?;
        let mut written = 0usize;
        while let Some(chunk) = response.chunk().await? {
            file.write_all(&chunk).await?;
            written += chunk.len();
        }
        file.flush().await?;

        if written == 0 {
            return Err(ScoutError::photo(format!("Empty response body for {url}")));
        }
        Ok(written)
    }
}

#[async_trait]
impl ImageFetcher for HttpImageFetcher {
    /// Only a complete body ever appears at `dest`; a failed transfer leaves
    /// nothing behind, so the listing is retried on the next run.
    async fn download(&self, url: &str, dest: &Path) -> Result<()> {
        let part = partial_path(dest);
        let written = match self.stream_to(url, &part).await {
            Ok(written) => written,
            Err(e) => {
                tokio::fs::remove_file(&part).await.ok();
                return Err(e);
            }
        };
        if let Err(e) = tokio::fs::rename(&part, dest).await {
            tokio::fs::remove_file(&part).await.ok();
            return Err(e.into());
        }

        debug!("Downloaded {} bytes to {}", written, dest.display());
        Ok(())
    }
}

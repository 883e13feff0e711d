//! Full-resolution photo capture for newly discovered listings.
//!
//! Photos land in a content-addressed directory per listing (see
//! [`storage::listing_dir`]). A directory that already holds an image is
//! never revisited, so re-running a batch costs no network traffic.

pub mod capture;
pub mod download;
pub mod storage;

use crate::error::Result;
use crate::models::{Listing, PhotoStats};
use async_trait::async_trait;
use download::ImageFetcher;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info, warn};

/// Produces the full-size image URLs for one listing's detail page.
#[async_trait]
pub trait ImageSource: Send + Sync {
    async fn collect_image_urls(&self, link: &str) -> Result<Vec<String>>;
}

pub struct PhotoDownloader {
    root: PathBuf,
    source: Arc<dyn ImageSource>,
    fetcher: Arc<dyn ImageFetcher>,
}

impl PhotoDownloader {
    pub fn new(
        root: impl Into<PathBuf>,
        source: Arc<dyn ImageSource>,
        fetcher: Arc<dyn ImageFetcher>,
    ) -> Self {
        Self {
            root: root.into(),
            source,
            fetcher,
        }
    }

    /// Capture and store photos for one listing.
    ///
    /// Errors from the detail-page visit abort this listing only; individual
    /// image failures are counted in the returned stats.
    pub async fn download_listing(&self, listing: &Listing) -> Result<PhotoStats> {
        let mut stats = PhotoStats {
            listings: 1,
            ..PhotoStats::default()
        };
        info!("Downloading photos for listing: {}", listing.display_name());

        let dir = storage::listing_dir(&self.root, &listing.link);
        let existing = storage::photo_paths(&dir)?;
        if !existing.is_empty() {
            info!(
                "Photos already exist for this listing ({} images), skipping download",
                existing.len()
            );
            stats.skipped = 1;
            return Ok(stats);
        }

        tokio::fs::create_dir_all(&dir).await?;
        storage::write_metadata(&dir, &listing.link, listing.title.as_deref().unwrap_or(""))?;

        let urls = self.source.collect_image_urls(&listing.link).await?;
        if urls.is_empty() {
            warn!("No images found in carousel for {}", listing.link);
            return Ok(stats);
        }
        stats.total = urls.len();

        for (idx, url) in urls.iter().enumerate() {
            let dest = dir.join(storage::photo_filename(url, idx + 1));
            match self.fetcher.download(url, &dest).await {
                Ok(()) => stats.downloaded += 1,
                Err(e) => {
                    warn!("Failed to download image {}: {}", url, e);
                    stats.errors += 1;
                }
            }
        }

        info!(
            "Downloaded {}/{} photos for listing",
            stats.downloaded, stats.total
        );
        Ok(stats)
    }

    /// One listing at a time, in the given order. A failing listing is
    /// counted and the batch moves on.
    pub async fn download_all(&self, listings: &[Listing]) -> PhotoStats {
        let mut stats = PhotoStats::default();
        for listing in listings {
            match self.download_listing(listing).await {
                Ok(listing_stats) => stats.merge(listing_stats),
                Err(e) => {
                    error!("Error downloading photos for {}: {}", listing.link, e);
                    stats.listings += 1;
                    stats.errors += 1;
                }
            }
        }
        info!(
            "Photo download complete: {} listings, {} downloaded, {} skipped, {} errors",
            stats.listings, stats.downloaded, stats.skipped, stats.errors
        );
        stats
    }
}

use crate::config::AppConfig;
use crate::error::{Result, ScoutError};
use crate::export::write_csv;
use crate::models::{Listing, RunSummary, SaveSummary};
use crate::notify::Notifier;
use crate::parser::parse_listings;
use crate::photos::PhotoDownloader;
use crate::scrapers::traits::{ContinuationStrategy, PageFetcher};
use crate::scrapers::types::set_rows_param;
use crate::store::{ListingStore, SeenSetOracle};
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};
use url::Url;

/// How often an idle scheduler checks its stop flag.
const STOP_POLL: Duration = Duration::from_secs(1);

/// Everything a crawl run needs, passed explicitly.
pub struct ScoutContext {
    pub config: AppConfig,
    pub store: Arc<dyn ListingStore>,
    pub fetcher: Arc<dyn PageFetcher>,
    pub photos: Option<PhotoDownloader>,
    pub notifier: Option<Arc<dyn Notifier>>,
}

/// Outcome of fetching, parsing and saving one result page.
#[derive(Debug)]
pub struct CrawlResult {
    pub listings: Vec<Listing>,
    pub saved: SaveSummary,
}

impl CrawlResult {
    /// Listings inserted by this crawl, in page order.
    pub fn new_listings(&self) -> Vec<Listing> {
        let new_links: HashSet<&str> = self.saved.new_links.iter().map(String::as_str).collect();
        self.listings
            .iter()
            .filter(|l| new_links.contains(l.link.as_str()))
            .cloned()
            .collect()
    }
}

/// Fetch inside an open run record. A fetch error closes the run as failed
/// before it is returned.
pub async fn fetch_in_run(
    store: &dyn ListingStore,
    run_id: i64,
    fetcher: &dyn PageFetcher,
    url: &str,
    strategy: Option<Arc<dyn ContinuationStrategy>>,
) -> Result<String> {
    match fetcher.fetch(url, strategy).await {
        Ok(html) => Ok(html),
        Err(e) => {
            if let Err(finish_err) = store
                .finish_run(run_id, &RunSummary::failed(e.to_string()))
                .await
            {
                error!("Failed to record failed run {}: {}", run_id, finish_err);
            }
            Err(e)
        }
    }
}

pub struct Scheduler {
    ctx: ScoutContext,
    url: String,
    base: Url,
    rows: Option<u32>,
}

impl Scheduler {
    pub fn new(ctx: ScoutContext, url: impl Into<String>, rows: Option<u32>) -> Result<Self> {
        let url = url.into();
        let base = Url::parse(&url)
            .map_err(|e| ScoutError::Config(format!("Invalid search URL {}: {}", url, e)))?;
        info!(
            "Scheduler initialized: interval={}min, url={}",
            ctx.config.interval.as_secs() / 60,
            url
        );
        Ok(Self {
            ctx,
            url,
            base,
            rows,
        })
    }

    /// Fetch with smart scrolling, parse and save. A batch the store rejects
    /// is written to the CSV fallback before the error is returned.
    /// Bookkeeping is the caller's concern.
    pub async fn crawl(&self) -> Result<CrawlResult> {
        let url = set_rows_param(&self.url, self.rows)?;
        info!(
            "Fetching listings from: {} ({})",
            url,
            self.ctx.fetcher.backend_name()
        );

        let strategy: Arc<dyn ContinuationStrategy> =
            Arc::new(SeenSetOracle::new(Arc::clone(&self.ctx.store), self.base.clone()));
        let html = self.ctx.fetcher.fetch(&url, Some(strategy)).await?;

        let listings = parse_listings(&html, &self.base);
        if listings.is_empty() {
            warn!("No listings found");
            return Ok(CrawlResult {
                listings,
                saved: SaveSummary::default(),
            });
        }

        let saved = match self.ctx.store.save(&listings).await {
            Ok(saved) => saved,
            Err(e) => {
                let path = &self.ctx.config.csv_fallback;
                error!("Database error: {}. Falling back to CSV.", e);
                match write_csv(&listings, path) {
                    Ok(()) => info!("Saved {} listings to CSV: {}", listings.len(), path.display()),
                    Err(csv_err) => error!("CSV fallback failed for {}: {}", path.display(), csv_err),
                }
                return Err(e);
            }
        };
        info!(
            "Saved {} listings: {} new, {} updated",
            listings.len(),
            saved.new,
            saved.updated
        );
        Ok(CrawlResult { listings, saved })
    }

    /// One full cycle. Returns the number of new listings.
    pub async fn run_once(&self) -> Result<usize> {
        let store = &self.ctx.store;
        let run_id = store.start_run().await?;

        let crawl = match self.crawl().await {
            Ok(crawl) => crawl,
            Err(e) => {
                error!("Error during scraping: {}", e);
                if let Err(finish_err) = store
                    .finish_run(run_id, &RunSummary::failed(e.to_string()))
                    .await
                {
                    error!("Failed to record failed run {}: {}", run_id, finish_err);
                }
                return Err(e);
            }
        };

        store
            .finish_run(run_id, &RunSummary::success(crawl.listings.len(), &crawl.saved))
            .await?;

        let new_listings = crawl.new_listings();
        if new_listings.is_empty() {
            return Ok(0);
        }
        info!("Found {} new listings", new_listings.len());

        if let Some(photos) = &self.ctx.photos {
            info!("Downloading photos for {} new listings...", new_listings.len());
            photos.download_all(&new_listings).await;
        }

        if let Some(notifier) = &self.ctx.notifier {
            notifier
                .send_listings(&new_listings, &self.ctx.config.photos_dir)
                .await;
        }

        Ok(new_listings.len())
    }

    /// Run, sleep the configured interval, repeat until `stop` is set. The
    /// flag is honoured between runs and during the sleep.
    pub async fn run_forever(&self, stop: Arc<AtomicBool>) {
        let interval = self.ctx.config.interval;
        info!(
            "Starting scheduler: running every {} minutes",
            interval.as_secs() / 60
        );

        let mut run_count = 0u64;
        while !stop.load(Ordering::SeqCst) {
            run_count += 1;
            info!("=== Scraper run #{} starting ===", run_count);
            match self.run_once().await {
                Ok(0) => info!("Run #{} complete: no new listings", run_count),
                Ok(n) => info!("Run #{} complete: {} new listings", run_count, n),
                Err(e) => error!("Run #{} failed: {}", run_count, e),
            }

            let mut slept = Duration::ZERO;
            while slept < interval && !stop.load(Ordering::SeqCst) {
                let step = STOP_POLL.min(interval - slept);
                tokio::time::sleep(step).await;
                slept += step;
            }
        }

        info!("Scheduler stopped after {} runs", run_count);
    }
}

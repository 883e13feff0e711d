use crate::error::Result;
use crate::parser::non_promoted_listing_links;
use crate::scrapers::traits::ContinuationStrategy;
use crate::store::ListingStore;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::info;
use url::Url;

/// Smart-scroll predicate: keep scrolling only while every organic link on
/// the page so far is unknown to the store.
///
/// Results are sorted newest first, so the first known link means the rest
/// of the page was seen on an earlier run.
pub struct SeenSetOracle {
    store: Arc<dyn ListingStore>,
    base: Url,
}

impl SeenSetOracle {
    pub fn new(store: Arc<dyn ListingStore>, base: Url) -> Self {
        Self { store, base }
    }
}

#[async_trait]
impl ContinuationStrategy for SeenSetOracle {
    async fn should_continue(&self, html: &str) -> Result<bool> {
        let links = non_promoted_listing_links(html, &self.base);
        if links.is_empty() {
            return Ok(true);
        }

        for link in &links {
            if self.store.listing_exists(link).await? {
                info!("Found existing listing: {}", link);
                return Ok(false);
            }
        }
        Ok(true)
    }
}

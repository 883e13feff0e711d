//! Persisted listing state: change detection and crawl-run bookkeeping.

pub mod seen;
pub mod sqlite;

use crate::error::Result;
use crate::models::{Listing, RunSummary, SaveSummary, UpsertOutcome};
use async_trait::async_trait;
use chrono::{DateTime, Utc};

pub use seen::SeenSetOracle;
pub use sqlite::SqliteStore;

#[async_trait]
pub trait ListingStore: Send + Sync {
    /// Open a run record in `running` state and return its id.
    async fn start_run(&self) -> Result<i64>;

    async fn finish_run(&self, run_id: i64, summary: &RunSummary) -> Result<()>;

    /// Insert, update or touch one listing keyed by its link.
    async fn upsert(&self, listing: &Listing) -> Result<UpsertOutcome>;

    /// Upsert every listing in order. Stops at the first store error; rows
    /// already written stay written.
    async fn save(&self, listings: &[Listing]) -> Result<SaveSummary> {
        let mut summary = SaveSummary::default();
        for listing in listings {
            match self.upsert(listing).await? {
                UpsertOutcome::New => {
                    summary.new += 1;
                    summary.new_links.push(listing.link.clone());
                }
                UpsertOutcome::Updated => summary.updated += 1,
                UpsertOutcome::Unchanged => {}
            }
        }
        Ok(summary)
    }

    async fn listing_exists(&self, link: &str) -> Result<bool>;

    /// Listings first seen strictly after `since`, newest first.
    async fn new_since(&self, since: DateTime<Utc>) -> Result<Vec<Listing>>;

    /// Most recently seen listings, newest first.
    async fn recent(&self, limit: usize) -> Result<Vec<Listing>>;
}

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// A single rental listing as recovered from a result card.
///
/// `link` is the identity: two records with the same link are the same
/// listing whether or not an `id` could be recovered.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Listing {
    pub id: Option<String>,
    pub title: Option<String>,
    pub price: Option<String>,
    pub address: Option<String>,
    pub size: Option<String>,
    pub link: String,
    pub first_seen_at: Option<DateTime<Utc>>,
    pub last_seen_at: Option<DateTime<Utc>>,
}

impl Listing {
    pub fn new(link: impl Into<String>) -> Self {
        Self {
            link: link.into(),
            ..Self::default()
        }
    }

    /// True when any of the change-tracked fields differ.
    pub fn differs_from(&self, other: &Listing) -> bool {
        self.id != other.id
            || self.title != other.title
            || self.price != other.price
            || self.address != other.address
            || self.size != other.size
    }

    pub fn display_name(&self) -> &str {
        self.title.as_deref().unwrap_or(&self.link)
    }
}

/// How a single upsert was classified by the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    New,
    Updated,
    Unchanged,
}

/// Aggregate result of saving a batch of listings.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SaveSummary {
    pub new: usize,
    pub updated: usize,
    /// Links inserted by this save, in input order.
    pub new_links: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Running,
    Success,
    Failed,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Running => "running",
            RunStatus::Success => "success",
            RunStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "running" => Some(RunStatus::Running),
            "success" => Some(RunStatus::Success),
            "failed" => Some(RunStatus::Failed),
            _ => None,
        }
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Terminal bookkeeping for a crawl run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunSummary {
    pub found: usize,
    pub new: usize,
    pub updated: usize,
    pub status: RunStatus,
    pub error_message: Option<String>,
}

impl RunSummary {
    pub fn success(found: usize, saved: &SaveSummary) -> Self {
        Self {
            found,
            new: saved.new,
            updated: saved.updated,
            status: RunStatus::Success,
            error_message: None,
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            found: 0,
            new: 0,
            updated: 0,
            status: RunStatus::Failed,
            error_message: Some(message.into()),
        }
    }
}

/// A persisted crawl run row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrawlRun {
    pub id: i64,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub found: i64,
    pub new: i64,
    pub updated: i64,
    pub status: RunStatus,
    pub error_message: Option<String>,
}

/// Photo download counters, per listing or summed over a batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PhotoStats {
    pub listings: usize,
    pub total: usize,
    pub downloaded: usize,
    pub skipped: usize,
    pub errors: usize,
}

impl PhotoStats {
    pub fn merge(&mut self, other: PhotoStats) {
        self.listings += other.listings;
        self.total += other.total;
        self.downloaded += other.downloaded;
        self.skipped += other.skipped;
        self.errors += other.errors;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn differs_ignores_timestamps_and_link() {
        let mut a = Listing::new("https://example.at/a");
        a.title = Some("Wohnung".into());
        let mut b = a.clone();
        b.last_seen_at = Some(Utc::now());
        assert!(!a.differs_from(&b));

        b.price = Some("€ 900".into());
        assert!(a.differs_from(&b));
    }

    #[test]
    fn run_status_round_trips_through_text() {
        for status in [RunStatus::Running, RunStatus::Success, RunStatus::Failed] {
            assert_eq!(RunStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(RunStatus::parse("paused"), None);
    }
}

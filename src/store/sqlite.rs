use crate::error::Result;
use crate::models::{CrawlRun, Listing, RunStatus, RunSummary, UpsertOutcome};
use crate::store::ListingStore;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::Row;
use std::str::FromStr;
use tracing::{debug, info};

const SCHEMA: &[&str] = &[
    r"
    CREATE TABLE IF NOT EXISTS listings (
        link TEXT PRIMARY KEY,
        id TEXT,
        listing_name TEXT,
        price TEXT,
        address TEXT,
        apart_size TEXT,
        first_seen_at INTEGER NOT NULL,
        last_seen_at INTEGER NOT NULL
    )
    ",
    "CREATE INDEX IF NOT EXISTS idx_listings_first_seen ON listings (first_seen_at)",
    r"
    CREATE TABLE IF NOT EXISTS scraper_runs (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        started_at INTEGER NOT NULL,
        finished_at INTEGER,
        listings_found INTEGER NOT NULL DEFAULT 0,
        new_listings INTEGER NOT NULL DEFAULT 0,
        updated_listings INTEGER NOT NULL DEFAULT 0,
        status TEXT NOT NULL,
        error_message TEXT
    )
    ",
];

const LISTING_COLUMNS: &str =
    "link, id, listing_name, price, address, apart_size, first_seen_at, last_seen_at";

fn from_millis(ms: i64) -> Option<DateTime<Utc>> {
    DateTime::from_timestamp_millis(ms)
}

fn listing_from_row(row: &SqliteRow) -> Result<Listing> {
    Ok(Listing {
        link: row.try_get("link")?,
        id: row.try_get("id")?,
        title: row.try_get("listing_name")?,
        price: row.try_get("price")?,
        address: row.try_get("address")?,
        size: row.try_get("apart_size")?,
        first_seen_at: from_millis(row.try_get("first_seen_at")?),
        last_seen_at: from_millis(row.try_get("last_seen_at")?),
    })
}

/// SQLite-backed listing store. Timestamps are unix milliseconds.
#[derive(Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub async fn connect(database_url: &str) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(database_url)?.create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;
        info!("Connected to database: {}", database_url);
        Self::with_pool(pool).await
    }

    /// Private in-memory database. Single connection, so every query sees
    /// the same database.
    pub async fn in_memory() -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await?;
        Self::with_pool(pool).await
    }

    pub async fn with_pool(pool: SqlitePool) -> Result<Self> {
        let store = Self { pool };
        store.bootstrap().await?;
        Ok(store)
    }

    async fn bootstrap(&self) -> Result<()> {
        for statement in SCHEMA {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        debug!("Database schema ready");
        Ok(())
    }

    pub async fn get(&self, link: &str) -> Result<Option<Listing>> {
        let query = format!("SELECT {LISTING_COLUMNS} FROM listings WHERE link = ?");
        let row = sqlx::query(&query)
            .bind(link)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(listing_from_row).transpose()
    }

    pub async fn run(&self, run_id: i64) -> Result<Option<CrawlRun>> {
        let row = sqlx::query(
            r"
            SELECT id, started_at, finished_at, listings_found, new_listings,
                   updated_listings, status, error_message
            FROM scraper_runs WHERE id = ?
            ",
        )
        .bind(run_id)
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };
        let status: String = row.try_get("status")?;
        let finished_at: Option<i64> = row.try_get("finished_at")?;
        Ok(Some(CrawlRun {
            id: row.try_get("id")?,
            started_at: from_millis(row.try_get("started_at")?).unwrap_or_default(),
            finished_at: finished_at.and_then(from_millis),
            found: row.try_get("listings_found")?,
            new: row.try_get("new_listings")?,
            updated: row.try_get("updated_listings")?,
            status: RunStatus::parse(&status).unwrap_or(RunStatus::Failed),
            error_message: row.try_get("error_message")?,
        }))
    }

    pub async fn count(&self) -> Result<i64> {
        let row = sqlx::query("SELECT COUNT(*) AS n FROM listings")
            .fetch_one(&self.pool)
            .await?;
        Ok(row.try_get("n")?)
    }

    async fn query_listings(&self, sql: &str, param: i64) -> Result<Vec<Listing>> {
        let rows = sqlx::query(sql).bind(param).fetch_all(&self.pool).await?;
        rows.iter().map(listing_from_row).collect()
    }
}

#[async_trait]
impl ListingStore for SqliteStore {
    async fn start_run(&self) -> Result<i64> {
        let result = sqlx::query("INSERT INTO scraper_runs (started_at, status) VALUES (?, ?)")
            .bind(Utc::now().timestamp_millis())
            .bind(RunStatus::Running.as_str())
            .execute(&self.pool)
            .await?;
        let run_id = result.last_insert_rowid();
        debug!("Started scraper run {}", run_id);
        Ok(run_id)
    }

    async fn finish_run(&self, run_id: i64, summary: &RunSummary) -> Result<()> {
        sqlx::query(
            r"
            UPDATE scraper_runs
            SET finished_at = ?, listings_found = ?, new_listings = ?, updated_listings = ?,
                status = ?, error_message = ?
            WHERE id = ?
            ",
        )
        .bind(Utc::now().timestamp_millis())
        .bind(summary.found as i64)
        .bind(summary.new as i64)
        .bind(summary.updated as i64)
        .bind(summary.status.as_str())
        .bind(&summary.error_message)
        .bind(run_id)
        .execute(&self.pool)
        .await?;
        debug!("Finished scraper run {} ({})", run_id, summary.status);
        Ok(())
    }

    async fn upsert(&self, listing: &Listing) -> Result<UpsertOutcome> {
        let now = Utc::now().timestamp_millis();

        match self.get(&listing.link).await? {
            None => {
                sqlx::query(
                    r"
                    INSERT INTO listings
                    (link, id, listing_name, price, address, apart_size, first_seen_at, last_seen_at)
                    VALUES (?, ?, ?, ?, ?, ?, ?, ?)
                    ",
                )
                .bind(&listing.link)
                .bind(&listing.id)
                .bind(&listing.title)
                .bind(&listing.price)
                .bind(&listing.address)
                .bind(&listing.size)
                .bind(now)
                .bind(now)
                .execute(&self.pool)
                .await?;
                debug!("New listing: {}", listing.display_name());
                Ok(UpsertOutcome::New)
            }
            Some(existing) if listing.differs_from(&existing) => {
                sqlx::query(
                    r"
                    UPDATE listings
                    SET id = ?, listing_name = ?, price = ?, address = ?, apart_size = ?, last_seen_at = ?
                    WHERE link = ?
                    ",
                )
                .bind(&listing.id)
                .bind(&listing.title)
                .bind(&listing.price)
                .bind(&listing.address)
                .bind(&listing.size)
                .bind(now)
                .bind(&listing.link)
                .execute(&self.pool)
                .await?;
                debug!("Updated listing: {}", listing.display_name());
                Ok(UpsertOutcome::Updated)
            }
            Some(_) => {
                sqlx::query("UPDATE listings SET last_seen_at = ? WHERE link = ?")
                    .bind(now)
                    .bind(&listing.link)
                    .execute(&self.pool)
                    .await?;
                Ok(UpsertOutcome::Unchanged)
            }
        }
    }

    async fn listing_exists(&self, link: &str) -> Result<bool> {
        let row = sqlx::query("SELECT 1 FROM listings WHERE link = ?")
            .bind(link)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.is_some())
    }

    async fn new_since(&self, since: DateTime<Utc>) -> Result<Vec<Listing>> {
        let sql = format!(
            "SELECT {LISTING_COLUMNS} FROM listings WHERE first_seen_at > ? ORDER BY first_seen_at DESC"
        );
        self.query_listings(&sql, since.timestamp_millis()).await
    }

    async fn recent(&self, limit: usize) -> Result<Vec<Listing>> {
        let sql = format!(
            "SELECT {LISTING_COLUMNS} FROM listings ORDER BY last_seen_at DESC LIMIT ?"
        );
        self.query_listings(&sql, limit as i64).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::SaveSummary;

    fn listing(link: &str, price: &str) -> Listing {
        Listing {
            id: Some("1".to_string()),
            title: Some("Helle Wohnung".to_string()),
            price: Some(price.to_string()),
            address: Some("1190 Wien".to_string()),
            size: Some("64 m²".to_string()),
            ..Listing::new(link)
        }
    }

    #[tokio::test]
    async fn classifies_new_unchanged_and_updated() {
        let store = SqliteStore::in_memory().await.unwrap();
        let a = listing("https://www.willhaben.at/iad/immobilien/d/a/1/", "€ 900");

        let first = store.save(std::slice::from_ref(&a)).await.unwrap();
        assert_eq!(
            first,
            SaveSummary {
                new: 1,
                updated: 0,
                new_links: vec![a.link.clone()],
            }
        );

        let second = store.save(std::slice::from_ref(&a)).await.unwrap();
        assert_eq!((second.new, second.updated), (0, 0));

        let changed = listing(&a.link, "€ 950");
        let third = store.save(&[changed]).await.unwrap();
        assert_eq!((third.new, third.updated), (0, 1));
        assert!(third.new_links.is_empty());

        let stored = store.get(&a.link).await.unwrap().unwrap();
        assert_eq!(stored.price.as_deref(), Some("€ 950"));
        assert_eq!(store.count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn unchanged_touch_keeps_first_seen() {
        let store = SqliteStore::in_memory().await.unwrap();
        let a = listing("https://www.willhaben.at/iad/immobilien/d/a/2/", "€ 700");

        store.upsert(&a).await.unwrap();
        let before = store.get(&a.link).await.unwrap().unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        assert_eq!(store.upsert(&a).await.unwrap(), UpsertOutcome::Unchanged);
        let after = store.get(&a.link).await.unwrap().unwrap();

        assert_eq!(before.first_seen_at, after.first_seen_at);
        assert!(after.last_seen_at > before.last_seen_at);
    }

    #[tokio::test]
    async fn missing_id_is_still_stored_and_tracked() {
        let store = SqliteStore::in_memory().await.unwrap();
        let mut a = listing("https://www.willhaben.at/iad/immobilien/d/a/3/", "€ 700");
        a.id = None;

        assert_eq!(store.upsert(&a).await.unwrap(), UpsertOutcome::New);
        assert!(store.listing_exists(&a.link).await.unwrap());
        assert!(!store.listing_exists("https://example.com/other").await.unwrap());
    }

    #[tokio::test]
    async fn new_since_is_newest_first() {
        let store = SqliteStore::in_memory().await.unwrap();
        let cutoff = Utc::now();
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        for n in 1..=3 {
            store
                .upsert(&listing(&format!("https://www.willhaben.at/d/{n}/"), "€ 1"))
                .await
                .unwrap();
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        }

        let fresh = store.new_since(cutoff).await.unwrap();
        let links: Vec<_> = fresh.iter().map(|l| l.link.as_str()).collect();
        assert_eq!(
            links,
            vec![
                "https://www.willhaben.at/d/3/",
                "https://www.willhaben.at/d/2/",
                "https://www.willhaben.at/d/1/",
            ]
        );
        assert!(store.new_since(Utc::now()).await.unwrap().is_empty());
        assert_eq!(store.recent(2).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn new_since_excludes_rows_at_the_cutoff() {
        let store = SqliteStore::in_memory().await.unwrap();
        let link = "https://www.willhaben.at/d/9/";
        store.upsert(&listing(link, "€ 1")).await.unwrap();
        let first_seen = store.get(link).await.unwrap().unwrap().first_seen_at.unwrap();

        assert!(store.new_since(first_seen).await.unwrap().is_empty());
        let earlier = first_seen - chrono::Duration::milliseconds(1);
        assert_eq!(store.new_since(earlier).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn run_bookkeeping() {
        let store = SqliteStore::in_memory().await.unwrap();

        let ok = store.start_run().await.unwrap();
        let running = store.run(ok).await.unwrap().unwrap();
        assert_eq!(running.status, RunStatus::Running);
        assert!(running.finished_at.is_none());

        let saved = SaveSummary {
            new: 2,
            updated: 1,
            new_links: vec![],
        };
        store
            .finish_run(ok, &RunSummary::success(5, &saved))
            .await
            .unwrap();
        let done = store.run(ok).await.unwrap().unwrap();
        assert_eq!(done.status, RunStatus::Success);
        assert_eq!((done.found, done.new, done.updated), (5, 2, 1));
        assert!(done.finished_at.is_some());

        let bad = store.start_run().await.unwrap();
        assert_ne!(ok, bad);
        store
            .finish_run(bad, &RunSummary::failed("navigation timed out"))
            .await
            .unwrap();
        let failed = store.run(bad).await.unwrap().unwrap();
        assert_eq!(failed.status, RunStatus::Failed);
        assert_eq!(failed.error_message.as_deref(), Some("navigation timed out"));
    }
}

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use listing_scout::config::AppConfig;
use listing_scout::export::{write_csv, DEFAULT_OUT};
use listing_scout::logging;
use listing_scout::models::{Listing, RunSummary, SaveSummary};
use listing_scout::notify::{Notifier, TelegramNotifier};
use listing_scout::orchestrator::{fetch_in_run, CrawlResult, Scheduler, ScoutContext};
use listing_scout::parser::parse_listings;
use listing_scout::photos::download::HttpImageFetcher;
use listing_scout::photos::PhotoDownloader;
use listing_scout::scrapers::{ChromeFetcher, ChromeImageSource, ContinuationStrategy, PageFetcher};
use listing_scout::scrapers::set_rows_param;
use listing_scout::store::{ListingStore, SeenSetOracle, SqliteStore};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{error, info, warn};
use url::Url;

#[derive(Parser)]
#[command(name = "listing-scout")]
#[command(about = "Crawl willhaben.at rental listings and announce new ones")]
#[command(version)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Fetch the result page once and store or export the listings
    Scrape(ScrapeArgs),

    /// Crawl on a timer, download photos and notify on Telegram
    Watch(WatchArgs),
}

#[derive(Args)]
struct ScrapeArgs {
    /// Search URL (default: built from .env)
    #[arg(long)]
    url: Option<String>,

    /// Number of results per page (overrides ROWS)
    #[arg(long)]
    rows: Option<u32>,

    /// Output CSV file path
    #[arg(long, default_value = DEFAULT_OUT)]
    out: PathBuf,

    /// Run the browser in visible mode
    #[arg(long)]
    no_headless: bool,

    /// Save to CSV instead of the database
    #[arg(long)]
    use_csv: bool,

    /// Skip database operations
    #[arg(long)]
    no_db: bool,

    /// Download photos for new listings (database mode only)
    #[arg(long)]
    download_photos: bool,
}

#[derive(Args)]
struct WatchArgs {
    /// Search URL (default: built from .env)
    #[arg(long)]
    url: Option<String>,

    /// Number of results per page (overrides ROWS)
    #[arg(long)]
    rows: Option<u32>,

    /// Run the browser in visible mode
    #[arg(long)]
    no_headless: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let config = match AppConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: {e}");
            return ExitCode::from(2);
        }
    };
    if let Err(e) = logging::init(cli.verbose, &config.log_file) {
        eprintln!("Error: {e}");
        return ExitCode::from(2);
    }

    let result = match cli.command {
        Commands::Scrape(args) => scrape(config, args).await,
        Commands::Watch(args) => watch(config, args).await,
    };

    match result {
        Ok(code) => code,
        Err(e) => {
            error!("{:#}", e);
            ExitCode::FAILURE
        }
    }
}

fn search_url(config: &AppConfig, url: Option<String>) -> anyhow::Result<String> {
    match url {
        Some(url) => Ok(url),
        None => Ok(config.search.build_url()?),
    }
}

fn photo_downloader(config: &AppConfig, headless: bool) -> anyhow::Result<PhotoDownloader> {
    let source = ChromeImageSource::new(headless, config.photo_timeout, config.carousel());
    let fetcher = HttpImageFetcher::new(config.photo_timeout)?;
    Ok(PhotoDownloader::new(
        config.photos_dir.clone(),
        Arc::new(source),
        Arc::new(fetcher),
    ))
}

/// Save into an open run record and close it; a failed save marks the run
/// failed.
async fn save_in_run(
    store: &dyn ListingStore,
    run_id: i64,
    items: &[Listing],
) -> listing_scout::Result<SaveSummary> {
    match store.save(items).await {
        Ok(saved) => {
            store
                .finish_run(run_id, &RunSummary::success(items.len(), &saved))
                .await?;
            Ok(saved)
        }
        Err(e) => {
            store
                .finish_run(run_id, &RunSummary::failed(e.to_string()))
                .await
                .ok();
            Err(e)
        }
    }
}

async fn scrape(config: AppConfig, args: ScrapeArgs) -> anyhow::Result<ExitCode> {
    let headless = !args.no_headless;
    let url = set_rows_param(&search_url(&config, args.url)?, args.rows)?;
    let base = Url::parse(&url).context("Invalid search URL")?;

    let use_database = !args.use_csv && !args.no_db;
    let store: Option<Arc<dyn ListingStore>> = if use_database {
        match SqliteStore::connect(&config.database_url).await {
            Ok(store) => Some(Arc::new(store) as Arc<dyn ListingStore>),
            Err(e) => {
                warn!("Could not open database ({}). Using CSV mode.", e);
                None
            }
        }
    } else {
        None
    };
    info!(
        "Storage: {}, output: {}",
        if store.is_some() { "database" } else { "CSV" },
        args.out.display()
    );

    // The run record opens before the fetch so a failed fetch is recorded.
    let run = match store {
        Some(store) => match store.start_run().await {
            Ok(run_id) => Some((store, run_id)),
            Err(e) => {
                warn!("Could not start run record ({}). Using CSV mode.", e);
                None
            }
        },
        None => None,
    };

    let strategy = run.as_ref().map(|(store, _)| {
        info!("Smart scrolling enabled: will stop when reaching seen listings");
        Arc::new(SeenSetOracle::new(Arc::clone(store), base.clone())) as Arc<dyn ContinuationStrategy>
    });

    info!("Fetching listings from: {}", url);
    let fetcher = ChromeFetcher::new(headless, config.request_timeout, config.scroll.clone());
    let html = match &run {
        Some((store, run_id)) => {
            fetch_in_run(store.as_ref(), *run_id, &fetcher, &url, strategy).await?
        }
        None => fetcher.fetch(&url, strategy).await?,
    };

    let items = parse_listings(&html, &base);
    if items.is_empty() {
        warn!("No listings found");
        if let Some((store, run_id)) = &run {
            store
                .finish_run(*run_id, &RunSummary::success(0, &SaveSummary::default()))
                .await
                .ok();
        }
        return Ok(ExitCode::FAILURE);
    }

    let Some((store, run_id)) = run else {
        write_csv(&items, &args.out)?;
        println!("✓ Parsed {} listings → {}", items.len(), args.out.display());
        return Ok(ExitCode::SUCCESS);
    };

    let saved = match save_in_run(store.as_ref(), run_id, &items).await {
        Ok(saved) => saved,
        Err(e) => {
            error!("Database error: {}. Falling back to CSV.", e);
            write_csv(&items, &args.out)?;
            println!(
                "✓ Saved {} listings to CSV (database failed) → {}",
                items.len(),
                args.out.display()
            );
            return Ok(ExitCode::SUCCESS);
        }
    };
    println!(
        "✓ Saved {} listings to database: {} new, {} updated",
        items.len(),
        saved.new,
        saved.updated
    );

    let crawl = CrawlResult {
        listings: items,
        saved,
    };
    if args.download_photos {
        let new_listings = crawl.new_listings();
        if new_listings.is_empty() {
            info!("No new listings found for photo download");
        } else {
            println!("📸 Downloading photos for {} new listings...", new_listings.len());
            let stats = photo_downloader(&config, headless)?
                .download_all(&new_listings)
                .await;
            println!(
                "✓ Photo download complete: {} photos downloaded, {} skipped, {} errors",
                stats.downloaded, stats.skipped, stats.errors
            );
        }
    }

    if args.out != PathBuf::from(DEFAULT_OUT) {
        write_csv(&crawl.listings, &args.out)?;
        info!("Also saved to CSV: {}", args.out.display());
    }

    Ok(ExitCode::SUCCESS)
}

async fn watch(config: AppConfig, args: WatchArgs) -> anyhow::Result<ExitCode> {
    let headless = !args.no_headless;
    let url = search_url(&config, args.url)?;

    let (token, chat_id) = config.telegram()?;
    let notifier: Arc<dyn Notifier> = Arc::new(TelegramNotifier::new(token, chat_id)?);
    let store: Arc<dyn ListingStore> = Arc::new(SqliteStore::connect(&config.database_url).await?);
    let fetcher: Arc<dyn PageFetcher> = Arc::new(ChromeFetcher::new(
        headless,
        config.request_timeout,
        config.scroll.clone(),
    ));
    let photos = if config.download_photos {
        Some(photo_downloader(&config, headless)?)
    } else {
        None
    };

    let ctx = ScoutContext {
        config,
        store,
        fetcher,
        photos,
        notifier: Some(notifier),
    };
    let scheduler = Scheduler::new(ctx, url, args.rows)?;

    let stop = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&stop);
    tokio::spawn(async move {
        shutdown_signal().await;
        info!("Shutdown signal received, stopping after the current run...");
        flag.store(true, Ordering::SeqCst);
    });

    scheduler.run_forever(stop).await;
    Ok(ExitCode::SUCCESS)
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for Ctrl-C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

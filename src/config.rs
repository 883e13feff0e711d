use crate::error::{Result, ScoutError};
use crate::export::DEFAULT_OUT;
use crate::photos::capture::CarouselSettings;
use crate::scrapers::scroll::ScrollSettings;
use crate::scrapers::types::SearchParams;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

pub const DEFAULT_DATABASE_URL: &str = "sqlite://listings.db?mode=rwc";
pub const DEFAULT_LOG_FILE: &str = "output/scraper.log";

/// Application configuration loaded from environment variables (and `.env`).
#[derive(Debug, Clone)]
pub struct AppConfig {
    // Database
    pub database_url: String,

    // Search
    pub search: SearchParams,

    // Browser
    pub request_timeout: Duration,
    pub scroll: ScrollSettings,

    // Photos
    pub photos_dir: PathBuf,
    pub photo_timeout: Duration,
    pub max_photos_per_listing: usize,
    pub carousel_delay: Duration,
    pub download_photos: bool,

    // Scheduler
    pub interval: Duration,

    // Telegram
    pub telegram_bot_token: Option<String>,
    pub telegram_chat_id: Option<String>,

    /// Where a batch goes when the store rejects it.
    pub csv_fallback: PathBuf,

    pub log_file: PathBuf,
}

fn parse_or<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(key).filter(|v| !v.trim().is_empty()) {
        None => Ok(default),
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|e| ScoutError::Config(format!("{key}={raw:?} is invalid: {e}"))),
    }
}

fn millis_or(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: u64) -> Result<Duration> {
    parse_or(lookup, key, default).map(Duration::from_millis)
}

fn flag_or(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: bool) -> Result<bool> {
    match lookup(key).map(|v| v.trim().to_lowercase()) {
        None => Ok(default),
        Some(v) if v.is_empty() => Ok(default),
        Some(v) if matches!(v.as_str(), "true" | "1" | "yes") => Ok(true),
        Some(v) if matches!(v.as_str(), "false" | "0" | "no") => Ok(false),
        Some(v) => Err(ScoutError::Config(format!("{key}={v:?} is not a boolean"))),
    }
}

impl AppConfig {
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();
        let config = Self::from_lookup(|key| std::env::var(key).ok())?;
        config.log_keys();
        Ok(config)
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let lookup = &lookup;
        let defaults = ScrollSettings::default();

        let scroll = ScrollSettings {
            initial_wait: millis_or(lookup, "INITIAL_CONTENT_WAIT", 2000)?,
            wait_short: millis_or(lookup, "SCROLL_WAIT_SHORT", 300)?,
            wait_long: millis_or(lookup, "SCROLL_WAIT_LONG", 1500)?,
            long_wait_every: parse_or(lookup, "SCROLL_LONG_WAIT_FREQUENCY", defaults.long_wait_every)?,
            log_every: parse_or(lookup, "SCROLL_LOG_FREQUENCY", defaults.log_every)?,
            wait_final: millis_or(lookup, "SCROLL_WAIT_FINAL", 2000)?,
            stale_threshold: parse_or(lookup, "SCROLL_STALE_THRESHOLD", defaults.stale_threshold)?,
            max_rounds: parse_or(lookup, "MAX_SCROLL_ATTEMPTS", defaults.max_rounds)?,
        };

        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let interval_minutes: u64 = parse_or(lookup, "SCRAPER_INTERVAL_MINUTES", 5)?;

        Ok(Self {
            database_url: non_empty("DATABASE_URL")
                .unwrap_or_else(|| DEFAULT_DATABASE_URL.to_string()),
            search: SearchParams::from_lookup(lookup),
            request_timeout: millis_or(lookup, "REQUEST_TIMEOUT", 30000)?,
            scroll,
            photos_dir: non_empty("PHOTOS_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("photos")),
            photo_timeout: millis_or(lookup, "PHOTO_TIMEOUT", 10000)?,
            max_photos_per_listing: parse_or(lookup, "MAX_PHOTOS_PER_LISTING", 50)?,
            carousel_delay: millis_or(lookup, "PHOTO_CAROUSEL_DELAY", 800)?,
            download_photos: flag_or(lookup, "DOWNLOAD_PHOTOS", true)?,
            interval: Duration::from_secs(interval_minutes * 60),
            telegram_bot_token: non_empty("TELEGRAM_BOT_TOKEN"),
            telegram_chat_id: non_empty("TELEGRAM_CHAT_ID"),
            csv_fallback: non_empty("CSV_OUTPUT")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_OUT)),
            log_file: non_empty("ACTION_LOG")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_LOG_FILE)),
        })
    }

    pub fn carousel(&self) -> CarouselSettings {
        CarouselSettings {
            advance_delay: self.carousel_delay,
            max_photos: self.max_photos_per_listing,
            ..CarouselSettings::default()
        }
    }

    /// Both Telegram settings, or a config error naming what is missing.
    pub fn telegram(&self) -> Result<(&str, &str)> {
        match (&self.telegram_bot_token, &self.telegram_chat_id) {
            (Some(token), Some(chat)) => Ok((token.as_str(), chat.as_str())),
            (None, _) => Err(ScoutError::Config("TELEGRAM_BOT_TOKEN is not set".into())),
            (_, None) => Err(ScoutError::Config("TELEGRAM_CHAT_ID is not set".into())),
        }
    }

    fn log_keys(&self) {
        fn preview_opt(val: &Option<String>) -> String {
            match val {
                Some(v) if !v.is_empty() => {
                    let n = v.chars().take(5).map(char::len_utf8).sum::<usize>();
                    format!("{}...({} chars)", &v[..n], v.len())
                }
                _ => "<not set>".to_string(),
            }
        }

        tracing::info!("Config loaded:");
        tracing::info!("  DATABASE_URL: {}", self.database_url);
        tracing::info!("  PHOTOS_DIR: {}", self.photos_dir.display());
        tracing::info!("  TELEGRAM_BOT_TOKEN: {}", preview_opt(&self.telegram_bot_token));
        tracing::info!("  TELEGRAM_CHAT_ID: {}", preview_opt(&self.telegram_chat_id));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config(pairs: &[(&str, &str)]) -> Result<AppConfig> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        AppConfig::from_lookup(move |key| map.get(key).cloned())
    }

    #[test]
    fn defaults_apply_when_unset() {
        let config = config(&[]).unwrap();
        assert_eq!(config.database_url, DEFAULT_DATABASE_URL);
        assert_eq!(config.request_timeout, Duration::from_secs(30));
        assert_eq!(config.scroll.max_rounds, 100);
        assert_eq!(config.scroll.stale_threshold, 5);
        assert_eq!(config.max_photos_per_listing, 50);
        assert_eq!(config.interval, Duration::from_secs(300));
        assert!(config.download_photos);
        assert_eq!(config.csv_fallback, PathBuf::from(DEFAULT_OUT));
        assert!(config.telegram().is_err());
    }

    #[test]
    fn overrides_are_parsed() {
        let config = config(&[
            ("SCROLL_WAIT_SHORT", "50"),
            ("MAX_SCROLL_ATTEMPTS", "7"),
            ("DOWNLOAD_PHOTOS", "False"),
            ("SCRAPER_INTERVAL_MINUTES", "1"),
            ("TELEGRAM_BOT_TOKEN", "123:abc"),
            ("TELEGRAM_CHAT_ID", "42"),
            ("CSV_OUTPUT", "out/fallback.csv"),
        ])
        .unwrap();
        assert_eq!(config.scroll.wait_short, Duration::from_millis(50));
        assert_eq!(config.scroll.max_rounds, 7);
        assert!(!config.download_photos);
        assert_eq!(config.interval, Duration::from_secs(60));
        assert_eq!(config.telegram().unwrap(), ("123:abc", "42"));
        assert_eq!(config.csv_fallback, PathBuf::from("out/fallback.csv"));
    }

    #[test]
    fn unparseable_numbers_are_config_errors() {
        let err = config(&[("MAX_SCROLL_ATTEMPTS", "lots")]).unwrap_err();
        assert!(matches!(err, ScoutError::Config(msg) if msg.contains("MAX_SCROLL_ATTEMPTS")));
    }
}

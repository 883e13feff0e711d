use crate::error::{Result, ScoutError};
use crate::models::Listing;
use crate::notify::Notifier;
use crate::photos::storage::{listing_dir, photo_paths};
use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use reqwest::Client;
use serde_json::json;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{error, info, warn};

const DEFAULT_API_BASE: &str = "https://api.telegram.org";

/// Telegram accepts at most this many items in one media group.
const MAX_MEDIA_GROUP: usize = 10;

const SEND_INTERVAL: Duration = Duration::from_millis(500);

fn escape_html(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('\'', "&#39;")
        .replace('"', "&quot;")
}

/// HTML message body for one listing.
pub fn format_listing_message(listing: &Listing) -> String {
    let field = |value: &Option<String>| escape_html(value.as_deref().unwrap_or("N/A"));

    format!(
        "🏠 <b>New Apartment Listing</b>\n\n\
         <b>Name:</b> {}\n\
         <b>Price:</b> {}\n\
         <b>Address:</b> {}\n\
         <b>Size:</b> {}\n\
         \n<a href='{}'>View Listing</a>",
        field(&listing.title),
        field(&listing.price),
        field(&listing.address),
        field(&listing.size),
        escape_html(&listing.link),
    )
}

pub struct TelegramNotifier {
    client: Client,
    api_base: String,
    bot_token: String,
    chat_id: String,
}

impl TelegramNotifier {
    pub fn new(bot_token: &str, chat_id: &str) -> Result<Self> {
        Self::with_api_base(DEFAULT_API_BASE, bot_token, chat_id)
    }

    pub fn with_api_base(api_base: &str, bot_token: &str, chat_id: &str) -> Result<Self> {
        let client = Client::builder().timeout(Duration::from_secs(60)).build()?;
        Ok(Self {
            client,
            api_base: api_base.trim_end_matches('/').to_string(),
            bot_token: bot_token.to_string(),
            chat_id: chat_id.to_string(),
        })
    }

    fn endpoint(&self, method: &str) -> String {
        format!("{}/bot{}/{}", self.api_base, self.bot_token, method)
    }

    async fn check(response: reqwest::Response) -> Result<()> {
        let status = response.status();
        if status.is_success() {
            return Ok(());
        }
        let body = response.text().await.unwrap_or_default();
        Err(ScoutError::Notify(format!(
            "Telegram API returned {}: {}",
            status.as_u16(),
            body
        )))
    }

    async fn send_message(&self, text: &str) -> Result<()> {
        let body = json!({
            "chat_id": self.chat_id,
            "text": text,
            "parse_mode": "HTML",
            "disable_web_page_preview": false,
        });
        let response = self
            .client
            .post(self.endpoint("sendMessage"))
            .json(&body)
            .send()
            .await?;
        Self::check(response).await
    }

    async fn send_media_group(&self, caption: &str, photos: &[PathBuf]) -> Result<()> {
        let mut media = Vec::with_capacity(photos.len());
        let mut form = Form::new().text("chat_id", self.chat_id.clone());

        for (idx, path) in photos.iter().enumerate() {
            let name = format!("photo{idx}");
            let mut item = json!({ "type": "photo", "media": format!("attach://{name}") });
            if idx == 0 {
                item["caption"] = json!(caption);
                item["parse_mode"] = json!("HTML");
            }
            media.push(item);

            let bytes = tokio::fs::read(path).await?;
            let file_name = path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| format!("{name}.jpg"));
            form = form.part(name, Part::bytes(bytes).file_name(file_name));
        }

        let media = serde_json::to_string(&media).map_err(|e| ScoutError::Notify(e.to_string()))?;
        form = form.text("media", media);

        let response = self
            .client
            .post(self.endpoint("sendMediaGroup"))
            .multipart(form)
            .send()
            .await?;
        Self::check(response).await
    }

    /// Photos for a listing, first page of a media group.
    fn listing_photos(listing: &Listing, photos_root: &Path) -> Vec<PathBuf> {
        let dir = listing_dir(photos_root, &listing.link);
        match photo_paths(&dir) {
            Ok(mut paths) => {
                paths.truncate(MAX_MEDIA_GROUP);
                paths
            }
            Err(e) => {
                warn!("Could not read photos in {}: {}", dir.display(), e);
                Vec::new()
            }
        }
    }

    pub async fn send_listing(&self, listing: &Listing, photos_root: &Path) -> Result<()> {
        let message = format_listing_message(listing);
        let photos = Self::listing_photos(listing, photos_root);

        if photos.is_empty() {
            self.send_message(&message).await?;
            info!("Sent text message for listing: {}", listing.display_name());
        } else {
            self.send_media_group(&message, &photos).await?;
            info!(
                "Sent {} photos for listing: {}",
                photos.len(),
                listing.display_name()
            );
        }
        Ok(())
    }
}

#[async_trait]
impl Notifier for TelegramNotifier {
    async fn send_listings(&self, listings: &[Listing], photos_root: &Path) -> usize {
        if listings.is_empty() {
            info!("No new listings to send");
            return 0;
        }
        info!("Sending {} new listing(s) to Telegram", listings.len());

        let mut sent = 0;
        for listing in listings {
            match self.send_listing(listing, photos_root).await {
                Ok(()) => sent += 1,
                Err(e) => error!("Failed to send listing {}: {}", listing.link, e),
            }
            tokio::time::sleep(SEND_INTERVAL).await;
        }

        info!("Successfully sent {}/{} listings", sent, listings.len());
        sent
    }
}

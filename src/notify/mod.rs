pub mod telegram;

use crate::models::Listing;
use async_trait::async_trait;
use std::path::Path;

pub use telegram::TelegramNotifier;

/// Delivers new-listing announcements somewhere a human will see them.
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Announce each listing, attaching photos found under `photos_root`.
    /// Returns how many were delivered; failures are logged, not raised.
    async fn send_listings(&self, listings: &[Listing], photos_root: &Path) -> usize;
}

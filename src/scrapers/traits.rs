use crate::error::Result;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

/// The page operations the scroll controller needs.
/// Implemented by the Chrome tab and by test doubles.
#[async_trait]
pub trait ScrollPage: Send + Sync {
    /// Scroll down by one viewport height.
    async fn scroll_by_viewport(&self) -> Result<()>;

    /// Jump straight to the bottom of the document.
    async fn scroll_to_bottom(&self) -> Result<()>;

    /// Current `document.body.scrollHeight`.
    async fn scroll_height(&self) -> Result<u64>;

    /// Full serialized markup as currently rendered.
    async fn content(&self) -> Result<String>;

    async fn pause(&self, duration: Duration);
}

/// Decides, given the markup loaded so far, whether more scrolling is worth it.
#[async_trait]
pub trait ContinuationStrategy: Send + Sync {
    async fn should_continue(&self, html: &str) -> Result<bool>;
}

/// Something that can load a result page to completion and hand back its markup.
#[async_trait]
pub trait PageFetcher: Send + Sync {
    async fn fetch(
        &self,
        url: &str,
        strategy: Option<Arc<dyn ContinuationStrategy>>,
    ) -> Result<String>;

    /// Get the name of the fetcher backend
    fn backend_name(&self) -> &'static str;
}

use crate::error::Result;
use async_trait::async_trait;
use std::collections::BTreeSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Every full-size carousel image is served from under this prefix.
pub const CDN_MARKER: &str = "cache.willhaben.at/mmo";

const ACCEPTED_EXTENSIONS: [&str; 3] = [".jpg", ".jpeg", ".png"];
const SIZE_TIERS: [&str; 3] = ["/SMALL/", "/MEDIUM/", "/XS/"];
const THUMB_SUFFIXES: [(&str, &str); 2] = [("_thumb.jpg", ".jpg"), ("_thumb.png", ".png")];
const REJECTED_FRAGMENTS: [&str; 5] = ["logo", "icon", "badge", "willhaben_logo", "_hoved"];

const SETTLE_STEPS: usize = 5;
const SETTLE_STEP_PX: i64 = 500;
const MIN_ADVANCE_PAUSE: Duration = Duration::from_millis(800);

/// Map an observed request URL to its full-size form, or reject it.
pub fn normalize_image_url(raw: &str) -> Option<String> {
    if !raw.contains(CDN_MARKER) {
        return None;
    }
    let lower = raw.to_lowercase();
    if !ACCEPTED_EXTENSIONS.iter().any(|ext| lower.ends_with(ext)) {
        return None;
    }
    if REJECTED_FRAGMENTS.iter().any(|frag| lower.contains(frag)) {
        return None;
    }

    let mut url = raw.to_string();
    for tier in SIZE_TIERS {
        url = url.replace(tier, "/LARGE/");
    }
    for (suffix, replacement) in THUMB_SUFFIXES {
        if let Some(stem) = url.strip_suffix(suffix) {
            url = format!("{stem}{replacement}");
        }
    }
    Some(url)
}

/// Distinct full-size image URLs seen on the network during one visit.
#[derive(Debug, Default)]
pub struct CapturedImages {
    urls: BTreeSet<String>,
}

impl CapturedImages {
    /// Record `raw` if it is a carousel image. Returns true when it was new.
    pub fn observe(&mut self, raw: &str) -> bool {
        let Some(url) = normalize_image_url(raw) else {
            return false;
        };
        if self.urls.contains(&url) {
            return false;
        }
        debug!("Captured image #{}: {}", self.urls.len() + 1, url);
        self.urls.insert(url)
    }

    pub fn len(&self) -> usize {
        self.urls.len()
    }

    pub fn is_empty(&self) -> bool {
        self.urls.is_empty()
    }

    /// Sorted snapshot.
    pub fn urls(&self) -> Vec<String> {
        self.urls.iter().cloned().collect()
    }
}

pub type SharedCapture = Arc<Mutex<CapturedImages>>;

fn captured_len(capture: &SharedCapture) -> usize {
    capture.lock().map(|c| c.len()).unwrap_or(0)
}

/// Total photo count from the first caption shaped like "Bild X von N".
pub fn declared_total(captions: &[String]) -> Option<usize> {
    captions.iter().find_map(|alt| {
        let lower = alt.to_lowercase();
        let (_, rest) = lower.split_once("von")?;
        rest.split_whitespace().next()?.parse().ok()
    })
}

#[derive(Debug, Clone)]
pub struct CarouselSettings {
    /// Wait after load before the settle scroll.
    pub settle_wait: Duration,
    pub advance_delay: Duration,
    pub max_photos: usize,
}

impl Default for CarouselSettings {
    fn default() -> Self {
        Self {
            settle_wait: Duration::from_millis(3000),
            advance_delay: MIN_ADVANCE_PAUSE,
            max_photos: 50,
        }
    }
}

/// Detail-page operations needed to page through the photo carousel.
#[async_trait]
pub trait CarouselPage: Send + Sync {
    async fn pause(&self, duration: Duration);

    async fn scroll_by(&self, dy: i64) -> Result<()>;

    async fn scroll_to_top(&self) -> Result<()>;

    /// `alt` text of every `img[alt*="Bild"]`, in document order.
    async fn carousel_captions(&self) -> Result<Vec<String>>;

    /// Click the first visible "next" control. False when there is none.
    async fn click_next(&self) -> Result<bool>;

    /// Click the `index`th carousel thumbnail. False when it does not exist.
    async fn click_thumbnail(&self, index: usize) -> Result<bool>;
}

/// Page through the carousel until the observer has seen every declared
/// photo, then return the captured URLs sorted and capped.
pub async fn drive_carousel(
    page: &dyn CarouselPage,
    capture: &SharedCapture,
    settings: &CarouselSettings,
) -> Result<Vec<String>> {
    page.pause(settings.settle_wait).await;
    for _ in 0..SETTLE_STEPS {
        page.scroll_by(SETTLE_STEP_PX).await?;
        page.pause(MIN_ADVANCE_PAUSE).await;
    }
    page.scroll_to_top().await?;
    page.pause(Duration::from_millis(500)).await;

    let declared = declared_total(&page.carousel_captions().await?);
    let pause = settings.advance_delay.max(MIN_ADVANCE_PAUSE);

    if let Some(total) = declared.filter(|&total| total > captured_len(capture)) {
        info!("Carousel has {} total images, navigating to load all...", total);
        for attempt in 0..total {
            let advanced = page.click_next().await? || page.click_thumbnail(attempt).await?;
            if advanced {
                page.pause(pause).await;
                debug!(
                    "Carousel advance {}, captured {} so far",
                    attempt + 1,
                    captured_len(capture)
                );
            }
            if captured_len(capture) >= total {
                info!("Captured all {} images", total);
                break;
            }
        }
    }

    let mut urls = capture.lock().map(|c| c.urls()).unwrap_or_default();
    match declared {
        Some(total) if urls.len() < total => {
            warn!("Captured {} of {} declared images", urls.len(), total)
        }
        _ => info!("Captured {} full-size images from network", urls.len()),
    }
    urls.truncate(settings.max_photos);
    Ok(urls)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ScoutError;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn normalizes_size_tier_and_thumb_suffix() {
        assert_eq!(
            normalize_image_url("https://cache.willhaben.at/mmo/1/234/567/SMALL/1234_abc_thumb.jpg")
                .as_deref(),
            Some("https://cache.willhaben.at/mmo/1/234/567/LARGE/1234_abc.jpg")
        );
        assert_eq!(
            normalize_image_url("https://cache.willhaben.at/mmo/9/XS/pic.PNG").as_deref(),
            Some("https://cache.willhaben.at/mmo/9/LARGE/pic.PNG")
        );
    }

    #[test]
    fn rejects_foreign_hosts_logos_and_other_types() {
        for url in [
            "https://other.cdn.at/mmo/1/LARGE/a.jpg",
            "https://cache.willhaben.at/mmo/1/LARGE/a.webp",
            "https://cache.willhaben.at/mmo/1/LARGE/Willhaben_Logo.png",
            "https://cache.willhaben.at/mmo/1/LARGE/verified-badge.png",
            "https://cache.willhaben.at/mmo/1/LARGE/x_hoved.jpg",
        ] {
            assert_eq!(normalize_image_url(url), None, "{url}");
        }
    }

    #[test]
    fn distinct_after_normalization() {
        let mut captured = CapturedImages::default();
        assert!(captured.observe("https://cache.willhaben.at/mmo/1/SMALL/a.jpg"));
        assert!(!captured.observe("https://cache.willhaben.at/mmo/1/MEDIUM/a.jpg"));
        assert!(!captured.observe("https://example.com/a.jpg"));
        assert_eq!(captured.len(), 1);
    }

    #[test]
    fn reads_declared_total_from_caption() {
        let captions = vec!["Bild".to_string(), "Bild 1 von 23".to_string()];
        assert_eq!(declared_total(&captions), Some(23));
        assert_eq!(declared_total(&["Bild 1".to_string()]), None);
    }

    /// Each "next" click makes the page request one more image.
    struct FakeCarousel {
        capture: SharedCapture,
        total: usize,
        shown: AtomicUsize,
        has_next_button: bool,
        thumbnail_clicks: AtomicUsize,
        fail_on_click: bool,
    }

    impl FakeCarousel {
        fn new(capture: SharedCapture, total: usize) -> Self {
            let page = Self {
                capture,
                total,
                shown: AtomicUsize::new(0),
                has_next_button: true,
                thumbnail_clicks: AtomicUsize::new(0),
                fail_on_click: false,
            };
            page.show_next();
            page
        }

        fn show_next(&self) -> bool {
            let n = self.shown.fetch_add(1, Ordering::SeqCst) + 1;
            if n > self.total {
                return false;
            }
            self.capture
                .lock()
                .unwrap()
                .observe(&format!("https://cache.willhaben.at/mmo/1/MEDIUM/{n:03}.jpg"));
            true
        }
    }

    #[async_trait]
    impl CarouselPage for FakeCarousel {
        async fn pause(&self, _duration: Duration) {}

        async fn scroll_by(&self, _dy: i64) -> Result<()> {
            Ok(())
        }

        async fn scroll_to_top(&self) -> Result<()> {
            Ok(())
        }

        async fn carousel_captions(&self) -> Result<Vec<String>> {
            Ok(vec![format!("Bild 1 von {}", self.total)])
        }

        async fn click_next(&self) -> Result<bool> {
            if self.fail_on_click {
                return Err(ScoutError::Fetch("detached".into()));
            }
            Ok(self.has_next_button && self.show_next())
        }

        async fn click_thumbnail(&self, _index: usize) -> Result<bool> {
            self.thumbnail_clicks.fetch_add(1, Ordering::SeqCst);
            Ok(self.show_next())
        }
    }

    #[tokio::test]
    async fn advances_until_every_declared_image_is_captured() {
        let capture: SharedCapture = Arc::default();
        let page = FakeCarousel::new(capture.clone(), 4);

        let urls = drive_carousel(&page, &capture, &CarouselSettings::default())
            .await
            .unwrap();

        assert_eq!(urls.len(), 4);
        assert!(urls.windows(2).all(|w| w[0] < w[1]));
        assert!(urls.iter().all(|u| u.contains("/LARGE/")));
        assert_eq!(page.thumbnail_clicks.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn falls_back_to_thumbnails_and_caps_result() {
        let capture: SharedCapture = Arc::default();
        let mut page = FakeCarousel::new(capture.clone(), 6);
        page.has_next_button = false;
        let settings = CarouselSettings {
            max_photos: 3,
            ..CarouselSettings::default()
        };

        let urls = drive_carousel(&page, &capture, &settings).await.unwrap();

        assert_eq!(urls.len(), 3);
        assert_eq!(page.thumbnail_clicks.load(Ordering::SeqCst), 5);
    }

    #[tokio::test]
    async fn navigation_errors_propagate() {
        let capture: SharedCapture = Arc::default();
        let mut page = FakeCarousel::new(capture.clone(), 3);
        page.fail_on_click = true;

        let result = drive_carousel(&page, &capture, &CarouselSettings::default()).await;
        assert!(result.is_err());
    }
}

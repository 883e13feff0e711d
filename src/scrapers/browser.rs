use crate::error::{Result, ScoutError};
use crate::photos::capture::{drive_carousel, CarouselPage, CarouselSettings, CapturedImages, SharedCapture};
use crate::photos::ImageSource;
use crate::scrapers::scroll::{ScrollController, ScrollSettings};
use crate::scrapers::traits::{ContinuationStrategy, PageFetcher, ScrollPage};
use anyhow::Context;
use async_trait::async_trait;
use headless_chrome::browser::tab::ResponseHandler;
use headless_chrome::{Browser, LaunchOptions, Tab};
use serde_json::Value;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, info, warn};

pub const USER_AGENT: &str = "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";
const ACCEPT_LANGUAGE: &str = "de-DE,de;q=0.9,en-US;q=0.8,en;q=0.7";
const WINDOW_SIZE: (u32, u32) = (1920, 1080);

/// Name the image observer is registered under on a detail tab.
const IMAGE_OBSERVER: &str = "carousel-images";

/// A launched headless Chrome with a single working tab.
///
/// Every DevTools call blocks, so each one is pushed onto the blocking pool
/// and awaited before the next; the tab is never driven concurrently.
pub struct ChromeSession {
    _browser: Browser,
    tab: ChromeTab,
}

impl ChromeSession {
    pub async fn launch(headless: bool, timeout: Duration) -> Result<Self> {
        info!("Launching headless Chrome...");

        let (browser, tab) = tokio::task::spawn_blocking(move || -> anyhow::Result<_> {
            let options = LaunchOptions::default_builder()
                .headless(headless)
                .window_size(Some(WINDOW_SIZE))
                .idle_browser_timeout(timeout.max(Duration::from_secs(120)))
                .build()
                .context("Failed to build launch options")?;

            let browser = Browser::new(options).context("Failed to launch Chrome browser")?;
            let tab = browser.new_tab()?;
            tab.set_default_timeout(timeout);
            tab.set_user_agent(USER_AGENT, Some(ACCEPT_LANGUAGE), None)?;
            Ok((browser, tab))
        })
        .await
        .map_err(ScoutError::fetch)?
        .map_err(ScoutError::fetch)?;

        Ok(Self {
            _browser: browser,
            tab: ChromeTab { tab },
        })
    }

    pub fn tab(&self) -> &ChromeTab {
        &self.tab
    }

    pub async fn close(self) {
        if let Err(e) = self.tab.run(|tab| tab.close(true)).await {
            debug!("Closing tab failed: {}", e);
        }
    }
}

/// Async facade over a blocking Chrome tab.
#[derive(Clone)]
pub struct ChromeTab {
    tab: Arc<Tab>,
}

impl ChromeTab {
    async fn run<T, E, F>(&self, op: F) -> Result<T>
    where
        F: FnOnce(&Tab) -> std::result::Result<T, E> + Send + 'static,
        T: Send + 'static,
        E: std::fmt::Display + Send + 'static,
    {
        let tab = Arc::clone(&self.tab);
        tokio::task::spawn_blocking(move || op(&tab))
            .await
            .map_err(ScoutError::fetch)?
            .map_err(ScoutError::fetch)
    }

    async fn eval(&self, expression: impl Into<String>) -> Result<Option<Value>> {
        let expression = expression.into();
        self.run(move |tab| tab.evaluate(&expression, false).map(|obj| obj.value))
            .await
    }

    async fn eval_bool(&self, expression: impl Into<String>) -> Result<bool> {
        Ok(self
            .eval(expression)
            .await?
            .and_then(|v| v.as_bool())
            .unwrap_or(false))
    }

    pub async fn open(&self, url: &str) -> Result<()> {
        let url = url.to_string();
        self.run(move |tab| -> anyhow::Result<()> {
            tab.navigate_to(&url)?;
            tab.wait_until_navigated()?;
            Ok(())
        })
        .await
    }

    /// Dismiss the consent banner if one is showing. Best effort.
    pub async fn accept_cookies(&self) {
        let script = r#"
            (() => {
                const button = document.querySelector('#didomi-notice-agree-button, button[id*="accept"]');
                if (button) { button.click(); return true; }
                return false;
            })()
        "#;
        match self.eval_bool(script).await {
            Ok(true) => debug!("Accepted cookie banner"),
            Ok(false) => {}
            Err(e) => debug!("Cookie banner check failed: {}", e),
        }
    }

    pub async fn count_matching(&self, selector: &str) -> Result<u64> {
        let script = format!(
            "document.querySelectorAll({}).length",
            serde_json::to_string(selector).unwrap_or_default()
        );
        Ok(self.eval(script).await?.and_then(|v| v.as_u64()).unwrap_or(0))
    }

    /// Start recording image responses into `sink`. Recording stops when the
    /// returned guard is dropped, on every exit path.
    ///
    /// This sees responses, not outgoing requests: an image request the page
    /// cancels before it answers (a fast carousel advance) is never recorded.
    /// The next advance usually re-requests it.
    pub async fn observe_images(&self, sink: SharedCapture) -> Result<ImageCapture> {
        let handler: ResponseHandler = Box::new(move |params, _fetch_body| {
            if let Ok(mut captured) = sink.lock() {
                captured.observe(&params.response.url);
            }
        });
        self.run(move |tab| tab.register_response_handling(IMAGE_OBSERVER, handler).map(|_| ()))
            .await?;

        Ok(ImageCapture {
            tab: Arc::clone(&self.tab),
        })
    }
}

/// Subscription guard for the image observer on one detail-page visit.
pub struct ImageCapture {
    tab: Arc<Tab>,
}

impl Drop for ImageCapture {
    fn drop(&mut self) {
        if let Err(e) = self.tab.deregister_response_handling(IMAGE_OBSERVER) {
            warn!("Failed to detach image observer: {}", e);
        }
    }
}

#[async_trait]
impl ScrollPage for ChromeTab {
    async fn scroll_by_viewport(&self) -> Result<()> {
        self.eval("window.scrollBy(0, window.innerHeight)").await.map(|_| ())
    }

    async fn scroll_to_bottom(&self) -> Result<()> {
        self.eval("window.scrollTo(0, document.body.scrollHeight)")
            .await
            .map(|_| ())
    }

    async fn scroll_height(&self) -> Result<u64> {
        let value = self.eval("document.body.scrollHeight").await?;
        value
            .and_then(|v| v.as_u64().or_else(|| v.as_f64().map(|f| f as u64)))
            .ok_or_else(|| ScoutError::Fetch("scrollHeight was not a number".into()))
    }

    async fn content(&self) -> Result<String> {
        self.run(|tab| tab.get_content()).await
    }

    async fn pause(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

#[async_trait]
impl CarouselPage for ChromeTab {
    async fn pause(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }

    async fn scroll_by(&self, dy: i64) -> Result<()> {
        self.eval(format!("window.scrollBy(0, {dy})")).await.map(|_| ())
    }

    async fn scroll_to_top(&self) -> Result<()> {
        self.eval("window.scrollTo(0, 0)").await.map(|_| ())
    }

    async fn carousel_captions(&self) -> Result<Vec<String>> {
        let script = r#"JSON.stringify(Array.from(document.querySelectorAll('img[alt*="Bild"]')).map(img => img.getAttribute('alt') || ''))"#;
        let raw = self
            .eval(script)
            .await?
            .and_then(|v| v.as_str().map(str::to_string))
            .unwrap_or_else(|| "[]".to_string());
        serde_json::from_str(&raw).map_err(ScoutError::photo)
    }

    async fn click_next(&self) -> Result<bool> {
        let script = r#"
            (() => {
                const selectors = [
                    'button[aria-label*="nächste"]',
                    'button[aria-label*="next"]',
                    '[data-testid*="next"]',
                ];
                for (const selector of selectors) {
                    const button = document.querySelector(selector);
                    if (button && button.offsetParent !== null) {
                        button.click();
                        return true;
                    }
                }
                return false;
            })()
        "#;
        self.eval_bool(script).await
    }

    async fn click_thumbnail(&self, index: usize) -> Result<bool> {
        // DOM sources are only used to find clickable thumbnails; the captured
        // set comes from the network observer.
        let script = format!(
            r#"
            (() => {{
                const thumbs = Array.from(document.querySelectorAll('img[alt*="Bild"]')).filter(img => {{
                    const alt = (img.getAttribute('alt') || '').toLowerCase();
                    const src = img.getAttribute('src') || img.getAttribute('data-src')
                        || img.getAttribute('data-lazy-src') || img.getAttribute('srcset');
                    return alt.includes('von') && src;
                }});
                const thumb = thumbs[{index}];
                if (!thumb) return false;
                thumb.scrollIntoView({{ block: 'center' }});
                thumb.click();
                return true;
            }})()
            "#
        );
        self.eval_bool(script).await
    }
}

/// Loads result pages in a fresh headless Chrome per fetch.
pub struct ChromeFetcher {
    headless: bool,
    timeout: Duration,
    scroll: ScrollSettings,
}

impl ChromeFetcher {
    pub fn new(headless: bool, timeout: Duration, scroll: ScrollSettings) -> Self {
        Self {
            headless,
            timeout,
            scroll,
        }
    }
}

#[async_trait]
impl PageFetcher for ChromeFetcher {
    async fn fetch(
        &self,
        url: &str,
        strategy: Option<Arc<dyn ContinuationStrategy>>,
    ) -> Result<String> {
        info!("Launching browser to fetch: {}", url);
        let session = ChromeSession::launch(self.headless, self.timeout).await?;
        let tab = session.tab().clone();

        let html = async {
            info!("Loading page...");
            tab.open(url).await?;
            ScrollPage::pause(&tab, self.scroll.initial_wait).await;
            tab.accept_cookies().await;

            let outcome = ScrollController::new(self.scroll.clone(), strategy)
                .run(&tab)
                .await?;
            info!("Scrolling finished after {} rounds ({:?})", outcome.rounds, outcome.reason);

            let listing_links = tab.count_matching(r#"a[href*="/iad/immobilien/d/"]"#).await?;
            info!("Total listing links found on page: {}", listing_links);

            tab.content().await
        }
        .await;

        session.close().await;

        let html = html.inspect_err(|e| warn!("Failed to fetch URL {}: {}", url, e))?;
        info!("Successfully fetched page with {} characters", html.len());
        Ok(html)
    }

    fn backend_name(&self) -> &'static str {
        "headless_chrome"
    }
}

/// Collects carousel image URLs by visiting the detail page in Chrome.
pub struct ChromeImageSource {
    headless: bool,
    timeout: Duration,
    carousel: CarouselSettings,
}

impl ChromeImageSource {
    pub fn new(headless: bool, timeout: Duration, carousel: CarouselSettings) -> Self {
        Self {
            headless,
            timeout,
            carousel,
        }
    }
}

#[async_trait]
impl ImageSource for ChromeImageSource {
    async fn collect_image_urls(&self, link: &str) -> Result<Vec<String>> {
        info!("Fetching listing page: {}", link);
        let session = ChromeSession::launch(self.headless, self.timeout).await?;
        let tab = session.tab().clone();
        let sink: SharedCapture = Arc::new(Mutex::new(CapturedImages::default()));

        let urls = async {
            let _observer = tab.observe_images(Arc::clone(&sink)).await?;
            tab.open(link).await?;
            drive_carousel(&tab, &sink, &self.carousel).await
        }
        .await;

        session.close().await;
        urls
    }
}

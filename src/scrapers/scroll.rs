use crate::error::Result;
use crate::scrapers::traits::{ContinuationStrategy, ScrollPage};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// The continuation strategy is consulted on every Nth round only.
const CALLBACK_EVERY: u32 = 3;

/// Timing and limits for progressive page loading.
#[derive(Debug, Clone)]
pub struct ScrollSettings {
    /// Pause after navigation before the first scroll.
    pub initial_wait: Duration,
    pub wait_short: Duration,
    /// Used instead of `wait_short` every `long_wait_every` rounds.
    pub wait_long: Duration,
    pub long_wait_every: u32,
    pub log_every: u32,
    /// Pause after the forced jump to the bottom.
    pub wait_final: Duration,
    /// Rounds without height growth before the forced jump.
    pub stale_threshold: u32,
    pub max_rounds: u32,
}

impl Default for ScrollSettings {
    fn default() -> Self {
        Self {
            initial_wait: Duration::from_millis(2000),
            wait_short: Duration::from_millis(300),
            wait_long: Duration::from_millis(1500),
            long_wait_every: 10,
            log_every: 5,
            wait_final: Duration::from_millis(2000),
            stale_threshold: 5,
            max_rounds: 100,
        }
    }
}

/// Why scrolling ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// Height stopped growing even after a forced jump to the bottom.
    Exhausted,
    /// The continuation strategy said the rest is already known.
    CallbackStopped,
    /// Hit the round ceiling without either of the above.
    Capped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScrollOutcome {
    pub rounds: u32,
    pub reason: StopReason,
}

enum ScrollState {
    Scrolling,
    Stalled,
    Done(StopReason),
}

/// Drives a lazily-loading page down until it is exhausted, the strategy
/// calls a stop, or the round ceiling is hit.
pub struct ScrollController {
    settings: ScrollSettings,
    strategy: Option<Arc<dyn ContinuationStrategy>>,
}

impl ScrollController {
    pub fn new(settings: ScrollSettings, strategy: Option<Arc<dyn ContinuationStrategy>>) -> Self {
        Self { settings, strategy }
    }

    /// Scroll `page` to completion. Page errors propagate unchanged; there is
    /// no retry inside a run.
    pub async fn run(&self, page: &dyn ScrollPage) -> Result<ScrollOutcome> {
        info!("Starting to scroll page to load all listings...");
        let s = &self.settings;

        let mut last_height = page.scroll_height().await?;
        let mut rounds: u32 = 0;
        let mut stalls: u32 = 0;
        let mut state = ScrollState::Scrolling;

        while let ScrollState::Scrolling | ScrollState::Stalled = state {
            if rounds >= s.max_rounds {
                state = ScrollState::Done(StopReason::Capped);
                break;
            }

            page.scroll_by_viewport().await?;
            let long_pause = s.long_wait_every > 0 && rounds % s.long_wait_every == 0;
            page.pause(if long_pause { s.wait_long } else { s.wait_short })
                .await;
            let new_height = page.scroll_height().await?;
            rounds += 1;

            if let Some(strategy) = &self.strategy {
                if rounds % CALLBACK_EVERY == 0 {
                    let html = page.content().await?;
                    if !strategy.should_continue(&html).await? {
                        info!("Callback requested stop after {} scrolls", rounds);
                        state = ScrollState::Done(StopReason::CallbackStopped);
                        continue;
                    }
                }
            }

            if new_height > last_height {
                if s.log_every > 0 && rounds % s.log_every == 0 {
                    debug!("Scroll {}: page height {}px", rounds, new_height);
                }
                last_height = new_height;
                stalls = 0;
                state = ScrollState::Scrolling;
                continue;
            }

            stalls += 1;
            state = ScrollState::Stalled;
            if stalls < s.stale_threshold {
                continue;
            }

            debug!("No change for {} scrolls, doing final scroll...", stalls);
            page.scroll_to_bottom().await?;
            page.pause(s.wait_final).await;
            let final_height = page.scroll_height().await?;
            if final_height <= last_height {
                info!("Reached bottom after {} scrolls. Final height: {}px", rounds, final_height);
                state = ScrollState::Done(StopReason::Exhausted);
            } else {
                debug!("Page expanded to {}px, continuing...", final_height);
                last_height = final_height;
                stalls = 0;
                state = ScrollState::Scrolling;
            }
        }

        let reason = match state {
            ScrollState::Done(reason) => reason,
            _ => StopReason::Capped,
        };
        match reason {
            StopReason::CallbackStopped => {
                info!("Smart scrolling: stopped early (encountered seen listings)")
            }
            StopReason::Capped => warn!("Reached maximum scroll attempts ({})", s.max_rounds),
            StopReason::Exhausted => {}
        }

        Ok(ScrollOutcome { rounds, reason })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ScoutError;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;

    /// Height grows by `growth` per viewport scroll for the first
    /// `growing_rounds` scrolls, then stays flat. A jump to the bottom adds
    /// `bottom_bonus` once.
    struct FakePage {
        height: Mutex<u64>,
        scrolls: AtomicU32,
        growing_rounds: u32,
        growth: u64,
        bottom_bonus: Mutex<u64>,
        bottom_jumps: AtomicU32,
        content_reads: AtomicU32,
        fail_on_scroll: Option<u32>,
    }

    impl FakePage {
        fn new(growing_rounds: u32) -> Self {
            Self {
                height: Mutex::new(1000),
                scrolls: AtomicU32::new(0),
                growing_rounds,
                growth: 500,
                bottom_bonus: Mutex::new(0),
                bottom_jumps: AtomicU32::new(0),
                content_reads: AtomicU32::new(0),
                fail_on_scroll: None,
            }
        }
    }

    #[async_trait]
    impl ScrollPage for FakePage {
        async fn scroll_by_viewport(&self) -> Result<()> {
            let n = self.scrolls.fetch_add(1, Ordering::SeqCst) + 1;
            if self.fail_on_scroll == Some(n) {
                return Err(ScoutError::Fetch("evaluation timed out".into()));
            }
            if n <= self.growing_rounds {
                *self.height.lock().unwrap() += self.growth;
            }
            Ok(())
        }

        async fn scroll_to_bottom(&self) -> Result<()> {
            self.bottom_jumps.fetch_add(1, Ordering::SeqCst);
            let bonus = std::mem::take(&mut *self.bottom_bonus.lock().unwrap());
            *self.height.lock().unwrap() += bonus;
            Ok(())
        }

        async fn scroll_height(&self) -> Result<u64> {
            Ok(*self.height.lock().unwrap())
        }

        async fn content(&self) -> Result<String> {
            self.content_reads.fetch_add(1, Ordering::SeqCst);
            Ok("<html></html>".to_string())
        }

        async fn pause(&self, _duration: Duration) {}
    }

    struct StopAfter {
        calls: AtomicU32,
        stop_on_call: u32,
    }

    #[async_trait]
    impl ContinuationStrategy for StopAfter {
        async fn should_continue(&self, _html: &str) -> Result<bool> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            Ok(n < self.stop_on_call)
        }
    }

    #[tokio::test]
    async fn exhausts_after_stale_rounds() {
        let page = FakePage::new(4);
        let controller = ScrollController::new(ScrollSettings::default(), None);

        let outcome = controller.run(&page).await.unwrap();

        assert_eq!(outcome.reason, StopReason::Exhausted);
        // 4 growing rounds, then 5 flat rounds trigger the final check.
        assert_eq!(outcome.rounds, 9);
        assert_eq!(page.bottom_jumps.load(Ordering::SeqCst), 1);
        assert_eq!(page.content_reads.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn growth_after_forced_jump_resets_stall_counter() {
        let page = FakePage::new(0);
        *page.bottom_bonus.lock().unwrap() = 800;
        let controller = ScrollController::new(ScrollSettings::default(), None);

        let outcome = controller.run(&page).await.unwrap();

        assert_eq!(outcome.reason, StopReason::Exhausted);
        assert_eq!(outcome.rounds, 10);
        assert_eq!(page.bottom_jumps.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn strategy_is_checked_every_third_round_and_can_stop() {
        let page = FakePage::new(u32::MAX);
        let strategy = Arc::new(StopAfter {
            calls: AtomicU32::new(0),
            stop_on_call: 2,
        });
        let controller = ScrollController::new(ScrollSettings::default(), Some(strategy.clone()));

        let outcome = controller.run(&page).await.unwrap();

        assert_eq!(outcome.reason, StopReason::CallbackStopped);
        assert_eq!(outcome.rounds, 6);
        assert_eq!(strategy.calls.load(Ordering::SeqCst), 2);
        assert_eq!(page.content_reads.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn endless_page_is_capped() {
        let page = FakePage::new(u32::MAX);
        let settings = ScrollSettings {
            max_rounds: 12,
            ..ScrollSettings::default()
        };
        let controller = ScrollController::new(settings, None);

        let outcome = controller.run(&page).await.unwrap();

        assert_eq!(outcome.reason, StopReason::Capped);
        assert_eq!(outcome.rounds, 12);
    }

    #[tokio::test]
    async fn page_errors_propagate() {
        let mut page = FakePage::new(u32::MAX);
        page.fail_on_scroll = Some(2);
        let controller = ScrollController::new(ScrollSettings::default(), None);

        let err = controller.run(&page).await.unwrap_err();
        assert!(matches!(err, ScoutError::Fetch(_)));
    }
}

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chromiumoxide::{Browser, BrowserConfig, Page};
use futures::StreamExt;
use gleaner_core::error::AppError;
use gleaner_core::models::{CandidateItem, Lookup, NoteFields};
use gleaner_core::traits::FeedDriver;

use crate::extract::NoteExtractor;

pub const DEFAULT_SITE: &str = "https://www.xiaohongshu.com";
const DETAIL_POLL: Duration = Duration::from_millis(250);
const LAUNCH_ARGS: &[&str] = &[
    "--disable-gpu",
    "--disable-dev-shm-usage",
    "--disable-popup-blocking",
    "--no-first-run",
];

/// Build the search-result URL for `keyword` on `site`.
pub fn search_url(site: &str, keyword: &str) -> Result<String, AppError> {
    let base = format!("{}/search_result", site.trim_end_matches('/'));
    url::Url::parse_with_params(&base, &[("keyword", keyword)])
        .map(String::from)
        .map_err(|e| AppError::ConfigError(format!("Invalid feed URL {base:?}: {e}")))
}

/// Launch options for [`ChromiumFeedDriver`].
#[derive(Debug, Clone)]
pub struct BrowserOptions {
    pub headless: bool,
    /// Persistent profile directory. Cookies stored here let a previously
    /// logged-in session be reused without the driver knowing about it.
    pub user_data_dir: Option<PathBuf>,
    pub navigation_timeout: Duration,
    pub scroll_px: u32,
}

impl Default for BrowserOptions {
    fn default() -> Self {
        Self {
            headless: true,
            user_data_dir: None,
            navigation_timeout: Duration::from_secs(8),
            scroll_px: 2000,
        }
    }
}

/// The detail popup opened for one card.
#[derive(Debug, Clone)]
pub struct DetailView {
    pub identifier: String,
}

/// Feed driver over a single Chromium tab, via the Chrome DevTools Protocol.
///
/// The tab stays on the search feed for the whole run. Opening a card clicks
/// it and waits for the detail popup; returning goes back in history, or
/// reloads the feed URL when the popup did not change the location.
pub struct ChromiumFeedDriver {
    _browser: Arc<Browser>,
    page: Arc<Page>,
    feed_url: String,
    extractor: Arc<NoteExtractor>,
    options: BrowserOptions,
}

impl ChromiumFeedDriver {
    /// Launch Chromium and navigate to `feed_url`.
    pub async fn launch(
        feed_url: &str,
        extractor: NoteExtractor,
        options: BrowserOptions,
    ) -> Result<Self, AppError> {
        let mut builder = BrowserConfig::builder();
        builder = builder.no_sandbox().disable_default_args();

        if let Some(bin) = Self::find_chrome_binary() {
            tracing::info!("Using Chrome binary: {}", bin.display());
            builder = builder.chrome_executable(bin);
        }
        if let Some(dir) = &options.user_data_dir {
            builder = builder.user_data_dir(dir);
        }
        if options.headless {
            builder = builder.arg("--headless=new");
        } else {
            builder = builder.with_head();
        }

        let config = builder
            .args(LAUNCH_ARGS.iter().copied())
            .window_size(1280, 900)
            .build()
            .map_err(|e| AppError::DriverError(format!("Browser config error: {e}")))?;

        let (browser, mut handler) = Browser::launch(config)
            .await
            .map_err(|e| AppError::DriverError(format!("Failed to launch browser: {e}")))?;

        // The CDP handler must be polled continuously for the connection to work.
        tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if event.is_err() {
                    tracing::warn!("Browser CDP handler error: {event:?}");
                    break;
                }
            }
        });

        let page = tokio::time::timeout(options.navigation_timeout * 4, browser.new_page(feed_url))
            .await
            .map_err(|_| AppError::Timeout(options.navigation_timeout.as_secs() * 4))?
            .map_err(|e| AppError::DriverError(format!("Failed to open {feed_url}: {e}")))?;

        Ok(Self {
            _browser: Arc::new(browser),
            page: Arc::new(page),
            feed_url: feed_url.to_string(),
            extractor: Arc::new(extractor),
            options,
        })
    }

    /// Locate a Chrome/Chromium binary, honouring `$CHROME_BIN`.
    ///
    /// The snap wrapper at `/snap/bin/chromium` strips unknown flags, so the
    /// real binary inside the snap is preferred. `None` lets chromiumoxide
    /// do its own lookup.
    fn find_chrome_binary() -> Option<PathBuf> {
        let candidates: &[&str] = &[
            "/snap/chromium/current/usr/lib/chromium-browser/chrome",
            "/var/lib/flatpak/exports/bin/org.chromium.Chromium",
            "/usr/bin/google-chrome-stable",
            "/usr/bin/google-chrome",
            "/usr/bin/chromium",
            "/usr/bin/chromium-browser",
        ];

        if let Ok(p) = std::env::var("CHROME_BIN") {
            let path = PathBuf::from(&p);
            if path.exists() {
                return Some(path);
            }
        }

        candidates.iter().map(PathBuf::from).find(|p| p.exists())
    }

    async fn content(&self) -> Result<String, AppError> {
        self.page
            .content()
            .await
            .map_err(|e| AppError::DriverError(format!("Failed to read page content: {e}")))
    }

    async fn reload_feed(&self) -> Result<(), AppError> {
        tokio::time::timeout(self.options.navigation_timeout, self.page.goto(self.feed_url.as_str()))
            .await
            .map_err(|_| AppError::Timeout(self.options.navigation_timeout.as_secs()))?
            .map_err(|e| AppError::DriverError(format!("Failed to reload feed: {e}")))?;
        Ok(())
    }

    async fn wait_for_detail(&self) -> bool {
        let css = self.extractor.detail_css();
        let poll = async {
            loop {
                if self.page.find_element(css).await.is_ok() {
                    return;
                }
                tokio::time::sleep(DETAIL_POLL).await;
            }
        };
        tokio::time::timeout(self.options.navigation_timeout, poll)
            .await
            .is_ok()
    }
}

impl FeedDriver for ChromiumFeedDriver {
    type View = DetailView;

    async fn current_candidates(&self) -> Result<Vec<CandidateItem>, AppError> {
        let html = self.content().await?;
        Ok(self.extractor.parse_feed(&html))
    }

    async fn reveal_more(&self) -> Result<(), AppError> {
        let script = format!("window.scrollBy(0, {})", self.options.scroll_px);
        self.page
            .evaluate(script)
            .await
            .map_err(|e| AppError::DriverError(format!("Scroll failed: {e}")))?;
        Ok(())
    }

    async fn open(&self, candidate: &CandidateItem) -> Result<Lookup<DetailView>, AppError> {
        let selector = self.extractor.card_selector_for(&candidate.identifier);
        let Ok(card) = self.page.find_element(selector).await else {
            return Ok(Lookup::NotFound);
        };

        card.scroll_into_view()
            .await
            .map_err(|e| AppError::DriverError(format!("Failed to scroll card into view: {e}")))?;
        card.click()
            .await
            .map_err(|e| AppError::DriverError(format!("Failed to click card: {e}")))?;

        if !self.wait_for_detail().await {
            return Ok(Lookup::NotFound);
        }

        Ok(Lookup::Found(DetailView {
            identifier: candidate.identifier.clone(),
        }))
    }

    async fn extract(&self, view: &DetailView) -> Result<NoteFields, AppError> {
        let html = self.content().await?;
        self.extractor.parse_detail(&html).found().ok_or_else(|| {
            AppError::ExtractionError(format!("Detail view for {} disappeared", view.identifier))
        })
    }

    async fn return_to_feed(&self) -> Result<(), AppError> {
        let location = self.page.url().await.ok().flatten().unwrap_or_default();

        if location.contains("/explore") {
            match self.page.evaluate("history.back()").await {
                Ok(_) => {
                    tokio::time::sleep(DETAIL_POLL).await;
                    return Ok(());
                }
                Err(e) => tracing::debug!(error = %e, "history.back() failed, reloading feed"),
            }
        }

        self.reload_feed().await
    }

    async fn snapshot(&self) -> Result<String, AppError> {
        self.content().await
    }
}

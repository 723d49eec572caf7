use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chromiumoxide::{Browser, BrowserConfig, Page};
use futures::StreamExt;
use vigil_core::error::AppError;
use vigil_core::traits::Renderer;

/// How often a wait-selector is re-probed while the page loads.
const WAIT_PROBE_INTERVAL: Duration = Duration::from_millis(250);

/// Settle time when no wait-selector is known. Scripted career pages usually
/// finish their initial listing render well within this.
const DEFAULT_SETTLE: Duration = Duration::from_secs(3);

/// Headless-browser renderer using Chromium via the Chrome DevTools Protocol
/// (the rendered strategy).
///
/// Unlike [`super::ReqwestFetcher`], this executes JavaScript before returning
/// the DOM, making it suitable for SPAs and pages with lazy-loaded listings.
///
/// A single Chromium process is shared across all clones of this struct;
/// each [`Renderer::render`] call opens a new tab, waits for the page to
/// settle, grabs the rendered HTML, and closes the tab.
#[derive(Clone)]
pub struct BrowserRenderer {
    browser: Arc<Browser>,
    timeout: Duration,
}

impl BrowserRenderer {
    /// Launches a headless Chromium browser with a **30 s** navigation timeout.
    ///
    /// Requires a Chromium / Chrome binary reachable via `$PATH` (or the
    /// default locations checked by `chromiumoxide`).
    pub async fn new() -> Result<Self, AppError> {
        Self::with_timeout(Duration::from_secs(30)).await
    }

    /// Launches a headless Chromium browser with a custom navigation timeout.
    pub async fn with_timeout(timeout: Duration) -> Result<Self, AppError> {
        let mut builder = BrowserConfig::builder();
        builder = builder.no_sandbox().disable_default_args();

        // Snap-packaged Chromium exposes a wrapper that rejects standard
        // Chrome CLI flags (--headless, --disable-gpu, …). Locate the real
        // binary buried inside the snap first, falling back to any other
        // Chrome/Chromium the user may have installed.
        if let Some(bin) = Self::find_chrome_binary() {
            tracing::info!("Using Chrome binary: {}", bin.display());
            builder = builder.chrome_executable(bin);
        }

        let config = builder
            .arg("--headless=new")
            .arg("--disable-gpu")
            .arg("--disable-dev-shm-usage")
            .arg("--disable-extensions")
            .arg("--disable-popup-blocking")
            .arg("--disable-translate")
            .arg("--no-first-run")
            .build()
            .map_err(|e| AppError::BrowserError(format!("Browser config error: {e}")))?;

        let (browser, mut handler) = Browser::launch(config)
            .await
            .map_err(|e| AppError::BrowserError(format!("Failed to launch browser: {e}")))?;

        // The CDP handler must be polled continuously for the connection to work.
        tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if event.is_err() {
                    tracing::warn!("Browser CDP handler error: {event:?}");
                    break;
                }
            }
        });

        Ok(Self {
            browser: Arc::new(browser),
            timeout,
        })
    }

    /// Tries to locate the real Chrome/Chromium binary.
    ///
    /// On systems where Chromium is installed via **snap**, the wrapper at
    /// `/snap/bin/chromium` strips unknown CLI flags, breaking headless mode.
    /// We look for the real binary inside the snap first, then fall back to
    /// well-known system paths. If nothing is found we return `None` and let
    /// `chromiumoxide` do its own lookup.
    fn find_chrome_binary() -> Option<PathBuf> {
        if let Ok(p) = std::env::var("CHROME_BIN") {
            let path = PathBuf::from(&p);
            if path.exists() {
                return Some(path);
            }
        }

        let candidates: &[&str] = &[
            // Snap (Ubuntu default)
            "/snap/chromium/current/usr/lib/chromium-browser/chrome",
            // Flatpak
            "/var/lib/flatpak/exports/bin/org.chromium.Chromium",
            // Common apt / manual installs
            "/usr/bin/google-chrome-stable",
            "/usr/bin/google-chrome",
            "/usr/bin/chromium",
            "/usr/bin/chromium-browser",
        ];

        candidates.iter().map(PathBuf::from).find(|p| p.exists())
    }

    /// Wait for the page to settle: either until `wait_selector` matches, or
    /// for a fixed settle duration when no selector is known yet.
    async fn wait_for_content(page: &Page, wait_selector: Option<&str>) {
        let Some(selector) = wait_selector else {
            tokio::time::sleep(DEFAULT_SETTLE).await;
            return;
        };

        // The outer navigation timeout bounds this loop.
        loop {
            if page.find_element(selector).await.is_ok() {
                return;
            }
            tokio::time::sleep(WAIT_PROBE_INTERVAL).await;
        }
    }
}

impl Renderer for BrowserRenderer {
    async fn render(&self, url: &str, wait_selector: Option<&str>) -> Result<String, AppError> {
        let timeout = self.timeout;

        let result = tokio::time::timeout(timeout, async {
            let page = self
                .browser
                .new_page(url)
                .await
                .map_err(|e| AppError::BrowserError(format!("Failed to navigate to {url}: {e}")))?;

            // <body> first: a minimal signal that anything rendered at all.
            page.find_element("body")
                .await
                .map_err(|e| AppError::BrowserError(format!("Page did not render body: {e}")))?;

            Self::wait_for_content(&page, wait_selector).await;

            let html = page
                .content()
                .await
                .map_err(|e| AppError::BrowserError(format!("Failed to read page content: {e}")))?;

            // Close the tab to free browser resources.
            let _ = page.close().await;

            Ok::<String, AppError>(html)
        })
        .await;

        match result {
            Ok(inner) => inner,
            Err(_) => Err(AppError::Timeout(timeout.as_secs())),
        }
    }
}

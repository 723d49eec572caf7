//! Fetch-and-extract pipeline: obtain markup (static strategy, escalating to
//! the rendered strategy when needed), detect selectors when absent, and turn
//! matching containers into fingerprinted job records.
//!
//! The engine is dedup-agnostic and performs no persistence: it is a pure
//! transformation of (markup, config) into records, aside from the network
//! I/O needed to obtain the markup. Callers persist any returned
//! `config_update` and filter records against the seen-set.

use std::sync::LazyLock;

use scraper::{ElementRef, Html, Selector};
use url::Url;

use crate::detector::SelectorDetector;
use crate::error::AppError;
use crate::models::{JobRecord, SelectorConfig, Target};
use crate::traits::{Fetcher, Renderer};

static ANCHOR_HREF: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("a[href]").expect("static selector"));

/// Result of one extraction run.
#[derive(Debug, Clone)]
pub struct ExtractionOutcome {
    /// Every record currently present on the page. Not filtered for dedup.
    pub records: Vec<JobRecord>,
    /// Set when the run learned something durable about the target: adopted
    /// auto-detected selectors, or pinned the rendered strategy.
    pub config_update: Option<SelectorConfig>,
}

impl ExtractionOutcome {
    fn undetectable() -> Self {
        Self {
            records: Vec::new(),
            config_update: None,
        }
    }
}

/// Fetches a target's markup and extracts job records from it.
#[derive(Clone)]
pub struct ExtractionEngine<F, R>
where
    F: Fetcher,
    R: Renderer,
{
    fetcher: F,
    renderer: R,
    detector: SelectorDetector,
}

impl<F, R> ExtractionEngine<F, R>
where
    F: Fetcher,
    R: Renderer,
{
    pub fn new(fetcher: F, renderer: R) -> Self {
        Self {
            fetcher,
            renderer,
            detector: SelectorDetector::new(),
        }
    }

    /// Run the pipeline for one target.
    ///
    /// 1. Fetch markup, escalating static → rendered when the static strategy
    ///    fails or yields markup detection can't work with.
    /// 2. Detect and adopt selectors if the config is in auto mode or lacks a
    ///    container selector.
    /// 3. Extract one record per container; containers without a usable title
    ///    are skipped silently.
    ///
    /// An empty record list with no `config_update` signals "undetectable",
    /// which is an expected outcome and not an error.
    pub async fn run(&self, target: &Target) -> Result<ExtractionOutcome, AppError> {
        let mut config = target.selectors.clone();

        let (html, via_browser) = self.obtain_markup(target, &config).await?;
        tracing::debug!(url = %target.url, bytes = html.len(), via_browser, "Fetched markup");

        let mut adopted = false;
        if config.needs_detection() {
            let detected = self.detector.detect(&html, &target.url);
            if detected.is_empty() {
                // One more shot: markup may only materialize under a browser.
                if via_browser || config.use_browser {
                    tracing::warn!(url = %target.url, "Failed to auto-detect selectors");
                    return Ok(ExtractionOutcome::undetectable());
                }
                return self.escalate(target, config).await;
            }
            config.container = detected.container;
            config.title = detected.title;
            config.link = detected.link;
            config.location = detected.location;
            adopted = true;
        }

        let records = extract_records(&html, target, &config)?;

        // A rendered fetch that worked earns a pin so future cycles skip the
        // doomed static attempt.
        let pinned = via_browser && !target.selectors.use_browser;
        if pinned {
            config.use_browser = true;
        }

        Ok(ExtractionOutcome {
            records,
            config_update: (adopted || pinned).then_some(config),
        })
    }

    /// Fetch markup with the strategy the config calls for. With no explicit
    /// pin, try static first and fall back to rendered on fetch failure.
    /// Returns the markup and whether the rendered strategy produced it.
    async fn obtain_markup(
        &self,
        target: &Target,
        config: &SelectorConfig,
    ) -> Result<(String, bool), AppError> {
        if config.use_browser {
            let html = self
                .renderer
                .render(&target.url, config.container.as_deref())
                .await?;
            return Ok((html, true));
        }

        match self.fetcher.fetch(&target.url).await {
            Ok(html) => Ok((html, false)),
            Err(e) if e.worth_escalating() => {
                tracing::info!(url = %target.url, error = %e, "Static fetch failed, retrying with browser");
                let html = self
                    .renderer
                    .render(&target.url, config.container.as_deref())
                    .await?;
                Ok((html, true))
            }
            Err(e) => Err(e),
        }
    }

    /// Static markup yielded no detectable containers: render once and rerun
    /// detection against the rendered DOM.
    async fn escalate(
        &self,
        target: &Target,
        mut config: SelectorConfig,
    ) -> Result<ExtractionOutcome, AppError> {
        tracing::info!(url = %target.url, "No containers in static markup, escalating to rendered fetch");
        let html = match self.renderer.render(&target.url, None).await {
            Ok(html) => html,
            Err(e) => {
                tracing::warn!(url = %target.url, error = %e, "Rendered fallback failed");
                return Ok(ExtractionOutcome::undetectable());
            }
        };

        let detected = self.detector.detect(&html, &target.url);
        if detected.is_empty() {
            tracing::warn!(url = %target.url, "Failed to auto-detect selectors");
            return Ok(ExtractionOutcome::undetectable());
        }
        config.container = detected.container;
        config.title = detected.title;
        config.link = detected.link;
        config.location = detected.location;
        // Detection only worked on the rendered DOM; pin the strategy so the
        // cost of this double fetch is paid once.
        config.use_browser = true;

        let records = extract_records(&html, target, &config)?;
        Ok(ExtractionOutcome {
            records,
            config_update: Some(config),
        })
    }
}

/// Select all containers in already-fetched markup and extract one record per
/// container. The engine calls this after its fetch; the CLI's one-shot
/// detection uses it directly to show sample records.
pub fn extract_records(
    html: &str,
    target: &Target,
    config: &SelectorConfig,
) -> Result<Vec<JobRecord>, AppError> {
    let Some(container) = config.container.as_deref() else {
        return Ok(Vec::new());
    };
    let container_sel = Selector::parse(container)
        .map_err(|e| AppError::SelectorError(format!("container '{container}': {e}")))?;

    let doc = Html::parse_document(html);
    let mut records = Vec::new();

    for card in doc.select(&container_sel) {
        match extract_from_card(card, target, config) {
            Some(record) => records.push(record),
            None => {
                tracing::debug!(url = %target.url, "Container without usable title, skipping");
            }
        }
    }

    tracing::debug!(url = %target.url, count = records.len(), "Extracted records");
    Ok(records)
}

/// Build a record from one container, walking each field's fallback chain.
/// Returns `None` when no usable title is found.
fn extract_from_card(
    card: ElementRef<'_>,
    target: &Target,
    config: &SelectorConfig,
) -> Option<JobRecord> {
    let title = extract_title(card, config)?;
    let url = extract_link(card, config, &target.url);
    let location = config
        .location
        .as_deref()
        .and_then(|s| select_text(card, s));
    let employer = extract_employer(card, config, &target.url);

    Some(JobRecord::new(target.id, title, employer, url, location))
}

fn extract_title(card: ElementRef<'_>, config: &SelectorConfig) -> Option<String> {
    if let Some(selector) = config.title.as_deref()
        && let Some(text) = select_text(card, selector)
    {
        return Some(text);
    }

    // Any heading or bold text inside the card.
    for tag in ["h1", "h2", "h3", "h4", "strong", "b"] {
        if let Some(el) = card
            .descendants()
            .skip(1)
            .filter_map(ElementRef::wrap)
            .find(|el| el.value().name() == tag)
        {
            let text = collapse(el.text().collect::<String>());
            if !text.is_empty() {
                return Some(text);
            }
        }
    }
    None
}

fn extract_link(card: ElementRef<'_>, config: &SelectorConfig, base_url: &str) -> String {
    let href = config
        .link
        .as_deref()
        .and_then(|s| Selector::parse(s).ok())
        .and_then(|sel| card.select(&sel).find_map(|el| el.value().attr("href")))
        .or_else(|| {
            card.select(&ANCHOR_HREF)
                .find_map(|el| el.value().attr("href"))
        });

    match href {
        Some(href) => resolve_href(base_url, href),
        // The page itself is still a working pointer to the posting.
        None => base_url.to_string(),
    }
}

fn extract_employer(card: ElementRef<'_>, config: &SelectorConfig, base_url: &str) -> String {
    if let Some(selector) = config.employer.as_deref()
        && let Some(text) = select_text(card, selector)
    {
        return text;
    }

    if let Some(el) = card
        .descendants()
        .skip(1)
        .filter_map(ElementRef::wrap)
        .find(|el| el.value().classes().any(|c| c.to_lowercase().contains("company")))
    {
        let text = collapse(el.text().collect::<String>());
        if !text.is_empty() {
            return text;
        }
    }

    employer_from_url(base_url)
}

/// Infer an employer name from the page's domain: strip a leading `www.`,
/// take the first label, title-case it.
pub fn employer_from_url(url: &str) -> String {
    let host = Url::parse(url)
        .ok()
        .and_then(|u| u.host_str().map(str::to_string))
        .unwrap_or_default();
    let stripped = host.strip_prefix("www.").unwrap_or(&host);
    let label = stripped.split('.').next().unwrap_or_default();

    let mut chars = label.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
        None => "Unknown".to_string(),
    }
}

fn resolve_href(base_url: &str, href: &str) -> String {
    match Url::parse(base_url).and_then(|base| base.join(href)) {
        Ok(url) => url.to_string(),
        Err(_) => href.to_string(),
    }
}

/// First non-empty text for a selector inside the card.
fn select_text(card: ElementRef<'_>, selector: &str) -> Option<String> {
    let sel = Selector::parse(selector).ok()?;
    card.select(&sel)
        .map(|el| collapse(el.text().collect::<String>()))
        .find(|text| !text.is_empty())
}

/// Collapse runs of whitespace, matching how a browser renders the text.
fn collapse(text: String) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{SelectorMode, Target, fingerprint};
    use crate::testutil::{MockFetcher, MockRenderer};

    const CAREERS_HTML: &str = r#"
        <html><body>
          <div class="job-item"><h3>Backend Engineer</h3><a href="/jobs/1">Apply</a></div>
          <div class="job-item"><h3>Frontend Engineer</h3><a href="/jobs/2">Apply</a></div>
          <div class="job-item"><h3>Data Engineer</h3><a href="/jobs/3">Apply</a></div>
        </body></html>
    "#;

    fn engine(fetcher: MockFetcher, renderer: MockRenderer) -> ExtractionEngine<MockFetcher, MockRenderer> {
        ExtractionEngine::new(fetcher, renderer)
    }

    fn target() -> Target {
        Target::new("https://acme.dev/careers", "user-1", 300)
    }

    #[tokio::test]
    async fn auto_detects_and_extracts_three_records() {
        let engine = engine(MockFetcher::new(CAREERS_HTML), MockRenderer::unused());
        let outcome = engine.run(&target()).await.unwrap();

        assert_eq!(outcome.records.len(), 3);
        let update = outcome.config_update.expect("detected selectors adopted");
        assert_eq!(update.container.as_deref(), Some(".job-item"));
        assert!(!update.use_browser, "static strategy sufficed");

        let first = &outcome.records[0];
        assert_eq!(first.title, "Backend Engineer");
        assert_eq!(first.employer, "Acme");
        assert_eq!(first.url, "https://acme.dev/jobs/1");
    }

    #[tokio::test]
    async fn extraction_is_idempotent() {
        let fetcher = MockFetcher::with_responses(vec![
            Ok(CAREERS_HTML.to_string()),
            Ok(CAREERS_HTML.to_string()),
        ]);
        let engine = engine(fetcher, MockRenderer::unused());
        let target = target();

        let a = engine.run(&target).await.unwrap();
        let b = engine.run(&target).await.unwrap();

        let fps = |o: &ExtractionOutcome| {
            let mut v: Vec<String> = o.records.iter().map(|r| r.fingerprint.clone()).collect();
            v.sort();
            v
        };
        assert_eq!(fps(&a), fps(&b));
    }

    #[tokio::test]
    async fn heading_fallback_supplies_title() {
        let html = r#"<div class="job-item"><h3>Staff Engineer</h3></div>
                      <div class="job-item"><h3>Staff Designer</h3></div>
                      <div class="job-item"><h3>Staff Writer</h3></div>"#;
        let mut target = target();
        // No title selector configured at all.
        target.selectors = SelectorConfig {
            mode: SelectorMode::Custom,
            container: Some(".job-item".into()),
            ..SelectorConfig::default()
        };
        let engine = engine(MockFetcher::new(html), MockRenderer::unused());
        let outcome = engine.run(&target).await.unwrap();

        assert_eq!(outcome.records.len(), 3);
        assert_eq!(outcome.records[0].title, "Staff Engineer");
        // Nothing new was learned; no config update.
        assert!(outcome.config_update.is_none());
    }

    #[tokio::test]
    async fn card_without_title_is_skipped() {
        let html = r#"<div class="job-item"><h3>Engineer</h3><a href="/1">Apply</a></div>
                      <div class="job-item"><a href="/2">Apply</a></div>"#;
        let mut target = target();
        target.selectors = SelectorConfig {
            mode: SelectorMode::Custom,
            container: Some(".job-item".into()),
            ..SelectorConfig::default()
        };
        let engine = engine(MockFetcher::new(html), MockRenderer::unused());
        let outcome = engine.run(&target).await.unwrap();

        assert_eq!(outcome.records.len(), 1);
        assert_eq!(outcome.records[0].title, "Engineer");
    }

    #[tokio::test]
    async fn link_falls_back_to_page_url() {
        let html = r#"<div class="job-item"><h3>Engineer</h3></div>
                      <div class="job-item"><h3>Designer</h3></div>
                      <div class="job-item"><h3>Writer</h3></div>"#;
        let mut target = target();
        target.selectors = SelectorConfig {
            mode: SelectorMode::Custom,
            container: Some(".job-item".into()),
            ..SelectorConfig::default()
        };
        let engine = engine(MockFetcher::new(html), MockRenderer::unused());
        let outcome = engine.run(&target).await.unwrap();

        assert_eq!(outcome.records[0].url, "https://acme.dev/careers");
    }

    #[tokio::test]
    async fn escalates_to_renderer_and_pins_strategy() {
        // Static markup is an empty shell; only the rendered DOM has listings.
        let shell = "<html><body><div id='root'></div></body></html>";
        let engine = engine(
            MockFetcher::new(shell),
            MockRenderer::new(CAREERS_HTML),
        );
        let outcome = engine.run(&target()).await.unwrap();

        assert_eq!(outcome.records.len(), 3);
        let update = outcome.config_update.expect("escalation pins the strategy");
        assert!(update.use_browser);
        assert_eq!(update.container.as_deref(), Some(".job-item"));
    }

    #[tokio::test]
    async fn pinned_browser_strategy_skips_static_fetch() {
        let fetcher = MockFetcher::with_error(AppError::HttpError("must not be called".into()));
        let renderer = MockRenderer::new(CAREERS_HTML);
        let engine = engine(fetcher.clone(), renderer.clone());

        let mut target = target();
        target.selectors.use_browser = true;
        let outcome = engine.run(&target).await.unwrap();

        assert_eq!(outcome.records.len(), 3);
        assert_eq!(fetcher.calls(), 0);
        assert_eq!(renderer.calls(), 1);
        // Already pinned: detection adoption is the only update reason.
        let update = outcome.config_update.expect("selectors adopted");
        assert!(update.use_browser);
    }

    #[tokio::test]
    async fn fetch_failure_escalates_once() {
        let fetcher = MockFetcher::with_error(AppError::Timeout(30));
        let renderer = MockRenderer::new(CAREERS_HTML);
        let engine = engine(fetcher, renderer.clone());

        let outcome = engine.run(&target()).await.unwrap();
        assert_eq!(outcome.records.len(), 3);
        assert_eq!(renderer.calls(), 1);
        assert!(outcome.config_update.unwrap().use_browser);
    }

    #[tokio::test]
    async fn undetectable_page_is_empty_not_error() {
        let plain = "<html><body><p>We are hiring, email us!</p></body></html>";
        let engine = engine(
            MockFetcher::new(plain),
            MockRenderer::new(plain),
        );
        let outcome = engine.run(&target()).await.unwrap();

        assert!(outcome.records.is_empty());
        assert!(outcome.config_update.is_none());
    }

    #[tokio::test]
    async fn render_failure_after_fetch_failure_is_an_error() {
        let engine = engine(
            MockFetcher::with_error(AppError::NetworkError("refused".into())),
            MockRenderer::with_error(AppError::BrowserError("no binary".into())),
        );
        let err = engine.run(&target()).await.unwrap_err();
        assert!(matches!(err, AppError::BrowserError(_)));
    }

    #[tokio::test]
    async fn distinct_employers_make_distinct_fingerprints() {
        let html = r#"
            <div class="job-item"><h3>Engineer</h3><span class="company">Acme</span><a href="/j/1">Apply</a></div>
            <div class="job-item"><h3>Engineer</h3><span class="company">Globex</span><a href="/j/1">Apply</a></div>
            <div class="job-item"><h3>Engineer</h3><span class="company">Initech</span><a href="/j/1">Apply</a></div>
        "#;
        let mut target = target();
        target.selectors = SelectorConfig {
            mode: SelectorMode::Custom,
            container: Some(".job-item".into()),
            ..SelectorConfig::default()
        };
        let engine = engine(MockFetcher::new(html), MockRenderer::unused());
        let outcome = engine.run(&target).await.unwrap();

        assert_eq!(outcome.records.len(), 3);
        assert_ne!(outcome.records[0].fingerprint, outcome.records[1].fingerprint);
        assert_eq!(
            outcome.records[0].fingerprint,
            fingerprint("Engineer", "Acme", "https://acme.dev/j/1")
        );
    }

    #[test]
    fn employer_inference_from_domain() {
        assert_eq!(employer_from_url("https://www.acme.dev/careers"), "Acme");
        assert_eq!(employer_from_url("https://jobs.example.com/"), "Jobs");
        assert_eq!(employer_from_url("not a url"), "Unknown");
    }
}

//! Heuristic detection of job-listing selectors on unconfigured pages.
//!
//! Candidate containers come from job-vocabulary class/attribute patterns and
//! from structurally repeated sibling groups, then get scored on content
//! signals. An empty result is a normal outcome meaning the page needs manual
//! selector configuration; this module never fails.

use std::collections::HashSet;
use std::sync::LazyLock;

use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use serde::Serialize;

use crate::models::SelectorConfig;

/// Class/attribute vocabulary for job listing containers.
static CONTAINER_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    compile(&[
        r"job[-_]?(?:item|card|listing|post|entry|container|row|box)",
        r"position[-_]?(?:item|card|listing|entry)",
        r"career[-_]?(?:item|card|listing|entry)",
        r"opening[-_]?(?:item|card|listing|entry)",
        r"vacancy[-_]?(?:item|card|listing)",
    ])
});

static DATA_ATTR_PATTERNS: LazyLock<Vec<Regex>> =
    LazyLock::new(|| compile(&[r"data-job", r"data-position"]));

static TITLE_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    compile(&[
        r"job[-_]?title",
        r"position[-_]?title",
        r"role[-_]?title",
        r"title",
        r"job[-_]?name",
        r"position[-_]?name",
    ])
});

static LINK_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    compile(&[
        r"job[-_]?link",
        r"apply[-_]?link",
        r"details[-_]?link",
        r"view[-_]?job",
    ])
});

static LOCATION_PATTERNS: LazyLock<Vec<Regex>> =
    LazyLock::new(|| compile(&[r"job[-_]?location", r"location", r"city", r"office"]));

/// Keywords whose presence in a candidate's text raises its score.
const JOB_KEYWORDS: &[&str] = &[
    "apply",
    "position",
    "location",
    "remote",
    "full-time",
    "part-time",
    "hybrid",
    "salary",
];

/// Layout-framework class tokens that make poor selectors.
const GENERIC_CLASSES: &[&str] = &["d-flex", "row", "col", "container", "flex", "grid"];

/// Parents scanned for repeated sibling groups.
static REPEAT_PARENTS: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("ul, ol, div, section, table, tbody").expect("static selector"));

static ANY_ELEMENT: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("*").expect("static selector"));

static ANCHOR: LazyLock<Selector> = LazyLock::new(|| Selector::parse("a").expect("static selector"));

fn compile(patterns: &[&str]) -> Vec<Regex> {
    patterns
        .iter()
        .map(|p| Regex::new(&format!("(?i){p}")).expect("static pattern"))
        .collect()
}

/// Selectors proposed by [`SelectorDetector::detect`]. All fields optional;
/// an empty set means the page is not auto-detectable.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DetectedSelectors {
    pub container: Option<String>,
    pub title: Option<String>,
    pub link: Option<String>,
    pub location: Option<String>,
}

impl DetectedSelectors {
    pub fn is_empty(&self) -> bool {
        self.container.is_none()
    }
}

/// Analyzes raw markup and proposes extraction selectors.
#[derive(Debug, Clone, Copy, Default)]
pub struct SelectorDetector;

impl SelectorDetector {
    pub fn new() -> Self {
        Self
    }

    /// Detect container/title/link/location selectors for job listings.
    pub fn detect(&self, html: &str, url: &str) -> DetectedSelectors {
        let doc = Html::parse_document(html);
        let containers = self.candidate_containers(&doc);

        if containers.is_empty() {
            tracing::warn!(%url, "No job containers detected");
            return DetectedSelectors::default();
        }
        tracing::debug!(%url, count = containers.len(), "Detected potential job containers");

        // The handful of best candidates is enough to settle the field
        // selectors; listings are homogeneous.
        let sample = &containers[..containers.len().min(5)];

        let detected = DetectedSelectors {
            container: Some(selector_for(containers[0])),
            title: detect_title(sample),
            link: detect_link(sample),
            location: detect_location(sample),
        };
        tracing::info!(%url, ?detected, "Detected selectors");
        detected
    }

    /// True when the config's container selector matches at least one element
    /// in the markup.
    pub fn validate(&self, html: &str, config: &SelectorConfig) -> bool {
        let Some(container) = config.container.as_deref() else {
            return false;
        };
        let Ok(selector) = Selector::parse(container) else {
            return false;
        };
        let doc = Html::parse_document(html);
        let count = doc.select(&selector).count();
        if count == 0 {
            tracing::warn!(selector = container, "Container selector found no elements");
        }
        count > 0
    }

    /// Collect scored candidate containers, best first, capped at 20.
    fn candidate_containers<'a>(&self, doc: &'a Html) -> Vec<ElementRef<'a>> {
        let mut candidates: Vec<ElementRef<'a>> = Vec::new();
        let mut seen = HashSet::new();

        for element in doc.select(&ANY_ELEMENT) {
            let by_class = element
                .value()
                .classes()
                .any(|c| CONTAINER_PATTERNS.iter().any(|p| p.is_match(c)));
            let by_attr = element.value().attrs().any(|(name, value)| {
                DATA_ATTR_PATTERNS
                    .iter()
                    .any(|p| p.is_match(name) || p.is_match(value))
            });
            if (by_class || by_attr) && seen.insert(element.id()) {
                candidates.push(element);
            }
        }

        // Listings are almost always rendered as homogeneous repeated blocks,
        // so sibling groups with identical structure count even without any
        // vocabulary hit.
        for element in repeated_structures(doc) {
            if seen.insert(element.id()) {
                candidates.push(element);
            }
        }

        let mut scored: Vec<(i32, ElementRef<'a>)> = candidates
            .into_iter()
            .filter_map(|el| {
                let score = score_container(el);
                (score > 0).then_some((score, el))
            })
            .collect();
        scored.sort_by_key(|(score, _)| -score);
        scored.truncate(20);
        scored.into_iter().map(|(_, el)| el).collect()
    }
}

/// Children of any parent holding ≥3 structurally identical element children.
fn repeated_structures<'a>(doc: &'a Html) -> Vec<ElementRef<'a>> {
    let mut out = Vec::new();

    for parent in doc.select(&REPEAT_PARENTS) {
        let children: Vec<ElementRef<'a>> = parent.child_elements().collect();
        if children.len() < 3 {
            continue;
        }
        let head = &children[..children.len().min(5)];
        let first = signature(head[0]);
        if head.iter().skip(1).all(|el| signature(*el) == first) {
            out.extend(children);
        }
    }
    out
}

/// Structural identity of an element: tag, sorted classes, sorted child tags.
fn signature(el: ElementRef<'_>) -> String {
    let mut classes: Vec<&str> = el.value().classes().collect();
    classes.sort_unstable();
    let mut child_tags: Vec<&str> = el.child_elements().map(|c| c.value().name()).collect();
    child_tags.sort_unstable();
    format!("{}|{}|{}", el.value().name(), classes.join(" "), child_tags.join(" "))
}

/// Score how likely an element is to be a single job card.
fn score_container(el: ElementRef<'_>) -> i32 {
    let text: String = el.text().collect::<String>().to_lowercase();
    let mut score = 0;

    for keyword in JOB_KEYWORDS {
        if text.contains(keyword) {
            score += 1;
        }
    }

    if el.select(&ANCHOR).next().is_some() {
        score += 2;
    }

    // Very long text is likely a whole section, not one card.
    if text.len() > 500 {
        score -= 2;
    }
    if text.len() > 50 && text.len() < 300 {
        score += 1;
    }

    score
}

/// Derive a CSS selector for an element, preferring a semantically specific
/// class token over generic layout classes, falling back to the tag name.
fn selector_for(el: ElementRef<'_>) -> String {
    for class in el.value().classes() {
        if class.len() > 2 && !GENERIC_CLASSES.contains(&class) {
            return format!(".{class}");
        }
    }
    el.value().name().to_string()
}

fn descendant_elements<'a>(el: ElementRef<'a>) -> impl Iterator<Item = ElementRef<'a>> {
    el.descendants().skip(1).filter_map(ElementRef::wrap)
}

fn detect_title(containers: &[ElementRef<'_>]) -> Option<String> {
    for container in containers {
        for el in descendant_elements(*container) {
            if el
                .value()
                .classes()
                .any(|c| TITLE_PATTERNS.iter().any(|p| p.is_match(c)))
            {
                return Some(selector_for(el));
            }
        }

        // Headings are the common title markup.
        for tag in ["h1", "h2", "h3", "h4"] {
            if descendant_elements(*container).any(|el| el.value().name() == tag) {
                return Some(tag.to_string());
            }
        }

        if let Some(el) = descendant_elements(*container).find(|el| {
            el.value().name() == "a"
                && el
                    .value()
                    .classes()
                    .any(|c| c.to_lowercase().contains("title") || c.to_lowercase().contains("name"))
        }) {
            return Some(selector_for(el));
        }
    }
    None
}

fn detect_link(containers: &[ElementRef<'_>]) -> Option<String> {
    for container in containers {
        if let Some(el) = descendant_elements(*container).find(|el| {
            el.value().name() == "a"
                && el
                    .value()
                    .classes()
                    .any(|c| LINK_PATTERNS.iter().any(|p| p.is_match(c)))
        }) {
            return Some(selector_for(el));
        }

        if descendant_elements(*container)
            .any(|el| el.value().name() == "a" && el.value().attr("href").is_some())
        {
            return Some("a".to_string());
        }
    }
    None
}

fn detect_location(containers: &[ElementRef<'_>]) -> Option<String> {
    for container in containers {
        for el in descendant_elements(*container) {
            if el
                .value()
                .classes()
                .any(|c| LOCATION_PATTERNS.iter().any(|p| p.is_match(c)))
            {
                return Some(selector_for(el));
            }
        }

        if let Some(el) = descendant_elements(*container).find(|el| {
            el.value()
                .attr("data-icon")
                .is_some_and(|v| v.to_lowercase().contains("location") || v.to_lowercase().contains("map"))
        }) {
            return Some(selector_for(el));
        }
    }
    // Location legitimately may not exist on the page.
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::SelectorMode;

    const LISTING_PAGE: &str = r#"
        <html><body>
          <div class="jobs">
            <div class="job-item">
              <h3>Backend Engineer</h3>
              <span class="job-location">Berlin</span>
              <a href="/jobs/1">Apply</a>
            </div>
            <div class="job-item">
              <h3>Frontend Engineer</h3>
              <span class="job-location">Remote</span>
              <a href="/jobs/2">Apply</a>
            </div>
            <div class="job-item">
              <h3>Data Engineer</h3>
              <span class="job-location">Munich</span>
              <a href="/jobs/3">Apply</a>
            </div>
          </div>
        </body></html>
    "#;

    #[test]
    fn detects_job_item_container_and_fields() {
        let detector = SelectorDetector::new();
        let detected = detector.detect(LISTING_PAGE, "https://acme.dev/careers");

        assert_eq!(detected.container.as_deref(), Some(".job-item"));
        assert_eq!(detected.title.as_deref(), Some("h3"));
        assert_eq!(detected.link.as_deref(), Some("a"));
        assert_eq!(detected.location.as_deref(), Some(".job-location"));
    }

    #[test]
    fn repeated_siblings_detected_without_vocabulary() {
        // No job-* classes at all; only the repeated structure gives it away.
        let html = r#"
            <ul class="openlist">
              <li class="entry"><h2>Platform Engineer</h2><a href="/p/1">Apply now</a></li>
              <li class="entry"><h2>SRE</h2><a href="/p/2">Apply now</a></li>
              <li class="entry"><h2>QA Analyst</h2><a href="/p/3">Apply now</a></li>
            </ul>
        "#;
        let detected = SelectorDetector::new().detect(html, "https://example.com/open");
        assert_eq!(detected.container.as_deref(), Some(".entry"));
        assert_eq!(detected.title.as_deref(), Some("h2"));
    }

    #[test]
    fn empty_result_for_plain_page() {
        let html = "<html><body><p>About our company history.</p></body></html>";
        let detected = SelectorDetector::new().detect(html, "https://example.com/about");
        assert!(detected.is_empty());
    }

    #[test]
    fn generic_layout_classes_are_not_proposed() {
        let html = r#"
            <div>
              <div class="row job-card"><h3>Engineer</h3><a href="/1">Apply</a> Remote</div>
              <div class="row job-card"><h3>Designer</h3><a href="/2">Apply</a> Remote</div>
              <div class="row job-card"><h3>Writer</h3><a href="/3">Apply</a> Remote</div>
            </div>
        "#;
        let detected = SelectorDetector::new().detect(html, "https://example.com/jobs");
        // "row" is first in class order but must be skipped for "job-card".
        assert_eq!(detected.container.as_deref(), Some(".job-card"));
    }

    #[test]
    fn data_attribute_marks_container() {
        let html = r#"
            <section>
              <article data-job-id="1"><h4>Engineer</h4><a href="/a">Apply</a> Full-time remote role</article>
            </section>
        "#;
        let detected = SelectorDetector::new().detect(html, "https://example.com/jobs");
        assert_eq!(detected.container.as_deref(), Some("article"));
        assert_eq!(detected.title.as_deref(), Some("h4"));
    }

    #[test]
    fn oversized_candidates_are_penalized() {
        let filler = "lorem ipsum ".repeat(60);
        let html = format!(
            r#"
            <div class="job-listing">{filler}</div>
            <div class="job-card"><h3>Engineer</h3><a href="/1">Apply</a> Remote position</div>
            "#
        );
        let detected = SelectorDetector::new().detect(&html, "https://example.com/jobs");
        assert_eq!(detected.container.as_deref(), Some(".job-card"));
    }

    #[test]
    fn validate_checks_container_matches() {
        let detector = SelectorDetector::new();
        let mut config = SelectorConfig {
            mode: SelectorMode::Custom,
            container: Some(".job-item".into()),
            ..SelectorConfig::default()
        };
        assert!(detector.validate(LISTING_PAGE, &config));

        config.container = Some(".does-not-exist".into());
        assert!(!detector.validate(LISTING_PAGE, &config));

        config.container = None;
        assert!(!detector.validate(LISTING_PAGE, &config));
    }
}

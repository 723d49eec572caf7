use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

/// Smallest poll interval a target may be configured with, in seconds.
pub const MIN_INTERVAL_SECS: u64 = 60;

/// Status of a monitored target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TargetStatus {
    Active,
    Paused,
    Error,
}

impl TargetStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TargetStatus::Active => "active",
            TargetStatus::Paused => "paused",
            TargetStatus::Error => "error",
        }
    }
}

impl fmt::Display for TargetStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for TargetStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "active" => Ok(TargetStatus::Active),
            "paused" => Ok(TargetStatus::Paused),
            "error" => Ok(TargetStatus::Error),
            _ => Err(format!("Unknown target status: {}", s)),
        }
    }
}

/// How extraction selectors for a target are determined.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SelectorMode {
    /// Selectors are detected from the page markup each time they are missing.
    Auto,
    /// Selectors were supplied by the user and are used as-is.
    Custom,
}

/// CSS selectors used to extract job records from a target's markup.
///
/// All field selectors are optional; extraction falls back to structural
/// heuristics (headings, first anchor, domain name) where one is absent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SelectorConfig {
    pub mode: SelectorMode,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub container: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub link: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub employer: Option<String>,
    /// Pinned to true once a cycle only succeeded via the rendered strategy.
    #[serde(default)]
    pub use_browser: bool,
}

impl Default for SelectorConfig {
    fn default() -> Self {
        Self {
            mode: SelectorMode::Auto,
            container: None,
            title: None,
            link: None,
            location: None,
            employer: None,
            use_browser: false,
        }
    }
}

impl SelectorConfig {
    /// True when extraction must run detection before selecting containers.
    pub fn needs_detection(&self) -> bool {
        self.mode == SelectorMode::Auto || self.container.is_none()
    }
}

/// A career page being monitored, with its runtime counters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Target {
    pub id: Uuid,
    pub url: String,
    /// Subscriber who registered the target; notification batches are
    /// addressed to them.
    pub owner: String,
    pub interval_secs: u64,
    pub status: TargetStatus,
    pub selectors: SelectorConfig,
    pub jobs_found_total: i64,
    pub error_count: i32,
    pub last_check: Option<DateTime<Utc>>,
    pub last_success: Option<DateTime<Utc>>,
    pub added_at: DateTime<Utc>,
}

impl Target {
    /// Create a new active target with default auto-detection selectors.
    ///
    /// The poll interval is clamped to [`MIN_INTERVAL_SECS`].
    pub fn new(url: impl Into<String>, owner: impl Into<String>, interval_secs: u64) -> Self {
        Self {
            id: Uuid::new_v4(),
            url: url.into(),
            owner: owner.into(),
            interval_secs: interval_secs.max(MIN_INTERVAL_SECS),
            status: TargetStatus::Active,
            selectors: SelectorConfig::default(),
            jobs_found_total: 0,
            error_count: 0,
            last_check: None,
            last_success: None,
            added_at: Utc::now(),
        }
    }

    pub fn with_selectors(mut self, selectors: SelectorConfig) -> Self {
        self.selectors = selectors;
        self
    }

    /// True when enough time has passed since the last check to scrape again.
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        match self.last_check {
            None => true,
            Some(last) => (now - last).num_seconds() >= self.interval_secs as i64,
        }
    }
}

/// One extracted job posting. Immutable once constructed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobRecord {
    /// Content-derived identity; see [`fingerprint`].
    pub fingerprint: String,
    pub target_id: Uuid,
    pub title: String,
    pub employer: String,
    pub url: String,
    pub location: Option<String>,
    pub first_seen: DateTime<Utc>,
}

impl JobRecord {
    pub fn new(
        target_id: Uuid,
        title: impl Into<String>,
        employer: impl Into<String>,
        url: impl Into<String>,
        location: Option<String>,
    ) -> Self {
        let title = title.into();
        let employer = employer.into();
        let url = url.into();
        Self {
            fingerprint: fingerprint(&title, &employer, &url),
            target_id,
            title,
            employer,
            url,
            location,
            first_seen: Utc::now(),
        }
    }
}

/// Compute the stable fingerprint of a posting: SHA-256 over
/// `title|employer|url`, as 64-char hex.
///
/// Two records with the same triple are the same posting; a differing
/// employer or link keeps them distinct even under an identical title.
pub fn fingerprint(title: &str, employer: &str, url: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(title.as_bytes());
    hasher.update(b"|");
    hasher.update(employer.as_bytes());
    hasher.update(b"|");
    hasher.update(url.as_bytes());
    format!("{:x}", hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fingerprint_stable() {
        let a = fingerprint("Engineer", "Acme", "https://acme.dev/jobs/1");
        let b = fingerprint("Engineer", "Acme", "https://acme.dev/jobs/1");
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
    }

    #[test]
    fn test_fingerprint_distinct_per_employer() {
        // Same title and link, different employer: two distinct postings.
        let a = fingerprint("Engineer", "Acme", "https://jobs.example/1");
        let b = fingerprint("Engineer", "Globex", "https://jobs.example/1");
        assert_ne!(a, b);
    }

    #[test]
    fn test_target_status_roundtrip() {
        for status in [TargetStatus::Active, TargetStatus::Paused, TargetStatus::Error] {
            let parsed: TargetStatus = status.as_str().parse().unwrap();
            assert_eq!(parsed, status);
        }
        assert!("bogus".parse::<TargetStatus>().is_err());
    }

    #[test]
    fn test_minimum_interval_enforced() {
        let target = Target::new("https://example.com/careers", "user-1", 5);
        assert_eq!(target.interval_secs, MIN_INTERVAL_SECS);

        let target = Target::new("https://example.com/careers", "user-1", 600);
        assert_eq!(target.interval_secs, 600);
    }

    #[test]
    fn test_is_due() {
        let mut target = Target::new("https://example.com/careers", "user-1", 300);
        let now = Utc::now();
        assert!(target.is_due(now), "never-checked target is always due");

        target.last_check = Some(now - chrono::TimeDelta::seconds(100));
        assert!(!target.is_due(now));

        target.last_check = Some(now - chrono::TimeDelta::seconds(301));
        assert!(target.is_due(now));
    }

    #[test]
    fn test_needs_detection() {
        let mut config = SelectorConfig::default();
        assert!(config.needs_detection());

        config.mode = SelectorMode::Custom;
        assert!(config.needs_detection(), "custom mode without container still detects");

        config.container = Some(".job-item".into());
        assert!(!config.needs_detection());
    }

    #[test]
    fn test_record_fingerprint_matches_free_function() {
        let record = JobRecord::new(
            Uuid::new_v4(),
            "Engineer",
            "Acme",
            "https://acme.dev/jobs/1",
            None,
        );
        assert_eq!(
            record.fingerprint,
            fingerprint("Engineer", "Acme", "https://acme.dev/jobs/1")
        );
    }
}

//! Per-domain throttling for the static fetch strategy.
//!
//! All monitor tasks share one [`ThrottledFetcher`], so several targets on
//! the same host never hammer it in lockstep. The added jitter doubles as the
//! short randomized delay that keeps static fetches from looking automated.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::Mutex;
use url::Url;

use crate::error::AppError;
use crate::traits::Fetcher;

/// Configuration for the throttled fetcher.
#[derive(Debug, Clone)]
pub struct ThrottleConfig {
    /// Minimum delay between consecutive requests to the same domain.
    pub delay: Duration,

    /// Maximum random jitter added on top of `delay` (uniform [0, jitter]).
    pub jitter: Duration,
}

impl ThrottleConfig {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            jitter: Duration::ZERO,
        }
    }

    pub fn with_jitter(mut self, jitter: Duration) -> Self {
        self.jitter = jitter;
        self
    }

    fn effective_delay(&self) -> Duration {
        if self.jitter.is_zero() {
            return self.delay;
        }
        let jitter_ms = rand_jitter_ms(self.jitter.as_millis() as u64);
        self.delay + Duration::from_millis(jitter_ms)
    }
}

impl Default for ThrottleConfig {
    /// 1 second delay, 500 ms jitter.
    fn default() -> Self {
        Self {
            delay: Duration::from_secs(1),
            jitter: Duration::from_millis(500),
        }
    }
}

/// A [`Fetcher`] wrapper that enforces per-domain delays.
///
/// Tracks the last request time per domain (scheme + host + port) and sleeps
/// before a new request if the minimum delay hasn't elapsed. Concurrent tasks
/// serialize per domain; requests to different domains never wait on each
/// other.
#[derive(Clone)]
pub struct ThrottledFetcher<F> {
    inner: F,
    config: ThrottleConfig,
    last_request: Arc<Mutex<HashMap<String, Instant>>>,
}

impl<F: Fetcher> ThrottledFetcher<F> {
    pub fn new(inner: F, config: ThrottleConfig) -> Self {
        Self {
            inner,
            config,
            last_request: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    fn domain_key(url_str: &str) -> Option<String> {
        let url = Url::parse(url_str).ok()?;
        let host = url.host_str()?;
        let port = url
            .port_or_known_default()
            .map(|p| format!(":{p}"))
            .unwrap_or_default();
        Some(format!("{}://{}{}", url.scheme(), host, port))
    }

    async fn wait_for_domain(&self, domain: &str) {
        let mut map = self.last_request.lock().await;

        if let Some(&last) = map.get(domain) {
            let elapsed = last.elapsed();
            let required = self.config.effective_delay();
            if elapsed < required {
                let sleep_duration = required - elapsed;
                // Drop the lock while sleeping so other domains aren't blocked.
                drop(map);
                tracing::debug!(
                    domain = %domain,
                    sleep_ms = %sleep_duration.as_millis(),
                    "Throttling request"
                );
                tokio::time::sleep(sleep_duration).await;
                let mut map = self.last_request.lock().await;
                map.insert(domain.to_string(), Instant::now());
            } else {
                map.insert(domain.to_string(), Instant::now());
            }
        } else {
            map.insert(domain.to_string(), Instant::now());
        }
    }
}

impl<F: Fetcher> Fetcher for ThrottledFetcher<F> {
    async fn fetch(&self, url: &str) -> Result<String, AppError> {
        if let Some(domain) = Self::domain_key(url) {
            self.wait_for_domain(&domain).await;
        }
        self.inner.fetch(url).await
    }
}

// Jitter from a time-seeded xorshift. Good enough for pacing, not crypto,
// and avoids pulling in the `rand` crate.
fn rand_jitter_ms(max_ms: u64) -> u64 {
    if max_ms == 0 {
        return 0;
    }
    let mut x = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos() as u64;
    x ^= x << 13;
    x ^= x >> 7;
    x ^= x << 17;
    x % max_ms
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::MockFetcher;

    #[test]
    fn domain_key_extracts_correctly() {
        assert_eq!(
            ThrottledFetcher::<MockFetcher>::domain_key("https://acme.dev/careers?dept=eng"),
            Some("https://acme.dev:443".to_string())
        );
        assert_eq!(
            ThrottledFetcher::<MockFetcher>::domain_key("http://acme.dev:8080/jobs"),
            Some("http://acme.dev:8080".to_string())
        );
        assert_eq!(ThrottledFetcher::<MockFetcher>::domain_key("not-a-url"), None);
    }

    #[test]
    fn effective_delay_with_jitter_is_bounded() {
        let config =
            ThrottleConfig::new(Duration::from_millis(100)).with_jitter(Duration::from_millis(50));
        for _ in 0..100 {
            let d = config.effective_delay();
            assert!(d >= Duration::from_millis(100));
            assert!(d < Duration::from_millis(150));
        }
    }

    #[tokio::test]
    async fn throttle_enforces_delay_on_same_domain() {
        let inner = MockFetcher::new("<html>ok</html>");
        let fetcher = ThrottledFetcher::new(inner, ThrottleConfig::new(Duration::from_millis(100)));

        let start = Instant::now();
        fetcher.fetch("http://acme.dev/careers").await.unwrap();
        fetcher.fetch("http://acme.dev/careers").await.unwrap();

        assert!(start.elapsed() >= Duration::from_millis(100));
    }

    #[tokio::test]
    async fn throttle_does_not_delay_different_domains() {
        let inner = MockFetcher::new("<html>ok</html>");
        let fetcher = ThrottledFetcher::new(inner, ThrottleConfig::new(Duration::from_millis(200)));

        let start = Instant::now();
        fetcher.fetch("http://acme.dev/careers").await.unwrap();
        fetcher.fetch("http://globex.example/jobs").await.unwrap();

        assert!(start.elapsed() < Duration::from_millis(150));
    }

    #[tokio::test]
    async fn throttle_passes_through_errors() {
        let inner = MockFetcher::with_error(AppError::HttpError("fail".into()));
        let fetcher = ThrottledFetcher::new(inner, ThrottleConfig::new(Duration::ZERO));

        let err = fetcher.fetch("http://acme.dev").await.unwrap_err();
        assert!(matches!(err, AppError::HttpError(_)));
    }
}

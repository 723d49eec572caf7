use std::net::IpAddr;
use std::time::Duration;

use reqwest::Client;
use reqwest::header::{ACCEPT, ACCEPT_LANGUAGE, HeaderMap, HeaderValue};
use url::Url;
use vigil_core::error::AppError;
use vigil_core::traits::Fetcher;

/// Career pages routinely serve reduced markup (or a 403) to obvious bots,
/// so the static strategy presents itself as a desktop browser.
const USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 \
                          (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

/// HTTP fetcher using reqwest (the static strategy).
///
/// By default, SSRF protection is **enabled** — requests to private/reserved
/// IP ranges are blocked. Use [`allow_private_urls`](Self::allow_private_urls)
/// to disable this (e.g., for CLI usage where the user controls the machine).
#[derive(Clone)]
pub struct ReqwestFetcher {
    client: Client,
    timeout_secs: u64,
    ssrf_protection: bool,
}

impl ReqwestFetcher {
    pub fn new() -> Result<Self, AppError> {
        Self::with_timeout(Duration::from_secs(30))
    }

    pub fn with_timeout(timeout: Duration) -> Result<Self, AppError> {
        Self::with_user_agent(timeout, USER_AGENT)
    }

    pub fn with_user_agent(timeout: Duration, user_agent: &str) -> Result<Self, AppError> {
        let timeout_secs = timeout.as_secs();

        let mut headers = HeaderMap::new();
        headers.insert(
            ACCEPT,
            HeaderValue::from_static(
                "text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8",
            ),
        );
        headers.insert(ACCEPT_LANGUAGE, HeaderValue::from_static("en-US,en;q=0.9"));

        let client = Client::builder()
            .user_agent(user_agent)
            .default_headers(headers)
            .timeout(timeout)
            .build()
            .map_err(|e| AppError::HttpError(e.to_string()))?;

        Ok(Self {
            client,
            timeout_secs,
            ssrf_protection: true,
        })
    }

    /// Disable SSRF protection, allowing requests to private/reserved IPs.
    ///
    /// Only use this for CLI usage where the user controls the machine.
    pub fn allow_private_urls(mut self) -> Self {
        self.ssrf_protection = false;
        self
    }
}

impl Fetcher for ReqwestFetcher {
    async fn fetch(&self, url: &str) -> Result<String, AppError> {
        if self.ssrf_protection {
            validate_url(url).await?;
        }

        let response = self.client.get(url).send().await.map_err(|e| {
            if e.is_timeout() {
                AppError::Timeout(self.timeout_secs)
            } else if e.is_connect() {
                AppError::NetworkError(format!("Connection failed: {e}"))
            } else {
                AppError::HttpError(e.to_string())
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            return Err(AppError::HttpError(format!(
                "HTTP {} for {}",
                status.as_u16(),
                url
            )));
        }

        response
            .text()
            .await
            .map_err(|e| AppError::HttpError(format!("Failed to read response body: {e}")))
    }
}

// ---------------------------------------------------------------------------
// SSRF protection
// ---------------------------------------------------------------------------

/// Validate a URL to prevent server-side request forgery (SSRF).
///
/// 1. Only allow `http` and `https` schemes.
/// 2. Resolve the hostname via DNS.
/// 3. Reject if any resolved IP is private/reserved.
async fn validate_url(url: &str) -> Result<(), AppError> {
    let parsed = Url::parse(url).map_err(|e| AppError::HttpError(format!("Invalid URL: {e}")))?;

    match parsed.scheme() {
        "http" | "https" => {}
        scheme => {
            return Err(AppError::HttpError(format!(
                "URL scheme '{scheme}' is not allowed (only http/https)"
            )));
        }
    }

    let host = parsed
        .host_str()
        .ok_or_else(|| AppError::HttpError("URL has no host".to_string()))?;

    // An IP literal can be checked without DNS.
    if let Ok(ip) = host.parse::<IpAddr>() {
        if is_private_ip(ip) {
            return Err(AppError::HttpError(format!(
                "SSRF blocked: {host} resolves to private/reserved IP"
            )));
        }
        return Ok(());
    }

    let port = parsed.port().unwrap_or(match parsed.scheme() {
        "https" => 443,
        _ => 80,
    });
    let addr = format!("{host}:{port}");
    let addrs: Vec<_> = tokio::net::lookup_host(&addr)
        .await
        .map_err(|e| AppError::NetworkError(format!("DNS resolution failed for {host}: {e}")))?
        .collect();

    if addrs.is_empty() {
        return Err(AppError::NetworkError(format!(
            "DNS resolution returned no addresses for {host}"
        )));
    }

    for socket_addr in &addrs {
        if is_private_ip(socket_addr.ip()) {
            return Err(AppError::HttpError(format!(
                "SSRF blocked: {host} resolves to private/reserved IP {}",
                socket_addr.ip()
            )));
        }
    }

    Ok(())
}

/// Check if an IP address is in a private/reserved/link-local range.
fn is_private_ip(ip: IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => {
            v4.is_loopback()           // 127.0.0.0/8
                || v4.is_private()     // 10/8, 172.16/12, 192.168/16
                || v4.is_link_local()  // 169.254.0.0/16 (cloud metadata!)
                || v4.is_unspecified() // 0.0.0.0
                || v4.is_broadcast()   // 255.255.255.255
                || v4.is_documentation() // 192.0.2.0/24, 198.51.100.0/24, 203.0.113.0/24
                || v4.octets()[0] == 100 && (v4.octets()[1] & 0xC0) == 64 // 100.64.0.0/10 (CGN)
        }
        IpAddr::V6(v6) => {
            v6.is_loopback()       // ::1
                || v6.is_unspecified() // ::
                // fe80::/10 (link-local)
                || (v6.segments()[0] & 0xFFC0) == 0xFE80
                // fc00::/7 (unique local)
                || (v6.segments()[0] & 0xFE00) == 0xFC00
                // IPv4-mapped IPv6 (::ffff:x.x.x.x) — check the embedded v4
                || match v6.to_ipv4_mapped() {
                    Some(v4) => is_private_ip(IpAddr::V4(v4)),
                    None => false,
                }
        }
    }
}

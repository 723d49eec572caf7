//! Network backends for Vigil: the static HTTP fetcher and, behind the
//! `browser` feature, the headless-Chromium renderer.

pub mod fetcher;

#[cfg(feature = "browser")]
pub mod browser;

pub use fetcher::ReqwestFetcher;

#[cfg(feature = "browser")]
pub use browser::BrowserRenderer;

//! Core domain logic for Vigil: selector detection, the fetch-and-extract
//! pipeline, dedup and locking primitives, and the monitor scheduler.
//!
//! This crate is transport- and storage-agnostic. HTTP and browser backends
//! live in `vigil-client`; the Postgres implementations of the storage traits
//! live in `vigil-db`.

pub mod dedup;
pub mod detector;
pub mod error;
pub mod extract;
pub mod lock;
pub mod models;
pub mod monitor;
pub mod testutil;
pub mod throttle;
pub mod traits;

pub use dedup::{DEFAULT_SEEN_TTL, MemorySeenCache};
pub use detector::{DetectedSelectors, SelectorDetector};
pub use error::AppError;
pub use extract::{ExtractionEngine, ExtractionOutcome, employer_from_url, extract_records};
pub use lock::MemoryLockStore;
pub use models::{
    JobRecord, MIN_INTERVAL_SECS, SelectorConfig, SelectorMode, Target, TargetStatus, fingerprint,
};
pub use monitor::{
    MonitorConfig, MonitorEvent, MonitorReporter, MonitorScheduler, MonitorService,
    NotificationBatch, TracingMonitorReporter, dispatch_notifications,
};
pub use throttle::{ThrottleConfig, ThrottledFetcher};
pub use traits::{
    Fetcher, LockStore, LogSink, NotificationSink, NullRenderer, Renderer, SeenCache, TargetStore,
};

use std::future::Future;
use std::time::Duration;

use uuid::Uuid;

use crate::error::AppError;
use crate::models::{JobRecord, SelectorConfig, Target, TargetStatus};

/// Fetches raw HTML content from a URL (static strategy).
pub trait Fetcher: Send + Sync + Clone {
    fn fetch(&self, url: &str) -> impl Future<Output = Result<String, AppError>> + Send;
}

/// Renders a page in a scripted browser and returns the settled markup
/// (rendered strategy).
///
/// `wait_selector` names an element to wait for before reading the DOM;
/// without one, implementations wait a fixed settle duration instead.
pub trait Renderer: Send + Sync + Clone {
    fn render(
        &self,
        url: &str,
        wait_selector: Option<&str>,
    ) -> impl Future<Output = Result<String, AppError>> + Send;
}

/// Renderer for deployments without a browser backend. Always errors, which
/// the extraction engine treats as a failed escalation attempt.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullRenderer;

impl Renderer for NullRenderer {
    async fn render(&self, url: &str, _wait_selector: Option<&str>) -> Result<String, AppError> {
        Err(AppError::BrowserError(format!(
            "no render backend configured (requested for {url})"
        )))
    }
}

/// Document-oriented persistence for targets and their job history.
///
/// Each operation is independently atomic; no cross-document transaction is
/// required by the monitor.
pub trait TargetStore: Send + Sync + Clone {
    fn create(&self, target: &Target) -> impl Future<Output = Result<(), AppError>> + Send;

    fn get(&self, id: Uuid) -> impl Future<Output = Result<Option<Target>, AppError>> + Send;

    fn list_active(&self) -> impl Future<Output = Result<Vec<Target>, AppError>> + Send;

    fn list_by_owner(
        &self,
        owner: &str,
    ) -> impl Future<Output = Result<Vec<Target>, AppError>> + Send;

    /// Persist a new selector configuration (detected selectors, pinned
    /// rendered strategy) for a target.
    fn update_selectors(
        &self,
        id: Uuid,
        selectors: &SelectorConfig,
    ) -> impl Future<Output = Result<(), AppError>> + Send;

    fn set_status(
        &self,
        id: Uuid,
        status: TargetStatus,
    ) -> impl Future<Output = Result<(), AppError>> + Send;

    /// Record the outcome of a cycle: always stamps `last_check`; on success
    /// also stamps `last_success` and resets `error_count`, on failure
    /// increments `error_count`. Returns the post-update error count.
    fn record_check(
        &self,
        id: Uuid,
        success: bool,
    ) -> impl Future<Output = Result<i32, AppError>> + Send;

    /// Atomically add `count` to the target's running total of found jobs.
    fn increment_jobs_found(
        &self,
        id: Uuid,
        count: i64,
    ) -> impl Future<Output = Result<(), AppError>> + Send;

    /// Append newly discovered records to the per-target job history.
    fn save_records(
        &self,
        records: &[JobRecord],
    ) -> impl Future<Output = Result<(), AppError>> + Send;

    /// Most recently discovered records for a target, newest first.
    fn recent_records(
        &self,
        target_id: Uuid,
        limit: usize,
    ) -> impl Future<Output = Result<Vec<JobRecord>, AppError>> + Send;

    fn delete(&self, id: Uuid) -> impl Future<Output = Result<(), AppError>> + Send;
}

/// Per-target expiring registry of already-reported fingerprints.
pub trait SeenCache: Send + Sync + Clone {
    fn contains(
        &self,
        target_id: Uuid,
        fp: &str,
    ) -> impl Future<Output = Result<bool, AppError>> + Send;

    /// Insert fingerprints and refresh the whole set's expiry. The expiry is
    /// shared by the set, not tracked per element.
    fn insert_bulk(
        &self,
        target_id: Uuid,
        fps: &[String],
    ) -> impl Future<Output = Result<(), AppError>> + Send;

    fn count(&self, target_id: Uuid) -> impl Future<Output = Result<usize, AppError>> + Send;

    fn clear(&self, target_id: Uuid) -> impl Future<Output = Result<(), AppError>> + Send;
}

/// Shared-storage mutual exclusion: at most one unexpired lock per target.
///
/// A failed acquire is the normal "someone else is scraping this" signal, not
/// an error; callers skip the cycle instead of blocking.
pub trait LockStore: Send + Sync + Clone {
    /// Returns true iff the lock was acquired. The lock expires on its own
    /// after `ttl`, guarding against holders that die without releasing.
    fn acquire(
        &self,
        target_id: Uuid,
        ttl: Duration,
    ) -> impl Future<Output = Result<bool, AppError>> + Send;

    fn release(&self, target_id: Uuid) -> impl Future<Output = Result<(), AppError>> + Send;

    fn is_locked(&self, target_id: Uuid) -> impl Future<Output = Result<bool, AppError>> + Send;
}

/// Delivery endpoint for batches of newly discovered postings.
///
/// Fire-and-forget from the monitor's perspective: retries and transport
/// details are the sink's concern.
pub trait NotificationSink: Send + Sync + Clone {
    fn deliver(
        &self,
        target: &Target,
        records: &[JobRecord],
    ) -> impl Future<Output = Result<(), AppError>> + Send;
}

/// Sink that writes batches through `tracing`: the default transport for
/// CLI usage, and a template for real transports living outside this crate.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogSink;

impl NotificationSink for LogSink {
    async fn deliver(&self, target: &Target, records: &[JobRecord]) -> Result<(), AppError> {
        for record in records {
            tracing::info!(
                owner = %target.owner,
                target = %target.url,
                title = %record.title,
                employer = %record.employer,
                url = %record.url,
                location = record.location.as_deref().unwrap_or("-"),
                "New job posting"
            );
        }
        Ok(())
    }
}

//! Shared test doubles for the core traits.
//!
//! All mocks are cheap `Arc` clones sharing their state, so a test can keep a
//! handle for assertions while the system under test owns another.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use chrono::Utc;
use uuid::Uuid;

use crate::error::AppError;
use crate::models::{JobRecord, SelectorConfig, Target, TargetStatus};
use crate::traits::{Fetcher, NotificationSink, Renderer, TargetStore};

// `AppError` holds non-Clone sources, so mocks replay errors by rebuilding
// the same variant from its message.
fn replay(err: &AppError) -> AppError {
    match err {
        AppError::HttpError(m) => AppError::HttpError(m.clone()),
        AppError::BrowserError(m) => AppError::BrowserError(m.clone()),
        AppError::SelectorError(m) => AppError::SelectorError(m.clone()),
        AppError::Timeout(secs) => AppError::Timeout(*secs),
        AppError::NetworkError(m) => AppError::NetworkError(m.clone()),
        AppError::DatabaseError(m) => AppError::DatabaseError(m.clone()),
        AppError::ConfigError(m) => AppError::ConfigError(m.clone()),
        other => AppError::Generic(other.to_string()),
    }
}

enum Fallback {
    Html(String),
    Error(AppError),
    Exhausted,
}

struct Script {
    queue: Mutex<VecDeque<Result<String, AppError>>>,
    fallback: Fallback,
    calls: AtomicUsize,
}

impl Script {
    fn next(&self) -> Result<String, AppError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(scripted) = self.queue.lock().unwrap().pop_front() {
            return scripted;
        }
        match &self.fallback {
            Fallback::Html(html) => Ok(html.clone()),
            Fallback::Error(err) => Err(replay(err)),
            Fallback::Exhausted => Err(AppError::Generic("mock response queue exhausted".into())),
        }
    }
}

/// [`Fetcher`] that serves canned responses and counts calls.
#[derive(Clone)]
pub struct MockFetcher {
    script: Arc<Script>,
}

impl MockFetcher {
    /// Serve the same HTML on every call.
    pub fn new(html: impl Into<String>) -> Self {
        Self::build(Vec::new(), Fallback::Html(html.into()))
    }

    /// Fail every call with the given error.
    pub fn with_error(err: AppError) -> Self {
        Self::build(Vec::new(), Fallback::Error(err))
    }

    /// Serve the given responses in order, then fail.
    pub fn with_responses(responses: Vec<Result<String, AppError>>) -> Self {
        Self::build(responses, Fallback::Exhausted)
    }

    fn build(responses: Vec<Result<String, AppError>>, fallback: Fallback) -> Self {
        Self {
            script: Arc::new(Script {
                queue: Mutex::new(responses.into()),
                fallback,
                calls: AtomicUsize::new(0),
            }),
        }
    }

    pub fn calls(&self) -> usize {
        self.script.calls.load(Ordering::SeqCst)
    }
}

impl Fetcher for MockFetcher {
    async fn fetch(&self, _url: &str) -> Result<String, AppError> {
        self.script.next()
    }
}

/// [`Renderer`] that serves canned markup and counts calls.
#[derive(Clone)]
pub struct MockRenderer {
    script: Arc<Script>,
}

impl MockRenderer {
    /// Serve the same rendered markup on every call.
    pub fn new(html: impl Into<String>) -> Self {
        Self {
            script: Arc::new(Script {
                queue: Mutex::new(VecDeque::new()),
                fallback: Fallback::Html(html.into()),
                calls: AtomicUsize::new(0),
            }),
        }
    }

    /// For tests where the rendered strategy must never trigger.
    pub fn unused() -> Self {
        Self::with_error(AppError::BrowserError("unexpected render call".into()))
    }

    /// Fail every call with the given error.
    pub fn with_error(err: AppError) -> Self {
        Self {
            script: Arc::new(Script {
                queue: Mutex::new(VecDeque::new()),
                fallback: Fallback::Error(err),
                calls: AtomicUsize::new(0),
            }),
        }
    }

    pub fn calls(&self) -> usize {
        self.script.calls.load(Ordering::SeqCst)
    }
}

impl Renderer for MockRenderer {
    async fn render(&self, _url: &str, _wait_selector: Option<&str>) -> Result<String, AppError> {
        self.script.next()
    }
}

#[derive(Default)]
struct StoreState {
    targets: HashMap<Uuid, Target>,
    records: Vec<JobRecord>,
}

/// In-memory [`TargetStore`] mirroring the persistence contract.
#[derive(Clone, Default)]
pub struct MockTargetStore {
    state: Arc<Mutex<StoreState>>,
}

impl MockTargetStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn with_target<T>(
        &self,
        id: Uuid,
        f: impl FnOnce(&mut Target) -> T,
    ) -> Result<T, AppError> {
        let mut state = self.state.lock().unwrap();
        state
            .targets
            .get_mut(&id)
            .map(f)
            .ok_or_else(|| AppError::DatabaseError(format!("target {id} not found")))
    }
}

impl TargetStore for MockTargetStore {
    async fn create(&self, target: &Target) -> Result<(), AppError> {
        self.state
            .lock()
            .unwrap()
            .targets
            .insert(target.id, target.clone());
        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<Option<Target>, AppError> {
        Ok(self.state.lock().unwrap().targets.get(&id).cloned())
    }

    async fn list_active(&self) -> Result<Vec<Target>, AppError> {
        let state = self.state.lock().unwrap();
        let mut active: Vec<Target> = state
            .targets
            .values()
            .filter(|t| t.status == TargetStatus::Active)
            .cloned()
            .collect();
        active.sort_by_key(|t| t.added_at);
        Ok(active)
    }

    async fn list_by_owner(&self, owner: &str) -> Result<Vec<Target>, AppError> {
        let state = self.state.lock().unwrap();
        let mut owned: Vec<Target> = state
            .targets
            .values()
            .filter(|t| t.owner == owner)
            .cloned()
            .collect();
        owned.sort_by_key(|t| t.added_at);
        Ok(owned)
    }

    async fn update_selectors(&self, id: Uuid, selectors: &SelectorConfig) -> Result<(), AppError> {
        self.with_target(id, |t| t.selectors = selectors.clone())
    }

    async fn set_status(&self, id: Uuid, status: TargetStatus) -> Result<(), AppError> {
        self.with_target(id, |t| t.status = status)
    }

    async fn record_check(&self, id: Uuid, success: bool) -> Result<i32, AppError> {
        self.with_target(id, |t| {
            let now = Utc::now();
            t.last_check = Some(now);
            if success {
                t.last_success = Some(now);
                t.error_count = 0;
            } else {
                t.error_count += 1;
            }
            t.error_count
        })
    }

    async fn increment_jobs_found(&self, id: Uuid, count: i64) -> Result<(), AppError> {
        self.with_target(id, |t| t.jobs_found_total += count)
    }

    async fn save_records(&self, records: &[JobRecord]) -> Result<(), AppError> {
        self.state
            .lock()
            .unwrap()
            .records
            .extend(records.iter().cloned());
        Ok(())
    }

    async fn recent_records(&self, target_id: Uuid, limit: usize) -> Result<Vec<JobRecord>, AppError> {
        let state = self.state.lock().unwrap();
        Ok(state
            .records
            .iter()
            .rev()
            .filter(|r| r.target_id == target_id)
            .take(limit)
            .cloned()
            .collect())
    }

    async fn delete(&self, id: Uuid) -> Result<(), AppError> {
        let mut state = self.state.lock().unwrap();
        state.targets.remove(&id);
        state.records.retain(|r| r.target_id != id);
        Ok(())
    }
}

/// [`NotificationSink`] that records every delivery.
#[derive(Clone, Default)]
pub struct MockSink {
    deliveries: Arc<Mutex<Vec<(Target, Vec<JobRecord>)>>>,
}

impl MockSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn deliveries(&self) -> Vec<(Target, Vec<JobRecord>)> {
        self.deliveries.lock().unwrap().clone()
    }

    /// Record count of each `deliver` call, in order.
    pub fn delivery_sizes(&self) -> Vec<usize> {
        self.deliveries
            .lock()
            .unwrap()
            .iter()
            .map(|(_, records)| records.len())
            .collect()
    }
}

impl NotificationSink for MockSink {
    async fn deliver(&self, target: &Target, records: &[JobRecord]) -> Result<(), AppError> {
        self.deliveries
            .lock()
            .unwrap()
            .push((target.clone(), records.to_vec()));
        Ok(())
    }
}

/// [`crate::monitor::MonitorReporter`] that records event labels.
#[derive(Clone, Default)]
pub struct MockReporter {
    labels: Arc<Mutex<Vec<String>>>,
}

impl MockReporter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn labels(&self) -> Vec<String> {
        self.labels.lock().unwrap().clone()
    }
}

impl crate::monitor::MonitorReporter for MockReporter {
    fn report(&self, event: crate::monitor::MonitorEvent<'_>) {
        use crate::monitor::MonitorEvent as E;
        let label = match event {
            E::SchedulerStarted { .. } => "SchedulerStarted",
            E::Reconciled { .. } => "Reconciled",
            E::TaskStarted { .. } => "TaskStarted",
            E::TaskStopped { .. } => "TaskStopped",
            E::StartDeferred { .. } => "StartDeferred",
            E::CycleSkipped { .. } => "CycleSkipped",
            E::CycleCompleted { .. } => "CycleCompleted",
            E::CycleFailed { .. } => "CycleFailed",
            E::TargetErrored { .. } => "TargetErrored",
            E::ShuttingDown { .. } => "ShuttingDown",
        };
        self.labels.lock().unwrap().push(label.to_string());
    }
}

//! Monitor scheduler: one long-lived task per active target, plus a periodic
//! reconciliation pass that aligns the running set with the targets marked
//! active in the store.
//!
//! Each task polls on its own cadence, takes the target's shared-storage lock
//! for the duration of a cycle, runs the extraction engine, filters the
//! seen-set, persists counters, and pushes new records onto a bounded channel
//! consumed by the notification dispatcher. Every failure is local to its
//! target and retried on the natural next cycle.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::error::AppError;
use crate::extract::ExtractionEngine;
use crate::models::{JobRecord, Target, TargetStatus};
use crate::traits::{Fetcher, LockStore, NotificationSink, Renderer, SeenCache, TargetStore};

/// Tuning knobs for the scheduler and its tasks.
#[derive(Debug, Clone)]
pub struct MonitorConfig {
    /// Hard cap on concurrently running monitor tasks. Starts beyond the cap
    /// are deferred to the next reconciliation pass, never queued.
    pub max_tasks: usize,
    /// How often the running set is reconciled against the store.
    pub reconcile_interval: Duration,
    /// Upper bound on a task's inter-cycle sleep; the effective tick is
    /// `min(poll_tick, interval / 10)` so tasks notice pauses and interval
    /// edits promptly.
    pub poll_tick: Duration,
    /// Consecutive failed cycles after which a target is moved to the
    /// `Error` status and its task stops.
    pub error_threshold: i32,
    /// How long shutdown waits for each task before abandoning it.
    pub shutdown_grace: Duration,
    /// Maximum records per `deliver` call on the notification sink.
    pub notify_batch_size: usize,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            max_tasks: 50,
            reconcile_interval: Duration::from_secs(60),
            poll_tick: Duration::from_secs(30),
            error_threshold: 5,
            shutdown_grace: Duration::from_secs(5),
            notify_batch_size: 10,
        }
    }
}

/// A batch of newly discovered records for one target, headed for the
/// notification dispatcher.
#[derive(Debug, Clone)]
pub struct NotificationBatch {
    pub target: Target,
    pub records: Vec<JobRecord>,
}

/// Events emitted by the scheduler and its tasks for monitoring/logging.
#[derive(Debug, Clone)]
pub enum MonitorEvent<'a> {
    SchedulerStarted { max_tasks: usize },
    Reconciled { running: usize, desired: usize },
    TaskStarted { target_id: Uuid, url: &'a str },
    TaskStopped { target_id: Uuid },
    StartDeferred { target_id: Uuid },
    CycleSkipped { target_id: Uuid },
    CycleCompleted { target_id: Uuid, new_records: usize },
    CycleFailed { target_id: Uuid, error: &'a str },
    TargetErrored { target_id: Uuid, failures: i32 },
    ShuttingDown { tasks: usize },
}

/// Trait for receiving monitor events (decoupled logging).
pub trait MonitorReporter: Send + Sync {
    fn report(&self, event: MonitorEvent<'_>) {
        let _ = event;
    }
}

/// Reporter that uses the `tracing` crate.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingMonitorReporter;

impl MonitorReporter for TracingMonitorReporter {
    fn report(&self, event: MonitorEvent<'_>) {
        match event {
            MonitorEvent::SchedulerStarted { max_tasks } => {
                tracing::info!(%max_tasks, "Monitor scheduler started");
            }
            MonitorEvent::Reconciled { running, desired } => {
                tracing::debug!(%running, %desired, "Reconciliation complete");
            }
            MonitorEvent::TaskStarted { target_id, url } => {
                tracing::info!(%target_id, %url, "Monitor task started");
            }
            MonitorEvent::TaskStopped { target_id } => {
                tracing::info!(%target_id, "Monitor task stopped");
            }
            MonitorEvent::StartDeferred { target_id } => {
                tracing::warn!(%target_id, "Task cap reached, start deferred");
            }
            MonitorEvent::CycleSkipped { target_id } => {
                tracing::debug!(%target_id, "Target locked elsewhere, skipping cycle");
            }
            MonitorEvent::CycleCompleted {
                target_id,
                new_records,
            } => {
                tracing::info!(%target_id, %new_records, "Cycle completed");
            }
            MonitorEvent::CycleFailed { target_id, error } => {
                tracing::warn!(%target_id, %error, "Cycle failed");
            }
            MonitorEvent::TargetErrored {
                target_id,
                failures,
            } => {
                tracing::error!(%target_id, %failures, "Target moved to error status");
            }
            MonitorEvent::ShuttingDown { tasks } => {
                tracing::info!(%tasks, "Monitor scheduler shutting down");
            }
        }
    }
}

/// Outcome of one attempted cycle for a target.
#[derive(Debug)]
pub enum CycleOutcome {
    /// Lock contention: another runner holds the target. Nothing changed.
    Skipped,
    Completed {
        new_records: usize,
    },
    Failed {
        error: AppError,
        /// True when the failure crossed the error threshold and the target
        /// was moved to [`TargetStatus::Error`].
        target_errored: bool,
    },
}

/// Shared machinery for running cycles: the extraction engine plus the three
/// shared resources (target store, lock store, seen cache).
#[derive(Clone)]
pub struct MonitorService<TS, LS, SC, F, R>
where
    TS: TargetStore,
    LS: LockStore,
    SC: SeenCache,
    F: Fetcher,
    R: Renderer,
{
    store: TS,
    locks: LS,
    seen: SC,
    engine: ExtractionEngine<F, R>,
    notify_tx: mpsc::Sender<NotificationBatch>,
    config: MonitorConfig,
}

impl<TS, LS, SC, F, R> MonitorService<TS, LS, SC, F, R>
where
    TS: TargetStore + 'static,
    LS: LockStore + 'static,
    SC: SeenCache + 'static,
    F: Fetcher + 'static,
    R: Renderer + 'static,
{
    pub fn new(
        store: TS,
        locks: LS,
        seen: SC,
        engine: ExtractionEngine<F, R>,
        notify_tx: mpsc::Sender<NotificationBatch>,
        config: MonitorConfig,
    ) -> Self {
        Self {
            store,
            locks,
            seen,
            engine,
            notify_tx,
            config,
        }
    }

    pub fn config(&self) -> &MonitorConfig {
        &self.config
    }

    /// Attempt one scrape cycle for a target.
    ///
    /// Takes the target's lock for the cycle (TTL = the poll interval, so a
    /// crashed holder cannot wedge the target). On contention the cycle is
    /// skipped without touching any counters. The lock is released on every
    /// exit path.
    pub async fn run_cycle<MR: MonitorReporter>(
        &self,
        target: &Target,
        reporter: &MR,
    ) -> CycleOutcome {
        let lock_ttl = Duration::from_secs(target.interval_secs);
        match self.locks.acquire(target.id, lock_ttl).await {
            Ok(true) => {}
            Ok(false) => {
                reporter.report(MonitorEvent::CycleSkipped {
                    target_id: target.id,
                });
                return CycleOutcome::Skipped;
            }
            Err(e) => {
                // Without the lock's guarantee we must not scrape.
                tracing::warn!(target_id = %target.id, error = %e, "Lock acquire failed");
                return CycleOutcome::Skipped;
            }
        }

        let result = self.scrape_and_notify(target).await;

        if let Err(e) = self.locks.release(target.id).await {
            tracing::warn!(target_id = %target.id, error = %e, "Lock release failed");
        }

        match result {
            Ok(new_records) => {
                if let Err(e) = self.store.record_check(target.id, true).await {
                    tracing::warn!(target_id = %target.id, error = %e, "Failed to record check");
                }
                reporter.report(MonitorEvent::CycleCompleted {
                    target_id: target.id,
                    new_records,
                });
                CycleOutcome::Completed { new_records }
            }
            Err(error) => {
                let error_msg = error.to_string();
                reporter.report(MonitorEvent::CycleFailed {
                    target_id: target.id,
                    error: &error_msg,
                });

                let failures = match self.store.record_check(target.id, false).await {
                    Ok(count) => count,
                    Err(e) => {
                        tracing::warn!(target_id = %target.id, error = %e, "Failed to record check");
                        return CycleOutcome::Failed {
                            error,
                            target_errored: false,
                        };
                    }
                };

                let target_errored = failures >= self.config.error_threshold;
                if target_errored {
                    if let Err(e) = self.store.set_status(target.id, TargetStatus::Error).await {
                        tracing::warn!(target_id = %target.id, error = %e, "Failed to set error status");
                    }
                    reporter.report(MonitorEvent::TargetErrored {
                        target_id: target.id,
                        failures,
                    });
                }
                CycleOutcome::Failed {
                    error,
                    target_errored,
                }
            }
        }
    }

    /// The locked part of a cycle: extract, dedup, persist, enqueue a batch.
    async fn scrape_and_notify(&self, target: &Target) -> Result<usize, AppError> {
        let outcome = self.engine.run(target).await?;

        if let Some(update) = &outcome.config_update {
            self.store.update_selectors(target.id, update).await?;
        }

        let mut new_records = Vec::new();
        for record in outcome.records {
            if !self.seen.contains(target.id, &record.fingerprint).await? {
                new_records.push(record);
            }
        }

        if new_records.is_empty() {
            return Ok(0);
        }

        let fps: Vec<String> = new_records.iter().map(|r| r.fingerprint.clone()).collect();
        self.seen.insert_bulk(target.id, &fps).await?;
        self.store.save_records(&new_records).await?;
        self.store
            .increment_jobs_found(target.id, new_records.len() as i64)
            .await?;

        let count = new_records.len();
        let batch = NotificationBatch {
            target: target.clone(),
            records: new_records,
        };
        // Delivery is fire-and-forget; a closed dispatcher only loses the
        // notification, never the cycle.
        if let Err(e) = self.notify_tx.send(batch).await {
            tracing::warn!(target_id = %target.id, error = %e, "Notification channel closed");
        }

        Ok(count)
    }

    /// Effective inter-cycle sleep for a target.
    fn tick_for(&self, target: &Target) -> Duration {
        self.config
            .poll_tick
            .min(Duration::from_secs((target.interval_secs / 10).max(1)))
    }
}

/// Long-lived loop for one target. Exits when cancelled, when the target
/// leaves the active status, or when its failures cross the error threshold.
async fn run_task<TS, LS, SC, F, R, MR>(
    service: MonitorService<TS, LS, SC, F, R>,
    mut target: Target,
    cancel: CancellationToken,
    reporter: MR,
) where
    TS: TargetStore + 'static,
    LS: LockStore + 'static,
    SC: SeenCache + 'static,
    F: Fetcher + 'static,
    R: Renderer + 'static,
    MR: MonitorReporter,
{
    let target_id = target.id;

    loop {
        if cancel.is_cancelled() {
            break;
        }

        // The live record is authoritative: status is the sole gate, and
        // interval/selector edits take effect next cycle.
        match service.store.get(target_id).await {
            Ok(Some(current)) if current.status == TargetStatus::Active => target = current,
            Ok(_) => {
                tracing::info!(%target_id, "Target no longer active");
                break;
            }
            Err(e) => {
                tracing::warn!(%target_id, error = %e, "Failed to refresh target");
                tokio::select! {
                    () = tokio::time::sleep(service.config.poll_tick) => continue,
                    () = cancel.cancelled() => break,
                }
            }
        }

        if target.is_due(Utc::now()) {
            let outcome = service.run_cycle(&target, &reporter).await;
            if matches!(
                outcome,
                CycleOutcome::Failed {
                    target_errored: true,
                    ..
                }
            ) {
                break;
            }
        }

        tokio::select! {
            () = tokio::time::sleep(service.tick_for(&target)) => {}
            () = cancel.cancelled() => break,
        }
    }

    reporter.report(MonitorEvent::TaskStopped { target_id });
}

struct RunningTask {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

/// Owns the map of running monitor tasks and reconciles it against the
/// desired active set.
pub struct MonitorScheduler<TS, LS, SC, F, R, MR>
where
    TS: TargetStore + 'static,
    LS: LockStore + 'static,
    SC: SeenCache + 'static,
    F: Fetcher + 'static,
    R: Renderer + 'static,
    MR: MonitorReporter + Clone + 'static,
{
    service: MonitorService<TS, LS, SC, F, R>,
    reporter: MR,
    tasks: Arc<Mutex<HashMap<Uuid, RunningTask>>>,
}

impl<TS, LS, SC, F, R, MR> MonitorScheduler<TS, LS, SC, F, R, MR>
where
    TS: TargetStore + 'static,
    LS: LockStore + 'static,
    SC: SeenCache + 'static,
    F: Fetcher + 'static,
    R: Renderer + 'static,
    MR: MonitorReporter + Clone + 'static,
{
    pub fn new(service: MonitorService<TS, LS, SC, F, R>, reporter: MR) -> Self {
        Self {
            service,
            reporter,
            tasks: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Run reconciliation until cancellation, then shut down all tasks.
    pub async fn run(&self, cancel: CancellationToken) {
        self.reporter.report(MonitorEvent::SchedulerStarted {
            max_tasks: self.service.config.max_tasks,
        });

        loop {
            if let Err(e) = self.reconcile_once().await {
                // A store hiccup only delays reconciliation, never kills it.
                tracing::error!(error = %e, "Reconciliation failed");
            }

            tokio::select! {
                () = tokio::time::sleep(self.service.config.reconcile_interval) => {}
                () = cancel.cancelled() => break,
            }
        }

        self.shutdown().await;
    }

    /// One reconciliation pass: stop tasks whose target left the active set,
    /// start tasks for newly active targets up to the concurrency cap.
    /// Deferred starts are retried on the next pass.
    pub async fn reconcile_once(&self) -> Result<(), AppError> {
        let active = self.service.store.list_active().await?;
        let desired: HashMap<Uuid, &Target> = active.iter().map(|t| (t.id, t)).collect();

        let mut tasks = self.tasks.lock().await;

        // Drop entries for tasks that exited on their own (paused, errored).
        tasks.retain(|_, task| !task.handle.is_finished());

        // Stop tasks for targets no longer desired.
        let to_stop: Vec<Uuid> = tasks
            .keys()
            .filter(|id| !desired.contains_key(id))
            .copied()
            .collect();
        for id in to_stop {
            if let Some(task) = tasks.remove(&id) {
                task.cancel.cancel();
            }
        }

        // Start tasks for newly desired targets, subject to the cap.
        for target in &active {
            if tasks.contains_key(&target.id) {
                continue;
            }
            if tasks.len() >= self.service.config.max_tasks {
                self.reporter.report(MonitorEvent::StartDeferred {
                    target_id: target.id,
                });
                continue;
            }

            let cancel = CancellationToken::new();
            let handle = tokio::spawn(run_task(
                self.service.clone(),
                target.clone(),
                cancel.clone(),
                self.reporter.clone(),
            ));
            self.reporter.report(MonitorEvent::TaskStarted {
                target_id: target.id,
                url: &target.url,
            });
            tasks.insert(target.id, RunningTask { cancel, handle });
        }

        self.reporter.report(MonitorEvent::Reconciled {
            running: tasks.len(),
            desired: desired.len(),
        });
        Ok(())
    }

    /// Signal all tasks to stop, then join each with a bounded timeout.
    /// A task that doesn't observe the signal in time is abandoned, not
    /// killed: cancellation is cooperative, never preemptive mid-fetch.
    pub async fn shutdown(&self) {
        let mut tasks = self.tasks.lock().await;
        self.reporter.report(MonitorEvent::ShuttingDown {
            tasks: tasks.len(),
        });

        for task in tasks.values() {
            task.cancel.cancel();
        }
        for (id, task) in tasks.drain() {
            if tokio::time::timeout(self.service.config.shutdown_grace, task.handle)
                .await
                .is_err()
            {
                tracing::warn!(target_id = %id, "Task did not stop in time, abandoning");
            }
        }
    }

    /// Ids of currently running tasks (reconciliation bookkeeping view).
    pub async fn running_ids(&self) -> Vec<Uuid> {
        self.tasks.lock().await.keys().copied().collect()
    }
}

/// Consume completed batches and hand them to the sink in chunks of at most
/// `batch_size` records, respecting downstream message-size limits. Sink
/// failures are logged and never retried here.
pub async fn dispatch_notifications<N: NotificationSink>(
    mut rx: mpsc::Receiver<NotificationBatch>,
    sink: N,
    batch_size: usize,
) {
    let batch_size = batch_size.max(1);
    while let Some(batch) = rx.recv().await {
        for chunk in batch.records.chunks(batch_size) {
            if let Err(e) = sink.deliver(&batch.target, chunk).await {
                tracing::warn!(
                    target_id = %batch.target.id,
                    owner = %batch.target.owner,
                    error = %e,
                    "Notification delivery failed"
                );
            }
        }
    }
    tracing::debug!("Notification dispatcher stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dedup::MemorySeenCache;
    use crate::lock::MemoryLockStore;
    use crate::testutil::{
        MockFetcher, MockRenderer, MockReporter, MockSink, MockTargetStore,
    };

    const THREE_CARDS: &str = r#"
        <div class="job-item"><h3>Backend Engineer</h3><a href="/jobs/1">Apply</a></div>
        <div class="job-item"><h3>Frontend Engineer</h3><a href="/jobs/2">Apply</a></div>
        <div class="job-item"><h3>Data Engineer</h3><a href="/jobs/3">Apply</a></div>
    "#;

    const FOUR_CARDS: &str = r#"
        <div class="job-item"><h3>Backend Engineer</h3><a href="/jobs/1">Apply</a></div>
        <div class="job-item"><h3>Frontend Engineer</h3><a href="/jobs/2">Apply</a></div>
        <div class="job-item"><h3>Data Engineer</h3><a href="/jobs/3">Apply</a></div>
        <div class="job-item"><h3>Platform Engineer</h3><a href="/jobs/4">Apply</a></div>
    "#;

    type TestService =
        MonitorService<MockTargetStore, MemoryLockStore, MemorySeenCache, MockFetcher, MockRenderer>;

    fn service_with(
        store: MockTargetStore,
        fetcher: MockFetcher,
        config: MonitorConfig,
    ) -> (TestService, mpsc::Receiver<NotificationBatch>) {
        let (tx, rx) = mpsc::channel(16);
        let service = MonitorService::new(
            store,
            MemoryLockStore::new(),
            MemorySeenCache::new(),
            ExtractionEngine::new(fetcher, MockRenderer::unused()),
            tx,
            config,
        );
        (service, rx)
    }

    #[tokio::test]
    async fn end_to_end_dedup_across_two_cycles() {
        let store = MockTargetStore::new();
        let target = Target::new("https://acme.dev/careers", "user-1", 300);
        store.create(&target).await.unwrap();

        let fetcher = MockFetcher::with_responses(vec![
            Ok(THREE_CARDS.to_string()),
            Ok(FOUR_CARDS.to_string()),
        ]);
        let (service, mut rx) = service_with(store.clone(), fetcher, MonitorConfig::default());
        let reporter = MockReporter::new();

        let outcome = service.run_cycle(&target, &reporter).await;
        assert!(matches!(outcome, CycleOutcome::Completed { new_records: 3 }));

        // Second cycle sees the refreshed target (adopted selectors).
        let refreshed = store.get(target.id).await.unwrap().unwrap();
        assert_eq!(refreshed.selectors.container.as_deref(), Some(".job-item"));

        let outcome = service.run_cycle(&refreshed, &reporter).await;
        assert!(matches!(outcome, CycleOutcome::Completed { new_records: 1 }));

        let first = rx.recv().await.unwrap();
        assert_eq!(first.records.len(), 3);
        let second = rx.recv().await.unwrap();
        assert_eq!(second.records.len(), 1);
        assert_eq!(second.records[0].title, "Platform Engineer");

        // Counters persisted through the store.
        let final_state = store.get(target.id).await.unwrap().unwrap();
        assert_eq!(final_state.jobs_found_total, 4);
        assert_eq!(final_state.error_count, 0);
        assert!(final_state.last_success.is_some());
    }

    #[tokio::test]
    async fn lock_contention_skips_cycle_without_extraction() {
        let store = MockTargetStore::new();
        let target = Target::new("https://acme.dev/careers", "user-1", 300);
        store.create(&target).await.unwrap();

        let fetcher = MockFetcher::new(THREE_CARDS);
        let (service, _rx) = service_with(store.clone(), fetcher.clone(), MonitorConfig::default());

        // Someone else holds the lock.
        assert!(
            service
                .locks
                .acquire(target.id, Duration::from_secs(60))
                .await
                .unwrap()
        );

        let outcome = service.run_cycle(&target, &MockReporter::new()).await;
        assert!(matches!(outcome, CycleOutcome::Skipped));
        assert_eq!(fetcher.calls(), 0, "no extraction under contention");

        // Counters untouched.
        let state = store.get(target.id).await.unwrap().unwrap();
        assert!(state.last_check.is_none());
    }

    #[tokio::test]
    async fn concurrent_cycles_one_wins() {
        let store = MockTargetStore::new();
        let target = Target::new("https://acme.dev/careers", "user-1", 300);
        store.create(&target).await.unwrap();

        let fetcher = MockFetcher::with_responses(vec![
            Ok(THREE_CARDS.to_string()),
            Ok(THREE_CARDS.to_string()),
        ]);
        let (service, _rx) = service_with(store, fetcher, MonitorConfig::default());

        let reporter_a = MockReporter::new();
        let reporter_b = MockReporter::new();
        let (a, b) = tokio::join!(
            service.run_cycle(&target, &reporter_a),
            service.run_cycle(&target, &reporter_b),
        );

        let completed = [&a, &b]
            .iter()
            .filter(|o| matches!(o, CycleOutcome::Completed { .. }))
            .count();
        let skipped = [&a, &b]
            .iter()
            .filter(|o| matches!(o, CycleOutcome::Skipped))
            .count();
        assert_eq!((completed, skipped), (1, 1));
    }

    #[tokio::test]
    async fn failed_cycle_increments_error_count_and_continues() {
        let store = MockTargetStore::new();
        let target = Target::new("https://acme.dev/careers", "user-1", 300);
        store.create(&target).await.unwrap();

        let fetcher = MockFetcher::with_error(AppError::NetworkError("refused".into()));
        let (mut service, _rx) = service_with(store.clone(), fetcher, MonitorConfig::default());
        service.engine = ExtractionEngine::new(
            MockFetcher::with_error(AppError::NetworkError("refused".into())),
            MockRenderer::with_error(AppError::BrowserError("no binary".into())),
        );

        let outcome = service.run_cycle(&target, &MockReporter::new()).await;
        assert!(matches!(
            outcome,
            CycleOutcome::Failed {
                target_errored: false,
                ..
            }
        ));

        let state = store.get(target.id).await.unwrap().unwrap();
        assert_eq!(state.error_count, 1);
        assert!(state.last_check.is_some());
        assert!(state.last_success.is_none());
        assert_eq!(state.status, TargetStatus::Active);

        // Lock was released despite the failure.
        assert!(!service.locks.is_locked(target.id).await.unwrap());
    }

    #[tokio::test]
    async fn error_threshold_moves_target_to_error_status() {
        let store = MockTargetStore::new();
        let target = Target::new("https://acme.dev/careers", "user-1", 300);
        store.create(&target).await.unwrap();

        let config = MonitorConfig {
            error_threshold: 2,
            ..MonitorConfig::default()
        };
        let (mut service, _rx) = service_with(store.clone(), MockFetcher::new(""), config);
        service.engine = ExtractionEngine::new(
            MockFetcher::with_responses(vec![
                Err(AppError::Timeout(30)),
                Err(AppError::Timeout(30)),
            ]),
            MockRenderer::with_error(AppError::BrowserError("no binary".into())),
        );

        let reporter = MockReporter::new();
        let first = service.run_cycle(&target, &reporter).await;
        assert!(matches!(
            first,
            CycleOutcome::Failed {
                target_errored: false,
                ..
            }
        ));

        let second = service.run_cycle(&target, &reporter).await;
        assert!(matches!(
            second,
            CycleOutcome::Failed {
                target_errored: true,
                ..
            }
        ));

        let state = store.get(target.id).await.unwrap().unwrap();
        assert_eq!(state.status, TargetStatus::Error);
        assert!(reporter.labels().contains(&"TargetErrored".to_string()));
    }

    #[tokio::test]
    async fn reconcile_caps_running_tasks_at_max() {
        let store = MockTargetStore::new();
        let mut ids = Vec::new();
        for i in 0..5 {
            let mut target = Target::new(format!("https://acme{i}.dev/careers"), "user-1", 600);
            // Not due: tasks idle until cancelled.
            target.last_check = Some(Utc::now());
            ids.push(target.id);
            store.create(&target).await.unwrap();
        }

        let config = MonitorConfig {
            max_tasks: 3,
            ..MonitorConfig::default()
        };
        let (service, _rx) = service_with(store, MockFetcher::new(""), config);
        let reporter = MockReporter::new();
        let scheduler = MonitorScheduler::new(service, reporter.clone());

        scheduler.reconcile_once().await.unwrap();

        let running = scheduler.running_ids().await;
        assert_eq!(running.len(), 3);
        assert!(running.iter().all(|id| ids.contains(id)), "running ⊆ desired");
        assert_eq!(
            reporter
                .labels()
                .iter()
                .filter(|l| *l == "StartDeferred")
                .count(),
            2
        );

        scheduler.shutdown().await;
        assert!(scheduler.running_ids().await.is_empty());
    }

    #[tokio::test]
    async fn reconcile_stops_tasks_for_deactivated_targets() {
        let store = MockTargetStore::new();
        let mut keep = Target::new("https://acme.dev/careers", "user-1", 600);
        keep.last_check = Some(Utc::now());
        let mut drop_me = Target::new("https://globex.example/jobs", "user-1", 600);
        drop_me.last_check = Some(Utc::now());
        store.create(&keep).await.unwrap();
        store.create(&drop_me).await.unwrap();

        let (service, _rx) = service_with(store.clone(), MockFetcher::new(""), MonitorConfig::default());
        let scheduler = MonitorScheduler::new(service, MockReporter::new());

        scheduler.reconcile_once().await.unwrap();
        assert_eq!(scheduler.running_ids().await.len(), 2);

        store
            .set_status(drop_me.id, TargetStatus::Paused)
            .await
            .unwrap();
        scheduler.reconcile_once().await.unwrap();

        let running = scheduler.running_ids().await;
        assert_eq!(running, vec![keep.id]);

        scheduler.shutdown().await;
    }

    #[tokio::test]
    async fn dispatcher_chunks_batches() {
        let (tx, rx) = mpsc::channel(4);
        let sink = MockSink::new();
        let dispatcher = tokio::spawn(dispatch_notifications(rx, sink.clone(), 10));

        let target = Target::new("https://acme.dev/careers", "user-1", 300);
        let records: Vec<JobRecord> = (0..25)
            .map(|i| {
                JobRecord::new(
                    target.id,
                    format!("Role {i}"),
                    "Acme",
                    format!("https://acme.dev/jobs/{i}"),
                    None,
                )
            })
            .collect();

        tx.send(NotificationBatch {
            target,
            records,
        })
        .await
        .unwrap();
        drop(tx);
        dispatcher.await.unwrap();

        assert_eq!(sink.delivery_sizes(), vec![10, 10, 5]);
    }

    #[tokio::test]
    async fn tick_is_bounded_by_interval_fraction() {
        let store = MockTargetStore::new();
        let (service, _rx) = service_with(store, MockFetcher::new(""), MonitorConfig::default());

        let slow = Target::new("https://acme.dev/a", "u", 600);
        assert_eq!(service.tick_for(&slow), Duration::from_secs(30));

        let fast = Target::new("https://acme.dev/b", "u", 60);
        assert_eq!(service.tick_for(&fast), Duration::from_secs(6));
    }
}

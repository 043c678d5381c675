//! Comparison scheduler.
//!
//! Runs the consistency engine over every configured table, on a timer and
//! on demand. At most `max_concurrent_tables` runs execute at once and a
//! table never has more than one run queued or executing.

mod context;

pub use context::AppContext;

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use serde::Serialize;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

use crate::core::outcome::TableComparisonRun;
use crate::core::schema::TableSpec;
use crate::error::{DiffError, Result};
use crate::metrics::MetricsSnapshot;

/// Result of a `run_all` trigger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TriggerReport {
    /// Runs spawned by this trigger.
    pub enqueued: usize,
    /// Tables skipped because a previous run had not finished.
    pub skipped: usize,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

struct Inner {
    ctx: Arc<AppContext>,
    semaphore: Arc<Semaphore>,
    in_flight: Mutex<HashSet<String>>,
    active: AtomicUsize,
    latest: Mutex<HashMap<String, TableComparisonRun>>,
    cancel: CancellationToken,
    tracker: TaskTracker,
}

/// Marks a table as in flight until dropped.
struct InFlight {
    inner: Arc<Inner>,
    table: String,
}

impl Drop for InFlight {
    fn drop(&mut self) {
        lock(&self.inner.in_flight).remove(&self.table);
    }
}

/// A held concurrency slot, counted in the worker gauge.
struct WorkerSlot {
    inner: Arc<Inner>,
    _permit: OwnedSemaphorePermit,
}

impl WorkerSlot {
    fn new(inner: Arc<Inner>, permit: OwnedSemaphorePermit) -> Self {
        let active = inner.active.fetch_add(1, Ordering::SeqCst) + 1;
        inner.ctx.metrics.set_worker_pool_usage(active);
        Self {
            inner,
            _permit: permit,
        }
    }
}

impl Drop for WorkerSlot {
    fn drop(&mut self) {
        let active = self.inner.active.fetch_sub(1, Ordering::SeqCst) - 1;
        self.inner.ctx.metrics.set_worker_pool_usage(active);
    }
}

impl Inner {
    fn claim(self: &Arc<Self>, table: &str) -> Option<InFlight> {
        if lock(&self.in_flight).insert(table.to_string()) {
            Some(InFlight {
                inner: self.clone(),
                table: table.to_string(),
            })
        } else {
            None
        }
    }

    /// Wait for a slot and run one table. `None` if cancelled while queued
    /// or while running.
    async fn execute(self: Arc<Self>, table: TableSpec, claim: InFlight) -> Option<TableComparisonRun> {
        let _claim = claim;

        let permit = tokio::select! {
            _ = self.cancel.cancelled() => {
                debug!("Queued run for {} abandoned on shutdown", table.name);
                return None;
            }
            permit = self.semaphore.clone().acquire_owned() => permit.ok()?,
        };
        let slot = WorkerSlot::new(self.clone(), permit);

        let run = self.ctx.engine.compare_table(&table, &self.cancel).await;
        drop(slot);

        if run.outcome.is_none() {
            return None;
        }
        lock(&self.latest).insert(table.name.clone(), run.clone());
        Some(run)
    }
}

/// Runs table comparisons with bounded concurrency.
#[derive(Clone)]
pub struct Scheduler {
    inner: Arc<Inner>,
}

impl Scheduler {
    pub fn new(ctx: Arc<AppContext>) -> Self {
        let permits = ctx.config.comparison.get_max_concurrent_tables();
        info!("Scheduler allows {} concurrent table runs", permits);
        Self {
            inner: Arc::new(Inner {
                ctx,
                semaphore: Arc::new(Semaphore::new(permits)),
                in_flight: Mutex::new(HashSet::new()),
                active: AtomicUsize::new(0),
                latest: Mutex::new(HashMap::new()),
                cancel: CancellationToken::new(),
                tracker: TaskTracker::new(),
            }),
        }
    }

    pub fn context(&self) -> &AppContext {
        &self.inner.ctx
    }

    /// Token cancelled on shutdown.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.inner.cancel.clone()
    }

    /// Spawn one run per configured table and return immediately.
    pub fn run_all(&self) -> TriggerReport {
        let mut report = TriggerReport {
            enqueued: 0,
            skipped: 0,
        };

        for table in &self.inner.ctx.config.tables {
            let Some(claim) = self.inner.claim(&table.name) else {
                debug!("Skipping {}: previous run still in flight", table.name);
                report.skipped += 1;
                continue;
            };
            let inner = self.inner.clone();
            let table = table.clone();
            self.inner.tracker.spawn(async move {
                inner.execute(table, claim).await;
            });
            report.enqueued += 1;
        }

        info!(
            "Comparison triggered: {} enqueued, {} skipped",
            report.enqueued, report.skipped
        );
        report
    }

    /// Run a single table and wait for its result.
    pub async fn run_one(&self, table: &TableSpec) -> Result<TableComparisonRun> {
        let claim = self
            .inner
            .claim(&table.name)
            .ok_or_else(|| DiffError::RunInProgress(table.name.clone()))?;
        self.inner
            .clone()
            .execute(table.clone(), claim)
            .await
            .ok_or(DiffError::Cancelled)
    }

    /// Start the background ticker. The first pass runs immediately.
    pub fn start(&self, interval: Duration) {
        let scheduler = self.clone();
        info!("Auto refresh every {}s", interval.as_secs());

        self.inner.tracker.spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = scheduler.inner.cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        scheduler.inner.ctx.engine.refresh_pool_usage();
                        scheduler
                            .inner
                            .ctx
                            .metrics
                            .set_worker_pool_usage(scheduler.inner.active.load(Ordering::SeqCst));
                        scheduler.run_all();
                    }
                }
            }
            debug!("Scheduler ticker stopped");
        });
    }

    /// Wait until every spawned run has finished.
    ///
    /// Never returns while the ticker is running.
    pub async fn wait_idle(&self) {
        self.inner.tracker.close();
        self.inner.tracker.wait().await;
        self.inner.tracker.reopen();
    }

    /// Cancel the ticker and all runs, then wait up to `timeout` for them
    /// to stop. Returns false if runs were still active at the deadline.
    pub async fn shutdown(&self, timeout: Duration) -> bool {
        self.inner.cancel.cancel();
        self.inner.tracker.close();

        match tokio::time::timeout(timeout, self.inner.tracker.wait()).await {
            Ok(()) => {
                info!("Scheduler stopped");
                true
            }
            Err(_) => {
                warn!(
                    "{} comparison runs still active after {}s",
                    self.inner.active.load(Ordering::SeqCst),
                    timeout.as_secs()
                );
                false
            }
        }
    }

    /// Latest completed run per table, ordered by table name.
    pub fn latest_runs(&self) -> Vec<TableComparisonRun> {
        let mut runs: Vec<TableComparisonRun> = lock(&self.inner.latest).values().cloned().collect();
        runs.sort_by(|a, b| a.table.cmp(&b.table));
        runs
    }

    pub fn active_runs(&self) -> usize {
        self.inner.active.load(Ordering::SeqCst)
    }

    pub fn metrics_snapshot(&self) -> MetricsSnapshot {
        self.inner.ctx.registry.snapshot()
    }
}

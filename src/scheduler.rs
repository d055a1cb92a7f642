//! A small interval job scheduler owned by the caller.
//!
//! Jobs are keyed by id; registering a job under an existing id replaces it
//! instead of adding a second one. Each job runs in its own tokio task, and a
//! job never overlaps itself: a tick that fires while the previous run is
//! still going is skipped.

use crate::error::SchedulerError;
use crate::utils::fmt_duration;
use async_trait::async_trait;
use chrono::{DateTime, Local};
use dashmap::DashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

const MIN_PERIOD: Duration = Duration::from_millis(1);
/// Periods are clamped here so the first deadline always fits in an `Instant`.
const MAX_PERIOD: Duration = Duration::from_secs(10 * 365 * 24 * 60 * 60);

/// Work run on every tick.
#[async_trait]
pub trait Job: Send + Sync + 'static {
    async fn run(&self);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trigger {
    /// Fire every `Duration`, first one interval after registration.
    Interval(Duration),
}

impl Trigger {
    pub fn period(&self) -> Duration {
        match self {
            Trigger::Interval(period) => *period,
        }
    }

    /// Wall-clock time of the first fire for a job registered at `from`.
    pub fn first_fire(&self, from: DateTime<Local>) -> DateTime<Local> {
        let period = chrono::Duration::from_std(self.period()).unwrap_or(chrono::Duration::MAX);
        from.checked_add_signed(period).unwrap_or(from)
    }
}

/// A job registration.
#[derive(Clone)]
pub struct JobSpec {
    pub id: String,
    pub trigger: Trigger,
    pub job: Arc<dyn Job>,
}

impl std::fmt::Debug for JobSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobSpec")
            .field("id", &self.id)
            .field("trigger", &self.trigger)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    Inserted,
    Replaced,
}

struct Worker {
    handle: JoinHandle<()>,
    cancel: CancellationToken,
}

struct Registered {
    spec: JobSpec,
    worker: Option<Worker>,
}

struct Inner {
    jobs: DashMap<String, Registered>,
    running: AtomicBool,
    paused: watch::Sender<bool>,
}

/// Interval scheduler. Clones share the same jobs and state.
#[derive(Clone)]
pub struct Scheduler {
    inner: Arc<Inner>,
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl Scheduler {
    pub fn new() -> Self {
        let (paused, _) = watch::channel(false);
        Self {
            inner: Arc::new(Inner {
                jobs: DashMap::new(),
                running: AtomicBool::new(false),
                paused,
            }),
        }
    }

    pub fn is_running(&self) -> bool {
        self.inner.running.load(Ordering::Acquire)
    }

    pub fn is_paused(&self) -> bool {
        *self.inner.paused.borrow()
    }

    /// Ids of all registered jobs, sorted.
    pub fn job_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.inner.jobs.iter().map(|e| e.key().clone()).collect();
        ids.sort();
        ids
    }

    pub fn contains(&self, id: &str) -> bool {
        self.inner.jobs.contains_key(id)
    }

    /// Whether `id` has a live worker waiting for its next tick.
    pub fn is_active(&self, id: &str) -> bool {
        self.inner
            .jobs
            .get(id)
            .is_some_and(|r| r.worker.as_ref().is_some_and(|w| !w.handle.is_finished()))
    }

    /// Register `spec`, replacing any job with the same id.
    ///
    /// On a running scheduler the job starts ticking immediately and the
    /// replaced job's worker is cancelled. Must be called within a tokio
    /// runtime when the scheduler is running.
    pub fn upsert_job(&self, spec: JobSpec) -> UpsertOutcome {
        let id = spec.id.clone();
        let worker = self.is_running().then(|| self.spawn_worker(&spec));
        let previous = self.inner.jobs.insert(id.clone(), Registered { spec, worker });

        match previous {
            Some(old) => {
                if let Some(worker) = old.worker {
                    worker.cancel.cancel();
                }
                debug!(job = %id, "Replaced scheduled job");
                UpsertOutcome::Replaced
            }
            None => {
                debug!(job = %id, "Added scheduled job");
                UpsertOutcome::Inserted
            }
        }
    }

    /// Remove a job, cancelling its worker. Returns whether it existed.
    pub fn remove_job(&self, id: &str) -> bool {
        match self.inner.jobs.remove(id) {
            Some((_, registered)) => {
                if let Some(worker) = registered.worker {
                    worker.cancel.cancel();
                }
                true
            }
            None => false,
        }
    }

    /// Start ticking every registered job. Must be called within a tokio runtime.
    pub fn start(&self) -> Result<(), SchedulerError> {
        if self.inner.running.swap(true, Ordering::AcqRel) {
            return Err(SchedulerError::AlreadyRunning);
        }

        for mut entry in self.inner.jobs.iter_mut() {
            if entry.worker.is_none() {
                let worker = self.spawn_worker(&entry.spec);
                entry.worker = Some(worker);
            }
        }

        info!(jobs = self.inner.jobs.len(), "Scheduler started");
        Ok(())
    }

    /// Skip ticks until [`Scheduler::resume`] is called.
    pub fn pause(&self) {
        self.inner.paused.send_replace(true);
        trace!("Scheduler paused");
    }

    pub fn resume(&self) {
        self.inner.paused.send_replace(false);
        trace!("Scheduler resumed");
    }

    /// Stop every worker, waiting up to `timeout` for each to finish.
    ///
    /// Jobs stay registered; a later [`Scheduler::start`] picks them up again.
    pub async fn shutdown(&self, timeout: Duration) {
        self.inner.running.store(false, Ordering::Release);

        let workers: Vec<(String, Worker)> = self
            .inner
            .jobs
            .iter_mut()
            .filter_map(|mut entry| {
                let id = entry.key().clone();
                entry.worker.take().map(|worker| (id, worker))
            })
            .collect();

        for (id, worker) in workers {
            worker.cancel.cancel();
            match time::timeout(timeout, worker.handle).await {
                Err(_) => {
                    warn!(job = %id, timeout = fmt_duration(timeout), "Job did not stop in time, abandoning")
                }
                Ok(Err(e)) if e.is_panic() => error!(job = %id, "Job worker panicked"),
                Ok(_) => trace!(job = %id, "Job stopped"),
            }
        }

        info!("Scheduler stopped");
    }

    fn spawn_worker(&self, spec: &JobSpec) -> Worker {
        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let job = spec.job.clone();
        let id = spec.id.clone();
        // `interval_at` panics on a zero period.
        let requested = spec.trigger.period();
        let period = requested.clamp(MIN_PERIOD, MAX_PERIOD);
        if requested > MAX_PERIOD {
            warn!(job = %id, period = fmt_duration(requested), max = fmt_duration(MAX_PERIOD), "Job period too large, clamping");
        }
        let paused = self.inner.paused.subscribe();

        let handle = tokio::spawn(async move {
            let now = time::Instant::now();
            let start = now.checked_add(period).unwrap_or(now);
            let mut ticker = time::interval_at(start, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {}
                }

                if *paused.borrow() {
                    trace!(job = %id, "Scheduler paused, skipping tick");
                    continue;
                }

                trace!(job = %id, "Running scheduled job");
                tokio::select! {
                    _ = token.cancelled() => {
                        debug!(job = %id, "Job cancelled mid-run");
                        break;
                    }
                    _ = job.run() => {}
                }
            }
        });

        Worker { handle, cancel }
    }
}

//! Keeps every configured bind awake with a periodic poke.

use crate::config::Config;
use crate::db::DatabaseHandle;
use crate::error::{DiscoveryError, Error};
use crate::poker::{PokeOutcome, poke};
use crate::registry::{self, TableDescriptor};
use crate::scheduler::{Job, JobSpec, Scheduler, Trigger, UpsertOutcome};
use crate::utils::fmt_duration;
use async_trait::async_trait;
use chrono::Local;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Id of the single keep-alive job.
pub const JOB_ID: &str = "keep_db_connection";

/// One poke attempt within a tick.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PokeRecord {
    pub bind: String,
    pub table: String,
    pub outcome: PokeOutcome,
}

/// What a single [`Pacemaker::awake`] did.
#[derive(Debug, Clone, Default)]
pub struct AwakeReport {
    pub pokes: Vec<PokeRecord>,
}

impl AwakeReport {
    pub fn alive(&self) -> usize {
        self.pokes.iter().filter(|p| p.outcome.is_alive()).count()
    }

    pub fn failed(&self) -> usize {
        self.pokes.len() - self.alive()
    }

    pub fn is_empty(&self) -> bool {
        self.pokes.is_empty()
    }
}

/// The keep-alive job: configuration plus the database handle it pokes through.
#[derive(Clone)]
pub struct Pacemaker {
    config: Arc<Config>,
    db: Arc<dyn DatabaseHandle>,
}

impl Pacemaker {
    pub fn new(config: Arc<Config>, db: Arc<dyn DatabaseHandle>) -> Self {
        Self { config, db }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Poke one random table on every bind that has tables.
    ///
    /// Never fails: discovery problems and per-bind errors are logged, and
    /// one bad bind does not stop the others.
    pub async fn awake(&self) -> AwakeReport {
        let picked = match registry::random_tables(&self.config) {
            Ok(picked) => picked,
            Err(e) => {
                warn!(error = %e, "Cannot find any tables, check database connections or config");
                return AwakeReport::default();
            }
        };

        let mut report = AwakeReport::default();
        for (bind, table) in picked {
            let outcome = poke(self.db.as_ref(), &bind, &table, self.config.display).await;
            report.pokes.push(PokeRecord {
                bind,
                table: table.name,
                outcome,
            });
        }

        debug!(
            binds = report.pokes.len(),
            alive = report.alive(),
            failed = report.failed(),
            "Awake cycle complete"
        );
        report
    }

    /// Fail-fast checks run before a job is registered.
    ///
    /// Returns every table that is currently a poke candidate.
    pub fn validate(&self) -> Result<Vec<TableDescriptor>, Error> {
        self.config.validate()?;
        let modules = registry::discover(&self.config)?;
        let grouped = registry::tables_by_bind(self.config.bind_names(), &modules);
        if grouped.is_empty() {
            return Err(DiscoveryError::NoTables.into());
        }
        Ok(grouped.into_values().flatten().collect())
    }

    /// Register the keep-alive job on `scheduler`.
    ///
    /// Does nothing when the pacemaker is switched off. A scheduler that is
    /// not running yet is started; a running one is paused while the job is
    /// upserted, so calling this twice leaves exactly one job.
    pub fn run(&self, scheduler: &Scheduler) -> Result<(), Error> {
        if !self.config.enabled {
            info!("DBPacemaker is not activated");
            return Ok(());
        }

        info!("DBPacemaker is activated");
        info!(
            "Display mode: {}",
            if self.config.display { "on" } else { "off" }
        );

        let candidates = self.validate()?;
        let trigger = Trigger::Interval(self.config.poke_interval);
        info!(
            interval = fmt_duration(self.config.poke_interval),
            tables = candidates.len(),
            "Start at {}",
            trigger.first_fire(Local::now()).format("%Y-%m-%d %H:%M:%S")
        );

        let spec = JobSpec {
            id: JOB_ID.to_string(),
            trigger,
            job: Arc::new(self.clone()),
        };

        if scheduler.is_running() {
            scheduler.pause();
            let outcome = scheduler.upsert_job(spec);
            scheduler.resume();
            if outcome == UpsertOutcome::Replaced {
                debug!(job = JOB_ID, "Updated existing keep-alive job");
            }
        } else {
            scheduler.upsert_job(spec);
            scheduler.start()?;
        }

        Ok(())
    }
}

#[async_trait]
impl Job for Pacemaker {
    async fn run(&self) {
        self.awake().await;
    }
}

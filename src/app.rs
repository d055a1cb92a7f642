use crate::config::Config;
use crate::db::BindPools;
use crate::pacemaker::{JOB_ID, Pacemaker};
use crate::scheduler::Scheduler;
use anyhow::Context;
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{error, info, warn};

/// Main application struct: database pools, the pacemaker, and the scheduler hosting it.
pub struct App {
    config: Arc<Config>,
    pools: BindPools,
    pacemaker: Pacemaker,
    scheduler: Scheduler,
}

impl App {
    /// Create a new App with one lazily connected pool per bind.
    pub fn new(config: Config) -> Result<Self, anyhow::Error> {
        let config = Arc::new(config);
        let pools = BindPools::connect_lazy(&config).context("Failed to create database pools")?;
        let pacemaker = Pacemaker::new(config.clone(), Arc::new(pools.clone()));

        Ok(App {
            config,
            pools,
            pacemaker,
            scheduler: Scheduler::new(),
        })
    }

    /// Register the keep-alive job and block until a shutdown signal arrives.
    pub async fn run(self) -> ExitCode {
        if let Err(e) = self.pacemaker.run(&self.scheduler) {
            error!(error = %e, "Failed to start pacemaker");
            self.pools.close().await;
            return ExitCode::FAILURE;
        }

        if !self.scheduler.contains(JOB_ID) {
            info!("Nothing scheduled, exiting");
            self.pools.close().await;
            return ExitCode::SUCCESS;
        }

        shutdown_signal().await;
        info!("Shutdown signal received");

        self.scheduler.shutdown(self.config.shutdown_timeout).await;
        self.pools.close().await;
        ExitCode::SUCCESS
    }

    /// Poke every bind once. Fails if setup is invalid or any poke did not succeed.
    pub async fn awake_once(self) -> ExitCode {
        if let Err(e) = self.pacemaker.validate() {
            error!(error = %e, "Pacemaker configuration is invalid");
            self.pools.close().await;
            return ExitCode::FAILURE;
        }

        let report = self.pacemaker.awake().await;
        self.pools.close().await;

        if report.failed() > 0 {
            warn!(
                alive = report.alive(),
                failed = report.failed(),
                "Some binds could not be poked"
            );
            return ExitCode::FAILURE;
        }

        info!(alive = report.alive(), "All binds poked");
        ExitCode::SUCCESS
    }
}

/// Resolves on Ctrl+C, or SIGTERM on unix.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = ?e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!(error = ?e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}

//! Keeps idle database connections alive by periodically running a trivial
//! query against a random registered table on every configured bind.

pub mod app;
pub mod cli;
pub mod config;
pub mod db;
pub mod error;
pub mod logging;
pub mod pacemaker;
pub mod poker;
pub mod registry;
pub mod scheduler;
pub mod utils;

pub use error::{ConfigError, DiscoveryError, Error, PokeError, SchedulerError};
pub use pacemaker::{AwakeReport, JOB_ID, Pacemaker};
pub use scheduler::Scheduler;

//! Error types for setup, discovery, poking and scheduling.

/// Problems with the loaded configuration, detected before anything is scheduled.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to load configuration")]
    Load(#[from] Box<figment::Error>),
    #[error("No model sources configured: set MODELS_PATH_LIST or PACEMAKER_TABLES")]
    MissingModels,
    #[error("POKE_DB_INTERVAL must be greater than zero")]
    ZeroInterval,
    #[error("POKE_DB_INTERVAL must not exceed {} seconds", .max.as_secs())]
    IntervalTooLarge { max: std::time::Duration },
}

/// Failure to turn the configured model sources into pokeable tables.
#[derive(Debug, thiserror::Error)]
pub enum DiscoveryError {
    #[error("None of the {attempted} configured model sources could be loaded")]
    Unresolvable { attempted: usize },
    #[error("No tables found for any configured bind")]
    NoTables,
}

/// Failure of a single poke. Never escapes a scheduled tick.
#[derive(Debug, thiserror::Error)]
pub enum PokeError {
    #[error("Bind `{0}` has no database pool")]
    UnknownBind(String),
    #[error("Failed to open a session on bind `{bind}`")]
    Connect {
        bind: String,
        #[source]
        source: sqlx::Error,
    },
    #[error("Table `{table}` does not exist")]
    MissingTable {
        table: String,
        #[source]
        source: sqlx::Error,
    },
    #[error("Query failed: {0}")]
    Query(#[source] sqlx::Error),
    #[error("Rollback failed: {0}")]
    Rollback(#[source] sqlx::Error),
}

#[derive(Debug, thiserror::Error)]
pub enum SchedulerError {
    #[error("Scheduler is already running")]
    AlreadyRunning,
}

/// Setup-time errors returned by [`crate::pacemaker::Pacemaker::run`].
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Discovery(#[from] DiscoveryError),
    #[error(transparent)]
    Scheduler(#[from] SchedulerError),
}

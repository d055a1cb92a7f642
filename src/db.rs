//! Database handle and per-bind sessions.
//!
//! The pacemaker never touches a pool directly: every poke goes through
//! [`DatabaseHandle::session`], which hands out a [`Session`] wrapping one
//! transaction on one pooled connection.

use crate::config::Config;
use crate::error::PokeError;
use async_trait::async_trait;
use sqlx::any::AnyPoolOptions;
use sqlx::{Any, AnyPool, Transaction};
use std::collections::BTreeMap;
use tracing::{debug, info};

/// Access to sessions on named binds.
#[async_trait]
pub trait DatabaseHandle: Send + Sync {
    /// Open a session on `bind`.
    async fn session(&self, bind: &str) -> Result<Box<dyn Session>, PokeError>;
}

/// A unit of work on one bind.
#[async_trait]
pub trait Session: Send {
    /// Fetch the first row of `table`, discarding it.
    async fn first_row(&mut self, table: &str) -> Result<(), PokeError>;

    async fn rollback(&mut self) -> Result<(), PokeError>;

    /// Release the session. Must not fail; called exactly once.
    async fn close(&mut self);
}

/// One lazily connected pool per configured bind.
#[derive(Clone)]
pub struct BindPools {
    pools: BTreeMap<String, AnyPool>,
}

impl BindPools {
    /// Create pools for every bind in `config`.
    ///
    /// Pools connect on first use, so an unreachable database does not stop
    /// startup; its pokes are logged as failures instead.
    pub fn connect_lazy(config: &Config) -> Result<Self, sqlx::Error> {
        sqlx::any::install_default_drivers();

        let mut pools = BTreeMap::new();
        for (bind, url) in &config.db_binds {
            let pool = AnyPoolOptions::new()
                .min_connections(0)
                .max_connections(config.db_max_connections)
                .acquire_timeout(config.db_acquire_timeout)
                // Pooled connections are what we keep alive; never reap them for idleness.
                .idle_timeout(None)
                .connect_lazy(url)?;
            pools.insert(bind.clone(), pool);
        }

        info!(
            binds = ?pools.keys().collect::<Vec<_>>(),
            max_connections = config.db_max_connections,
            acquire_timeout = crate::utils::fmt_duration(config.db_acquire_timeout),
            "database pools configured"
        );

        Ok(Self { pools })
    }

    pub fn from_pools(pools: BTreeMap<String, AnyPool>) -> Self {
        Self { pools }
    }

    pub fn get(&self, bind: &str) -> Option<&AnyPool> {
        self.pools.get(bind)
    }

    /// Close every pool, waiting for checked-out connections to return.
    pub async fn close(&self) {
        for (bind, pool) in &self.pools {
            pool.close().await;
            debug!(bind = %bind, "database pool closed");
        }
    }
}

#[async_trait]
impl DatabaseHandle for BindPools {
    async fn session(&self, bind: &str) -> Result<Box<dyn Session>, PokeError> {
        let pool = self
            .pools
            .get(bind)
            .ok_or_else(|| PokeError::UnknownBind(bind.to_string()))?;
        let tx = pool.begin().await.map_err(|source| PokeError::Connect {
            bind: bind.to_string(),
            source,
        })?;
        Ok(Box::new(PoolSession { tx: Some(tx) }))
    }
}

/// A transaction on a pooled connection. Dropping it returns the connection.
struct PoolSession {
    tx: Option<Transaction<'static, Any>>,
}

#[async_trait]
impl Session for PoolSession {
    async fn first_row(&mut self, table: &str) -> Result<(), PokeError> {
        let Some(tx) = self.tx.as_mut() else {
            return Err(PokeError::Query(sqlx::Error::PoolClosed));
        };
        let sql = format!("SELECT 1 FROM {table} LIMIT 1");
        sqlx::query(&sql)
            .fetch_optional(&mut **tx)
            .await
            .map_err(|source| classify(table, source))?;
        Ok(())
    }

    async fn rollback(&mut self) -> Result<(), PokeError> {
        match self.tx.take() {
            Some(tx) => tx.rollback().await.map_err(PokeError::Rollback),
            None => Ok(()),
        }
    }

    async fn close(&mut self) {
        // Read-only work; ending the transaction either way is equivalent.
        if let Some(tx) = self.tx.take()
            && let Err(e) = tx.rollback().await
        {
            debug!(error = ?e, "error while closing session");
        }
    }
}

/// Map a query error to [`PokeError::MissingTable`] when the relation does not exist.
pub fn classify(table: &str, source: sqlx::Error) -> PokeError {
    if is_missing_relation(&source) {
        PokeError::MissingTable {
            table: table.to_string(),
            source,
        }
    } else {
        PokeError::Query(source)
    }
}

/// Whether `error` reports a missing table on Postgres, MySQL or SQLite.
pub fn is_missing_relation(error: &sqlx::Error) -> bool {
    let sqlx::Error::Database(db_error) = error else {
        return false;
    };
    if let Some(code) = db_error.code()
        && matches!(code.as_ref(), "42P01" | "42S02" | "1146")
    {
        return true;
    }
    db_error.message().starts_with("no such table")
}

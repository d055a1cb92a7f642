//! The poke itself: one trivial query on one bind.

use crate::db::DatabaseHandle;
use crate::error::PokeError;
use crate::registry::TableDescriptor;
use crate::utils::{log_if_slow, single_line};
use std::time::{Duration, Instant};
use tracing::{error, warn};

/// Target used for successful poke lines; the pretty formatter tags these `POKE`.
pub const POKE_TARGET: &str = "db_pacemaker::poke";

const SLOW_POKE_THRESHOLD: Duration = Duration::from_secs(1);

/// Result of poking one bind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PokeOutcome {
    /// The query ran; the connection is alive.
    Alive,
    /// The picked table does not exist on the bind.
    MissingTable,
    /// The query failed for another reason.
    Failed,
    /// No session could be opened.
    Unreachable,
}

impl PokeOutcome {
    pub fn is_alive(self) -> bool {
        self == PokeOutcome::Alive
    }
}

/// Poke `table` on `bind`.
///
/// Query errors are logged and rolled back, and the session is closed on
/// every path. Nothing here returns an error to the caller.
pub async fn poke(
    db: &dyn DatabaseHandle,
    bind: &str,
    table: &TableDescriptor,
    display: bool,
) -> PokeOutcome {
    let start = Instant::now();

    let mut session = match db.session(bind).await {
        Ok(session) => session,
        Err(e) => {
            warn!(bind = %bind, table = %table.name, error = %error_chain(&e), "Failed to open session");
            return PokeOutcome::Unreachable;
        }
    };

    let outcome = match session.first_row(&table.name).await {
        Ok(()) => PokeOutcome::Alive,
        Err(e) => {
            let outcome = match &e {
                PokeError::MissingTable { .. } => {
                    warn!(bind = %bind, table = %table.name, "Table does not exist, rolling back");
                    PokeOutcome::MissingTable
                }
                _ => {
                    warn!(bind = %bind, table = %table.name, error = %error_chain(&e), "Poke failed, rolling back");
                    PokeOutcome::Failed
                }
            };
            if let Err(e) = session.rollback().await {
                error!(bind = %bind, error = %error_chain(&e), "Rollback failed");
            }
            outcome
        }
    };

    session.close().await;
    log_if_slow(start, SLOW_POKE_THRESHOLD, "poke");

    if display && outcome.is_alive() {
        tracing::info!(
            target: POKE_TARGET,
            "{} | {}",
            bind.to_uppercase(),
            table.name
        );
    }

    outcome
}

/// Render an error and its sources on a single line.
fn error_chain(error: &dyn std::error::Error) -> String {
    let mut message = error.to_string();
    let mut source = error.source();
    while let Some(cause) = source {
        let text = cause.to_string();
        if !message.contains(&text) {
            message.push_str(": ");
            message.push_str(&text);
        }
        source = cause.source();
    }
    single_line(&message)
}

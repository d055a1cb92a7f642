//! Shared test fixtures: an in-memory `DatabaseHandle` that records what happens to sessions.

#![allow(dead_code)]

use async_trait::async_trait;
use db_pacemaker::config::Config;
use db_pacemaker::db::{DatabaseHandle, Session};
use db_pacemaker::error::PokeError;
use db_pacemaker::logging::formatter::PacemakerFormatter;
use db_pacemaker::registry::TableDescriptor;
use std::collections::{BTreeMap, HashMap};
use std::io;
use std::sync::{Arc, Mutex};

/// How a bind responds to pokes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Behavior {
    Healthy,
    MissingTable,
    Broken,
    /// The query fails and so does the rollback after it.
    RollbackFails,
    Unreachable,
}

/// Something a session did, in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    Opened { bind: String },
    Queried { bind: String, table: String },
    RolledBack { bind: String },
    Closed { bind: String },
}

#[derive(Clone, Default)]
pub struct FakeDatabase {
    behaviors: HashMap<String, Behavior>,
    events: Arc<Mutex<Vec<SessionEvent>>>,
}

impl FakeDatabase {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_bind(mut self, bind: &str, behavior: Behavior) -> Self {
        self.behaviors.insert(bind.to_string(), behavior);
        self
    }

    pub fn events(&self) -> Vec<SessionEvent> {
        self.events.lock().unwrap().clone()
    }

    pub fn count(&self, matches: impl Fn(&SessionEvent) -> bool) -> usize {
        self.events().iter().filter(|e| matches(e)).count()
    }
}

#[async_trait]
impl DatabaseHandle for FakeDatabase {
    async fn session(&self, bind: &str) -> Result<Box<dyn Session>, PokeError> {
        let behavior = *self
            .behaviors
            .get(bind)
            .ok_or_else(|| PokeError::UnknownBind(bind.to_string()))?;
        if behavior == Behavior::Unreachable {
            return Err(PokeError::Connect {
                bind: bind.to_string(),
                source: sqlx::Error::PoolTimedOut,
            });
        }
        self.events.lock().unwrap().push(SessionEvent::Opened {
            bind: bind.to_string(),
        });
        Ok(Box::new(FakeSession {
            bind: bind.to_string(),
            behavior,
            events: self.events.clone(),
        }))
    }
}

struct FakeSession {
    bind: String,
    behavior: Behavior,
    events: Arc<Mutex<Vec<SessionEvent>>>,
}

#[async_trait]
impl Session for FakeSession {
    async fn first_row(&mut self, table: &str) -> Result<(), PokeError> {
        self.events.lock().unwrap().push(SessionEvent::Queried {
            bind: self.bind.clone(),
            table: table.to_string(),
        });
        match self.behavior {
            Behavior::MissingTable => Err(PokeError::MissingTable {
                table: table.to_string(),
                source: sqlx::Error::Protocol(format!("relation \"{table}\" does not exist")),
            }),
            Behavior::Broken | Behavior::RollbackFails => Err(PokeError::Query(sqlx::Error::Protocol(
                "server closed the connection unexpectedly\n\tThis probably means the server terminated abnormally".to_string(),
            ))),
            _ => Ok(()),
        }
    }

    async fn rollback(&mut self) -> Result<(), PokeError> {
        self.events.lock().unwrap().push(SessionEvent::RolledBack {
            bind: self.bind.clone(),
        });
        if self.behavior == Behavior::RollbackFails {
            return Err(PokeError::Rollback(sqlx::Error::Protocol(
                "connection reset by peer".to_string(),
            )));
        }
        Ok(())
    }

    async fn close(&mut self) {
        self.events.lock().unwrap().push(SessionEvent::Closed {
            bind: self.bind.clone(),
        });
    }
}

#[derive(Clone, Default)]
pub struct Captured(Arc<Mutex<Vec<u8>>>);

impl Captured {
    pub fn output(&self) -> String {
        String::from_utf8(self.0.lock().unwrap().clone()).unwrap()
    }
}

impl io::Write for Captured {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Route events on this thread to the pretty formatter, writing into the returned buffer.
pub fn capture_logs() -> (Captured, tracing::subscriber::DefaultGuard) {
    let captured = Captured::default();
    let writer = captured.clone();
    let subscriber = tracing_subscriber::fmt()
        .with_ansi(false)
        .with_max_level(tracing::Level::TRACE)
        .with_writer(move || writer.clone())
        .event_format(PacemakerFormatter)
        .finish();
    let guard = tracing::subscriber::set_default(subscriber);
    (captured, guard)
}

/// Config with the given binds and an inline registry of `(bind, table)` pairs.
pub fn config_with(binds: &[&str], tables: &[(&str, &str)]) -> Config {
    Config {
        db_binds: binds
            .iter()
            .map(|b| (b.to_string(), "sqlite::memory:".to_string()))
            .collect::<BTreeMap<_, _>>(),
        tables: tables
            .iter()
            .map(|(bind, name)| TableDescriptor::new(*bind, *name))
            .collect(),
        ..Config::default()
    }
}

//! Awake cycles and job registration against a fake database.

mod helpers;

use db_pacemaker::error::{ConfigError, DiscoveryError, Error};
use db_pacemaker::pacemaker::{JOB_ID, Pacemaker};
use db_pacemaker::poker::PokeOutcome;
use db_pacemaker::scheduler::Scheduler;
use helpers::{Behavior, FakeDatabase, SessionEvent, config_with};
use std::sync::Arc;

fn pacemaker(db: &FakeDatabase, config: db_pacemaker::config::Config) -> Pacemaker {
    Pacemaker::new(Arc::new(config), Arc::new(db.clone()))
}

#[tokio::test]
async fn test_one_poke_per_bind() {
    let db = FakeDatabase::new()
        .with_bind("crawler", Behavior::Healthy)
        .with_bind("reports", Behavior::Healthy)
        .with_bind("archive", Behavior::Healthy);
    let config = config_with(
        &["crawler", "reports", "archive"],
        &[
            ("crawler", "articles"),
            ("crawler", "pages"),
            ("reports", "daily"),
            ("archive", "old_articles"),
        ],
    );

    let report = pacemaker(&db, config).awake().await;

    assert_eq!(report.pokes.len(), 3);
    assert_eq!(report.alive(), 3);
    assert_eq!(db.count(|e| matches!(e, SessionEvent::Queried { .. })), 3);
    assert_eq!(db.count(|e| matches!(e, SessionEvent::Closed { .. })), 3);
    assert_eq!(db.count(|e| matches!(e, SessionEvent::RolledBack { .. })), 0);
}

#[tokio::test]
async fn test_bind_without_tables_is_skipped() {
    let db = FakeDatabase::new()
        .with_bind("crawler", Behavior::Healthy)
        .with_bind("empty", Behavior::Healthy);
    let config = config_with(&["crawler", "empty"], &[("crawler", "articles")]);

    let report = pacemaker(&db, config).awake().await;

    assert_eq!(report.pokes.len(), 1);
    assert_eq!(report.pokes[0].bind, "crawler");
    assert_eq!(
        db.count(|e| matches!(e, SessionEvent::Opened { bind } if bind == "empty")),
        0
    );
}

#[tokio::test]
async fn test_missing_table_rolls_back_and_closes_without_stopping_other_binds() {
    let db = FakeDatabase::new()
        .with_bind("crawler", Behavior::MissingTable)
        .with_bind("reports", Behavior::Healthy);
    let config = config_with(
        &["crawler", "reports"],
        &[("crawler", "gone"), ("reports", "daily")],
    );

    let report = pacemaker(&db, config).awake().await;

    let crawler = report.pokes.iter().find(|p| p.bind == "crawler").unwrap();
    let reports = report.pokes.iter().find(|p| p.bind == "reports").unwrap();
    assert_eq!(crawler.outcome, PokeOutcome::MissingTable);
    assert_eq!(reports.outcome, PokeOutcome::Alive);

    let crawler_events: Vec<SessionEvent> = db
        .events()
        .into_iter()
        .filter(|e| match e {
            SessionEvent::Opened { bind }
            | SessionEvent::Queried { bind, .. }
            | SessionEvent::RolledBack { bind }
            | SessionEvent::Closed { bind } => bind == "crawler",
        })
        .collect();
    assert_eq!(
        crawler_events,
        vec![
            SessionEvent::Opened {
                bind: "crawler".into()
            },
            SessionEvent::Queried {
                bind: "crawler".into(),
                table: "gone".into()
            },
            SessionEvent::RolledBack {
                bind: "crawler".into()
            },
            SessionEvent::Closed {
                bind: "crawler".into()
            },
        ]
    );
}

#[tokio::test]
async fn test_generic_query_error_rolls_back_and_closes() {
    let db = FakeDatabase::new().with_bind("crawler", Behavior::Broken);
    let config = config_with(&["crawler"], &[("crawler", "articles")]);

    let report = pacemaker(&db, config).awake().await;

    assert_eq!(report.pokes[0].outcome, PokeOutcome::Failed);
    assert_eq!(report.failed(), 1);
    assert_eq!(db.count(|e| matches!(e, SessionEvent::RolledBack { .. })), 1);
    assert_eq!(db.count(|e| matches!(e, SessionEvent::Closed { .. })), 1);
}

#[tokio::test]
async fn test_unreachable_bind_is_reported_without_a_session() {
    let db = FakeDatabase::new()
        .with_bind("crawler", Behavior::Unreachable)
        .with_bind("reports", Behavior::Healthy);
    let config = config_with(
        &["crawler", "reports"],
        &[("crawler", "articles"), ("reports", "daily")],
    );

    let report = pacemaker(&db, config).awake().await;

    assert_eq!(report.pokes.len(), 2);
    assert_eq!(report.alive(), 1);
    assert!(
        report
            .pokes
            .iter()
            .any(|p| p.bind == "crawler" && p.outcome == PokeOutcome::Unreachable)
    );
    assert_eq!(db.count(|e| matches!(e, SessionEvent::Closed { .. })), 1);
}

#[tokio::test]
async fn test_awake_with_no_matching_tables_returns_empty_report() {
    let db = FakeDatabase::new().with_bind("crawler", Behavior::Healthy);
    let config = config_with(&["crawler"], &[("elsewhere", "articles")]);

    let report = pacemaker(&db, config).awake().await;

    assert!(report.is_empty());
    assert!(db.events().is_empty());
}

#[tokio::test]
async fn test_run_without_models_fails_and_registers_nothing() {
    let db = FakeDatabase::new().with_bind("crawler", Behavior::Healthy);
    let config = config_with(&["crawler"], &[]);
    let scheduler = Scheduler::new();

    let result = pacemaker(&db, config).run(&scheduler);

    assert!(matches!(
        result,
        Err(Error::Config(ConfigError::MissingModels))
    ));
    assert!(scheduler.job_ids().is_empty());
    assert!(!scheduler.is_running());
}

#[tokio::test]
async fn test_run_without_matching_tables_fails_and_registers_nothing() {
    let db = FakeDatabase::new().with_bind("crawler", Behavior::Healthy);
    let config = config_with(&["crawler"], &[("elsewhere", "articles")]);
    let scheduler = Scheduler::new();

    let result = pacemaker(&db, config).run(&scheduler);

    assert!(matches!(
        result,
        Err(Error::Discovery(DiscoveryError::NoTables))
    ));
    assert!(scheduler.job_ids().is_empty());
}

#[tokio::test]
async fn test_run_with_oversized_interval_fails_and_registers_nothing() {
    let db = FakeDatabase::new().with_bind("crawler", Behavior::Healthy);
    let mut config = config_with(&["crawler"], &[("crawler", "articles")]);
    config.poke_interval = std::time::Duration::from_secs(u64::MAX);
    let scheduler = Scheduler::new();

    let result = pacemaker(&db, config).run(&scheduler);

    assert!(matches!(
        result,
        Err(Error::Config(ConfigError::IntervalTooLarge { .. }))
    ));
    assert!(scheduler.job_ids().is_empty());
    assert!(!scheduler.is_running());
}

#[tokio::test]
async fn test_switched_off_registers_nothing() {
    let db = FakeDatabase::new().with_bind("crawler", Behavior::Healthy);
    let mut config = config_with(&["crawler"], &[("crawler", "articles")]);
    config.enabled = false;
    let scheduler = Scheduler::new();

    pacemaker(&db, config).run(&scheduler).unwrap();

    assert!(scheduler.job_ids().is_empty());
    assert!(!scheduler.is_running());
    assert!(db.events().is_empty());
}

#[tokio::test]
async fn test_run_twice_keeps_a_single_job() {
    let db = FakeDatabase::new().with_bind("crawler", Behavior::Healthy);
    let config = config_with(&["crawler"], &[("crawler", "articles")]);
    let pacemaker = pacemaker(&db, config);
    let scheduler = Scheduler::new();

    pacemaker.run(&scheduler).unwrap();
    assert!(scheduler.is_running());
    pacemaker.run(&scheduler).unwrap();

    assert_eq!(scheduler.job_ids(), vec![JOB_ID.to_string()]);
    assert!(scheduler.is_active(JOB_ID));
    assert!(scheduler.is_running());
    assert!(!scheduler.is_paused());

    scheduler.shutdown(std::time::Duration::from_secs(1)).await;
}

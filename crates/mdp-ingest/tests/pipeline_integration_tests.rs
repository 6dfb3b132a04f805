//! End-to-end pipeline tests against a real Postgres instance
//!
//! Covers the guarantees the dispatch path makes:
//! 1. Replaying an identical event is a `Duplicate`, never a second row
//! 2. Facts referencing an unknown exhibition are `MissingReference`
//! 3. Reference data loaded later unblocks previously rejected facts
//! 4. Invalid payloads are rejected before any write is attempted

use anyhow::Result;
use mdp_ingest::config::RetryConfig;
use mdp_ingest::{PipelineCoordinator, RejectReason, WriteOutcome};
use mdp_common::types::RawEvent;
use serial_test::serial;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use testcontainers::{runners::AsyncRunner, ContainerAsync, ImageExt};
use testcontainers_modules::postgres::Postgres;
use tracing::info;

/// Initialize tracing for tests
fn init_tracing() {
    use tracing_subscriber::{fmt, EnvFilter};

    let _ = fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,mdp_ingest=debug")),
        )
        .with_test_writer()
        .try_init();
}

/// Start a database, run migrations, and seed the reference rows the
/// dispatch path depends on. The container must stay in scope for the
/// duration of the test.
async fn setup() -> Result<(ContainerAsync<Postgres>, PgPool)> {
    let postgres_container = Postgres::default()
        .with_tag("16-alpine")
        .start()
        .await?;

    let host = postgres_container.get_host().await?;
    let port = postgres_container.get_host_port_ipv4(5432).await?;
    let conn_string = format!("postgresql://postgres:postgres@{}:{}/postgres", host, port);

    let pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(&conn_string)
        .await?;

    sqlx::migrate!("../../migrations").run(&pool).await?;

    for (value, meaning) in [
        (0i16, "Terrible"),
        (1, "Bad"),
        (2, "Neutral"),
        (3, "Good"),
        (4, "Amazing"),
    ] {
        sqlx::query("INSERT INTO rating (rating, meaning) VALUES ($1, $2)")
            .bind(value)
            .bind(meaning)
            .execute(&pool)
            .await?;
    }

    sqlx::query("INSERT INTO department (title, floor) VALUES ('Ecology', '3')")
        .execute(&pool)
        .await?;

    Ok((postgres_container, pool))
}

async fn insert_exhibition(pool: &PgPool, code: &str) -> Result<()> {
    sqlx::query(
        "INSERT INTO exhibition (exhibition_id, title, description, start_date, department_id)
         SELECT $1, 'Measureless to Man', 'Cave geology.', '2021-08-23', department_id
         FROM department WHERE title = 'Ecology' AND floor = '3'",
    )
    .bind(code)
    .execute(pool)
    .await?;
    Ok(())
}

fn vote_event(site: &str, at: &str, val: f64) -> RawEvent {
    RawEvent {
        at: Some(at.to_string()),
        site: Some(site.to_string()),
        val: Some(val),
        request_type: None,
    }
}

async fn count_rows(pool: &PgPool, table: &str) -> Result<i64> {
    let count: (i64,) = sqlx::query_as(&format!("SELECT COUNT(*) FROM {table}"))
        .fetch_one(pool)
        .await?;
    Ok(count.0)
}

#[tokio::test]
#[serial]
async fn test_vote_replay_is_duplicate() -> Result<()> {
    init_tracing();
    info!("Testing identical vote replay");

    let (_container, pool) = setup().await?;
    insert_exhibition(&pool, "EX0001").await?;

    let coordinator = PipelineCoordinator::new(pool.clone(), RetryConfig::default());
    coordinator.bootstrap().await?;

    let event = vote_event("EX0001", "2024-05-01T10:22:07+00:00", 4.0);
    assert_eq!(
        coordinator.dispatch_event(&event).await,
        WriteOutcome::Committed
    );
    assert_eq!(
        coordinator.dispatch_event(&event).await,
        WriteOutcome::Duplicate
    );

    assert_eq!(count_rows(&pool, "vote").await?, 1);

    let stats = coordinator.stats();
    assert_eq!(stats.votes.committed, 1);
    assert_eq!(stats.votes.duplicate, 1);

    Ok(())
}

#[tokio::test]
#[serial]
async fn test_unknown_exhibition_is_missing_reference() -> Result<()> {
    init_tracing();
    info!("Testing fact against unknown exhibition");

    let (_container, pool) = setup().await?;
    insert_exhibition(&pool, "EX0001").await?;

    let coordinator = PipelineCoordinator::new(pool.clone(), RetryConfig::default());
    coordinator.bootstrap().await?;

    let event = vote_event("EX9999", "2024-05-01T10:22:07+00:00", 4.0);
    let outcome = coordinator.dispatch_event(&event).await;
    assert!(matches!(
        outcome,
        WriteOutcome::Rejected(RejectReason::MissingReference { .. })
    ));
    assert_eq!(count_rows(&pool, "vote").await?, 0);

    Ok(())
}

#[tokio::test]
#[serial]
async fn test_late_reference_data_unblocks_facts() -> Result<()> {
    init_tracing();
    info!("Testing referential order");

    let (_container, pool) = setup().await?;
    let coordinator = PipelineCoordinator::new(pool.clone(), RetryConfig::default());
    coordinator.bootstrap().await?;

    let event = vote_event("EX0001", "2024-05-01T10:22:07+00:00", 3.0);
    assert!(matches!(
        coordinator.dispatch_event(&event).await,
        WriteOutcome::Rejected(RejectReason::MissingReference { .. })
    ));

    // Catalogue arrives afterwards; the same event now lands.
    insert_exhibition(&pool, "EX0001").await?;
    coordinator.bootstrap().await?;
    assert_eq!(
        coordinator.dispatch_event(&event).await,
        WriteOutcome::Committed
    );
    assert_eq!(count_rows(&pool, "vote").await?, 1);

    Ok(())
}

#[tokio::test]
#[serial]
async fn test_invalid_payloads_rejected_without_write() -> Result<()> {
    init_tracing();
    info!("Testing validation rejections");

    let (_container, pool) = setup().await?;
    insert_exhibition(&pool, "EX0001").await?;

    let coordinator = PipelineCoordinator::new(pool.clone(), RetryConfig::default());
    coordinator.bootstrap().await?;

    // Rating outside the 0-4 scale
    let out_of_range = vote_event("EX0001", "2024-05-01T10:22:07+00:00", 9.0);
    assert!(matches!(
        coordinator.dispatch_event(&out_of_range).await,
        WriteOutcome::Rejected(RejectReason::Validation(_))
    ));

    // Missing timestamp
    let no_timestamp = RawEvent {
        at: None,
        site: Some("EX0001".to_string()),
        val: Some(2.0),
        request_type: None,
    };
    assert!(matches!(
        coordinator.dispatch_event(&no_timestamp).await,
        WriteOutcome::Rejected(RejectReason::Validation(_))
    ));

    assert_eq!(count_rows(&pool, "vote").await?, 0);

    Ok(())
}

#[tokio::test]
#[serial]
async fn test_request_events_route_to_their_tables() -> Result<()> {
    init_tracing();
    info!("Testing assistance and emergency routing");

    let (_container, pool) = setup().await?;
    insert_exhibition(&pool, "EXH_03").await?;

    let coordinator = PipelineCoordinator::new(pool.clone(), RetryConfig::default());
    coordinator.bootstrap().await?;

    let assistance = RawEvent {
        at: Some("2024-05-01T11:00:00+00:00".to_string()),
        site: Some("3".to_string()),
        val: Some(-1.0),
        request_type: Some(0.0),
    };
    let emergency = RawEvent {
        at: Some("2024-05-01T11:05:00+00:00".to_string()),
        site: Some("3".to_string()),
        val: Some(-1.0),
        request_type: Some(1.0),
    };

    assert_eq!(
        coordinator.dispatch_event(&assistance).await,
        WriteOutcome::Committed
    );
    assert_eq!(
        coordinator.dispatch_event(&emergency).await,
        WriteOutcome::Committed
    );

    assert_eq!(count_rows(&pool, "assistance").await?, 1);
    assert_eq!(count_rows(&pool, "emergency").await?, 1);
    assert_eq!(count_rows(&pool, "vote").await?, 0);

    Ok(())
}

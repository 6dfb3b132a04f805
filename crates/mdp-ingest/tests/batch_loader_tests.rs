//! Archive loader tests against a real Postgres instance
//!
//! The replay must be row-isolated: a garbled or invalid CSV row is tallied
//! and skipped, and every valid row after it still lands. The run aborts only
//! for environment-level failures (missing files, unreachable store).

use anyhow::Result;
use mdp_ingest::batch::BatchLoader;
use mdp_ingest::config::{BatchPaths, RetryConfig};
use mdp_ingest::PipelineCoordinator;
use serial_test::serial;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use std::io::Write;
use std::path::Path;
use std::sync::Arc;
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

    Ok((postgres_container, pool))
}

fn write_file(dir: &Path, name: &str, content: &str) -> Result<std::path::PathBuf> {
    let path = dir.join(name);
    let mut file = std::fs::File::create(&path)?;
    file.write_all(content.as_bytes())?;
    Ok(path)
}

async fn count_rows(pool: &PgPool, table: &str) -> Result<i64> {
    let count: (i64,) = sqlx::query_as(&format!("SELECT COUNT(*) FROM {table}"))
        .fetch_one(pool)
        .await?;
    Ok(count.0)
}

#[tokio::test]
#[serial]
async fn test_malformed_rows_do_not_abort_the_replay() -> Result<()> {
    init_tracing();
    info!("Testing archive replay row isolation");

    let (_container, pool) = setup().await?;
    let dir = tempfile::tempdir()?;

    // A short second row and an unknown department; valid rows surround them.
    let exhibitions = write_file(
        dir.path(),
        "exhibitions.csv",
        "EXHIBITION_ID,EXHIBITION_NAME,DESCRIPTION,START_DATE,DEPARTMENT,FLOOR\n\
         EXH_00,Measureless to Man,Cave geology.,23/08/21,Geology,1\n\
         BROKEN\n\
         EXH_01,Adaptation,Butterfly behavior.,01/07/19,Zoology,1\n\
         EXH_02,Lost Worlds,Dioramas.,12/03/22,Botany,4\n",
    )?;

    // Row 2 has a non-numeric val, row 4 an unparseable timestamp on an
    // emergency marker; rows 3 and 5-7 are valid.
    let events = write_file(
        dir.path(),
        "events.csv",
        "at,site,val,type\n\
         2023-01-09 10:00:00,EXH_00,3.0,\n\
         2023-01-09 10:05:00,EXH_00,abc,\n\
         2023-01-09 10:10:00,EXH_00,4.0,\n\
         not-a-timestamp,EXH_00,-1.0,1.0\n\
         2023-01-09 10:15:00,EXH_00,-1.0,0.0\n\
         2023-01-09 10:00:00,EXH_00,3.0,\n\
         2023-01-09 10:20:00,EX9999,2.0,\n",
    )?;

    let coordinator = Arc::new(PipelineCoordinator::new(pool.clone(), RetryConfig::default()));
    let loader = BatchLoader::new(
        Arc::clone(&coordinator),
        BatchPaths {
            exhibitions,
            events,
        },
    );

    let stats = loader.run().await?;

    // Exhibitions: two committed, the short row and the unknown department
    // both rejected without stopping the load
    assert_eq!(stats.exhibitions.committed, 2);
    assert_eq!(stats.exhibitions.rejected, 2);

    // Votes: the rows after the garbled one still landed, the replayed row
    // deduplicated, the unknown exhibition rejected after the retry pass
    assert_eq!(stats.votes.committed, 2);
    assert_eq!(stats.votes.duplicate, 1);
    assert_eq!(stats.votes.rejected, 2);

    // The malformed emergency row counts against emergencies, not votes
    assert_eq!(stats.emergencies.rejected, 1);
    assert_eq!(stats.emergencies.committed, 0);
    assert_eq!(stats.assistance.committed, 1);

    assert_eq!(count_rows(&pool, "exhibition").await?, 2);
    assert_eq!(count_rows(&pool, "vote").await?, 2);
    assert_eq!(count_rows(&pool, "assistance").await?, 1);
    assert_eq!(count_rows(&pool, "emergency").await?, 0);

    Ok(())
}

#[tokio::test]
#[serial]
async fn test_rerun_is_idempotent() -> Result<()> {
    init_tracing();
    info!("Testing archive replay idempotence");

    let (_container, pool) = setup().await?;
    let dir = tempfile::tempdir()?;

    let exhibitions = write_file(
        dir.path(),
        "exhibitions.csv",
        "EXHIBITION_ID,EXHIBITION_NAME,DESCRIPTION,START_DATE,DEPARTMENT,FLOOR\n\
         EXH_00,Measureless to Man,Cave geology.,23/08/21,Geology,1\n",
    )?;
    let events = write_file(
        dir.path(),
        "events.csv",
        "at,site,val,type\n\
         2023-01-09 10:00:00,EXH_00,3.0,\n\
         2023-01-09 10:15:00,EXH_00,-1.0,0.0\n",
    )?;

    let paths = BatchPaths {
        exhibitions,
        events,
    };

    let coordinator = Arc::new(PipelineCoordinator::new(pool.clone(), RetryConfig::default()));
    let first = BatchLoader::new(Arc::clone(&coordinator), paths.clone())
        .run()
        .await?;
    assert_eq!(first.votes.committed, 1);
    assert_eq!(first.assistance.committed, 1);

    let second = BatchLoader::new(Arc::clone(&coordinator), paths).run().await?;
    assert_eq!(second.votes.committed, 0);
    assert_eq!(second.votes.duplicate, 1);
    assert_eq!(second.assistance.duplicate, 1);
    assert_eq!(second.exhibitions.duplicate, 1);

    assert_eq!(count_rows(&pool, "vote").await?, 1);
    assert_eq!(count_rows(&pool, "assistance").await?, 1);

    Ok(())
}

#[tokio::test]
#[serial]
async fn test_missing_input_file_is_fatal() -> Result<()> {
    init_tracing();

    let (_container, pool) = setup().await?;
    let dir = tempfile::tempdir()?;

    let exhibitions = write_file(
        dir.path(),
        "exhibitions.csv",
        "EXHIBITION_ID,EXHIBITION_NAME,DESCRIPTION,START_DATE,DEPARTMENT,FLOOR\n",
    )?;

    let coordinator = Arc::new(PipelineCoordinator::new(pool.clone(), RetryConfig::default()));
    let loader = BatchLoader::new(
        coordinator,
        BatchPaths {
            exhibitions,
            events: dir.path().join("nonexistent.csv"),
        },
    );

    assert!(loader.run().await.is_err());
    Ok(())
}

//! Sink writer
//!
//! Performs the actual persistence of validated records, classifying every
//! outcome instead of raising. Fact inserts are idempotent under the
//! at-least-once feed: the deduplication key (exhibition + kind + event
//! timestamp) is a unique constraint, and `ON CONFLICT DO NOTHING` turns a
//! replay into a reported `Duplicate` rather than an error. Each write is a
//! single-statement transaction, so a failure mid-insert leaves no partial
//! row.
//!
//! Foreign-key violations surface as `Rejected(MissingReference)` and are not
//! retried: an absent reference will not resolve itself. Connectivity
//! failures are retried with capped exponential backoff before the record is
//! given up on; the pipeline itself keeps running either way.

use sqlx::postgres::PgArguments;
use sqlx::query::Query;
use sqlx::{PgPool, Postgres};
use std::fmt;
use std::sync::Arc;
use tracing::warn;

use mdp_common::types::{ExhibitionCode, ExhibitionRecord, FactRecord, RecordKind};

use super::cache::ReferenceCache;
use super::validator::ValidationError;
use crate::config::RetryConfig;
use crate::db;

/// Classified result of a sink write
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteOutcome {
    /// A new durable row was produced
    Committed,
    /// The deduplication key already exists; idempotent no-op
    Duplicate,
    /// The record was dropped, with a reason
    Rejected(RejectReason),
}

impl WriteOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            WriteOutcome::Committed => "committed",
            WriteOutcome::Duplicate => "duplicate",
            WriteOutcome::Rejected(_) => "rejected",
        }
    }
}

/// The reference row a rejected record needed but could not find
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MissingRef {
    Exhibition(String),
    Rating(i16),
    Department { title: String, floor: String },
}

impl fmt::Display for MissingRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MissingRef::Exhibition(code) => write!(f, "exhibition '{code}'"),
            MissingRef::Rating(value) => write!(f, "rating {value}"),
            MissingRef::Department { title, floor } => {
                write!(f, "department '{title}' on floor '{floor}'")
            }
        }
    }
}

/// Reason a record was dropped
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RejectReason {
    /// Malformed, missing, or out-of-domain field; never retried
    Validation(ValidationError),
    /// Foreign-key target absent
    MissingReference { kind: RecordKind, target: MissingRef },
    /// The schema's own CHECK constraints refused the row; the database is
    /// the authority, the record is dropped
    ConstraintViolation(String),
    /// Connectivity-class failure that survived all retry attempts
    Transient(String),
}

impl RejectReason {
    pub fn code(&self) -> &'static str {
        match self {
            RejectReason::Validation(_) => "validation_failure",
            RejectReason::MissingReference { .. } => "missing_reference",
            RejectReason::ConstraintViolation(_) => "constraint_violation",
            RejectReason::Transient(_) => "transient_failure",
        }
    }
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RejectReason::Validation(e) => write!(f, "{e}"),
            RejectReason::MissingReference { kind, target } => {
                write!(f, "Missing {target} reference for {kind} record")
            }
            RejectReason::ConstraintViolation(msg) => write!(f, "Constraint violation: {msg}"),
            RejectReason::Transient(msg) => write!(f, "Transient failure: {msg}"),
        }
    }
}

/// Writes validated records into the relational store
pub struct SinkWriter {
    pool: PgPool,
    cache: Arc<ReferenceCache>,
    retry: RetryConfig,
}

impl SinkWriter {
    pub fn new(pool: PgPool, cache: Arc<ReferenceCache>, retry: RetryConfig) -> Self {
        Self { pool, cache, retry }
    }

    /// Persist a fact record.
    pub async fn write_fact(&self, record: &FactRecord) -> WriteOutcome {
        let exhibition = record.exhibition();
        let at = record.occurred_at();

        // Advisory pre-check: skip the round-trip for references we know are
        // absent. The FK constraint below remains the final authority.
        if !self.cache.exhibition_exists(exhibition) {
            return WriteOutcome::Rejected(RejectReason::MissingReference {
                kind: record.kind(),
                target: MissingRef::Exhibition(exhibition.as_str().to_string()),
            });
        }

        match record {
            FactRecord::Vote { rating, .. } => {
                let Some(rating_id) = self.cache.rating_id(*rating) else {
                    return WriteOutcome::Rejected(RejectReason::MissingReference {
                        kind: RecordKind::Vote,
                        target: MissingRef::Rating(rating.value()),
                    });
                };
                self.execute_with_retry(
                    || {
                        sqlx::query(
                            "INSERT INTO vote (exhibition_id, voted_at, rating_id) \
                             VALUES ($1, $2, $3) \
                             ON CONFLICT (exhibition_id, voted_at) DO NOTHING",
                        )
                        .bind(exhibition.as_str())
                        .bind(at)
                        .bind(rating_id)
                    },
                    record.kind(),
                    exhibition,
                )
                .await
            }
            FactRecord::Assistance { .. } => {
                self.execute_with_retry(
                    || {
                        sqlx::query(
                            "INSERT INTO assistance (exhibition_id, requested_at) \
                             VALUES ($1, $2) \
                             ON CONFLICT (exhibition_id, requested_at) DO NOTHING",
                        )
                        .bind(exhibition.as_str())
                        .bind(at)
                    },
                    record.kind(),
                    exhibition,
                )
                .await
            }
            FactRecord::Emergency { .. } => {
                self.execute_with_retry(
                    || {
                        sqlx::query(
                            "INSERT INTO emergency (exhibition_id, raised_at) \
                             VALUES ($1, $2) \
                             ON CONFLICT (exhibition_id, raised_at) DO NOTHING",
                        )
                        .bind(exhibition.as_str())
                        .bind(at)
                    },
                    record.kind(),
                    exhibition,
                )
                .await
            }
        }
    }

    /// Persist an exhibition reference record. Conflict target is the natural
    /// primary key, so a bulk-load replay is idempotent too.
    pub async fn write_exhibition(
        &self,
        record: &ExhibitionRecord,
        department_id: i32,
    ) -> WriteOutcome {
        self.execute_with_retry(
            || {
                sqlx::query(
                    "INSERT INTO exhibition \
                     (exhibition_id, title, description, start_date, department_id) \
                     VALUES ($1, $2, $3, $4, $5) \
                     ON CONFLICT (exhibition_id) DO NOTHING",
                )
                .bind(record.code.as_str())
                .bind(&record.title)
                .bind(&record.description)
                .bind(record.start_date)
                .bind(department_id)
            },
            RecordKind::Exhibition,
            &record.code,
        )
        .await
    }

    /// Run a single-row insert with bounded backoff on transient failures,
    /// classifying database-side violations into outcomes.
    async fn execute_with_retry<'a, F>(
        &self,
        build: F,
        kind: RecordKind,
        exhibition: &ExhibitionCode,
    ) -> WriteOutcome
    where
        F: Fn() -> Query<'a, Postgres, PgArguments>,
    {
        let mut attempt: u32 = 0;
        loop {
            match build().execute(&self.pool).await {
                Ok(done) => {
                    return if done.rows_affected() == 0 {
                        WriteOutcome::Duplicate
                    } else {
                        WriteOutcome::Committed
                    };
                }
                Err(err) => match db::sqlstate(&err).as_deref() {
                    Some(db::SQLSTATE_FOREIGN_KEY) => {
                        return WriteOutcome::Rejected(RejectReason::MissingReference {
                            kind,
                            target: MissingRef::Exhibition(exhibition.as_str().to_string()),
                        });
                    }
                    Some(db::SQLSTATE_UNIQUE) => return WriteOutcome::Duplicate,
                    Some(db::SQLSTATE_CHECK) => {
                        return WriteOutcome::Rejected(RejectReason::ConstraintViolation(
                            err.to_string(),
                        ));
                    }
                    _ if db::is_transient(&err) && attempt + 1 < self.retry.max_attempts => {
                        let backoff = self.retry.backoff(attempt);
                        warn!(
                            error = %err,
                            attempt,
                            backoff_ms = backoff.as_millis() as u64,
                            kind = %kind,
                            "Transient sink failure, retrying"
                        );
                        tokio::time::sleep(backoff).await;
                        attempt += 1;
                    }
                    _ => {
                        return WriteOutcome::Rejected(RejectReason::Transient(err.to_string()));
                    }
                },
            }
        }
    }
}

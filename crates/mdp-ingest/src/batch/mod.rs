//! One-time archive loader
//!
//! Replays the historical exhibition catalogue and kiosk event archive into
//! the store in dependency order: seed rows first, then exhibitions, then
//! fact records. Re-running the loader against the same files is a no-op
//! apart from `Duplicate` tallies.

use chrono::Utc;
use sqlx::PgPool;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info, warn};

use mdp_common::types::{
    FactRecord, RatingValue, RawEvent, RawExhibition, RecordKind,
};

use crate::config::BatchPaths;
use crate::pipeline::validator::{self, ValidationError};
use crate::pipeline::{
    IngestStats, MissingRef, PipelineCoordinator, RejectReason, WriteOutcome,
};

/// Departments the museum operated when the archive was cut. The catalogue
/// references them by (title, floor), so they must exist before exhibitions
/// load.
const DEPARTMENT_SEEDS: &[(&str, &str)] = &[
    ("Entomology", "Vault"),
    ("Geology", "1"),
    ("Paleontology", "1"),
    ("Zoology", "2"),
    ("Ecology", "3"),
    ("Zoology", "1"),
];

/// Replays the archive through the shared pipeline.
pub struct BatchLoader {
    coordinator: Arc<PipelineCoordinator>,
    paths: BatchPaths,
}

impl BatchLoader {
    pub fn new(coordinator: Arc<PipelineCoordinator>, paths: BatchPaths) -> Self {
        Self { coordinator, paths }
    }

    /// Run the full archive load. Per-record problems are tallied and logged;
    /// only environment-level failures (missing files, unreachable store,
    /// malformed CSV structure) abort the run.
    pub async fn run(&self) -> anyhow::Result<IngestStats> {
        self.paths.validate()?;

        seed_ratings(self.coordinator.pool()).await?;
        seed_departments(self.coordinator.pool()).await?;
        self.coordinator.bootstrap().await?;

        let mut stats = IngestStats::default();
        self.load_exhibitions(&mut stats).await?;
        self.load_events(&mut stats).await?;

        info!(
            votes_committed = stats.votes.committed,
            votes_duplicate = stats.votes.duplicate,
            votes_rejected = stats.votes.rejected,
            assistance_committed = stats.assistance.committed,
            emergencies_committed = stats.emergencies.committed,
            exhibitions_committed = stats.exhibitions.committed,
            exhibitions_rejected = stats.exhibitions.rejected,
            "Archive load complete"
        );
        Ok(stats)
    }

    /// Load the exhibition catalogue. Rows with an unknown department are
    /// rejected rather than inventing reference data on the fly.
    async fn load_exhibitions(&self, stats: &mut IngestStats) -> anyhow::Result<()> {
        let now = Utc::now();
        let cache = self.coordinator.cache();
        let sink = self.coordinator.sink();

        let mut reader = open_csv(&self.paths.exhibitions)?;
        let mut row = 0usize;
        for result in reader.deserialize::<RawExhibition>() {
            row += 1;
            // A garbled row is rejected like any other invalid record; it
            // must not abort the rows that follow it.
            let raw = match result {
                Ok(raw) => raw,
                Err(e) => {
                    warn!(row, error = %e, "Undecodable exhibition row");
                    stats.record(
                        RecordKind::Exhibition,
                        &WriteOutcome::Rejected(RejectReason::Validation(
                            ValidationError::MalformedPayload(e.to_string()),
                        )),
                    );
                    continue;
                }
            };

            let record = match validator::validate_exhibition(&raw, now) {
                Ok(record) => record,
                Err(reason) => {
                    warn!(row, reason = %reason, "Rejected exhibition row");
                    stats.record(
                        RecordKind::Exhibition,
                        &WriteOutcome::Rejected(RejectReason::Validation(reason)),
                    );
                    continue;
                }
            };

            let department_id =
                match cache.department_id(&record.department_title, &record.floor) {
                    Some(id) => id,
                    None => {
                        let outcome = WriteOutcome::Rejected(RejectReason::MissingReference {
                            kind: RecordKind::Exhibition,
                            target: MissingRef::Department {
                                title: record.department_title.clone(),
                                floor: record.floor.clone(),
                            },
                        });
                        warn!(
                            exhibition = %record.code,
                            department = %record.department_title,
                            floor = %record.floor,
                            "Rejected exhibition row: unknown department"
                        );
                        stats.record(RecordKind::Exhibition, &outcome);
                        continue;
                    }
                };

            let outcome = sink.write_exhibition(&record, department_id).await;
            if !matches!(outcome, WriteOutcome::Rejected(_)) {
                cache.remember_exhibition(&record.code);
            }
            debug!(exhibition = %record.code, outcome = outcome.as_str(), "Exhibition row");
            stats.record(RecordKind::Exhibition, &outcome);
        }

        info!(
            rows = row,
            committed = stats.exhibitions.committed,
            "Exhibition catalogue loaded"
        );
        Ok(())
    }

    /// Replay the kiosk event archive. Records whose exhibition is not yet
    /// known get a single second pass once the whole file has been read, in
    /// case the archive interleaved facts with catalogue updates.
    async fn load_events(&self, stats: &mut IngestStats) -> anyhow::Result<()> {
        let now = Utc::now();
        let sink = self.coordinator.sink();
        let mut deferred: Vec<FactRecord> = Vec::new();

        let mut reader = open_csv(&self.paths.events)?;
        let mut row = 0usize;
        for result in reader.deserialize::<RawEvent>() {
            row += 1;
            // Row-level decode failures are per-record rejections, never a
            // reason to abandon the rest of the replay.
            let raw = match result {
                Ok(raw) => raw,
                Err(e) => {
                    warn!(row, error = %e, "Undecodable event row");
                    stats.record(
                        RecordKind::Vote,
                        &WriteOutcome::Rejected(RejectReason::Validation(
                            ValidationError::MalformedPayload(e.to_string()),
                        )),
                    );
                    continue;
                }
            };

            let record = match validator::validate_event(&raw, now) {
                Ok(record) => record,
                Err(reason) => {
                    warn!(row, reason = %reason, "Rejected event row");
                    stats.record(
                        RecordKind::from_raw(&raw),
                        &WriteOutcome::Rejected(RejectReason::Validation(reason)),
                    );
                    continue;
                }
            };

            match sink.write_fact(&record).await {
                WriteOutcome::Rejected(RejectReason::MissingReference { .. }) => {
                    deferred.push(record);
                }
                outcome => stats.record(record.kind(), &outcome),
            }
        }

        if !deferred.is_empty() {
            info!(count = deferred.len(), "Retrying records with missing references");
            for record in &deferred {
                let outcome = sink.write_fact(record).await;
                if let WriteOutcome::Rejected(reason) = &outcome {
                    warn!(
                        kind = %record.kind(),
                        exhibition = record.exhibition().as_str(),
                        reason = reason.code(),
                        "Record rejected after retry pass"
                    );
                }
                stats.record(record.kind(), &outcome);
            }
        }

        info!(rows = row, "Event archive replayed");
        Ok(())
    }
}

fn open_csv(path: &Path) -> anyhow::Result<csv::Reader<std::fs::File>> {
    csv::Reader::from_path(path)
        .map_err(|e| anyhow::anyhow!("Failed to open {}: {e}", path.display()))
}

/// Insert the fixed rating scale. The meanings are part of the data model,
/// not operator input.
async fn seed_ratings(pool: &PgPool) -> anyhow::Result<()> {
    for rating in RatingValue::ALL {
        sqlx::query(
            "INSERT INTO rating (rating, meaning) VALUES ($1, $2) \
             ON CONFLICT (rating) DO NOTHING",
        )
        .bind(rating.value())
        .bind(rating.meaning())
        .execute(pool)
        .await?;
    }
    Ok(())
}

async fn seed_departments(pool: &PgPool) -> anyhow::Result<()> {
    for (title, floor) in DEPARTMENT_SEEDS {
        sqlx::query(
            "INSERT INTO department (title, floor) VALUES ($1, $2) \
             ON CONFLICT (title, floor) DO NOTHING",
        )
        .bind(title)
        .bind(floor)
        .execute(pool)
        .await?;
    }
    Ok(())
}

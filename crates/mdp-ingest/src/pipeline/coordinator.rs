//! Pipeline coordinator
//!
//! The single owner of the shared database pool, the reference cache, and
//! the sink writer. Both the batch loader and the stream consumer dispatch
//! raw records through here, so transactional and ordering guarantees live
//! in one place and there are no process-wide singletons.
//!
//! Logging is a pure consumer of the classified [`WriteOutcome`] the sink
//! returns; it never participates in control flow.

use async_trait::async_trait;
use chrono::Utc;
use serde::Serialize;
use sqlx::PgPool;
use std::sync::Arc;
use std::sync::Mutex;
use tracing::{debug, info, warn};

use mdp_common::types::{RawEvent, RecordKind};

use super::cache::ReferenceCache;
use super::sink::{RejectReason, SinkWriter, WriteOutcome};
use super::validator;
use crate::config::RetryConfig;

/// Per-kind outcome tally
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct KindTally {
    pub committed: u64,
    pub duplicate: u64,
    pub rejected: u64,
}

impl KindTally {
    fn record(&mut self, outcome: &WriteOutcome) {
        match outcome {
            WriteOutcome::Committed => self.committed += 1,
            WriteOutcome::Duplicate => self.duplicate += 1,
            WriteOutcome::Rejected(_) => self.rejected += 1,
        }
    }

    pub fn total(&self) -> u64 {
        self.committed + self.duplicate + self.rejected
    }
}

/// Running totals for everything dispatched through the coordinator
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct IngestStats {
    pub votes: KindTally,
    pub assistance: KindTally,
    pub emergencies: KindTally,
    pub exhibitions: KindTally,
}

impl IngestStats {
    pub fn tally_mut(&mut self, kind: RecordKind) -> &mut KindTally {
        match kind {
            RecordKind::Vote => &mut self.votes,
            RecordKind::Assistance => &mut self.assistance,
            RecordKind::Emergency => &mut self.emergencies,
            RecordKind::Exhibition => &mut self.exhibitions,
        }
    }

    pub fn tally(&self, kind: RecordKind) -> KindTally {
        match kind {
            RecordKind::Vote => self.votes,
            RecordKind::Assistance => self.assistance,
            RecordKind::Emergency => self.emergencies,
            RecordKind::Exhibition => self.exhibitions,
        }
    }

    pub fn record(&mut self, kind: RecordKind, outcome: &WriteOutcome) {
        self.tally_mut(kind).record(outcome);
    }
}

/// Seam between the driving loops and the dispatch path; lets the stream
/// consumer be tested without a database.
#[async_trait]
pub trait RecordDispatcher: Send + Sync {
    async fn dispatch(&self, raw: &RawEvent) -> WriteOutcome;
}

/// Owns the session, the cache, and the sink
pub struct PipelineCoordinator {
    pool: PgPool,
    cache: Arc<ReferenceCache>,
    sink: SinkWriter,
    stats: Mutex<IngestStats>,
}

impl PipelineCoordinator {
    pub fn new(pool: PgPool, retry: RetryConfig) -> Self {
        let cache = Arc::new(ReferenceCache::new());
        let sink = SinkWriter::new(pool.clone(), Arc::clone(&cache), retry);
        Self {
            pool,
            cache,
            sink,
            stats: Mutex::new(IngestStats::default()),
        }
    }

    /// Prime the reference cache from the store. Must run before any fact
    /// dispatch; failure here is fatal configuration, not a per-record error.
    pub async fn bootstrap(&self) -> anyhow::Result<()> {
        self.cache
            .prime(&self.pool)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to prime reference cache: {e}"))
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub fn cache(&self) -> &Arc<ReferenceCache> {
        &self.cache
    }

    pub fn sink(&self) -> &SinkWriter {
        &self.sink
    }

    /// Validate a raw event and drive it through the sink, recording and
    /// logging the classified outcome.
    pub async fn dispatch_event(&self, raw: &RawEvent) -> WriteOutcome {
        let record = match validator::validate_event(raw, Utc::now()) {
            Ok(record) => record,
            Err(reason) => {
                let outcome = WriteOutcome::Rejected(RejectReason::Validation(reason));
                self.account(
                    RecordKind::from_raw(raw),
                    raw.site.as_deref().unwrap_or("?"),
                    &outcome,
                );
                return outcome;
            }
        };

        let outcome = self.sink.write_fact(&record).await;
        self.account(record.kind(), record.exhibition().as_str(), &outcome);
        outcome
    }

    fn account(&self, kind: RecordKind, exhibition: &str, outcome: &WriteOutcome) {
        {
            let mut stats = self.stats.lock().unwrap_or_else(|e| e.into_inner());
            stats.record(kind, outcome);
        }
        match outcome {
            WriteOutcome::Committed => {
                debug!(kind = %kind, exhibition, "Record committed");
            }
            WriteOutcome::Duplicate => {
                info!(kind = %kind, exhibition, "Duplicate record skipped");
            }
            WriteOutcome::Rejected(reason) => {
                warn!(
                    kind = %kind,
                    exhibition,
                    reason = reason.code(),
                    detail = %reason,
                    "Record rejected"
                );
            }
        }
    }

    /// Snapshot of the running totals.
    pub fn stats(&self) -> IngestStats {
        *self.stats.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl RecordDispatcher for PipelineCoordinator {
    async fn dispatch(&self, raw: &RawEvent) -> WriteOutcome {
        self.dispatch_event(raw).await
    }
}

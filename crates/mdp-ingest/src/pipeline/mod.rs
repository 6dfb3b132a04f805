//! Core ingestion pipeline
//!
//! One shared path for both input modes:
//!
//! - **validator**: pure raw-to-typed record validation, no I/O
//! - **cache**: advisory in-memory reference cache (exhibition codes, rating
//!   and department surrogate keys)
//! - **sink**: idempotent, classified writes against the relational schema
//! - **coordinator**: owns the pool, the cache, and the sink; the single
//!   place dispatch and outcome accounting happen

pub mod cache;
pub mod coordinator;
pub mod sink;
pub mod validator;

// Re-export commonly used types
pub use cache::ReferenceCache;
pub use coordinator::{IngestStats, KindTally, PipelineCoordinator, RecordDispatcher};
pub use sink::{MissingRef, RejectReason, SinkWriter, WriteOutcome};
pub use validator::ValidationError;

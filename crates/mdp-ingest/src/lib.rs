//! MDP Ingest Library
//!
//! Ingestion pipeline for museum visitor-interaction events. Two input modes
//! feed one sink:
//!
//! - **Batch**: a finite replay of the cleaned bulk archive (exhibition
//!   metadata plus historical kiosk events), run once via [`batch::BatchLoader`].
//! - **Stream**: an unbounded live feed consumed from Kafka on a fixed
//!   cadence via [`stream::StreamConsumer`].
//!
//! Both modes drive raw records through the same path:
//!
//! ```text
//! raw record -> validator -> coordinator -> reference cache -> sink writer -> rows
//! ```
//!
//! Per-record failures are classified ([`pipeline::WriteOutcome`]) and never
//! propagate past the sink writer into the driving loops; only startup
//! configuration errors abort the process.

pub mod batch;
pub mod config;
pub mod db;
pub mod pipeline;
pub mod stream;

// Re-export commonly used types
pub use pipeline::{
    IngestStats, MissingRef, PipelineCoordinator, RecordDispatcher, ReferenceCache,
    RejectReason, SinkWriter, WriteOutcome,
};

//! catalog-ai library interface
//!
//! Attribute enrichment for catalog product records: rule-based text
//! extraction, vision label mapping, text/vision fusion with a decision log,
//! and a pipeline that ingests, predicts and publishes batches.

pub mod error;
pub mod extractors;
pub mod flatten;
pub mod fusion;
pub mod ingest;
pub mod providers;
pub mod rate_limiter;
pub mod sinks;
pub mod types;
pub mod workflow;

pub use crate::error::{ErrorType, IndexedError, IngestError, PipelineError, Stage};
pub use crate::fusion::{fuse, FusionOutcome, FusionPolicy};
pub use crate::rate_limiter::TokenBucket;
pub use crate::workflow::{BatchOutcome, Collaborators, OutputReport, Pipeline, RecordOutcome, WorkflowEvent};

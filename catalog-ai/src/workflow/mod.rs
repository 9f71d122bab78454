//! Per-record enrichment workflow
//!
//! Each record moves through:
//!
//! ```text
//! received → ingested → enriched → predicted → (published) → (warehoused) → complete
//!     └──────────┴──────────┴──────────┴──► failed(stage, error_type)
//! ```
//!
//! Records are isolated: a failure is reported against the record's input
//! index and never aborts its siblings. A cooperative wall-clock budget is
//! checked after ingest, enrich and predict. Side effects (publish, warehouse)
//! run once per batch over the successful records only.

pub mod outputs;
pub mod pipeline;

pub use outputs::OutputReport;
pub use pipeline::{Collaborators, Pipeline};

use crate::error::{ErrorType, IndexedError, Stage};
use catalog_common::StageTimings;
use serde::{Deserialize, Serialize};

/// Lifecycle state of one record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "state")]
pub enum RecordState {
    Received,
    Ingested,
    Enriched,
    Predicted,
    Published,
    Warehoused,
    Complete,
    Failed { stage: Stage, error_type: ErrorType },
}

/// Progress events emitted while a pipeline runs
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum WorkflowEvent {
    /// A record entered a new lifecycle state
    RecordStateChanged {
        /// Input index within the batch (0 for single-record calls)
        index: usize,
        product_id: String,
        state: RecordState,
    },

    /// All records of a batch resolved and side effects ran
    BatchCompleted {
        total: usize,
        succeeded: usize,
        failed: usize,
        /// Wall-clock duration of the whole batch
        elapsed_ms: f64,
    },
}

/// Result of a single-record call that succeeded
#[derive(Debug, Clone)]
pub struct RecordOutcome<T> {
    pub item: T,
    pub timings: StageTimings,
    pub outputs: OutputReport,
}

/// Result of a batch call
///
/// `items`, `indices` and `timings` are parallel and follow input order;
/// `errors` also follow input order.
#[derive(Debug, Clone)]
pub struct BatchOutcome<T> {
    pub items: Vec<T>,
    /// Input index of each item
    pub indices: Vec<usize>,
    pub errors: Vec<IndexedError>,
    pub timings: Vec<StageTimings>,
    pub outputs: OutputReport,
}

impl<T> BatchOutcome<T> {
    pub fn total(&self) -> usize {
        self.items.len() + self.errors.len()
    }

    /// Summed stage timings over the successful records
    pub fn timing_summary(&self) -> StageTimings {
        StageTimings::summarize(&self.timings)
    }
}

/// Emit one structured log line summarising stage timings
pub fn log_timing_summary(operation: &str, timings: &[StageTimings], failed: usize) {
    let summary = StageTimings::summarize(timings);
    tracing::info!(
        operation,
        records = timings.len(),
        failed,
        ingest_ms = summary.ingest_ms,
        enrich_ms = summary.enrich_ms,
        vision_ms = summary.vision_ms,
        fuse_ms = summary.fuse_ms,
        predict_ms = summary.predict_ms(),
        total_ms = summary.total_ms(),
        "Timing summary"
    );
}

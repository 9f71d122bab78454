//! Pipeline orchestrator
//!
//! Sequences ingest → enrich → vision → fusion for each record, tracks
//! per-stage timings, enforces the per-record wall-clock budget and aggregates
//! batches with per-record failure isolation.
//!
//! # Concurrency
//!
//! Stages of one record run strictly in order. Records of a batch may overlap,
//! bounded by `max_in_flight`; results keep input order regardless. The only
//! state shared across records is the admission [`TokenBucket`].

use super::outputs::{process_outputs, OutputReport, OutputSinks};
use super::{log_timing_summary, BatchOutcome, RecordOutcome, RecordState, WorkflowEvent};
use crate::error::{ErrorType, IndexedError, PipelineError, Stage};
use crate::extractors::{enrich_text, map_vision_labels};
use crate::fusion::{fuse_with_policy, FusionPolicy};
use crate::ingest::{ImageResolver, LocalImageResolver, ResolveOptions};
use crate::providers::{DeterministicVisionProducer, VisionProducer};
use crate::rate_limiter::TokenBucket;
use crate::sinks::{
    EventValidator, LocalFilePublisher, PredictionEventValidator, Publisher, SqliteWarehouseSink,
    WarehouseSink,
};
use crate::types::{
    EnrichedProductRecord, IngestedProductRecord, PredictedProductRecord, RawProductRecord,
    RecordInput,
};
use catalog_common::{AppConfig, StageTimings, Stopwatch};
use futures::stream::{self, StreamExt};
use serde_json::json;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

// ============================================================================
// Collaborators
// ============================================================================

/// External collaborators the pipeline delegates to
///
/// Optional sinks are only used when the matching config flag is also set
/// (`enable_publish`, `validate_events`, `enable_warehouse`).
#[derive(Clone)]
pub struct Collaborators {
    pub resolver: Arc<dyn ImageResolver>,
    pub vision: Arc<dyn VisionProducer>,
    pub publisher: Option<Arc<dyn Publisher>>,
    pub warehouse: Option<Arc<dyn WarehouseSink>>,
    pub validator: Option<Arc<dyn EventValidator>>,
}

impl Collaborators {
    /// Local defaults: filesystem/HTTP resolver, deterministic vision,
    /// JSONL publisher under `events_dir`, SQLite warehouse at `warehouse_path`
    pub fn local(config: &AppConfig) -> catalog_common::Result<Self> {
        let resolver = LocalImageResolver::new()
            .map_err(|e| catalog_common::Error::Internal(e.to_string()))?;
        Ok(Self {
            resolver: Arc::new(resolver),
            vision: Arc::new(DeterministicVisionProducer::new()),
            publisher: Some(Arc::new(LocalFilePublisher::new(config.events_dir.clone()))),
            warehouse: Some(Arc::new(SqliteWarehouseSink::new(config.warehouse_path.clone()))),
            validator: Some(Arc::new(PredictionEventValidator)),
        })
    }

    /// Replace the vision producer
    pub fn with_vision(mut self, vision: Arc<dyn VisionProducer>) -> Self {
        self.vision = vision;
        self
    }
}

// ============================================================================
// Pipeline
// ============================================================================

/// Catalog enrichment pipeline
pub struct Pipeline {
    config: AppConfig,
    collaborators: Collaborators,
    fusion_policy: FusionPolicy,
    rate_limiter: TokenBucket,
    event_tx: Option<mpsc::Sender<WorkflowEvent>>,
}

impl Pipeline {
    /// Create a pipeline from validated configuration
    pub fn new(config: AppConfig, collaborators: Collaborators) -> Self {
        let rate_limiter = TokenBucket::new(config.rpm_limit);
        Self {
            config,
            collaborators,
            fusion_policy: FusionPolicy::default(),
            rate_limiter,
            event_tx: None,
        }
    }

    /// Create pipeline with event channel for progress reporting
    pub fn with_events(
        config: AppConfig,
        collaborators: Collaborators,
        event_tx: mpsc::Sender<WorkflowEvent>,
    ) -> Self {
        let mut pipeline = Self::new(config, collaborators);
        pipeline.event_tx = Some(event_tx);
        pipeline
    }

    /// Override the fusion constants
    pub fn with_fusion_policy(mut self, policy: FusionPolicy) -> Self {
        self.fusion_policy = policy;
        self
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn rate_limiter(&self) -> &TokenBucket {
        &self.rate_limiter
    }

    // ------------------------------------------------------------------------
    // Admission
    // ------------------------------------------------------------------------

    /// Request-level guards: rate limit, batch size, text length
    ///
    /// Consumes one rate-limit token per call.
    pub fn admit(&self, records: &[RecordInput]) -> Result<(), PipelineError> {
        if !self.rate_limiter.consume(1) {
            return Err(PipelineError::new(
                None,
                ErrorType::RateLimited,
                Stage::RateLimit,
                "Rate limit exceeded; retry later",
            )
            .with_details(json!({ "rpm_limit": self.config.rpm_limit })));
        }

        if records.len() > self.config.max_batch_items {
            return Err(PipelineError::new(
                None,
                ErrorType::BatchLimitExceeded,
                Stage::RequestValidation,
                format!(
                    "Batch of {} records exceeds the limit of {}",
                    records.len(),
                    self.config.max_batch_items
                ),
            )
            .with_details(json!({
                "count": records.len(),
                "limit": self.config.max_batch_items,
            })));
        }

        for record in records {
            let chars = record.raw().text_chars();
            if chars > self.config.max_text_chars {
                return Err(PipelineError::for_record(
                    record.product_id(),
                    ErrorType::TextLimitExceeded,
                    Stage::RequestValidation,
                    format!(
                        "Title and description total {} characters; limit is {}",
                        chars, self.config.max_text_chars
                    ),
                )
                .with_details(json!({ "chars": chars, "limit": self.config.max_text_chars })));
            }
        }

        Ok(())
    }

    // ------------------------------------------------------------------------
    // Single records
    // ------------------------------------------------------------------------

    /// Ingest (unless already ingested) and enrich one record
    pub async fn enrich_one(
        &self,
        input: RecordInput,
    ) -> Result<(EnrichedProductRecord, StageTimings), PipelineError> {
        let (_, result) = self.enrich_indexed(0, input).await;
        result
    }

    /// Run one record through prediction, then its side effects
    ///
    /// Enriched inputs skip ingest and enrich. A side-effect failure is
    /// reported in `outputs` and does not discard the prediction.
    pub async fn predict_one(
        &self,
        input: RecordInput,
    ) -> Result<RecordOutcome<PredictedProductRecord>, PipelineError> {
        let (_, result) = self.predict_indexed(0, input).await;
        let (item, timings) = result?;
        let outputs = process_outputs(&self.output_sinks(), std::slice::from_ref(&item), &[0]).await;
        if outputs.is_ok() {
            self.emit_state(0, item.product_id(), RecordState::Complete).await;
        }
        Ok(RecordOutcome {
            item,
            timings,
            outputs,
        })
    }

    // ------------------------------------------------------------------------
    // Batches
    // ------------------------------------------------------------------------

    /// Enrich a batch with per-record failure isolation
    pub async fn enrich_batch(&self, inputs: Vec<RecordInput>) -> BatchOutcome<EnrichedProductRecord> {
        let watch = Stopwatch::start();
        let results: Vec<_> = stream::iter(inputs.into_iter().enumerate())
            .map(|(index, input)| self.enrich_indexed(index, input))
            .buffered(self.config.max_in_flight.max(1))
            .collect()
            .await;

        let outcome = collect_outcome(results);
        log_timing_summary("enrich_batch", &outcome.timings, outcome.errors.len());
        self.emit_batch_completed(&outcome, &watch).await;
        outcome
    }

    /// Predict a batch with per-record failure isolation, then run side
    /// effects once over the successful records
    pub async fn predict_batch(&self, inputs: Vec<RecordInput>) -> BatchOutcome<PredictedProductRecord> {
        let watch = Stopwatch::start();
        let results: Vec<_> = stream::iter(inputs.into_iter().enumerate())
            .map(|(index, input)| self.predict_indexed(index, input))
            .buffered(self.config.max_in_flight.max(1))
            .collect()
            .await;

        let mut outcome = collect_outcome(results);
        outcome.outputs = process_outputs(&self.output_sinks(), &outcome.items, &outcome.indices).await;
        if outcome.outputs.is_ok() {
            for (item, index) in outcome.items.iter().zip(outcome.indices.iter().copied()) {
                self.emit_state(index, item.product_id(), RecordState::Complete).await;
            }
        }

        log_timing_summary("predict_batch", &outcome.timings, outcome.errors.len());
        self.emit_batch_completed(&outcome, &watch).await;
        outcome
    }

    /// Publish and persist already-predicted records with the enabled sinks
    ///
    /// `indices` labels progress events; pass `0..records.len()` when the
    /// records did not come from a batch.
    pub async fn process_outputs(&self, records: &[PredictedProductRecord], indices: &[usize]) -> OutputReport {
        process_outputs(&self.output_sinks(), records, indices).await
    }

    // ------------------------------------------------------------------------
    // Record stages
    // ------------------------------------------------------------------------

    async fn enrich_indexed(
        &self,
        index: usize,
        input: RecordInput,
    ) -> (usize, Result<(EnrichedProductRecord, StageTimings), PipelineError>) {
        let product_id = input.product_id().to_string();
        self.emit_state(index, &product_id, RecordState::Received).await;

        let watch = Stopwatch::start();
        let mut timings = StageTimings::default();
        let result = self.enrich_record(index, input, &watch, &mut timings).await;
        let result = self.report_failure(index, &product_id, result).await;
        (index, result.map(|record| (record, timings)))
    }

    async fn predict_indexed(
        &self,
        index: usize,
        input: RecordInput,
    ) -> (usize, Result<(PredictedProductRecord, StageTimings), PipelineError>) {
        let product_id = input.product_id().to_string();
        self.emit_state(index, &product_id, RecordState::Received).await;

        let watch = Stopwatch::start();
        let mut timings = StageTimings::default();
        let result = match self.enrich_record(index, input, &watch, &mut timings).await {
            Ok(enriched) => self.predict_record(index, enriched, &watch, &mut timings).await,
            Err(err) => Err(err),
        };
        let result = self.report_failure(index, &product_id, result).await;
        (index, result.map(|record| (record, timings)))
    }

    async fn enrich_record(
        &self,
        index: usize,
        input: RecordInput,
        watch: &Stopwatch,
        timings: &mut StageTimings,
    ) -> Result<EnrichedProductRecord, PipelineError> {
        let ingested = match input {
            RecordInput::Enriched(record) => return Ok(record),
            RecordInput::Ingested(record) => record,
            RecordInput::Raw(record) => {
                let stage = Stopwatch::start();
                let result = self.ingest(record).await;
                timings.ingest_ms += stage.elapsed_ms();
                result?
            }
        };
        let product_id = ingested.record.product_id.clone();
        self.emit_state(index, &product_id, RecordState::Ingested).await;
        self.check_timeout(Stage::Ingest, &product_id, watch)?;

        let stage = Stopwatch::start();
        let result = enrich(ingested).await;
        timings.enrich_ms += stage.elapsed_ms();
        let enriched = result?;
        self.emit_state(index, &product_id, RecordState::Enriched).await;
        self.check_timeout(Stage::Enrich, &product_id, watch)?;

        Ok(enriched)
    }

    async fn ingest(&self, record: RawProductRecord) -> Result<IngestedProductRecord, PipelineError> {
        if let Err(reason) = record.validate() {
            return Err(PipelineError::for_record(
                &record.product_id,
                ErrorType::ValidationError,
                Stage::Ingest,
                format!("Record failed validation during ingestion: {}", reason),
            ));
        }

        let options = ResolveOptions::from_config(&self.config);
        self.collaborators
            .resolver
            .resolve(record, &options)
            .await
            .map_err(PipelineError::from)
    }

    async fn predict_record(
        &self,
        index: usize,
        enriched: EnrichedProductRecord,
        watch: &Stopwatch,
        timings: &mut StageTimings,
    ) -> Result<PredictedProductRecord, PipelineError> {
        let product_id = enriched.product_id().to_string();

        let stage = Stopwatch::start();
        let vision = self
            .collaborators
            .vision
            .predict(&enriched.ingested.image_local_path)
            .await;
        timings.vision_ms += stage.elapsed_ms();
        let vision = vision.map_err(|e| {
            PipelineError::for_record(
                &product_id,
                ErrorType::PredictFailure,
                Stage::Predict,
                format!("{} vision producer failed: {}", self.collaborators.vision.name(), e),
            )
        })?;
        debug!(
            product_id = %product_id,
            trace_id = ?vision.trace_id,
            top_label = ?vision.labels.first().map(|l| l.name.as_str()),
            "Vision labels received"
        );

        let stage = Stopwatch::start();
        let vision_predictions = map_vision_labels(&vision.labels);
        let fused = fuse_with_policy(
            &enriched.predictions,
            &vision_predictions,
            &vision.quality_flags,
            &self.fusion_policy,
        );
        timings.fuse_ms += stage.elapsed_ms();

        self.emit_state(index, &product_id, RecordState::Predicted).await;
        self.check_timeout(Stage::Predict, &product_id, watch)?;

        Ok(PredictedProductRecord {
            enriched,
            final_predictions: fused.predictions,
            decision_log: fused.decision_log,
        })
    }

    /// Fail the record when its elapsed time exceeds the configured budget
    fn check_timeout(&self, stage: Stage, product_id: &str, watch: &Stopwatch) -> Result<(), PipelineError> {
        if !self.config.record_timeout_enabled() {
            return Ok(());
        }
        let elapsed = watch.elapsed();
        let limit = self.config.record_timeout;
        if elapsed <= limit {
            return Ok(());
        }
        Err(PipelineError::for_record(
            product_id,
            ErrorType::Timeout,
            stage,
            format!(
                "Record exceeded {:.2}s limit during {} stage.",
                limit.as_secs_f64(),
                stage
            ),
        )
        .with_details(json!({
            "elapsed_s": elapsed.as_secs_f64(),
            "limit_s": limit.as_secs_f64(),
        })))
    }

    // ------------------------------------------------------------------------
    // Events
    // ------------------------------------------------------------------------

    async fn report_failure<T>(
        &self,
        index: usize,
        product_id: &str,
        result: Result<T, PipelineError>,
    ) -> Result<T, PipelineError> {
        if let Err(err) = &result {
            warn!(
                index,
                product_id = %product_id,
                stage = %err.stage,
                error_type = %err.error_type,
                "Record failed: {}",
                err.message
            );
            self.emit_state(
                index,
                product_id,
                RecordState::Failed {
                    stage: err.stage,
                    error_type: err.error_type,
                },
            )
            .await;
        }
        result
    }

    async fn emit_state(&self, index: usize, product_id: &str, state: RecordState) {
        self.emit_event(WorkflowEvent::RecordStateChanged {
            index,
            product_id: product_id.to_string(),
            state,
        })
        .await;
    }

    async fn emit_batch_completed<T>(&self, outcome: &BatchOutcome<T>, watch: &Stopwatch) {
        info!(
            total = outcome.total(),
            succeeded = outcome.items.len(),
            failed = outcome.errors.len(),
            "Batch complete"
        );
        self.emit_event(WorkflowEvent::BatchCompleted {
            total: outcome.total(),
            succeeded: outcome.items.len(),
            failed: outcome.errors.len(),
            elapsed_ms: watch.elapsed_ms(),
        })
        .await;
    }

    async fn emit_event(&self, event: WorkflowEvent) {
        if let Some(tx) = &self.event_tx {
            let _ = tx.send(event).await;
        }
    }

    fn output_sinks(&self) -> OutputSinks<'_> {
        let publisher = self
            .collaborators
            .publisher
            .as_deref()
            .filter(|_| self.config.enable_publish);
        let validator = self
            .collaborators
            .validator
            .as_deref()
            .filter(|_| self.config.validate_events);
        let warehouse = self
            .collaborators
            .warehouse
            .as_deref()
            .filter(|_| self.config.enable_warehouse);
        OutputSinks {
            publisher,
            validator,
            warehouse,
            event_tx: self.event_tx.as_ref(),
        }
    }
}

/// Text enrichment off the async runtime; a panic becomes `enrich_failure`
async fn enrich(ingested: IngestedProductRecord) -> Result<EnrichedProductRecord, PipelineError> {
    let product_id = ingested.record.product_id.clone();
    tokio::task::spawn_blocking(move || {
        let predictions = enrich_text(&ingested.record);
        EnrichedProductRecord {
            ingested,
            predictions,
        }
    })
    .await
    .map_err(|e| {
        PipelineError::for_record(
            &product_id,
            ErrorType::EnrichFailure,
            Stage::Enrich,
            format!("Text enrichment failed: {}", e),
        )
    })
}

fn collect_outcome<T>(
    results: Vec<(usize, Result<(T, StageTimings), PipelineError>)>,
) -> BatchOutcome<T> {
    let mut outcome = BatchOutcome {
        items: Vec::new(),
        indices: Vec::new(),
        errors: Vec::new(),
        timings: Vec::new(),
        outputs: Default::default(),
    };
    for (index, result) in results {
        match result {
            Ok((item, timings)) => {
                outcome.items.push(item);
                outcome.indices.push(index);
                outcome.timings.push(timings);
            }
            Err(error) => outcome.errors.push(IndexedError { index, error }),
        }
    }
    outcome
}

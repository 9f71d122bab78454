//! Batch side effects: event publication and warehouse writes
//!
//! Runs once per batch, after every record has resolved, over the successful
//! records only. The first failure stops the remaining side effects and is
//! reported in [`OutputReport::error`]; the predictions themselves stand.

use super::{RecordState, WorkflowEvent};
use crate::error::{ErrorType, PipelineError, Stage};
use crate::flatten::{build_event_payload, flatten_predicted_record};
use crate::sinks::publish::PREDICTIONS_TOPIC;
use crate::sinks::{EventValidator, Publisher, WarehouseSink};
use crate::types::PredictedProductRecord;
use chrono::Utc;
use tokio::sync::mpsc;
use uuid::Uuid;

/// Warehouse dataset predicted rows are written to
pub const WAREHOUSE_DATASET: &str = "catalog";
/// Warehouse table predicted rows are written to
pub const WAREHOUSE_TABLE: &str = "predictions";

/// What the side-effect step did
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OutputReport {
    /// Message ids of published events, in record order
    pub message_ids: Vec<String>,
    /// Rows written to the warehouse
    pub warehouse_rows: usize,
    /// First side-effect failure, if any
    pub error: Option<PipelineError>,
}

impl OutputReport {
    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }
}

/// Enabled sinks for one side-effect pass
pub(crate) struct OutputSinks<'a> {
    pub publisher: Option<&'a dyn Publisher>,
    pub validator: Option<&'a dyn EventValidator>,
    pub warehouse: Option<&'a dyn WarehouseSink>,
    pub event_tx: Option<&'a mpsc::Sender<WorkflowEvent>>,
}

impl OutputSinks<'_> {
    async fn emit(&self, index: usize, product_id: &str, state: RecordState) {
        if let Some(tx) = self.event_tx {
            let _ = tx
                .send(WorkflowEvent::RecordStateChanged {
                    index,
                    product_id: product_id.to_string(),
                    state,
                })
                .await;
        }
    }
}

/// Publish and persist a set of predicted records
///
/// `indices` holds the batch input index of each record.
pub(crate) async fn process_outputs(
    sinks: &OutputSinks<'_>,
    records: &[PredictedProductRecord],
    indices: &[usize],
) -> OutputReport {
    let mut report = OutputReport::default();
    if records.is_empty() || (sinks.publisher.is_none() && sinks.warehouse.is_none()) {
        return report;
    }

    let mut rows = Vec::new();
    for (record, index) in records.iter().zip(indices.iter().copied()) {
        let product_id = record.product_id();
        let event_id = Uuid::new_v4().simple().to_string();
        let event_ts = Utc::now();

        if let Some(publisher) = sinks.publisher {
            let payload = match build_event_payload(record, &event_id, &event_ts) {
                Ok(payload) => payload,
                Err(e) => {
                    report.error = Some(failure(product_id, ErrorType::PublishFailure, Stage::Publish, e));
                    return report;
                }
            };

            if let Some(validator) = sinks.validator {
                if let Err(e) = validator.validate(&payload) {
                    report.error = Some(failure(
                        product_id,
                        ErrorType::EventValidationError,
                        Stage::Publish,
                        e,
                    ));
                    return report;
                }
            }

            match publisher.publish(PREDICTIONS_TOPIC, &payload).await {
                Ok(message_id) => {
                    report.message_ids.push(message_id);
                    sinks.emit(index, product_id, RecordState::Published).await;
                }
                Err(e) => {
                    report.error = Some(failure(product_id, ErrorType::PublishFailure, Stage::Publish, e));
                    return report;
                }
            }
        }

        if sinks.warehouse.is_some() {
            match flatten_predicted_record(record, &event_id, &event_ts) {
                Ok(row) => rows.push(row),
                Err(e) => {
                    report.error = Some(failure(
                        product_id,
                        ErrorType::WarehouseFailure,
                        Stage::Warehouse,
                        e,
                    ));
                    return report;
                }
            }
        }
    }

    if let Some(warehouse) = sinks.warehouse {
        if let Err(e) = warehouse
            .write_table(WAREHOUSE_DATASET, WAREHOUSE_TABLE, &rows)
            .await
        {
            let first = records.first().map(|r| r.product_id()).unwrap_or_default();
            report.error = Some(failure(first, ErrorType::WarehouseFailure, Stage::Warehouse, e));
            return report;
        }
        report.warehouse_rows = rows.len();
        for (record, index) in records.iter().zip(indices.iter().copied()) {
            sinks.emit(index, record.product_id(), RecordState::Warehoused).await;
        }
    }

    tracing::debug!(
        published = report.message_ids.len(),
        warehouse_rows = report.warehouse_rows,
        "Processed outputs"
    );
    report
}

fn failure(
    product_id: &str,
    error_type: ErrorType,
    stage: Stage,
    cause: impl std::fmt::Display,
) -> PipelineError {
    tracing::error!(
        product_id = %product_id,
        error_type = %error_type,
        stage = %stage,
        "Output step failed: {}",
        cause
    );
    PipelineError::for_record(product_id, error_type, stage, cause.to_string())
}

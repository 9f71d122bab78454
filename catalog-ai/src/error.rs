//! Pipeline error taxonomy
//!
//! Every per-record failure is reported as a [`PipelineError`] carrying a
//! stable snake_case `error_type` tag and the stage that produced it. Batch
//! operations pair each error with the input index in [`IndexedError`].

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Stable error tags
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorType {
    MissingImageSource,
    MissingLocalFile,
    UnsupportedImageType,
    NetworkError,
    DecodeFailure,
    ValidationError,
    EnrichFailure,
    PredictFailure,
    Timeout,
    EventValidationError,
    PublishFailure,
    WarehouseFailure,
    RateLimited,
    BatchLimitExceeded,
    TextLimitExceeded,
}

impl ErrorType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorType::MissingImageSource => "missing_image_source",
            ErrorType::MissingLocalFile => "missing_local_file",
            ErrorType::UnsupportedImageType => "unsupported_image_type",
            ErrorType::NetworkError => "network_error",
            ErrorType::DecodeFailure => "decode_failure",
            ErrorType::ValidationError => "validation_error",
            ErrorType::EnrichFailure => "enrich_failure",
            ErrorType::PredictFailure => "predict_failure",
            ErrorType::Timeout => "timeout",
            ErrorType::EventValidationError => "event_validation_error",
            ErrorType::PublishFailure => "publish_failure",
            ErrorType::WarehouseFailure => "warehouse_failure",
            ErrorType::RateLimited => "rate_limited",
            ErrorType::BatchLimitExceeded => "batch_limit_exceeded",
            ErrorType::TextLimitExceeded => "text_limit_exceeded",
        }
    }
}

impl fmt::Display for ErrorType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Pipeline stage an error surfaced in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Ingest,
    Enrich,
    Predict,
    Publish,
    Warehouse,
    RequestValidation,
    RateLimit,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Ingest => "ingest",
            Stage::Enrich => "enrich",
            Stage::Predict => "predict",
            Stage::Publish => "publish",
            Stage::Warehouse => "warehouse",
            Stage::RequestValidation => "request_validation",
            Stage::RateLimit => "rate_limit",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Failure of one record (or of a whole request, when `product_id` is `None`)
#[derive(Debug, Clone, PartialEq, Error, Serialize, Deserialize)]
#[error("{stage} failed with {error_type}: {message}")]
pub struct PipelineError {
    pub product_id: Option<String>,
    pub error_type: ErrorType,
    pub message: String,
    pub stage: Stage,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl PipelineError {
    pub fn new(
        product_id: Option<String>,
        error_type: ErrorType,
        stage: Stage,
        message: impl Into<String>,
    ) -> Self {
        Self {
            product_id,
            error_type,
            message: message.into(),
            stage,
            details: None,
        }
    }

    /// Error attributed to a specific record
    pub fn for_record(
        product_id: &str,
        error_type: ErrorType,
        stage: Stage,
        message: impl Into<String>,
    ) -> Self {
        Self::new(Some(product_id.to_string()), error_type, stage, message)
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }
}

/// Batch error tagged with the input position it belongs to
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexedError {
    pub index: usize,
    #[serde(flatten)]
    pub error: PipelineError,
}

/// Image resolution failure
#[derive(Debug, Clone, PartialEq, Error, Serialize, Deserialize)]
#[error("{error_type} for {product_id}: {message}")]
pub struct IngestError {
    pub product_id: String,
    pub error_type: ErrorType,
    pub message: String,
}

impl IngestError {
    pub fn new(product_id: &str, error_type: ErrorType, message: impl Into<String>) -> Self {
        Self {
            product_id: product_id.to_string(),
            error_type,
            message: message.into(),
        }
    }
}

impl From<IngestError> for PipelineError {
    fn from(err: IngestError) -> Self {
        PipelineError::new(Some(err.product_id), err.error_type, Stage::Ingest, err.message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_error_serializes_with_snake_case_tags() {
        let err = PipelineError::for_record("p1", ErrorType::NetworkError, Stage::Ingest, "boom");
        let value = serde_json::to_value(IndexedError { index: 2, error: err }).unwrap();

        assert_eq!(value["index"], 2);
        assert_eq!(value["error_type"], "network_error");
        assert_eq!(value["stage"], "ingest");
        assert_eq!(value["product_id"], "p1");
        assert!(value.get("details").is_none());
    }

    #[test]
    fn test_display_mentions_stage_and_tag() {
        let err = PipelineError::for_record("p1", ErrorType::Timeout, Stage::Enrich, "slow")
            .with_details(json!({"elapsed_s": 2.0, "limit_s": 1.0}));
        assert_eq!(err.to_string(), "enrich failed with timeout: slow");
    }

    #[test]
    fn test_ingest_error_converts_to_ingest_stage() {
        let err: PipelineError =
            IngestError::new("p9", ErrorType::DecodeFailure, "bad bytes").into();
        assert_eq!(err.stage, Stage::Ingest);
        assert_eq!(err.error_type, ErrorType::DecodeFailure);
        assert_eq!(err.product_id.as_deref(), Some("p9"));
    }
}

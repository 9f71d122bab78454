//! Outbound event contract
//!
//! Events on the predictions topic must carry:
//!
//! | Field          | Shape                                                    |
//! |----------------|----------------------------------------------------------|
//! | `event_id`     | non-empty string                                         |
//! | `event_ts`     | RFC 3339 timestamp string                                |
//! | `source`       | non-empty string                                         |
//! | `version`      | `"v1"`                                                   |
//! | `product_id`   | non-empty string                                         |
//! | `predictions`  | object with `category`, `room_type`, `style`, `material` |
//! | `decision_log` | optional object                                          |
//!
//! Each prediction is `{value: string|object|null, confidence: 0..=1, extracted_by: string}`.

use super::SinkError;
use crate::types::AttributeKey;
use serde_json::Value;

/// Current event schema version
pub const EVENT_VERSION: &str = "v1";

/// Checks an event payload before publication
pub trait EventValidator: Send + Sync {
    fn validate(&self, payload: &Value) -> Result<(), SinkError>;
}

/// Validator for predicted-record events
#[derive(Debug, Clone, Copy, Default)]
pub struct PredictionEventValidator;

impl EventValidator for PredictionEventValidator {
    fn validate(&self, payload: &Value) -> Result<(), SinkError> {
        let event = payload
            .as_object()
            .ok_or_else(|| invalid("event must be an object"))?;

        for field in ["event_id", "source", "product_id"] {
            require_string(event.get(field), field)?;
        }

        let event_ts = require_string(event.get("event_ts"), "event_ts")?;
        chrono::DateTime::parse_from_rfc3339(event_ts)
            .map_err(|e| invalid(format!("event_ts is not RFC 3339: {}", e)))?;

        if event.get("version").and_then(Value::as_str) != Some(EVENT_VERSION) {
            return Err(invalid(format!("version must be \"{}\"", EVENT_VERSION)));
        }

        let predictions = event
            .get("predictions")
            .and_then(Value::as_object)
            .ok_or_else(|| invalid("predictions must be an object"))?;
        for key in AttributeKey::FUSED {
            let prediction = predictions
                .get(key.as_str())
                .and_then(Value::as_object)
                .ok_or_else(|| invalid(format!("predictions.{} is required", key)))?;

            match prediction.get("value") {
                Some(Value::String(_)) | Some(Value::Object(_)) | Some(Value::Null) => {}
                _ => return Err(invalid(format!("predictions.{}.value has the wrong type", key))),
            }
            let confidence = prediction
                .get("confidence")
                .and_then(Value::as_f64)
                .ok_or_else(|| invalid(format!("predictions.{}.confidence must be a number", key)))?;
            if !(0.0..=1.0).contains(&confidence) {
                return Err(invalid(format!(
                    "predictions.{}.confidence out of range: {}",
                    key, confidence
                )));
            }
            require_string(prediction.get("extracted_by"), "extracted_by")?;
        }

        match event.get("decision_log") {
            None | Some(Value::Object(_)) => Ok(()),
            Some(_) => Err(invalid("decision_log must be an object")),
        }
    }
}

fn invalid(message: impl Into<String>) -> SinkError {
    SinkError::InvalidEvent(message.into())
}

fn require_string<'a>(value: Option<&'a Value>, field: &str) -> Result<&'a str, SinkError> {
    match value.and_then(Value::as_str) {
        Some(text) if !text.is_empty() => Ok(text),
        _ => Err(invalid(format!("{} must be a non-empty string", field))),
    }
}

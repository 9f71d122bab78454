//! Predicted record → warehouse row / event payload
//!
//! Rows carry, per fused attribute key, `{key}_value` and `{key}_confidence`
//! plus `event_id`, `event_ts`, `product_id` and the full serialized record in
//! `raw_payload`. Events carry the fused predictions and the decision log.

use crate::sinks::contracts::EVENT_VERSION;
use crate::sinks::WarehouseRow;
use crate::types::{AttributeKey, PredictedProductRecord};
use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::{json, Value};

/// `source` field of published events
pub const EVENT_SOURCE: &str = "catalog-intel.pipeline";

fn timestamp(event_ts: &DateTime<Utc>) -> String {
    event_ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Flatten a predicted record into one warehouse row
pub fn flatten_predicted_record(
    record: &PredictedProductRecord,
    event_id: &str,
    event_ts: &DateTime<Utc>,
) -> Result<WarehouseRow, serde_json::Error> {
    let mut row = WarehouseRow::new();
    row.insert("event_id".to_string(), json!(event_id));
    row.insert("event_ts".to_string(), json!(timestamp(event_ts)));
    row.insert("product_id".to_string(), json!(record.product_id()));

    for key in AttributeKey::FUSED {
        let prediction = record.final_predictions.get(&key);
        let value = prediction
            .and_then(|p| p.value.as_ref())
            .map(|v| Value::String(v.display()))
            .unwrap_or(Value::Null);
        let confidence = prediction.map(|p| json!(p.confidence)).unwrap_or(Value::Null);
        row.insert(format!("{}_value", key), value);
        row.insert(format!("{}_confidence", key), confidence);
    }

    row.insert(
        "raw_payload".to_string(),
        Value::String(serde_json::to_string(record)?),
    );
    Ok(row)
}

/// Build the event published for a predicted record
pub fn build_event_payload(
    record: &PredictedProductRecord,
    event_id: &str,
    event_ts: &DateTime<Utc>,
) -> Result<Value, serde_json::Error> {
    let predictions: serde_json::Map<String, Value> = record
        .final_predictions
        .iter()
        .map(|(key, prediction)| {
            (
                key.to_string(),
                json!({
                    "value": prediction.value,
                    "confidence": prediction.confidence,
                    "extracted_by": prediction.produced_by,
                }),
            )
        })
        .collect();

    let mut payload = json!({
        "event_id": event_id,
        "event_ts": timestamp(event_ts),
        "source": EVENT_SOURCE,
        "version": EVENT_VERSION,
        "product_id": record.product_id(),
        "predictions": predictions,
    });
    if !record.decision_log.is_empty() {
        payload["decision_log"] = serde_json::to_value(&record.decision_log)?;
    }
    Ok(payload)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sinks::{EventValidator, PredictionEventValidator};
    use crate::types::*;
    use std::collections::BTreeMap;
    use std::path::PathBuf;

    fn predicted() -> PredictedProductRecord {
        let mut final_predictions = AttributeMap::new();
        let mut decision_log = BTreeMap::new();
        for key in AttributeKey::FUSED {
            final_predictions.insert(
                key,
                AttributePrediction::new(Some(AttributeValue::text("Sofa")), 0.85, "fusion", vec![]),
            );
            decision_log.insert(
                key,
                DecisionLogEntry {
                    sources_considered: vec!["text".into(), "vision".into()],
                    chosen_source: ChosenSource::Merged,
                    reason: "agreed".into(),
                    conflicts: vec![],
                    quality_adjusted: false,
                },
            );
        }
        final_predictions.insert(AttributeKey::Material, AttributePrediction::new(None, 0.3, "fusion", vec![]));

        PredictedProductRecord {
            enriched: EnrichedProductRecord {
                ingested: IngestedProductRecord {
                    record: RawProductRecord {
                        product_id: "p1".into(),
                        title: "Sofa".into(),
                        ..Default::default()
                    },
                    image_local_path: PathBuf::from("/tmp/p1.png"),
                },
                predictions: AttributeMap::new(),
            },
            final_predictions,
            decision_log,
        }
    }

    #[test]
    fn test_flatten_columns() {
        let ts = Utc::now();
        let row = flatten_predicted_record(&predicted(), "e1", &ts).unwrap();

        assert_eq!(row["event_id"], "e1");
        assert_eq!(row["product_id"], "p1");
        assert_eq!(row["category_value"], "Sofa");
        assert_eq!(row["category_confidence"], 0.85);
        assert_eq!(row["material_value"], Value::Null);
        assert_eq!(row.len(), 3 + 4 * 2 + 1);

        let raw: Value = serde_json::from_str(row["raw_payload"].as_str().unwrap()).unwrap();
        assert_eq!(raw["product_id"], "p1");
        assert!(raw.get("final_predictions").is_some());
    }

    #[test]
    fn test_event_payload_passes_contract() {
        let payload = build_event_payload(&predicted(), "e1", &Utc::now()).unwrap();
        assert_eq!(payload["source"], EVENT_SOURCE);
        assert_eq!(payload["predictions"]["room_type"]["extracted_by"], "fusion");
        assert!(payload["decision_log"]["style"].is_object());
        PredictionEventValidator.validate(&payload).unwrap();
    }
}

//! Core record and prediction types for catalog attribute enrichment
//!
//! Records move through the pipeline by widening:
//!
//! ```text
//! RawProductRecord ──ingest──► IngestedProductRecord ──enrich──► EnrichedProductRecord
//!                                                                     │
//!                                         PredictedProductRecord ◄────┘ predict
//! ```
//!
//! Each stage embeds the previous record unchanged (`#[serde(flatten)]`), so the
//! serialized form of a later record is a superset of the earlier one.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

// ============================================================================
// Attribute Keys
// ============================================================================

/// Attribute families produced by the pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttributeKey {
    Category,
    RoomType,
    Style,
    Material,
    Dimensions,
}

impl AttributeKey {
    /// Keys reconciled between text and vision
    pub const FUSED: [AttributeKey; 4] = [
        AttributeKey::Category,
        AttributeKey::RoomType,
        AttributeKey::Style,
        AttributeKey::Material,
    ];

    /// Every key present on an enriched record
    pub const ALL: [AttributeKey; 5] = [
        AttributeKey::Category,
        AttributeKey::RoomType,
        AttributeKey::Style,
        AttributeKey::Material,
        AttributeKey::Dimensions,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            AttributeKey::Category => "category",
            AttributeKey::RoomType => "room_type",
            AttributeKey::Style => "style",
            AttributeKey::Material => "material",
            AttributeKey::Dimensions => "dimensions",
        }
    }
}

impl fmt::Display for AttributeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Attribute map keyed in stable order
pub type AttributeMap = BTreeMap<AttributeKey, AttributePrediction>;

// ============================================================================
// Attribute Values
// ============================================================================

/// Literal value used when no producer could decide
pub const UNKNOWN_VALUE: &str = "unknown";

/// Structured product dimensions
///
/// Axes are recorded as written; no unit conversion is performed.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StructuredDimensions {
    pub width: Option<f64>,
    pub depth: Option<f64>,
    pub height: Option<f64>,
    pub unit: Option<String>,
}

impl StructuredDimensions {
    /// Number of axes with a value
    pub fn axis_count(&self) -> usize {
        [self.width, self.depth, self.height]
            .iter()
            .filter(|axis| axis.is_some())
            .count()
    }

    /// Canonical serialized form (stable field order)
    pub fn canonical(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }
}

/// Value of a single attribute prediction
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AttributeValue {
    Dimensions(StructuredDimensions),
    Text(String),
}

impl AttributeValue {
    pub fn text(value: impl Into<String>) -> Self {
        AttributeValue::Text(value.into())
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            AttributeValue::Text(value) => Some(value),
            AttributeValue::Dimensions(_) => None,
        }
    }

    /// Flat string rendering used by warehouse rows and conflict entries
    pub fn display(&self) -> String {
        match self {
            AttributeValue::Text(value) => value.clone(),
            AttributeValue::Dimensions(dimensions) => dimensions.canonical(),
        }
    }
}

// ============================================================================
// Predictions
// ============================================================================

/// One attribute prediction with provenance
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttributePrediction {
    pub value: Option<AttributeValue>,
    /// Confidence score (0.0-1.0)
    pub confidence: f64,
    /// Producer tag (e.g. "rules", "text_classifier", "fusion")
    pub produced_by: String,
    #[serde(default)]
    pub evidence: Vec<String>,
}

impl AttributePrediction {
    /// Create a prediction with confidence clamped to 0.0-1.0
    ///
    /// Non-finite confidences collapse to 0.0.
    pub fn new(
        value: Option<AttributeValue>,
        confidence: f64,
        produced_by: impl Into<String>,
        evidence: Vec<String>,
    ) -> Self {
        Self {
            value,
            confidence: clamp_confidence(confidence),
            produced_by: produced_by.into(),
            evidence,
        }
    }

    /// The literal "unknown" prediction
    pub fn unknown(confidence: f64, produced_by: impl Into<String>) -> Self {
        Self::new(
            Some(AttributeValue::text(UNKNOWN_VALUE)),
            confidence,
            produced_by,
            Vec::new(),
        )
    }

    /// Text value, if the prediction carries one
    pub fn text_value(&self) -> Option<&str> {
        self.value.as_ref().and_then(AttributeValue::as_text)
    }
}

/// Clamp a confidence into 0.0-1.0, mapping NaN and infinities to 0.0
pub fn clamp_confidence(confidence: f64) -> f64 {
    if confidence.is_finite() {
        confidence.clamp(0.0, 1.0)
    } else {
        0.0
    }
}

/// Which side a fused prediction came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChosenSource {
    Text,
    Vision,
    Merged,
}

/// Record of one fusion decision
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecisionLogEntry {
    pub sources_considered: Vec<String>,
    pub chosen_source: ChosenSource,
    pub reason: String,
    #[serde(default)]
    pub conflicts: Vec<String>,
    /// Vision confidence was reduced by an image-quality penalty
    #[serde(default)]
    pub quality_adjusted: bool,
}

// ============================================================================
// Vision Output
// ============================================================================

/// Image quality flags reported by a vision producer
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QualityFlags {
    #[serde(default)]
    pub blurry: bool,
    #[serde(default)]
    pub low_res: bool,
    #[serde(default)]
    pub dark: bool,
}

impl QualityFlags {
    /// Any flag set
    pub fn any(&self) -> bool {
        self.blurry || self.low_res || self.dark
    }
}

/// Ranked vision label
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VisionLabel {
    pub name: String,
    pub confidence: f64,
}

/// Raw output of a vision producer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VisionOutput {
    /// Labels ordered by rank; only the first is used for mapping
    pub labels: Vec<VisionLabel>,
    #[serde(default)]
    pub quality_flags: QualityFlags,
    pub trace_id: Option<String>,
}

// ============================================================================
// Product Records
// ============================================================================

/// Product record as received from the catalog feed
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawProductRecord {
    pub product_id: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub image_url: Option<String>,
    #[serde(default)]
    pub image_path: Option<String>,
    #[serde(default)]
    pub brand: Option<String>,
    #[serde(default)]
    pub sku: Option<String>,
    #[serde(default)]
    pub price: Option<f64>,
    #[serde(default)]
    pub currency: Option<String>,
}

impl RawProductRecord {
    /// Structural checks applied before ingestion
    pub fn validate(&self) -> Result<(), String> {
        if self.product_id.trim().is_empty() {
            return Err("product_id must not be empty".to_string());
        }
        if let Some(url) = self.image_url.as_deref() {
            if !(url.starts_with("http://") || url.starts_with("https://")) {
                return Err(format!("image_url must be an http(s) URL: {}", url));
            }
        }
        if let Some(price) = self.price {
            if !price.is_finite() || price < 0.0 {
                return Err(format!("price must be a non-negative number: {}", price));
            }
        }
        Ok(())
    }

    /// Characters of free text the record carries
    pub fn text_chars(&self) -> usize {
        self.title.chars().count()
            + self
                .description
                .as_deref()
                .map(|d| d.chars().count())
                .unwrap_or(0)
    }
}

/// Record whose image is guaranteed to be available locally
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IngestedProductRecord {
    #[serde(flatten)]
    pub record: RawProductRecord,
    pub image_local_path: PathBuf,
}

/// Ingested record plus text-derived attribute predictions
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnrichedProductRecord {
    #[serde(flatten)]
    pub ingested: IngestedProductRecord,
    pub predictions: AttributeMap,
}

impl EnrichedProductRecord {
    pub fn product_id(&self) -> &str {
        &self.ingested.record.product_id
    }
}

/// Enriched record plus fused predictions and their decision log
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictedProductRecord {
    #[serde(flatten)]
    pub enriched: EnrichedProductRecord,
    pub final_predictions: AttributeMap,
    pub decision_log: BTreeMap<AttributeKey, DecisionLogEntry>,
}

impl PredictedProductRecord {
    pub fn product_id(&self) -> &str {
        self.enriched.product_id()
    }
}

/// Pipeline input at any stage
///
/// Stages already completed are skipped: an ingested record is not re-resolved,
/// and an enriched record goes straight to prediction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RecordInput {
    Enriched(EnrichedProductRecord),
    Ingested(IngestedProductRecord),
    Raw(RawProductRecord),
}

impl RecordInput {
    pub fn raw(&self) -> &RawProductRecord {
        match self {
            RecordInput::Enriched(record) => &record.ingested.record,
            RecordInput::Ingested(record) => &record.record,
            RecordInput::Raw(record) => record,
        }
    }

    pub fn product_id(&self) -> &str {
        &self.raw().product_id
    }
}

impl From<RawProductRecord> for RecordInput {
    fn from(record: RawProductRecord) -> Self {
        RecordInput::Raw(record)
    }
}

impl From<IngestedProductRecord> for RecordInput {
    fn from(record: IngestedProductRecord) -> Self {
        RecordInput::Ingested(record)
    }
}

impl From<EnrichedProductRecord> for RecordInput {
    fn from(record: EnrichedProductRecord) -> Self {
        RecordInput::Enriched(record)
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_confidence_clamped() {
        let high = AttributePrediction::new(None, 1.7, "test", vec![]);
        let low = AttributePrediction::new(None, -0.2, "test", vec![]);
        let nan = AttributePrediction::new(None, f64::NAN, "test", vec![]);
        assert_eq!(high.confidence, 1.0);
        assert_eq!(low.confidence, 0.0);
        assert_eq!(nan.confidence, 0.0);
    }

    #[test]
    fn test_attribute_keys_serialize_snake_case() {
        let mut map = AttributeMap::new();
        map.insert(AttributeKey::RoomType, AttributePrediction::unknown(0.4, "t"));
        let value = serde_json::to_value(&map).unwrap();
        assert!(value.get("room_type").is_some());
    }

    #[test]
    fn test_dimensions_canonical_form() {
        let dims = StructuredDimensions {
            width: Some(80.0),
            depth: Some(60.0),
            height: None,
            unit: Some("in".to_string()),
        };
        assert_eq!(dims.axis_count(), 2);
        assert_eq!(
            dims.canonical(),
            r#"{"width":80.0,"depth":60.0,"height":null,"unit":"in"}"#
        );
    }

    #[test]
    fn test_record_input_detects_stage() {
        let raw = json!({"product_id": "p1", "title": "Sofa", "image_url": "https://x/y.jpg"});
        let ingested = json!({"product_id": "p1", "title": "Sofa", "image_local_path": "/tmp/p1.jpg"});

        assert!(matches!(
            serde_json::from_value::<RecordInput>(raw).unwrap(),
            RecordInput::Raw(_)
        ));
        assert!(matches!(
            serde_json::from_value::<RecordInput>(ingested).unwrap(),
            RecordInput::Ingested(_)
        ));
    }

    #[test]
    fn test_validate_rejects_blank_id_and_bad_url() {
        let mut record = RawProductRecord {
            product_id: " ".to_string(),
            ..Default::default()
        };
        assert!(record.validate().is_err());

        record.product_id = "p1".to_string();
        record.image_url = Some("ftp://host/a.jpg".to_string());
        assert!(record.validate().is_err());

        record.image_url = Some("https://host/a.jpg".to_string());
        assert!(record.validate().is_ok());
    }
}

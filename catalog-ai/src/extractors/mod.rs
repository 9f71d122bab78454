//! Attribute extractors
//!
//! Pure, synchronous producers of attribute predictions:
//! - `dimensions` - structured dimensions from free text
//! - `text_attributes` - category/room/style/material from free text
//! - `vision_attributes` - category/room from vision labels

pub mod dimensions;
pub mod text_attributes;
pub mod vision_attributes;

pub use dimensions::parse_dimensions;
pub use text_attributes::classify_text;
pub use vision_attributes::map_vision_labels;

use crate::types::{AttributeKey, AttributeMap, RawProductRecord};

/// Text-side predictions for a record: the four fused keys plus dimensions
pub fn enrich_text(record: &RawProductRecord) -> AttributeMap {
    let description = record.description.as_deref();
    let mut predictions = classify_text(&record.title, description);
    predictions.insert(
        AttributeKey::Dimensions,
        parse_dimensions(&record.title, description),
    );
    predictions
}

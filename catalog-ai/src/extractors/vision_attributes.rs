//! Vision label → attribute mapping
//!
//! Only the top-ranked label is consulted. Category and room type come from
//! fixed label tables; style and material cannot be read from a label and are
//! always "unknown".

use crate::types::{
    clamp_confidence, AttributeKey, AttributeMap, AttributePrediction, AttributeValue, VisionLabel,
};

/// Producer tag for vision predictions
pub const PRODUCER: &str = "vision_mapper";

/// Confidence of an unmapped or missing label
pub const UNKNOWN_CONFIDENCE: f64 = 0.35;

fn category_for(label: &str) -> Option<&'static str> {
    let value = match label {
        "sofa" => "Sofa",
        "sectional" => "Sectional",
        "bed" => "Bed",
        "table" => "Table",
        "chair" => "Chair",
        "lamp" => "Lighting",
        "dresser" => "Dresser",
        "rug" => "Rug",
        "desk" => "Desk",
        "bench" => "Bench",
        _ => return None,
    };
    Some(value)
}

fn room_type_for(label: &str) -> Option<&'static str> {
    let value = match label {
        "sofa" | "sectional" | "lamp" | "rug" => "Living Room",
        "bed" => "Bedroom",
        "table" => "Dining Room",
        "desk" => "Home Office",
        "bench" => "Entryway",
        _ => return None,
    };
    Some(value)
}

fn mapped(value: Option<&'static str>, label: &VisionLabel) -> AttributePrediction {
    match value {
        Some(value) => AttributePrediction::new(
            Some(AttributeValue::text(value)),
            clamp_confidence(label.confidence),
            PRODUCER,
            vec![format!("vision label: {} ({})", value, label.name)],
        ),
        None => AttributePrediction::unknown(UNKNOWN_CONFIDENCE, PRODUCER),
    }
}

/// Map ranked vision labels onto the four fused attribute keys
pub fn map_vision_labels(labels: &[VisionLabel]) -> AttributeMap {
    let mut predictions = AttributeMap::new();
    let top = labels.first();
    let normalized = top.map(|label| label.name.trim().to_lowercase());

    let (category, room_type) = match (top, normalized.as_deref()) {
        (Some(label), Some(name)) => (
            mapped(category_for(name), label),
            mapped(room_type_for(name), label),
        ),
        _ => (
            AttributePrediction::unknown(UNKNOWN_CONFIDENCE, PRODUCER),
            AttributePrediction::unknown(UNKNOWN_CONFIDENCE, PRODUCER),
        ),
    };

    predictions.insert(AttributeKey::Category, category);
    predictions.insert(AttributeKey::RoomType, room_type);
    predictions.insert(
        AttributeKey::Style,
        AttributePrediction::unknown(UNKNOWN_CONFIDENCE, PRODUCER),
    );
    predictions.insert(
        AttributeKey::Material,
        AttributePrediction::unknown(UNKNOWN_CONFIDENCE, PRODUCER),
    );
    predictions
}

#[cfg(test)]
mod tests {
    use super::*;

    fn label(name: &str, confidence: f64) -> VisionLabel {
        VisionLabel {
            name: name.to_string(),
            confidence,
        }
    }

    #[test]
    fn test_top_label_maps_category_and_room() {
        let map = map_vision_labels(&[label("Sofa", 0.82), label("bed", 0.99)]);

        let category = &map[&AttributeKey::Category];
        assert_eq!(category.text_value(), Some("Sofa"));
        assert_eq!(category.confidence, 0.82);
        assert_eq!(category.evidence, vec!["vision label: Sofa (Sofa)".to_string()]);

        let room = &map[&AttributeKey::RoomType];
        assert_eq!(room.text_value(), Some("Living Room"));
        assert_eq!(map[&AttributeKey::Style].text_value(), Some("unknown"));
        assert_eq!(map[&AttributeKey::Material].confidence, UNKNOWN_CONFIDENCE);
    }

    #[test]
    fn test_unmapped_label_is_unknown() {
        let map = map_vision_labels(&[label("toaster", 0.9)]);
        assert_eq!(map[&AttributeKey::Category].text_value(), Some("unknown"));
        assert_eq!(map[&AttributeKey::RoomType].confidence, UNKNOWN_CONFIDENCE);
    }

    #[test]
    fn test_rug_has_category_and_room() {
        let map = map_vision_labels(&[label("rug", 0.6)]);
        assert_eq!(map[&AttributeKey::Category].text_value(), Some("Rug"));
        assert_eq!(map[&AttributeKey::RoomType].text_value(), Some("Living Room"));
    }

    #[test]
    fn test_no_labels() {
        let map = map_vision_labels(&[]);
        assert_eq!(map.len(), 4);
        assert!(map
            .values()
            .all(|p| p.text_value() == Some("unknown") && p.confidence == UNKNOWN_CONFIDENCE));
    }
}

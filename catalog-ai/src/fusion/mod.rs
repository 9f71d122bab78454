//! Text/vision fusion
//!
//! Reconciles the text-derived and vision-derived predictions for each of the
//! four fused attribute keys into one final prediction plus a
//! [`DecisionLogEntry`] explaining the choice.
//!
//! # Decision order
//!
//! 1. **Agreement** - normalized values equal: text value, boosted confidence,
//!    merged evidence, `chosen_source = merged`
//! 2. **One-sided unknown** - one side is literally "unknown": take the other
//!    side verbatim
//! 3. **Decisive gap** - confidences differ by at least `decisive_gap`: take
//!    the higher side
//! 4. **Default** - take text with a reduced confidence
//!
//! Any image-quality flag discounts every vision confidence by
//! `quality_penalty` before arbitration. While discounted, agreement takes the
//! larger of the two confidences without the agreement boost, capped at
//! `confidence_ceiling - agreement_boost`, so a flagged image never scores as
//! high as a clean one.
//!
//! Fusion is total: missing keys are treated as "unknown" at 0.35, and every
//! key yields exactly one prediction and one log entry.

use crate::extractors::{text_attributes, vision_attributes};
use crate::types::{
    AttributeKey, AttributeMap, AttributePrediction, AttributeValue, ChosenSource,
    DecisionLogEntry, QualityFlags, UNKNOWN_VALUE,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Producer tag for predictions synthesised by fusion
pub const PRODUCER: &str = "fusion";

/// Confidence assumed for a side that produced nothing for a key
pub const MISSING_CONFIDENCE: f64 = 0.35;

pub const REASON_AGREED: &str = "Text and vision agreed on the attribute value.";
pub const REASON_TEXT_UNKNOWN: &str = "Vision provided a value while text was unknown.";
pub const REASON_VISION_UNKNOWN: &str = "Text provided a value while vision was unknown.";
pub const REASON_DECISIVE_GAP: &str = "One modality had substantially higher confidence.";
pub const REASON_SMALL_GAP: &str = "Small confidence gap; defaulting to text.";

const SOURCES: [&str; 2] = ["text", "vision"];

// ============================================================================
// Policy
// ============================================================================

/// Tunable fusion constants
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FusionPolicy {
    /// Subtracted from vision confidences when any quality flag is set
    pub quality_penalty: f64,
    /// Added to the stronger confidence when both sides agree
    pub agreement_boost: f64,
    /// Upper bound for agreement confidence
    pub confidence_ceiling: f64,
    /// Minimum confidence difference for the higher side to win outright
    pub decisive_gap: f64,
    /// Subtracted from text confidence when defaulting to text
    pub small_gap_penalty: f64,
}

impl Default for FusionPolicy {
    fn default() -> Self {
        Self {
            quality_penalty: 0.15,
            agreement_boost: 0.05,
            confidence_ceiling: 0.98,
            decisive_gap: 0.20,
            small_gap_penalty: 0.10,
        }
    }
}

/// Fused predictions and the matching decision log
///
/// Both maps always hold exactly the keys in [`AttributeKey::FUSED`].
#[derive(Debug, Clone, PartialEq)]
pub struct FusionOutcome {
    pub predictions: AttributeMap,
    pub decision_log: BTreeMap<AttributeKey, DecisionLogEntry>,
}

// ============================================================================
// Fusion
// ============================================================================

/// Fuse text and vision predictions under the default policy
pub fn fuse(text: &AttributeMap, vision: &AttributeMap, flags: &QualityFlags) -> FusionOutcome {
    fuse_with_policy(text, vision, flags, &FusionPolicy::default())
}

/// Fuse text and vision predictions
pub fn fuse_with_policy(
    text: &AttributeMap,
    vision: &AttributeMap,
    flags: &QualityFlags,
    policy: &FusionPolicy,
) -> FusionOutcome {
    let quality_adjusted = flags.any();
    let mut predictions = AttributeMap::new();
    let mut decision_log = BTreeMap::new();

    for key in AttributeKey::FUSED {
        let text_side = text.get(&key).cloned().unwrap_or_else(|| {
            AttributePrediction::unknown(MISSING_CONFIDENCE, text_attributes::PRODUCER)
        });
        let mut vision_side = vision.get(&key).cloned().unwrap_or_else(|| {
            AttributePrediction::unknown(MISSING_CONFIDENCE, vision_attributes::PRODUCER)
        });
        if quality_adjusted {
            vision_side.confidence = (vision_side.confidence - policy.quality_penalty).max(0.0);
        }

        let (prediction, mut entry) = fuse_attribute(text_side, vision_side, quality_adjusted, policy);
        entry.quality_adjusted = quality_adjusted;
        predictions.insert(key, prediction);
        decision_log.insert(key, entry);
    }

    FusionOutcome {
        predictions,
        decision_log,
    }
}

fn fuse_attribute(
    text: AttributePrediction,
    vision: AttributePrediction,
    quality_adjusted: bool,
    policy: &FusionPolicy,
) -> (AttributePrediction, DecisionLogEntry) {
    let text_value = normalize(text.value.as_ref());
    let vision_value = normalize(vision.value.as_ref());
    let text_display = display(text.value.as_ref());
    let vision_display = display(vision.value.as_ref());

    if text_value.is_some() && text_value == vision_value {
        let stronger = text.confidence.max(vision.confidence);
        let confidence = if quality_adjusted {
            stronger.min(policy.confidence_ceiling - policy.agreement_boost)
        } else {
            (stronger + policy.agreement_boost).min(policy.confidence_ceiling)
        };
        let mut evidence = text.evidence.clone();
        for item in vision.evidence {
            if !evidence.contains(&item) {
                evidence.push(item);
            }
        }
        let prediction = AttributePrediction::new(text.value, confidence, PRODUCER, evidence);
        return (prediction, entry(ChosenSource::Merged, REASON_AGREED, Vec::new()));
    }

    let text_unknown = text_value.as_deref() == Some(UNKNOWN_VALUE);
    let vision_unknown = vision_value.as_deref() == Some(UNKNOWN_VALUE);

    if text_unknown && !vision_unknown {
        let conflicts = conflict("text", &text_display).into_iter().collect();
        return (vision, entry(ChosenSource::Vision, REASON_TEXT_UNKNOWN, conflicts));
    }

    if vision_unknown && !text_unknown {
        let conflicts = conflict("vision", &vision_display).into_iter().collect();
        return (text, entry(ChosenSource::Text, REASON_VISION_UNKNOWN, conflicts));
    }

    let both: Vec<String> = conflict("text", &text_display)
        .into_iter()
        .chain(conflict("vision", &vision_display))
        .collect();

    let gap = text.confidence - vision.confidence;
    if gap.abs() >= policy.decisive_gap {
        let (winner, chosen) = if gap > 0.0 {
            (text, ChosenSource::Text)
        } else {
            (vision, ChosenSource::Vision)
        };
        let prediction =
            AttributePrediction::new(winner.value, winner.confidence, PRODUCER, winner.evidence);
        return (prediction, entry(chosen, REASON_DECISIVE_GAP, both));
    }

    let confidence = (text.confidence - policy.small_gap_penalty).max(0.0);
    let prediction = AttributePrediction::new(text.value, confidence, PRODUCER, text.evidence);
    (prediction, entry(ChosenSource::Text, REASON_SMALL_GAP, both))
}

fn entry(chosen_source: ChosenSource, reason: &str, conflicts: Vec<String>) -> DecisionLogEntry {
    DecisionLogEntry {
        sources_considered: SOURCES.iter().map(|s| s.to_string()).collect(),
        chosen_source,
        reason: reason.to_string(),
        conflicts,
        quality_adjusted: false,
    }
}

/// Case/whitespace-insensitive comparison key; non-text and blank values never compare
fn normalize(value: Option<&AttributeValue>) -> Option<String> {
    value
        .and_then(AttributeValue::as_text)
        .map(|text| text.trim().to_lowercase())
        .filter(|text| !text.is_empty())
}

fn display(value: Option<&AttributeValue>) -> String {
    value.map(AttributeValue::display).unwrap_or_default()
}

/// `source=value`, omitted when the value renders empty
fn conflict(source: &str, display: &str) -> Option<String> {
    if display.is_empty() {
        None
    } else {
        Some(format!("{}={}", source, display))
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn pred(value: &str, confidence: f64, producer: &str) -> AttributePrediction {
        AttributePrediction::new(
            Some(AttributeValue::text(value)),
            confidence,
            producer,
            vec![format!("{} evidence", producer)],
        )
    }

    fn single(key: AttributeKey, prediction: AttributePrediction) -> AttributeMap {
        let mut map = AttributeMap::new();
        map.insert(key, prediction);
        map
    }

    fn fuse_category(
        text: (&str, f64),
        vision: (&str, f64),
        flags: QualityFlags,
    ) -> (AttributePrediction, DecisionLogEntry) {
        let outcome = fuse(
            &single(AttributeKey::Category, pred(text.0, text.1, "text")),
            &single(AttributeKey::Category, pred(vision.0, vision.1, "vision")),
            &flags,
        );
        (
            outcome.predictions[&AttributeKey::Category].clone(),
            outcome.decision_log[&AttributeKey::Category].clone(),
        )
    }

    #[test]
    fn test_agreement_boosts_and_merges() {
        let (prediction, log) = fuse_category(("Sofa", 0.8), ("sofa ", 0.7), QualityFlags::default());
        assert_eq!(prediction.text_value(), Some("Sofa"));
        assert!(prediction.confidence > 0.8 && prediction.confidence <= 0.98);
        assert_eq!(prediction.produced_by, PRODUCER);
        assert_eq!(prediction.evidence.len(), 2);
        assert_eq!(log.chosen_source, ChosenSource::Merged);
        assert!(log.conflicts.is_empty());
        assert!(!log.quality_adjusted);
    }

    #[test]
    fn test_agreement_capped() {
        let (prediction, _) = fuse_category(("Sofa", 0.97), ("Sofa", 0.9), QualityFlags::default());
        assert_eq!(prediction.confidence, 0.98);
    }

    #[test]
    fn test_one_sided_unknown_takes_vision_verbatim() {
        let (prediction, log) =
            fuse_category(("unknown", 0.35), ("Sofa", 0.7), QualityFlags::default());
        assert_eq!(prediction.text_value(), Some("Sofa"));
        assert_eq!(prediction.produced_by, "vision");
        assert_eq!(log.chosen_source, ChosenSource::Vision);
        assert_eq!(log.reason, REASON_TEXT_UNKNOWN);
        assert_eq!(log.conflicts, vec!["text=unknown".to_string()]);
    }

    #[test]
    fn test_one_sided_unknown_takes_text_verbatim() {
        let (prediction, log) =
            fuse_category(("Chair", 0.75), ("unknown", 0.35), QualityFlags::default());
        assert_eq!(prediction.text_value(), Some("Chair"));
        assert_eq!(prediction.confidence, 0.75);
        assert_eq!(log.chosen_source, ChosenSource::Text);
        assert_eq!(log.conflicts, vec!["vision=unknown".to_string()]);
    }

    #[test]
    fn test_large_gap_prefers_vision() {
        let (prediction, log) = fuse_category(("Chair", 0.5), ("Sofa", 0.8), QualityFlags::default());
        assert_eq!(prediction.text_value(), Some("Sofa"));
        assert_eq!(log.chosen_source, ChosenSource::Vision);
        assert_eq!(log.reason, REASON_DECISIVE_GAP);
        assert_eq!(
            log.conflicts,
            vec!["text=Chair".to_string(), "vision=Sofa".to_string()]
        );
    }

    #[test]
    fn test_small_gap_defaults_to_text() {
        let (prediction, log) =
            fuse_category(("Bench", 0.6), ("Sofa", 0.55), QualityFlags::default());
        assert_eq!(prediction.text_value(), Some("Bench"));
        assert_eq!(prediction.confidence, 0.5);
        assert_eq!(log.chosen_source, ChosenSource::Text);
        assert_eq!(log.reason, REASON_SMALL_GAP);
        assert_eq!(log.conflicts.len(), 2);
    }

    #[test]
    fn test_quality_flag_lowers_agreement_confidence() {
        let clean = fuse_category(("Sofa", 0.8), ("Sofa", 0.7), QualityFlags::default()).0;
        let blurry = fuse_category(
            ("Sofa", 0.8),
            ("Sofa", 0.7),
            QualityFlags {
                blurry: true,
                ..Default::default()
            },
        );
        assert!(blurry.0.confidence < clean.confidence);
        assert!(blurry.1.quality_adjusted);
        assert_eq!(blurry.1.reason, REASON_AGREED);
    }

    #[test]
    fn test_quality_flag_lowers_agreement_even_at_ceiling() {
        let clean = fuse_category(("Sofa", 0.98), ("Sofa", 0.98), QualityFlags::default()).0;
        let dark = fuse_category(
            ("Sofa", 0.98),
            ("Sofa", 0.98),
            QualityFlags {
                dark: true,
                ..Default::default()
            },
        )
        .0;
        assert!(dark.confidence < clean.confidence);
    }

    #[test]
    fn test_quality_penalty_can_flip_gap_decision() {
        // 0.7 vs 0.6 is a small gap; with the penalty vision drops to 0.45
        let flags = QualityFlags {
            low_res: true,
            ..Default::default()
        };
        let (prediction, log) = fuse_category(("Chair", 0.7), ("Sofa", 0.6), flags);
        assert_eq!(prediction.text_value(), Some("Chair"));
        assert_eq!(prediction.confidence, 0.7);
        assert_eq!(log.reason, REASON_DECISIVE_GAP);
    }

    #[test]
    fn test_total_over_empty_inputs() {
        let outcome = fuse(&AttributeMap::new(), &AttributeMap::new(), &QualityFlags::default());
        assert_eq!(outcome.predictions.len(), 4);
        assert_eq!(outcome.decision_log.len(), 4);
        for key in AttributeKey::FUSED {
            assert!(outcome.predictions.contains_key(&key));
            assert!(outcome.decision_log.contains_key(&key));
        }
    }

    #[test]
    fn test_blank_values_never_agree() {
        let (prediction, log) = fuse_category(("", 0.6), (" ", 0.55), QualityFlags::default());
        assert_eq!(log.chosen_source, ChosenSource::Text);
        assert_eq!(log.reason, REASON_SMALL_GAP);
        assert_eq!(prediction.confidence, 0.5);
    }

    #[test]
    fn test_null_values_never_agree_or_conflict() {
        let text = single(
            AttributeKey::Style,
            AttributePrediction::new(None, 0.6, "text", vec![]),
        );
        let vision = single(
            AttributeKey::Style,
            AttributePrediction::new(None, 0.55, "vision", vec![]),
        );
        let outcome = fuse(&text, &vision, &QualityFlags::default());
        let log = &outcome.decision_log[&AttributeKey::Style];
        assert_eq!(log.chosen_source, ChosenSource::Text);
        assert!(log.conflicts.is_empty());
    }

    #[test]
    fn test_dimension_values_render_canonically_in_conflicts() {
        let dims = crate::types::StructuredDimensions {
            width: Some(1.0),
            depth: Some(2.0),
            height: None,
            unit: None,
        };
        let text = single(
            AttributeKey::Material,
            AttributePrediction::new(Some(AttributeValue::Dimensions(dims.clone())), 0.6, "t", vec![]),
        );
        let vision = single(AttributeKey::Material, pred("Oak", 0.55, "vision"));
        let outcome = fuse(&text, &vision, &QualityFlags::default());
        let log = &outcome.decision_log[&AttributeKey::Material];
        assert_eq!(log.conflicts[0], format!("text={}", dims.canonical()));
    }

    #[test]
    fn test_custom_policy() {
        let policy = FusionPolicy {
            decisive_gap: 0.5,
            ..Default::default()
        };
        let outcome = fuse_with_policy(
            &single(AttributeKey::Category, pred("Chair", 0.5, "text")),
            &single(AttributeKey::Category, pred("Sofa", 0.8, "vision")),
            &QualityFlags::default(),
            &policy,
        );
        assert_eq!(
            outcome.decision_log[&AttributeKey::Category].reason,
            REASON_SMALL_GAP
        );
    }
}

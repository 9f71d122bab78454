//! Dimension parsing from free-text product copy
//!
//! Two notations are recognised:
//!
//! - **Axis form:** `80 x 60 x 35 in`, `200x150x90 cm`, `72"W x 38"D x 30"H`
//! - **Label form:** `W: 55 cm, D: 30 cm, H: 18 cm`, `Width 30 in x Depth 20 in`
//!
//! Every match in every source becomes a candidate scored by
//! `axes * 10 + (unit ? 1 : 0)`. The best candidate wins; ties go to the
//! earlier source (description before title), then the earlier position.
//! Units are recorded as written, never converted.

use crate::types::{AttributePrediction, AttributeValue, StructuredDimensions};
use once_cell::sync::Lazy;
use regex::{Captures, Regex};

/// Producer tag for dimension predictions
pub const PRODUCER: &str = "rules";

/// Confidence when no dimensions were found
pub const NOT_FOUND_CONFIDENCE: f64 = 0.2;

const NUMBER: &str = r"[0-9]+(?:\.[0-9]+)?";
const UNIT: &str = r"(?:inches|inch|in|feet|foot|ft|cm|mm|m)\b";

static AXIS_PATTERN: Lazy<Regex> = Lazy::new(|| {
    let pattern = format!(
        concat!(
            r"(?i)(?P<w>{num})\s*(?P<unit_w>{unit})?\s*(?:[",
            "\"\u{201d}",
            r"]?\s*(?:w|width))?",
            r"\s*(?:x|×)\s*",
            r"(?P<d>{num})\s*(?P<unit_d>{unit})?\s*(?:[",
            "\"\u{201d}",
            r"]?\s*(?:d|depth))?",
            r"(?:\s*(?:x|×)\s*(?P<h>{num})\s*(?P<unit_h>{unit})?\s*(?:[",
            "\"\u{201d}",
            r"]?\s*(?:h|height))?)?",
            r"\s*(?P<trailing>{unit})?"
        ),
        num = NUMBER,
        unit = UNIT
    );
    Regex::new(&pattern).expect("axis dimension pattern is valid")
});

static LABEL_PATTERN: Lazy<Regex> = Lazy::new(|| {
    let pattern = format!(
        r"(?i)\b(?P<label>width|depth|height|w|d|h)\s*(?:[:=]\s*)?(?P<value>{num})(?:\s*(?P<unit>{unit}))?",
        num = NUMBER,
        unit = UNIT
    );
    Regex::new(&pattern).expect("labelled dimension pattern is valid")
});

// ============================================================================
// Candidates
// ============================================================================

#[derive(Debug, Clone)]
struct Candidate {
    dimensions: StructuredDimensions,
    evidence: String,
    score: usize,
    source_index: usize,
    position: usize,
}

impl Candidate {
    fn new(
        mut dimensions: StructuredDimensions,
        evidence: &str,
        source_index: usize,
        position: usize,
    ) -> Option<Self> {
        let evidence = evidence.trim();
        if dimensions.axis_count() == 0 || evidence.is_empty() {
            return None;
        }
        let all_zero = [dimensions.width, dimensions.depth, dimensions.height]
            .iter()
            .flatten()
            .all(|axis| *axis == 0.0);
        if all_zero {
            return None;
        }
        if dimensions.unit.is_none() {
            dimensions.unit = infer_unit(evidence);
        }
        let score = dimensions.axis_count() * 10 + usize::from(dimensions.unit.is_some());
        Some(Self {
            dimensions,
            evidence: evidence.to_string(),
            score,
            source_index,
            position,
        })
    }

    /// Strictly better: higher score, then earlier source, then earlier position
    fn beats(&self, other: &Candidate) -> bool {
        (self.score, other.source_index, other.position)
            > (other.score, self.source_index, self.position)
    }
}

/// Normalise a unit token as written ("inches" → "in", "feet" → "ft")
fn normalize_unit(unit: &str) -> String {
    match unit.to_lowercase().as_str() {
        "inch" | "inches" => "in".to_string(),
        "feet" | "foot" => "ft".to_string(),
        other => other.to_string(),
    }
}

/// Quote marks imply inches, apostrophes imply feet
fn infer_unit(evidence: &str) -> Option<String> {
    if evidence.contains('"') || evidence.contains('\u{201d}') {
        Some("in".to_string())
    } else if evidence.contains('\'') || evidence.contains('\u{2019}') {
        Some("ft".to_string())
    } else {
        None
    }
}

fn parse_axis(caps: &Captures<'_>, name: &str) -> Option<f64> {
    caps.name(name).and_then(|m| m.as_str().parse::<f64>().ok())
}

fn axis_candidates(text: &str, source_index: usize) -> Vec<Candidate> {
    AXIS_PATTERN
        .captures_iter(text)
        .filter_map(|caps| {
            let whole = caps.get(0)?;
            // Trailing unit wins over per-axis units
            let unit = ["trailing", "unit_w", "unit_d", "unit_h"]
                .iter()
                .find_map(|name| caps.name(name))
                .map(|m| normalize_unit(m.as_str()));
            let dimensions = StructuredDimensions {
                width: parse_axis(&caps, "w"),
                depth: parse_axis(&caps, "d"),
                height: parse_axis(&caps, "h"),
                unit,
            };
            Candidate::new(dimensions, whole.as_str(), source_index, whole.start())
        })
        .collect()
}

#[derive(Default)]
struct LabelGroup {
    dimensions: StructuredDimensions,
    start: Option<usize>,
    end: usize,
}

impl LabelGroup {
    fn has_axis(&self, axis: char) -> bool {
        match axis {
            'w' => self.dimensions.width.is_some(),
            'd' => self.dimensions.depth.is_some(),
            _ => self.dimensions.height.is_some(),
        }
    }

    fn assign(&mut self, axis: char, value: f64) {
        match axis {
            'w' => self.dimensions.width = Some(value),
            'd' => self.dimensions.depth = Some(value),
            _ => self.dimensions.height = Some(value),
        }
    }

    /// Groups with fewer than two axes are discarded
    fn finish(self, text: &str, end: usize, source_index: usize) -> Option<Candidate> {
        let start = self.start?;
        if self.dimensions.axis_count() < 2 {
            return None;
        }
        let evidence = text.get(start..end)?;
        Candidate::new(self.dimensions, evidence, source_index, start)
    }
}

/// Consecutive labelled values form one group; a repeated axis starts a new group.
fn label_candidates(text: &str, source_index: usize) -> Vec<Candidate> {
    let mut candidates = Vec::new();
    let mut group = LabelGroup::default();

    for caps in LABEL_PATTERN.captures_iter(text) {
        let (Some(whole), Some(label), Some(value)) = (
            caps.get(0),
            caps.name("label"),
            parse_axis(&caps, "value"),
        ) else {
            continue;
        };
        let axis = label
            .as_str()
            .chars()
            .next()
            .map(|c| c.to_ascii_lowercase())
            .unwrap_or('w');

        if group.has_axis(axis) {
            let finished = std::mem::take(&mut group);
            candidates.extend(finished.finish(text, whole.start(), source_index));
        }

        if group.start.is_none() {
            group.start = Some(whole.start());
        }
        group.assign(axis, value);
        if group.dimensions.unit.is_none() {
            group.dimensions.unit = caps.name("unit").map(|m| normalize_unit(m.as_str()));
        }
        group.end = whole.end();
    }

    let end = group.end;
    candidates.extend(group.finish(text, end, source_index));
    candidates
}

// ============================================================================
// Extraction
// ============================================================================

/// Parse dimensions from the description and title
///
/// Never fails: when nothing is found the prediction has no value,
/// confidence 0.2 and no evidence.
pub fn parse_dimensions(title: &str, description: Option<&str>) -> AttributePrediction {
    let sources = [description.unwrap_or(""), title];

    let mut best: Option<Candidate> = None;
    for (source_index, text) in sources.iter().enumerate() {
        if text.is_empty() {
            continue;
        }
        let candidates = axis_candidates(text, source_index)
            .into_iter()
            .chain(label_candidates(text, source_index));
        for candidate in candidates {
            let replace = match &best {
                Some(current) => candidate.beats(current),
                None => true,
            };
            if replace {
                best = Some(candidate);
            }
        }
    }

    match best {
        Some(candidate) => {
            let confidence = match candidate.dimensions.axis_count() {
                3 => 0.95,
                2 => 0.85,
                _ => 0.75,
            };
            AttributePrediction::new(
                Some(AttributeValue::Dimensions(candidate.dimensions)),
                confidence,
                PRODUCER,
                vec![candidate.evidence],
            )
        }
        None => AttributePrediction::new(None, NOT_FOUND_CONFIDENCE, PRODUCER, Vec::new()),
    }
}

// ============================================================================
// Tests
// ============================================================================

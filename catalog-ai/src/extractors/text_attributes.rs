//! Rule-based text attribute classification
//!
//! Each attribute family has an ordered phrase table and an ordered keyword
//! table. Phrases are plain substring matches and are tried first; keywords
//! must match on word boundaries. The first entry that matches wins, so table
//! order is significant.
//!
//! Matching is ASCII case-insensitive over the title and description. Evidence
//! is a snippet of up to 35 characters either side of the first occurrence,
//! searched in the description first, then the title.

use crate::types::{AttributeKey, AttributeMap, AttributePrediction, AttributeValue};

/// Producer tag for text predictions
pub const PRODUCER: &str = "text_classifier";

/// Confidence of a phrase match
pub const PHRASE_CONFIDENCE: f64 = 0.9;
/// Confidence of a keyword match
pub const KEYWORD_CONFIDENCE: f64 = 0.75;
/// Confidence of the fallback "unknown" prediction
pub const UNKNOWN_CONFIDENCE: f64 = 0.4;

const SNIPPET_RADIUS: usize = 35;

// ============================================================================
// Vocabulary
// ============================================================================

type Table = &'static [(&'static str, &'static str)];

struct Vocabulary {
    phrases: Table,
    keywords: Table,
}

const CATEGORY: Vocabulary = Vocabulary {
    phrases: &[
        ("sectional sofa", "Sectional"),
        ("dining table", "Table"),
        ("coffee table", "Coffee Table"),
        ("accent chair", "Chair"),
        ("bar stool", "Stool"),
    ],
    keywords: &[
        ("sofa", "Sofa"),
        ("couch", "Sofa"),
        ("loveseat", "Sofa"),
        ("sectional", "Sectional"),
        ("chair", "Chair"),
        ("stool", "Stool"),
        ("bench", "Bench"),
        ("table", "Table"),
        ("desk", "Desk"),
        ("lamp", "Lighting"),
        ("bed", "Bed"),
        ("dresser", "Dresser"),
    ],
};

const ROOM_TYPE: Vocabulary = Vocabulary {
    phrases: &[
        ("living room", "Living Room"),
        ("dining room", "Dining Room"),
        ("home office", "Home Office"),
        ("entryway", "Entryway"),
        ("kids room", "Kids Room"),
    ],
    keywords: &[
        ("bedroom", "Bedroom"),
        ("dining", "Dining Room"),
        ("office", "Home Office"),
        ("outdoor", "Outdoor"),
        ("patio", "Outdoor"),
        ("hallway", "Entryway"),
        ("nursery", "Kids Room"),
    ],
};

const STYLE: Vocabulary = Vocabulary {
    phrases: &[
        ("mid-century modern", "Mid-Century"),
        ("mid-century", "Mid-Century"),
        ("art deco", "Art Deco"),
        ("farmhouse chic", "Farmhouse"),
    ],
    keywords: &[
        ("mid-century", "Mid-Century"),
        ("midcentury", "Mid-Century"),
        ("modern", "Modern"),
        ("rustic", "Rustic"),
        ("industrial", "Industrial"),
        ("boho", "Bohemian"),
        ("bohemian", "Bohemian"),
        ("scandi", "Scandinavian"),
        ("scandinavian", "Scandinavian"),
        ("farmhouse", "Farmhouse"),
        ("traditional", "Traditional"),
        ("minimalist", "Minimalist"),
        ("coastal", "Coastal"),
    ],
};

const MATERIAL: Vocabulary = Vocabulary {
    phrases: &[("solid wood", "Wood"), ("top-grain leather", "Leather")],
    keywords: &[
        ("walnut", "Walnut"),
        ("oak", "Oak"),
        ("pine", "Pine"),
        ("leather", "Leather"),
        ("linen", "Linen"),
        ("velvet", "Velvet"),
        ("boucle", "Boucle"),
        ("metal", "Metal"),
        ("steel", "Metal"),
        ("iron", "Metal"),
        ("aluminum", "Metal"),
        ("glass", "Glass"),
        ("rattan", "Rattan"),
        ("bamboo", "Bamboo"),
        ("marble", "Marble"),
        ("stone", "Stone"),
    ],
};

fn vocabulary(key: AttributeKey) -> Option<&'static Vocabulary> {
    match key {
        AttributeKey::Category => Some(&CATEGORY),
        AttributeKey::RoomType => Some(&ROOM_TYPE),
        AttributeKey::Style => Some(&STYLE),
        AttributeKey::Material => Some(&MATERIAL),
        AttributeKey::Dimensions => None,
    }
}

// ============================================================================
// Matching
// ============================================================================

fn is_word_byte(byte: u8) -> bool {
    byte.is_ascii_alphanumeric() || byte == b'_'
}

/// Byte offset of the first occurrence of `needle` in `haystack`
///
/// With `whole_word`, occurrences touching a word character on either side are
/// skipped.
fn find_match(haystack: &str, needle: &str, whole_word: bool) -> Option<usize> {
    if needle.is_empty() {
        return None;
    }
    let bytes = haystack.as_bytes();
    haystack.match_indices(needle).map(|(idx, _)| idx).find(|&idx| {
        if !whole_word {
            return true;
        }
        let end = idx + needle.len();
        let clear_before = idx == 0 || !is_word_byte(bytes[idx - 1]);
        let clear_after = end >= bytes.len() || !is_word_byte(bytes[end]);
        clear_before && clear_after
    })
}

/// Up to `SNIPPET_RADIUS` characters either side of a match, trimmed
fn snippet(source: &str, start: usize, len: usize) -> String {
    let end = start + len;
    let window_start = source[..start]
        .char_indices()
        .rev()
        .take(SNIPPET_RADIUS)
        .last()
        .map(|(idx, _)| idx)
        .unwrap_or(start);
    let window_end = source[end..]
        .char_indices()
        .nth(SNIPPET_RADIUS)
        .map(|(idx, _)| end + idx)
        .unwrap_or(source.len());
    source[window_start..window_end].trim().to_string()
}

/// Classify one attribute family against the given sources
///
/// `sources` are searched in order; pass the description before the title.
fn classify(key: AttributeKey, sources: &[&str]) -> AttributePrediction {
    let Some(vocab) = vocabulary(key) else {
        return AttributePrediction::unknown(UNKNOWN_CONFIDENCE, PRODUCER);
    };
    let lowered: Vec<(&str, String)> = sources
        .iter()
        .filter(|s| !s.is_empty())
        .map(|s| (*s, s.to_ascii_lowercase()))
        .collect();

    let passes = [
        (vocab.phrases, false, PHRASE_CONFIDENCE),
        (vocab.keywords, true, KEYWORD_CONFIDENCE),
    ];
    for (table, whole_word, confidence) in passes {
        for (needle, value) in table.iter() {
            let hit = lowered.iter().find_map(|(original, lower)| {
                find_match(lower, needle, whole_word).map(|idx| snippet(original, idx, needle.len()))
            });
            if let Some(evidence) = hit {
                let evidence = if evidence.is_empty() {
                    needle.to_string()
                } else {
                    evidence
                };
                return AttributePrediction::new(
                    Some(AttributeValue::text(*value)),
                    confidence,
                    PRODUCER,
                    vec![evidence],
                );
            }
        }
    }

    AttributePrediction::unknown(UNKNOWN_CONFIDENCE, PRODUCER)
}

/// Classify category, room type, style and material from product copy
///
/// Always returns exactly the four fused keys.
pub fn classify_text(title: &str, description: Option<&str>) -> AttributeMap {
    let sources = [description.unwrap_or(""), title];
    AttributeKey::FUSED
        .iter()
        .map(|key| (*key, classify(*key, &sources)))
        .collect()
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn value_of(map: &AttributeMap, key: AttributeKey) -> &str {
        map[&key].text_value().unwrap()
    }

    #[test]
    fn test_phrases_beat_keywords() {
        let map = classify_text(
            "Harbor Sectional Sofa",
            Some("A mid-century modern sectional sofa for the living room."),
        );
        assert_eq!(value_of(&map, AttributeKey::Category), "Sectional");
        assert_eq!(map[&AttributeKey::Category].confidence, PHRASE_CONFIDENCE);
        assert_eq!(value_of(&map, AttributeKey::Style), "Mid-Century");
        assert_eq!(value_of(&map, AttributeKey::RoomType), "Living Room");
    }

    #[test]
    fn test_keyword_match_confidence_and_evidence() {
        let map = classify_text("Oak Desk", None);
        let material = &map[&AttributeKey::Material];
        assert_eq!(material.text_value(), Some("Oak"));
        assert_eq!(material.confidence, KEYWORD_CONFIDENCE);
        assert_eq!(material.evidence, vec!["Oak Desk".to_string()]);
        assert_eq!(value_of(&map, AttributeKey::Category), "Desk");
    }

    #[test]
    fn test_keywords_require_word_boundaries() {
        // "soaked" must not match "oak", "bedding" must not match "bed"
        let map = classify_text("Soaked bedding", None);
        assert_eq!(value_of(&map, AttributeKey::Material), "unknown");
        assert_eq!(value_of(&map, AttributeKey::Category), "unknown");
    }

    #[test]
    fn test_unknown_when_nothing_matches() {
        let map = classify_text("Gizmo", Some("A thing."));
        for key in AttributeKey::FUSED {
            let prediction = &map[&key];
            assert_eq!(prediction.text_value(), Some("unknown"));
            assert_eq!(prediction.confidence, UNKNOWN_CONFIDENCE);
            assert!(prediction.evidence.is_empty());
        }
        assert!(!map.contains_key(&AttributeKey::Dimensions));
    }

    #[test]
    fn test_evidence_prefers_description() {
        let map = classify_text("Walnut Chair", Some("Crafted from walnut with care."));
        let evidence = &map[&AttributeKey::Material].evidence[0];
        assert!(evidence.starts_with("Crafted"), "got {}", evidence);
    }

    #[test]
    fn test_snippet_is_bounded() {
        let long = format!("{} velvet {}", "a".repeat(100), "b".repeat(100));
        let map = classify_text("", Some(&long));
        let evidence = &map[&AttributeKey::Material].evidence[0];
        assert!(evidence.contains("velvet"));
        assert!(evidence.chars().count() <= SNIPPET_RADIUS * 2 + "velvet".len());
    }

    #[test]
    fn test_case_insensitive() {
        let map = classify_text("RUSTIC PINE BENCH", None);
        assert_eq!(value_of(&map, AttributeKey::Style), "Rustic");
        assert_eq!(value_of(&map, AttributeKey::Material), "Pine");
        assert_eq!(value_of(&map, AttributeKey::Category), "Bench");
    }

    #[test]
    fn test_non_ascii_text_does_not_panic() {
        let map = classify_text("Canapé en velours", Some("Très élégant — boucle fabric"));
        assert_eq!(value_of(&map, AttributeKey::Material), "Boucle");
    }
}

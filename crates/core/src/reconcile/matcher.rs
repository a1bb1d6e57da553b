//! Variant value matching and label parsing.
//!
//! Matching is greedy: an exact (normalized) match is tried over all
//! candidates first, then a containment match in either direction. The first
//! candidate that satisfies a rule wins, so input order breaks ties.

use once_cell::sync::Lazy;
use regex_lite::Regex;

use super::types::MatchConfidence;

static WHITESPACE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").unwrap());

/// Separators accepted inside a combined variant label.
const LABEL_SEPARATORS: [char; 4] = ['/', '|', ',', ';'];

/// Lowercase, trim and collapse inner whitespace.
pub fn normalize(text: &str) -> String {
    WHITESPACE.replace_all(text.trim(), " ").to_lowercase()
}

/// Split a combined label such as "Red / XL" into ordered option tokens.
pub fn split_variant_label(label: &str) -> Vec<String> {
    label
        .split(|c: char| LABEL_SEPARATORS.contains(&c))
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}

/// A resolved candidate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ValueMatch {
    /// Index into the candidate slice.
    pub index: usize,
    pub confidence: MatchConfidence,
}

/// Match one value against candidate labels.
pub fn match_value<S: AsRef<str>>(value: &str, candidates: &[S]) -> Option<ValueMatch> {
    let needle = normalize(value);
    if needle.is_empty() {
        return None;
    }

    let normalized: Vec<String> = candidates.iter().map(|c| normalize(c.as_ref())).collect();

    if let Some(index) = normalized.iter().position(|c| *c == needle) {
        return Some(ValueMatch {
            index,
            confidence: MatchConfidence::Exact,
        });
    }

    normalized
        .iter()
        .position(|c| !c.is_empty() && (c.contains(&needle) || needle.contains(c.as_str())))
        .map(|index| ValueMatch {
            index,
            confidence: MatchConfidence::Fuzzy,
        })
}

/// Compare two token lists position by position.
///
/// Returns the weakest per-token confidence, or `None` if lengths differ or
/// any token fails to match.
pub fn match_tokens(tokens: &[String], values: &[String]) -> Option<MatchConfidence> {
    if tokens.len() != values.len() || tokens.is_empty() {
        return None;
    }
    let mut weakest = MatchConfidence::Exact;
    for (token, value) in tokens.iter().zip(values) {
        let found = match_value(token, std::slice::from_ref(value))?;
        weakest = weakest.min(found.confidence);
    }
    Some(weakest)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize() {
        assert_eq!(normalize("  Navy   Blue "), "navy blue");
        assert_eq!(normalize("XL"), "xl");
    }

    #[test]
    fn test_split_on_every_separator() {
        assert_eq!(split_variant_label("Red / XL"), vec!["Red", "XL"]);
        assert_eq!(split_variant_label("Red|XL"), vec!["Red", "XL"]);
        assert_eq!(split_variant_label("Red, XL; Cotton"), vec!["Red", "XL", "Cotton"]);
        assert_eq!(split_variant_label(" / Red //"), vec!["Red"]);
        assert!(split_variant_label("").is_empty());
    }

    #[test]
    fn test_exact_match_beats_earlier_fuzzy() {
        let candidates = ["Dark Red", "Red"];
        let found = match_value("red", &candidates).unwrap();
        assert_eq!(found.index, 1);
        assert_eq!(found.confidence, MatchConfidence::Exact);
    }

    #[test]
    fn test_fuzzy_containment_either_direction() {
        let found = match_value("Red", &["Burgundy", "Dark Red"]).unwrap();
        assert_eq!(found.index, 1);
        assert_eq!(found.confidence, MatchConfidence::Fuzzy);

        let found = match_value("Sky Blue Melange", &["Green", "Sky Blue"]).unwrap();
        assert_eq!(found.index, 1);
        assert_eq!(found.confidence, MatchConfidence::Fuzzy);
    }

    #[test]
    fn test_fuzzy_tie_breaks_on_input_order() {
        let found = match_value("Blue", &["Light Blue", "Dark Blue"]).unwrap();
        assert_eq!(found.index, 0);
    }

    #[test]
    fn test_no_match() {
        assert!(match_value("Purple", &["Red", "Green"]).is_none());
        assert!(match_value("   ", &["Red"]).is_none());
    }

    #[test]
    fn test_match_tokens() {
        let values = vec!["Red".to_string(), "XL".to_string()];
        assert_eq!(
            match_tokens(&["red".to_string(), "xl".to_string()], &values),
            Some(MatchConfidence::Exact)
        );
        assert_eq!(
            match_tokens(&["Dark Red".to_string(), "XL".to_string()], &values),
            Some(MatchConfidence::Fuzzy)
        );
        assert_eq!(match_tokens(&["Red".to_string()], &values), None);
        assert_eq!(
            match_tokens(&["Blue".to_string(), "XL".to_string()], &values),
            None
        );
    }
}

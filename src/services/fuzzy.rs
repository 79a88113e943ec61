// src/services/fuzzy.rs
//
// Fuzzy title matching.
//
// CRITICAL RULES:
// - Verification code only talks to `TitleSimilarity`; the algorithm behind it
//   can be swapped without touching the verifier
// - Scores are "lower is better": 0.0 is an exact hit at the start of the text
// - Matching is case-insensitive and ignores punctuation

use std::sync::OnceLock;

use regex::Regex;

use crate::domain::media::{Media, TitleField};

// ============================================================================
// SIMILARITY INTERFACE
// ============================================================================

/// Approximate string matcher.
///
/// `similar(pattern, text, threshold)` answers whether `pattern` occurs in
/// `text` with a score at or below `threshold` (0.0 exact, 1.0 anything).
pub trait TitleSimilarity: Send + Sync {
    fn similar(&self, pattern: &str, text: &str, threshold: f64) -> bool;
}

/// Edit-distance matcher over cleaned text.
///
/// Whole-string comparison uses normalized Levenshtein. When the pattern is
/// shorter than the text, windows of the text are scored as
/// `errors / pattern_len + start / LOCATION_DISTANCE`, so a phrase found
/// near the start of a longer title still matches while one buried deep in
/// it does not.
#[derive(Debug, Clone, Default)]
pub struct FuzzyMatcher;

/// Characters of offset that cost a full point of score
const LOCATION_DISTANCE: f64 = 100.0;

impl FuzzyMatcher {
    pub fn new() -> Self {
        Self
    }

    /// Best score of `pattern` anywhere in `text`.
    pub fn score(&self, pattern: &str, text: &str, threshold: f64) -> f64 {
        let pattern: Vec<char> = pattern.chars().collect();
        let text: Vec<char> = text.chars().collect();
        if pattern.is_empty() {
            return 0.0;
        }

        let pattern_str: String = pattern.iter().collect();
        let text_str: String = text.iter().collect();
        if pattern.len() >= text.len() {
            return 1.0 - strsim::normalized_levenshtein(&pattern_str, &text_str);
        }

        if let Some(byte_pos) = text_str.find(&pattern_str) {
            let pos = text_str[..byte_pos].chars().count();
            return pos as f64 / LOCATION_DISTANCE;
        }

        let len = pattern.len();
        let max_errors = ((len as f64) * threshold).floor() as usize;
        let max_start = ((threshold * LOCATION_DISTANCE).floor() as usize).min(text.len() - 1);

        let mut best = 1.0_f64;
        for start in 0..=max_start {
            let location_cost = start as f64 / LOCATION_DISTANCE;
            if location_cost >= best {
                break;
            }
            let min_window = len.saturating_sub(max_errors).max(1);
            let max_window = (len + max_errors).min(text.len() - start);
            for window in min_window..=max_window {
                let candidate: String = text[start..start + window].iter().collect();
                let errors = strsim::levenshtein(&pattern_str, &candidate);
                let score = errors as f64 / len as f64 + location_cost;
                if score < best {
                    best = score;
                }
            }
        }
        best.min(1.0)
    }
}

impl TitleSimilarity for FuzzyMatcher {
    fn similar(&self, pattern: &str, text: &str, threshold: f64) -> bool {
        self.score(pattern, text, threshold) <= threshold
    }
}

// ============================================================================
// TEXT CLEANING
// ============================================================================

fn punctuation_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"[^\p{L}\p{N}\p{Zs}\p{Pd}]").expect("valid punctuation regex"))
}

fn season_number_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)season (\d{1,2})\b").expect("valid season regex"))
}

const NUMBER_WORDS: [&str; 21] = [
    "zero", "one", "two", "three", "four", "five", "six", "seven", "eight", "nine", "ten",
    "eleven", "twelve", "thirteen", "fourteen", "fifteen", "sixteen", "seventeen", "eighteen",
    "nineteen", "twenty",
];

/// Lowercase, strip punctuation and spell out "Season N" for N in 1..=20 so
/// that "Season 2" and "Season Two" compare equal.
pub fn clean_text(text: &str) -> String {
    let stripped = punctuation_regex().replace_all(text, "");
    let spelled = season_number_regex().replace_all(&stripped, |caps: &regex::Captures| {
        match caps[1].parse::<usize>() {
            Ok(n) if (1..=20).contains(&n) => format!("season {}", NUMBER_WORDS[n]),
            _ => caps[0].to_string(),
        }
    });
    spelled
        .to_lowercase()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

// ============================================================================
// KEY MATCHING
// ============================================================================

/// Tolerance for a title of this length: long titles accumulate more noise.
pub fn adaptive_threshold(title: &str) -> f64 {
    let len = title.chars().count();
    if len > 15 {
        0.2
    } else if len > 9 {
        0.15
    } else {
        0.1
    }
}

/// True if `phrase` matches any of the entry's `fields` within `threshold`.
/// Both directions are tried: the phrase inside a field value and a field
/// value inside the phrase. An empty phrase matches anything.
pub fn match_keys(
    similarity: &dyn TitleSimilarity,
    media: &Media,
    phrase: &str,
    fields: &[TitleField],
    threshold: f64,
) -> bool {
    let phrase = clean_text(phrase);
    if phrase.is_empty() {
        return true;
    }
    let values: Vec<String> = media
        .title_values(fields)
        .into_iter()
        .map(clean_text)
        .filter(|v| !v.is_empty())
        .collect();

    values.iter().any(|value| similarity.similar(&phrase, value, threshold))
        || values.iter().any(|value| similarity.similar(value, &phrase, threshold))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::media::MediaTitle;

    #[test]
    fn test_clean_text() {
        assert_eq!(clean_text("Re:Zero - Season 2!"), "rezero - season two");
        assert_eq!(clean_text("Steins;Gate  0"), "steinsgate 0");
        assert_eq!(clean_text("Season 21"), "season 21");
    }

    #[test]
    fn test_adaptive_threshold_steps() {
        assert_eq!(adaptive_threshold("Kanon"), 0.1);
        assert_eq!(adaptive_threshold("Mob Psycho 100"), 0.15);
        assert_eq!(adaptive_threshold("Fullmetal Alchemist Brotherhood"), 0.2);
    }

    #[test]
    fn test_exact_prefix_scores_zero() {
        let matcher = FuzzyMatcher::new();
        assert_eq!(matcher.score("attack on titan", "attack on titan season two", 0.2), 0.0);
        assert!(matcher.similar("attack on titan", "attack on titan season two", 0.1));
    }

    #[test]
    fn test_location_penalty() {
        let matcher = FuzzyMatcher::new();
        // found at offset 16 → 0.16
        assert!(matcher.similar("season", "attack on titan season four", 0.2));
        assert!(!matcher.similar("season", "attack on titan season four", 0.15));
    }

    #[test]
    fn test_typo_within_threshold() {
        let matcher = FuzzyMatcher::new();
        assert!(matcher.similar("frieren beyond journeys edn", "frieren beyond journeys end", 0.1));
        assert!(!matcher.similar("kanan", "kanon", 0.1));
        assert!(matcher.similar("kanan", "kanon", 0.2));
    }

    #[test]
    fn test_match_keys_both_directions() {
        let matcher = FuzzyMatcher::new();
        let media = Media {
            title: MediaTitle {
                user_preferred: Some("Sousou no Frieren".to_string()),
                english: Some("Frieren: Beyond Journey's End".to_string()),
                ..MediaTitle::default()
            },
            ..Media::new(154587, "")
        };

        // phrase inside field value
        assert!(match_keys(&matcher, &media, "Frieren", &TitleField::ALL, 0.1));
        // field value inside phrase
        assert!(match_keys(
            &matcher,
            &media,
            "Sousou no Frieren 1080p",
            &TitleField::ALL,
            0.1
        ));
        assert!(!match_keys(&matcher, &media, "Dungeon Meshi", &TitleField::ALL, 0.2));
        assert!(match_keys(&matcher, &media, "", &TitleField::ALL, 0.1));
    }
}

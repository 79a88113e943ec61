// src/services/verifier.rs
//
// Fuzzy Verifier
//
// Decides whether a catalog entry plausibly is what a descriptor names.
//
// CRITICAL RULES:
// - Hard negatives run first and short-circuit
// - No catalog access: only the entry, its relation edges and the descriptor
// - `threshold` applies to the title variants; the inline-season variant
//   uses its own relaxed threshold

use std::sync::{Arc, OnceLock};

use regex::Regex;

use crate::domain::descriptor::{EpisodeNumber, ParsedDescriptor, ReleaseType};
use crate::domain::media::{Media, MediaFormat, RelationType, TitleField};
use crate::services::fuzzy::{match_keys, FuzzyMatcher, TitleSimilarity};
use crate::services::season_walker::find_edge;

/// Threshold for the title with the season marker substituted inline
pub const INLINE_SEASON_THRESHOLD: f64 = 0.3;

/// Titles shared between a TV series and a movie, where episode "1" of the
/// series is easily mistaken for the film
const MOVIE_DISAMBIGUATION_KEYWORDS: &[&str] = &["golden time"];

fn season_marker_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)S\d+|season-\d+").expect("valid season marker regex"))
}

pub struct MediaVerifier {
    similarity: Arc<dyn TitleSimilarity>,
}

impl Default for MediaVerifier {
    fn default() -> Self {
        Self::new(Arc::new(FuzzyMatcher::new()))
    }
}

impl MediaVerifier {
    pub fn new(similarity: Arc<dyn TitleSimilarity>) -> Self {
        Self { similarity }
    }

    pub fn matches(
        &self,
        media: &Media,
        phrase: &str,
        fields: &[TitleField],
        threshold: f64,
    ) -> bool {
        match_keys(self.similarity.as_ref(), media, phrase, fields, threshold)
    }

    /// True if `media` plausibly is the entry `descriptor` refers to.
    pub fn is_verified(
        &self,
        media: &Media,
        descriptor: &ParsedDescriptor,
        fields: &[TitleField],
        threshold: f64,
    ) -> bool {
        if is_movie_crossover(media, descriptor) {
            return false;
        }

        if let (Some(year), Some(season_year)) = (descriptor.year, media.season_year) {
            if season_year < year {
                return false;
            }
        }

        if descriptor.has_type(ReleaseType::Ona) && media.format != Some(MediaFormat::Ona) {
            return false;
        }
        if descriptor.has_type(ReleaseType::Ova) && media.format != Some(MediaFormat::Ova) {
            return false;
        }

        let title = descriptor.title.as_str();
        let base_title = season_marker_regex().replace_all(title, "").trim().to_string();
        let has_season = self.matches(media, "Season", fields, threshold);
        let multi_season = descriptor.is_multi_season();

        let mut variations: Vec<String> = Vec::with_capacity(2);
        match descriptor.season {
            Some(season) if multi_season && has_season => {
                variations.push(format!("{} Season {}", base_title, season));
            }
            _ => variations.push(title.to_string()),
        }
        match descriptor.season {
            Some(season) if has_season => {
                variations.push(format!("{} Season {}", base_title, season))
            }
            _ => variations.push(base_title.clone()),
        }

        if let (true, Some(season)) = (multi_season, descriptor.season) {
            let inline = season_marker_regex()
                .replace_all(title, regex::NoExpand(&format!("Season {}", season)))
                .into_owned();
            if self.matches(media, &inline, fields, INLINE_SEASON_THRESHOLD) {
                return true;
            }
            let has_prequel =
                find_edge(media, RelationType::Prequel, &MediaFormat::SEASONAL, false).is_some();
            let has_sequel =
                find_edge(media, RelationType::Sequel, &MediaFormat::SEASONAL, true).is_some();
            if !has_prequel && has_sequel {
                return false;
            }
        }

        variations
            .iter()
            .any(|variant| self.matches(media, variant, fields, threshold))
    }
}

fn is_movie_crossover(media: &Media, descriptor: &ParsedDescriptor) -> bool {
    if descriptor.episode != Some(EpisodeNumber::Single(1)) || !media.is_movie() {
        return false;
    }
    let title = descriptor.title.to_lowercase();
    MOVIE_DISAMBIGUATION_KEYWORDS
        .iter()
        .any(|keyword| title.contains(keyword))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::media::{MediaNode, MediaTitle, RelationEdge};
    use crate::services::fuzzy::adaptive_threshold;

    fn media(id: i64, title: &str) -> Media {
        Media {
            format: Some(MediaFormat::Tv),
            ..Media::new(id, title)
        }
    }

    fn edge(relation_type: RelationType, id: i64) -> RelationEdge {
        RelationEdge {
            relation_type,
            node: MediaNode {
                id,
                format: Some(MediaFormat::Tv),
                title: MediaTitle::default(),
            },
        }
    }

    fn verify(media: &Media, descriptor: &ParsedDescriptor) -> bool {
        MediaVerifier::default().is_verified(
            media,
            descriptor,
            &TitleField::ALL,
            adaptive_threshold(&descriptor.title),
        )
    }

    #[test]
    fn test_direct_title_match() {
        let entry = media(1, "Sousou no Frieren");
        assert!(verify(&entry, &ParsedDescriptor::new("Sousou no Frieren")));
        assert!(!verify(&entry, &ParsedDescriptor::new("Dungeon Meshi")));
    }

    #[test]
    fn test_golden_time_movie_rejected_for_episode_one() {
        let movie = Media {
            format: Some(MediaFormat::Movie),
            ..Media::new(1, "Golden Time")
        };
        let descriptor = ParsedDescriptor::new("Golden Time").with_episode(EpisodeNumber::Single(1));
        assert!(!verify(&movie, &descriptor));

        let series = media(2, "Golden Time");
        assert!(verify(&series, &descriptor));
    }

    #[test]
    fn test_release_cannot_predate_catalog_year() {
        let entry = Media {
            season_year: Some(2019),
            ..media(1, "Dr. Stone")
        };
        assert!(!verify(&entry, &ParsedDescriptor::new("Dr. Stone").with_year(2023)));
        assert!(verify(&entry, &ParsedDescriptor::new("Dr. Stone").with_year(2019)));
    }

    #[test]
    fn test_ova_tag_requires_ova_format() {
        let entry = media(1, "Hellsing Ultimate");
        let descriptor = ParsedDescriptor::new("Hellsing Ultimate").with_release_type(ReleaseType::Ova);
        assert!(!verify(&entry, &descriptor));

        let ova = Media {
            format: Some(MediaFormat::Ova),
            ..entry
        };
        assert!(verify(&ova, &descriptor));
    }

    #[test]
    fn test_multi_season_sequel_without_prequel_rejected() {
        // season 1 node: has a sequel, no prequel
        let mut first = media(1, "Vinland Saga: The Viking Epic");
        first.relations.push(edge(RelationType::Sequel, 2));
        let descriptor = ParsedDescriptor::new("Vinland Saga S2").with_season(2);
        assert!(!verify(&first, &descriptor));

        let mut second = media(2, "Vinland Saga Season 2");
        second.relations.push(edge(RelationType::Prequel, 1));
        assert!(verify(&second, &descriptor));
    }

    #[test]
    fn test_threshold_monotonic_in_title_length() {
        // Same single-character typo on every length: once a title is long
        // enough to be accepted, every longer one is accepted too.
        let base = "abcdefghijklmnopqrstuvwxyzabcdefgh";
        let mut accepted_at: Option<usize> = None;
        for len in 4..base.len() {
            let title = &base[..len];
            let typo = format!("{}Z", &title[..len - 1]);
            let entry = media(1, title);
            let verified = verify(&entry, &ParsedDescriptor::new(typo));
            match (accepted_at, verified) {
                (None, true) => accepted_at = Some(len),
                (Some(first), false) => {
                    panic!("length {} rejected after length {} was accepted", len, first)
                }
                _ => {}
            }
        }
        assert!(accepted_at.is_some());
    }
}

// src/services/tokenizer.rs
//
// Filename Tokenizer - ordered regex rules turning a release name into a
// ParsedDescriptor.
//
// CRITICAL RULES:
// - Deterministic: same input, same descriptor
// - Rules are tried in order, the first episode rule that matches wins
// - A season token written into the title ("Show S2", "Show Season 2") stays
//   in the title; the orchestrator derives its search variants from it
// - Never fails: an unparsable name yields a descriptor with whatever was found

use std::sync::OnceLock;

use regex::{Captures, Regex};

use crate::domain::descriptor::{EpisodeNumber, ParsedDescriptor, ReleaseType};

/// Turns a cleaned filename into descriptors.
pub trait Tokenizer: Send + Sync {
    fn tokenize(&self, file_name: &str) -> Vec<ParsedDescriptor>;
}

// ============================================================================
// RULES
// ============================================================================

struct TokenRules {
    extension: Regex,
    release_group: Regex,
    bracket_tag: Regex,
    year_tag: Regex,
    info_tag: Regex,
    technical_tag: Regex,
    season_episode: Regex,
    dash_type: Regex,
    dash_episode: Regex,
    prefixed_episode: Regex,
    tilde_range: Regex,
    trailing_episode: Regex,
    season_short: Regex,
    season_long: Regex,
    season_ordinal: Regex,
    bare_type: Regex,
    release_info: Regex,
}

fn re(pattern: &str) -> Regex {
    Regex::new(pattern).expect("valid tokenizer rule")
}

fn rules() -> &'static TokenRules {
    static RULES: OnceLock<TokenRules> = OnceLock::new();
    RULES.get_or_init(|| TokenRules {
        extension: re(r"(?i)\.(mkv|mp4|avi|mov|wmv|flv|webm|m4v|ts|ogm)$"),
        release_group: re(r"^\[([^\]]+)\]\s*"),
        bracket_tag: re(r"[\[(]([^\[\]()]*)[\])]"),
        year_tag: re(r"^(?:19|20)\d{2}$"),
        info_tag: re(r"(?i)^(batch|complete|part\s?\d+)$"),
        technical_tag: re(
            r"(?i)\d{3,4}p|\d{3,4}x\d{3,4}|x26[45]|h\.?26[45]|hevc|avc|aac|flac|opus|10.?bit|web|bd|blu-?ray|dual|multi|sub|^[0-9a-f]{8}$",
        ),
        season_episode: re(
            r"(?i)^(.*?)\bS(\d{1,2})E(\d{1,4})(?:v\d+)?(?:\s*-\s*E?(\d{1,4}))?\b(.*)$",
        ),
        dash_type: re(
            r"(?i)^(.*?)\s+-\s+(NCOP|NCED|OP|ED|PV|Preview|OVA|OAV|OAD|ONA|SP|Special|Movie)\s?\d{0,3}\b(.*)$",
        ),
        dash_episode: re(
            r"^(.*?)\s+-\s+(?:E|EP)?(\d{1,4})(?:v\d+)?(?:\s*[-~]\s*(\d{1,4})(?:v\d+)?)?(?:\s|$)(.*)$",
        ),
        prefixed_episode: re(r"(?i)^(.*?)\s(?:Episode|EP|E)\s?(\d{1,4})(?:v\d+)?\b(.*)$"),
        tilde_range: re(r"^(.*?)\s(\d{1,4})\s*~\s*(\d{1,4})\b(.*)$"),
        trailing_episode: re(r"^(.*\S)\s+(0\d{1,3})(?:v\d+)?$"),
        season_short: re(r"(?i)\bS(\d{1,2})\b"),
        season_long: re(r"(?i)\bSeason\s?(\d{1,2})\b"),
        season_ordinal: re(r"(?i)\b(\d{1,2})(?:st|nd|rd|th)\s+Season\b"),
        bare_type: re(r"(?i)\b(OVA|OAV|OAD|ONA|NCOP|NCED|Movie|Gekijouban)\b"),
        release_info: re(r"(?i)\b(Batch|Complete|Part\s?\d+)\b"),
    })
}

fn number(caps: &Captures, index: usize) -> Option<u32> {
    caps.get(index).and_then(|m| m.as_str().parse().ok())
}

fn episode_from(first: Option<u32>, last: Option<u32>) -> Option<EpisodeNumber> {
    match (first, last) {
        (Some(first), Some(last)) if last > first => Some(EpisodeNumber::Range(first, last)),
        (Some(first), _) => Some(EpisodeNumber::Single(first)),
        _ => None,
    }
}

fn push_type(descriptor: &mut ParsedDescriptor, release_type: ReleaseType) {
    if !descriptor.release_types.contains(&release_type) {
        descriptor.release_types.push(release_type);
    }
}

// ============================================================================
// FILENAME TOKENIZER
// ============================================================================

#[derive(Debug, Clone, Default)]
pub struct FilenameTokenizer;

impl FilenameTokenizer {
    pub fn new() -> Self {
        Self
    }

    pub fn parse(&self, file_name: &str) -> ParsedDescriptor {
        let r = rules();
        let mut descriptor = ParsedDescriptor::new("");
        descriptor.file_name = Some(file_name.to_string());

        let mut name = r.extension.replace(file_name.trim(), "").into_owned();
        if !name.contains(' ') {
            name = name.replace(['_', '.'], " ");
        }

        let group = r
            .release_group
            .captures(&name)
            .map(|caps| (caps[1].trim().to_string(), caps[0].len()));
        if let Some((group, consumed)) = group {
            descriptor.release_group = Some(group);
            name = name[consumed..].to_string();
        }

        // Bracketed tags: metadata is lifted out, anything else in
        // parentheses is part of the title.
        name = r
            .bracket_tag
            .replace_all(&name, |caps: &Captures| {
                let tag = caps[1].trim();
                let square = caps[0].starts_with('[');
                if r.year_tag.is_match(tag) {
                    descriptor.year = descriptor.year.or(tag.parse().ok());
                    return String::new();
                }
                if r.info_tag.is_match(tag) {
                    descriptor.release_info.get_or_insert_with(|| tag.to_string());
                    return String::new();
                }
                let release_type = ReleaseType::from_tag(tag);
                if !matches!(release_type, ReleaseType::Other | ReleaseType::Episode) {
                    push_type(&mut descriptor, release_type);
                    return String::new();
                }
                if square || r.technical_tag.is_match(tag) || tag.is_empty() {
                    String::new()
                } else {
                    caps[0].to_string()
                }
            })
            .into_owned();
        let name = name.split_whitespace().collect::<Vec<_>>().join(" ");

        let title = self.split_episode(&name, &mut descriptor);
        let title = title.trim().trim_end_matches(['-', '_']).trim().to_string();

        if descriptor.season.is_none() {
            descriptor.season = [&r.season_short, &r.season_long, &r.season_ordinal]
                .iter()
                .find_map(|rule| rule.captures(&title).and_then(|caps| number(&caps, 1)));
        }
        for caps in r.bare_type.captures_iter(&title) {
            push_type(&mut descriptor, ReleaseType::from_tag(&caps[1]));
        }
        if descriptor.release_info.is_none() {
            descriptor.release_info = r.release_info.find(&name).map(|m| m.as_str().to_string());
        }

        descriptor.title = title;
        descriptor
    }

    /// Apply the episode rules in order; returns the title part.
    fn split_episode(&self, name: &str, descriptor: &mut ParsedDescriptor) -> String {
        let r = rules();

        if let Some(caps) = r.season_episode.captures(name) {
            descriptor.season = number(&caps, 2);
            descriptor.episode = episode_from(number(&caps, 3), number(&caps, 4));
            return caps[1].to_string();
        }
        if let Some(caps) = r.dash_type.captures(name) {
            push_type(descriptor, ReleaseType::from_tag(&caps[2]));
            return caps[1].to_string();
        }
        if let Some(caps) = r.dash_episode.captures(name) {
            descriptor.episode = episode_from(number(&caps, 2), number(&caps, 3));
            return caps[1].to_string();
        }
        if let Some(caps) = r.prefixed_episode.captures(name) {
            descriptor.episode = episode_from(number(&caps, 2), None);
            return caps[1].to_string();
        }
        if let Some(caps) = r.tilde_range.captures(name) {
            descriptor.episode = episode_from(number(&caps, 2), number(&caps, 3));
            return caps[1].to_string();
        }
        if let Some(caps) = r.trailing_episode.captures(name) {
            descriptor.episode = episode_from(number(&caps, 2), None);
            return caps[1].to_string();
        }
        name.to_string()
    }
}

impl Tokenizer for FilenameTokenizer {
    fn tokenize(&self, file_name: &str) -> Vec<ParsedDescriptor> {
        if file_name.trim().is_empty() {
            return Vec::new();
        }
        vec![self.parse(file_name)]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(name: &str) -> ParsedDescriptor {
        FilenameTokenizer::new().parse(name)
    }

    #[test]
    fn test_group_title_episode() {
        let d = parse("[SubsPlease] Sousou no Frieren - 05 (1080p) [ABCD1234].mkv");
        assert_eq!(d.release_group.as_deref(), Some("SubsPlease"));
        assert_eq!(d.title, "Sousou no Frieren");
        assert_eq!(d.episode, Some(EpisodeNumber::Single(5)));
        assert_eq!(d.season, None);
    }

    #[test]
    fn test_season_token_stays_in_title() {
        let d = parse("Attack on Titan S4 - 25");
        assert_eq!(d.title, "Attack on Titan S4");
        assert_eq!(d.season, Some(4));
        assert_eq!(d.episode, Some(EpisodeNumber::Single(25)));

        let d = parse("Mob Psycho 100 Season 2 - 04v2");
        assert_eq!(d.title, "Mob Psycho 100 Season 2");
        assert_eq!(d.season, Some(2));
        assert_eq!(d.episode, Some(EpisodeNumber::Single(4)));
    }

    #[test]
    fn test_season_episode_token() {
        let d = parse("Show Name S01E05 1080p WEB H.264 AAC2.0");
        assert_eq!(d.title, "Show Name");
        assert_eq!(d.season, Some(1));
        assert_eq!(d.episode, Some(EpisodeNumber::Single(5)));
    }

    #[test]
    fn test_batch_range_with_year() {
        let d = parse("[Group] Made in Abyss (2017) - 01-13 [Batch]");
        assert_eq!(d.title, "Made in Abyss");
        assert_eq!(d.year, Some(2017));
        assert_eq!(d.episode, Some(EpisodeNumber::Range(1, 13)));
        assert_eq!(d.release_info.as_deref(), Some("Batch"));
        assert_eq!(d.cache_key(), "Made in Abyss2017Batch");

        let d = parse("Made in Abyss 01 ~ 13");
        assert_eq!(d.episode, Some(EpisodeNumber::Range(1, 13)));
    }

    #[test]
    fn test_release_type_tags() {
        let d = parse("[Group] Show - NCOP1 [1080p]");
        assert_eq!(d.title, "Show");
        assert!(d.is_excluded_from_search());

        let d = parse("Hellsing Ultimate OVA - 03");
        assert!(d.has_type(ReleaseType::Ova));
        assert_eq!(d.episode, Some(EpisodeNumber::Single(3)));

        let d = parse("[Group] Show [OVA] - 02");
        assert!(d.has_type(ReleaseType::Ova));
        assert_eq!(d.title, "Show");
    }

    #[test]
    fn test_parenthetical_title_kept() {
        let d = parse("Oshi no Ko (My Star) - 02 (1080p)");
        assert_eq!(d.title, "Oshi no Ko (My Star)");
        assert_eq!(d.episode, Some(EpisodeNumber::Single(2)));
    }

    #[test]
    fn test_prefixed_and_trailing_episode() {
        assert_eq!(parse("Show Episode 12").episode, Some(EpisodeNumber::Single(12)));
        assert_eq!(parse("Show E07").title, "Show");
        let d = parse("Show 05");
        assert_eq!(d.title, "Show");
        assert_eq!(d.episode, Some(EpisodeNumber::Single(5)));
        // numbers that belong to the title are left alone
        assert_eq!(parse("Mob Psycho 100").episode, None);
    }

    #[test]
    fn test_dotted_names_and_empty_input() {
        let d = parse("Some_Show_-_03.mkv");
        assert_eq!(d.title, "Some Show");
        assert_eq!(d.episode, Some(EpisodeNumber::Single(3)));

        assert!(FilenameTokenizer::new().tokenize("  ").is_empty());
        assert_eq!(FilenameTokenizer::new().tokenize("Show - 01").len(), 1);
    }
}

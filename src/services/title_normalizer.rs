// src/services/title_normalizer.rs
//
// Title Normalizer
//
// Cleans raw release names and expands a title into the spellings worth
// searching for.
//
// CRITICAL RULES:
// - Pure: same input → same output, no I/O after construction
// - Franchise-specific fixes live in the corrections table, never inline
// - Alternative titles are additive: every step only adds candidates

use std::path::Path;
use std::sync::OnceLock;

use log::debug;
use regex::Regex;
use serde::Deserialize;

use crate::error::{AppError, AppResult};

const BUILTIN_CORRECTIONS: &str = include_str!("../../data/title_corrections.json");

// ============================================================================
// CORRECTIONS TABLE
// ============================================================================

/// One row of the corrections table as stored on disk.
#[derive(Debug, Clone, Deserialize)]
struct CorrectionRule {
    pattern: String,
    replacement: String,
    /// Every one of these must match before the rule applies
    #[serde(default)]
    requires: Vec<String>,
    /// The rule is skipped when this matches
    #[serde(default)]
    unless: Option<String>,
    /// Replace every occurrence instead of the first one
    #[serde(default)]
    all: bool,
}

#[derive(Debug, Clone)]
struct CompiledRule {
    pattern: Regex,
    replacement: String,
    requires: Vec<Regex>,
    unless: Option<Regex>,
    all: bool,
}

impl CompiledRule {
    fn compile(rule: CorrectionRule) -> AppResult<Self> {
        Ok(Self {
            pattern: Regex::new(&rule.pattern)?,
            replacement: rule.replacement,
            requires: rule
                .requires
                .iter()
                .map(|r| Regex::new(r))
                .collect::<Result<_, _>>()?,
            unless: rule.unless.as_deref().map(Regex::new).transpose()?,
            all: rule.all,
        })
    }

    fn applies_to(&self, name: &str) -> bool {
        self.requires.iter().all(|r| r.is_match(name))
            && !self.unless.as_ref().is_some_and(|u| u.is_match(name))
            && self.pattern.is_match(name)
    }

    fn apply(&self, name: &str) -> String {
        let replacement = regex::NoExpand(&self.replacement);
        if self.all {
            self.pattern.replace_all(name, replacement).into_owned()
        } else {
            self.pattern.replace(name, replacement).into_owned()
        }
    }
}

/// Ordered substitution table for franchises whose catalog title diverges
/// from what release groups write. Rules run top to bottom; later rules see
/// the output of earlier ones.
#[derive(Debug, Clone)]
pub struct TitleCorrections {
    rules: Vec<CompiledRule>,
}

impl TitleCorrections {
    /// Table shipped with the crate
    pub fn builtin() -> AppResult<Self> {
        Self::from_json(BUILTIN_CORRECTIONS)
    }

    pub fn from_json(json: &str) -> AppResult<Self> {
        let rules: Vec<CorrectionRule> = serde_json::from_str(json)?;
        let rules = rules
            .into_iter()
            .map(CompiledRule::compile)
            .collect::<AppResult<Vec<_>>>()?;
        Ok(Self { rules })
    }

    pub fn load(path: &Path) -> AppResult<Self> {
        let json = std::fs::read_to_string(path).map_err(|e| {
            AppError::Config(format!(
                "Cannot read title corrections {}: {}",
                path.display(),
                e
            ))
        })?;
        Self::from_json(&json)
    }

    pub fn empty() -> Self {
        Self { rules: Vec::new() }
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    pub fn apply(&self, name: &str) -> String {
        let mut name = name.to_string();
        for rule in &self.rules {
            if rule.applies_to(&name) {
                name = rule.apply(&name);
            }
        }
        name
    }
}

// ============================================================================
// PATTERNS
// ============================================================================

struct Patterns {
    protect: Vec<(Regex, &'static str)>,
    extension: Regex,
    markers: Vec<(Regex, &'static str)>,
    restore: Vec<(Regex, &'static str)>,
    season_suffix: Regex,
    separators: Regex,
    double_space: Regex,
    tv: Regex,
    format_markers: Vec<(Regex, Regex)>,
    episode_title: Regex,
    parenthetical: Regex,
    number_groups: Regex,
    season_episode_token: Regex,
}

fn re(pattern: &str) -> Regex {
    Regex::new(pattern).expect("valid built-in pattern")
}

fn patterns() -> &'static Patterns {
    static PATTERNS: OnceLock<Patterns> = OnceLock::new();
    PATTERNS.get_or_init(|| Patterns {
        protect: vec![
            (re(r"\b([A-Za-z]{3}\d)\.(\d)\b"), "<<AUDIO_${1}_${2}>>"),
            (re(r"\b([HX])\.(\d{3})\b"), "<<RES_${1}_${2}>>"),
            (re(r"\b5\.1\b"), "<<CHANNEL_5_1>>"),
            (re(r"\bFLAC5\.1\b"), "<<AUDIO_FLAC_5_1>>"),
            (re(r"\bVol\.(\d+)\b"), "<<VOL_${1}>>"),
        ],
        extension: re(r"(?i)\.(mkv|mp4|avi|mov|wmv|flv|webm|m4v|mpeg|mpg|3gp|ogg|ogv)$"),
        markers: vec![
            (re(r"(?i)H 264"), "H.264"),
            (re(r"(?i)H 265"), "H.265"),
            (re(r"(?i)MPEG 2"), "MPEG-2"),
            (re(r"(?i)MPEG 4"), "MPEG-4"),
            (re(r"(?i)AVC 1"), "AVC1"),
            (re(r"\s*2\.0"), "2.0"),
            (re(r"\s*5\.0"), "5.0"),
            (re(r"\s*5\.1"), "5.1"),
        ],
        restore: vec![
            (re(r"<<AUDIO_([A-Za-z]{3}\d)_(\d)>>"), "${1}.${2}"),
            (re(r"<<RES_([HX])_(\d{3})>>"), "${1}.${2}"),
            (re(r"<<CHANNEL_5_1>>"), "5.1"),
            (re(r"<<AUDIO_FLAC_5_1>>"), "FLAC5.1"),
            (re(r"<<VOL_(\d+)>>"), "Vol.${1}"),
        ],
        season_suffix: re(r" S(\d+)"),
        separators: re(r"[-:]"),
        double_space: re(r"[ ]{2,}"),
        tv: re(r"(?i)\(tv\)"),
        format_markers: ["movie", "ova", "oav", "ona"]
            .iter()
            .map(|m| (re(&format!(r"(?i)\({}\)", m)), re(&format!(r"(?i)\b{}\b", m))))
            .collect(),
        episode_title: re(r"\s+-\s+"),
        parenthetical: re(r"^(.+?)\s*\((.+?)\)$"),
        number_groups: re(r"\s?\d{2,}(?:\s?\d{2,})*\s?"),
        season_episode_token: re(r"S\d+(E\d+)?"),
    })
}

fn ordinal_suffix(n: u32) -> &'static str {
    match n {
        1 => "st",
        2 => "nd",
        3 => "rd",
        _ => "th",
    }
}

/// `"Main (Alt)"` → `("Main", "Alt")`
pub fn split_parenthetical(title: &str) -> Option<(String, String)> {
    patterns()
        .parenthetical
        .captures(title)
        .map(|caps| (caps[1].trim().to_string(), caps[2].trim().to_string()))
}

/// Drop the first `S01` / `S01E05` style token from a title.
pub fn strip_season_episode_token(title: &str) -> String {
    patterns()
        .season_episode_token
        .replace(title, "")
        .trim()
        .to_string()
}

// ============================================================================
// TITLE NORMALIZER
// ============================================================================

pub struct TitleNormalizer {
    corrections: TitleCorrections,
}

impl Default for TitleNormalizer {
    fn default() -> Self {
        Self::new(TitleCorrections::builtin().expect("embedded title corrections are valid"))
    }
}

impl TitleNormalizer {
    pub fn new(corrections: TitleCorrections) -> Self {
        Self { corrections }
    }

    /// Clean a raw release name so the tokenizer does not misread codec and
    /// channel markers as episode numbers.
    pub fn clean_file_name(&self, name: &str) -> String {
        let p = patterns();

        let mut name = name.to_string();
        for (pattern, placeholder) in &p.protect {
            name = pattern.replace_all(&name, *placeholder).into_owned();
        }

        name = p.extension.replace(&name, "").replace('.', " ");
        name = self.corrections.apply(&name);

        for (pattern, fixed) in &p.markers {
            name = pattern.replace(&name, *fixed).into_owned();
        }
        for (pattern, original) in &p.restore {
            name = pattern.replace_all(&name, *original).into_owned();
        }

        name.split_whitespace().collect::<Vec<_>>().join(" ")
    }

    /// Alternate spellings of `title`, in discovery order, without duplicates.
    pub fn alternative_titles(&self, title: &str) -> Vec<String> {
        let p = patterns();
        let mut titles: Vec<String> = Vec::new();
        let mut add = |candidate: &str| {
            let candidate = candidate.trim();
            if !candidate.is_empty() && !titles.iter().any(|t| t == candidate) {
                titles.push(candidate.to_string());
            }
        };

        let mut modified = title.to_string();
        match p.season_suffix.captures(title) {
            Some(caps) => {
                let season: u32 = caps[1].parse().unwrap_or(0);
                if season == 1 {
                    modified = p.season_suffix.replace(title, "").into_owned();
                    add(&modified);
                } else {
                    let ordinal = format!(" {}{} Season", season, ordinal_suffix(season));
                    modified = p
                        .season_suffix
                        .replace(title, regex::NoExpand(&ordinal))
                        .into_owned();
                    add(&modified);
                    let spelled = format!(" Season {}", season);
                    add(&p.season_suffix.replace(title, regex::NoExpand(&spelled)));
                }
            }
            None => add(title),
        }

        if p.separators.is_match(&modified) {
            let stripped = p.separators.replace_all(&modified, "");
            modified = p.double_space.replace(&stripped, " ").into_owned();
            add(&modified);
        }

        if p.tv.is_match(&modified) {
            modified = p.tv.replace(&modified, "").into_owned();
            add(&modified);
        }

        for (parenthesized, bare) in &p.format_markers {
            if parenthesized.is_match(&modified) || bare.is_match(&modified) {
                let without = parenthesized.replace(&modified, "").into_owned();
                modified = bare.replace(&without, "").into_owned();
                add(&modified);
            }
        }

        if p.episode_title.is_match(title) {
            if let Some(head) = p.episode_title.split(title).next() {
                add(head);
            }
        }

        if let Some((main, alt)) = split_parenthetical(&modified) {
            add(&main);
            add(&alt);
        }

        if p.number_groups.is_match(&modified) {
            modified = p
                .number_groups
                .replace_all(&modified, " ")
                .split_whitespace()
                .collect::<Vec<_>>()
                .join(" ");
            add(&modified);
        }

        debug!("Alternative titles for {}: {:?}", title, titles);
        titles
    }
}

// src/domain/descriptor.rs
//
// Parsed Descriptor - the tokenizer's view of a release filename.
//
// CRITICAL INVARIANTS:
// - Immutable per file: resolution never rewrites a descriptor in place,
//   it derives a new one (see `with_title`)
// - An empty title is a malformed descriptor and is never searched

use serde::{Deserialize, Serialize};

/// Episode number as written in the release name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum EpisodeNumber {
    Single(u32),
    /// Batch releases: `[first, last]`
    Range(u32, u32),
}

impl EpisodeNumber {
    pub fn first(&self) -> u32 {
        match self {
            EpisodeNumber::Single(n) => *n,
            EpisodeNumber::Range(first, _) => *first,
        }
    }

    /// Upper bound; the value compared against episode ceilings.
    pub fn last(&self) -> u32 {
        match self {
            EpisodeNumber::Single(n) => *n,
            EpisodeNumber::Range(_, last) => *last,
        }
    }

    pub fn is_range(&self) -> bool {
        matches!(self, EpisodeNumber::Range(..))
    }
}

impl std::fmt::Display for EpisodeNumber {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EpisodeNumber::Single(n) => write!(f, "{}", n),
            EpisodeNumber::Range(first, last) => write!(f, "{} ~ {}", first, last),
        }
    }
}

/// Release type tag found in the filename (`OP`, `NCED`, `OVA`, ...)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReleaseType {
    Episode,
    Opening,
    Ending,
    Preview,
    Ona,
    Ova,
    Movie,
    Special,
    Other,
}

impl ReleaseType {
    /// Map a raw tag to a release type. Matching is case-insensitive.
    pub fn from_tag(tag: &str) -> Self {
        match tag.trim().to_uppercase().as_str() {
            "OP" | "OPENING" | "NCOP" => ReleaseType::Opening,
            "ED" | "ENDING" | "NCED" => ReleaseType::Ending,
            "PV" | "PREVIEW" => ReleaseType::Preview,
            "ONA" => ReleaseType::Ona,
            "OVA" | "OAV" | "OAD" => ReleaseType::Ova,
            "MOVIE" | "GEKIJOUBAN" => ReleaseType::Movie,
            "SP" | "SPECIAL" | "SPECIALS" => ReleaseType::Special,
            "EP" | "EPISODE" => ReleaseType::Episode,
            _ => ReleaseType::Other,
        }
    }

    /// Non-episode media (credits, previews) that is never looked up.
    pub fn is_excluded_from_search(&self) -> bool {
        matches!(
            self,
            ReleaseType::Opening | ReleaseType::Ending | ReleaseType::Preview
        )
    }
}

impl std::fmt::Display for ReleaseType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ReleaseType::Episode => write!(f, "episode"),
            ReleaseType::Opening => write!(f, "opening"),
            ReleaseType::Ending => write!(f, "ending"),
            ReleaseType::Preview => write!(f, "preview"),
            ReleaseType::Ona => write!(f, "ona"),
            ReleaseType::Ova => write!(f, "ova"),
            ReleaseType::Movie => write!(f, "movie"),
            ReleaseType::Special => write!(f, "special"),
            ReleaseType::Other => write!(f, "other"),
        }
    }
}

/// Structured result of tokenizing one filename.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParsedDescriptor {
    pub title: String,
    pub year: Option<i32>,
    pub season: Option<u32>,
    pub episode: Option<EpisodeNumber>,
    #[serde(default)]
    pub release_types: Vec<ReleaseType>,
    pub release_group: Option<String>,
    /// Free-form release annotation such as "Batch" or "Part 2"
    pub release_info: Option<String>,
    /// The (cleaned) filename this descriptor came from
    pub file_name: Option<String>,
}

impl ParsedDescriptor {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            year: None,
            season: None,
            episode: None,
            release_types: Vec::new(),
            release_group: None,
            release_info: None,
            file_name: None,
        }
    }

    pub fn with_episode(mut self, episode: EpisodeNumber) -> Self {
        self.episode = Some(episode);
        self
    }

    pub fn with_season(mut self, season: u32) -> Self {
        self.season = Some(season);
        self
    }

    pub fn with_year(mut self, year: i32) -> Self {
        self.year = Some(year);
        self
    }

    pub fn with_release_type(mut self, release_type: ReleaseType) -> Self {
        self.release_types.push(release_type);
        self
    }

    pub fn with_release_info(mut self, info: impl Into<String>) -> Self {
        self.release_info = Some(info.into());
        self
    }

    /// Same descriptor, different title.
    pub fn with_title(&self, title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            ..self.clone()
        }
    }

    /// Key used by the title cache: title, year and release information.
    pub fn cache_key(&self) -> String {
        let mut key = self.title.clone();
        if let Some(year) = self.year {
            key.push_str(&year.to_string());
        }
        if let Some(info) = &self.release_info {
            key.push_str(info);
        }
        key
    }

    pub fn is_malformed(&self) -> bool {
        self.title.trim().is_empty()
    }

    /// Season 2 or later was written explicitly.
    pub fn is_multi_season(&self) -> bool {
        self.season.map(|s| s > 1).unwrap_or(false)
    }

    pub fn has_type(&self, release_type: ReleaseType) -> bool {
        self.release_types.contains(&release_type)
    }

    pub fn is_excluded_from_search(&self) -> bool {
        self.release_types
            .first()
            .map(|t| t.is_excluded_from_search())
            .unwrap_or(false)
    }

    /// Upper bound of the parsed episode, if any.
    pub fn episode_last(&self) -> Option<u32> {
        self.episode.map(|e| e.last())
    }
}

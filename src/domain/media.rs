// src/domain/media.rs
//
// Catalog Entry ("media") as returned by the catalog service.
//
// CRITICAL RULES:
// - Read-only from the resolver's point of view
// - Relations are fetched lazily: an edge only carries the target's id,
//   format and title, the full entry comes from `CatalogService::get_by_id`

use serde::{Deserialize, Serialize};

/// Catalog format of an entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MediaFormat {
    Tv,
    TvShort,
    Movie,
    Special,
    Ova,
    Ona,
    Music,
}

impl MediaFormat {
    /// Formats walked by default when following season edges
    pub const SEASONAL: [MediaFormat; 2] = [MediaFormat::Tv, MediaFormat::TvShort];

    /// Widened set used when a sequel is released as an ONA/OVA
    pub const SEASONAL_WIDE: [MediaFormat; 4] = [
        MediaFormat::Tv,
        MediaFormat::TvShort,
        MediaFormat::Ona,
        MediaFormat::Ova,
    ];
}

impl std::fmt::Display for MediaFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MediaFormat::Tv => write!(f, "TV"),
            MediaFormat::TvShort => write!(f, "TV_SHORT"),
            MediaFormat::Movie => write!(f, "MOVIE"),
            MediaFormat::Special => write!(f, "SPECIAL"),
            MediaFormat::Ova => write!(f, "OVA"),
            MediaFormat::Ona => write!(f, "ONA"),
            MediaFormat::Music => write!(f, "MUSIC"),
        }
    }
}

/// Lifecycle status of an entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MediaStatus {
    Releasing,
    Finished,
    NotYetReleased,
    Cancelled,
    Hiatus,
}

/// Typed relation between two entries. Only the narrative types are walked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RelationType {
    Prequel,
    Sequel,
    Parent,
    SideStory,
    Alternative,
    SpinOff,
    Summary,
    Character,
    Adaptation,
    #[serde(other)]
    Other,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaTitle {
    pub user_preferred: Option<String>,
    pub english: Option<String>,
    pub romaji: Option<String>,
    pub native: Option<String>,
}

/// The target end of a relation edge
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaNode {
    pub id: i64,
    pub format: Option<MediaFormat>,
    #[serde(default)]
    pub title: MediaTitle,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelationEdge {
    pub relation_type: RelationType,
    pub node: MediaNode,
}

/// Title fields a candidate can be compared on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TitleField {
    UserPreferred,
    English,
    Romaji,
    Native,
    Synonyms,
}

impl TitleField {
    pub const ALL: [TitleField; 5] = [
        TitleField::UserPreferred,
        TitleField::English,
        TitleField::Romaji,
        TitleField::Native,
        TitleField::Synonyms,
    ];
}

/// One catalog entry: a season, movie, OVA, ... of some franchise
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Media {
    pub id: i64,
    #[serde(default)]
    pub title: MediaTitle,
    #[serde(default)]
    pub synonyms: Vec<String>,
    pub format: Option<MediaFormat>,
    pub status: Option<MediaStatus>,
    /// Known episode count, `None` while airing
    pub episodes: Option<u32>,
    /// Number of the next episode to air, if airing
    pub next_airing_episode: Option<u32>,
    pub season_year: Option<i32>,
    /// Titles of streaming episodes, used by the zero-episode heuristic
    #[serde(default)]
    pub streaming_episodes: Vec<String>,
    #[serde(default)]
    pub relations: Vec<RelationEdge>,
}

impl Media {
    /// Minimal entry; the remaining fields are filled with struct update syntax.
    pub fn new(id: i64, title: impl Into<String>) -> Self {
        Self {
            id,
            title: MediaTitle {
                user_preferred: Some(title.into()),
                ..MediaTitle::default()
            },
            synonyms: Vec::new(),
            format: None,
            status: None,
            episodes: None,
            next_airing_episode: None,
            season_year: None,
            streaming_episodes: Vec::new(),
            relations: Vec::new(),
        }
    }

    /// Title shown to the user; a result without one is never trusted.
    pub fn display_title(&self) -> Option<&str> {
        self.title
            .user_preferred
            .as_deref()
            .filter(|t| !t.trim().is_empty())
    }

    /// Highest episode number known for this entry, before any zero-episode
    /// adjustment. An airing entry reports its next airing episode.
    pub fn known_episodes(&self) -> Option<u32> {
        self.next_airing_episode
            .filter(|n| *n > 0)
            .or(self.episodes.filter(|n| *n > 0))
    }

    pub fn is_movie(&self) -> bool {
        self.format == Some(MediaFormat::Movie)
    }

    pub fn is_finished(&self) -> bool {
        self.status == Some(MediaStatus::Finished)
    }

    pub fn is_releasing(&self) -> bool {
        self.status == Some(MediaStatus::Releasing)
    }

    /// Values of the requested title fields, skipping empty ones.
    pub fn title_values(&self, fields: &[TitleField]) -> Vec<&str> {
        let mut values = Vec::new();
        for field in fields {
            match field {
                TitleField::UserPreferred => values.extend(self.title.user_preferred.as_deref()),
                TitleField::English => values.extend(self.title.english.as_deref()),
                TitleField::Romaji => values.extend(self.title.romaji.as_deref()),
                TitleField::Native => values.extend(self.title.native.as_deref()),
                TitleField::Synonyms => values.extend(self.synonyms.iter().map(String::as_str)),
            }
        }
        values.retain(|v| !v.trim().is_empty());
        values
    }

    pub fn has_relation(&self, relation_type: RelationType) -> bool {
        self.relations.iter().any(|e| e.relation_type == relation_type)
    }
}

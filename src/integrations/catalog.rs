// src/integrations/catalog.rs
//
// Catalog Service boundary
//
// CRITICAL RULES:
// - The resolver only reads from the catalog
// - Implementations map transport failures to `AppError::Http` /
//   `AppError::Catalog` so callers can tell upstream trouble apart
// - Relation edges must carry the target's format

use std::collections::HashMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::domain::media::{Media, MediaFormat};
use crate::error::AppResult;

/// One title variant of a compound title search.
/// Several queries may share a `key`; the first non-empty hit per key wins.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TitleQuery {
    pub key: String,
    pub title: String,
    pub year: Option<i32>,
    pub is_adult: bool,
}

impl TitleQuery {
    pub fn new(key: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            title: title.into(),
            year: None,
            is_adult: false,
        }
    }

    pub fn with_year(mut self, year: Option<i32>) -> Self {
        self.year = year;
        self
    }

    pub fn adult(mut self) -> Self {
        self.is_adult = true;
        self
    }
}

/// Exclusions for a free-text search
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchFilters {
    pub id_not: Option<i64>,
    #[serde(default)]
    pub format_not: Vec<MediaFormat>,
}

impl SearchFilters {
    pub fn accepts(&self, media: &Media) -> bool {
        if self.id_not == Some(media.id) {
            return false;
        }
        match media.format {
            Some(format) => !self.format_not.contains(&format),
            None => true,
        }
    }
}

/// Catalog of media entries with relation edges.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait CatalogService: Send + Sync {
    /// Compound title search. The result maps every query key to the first
    /// entry found for it, or `None`.
    async fn search_by_title(
        &self,
        queries: &[TitleQuery],
    ) -> AppResult<HashMap<String, Option<Media>>>;

    /// Full entry, relations included
    async fn get_by_id(&self, id: i64) -> AppResult<Media>;

    async fn search_by_text(&self, text: &str, filters: &SearchFilters) -> AppResult<Vec<Media>>;
}

/// Tells whether an entry numbers its episodes from zero, which shifts its
/// episode ceiling down by one.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ZeroEpisodeHeuristic: Send + Sync {
    async fn has_leading_zero_episode(&self, media: &Media) -> bool;
}

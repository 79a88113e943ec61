// src/services/test_support.rs
//
// In-memory catalog and fixtures shared by service tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;

use crate::domain::media::{
    Media, MediaFormat, MediaNode, MediaStatus, MediaTitle, RelationEdge, RelationType, TitleField,
};
use crate::error::{AppError, AppResult};
use crate::integrations::catalog::{CatalogService, SearchFilters, TitleQuery};

pub(crate) struct InMemoryCatalog {
    media: HashMap<i64, Media>,
    pub title_searches: AtomicUsize,
    pub id_lookups: AtomicUsize,
}

impl InMemoryCatalog {
    pub fn new(entries: Vec<Media>) -> Self {
        Self {
            media: entries.into_iter().map(|m| (m.id, m)).collect(),
            title_searches: AtomicUsize::new(0),
            id_lookups: AtomicUsize::new(0),
        }
    }

    fn sorted(&self) -> Vec<&Media> {
        let mut all: Vec<&Media> = self.media.values().collect();
        all.sort_by_key(|m| m.id);
        all
    }
}

#[async_trait]
impl CatalogService for InMemoryCatalog {
    async fn search_by_title(
        &self,
        queries: &[TitleQuery],
    ) -> AppResult<HashMap<String, Option<Media>>> {
        self.title_searches.fetch_add(1, Ordering::SeqCst);
        let mut results: HashMap<String, Option<Media>> = HashMap::new();
        for query in queries {
            if results.get(&query.key).is_some_and(Option::is_some) {
                continue;
            }
            let hit = self
                .sorted()
                .into_iter()
                .find(|m| {
                    query.year.map_or(true, |y| m.season_year == Some(y))
                        && m.title_values(&TitleField::ALL)
                            .iter()
                            .any(|t| t.eq_ignore_ascii_case(&query.title))
                })
                .cloned();
            results.insert(query.key.clone(), hit);
        }
        Ok(results)
    }

    async fn get_by_id(&self, id: i64) -> AppResult<Media> {
        self.id_lookups.fetch_add(1, Ordering::SeqCst);
        self.media.get(&id).cloned().ok_or(AppError::NotFound)
    }

    async fn search_by_text(&self, text: &str, filters: &SearchFilters) -> AppResult<Vec<Media>> {
        let needle = text.to_lowercase();
        Ok(self
            .sorted()
            .into_iter()
            .filter(|m| filters.accepts(m))
            .filter(|m| {
                m.title_values(&TitleField::ALL)
                    .iter()
                    .any(|t| t.to_lowercase().contains(&needle))
            })
            .cloned()
            .collect())
    }
}

pub(crate) fn tv(id: i64, title: &str, episodes: u32) -> Media {
    Media {
        format: Some(MediaFormat::Tv),
        status: Some(MediaStatus::Finished),
        episodes: Some(episodes),
        ..Media::new(id, title)
    }
}

pub(crate) fn edge(relation_type: RelationType, id: i64, format: MediaFormat) -> RelationEdge {
    RelationEdge {
        relation_type,
        node: MediaNode {
            id,
            format: Some(format),
            title: MediaTitle::default(),
        },
    }
}

/// Link consecutive entries with PREQUEL/SEQUEL edges.
pub(crate) fn chain(mut entries: Vec<Media>) -> Vec<Media> {
    for i in 0..entries.len() {
        if i > 0 {
            let prev = entries[i - 1].clone();
            entries[i].relations.push(edge(
                RelationType::Prequel,
                prev.id,
                prev.format.unwrap_or(MediaFormat::Tv),
            ));
        }
        if i + 1 < entries.len() {
            let next = entries[i + 1].clone();
            entries[i].relations.push(edge(
                RelationType::Sequel,
                next.id,
                next.format.unwrap_or(MediaFormat::Tv),
            ));
        }
    }
    entries
}

/// Three finished 12-episode seasons, ids 1..=3.
pub(crate) fn three_seasons(title: &str) -> Vec<Media> {
    chain(vec![
        tv(1, title, 12),
        tv(2, &format!("{} Season 2", title), 12),
        tv(3, &format!("{} Season 3", title), 12),
    ])
}

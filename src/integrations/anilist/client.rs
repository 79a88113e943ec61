// src/integrations/anilist/client.rs
//
// AniList catalog over GraphQL
//
// ARCHITECTURE:
// - Implements CatalogService for the resolver
// - One rate-limited request path shared by every operation
// - Maps wire structs → domain Media (the resolver never sees GraphQL shapes)
//
// CRITICAL RULES:
// - This is INFRASTRUCTURE, not DOMAIN
// - Transport failures surface as AppError::Http, unusable answers as
//   AppError::Catalog
// - 429/500 are retried after the advertised delay, at most MAX_ATTEMPTS times

use std::collections::{HashMap, HashSet};
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{header, Client, StatusCode};
use serde::Deserialize;
use serde_json::{json, Map, Value};
use tokio::sync::Mutex;
use tokio::time::Instant;

use crate::config::CatalogConfig;
use crate::domain::media::{
    Media, MediaFormat, MediaNode, MediaStatus, MediaTitle, RelationEdge, RelationType,
};
use crate::error::{AppError, AppResult};
use crate::integrations::catalog::{CatalogService, SearchFilters, TitleQuery};

const MAX_ATTEMPTS: u32 = 3;
const DEFAULT_RETRY_AFTER_SECS: u64 = 60;
const ID_PAGE_SIZE: usize = 50;

// ============================================================================
// WIRE TYPES
// ============================================================================

#[derive(Debug, Deserialize)]
struct GraphQLResponse<T> {
    data: Option<T>,
    errors: Option<Vec<GraphQLError>>,
}

#[derive(Debug, Deserialize)]
struct GraphQLError {
    message: String,
}

#[derive(Debug, Deserialize)]
struct PageData {
    #[serde(default)]
    media: Vec<MediaData>,
}

#[derive(Debug, Deserialize)]
struct PageWrapper {
    #[serde(rename = "Page")]
    page: PageData,
}

#[derive(Debug, Deserialize)]
struct SingleMedia {
    #[serde(rename = "Media")]
    media: MediaData,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TitleData {
    romaji: Option<String>,
    english: Option<String>,
    native: Option<String>,
    user_preferred: Option<String>,
}

#[derive(Debug, Deserialize)]
struct NextAiringData {
    episode: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct StreamingEpisodeData {
    title: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct NodeData {
    id: i64,
    format: Option<String>,
    #[serde(default)]
    title: Option<TitleData>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct EdgeData {
    relation_type: Option<String>,
    node: Option<NodeData>,
}

#[derive(Debug, Deserialize)]
struct RelationsData {
    #[serde(default)]
    edges: Vec<EdgeData>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MediaData {
    id: i64,
    #[serde(default)]
    title: Option<TitleData>,
    #[serde(default)]
    synonyms: Option<Vec<String>>,
    format: Option<String>,
    status: Option<String>,
    episodes: Option<u32>,
    season_year: Option<i32>,
    next_airing_episode: Option<NextAiringData>,
    #[serde(default)]
    streaming_episodes: Option<Vec<StreamingEpisodeData>>,
    relations: Option<RelationsData>,
}

/// Catalog enums arrive as SCREAMING_SNAKE_CASE strings; unknown values
/// become `None` instead of failing the whole page.
fn parse_enum<T: for<'de> Deserialize<'de>>(value: Option<&str>) -> Option<T> {
    value.and_then(|v| serde_json::from_value(Value::String(v.to_string())).ok())
}

impl TitleData {
    fn into_title(self) -> MediaTitle {
        MediaTitle {
            user_preferred: self.user_preferred,
            english: self.english,
            romaji: self.romaji,
            native: self.native,
        }
    }
}

impl MediaData {
    fn into_media(self) -> Media {
        let relations = self
            .relations
            .map(|r| r.edges)
            .unwrap_or_default()
            .into_iter()
            .filter_map(|edge| {
                let node = edge.node?;
                Some(RelationEdge {
                    relation_type: parse_enum(edge.relation_type.as_deref())
                        .unwrap_or(RelationType::Other),
                    node: MediaNode {
                        id: node.id,
                        format: parse_enum::<MediaFormat>(node.format.as_deref()),
                        title: node.title.map(TitleData::into_title).unwrap_or_default(),
                    },
                })
            })
            .collect();

        Media {
            id: self.id,
            title: self.title.map(TitleData::into_title).unwrap_or_default(),
            synonyms: self.synonyms.unwrap_or_default(),
            format: parse_enum(self.format.as_deref()),
            status: parse_enum::<MediaStatus>(self.status.as_deref()),
            episodes: self.episodes,
            next_airing_episode: self.next_airing_episode.and_then(|n| n.episode),
            season_year: self.season_year,
            streaming_episodes: self
                .streaming_episodes
                .unwrap_or_default()
                .into_iter()
                .filter_map(|e| e.title)
                .collect(),
            relations,
        }
    }
}

// ============================================================================
// QUERIES
// ============================================================================

const MEDIA_FIELDS: &str = r#"
    id
    title { romaji english native userPreferred }
    synonyms
    format
    status
    episodes
    seasonYear
    nextAiringEpisode { episode }
    streamingEpisodes { title }
    relations {
        edges {
            relationType(version: 2)
            node { id format title { romaji english native userPreferred } }
        }
    }
"#;

fn media_by_id_query() -> String {
    format!(
        "query ($id: Int) {{ Media(id: $id, type: ANIME) {{ {} }} }}",
        MEDIA_FIELDS
    )
}

fn media_by_ids_query() -> String {
    format!(
        "query ($ids: [Int], $perPage: Int) {{ Page(perPage: $perPage) {{ media(id_in: $ids, type: ANIME) {{ {} }} }} }}",
        MEDIA_FIELDS
    )
}

fn text_search_query() -> String {
    format!(
        "query ($search: String, $idNot: [Int], $formatNot: [MediaFormat]) {{ \
         Page(perPage: 50) {{ media(type: ANIME, search: $search, id_not_in: $idNot, \
         format_not_in: $formatNot, format_not: MUSIC) {{ {} }} }} }}",
        MEDIA_FIELDS
    )
}

/// One aliased `Page` per title query. Adult duplicates reuse the previous
/// variable since the title text is identical.
fn compound_query(queries: &[TitleQuery]) -> (String, Map<String, Value>) {
    let mut variables = Map::new();
    let mut declarations = Vec::new();
    let mut fragments = Vec::new();

    for (i, query) in queries.iter().enumerate() {
        let reuse_previous = query.is_adult && i != 0;
        if !reuse_previous {
            variables.insert(format!("v{}", i), Value::String(query.title.clone()));
            declarations.push(format!("$v{}: String", i));
        }
        let variable = if reuse_previous { i - 1 } else { i };
        let year = query
            .year
            .map(|y| format!(", seasonYear: {}", y))
            .unwrap_or_default();
        fragments.push(format!(
            "v{}: Page(perPage: 10) {{ media(type: ANIME, search: $v{}, status_not: CANCELLED, isAdult: {}{}) {{ ...med }} }}",
            i, variable, query.is_adult, year
        ));
    }

    let text = format!(
        "query ({}) {{ {} }} fragment med on Media {{ id title {{ romaji english native userPreferred }} synonyms }}",
        declarations.join(", "),
        fragments.join(" ")
    );
    (text, variables)
}

/// Closest entry to `title` by edit distance over every title field.
fn closest_id(candidates: &[MediaData], title: &str) -> Option<i64> {
    let wanted = title.to_lowercase();
    candidates
        .iter()
        .map(|data| {
            let titles = data
                .title
                .as_ref()
                .map(|t| {
                    [&t.user_preferred, &t.english, &t.romaji, &t.native]
                        .into_iter()
                        .flatten()
                        .cloned()
                        .collect::<Vec<_>>()
                })
                .unwrap_or_default();
            let distance = titles
                .iter()
                .chain(data.synonyms.iter().flatten())
                .map(|t| strsim::levenshtein(&t.to_lowercase(), &wanted))
                .min()
                .unwrap_or(usize::MAX);
            (distance, data.id)
        })
        .min_by_key(|(distance, _)| *distance)
        .map(|(_, id)| id)
}

// ============================================================================
// CLIENT
// ============================================================================

/// AniList API Client
pub struct AniListClient {
    base_url: String,
    http_client: Client,
    min_interval: Duration,
    last_request: Mutex<Option<Instant>>,
}

impl AniListClient {
    pub fn new(config: &CatalogConfig) -> AppResult<Self> {
        let http_client = Client::builder()
            .timeout(config.request_timeout())
            .build()?;

        Ok(Self {
            base_url: config.endpoint.clone(),
            http_client,
            min_interval: config.min_request_interval(),
            last_request: Mutex::new(None),
        })
    }

    /// Space requests at least `min_interval` apart. The lock is held while
    /// sleeping so waiting callers queue up in order.
    async fn wait_turn(&self) {
        let mut last = self.last_request.lock().await;
        if let Some(previous) = *last {
            let elapsed = previous.elapsed();
            if elapsed < self.min_interval {
                tokio::time::sleep(self.min_interval - elapsed).await;
            }
        }
        *last = Some(Instant::now());
    }

    async fn execute_query<T>(&self, query: &str, variables: Value) -> AppResult<T>
    where
        T: for<'de> Deserialize<'de>,
    {
        let body = json!({
            "query": query,
            "variables": variables
        });

        let mut attempt = 0;
        loop {
            attempt += 1;
            self.wait_turn().await;

            let response = self
                .http_client
                .post(&self.base_url)
                .header(header::CONTENT_TYPE, "application/json")
                .header(header::ACCEPT, "application/json")
                .json(&body)
                .send()
                .await?;

            let status = response.status();
            if status == StatusCode::TOO_MANY_REQUESTS || status == StatusCode::INTERNAL_SERVER_ERROR {
                if attempt >= MAX_ATTEMPTS {
                    return Err(AppError::Catalog(format!(
                        "AniList returned {} after {} attempts",
                        status, attempt
                    )));
                }
                let delay = if status == StatusCode::TOO_MANY_REQUESTS {
                    let seconds = response
                        .headers()
                        .get(header::RETRY_AFTER)
                        .and_then(|v| v.to_str().ok())
                        .and_then(|v| v.trim().parse::<u64>().ok())
                        .unwrap_or(DEFAULT_RETRY_AFTER_SECS);
                    Duration::from_secs(seconds + 1)
                } else {
                    Duration::from_secs(1)
                };
                log::warn!("AniList returned {}, retrying in {:?}", status, delay);
                tokio::time::sleep(delay).await;
                continue;
            }

            if !status.is_success() && status != StatusCode::NOT_FOUND {
                return Err(AppError::Catalog(format!("AniList API returned status: {}", status)));
            }

            let graphql_response: GraphQLResponse<T> = response.json().await?;

            if let Some(errors) = graphql_response.errors {
                if !errors.is_empty() {
                    let messages: Vec<String> = errors.into_iter().map(|e| e.message).collect();
                    return Err(AppError::Catalog(format!(
                        "AniList API errors: {}",
                        messages.join(", ")
                    )));
                }
            }

            return graphql_response
                .data
                .ok_or_else(|| AppError::Catalog("AniList API returned no data".to_string()));
        }
    }

    async fn fetch_ids(&self, ids: &[i64]) -> AppResult<Vec<Media>> {
        let mut out = Vec::with_capacity(ids.len());
        for chunk in ids.chunks(ID_PAGE_SIZE) {
            let data: PageWrapper = self
                .execute_query(
                    &media_by_ids_query(),
                    json!({ "ids": chunk, "perPage": ID_PAGE_SIZE }),
                )
                .await?;
            out.extend(data.page.media.into_iter().map(MediaData::into_media));
        }
        Ok(out)
    }
}

#[async_trait]
impl CatalogService for AniListClient {
    async fn search_by_title(
        &self,
        queries: &[TitleQuery],
    ) -> AppResult<HashMap<String, Option<Media>>> {
        let mut results: HashMap<String, Option<Media>> =
            queries.iter().map(|q| (q.key.clone(), None)).collect();
        if queries.is_empty() {
            return Ok(results);
        }
        log::debug!("Searching for {} titles via compound search", queries.len());

        let (text, variables) = compound_query(queries);
        let pages: HashMap<String, PageData> =
            self.execute_query(&text, Value::Object(variables)).await?;

        let mut chosen: Vec<(String, i64)> = Vec::new();
        let mut seen: HashSet<String> = HashSet::new();
        for (i, query) in queries.iter().enumerate() {
            if seen.contains(&query.key) {
                continue;
            }
            let page = match pages.get(&format!("v{}", i)) {
                Some(page) if !page.media.is_empty() => page,
                _ => continue,
            };
            if let Some(id) = closest_id(&page.media, &query.title) {
                seen.insert(query.key.clone());
                chosen.push((query.key.clone(), id));
            }
        }

        let mut ids: Vec<i64> = chosen.iter().map(|(_, id)| *id).collect();
        ids.sort_unstable();
        ids.dedup();
        let full: HashMap<i64, Media> = self
            .fetch_ids(&ids)
            .await?
            .into_iter()
            .map(|m| (m.id, m))
            .collect();

        for (key, id) in chosen {
            results.insert(key, full.get(&id).cloned());
        }
        Ok(results)
    }

    async fn get_by_id(&self, id: i64) -> AppResult<Media> {
        let data: Option<SingleMedia> = self
            .execute_query(&media_by_id_query(), json!({ "id": id }))
            .await
            .map(Some)
            .or_else(|e| match e {
                AppError::Catalog(ref msg) if msg.contains("Not Found") => Ok(None),
                other => Err(other),
            })?;
        match data {
            Some(data) => Ok(data.media.into_media()),
            None => Err(AppError::NotFound),
        }
    }

    async fn search_by_text(&self, text: &str, filters: &SearchFilters) -> AppResult<Vec<Media>> {
        let format_not: Option<Vec<String>> = if filters.format_not.is_empty() {
            None
        } else {
            Some(filters.format_not.iter().map(|f| f.to_string()).collect())
        };
        let variables = json!({
            "search": text,
            "idNot": filters.id_not.map(|id| vec![id]),
            "formatNot": format_not,
        });

        let data: PageWrapper = self.execute_query(&text_search_query(), variables).await?;
        Ok(data
            .page
            .media
            .into_iter()
            .map(MediaData::into_media)
            .filter(|m| filters.accepts(m))
            .collect())
    }
}

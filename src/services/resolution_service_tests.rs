// src/services/resolution_service_tests.rs
//
// End-to-end resolution scenarios against in-memory and mocked catalogs.

use std::collections::HashMap;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use crate::config::ResolutionConfig;
use crate::domain::descriptor::{EpisodeNumber, ParsedDescriptor};
use crate::domain::media::{Media, MediaStatus, MediaTitle};
use crate::domain::resolution::{ResolutionStage, ResolvedEpisode};
use crate::error::AppError;
use crate::integrations::catalog::{CatalogService, MockCatalogService};
use crate::integrations::zero_episode::NoZeroEpisodes;
use crate::services::resolution_service::ResolutionService;
use crate::services::test_support::{chain, three_seasons, tv, InMemoryCatalog};

fn service(catalog: Arc<dyn CatalogService>) -> ResolutionService {
    ResolutionService::new(catalog, Arc::new(NoZeroEpisodes), &ResolutionConfig::default())
}

fn attack_on_titan() -> Vec<Media> {
    let mut entries = chain(vec![
        tv(16498, "Shingeki no Kyojin", 25),
        tv(20958, "Shingeki no Kyojin Season 2", 12),
        tv(99147, "Shingeki no Kyojin Season 3", 22),
        tv(110277, "Shingeki no Kyojin: The Final Season", 28),
    ]);
    entries[0].title = MediaTitle {
        user_preferred: Some("Shingeki no Kyojin".to_string()),
        english: Some("Attack on Titan".to_string()),
        ..MediaTitle::default()
    };
    entries[3].synonyms = vec![
        "Attack on Titan Season 4".to_string(),
        "Attack on Titan Final Season".to_string(),
    ];
    entries
}

// ============================================================================
// DIRECT RESOLUTION
// ============================================================================

#[tokio::test]
async fn test_direct_match_is_not_failed() {
    let catalog = Arc::new(InMemoryCatalog::new(vec![tv(1, "Sousou no Frieren", 28)]));
    let service = service(catalog);

    let results = service
        .resolve_files(&["[SubsPlease] Sousou no Frieren - 05 (1080p).mkv".to_string()])
        .await;

    assert_eq!(results.len(), 1);
    let result = &results[0];
    assert!(!result.failed);
    assert_eq!(result.media_id(), Some(1));
    assert_eq!(result.episode, Some(ResolvedEpisode::Number(5)));
    assert_eq!(result.season, Some(1));
    assert_eq!(result.stage, ResolutionStage::Direct);
}

#[tokio::test]
async fn test_season_scoped_title_resolves_without_walking() {
    let catalog = Arc::new(InMemoryCatalog::new(attack_on_titan()));
    let service = service(catalog.clone());

    let results = service
        .resolve_files(&["Attack on Titan S4 - 25".to_string()])
        .await;

    let result = &results[0];
    assert!(!result.failed);
    assert_eq!(result.media_id(), Some(110277));
    assert_eq!(result.episode, Some(ResolvedEpisode::Number(25)));
    assert_eq!(result.season, Some(4));
    assert_eq!(result.stage, ResolutionStage::Direct);
    assert_eq!(catalog.id_lookups.load(Ordering::SeqCst), 0);
}

// ============================================================================
// SEASON WALK
// ============================================================================

#[tokio::test]
async fn test_absolute_episode_is_rebased_onto_third_season() {
    let catalog = Arc::new(InMemoryCatalog::new(three_seasons("Chain Show")));
    let service = service(catalog);

    let results = service.resolve_files(&["Chain Show - 25".to_string()]).await;

    let result = &results[0];
    assert!(!result.failed);
    assert_eq!(result.media_id(), Some(3));
    assert_eq!(result.episode, Some(ResolvedEpisode::Number(1)));
    assert_eq!(result.stage, ResolutionStage::SeasonWalk);
}

#[tokio::test]
async fn test_loosely_named_sequel_walks_from_root() {
    let mut entries = three_seasons("Chain Show");
    entries[1].title.user_preferred = Some("Chain Show: Second Arc".to_string());
    entries[1].synonyms = vec!["Chain Show S2".to_string()];
    let catalog = Arc::new(InMemoryCatalog::new(entries));
    let service = service(catalog);

    let results = service.resolve_files(&["Chain Show S2 - 05".to_string()]).await;

    let result = &results[0];
    assert!(!result.failed);
    assert_eq!(result.media_id(), Some(2));
    assert_eq!(result.episode, Some(ResolvedEpisode::Number(5)));
    assert_eq!(result.season, Some(2));
}

#[tokio::test]
async fn test_batch_starting_at_one_is_left_unsplit() {
    let entries = chain(vec![tv(1, "Range Show", 12), tv(2, "Range Show Season 2", 13)]);
    let catalog = Arc::new(InMemoryCatalog::new(entries));
    let service = service(catalog);

    let results = service.resolve_files(&["Range Show - 01-13".to_string()]).await;

    let result = &results[0];
    assert_eq!(result.descriptor.episode, Some(EpisodeNumber::Range(1, 13)));
    assert_eq!(result.episode, Some(ResolvedEpisode::range(1, 13)));
    assert_eq!(result.media_id(), Some(1));
    assert_eq!(result.stage, ResolutionStage::Direct);
    // the whole batch stays on the first season and is reported as resolved
    assert!(!result.failed);
    assert!(result.is_confident());
}

#[tokio::test]
async fn test_overflowing_range_is_rebased_onto_next_season() {
    let catalog = Arc::new(InMemoryCatalog::new(three_seasons("Chain Show")));
    let service = service(catalog);

    let results = service.resolve_files(&["Chain Show - 13-24".to_string()]).await;

    let result = &results[0];
    assert_eq!(result.descriptor.episode, Some(EpisodeNumber::Range(13, 24)));
    assert!(!result.failed);
    assert_eq!(result.media_id(), Some(2));
    assert_eq!(result.episode, Some(ResolvedEpisode::range(1, 12)));
    assert_eq!(result.stage, ResolutionStage::SeasonWalk);
}

#[tokio::test]
async fn test_range_past_the_last_season_is_left_unsplit_and_failed() {
    let catalog = Arc::new(InMemoryCatalog::new(vec![tv(1, "Lone Show", 12)]));
    let service = service(catalog);

    let results = service.resolve_files(&["Lone Show - 13-24".to_string()]).await;

    let result = &results[0];
    assert!(result.failed);
    assert!(!result.is_upstream_failure());
    assert_eq!(result.media_id(), Some(1));
    assert_eq!(result.episode, Some(ResolvedEpisode::range(13, 24)));
    assert_eq!(result.stage, ResolutionStage::SeasonWalk);
}

// ============================================================================
// FALLBACKS AND FAILURES
// ============================================================================

#[tokio::test]
async fn test_manual_search_finds_unindexed_title() {
    let entry = Media {
        status: Some(MediaStatus::Releasing),
        ..tv(7, "Kusuriya no Hitorigoto", 24)
    };

    let mut catalog = MockCatalogService::new();
    catalog
        .expect_search_by_title()
        .times(1)
        .returning(|queries| {
            Ok(queries
                .iter()
                .map(|q| (q.key.clone(), None))
                .collect::<HashMap<_, _>>())
        });
    catalog
        .expect_search_by_text()
        .times(1)
        .returning(move |_, _| Ok(vec![entry.clone()]));
    let service = service(Arc::new(catalog));

    let result = service
        .resolve_file_anime(
            ParsedDescriptor::new("Kusuriya no Hitorigoto").with_episode(EpisodeNumber::Single(3)),
        )
        .await;

    assert!(!result.failed);
    assert_eq!(result.media_id(), Some(7));
    assert_eq!(result.episode, Some(ResolvedEpisode::Number(3)));
    assert_eq!(result.stage, ResolutionStage::ManualSearch);
}

#[tokio::test]
async fn test_unreachable_catalog_is_reported_on_the_result() {
    let mut catalog = MockCatalogService::new();
    catalog
        .expect_search_by_title()
        .returning(|_| Err(AppError::Catalog("503 Service Unavailable".to_string())));
    catalog
        .expect_search_by_text()
        .returning(|_, _| Err(AppError::Catalog("503 Service Unavailable".to_string())));
    let service = service(Arc::new(catalog));

    let results = service.resolve_files(&["Some Show - 03".to_string()]).await;

    let result = &results[0];
    assert!(result.failed);
    assert!(result.media.is_none());
    assert_eq!(result.episode, Some(ResolvedEpisode::Number(3)));
    assert_eq!(result.stage, ResolutionStage::Unresolved);
    assert!(result.is_upstream_failure());
    assert_eq!(
        result.upstream_error.as_deref(),
        Some("Catalog error: 503 Service Unavailable")
    );
}

#[tokio::test]
async fn test_answered_search_is_not_an_upstream_failure() {
    let mut catalog = MockCatalogService::new();
    catalog.expect_search_by_title().returning(|queries| {
        Ok(queries
            .iter()
            .map(|q| (q.key.clone(), None))
            .collect::<HashMap<_, _>>())
    });
    catalog
        .expect_search_by_text()
        .returning(|_, _| Err(AppError::Catalog("503 Service Unavailable".to_string())));
    let service = service(Arc::new(catalog));

    let results = service.resolve_files(&["Some Show - 03".to_string()]).await;

    assert!(results[0].failed);
    assert!(results[0].media.is_none());
    assert_eq!(results[0].upstream_error, None);
}

#[tokio::test]
async fn test_malformed_and_excluded_make_no_catalog_calls() {
    // no expectations: any catalog call panics
    let service = service(Arc::new(MockCatalogService::new()));

    let result = service.resolve_file_anime(ParsedDescriptor::new("  ")).await;
    assert!(result.failed);
    assert!(result.media.is_none());

    let results = service
        .resolve_files(&["[Group] Some Show - NCOP1 [1080p]".to_string(), String::new()])
        .await;
    assert_eq!(results.len(), 2);
    assert!(results.iter().all(|r| r.failed && r.media.is_none()));
}

#[tokio::test]
async fn test_missing_display_title_is_failed() {
    let mut entry = tv(1, "Untitled Show", 12);
    entry.title.user_preferred = None;
    entry.title.english = Some("Untitled Show".to_string());
    let service = service(Arc::new(InMemoryCatalog::new(vec![entry])));

    let results = service.resolve_files(&["Untitled Show - 02".to_string()]).await;
    assert!(results[0].failed);
    assert_eq!(results[0].media_id(), Some(1));
}

// ============================================================================
// BATCHING
// ============================================================================

#[tokio::test]
async fn test_batch_shares_one_title_search() {
    let catalog = Arc::new(InMemoryCatalog::new(three_seasons("Chain Show")));
    let service = service(catalog.clone());

    let files: Vec<String> = (1..=6).map(|ep| format!("Chain Show - {:02}", ep)).collect();
    let results = service.resolve_files(&files).await;

    assert_eq!(catalog.title_searches.load(Ordering::SeqCst), 1);
    assert!(results.iter().all(|r| r.media_id() == Some(1) && !r.failed));
    assert_eq!(results[5].episode, Some(ResolvedEpisode::Number(6)));

    service.clear_session();
    assert!(service.title_cache().is_empty());
}

#[test]
fn test_title_query_variants() {
    let service = service(Arc::new(MockCatalogService::new()));
    let descriptor = ParsedDescriptor::new("Made in Abyss")
        .with_year(2017)
        .with_release_info("Batch");

    let queries = service.title_queries(&descriptor);
    let titles: Vec<(&str, Option<i32>, bool)> = queries
        .iter()
        .map(|q| (q.title.as_str(), q.year, q.is_adult))
        .collect();
    assert_eq!(
        titles,
        vec![
            ("Made in Abyss Batch", None, false),
            ("Made in Abyss Batch", Some(2017), false),
            ("Made in Abyss", Some(2017), false),
            ("Made in Abyss", None, false),
            ("Made in Abyss", None, true),
        ]
    );
    assert!(queries.iter().all(|q| q.key == "Made in Abyss2017Batch"));
}

#[tokio::test]
async fn test_identical_batches_resolve_identically() {
    let catalog = Arc::new(InMemoryCatalog::new(three_seasons("Chain Show")));
    let service = service(catalog);
    let files = vec![
        "Chain Show - 03".to_string(),
        "Chain Show - 14".to_string(),
        "Chain Show - 30".to_string(),
    ];

    let first = service.resolve_files(&files).await;
    service.clear_session();
    let second = service.resolve_files(&files).await;

    assert_eq!(first, second);
    assert_eq!(first[1].media_id(), Some(2));
    assert_eq!(first[1].episode, Some(ResolvedEpisode::Number(2)));
}

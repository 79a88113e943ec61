// src/services/resolution_service.rs
//
// Resolution Service - the resolution orchestrator
//
// Turns release filenames into (media, episode, season) decisions.
//
// CRITICAL RULES:
// - Never fails on an unresolvable title: absence of a match is `failed`
//   and `media: None`, never an error
// - Upstream failures are logged and the next fallback stage runs; when no
//   stage got an answer from the catalog the failure is put on the result
// - Malformed descriptors and non-episode release types make no catalog calls
// - Read-only: the mapping cache is written by callers, never from here
// - Title lookups go through the service's own TitleCache; concurrent
//   lookups of one key share a single catalog request
//
// FALLBACK ORDER:
// 1. Direct: cached title search, verified, episode within the ceiling
// 2. Season walk: prequel/root resolution and offset re-basing
// 3. Alternate title: season token stripped, episode read from the title
// 4. Manual search: free-text catalog search with the rejected entry excluded

use std::collections::HashSet;
use std::sync::Arc;

use futures::future::join_all;
use log::{debug, info, warn};

use crate::config::ResolutionConfig;
use crate::domain::descriptor::{EpisodeNumber, ParsedDescriptor};
use crate::domain::media::{Media, MediaFormat, TitleField};
use crate::domain::resolution::{ResolutionResult, ResolutionStage, ResolvedEpisode};
use crate::error::AppResult;
use crate::integrations::catalog::{CatalogService, SearchFilters, TitleQuery, ZeroEpisodeHeuristic};
use crate::services::fuzzy::adaptive_threshold;
use crate::services::season_walker::{PrequelOutcome, SeasonWalker, WalkOptions};
use crate::services::title_cache::TitleCache;
use crate::services::title_normalizer::{
    split_parenthetical, strip_season_episode_token, TitleNormalizer,
};
use crate::services::tokenizer::{FilenameTokenizer, Tokenizer};
use crate::services::verifier::MediaVerifier;

const FIELDS: [TitleField; 5] = TitleField::ALL;

/// Intermediate decision of one fallback stage
#[derive(Debug, Clone)]
struct Outcome {
    media: Option<Media>,
    episode: Option<ResolvedEpisode>,
    /// Descriptor re-derived by the stage, replacing the parsed one
    descriptor: Option<ParsedDescriptor>,
    failed: bool,
    stage: ResolutionStage,
}

impl Outcome {
    fn found(media: Media, stage: ResolutionStage) -> Self {
        Self {
            media: Some(media),
            episode: None,
            descriptor: None,
            failed: false,
            stage,
        }
    }

    fn with_episode(mut self, episode: Option<ResolvedEpisode>) -> Self {
        self.episode = episode;
        self
    }
}

/// Catalog answers seen while resolving one descriptor
#[derive(Debug, Default)]
struct CatalogTrace {
    answered: bool,
    upstream: Option<String>,
}

impl CatalogTrace {
    fn note<T>(&mut self, result: &AppResult<T>) {
        match result {
            Err(e) if e.is_upstream() => self.upstream = Some(e.to_string()),
            _ => self.answered = true,
        }
    }

    /// Last upstream failure, if no catalog call was ever answered.
    fn unanswered(self) -> Option<String> {
        if self.answered {
            None
        } else {
            self.upstream
        }
    }
}

// ============================================================================
// RESOLUTION SERVICE
// ============================================================================

pub struct ResolutionService {
    catalog: Arc<dyn CatalogService>,
    tokenizer: Arc<dyn Tokenizer>,
    normalizer: Arc<TitleNormalizer>,
    verifier: Arc<MediaVerifier>,
    walker: SeasonWalker,
    title_cache: TitleCache,
    chunk_size: usize,
}

impl ResolutionService {
    pub fn new(
        catalog: Arc<dyn CatalogService>,
        zero_episode: Arc<dyn ZeroEpisodeHeuristic>,
        config: &ResolutionConfig,
    ) -> Self {
        let verifier = Arc::new(MediaVerifier::default());
        Self {
            walker: SeasonWalker::new(catalog.clone(), zero_episode, verifier.clone()),
            catalog,
            tokenizer: Arc::new(FilenameTokenizer::new()),
            normalizer: Arc::new(TitleNormalizer::default()),
            verifier,
            title_cache: TitleCache::new(
                config.title_cache_ttl(),
                config.title_cache_max_entries,
            ),
            chunk_size: config.search_chunk_size.max(1),
        }
    }

    pub fn with_tokenizer(mut self, tokenizer: Arc<dyn Tokenizer>) -> Self {
        self.tokenizer = tokenizer;
        self
    }

    pub fn with_normalizer(mut self, normalizer: TitleNormalizer) -> Self {
        self.normalizer = Arc::new(normalizer);
        self
    }

    pub fn title_cache(&self) -> &TitleCache {
        &self.title_cache
    }

    /// Forget every title lookup; the next batch starts a fresh session.
    pub fn clear_session(&self) {
        self.title_cache.clear();
    }

    // ========================================================================
    // BATCH ENTRY POINT
    // ========================================================================

    /// Resolve a batch of filenames. One result per descriptor, in input order.
    pub async fn resolve_files(&self, file_names: &[String]) -> Vec<ResolutionResult> {
        let start_time = std::time::Instant::now();

        let mut descriptors: Vec<ParsedDescriptor> = Vec::with_capacity(file_names.len());
        for file_name in file_names {
            let cleaned = self.normalizer.clean_file_name(file_name);
            let parsed = self.tokenizer.tokenize(&cleaned);
            if parsed.is_empty() {
                let mut empty = ParsedDescriptor::new("");
                empty.file_name = Some(file_name.clone());
                descriptors.push(empty);
            } else {
                descriptors.extend(parsed);
            }
        }

        self.prefetch_titles(&descriptors).await;

        let results = join_all(
            descriptors
                .into_iter()
                .map(|descriptor| self.resolve_file_anime(descriptor)),
        )
        .await;

        let resolved = results.iter().filter(|r| r.is_confident()).count();
        let unreachable = results.iter().filter(|r| r.is_upstream_failure()).count();
        info!(
            "Resolved {}/{} files in {} ms",
            resolved,
            results.len(),
            start_time.elapsed().as_millis()
        );
        if unreachable > 0 {
            warn!("{} file(s) unresolved because the catalog could not be reached", unreachable);
        }
        results
    }

    /// Search all uncached titles of the batch up front, chunked.
    async fn prefetch_titles(&self, descriptors: &[ParsedDescriptor]) {
        let mut seen: HashSet<String> = HashSet::new();
        let mut queries: Vec<TitleQuery> = Vec::new();
        for descriptor in descriptors {
            if descriptor.is_malformed() || descriptor.is_excluded_from_search() {
                continue;
            }
            let key = descriptor.cache_key();
            if self.title_cache.contains(&key) || !seen.insert(key) {
                continue;
            }
            queries.extend(self.title_queries(descriptor));
        }
        if queries.is_empty() {
            return;
        }
        debug!("Prefetching {} title variants for {} keys", queries.len(), seen.len());

        for chunk in queries.chunks(self.chunk_size) {
            match self.catalog.search_by_title(chunk).await {
                Ok(found) => {
                    for (key, media) in found {
                        debug!("Found {} as {:?}", key, media.as_ref().map(|m| m.id));
                        self.title_cache.prime(&key, media);
                    }
                }
                Err(e) => {
                    warn!("Title prefetch failed, falling back to per-file lookups: {}", e);
                    return;
                }
            }
        }
    }

    /// Search variants for a descriptor, most specific first, with an
    /// adult-content duplicate of the last one.
    pub fn title_queries(&self, descriptor: &ParsedDescriptor) -> Vec<TitleQuery> {
        let key = descriptor.cache_key();
        let cleaned = self.normalizer.clean_file_name(&descriptor.title);
        let mut queries = Vec::new();

        for title in self.normalizer.alternative_titles(&cleaned) {
            if let Some(info) = descriptor.release_info.as_deref().filter(|i| !i.is_empty()) {
                let with_info = format!("{} {}", title, info);
                queries.push(TitleQuery::new(&key, &with_info));
                if descriptor.year.is_some() {
                    queries.push(TitleQuery::new(&key, &with_info).with_year(descriptor.year));
                }
            }
            if descriptor.year.is_some() {
                queries.push(TitleQuery::new(&key, &title).with_year(descriptor.year));
            }
            queries.push(TitleQuery::new(&key, &title));
        }

        if let Some(last) = queries.last().cloned() {
            queries.push(last.adult());
        }
        queries
    }

    /// Cached title search for one descriptor. Upstream errors count as a miss.
    async fn lookup(
        &self,
        descriptor: &ParsedDescriptor,
        trace: &mut CatalogTrace,
    ) -> Option<Media> {
        let key = descriptor.cache_key();
        let queries = self.title_queries(descriptor);
        let catalog = self.catalog.clone();
        let search_key = key.clone();

        let found = self
            .title_cache
            .get_or_search(&key, || async move {
                let mut found = catalog.search_by_title(&queries).await?;
                Ok(found.remove(&search_key).flatten())
            })
            .await;
        trace.note(&found);

        match found {
            Ok(media) => media,
            Err(e) => {
                warn!("Title search for {} failed: {}", key, e);
                None
            }
        }
    }

    /// Re-tokenize `title` with its season/episode token removed and look
    /// the result up.
    async fn retitle_lookup(
        &self,
        title: &str,
        trace: &mut CatalogTrace,
    ) -> Option<(ParsedDescriptor, Option<Media>)> {
        let stripped = strip_season_episode_token(title);
        let retitled = self.tokenizer.tokenize(&stripped).into_iter().next()?;
        if retitled.is_malformed() {
            return None;
        }
        let media = self.lookup(&retitled, trace).await;
        Some((retitled, media))
    }

    // ========================================================================
    // PER-FILE DECISION
    // ========================================================================

    /// Resolve one descriptor. Never fails; see `ResolutionResult::failed`.
    pub async fn resolve_file_anime(&self, descriptor: ParsedDescriptor) -> ResolutionResult {
        if descriptor.is_malformed() {
            debug!("Skipping malformed descriptor {:?}", descriptor.file_name);
            return ResolutionResult::unresolved(descriptor);
        }
        if descriptor.is_excluded_from_search() {
            debug!(
                "Skipping non-episode release {} ({:?})",
                descriptor.title, descriptor.release_types
            );
            return ResolutionResult::unresolved(descriptor);
        }

        let threshold = adaptive_threshold(&descriptor.title);
        let mut trace = CatalogTrace::default();
        let mut media = self.lookup(&descriptor, &mut trace).await;
        let needs_verification = !media
            .as_ref()
            .is_some_and(|m| self.verifier.is_verified(m, &descriptor, &FIELDS, threshold));
        let mut ceiling = match &media {
            Some(m) => self.walker.ceiling(m).await,
            None => None,
        };
        debug!(
            "Resolving {} {:?} ceiling {:?} {:?} verified:{}",
            descriptor.title,
            descriptor.episode,
            ceiling,
            media.as_ref().map(|m| m.id),
            !needs_verification
        );

        let mut outcome = Outcome {
            media: media.clone(),
            episode: None,
            descriptor: None,
            failed: false,
            stage: ResolutionStage::Direct,
        };
        let movie_without_count = media.as_ref().is_some_and(Media::is_movie) && ceiling.is_none();

        match descriptor.episode {
            Some(EpisodeNumber::Range(first, last)) if !movie_without_count => {
                let range = ResolvedEpisode::range(first, last);
                let overflows = ceiling.is_some_and(|c| last > c);
                if first == 1 {
                    // a batch starting at 1 that spans several seasons is not split
                    debug!("Range {} of {} starts at 1, leaving it unsplit", range, descriptor.title);
                    outcome.episode = Some(range.clone());
                    if needs_verification {
                        outcome = self
                            .manual_media_search(&descriptor, ceiling, media, threshold, &mut trace)
                            .await;
                        outcome.episode = outcome.episode.or(Some(range));
                    }
                } else if let (true, Some(current)) = (overflows, media) {
                    outcome = self
                        .find_result(&descriptor, ceiling, 0, current, threshold, &mut trace)
                        .await;
                } else {
                    outcome.episode = Some(range.clone());
                    if needs_verification {
                        outcome = self
                            .manual_media_search(
                                &descriptor,
                                ceiling,
                                outcome.media.take(),
                                threshold,
                                &mut trace,
                            )
                            .await;
                        outcome.episode = outcome.episode.or(Some(range));
                    }
                }
            }
            Some(EpisodeNumber::Single(episode)) if !movie_without_count => {
                let mut offset = 0;
                if needs_verification {
                    // loosely named sequel: start from the entry of the bare title
                    debug!("Fetching root media for {}", descriptor.title);
                    let retitled = self.retitle_lookup(&descriptor.title, &mut trace).await;
                    media = retitled.and_then(|(_, m)| m);
                    ceiling = match &media {
                        Some(m) => self.walker.ceiling(m).await,
                        None => None,
                    };
                    offset = media
                        .as_ref()
                        .and_then(|m| m.episodes.or(m.next_airing_episode))
                        .map(|n| -i64::from(n))
                        .unwrap_or(0);
                }

                let walk = ceiling.is_some_and(|c| episode > c || (offset != 0 && episode <= c));
                match (walk, media) {
                    (true, Some(current)) => {
                        outcome = self
                            .find_result(&descriptor, ceiling, offset, current, threshold, &mut trace)
                            .await;
                    }
                    (_, media) => {
                        outcome.episode = Some(ResolvedEpisode::Number(episode));
                        if needs_verification {
                            outcome = self
                                .manual_media_search(&descriptor, ceiling, media, threshold, &mut trace)
                                .await;
                            outcome.episode = outcome
                                .episode
                                .or(Some(ResolvedEpisode::Number(episode)));
                        }
                    }
                }
            }
            _ => {
                if needs_verification {
                    outcome = self
                        .manual_media_search(&descriptor, ceiling, media, threshold, &mut trace)
                        .await;
                }
            }
        }

        self.finish(descriptor, outcome, trace)
    }

    /// Apply the result defaults: episode fallbacks, season, display title.
    fn finish(
        &self,
        parsed: ParsedDescriptor,
        outcome: Outcome,
        trace: CatalogTrace,
    ) -> ResolutionResult {
        let descriptor = outcome.descriptor.unwrap_or(parsed);
        let media = outcome.media;

        let episode = outcome
            .episode
            .or_else(|| match descriptor.episode {
                Some(EpisodeNumber::Single(n)) => Some(ResolvedEpisode::Number(n)),
                Some(EpisodeNumber::Range(first, last)) => Some(ResolvedEpisode::range(first, last)),
                None => None,
            })
            .or_else(|| {
                let media = media.as_ref()?;
                let single = media.episodes == Some(1)
                    || (media.is_movie() && media.episodes.unwrap_or(0) <= 1);
                single.then_some(ResolvedEpisode::Number(1))
            });

        let season = match &media {
            Some(m) if m.is_movie() && descriptor.season.is_none() => None,
            _ => Some(descriptor.season.unwrap_or(1)),
        };

        let failed = outcome.failed || media.as_ref().and_then(Media::display_title).is_none();
        let stage = if media.is_none() {
            ResolutionStage::Unresolved
        } else {
            outcome.stage
        };
        let upstream_error = if failed { trace.unanswered() } else { None };
        if let Some(e) = &upstream_error {
            warn!("Giving up on {}, the catalog could not be reached: {}", descriptor.title, e);
        }

        debug!(
            "{} {} {:?} as {:?} episode {:?} via {}",
            if failed { "Failed to resolve" } else { "Resolved" },
            descriptor.title,
            descriptor.episode,
            media.as_ref().map(|m| m.id),
            episode,
            stage
        );

        ResolutionResult {
            media,
            episode,
            season,
            descriptor,
            failed,
            stage,
            upstream_error,
        }
    }

    // ========================================================================
    // FALLBACK STAGES
    // ========================================================================

    /// Prequel/root resolution, then the last-ditch and manual stages.
    async fn find_result(
        &self,
        descriptor: &ParsedDescriptor,
        ceiling: Option<u32>,
        offset: i64,
        media: Media,
        threshold: f64,
        trace: &mut CatalogTrace,
    ) -> Outcome {
        let walked = self
            .walker
            .find_prequel(descriptor, offset, &media, &FIELDS, threshold)
            .await;
        trace.note(&walked);
        let prequel = match walked {
            Ok(prequel) => prequel,
            Err(e) => {
                warn!("Season walk for {} failed: {}", descriptor.title, e);
                return self
                    .handle_episode(descriptor, ceiling, offset, &media, None, threshold, trace)
                    .await;
            }
        };

        let walk_failed = prequel.result.failed || prequel.result.local_episode().is_none();
        let mut fallback = None;
        if walk_failed {
            let handled = self
                .handle_episode(descriptor, ceiling, offset, &media, Some(&prequel), threshold, trace)
                .await;
            if !handled.failed {
                return handled;
            }
            fallback = Some(handled);
        }

        let root = &prequel.result.root_media;
        if self.verifier.is_verified(root, descriptor, &FIELDS, threshold) {
            debug!(
                "Found root media for {}: {}:{:?} from {}:{:?}",
                descriptor.title,
                root.id,
                root.display_title(),
                media.id,
                media.display_title()
            );
            let walked = prequel.result.episode;
            let episode = match descriptor.episode {
                Some(EpisodeNumber::Range(first, last)) if walk_failed => {
                    Some(ResolvedEpisode::range(first, last))
                }
                Some(EpisodeNumber::Range(first, last)) => {
                    let start = i64::from(first) - (i64::from(last) - walked);
                    Some(ResolvedEpisode::Range(format!("{} ~ {}", start, walked)))
                }
                Some(EpisodeNumber::Single(n)) if walk_failed => Some(ResolvedEpisode::Number(n)),
                _ => prequel.result.local_episode().map(ResolvedEpisode::Number),
            };
            if walk_failed {
                debug!("Failed to resolve {} {:?}", descriptor.title, descriptor.episode);
            }
            return Outcome {
                media: Some(prequel.result.root_media),
                episode,
                descriptor: None,
                failed: walk_failed,
                stage: ResolutionStage::SeasonWalk,
            };
        }

        match fallback {
            Some(outcome) if outcome.stage == ResolutionStage::ManualSearch => outcome,
            _ => {
                self.manual_media_search(descriptor, ceiling, Some(media), threshold, trace)
                    .await
            }
        }
    }

    /// Last-ditch pass for a failed walk: explicit season walk, then the
    /// episode-in-title retry, then manual search.
    #[allow(clippy::too_many_arguments)]
    async fn handle_episode(
        &self,
        descriptor: &ParsedDescriptor,
        ceiling: Option<u32>,
        offset: i64,
        media: &Media,
        prequel: Option<&PrequelOutcome>,
        threshold: f64,
        trace: &mut CatalogTrace,
    ) -> Outcome {
        debug!(
            "Attempting last ditch effort for {}: {}:{:?}",
            descriptor.title,
            media.id,
            media.display_title()
        );
        let episode = descriptor.episode_last();

        if let (Some(_), Some(episode)) = (descriptor.season, episode) {
            let start = match prequel {
                Some(p) if !p.is_root => p.root.clone().unwrap_or_else(|| media.clone()),
                _ => media.clone(),
            };
            let opts = WalkOptions::new(start, Some(i64::from(episode))).offset(offset);
            let walked = self.walker.resolve_season(opts).await;
            trace.note(&walked);
            match walked {
                Ok(state) if !state.failed => {
                    if let Some(local) = state.local_episode() {
                        return Outcome::found(state.media, ResolutionStage::SeasonWalk)
                            .with_episode(Some(ResolvedEpisode::Number(local)));
                    }
                }
                Ok(_) => {}
                Err(e) => warn!("Season walk for {} failed: {}", descriptor.title, e),
            }
        }

        if let (Some(episode), Some(ceiling)) = (episode, ceiling) {
            if episode > ceiling {
                debug!(
                    "Episode {} is above the expected {} episode(s), assuming the episode is in the title [{}]",
                    episode, ceiling, descriptor.title
                );
                let retitled = self.retitle_lookup(&descriptor.title, trace).await;
                if let Some((retitled, Some(retitled_media))) = retitled {
                    let title_episode = retitled.episode_last().filter(|e| *e < ceiling);
                    if let Some(title_episode) = title_episode {
                        let threshold = adaptive_threshold(&retitled.title);
                        if self.verifier.is_verified(&retitled_media, &retitled, &FIELDS, threshold) {
                            debug!(
                                "Found media and episode for {}: {}:{:?} E{}",
                                descriptor.title,
                                retitled_media.id,
                                retitled_media.display_title(),
                                title_episode
                            );
                            let mut outcome =
                                Outcome::found(retitled_media, ResolutionStage::AlternateTitle)
                                    .with_episode(Some(ResolvedEpisode::Number(title_episode)));
                            outcome.descriptor = Some(retitled);
                            return outcome;
                        }
                    }
                }
            }
        }

        self.manual_media_search(descriptor, ceiling, Some(media.clone()), threshold, trace)
            .await
    }

    /// Free-text catalog search, excluding the entry already rejected.
    async fn manual_media_search(
        &self,
        descriptor: &ParsedDescriptor,
        ceiling: Option<u32>,
        media: Option<Media>,
        threshold: f64,
        trace: &mut CatalogTrace,
    ) -> Outcome {
        debug!(
            "Manual search for {}: rejected {:?}",
            descriptor.title,
            media.as_ref().map(|m| m.id)
        );

        let mut titles: Vec<String> = Vec::new();
        if let Some((main, alt)) = split_parenthetical(&descriptor.title) {
            titles.push(main);
            titles.push(alt);
        }
        titles.push(descriptor.title.clone());
        let mut seen = HashSet::new();
        titles.retain(|t| !t.is_empty() && seen.insert(t.clone()));

        let mut format_not = Vec::new();
        if let Some(season) = descriptor.season {
            format_not.push(MediaFormat::Ova);
            if season > 1 {
                format_not.push(MediaFormat::Movie);
            }
        }
        let filters = SearchFilters {
            id_not: media.as_ref().map(|m| m.id),
            format_not,
        };

        for title in &titles {
            let searched = self.catalog.search_by_text(title, &filters).await;
            trace.note(&searched);
            let candidates = match searched {
                Ok(candidates) => candidates,
                Err(e) => {
                    warn!("Manual search for {} failed: {}", title, e);
                    continue;
                }
            };
            let retitled = descriptor.with_title(title.clone());

            for candidate in candidates {
                if !filters.accepts(&candidate)
                    || !self.verifier.is_verified(&candidate, &retitled, &FIELDS, threshold)
                {
                    continue;
                }
                debug!(
                    "Found media from manual search for {} S{:?} E{:?}: {}:{:?}",
                    descriptor.title,
                    descriptor.season,
                    descriptor.episode,
                    candidate.id,
                    candidate.display_title()
                );

                if descriptor.is_multi_season() {
                    let by_season = self.walker.resolve_by_season(candidate.clone(), descriptor).await;
                    trace.note(&by_season);
                    let media = by_season.unwrap_or_else(|e| {
                        warn!("Season lookup for {} failed: {}", descriptor.title, e);
                        candidate
                    });
                    return Outcome::found(media, ResolutionStage::ManualSearch);
                }

                let past_end = match (descriptor.episode, candidate.episodes) {
                    (Some(EpisodeNumber::Single(n)), Some(count)) => n > count,
                    _ => false,
                };
                if candidate.is_finished() && past_end {
                    let walked = self
                        .walker
                        .find_prequel(descriptor, 0, &candidate, &FIELDS, threshold)
                        .await;
                    trace.note(&walked);
                    match walked {
                        Ok(prequel) => {
                            let episode = prequel.result.local_episode().map(ResolvedEpisode::Number);
                            return Outcome {
                                media: Some(prequel.result.media),
                                episode,
                                descriptor: None,
                                failed: prequel.result.failed,
                                stage: ResolutionStage::SeasonWalk,
                            };
                        }
                        Err(e) => warn!("Season walk for {} failed: {}", descriptor.title, e),
                    }
                }
                return Outcome::found(candidate, ResolutionStage::ManualSearch);
            }
        }

        let airing_ahead = matches!(
            (descriptor.episode_last(), ceiling),
            (Some(e), Some(c)) if e > c
        ) && media.as_ref().is_some_and(Media::is_releasing);

        Outcome {
            media,
            episode: None,
            descriptor: None,
            failed: !airing_ahead,
            stage: ResolutionStage::ManualSearch,
        }
    }
}

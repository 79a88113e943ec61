// src/services/season_walker.rs
//
// Season Graph Walker
//
// Re-bases an absolute episode number onto the installment that actually
// contains it by walking PREQUEL/SEQUEL edges and accumulating an offset.
//
// CRITICAL INVARIANTS:
// - Walks are loops with a visited set: a relation cycle ends the walk as
//   failed, it never recurses or spins
// - Entries are fetched lazily by id as edges are followed
// - Ceiling = next airing episode or episode count, minus one when the entry
//   numbers from zero

use std::collections::HashSet;
use std::sync::Arc;

use log::{debug, warn};

use crate::domain::descriptor::ParsedDescriptor;
use crate::domain::media::{Media, MediaFormat, RelationEdge, RelationType, TitleField};
use crate::error::{AppError, AppResult};
use crate::integrations::catalog::{CatalogService, ZeroEpisodeHeuristic};
use crate::services::verifier::MediaVerifier;

// ============================================================================
// EDGES
// ============================================================================

/// First edge of `relation_type` whose target format is in `formats`.
/// SEQUEL lookups may retry once with ONA/OVA allowed, since sequels are
/// sometimes released in those formats.
pub fn find_edge<'a>(
    media: &'a Media,
    relation_type: RelationType,
    formats: &[MediaFormat],
    retry_widened: bool,
) -> Option<&'a RelationEdge> {
    let found = media.relations.iter().find(|edge| {
        edge.relation_type == relation_type
            && edge.node.format.is_some_and(|f| formats.contains(&f))
    });
    if found.is_none() && retry_widened && relation_type == RelationType::Sequel {
        return find_edge(media, relation_type, &MediaFormat::SEASONAL_WIDE, false);
    }
    found
}

// ============================================================================
// WALK STATE
// ============================================================================

/// Where a walk starts and how it moves.
#[derive(Debug, Clone)]
pub struct WalkOptions {
    pub media: Media,
    pub episode: Option<i64>,
    /// `Some(true)`: follow SEQUEL edges. `Some(false)`: follow PREQUEL
    /// edges only. `None`: prefer PREQUEL, fall back to SEQUEL.
    pub increment: Option<bool>,
    pub offset: i64,
    /// Walk until the edges run out, ignoring the episode fit check
    pub force: bool,
}

impl WalkOptions {
    pub fn new(media: Media, episode: Option<i64>) -> Self {
        Self {
            media,
            episode,
            increment: None,
            offset: 0,
            force: false,
        }
    }

    /// Walk used only to find the narrative root.
    pub fn to_root(media: Media, offset: i64) -> Self {
        Self {
            media,
            episode: None,
            increment: Some(false),
            offset,
            force: true,
        }
    }

    pub fn increment(mut self, increment: Option<bool>) -> Self {
        self.increment = increment;
        self
    }

    pub fn offset(mut self, offset: i64) -> Self {
        self.offset = offset;
        self
    }
}

#[derive(Debug, Clone)]
pub struct WalkState {
    pub media: Media,
    /// Season-local episode once the walk has stopped
    pub episode: i64,
    pub increment: Option<bool>,
    pub offset: i64,
    pub root_media: Media,
    pub force: bool,
    pub failed: bool,
}

impl WalkState {
    /// The re-based episode, if it landed on a real episode number.
    pub fn local_episode(&self) -> Option<u32> {
        u32::try_from(self.episode).ok().filter(|e| *e > 0)
    }

    fn terminate(mut self, failed: bool) -> Self {
        self.episode -= self.offset;
        self.failed = failed;
        self
    }
}

/// Result of `find_prequel`
#[derive(Debug, Clone)]
pub struct PrequelOutcome {
    pub result: WalkState,
    /// The starting entry was taken as the narrative root
    pub is_root: bool,
    pub root: Option<Media>,
}

// ============================================================================
// SEASON WALKER
// ============================================================================

pub struct SeasonWalker {
    catalog: Arc<dyn CatalogService>,
    zero_episode: Arc<dyn ZeroEpisodeHeuristic>,
    verifier: Arc<MediaVerifier>,
}

impl SeasonWalker {
    pub fn new(
        catalog: Arc<dyn CatalogService>,
        zero_episode: Arc<dyn ZeroEpisodeHeuristic>,
        verifier: Arc<MediaVerifier>,
    ) -> Self {
        Self {
            catalog,
            zero_episode,
            verifier,
        }
    }

    /// Highest episode number of `media`, adjusted for a zero episode.
    pub async fn ceiling(&self, media: &Media) -> Option<u32> {
        let known = media.known_episodes()?;
        if self.zero_episode.has_leading_zero_episode(media).await {
            Some(known.saturating_sub(1))
        } else {
            Some(known)
        }
    }

    async fn ceiling_or_zero(&self, media: &Media) -> i64 {
        self.ceiling(media).await.map(i64::from).unwrap_or(0)
    }

    /// Walk the relation graph until the episode fits an installment.
    pub async fn resolve_season(&self, opts: WalkOptions) -> AppResult<WalkState> {
        if opts.episode.is_none() && !opts.force {
            return Err(AppError::InvalidInput(format!(
                "No episode to resolve for media {}",
                opts.media.id
            )));
        }

        let force = opts.force;
        let mut visited: HashSet<i64> = HashSet::from([opts.media.id]);
        let mut state = WalkState {
            root_media: opts.media.clone(),
            media: opts.media,
            episode: opts.episode.unwrap_or(0),
            increment: opts.increment,
            offset: opts.offset,
            force,
            failed: false,
        };

        loop {
            let root_ceiling = self.ceiling_or_zero(&state.root_media).await;

            let prequel = match state.increment {
                Some(true) => None,
                _ => find_edge(&state.media, RelationType::Prequel, &MediaFormat::SEASONAL, false),
            };
            let sequel = match (prequel, state.increment) {
                (None, Some(true)) | (None, None) => {
                    find_edge(&state.media, RelationType::Sequel, &MediaFormat::SEASONAL, true)
                }
                _ => None,
            };
            let increment = state.increment.unwrap_or(prequel.is_none());
            let next_id = prequel.or(sequel).map(|edge| edge.node.id);
            state.increment = Some(increment);

            let Some(next_id) = next_id else {
                if !force {
                    debug!(
                        "Failed to resolve season {}:{:?} episode {} offset {} root {}",
                        state.media.id,
                        state.media.display_title(),
                        state.episode,
                        state.offset,
                        state.root_media.id
                    );
                }
                return Ok(state.terminate(true));
            };

            if !visited.insert(next_id) {
                warn!(
                    "Relation cycle at media {} while walking from {}",
                    next_id, state.root_media.id
                );
                return Ok(state.terminate(true));
            }

            let target = self.catalog.get_by_id(next_id).await?;
            let target_ceiling = self.ceiling_or_zero(&target).await;

            let diff = state.episode - (target_ceiling + state.offset);
            state.offset += if increment { root_ceiling } else { target_ceiling };
            state.media = target;
            if increment {
                state.root_media = state.media.clone();
            }

            if !force && diff <= root_ceiling {
                return Ok(state.terminate(false));
            }
        }
    }

    /// Find the narrative root of `media` (unless the descriptor names a
    /// season) and re-base the descriptor's episode from there.
    pub async fn find_prequel(
        &self,
        descriptor: &ParsedDescriptor,
        offset: i64,
        media: &Media,
        fields: &[TitleField],
        threshold: f64,
    ) -> AppResult<PrequelOutcome> {
        let edge = if descriptor.season.is_none() {
            find_edge(media, RelationType::Prequel, &MediaFormat::SEASONAL, false).or_else(|| {
                matches!(media.format, Some(MediaFormat::Ova) | Some(MediaFormat::Ona))
                    .then(|| find_edge(media, RelationType::Parent, &MediaFormat::SEASONAL, false))
                    .flatten()
            })
        } else {
            None
        };
        debug!("Prequel of {}: {:?}", media.id, edge.map(|e| e.node.id));

        let root = match edge {
            Some(edge) => {
                let start = self.catalog.get_by_id(edge.node.id).await?;
                Some(self.resolve_season(WalkOptions::to_root(start, offset)).await?.media)
            }
            None => None,
        };
        debug!("Root of {}: {:?}", media.id, root.as_ref().map(|r| r.id));

        let is_root = match &root {
            Some(root) => !self.verifier.is_verified(root, descriptor, fields, threshold),
            None => true,
        };
        if is_root {
            debug!(
                "Assuming {}:{:?} already is the root for {}",
                media.id,
                media.display_title(),
                descriptor.title
            );
        }

        let from_root = descriptor.season.is_none() && !is_root;
        let start = match (&root, is_root) {
            (Some(root), false) => root.clone(),
            _ => media.clone(),
        };
        let opts = WalkOptions::new(start, descriptor.episode_last().map(i64::from))
            .increment(if from_root { None } else { Some(true) })
            .offset(if from_root { 0 } else { offset });

        let result = self.resolve_season(opts).await?;
        Ok(PrequelOutcome {
            result,
            is_root,
            root,
        })
    }

    /// Walk to the first season, then `season - 1` sequels forward.
    pub async fn resolve_by_season(
        &self,
        media: Media,
        descriptor: &ParsedDescriptor,
    ) -> AppResult<Media> {
        let Some(season) = descriptor.season else {
            return Ok(media);
        };

        let mut current = media;
        let mut visited: HashSet<i64> = HashSet::from([current.id]);
        while let Some(edge) =
            find_edge(&current, RelationType::Prequel, &MediaFormat::SEASONAL, false)
        {
            let id = edge.node.id;
            if !visited.insert(id) {
                warn!("Relation cycle at media {} while looking for season 1", id);
                break;
            }
            current = self.catalog.get_by_id(id).await?;
        }

        let mut visited: HashSet<i64> = HashSet::from([current.id]);
        let mut reached = 1;
        while reached < season {
            let Some(edge) =
                find_edge(&current, RelationType::Sequel, &MediaFormat::SEASONAL, true)
            else {
                break;
            };
            let id = edge.node.id;
            if !visited.insert(id) {
                warn!("Relation cycle at media {} while descending to season {}", id, season);
                break;
            }
            current = self.catalog.get_by_id(id).await?;
            reached += 1;
        }

        debug!(
            "Season {} of {} resolved to {}:{:?}",
            season,
            descriptor.title,
            current.id,
            current.display_title()
        );
        Ok(current)
    }
}

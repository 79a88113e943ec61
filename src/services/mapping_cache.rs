// src/services/mapping_cache.rs
//
// Mapping Cache - fingerprint → media/episode associations.
//
// CRITICAL RULES:
// - Writes merge into the stored record (see ResolvedMapping::apply)
// - Writers to one fingerprint are serialized; different fingerprints never wait
// - Staleness is decided at read time, nothing is ever expired in storage
// - Freshness window: 7 days for finished media, 24 hours otherwise,
//   unless the level is locked or the caller ignores expiry
// - The status stored with a level decides its window; statuses told to
//   `remember_status` only cover levels stored without one

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use chrono::{DateTime, Duration, Utc};

use crate::config::MappingConfig;
use crate::domain::mapping::is_fresh;
use crate::domain::{
    EpisodeNumber, EpisodeRange, FileOverride, MappingUpdate, MediaStatus, ResolutionResult,
    ResolvedEpisode, ResolvedMapping,
};
use crate::error::{AppError, AppResult};
use crate::repositories::MappingRepository;

/// What `get_hash` looks for besides the media id
#[derive(Debug, Clone, Default)]
pub struct MappingQuery {
    pub episode: Option<ResolvedEpisode>,
    /// Also accept batch records that carry no episode at all
    pub batch_guess: bool,
    /// Fingerprints currently on hand; records outside it are skipped
    pub available: Option<HashSet<String>>,
}

impl MappingQuery {
    pub fn episode(episode: ResolvedEpisode) -> Self {
        Self {
            episode: Some(episode),
            ..Self::default()
        }
    }

    pub fn batch_guess(mut self) -> Self {
        self.batch_guess = true;
        self
    }

    pub fn within(mut self, available: HashSet<String>) -> Self {
        self.available = Some(available);
        self
    }
}

/// Result of an inverse lookup
#[derive(Debug, Clone, PartialEq)]
pub enum MappingLookup {
    Batch(ResolvedMapping),
    File(FileOverride),
}

impl MappingLookup {
    pub fn media_id(&self) -> i64 {
        match self {
            MappingLookup::Batch(mapping) => mapping.media_id,
            MappingLookup::File(file) => file.media_id,
        }
    }

    pub fn episode(&self) -> Option<&ResolvedEpisode> {
        match self {
            MappingLookup::Batch(mapping) => mapping.episode.as_ref(),
            MappingLookup::File(file) => file.episode.as_ref(),
        }
    }
}

pub struct MappingCache {
    repository: Arc<dyn MappingRepository>,
    config: MappingConfig,
    statuses: RwLock<HashMap<i64, MediaStatus>>,
    write_locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl MappingCache {
    pub fn new(repository: Arc<dyn MappingRepository>, config: MappingConfig) -> Self {
        Self {
            repository,
            config,
            statuses: RwLock::new(HashMap::new()),
            write_locks: Mutex::new(HashMap::new()),
        }
    }

    /// Airing status for levels stored without one (manual writes).
    pub fn remember_status(&self, media_id: i64, status: MediaStatus) {
        let mut statuses = self.statuses.write().unwrap_or_else(PoisonError::into_inner);
        statuses.insert(media_id, status);
    }

    fn window(&self, stored: Option<MediaStatus>, media_id: i64) -> Duration {
        let status = stored.or_else(|| {
            let statuses = self.statuses.read().unwrap_or_else(PoisonError::into_inner);
            statuses.get(&media_id).copied()
        });
        match status {
            Some(MediaStatus::Finished) => self.config.finished_window(),
            _ => self.config.default_window(),
        }
    }

    // ========================================================================
    // WRITES
    // ========================================================================

    pub async fn set_hash(&self, hash: &str, update: &MappingUpdate) -> AppResult<ResolvedMapping> {
        self.set_hash_at(hash, update, Utc::now()).await
    }

    pub async fn set_hash_at(
        &self,
        hash: &str,
        update: &MappingUpdate,
        now: DateTime<Utc>,
    ) -> AppResult<ResolvedMapping> {
        if hash.trim().is_empty() {
            return Err(AppError::InvalidInput("Empty fingerprint".to_string()));
        }
        if matches!(&update.file_hash, Some(f) if f.trim().is_empty()) {
            return Err(AppError::InvalidInput("Empty file fingerprint".to_string()));
        }

        let key_lock = self.key_lock(hash);
        let result = {
            let _guard = key_lock.lock().await;
            self.merge_and_save(hash, update, now)
        };
        self.release_key(hash, key_lock);
        result
    }

    fn merge_and_save(
        &self,
        hash: &str,
        update: &MappingUpdate,
        now: DateTime<Utc>,
    ) -> AppResult<ResolvedMapping> {
        let mapping = match self.repository.get(hash)? {
            Some(mut existing) => {
                existing.apply(update, now);
                existing
            }
            None => ResolvedMapping::create(hash, update, now),
        };
        self.repository.save(&mapping)?;
        log::debug!(
            "Stored mapping {} -> {} (file: {:?}, failed: {}, locked: {})",
            hash,
            mapping.media_id,
            update.file_hash,
            update.failed,
            update.locked
        );
        Ok(mapping)
    }

    /// Store what a resolution produced. Results without media are skipped.
    pub async fn record(
        &self,
        hash: &str,
        file_hash: Option<&str>,
        result: &ResolutionResult,
    ) -> AppResult<Option<ResolvedMapping>> {
        let media = match &result.media {
            Some(media) => media,
            None => return Ok(None),
        };
        let mut update = MappingUpdate::new(media.id).with_descriptor(result.descriptor.clone());
        update.status = media.status;
        update.episode = result.episode.clone();
        update.season = result.season;
        update.failed = result.failed;
        if let Some(EpisodeNumber::Range(first, last)) = result.descriptor.episode {
            update.episode_range = Some(EpisodeRange { first, last });
        }
        if let Some(file_hash) = file_hash {
            update = update.for_file(file_hash);
        }

        self.set_hash(hash, &update).await.map(Some)
    }

    fn key_lock(&self, hash: &str) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.write_locks.lock().unwrap_or_else(PoisonError::into_inner);
        locks.entry(hash.to_string()).or_default().clone()
    }

    fn release_key(&self, hash: &str, key_lock: Arc<tokio::sync::Mutex<()>>) {
        let mut locks = self.write_locks.lock().unwrap_or_else(PoisonError::into_inner);
        drop(key_lock);
        if locks.get(hash).is_some_and(|l| Arc::strong_count(l) == 1) {
            locks.remove(hash);
        }
    }

    #[cfg(test)]
    fn tracked_keys(&self) -> usize {
        self.write_locks.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    // ========================================================================
    // READS
    // ========================================================================

    pub fn get_hash(
        &self,
        media_id: i64,
        query: &MappingQuery,
        ignore_cached: bool,
        ignore_expiry: bool,
    ) -> AppResult<Option<String>> {
        self.get_hash_at(media_id, query, ignore_cached, ignore_expiry, Utc::now())
    }

    /// Fingerprint of a stored mapping for `media_id` and the query's episode.
    ///
    /// Passes, oldest record first within each:
    /// 1. top-level media and episode
    /// 2. top-level media with a file-level episode
    /// 3. file-level media and episode
    /// 4. with `batch_guess`, a file-less record without episode
    pub fn get_hash_at(
        &self,
        media_id: i64,
        query: &MappingQuery,
        ignore_cached: bool,
        ignore_expiry: bool,
        now: DateTime<Utc>,
    ) -> AppResult<Option<String>> {
        let fresh = |status: Option<MediaStatus>, locked: bool, updated_at: DateTime<Utc>| {
            is_fresh(locked, updated_at, self.window(status, media_id), now, ignore_expiry)
        };

        let candidates: Vec<ResolvedMapping> = self
            .repository
            .list_for_media(media_id)?
            .into_iter()
            .filter(|m| ignore_cached || is_available(m, query.available.as_ref()))
            .collect();

        let root = candidates.iter().find(|m| {
            m.media_id == media_id
                && m.episode == query.episode
                && fresh(m.status, m.locked, m.updated_at)
        });
        if let Some(m) = root {
            log::debug!("Mapping root match {} for media {}", m.hash, media_id);
            return Ok(Some(m.hash.clone()));
        }

        let semi = candidates.iter().find(|m| {
            m.media_id == media_id
                && m.files.iter().any(|f| f.episode == query.episode)
                && fresh(m.status, m.locked, m.updated_at)
        });
        if let Some(m) = semi {
            log::debug!("Mapping semi match {} for media {}", m.hash, media_id);
            return Ok(Some(m.hash.clone()));
        }

        let full = candidates.iter().find(|m| {
            m.files.iter().any(|f| {
                f.media_id == media_id
                    && f.episode == query.episode
                    && fresh(f.status, f.locked, f.updated_at)
            })
        });
        if let Some(m) = full {
            log::debug!("Mapping file match {} for media {}", m.hash, media_id);
            return Ok(Some(m.hash.clone()));
        }

        if query.batch_guess {
            let guess = candidates.iter().find(|m| {
                m.files.is_empty()
                    && m.media_id == media_id
                    && m.episode.is_none()
                    && fresh(m.status, m.locked, m.updated_at)
            });
            if let Some(m) = guess {
                return Ok(Some(m.hash.clone()));
            }
        }

        Ok(None)
    }

    pub fn get_id(
        &self,
        fingerprint: &str,
        file_hash: Option<&str>,
        ignore_expiry: bool,
    ) -> AppResult<Option<MappingLookup>> {
        self.get_id_at(fingerprint, file_hash, ignore_expiry, Utc::now())
    }

    /// Inverse lookup. `fingerprint` may name the record or one of its files.
    /// Without `file_hash` the top-level record is returned, with it the
    /// matching file entry.
    pub fn get_id_at(
        &self,
        fingerprint: &str,
        file_hash: Option<&str>,
        ignore_expiry: bool,
        now: DateTime<Utc>,
    ) -> AppResult<Option<MappingLookup>> {
        let mapping = match self.repository.get(fingerprint)? {
            Some(mapping) => mapping,
            None => match self.repository.find_by_file_hash(fingerprint)? {
                Some(mapping) => mapping,
                None => return Ok(None),
            },
        };

        match file_hash {
            None => {
                let window = self.window(mapping.status, mapping.media_id);
                if is_fresh(mapping.locked, mapping.updated_at, window, now, ignore_expiry) {
                    Ok(Some(MappingLookup::Batch(mapping)))
                } else {
                    Ok(None)
                }
            }
            Some(file_hash) => Ok(mapping
                .file(file_hash)
                .filter(|f| {
                    let window = self.window(f.status, f.media_id);
                    is_fresh(f.locked, f.updated_at, window, now, ignore_expiry)
                })
                .cloned()
                .map(MappingLookup::File)),
        }
    }
}

fn is_available(mapping: &ResolvedMapping, available: Option<&HashSet<String>>) -> bool {
    match available {
        None => true,
        Some(set) => {
            set.contains(&mapping.hash) || mapping.files.iter().any(|f| set.contains(&f.file_hash))
        }
    }
}

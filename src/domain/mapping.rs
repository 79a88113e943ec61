// src/domain/mapping.rs
//
// Resolved Mapping - persisted fingerprint → media/episode association.
//
// CRITICAL INVARIANTS:
// - Updates merge, they never replace a record wholesale
// - `locked` is sticky per level and a locked level only accepts locked writes
// - A locked or non-failed write clears `failed` at the level it targets
// - A non-empty `files` list holds per-file data; top-level fields are the
//   batch-wide default guess
// - `status` belongs to the level's media: a media change without a status
//   clears it

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::descriptor::ParsedDescriptor;
use crate::domain::media::MediaStatus;
use crate::domain::resolution::ResolvedEpisode;
use crate::domain::{DomainError, DomainResult};

/// Episode span covered by a batch mapping
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EpisodeRange {
    pub first: u32,
    pub last: u32,
}

/// Incoming write for `MappingCache::set_hash`.
/// `file_hash` set → the write targets the matching file override.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MappingUpdate {
    pub file_hash: Option<String>,
    pub media_id: i64,
    pub episode: Option<ResolvedEpisode>,
    pub episode_range: Option<EpisodeRange>,
    pub season: Option<u32>,
    pub descriptor: Option<ParsedDescriptor>,
    /// Airing status of `media_id` when the write was made
    pub status: Option<MediaStatus>,
    pub locked: bool,
    pub failed: bool,
}

impl MappingUpdate {
    pub fn new(media_id: i64) -> Self {
        Self {
            media_id,
            ..Self::default()
        }
    }

    pub fn for_file(mut self, file_hash: impl Into<String>) -> Self {
        self.file_hash = Some(file_hash.into());
        self
    }

    pub fn with_episode(mut self, episode: ResolvedEpisode) -> Self {
        self.episode = Some(episode);
        self
    }

    pub fn with_season(mut self, season: u32) -> Self {
        self.season = Some(season);
        self
    }

    pub fn with_descriptor(mut self, descriptor: ParsedDescriptor) -> Self {
        self.descriptor = Some(descriptor);
        self
    }

    pub fn with_status(mut self, status: MediaStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn locked(mut self) -> Self {
        self.locked = true;
        self
    }

    pub fn failed(mut self) -> Self {
        self.failed = true;
        self
    }

    /// Good enough to refresh batch-wide fields.
    fn is_trusted(&self) -> bool {
        self.locked || !self.failed
    }
}

/// Per-file data inside a batch mapping
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileOverride {
    pub file_hash: String,
    pub media_id: i64,
    pub episode: Option<ResolvedEpisode>,
    pub episode_range: Option<EpisodeRange>,
    pub season: Option<u32>,
    pub descriptor: Option<ParsedDescriptor>,
    #[serde(default)]
    pub status: Option<MediaStatus>,
    #[serde(default)]
    pub locked: bool,
    #[serde(default)]
    pub failed: bool,
    pub cached_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl FileOverride {
    fn from_update(file_hash: &str, update: &MappingUpdate, now: DateTime<Utc>) -> Self {
        Self {
            file_hash: file_hash.to_string(),
            media_id: update.media_id,
            episode: update.episode.clone(),
            episode_range: update.episode_range,
            season: update.season,
            descriptor: update.descriptor.clone(),
            status: update.status,
            locked: update.locked,
            failed: update.failed && !update.locked,
            cached_at: now,
            updated_at: now,
        }
    }

    fn apply(&mut self, update: &MappingUpdate, now: DateTime<Utc>) {
        if self.locked && !update.locked {
            return;
        }
        merge_status(&mut self.status, self.media_id, update);
        self.media_id = update.media_id;
        merge_fields(
            &mut self.episode,
            &mut self.episode_range,
            &mut self.season,
            &mut self.descriptor,
            update,
        );
        self.locked |= update.locked;
        self.failed = update.failed && !self.locked;
        self.updated_at = now;
    }
}

/// One persisted fingerprint record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolvedMapping {
    pub hash: String,
    pub media_id: i64,
    pub episode: Option<ResolvedEpisode>,
    pub episode_range: Option<EpisodeRange>,
    pub season: Option<u32>,
    pub descriptor: Option<ParsedDescriptor>,
    #[serde(default)]
    pub status: Option<MediaStatus>,
    #[serde(default)]
    pub locked: bool,
    #[serde(default)]
    pub failed: bool,
    pub cached_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub files: Vec<FileOverride>,
}

impl ResolvedMapping {
    /// First write for a fingerprint. A file-scoped first write only records
    /// the media id at the top level; the rest lives in the file override.
    pub fn create(hash: &str, update: &MappingUpdate, now: DateTime<Utc>) -> Self {
        let mut mapping = Self {
            hash: hash.to_string(),
            media_id: update.media_id,
            episode: None,
            episode_range: None,
            season: None,
            descriptor: None,
            status: update.status,
            locked: false,
            failed: false,
            cached_at: now,
            updated_at: now,
            files: Vec::new(),
        };
        match &update.file_hash {
            Some(file_hash) => mapping
                .files
                .push(FileOverride::from_update(file_hash, update, now)),
            None => {
                mapping.episode = update.episode.clone();
                mapping.episode_range = update.episode_range;
                mapping.season = update.season;
                mapping.descriptor = update.descriptor.clone();
                mapping.locked = update.locked;
                mapping.failed = update.failed && !update.locked;
            }
        }
        mapping
    }

    /// Merge a later write into this record.
    pub fn apply(&mut self, update: &MappingUpdate, now: DateTime<Utc>) {
        match &update.file_hash {
            Some(file_hash) => {
                match self.files.iter_mut().find(|f| &f.file_hash == file_hash) {
                    Some(existing) => existing.apply(update, now),
                    None => self
                        .files
                        .push(FileOverride::from_update(file_hash, update, now)),
                }
                let top_level_writable = !self.locked || update.locked;
                if update.is_trusted() && top_level_writable {
                    merge_status(&mut self.status, self.media_id, update);
                    self.media_id = update.media_id;
                    self.updated_at = now;
                    self.failed = false;
                }
            }
            None => {
                if self.locked && !update.locked {
                    return;
                }
                merge_status(&mut self.status, self.media_id, update);
                self.media_id = update.media_id;
                merge_fields(
                    &mut self.episode,
                    &mut self.episode_range,
                    &mut self.season,
                    &mut self.descriptor,
                    update,
                );
                self.locked |= update.locked;
                self.failed = update.failed && !self.locked;
                self.updated_at = now;
            }
        }
    }

    pub fn file(&self, file_hash: &str) -> Option<&FileOverride> {
        self.files.iter().find(|f| f.file_hash == file_hash)
    }

    /// True when `fingerprint` names this record or one of its files.
    pub fn covers(&self, fingerprint: &str) -> bool {
        self.hash == fingerprint || self.files.iter().any(|f| f.file_hash == fingerprint)
    }
}

fn merge_fields(
    episode: &mut Option<ResolvedEpisode>,
    episode_range: &mut Option<EpisodeRange>,
    season: &mut Option<u32>,
    descriptor: &mut Option<ParsedDescriptor>,
    update: &MappingUpdate,
) {
    if let Some(value) = &update.episode {
        *episode = Some(value.clone());
    }
    if let Some(value) = update.episode_range {
        *episode_range = Some(value);
    }
    if let Some(value) = update.season {
        *season = Some(value);
    }
    if let Some(value) = &update.descriptor {
        *descriptor = Some(value.clone());
    }
}

fn merge_status(status: &mut Option<MediaStatus>, media_id: i64, update: &MappingUpdate) {
    if update.status.is_some() || media_id != update.media_id {
        *status = update.status;
    }
}

/// Read-time staleness rule shared by both record levels.
pub fn is_fresh(
    locked: bool,
    updated_at: DateTime<Utc>,
    window: Duration,
    now: DateTime<Utc>,
    ignore_expiry: bool,
) -> bool {
    ignore_expiry || locked || updated_at >= now - window
}

/// Validates the invariants a record must hold before it is persisted
pub fn validate_mapping(mapping: &ResolvedMapping) -> DomainResult<()> {
    if mapping.hash.trim().is_empty() {
        return Err(DomainError::InvariantViolation(
            "Mapping fingerprint cannot be empty".to_string(),
        ));
    }
    if mapping.locked && mapping.failed {
        return Err(DomainError::InvariantViolation(format!(
            "Mapping {} is both locked and failed",
            mapping.hash
        )));
    }
    for (i, file) in mapping.files.iter().enumerate() {
        if file.file_hash.trim().is_empty() {
            return Err(DomainError::InvariantViolation(format!(
                "Mapping {} has a file override without fingerprint",
                mapping.hash
            )));
        }
        if file.locked && file.failed {
            return Err(DomainError::InvariantViolation(format!(
                "File {} is both locked and failed",
                file.file_hash
            )));
        }
        if mapping.files[..i].iter().any(|f| f.file_hash == file.file_hash) {
            return Err(DomainError::InvariantViolation(format!(
                "Duplicate file override {} in mapping {}",
                file.file_hash, mapping.hash
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn t0() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2024-04-01T12:00:00Z")
            .unwrap()
            .with_timezone(&Utc)
    }

    #[test]
    fn test_create_top_level() {
        let update = MappingUpdate::new(5).with_episode(ResolvedEpisode::Number(3));
        let mapping = ResolvedMapping::create("abc", &update, t0());
        assert_eq!(mapping.media_id, 5);
        assert_eq!(mapping.episode, Some(ResolvedEpisode::Number(3)));
        assert!(mapping.files.is_empty());
    }

    #[test]
    fn test_create_file_scoped_keeps_top_level_bare() {
        let update = MappingUpdate::new(5)
            .for_file("file-1")
            .with_episode(ResolvedEpisode::Number(3));
        let mapping = ResolvedMapping::create("batch", &update, t0());
        assert_eq!(mapping.episode, None);
        assert_eq!(mapping.files.len(), 1);
        assert_eq!(mapping.files[0].episode, Some(ResolvedEpisode::Number(3)));
        assert!(mapping.covers("file-1"));
    }

    #[test]
    fn test_failed_file_write_does_not_move_top_level() {
        let mut mapping =
            ResolvedMapping::create("batch", &MappingUpdate::new(5).for_file("f1"), t0());
        let later = t0() + Duration::hours(1);
        mapping.apply(&MappingUpdate::new(9).for_file("f2").failed(), later);

        assert_eq!(mapping.media_id, 5);
        assert_eq!(mapping.updated_at, t0());
        let f2 = mapping.file("f2").unwrap();
        assert_eq!(f2.media_id, 9);
        assert!(f2.failed);
    }

    #[test]
    fn test_locked_level_ignores_unlocked_writes() {
        let mut mapping =
            ResolvedMapping::create("h", &MappingUpdate::new(5).locked(), t0());
        mapping.apply(&MappingUpdate::new(7).failed(), t0() + Duration::hours(1));
        assert_eq!(mapping.media_id, 5);
        assert!(mapping.locked);
        assert!(!mapping.failed);
    }

    #[test]
    fn test_trusted_write_clears_failed() {
        let mut mapping = ResolvedMapping::create("h", &MappingUpdate::new(5).failed(), t0());
        assert!(mapping.failed);
        mapping.apply(&MappingUpdate::new(5), t0());
        assert!(!mapping.failed);
    }

    #[test]
    fn test_status_follows_the_media() {
        let finished = MappingUpdate::new(5).with_status(MediaStatus::Finished);
        let mut mapping = ResolvedMapping::create("h", &finished, t0());
        assert_eq!(mapping.status, Some(MediaStatus::Finished));

        // same media, status unknown: keep what is stored
        mapping.apply(&MappingUpdate::new(5), t0());
        assert_eq!(mapping.status, Some(MediaStatus::Finished));

        // another media without status: the stored one no longer applies
        mapping.apply(&MappingUpdate::new(6), t0());
        assert_eq!(mapping.status, None);

        mapping.apply(
            &MappingUpdate::new(6).for_file("f1").with_status(MediaStatus::Releasing),
            t0(),
        );
        assert_eq!(mapping.status, Some(MediaStatus::Releasing));
        assert_eq!(mapping.file("f1").unwrap().status, Some(MediaStatus::Releasing));
    }

    #[test]
    fn test_validate_mapping() {
        let mut mapping = ResolvedMapping::create("h", &MappingUpdate::new(1), t0());
        assert!(validate_mapping(&mapping).is_ok());

        mapping.files.push(FileOverride::from_update("f", &MappingUpdate::new(1), t0()));
        mapping.files.push(FileOverride::from_update("f", &MappingUpdate::new(2), t0()));
        assert!(validate_mapping(&mapping).is_err());

        let blank = ResolvedMapping::create(" ", &MappingUpdate::new(1), t0());
        assert!(validate_mapping(&blank).is_err());
    }

    #[test]
    fn test_is_fresh() {
        let now = t0();
        let window = Duration::days(7);
        assert!(is_fresh(false, now - Duration::days(6), window, now, false));
        assert!(!is_fresh(false, now - Duration::days(8), window, now, false));
        assert!(is_fresh(true, now - Duration::days(80), window, now, false));
        assert!(is_fresh(false, now - Duration::days(80), window, now, true));
    }
}

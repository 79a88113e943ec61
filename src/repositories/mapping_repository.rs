// src/repositories/mapping_repository.rs
//
// Persistence for resolved fingerprint mappings.
//
// The record is stored whole as JSON. `media_id`, the flags and the
// timestamps are mirrored into columns, and every file-level fingerprint
// gets a row in `mapping_files`, so lookups never deserialize the table.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use chrono::SecondsFormat;
use rusqlite::{params, OptionalExtension};

use crate::db::ConnectionPool;
use crate::domain::{validate_mapping, ResolvedMapping};
use crate::error::{AppError, AppResult};

pub trait MappingRepository: Send + Sync {
    fn get(&self, hash: &str) -> AppResult<Option<ResolvedMapping>>;

    /// Record owning a file-level fingerprint
    fn find_by_file_hash(&self, file_hash: &str) -> AppResult<Option<ResolvedMapping>>;

    /// Records whose top level or any file points at `media_id`, oldest first
    fn list_for_media(&self, media_id: i64) -> AppResult<Vec<ResolvedMapping>>;

    /// All records, oldest first
    fn list_all(&self) -> AppResult<Vec<ResolvedMapping>>;

    fn save(&self, mapping: &ResolvedMapping) -> AppResult<()>;

    /// Returns whether a record was removed
    fn delete(&self, hash: &str) -> AppResult<bool>;
}

// ============================================================================
// SQLITE
// ============================================================================

pub struct SqliteMappingRepository {
    pool: Arc<ConnectionPool>,
}

impl SqliteMappingRepository {
    pub fn new(pool: Arc<ConnectionPool>) -> Self {
        Self { pool }
    }

    fn decode_all(rows: Vec<String>) -> AppResult<Vec<ResolvedMapping>> {
        rows.iter()
            .map(|data| serde_json::from_str(data).map_err(AppError::Serialization))
            .collect()
    }
}

impl MappingRepository for SqliteMappingRepository {
    fn get(&self, hash: &str) -> AppResult<Option<ResolvedMapping>> {
        let conn = self.pool.get()?;

        let mut stmt = conn.prepare("SELECT data FROM resolved_mappings WHERE hash = ?1")?;

        match stmt.query_row(params![hash], |row| row.get::<_, String>(0)) {
            Ok(data) => Ok(Some(serde_json::from_str(&data)?)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(AppError::Database(e)),
        }
    }

    fn find_by_file_hash(&self, file_hash: &str) -> AppResult<Option<ResolvedMapping>> {
        let conn = self.pool.get()?;

        let data: Option<String> = conn
            .query_row(
                "SELECT m.data FROM resolved_mappings m
                 JOIN mapping_files f ON f.hash = m.hash
                 WHERE f.file_hash = ?1
                 ORDER BY m.cached_at, m.hash
                 LIMIT 1",
                params![file_hash],
                |row| row.get(0),
            )
            .optional()?;

        match data {
            Some(data) => Ok(Some(serde_json::from_str(&data)?)),
            None => Ok(None),
        }
    }

    fn list_for_media(&self, media_id: i64) -> AppResult<Vec<ResolvedMapping>> {
        let conn = self.pool.get()?;

        let mut stmt = conn.prepare(
            "SELECT data FROM resolved_mappings
             WHERE media_id = ?1
                OR hash IN (SELECT hash FROM mapping_files WHERE media_id = ?1)
             ORDER BY cached_at, hash",
        )?;

        let rows = stmt
            .query_map(params![media_id], |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;

        Self::decode_all(rows)
    }

    fn list_all(&self) -> AppResult<Vec<ResolvedMapping>> {
        let conn = self.pool.get()?;

        let mut stmt =
            conn.prepare("SELECT data FROM resolved_mappings ORDER BY cached_at, hash")?;

        let rows = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;

        Self::decode_all(rows)
    }

    fn save(&self, mapping: &ResolvedMapping) -> AppResult<()> {
        validate_mapping(mapping)?;
        let data = serde_json::to_string(mapping)?;

        let mut conn = self.pool.get()?;
        let tx = conn.transaction()?;

        tx.execute(
            "INSERT INTO resolved_mappings (hash, media_id, locked, failed, data, cached_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
             ON CONFLICT(hash) DO UPDATE SET
                media_id = excluded.media_id,
                locked = excluded.locked,
                failed = excluded.failed,
                data = excluded.data,
                updated_at = excluded.updated_at",
            params![
                mapping.hash,
                mapping.media_id,
                mapping.locked,
                mapping.failed,
                data,
                mapping.cached_at.to_rfc3339_opts(SecondsFormat::Micros, true),
                mapping.updated_at.to_rfc3339_opts(SecondsFormat::Micros, true),
            ],
        )?;

        tx.execute("DELETE FROM mapping_files WHERE hash = ?1", params![mapping.hash])?;
        for file in &mapping.files {
            tx.execute(
                "INSERT INTO mapping_files (file_hash, hash, media_id) VALUES (?1, ?2, ?3)",
                params![file.file_hash, mapping.hash, file.media_id],
            )?;
        }

        tx.commit()?;
        Ok(())
    }

    fn delete(&self, hash: &str) -> AppResult<bool> {
        let conn = self.pool.get()?;

        let removed = conn.execute("DELETE FROM resolved_mappings WHERE hash = ?1", params![hash])?;

        Ok(removed > 0)
    }
}

// ============================================================================
// IN-MEMORY
// ============================================================================

/// Non-durable store for tests and throwaway sessions
#[derive(Default)]
pub struct InMemoryMappingRepository {
    records: Mutex<HashMap<String, ResolvedMapping>>,
}

impl InMemoryMappingRepository {
    pub fn new() -> Self {
        Self::default()
    }

    fn sorted(&self, keep: impl Fn(&ResolvedMapping) -> bool) -> Vec<ResolvedMapping> {
        let records = self.records.lock().unwrap_or_else(PoisonError::into_inner);
        let mut out: Vec<ResolvedMapping> = records.values().filter(|m| keep(m)).cloned().collect();
        out.sort_by(|a, b| a.cached_at.cmp(&b.cached_at).then_with(|| a.hash.cmp(&b.hash)));
        out
    }
}

impl MappingRepository for InMemoryMappingRepository {
    fn get(&self, hash: &str) -> AppResult<Option<ResolvedMapping>> {
        let records = self.records.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(records.get(hash).cloned())
    }

    fn find_by_file_hash(&self, file_hash: &str) -> AppResult<Option<ResolvedMapping>> {
        Ok(self
            .sorted(|m| m.file(file_hash).is_some())
            .into_iter()
            .next())
    }

    fn list_for_media(&self, media_id: i64) -> AppResult<Vec<ResolvedMapping>> {
        Ok(self.sorted(|m| m.media_id == media_id || m.files.iter().any(|f| f.media_id == media_id)))
    }

    fn list_all(&self) -> AppResult<Vec<ResolvedMapping>> {
        Ok(self.sorted(|_| true))
    }

    fn save(&self, mapping: &ResolvedMapping) -> AppResult<()> {
        validate_mapping(mapping)?;
        let mut records = self.records.lock().unwrap_or_else(PoisonError::into_inner);
        records.insert(mapping.hash.clone(), mapping.clone());
        Ok(())
    }

    fn delete(&self, hash: &str) -> AppResult<bool> {
        let mut records = self.records.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(records.remove(hash).is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{create_connection_pool, initialize_database};
    use crate::domain::{MappingUpdate, MediaStatus, ParsedDescriptor, ResolvedEpisode};
    use chrono::{DateTime, Duration, Utc};

    fn t0() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2024-04-01T12:00:00Z")
            .unwrap()
            .with_timezone(&Utc)
    }

    fn sqlite_repo() -> (tempfile::TempDir, SqliteMappingRepository) {
        let dir = tempfile::tempdir().unwrap();
        let pool = create_connection_pool(&dir.path().join("resolver.db")).unwrap();
        initialize_database(&pool.get().unwrap()).unwrap();
        (dir, SqliteMappingRepository::new(Arc::new(pool)))
    }

    fn batch() -> ResolvedMapping {
        let mut mapping = ResolvedMapping::create(
            "batch",
            &MappingUpdate::new(5)
                .for_file("file-1")
                .with_episode(ResolvedEpisode::Number(1))
                .with_descriptor(ParsedDescriptor::new("Show"))
                .with_status(MediaStatus::Finished),
            t0(),
        );
        mapping.apply(
            &MappingUpdate::new(6)
                .for_file("file-2")
                .with_episode(ResolvedEpisode::Number(2))
                .failed(),
            t0() + Duration::minutes(1),
        );
        mapping
    }

    fn check_contract(repo: &dyn MappingRepository) {
        assert!(repo.get("batch").unwrap().is_none());

        let mapping = batch();
        repo.save(&mapping).unwrap();
        assert_eq!(repo.get("batch").unwrap(), Some(mapping.clone()));

        let owner = repo.find_by_file_hash("file-2").unwrap().unwrap();
        assert_eq!(owner.hash, "batch");
        assert!(repo.find_by_file_hash("file-9").unwrap().is_none());

        assert_eq!(repo.list_for_media(6).unwrap().len(), 1);
        assert!(repo.list_for_media(7).unwrap().is_empty());

        let later = ResolvedMapping::create("single", &MappingUpdate::new(7), t0() + Duration::hours(1));
        repo.save(&later).unwrap();
        let hashes: Vec<String> = repo.list_all().unwrap().into_iter().map(|m| m.hash).collect();
        assert_eq!(hashes, vec!["batch", "single"]);

        assert!(repo.delete("batch").unwrap());
        assert!(!repo.delete("batch").unwrap());
        assert!(repo.find_by_file_hash("file-1").unwrap().is_none());
    }

    #[test]
    fn test_sqlite_repository_contract() {
        let (_dir, repo) = sqlite_repo();
        check_contract(&repo);
    }

    #[test]
    fn test_in_memory_repository_contract() {
        check_contract(&InMemoryMappingRepository::new());
    }

    #[test]
    fn test_save_replaces_file_rows() {
        let (_dir, repo) = sqlite_repo();
        let mut mapping = batch();
        repo.save(&mapping).unwrap();

        mapping.files.retain(|f| f.file_hash == "file-1");
        repo.save(&mapping).unwrap();

        assert!(repo.find_by_file_hash("file-2").unwrap().is_none());
        assert!(repo.list_for_media(6).unwrap().is_empty());
        assert_eq!(repo.get("batch").unwrap().unwrap().files.len(), 1);
    }

    #[test]
    fn test_invalid_mapping_not_saved() {
        let (_dir, repo) = sqlite_repo();
        let mut mapping = batch();
        mapping.files[1].file_hash = "file-1".to_string();

        let err = repo.save(&mapping).unwrap_err();
        assert!(matches!(err, AppError::Domain(_)));
        assert!(repo.get("batch").unwrap().is_none());
    }
}

// src/config.rs
//
// Resolver configuration
//
// PRINCIPLES:
// - Every field has a built-in default; an empty or missing file is valid
// - Loaded once at startup, passed down explicitly
// - Invalid values are rejected at load time, not at use

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{AppError, AppResult};

pub const DEFAULT_CATALOG_ENDPOINT: &str = "https://graphql.anilist.co";

/// Titles per catalog request when prefetching a batch
pub const DEFAULT_SEARCH_CHUNK_SIZE: usize = 55;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CatalogConfig {
    pub endpoint: String,
    /// Minimum spacing between two catalog requests
    pub min_request_interval_ms: u64,
    pub request_timeout_secs: u64,
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_CATALOG_ENDPOINT.to_string(),
            min_request_interval_ms: 700,
            request_timeout_secs: 30,
        }
    }
}

impl CatalogConfig {
    pub fn min_request_interval(&self) -> Duration {
        Duration::from_millis(self.min_request_interval_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResolutionConfig {
    pub search_chunk_size: usize,
    pub title_cache_ttl_secs: u64,
    pub title_cache_max_entries: usize,
}

impl Default for ResolutionConfig {
    fn default() -> Self {
        Self {
            search_chunk_size: DEFAULT_SEARCH_CHUNK_SIZE,
            title_cache_ttl_secs: 60 * 60,
            title_cache_max_entries: 4096,
        }
    }
}

impl ResolutionConfig {
    pub fn title_cache_ttl(&self) -> Duration {
        Duration::from_secs(self.title_cache_ttl_secs)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MappingConfig {
    /// Freshness of mappings whose media finished airing
    pub finished_freshness_hours: i64,
    /// Freshness of everything else
    pub default_freshness_hours: i64,
}

impl Default for MappingConfig {
    fn default() -> Self {
        Self {
            finished_freshness_hours: 7 * 24,
            default_freshness_hours: 24,
        }
    }
}

impl MappingConfig {
    pub fn finished_window(&self) -> chrono::Duration {
        chrono::Duration::hours(self.finished_freshness_hours)
    }

    pub fn default_window(&self) -> chrono::Duration {
        chrono::Duration::hours(self.default_freshness_hours)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResolverConfig {
    /// Mapping database; `{data_dir}/animehub/resolver.db` when unset
    pub database_path: Option<PathBuf>,
    /// Title corrections table replacing the embedded one
    pub title_corrections: Option<PathBuf>,
    /// `env_logger` filter, overridden by `RUST_LOG`
    pub log_level: Option<String>,
    pub catalog: CatalogConfig,
    pub resolution: ResolutionConfig,
    pub mapping: MappingConfig,
}

impl ResolverConfig {
    /// Load from a TOML file. A missing file yields the defaults.
    pub fn load(path: &Path) -> AppResult<Self> {
        if !path.exists() {
            log::debug!("No config at {}, using defaults", path.display());
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> AppResult<Self> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// `{config_dir}/animehub/resolver.toml`
    pub fn default_path() -> AppResult<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| AppError::Config("Could not determine config directory".to_string()))?;
        Ok(config_dir.join("animehub").join("resolver.toml"))
    }

    pub fn validate(&self) -> AppResult<()> {
        if self.catalog.endpoint.trim().is_empty() {
            return Err(AppError::Config("catalog.endpoint must not be empty".to_string()));
        }
        if self.resolution.search_chunk_size == 0 {
            return Err(AppError::Config(
                "resolution.search_chunk_size must be positive".to_string(),
            ));
        }
        if self.resolution.title_cache_max_entries == 0 {
            return Err(AppError::Config(
                "resolution.title_cache_max_entries must be positive".to_string(),
            ));
        }
        if self.mapping.finished_freshness_hours <= 0 || self.mapping.default_freshness_hours <= 0
        {
            return Err(AppError::Config(
                "mapping freshness windows must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

// src/lib.rs
// AnimeHub Resolver - release filename → catalog entry resolution
//
// Architecture:
// - Domain-centric: descriptors, media and mappings are plain data
// - Explicit: catalog, tokenizer and persistence sit behind traits
// - Best effort: an unresolvable file is a `failed` result, never an error
// - Local-first: resolved mappings persist in SQLite

// ============================================================================
// FOUNDATION
// ============================================================================

pub mod config;
pub mod db;
pub mod domain;
pub mod error;
pub mod fingerprint;
pub mod repositories;

// ============================================================================
// RESOLUTION PIPELINE
// ============================================================================

pub mod integrations;
pub mod services;

// ============================================================================
// PUBLIC API - Domain
// ============================================================================

pub use domain::{
    validate_mapping,
    EpisodeNumber,
    EpisodeRange,
    FileOverride,
    MappingUpdate,
    Media,
    MediaFormat,
    MediaStatus,
    MediaTitle,
    ParsedDescriptor,
    RelationType,
    ReleaseType,
    ResolutionResult,
    ResolutionStage,
    ResolvedEpisode,
    ResolvedMapping,
};

// ============================================================================
// PUBLIC API - Error Types
// ============================================================================

pub use error::{AppError, AppResult};

// ============================================================================
// PUBLIC API - Configuration & Database
// ============================================================================

pub use config::ResolverConfig;
pub use db::{create_connection_pool, initialize_database, ConnectionPool};
pub use fingerprint::{collect_video_files, fingerprint_file};

// ============================================================================
// PUBLIC API - Repositories
// ============================================================================

pub use repositories::{InMemoryMappingRepository, MappingRepository, SqliteMappingRepository};

// ============================================================================
// PUBLIC API - Integrations
// ============================================================================

pub use integrations::{
    AniListClient, CatalogService, NoZeroEpisodes, SearchFilters, StreamingEpisodeHeuristic,
    TitleQuery, ZeroEpisodeHeuristic,
};

// ============================================================================
// PUBLIC API - Services
// ============================================================================

pub use services::{
    FilenameTokenizer, MappingCache, MappingLookup, MappingQuery, ResolutionService,
    TitleCorrections, TitleNormalizer, Tokenizer,
};

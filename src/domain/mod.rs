// src/domain/mod.rs
//
// Domain Root - The Single Source of Truth for Domain API
//
// This file MUST declare all domain modules and re-export their public API.
// All other modules import from `crate::domain::*`

// ============================================================================
// MODULE DECLARATIONS
// ============================================================================

pub mod descriptor;
pub mod mapping;
pub mod media;
pub mod resolution;

// ============================================================================
// PUBLIC API RE-EXPORTS
// ============================================================================

// Descriptor Domain
pub use descriptor::{EpisodeNumber, ParsedDescriptor, ReleaseType};

// Catalog Domain
pub use media::{
    Media, MediaFormat, MediaNode, MediaStatus, MediaTitle, RelationEdge, RelationType,
    TitleField,
};

// Resolution Domain
pub use resolution::{ResolutionResult, ResolutionStage, ResolvedEpisode};

// Mapping Domain
pub use mapping::{validate_mapping, EpisodeRange, FileOverride, MappingUpdate, ResolvedMapping};

// ============================================================================
// DOMAIN ERROR TYPES
// ============================================================================

use thiserror::Error;

/// Domain-level errors
/// These represent violations of business rules and invariants
#[derive(Debug, Error)]
pub enum DomainError {
    #[error("Invariant violation: {0}")]
    InvariantViolation(String),

    #[error("Entity not found: {0}")]
    NotFound(String),
}

/// Domain result type
pub type DomainResult<T> = Result<T, DomainError>;

// src/domain/resolution/value_objects.rs
//
// Resolution Value Objects
//
// Pure, immutable data structures representing resolution outcomes.
//
// CRITICAL INVARIANTS:
// - No side effects, no I/O
// - `failed = true` means low confidence: callers must not treat the
//   result as ground truth, even when `media` is set
// - `upstream_error` is only set on failed results where no stage got an
//   answer from the catalog

use serde::{Deserialize, Serialize};

use crate::domain::descriptor::ParsedDescriptor;
use crate::domain::media::Media;

// ============================================================================
// RESOLVED EPISODE
// ============================================================================

/// Canonical episode after re-basing.
/// A range that could not be split stays a formatted string (`"12 ~ 14"`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ResolvedEpisode {
    Number(u32),
    Range(String),
}

impl ResolvedEpisode {
    pub fn range(first: u32, last: u32) -> Self {
        ResolvedEpisode::Range(format!("{} ~ {}", first, last))
    }

    pub fn as_number(&self) -> Option<u32> {
        match self {
            ResolvedEpisode::Number(n) => Some(*n),
            ResolvedEpisode::Range(_) => None,
        }
    }
}

impl std::fmt::Display for ResolvedEpisode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ResolvedEpisode::Number(n) => write!(f, "{}", n),
            ResolvedEpisode::Range(r) => write!(f, "{}", r),
        }
    }
}

// ============================================================================
// RESOLUTION STAGE
// ============================================================================

/// Which strategy produced the result. Used for traceability and debugging.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolutionStage {
    /// Title search result verified as-is
    Direct,
    /// Re-based through the prequel/sequel graph
    SeasonWalk,
    /// Season token stripped from the title and searched again
    AlternateTitle,
    /// Free-text catalog search
    ManualSearch,
    /// Nothing could be confirmed
    Unresolved,
}

impl std::fmt::Display for ResolutionStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ResolutionStage::Direct => write!(f, "direct"),
            ResolutionStage::SeasonWalk => write!(f, "season_walk"),
            ResolutionStage::AlternateTitle => write!(f, "alternate_title"),
            ResolutionStage::ManualSearch => write!(f, "manual_search"),
            ResolutionStage::Unresolved => write!(f, "unresolved"),
        }
    }
}

// ============================================================================
// RESOLUTION RESULT
// ============================================================================

/// Per-file decision of the resolver.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolutionResult {
    pub media: Option<Media>,
    pub episode: Option<ResolvedEpisode>,
    pub season: Option<u32>,
    pub descriptor: ParsedDescriptor,
    pub failed: bool,
    pub stage: ResolutionStage,
    /// Catalog or network failure that left nothing to fall back on
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub upstream_error: Option<String>,
}

impl ResolutionResult {
    /// Result for a descriptor that was never looked up.
    pub fn unresolved(descriptor: ParsedDescriptor) -> Self {
        Self {
            media: None,
            episode: None,
            season: None,
            descriptor,
            failed: true,
            stage: ResolutionStage::Unresolved,
            upstream_error: None,
        }
    }

    pub fn media_id(&self) -> Option<i64> {
        self.media.as_ref().map(|m| m.id)
    }

    pub fn is_confident(&self) -> bool {
        !self.failed && self.media.is_some()
    }

    /// Failed because the catalog could not be reached, not for lack of a match.
    pub fn is_upstream_failure(&self) -> bool {
        self.upstream_error.is_some()
    }
}

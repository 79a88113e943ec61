// src/domain/resolution/mod.rs
//
// Resolution Domain
//
// Value objects representing the outcome of resolving one release file.
//
// CRITICAL RULES:
// - All types are pure value objects (immutable)
// - No persistence, no catalog access

pub mod value_objects;

pub use value_objects::{ResolutionResult, ResolutionStage, ResolvedEpisode};

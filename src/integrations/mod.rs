// src/integrations/mod.rs
//
// External Integrations Module
//
// Boundaries the resolver consumes, plus the shipped implementations.

pub mod anilist;
pub mod catalog;
pub mod zero_episode;

pub use anilist::AniListClient;
pub use catalog::{CatalogService, SearchFilters, TitleQuery, ZeroEpisodeHeuristic};
pub use zero_episode::{NoZeroEpisodes, StreamingEpisodeHeuristic};

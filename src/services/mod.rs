// src/services/mod.rs
//
// Services Module - Resolution pipeline
//
// Leaves first: text matching, graph walking, orchestration, persistence.

pub mod fuzzy;
pub mod mapping_cache;
pub mod resolution_service;
pub mod season_walker;
pub mod title_cache;
pub mod title_normalizer;
pub mod tokenizer;
pub mod verifier;

#[cfg(test)]
mod test_support;


#[cfg(test)]
mod resolution_service_tests;

pub use fuzzy::{adaptive_threshold, match_keys, FuzzyMatcher, TitleSimilarity};
pub use mapping_cache::{MappingCache, MappingLookup, MappingQuery};
pub use resolution_service::ResolutionService;
pub use season_walker::{find_edge, PrequelOutcome, SeasonWalker, WalkOptions, WalkState};
pub use title_cache::TitleCache;
pub use title_normalizer::{TitleCorrections, TitleNormalizer};
pub use tokenizer::{FilenameTokenizer, Tokenizer};
pub use verifier::MediaVerifier;

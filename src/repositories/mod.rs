// src/repositories/mod.rs
//
// Repository layer
//
// CRITICAL RULES:
// - Repositories are DUMB data mappers
// - NO merge logic (that belongs to MappingCache)
// - Structural validation only, right before a write
// - Explicit SQL only

pub mod mapping_repository;

pub use mapping_repository::{
    InMemoryMappingRepository, MappingRepository, SqliteMappingRepository,
};

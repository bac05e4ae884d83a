//! File formats used by the terrain.

pub mod patch_cache;

pub use crate::formats::patch_cache::TerrainPatchCache;

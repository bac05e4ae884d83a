//! This module contains the data structures of the terrain: the [`TerrainQuadTree`]
//! forest, its [`TerrainQuadTreeNode`]s and the patches stored in their leaves.
//!
//! # Explanation
//! The infinite terrain is split into a grid of root cells, of which only those around the
//! viewer are loaded.
//! Every loaded cell is the root of a quadtree, whose leaves are refined towards the viewer.
//! Each leaf owns exactly one [`TerrainPatch`], which combines the CPU side
//! [`TerrainPatchData`] used for height queries with the GPU textures used for rendering.
//!
//! Editor supplied [`TerrainMaps`] override the generated data inside their extent.

pub mod map;
pub mod patch;
pub mod quadtree;
pub mod quadtree_node;

pub use crate::terrain_data::{
    map::{BlendMap, HeightMap, IndexMap, TerrainMap, TerrainMaps},
    patch::{
        PatchState, TerrainPatch, TerrainPatchData, TerrainPatchRenderInformation,
        TerrainPatchTextures, TerrainSample, TerrainVisibility,
    },
    quadtree::TerrainQuadTree,
    quadtree_node::{NodeContent, Side, TerrainBorders, TerrainQuadTreeNode},
};

//! This crate streams infinite, procedurally generated height-field terrains for the Bevy
//! engine.
//!
//! # Background
//! The world is divided into a grid of square root cells. Only the cells within the
//! streaming radius around the viewer are loaded, each as the root of a quadtree.
//! Nodes close to the viewer are subdivided and distant ones are combined again,
//! so that the detail of the terrain follows the viewer.
//! Every leaf of the quadtrees owns a patch: a grid of heights, normals and material
//! samples, which is generated on the CPU and uploaded as textures through a
//! [`TerrainRenderBackend`](render::TerrainRenderBackend).
//!
//! All patches are rendered with the same plane mesh, displaced by their height texture.
//! Leaves that neighbour a coarser leaf stitch their edge vertices with the help of the
//! [`TerrainBorders`](terrain_data::TerrainBorders) bits of their render information.
//!
//! The quadtree is updated in the background. See the [`terrain`] module for more
//! information on the update cycle.

pub mod config;
pub mod formats;
pub mod generation;
pub mod math;
pub mod plugin;
pub mod render;
pub mod schedule;
pub mod terrain;
pub mod terrain_data;
pub mod viewer;

pub mod prelude {
    #[doc(hidden)]
    pub use crate::{
        config::TerrainConfig,
        generation::{
            FlatTerrainGenerator, ProceduralTerrainGenerator, TerrainGenerator,
            TerrainMaterialSample,
        },
        math::{GridPoint2, NodeCoordinate},
        plugin::TerrainPlugin,
        render::{HeadlessRenderBackend, TerrainRenderBackend},
        terrain::{TerrainStatistics, TerrainSystem},
        terrain_data::{
            BlendMap, HeightMap, IndexMap, TerrainPatchRenderInformation, TerrainSample,
            TerrainVisibility,
        },
        viewer::{TerrainShadowViewer, TerrainViewer},
    };
}

use crate::{
    generation::TerrainMaterialSample,
    math::NodeCoordinate,
    render::TextureHandle,
    terrain_data::TerrainBorders,
};
use bevy::math::{Rect, Vec2, Vec3};
use bitflags::bitflags;
use bytemuck::{Pod, Zeroable};
use ndarray::Array2;
use std::sync::Arc;

/// The CPU side data of a single patch, generated on the async compute pool.
///
/// All arrays have `resolution x resolution` samples, where the samples are located at the
/// grid corners of the patch, so neighbouring patches share their edge samples.
/// Rows run along the world z axis and columns along the world x axis.
#[derive(Clone, Debug)]
pub struct TerrainPatchData {
    pub coordinate: NodeCoordinate,
    /// The horizontal world region covered by the patch.
    pub extent: Rect,
    pub resolution: u32,
    /// The final, scaled heights.
    pub heights: Array2<f32>,
    /// The surface normals, encoded from `[-1, 1]` to `[0, 255]`.
    pub normals: Array2<[u8; 4]>,
    pub material_indices: Array2<[u8; 4]>,
    pub material_weights: Array2<[u8; 4]>,
    pub minimum_height: f32,
    pub maximum_height: f32,
}

/// Everything known about the terrain surface at one position.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct TerrainSample {
    pub height: f32,
    pub normal: Vec3,
    pub material: TerrainMaterialSample,
}

pub fn encode_normal(normal: Vec3) -> [u8; 4] {
    let encoded = (normal * 0.5 + 0.5).clamp(Vec3::ZERO, Vec3::ONE) * 255.0;
    [
        encoded.x.round() as u8,
        encoded.y.round() as u8,
        encoded.z.round() as u8,
        255,
    ]
}

pub fn decode_normal(encoded: [u8; 4]) -> Vec3 {
    let normal = Vec3::new(encoded[0] as f32, encoded[1] as f32, encoded[2] as f32) / 255.0;
    (normal * 2.0 - 1.0).normalize_or(Vec3::Y)
}

impl TerrainPatchData {
    /// A patch at a constant height, with an upward normal and a single material.
    pub fn flat(coordinate: NodeCoordinate, patch_size: f32, resolution: u32, height: f32) -> Self {
        let shape = (resolution as usize, resolution as usize);

        Self {
            coordinate,
            extent: coordinate.extent(patch_size),
            resolution,
            heights: Array2::from_elem(shape, height),
            normals: Array2::from_elem(shape, encode_normal(Vec3::Y)),
            material_indices: Array2::from_elem(shape, [0; 4]),
            material_weights: Array2::from_elem(shape, [255, 0, 0, 0]),
            minimum_height: height,
            maximum_height: height,
        }
    }

    pub fn center(&self) -> Vec2 {
        self.extent.center()
    }

    /// The continuous sample coordinate in `[0, resolution - 1]` of a position inside the patch.
    fn sample_coordinate(&self, position: Vec2) -> Option<Vec2> {
        if !self.extent.contains(position) {
            return None;
        }

        let last = (self.resolution - 1) as f32;
        let uv = (position - self.extent.min) / self.extent.size();

        Some((uv * last).clamp(Vec2::ZERO, Vec2::splat(last)))
    }

    /// Bilinearly interpolates the heights and normals at the position.
    pub fn sample(&self, position: Vec2) -> Option<TerrainSample> {
        let coordinate = self.sample_coordinate(position)?;
        let last = (self.resolution - 1) as f32;

        let base = coordinate.floor().min(Vec2::splat(last - 1.0));
        let t = coordinate - base;
        let (x, y) = (base.x as usize, base.y as usize);
        let corners = [[y, x], [y, x + 1], [y + 1, x], [y + 1, x + 1]];
        let weights = [
            (1.0 - t.x) * (1.0 - t.y),
            t.x * (1.0 - t.y),
            (1.0 - t.x) * t.y,
            t.x * t.y,
        ];

        let height = corners
            .iter()
            .zip(weights)
            .map(|(&corner, weight)| self.heights[corner] * weight)
            .sum::<f32>();
        let normal = corners
            .iter()
            .zip(weights)
            .map(|(&corner, weight)| decode_normal(self.normals[corner]) * weight)
            .sum::<Vec3>()
            .normalize_or(Vec3::Y);

        let nearest = coordinate.round();
        let nearest = [nearest.y as usize, nearest.x as usize];

        Some(TerrainSample {
            height,
            normal,
            material: TerrainMaterialSample {
                indices: self.material_indices[nearest],
                weights: self.material_weights[nearest],
            },
        })
    }

    pub fn height(&self, position: Vec2) -> Option<f32> {
        self.sample(position).map(|sample| sample.height)
    }
}

/// The GPU textures of a patch and their slots in the render data table.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct TerrainPatchTextures {
    pub height: TextureHandle,
    pub normal: TextureHandle,
    pub index: TextureHandle,
    pub blend: TextureHandle,
    pub height_index: u32,
    pub normal_index: u32,
    pub index_index: u32,
    pub blend_index: u32,
}

impl TerrainPatchTextures {
    pub fn handles(&self) -> [TextureHandle; 4] {
        [self.height, self.normal, self.index, self.blend]
    }

    pub fn table_indices(&self) -> [u32; 4] {
        [
            self.height_index,
            self.normal_index,
            self.index_index,
            self.blend_index,
        ]
    }
}

/// A patch whose data is resident on the CPU and the GPU.
#[derive(Clone, Debug)]
pub struct TerrainPatch {
    pub data: Arc<TerrainPatchData>,
    pub textures: TerrainPatchTextures,
}

/// The patch of a leaf node.
#[derive(Clone, Debug)]
pub enum PatchState {
    /// The patch could not be created yet and will be regenerated by a later update.
    Pending,
    Ready(TerrainPatch),
}

impl PatchState {
    pub fn patch(&self) -> Option<&TerrainPatch> {
        match self {
            PatchState::Pending => None,
            PatchState::Ready(patch) => Some(patch),
        }
    }

    pub fn into_patch(self) -> Option<TerrainPatch> {
        match self {
            PatchState::Pending => None,
            PatchState::Ready(patch) => Some(patch),
        }
    }

    pub fn is_pending(&self) -> bool {
        matches!(self, PatchState::Pending)
    }
}

bitflags! {
    /// The views a patch has been found visible in during the last culling pass.
    #[repr(transparent)]
    #[derive(Copy, Clone, Debug, Default, Hash, Eq, PartialEq)]
    pub struct TerrainVisibility: u32 {
        const VIEW = 1 << 0;
        const SHADOW = 1 << 1;
    }
}

/// The per patch record consumed by the terrain shaders.
#[repr(C)]
#[derive(Copy, Clone, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct TerrainPatchRenderInformation {
    /// The horizontal center of the patch, relative to the terrain world center.
    pub world_position: [f32; 2],
    pub patch_half_size: f32,
    /// The [`TerrainBorders`] of the patch.
    pub borders: u32,
    pub height_texture_index: u32,
    pub normal_texture_index: u32,
    pub index_texture_index: u32,
    pub blend_texture_index: u32,
    pub minimum_height: f32,
    pub maximum_height: f32,
    /// The [`TerrainVisibility`] of the patch.
    pub visibility: u32,
    pub depth: u32,
}

impl TerrainPatchRenderInformation {
    pub fn new(patch: &TerrainPatch, borders: TerrainBorders, world_center: Vec2) -> Self {
        let data = &patch.data;
        let textures = &patch.textures;

        Self {
            world_position: (data.center() - world_center).to_array(),
            patch_half_size: data.extent.width() / 2.0,
            borders: borders.bits(),
            height_texture_index: textures.height_index,
            normal_texture_index: textures.normal_index,
            index_texture_index: textures.index_index,
            blend_texture_index: textures.blend_index,
            minimum_height: data.minimum_height,
            maximum_height: data.maximum_height,
            visibility: TerrainVisibility::all().bits(),
            depth: data.coordinate.depth,
        }
    }

    pub fn visibility(&self) -> TerrainVisibility {
        TerrainVisibility::from_bits_truncate(self.visibility)
    }

    pub fn borders(&self) -> TerrainBorders {
        TerrainBorders::from_bits_truncate(self.borders)
    }
}

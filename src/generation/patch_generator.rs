use crate::{
    config::TerrainConfig,
    formats::TerrainPatchCache,
    generation::TerrainGenerator,
    math::NodeCoordinate,
    terrain_data::{patch::encode_normal, TerrainMaps, TerrainPatchData},
};
use bevy::{
    log::warn,
    math::{Vec2, Vec3},
};
use ndarray::{s, Array2};
use std::sync::Arc;

/// Generates the [`TerrainPatchData`] of single nodes.
///
/// A patch generator is a cheap to clone snapshot of everything needed for generation,
/// so that each patch can be generated by its own task.
#[derive(Clone)]
pub struct PatchGenerator {
    patch_size: f32,
    resolution: u32,
    height_scale: f32,
    generator: Arc<dyn TerrainGenerator>,
    maps: TerrainMaps,
    cache: Option<TerrainPatchCache>,
}

impl PatchGenerator {
    pub fn new(
        config: &TerrainConfig,
        generator: Arc<dyn TerrainGenerator>,
        maps: TerrainMaps,
        cache: Option<TerrainPatchCache>,
    ) -> Self {
        Self {
            patch_size: config.patch_size,
            resolution: config.patch_resolution,
            height_scale: config.height_scale,
            generator,
            maps,
            cache,
        }
    }

    /// The unscaled height, taken from the height map where it covers the position.
    fn unscaled_height(&self, position: Vec2) -> f32 {
        self.maps
            .height(position)
            .unwrap_or_else(|| self.generator.height(position))
    }

    /// The final terrain height at the position.
    pub fn height(&self, position: Vec2) -> f32 {
        self.unscaled_height(position) * self.height_scale
    }

    /// Loads the patch from the cache or generates it.
    ///
    /// Patches touched by an editor map are always generated, since the cache only knows
    /// the procedural terrain.
    pub fn generate(&self, coordinate: NodeCoordinate) -> TerrainPatchData {
        let extent = coordinate.extent(self.patch_size);
        let spacing = extent.width() / (self.resolution - 1) as f32;

        let cache = self
            .cache
            .as_ref()
            .filter(|_| !self.maps.overlaps(extent.inflate(spacing)));

        if let Some(cache) = cache {
            match cache.load(coordinate) {
                Ok(Some(data)) => return data,
                Ok(None) => {}
                Err(error) => warn!("Failed to load the cached patch {coordinate}: {error:#}"),
            }
        }

        let data = self.generate_uncached(coordinate);

        if let Some(cache) = cache {
            if let Err(error) = cache.save(&data) {
                warn!("Failed to cache the patch {coordinate}: {error:#}");
            }
        }

        data
    }

    fn generate_uncached(&self, coordinate: NodeCoordinate) -> TerrainPatchData {
        let extent = coordinate.extent(self.patch_size);
        let resolution = self.resolution as usize;
        let spacing = extent.width() / (resolution - 1) as f32;
        let sample_position =
            |x: usize, y: usize| extent.min + Vec2::new(x as f32, y as f32) * spacing;

        // one extra sample on each side, so that the edge normals see their neighbours
        let apron = Array2::from_shape_fn((resolution + 2, resolution + 2), |(y, x)| {
            let offset = Vec2::new(x as f32 - 1.0, y as f32 - 1.0) * spacing;
            self.unscaled_height(extent.min + offset)
        });
        let unscaled = apron.slice(s![1..=resolution, 1..=resolution]).to_owned();
        let heights = unscaled.mapv(|height| height * self.height_scale);

        let normals = Array2::from_shape_fn((resolution, resolution), |(y, x)| {
            let (x, y) = (x + 1, y + 1);
            let left = apron[[y, x - 1]] * self.height_scale;
            let right = apron[[y, x + 1]] * self.height_scale;
            let down = apron[[y - 1, x]] * self.height_scale;
            let up = apron[[y + 1, x]] * self.height_scale;

            Vec3::new(left - right, 2.0 * spacing, down - up).normalize_or(Vec3::Y)
        });

        let materials = Array2::from_shape_fn((resolution, resolution), |(y, x)| {
            let position = sample_position(x, y);
            let generated = self
                .generator
                .material(position, unscaled[[y, x]], normals[[y, x]]);

            self.maps.material(position, generated)
        });

        let (minimum_height, maximum_height) = heights
            .iter()
            .fold((f32::INFINITY, f32::NEG_INFINITY), |(minimum, maximum), &height| {
                (minimum.min(height), maximum.max(height))
            });

        TerrainPatchData {
            coordinate,
            extent,
            resolution: self.resolution,
            heights,
            normals: normals.mapv(encode_normal),
            material_indices: materials.mapv(|material| material.indices),
            material_weights: materials.mapv(|material| material.weights),
            minimum_height,
            maximum_height,
        }
    }
}

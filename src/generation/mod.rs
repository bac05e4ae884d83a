//! Procedural generation of the terrain patch data.
//!
//! The heights and materials of the terrain are described by a [`TerrainGenerator`].
//! Generators are evaluated on the async compute pool, for every texel of every patch that
//! is created, so they have to be cheap to share and deterministic.

mod patch_generator;
mod plane;

pub use crate::generation::{
    patch_generator::PatchGenerator,
    plane::{generate_terrain_plane, TerrainPlane, TerrainVertex},
};

use crate::math::smoothstep;
use bevy::math::{Vec2, Vec3};
use noise::{Fbm, MultiFractal, NoiseFn, Perlin};
use std::hash::{DefaultHasher, Hash, Hasher};

/// The material of a single texel: four material indices and their blend weights.
#[derive(Copy, Clone, Debug, Default, Hash, Eq, PartialEq)]
pub struct TerrainMaterialSample {
    pub indices: [u8; 4],
    pub weights: [u8; 4],
}

impl TerrainMaterialSample {
    /// Creates a sample from unnormalized weights, which are normalized to sum up to 255.
    pub fn from_weights(indices: [u8; 4], weights: [f32; 4]) -> Self {
        let total: f32 = weights.iter().sum();

        if total <= 0.0 {
            return Self {
                indices,
                weights: [255, 0, 0, 0],
            };
        }

        Self {
            indices,
            weights: weights.map(|weight| (255.0 * weight / total).round() as u8),
        }
    }

    /// The index of the material with the largest weight.
    pub fn dominant_index(&self) -> u8 {
        let (slot, _) = self
            .weights
            .iter()
            .enumerate()
            .max_by_key(|(_, &weight)| weight)
            .unwrap_or((0, &0));

        self.indices[slot]
    }
}

/// Describes the shape and surface of an infinite terrain.
pub trait TerrainGenerator: Send + Sync + 'static {
    /// The unscaled terrain height at the horizontal position.
    fn height(&self, position: Vec2) -> f32;

    /// The material at the horizontal position, given its unscaled height and surface normal.
    fn material(&self, position: Vec2, height: f32, normal: Vec3) -> TerrainMaterialSample;

    /// Identifies the generator parameters, so that cached patches of a different
    /// generator are not reused.
    fn fingerprint(&self) -> u64 {
        0
    }
}

/// A perfectly flat terrain with a single material.
#[derive(Clone, Copy, Debug, Default)]
pub struct FlatTerrainGenerator {
    pub height: f32,
    pub material: u8,
}

impl TerrainGenerator for FlatTerrainGenerator {
    fn height(&self, _position: Vec2) -> f32 {
        self.height
    }

    fn material(&self, _position: Vec2, _height: f32, _normal: Vec3) -> TerrainMaterialSample {
        TerrainMaterialSample {
            indices: [self.material, 0, 0, 0],
            weights: [255, 0, 0, 0],
        }
    }

    fn fingerprint(&self) -> u64 {
        let mut hasher = DefaultHasher::new();
        self.height.to_bits().hash(&mut hasher);
        self.material.hash(&mut hasher);
        hasher.finish()
    }
}

pub const GRASS_MATERIAL: u8 = 0;
pub const ROCK_MATERIAL: u8 = 1;
pub const SNOW_MATERIAL: u8 = 2;
pub const SAND_MATERIAL: u8 = 3;

/// Rolling hills made of fractal perlin noise, textured by altitude and slope bands.
#[derive(Clone, Debug)]
pub struct ProceduralTerrainGenerator {
    noise: Fbm<Perlin>,
    seed: u32,
    octaves: usize,
    frequency: f64,
    amplitude: f32,
}

impl Default for ProceduralTerrainGenerator {
    fn default() -> Self {
        Self::new(0)
    }
}

impl ProceduralTerrainGenerator {
    pub fn new(seed: u32) -> Self {
        Self::with_parameters(seed, 6, 1.0 / 2048.0, 256.0)
    }

    /// Creates a generator with `octaves` layers of noise, whose base layer repeats every
    /// `1 / frequency` world units and varies by up to `amplitude` in both directions.
    pub fn with_parameters(seed: u32, octaves: usize, frequency: f64, amplitude: f32) -> Self {
        let noise = Fbm::<Perlin>::new(seed)
            .set_octaves(octaves)
            .set_frequency(frequency)
            .set_persistence(0.5);

        Self {
            noise,
            seed,
            octaves,
            frequency,
            amplitude,
        }
    }

    pub fn amplitude(&self) -> f32 {
        self.amplitude
    }
}

impl TerrainGenerator for ProceduralTerrainGenerator {
    fn height(&self, position: Vec2) -> f32 {
        let value = self.noise.get([position.x as f64, position.y as f64]) as f32;
        value.clamp(-1.0, 1.0) * self.amplitude
    }

    fn material(&self, _position: Vec2, height: f32, normal: Vec3) -> TerrainMaterialSample {
        let altitude = height / self.amplitude.max(f32::EPSILON);
        let slope = 1.0 - normal.y.clamp(0.0, 1.0);

        let rock = smoothstep(0.15, 0.35, slope);
        let snow = smoothstep(0.45, 0.65, altitude) * (1.0 - rock);
        let sand = (1.0 - smoothstep(-0.45, -0.3, altitude)) * (1.0 - rock);
        let grass = (1.0 - rock - snow - sand).max(0.0);

        TerrainMaterialSample::from_weights(
            [GRASS_MATERIAL, ROCK_MATERIAL, SNOW_MATERIAL, SAND_MATERIAL],
            [grass, rock, snow, sand],
        )
    }

    fn fingerprint(&self) -> u64 {
        let mut hasher = DefaultHasher::new();
        self.seed.hash(&mut hasher);
        self.octaves.hash(&mut hasher);
        self.frequency.to_bits().hash(&mut hasher);
        self.amplitude.to_bits().hash(&mut hasher);
        hasher.finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn procedural_heights_are_deterministic() {
        let a = ProceduralTerrainGenerator::new(7);
        let b = ProceduralTerrainGenerator::new(7);
        let c = ProceduralTerrainGenerator::new(8);

        let positions = [Vec2::new(0.5, 0.25), Vec2::new(-1500.0, 3200.7), Vec2::splat(1e5)];

        for position in positions {
            let height = a.height(position);
            assert_eq!(height, b.height(position));
            assert!(height.abs() <= a.amplitude());
        }

        assert_eq!(a.fingerprint(), b.fingerprint());
        assert_ne!(a.fingerprint(), c.fingerprint());
    }

    #[test]
    fn steep_slopes_are_rocky() {
        let generator = ProceduralTerrainGenerator::new(0);

        let flat = generator.material(Vec2::ZERO, 0.0, Vec3::Y);
        let cliff = generator.material(Vec2::ZERO, 0.0, Vec3::new(1.0, 0.2, 0.0).normalize());
        let peak = generator.material(Vec2::ZERO, generator.amplitude(), Vec3::Y);

        assert_eq!(flat.dominant_index(), GRASS_MATERIAL);
        assert_eq!(cliff.dominant_index(), ROCK_MATERIAL);
        assert_eq!(peak.dominant_index(), SNOW_MATERIAL);
    }

    #[test]
    fn weights_are_normalized() {
        let sample = TerrainMaterialSample::from_weights([0, 1, 2, 3], [1.0, 1.0, 0.0, 0.0]);
        assert_eq!(sample.weights, [128, 128, 0, 0]);

        let empty = TerrainMaterialSample::from_weights([4, 1, 2, 3], [0.0; 4]);
        assert_eq!(empty.dominant_index(), 4);
    }
}

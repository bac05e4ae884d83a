use anyhow::{ensure, Context, Result};
use serde::{Deserialize, Serialize};
use std::{
    fs,
    path::{Path, PathBuf},
};

/// The deepest quadtree level supported, deeper nodes would lose horizontal precision.
pub const MAXIMUM_SUPPORTED_DEPTH: u32 = 16;

/// The immutable parameters of a streaming terrain.
///
/// The config is usually loaded from a `.ron` file via [`TerrainConfig::load_file`] and
/// handed to the [`TerrainSystem`](crate::terrain::TerrainSystem) or
/// [`TerrainPlugin`](crate::plugin::TerrainPlugin).
/// All omitted fields fall back to their [`Default`] values.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TerrainConfig {
    /// The horizontal size of a root patch in world units.
    pub patch_size: f32,
    /// The amount of texels and vertices along one side of a patch.
    /// Has to be of the form `2^n + 1`.
    pub patch_resolution: u32,
    /// The maximum depth any node of a quadtree may reach.
    pub maximum_quad_tree_depth: u32,
    /// The viewer distance below which a root node is subdivided.
    /// This distance is halved for every level of depth.
    pub subdivision_distance: f32,
    /// The relative margin past the subdivision distance the viewer has to travel
    /// before a subdivided node is combined again.
    pub combination_hysteresis: f32,
    /// The amount of root cells kept around the viewer cell in each direction.
    pub streaming_radius: u32,
    /// The global vertical scale applied to generated and imported heights.
    pub height_scale: f32,
    /// The compute shader used for generating the height textures on the GPU.
    pub height_generation_shader: Option<String>,
    /// The compute shader used for generating the material textures on the GPU.
    pub material_generation_shader: Option<String>,
    /// The folder procedurally generated patches are cached in.
    pub save_folder: Option<PathBuf>,
}

impl Default for TerrainConfig {
    fn default() -> Self {
        Self {
            patch_size: 1024.0,
            patch_resolution: 65,
            maximum_quad_tree_depth: 8,
            subdivision_distance: 2048.0,
            combination_hysteresis: 0.25,
            streaming_radius: 1,
            height_scale: 1.0,
            height_generation_shader: None,
            material_generation_shader: None,
            save_folder: None,
        }
    }
}

impl TerrainConfig {
    pub fn from_ron_str(text: &str) -> Result<Self> {
        let config: Self = ron::from_str(text).context("failed to parse the terrain config")?;
        config.validate()?;
        Ok(config)
    }

    pub fn load_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let text = fs::read_to_string(path)
            .with_context(|| format!("failed to read the terrain config {}", path.display()))?;

        Self::from_ron_str(&text)
            .with_context(|| format!("invalid terrain config {}", path.display()))
    }

    pub fn save_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let text = ron::ser::to_string_pretty(self, ron::ser::PrettyConfig::default())?;
        fs::write(path, text)?;
        Ok(())
    }

    /// Checks all parameters, so that the rest of the crate can rely on them.
    pub fn validate(&self) -> Result<()> {
        ensure!(
            self.patch_size.is_finite() && self.patch_size > 0.0,
            "the patch size has to be positive, got {}",
            self.patch_size
        );
        ensure!(
            self.patch_resolution >= 3 && (self.patch_resolution - 1).is_power_of_two(),
            "the patch resolution has to be of the form 2^n + 1 with n >= 1, got {}",
            self.patch_resolution
        );
        ensure!(
            self.maximum_quad_tree_depth <= MAXIMUM_SUPPORTED_DEPTH,
            "the maximum quadtree depth may not exceed {MAXIMUM_SUPPORTED_DEPTH}, got {}",
            self.maximum_quad_tree_depth
        );
        ensure!(
            self.subdivision_distance.is_finite() && self.subdivision_distance > 0.0,
            "the subdivision distance has to be positive, got {}",
            self.subdivision_distance
        );
        ensure!(
            self.combination_hysteresis.is_finite() && self.combination_hysteresis > 0.0,
            "the combination hysteresis has to be positive, got {}",
            self.combination_hysteresis
        );
        ensure!(
            self.height_scale.is_finite(),
            "the height scale has to be finite, got {}",
            self.height_scale
        );

        Ok(())
    }

    /// The viewer distance below which a leaf at the given depth is subdivided.
    #[inline]
    pub fn subdivision_distance(&self, depth: u32) -> f32 {
        self.subdivision_distance / (1u32 << depth) as f32
    }

    /// The viewer distance above which a node at the given depth collapses its children.
    ///
    /// Always strictly larger than the subdivision distance of the same depth.
    #[inline]
    pub fn combination_distance(&self, depth: u32) -> f32 {
        self.subdivision_distance(depth) * (1.0 + self.combination_hysteresis)
    }

    /// The amount of root cells kept loaded around the viewer.
    pub fn root_count(&self) -> usize {
        let side = 2 * self.streaming_radius as usize + 1;
        side * side
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_is_valid() {
        TerrainConfig::default().validate().unwrap();
    }

    #[test]
    fn rejects_invalid_resolution() {
        for resolution in [0, 1, 2, 4, 64, 100] {
            let config = TerrainConfig {
                patch_resolution: resolution,
                ..default_config()
            };
            assert!(config.validate().is_err(), "{resolution} was accepted");
        }

        for resolution in [3, 5, 17, 65, 257] {
            let config = TerrainConfig {
                patch_resolution: resolution,
                ..default_config()
            };
            assert!(config.validate().is_ok(), "{resolution} was rejected");
        }
    }

    #[test]
    fn rejects_invalid_parameters() {
        let invalid = [
            TerrainConfig {
                patch_size: 0.0,
                ..default_config()
            },
            TerrainConfig {
                maximum_quad_tree_depth: MAXIMUM_SUPPORTED_DEPTH + 1,
                ..default_config()
            },
            TerrainConfig {
                combination_hysteresis: 0.0,
                ..default_config()
            },
            TerrainConfig {
                subdivision_distance: f32::NAN,
                ..default_config()
            },
        ];

        for config in invalid {
            assert!(config.validate().is_err());
        }
    }

    #[test]
    fn parses_partial_ron() {
        let config = TerrainConfig::from_ron_str(
            "(patch_size: 500.0, patch_resolution: 33, streaming_radius: 2, \
             save_folder: Some(\"cache\"))",
        )
        .unwrap();

        assert_eq!(config.patch_size, 500.0);
        assert_eq!(config.patch_resolution, 33);
        assert_eq!(config.root_count(), 25);
        assert_eq!(config.save_folder, Some(PathBuf::from("cache")));
        assert_eq!(
            config.maximum_quad_tree_depth,
            TerrainConfig::default().maximum_quad_tree_depth
        );

        assert!(TerrainConfig::from_ron_str("(patch_resolution: 32)").is_err());
    }

    #[test]
    fn combination_exceeds_subdivision() {
        let config = default_config();

        for depth in 0..=config.maximum_quad_tree_depth {
            assert!(config.combination_distance(depth) > config.subdivision_distance(depth));
            assert_eq!(
                config.subdivision_distance(depth + 1) * 2.0,
                config.subdivision_distance(depth)
            );
        }
    }

    fn default_config() -> TerrainConfig {
        TerrainConfig::default()
    }
}

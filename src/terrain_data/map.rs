use crate::generation::TerrainMaterialSample;
use anyhow::{ensure, Context, Result};
use bevy::math::{Rect, UVec2, Vec2};
use image::DynamicImage;
use ndarray::{s, Array2, ArrayView2};
use std::{path::Path, sync::Arc};

/// A square grid of editor supplied samples, that covers a horizontal region of the terrain.
///
/// Samples are located at the grid corners, so a map with a resolution of `n` spans `n - 1`
/// texels in each direction.
/// Rows run along the world z axis and columns along the world x axis.
#[derive(Clone, Debug)]
pub struct TerrainMap<T> {
    minimum: Vec2,
    size: f32,
    data: Array2<T>,
}

/// Heights, which replace the generated heights inside the map extent.
pub type HeightMap = TerrainMap<f32>;
/// Four material indices per sample.
pub type IndexMap = TerrainMap<[u8; 4]>;
/// Four material weights per sample.
pub type BlendMap = TerrainMap<[u8; 4]>;

impl<T: Copy> TerrainMap<T> {
    pub fn new(minimum: Vec2, size: f32, data: Array2<T>) -> Result<Self> {
        let (rows, columns) = data.dim();

        ensure!(
            rows == columns,
            "terrain maps have to be square, got {columns}x{rows}"
        );
        ensure!(rows >= 2, "terrain maps need at least 2x2 samples");
        ensure!(
            size.is_finite() && size > 0.0,
            "the map size has to be positive, got {size}"
        );

        Ok(Self {
            minimum,
            size,
            data,
        })
    }

    pub fn resolution(&self) -> usize {
        self.data.nrows()
    }

    pub fn data(&self) -> &Array2<T> {
        &self.data
    }

    /// The horizontal world region covered by the map.
    pub fn extent(&self) -> Rect {
        Rect::from_corners(self.minimum, self.minimum + Vec2::splat(self.size))
    }

    fn spacing(&self) -> f32 {
        self.size / (self.resolution() - 1) as f32
    }

    /// The continuous sample coordinate of a world position, if it lies inside the map.
    fn sample_coordinate(&self, position: Vec2) -> Option<Vec2> {
        self.extent()
            .contains(position)
            .then(|| (position - self.minimum) / self.spacing())
    }

    /// The sample closest to the position.
    pub fn nearest(&self, position: Vec2) -> Option<T> {
        let coordinate = self.sample_coordinate(position)?.round().as_uvec2();
        let last = self.resolution() - 1;

        Some(self.data[[
            (coordinate.y as usize).min(last),
            (coordinate.x as usize).min(last),
        ]])
    }

    /// Overwrites a rectangular block of samples starting at `offset`.
    ///
    /// Returns the world region whose interpolated values changed.
    pub fn update(&mut self, offset: UVec2, region: ArrayView2<T>) -> Result<Rect> {
        let (rows, columns) = region.dim();
        let resolution = self.resolution();
        let (x, y) = (offset.x as usize, offset.y as usize);

        ensure!(
            x + columns <= resolution && y + rows <= resolution,
            "the region {columns}x{rows} at {offset} exceeds the map resolution {resolution}"
        );

        self.data
            .slice_mut(s![y..y + rows, x..x + columns])
            .assign(&region);

        // interpolation reaches one sample past the written block
        let first = offset.as_vec2() - 1.0;
        let last = offset.as_vec2() + UVec2::new(columns as u32, rows as u32).as_vec2();
        let spacing = self.spacing();

        Ok(Rect::from_corners(
            self.minimum + first * spacing,
            self.minimum + last * spacing,
        )
        .intersect(self.extent()))
    }
}

impl HeightMap {
    /// Bilinearly interpolates the height at the position.
    pub fn sample(&self, position: Vec2) -> Option<f32> {
        let coordinate = self.sample_coordinate(position)?;
        let last = (self.resolution() - 1) as f32;
        let coordinate = coordinate.clamp(Vec2::ZERO, Vec2::splat(last));

        let base = coordinate.floor().min(Vec2::splat(last - 1.0));
        let t = coordinate - base;
        let (x, y) = (base.x as usize, base.y as usize);

        let top = self.data[[y, x]] * (1.0 - t.x) + self.data[[y, x + 1]] * t.x;
        let bottom = self.data[[y + 1, x]] * (1.0 - t.x) + self.data[[y + 1, x + 1]] * t.x;

        Some(top * (1.0 - t.y) + bottom * t.y)
    }

    /// Converts the luminance of a square image to heights in the range `[0, height]`.
    pub fn from_image(image: &DynamicImage, minimum: Vec2, size: f32, height: f32) -> Result<Self> {
        let luminance = image.to_luma32f();
        let (width, rows) = luminance.dimensions();
        let data = Array2::from_shape_vec((rows as usize, width as usize), luminance.into_raw())?;

        Self::new(minimum, size, data.mapv(|value| value * height))
    }

    pub fn load_file<P: AsRef<Path>>(
        path: P,
        minimum: Vec2,
        size: f32,
        height: f32,
    ) -> Result<Self> {
        let path = path.as_ref();
        let image = image::open(path)
            .with_context(|| format!("failed to open the height map {}", path.display()))?;

        Self::from_image(&image, minimum, size, height)
    }
}

impl TerrainMap<[u8; 4]> {
    /// Stores the four channels of a square image, used for index and blend maps.
    pub fn from_image(image: &DynamicImage, minimum: Vec2, size: f32) -> Result<Self> {
        let rgba = image.to_rgba8();
        let (width, rows) = rgba.dimensions();
        let pixels = rgba.pixels().map(|pixel| pixel.0).collect();
        let data = Array2::from_shape_vec((rows as usize, width as usize), pixels)?;

        Self::new(minimum, size, data)
    }

    pub fn load_file<P: AsRef<Path>>(path: P, minimum: Vec2, size: f32) -> Result<Self> {
        let path = path.as_ref();
        let image = image::open(path)
            .with_context(|| format!("failed to open the material map {}", path.display()))?;

        Self::from_image(&image, minimum, size)
    }
}

/// The editor supplied maps of a terrain.
///
/// The maps are shared with in flight updates and copied on write.
#[derive(Clone, Default, Debug)]
pub struct TerrainMaps {
    pub height: Option<Arc<HeightMap>>,
    pub index: Option<Arc<IndexMap>>,
    pub blend: Option<Arc<BlendMap>>,
}

impl TerrainMaps {
    /// Whether any map covers part of the region.
    pub fn overlaps(&self, region: Rect) -> bool {
        let extents = [
            self.height.as_ref().map(|map| map.extent()),
            self.index.as_ref().map(|map| map.extent()),
            self.blend.as_ref().map(|map| map.extent()),
        ];

        extents.into_iter().flatten().any(|extent| {
            let overlap = extent.intersect(region);
            overlap.width() > 0.0 && overlap.height() > 0.0
        })
    }

    pub fn height(&self, position: Vec2) -> Option<f32> {
        self.height.as_ref()?.sample(position)
    }

    /// Replaces the indices and weights of the generated material, where a map covers the position.
    pub fn material(
        &self,
        position: Vec2,
        generated: TerrainMaterialSample,
    ) -> TerrainMaterialSample {
        let indices = self.index.as_ref().and_then(|map| map.nearest(position));
        let weights = self.blend.as_ref().and_then(|map| map.nearest(position));

        TerrainMaterialSample {
            indices: indices.unwrap_or(generated.indices),
            weights: weights.unwrap_or(generated.weights),
        }
    }
}

use crate::{config::TerrainConfig, math::NodeCoordinate, terrain_data::TerrainPatchData};
use anyhow::{ensure, Context, Result};
use bytemuck::{Pod, Zeroable};
use ndarray::Array2;
use std::{
    fs,
    io::ErrorKind,
    mem::size_of,
    path::{Path, PathBuf},
};

const MAGIC: u32 = u32::from_le_bytes(*b"TPC1");
const VERSION: u32 = 2;
const EXTENSION: &str = "tpc";

#[repr(C)]
#[derive(Clone, Copy, Debug, Pod, Zeroable)]
struct PatchCacheHeader {
    magic: u32,
    version: u32,
    resolution: u32,
    patch_size: f32,
    fingerprint: u64,
    height_scale: f32,
    minimum_height: f32,
    maximum_height: f32,
    _padding: u32,
}

/// Persists procedurally generated patches, so that revisited regions do not have to be
/// generated again.
///
/// Every patch is stored in its own file named after its [`NodeCoordinate`].
/// Files written by a generator with a different fingerprint or for a terrain with a
/// different patch size, resolution or height scale are ignored and overwritten.
#[derive(Clone, Debug)]
pub struct TerrainPatchCache {
    folder: PathBuf,
    fingerprint: u64,
    patch_size: f32,
    resolution: u32,
    height_scale: f32,
}

impl TerrainPatchCache {
    pub fn new<P: AsRef<Path>>(
        folder: P,
        config: &TerrainConfig,
        fingerprint: u64,
    ) -> Result<Self> {
        let folder = folder.as_ref().to_path_buf();
        fs::create_dir_all(&folder)
            .with_context(|| format!("failed to create the patch cache {}", folder.display()))?;

        Ok(Self {
            folder,
            fingerprint,
            patch_size: config.patch_size,
            resolution: config.patch_resolution,
            height_scale: config.height_scale,
        })
    }

    pub fn folder(&self) -> &Path {
        &self.folder
    }

    pub fn path(&self, coordinate: NodeCoordinate) -> PathBuf {
        coordinate.path_in(&self.folder, EXTENSION)
    }

    pub fn save(&self, data: &TerrainPatchData) -> Result<()> {
        ensure!(
            data.resolution == self.resolution,
            "the patch {} has resolution {}, the cache expects {}",
            data.coordinate,
            data.resolution,
            self.resolution
        );

        let header = PatchCacheHeader {
            magic: MAGIC,
            version: VERSION,
            resolution: data.resolution,
            patch_size: self.patch_size,
            fingerprint: self.fingerprint,
            height_scale: self.height_scale,
            minimum_height: data.minimum_height,
            maximum_height: data.maximum_height,
            _padding: 0,
        };

        let texel_count = data.heights.len();
        let mut bytes = Vec::with_capacity(size_of::<PatchCacheHeader>() + texel_count * 16);
        bytes.extend_from_slice(bytemuck::bytes_of(&header));

        for height in data.heights.iter() {
            bytes.extend_from_slice(&height.to_le_bytes());
        }
        for array in [&data.normals, &data.material_indices, &data.material_weights] {
            for texel in array.iter() {
                bytes.extend_from_slice(texel);
            }
        }

        let path = self.path(data.coordinate);
        fs::write(&path, bytes)
            .with_context(|| format!("failed to write the cached patch {}", path.display()))?;

        Ok(())
    }

    /// Loads the cached patch, returns `None` if there is no matching cache entry.
    pub fn load(&self, coordinate: NodeCoordinate) -> Result<Option<TerrainPatchData>> {
        let path = self.path(coordinate);

        let bytes = match fs::read(&path) {
            Ok(bytes) => bytes,
            Err(error) if error.kind() == ErrorKind::NotFound => return Ok(None),
            Err(error) => {
                return Err(error)
                    .with_context(|| format!("failed to read the cached patch {}", path.display()))
            }
        };

        let header_size = size_of::<PatchCacheHeader>();
        ensure!(
            bytes.len() >= header_size,
            "the cached patch {} is truncated",
            path.display()
        );

        let header: PatchCacheHeader = bytemuck::pod_read_unaligned(&bytes[..header_size]);
        ensure!(
            header.magic == MAGIC,
            "{} is not a cached terrain patch",
            path.display()
        );

        if header.version != VERSION
            || header.resolution != self.resolution
            || header.fingerprint != self.fingerprint
            || header.patch_size.to_bits() != self.patch_size.to_bits()
            || header.height_scale.to_bits() != self.height_scale.to_bits()
        {
            return Ok(None);
        }

        let resolution = self.resolution;
        let shape = (resolution as usize, resolution as usize);
        let texel_count = shape.0 * shape.1;
        let body = &bytes[header_size..];
        ensure!(
            body.len() == texel_count * 16,
            "the cached patch {} has {} bytes of data, expected {}",
            path.display(),
            body.len(),
            texel_count * 16
        );

        let (heights, rest) = body.split_at(texel_count * 4);
        let heights = heights
            .chunks_exact(4)
            .map(|bytes| f32::from_le_bytes(bytemuck::pod_read_unaligned(bytes)))
            .collect::<Vec<_>>();

        let texels = |bytes: &[u8]| -> Result<Array2<[u8; 4]>> {
            let texels = bytemuck::cast_slice::<u8, [u8; 4]>(bytes).to_vec();
            Ok(Array2::from_shape_vec(shape, texels)?)
        };

        let (normals, rest) = rest.split_at(texel_count * 4);
        let (indices, weights) = rest.split_at(texel_count * 4);

        Ok(Some(TerrainPatchData {
            coordinate,
            extent: coordinate.extent(self.patch_size),
            resolution,
            heights: Array2::from_shape_vec(shape, heights)?,
            normals: texels(normals)?,
            material_indices: texels(indices)?,
            material_weights: texels(weights)?,
            minimum_height: header.minimum_height,
            maximum_height: header.maximum_height,
        }))
    }
}

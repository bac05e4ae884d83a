//! The seam between the terrain and the GPU.
//!
//! The terrain never talks to a graphics API directly. Every texture and buffer it needs is
//! created through a [`TerrainRenderBackend`], which is also responsible for making the
//! textures of each patch addressable by shaders through its render data table.
//!
//! The crate ships a [`HeadlessRenderBackend`], which keeps all resources in memory.
//! It is used for servers, tools and tests, and documents the expected behaviour of a backend.

mod headless;

pub use crate::render::headless::HeadlessRenderBackend;

use anyhow::{bail, Result};
use bevy::math::Rect;
use bitflags::bitflags;

/// An opaque identifier of a texture owned by a [`TerrainRenderBackend`].
#[derive(Copy, Clone, Debug, Hash, Eq, PartialEq)]
pub struct TextureHandle(pub u64);

/// An opaque identifier of a buffer owned by a [`TerrainRenderBackend`].
#[derive(Copy, Clone, Debug, Hash, Eq, PartialEq)]
pub struct BufferHandle(pub u64);

/// The texel formats used by the terrain textures.
#[derive(Copy, Clone, Debug, Hash, Eq, PartialEq)]
pub enum TerrainTextureFormat {
    /// A single 32 bit float channel, used for heights.
    R32Float,
    /// Four normalized 8 bit channels, used for normals and materials.
    Rgba8Unorm,
    /// Four unnormalized 8 bit channels, used for material indices.
    Rgba8Uint,
}

impl TerrainTextureFormat {
    pub fn pixel_size(self) -> usize {
        4
    }
}

/// Describes a square two dimensional texture.
#[derive(Clone, Copy, Debug)]
pub struct TextureDescriptor<'a> {
    pub label: &'a str,
    pub size: u32,
    pub format: TerrainTextureFormat,
    /// The initial texel data, tightly packed row by row.
    /// Textures without data are expected to be filled by a compute dispatch.
    pub data: Option<&'a [u8]>,
}

bitflags! {
    #[derive(Copy, Clone, Debug, Default, Hash, Eq, PartialEq)]
    pub struct TerrainBufferUsages: u32 {
        const VERTEX = 1 << 0;
        const INDEX = 1 << 1;
    }
}

/// A compute dispatch that fills a texture for a horizontal region of the terrain.
#[derive(Clone, Copy, Debug)]
pub struct GenerationDispatch<'a> {
    pub shader: &'a str,
    pub target: TextureHandle,
    pub region: Rect,
    pub resolution: u32,
}

/// The GPU resource interface used by the terrain.
///
/// All methods are called from the main thread only, while applying a finished update or
/// while setting up and tearing down the terrain.
pub trait TerrainRenderBackend: Send + Sync + 'static {
    fn create_texture_2d(&mut self, descriptor: &TextureDescriptor) -> Result<TextureHandle>;

    /// Destroys a texture, every handle is destroyed at most once.
    fn destroy_texture_2d(&mut self, texture: TextureHandle);

    fn create_buffer(
        &mut self,
        label: &str,
        data: &[u8],
        usage: TerrainBufferUsages,
    ) -> Result<BufferHandle>;

    fn destroy_buffer(&mut self, buffer: BufferHandle);

    /// Makes the texture accessible to shaders and returns its index in the render data table.
    fn bind_to_render_data_table(&mut self, texture: TextureHandle) -> u32;

    fn unbind_from_render_data_table(&mut self, index: u32);

    /// Whether [`dispatch_generation`](Self::dispatch_generation) is available.
    fn supports_compute_generation(&self) -> bool {
        false
    }

    fn dispatch_generation(&mut self, dispatch: &GenerationDispatch) -> Result<()> {
        bail!(
            "the backend does not support compute generation of {}",
            dispatch.shader
        )
    }
}

use crate::render::{
    BufferHandle, GenerationDispatch, TerrainBufferUsages, TerrainRenderBackend,
    TerrainTextureFormat, TextureDescriptor, TextureHandle,
};
use anyhow::{anyhow, bail, ensure, Result};
use bevy::log::debug;
use slab::Slab;

struct HeadlessTexture {
    size: u32,
    format: TerrainTextureFormat,
    data: Vec<u8>,
}

struct HeadlessBuffer {
    usage: TerrainBufferUsages,
    data: Vec<u8>,
}

/// A [`TerrainRenderBackend`] without a GPU, which keeps all resources in memory.
///
/// The texture capacity can be limited, to reproduce the behaviour of an exhausted GPU.
#[derive(Default)]
pub struct HeadlessRenderBackend {
    textures: Slab<HeadlessTexture>,
    buffers: Slab<HeadlessBuffer>,
    render_data_table: Slab<TextureHandle>,
    texture_capacity: Option<usize>,
    compute_generation: bool,
    dispatches: Vec<String>,
}

impl HeadlessRenderBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a backend, that fails all texture creations beyond `capacity` live textures.
    pub fn with_texture_capacity(capacity: usize) -> Self {
        Self {
            texture_capacity: Some(capacity),
            ..Self::default()
        }
    }

    pub fn set_texture_capacity(&mut self, capacity: Option<usize>) {
        self.texture_capacity = capacity;
    }

    /// Enables the emulated compute generation, which records all dispatches.
    pub fn with_compute_generation(mut self) -> Self {
        self.compute_generation = true;
        self
    }

    pub fn allocated_texture_count(&self) -> usize {
        self.textures.len()
    }

    pub fn allocated_buffer_count(&self) -> usize {
        self.buffers.len()
    }

    pub fn bound_texture_count(&self) -> usize {
        self.render_data_table.len()
    }

    /// The shaders of all generation dispatches so far.
    pub fn dispatches(&self) -> &[String] {
        &self.dispatches
    }

    pub fn texture_data(&self, texture: TextureHandle) -> Option<&[u8]> {
        self.textures
            .get(texture.0 as usize)
            .map(|texture| texture.data.as_slice())
    }

    pub fn texture_format(&self, texture: TextureHandle) -> Option<TerrainTextureFormat> {
        self.textures
            .get(texture.0 as usize)
            .map(|texture| texture.format)
    }

    pub fn buffer_usage(&self, buffer: BufferHandle) -> Option<TerrainBufferUsages> {
        self.buffers.get(buffer.0 as usize).map(|buffer| buffer.usage)
    }

    pub fn buffer_data(&self, buffer: BufferHandle) -> Option<&[u8]> {
        self.buffers
            .get(buffer.0 as usize)
            .map(|buffer| buffer.data.as_slice())
    }

    /// Resolves an index of the render data table to its texture.
    pub fn bound_texture(&self, index: u32) -> Option<TextureHandle> {
        self.render_data_table.get(index as usize).copied()
    }
}

impl TerrainRenderBackend for HeadlessRenderBackend {
    fn create_texture_2d(&mut self, descriptor: &TextureDescriptor) -> Result<TextureHandle> {
        if let Some(capacity) = self.texture_capacity {
            if self.textures.len() >= capacity {
                bail!(
                    "out of texture memory while creating {} ({capacity} textures allocated)",
                    descriptor.label
                );
            }
        }

        let size = descriptor.size as usize;
        let byte_count = size * size * descriptor.format.pixel_size();

        let data = match descriptor.data {
            Some(data) => {
                ensure!(
                    data.len() == byte_count,
                    "texture {} expects {byte_count} bytes, got {}",
                    descriptor.label,
                    data.len()
                );
                data.to_vec()
            }
            None => vec![0; byte_count],
        };

        let key = self.textures.insert(HeadlessTexture {
            size: descriptor.size,
            format: descriptor.format,
            data,
        });

        Ok(TextureHandle(key as u64))
    }

    fn destroy_texture_2d(&mut self, texture: TextureHandle) {
        let destroyed = self.textures.try_remove(texture.0 as usize);
        debug_assert!(destroyed.is_some(), "texture {texture:?} destroyed twice");
    }

    fn create_buffer(
        &mut self,
        label: &str,
        data: &[u8],
        usage: TerrainBufferUsages,
    ) -> Result<BufferHandle> {
        ensure!(!data.is_empty(), "buffer {label} is empty");

        let key = self.buffers.insert(HeadlessBuffer {
            usage,
            data: data.to_vec(),
        });

        Ok(BufferHandle(key as u64))
    }

    fn destroy_buffer(&mut self, buffer: BufferHandle) {
        let destroyed = self.buffers.try_remove(buffer.0 as usize);
        debug_assert!(destroyed.is_some(), "buffer {buffer:?} destroyed twice");
    }

    fn bind_to_render_data_table(&mut self, texture: TextureHandle) -> u32 {
        self.render_data_table.insert(texture) as u32
    }

    fn unbind_from_render_data_table(&mut self, index: u32) {
        self.render_data_table.try_remove(index as usize);
    }

    fn supports_compute_generation(&self) -> bool {
        self.compute_generation
    }

    fn dispatch_generation(&mut self, dispatch: &GenerationDispatch) -> Result<()> {
        ensure!(self.compute_generation, "compute generation is disabled");

        let texture = self
            .textures
            .get(dispatch.target.0 as usize)
            .ok_or_else(|| anyhow!("dispatch targets unknown texture {:?}", dispatch.target))?;
        ensure!(
            texture.size == dispatch.resolution,
            "dispatch resolution {} does not match the texture size {}",
            dispatch.resolution,
            texture.size
        );

        debug!(
            "dispatching {} over {:?} at resolution {}",
            dispatch.shader, dispatch.region, dispatch.resolution
        );
        self.dispatches.push(dispatch.shader.to_owned());

        Ok(())
    }
}

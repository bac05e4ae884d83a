//! The terrain system and its update cycle.
//!
//! Every call to [`TerrainSystem::sequential_update`] either applies a finished update or
//! dispatches a new one, never both in the same frame:
//!
//! 1. An update is dispatched on the [`AsyncComputeTaskPool`]. It plans all structural
//!    changes on a snapshot of the quadtree, against a single viewer position: roots
//!    entering or leaving the streaming radius, subdivisions, combinations, patches of
//!    pending or dirty leaves and changed stitching borders.
//! 2. The data of every required patch is generated by its own task, the update waits for
//!    all of them.
//! 3. Once the task has finished, the update is applied on the main thread. New patches
//!    are uploaded through the [`TerrainRenderBackend`], released ones are destroyed and
//!    the render information is rebuilt and swapped in at once.
//!
//! At most one update is in flight at any time. Queries and the render information only
//! ever see the last applied state.
//! Leaves whose upload fails stay pending and are retried by the next update.

use crate::{
    config::TerrainConfig,
    formats::TerrainPatchCache,
    generation::{generate_terrain_plane, PatchGenerator, TerrainGenerator, TerrainMaterialSample},
    math::{horizontal, GridPoint2, NodeCoordinate},
    render::{
        BufferHandle, GenerationDispatch, HeadlessRenderBackend, TerrainBufferUsages,
        TerrainRenderBackend, TerrainTextureFormat, TextureDescriptor, TextureHandle,
    },
    schedule::{TerrainOperation, TerrainUpdate},
    terrain_data::{
        BlendMap, HeightMap, IndexMap, PatchState, TerrainMap, TerrainMaps, TerrainPatch,
        TerrainPatchData, TerrainPatchRenderInformation, TerrainPatchTextures, TerrainQuadTree,
        TerrainSample, TerrainVisibility,
    },
};
use anyhow::{anyhow, Context, Result};
use bevy::{
    log::{debug, info, warn},
    math::{Affine3A, Rect, UVec2, Vec3},
    prelude::Resource,
    render::primitives::{Aabb, Frustum},
    tasks::{futures_lite::future, AsyncComputeTaskPool, Task, TaskPool},
};
use bytemuck::Pod;
use ndarray::{ArrayView2, CowArray, Ix2};
use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc,
};

/// The properties shared by all patches of a terrain.
///
/// The render data table is owned by the [`TerrainRenderBackend`], each patch keeps the
/// table indices of its textures in its
/// [`TerrainPatchTextures`](crate::terrain_data::TerrainPatchTextures).
#[derive(Clone, Copy, Debug)]
pub struct TerrainProperties {
    pub patch_size: f32,
    pub patch_resolution: u32,
    pub maximum_quad_tree_depth: u32,
    pub height_scale: f32,
    /// The [`TerrainVertex`](crate::generation::TerrainVertex) buffer of the shared plane mesh.
    pub vertex_buffer: BufferHandle,
    pub index_buffer: BufferHandle,
    pub vertex_count: u32,
    pub index_count: u32,
}

/// Counters describing the work done by a [`TerrainSystem`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TerrainStatistics {
    pub dispatched_updates: u64,
    pub applied_updates: u64,
    /// The largest number of update tasks that were ever in flight at the same time.
    pub peak_concurrent_updates: usize,
    pub failed_patch_uploads: u64,
    pub pending_patches: usize,
    pub leaf_count: usize,
    pub root_count: usize,
}

/// Counts the running update tasks.
#[derive(Clone, Default)]
struct UpdateCounter {
    running: Arc<AtomicUsize>,
    peak: Arc<AtomicUsize>,
}

impl UpdateCounter {
    fn enter(&self) -> UpdateGuard {
        let running = self.running.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(running, Ordering::SeqCst);

        UpdateGuard(self.clone())
    }

    fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}

/// Marks an update task as running until it is dropped.
struct UpdateGuard(UpdateCounter);

impl Drop for UpdateGuard {
    fn drop(&mut self) {
        self.0.running.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Streams a procedurally generated terrain around a viewer.
///
/// The terrain is an infinite grid of root cells, of which the cells within the streaming
/// radius around the viewer are loaded. Each loaded cell is a quadtree refined towards the
/// viewer, whose leaves own the rendered patches.
/// See the [module docs](crate::terrain) for the update cycle.
#[derive(Resource)]
pub struct TerrainSystem<B: TerrainRenderBackend = HeadlessRenderBackend> {
    config: TerrainConfig,
    properties: TerrainProperties,
    backend: B,
    generator: Arc<dyn TerrainGenerator>,
    cache: Option<TerrainPatchCache>,
    tree: TerrainQuadTree,
    maps: TerrainMaps,
    /// The region whose patches have to be regenerated by the next update.
    dirty_region: Option<Rect>,
    world_center: Vec3,
    render_informations: Arc<[TerrainPatchRenderInformation]>,
    update_task: Option<Task<TerrainUpdate>>,
    counter: UpdateCounter,
    /// The number of calls to [`sequential_update`](Self::sequential_update) so far.
    frame: u64,
    last_publish_frame: Option<u64>,
    statistics: TerrainStatistics,
}

impl<B: TerrainRenderBackend> TerrainSystem<B> {
    /// Creates an empty terrain and uploads the shared plane mesh.
    ///
    /// Fails if the config is invalid or the plane mesh could not be uploaded.
    pub fn new(
        config: TerrainConfig,
        generator: Arc<dyn TerrainGenerator>,
        mut backend: B,
    ) -> Result<Self> {
        config.validate()?;

        let plane = generate_terrain_plane(config.patch_resolution);
        let vertex_buffer = backend
            .create_buffer(
                "terrain_plane_vertices",
                bytemuck::cast_slice(&plane.vertices),
                TerrainBufferUsages::VERTEX,
            )
            .context("failed to upload the terrain plane")?;
        let index_buffer = match backend.create_buffer(
            "terrain_plane_indices",
            bytemuck::cast_slice(&plane.indices),
            TerrainBufferUsages::INDEX,
        ) {
            Ok(buffer) => buffer,
            Err(error) => {
                backend.destroy_buffer(vertex_buffer);
                return Err(error.context("failed to upload the terrain plane"));
            }
        };

        let cache = config.save_folder.as_ref().and_then(|folder| {
            match TerrainPatchCache::new(folder, &config, generator.fingerprint()) {
                Ok(cache) => Some(cache),
                Err(error) => {
                    warn!("Terrain patches will not be cached: {error:#}");
                    None
                }
            }
        });

        let properties = TerrainProperties {
            patch_size: config.patch_size,
            patch_resolution: config.patch_resolution,
            maximum_quad_tree_depth: config.maximum_quad_tree_depth,
            height_scale: config.height_scale,
            vertex_buffer,
            index_buffer,
            vertex_count: plane.vertices.len() as u32,
            index_count: plane.indices.len() as u32,
        };

        info!(
            "initializing terrain with {} root patches of size {} and resolution {}",
            config.root_count(),
            config.patch_size,
            config.patch_resolution
        );

        Ok(Self {
            tree: TerrainQuadTree::new(config.patch_size),
            config,
            properties,
            backend,
            generator,
            cache,
            maps: TerrainMaps::default(),
            dirty_region: None,
            world_center: Vec3::ZERO,
            render_informations: Arc::new([]),
            update_task: None,
            counter: UpdateCounter::default(),
            frame: 0,
            last_publish_frame: None,
            statistics: TerrainStatistics::default(),
        })
    }

    pub fn config(&self) -> &TerrainConfig {
        &self.config
    }

    pub fn properties(&self) -> &TerrainProperties {
        &self.properties
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn backend_mut(&mut self) -> &mut B {
        &mut self.backend
    }

    pub fn tree(&self) -> &TerrainQuadTree {
        &self.tree
    }

    pub fn maps(&self) -> &TerrainMaps {
        &self.maps
    }

    pub fn world_center(&self) -> Vec3 {
        self.world_center
    }

    pub fn is_update_in_flight(&self) -> bool {
        self.update_task.is_some()
    }

    pub fn statistics(&self) -> TerrainStatistics {
        TerrainStatistics {
            peak_concurrent_updates: self.counter.peak(),
            ..self.statistics
        }
    }

    /// Advances the terrain by one tick.
    ///
    /// Applies the in flight update once it is finished. A new update is dispatched when
    /// none is in flight and no update was applied during this tick.
    pub fn sequential_update(&mut self, viewer_position: Vec3) {
        self.frame += 1;

        self.poll_update();

        if self.update_task.is_none() && self.last_publish_frame != Some(self.frame) {
            self.dispatch_update(viewer_position);
        }
    }

    /// Applies the in flight update, if it is finished.
    pub fn poll_update(&mut self) -> bool {
        let Some(task) = &mut self.update_task else {
            return false;
        };

        let Some(update) = future::block_on(future::poll_once(task)) else {
            return false;
        };

        self.update_task = None;
        self.apply_update(update);

        true
    }

    /// Blocks until the in flight update is finished and applies it.
    pub fn finish_pending_update(&mut self) -> bool {
        let Some(task) = self.update_task.take() else {
            return false;
        };

        let update = future::block_on(task);
        self.apply_update(update);

        true
    }

    /// Starts a new update for the viewer position.
    ///
    /// Returns `false` without dispatching anything while another update is in flight.
    pub fn dispatch_update(&mut self, viewer_position: Vec3) -> bool {
        if self.update_task.is_some() {
            debug!("Skipped the terrain update dispatch, an update is still in flight.");
            return false;
        }

        let viewer = horizontal(viewer_position);
        let mut snapshot = self.tree.clone();
        let config = self.config.clone();
        let dirty_region = self.dirty_region.take();
        let generator = self.patch_generator();
        let guard = self.counter.enter();

        let task_pool = AsyncComputeTaskPool::get_or_init(TaskPool::default);
        let task = task_pool.spawn(async move {
            let _guard = guard;

            let mut update = snapshot.plan_update(viewer, &config, dirty_region);
            generate_patches(&mut update, generator).await;
            update
        });

        self.update_task = Some(task);
        self.statistics.dispatched_updates += 1;

        true
    }

    /// Applies all operations of a finished update in order and publishes the new leaves.
    fn apply_update(&mut self, mut update: TerrainUpdate) {
        update.validate();

        let operations = update.take_operations();
        let operation_count = operations.len();

        for operation in operations {
            match operation {
                TerrainOperation::AddRoot(grid_point) => {
                    let data = update.take_patch(NodeCoordinate::root(grid_point));
                    self.apply_add_root(grid_point, data);
                }
                TerrainOperation::RemoveRoot(grid_point) => {
                    let released = self.tree.remove_root_node(grid_point);
                    self.destroy_patches(released);
                }
                TerrainOperation::Subdivide(coordinate) => {
                    self.apply_subdivide(coordinate, &mut update);
                }
                TerrainOperation::Combine(coordinate) => {
                    let data = update.take_patch(coordinate);
                    self.apply_combine(coordinate, data);
                }
                TerrainOperation::RegeneratePatch(coordinate) => {
                    let data = update.take_patch(coordinate);
                    self.apply_regenerate_patch(coordinate, data);
                }
                TerrainOperation::RegenerateBorders(coordinate, borders) => {
                    match self.tree.node_mut(coordinate) {
                        Some(node) if node.is_leaf() => node.set_borders(borders),
                        _ => debug!("Skipped the borders of {coordinate}, which is not a leaf."),
                    }
                }
            }
        }

        self.statistics.applied_updates += 1;
        self.publish();

        debug!(
            "Applied {operation_count} terrain operations, {} patches are rendered.",
            self.render_informations.len()
        );
    }

    fn apply_add_root(&mut self, grid_point: GridPoint2, data: Option<TerrainPatchData>) {
        if self.tree.contains_root(grid_point) {
            debug!("Skipped adding the root {grid_point}, which already exists.");
            return;
        }

        let state = self.upload_patch(data);

        if let Err(state) = self.tree.add_root_node(grid_point, state) {
            self.destroy_patches(state.into_patch());
        }
    }

    fn apply_subdivide(&mut self, coordinate: NodeCoordinate, update: &mut TerrainUpdate) {
        let maximum_depth = self.config.maximum_quad_tree_depth;
        let eligible = self
            .tree
            .node(coordinate)
            .is_some_and(|node| node.is_leaf() && node.depth() < maximum_depth);

        if !eligible {
            warn!("Skipped subdividing {coordinate}, which is no longer a subdividable leaf.");
            return;
        }

        let children = coordinate
            .children()
            .map(|child| self.upload_patch(update.take_patch(child)));

        let released = match self.tree.node_mut(coordinate) {
            Some(node) => node.subdivide(children),
            None => None,
        };

        self.destroy_patches(released);
    }

    fn apply_combine(&mut self, coordinate: NodeCoordinate, data: Option<TerrainPatchData>) {
        let eligible = self.tree.node(coordinate).is_some_and(|node| {
            node.children()
                .is_some_and(|children| children.iter().all(|child| child.is_leaf()))
        });

        if !eligible {
            warn!("Skipped combining {coordinate}, whose children are no longer four leaves.");
            return;
        }

        let state = self.upload_patch(data);

        let released = match self.tree.node_mut(coordinate) {
            Some(node) => node.combine(state),
            None => Vec::new(),
        };

        self.destroy_patches(released);
    }

    fn apply_regenerate_patch(
        &mut self,
        coordinate: NodeCoordinate,
        data: Option<TerrainPatchData>,
    ) {
        let eligible = self.tree.node(coordinate).is_some_and(|node| node.is_leaf());

        if !eligible {
            debug!("Skipped regenerating {coordinate}, which is not a leaf.");
            return;
        }

        let state = self.upload_patch(data);

        let released = match self.tree.node_mut(coordinate) {
            Some(node) => node.replace_patch(state),
            None => None,
        };

        self.destroy_patches(released);
    }

    fn patch_generator(&self) -> PatchGenerator {
        PatchGenerator::new(
            &self.config,
            self.generator.clone(),
            self.maps.clone(),
            self.cache.clone(),
        )
    }

    /// Creates the GPU textures of the patch data.
    ///
    /// Patches without data or whose textures could not be created stay pending.
    fn upload_patch(&mut self, data: Option<TerrainPatchData>) -> PatchState {
        let Some(data) = data else {
            return PatchState::Pending;
        };

        match self.create_patch_textures(&data) {
            Ok(textures) => PatchState::Ready(TerrainPatch {
                data: Arc::new(data),
                textures,
            }),
            Err(error) => {
                self.statistics.failed_patch_uploads += 1;
                warn!(
                    "Failed to create the textures of the patch {}, it stays pending: {error:#}",
                    data.coordinate
                );
                PatchState::Pending
            }
        }
    }

    fn create_patch_textures(&mut self, data: &TerrainPatchData) -> Result<TerrainPatchTextures> {
        let supports_compute = self.backend.supports_compute_generation();
        let height_shader = self
            .config
            .height_generation_shader
            .as_deref()
            .filter(|_| supports_compute);
        let material_shader = self
            .config
            .material_generation_shader
            .as_deref()
            .filter(|_| supports_compute);

        let heights = data.heights.as_standard_layout();
        let normals = data.normals.as_standard_layout();
        let indices = data.material_indices.as_standard_layout();
        let weights = data.material_weights.as_standard_layout();

        let layers = [
            (
                "terrain_height",
                TerrainTextureFormat::R32Float,
                texel_bytes(&heights)?,
                height_shader,
            ),
            (
                "terrain_normal",
                TerrainTextureFormat::Rgba8Unorm,
                texel_bytes(&normals)?,
                None,
            ),
            (
                "terrain_index",
                TerrainTextureFormat::Rgba8Uint,
                texel_bytes(&indices)?,
                material_shader,
            ),
            (
                "terrain_blend",
                TerrainTextureFormat::Rgba8Unorm,
                texel_bytes(&weights)?,
                material_shader,
            ),
        ];

        let mut textures = Vec::with_capacity(layers.len());

        for (label, format, bytes, shader) in layers {
            let descriptor = TextureDescriptor {
                label,
                size: data.resolution,
                format,
                data: shader.is_none().then_some(bytes),
            };

            let result = self.backend.create_texture_2d(&descriptor).and_then(|texture| {
                textures.push(texture);

                match shader {
                    Some(shader) => self.backend.dispatch_generation(&GenerationDispatch {
                        shader,
                        target: texture,
                        region: data.extent,
                        resolution: data.resolution,
                    }),
                    None => Ok(()),
                }
            });

            if let Err(error) = result {
                for texture in textures {
                    self.backend.destroy_texture_2d(texture);
                }

                return Err(error);
            }
        }

        let [height, normal, index, blend]: [TextureHandle; 4] = textures
            .try_into()
            .map_err(|_| anyhow!("expected four patch textures"))?;

        Ok(TerrainPatchTextures {
            height,
            normal,
            index,
            blend,
            height_index: self.backend.bind_to_render_data_table(height),
            normal_index: self.backend.bind_to_render_data_table(normal),
            index_index: self.backend.bind_to_render_data_table(index),
            blend_index: self.backend.bind_to_render_data_table(blend),
        })
    }

    /// Releases the GPU resources of the patches.
    fn destroy_patches(&mut self, patches: impl IntoIterator<Item = TerrainPatch>) {
        for patch in patches {
            for index in patch.textures.table_indices() {
                self.backend.unbind_from_render_data_table(index);
            }
            for texture in patch.textures.handles() {
                self.backend.destroy_texture_2d(texture);
            }
        }
    }

    /// Rebuilds the render information and marks the current tick as published.
    fn publish(&mut self) {
        self.rebuild_render_informations();
        self.last_publish_frame = Some(self.frame);
    }

    fn rebuild_render_informations(&mut self) {
        let world_center = horizontal(self.world_center);
        let mut informations = Vec::new();
        let mut pending = 0;
        let mut leaves = 0;

        self.tree.for_each_leaf(|leaf| {
            leaves += 1;

            match leaf.patch() {
                Some(patch) => informations.push(TerrainPatchRenderInformation::new(
                    patch,
                    leaf.borders(),
                    world_center,
                )),
                None => pending += 1,
            }
        });

        self.render_informations = informations.into();
        self.statistics.pending_patches = pending;
        self.statistics.leaf_count = leaves;
        self.statistics.root_count = self.tree.root_count();
    }

    /// The render information of all ready leaves, as published by the last update.
    pub fn patch_render_informations(&self) -> Arc<[TerrainPatchRenderInformation]> {
        self.render_informations.clone()
    }

    /// Moves the origin, that the render information is expressed relative to.
    ///
    /// The quadtree and the patches are left untouched.
    pub fn set_terrain_world_center(&mut self, world_center: Vec3) {
        self.world_center = world_center;
        self.rebuild_render_informations();
    }

    /// Updates the visibility flags of the render information.
    ///
    /// The frusta are expected relative to the terrain world center, like the render
    /// information. A missing frustum marks every patch as visible for that view.
    pub fn cull(&mut self, view: Option<&Frustum>, shadow: Option<&Frustum>) {
        let informations = self
            .render_informations
            .iter()
            .map(|information| {
                let aabb = patch_aabb(information);
                let mut visibility = TerrainVisibility::empty();

                if view.is_none_or(|frustum| {
                    frustum.intersects_obb(&aabb, &Affine3A::IDENTITY, true, false)
                }) {
                    visibility |= TerrainVisibility::VIEW;
                }
                if shadow.is_none_or(|frustum| {
                    frustum.intersects_obb(&aabb, &Affine3A::IDENTITY, false, true)
                }) {
                    visibility |= TerrainVisibility::SHADOW;
                }

                TerrainPatchRenderInformation {
                    visibility: visibility.bits(),
                    ..*information
                }
            })
            .collect();

        self.render_informations = informations;
    }

    /// Samples the height, normal and material of the leaf below the world position.
    ///
    /// Returns `None` if the position is not covered by a loaded, ready patch.
    pub fn terrain_sample_at_position(&self, position: Vec3) -> Option<TerrainSample> {
        let position = horizontal(position);
        let leaf = self.tree.leaf_at(position)?;

        leaf.patch()?.data.sample(position)
    }

    pub fn terrain_height_at_position(&self, position: Vec3) -> Option<f32> {
        self.terrain_sample_at_position(position)
            .map(|sample| sample.height)
    }

    pub fn terrain_normal_at_position(&self, position: Vec3) -> Option<Vec3> {
        self.terrain_sample_at_position(position)
            .map(|sample| sample.normal)
    }

    pub fn terrain_material_at_position(&self, position: Vec3) -> Option<TerrainMaterialSample> {
        self.terrain_sample_at_position(position)
            .map(|sample| sample.material)
    }

    /// Synchronously loads the root of the grid cell, independent of the viewer.
    ///
    /// The next update removes the root again, if it is outside the streaming radius.
    pub fn add_root_node(&mut self, grid_point: GridPoint2) -> bool {
        if self.tree.contains_root(grid_point) {
            return false;
        }

        let data = self
            .patch_generator()
            .generate(NodeCoordinate::root(grid_point));
        let state = self.upload_patch(Some(data));

        if let Err(state) = self.tree.add_root_node(grid_point, state) {
            self.destroy_patches(state.into_patch());
            return false;
        }

        self.rebuild_render_informations();
        true
    }

    /// Synchronously unloads the root of the grid cell and all patches below it.
    pub fn remove_root_node(&mut self, grid_point: GridPoint2) -> bool {
        if !self.tree.contains_root(grid_point) {
            return false;
        }

        let released = self.tree.remove_root_node(grid_point);
        self.destroy_patches(released);
        self.rebuild_render_informations();

        true
    }

    /// Marks a region, whose patches are regenerated by the next update.
    pub fn mark_region_dirty(&mut self, region: Rect) {
        self.dirty_region = Some(match self.dirty_region {
            Some(dirty_region) => dirty_region.union(region),
            None => region,
        });
    }

    fn replace_map<T: Copy>(
        &mut self,
        map: Option<TerrainMap<T>>,
        slot: impl Fn(&mut TerrainMaps) -> &mut Option<Arc<TerrainMap<T>>>,
    ) {
        let map = map.map(Arc::new);
        let previous = std::mem::replace(slot(&mut self.maps), map.clone());

        for extent in [previous, map].iter().flatten().map(|map| map.extent()) {
            self.mark_region_dirty(extent);
        }
    }

    fn update_map<T: Copy>(
        &mut self,
        offset: UVec2,
        region: ArrayView2<T>,
        slot: impl Fn(&mut TerrainMaps) -> &mut Option<Arc<TerrainMap<T>>>,
    ) -> Result<()> {
        let map = slot(&mut self.maps)
            .as_mut()
            .context("the terrain map has to be set before it can be updated")?;
        let changed = Arc::make_mut(map).update(offset, region)?;

        self.mark_region_dirty(changed);
        Ok(())
    }

    /// Replaces or removes the height map, the affected patches are regenerated.
    pub fn set_height_map(&mut self, map: Option<HeightMap>) {
        self.replace_map(map, |maps| &mut maps.height);
    }

    /// Overwrites a block of the height map, starting at the sample `offset`.
    pub fn update_height_map(&mut self, offset: UVec2, region: ArrayView2<f32>) -> Result<()> {
        self.update_map(offset, region, |maps| &mut maps.height)
    }

    pub fn set_index_map(&mut self, map: Option<IndexMap>) {
        self.replace_map(map, |maps| &mut maps.index);
    }

    pub fn update_index_map(&mut self, offset: UVec2, region: ArrayView2<[u8; 4]>) -> Result<()> {
        self.update_map(offset, region, |maps| &mut maps.index)
    }

    pub fn set_blend_map(&mut self, map: Option<BlendMap>) {
        self.replace_map(map, |maps| &mut maps.blend);
    }

    pub fn update_blend_map(&mut self, offset: UVec2, region: ArrayView2<[u8; 4]>) -> Result<()> {
        self.update_map(offset, region, |maps| &mut maps.blend)
    }
}

impl<B: TerrainRenderBackend> Drop for TerrainSystem<B> {
    fn drop(&mut self) {
        let released = self.tree.clear();
        self.destroy_patches(released);

        self.backend.destroy_buffer(self.properties.vertex_buffer);
        self.backend.destroy_buffer(self.properties.index_buffer);
    }
}

/// Generates the data of all new patches of the update, one task per patch.
async fn generate_patches(update: &mut TerrainUpdate, generator: PatchGenerator) {
    let task_pool = AsyncComputeTaskPool::get();

    let tasks: Vec<_> = update
        .required_patches()
        .into_iter()
        .map(|coordinate| {
            let generator = generator.clone();
            task_pool.spawn(async move { generator.generate(coordinate) })
        })
        .collect();

    for task in tasks {
        update.insert_patch(task.await);
    }
}

fn texel_bytes<'a, T: Pod>(texels: &'a CowArray<'_, T, Ix2>) -> Result<&'a [u8]> {
    texels
        .as_slice()
        .map(bytemuck::cast_slice)
        .context("the patch texels are not contiguous")
}

/// The bounding box of a patch, relative to the terrain world center.
fn patch_aabb(information: &TerrainPatchRenderInformation) -> Aabb {
    let [x, z] = information.world_position;
    let half_size = information.patch_half_size;

    Aabb::from_min_max(
        Vec3::new(x - half_size, information.minimum_height, z - half_size),
        Vec3::new(x + half_size, information.maximum_height, z + half_size),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::generation::FlatTerrainGenerator;
    use bevy::math::Vec2;

    fn shader_config() -> TerrainConfig {
        TerrainConfig {
            patch_size: 100.0,
            patch_resolution: 3,
            streaming_radius: 0,
            height_generation_shader: Some("terrain_height".to_string()),
            material_generation_shader: Some("terrain_material".to_string()),
            ..Default::default()
        }
    }

    fn terrain<B: TerrainRenderBackend>(config: TerrainConfig, backend: B) -> TerrainSystem<B> {
        let generator = FlatTerrainGenerator {
            height: 2.0,
            material: 1,
        };

        TerrainSystem::new(config, Arc::new(generator), backend).unwrap()
    }

    #[test]
    fn compute_generation_fills_the_textures() {
        let backend = HeadlessRenderBackend::new().with_compute_generation();
        let mut terrain = terrain(shader_config(), backend);

        assert!(terrain.add_root_node(GridPoint2::ZERO));
        assert_eq!(
            terrain.backend().dispatches(),
            ["terrain_height", "terrain_material", "terrain_material"]
        );

        let patch = terrain.tree().leaf_at(Vec2::ZERO).unwrap().patch().unwrap();
        let height = terrain.backend().texture_data(patch.textures.height).unwrap();
        assert!(height.iter().all(|&byte| byte == 0));

        // queries are still answered by the CPU data
        assert_eq!(terrain.terrain_height_at_position(Vec3::ZERO), Some(2.0));
    }

    #[test]
    fn shaders_are_ignored_without_compute_support() {
        let mut terrain = terrain(shader_config(), HeadlessRenderBackend::new());

        assert!(terrain.add_root_node(GridPoint2::ZERO));
        assert!(terrain.backend().dispatches().is_empty());

        let patch = terrain.tree().leaf_at(Vec2::ZERO).unwrap().patch().unwrap();
        let height = terrain.backend().texture_data(patch.textures.height).unwrap();
        assert_eq!(&height[..4], 2.0_f32.to_ne_bytes().as_slice());
        assert_eq!(
            terrain.backend().texture_format(patch.textures.index),
            Some(TerrainTextureFormat::Rgba8Uint)
        );
    }

    #[test]
    fn failed_uploads_release_partial_textures() {
        let config = TerrainConfig {
            patch_size: 100.0,
            patch_resolution: 3,
            ..Default::default()
        };
        let mut terrain = terrain(config, HeadlessRenderBackend::with_texture_capacity(6));

        assert!(terrain.add_root_node(GridPoint2::ZERO));
        assert_eq!(terrain.backend().allocated_texture_count(), 4);

        // the second root only fits two of its textures
        assert!(terrain.add_root_node(GridPoint2::new(1, 0)));
        assert_eq!(terrain.backend().allocated_texture_count(), 4);
        assert_eq!(terrain.backend().bound_texture_count(), 4);

        let statistics = terrain.statistics();
        assert_eq!(statistics.failed_patch_uploads, 1);
        assert_eq!(statistics.pending_patches, 1);
        assert_eq!(terrain.patch_render_informations().len(), 1);
    }

    #[test]
    fn update_guards_track_running_updates() {
        let counter = UpdateCounter::default();

        let first = counter.enter();
        let second = counter.enter();
        drop(first);
        drop(second);
        let _third = counter.enter();

        assert_eq!(counter.peak(), 2);
        assert_eq!(counter.running.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn invalid_configs_are_rejected() {
        let config = TerrainConfig {
            patch_resolution: 1,
            ..Default::default()
        };
        let generator = Arc::new(FlatTerrainGenerator::default());

        assert!(TerrainSystem::new(config, generator, HeadlessRenderBackend::new()).is_err());
    }
}

use crate::{
    config::TerrainConfig,
    generation::{ProceduralTerrainGenerator, TerrainGenerator},
    render::{HeadlessRenderBackend, TerrainRenderBackend},
    terrain::TerrainSystem,
    viewer::{relative_frustum, TerrainShadowViewer, TerrainViewer},
};
use bevy::{
    prelude::*,
    render::{primitives::Frustum, view::VisibilitySystems},
};
use std::{marker::PhantomData, sync::Arc};

/// The plugin for the streaming terrain.
///
/// Inserts the [`TerrainSystem`] resource, streams the terrain around the first
/// [`TerrainViewer`] during [`PreUpdate`] and culls the patches once the frusta are updated.
pub struct TerrainPlugin<B = HeadlessRenderBackend> {
    pub config: TerrainConfig,
    pub generator: Arc<dyn TerrainGenerator>,
    _backend: PhantomData<fn() -> B>,
}

impl<B> TerrainPlugin<B> {
    pub fn new(config: TerrainConfig) -> Self {
        Self::with_generator(config, Arc::new(ProceduralTerrainGenerator::default()))
    }

    pub fn with_generator(config: TerrainConfig, generator: Arc<dyn TerrainGenerator>) -> Self {
        Self {
            config,
            generator,
            _backend: PhantomData,
        }
    }
}

impl<B: TerrainRenderBackend + FromWorld> Plugin for TerrainPlugin<B> {
    fn build(&self, app: &mut App) {
        let backend = B::from_world(app.world_mut());

        let terrain = match TerrainSystem::new(self.config.clone(), self.generator.clone(), backend)
        {
            Ok(terrain) => terrain,
            Err(error) => panic!("Failed to initialize the terrain: {error:#}"),
        };

        app.insert_resource(terrain)
            .add_systems(PreUpdate, update_terrain::<B>)
            .add_systems(
                PostUpdate,
                cull_terrain::<B>.after(VisibilitySystems::UpdateFrusta),
            );
    }
}

pub fn update_terrain<B: TerrainRenderBackend>(
    mut terrain: ResMut<TerrainSystem<B>>,
    viewers: Query<&GlobalTransform, With<TerrainViewer>>,
) {
    match viewers.iter().next() {
        Some(viewer) => terrain.sequential_update(viewer.translation()),
        None => {
            terrain.poll_update();
        }
    }
}

pub fn cull_terrain<B: TerrainRenderBackend>(
    mut terrain: ResMut<TerrainSystem<B>>,
    views: Query<&Frustum, With<TerrainViewer>>,
    shadows: Query<&Frustum, With<TerrainShadowViewer>>,
) {
    let world_center = terrain.world_center();
    let view = views
        .iter()
        .next()
        .map(|frustum| relative_frustum(frustum, world_center));
    let shadow = shadows
        .iter()
        .next()
        .map(|frustum| relative_frustum(frustum, world_center));

    terrain.cull(view.as_ref(), shadow.as_ref());
}

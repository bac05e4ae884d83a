use bevy::{
    math::{Rect, UVec2, Vec2, Vec3, Vec4},
    prelude::*,
    render::primitives::{Frustum, HalfSpace},
};
use bevy_terrain_streaming::{
    prelude::*,
    render::HeadlessRenderBackend,
    terrain_data::{TerrainBorders, TerrainQuadTree},
};
use ndarray::Array2;
use std::{sync::Arc, time::Duration};

fn config() -> TerrainConfig {
    TerrainConfig {
        patch_size: 1000.0,
        patch_resolution: 5,
        maximum_quad_tree_depth: 3,
        subdivision_distance: 1000.0,
        combination_hysteresis: 0.25,
        streaming_radius: 0,
        ..Default::default()
    }
}

fn flat_terrain(backend: HeadlessRenderBackend) -> TerrainSystem {
    let generator = FlatTerrainGenerator {
        height: 10.0,
        material: 2,
    };

    TerrainSystem::new(config(), Arc::new(generator), backend).unwrap()
}

/// Runs complete update cycles until the quadtree stops changing.
fn settle(terrain: &mut TerrainSystem, viewer: Vec3) {
    for _ in 0..16 {
        assert!(terrain.dispatch_update(viewer));
        assert!(terrain.finish_pending_update());
    }
}

fn leaf_depths(tree: &TerrainQuadTree) -> Vec<u32> {
    let mut depths = Vec::new();
    tree.for_each_leaf(|leaf| depths.push(leaf.depth()));
    depths
}

#[test]
fn terrain_refines_around_the_viewer() {
    let mut terrain = flat_terrain(HeadlessRenderBackend::new());
    let viewer = Vec3::new(50.0, 0.0, 50.0);

    settle(&mut terrain, viewer);

    let statistics = terrain.statistics();
    assert_eq!(statistics.root_count, 1);
    assert_eq!(statistics.pending_patches, 0);
    assert_eq!(statistics.leaf_count, 28);
    assert_eq!(statistics.peak_concurrent_updates, 1);

    let depths = leaf_depths(terrain.tree());
    assert_eq!(depths.iter().filter(|&&depth| depth == 3).count(), 16);
    assert_eq!(depths.iter().filter(|&&depth| depth == 2).count(), 12);

    let leaf = terrain.tree().leaf_at(Vec2::new(50.0, 50.0)).unwrap();
    assert_eq!(leaf.depth(), 3);

    // one render information per ready leaf, four textures per patch
    let informations = terrain.patch_render_informations();
    assert_eq!(informations.len(), 28);
    assert_eq!(terrain.backend().allocated_texture_count(), 28 * 4);
    assert_eq!(terrain.backend().bound_texture_count(), 28 * 4);

    // fine leaves next to coarse ones stitch, the coarse side never does
    for information in informations.iter() {
        if information.depth == 2 {
            assert!(information.borders().is_empty());
        }
    }
    assert!(informations
        .iter()
        .any(|information| information.borders().intersects(TerrainBorders::all())));
}

#[test]
fn one_cycle_subdivides_the_root_next_to_the_viewer() {
    let mut terrain = flat_terrain(HeadlessRenderBackend::new());
    assert!(terrain.add_root_node(GridPoint2::ZERO));

    assert!(terrain.dispatch_update(Vec3::new(50.0, 0.0, 0.0)));
    assert!(terrain.finish_pending_update());

    let root = terrain.tree().root(GridPoint2::ZERO).unwrap();
    let children = root.children().unwrap();
    assert!(children
        .iter()
        .all(|child| child.is_leaf() && child.depth() == 1 && !child.is_pending()));

    let height = terrain.terrain_height_at_position(Vec3::ZERO).unwrap();
    let leaf = terrain.tree().leaf_at(Vec2::ZERO).unwrap();
    let data = &leaf.patch().unwrap().data;
    assert_eq!(leaf.depth(), 1);
    assert!((data.minimum_height..=data.maximum_height).contains(&height));
}

#[test]
fn moving_away_releases_all_patches() {
    let mut terrain = flat_terrain(HeadlessRenderBackend::new());

    settle(&mut terrain, Vec3::ZERO);
    assert!(terrain.backend().allocated_texture_count() > 4);

    // the old root is removed and the new one is refined around the viewer
    settle(&mut terrain, Vec3::new(10_000.0, 0.0, 10_000.0));

    let statistics = terrain.statistics();
    assert_eq!(statistics.root_count, 1);
    assert!(terrain.tree().contains_root(GridPoint2::new(10, 10)));
    assert!(!terrain.tree().contains_root(GridPoint2::ZERO));

    let leaf = terrain
        .tree()
        .leaf_at(Vec2::new(10_000.0, 10_000.0))
        .unwrap();
    assert_eq!(leaf.depth(), 3);
    assert_eq!(
        terrain.backend().allocated_texture_count(),
        statistics.leaf_count * 4
    );
}

#[test]
fn add_and_remove_root_nodes() {
    let mut terrain = flat_terrain(HeadlessRenderBackend::new());
    let grid_point = GridPoint2::new(-3, 7);

    assert!(terrain.add_root_node(grid_point));
    assert!(!terrain.add_root_node(grid_point));
    assert_eq!(terrain.backend().allocated_texture_count(), 4);
    assert_eq!(terrain.patch_render_informations().len(), 1);

    let height = terrain.terrain_height_at_position(Vec3::new(-3000.0, 0.0, 7000.0));
    assert_eq!(height, Some(10.0));

    assert!(terrain.remove_root_node(grid_point));
    assert!(!terrain.remove_root_node(grid_point));
    assert_eq!(terrain.tree().root_count(), 0);
    assert_eq!(terrain.backend().allocated_texture_count(), 0);
    assert_eq!(terrain.backend().bound_texture_count(), 0);
    assert!(terrain.patch_render_informations().is_empty());
}

#[test]
fn only_one_update_is_in_flight() {
    let mut terrain = flat_terrain(HeadlessRenderBackend::new());

    assert!(terrain.dispatch_update(Vec3::ZERO));
    assert!(terrain.is_update_in_flight());
    assert!(!terrain.dispatch_update(Vec3::ZERO));

    assert!(terrain.finish_pending_update());
    assert!(!terrain.is_update_in_flight());
    assert!(!terrain.finish_pending_update());

    terrain.sequential_update(Vec3::ZERO);
    assert!(terrain.is_update_in_flight());

    // the tick that applies the update does not dispatch the next one
    while terrain.is_update_in_flight() {
        std::thread::sleep(Duration::from_millis(1));
        terrain.sequential_update(Vec3::ZERO);
    }

    let statistics = terrain.statistics();
    assert_eq!(statistics.dispatched_updates, 2);
    assert_eq!(statistics.applied_updates, 2);
    assert_eq!(statistics.peak_concurrent_updates, 1);
}

#[test]
fn exhausted_textures_leave_the_patch_pending() {
    let mut terrain = flat_terrain(HeadlessRenderBackend::with_texture_capacity(3));

    settle(&mut terrain, Vec3::ZERO);

    let statistics = terrain.statistics();
    assert_eq!(statistics.root_count, 1);
    assert_eq!(statistics.pending_patches, 1);
    assert!(statistics.failed_patch_uploads >= 1);
    assert_eq!(terrain.backend().allocated_texture_count(), 0);
    assert!(terrain.patch_render_informations().is_empty());
    assert_eq!(terrain.terrain_height_at_position(Vec3::ZERO), None);

    terrain.backend_mut().set_texture_capacity(None);
    settle(&mut terrain, Vec3::ZERO);

    let statistics = terrain.statistics();
    assert_eq!(statistics.pending_patches, 0);
    assert_eq!(statistics.leaf_count, 28);
    assert_eq!(terrain.terrain_height_at_position(Vec3::ZERO), Some(10.0));
}

#[test]
fn height_queries_match_the_generator() {
    let generator = Arc::new(ProceduralTerrainGenerator::with_parameters(
        5,
        3,
        1.0 / 700.0,
        120.0,
    ));
    let mut terrain =
        TerrainSystem::new(config(), generator.clone(), HeadlessRenderBackend::new()).unwrap();

    settle(&mut terrain, Vec3::ZERO);

    // sample positions coincide with the patch grid, so no interpolation error is expected
    let spacing = 125.0 / 4.0;
    for (x, z) in [(0, 0), (1, 3), (-4, 2), (-7, -7)] {
        let position = Vec2::new(x as f32, z as f32) * spacing;
        let height = terrain
            .terrain_height_at_position(Vec3::new(position.x, 1e4, position.y))
            .unwrap();

        assert!((height - generator.height(position)).abs() < 1e-3);
    }

    let normal = terrain.terrain_normal_at_position(Vec3::ZERO).unwrap();
    assert!(normal.y > 0.0);
    assert!(terrain.terrain_material_at_position(Vec3::ZERO).is_some());
    assert_eq!(
        terrain.terrain_height_at_position(Vec3::new(5000.0, 0.0, 0.0)),
        None
    );
}

#[test]
fn world_center_shifts_the_render_information() {
    let mut terrain = flat_terrain(HeadlessRenderBackend::new());
    assert!(terrain.add_root_node(GridPoint2::new(1, 0)));

    assert_eq!(
        terrain.patch_render_informations()[0].world_position,
        [1000.0, 0.0]
    );

    terrain.set_terrain_world_center(Vec3::new(1000.0, 50.0, -200.0));

    let information = terrain.patch_render_informations()[0];
    assert_eq!(information.world_position, [0.0, 200.0]);
    assert_eq!(information.patch_half_size, 500.0);
    assert_eq!(terrain.tree().root_count(), 1);
}

#[test]
fn edited_height_maps_regenerate_patches() {
    let mut terrain = flat_terrain(HeadlessRenderBackend::new());
    settle(&mut terrain, Vec3::ZERO);

    let map =
        HeightMap::new(Vec2::new(-500.0, -500.0), 1000.0, Array2::zeros((5, 5))).unwrap();
    terrain.set_height_map(Some(map));
    settle(&mut terrain, Vec3::ZERO);

    assert_eq!(terrain.terrain_height_at_position(Vec3::ZERO), Some(0.0));

    terrain
        .update_height_map(UVec2::new(2, 2), Array2::from_elem((1, 1), 4.0_f32).view())
        .unwrap();
    settle(&mut terrain, Vec3::ZERO);

    assert_eq!(terrain.terrain_height_at_position(Vec3::ZERO), Some(4.0));
    let outside = terrain.terrain_height_at_position(Vec3::new(-400.0, 0.0, 400.0));
    assert_eq!(outside, Some(0.0));

    terrain.set_height_map(None);
    settle(&mut terrain, Vec3::ZERO);

    assert_eq!(terrain.terrain_height_at_position(Vec3::ZERO), Some(10.0));
    assert!(terrain
        .update_height_map(UVec2::ZERO, Array2::<f32>::zeros((1, 1)).view())
        .is_err());
}

#[test]
fn marked_regions_are_regenerated() {
    let mut terrain = flat_terrain(HeadlessRenderBackend::new());
    settle(&mut terrain, Vec3::ZERO);

    let before = terrain.backend().allocated_texture_count();
    let leaf = terrain.tree().leaf_at(Vec2::ZERO).unwrap();
    let textures = leaf.patch().unwrap().textures;
    let far = Vec2::new(400.0, 400.0);
    let far_textures = terrain.tree().leaf_at(far).unwrap().patch().unwrap().textures;

    terrain.mark_region_dirty(Rect::from_center_size(Vec2::ZERO, Vec2::splat(1.0)));
    settle(&mut terrain, Vec3::ZERO);

    let leaf = terrain.tree().leaf_at(Vec2::ZERO).unwrap();
    assert_ne!(leaf.patch().unwrap().textures.height, textures.height);

    let far_leaf = terrain.tree().leaf_at(far).unwrap();
    assert_eq!(far_leaf.patch().unwrap().textures, far_textures);
    assert_eq!(terrain.backend().allocated_texture_count(), before);
}

#[test]
fn cached_patches_follow_the_height_scale() {
    let folder = std::env::temp_dir()
        .join(format!("terrain_streaming_cache_{}", std::process::id()));
    let _ = std::fs::remove_dir_all(&folder);
    let generator = Arc::new(FlatTerrainGenerator {
        height: 10.0,
        material: 2,
    });

    let mut config = TerrainConfig {
        save_folder: Some(folder.clone()),
        ..config()
    };
    let mut terrain =
        TerrainSystem::new(config.clone(), generator.clone(), HeadlessRenderBackend::new())
            .unwrap();
    assert!(terrain.add_root_node(GridPoint2::ZERO));
    assert_eq!(terrain.terrain_height_at_position(Vec3::ZERO), Some(10.0));
    drop(terrain);

    config.height_scale = 2.0;
    let mut terrain = TerrainSystem::new(config, generator, HeadlessRenderBackend::new()).unwrap();
    assert!(terrain.add_root_node(GridPoint2::ZERO));
    assert_eq!(terrain.terrain_height_at_position(Vec3::ZERO), Some(20.0));

    std::fs::remove_dir_all(&folder).unwrap();
}

#[test]
fn culling_marks_visible_patches() {
    let mut terrain = flat_terrain(HeadlessRenderBackend::new());
    assert!(terrain.add_root_node(GridPoint2::new(-1, 0)));
    assert!(terrain.add_root_node(GridPoint2::new(1, 0)));

    // everything with x >= 0
    let frustum = Frustum {
        half_spaces: [HalfSpace::new(Vec4::new(1.0, 0.0, 0.0, 0.0)); 6],
    };

    terrain.cull(Some(&frustum), None);

    for information in terrain.patch_render_informations().iter() {
        let visibility = information.visibility();
        assert_eq!(
            visibility.contains(TerrainVisibility::VIEW),
            information.world_position[0] > 0.0
        );
        assert!(visibility.contains(TerrainVisibility::SHADOW));
    }

    terrain.cull(None, Some(&frustum));

    for information in terrain.patch_render_informations().iter() {
        let visibility = information.visibility();
        assert!(visibility.contains(TerrainVisibility::VIEW));
        assert_eq!(
            visibility.contains(TerrainVisibility::SHADOW),
            information.world_position[0] > 0.0
        );
    }
}

#[test]
fn plane_mesh_is_shared_by_all_patches() {
    let mut terrain = flat_terrain(HeadlessRenderBackend::new());
    settle(&mut terrain, Vec3::ZERO);

    let properties = *terrain.properties();
    assert_eq!(terrain.backend().allocated_buffer_count(), 2);
    assert_eq!(properties.vertex_count, 25);
    assert_eq!(properties.index_count, 16 * 6);
    assert_eq!(
        terrain.backend().buffer_data(properties.index_buffer).unwrap().len(),
        16 * 6 * 4
    );
}

#[test]
fn plugin_streams_around_the_viewer() {
    let generator = Arc::new(FlatTerrainGenerator {
        height: 3.0,
        material: 0,
    });

    let mut app = App::new();
    app.add_plugins((
        MinimalPlugins,
        TerrainPlugin::<HeadlessRenderBackend>::with_generator(config(), generator),
    ));
    app.world_mut().spawn((
        TerrainViewer,
        GlobalTransform::from_translation(Vec3::new(100.0, 20.0, 100.0)),
    ));

    for _ in 0..10_000 {
        app.update();

        let terrain = app.world().resource::<TerrainSystem>();
        if terrain.statistics().applied_updates >= 4 {
            break;
        }
        std::thread::sleep(Duration::from_millis(1));
    }

    let terrain = app.world().resource::<TerrainSystem>();
    assert!(terrain.statistics().applied_updates >= 4);
    assert_eq!(terrain.statistics().peak_concurrent_updates, 1);
    assert_eq!(
        terrain.terrain_height_at_position(Vec3::new(100.0, 0.0, 100.0)),
        Some(3.0)
    );
}

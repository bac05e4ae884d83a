use crate::{
    config::TerrainConfig,
    math::{GridPoint2, NodeCoordinate},
    schedule::{TerrainOperation, TerrainUpdate},
    terrain_data::{PatchState, Side, TerrainPatch, TerrainQuadTreeNode},
};
use bevy::{
    math::{Rect, Vec2},
    utils::HashSet,
};
use std::collections::BTreeMap;

/// A forest of quadtrees, one per loaded root cell of the terrain grid.
///
/// The async update task plans its changes on a clone of this forest, so cloning only
/// copies the node structure, the patch data itself is shared.
#[derive(Clone, Debug)]
pub struct TerrainQuadTree {
    patch_size: f32,
    roots: BTreeMap<GridPoint2, TerrainQuadTreeNode>,
}

impl TerrainQuadTree {
    pub fn new(patch_size: f32) -> Self {
        Self {
            patch_size,
            roots: BTreeMap::new(),
        }
    }

    pub fn patch_size(&self) -> f32 {
        self.patch_size
    }

    pub fn root_count(&self) -> usize {
        self.roots.len()
    }

    pub fn roots(&self) -> impl Iterator<Item = &TerrainQuadTreeNode> {
        self.roots.values()
    }

    pub fn root(&self, grid_point: GridPoint2) -> Option<&TerrainQuadTreeNode> {
        self.roots.get(&grid_point)
    }

    pub fn contains_root(&self, grid_point: GridPoint2) -> bool {
        self.roots.contains_key(&grid_point)
    }

    /// Adds a root leaf for the grid cell.
    ///
    /// Returns the state back if the cell already has a root.
    pub fn add_root_node(
        &mut self,
        grid_point: GridPoint2,
        state: PatchState,
    ) -> Result<(), PatchState> {
        if self.roots.contains_key(&grid_point) {
            return Err(state);
        }

        let coordinate = NodeCoordinate::root(grid_point);
        let node = TerrainQuadTreeNode::new(coordinate, self.patch_size, state);
        self.roots.insert(grid_point, node);

        Ok(())
    }

    /// Removes the root of the grid cell and returns all patches of its tree.
    pub fn remove_root_node(&mut self, grid_point: GridPoint2) -> Vec<TerrainPatch> {
        let mut released = Vec::new();

        if let Some(root) = self.roots.remove(&grid_point) {
            root.release(&mut released);
        }

        released
    }

    /// Removes all roots and returns all their patches.
    pub fn clear(&mut self) -> Vec<TerrainPatch> {
        let mut released = Vec::new();

        for (_, root) in std::mem::take(&mut self.roots) {
            root.release(&mut released);
        }

        released
    }

    pub fn node(&self, coordinate: NodeCoordinate) -> Option<&TerrainQuadTreeNode> {
        self.roots.get(&coordinate.root)?.node(coordinate)
    }

    pub fn node_mut(&mut self, coordinate: NodeCoordinate) -> Option<&mut TerrainQuadTreeNode> {
        self.roots.get_mut(&coordinate.root)?.node_mut(coordinate)
    }

    /// The deepest node containing the position, that is not deeper than `maximum_depth`.
    pub fn find(&self, position: Vec2, maximum_depth: u32) -> Option<&TerrainQuadTreeNode> {
        let grid_point = GridPoint2::from_position(position, self.patch_size);
        let root = self.roots.get(&grid_point)?;

        Some(root.find(position, maximum_depth))
    }

    /// The leaf containing the position.
    pub fn leaf_at(&self, position: Vec2) -> Option<&TerrainQuadTreeNode> {
        self.find(position, u32::MAX)
    }

    pub fn for_each_leaf<'a>(&'a self, mut visit: impl FnMut(&'a TerrainQuadTreeNode)) {
        for root in self.roots.values() {
            root.for_each_leaf(&mut visit);
        }
    }

    pub fn for_each_node<'a>(&'a self, mut visit: impl FnMut(&'a TerrainQuadTreeNode)) {
        for root in self.roots.values() {
            root.for_each_node(&mut visit);
        }
    }

    pub fn leaf_count(&self) -> usize {
        let mut count = 0;
        self.for_each_leaf(|_| count += 1);
        count
    }

    /// Adds the roots that entered the streaming radius around the viewer and removes those
    /// that left it.
    ///
    /// Added roots are pending placeholders until the update is applied.
    pub fn update_root_nodes(
        &mut self,
        viewer: Vec2,
        config: &TerrainConfig,
        update: &mut TerrainUpdate,
    ) {
        let center = GridPoint2::from_position(viewer, self.patch_size);
        let desired: HashSet<_> = center.neighbourhood(config.streaming_radius).collect();

        let removed: Vec<_> = self
            .roots
            .keys()
            .copied()
            .filter(|grid_point| !desired.contains(grid_point))
            .collect();

        for grid_point in removed {
            self.roots.remove(&grid_point);
            update.push(TerrainOperation::RemoveRoot(grid_point));
        }

        for grid_point in center.neighbourhood(config.streaming_radius) {
            if self.add_root_node(grid_point, PatchState::Pending).is_ok() {
                update.push(TerrainOperation::AddRoot(grid_point));
            }
        }
    }

    /// Walks all trees top down and decides which nodes to subdivide and combine.
    ///
    /// Combination is checked before subdivision, and nodes created in this pass are not
    /// visited again, so every node changes at most once per pass.
    pub fn traverse(&mut self, viewer: Vec2, config: &TerrainConfig, update: &mut TerrainUpdate) {
        for root in self.roots.values_mut() {
            traverse_node(root, viewer, config, update);
        }
    }

    /// Requests new patches for pending leaves and for leaves touched by the dirty region.
    ///
    /// A leaf is touched when the region reaches into its extent grown by one sample
    /// spacing, since its edge normals sample one texel beyond the extent.
    /// Leaves created by this pass already receive new patches and are skipped.
    pub fn regenerate_leaves(
        &self,
        dirty_region: Option<Rect>,
        config: &TerrainConfig,
        update: &mut TerrainUpdate,
    ) {
        let created: HashSet<_> = update.required_patches().into_iter().collect();
        let intervals = (config.patch_resolution - 1) as f32;

        self.for_each_leaf(|leaf| {
            if created.contains(&leaf.coordinate()) {
                return;
            }

            let dirty = dirty_region.is_some_and(|region| {
                let apron = leaf.extent().inflate(leaf.size() / intervals);
                region.min.cmple(apron.max).all() && region.max.cmpge(apron.min).all()
            });

            if leaf.is_pending() || dirty {
                update.push(TerrainOperation::RegeneratePatch(leaf.coordinate()));
            }
        });
    }

    /// Recomputes the stitching bits of every leaf and records those that changed.
    pub fn calculate_new_borders(&mut self, update: &mut TerrainUpdate) {
        let mut leaves = Vec::new();

        self.for_each_leaf(|leaf| {
            let neighbours = Side::ALL.map(|side| self.neighbour_depth(leaf, side));
            leaves.push((leaf.coordinate(), neighbours));
        });

        for (coordinate, neighbours) in leaves {
            let Some(leaf) = self.node_mut(coordinate) else {
                continue;
            };

            let previous = leaf.borders();
            let borders = leaf.calculate_borders(neighbours);

            if borders != previous {
                update.push(TerrainOperation::RegenerateBorders(coordinate, borders));
            }
        }
    }

    /// The depth of the coarsest node adjacent to the side of the leaf.
    ///
    /// Neighbours that are finer than the leaf report the depth of the leaf, since the finer
    /// side does the stitching.
    fn neighbour_depth(&self, leaf: &TerrainQuadTreeNode, side: Side) -> Option<u32> {
        let probe = leaf.center() + side.direction() * leaf.size() * 0.75;
        let neighbour = self.find(probe, leaf.depth())?;

        Some(neighbour.depth())
    }

    /// Plans a complete update pass on this snapshot of the quadtree.
    pub fn plan_update(
        &mut self,
        viewer: Vec2,
        config: &TerrainConfig,
        dirty_region: Option<Rect>,
    ) -> TerrainUpdate {
        let mut update = TerrainUpdate::new(viewer);

        self.update_root_nodes(viewer, config, &mut update);
        self.traverse(viewer, config, &mut update);
        self.regenerate_leaves(dirty_region, config, &mut update);
        self.calculate_new_borders(&mut update);

        update
    }
}

fn traverse_node(
    node: &mut TerrainQuadTreeNode,
    viewer: Vec2,
    config: &TerrainConfig,
    update: &mut TerrainUpdate,
) {
    if node.should_combine(viewer, config) {
        let released = node.combine(PatchState::Pending);
        debug_assert_eq!(released.len(), 4);
        update.push(TerrainOperation::Combine(node.coordinate()));
        return;
    }

    if node.should_subdivide(viewer, config) {
        node.subdivide([0; 4].map(|_| PatchState::Pending));
        update.push(TerrainOperation::Subdivide(node.coordinate()));
        return;
    }

    if let Some(children) = node.children_mut() {
        for child in children.iter_mut() {
            traverse_node(child, viewer, config, update);
        }
    }
}

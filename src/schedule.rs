//! The messages passed from the async update task back to the main thread.
//!
//! An update task works on a snapshot of the quadtree and records every change it decides
//! on as a [`TerrainOperation`].
//! The finished [`TerrainUpdate`] carries these operations together with the generated patch
//! data, and is applied in order to the live quadtree on the main thread.

use crate::{
    math::{GridPoint2, NodeCoordinate},
    terrain_data::{TerrainBorders, TerrainPatchData},
};
use bevy::{log::warn, math::Vec2, utils::HashMap};

/// A single change to the terrain quadtree.
#[derive(Copy, Clone, Debug, PartialEq)]
pub enum TerrainOperation {
    /// Adds a new root leaf for the grid cell.
    AddRoot(GridPoint2),
    /// Removes the root of the grid cell and releases all patches below it.
    RemoveRoot(GridPoint2),
    /// Splits the leaf into four children.
    Subdivide(NodeCoordinate),
    /// Collapses the four leaf children of the node back into a single leaf.
    Combine(NodeCoordinate),
    /// Replaces the patch of the leaf with newly generated data.
    RegeneratePatch(NodeCoordinate),
    /// Replaces the stitching bits of the leaf.
    RegenerateBorders(NodeCoordinate, TerrainBorders),
}

#[derive(Copy, Clone, Debug, Hash, Eq, PartialEq)]
enum OperationKind {
    Structural,
    Borders,
}

impl TerrainOperation {
    /// The node changed by the operation.
    pub fn target(&self) -> NodeCoordinate {
        match *self {
            TerrainOperation::AddRoot(grid_point) | TerrainOperation::RemoveRoot(grid_point) => {
                NodeCoordinate::root(grid_point)
            }
            TerrainOperation::Subdivide(coordinate)
            | TerrainOperation::Combine(coordinate)
            | TerrainOperation::RegeneratePatch(coordinate)
            | TerrainOperation::RegenerateBorders(coordinate, _) => coordinate,
        }
    }

    fn key(&self) -> (NodeCoordinate, OperationKind) {
        let kind = match self {
            TerrainOperation::RegenerateBorders(..) => OperationKind::Borders,
            _ => OperationKind::Structural,
        };

        (self.target(), kind)
    }

    /// The nodes that receive new patch data through this operation.
    pub fn generated_patches(&self) -> Vec<NodeCoordinate> {
        match *self {
            TerrainOperation::AddRoot(grid_point) => vec![NodeCoordinate::root(grid_point)],
            TerrainOperation::Subdivide(coordinate) => coordinate.children().to_vec(),
            TerrainOperation::Combine(coordinate)
            | TerrainOperation::RegeneratePatch(coordinate) => {
                vec![coordinate]
            }
            TerrainOperation::RemoveRoot(_) | TerrainOperation::RegenerateBorders(..) => Vec::new(),
        }
    }
}

/// The result of one asynchronous update pass.
#[derive(Debug, Default)]
pub struct TerrainUpdate {
    viewer: Vec2,
    operations: Vec<TerrainOperation>,
    patches: HashMap<NodeCoordinate, TerrainPatchData>,
}

impl TerrainUpdate {
    pub fn new(viewer: Vec2) -> Self {
        Self {
            viewer,
            ..Default::default()
        }
    }

    /// The horizontal viewer position the update was planned for.
    pub fn viewer(&self) -> Vec2 {
        self.viewer
    }

    pub fn push(&mut self, operation: TerrainOperation) {
        self.operations.push(operation);
    }

    pub fn operations(&self) -> &[TerrainOperation] {
        &self.operations
    }

    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }

    /// The nodes whose patch data has to be generated before the update can be applied.
    pub fn required_patches(&self) -> Vec<NodeCoordinate> {
        self.operations
            .iter()
            .flat_map(TerrainOperation::generated_patches)
            .collect()
    }

    pub fn insert_patch(&mut self, data: TerrainPatchData) {
        self.patches.insert(data.coordinate, data);
    }

    pub fn take_patch(&mut self, coordinate: NodeCoordinate) -> Option<TerrainPatchData> {
        self.patches.remove(&coordinate)
    }

    pub fn patch_count(&self) -> usize {
        self.patches.len()
    }

    pub(crate) fn take_operations(&mut self) -> Vec<TerrainOperation> {
        std::mem::take(&mut self.operations)
    }

    /// Drops every operation that is followed by a conflicting one.
    ///
    /// Two structural operations on the same node conflict, as do two border updates.
    /// The later operation wins. Returns the number of dropped operations.
    pub fn deduplicate(&mut self) -> usize {
        let mut last = HashMap::default();

        for (index, operation) in self.operations.iter().enumerate() {
            last.insert(operation.key(), index);
        }

        let count = self.operations.len();
        let mut index = 0;

        self.operations.retain(|operation| {
            let keep = last[&operation.key()] == index;
            index += 1;
            keep
        });

        count - self.operations.len()
    }

    /// Resolves conflicting operations, which only a faulty traversal produces.
    pub fn validate(&mut self) {
        let dropped = self.deduplicate();

        debug_assert_eq!(dropped, 0, "the terrain update contains conflicting operations");

        if dropped > 0 {
            warn!("Dropped {dropped} conflicting terrain operations.");
        }
    }
}

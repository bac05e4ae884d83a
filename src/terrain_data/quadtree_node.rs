use crate::{
    config::TerrainConfig,
    math::NodeCoordinate,
    terrain_data::{PatchState, TerrainPatch},
};
use bevy::math::{Rect, Vec2};
use bitflags::bitflags;

bitflags! {
    /// Which edges of a patch have to be stitched to a coarser neighbour.
    ///
    /// Every side has two bits, the first is set when the neighbour is at least one level
    /// coarser and the second when it is at least two levels coarser.
    #[repr(transparent)]
    #[derive(Copy, Clone, Debug, Default, Hash, Eq, PartialEq)]
    pub struct TerrainBorders: u32 {
        const LEFT_1 = 1 << 0;
        const LEFT_2 = 1 << 1;
        const RIGHT_1 = 1 << 2;
        const RIGHT_2 = 1 << 3;
        const DOWN_1 = 1 << 4;
        const DOWN_2 = 1 << 5;
        const UP_1 = 1 << 6;
        const UP_2 = 1 << 7;
    }
}

/// The four horizontal sides of a node.
/// Left and right point along the world x axis, down and up along the world z axis.
#[derive(Copy, Clone, Debug, Hash, Eq, PartialEq)]
pub enum Side {
    Left,
    Right,
    Down,
    Up,
}

impl Side {
    pub const ALL: [Side; 4] = [Side::Left, Side::Right, Side::Down, Side::Up];

    pub fn direction(self) -> Vec2 {
        match self {
            Side::Left => Vec2::NEG_X,
            Side::Right => Vec2::X,
            Side::Down => Vec2::NEG_Y,
            Side::Up => Vec2::Y,
        }
    }

    fn borders(self) -> (TerrainBorders, TerrainBorders) {
        match self {
            Side::Left => (TerrainBorders::LEFT_1, TerrainBorders::LEFT_2),
            Side::Right => (TerrainBorders::RIGHT_1, TerrainBorders::RIGHT_2),
            Side::Down => (TerrainBorders::DOWN_1, TerrainBorders::DOWN_2),
            Side::Up => (TerrainBorders::UP_1, TerrainBorders::UP_2),
        }
    }
}

/// Either the patch of a leaf or the four children of an internal node.
#[derive(Clone, Debug)]
pub enum NodeContent {
    Leaf(PatchState),
    Internal(Box<[TerrainQuadTreeNode; 4]>),
}

/// A node of a terrain quadtree.
///
/// Leaves own exactly one patch, internal nodes own exactly four children, which split the
/// extent of their parent into equal quadrants.
#[derive(Clone, Debug)]
pub struct TerrainQuadTreeNode {
    coordinate: NodeCoordinate,
    extent: Rect,
    borders: TerrainBorders,
    content: NodeContent,
}

impl TerrainQuadTreeNode {
    pub fn new(coordinate: NodeCoordinate, patch_size: f32, state: PatchState) -> Self {
        Self::with_extent(coordinate, coordinate.extent(patch_size), state)
    }

    fn with_extent(coordinate: NodeCoordinate, extent: Rect, state: PatchState) -> Self {
        Self {
            coordinate,
            extent,
            borders: TerrainBorders::empty(),
            content: NodeContent::Leaf(state),
        }
    }

    pub fn coordinate(&self) -> NodeCoordinate {
        self.coordinate
    }

    pub fn depth(&self) -> u32 {
        self.coordinate.depth
    }

    pub fn extent(&self) -> Rect {
        self.extent
    }

    pub fn center(&self) -> Vec2 {
        self.extent.center()
    }

    pub fn size(&self) -> f32 {
        self.extent.width()
    }

    pub fn borders(&self) -> TerrainBorders {
        self.borders
    }

    pub fn content(&self) -> &NodeContent {
        &self.content
    }

    pub fn is_leaf(&self) -> bool {
        matches!(self.content, NodeContent::Leaf(_))
    }

    pub fn state(&self) -> Option<&PatchState> {
        match &self.content {
            NodeContent::Leaf(state) => Some(state),
            NodeContent::Internal(_) => None,
        }
    }

    pub fn patch(&self) -> Option<&TerrainPatch> {
        self.state()?.patch()
    }

    /// Whether this is a leaf, that is still waiting for its patch.
    pub fn is_pending(&self) -> bool {
        self.state().is_some_and(PatchState::is_pending)
    }

    pub fn children(&self) -> Option<&[TerrainQuadTreeNode; 4]> {
        match &self.content {
            NodeContent::Leaf(_) => None,
            NodeContent::Internal(children) => Some(children),
        }
    }

    pub fn children_mut(&mut self) -> Option<&mut [TerrainQuadTreeNode; 4]> {
        match &mut self.content {
            NodeContent::Leaf(_) => None,
            NodeContent::Internal(children) => Some(children),
        }
    }

    /// The horizontal distance between the viewer and the node center.
    pub fn distance(&self, viewer: Vec2) -> f32 {
        self.center().distance(viewer)
    }

    /// Whether this leaf should be split into four children.
    ///
    /// Leaves that are still pending or already at the maximum depth are never subdivided.
    pub fn should_subdivide(&self, viewer: Vec2, config: &TerrainConfig) -> bool {
        let Some(PatchState::Ready(_)) = self.state() else {
            return false;
        };

        self.depth() < config.maximum_quad_tree_depth
            && self.distance(viewer) < config.subdivision_distance(self.depth())
    }

    /// Whether the four children of this node should be collapsed back into a single leaf.
    ///
    /// Only nodes whose children are all ready leaves are eligible.
    pub fn should_combine(&self, viewer: Vec2, config: &TerrainConfig) -> bool {
        let Some(children) = self.children() else {
            return false;
        };

        children
            .iter()
            .all(|child| matches!(child.state(), Some(PatchState::Ready(_))))
            && self.distance(viewer) > config.combination_distance(self.depth())
    }

    /// Splits this leaf into four children with the given patches, ordered by quadrant.
    ///
    /// Returns the released patch of this node.
    pub fn subdivide(&mut self, children: [PatchState; 4]) -> Option<TerrainPatch> {
        debug_assert!(self.is_leaf(), "subdividing the internal node {}", self.coordinate);

        let NodeContent::Leaf(state) = &self.content else {
            return None;
        };
        let released = state.patch().cloned();

        let coordinates = self.coordinate.children();
        let half = self.extent.half_size();
        let mut states = children.into_iter();

        let children = [0, 1, 2, 3].map(|index| {
            let offset = Vec2::new((index % 2) as f32, (index / 2) as f32);
            let minimum = self.extent.min + offset * half;
            let extent = Rect::from_corners(minimum, minimum + half);
            let state = states.next().unwrap_or(PatchState::Pending);

            TerrainQuadTreeNode::with_extent(coordinates[index], extent, state)
        });

        self.content = NodeContent::Internal(Box::new(children));

        released
    }

    /// Collapses all descendants into this node, which becomes a leaf with the given patch.
    ///
    /// Returns the released patches of all former descendants.
    pub fn combine(&mut self, state: PatchState) -> Vec<TerrainPatch> {
        debug_assert!(
            self.children()
                .is_some_and(|children| children.iter().all(TerrainQuadTreeNode::is_leaf)),
            "combining {}, which does not have four leaf children",
            self.coordinate
        );

        let content = std::mem::replace(&mut self.content, NodeContent::Leaf(state));
        let mut released = Vec::new();

        if let NodeContent::Internal(children) = content {
            for child in *children {
                child.release(&mut released);
            }
        }

        self.borders = TerrainBorders::empty();

        released
    }

    /// Replaces the patch of this leaf and returns the previous one.
    pub fn replace_patch(&mut self, state: PatchState) -> Option<TerrainPatch> {
        match &mut self.content {
            NodeContent::Leaf(current) => std::mem::replace(current, state).into_patch(),
            NodeContent::Internal(_) => None,
        }
    }

    /// Consumes the node and collects the patches of all its leaves.
    pub fn release(self, released: &mut Vec<TerrainPatch>) {
        match self.content {
            NodeContent::Leaf(state) => released.extend(state.into_patch()),
            NodeContent::Internal(children) => {
                for child in *children {
                    child.release(released);
                }
            }
        }
    }

    /// Derives the stitching bits from the depths of the four neighbours,
    /// ordered like [`Side::ALL`].
    ///
    /// Missing neighbours and neighbours that are at least as fine as this node
    /// do not require any stitching.
    pub fn calculate_borders(&mut self, neighbour_depths: [Option<u32>; 4]) -> TerrainBorders {
        let mut borders = TerrainBorders::empty();

        for (side, depth) in Side::ALL.into_iter().zip(neighbour_depths) {
            let Some(depth) = depth else {
                continue;
            };

            let delta = self.depth().saturating_sub(depth);
            let (level_one, level_two) = side.borders();

            if delta >= 1 {
                borders |= level_one;
            }
            if delta >= 2 {
                borders |= level_two;
            }
        }

        self.borders = borders;
        borders
    }

    pub fn set_borders(&mut self, borders: TerrainBorders) {
        self.borders = borders;
    }

    /// The child quadrant containing the position, the upper halves are inclusive.
    fn child_index(&self, position: Vec2) -> usize {
        let center = self.center();
        (position.x >= center.x) as usize + 2 * (position.y >= center.y) as usize
    }

    /// Descends towards the position until a leaf or the maximum depth is reached.
    pub fn find(&self, position: Vec2, maximum_depth: u32) -> &TerrainQuadTreeNode {
        let mut node = self;

        while node.depth() < maximum_depth {
            match &node.content {
                NodeContent::Internal(children) => node = &children[node.child_index(position)],
                NodeContent::Leaf(_) => break,
            }
        }

        node
    }

    /// Follows the quadrant indices of the coordinate down to the addressed node.
    pub fn node(&self, coordinate: NodeCoordinate) -> Option<&TerrainQuadTreeNode> {
        if coordinate.depth < self.depth() || coordinate.root != self.coordinate.root {
            return None;
        }

        let mut node = self;

        for index in coordinate.path().skip(self.depth() as usize) {
            node = &node.children()?[index];
        }

        (node.coordinate == coordinate).then_some(node)
    }

    pub fn node_mut(&mut self, coordinate: NodeCoordinate) -> Option<&mut TerrainQuadTreeNode> {
        if coordinate.depth < self.depth() || coordinate.root != self.coordinate.root {
            return None;
        }

        let mut node = self;

        for index in coordinate.path().skip(node.depth() as usize) {
            node = &mut node.children_mut()?[index];
        }

        (node.coordinate == coordinate).then_some(node)
    }

    /// Visits every leaf below this node in depth first order.
    pub fn for_each_leaf<'a>(&'a self, visit: &mut impl FnMut(&'a TerrainQuadTreeNode)) {
        match &self.content {
            NodeContent::Leaf(_) => visit(self),
            NodeContent::Internal(children) => {
                for child in children.iter() {
                    child.for_each_leaf(visit);
                }
            }
        }
    }

    /// Visits every node below this node in depth first order, parents before children.
    pub fn for_each_node<'a>(&'a self, visit: &mut impl FnMut(&'a TerrainQuadTreeNode)) {
        visit(self);

        if let NodeContent::Internal(children) = &self.content {
            for child in children.iter() {
                child.for_each_node(visit);
            }
        }
    }
}

use crate::math::GridPoint2;
use bevy::math::{Rect, UVec2, Vec2};
use derive_more::derive::Display;
use std::path::{Path, PathBuf};

/// The global coordinate and identifier of a quadtree node.
///
/// A node is addressed by the root cell it belongs to, its depth below that root and its
/// position in node sizes inside the root cell.
#[derive(Copy, Clone, Debug, Display, Hash, Eq, PartialEq, Ord, PartialOrd)]
#[display("{root}_{depth}_{x}_{y}")]
pub struct NodeCoordinate {
    /// The root cell of the quadtree the node belongs to.
    pub root: GridPoint2,
    /// The depth of the node, where 0 is the root with the largest size.
    pub depth: u32,
    /// The x position of the node in node sizes.
    pub x: u32,
    /// The y position of the node in node sizes.
    pub y: u32,
}

impl NodeCoordinate {
    pub fn new(root: GridPoint2, depth: u32, x: u32, y: u32) -> Self {
        debug_assert!(x < Self::node_count(depth) && y < Self::node_count(depth));

        Self { root, depth, x, y }
    }

    pub fn root(root: GridPoint2) -> Self {
        Self::new(root, 0, 0, 0)
    }

    /// The number of nodes per axis at the given depth.
    pub fn node_count(depth: u32) -> u32 {
        1 << depth
    }

    pub fn parent(self) -> Option<Self> {
        (self.depth > 0).then(|| Self::new(self.root, self.depth - 1, self.x >> 1, self.y >> 1))
    }

    /// The four children of this node, ordered by their quadrant index.
    pub fn children(self) -> [Self; 4] {
        [0, 1, 2, 3].map(|index| {
            Self::new(
                self.root,
                self.depth + 1,
                (self.x << 1) + index % 2,
                (self.y << 1) + index / 2,
            )
        })
    }

    /// The quadrant index of this node inside its parent.
    pub fn child_index(self) -> usize {
        ((self.x & 1) + 2 * (self.y & 1)) as usize
    }

    /// The quadrant indices leading from the root down to this node.
    pub fn path(self) -> impl Iterator<Item = usize> {
        (0..self.depth).rev().map(move |shift| {
            let x = (self.x >> shift) & 1;
            let y = (self.y >> shift) & 1;
            (x + 2 * y) as usize
        })
    }

    pub fn is_ancestor_of(self, other: Self) -> bool {
        self.root == other.root
            && self.depth < other.depth
            && other.x >> (other.depth - self.depth) == self.x
            && other.y >> (other.depth - self.depth) == self.y
    }

    /// The horizontal size of the node in world units.
    pub fn size(self, patch_size: f32) -> f32 {
        patch_size / Self::node_count(self.depth) as f32
    }

    /// The horizontal world extent of the node.
    pub fn extent(self, patch_size: f32) -> Rect {
        let size = self.size(patch_size);
        let root = self.root.extent(patch_size);
        let minimum = root.min + UVec2::new(self.x, self.y).as_vec2() * size;

        Rect::from_corners(minimum, minimum + Vec2::splat(size))
    }

    /// The file path used to persist data of this node.
    pub fn path_in(self, folder: &Path, extension: &str) -> PathBuf {
        folder.join(format!("{self}.{extension}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parent_child_relation() {
        let node = NodeCoordinate::new(GridPoint2::new(-1, 2), 3, 5, 2);

        for (index, child) in node.children().into_iter().enumerate() {
            assert_eq!(child.parent(), Some(node));
            assert_eq!(child.child_index(), index);
            assert!(node.is_ancestor_of(child));
        }

        assert_eq!(NodeCoordinate::root(GridPoint2::ZERO).parent(), None);
    }

    #[test]
    fn path_follows_children() {
        let root = NodeCoordinate::root(GridPoint2::new(3, -3));
        let mut node = root;

        for index in [2, 1, 3, 0] {
            node = node.children()[index];
        }

        assert_eq!(node.path().collect::<Vec<_>>(), vec![2, 1, 3, 0]);
        assert!(root.is_ancestor_of(node));
        assert!(!node.is_ancestor_of(root));
    }

    #[test]
    fn children_tile_parent_extent() {
        let patch_size = 512.0;
        let node = NodeCoordinate::new(GridPoint2::new(1, 0), 2, 1, 3);
        let extent = node.extent(patch_size);

        let union = node
            .children()
            .iter()
            .map(|child| child.extent(patch_size))
            .reduce(|a, b| a.union(b))
            .unwrap();

        assert_eq!(union, extent);
        assert_eq!(extent.width(), 128.0);

        for child in node.children() {
            assert_eq!(child.extent(patch_size).width(), extent.width() / 2.0);
        }
    }

    #[test]
    fn display_names_file() {
        let node = NodeCoordinate::new(GridPoint2::new(-2, 5), 1, 1, 0);

        assert_eq!(node.to_string(), "-2_5_1_1_0");
        assert_eq!(
            node.path_in(Path::new("cache"), "tpc"),
            Path::new("cache").join("-2_5_1_1_0.tpc")
        );
    }
}

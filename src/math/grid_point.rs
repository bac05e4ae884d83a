use bevy::math::{IVec2, Rect, Vec2};
use derive_more::derive::Display;
use itertools::iproduct;
use serde::{Deserialize, Serialize};

/// The integer address of a root cell of the infinite terrain grid.
///
/// The cell of a grid point is centered at `grid_point * patch_size` and spans one patch in
/// both horizontal directions.
/// Two distinct grid points always address two distinct, non overlapping cells.
#[derive(
    Copy,
    Clone,
    Default,
    Debug,
    Display,
    Hash,
    Eq,
    PartialEq,
    Ord,
    PartialOrd,
    Serialize,
    Deserialize,
)]
#[display("{x}_{y}")]
pub struct GridPoint2 {
    /// The cell index along the world x axis.
    pub x: i32,
    /// The cell index along the world z axis.
    pub y: i32,
}

impl GridPoint2 {
    pub const ZERO: Self = Self::new(0, 0);

    pub const fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }

    /// Returns the grid point whose cell contains the horizontal position.
    ///
    /// Cells are half open, positions on the shared edge of two cells belong to the cell
    /// with the larger index.
    pub fn from_position(position: Vec2, cell_size: f32) -> Self {
        let cell = (position / cell_size + 0.5).floor();

        Self::new(cell.x as i32, cell.y as i32)
    }

    /// The horizontal world position of the cell center.
    pub fn center(self, cell_size: f32) -> Vec2 {
        self.as_ivec2().as_vec2() * cell_size
    }

    /// The horizontal world extent covered by the cell.
    pub fn extent(self, cell_size: f32) -> Rect {
        Rect::from_center_size(self.center(cell_size), Vec2::splat(cell_size))
    }

    pub fn as_ivec2(self) -> IVec2 {
        IVec2::new(self.x, self.y)
    }

    /// The chessboard distance between two grid points, measured in cells.
    pub fn chebyshev_distance(self, other: Self) -> u32 {
        let delta = (self.as_ivec2() - other.as_ivec2()).abs();

        delta.x.max(delta.y) as u32
    }

    /// Iterates over the square neighbourhood of `(2 * radius + 1)^2` grid points around `self`.
    pub fn neighbourhood(self, radius: u32) -> impl Iterator<Item = Self> {
        let radius = radius as i32;

        iproduct!(-radius..=radius, -radius..=radius)
            .map(move |(y, x)| Self::new(self.x + x, self.y + y))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bevy::utils::HashSet;

    #[test]
    fn cells_do_not_overlap() {
        let cell_size = 256.0;
        let points: Vec<_> = GridPoint2::ZERO.neighbourhood(3).collect();
        let unique: HashSet<_> = points.iter().copied().collect();

        assert_eq!(points.len(), 49);
        assert_eq!(unique.len(), points.len());

        for (a, b) in iproduct!(&points, &points) {
            if a != b {
                let overlap = a.extent(cell_size).intersect(b.extent(cell_size));
                assert!(overlap.width() <= 0.0 || overlap.height() <= 0.0);
            }
        }
    }

    #[test]
    fn position_round_trip() {
        let cell_size = 100.0;

        for point in GridPoint2::new(-4, 7).neighbourhood(5) {
            let center = point.center(cell_size);
            assert_eq!(GridPoint2::from_position(center, cell_size), point);
            assert_eq!(
                GridPoint2::from_position(center + Vec2::splat(49.0), cell_size),
                point
            );
            assert_eq!(
                GridPoint2::from_position(center - Vec2::splat(50.0), cell_size),
                point
            );
        }
    }

    #[test]
    fn chebyshev_distance() {
        let a = GridPoint2::new(-2, 3);

        assert_eq!(a.chebyshev_distance(a), 0);
        assert_eq!(a.chebyshev_distance(GridPoint2::new(1, 2)), 3);
        assert!(a
            .neighbourhood(2)
            .all(|point| point.chebyshev_distance(a) <= 2));
    }
}

use crate::terrain_data::TerrainBorders;
use bytemuck::{Pod, Zeroable};
use itertools::iproduct;

/// A vertex of the shared terrain plane.
///
/// The border bits mark edge vertices, that the vertex shader collapses onto their
/// neighbours when the adjacent patch is coarser, which removes the cracks along the seam.
#[repr(C)]
#[derive(Copy, Clone, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct TerrainVertex {
    /// The position inside the unit patch, in the range `[-0.5, 0.5]`.
    pub position: [f32; 2],
    /// The [`TerrainBorders`] bits this vertex reacts to.
    pub borders: u32,
}

/// The grid mesh shared by every patch, scaled and offset per patch in the vertex shader.
#[derive(Clone, Debug)]
pub struct TerrainPlane {
    pub resolution: u32,
    pub vertices: Vec<TerrainVertex>,
    pub indices: Vec<u32>,
}

/// Which stitching levels move the vertex at `index` along an edge.
///
/// With a depth difference of one, every odd vertex collapses, with a difference of two
/// every vertex that is not a multiple of four.
fn edge_borders(
    index: u32,
    level_one: TerrainBorders,
    level_two: TerrainBorders,
) -> TerrainBorders {
    let mut borders = TerrainBorders::empty();

    if index % 2 == 1 {
        borders |= level_one;
    }
    if index % 4 != 0 {
        borders |= level_two;
    }

    borders
}

/// Generates a `resolution x resolution` grid of vertices with two triangles per quad.
pub fn generate_terrain_plane(resolution: u32) -> TerrainPlane {
    debug_assert!(resolution >= 2);

    let last = resolution - 1;

    let vertices = iproduct!(0..resolution, 0..resolution)
        .map(|(y, x)| {
            let mut borders = TerrainBorders::empty();

            if x == 0 {
                borders |= edge_borders(y, TerrainBorders::LEFT_1, TerrainBorders::LEFT_2);
            }
            if x == last {
                borders |= edge_borders(y, TerrainBorders::RIGHT_1, TerrainBorders::RIGHT_2);
            }
            if y == 0 {
                borders |= edge_borders(x, TerrainBorders::DOWN_1, TerrainBorders::DOWN_2);
            }
            if y == last {
                borders |= edge_borders(x, TerrainBorders::UP_1, TerrainBorders::UP_2);
            }

            TerrainVertex {
                position: [x as f32 / last as f32 - 0.5, y as f32 / last as f32 - 0.5],
                borders: borders.bits(),
            }
        })
        .collect();

    let indices = iproduct!(0..last, 0..last)
        .flat_map(|(y, x)| {
            let bottom_left = y * resolution + x;
            let bottom_right = bottom_left + 1;
            let top_left = bottom_left + resolution;
            let top_right = top_left + 1;

            [
                bottom_left,
                top_left,
                bottom_right,
                bottom_right,
                top_left,
                top_right,
            ]
        })
        .collect();

    TerrainPlane {
        resolution,
        vertices,
        indices,
    }
}

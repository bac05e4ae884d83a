//! Integer addressing of the terrain grid and its quadtree nodes.

mod grid_point;
mod node;

pub use crate::math::{grid_point::GridPoint2, node::NodeCoordinate};

use bevy::math::{Vec2, Vec3};

/// Projects a world position onto the horizontal terrain plane (x, z).
#[inline]
pub fn horizontal(position: Vec3) -> Vec2 {
    Vec2::new(position.x, position.z)
}

/// The inverse of a linear interpolation, returns `t` so that `mix(a, b, t) == value`.
#[inline]
pub fn inverse_mix(a: f32, b: f32, value: f32) -> f32 {
    f32::clamp((value - a) / (b - a), 0.0, 1.0)
}

/// Hermite smoothing between two edges, as used by the material bands.
#[inline]
pub fn smoothstep(edge0: f32, edge1: f32, value: f32) -> f32 {
    let t = inverse_mix(edge0, edge1, value);
    t * t * (3.0 - 2.0 * t)
}

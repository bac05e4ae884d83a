use bevy::{
    math::{Vec3, Vec4},
    prelude::*,
    render::primitives::{Frustum, HalfSpace},
};

/// Marks the entity the terrain is streamed and refined around.
///
/// Its [`Frustum`] is also used to cull the patches for the main view.
/// Only the first viewer is considered.
#[derive(Component, Clone, Copy, Debug, Default)]
pub struct TerrainViewer;

/// Marks the entity whose [`Frustum`] is used to cull the patches for the shadow pass.
#[derive(Component, Clone, Copy, Debug, Default)]
pub struct TerrainShadowViewer;

/// Expresses a world space frustum relative to the terrain world center.
pub fn relative_frustum(frustum: &Frustum, world_center: Vec3) -> Frustum {
    Frustum {
        half_spaces: frustum.half_spaces.map(|half_space| {
            let normal = Vec3::from(half_space.normal());
            let d = half_space.d() + normal.dot(world_center);

            HalfSpace::new(Vec4::new(normal.x, normal.y, normal.z, d))
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bevy::render::primitives::Aabb;
    use bevy::math::Affine3A;

    #[test]
    fn relative_frustum_follows_the_world_center() {
        // everything with x >= 100 in world space
        let half_space = HalfSpace::new(Vec4::new(1.0, 0.0, 0.0, -100.0));
        let frustum = Frustum {
            half_spaces: [half_space; 6],
        };

        let relative = relative_frustum(&frustum, Vec3::new(100.0, 0.0, 0.0));
        let aabb = Aabb::from_min_max(Vec3::new(-10.0, 0.0, 0.0), Vec3::new(-5.0, 1.0, 1.0));

        assert!(!frustum.intersects_obb(&aabb, &Affine3A::IDENTITY, true, true));
        assert!(!relative.intersects_obb(&aabb, &Affine3A::IDENTITY, true, true));

        let aabb = Aabb::from_min_max(Vec3::new(1.0, 0.0, 0.0), Vec3::new(5.0, 1.0, 1.0));
        assert!(relative.intersects_obb(&aabb, &Affine3A::IDENTITY, true, true));
        assert!(!frustum.intersects_obb(&aabb, &Affine3A::IDENTITY, true, true));
    }
}

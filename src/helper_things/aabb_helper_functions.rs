use nalgebra_glm::{TMat4, TVec3, vec3};
use crate::world::bounding_volumes::aabb::StaticAABB;

/// Extracts the translation part of an affine instance transform
///
/// `transform` - the local-to-component transform of an instance
pub fn transform_origin(transform: &TMat4<f32>) -> TVec3<f32>
{
    vec3(transform[(0, 3)], transform[(1, 3)], transform[(2, 3)])
}

/// Distances from the nearest and farthest point of a bounding volume to a pair of view origins.
/// The pair exists so that two temporal LOD origins can be checked at once
#[derive(Copy, Clone, Debug)]
pub struct ViewDistances
{
    pub near: f32,
    pub far: f32,
}

/// Computes a conservative nearest and farthest distance from the bounding sphere around the given
/// volume to either view origin
///
/// `aabb` - the bounding volume to measure
/// `origin_zero` - the first temporal view origin
/// `origin_one` - the second temporal view origin
pub fn distances_to_view_origins(aabb: &StaticAABB, origin_zero: &TVec3<f32>, origin_one: &TVec3<f32>) -> ViewDistances
{
    let centre = aabb.centre();
    let distance_zero = nalgebra_glm::distance(&centre, origin_zero);
    let distance_one = nalgebra_glm::distance(&centre, origin_one);
    let half_width = aabb.diagonal_length() * 0.5;

    ViewDistances
    {
        near: distance_zero.min(distance_one) - half_width,
        far: distance_zero.max(distance_one) + half_width
    }
}

/// Determines closest distance between the given point and any point on the bounding volume
///
/// `aabb` - the bounding volume to find the distance to
/// `target_pos` - the point to use to find the distance to any point on the bounding volume
pub fn distance_to_aabb(aabb: &StaticAABB, target_pos: &TVec3<f32>) -> f32
{
    let clamped = vec3
        (
            target_pos.x.max(aabb.x_range.min).min(aabb.x_range.max),
            target_pos.y.max(aabb.y_range.min).min(aabb.y_range.max),
            target_pos.z.max(aabb.z_range.min).min(aabb.z_range.max)
        );

    nalgebra_glm::distance(&clamped, target_pos)
}

#[cfg(test)]
mod tests
{
    use super::*;
    use float_cmp::approx_eq;

    #[test]
    fn view_distances_cover_both_origins()
    {
        let aabb = StaticAABB::from_corners(vec3(-1.0, -1.0, -1.0), vec3(1.0, 1.0, 1.0));
        let distances = distances_to_view_origins(&aabb, &vec3(10.0, 0.0, 0.0), &vec3(20.0, 0.0, 0.0));
        let half_width = 3.0_f32.sqrt();

        assert!(approx_eq!(f32, distances.near, 10.0 - half_width, epsilon = 0.0001));
        assert!(approx_eq!(f32, distances.far, 20.0 + half_width, epsilon = 0.0001));
    }

    #[test]
    fn distance_to_aabb_is_zero_inside()
    {
        let aabb = StaticAABB::from_corners(vec3(0.0, 0.0, 0.0), vec3(4.0, 4.0, 4.0));

        assert!(approx_eq!(f32, distance_to_aabb(&aabb, &vec3(2.0, 2.0, 2.0)), 0.0, ulps = 2));
        assert!(approx_eq!(f32, distance_to_aabb(&aabb, &vec3(7.0, 2.0, 2.0)), 3.0, ulps = 2));
    }

    #[test]
    fn origin_is_the_translation_column()
    {
        let transform = nalgebra_glm::translation(&vec3(3.0, -4.0, 5.0));
        assert_eq!(transform_origin(&transform), vec3(3.0, -4.0, 5.0));
    }
}

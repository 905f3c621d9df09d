use nalgebra_glm::{TMat4, TVec3, vec3, vec4};
use serde::{Serialize, Deserialize};
use crate::world::dimension::range::{XRange, YRange, ZRange};

/// Represents an axis aligned bounding volume in a 3D space
#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StaticAABB
{
    pub x_range: XRange,
    pub y_range: YRange,
    pub z_range: ZRange
}

impl StaticAABB
{
    /// Creates a new AABB that occupies the given ranges
    ///
    /// `x_range` - the space the bounding volume takes in the x dimension
    /// `y_range` - the space the bounding volume takes in the y dimension
    /// `z_range` - the space the bounding volume takes in the z dimension
    pub fn new(x_range: XRange, y_range: YRange, z_range: ZRange) -> StaticAABB
    {
        StaticAABB{ x_range, y_range, z_range }
    }

    /// Creates a new AABB spanning the two corner points
    ///
    /// `min` - the corner with the smallest coordinates
    /// `max` - the corner with the largest coordinates
    pub fn from_corners(min: TVec3<f32>, max: TVec3<f32>) -> StaticAABB
    {
        StaticAABB::new
            (
                XRange::new(min.x, max.x),
                YRange::new(min.y, max.y),
                ZRange::new(min.z, max.z)
            )
    }

    /// Creates a volume that holds nothing; merging anything into it yields that other thing
    pub fn empty() -> StaticAABB
    {
        StaticAABB::new(XRange::empty(), YRange::empty(), ZRange::empty())
    }

    /// Checks if the volume holds at least one point
    pub fn is_valid(&self) -> bool
    {
        self.x_range.is_valid() && self.y_range.is_valid() && self.z_range.is_valid()
    }

    /// Merges two AABBs to form one that could hold of the given AABB
    ///
    /// `other_aabb` - the AABB to merge with this one
    pub fn combine_aabb(&self, other_aabb: &StaticAABB) -> StaticAABB
    {
        StaticAABB::new
            (
                self.x_range.combine(&other_aabb.x_range),
                self.y_range.combine(&other_aabb.y_range),
                self.z_range.combine(&other_aabb.z_range)
            )
    }

    /// Grows the volume so that it holds the given point
    ///
    /// `point` - the point that must lie within the volume afterwards
    pub fn include_point(&mut self, point: &TVec3<f32>)
    {
        self.x_range.include(point.x);
        self.y_range.include(point.y);
        self.z_range.include(point.z);
    }

    pub fn bound_min(&self) -> TVec3<f32>
    {
        vec3(self.x_range.min, self.y_range.min, self.z_range.min)
    }

    pub fn bound_max(&self) -> TVec3<f32>
    {
        vec3(self.x_range.max, self.y_range.max, self.z_range.max)
    }

    /// Get the centre of the bounding volume
    pub fn centre(&self) -> TVec3<f32>
    {
        vec3
            (
                self.x_range.centre(),
                self.y_range.centre(),
                self.z_range.centre()
            )
    }

    /// Get half of the length of the volume in each dimension
    pub fn half_extent(&self) -> TVec3<f32>
    {
        vec3
            (
                self.x_range.length() * 0.5,
                self.y_range.length() * 0.5,
                self.z_range.length() * 0.5
            )
    }

    /// Length of the diagonal between the two corners of the volume
    pub fn diagonal_length(&self) -> f32
    {
        nalgebra_glm::distance(&self.bound_min(), &self.bound_max())
    }

    /// Check if the other AABB overlaps with this bounding volume
    ///
    /// `other_aabb` - the volume to check for an overlap with this one
    pub fn intersect(&self, other_aabb: &StaticAABB) -> bool
    {
        self.x_range.overlap_range(&other_aabb.x_range) &&
            self.y_range.overlap_range(&other_aabb.y_range) &&
            self.z_range.overlap_range(&other_aabb.z_range)
    }

    /// Check if the other AABB lies entirely within this bounding volume
    ///
    /// `other_aabb` - the volume that may be enclosed by this one
    pub fn contains_aabb(&self, other_aabb: &StaticAABB) -> bool
    {
        self.x_range.contains_range(&other_aabb.x_range) &&
            self.y_range.contains_range(&other_aabb.y_range) &&
            self.z_range.contains_range(&other_aabb.z_range)
    }

    /// Checks if the point is inside or on the surface of the volume
    ///
    /// `point` - the point to test
    pub fn contains_point(&self, point: &TVec3<f32>) -> bool
    {
        self.x_range.point_within(point.x) &&
            self.y_range.point_within(point.y) &&
            self.z_range.point_within(point.z)
    }

    /// Transform the volume by the transformation matrix. Since the vertices may no longer be axis aligned,
    /// a new AABB that is, and can hold all eight transformed corners, is returned
    ///
    /// `transformation` - the transformation to apply to this AABB
    pub fn apply_transformation(&self, transformation: &TMat4<f32>) -> StaticAABB
    {
        let mut transformed = StaticAABB::empty();

        for corner in &self.get_aabb_points()
        {
            let moved = transformation * vec4(corner.x, corner.y, corner.z, 1.0);
            transformed.include_point(&vec3(moved.x, moved.y, moved.z));
        }

        transformed
    }

    /// Get a default AABB centred at the origin, and has no length
    pub fn point_aabb() -> StaticAABB
    {
        StaticAABB::new
            (
                XRange::new(0.0, 0.0),
                YRange::new(0.0, 0.0),
                ZRange::new(0.0, 0.0),
            )
    }

    /// Get the points that make up this AABB
    pub fn get_aabb_points(&self) -> [TVec3<f32>; 8]
    {
        [
            vec3(self.x_range.min, self.y_range.min, self.z_range.min),
            vec3(self.x_range.min, self.y_range.min, self.z_range.max),
            vec3(self.x_range.min, self.y_range.max, self.z_range.min),
            vec3(self.x_range.min, self.y_range.max, self.z_range.max),
            vec3(self.x_range.max, self.y_range.min, self.z_range.min),
            vec3(self.x_range.max, self.y_range.min, self.z_range.max),
            vec3(self.x_range.max, self.y_range.max, self.z_range.min),
            vec3(self.x_range.max, self.y_range.max, self.z_range.max)
        ]
    }
}

use nalgebra_glm::{TMat4, TVec3, TVec4, vec4};
use crate::culling::traits::{Containment, TraversalDecider};
use crate::world::bounding_volumes::aabb::StaticAABB;

/// Represents the planes of a frustum, in the order they are extracted from a view projection matrix
enum FrustumPlane
{
    Left = 0, // Indices used to index into an array of vectors representing plane normals
    Right,
    Bottom,
    Top,
    Near,
    Far
}

/// A convex volume bounded by planes. Each plane is stored as (normal, distance) with the normal
/// pointing inwards, so a point is inside a plane when `dot(normal, point) + distance >= 0`
#[derive(Clone, Debug, PartialEq)]
pub struct ConvexVolume
{
    planes: Vec<TVec4<f32>>,
}

fn normalize_plane(plane: TVec4<f32>) -> TVec4<f32>
{
    let length = nalgebra_glm::length(&nalgebra_glm::vec4_to_vec3(&plane));

    if length > 0.0
    {
        plane / length
    }
    else
    {
        plane
    }
}

impl TraversalDecider for ConvexVolume
{
    fn classify_aabb(&self, aabb: &StaticAABB) -> Containment
    {
        self.classify(aabb)
    }
}

impl ConvexVolume
{
    /// Creates the six frustum planes of a camera
    ///
    /// `view_projection_matrix` - the projection * view matrix of the camera
    pub fn new(view_projection_matrix: &TMat4<f32>) -> ConvexVolume
    {
        let transposed = nalgebra_glm::transpose(view_projection_matrix);

        let column = |x: usize| -> TVec4<f32> { transposed.column(x).into_owned() };

        let mut planes = vec![vec4(0.0, 0.0, 0.0, 0.0); 6];
        planes[FrustumPlane::Left as usize] = normalize_plane(column(3) + column(0));
        planes[FrustumPlane::Right as usize] = normalize_plane(column(3) - column(0));
        planes[FrustumPlane::Bottom as usize] = normalize_plane(column(3) + column(1));
        planes[FrustumPlane::Top as usize] = normalize_plane(column(3) - column(1));
        planes[FrustumPlane::Near as usize] = normalize_plane(column(3) + column(2));
        planes[FrustumPlane::Far as usize] = normalize_plane(column(3) - column(2));

        ConvexVolume{ planes }
    }

    /// Creates a volume from explicit planes. The planes are normalized
    ///
    /// `planes` - inward facing (normal, distance) planes
    pub fn from_planes(planes: Vec<TVec4<f32>>) -> ConvexVolume
    {
        ConvexVolume{ planes: planes.into_iter().map(normalize_plane).collect() }
    }

    /// Creates a volume whose inside is exactly the given box
    ///
    /// `aabb` - the box to enclose
    pub fn enclosing_aabb(aabb: &StaticAABB) -> ConvexVolume
    {
        ConvexVolume
        {
            planes: vec!
            [
                vec4(1.0, 0.0, 0.0, -aabb.x_range.min),
                vec4(-1.0, 0.0, 0.0, aabb.x_range.max),
                vec4(0.0, 1.0, 0.0, -aabb.y_range.min),
                vec4(0.0, -1.0, 0.0, aabb.y_range.max),
                vec4(0.0, 0.0, 1.0, -aabb.z_range.min),
                vec4(0.0, 0.0, -1.0, aabb.z_range.max),
            ]
        }
    }

    /// Moves the planes into the local space of an instance set, so that cluster bounds can be
    /// tested without transforming them
    ///
    /// `local_to_world` - the transform of the instance set
    pub fn to_local_space(&self, local_to_world: &TMat4<f32>) -> ConvexVolume
    {
        let transposed = nalgebra_glm::transpose(local_to_world);

        ConvexVolume{ planes: self.planes.iter().map(|x| normalize_plane(transposed * x)).collect() }
    }

    pub fn planes(&self) -> &[TVec4<f32>]
    {
        &self.planes
    }

    pub fn contains_point(&self, point: &TVec3<f32>) -> bool
    {
        self.planes.iter().all(|x| x.x * point.x + x.y * point.y + x.z * point.z + x.w >= 0.0)
    }

    /// Classifies the given box against every plane. The box is pushed out along each plane normal
    /// by its projected half extent, so a box is only outside if it is fully behind one plane
    ///
    /// `aabb` - the bounding volume to check
    pub fn classify(&self, aabb: &StaticAABB) -> Containment
    {
        let centre = aabb.centre();
        let half_extent = aabb.half_extent();
        let mut fully_inside = true;

        for plane in &self.planes
        {
            let distance = plane.x * centre.x + plane.y * centre.y + plane.z * centre.z + plane.w;
            let push_out = plane.x.abs() * half_extent.x + plane.y.abs() * half_extent.y + plane.z.abs() * half_extent.z;

            if distance < -push_out
            {
                return Containment::Outside;
            }

            if distance < push_out
            {
                fully_inside = false;
            }
        }

        if fully_inside
        {
            Containment::Inside
        }
        else
        {
            Containment::Intersecting
        }
    }
}

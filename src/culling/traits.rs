use crate::world::bounding_volumes::aabb::StaticAABB;

/// How much of a bounding volume lies inside a culling volume
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Containment
{
    Outside,
    Intersecting,
    Inside,
}

/// Traits used to determine which AABBs contain instances that should be rendered.
pub trait TraversalDecider
{
    fn classify_aabb(&self, aabb: &StaticAABB) -> Containment;

    fn aabb_in_view(&self, aabb: &StaticAABB) -> bool
    {
        self.classify_aabb(aabb) != Containment::Outside
    }
}

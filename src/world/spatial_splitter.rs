use nalgebra_glm::TVec3;
use serde::{Serialize, Deserialize};
use crate::world::bounding_volumes::aabb::StaticAABB;

/// A contiguous slice of a sort index that forms one spatial group
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterRun
{
    pub start: usize,
    pub count: usize,
}

impl ClusterRun
{
    /// Index one past the last entry of the group
    pub fn end(&self) -> usize
    {
        self.start + self.count
    }
}

/// Reorders `sort_index` in place so that each returned run of at most `branching_factor` entries
/// holds points that are close to each other. Runs are returned in sort index order and cover the
/// whole index array without gaps.
///
/// Each step bisects the current range at the median of its axis of greatest extent. For odd
/// counts the middle point joins whichever neighbour it is closer to.
///
/// `sort_index` - indexes into `points`; reordered in place
/// `points` - the positions being grouped
/// `branching_factor` - the maximum number of entries per group
pub fn split(sort_index: &mut [usize], points: &[TVec3<f32>], branching_factor: usize) -> Vec<ClusterRun>
{
    let mut clusters = Vec::new();

    if sort_index.is_empty()
    {
        return clusters;
    }

    split_range(sort_index, 0, points, branching_factor.max(1), &mut clusters);

    debug_assert_eq!(clusters.first().map(|x| x.start), Some(0));
    debug_assert!(clusters.windows(2).all(|x| x[0].end() == x[1].start), "Spatial groups are not contiguous");
    debug_assert_eq!(clusters.last().map(|x| x.end()), Some(sort_index.len()));

    clusters
}

fn split_range(sort_index: &mut [usize], offset: usize, points: &[TVec3<f32>], branching_factor: usize, clusters: &mut Vec<ClusterRun>)
{
    let number_in_range = sort_index.len();

    if number_in_range <= branching_factor
    {
        clusters.push(ClusterRun{ start: offset, count: number_in_range });
        return;
    }

    let mut range_bounds = StaticAABB::empty();
    for x in sort_index.iter()
    {
        range_bounds.include_point(&points[*x]);
    }

    let axis_lengths = [range_bounds.x_range.length(), range_bounds.y_range.length(), range_bounds.z_range.length()];

    // Ties keep the earlier axis
    let mut best_axis = 0;
    for axis in 1..3
    {
        if axis_lengths[axis] > axis_lengths[best_axis]
        {
            best_axis = axis;
        }
    }

    sort_index.sort_by(|a, b| points[*a][best_axis].total_cmp(&points[*b][best_axis]));

    let half = number_in_range / 2;
    let mut left_count = half;

    if number_in_range % 2 == 1
    {
        let coordinate = |index: usize| points[sort_index[index]][best_axis];

        if coordinate(half) - coordinate(half - 1) < coordinate(half + 1) - coordinate(half)
        {
            left_count += 1;
        }
    }

    let (left, right) = sort_index.split_at_mut(left_count);
    split_range(left, offset, points, branching_factor, clusters);
    split_range(right, offset + left_count, points, branching_factor, clusters);
}

#[cfg(test)]
mod tests
{
    use super::*;
    use nalgebra_glm::vec3;
    use rand::{Rng, SeedableRng};
    use rand::rngs::StdRng;

    fn scattered_points(count: usize) -> Vec<TVec3<f32>>
    {
        let mut rng = StdRng::seed_from_u64(0x238946);
        (0..count).map(|_| vec3(rng.gen_range(0.0..1000.0), rng.gen_range(0.0..1000.0), 0.0)).collect()
    }

    #[test]
    fn groups_never_exceed_branching_factor()
    {
        let points = scattered_points(1000);
        let mut sort_index = (0..points.len()).collect::<Vec<usize>>();

        let clusters = split(&mut sort_index, &points, 16);

        assert!(clusters.iter().all(|x| x.count >= 1 && x.count <= 16));
        assert_eq!(clusters.iter().map(|x| x.count).sum::<usize>(), 1000);

        let mut seen = sort_index.clone();
        seen.sort_unstable();
        assert_eq!(seen, (0..1000).collect::<Vec<usize>>());
    }

    #[test]
    fn splits_along_longest_axis()
    {
        let points = vec!
        [
            vec3(0.0, 0.0, 0.0),
            vec3(0.0, 0.0, 30.0),
            vec3(0.0, 1.0, 10.0),
            vec3(0.0, 1.0, 20.0),
        ];
        let mut sort_index = vec![0, 1, 2, 3];

        let clusters = split(&mut sort_index, &points, 2);

        assert_eq!(clusters, vec![ClusterRun{ start: 0, count: 2 }, ClusterRun{ start: 2, count: 2 }]);
        assert_eq!(sort_index, vec![0, 2, 3, 1]);
    }

    #[test]
    fn odd_middle_joins_closer_side()
    {
        let points = vec![vec3(0.0, 0.0, 0.0), vec3(1.0, 0.0, 0.0), vec3(9.0, 0.0, 0.0)];
        let mut sort_index = vec![2, 1, 0];

        let clusters = split(&mut sort_index, &points, 2);

        assert_eq!(clusters, vec![ClusterRun{ start: 0, count: 2 }, ClusterRun{ start: 2, count: 1 }]);
        assert_eq!(sort_index, vec![0, 1, 2]);
    }

    #[test]
    fn identical_input_gives_identical_groups()
    {
        let points = scattered_points(300);
        let mut first = (0..points.len()).collect::<Vec<usize>>();
        let mut second = first.clone();

        assert_eq!(split(&mut first, &points, 7), split(&mut second, &points, 7));
        assert_eq!(first, second);
    }

    #[test]
    fn empty_input_has_no_groups()
    {
        let mut sort_index: Vec<usize> = Vec::new();
        assert!(split(&mut sort_index, &[], 16).is_empty());
    }
}

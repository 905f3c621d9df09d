use std::time::Instant;
use nalgebra_glm::{TMat4, TVec3};
use tracing::{debug, trace};
use crate::flows::shared_constants::ClusterConfig;
use crate::helper_things::aabb_helper_functions::transform_origin;
use crate::world::bounding_volumes::aabb::StaticAABB;
use crate::world::cluster_tree::{ClusterNode, ClusterTree, NodeRange};
use crate::world::spatial_splitter::split;

/// Node used while levels are still being stacked on top of each other. Child ranges and instance
/// ranges are rewritten every time a new level is added, so they are kept as plain indexes here
#[derive(Copy, Clone, Debug)]
struct BuildNode
{
    bounds: StaticAABB,
    children: Option<(usize, usize)>,
    first_instance: usize,
    last_instance: usize,
}

/// Snapshot of everything needed to build a tree. Owning its inputs lets a build move onto a
/// worker thread while the instance set keeps changing on the owning thread
#[derive(Clone, Debug)]
pub struct ClusterBuilder
{
    transforms: Vec<TMat4<f32>>,
    mesh_bounds: StaticAABB,
    instances_per_leaf: usize,
    split_factor: usize,
    occlusion_layer_target: usize,
    sort_index: Vec<usize>,
}

impl ClusterBuilder
{
    /// Captures the build inputs and picks the occlusion layer target for the number of instances
    /// that will take part in the build
    ///
    /// `transforms` - local to component transform of every instance
    /// `mesh_bounds` - local bounds of the mesh shared by all instances
    /// `instances_per_leaf` - the maximum number of instances in a leaf
    /// `exclusion_mask` - instances whose entry is true are skipped; may be shorter than `transforms`
    /// `config` - source of the internal branching factor and occlusion layer tunables
    pub fn new(transforms: Vec<TMat4<f32>>, mesh_bounds: StaticAABB, instances_per_leaf: usize, exclusion_mask: &[bool], config: &ClusterConfig) -> ClusterBuilder
    {
        let sort_index = (0..transforms.len())
            .filter(|x| !exclusion_mask.get(*x).copied().unwrap_or(false))
            .collect::<Vec<usize>>();

        let mut occlusion_layer_target = config.max_occlusion_queries_per_component;
        let min_instances_per_query = config.min_instances_per_occlusion_query.max(1);

        if sort_index.len() / min_instances_per_query < occlusion_layer_target
        {
            occlusion_layer_target = sort_index.len() / min_instances_per_query;

            if occlusion_layer_target < config.min_occlusion_queries_per_component
            {
                occlusion_layer_target = 0;
            }
        }

        ClusterBuilder
        {
            transforms,
            mesh_bounds,
            instances_per_leaf: instances_per_leaf.max(1),
            split_factor: config.split_factor.max(2),
            occlusion_layer_target,
            sort_index,
        }
    }

    /// Number of instances that survive the exclusion mask
    pub fn included_instance_count(&self) -> usize
    {
        self.sort_index.len()
    }

    /// Number of transforms captured, including excluded ones
    pub fn original_instance_count(&self) -> usize
    {
        self.transforms.len()
    }

    /// Shrinks a branching factor so that the level being built has about as many nodes as the
    /// occlusion layer wants. Returns the factor to use and whether this level is the occlusion layer
    fn branching_factor_for_level(natural_factor: usize, group_count: usize, occlusion_layer_target: &mut usize) -> (usize, bool)
    {
        let target = *occlusion_layer_target;

        if natural_factor > 2 && target > 0 && group_count / natural_factor <= target
        {
            *occlusion_layer_target = 0;
            (((group_count + target - 1) / target).max(2), true)
        }
        else
        {
            (natural_factor, false)
        }
    }

    /// Runs the build to completion, consuming the snapshot
    pub fn build(mut self) -> ClusterTree
    {
        let original_count = self.transforms.len();

        if self.sort_index.is_empty() || !self.mesh_bounds.is_valid()
        {
            debug!("Cluster build of {} instances produced an empty tree", original_count);
            return ClusterTree::empty(original_count);
        }

        let build_start = Instant::now();
        let instance_count = self.sort_index.len();
        let mut occlusion_layer_num_nodes = 0;

        let (leaf_factor, leaf_is_occlusion_layer) = Self::branching_factor_for_level(self.instances_per_leaf, instance_count, &mut self.occlusion_layer_target);

        let origins = self.transforms.iter().map(transform_origin).collect::<Vec<TVec3<f32>>>();
        let leaf_clusters = split(&mut self.sort_index, &origins, leaf_factor);

        if leaf_is_occlusion_layer
        {
            occlusion_layer_num_nodes = leaf_clusters.len();
        }

        let mut sorted_instances = self.sort_index.clone();

        let mut nodes = leaf_clusters.iter().map(|cluster|
            {
                let bounds = sorted_instances[cluster.start..cluster.end()].iter()
                    .fold(StaticAABB::empty(), |bounds, x| bounds.combine_aabb(&self.mesh_bounds.apply_transformation(&self.transforms[*x])));

                BuildNode{ bounds, children: None, first_instance: cluster.start, last_instance: cluster.end() - 1 }
            }).collect::<Vec<BuildNode>>();

        let mut num_roots = nodes.len();
        let mut nodes_per_level = vec![num_roots];

        trace!("Cluster build placed {} instances into {} leaves", instance_count, num_roots);

        while num_roots > 1
        {
            let mut root_order = (0..num_roots).collect::<Vec<usize>>();
            let root_centres = nodes[..num_roots].iter().map(|x| x.bounds.centre()).collect::<Vec<TVec3<f32>>>();

            let (level_factor, level_is_occlusion_layer) = Self::branching_factor_for_level(self.split_factor, num_roots, &mut self.occlusion_layer_target);
            let clusters = split(&mut root_order, &root_centres, level_factor);

            if level_is_occlusion_layer
            {
                occlusion_layer_num_nodes = clusters.len();
            }

            // Move instance blocks so they follow the new root order
            let mut instance_remap = Vec::with_capacity(instance_count);
            for root in &root_order
            {
                instance_remap.extend(nodes[*root].first_instance..=nodes[*root].last_instance);
            }

            let mut inverse_instance_remap = vec![0; instance_count];
            for (new_position, old_position) in instance_remap.iter().enumerate()
            {
                inverse_instance_remap[*old_position] = new_position;
            }

            for node in nodes.iter_mut()
            {
                node.first_instance = inverse_instance_remap[node.first_instance];
                node.last_instance = inverse_instance_remap[node.last_instance];
            }

            sorted_instances = instance_remap.iter().map(|x| sorted_instances[*x]).collect();

            // New parents go first, then every existing level in the new root order
            let new_node_count = nodes.len() + clusters.len();

            let mut level_starts = Vec::with_capacity(nodes_per_level.len());
            level_starts.push(clusters.len());
            for level in 0..nodes_per_level.len() - 1
            {
                level_starts.push(level_starts[level] + nodes_per_level[level]);
            }

            let mut node_remap = vec![0; new_node_count];

            for root in &root_order
            {
                node_remap[level_starts[0]] = *root;
                level_starts[0] += 1;

                let mut level_range = nodes[*root].children;
                let mut level = 1;

                while let Some((left, right)) = level_range
                {
                    let mut next_range: Option<(usize, usize)> = None;

                    for child in left..=right
                    {
                        node_remap[level_starts[level]] = child;
                        level_starts[level] += 1;

                        if let Some((first, last)) = nodes[child].children
                        {
                            next_range = Some(match next_range
                            {
                                Some((next_left, next_right)) => (next_left.min(first), next_right.max(last)),
                                None => (first, last)
                            });
                        }
                    }

                    level_range = next_range;
                    level += 1;
                }
            }

            debug_assert_eq!(level_starts.last().copied(), Some(new_node_count));

            let mut inverse_node_remap = vec![0; nodes.len()];
            for new_index in clusters.len()..new_node_count
            {
                inverse_node_remap[node_remap[new_index]] = new_index;
            }

            for node in nodes.iter_mut()
            {
                if let Some((first, last)) = node.children
                {
                    node.children = Some((inverse_node_remap[first], inverse_node_remap[last]));
                }
            }

            let placeholder = BuildNode{ bounds: StaticAABB::empty(), children: None, first_instance: 0, last_instance: 0 };
            let mut new_nodes = vec![placeholder; clusters.len()];
            new_nodes.extend(node_remap[clusters.len()..].iter().map(|x| nodes[*x]));

            let mut next_child = clusters.len();
            let mut instance_tracker = 0;

            for (parent_index, cluster) in clusters.iter().enumerate()
            {
                let first_child = next_child;
                let last_child = first_child + cluster.count - 1;
                next_child += cluster.count;

                let first_instance = new_nodes[first_child].first_instance;
                let last_instance = new_nodes[last_child].last_instance;

                debug_assert_eq!(first_instance, instance_tracker, "Parent instance ranges are not contiguous");
                instance_tracker = last_instance + 1;

                let bounds = new_nodes[first_child..=last_child].iter()
                    .fold(StaticAABB::empty(), |bounds, x| bounds.combine_aabb(&x.bounds));

                new_nodes[parent_index] = BuildNode{ bounds, children: Some((first_child, last_child)), first_instance, last_instance };
            }

            debug_assert_eq!(instance_tracker, instance_count);

            nodes = new_nodes;
            num_roots = clusters.len();
            nodes_per_level.insert(0, num_roots);
        }

        let mut instance_reorder_table = vec![None; original_count];
        for (sorted_position, original_index) in sorted_instances.iter().enumerate()
        {
            instance_reorder_table[*original_index] = Some(sorted_position as u32);
        }

        let tree = ClusterTree
        {
            nodes: nodes.iter().map(|x| ClusterNode
            {
                bounds: x.bounds,
                children: x.children.map(|(first, last)| NodeRange{ first: first as u32, last: last as u32 }),
                first_instance: x.first_instance as u32,
                last_instance: x.last_instance as u32
            }).collect(),
            sorted_instances: sorted_instances.iter().map(|x| *x as u32).collect(),
            instance_reorder_table,
            occlusion_layer_num_nodes
        };

        debug_assert!(tree.check_invariants(), "Cluster tree build broke its structural invariants");

        debug!("Built cluster tree: {} instances, {} nodes, {} levels, occlusion layer of {} nodes in {:?}",
               instance_count, tree.nodes.len(), nodes_per_level.len(), occlusion_layer_num_nodes, build_start.elapsed());

        tree
    }
}

/// Builds a cluster tree synchronously
///
/// `transforms` - local to component transform of every instance
/// `mesh_bounds` - local bounds of the mesh shared by all instances
/// `instances_per_leaf` - the maximum number of instances in a leaf
/// `exclusion_mask` - optional mask; instances marked true are left out of the tree
/// `config` - tunables for the internal levels and the occlusion layer
pub fn build_tree(transforms: &[TMat4<f32>], mesh_bounds: &StaticAABB, instances_per_leaf: usize, exclusion_mask: Option<&[bool]>, config: &ClusterConfig) -> ClusterTree
{
    ClusterBuilder::new(transforms.to_vec(), *mesh_bounds, instances_per_leaf, exclusion_mask.unwrap_or(&[]), config).build()
}

#[cfg(test)]
mod tests
{
    use super::*;
    use nalgebra_glm::vec3;
    use rand::{Rng, SeedableRng};
    use rand::rngs::StdRng;

    fn unit_box() -> StaticAABB
    {
        StaticAABB::from_corners(vec3(-1.0, -1.0, -1.0), vec3(1.0, 1.0, 1.0))
    }

    fn scattered_transforms(count: usize, extent: f32, seed: u64) -> Vec<TMat4<f32>>
    {
        let mut rng = StdRng::seed_from_u64(seed);
        (0..count).map(|_| nalgebra_glm::translation(&vec3(rng.gen_range(0.0..extent), rng.gen_range(0.0..extent), 0.0))).collect()
    }

    fn leaf_ranges(tree: &ClusterTree) -> Vec<(u32, u32)>
    {
        let mut ranges = tree.nodes.iter().filter(|x| x.is_leaf()).map(|x| (x.first_instance, x.last_instance)).collect::<Vec<_>>();
        ranges.sort_unstable();
        ranges
    }

    #[test]
    fn leaves_partition_built_instances()
    {
        let transforms = scattered_transforms(777, 500.0, 11);
        let tree = build_tree(&transforms, &unit_box(), 16, None, &ClusterConfig::default());

        let mut expected_first = 0;
        for (first, last) in leaf_ranges(&tree)
        {
            assert_eq!(first, expected_first);
            assert!(last >= first);
            assert!(last - first < 16);
            expected_first = last + 1;
        }

        assert_eq!(expected_first, 777);
        assert!(tree.check_invariants());
    }

    #[test]
    fn node_bounds_contain_their_instances()
    {
        let transforms = scattered_transforms(500, 2000.0, 7);
        let tree = build_tree(&transforms, &unit_box(), 8, None, &ClusterConfig::default());

        for node in &tree.nodes
        {
            for sorted_position in node.instance_range()
            {
                let original = tree.sorted_instances[sorted_position] as usize;
                assert!(node.bounds.contains_point(&transform_origin(&transforms[original])));
                assert!(node.bounds.contains_aabb(&unit_box().apply_transformation(&transforms[original])));
            }
        }
    }

    #[test]
    fn reorder_table_is_inverse_of_sorted_instances()
    {
        let transforms = scattered_transforms(300, 100.0, 3);
        let tree = build_tree(&transforms, &unit_box(), 16, None, &ClusterConfig::default());

        for (sorted_position, original) in tree.sorted_instances.iter().enumerate()
        {
            assert_eq!(tree.instance_reorder_table[*original as usize], Some(sorted_position as u32));
        }
    }

    #[test]
    fn excluded_instances_are_not_built()
    {
        let transforms = scattered_transforms(200, 100.0, 5);
        let mask = (0..200).map(|x| x % 4 == 0).collect::<Vec<bool>>();

        let tree = build_tree(&transforms, &unit_box(), 16, Some(&mask), &ClusterConfig::default());

        assert_eq!(tree.built_instance_count(), 150);
        assert_eq!(tree.original_instance_count(), 200);
        assert!(tree.instance_reorder_table.iter().enumerate().all(|(index, x)| x.is_none() == (index % 4 == 0)));
    }

    #[test]
    fn empty_input_gives_empty_tree()
    {
        let tree = build_tree(&[], &unit_box(), 16, None, &ClusterConfig::default());
        assert_eq!(tree.node_count(), 0);
        assert!(tree.instance_reorder_table.is_empty());

        let all_excluded = build_tree(&scattered_transforms(4, 10.0, 1), &unit_box(), 16, Some(&[true; 4]), &ClusterConfig::default());
        assert_eq!(all_excluded.node_count(), 0);
        assert_eq!(all_excluded.instance_reorder_table, vec![None; 4]);

        let unloaded_mesh = build_tree(&scattered_transforms(4, 10.0, 1), &StaticAABB::empty(), 16, None, &ClusterConfig::default());
        assert!(unloaded_mesh.is_empty());
    }

    #[test]
    fn single_instance_is_single_leaf()
    {
        let tree = build_tree(&[nalgebra_glm::translation(&vec3(5.0, 5.0, 5.0))], &unit_box(), 16, None, &ClusterConfig::default());

        assert_eq!(tree.node_count(), 1);
        assert!(tree.nodes[0].is_leaf());
        assert_eq!(tree.instance_reorder_table, vec![Some(0)]);
    }

    #[test]
    fn thousand_scattered_instances()
    {
        let transforms = scattered_transforms(1000, 10000.0, 0x5eed);
        let tree = build_tree(&transforms, &unit_box(), 16, None, &ClusterConfig::default());

        assert!(tree.node_count() > 0);
        assert_eq!(tree.built_instance_count(), 1000);
        assert_eq!(tree.nodes[0].instance_count(), 1000);
        assert!(tree.actual_instances_per_leaf() <= 16.0);
    }

    #[test]
    fn occlusion_layer_is_recorded_for_large_sets()
    {
        // 4096 instances / 256 per query = 16 queries, so one level is shrunk to about 16 nodes
        let transforms = scattered_transforms(4096, 10000.0, 21);
        let tree = build_tree(&transforms, &unit_box(), 16, None, &ClusterConfig::default());

        assert!(tree.occlusion_layer_num_nodes >= 2);
        assert!(tree.occlusion_layer_num_nodes <= 16);

        let range = tree.occlusion_node_range().unwrap();
        assert!(range.end() - range.start() + 1 <= tree.occlusion_layer_num_nodes);
        assert_eq!(tree.occlusion_bounds().len(), range.end() - range.start() + 1);
    }

    #[test]
    fn small_sets_have_no_occlusion_layer()
    {
        let transforms = scattered_transforms(1000, 10000.0, 21);
        let tree = build_tree(&transforms, &unit_box(), 16, None, &ClusterConfig::default());

        assert_eq!(tree.occlusion_layer_num_nodes, 0);
        assert_eq!(tree.occlusion_node_range(), None);
    }

    #[test]
    fn identical_input_builds_identical_tree()
    {
        let transforms = scattered_transforms(640, 1000.0, 9);
        let config = ClusterConfig::default();

        assert_eq!(build_tree(&transforms, &unit_box(), 16, None, &config), build_tree(&transforms, &unit_box(), 16, None, &config));
    }
}

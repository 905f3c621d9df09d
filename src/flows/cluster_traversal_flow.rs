use std::ops::RangeInclusive;
use nalgebra_glm::TVec3;
use tracing::{trace, warn};
use crate::culling::traits::{Containment, TraversalDecider};
use crate::flows::instance_runs::LodRunLists;
use crate::flows::lod_selection::LodDistancePlanes;
use crate::flows::shared_constants::ClusterConfig;
use crate::helper_things::aabb_helper_functions::distances_to_view_origins;
use crate::world::bounding_volumes::aabb::StaticAABB;
use crate::world::cluster_tree::ClusterTree;

/// The traversal switches of a configuration
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct TraversalSettings
{
    pub dithered_lod: bool,
    pub overestimate_lod: bool,
    pub force_lod: Option<usize>,
    pub min_lod: usize,
    pub disable_cull: bool,
    pub cull_all: bool,
    pub max_unbuilt_instances_to_classify: usize,
}

impl From<&ClusterConfig> for TraversalSettings
{
    fn from(config: &ClusterConfig) -> Self
    {
        TraversalSettings
        {
            dithered_lod: config.dithered_lod,
            overestimate_lod: config.overestimate_lod,
            force_lod: config.force_lod,
            min_lod: config.min_lod,
            disable_cull: config.disable_cull,
            cull_all: config.cull_all,
            max_unbuilt_instances_to_classify: config.max_unbuilt_instances_to_classify,
        }
    }
}

/// Everything a traversal of one view needs. All spatial inputs are in the local space of the
/// instance set
pub struct TraversalParams<'a, T: TraversalDecider>
{
    pub culler: &'a T,
    /// Two temporal view origins; pass the same origin twice when there is no temporal LOD
    pub view_origins: [TVec3<f32>; 2],
    pub lod_planes: &'a LodDistancePlanes,
    /// Per LOD, nodes with fewer instances than this are drawn whole instead of being split
    pub min_instances_to_split: &'a [usize],
    /// One visibility flag per occlusion layer node; false prunes the node
    pub occlusion_results: Option<&'a [bool]>,
    pub settings: TraversalSettings,
}

impl<'a, T: TraversalDecider> TraversalParams<'a, T>
{
    fn lod_count(&self) -> usize
    {
        self.lod_planes.lod_count()
    }

    /// The LOD range a traversal starts with. A `max_lod` equal to the LOD count means the far
    /// end has not been narrowed yet
    fn initial_lod_range(&self) -> (usize, usize)
    {
        let lod_count = self.lod_count();

        match self.settings.force_lod
        {
            Some(forced) =>
                {
                    let lod = forced.min(lod_count - 1);
                    (lod, lod)
                },
            None => (self.settings.min_lod.min(lod_count - 1), lod_count)
        }
    }
}

/// Counters gathered during a traversal
#[derive(Clone, Debug, Default, PartialEq)]
pub struct TraversalStats
{
    pub lod_instances: Vec<usize>,
    pub occlusion_culled_instances: usize,
    pub visited_nodes: usize,
    pub unbuilt_instances: usize,
}

impl TraversalStats
{
    pub(crate) fn record_run_totals(&mut self, runs: &LodRunLists)
    {
        self.lod_instances = (0..runs.lod_count()).map(|x| runs.instance_count(x)).collect();
    }
}

/// Recursive walk over the nodes of one tree for one view
struct NodeWalker<'a, 'b, T: TraversalDecider>
{
    tree: &'a ClusterTree,
    params: &'a TraversalParams<'a, T>,
    runs: &'b mut LodRunLists,
    stats: &'b mut TraversalStats,
    occlusion: Option<(RangeInclusive<usize>, &'a [bool])>,
    first_occlusion_node: usize,
}

impl<'a, 'b, T: TraversalDecider> NodeWalker<'a, 'b, T>
{
    fn traverse_node(&mut self, node_index: usize, mut min_lod: usize, mut max_lod: usize, mut fully_contained: bool)
    {
        let node = self.tree.nodes[node_index];
        let lod_count = self.params.lod_count();
        self.stats.visited_nodes += 1;

        if !fully_contained
        {
            match self.params.culler.classify_aabb(&node.bounds)
            {
                Containment::Outside => return,
                Containment::Inside => fully_contained = true,
                Containment::Intersecting => {}
            }
        }

        let distances = distances_to_view_origins(&node.bounds, &self.params.view_origins[0], &self.params.view_origins[1]);

        if min_lod != max_lod
        {
            self.params.lod_planes.narrow(&distances, &mut min_lod, &mut max_lod);

            if min_lod >= lod_count
            {
                return;
            }
        }

        if let Some((range, visibility)) = &self.occlusion
        {
            if range.contains(&node_index) && !visibility[node_index - range.start()]
            {
                self.stats.occlusion_culled_instances += node.instance_count();
                return;
            }
        }

        let should_group = match node.children
        {
            None => true,
            Some(_) =>
                {
                    let split_threshold = self.params.min_instances_to_split.get(min_lod).copied().unwrap_or(0);
                    node.instance_count() < split_threshold && distances.far < self.params.lod_planes.cull_distance()
                }
        };

        let split = (!fully_contained || min_lod < max_lod || node_index < self.first_occlusion_node) && !should_group;

        match (split, node.children)
        {
            (true, Some(children)) =>
                {
                    for child in children.indices()
                    {
                        self.traverse_node(child, min_lod, max_lod, fully_contained);
                    }
                },
            _ =>
                {
                    max_lod = max_lod.min(lod_count - 1);
                    self.runs.add_run(node.first_instance, node.last_instance, min_lod, max_lod);
                }
        }
    }
}

/// Logic of turning a cluster tree and a view into per LOD runs of instances to draw
pub struct ClusterTraversalFlow;

impl ClusterTraversalFlow
{
    /// Traverses a built tree and returns the runs to draw together with traversal counters
    ///
    /// `tree` - the tree snapshot to walk
    /// `params` - the view being rendered
    pub fn traverse<T: TraversalDecider>(tree: &ClusterTree, params: &TraversalParams<T>) -> (LodRunLists, TraversalStats)
    {
        let mut runs = LodRunLists::new(params.lod_count(), params.settings.dithered_lod, params.settings.overestimate_lod);
        let mut stats = TraversalStats::default();

        ClusterTraversalFlow::traverse_built(tree, params, &mut runs, &mut stats);
        stats.record_run_totals(&runs);

        trace!("Traversed {} of {} cluster nodes, instances per LOD {:?}, {} occlusion culled",
               stats.visited_nodes, tree.node_count(), stats.lod_instances, stats.occlusion_culled_instances);

        (runs, stats)
    }

    /// Appends the runs of a built tree to existing run lists
    ///
    /// `tree` - the tree snapshot to walk
    /// `params` - the view being rendered
    /// `runs` - output run lists, one per LOD
    /// `stats` - counters to update
    pub fn traverse_built<T: TraversalDecider>(tree: &ClusterTree, params: &TraversalParams<T>, runs: &mut LodRunLists, stats: &mut TraversalStats)
    {
        if tree.is_empty() || params.lod_count() == 0 || params.settings.cull_all
        {
            return;
        }

        let occlusion = match (tree.occlusion_node_range(), params.occlusion_results)
        {
            (Some(range), Some(visibility)) if visibility.len() == range.end() - range.start() + 1 => Some((range, visibility)),
            (range, Some(visibility)) =>
                {
                    warn!("Ignoring {} occlusion results for an occlusion layer of {:?}", visibility.len(), range);
                    None
                },
            _ => None
        };

        let first_occlusion_node = occlusion.as_ref().map_or(0, |(range, _)| *range.start());
        let (min_lod, max_lod) = params.initial_lod_range();

        let mut walker = NodeWalker{ tree, params, runs, stats, occlusion, first_occlusion_node };
        walker.traverse_node(0, min_lod, max_lod, params.settings.disable_cull);
    }

    /// Appends runs for instances that are not in the tree yet. Each instance is classified on its
    /// own, unless there are too many of them, in which case they are all drawn at the coarsest LOD
    ///
    /// `unbuilt_bounds` - bounds of each unbuilt instance, in render slot order
    /// `first_slot` - render slot of the first unbuilt instance
    /// `params` - the view being rendered
    /// `runs` - output run lists, one per LOD
    /// `stats` - counters to update
    pub fn traverse_unbuilt<T: TraversalDecider>(unbuilt_bounds: &[StaticAABB], first_slot: u32, params: &TraversalParams<T>, runs: &mut LodRunLists, stats: &mut TraversalStats)
    {
        let lod_count = params.lod_count();

        if unbuilt_bounds.is_empty() || lod_count == 0 || params.settings.cull_all
        {
            return;
        }

        stats.unbuilt_instances += unbuilt_bounds.len();

        if unbuilt_bounds.len() > params.settings.max_unbuilt_instances_to_classify
        {
            let last_slot = first_slot + unbuilt_bounds.len() as u32 - 1;
            runs.add_run(first_slot, last_slot, lod_count - 1, lod_count - 1);
            return;
        }

        let (initial_min_lod, initial_max_lod) = params.initial_lod_range();

        for (offset, bounds) in unbuilt_bounds.iter().enumerate()
        {
            if !params.settings.disable_cull && !params.culler.aabb_in_view(bounds)
            {
                continue;
            }

            let (mut min_lod, mut max_lod) = (initial_min_lod, initial_max_lod);

            if min_lod != max_lod
            {
                let distances = distances_to_view_origins(bounds, &params.view_origins[0], &params.view_origins[1]);
                params.lod_planes.narrow(&distances, &mut min_lod, &mut max_lod);

                if min_lod >= lod_count
                {
                    continue;
                }
            }

            let slot = first_slot + offset as u32;
            runs.add_run(slot, slot, min_lod, min_lod);
        }
    }
}

#[cfg(test)]
mod tests
{
    use super::*;
    use nalgebra_glm::{TMat4, vec3};
    use rand::{Rng, SeedableRng};
    use rand::rngs::StdRng;
    use crate::culling::convex_volume::ConvexVolume;
    use crate::flows::instance_runs::InstanceRun;
    use crate::world::cluster_builder::build_tree;

    fn unit_box() -> StaticAABB
    {
        StaticAABB::from_corners(vec3(-1.0, -1.0, -1.0), vec3(1.0, 1.0, 1.0))
    }

    fn scattered_transforms(count: usize, extent: f32, seed: u64) -> Vec<TMat4<f32>>
    {
        let mut rng = StdRng::seed_from_u64(seed);
        (0..count).map(|_| nalgebra_glm::translation(&vec3(rng.gen_range(0.0..extent), rng.gen_range(0.0..extent), 0.0))).collect()
    }

    fn settings(dithered_lod: bool) -> TraversalSettings
    {
        TraversalSettings{ dithered_lod, ..TraversalSettings::from(&ClusterConfig::default()) }
    }

    fn covered_slots(runs: &LodRunLists) -> Vec<u32>
    {
        let mut slots = runs.all_runs().iter().flatten().flat_map(|x| x.first..=x.last).collect::<Vec<u32>>();
        slots.sort_unstable();
        slots
    }

    fn assert_runs_merged(runs: &LodRunLists)
    {
        for lod_runs in runs.all_runs()
        {
            assert!(lod_runs.windows(2).all(|x| x[0].last + 1 != x[1].first));
        }
    }

    #[test]
    fn full_view_covers_every_instance_once()
    {
        let transforms = scattered_transforms(1000, 10000.0, 0x5eed);
        let tree = build_tree(&transforms, &unit_box(), 16, None, &ClusterConfig::default());
        let culler = ConvexVolume::enclosing_aabb(&tree.bounds().unwrap());
        let planes = LodDistancePlanes::infinite(1);

        let params = TraversalParams
        {
            culler: &culler,
            view_origins: [vec3(5000.0, 5000.0, 100.0); 2],
            lod_planes: &planes,
            min_instances_to_split: &[16],
            occlusion_results: None,
            settings: settings(false)
        };

        let (runs, stats) = ClusterTraversalFlow::traverse(&tree, &params);

        assert_eq!(stats.lod_instances, vec![1000]);
        assert_eq!(covered_slots(&runs), (0..1000).collect::<Vec<u32>>());
        assert_runs_merged(&runs);
    }

    #[test]
    fn partial_view_only_emits_visible_instances()
    {
        let transforms = scattered_transforms(1000, 10000.0, 0x5eed);
        let tree = build_tree(&transforms, &unit_box(), 16, None, &ClusterConfig::default());
        let view_box = StaticAABB::from_corners(vec3(0.0, 0.0, -10.0), vec3(5000.0, 5000.0, 10.0));
        let culler = ConvexVolume::enclosing_aabb(&view_box);
        let planes = LodDistancePlanes::infinite(1);

        let params = TraversalParams
        {
            culler: &culler,
            view_origins: [vec3(0.0, 0.0, 0.0); 2],
            lod_planes: &planes,
            min_instances_to_split: &[1],
            occlusion_results: None,
            settings: settings(false)
        };

        let (runs, _) = ClusterTraversalFlow::traverse(&tree, &params);
        let slots = covered_slots(&runs);

        // Every instance whose bounds overlap the view is drawn; some neighbours may come along
        for (original, transform) in transforms.iter().enumerate()
        {
            let slot = tree.instance_reorder_table[original].unwrap();
            if view_box.intersect(&unit_box().apply_transformation(transform))
            {
                assert!(slots.binary_search(&slot).is_ok());
            }
        }

        assert!(slots.len() < 1000);
        assert_runs_merged(&runs);
    }

    #[test]
    fn occluded_layer_prunes_everything()
    {
        let transforms = scattered_transforms(4096, 10000.0, 21);
        let tree = build_tree(&transforms, &unit_box(), 16, None, &ClusterConfig::default());
        let culler = ConvexVolume::enclosing_aabb(&tree.bounds().unwrap());
        let planes = LodDistancePlanes::infinite(1);
        let layer_len = tree.occlusion_bounds().len();
        assert!(layer_len >= 2);

        let hidden = vec![false; layer_len];
        let mut visible = vec![true; layer_len];

        let mut params = TraversalParams
        {
            culler: &culler,
            view_origins: [vec3(0.0, 0.0, 0.0); 2],
            lod_planes: &planes,
            min_instances_to_split: &[1],
            occlusion_results: Some(&hidden),
            settings: settings(false)
        };

        let (runs, stats) = ClusterTraversalFlow::traverse(&tree, &params);
        assert!(runs.is_empty());
        assert_eq!(stats.occlusion_culled_instances, 4096);

        visible[0] = false;
        params.occlusion_results = Some(&visible);
        let first_layer_node = *tree.occlusion_node_range().unwrap().start();

        let (runs, stats) = ClusterTraversalFlow::traverse(&tree, &params);
        assert_eq!(stats.occlusion_culled_instances, tree.nodes[first_layer_node].instance_count());
        assert_eq!(stats.lod_instances[0] + stats.occlusion_culled_instances, 4096);
        assert_runs_merged(&runs);
    }

    #[test]
    fn lods_follow_distance()
    {
        let transforms = (0..1000).map(|x| nalgebra_glm::translation(&vec3(x as f32, 0.0, 0.0))).collect::<Vec<_>>();
        let tree = build_tree(&transforms, &unit_box(), 16, None, &ClusterConfig::default());
        let culler = ConvexVolume::enclosing_aabb(&tree.bounds().unwrap());
        let planes = LodDistancePlanes::from_distances(&[500.0, f32::MAX], 0.0);

        let single_params = TraversalParams
        {
            culler: &culler,
            view_origins: [vec3(0.0, 0.0, 0.0); 2],
            lod_planes: &planes,
            min_instances_to_split: &[1, 1],
            occlusion_results: None,
            settings: settings(false)
        };

        let (single, _) = ClusterTraversalFlow::traverse(&tree, &single_params);
        assert_eq!(single.instance_count(0) + single.instance_count(1), 1000);

        let near_slot = tree.instance_reorder_table[10].unwrap();
        let far_slot = tree.instance_reorder_table[990].unwrap();
        let in_lod = |runs: &LodRunLists, lod: usize, slot: u32| runs.runs(lod).iter().any(|x| x.first <= slot && slot <= x.last);

        assert!(in_lod(&single, 0, near_slot));
        assert!(in_lod(&single, 1, far_slot));

        let dithered_params = TraversalParams{ settings: settings(true), ..single_params };
        let (dithered, _) = ClusterTraversalFlow::traverse(&tree, &dithered_params);

        assert!(dithered.instance_count(0) + dithered.instance_count(1) >= 1000);
        assert!(in_lod(&dithered, 0, near_slot) && !in_lod(&dithered, 1, near_slot));
        assert!(in_lod(&dithered, 1, far_slot) && !in_lod(&dithered, 0, far_slot));
        assert_runs_merged(&dithered);
    }

    #[test]
    fn distant_view_culls_everything()
    {
        let transforms = scattered_transforms(200, 100.0, 4);
        let tree = build_tree(&transforms, &unit_box(), 16, None, &ClusterConfig::default());
        let culler = ConvexVolume::enclosing_aabb(&tree.bounds().unwrap());
        let planes = LodDistancePlanes::from_distances(&[100.0], 0.0);

        let params = TraversalParams
        {
            culler: &culler,
            view_origins: [vec3(10000.0, 0.0, 0.0); 2],
            lod_planes: &planes,
            min_instances_to_split: &[16],
            occlusion_results: None,
            settings: settings(false)
        };

        assert!(ClusterTraversalFlow::traverse(&tree, &params).0.is_empty());
    }

    #[test]
    fn overrides_force_lod_and_cull_all()
    {
        let transforms = scattered_transforms(200, 100.0, 4);
        let tree = build_tree(&transforms, &unit_box(), 16, None, &ClusterConfig::default());
        let culler = ConvexVolume::enclosing_aabb(&tree.bounds().unwrap());
        let planes = LodDistancePlanes::from_distances(&[10.0, 20.0, 30.0], 0.0);

        let forced = TraversalParams
        {
            culler: &culler,
            view_origins: [vec3(0.0, 0.0, 0.0); 2],
            lod_planes: &planes,
            min_instances_to_split: &[16, 16, 16],
            occlusion_results: None,
            settings: TraversalSettings{ force_lod: Some(7), ..settings(true) }
        };

        let (runs, _) = ClusterTraversalFlow::traverse(&tree, &forced);
        assert_eq!(runs.instance_count(2), 200);
        assert_eq!(runs.instance_count(0) + runs.instance_count(1), 0);

        let cull_all = TraversalParams{ settings: TraversalSettings{ cull_all: true, ..settings(true) }, ..forced };
        assert!(ClusterTraversalFlow::traverse(&tree, &cull_all).0.is_empty());
    }

    #[test]
    fn unbuilt_instances_are_classified_individually()
    {
        let everything = ConvexVolume::enclosing_aabb(&StaticAABB::from_corners(vec3(-1000.0, -1000.0, -1000.0), vec3(1000.0, 1000.0, 1000.0)));
        let planes = LodDistancePlanes::from_distances(&[50.0, 200.0], 0.0);
        let bounds = [10.0, 20.0, 100.0, 500.0, 30.0]
            .iter()
            .map(|x| unit_box().apply_transformation(&nalgebra_glm::translation(&vec3(*x, 0.0, 0.0))))
            .collect::<Vec<StaticAABB>>();

        let params = TraversalParams
        {
            culler: &everything,
            view_origins: [vec3(0.0, 0.0, 0.0); 2],
            lod_planes: &planes,
            min_instances_to_split: &[16, 16],
            occlusion_results: None,
            settings: settings(false)
        };

        let mut runs = LodRunLists::new(2, false, false);
        let mut stats = TraversalStats::default();
        ClusterTraversalFlow::traverse_unbuilt(&bounds, 40, &params, &mut runs, &mut stats);

        // Slot 43 is past the cull distance and is skipped
        assert_eq!(runs.runs(0), &[InstanceRun::new(40, 41), InstanceRun::new(44, 44)]);
        assert_eq!(runs.runs(1), &[InstanceRun::new(42, 42)]);
        assert_eq!(stats.unbuilt_instances, 5);

        let capped = TraversalParams{ settings: TraversalSettings{ max_unbuilt_instances_to_classify: 4, ..settings(false) }, ..params };
        let mut capped_runs = LodRunLists::new(2, false, false);
        ClusterTraversalFlow::traverse_unbuilt(&bounds, 40, &capped, &mut capped_runs, &mut stats);

        assert!(capped_runs.runs(0).is_empty());
        assert_eq!(capped_runs.runs(1), &[InstanceRun::new(40, 44)]);
    }
}

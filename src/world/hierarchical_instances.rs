use std::ops::Range;
use std::sync::Arc;
use nalgebra_glm::{TMat4, TVec3};
use tracing::{debug, trace};
use crate::culling::occlusion_results::OcclusionResultCache;
use crate::culling::traits::TraversalDecider;
use crate::error::ClusterError;
use crate::flows::cluster_traversal_flow::{ClusterTraversalFlow, TraversalParams, TraversalStats};
use crate::flows::instance_runs::LodRunLists;
use crate::flows::shared_constants::{CLUSTER_CONFIG, ClusterConfig};
use crate::helper_things::aabb_helper_functions::distance_to_aabb;
use crate::helper_things::density_scaling::density_exclusion_mask;
use crate::threads::async_build::{AsyncBuildCoordinator, BuildEvent, BuildOutcome};
use crate::world::bounding_volumes::aabb::StaticAABB;
use crate::world::cluster_builder::ClusterBuilder;
use crate::world::cluster_tree::ClusterTree;

/// A set of instances of one mesh, kept clustered in a tree for culling.
///
/// Render slots are the order instances are drawn in: slots `[0, built_instance_count)` are the
/// sorted positions of the current tree, and slots after that form the unbuilt tail of instances
/// the tree does not know about yet. A slot whose instance was removed or moved out is omitted
/// until the next build compacts it away.
pub struct HierarchicalInstances
{
    config: ClusterConfig,
    mesh_bounds: Option<StaticAABB>,
    lod_vertex_counts: Vec<u32>,
    transforms: Vec<TMat4<f32>>,
    exclusion_mask: Vec<bool>,
    tree: Arc<ClusterTree>,
    /// Render slot to instance index
    render_instances: Vec<Option<usize>>,
    /// Instance index to render slot
    instance_slots: Vec<Option<usize>>,
    built_render_count: usize,
    /// Bounds of the unbuilt tail, one per slot after the built ones
    unbuilt_bounds: Vec<StaticAABB>,
    is_outdated: bool,
    coordinator: AsyncBuildCoordinator,
    occlusion_results: OcclusionResultCache,
    frame_number: u64,
}

impl HierarchicalInstances
{
    /// Creates an empty instance set using the process wide configuration
    ///
    /// `mesh_bounds` - local bounds of the mesh, or None if it is not loaded
    /// `lod_vertex_counts` - number of vertices of each LOD of the mesh
    pub fn new(mesh_bounds: Option<StaticAABB>, lod_vertex_counts: Vec<u32>) -> Result<HierarchicalInstances, ClusterError>
    {
        let config = CLUSTER_CONFIG.read().clone();
        HierarchicalInstances::with_config(mesh_bounds, lod_vertex_counts, config)
    }

    /// Creates an empty instance set with an explicit configuration
    ///
    /// `mesh_bounds` - local bounds of the mesh, or None if it is not loaded
    /// `lod_vertex_counts` - number of vertices of each LOD of the mesh
    /// `config` - tunables for building and traversing the tree
    pub fn with_config(mesh_bounds: Option<StaticAABB>, lod_vertex_counts: Vec<u32>, config: ClusterConfig) -> Result<HierarchicalInstances, ClusterError>
    {
        config.validate()?;

        Ok(HierarchicalInstances
        {
            config,
            mesh_bounds,
            lod_vertex_counts,
            transforms: Vec::new(),
            exclusion_mask: Vec::new(),
            tree: Arc::new(ClusterTree::empty(0)),
            render_instances: Vec::new(),
            instance_slots: Vec::new(),
            built_render_count: 0,
            unbuilt_bounds: Vec::new(),
            is_outdated: false,
            coordinator: AsyncBuildCoordinator::new(),
            occlusion_results: OcclusionResultCache::new(),
            frame_number: 0,
        })
    }

    pub fn config(&self) -> &ClusterConfig
    {
        &self.config
    }

    pub fn instance_count(&self) -> usize
    {
        self.transforms.len()
    }

    pub fn transform(&self, index: usize) -> Option<&TMat4<f32>>
    {
        self.transforms.get(index)
    }

    pub fn mesh_bounds(&self) -> Option<StaticAABB>
    {
        self.mesh_bounds
    }

    /// Shared handle to the current tree. Holders keep seeing this version after newer builds are
    /// published
    pub fn tree_handle(&self) -> Arc<ClusterTree>
    {
        self.tree.clone()
    }

    pub fn is_building(&self) -> bool
    {
        self.coordinator.is_building()
    }

    /// Whether the tree lags behind the instances, either because of an unbuilt tail or because of
    /// removals, moves or mask changes since the last build
    pub fn is_tree_outdated(&self) -> bool
    {
        self.is_outdated
    }

    pub fn built_instance_count(&self) -> usize
    {
        self.tree.built_instance_count()
    }

    pub fn unbuilt_instance_count(&self) -> usize
    {
        self.unbuilt_bounds.len()
    }

    pub fn node_count(&self) -> usize
    {
        self.tree.node_count()
    }

    pub fn actual_instances_per_leaf(&self) -> f32
    {
        self.tree.actual_instances_per_leaf()
    }

    /// Leaf size for the mesh, derived from the vertex count of its first LOD
    pub fn desired_instances_per_leaf(&self) -> usize
    {
        self.config.desired_instances_per_leaf(self.lod_vertex_counts.first().copied().unwrap_or(0))
    }

    /// Per LOD node size below which a traversal stops splitting
    pub fn min_instances_to_split(&self) -> Vec<usize>
    {
        self.config.min_instances_to_split(&self.lod_vertex_counts)
    }

    fn instance_bounds(&self, transform: &TMat4<f32>) -> StaticAABB
    {
        match &self.mesh_bounds
        {
            Some(bounds) => bounds.apply_transformation(transform),
            None => StaticAABB::point_aabb().apply_transformation(transform)
        }
    }

    fn is_excluded(&self, index: usize) -> bool
    {
        self.exclusion_mask.get(index).copied().unwrap_or(false)
    }

    fn push_to_unbuilt_tail(&mut self, index: usize)
    {
        let slot = self.render_instances.len();
        let bounds = self.instance_bounds(&self.transforms[index]);

        self.render_instances.push(Some(index));
        self.instance_slots[index] = Some(slot);
        self.unbuilt_bounds.push(bounds);
    }

    /// Adds an instance to the unbuilt tail and returns its index
    ///
    /// `transform` - local to component transform of the new instance
    pub fn add_instance(&mut self, transform: TMat4<f32>) -> usize
    {
        let index = self.append_instance(transform);
        trace!("Added instance {} to the unbuilt tail", index);

        self.schedule_build_for_additions();
        index
    }

    /// Adds several instances at once; a rebuild is scheduled at most once for the whole batch
    ///
    /// `transforms` - local to component transforms of the new instances
    pub fn add_instances(&mut self, transforms: &[TMat4<f32>]) -> Range<usize>
    {
        let first = self.transforms.len();

        for transform in transforms
        {
            self.append_instance(*transform);
        }

        trace!("Added {} instances to the unbuilt tail", transforms.len());

        self.schedule_build_for_additions();
        first..self.transforms.len()
    }

    fn append_instance(&mut self, transform: TMat4<f32>) -> usize
    {
        let index = self.transforms.len();

        self.transforms.push(transform);
        self.exclusion_mask.push(false);
        self.instance_slots.push(None);
        self.push_to_unbuilt_tail(index);
        self.is_outdated = true;

        index
    }

    /// Removes an instance. The last instance takes over the removed index. Returns false if the
    /// index does not exist
    ///
    /// `index` - the instance to remove
    pub fn remove_instance(&mut self, index: usize) -> bool
    {
        if !self.remove_without_rebuild(index)
        {
            return false;
        }

        self.after_removal();
        true
    }

    /// Removes several instances; returns how many existed. Indexes are removed from the highest
    /// down, so every given index refers to the set before the call
    ///
    /// `indices` - the instances to remove, in any order
    pub fn remove_instances(&mut self, indices: &[usize]) -> usize
    {
        let mut sorted = indices.to_vec();
        sorted.sort_unstable_by(|a, b| b.cmp(a));
        sorted.dedup();

        let removed = sorted.into_iter().filter(|x| self.remove_without_rebuild(*x)).count();

        if removed > 0
        {
            self.after_removal();
        }

        removed
    }

    fn remove_without_rebuild(&mut self, index: usize) -> bool
    {
        if index >= self.transforms.len()
        {
            return false;
        }

        match self.instance_slots[index]
        {
            Some(slot) if slot >= self.built_render_count => self.remove_tail_slot(slot),
            Some(slot) => self.render_instances[slot] = None,
            None => {}
        }

        let last = self.transforms.len() - 1;

        self.transforms.swap_remove(index);
        self.exclusion_mask.swap_remove(index);
        self.instance_slots.swap_remove(index);

        if index != last
        {
            if let Some(slot) = self.instance_slots[index]
            {
                self.render_instances[slot] = Some(index);
            }
        }

        trace!("Removed instance {}", index);
        true
    }

    /// Closes the gap a removed unbuilt instance leaves in the tail, shifting later tail slots down
    fn remove_tail_slot(&mut self, slot: usize)
    {
        self.render_instances.remove(slot);
        self.unbuilt_bounds.remove(slot - self.built_render_count);

        for later_slot in slot..self.render_instances.len()
        {
            if let Some(index) = self.render_instances[later_slot]
            {
                self.instance_slots[index] = Some(later_slot);
            }
        }
    }

    fn after_removal(&mut self)
    {
        if self.transforms.is_empty()
        {
            self.clear_instances();
            return;
        }

        self.is_outdated = true;
        self.request_rebuild();
    }

    /// Replaces the transform of an instance. If the instance is in the tree and its new bounds fit
    /// in its old ones it stays where it is; otherwise it moves to the unbuilt tail
    ///
    /// `index` - the instance to move
    /// `transform` - its new local to component transform
    pub fn update_instance_transform(&mut self, index: usize, transform: TMat4<f32>) -> Result<(), ClusterError>
    {
        if index >= self.transforms.len()
        {
            return Err(ClusterError::InstanceOutOfRange{ index, count: self.transforms.len() });
        }

        let old_bounds = self.instance_bounds(&self.transforms[index]);
        let new_bounds = self.instance_bounds(&transform);
        self.transforms[index] = transform;

        self.coordinator.mark_concurrent_change();

        match self.instance_slots[index]
        {
            Some(slot) if slot < self.built_render_count =>
                {
                    if !old_bounds.contains_aabb(&new_bounds)
                    {
                        self.render_instances[slot] = None;
                        self.push_to_unbuilt_tail(index);
                        self.is_outdated = true;
                        self.schedule_build_for_additions();
                    }
                },
            Some(slot) => self.unbuilt_bounds[slot - self.built_render_count] = new_bounds,
            None => {}
        }

        Ok(())
    }

    /// Removes every instance and drops the tree. An in flight build is discarded
    pub fn clear_instances(&mut self)
    {
        self.coordinator.discard_in_flight();

        self.transforms.clear();
        self.exclusion_mask.clear();
        self.render_instances.clear();
        self.instance_slots.clear();
        self.unbuilt_bounds.clear();
        self.built_render_count = 0;
        self.tree = Arc::new(ClusterTree::empty(0));
        self.occlusion_results.reset_for_tree(0, self.frame_number);
        self.is_outdated = false;
    }

    /// Replaces the mesh bounds. The tree is rebuilt since every node bound depends on them
    ///
    /// `mesh_bounds` - local bounds of the mesh, or None if it is no longer loaded
    pub fn set_mesh_bounds(&mut self, mesh_bounds: Option<StaticAABB>)
    {
        if self.mesh_bounds == mesh_bounds
        {
            return;
        }

        self.mesh_bounds = mesh_bounds;

        for offset in 0..self.unbuilt_bounds.len()
        {
            if let Some(index) = self.render_instances[self.built_render_count + offset]
            {
                self.unbuilt_bounds[offset] = self.instance_bounds(&self.transforms[index]);
            }
        }

        self.is_outdated = true;
        self.request_rebuild();
    }

    /// Replaces the exclusion mask. Instances marked true are left out of the next build. A mask
    /// shorter than the instance count excludes nothing past its end
    ///
    /// `mask` - one entry per instance
    pub fn set_exclusion_mask(&mut self, mut mask: Vec<bool>) -> Result<(), ClusterError>
    {
        if mask.len() > self.transforms.len()
        {
            return Err(ClusterError::ExclusionMaskLength{ mask: mask.len(), count: self.transforms.len() });
        }

        mask.resize(self.transforms.len(), false);
        self.exclusion_mask = mask;
        self.is_outdated = true;
        self.request_rebuild();

        Ok(())
    }

    /// Excludes instances at random so that about `density_scale` of them remain
    ///
    /// `seed` - seed of the random stream; the same seed thins out the same instances
    pub fn apply_density_scale(&mut self, seed: u64) -> Result<(), ClusterError>
    {
        let mask = density_exclusion_mask(self.transforms.len(), self.config.density_scale, seed);
        self.set_exclusion_mask(mask)
    }

    fn schedule_build_for_additions(&mut self)
    {
        if self.config.auto_rebuild_on_instance_changes && !self.coordinator.is_building()
            && self.unbuilt_bounds.len() >= self.config.async_build_unbuilt_threshold
        {
            self.start_async_build();
        }
    }

    fn request_rebuild(&mut self)
    {
        if self.coordinator.is_building()
        {
            self.coordinator.request_restart();
        }
        else if self.config.auto_rebuild_on_instance_changes
        {
            self.start_async_build();
        }
    }

    fn snapshot(&self) -> ClusterBuilder
    {
        ClusterBuilder::new(self.transforms.clone(), self.mesh_bounds.unwrap_or_else(StaticAABB::empty),
                            self.desired_instances_per_leaf(), &self.exclusion_mask, &self.config)
    }

    fn start_async_build(&mut self)
    {
        let builder = self.snapshot();

        if self.mesh_bounds.is_none() || builder.included_instance_count() == 0
        {
            let input_count = builder.original_instance_count();
            self.apply_tree(builder.build(), input_count);
            return;
        }

        self.coordinator.start(builder);
    }

    fn build_sync(&mut self)
    {
        self.coordinator.discard_in_flight();

        let input_count = self.transforms.len();
        let tree = self.snapshot().build();
        self.apply_tree(tree, input_count);
    }

    /// Publishes a finished tree and rebuilds the render order around it. Instances that were
    /// added after the build snapshot was taken become the new unbuilt tail
    fn apply_tree(&mut self, tree: ClusterTree, input_count: usize)
    {
        self.built_render_count = tree.built_instance_count();
        self.render_instances = tree.sorted_instances.iter().map(|x| Some(*x as usize)).collect();
        self.instance_slots = vec![None; self.transforms.len()];

        for (slot, index) in tree.sorted_instances.iter().enumerate()
        {
            self.instance_slots[*index as usize] = Some(slot);
        }

        self.unbuilt_bounds.clear();

        for index in input_count..self.transforms.len()
        {
            if !self.is_excluded(index)
            {
                self.push_to_unbuilt_tail(index);
            }
        }

        // Without a mesh nothing could be built, so the instances still wait for a build
        self.is_outdated = !self.unbuilt_bounds.is_empty() || (self.mesh_bounds.is_none() && !self.transforms.is_empty());
        self.occlusion_results.reset_for_tree(tree.occlusion_bounds().len(), self.frame_number);
        self.tree = Arc::new(tree);

        debug!("Published cluster tree with {} built and {} unbuilt instances", self.built_render_count, self.unbuilt_bounds.len());
    }

    /// Builds the tree if it lags behind the instances. Returns whether a build was done or started
    ///
    /// `async_build` - build on a worker thread instead of blocking
    /// `force_update` - build even if the tree is up to date
    pub fn build_tree_if_outdated(&mut self, async_build: bool, force_update: bool) -> bool
    {
        if !force_update && !self.is_outdated
        {
            return false;
        }

        if !async_build
        {
            self.build_sync();
        }
        else if self.coordinator.is_building()
        {
            self.coordinator.request_restart();
        }
        else
        {
            self.start_async_build();
        }

        true
    }

    /// Collects the result of the in flight build, if it has finished
    pub fn poll_build(&mut self) -> BuildEvent
    {
        match self.coordinator.poll()
        {
            BuildOutcome::Idle => BuildEvent::Idle,
            BuildOutcome::StillBuilding => BuildEvent::StillBuilding,
            BuildOutcome::Accept{ tree, input_count } =>
                {
                    self.apply_tree(tree, input_count);
                    self.schedule_build_for_additions();
                    BuildEvent::Applied
                },
            BuildOutcome::Discard =>
                {
                    debug!("Discarded a superseded cluster build");
                    self.schedule_build_for_additions();
                    BuildEvent::Discarded
                },
            BuildOutcome::Restart =>
                {
                    debug!("Discarded a cluster build invalidated by concurrent changes, rebuilding");
                    self.start_async_build();
                    BuildEvent::Restarted
                }
        }
    }

    /// Blocks until no build is in flight, applying every result along the way. Returns the events
    /// that were observed, in order
    pub fn finish_pending_builds(&mut self) -> Vec<BuildEvent>
    {
        let mut events = Vec::new();

        loop
        {
            self.coordinator.wait_for_completion();

            match self.poll_build()
            {
                BuildEvent::Idle => break,
                event => events.push(event)
            }
        }

        events
    }

    /// The instance drawn in a render slot, or None if the slot is omitted
    ///
    /// `slot` - a render slot from a run
    pub fn render_instance(&self, slot: usize) -> Option<usize>
    {
        self.render_instances.get(slot).copied().flatten()
    }

    /// The render slot of an instance, or None if it is excluded
    ///
    /// `index` - the instance to look up
    pub fn render_slot(&self, index: usize) -> Option<usize>
    {
        self.instance_slots.get(index).copied().flatten()
    }

    /// Traverses the tree and the unbuilt tail for one view. Runs never include omitted slots
    ///
    /// `params` - the view being rendered
    pub fn gather_runs<T: TraversalDecider>(&self, params: &TraversalParams<T>) -> (LodRunLists, TraversalStats)
    {
        let mut runs = LodRunLists::new(params.lod_planes.lod_count(), params.settings.dithered_lod, params.settings.overestimate_lod);
        let mut stats = TraversalStats::default();

        ClusterTraversalFlow::traverse_built(&self.tree, params, &mut runs, &mut stats);
        ClusterTraversalFlow::traverse_unbuilt(&self.unbuilt_bounds, self.built_render_count as u32, params, &mut runs, &mut stats);

        if self.render_instances.iter().any(Option::is_none)
        {
            runs = runs.without_slots(|slot| self.render_instances[slot as usize].is_none());
        }

        stats.record_run_totals(&runs);
        (runs, stats)
    }

    fn collect_overlapping<O, C>(&self, overlaps: O, contains: C) -> Vec<usize>
        where O: Fn(&StaticAABB) -> bool,
              C: Fn(&StaticAABB) -> bool
    {
        let mut found = Vec::new();
        let mut pending_nodes = if self.tree.is_empty() { Vec::new() } else { vec![0] };

        while let Some(node_index) = pending_nodes.pop()
        {
            let node = &self.tree.nodes[node_index];

            if !overlaps(&node.bounds)
            {
                continue;
            }

            let instances = node.instance_range().filter_map(|slot| self.render_instances[slot]);

            if contains(&node.bounds)
            {
                found.extend(instances);
                continue;
            }

            match node.children
            {
                Some(children) => pending_nodes.extend(children.indices()),
                None => found.extend(instances.filter(|x| overlaps(&self.instance_bounds(&self.transforms[*x]))))
            }
        }

        for (offset, bounds) in self.unbuilt_bounds.iter().enumerate()
        {
            if let Some(index) = self.render_instances[self.built_render_count + offset]
            {
                if overlaps(bounds)
                {
                    found.push(index);
                }
            }
        }

        found.sort_unstable();
        found
    }

    /// Indexes of the instances whose bounds overlap the given box, in ascending order
    ///
    /// `query` - the box to test, in the local space of the instance set
    pub fn instances_overlapping_box(&self, query: &StaticAABB) -> Vec<usize>
    {
        self.collect_overlapping(|x| query.intersect(x), |x| query.contains_aabb(x))
    }

    /// Indexes of the instances whose bounds overlap the given sphere, in ascending order
    ///
    /// `centre` - centre of the sphere, in the local space of the instance set
    /// `radius` - radius of the sphere
    pub fn instances_overlapping_sphere(&self, centre: &TVec3<f32>, radius: f32) -> Vec<usize>
    {
        self.collect_overlapping
            (
                |x| distance_to_aabb(x, centre) <= radius,
                |x| x.get_aabb_points().iter().all(|point| nalgebra_glm::distance(point, centre) <= radius)
            )
    }

    /// Sets the frame whose occlusion results are accepted and looked up
    pub fn set_frame_number(&mut self, frame_number: u64)
    {
        self.frame_number = frame_number;
    }

    /// Stores the occlusion results a view produced for the current tree's occlusion layer
    ///
    /// `view_key` - identifies the view
    /// `visibility` - one entry per occlusion layer node
    pub fn accept_occlusion_results(&mut self, view_key: u32, visibility: Vec<bool>) -> bool
    {
        self.occlusion_results.store(view_key, self.frame_number, visibility)
    }

    /// Occlusion results stored by a view in the current frame
    pub fn occlusion_results(&self, view_key: u32) -> Option<&[bool]>
    {
        self.occlusion_results.results_for(view_key, self.frame_number)
    }

    /// Serializes the tree, building it synchronously first if it lags behind the instances
    pub fn export_tree(&mut self) -> Result<Vec<u8>, ClusterError>
    {
        if self.is_outdated || self.coordinator.is_building()
        {
            self.build_sync();
        }

        self.tree.to_bytes()
    }
}

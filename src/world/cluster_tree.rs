use std::ops::RangeInclusive;
use serde::{Serialize, Deserialize};
use nalgebra_glm::TVec3;
use crate::error::ClusterError;
use crate::world::bounding_volumes::aabb::StaticAABB;

/// Inclusive range of node indices that are the children of a node
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeRange
{
    pub first: u32,
    pub last: u32,
}

impl NodeRange
{
    pub fn indices(&self) -> RangeInclusive<usize>
    {
        self.first as usize..=self.last as usize
    }

    pub fn len(&self) -> usize
    {
        (self.last - self.first) as usize + 1
    }
}

/// One node of the flattened cluster tree. Leaves index directly into the sorted instance array;
/// internal nodes cover the union of their children
#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ClusterNode
{
    pub bounds: StaticAABB,
    /// None for leaves
    pub children: Option<NodeRange>,
    pub first_instance: u32,
    pub last_instance: u32,
}

impl ClusterNode
{
    pub fn bound_min(&self) -> TVec3<f32>
    {
        self.bounds.bound_min()
    }

    pub fn bound_max(&self) -> TVec3<f32>
    {
        self.bounds.bound_max()
    }

    pub fn is_leaf(&self) -> bool
    {
        self.children.is_none()
    }

    /// Number of sorted instances this node covers
    pub fn instance_count(&self) -> usize
    {
        (self.last_instance - self.first_instance) as usize + 1
    }

    pub fn instance_range(&self) -> RangeInclusive<usize>
    {
        self.first_instance as usize..=self.last_instance as usize
    }
}

/// Result of one build: the node arena, the sorted instance permutation and its inverse. A new build
/// always produces a new tree; published trees are never edited in place
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ClusterTree
{
    /// Index 0 is the root when the tree is not empty
    pub nodes: Vec<ClusterNode>,
    /// Original instance indexes, grouped so that every leaf covers a contiguous range
    pub sorted_instances: Vec<u32>,
    /// Original instance index to sorted position; None for instances that were excluded
    pub instance_reorder_table: Vec<Option<u32>>,
    /// Number of nodes in the level chosen for occlusion queries, or 0 if there is none
    pub occlusion_layer_num_nodes: usize,
}

/// Description of a node when dumping the tree level by level
#[derive(Clone, Debug, PartialEq)]
pub struct LevelNodeReport
{
    pub node: usize,
    pub parent: Option<usize>,
    pub bounds: StaticAABB,
    pub child_count: usize,
    pub instance_count: usize,
}

impl ClusterTree
{
    /// Creates a tree with no nodes in which every one of the given instances is marked as not present
    ///
    /// `original_count` - the number of instances the build was requested for
    pub fn empty(original_count: usize) -> ClusterTree
    {
        ClusterTree
        {
            nodes: Vec::new(),
            sorted_instances: Vec::new(),
            instance_reorder_table: vec![None; original_count],
            occlusion_layer_num_nodes: 0
        }
    }

    pub fn is_empty(&self) -> bool
    {
        self.nodes.is_empty()
    }

    pub fn node_count(&self) -> usize
    {
        self.nodes.len()
    }

    /// Number of instances placed into the tree
    pub fn built_instance_count(&self) -> usize
    {
        self.sorted_instances.len()
    }

    /// Number of instances the tree was built from, including excluded ones
    pub fn original_instance_count(&self) -> usize
    {
        self.instance_reorder_table.len()
    }

    /// Bounds of the root node, if any
    pub fn bounds(&self) -> Option<StaticAABB>
    {
        self.nodes.first().map(|x| x.bounds)
    }

    /// Finds the deepest contiguous level, starting from the root, that does not have more nodes than
    /// the occlusion layer. Returns None if that level has fewer than two nodes
    pub fn occlusion_node_range(&self) -> Option<RangeInclusive<usize>>
    {
        if self.nodes.is_empty() || self.occlusion_layer_num_nodes == 0
        {
            return None;
        }

        let mut first_occlusion_node = 0;
        let mut last_occlusion_node = 0;

        while let (Some(first_children), Some(last_children)) = (self.nodes[first_occlusion_node].children, self.nodes[last_occlusion_node].children)
        {
            let next_first = first_children.first as usize;
            let next_last = last_children.last as usize;

            if next_last - next_first + 1 > self.occlusion_layer_num_nodes
            {
                break;
            }

            first_occlusion_node = next_first;
            last_occlusion_node = next_last;
        }

        if last_occlusion_node - first_occlusion_node + 1 < 2
        {
            None
        }
        else
        {
            Some(first_occlusion_node..=last_occlusion_node)
        }
    }

    /// Bounds of the occlusion layer nodes, in node order, for whoever issues the occlusion queries
    pub fn occlusion_bounds(&self) -> Vec<StaticAABB>
    {
        match self.occlusion_node_range()
        {
            Some(range) => self.nodes[range].iter().map(|x| x.bounds).collect(),
            None => Vec::new()
        }
    }

    /// Average number of instances stored per leaf
    pub fn actual_instances_per_leaf(&self) -> f32
    {
        let (leaves, instances) = self.nodes.iter()
            .filter(|x| x.is_leaf())
            .fold((0, 0), |(leaves, instances), x| (leaves + 1, instances + x.instance_count()));

        if leaves == 0
        {
            0.0
        }
        else
        {
            instances as f32 / leaves as f32
        }
    }

    /// Lists the nodes of every level, root first
    pub fn level_report(&self) -> Vec<Vec<LevelNodeReport>>
    {
        let mut levels = Vec::new();

        if self.nodes.is_empty()
        {
            return levels;
        }

        let mut current_level = vec![(0_usize, None)];

        while !current_level.is_empty()
        {
            let mut next_level = Vec::new();
            let mut reports = Vec::with_capacity(current_level.len());

            for (index, parent) in current_level
            {
                let node = &self.nodes[index];

                reports.push(LevelNodeReport
                {
                    node: index,
                    parent,
                    bounds: node.bounds,
                    child_count: node.children.map_or(0, |x| x.len()),
                    instance_count: node.instance_count()
                });

                if let Some(children) = node.children
                {
                    next_level.extend(children.indices().map(|x| (x, Some(index))));
                }
            }

            levels.push(reports);
            current_level = next_level;
        }

        levels
    }

    /// Verifies the structural invariants of a completed build: sibling instance ranges are contiguous,
    /// parents cover exactly their children, leaves partition the sorted instances and every bound
    /// holds the bounds below it
    pub fn check_invariants(&self) -> bool
    {
        if self.nodes.is_empty()
        {
            return self.sorted_instances.is_empty();
        }

        let root = &self.nodes[0];
        if root.first_instance != 0 || root.instance_count() != self.sorted_instances.len()
        {
            return false;
        }

        for node in &self.nodes
        {
            if node.first_instance > node.last_instance
            {
                return false;
            }

            if let Some(children) = node.children
            {
                if children.last as usize >= self.nodes.len()
                {
                    return false;
                }

                let mut expected_first = node.first_instance;

                for child in &self.nodes[children.indices()]
                {
                    if child.first_instance != expected_first || !node.bounds.contains_aabb(&child.bounds)
                    {
                        return false;
                    }

                    expected_first = child.last_instance + 1;
                }

                if expected_first != node.last_instance + 1
                {
                    return false;
                }
            }
        }

        let mut leaf_ranges = self.nodes.iter()
            .filter(|x| x.is_leaf())
            .map(|x| (x.first_instance, x.last_instance))
            .collect::<Vec<(u32, u32)>>();
        leaf_ranges.sort_unstable();

        let mut next_expected = 0;
        for (first, last) in leaf_ranges
        {
            if first != next_expected
            {
                return false;
            }

            next_expected = last + 1;
        }

        next_expected as usize == self.sorted_instances.len()
    }

    /// Serializes the tree into a compact binary form
    pub fn to_bytes(&self) -> Result<Vec<u8>, ClusterError>
    {
        Ok(bincode::serialize(self)?)
    }

    /// Reads a tree previously written with `to_bytes`
    ///
    /// `bytes` - the serialized tree
    pub fn from_bytes(bytes: &[u8]) -> Result<ClusterTree, ClusterError>
    {
        Ok(bincode::deserialize(bytes)?)
    }
}

#[cfg(test)]
mod tests
{
    use super::*;
    use nalgebra_glm::vec3;

    fn node(min: f32, max: f32, children: Option<(u32, u32)>, first_instance: u32, last_instance: u32) -> ClusterNode
    {
        ClusterNode
        {
            bounds: StaticAABB::from_corners(vec3(min, min, min), vec3(max, max, max)),
            children: children.map(|(first, last)| NodeRange{ first, last }),
            first_instance,
            last_instance
        }
    }

    // Root with three children, each child has two leaves of two instances each
    fn three_level_tree() -> ClusterTree
    {
        let mut nodes = vec![node(0.0, 30.0, Some((1, 3)), 0, 11)];

        for x in 0..3_u32
        {
            let base = x as f32 * 10.0;
            nodes.push(node(base, base + 10.0, Some((4 + x * 2, 5 + x * 2)), x * 4, x * 4 + 3));
        }

        for x in 0..6_u32
        {
            let base = x as f32 * 5.0;
            nodes.push(node(base, base + 5.0, None, x * 2, x * 2 + 1));
        }

        ClusterTree
        {
            nodes,
            sorted_instances: (0..12).collect(),
            instance_reorder_table: (0..12).map(Some).collect(),
            occlusion_layer_num_nodes: 3
        }
    }

    #[test]
    fn hand_built_tree_satisfies_invariants()
    {
        assert!(three_level_tree().check_invariants());
    }

    #[test]
    fn gap_between_siblings_breaks_invariants()
    {
        let mut tree = three_level_tree();
        tree.nodes[5].first_instance = 5;

        assert!(!tree.check_invariants());
    }

    #[test]
    fn occlusion_range_stops_at_layer_size()
    {
        let tree = three_level_tree();
        assert_eq!(tree.occlusion_node_range(), Some(1..=3));
        assert_eq!(tree.occlusion_bounds().len(), 3);

        let deeper = ClusterTree{ occlusion_layer_num_nodes: 6, ..three_level_tree() };
        assert_eq!(deeper.occlusion_node_range(), Some(4..=9));

        let none = ClusterTree{ occlusion_layer_num_nodes: 0, ..three_level_tree() };
        assert_eq!(none.occlusion_node_range(), None);
    }

    #[test]
    fn level_report_lists_levels_root_first()
    {
        let levels = three_level_tree().level_report();

        assert_eq!(levels.len(), 3);
        assert_eq!(levels[0].len(), 1);
        assert_eq!(levels[1].iter().map(|x| x.parent).collect::<Vec<_>>(), vec![Some(0), Some(0), Some(0)]);
        assert_eq!(levels[2].len(), 6);
        assert_eq!(levels[2][3].parent, Some(2));
    }

    #[test]
    fn instances_per_leaf_is_averaged()
    {
        assert!(float_cmp::approx_eq!(f32, three_level_tree().actual_instances_per_leaf(), 2.0, ulps = 2));
        assert!(float_cmp::approx_eq!(f32, ClusterTree::empty(4).actual_instances_per_leaf(), 0.0, ulps = 2));
    }

    #[test]
    fn serialized_tree_reads_back()
    {
        let tree = three_level_tree();
        let bytes = tree.to_bytes().unwrap();

        assert_eq!(ClusterTree::from_bytes(&bytes).unwrap(), tree);
        assert!(ClusterTree::from_bytes(&bytes[..bytes.len() / 2]).is_err());
    }
}

use lazy_static::lazy_static;
use parking_lot::RwLock;
use serde::{Serialize, Deserialize};
use crate::error::ClusterError;

/// Absolute cap on how many instances a single leaf may hold
pub const MAX_INSTANCES_PER_LEAF: usize = 1024;

/// Tunables controlling how cluster trees are built and traversed. Every value can be changed by the
/// caller; the defaults are the values that have proven reasonable for dense foliage
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClusterConfig
{
    /// Branching factor of internal nodes
    pub split_factor: usize,
    /// Leaf branching factor used when the mesh vertex count is unknown
    pub default_instances_per_leaf: usize,
    pub max_occlusion_queries_per_component: usize,
    pub min_occlusion_queries_per_component: usize,
    /// Not exact; the actual minimum might be off by a factor of two
    pub min_instances_per_occlusion_query: usize,
    /// Trades culling and LOD accuracy against traversal cost
    pub min_verts_to_split_node: u32,
    pub dithered_lod: bool,
    pub overestimate_lod: bool,
    pub force_lod: Option<usize>,
    pub min_lod: usize,
    pub disable_cull: bool,
    pub cull_all: bool,
    pub minimum_screen_size: f32,
    pub lod_distance_scale: f32,
    pub random_lod_range: f32,
    pub max_draw_distance_scale: f32,
    /// Above this many unbuilt instances, the whole unbuilt tail is drawn at the lowest LOD
    pub max_unbuilt_instances_to_classify: usize,
    pub async_build_unbuilt_threshold: usize,
    pub auto_rebuild_on_instance_changes: bool,
    pub density_scale: f32,
}

impl Default for ClusterConfig
{
    fn default() -> Self
    {
        ClusterConfig
        {
            split_factor: 16,
            default_instances_per_leaf: 16,
            max_occlusion_queries_per_component: 16,
            min_occlusion_queries_per_component: 6,
            min_instances_per_occlusion_query: 256,
            min_verts_to_split_node: 16384,
            dithered_lod: true,
            overestimate_lod: false,
            force_lod: None,
            min_lod: 0,
            disable_cull: false,
            cull_all: false,
            minimum_screen_size: 0.000005,
            lod_distance_scale: 1.0,
            random_lod_range: 0.0,
            max_draw_distance_scale: 1.0,
            max_unbuilt_instances_to_classify: 1000,
            async_build_unbuilt_threshold: 1,
            auto_rebuild_on_instance_changes: true,
            density_scale: 1.0,
        }
    }
}

impl ClusterConfig
{
    /// Rejects values with which a build would not terminate or a traversal would be meaningless
    pub fn validate(&self) -> Result<(), ClusterError>
    {
        if self.split_factor < 2
        {
            return Err(ClusterError::InvalidConfig(format!("split_factor must be at least 2, got {}", self.split_factor)));
        }

        if self.default_instances_per_leaf == 0 || self.default_instances_per_leaf > MAX_INSTANCES_PER_LEAF
        {
            return Err(ClusterError::InvalidConfig(format!("default_instances_per_leaf must be in [1, {}], got {}",
                                                           MAX_INSTANCES_PER_LEAF, self.default_instances_per_leaf)));
        }

        if self.min_instances_per_occlusion_query == 0
        {
            return Err(ClusterError::InvalidConfig("min_instances_per_occlusion_query must be positive".to_string()));
        }

        let scales =
            [
                ("minimum_screen_size", self.minimum_screen_size),
                ("lod_distance_scale", self.lod_distance_scale),
                ("random_lod_range", self.random_lod_range),
                ("max_draw_distance_scale", self.max_draw_distance_scale),
            ];

        for (name, value) in &scales
        {
            if !value.is_finite() || *value < 0.0
            {
                return Err(ClusterError::InvalidConfig(format!("{} must be a non-negative number, got {}", name, value)));
            }
        }

        if !(0.0..=1.0).contains(&self.density_scale)
        {
            return Err(ClusterError::InvalidConfig(format!("density_scale must be in [0, 1], got {}", self.density_scale)));
        }

        Ok(())
    }

    /// The number of instances a leaf should hold so that one leaf is roughly `min_verts_to_split_node`
    /// vertices of the highest quality LOD
    ///
    /// `lod0_vertex_count` - number of vertices in LOD 0 of the mesh, or 0 if unknown
    pub fn desired_instances_per_leaf(&self, lod0_vertex_count: u32) -> usize
    {
        if lod0_vertex_count > 0
        {
            ((self.min_verts_to_split_node / lod0_vertex_count) as usize).max(1).min(MAX_INSTANCES_PER_LEAF)
        }
        else
        {
            self.default_instances_per_leaf
        }
    }

    /// Per LOD, the instance count below which a node is drawn as one run rather than split further
    ///
    /// `vertex_counts` - the number of vertices of each LOD of the mesh
    pub fn min_instances_to_split(&self, vertex_counts: &[u32]) -> Vec<usize>
    {
        vertex_counts.iter()
            .map(|x| if *x > 0 { (self.min_verts_to_split_node / x) as usize } else { 2 })
            .collect()
    }
}

lazy_static!
{
    /// Process wide defaults picked up by instance sets created without an explicit configuration
    pub static ref CLUSTER_CONFIG: RwLock<ClusterConfig> = RwLock::new(ClusterConfig::default());
}

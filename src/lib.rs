pub mod culling;
pub mod error;
pub mod flows;
pub mod helper_things;
pub mod threads;
pub mod world;

pub use crate::culling::convex_volume::ConvexVolume;
pub use crate::culling::traits::{Containment, TraversalDecider};
pub use crate::error::ClusterError;
pub use crate::flows::cluster_traversal_flow::{ClusterTraversalFlow, TraversalParams, TraversalSettings, TraversalStats};
pub use crate::flows::instance_runs::{InstanceRun, LodRunLists};
pub use crate::flows::lod_selection::LodDistancePlanes;
pub use crate::flows::shared_constants::{CLUSTER_CONFIG, ClusterConfig};
pub use crate::threads::async_build::BuildEvent;
pub use crate::world::bounding_volumes::aabb::StaticAABB;
pub use crate::world::cluster_builder::build_tree;
pub use crate::world::cluster_tree::{ClusterNode, ClusterTree, NodeRange};
pub use crate::world::hierarchical_instances::HierarchicalInstances;

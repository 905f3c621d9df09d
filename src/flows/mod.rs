pub mod cluster_traversal_flow;
pub mod instance_runs;
pub mod lod_selection;
pub mod shared_constants;

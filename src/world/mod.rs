pub mod bounding_volumes;
pub mod cluster_builder;
pub mod cluster_tree;
pub mod dimension;
pub mod hierarchical_instances;
pub mod spatial_splitter;

use nalgebra_glm::vec3;
use rand::{Rng, SeedableRng};
use rand::rngs::StdRng;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use instance_cluster::{build_tree, ClusterConfig, ClusterTraversalFlow, ConvexVolume, LodDistancePlanes, StaticAABB, TraversalParams, TraversalSettings};

/// Builds a tree over instances scattered across a square and dumps it level by level.
///
/// Usage: cluster_inspect [instance count] [seed]
fn main()
{
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let mut args = std::env::args().skip(1);
    let instance_count = args.next().and_then(|x| x.parse::<usize>().ok()).unwrap_or(1000);
    let seed = args.next().and_then(|x| x.parse::<u64>().ok()).unwrap_or(0x238946);

    let square_length = 10000.0;
    let mesh_half_size = 100.0;
    let instances_per_leaf = 16;

    let mut rng = StdRng::seed_from_u64(seed);
    let transforms = (0..instance_count)
        .map(|_| nalgebra_glm::translation(&vec3(rng.gen_range(0.0..square_length), rng.gen_range(0.0..square_length), 0.0)))
        .collect::<Vec<_>>();

    let mesh_bounds = StaticAABB::from_corners(vec3(-mesh_half_size, -mesh_half_size, -mesh_half_size), vec3(mesh_half_size, mesh_half_size, mesh_half_size));
    let config = ClusterConfig::default();

    let tree = build_tree(&transforms, &mesh_bounds, instances_per_leaf, None, &config);

    info!("{} instances, {} nodes, {:.2} instances per leaf, occlusion layer of {} nodes",
          tree.built_instance_count(), tree.node_count(), tree.actual_instances_per_leaf(), tree.occlusion_bounds().len());

    for (level, nodes) in tree.level_report().iter().enumerate()
    {
        info!("Level {}: {} nodes", level, nodes.len());

        for node in nodes
        {
            info!("    node {} (parent {:?}): {} children, {} instances, min {:?}, max {:?}",
                  node.node, node.parent, node.child_count, node.instance_count,
                  node.bounds.bound_min().as_slice(), node.bounds.bound_max().as_slice());
        }
    }

    let root_bounds = match tree.bounds()
    {
        Some(bounds) => bounds,
        None =>
            {
                warn!("Tree is empty, nothing to traverse");
                return;
            }
    };

    let culler = ConvexVolume::enclosing_aabb(&root_bounds);
    let lod_planes = LodDistancePlanes::infinite(1);

    let params = TraversalParams
    {
        culler: &culler,
        view_origins: [root_bounds.centre(); 2],
        lod_planes: &lod_planes,
        min_instances_to_split: &[instances_per_leaf],
        occlusion_results: None,
        settings: TraversalSettings::from(&config)
    };

    let (runs, stats) = ClusterTraversalFlow::traverse(&tree, &params);

    info!("Full view traversal drew {} instances in {} runs, visiting {} nodes",
          stats.lod_instances.iter().sum::<usize>(), runs.runs(0).len(), stats.visited_nodes);
}

pub mod convex_volume;
pub mod occlusion_results;
pub mod traits;

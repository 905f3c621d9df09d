pub mod aabb_helper_functions;
pub mod density_scaling;

use nalgebra_glm::TMat4;
use crate::flows::shared_constants::ClusterConfig;
use crate::helper_things::aabb_helper_functions::ViewDistances;

const MIN_SCREEN_RADIUS: f32 = 0.0000001;

/// Per LOD draw distance planes. `max[lod]` is the distance at which `lod` stops being drawn;
/// `min[lod]` is the start of the band in which it overlaps with the next LOD. The last entry is
/// the final cull distance
#[derive(Clone, Debug, PartialEq)]
pub struct LodDistancePlanes
{
    pub min: Vec<f32>,
    pub max: Vec<f32>,
}

/// Distance at which a sphere of the given radius covers the given fraction of the screen
///
/// `screen_size` - fraction of the screen the bounds cover
/// `sphere_radius` - radius of the bounding sphere of the mesh
/// `projection_matrix` - the projection matrix of the view
pub fn bounds_draw_distance(screen_size: f32, sphere_radius: f32, projection_matrix: &TMat4<f32>) -> f32
{
    let screen_multiple = (0.5 * projection_matrix[(0, 0)]).max(0.5 * projection_matrix[(1, 1)]);
    let screen_radius = (screen_size * 0.5).max(MIN_SCREEN_RADIUS);

    screen_multiple * sphere_radius / screen_radius
}

impl LodDistancePlanes
{
    /// Creates planes from the distance at which each LOD ends
    ///
    /// `lod_end_distances` - one distance per LOD; the last one is the cull distance
    /// `random_lod_range` - width of the band in which neighbouring LODs overlap
    pub fn from_distances(lod_end_distances: &[f32], random_lod_range: f32) -> LodDistancePlanes
    {
        LodDistancePlanes
        {
            min: lod_end_distances.iter().map(|x| x - random_lod_range).collect(),
            max: lod_end_distances.to_vec()
        }
    }

    /// Planes under which nothing is ever distance culled and every node resolves to LOD 0
    pub fn infinite(lod_count: usize) -> LodDistancePlanes
    {
        LodDistancePlanes::from_distances(&vec![f32::MAX; lod_count], 0.0)
    }

    /// Derives the planes from the screen size at which each LOD starts being used
    ///
    /// `screen_sizes` - per LOD screen size; entry 0 is unused
    /// `sphere_radius` - radius of the bounding sphere of the mesh
    /// `projection_matrix` - the projection matrix of the view
    /// `end_cull_distance` - instance end cull distance; 0 disables it
    /// `config` - source of the minimum screen size and the distance scales
    pub fn from_screen_sizes(screen_sizes: &[f32], sphere_radius: f32, projection_matrix: &TMat4<f32>, end_cull_distance: f32, config: &ClusterConfig) -> LodDistancePlanes
    {
        let mut final_cull = f32::MAX;

        if config.minimum_screen_size > 0.0
        {
            final_cull = bounds_draw_distance(config.minimum_screen_size, sphere_radius, projection_matrix) * config.lod_distance_scale;
        }

        if end_cull_distance > 0.0
        {
            final_cull = final_cull.min(end_cull_distance * config.max_draw_distance_scale);
        }

        let mut distances = screen_sizes.iter()
            .skip(1)
            .map(|x| bounds_draw_distance(*x, sphere_radius, projection_matrix) * config.lod_distance_scale)
            .collect::<Vec<f32>>();
        distances.push(final_cull);

        LodDistancePlanes::from_distances(&distances, config.random_lod_range)
    }

    pub fn lod_count(&self) -> usize
    {
        self.max.len()
    }

    /// Distance beyond which nothing is drawn
    pub fn cull_distance(&self) -> f32
    {
        self.max.last().copied().unwrap_or(f32::MAX)
    }

    /// Narrows `[min_lod, max_lod]` so that it only holds LODs that some point of a volume at the
    /// given distances could be drawn with. Either bound equal to the LOD count stands for the
    /// culled band; `min_lod` reaches it if the volume is entirely beyond the cull distance
    ///
    /// `distances` - nearest and farthest distance from the volume to the view origins
    /// `min_lod` - finest LOD still possible
    /// `max_lod` - coarsest LOD still possible
    pub fn narrow(&self, distances: &ViewDistances, min_lod: &mut usize, max_lod: &mut usize)
    {
        while *max_lod > *min_lod && distances.near > self.max[*min_lod]
        {
            *min_lod += 1;
        }

        while *max_lod > *min_lod && distances.far < self.min[*max_lod - 1]
        {
            *max_lod -= 1;
        }
    }
}

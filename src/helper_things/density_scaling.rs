use rand::{Rng, SeedableRng};
use rand::rngs::StdRng;

/// Creates an exclusion mask that keeps roughly `density_scale` of the instances. The same seed
/// always excludes the same instances
///
/// `instance_count` - number of entries in the mask
/// `density_scale` - fraction of instances to keep, in [0, 1]
/// `seed` - seed of the random stream deciding which instances go
pub fn density_exclusion_mask(instance_count: usize, density_scale: f32, seed: u64) -> Vec<bool>
{
    if density_scale <= 0.0
    {
        return vec![true; instance_count];
    }

    if density_scale >= 1.0
    {
        return vec![false; instance_count];
    }

    let mut rng = StdRng::seed_from_u64(seed);

    (0..instance_count).map(|_| rng.gen::<f32>() > density_scale).collect()
}

#[cfg(test)]
mod tests
{
    use super::*;

    #[test]
    fn extremes_keep_or_drop_everything()
    {
        assert!(density_exclusion_mask(50, 1.0, 1).iter().all(|x| !*x));
        assert!(density_exclusion_mask(50, 0.0, 1).iter().all(|x| *x));
    }

    #[test]
    fn half_density_drops_about_half()
    {
        let mask = density_exclusion_mask(10_000, 0.5, 42);
        let excluded = mask.iter().filter(|x| **x).count();

        assert!(excluded > 4500 && excluded < 5500);
        assert_eq!(mask, density_exclusion_mask(10_000, 0.5, 42));
    }
}

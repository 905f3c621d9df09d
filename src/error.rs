/// Errors surfaced to callers of the instance set. Degenerate input (no instances, unloaded mesh,
/// everything excluded) is not an error; it produces an empty tree instead
#[derive(Debug, thiserror::Error)]
pub enum ClusterError
{
    #[error("invalid cluster configuration: {0}")]
    InvalidConfig(String),

    #[error("instance index {index} is out of range for {count} instances")]
    InstanceOutOfRange { index: usize, count: usize },

    #[error("exclusion mask covers {mask} instances but the set holds {count}")]
    ExclusionMaskLength { mask: usize, count: usize },

    #[error("cluster tree serialization error: {0}")]
    Serialization(#[from] bincode::Error),
}

use hashbrown::HashMap;

/// Visibility verdicts one view produced for the occlusion layer of a tree
#[derive(Clone, Debug, PartialEq)]
struct FrameOcclusionResults
{
    frame_number: u64,
    visibility: Vec<bool>,
}

/// Keeps the last occlusion results received per view. Results are only handed out for the frame
/// they were stored in, and only if they were produced against the tree that is currently in use
#[derive(Clone, Debug, Default)]
pub struct OcclusionResultCache
{
    results: HashMap<u32, FrameOcclusionResults>,
    occlusion_layer_len: usize,
    tree_created_frame: Option<u64>,
}

impl OcclusionResultCache
{
    pub fn new() -> OcclusionResultCache
    {
        OcclusionResultCache::default()
    }

    /// Forgets every stored result and records the shape of a newly published tree
    ///
    /// `occlusion_layer_len` - number of nodes in the new tree's occlusion layer
    /// `frame_number` - the frame in which the tree was published
    pub fn reset_for_tree(&mut self, occlusion_layer_len: usize, frame_number: u64)
    {
        self.results.clear();
        self.occlusion_layer_len = occlusion_layer_len;
        self.tree_created_frame = Some(frame_number);
    }

    /// Stores the results for a view. Returns false if they were rejected because they do not
    /// match the current occlusion layer or were produced before the current tree existed
    ///
    /// `view_key` - identifies the view that issued the queries
    /// `frame_number` - the frame the results belong to
    /// `visibility` - one entry per occlusion layer node; false means the node was occluded
    pub fn store(&mut self, view_key: u32, frame_number: u64, visibility: Vec<bool>) -> bool
    {
        let tree_is_older = match self.tree_created_frame
        {
            Some(created) => created < frame_number,
            None => false
        };

        if visibility.len() != self.occlusion_layer_len || !tree_is_older
        {
            return false;
        }

        if !self.results.contains_key(&view_key)
        {
            self.results.retain(|_, x| x.frame_number == frame_number);
        }

        self.results.insert(view_key, FrameOcclusionResults{ frame_number, visibility });
        true
    }

    /// Returns the results a view stored in the given frame, if any
    ///
    /// `view_key` - identifies the view being traversed
    /// `frame_number` - the frame being rendered
    pub fn results_for(&self, view_key: u32, frame_number: u64) -> Option<&[bool]>
    {
        self.results.get(&view_key)
            .filter(|x| x.frame_number == frame_number)
            .map(|x| x.visibility.as_slice())
    }

    pub fn stored_view_count(&self) -> usize
    {
        self.results.len()
    }
}

#[cfg(test)]
mod tests
{
    use super::*;

    #[test]
    fn results_must_match_layer_and_tree_age()
    {
        let mut cache = OcclusionResultCache::new();
        assert!(!cache.store(1, 5, vec![true; 4]));

        cache.reset_for_tree(4, 5);

        assert!(!cache.store(1, 5, vec![true; 4]));
        assert!(!cache.store(1, 6, vec![true; 3]));
        assert!(cache.store(1, 6, vec![true, false, true, true]));

        assert_eq!(cache.results_for(1, 6), Some(&[true, false, true, true][..]));
        assert_eq!(cache.results_for(1, 7), None);
        assert_eq!(cache.results_for(2, 6), None);
    }

    #[test]
    fn stale_views_are_evicted_when_a_new_view_arrives()
    {
        let mut cache = OcclusionResultCache::new();
        cache.reset_for_tree(2, 0);

        assert!(cache.store(1, 1, vec![true, true]));
        assert!(cache.store(2, 2, vec![false, true]));

        assert_eq!(cache.stored_view_count(), 1);
        assert_eq!(cache.results_for(2, 2), Some(&[false, true][..]));
    }

    #[test]
    fn new_tree_drops_old_results()
    {
        let mut cache = OcclusionResultCache::new();
        cache.reset_for_tree(2, 0);
        assert!(cache.store(1, 1, vec![true, true]));

        cache.reset_for_tree(3, 1);

        assert_eq!(cache.results_for(1, 1), None);
        assert_eq!(cache.stored_view_count(), 0);
    }
}

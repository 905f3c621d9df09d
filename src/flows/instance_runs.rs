use serde::{Serialize, Deserialize};

/// An inclusive range of render slots drawn together at one LOD
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstanceRun
{
    pub first: u32,
    pub last: u32,
}

impl InstanceRun
{
    pub fn new(first: u32, last: u32) -> InstanceRun
    {
        debug_assert!(first <= last, "Instance run {}..={} is reversed", first, last);
        InstanceRun{ first, last }
    }

    pub fn count(&self) -> usize
    {
        (self.last - self.first) as usize + 1
    }
}

/// Output of a traversal: one list of runs per LOD. Runs that touch the end of the previous run in
/// the same list are merged into it
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LodRunLists
{
    runs: Vec<Vec<InstanceRun>>,
    dithered: bool,
    overestimate: bool,
}

impl LodRunLists
{
    /// `lod_count` - number of LOD buckets
    /// `dithered` - whether a run is written into every LOD of its range
    /// `overestimate` - in single LOD mode, pick the coarsest LOD of the range instead of the finest
    pub fn new(lod_count: usize, dithered: bool, overestimate: bool) -> LodRunLists
    {
        LodRunLists{ runs: vec![Vec::new(); lod_count], dithered, overestimate }
    }

    pub fn lod_count(&self) -> usize
    {
        self.runs.len()
    }

    pub fn runs(&self, lod: usize) -> &[InstanceRun]
    {
        &self.runs[lod]
    }

    pub fn all_runs(&self) -> &[Vec<InstanceRun>]
    {
        &self.runs
    }

    pub fn instance_count(&self, lod: usize) -> usize
    {
        self.runs[lod].iter().map(|x| x.count()).sum()
    }

    pub fn is_empty(&self) -> bool
    {
        self.runs.iter().all(|x| x.is_empty())
    }

    /// Adds a run for a node whose LOD has been narrowed to `[min_lod, max_lod]`
    ///
    /// `first` - first render slot of the run
    /// `last` - last render slot of the run
    /// `min_lod` - finest LOD the run may be drawn with
    /// `max_lod` - coarsest LOD the run may be drawn with
    pub fn add_run(&mut self, first: u32, last: u32, min_lod: usize, max_lod: usize)
    {
        if self.dithered
        {
            for lod in min_lod..=max_lod
            {
                self.push_merged(lod, first, last);
            }
        }
        else
        {
            let lod = if self.overestimate { max_lod } else { min_lod };
            self.push_merged(lod, first, last);
        }
    }

    fn push_merged(&mut self, lod: usize, first: u32, last: u32)
    {
        let lod_runs = &mut self.runs[lod];

        if let Some(previous) = lod_runs.last_mut()
        {
            if previous.last + 1 == first
            {
                previous.last = last;
                return;
            }
        }

        lod_runs.push(InstanceRun::new(first, last));
    }

    /// Splits every run around the slots for which `omitted` returns true
    ///
    /// `omitted` - returns true for render slots that no longer hold an instance
    pub fn without_slots<F: Fn(u32) -> bool>(&self, omitted: F) -> LodRunLists
    {
        let mut filtered = LodRunLists::new(self.runs.len(), self.dithered, self.overestimate);

        for (lod, lod_runs) in self.runs.iter().enumerate()
        {
            for run in lod_runs
            {
                let mut run_start: Option<u32> = None;

                for slot in run.first..=run.last
                {
                    match (omitted(slot), run_start)
                    {
                        (true, Some(start)) =>
                            {
                                filtered.push_merged(lod, start, slot - 1);
                                run_start = None;
                            },
                        (false, None) => run_start = Some(slot),
                        _ => {}
                    }
                }

                if let Some(start) = run_start
                {
                    filtered.push_merged(lod, start, run.last);
                }
            }
        }

        filtered
    }
}

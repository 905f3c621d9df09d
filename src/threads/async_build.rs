use std::sync::Arc;
use std::time::Instant;
use parking_lot::{Condvar, Mutex};
use tracing::debug;
use crate::world::cluster_builder::ClusterBuilder;
use crate::world::cluster_tree::ClusterTree;

/// What happened to the instance set when a pending build was polled
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum BuildEvent
{
    /// No build was in flight
    Idle,
    StillBuilding,
    /// The finished tree was published
    Applied,
    /// The finished tree was dropped because a synchronous build superseded it
    Discarded,
    /// The finished tree was dropped because of changes made while building; a new build was started
    Restarted,
}

/// What the owner of a build should do with a finished build
#[derive(Debug)]
pub enum BuildOutcome
{
    Idle,
    StillBuilding,
    /// Publish the tree. `input_count` is how many instances the build snapshot held
    Accept{ tree: ClusterTree, input_count: usize },
    /// Drop the result and do nothing
    Discard,
    /// Drop the result and build again from the current instances
    Restart,
}

/// Slot written by the worker when the build finishes
struct BuildCompletion
{
    tree: Mutex<Option<ClusterTree>>,
    finished: Condvar,
}

struct InFlightBuild
{
    completion: Arc<BuildCompletion>,
    input_count: usize,
    started: Instant,
}

/// Runs at most one tree build at a time on the rayon thread pool and decides, when it finishes,
/// whether its result may still be used
pub struct AsyncBuildCoordinator
{
    in_flight: Option<InFlightBuild>,
    concurrent_changes: bool,
    discard_result: bool,
}

impl Default for AsyncBuildCoordinator
{
    fn default() -> Self
    {
        AsyncBuildCoordinator::new()
    }
}

impl AsyncBuildCoordinator
{
    pub fn new() -> AsyncBuildCoordinator
    {
        AsyncBuildCoordinator{ in_flight: None, concurrent_changes: false, discard_result: false }
    }

    pub fn is_building(&self) -> bool
    {
        self.in_flight.is_some()
    }

    /// Moves the build onto a worker thread. Must not be called while another build is in flight
    ///
    /// `builder` - snapshot of the instances to build from
    pub fn start(&mut self, builder: ClusterBuilder)
    {
        debug_assert!(self.in_flight.is_none(), "Started a cluster build while another one is in flight");

        let completion = Arc::new(BuildCompletion{ tree: Mutex::new(None), finished: Condvar::new() });
        let worker_completion = completion.clone();
        let input_count = builder.original_instance_count();

        self.concurrent_changes = false;
        self.discard_result = false;
        self.in_flight = Some(InFlightBuild{ completion, input_count, started: Instant::now() });

        debug!("Starting async cluster build of {} instances", input_count);

        rayon::spawn(move ||
            {
                let tree = builder.build();
                *worker_completion.tree.lock() = Some(tree);
                worker_completion.finished.notify_all();
            });
    }

    /// Records a change that the in flight build cannot reconcile, such as a removal
    pub fn mark_concurrent_change(&mut self)
    {
        if self.in_flight.is_some()
        {
            self.concurrent_changes = true;
        }
    }

    /// Makes the in flight build's result be rebuilt from the current instances, even if it was
    /// previously marked to be discarded
    pub fn request_restart(&mut self)
    {
        if self.in_flight.is_some()
        {
            self.concurrent_changes = true;
            self.discard_result = false;
        }
    }

    /// Makes the in flight build's result be dropped without starting another build
    pub fn discard_in_flight(&mut self)
    {
        if self.in_flight.is_some()
        {
            self.discard_result = true;
        }
    }

    /// Checks, without blocking, whether the in flight build has finished
    pub fn poll(&mut self) -> BuildOutcome
    {
        let finished_tree = match &self.in_flight
        {
            None => return BuildOutcome::Idle,
            Some(build) => build.completion.tree.lock().take()
        };

        let tree = match finished_tree
        {
            None => return BuildOutcome::StillBuilding,
            Some(tree) => tree
        };

        let build = match self.in_flight.take()
        {
            Some(build) => build,
            None => return BuildOutcome::Idle
        };

        debug!("Async cluster build of {} instances finished in {:?}", build.input_count, build.started.elapsed());

        if self.discard_result
        {
            self.discard_result = false;
            self.concurrent_changes = false;
            BuildOutcome::Discard
        }
        else if self.concurrent_changes
        {
            self.concurrent_changes = false;
            BuildOutcome::Restart
        }
        else
        {
            BuildOutcome::Accept{ tree, input_count: build.input_count }
        }
    }

    /// Blocks until the in flight build, if any, has finished. The result still has to be collected
    /// with `poll`
    pub fn wait_for_completion(&self)
    {
        if let Some(build) = &self.in_flight
        {
            let mut tree = build.completion.tree.lock();

            while tree.is_none()
            {
                build.completion.finished.wait(&mut tree);
            }
        }
    }
}

//! Worker pool that claims regions of active blocks and drives their
//! discharges (spec.md §4.5 "Region Scheduler", §5 "Concurrency & Resource
//! Model").
//!
//! Shape grounded on `examples/other_examples/b0ea8487_vcoppe-ddo-caching__src-solver-barrier.rs.rs`'s
//! `BarrierParallelSolver`: a `Shared` struct holding immutable references
//! plus one `Critical` struct behind a `parking_lot::Mutex`, a `Condvar` to
//! park idle workers, a `WorkLoad` enum describing what `get_workload`
//! handed back, and `std::thread::scope` to spawn the pool — not `rayon`,
//! whose work-stealing pool does not expose the long-parked,
//! manually-released-region claim model this scheduler needs (`rayon` is
//! used elsewhere, for `layout.rs`'s bulk table precomputation and
//! `regular_graph.rs`'s page-grouped block allocation).
//!
//! Per-block mutable access is granted through `src/unsafe_slice.rs`'s
//! `UnsafeSlice`: the `Critical` mutex is the only thing that proves no two
//! workers hold overlapping claims, so it is safe to hand out `&mut Block`
//! views without a per-block lock.

use std::collections::VecDeque;

use log::{debug, info, warn};
use num::{CheckedAdd, PrimInt, Signed};
use parking_lot::{Condvar, Mutex};
use rustc_hash::FxHashSet;

use crate::block::Block;
use crate::boundary::BoundaryMessage;
use crate::discharge::{self, ActiveBuckets};
use crate::global_relabel;
use crate::layout::Layout;
use crate::region_error::RegionFlowError;
use crate::unsafe_slice::UnsafeSlice;

/// Tuning knobs from spec.md §6, collected here since the scheduler is the
/// component that reads all of them.
#[derive(Debug, Clone, Copy)]
pub struct SchedulerConfig {
    pub thread_count: usize,
    pub max_blocks_per_region: usize,
    pub discharges_per_block: usize,
    pub bucket_density: usize,
    pub global_update_frequency: usize,
}

enum WorkLoad {
    Complete,
    GlobalRelabel,
    Region { blocks: Vec<usize>, fringe: Vec<usize> },
}

struct Critical {
    /// Block ids known active and not presently enqueued.
    active_queue: VecDeque<usize>,
    in_queue: Vec<bool>,
    locked: Vec<bool>,
    busy_workers: usize,
    relabel_pending: bool,
    relabel_in_progress: bool,
    discharges_since_relabel: usize,
    error: Option<RegionFlowError>,
}

struct Shared<'a, Cap, Flow> {
    layout: &'a Layout,
    blocks: UnsafeSlice<'a, Block<Cap, Flow>>,
    neighbors: &'a [Vec<usize>],
    config: SchedulerConfig,
    critical: Mutex<Critical>,
    monitor: Condvar,
}

impl<'a, Cap, Flow> Shared<'a, Cap, Flow>
where
    Cap: PrimInt + Signed + CheckedAdd + Send + Sync,
    Flow: PrimInt + Signed + CheckedAdd + Send + Sync,
{
    fn block_is_active(&self, block_id: usize) -> bool {
        // SAFETY: reading `is_active` is a plain atomic load; no exclusivity
        // requirement.
        unsafe { self.blocks.get(block_id) }.is_active()
    }

    fn try_claim_region(&self, critical: &mut Critical) -> Option<(Vec<usize>, Vec<usize>)> {
        while let Some(candidate) = critical.active_queue.pop_front() {
            critical.in_queue[candidate] = false;
            if critical.locked[candidate] || !self.block_is_active(candidate) {
                continue;
            }

            let mut region = vec![candidate];
            let mut region_set: FxHashSet<usize> = FxHashSet::default();
            region_set.insert(candidate);
            let mut frontier = VecDeque::from([candidate]);
            while region.len() < self.config.max_blocks_per_region {
                let Some(cur) = frontier.pop_front() else {
                    break;
                };
                for &nbr in &self.neighbors[cur] {
                    if region.len() >= self.config.max_blocks_per_region {
                        break;
                    }
                    if region_set.contains(&nbr) || critical.locked[nbr] {
                        continue;
                    }
                    if self.block_is_active(nbr) {
                        region.push(nbr);
                        region_set.insert(nbr);
                        frontier.push_back(nbr);
                    }
                }
            }

            let fringe_of = |region_set: &FxHashSet<usize>, region: &[usize], neighbors: &[Vec<usize>]| {
                let mut fringe = FxHashSet::default();
                for &b in region {
                    for &nbr in &neighbors[b] {
                        if !region_set.contains(&nbr) {
                            fringe.insert(nbr);
                        }
                    }
                }
                fringe
            };

            let mut fringe = fringe_of(&region_set, &region, self.neighbors);
            if fringe.iter().any(|&f| critical.locked[f]) {
                warn!("region claim for block {candidate} contested, shrinking to single block");
                region = vec![candidate];
                region_set = FxHashSet::default();
                region_set.insert(candidate);
                fringe = fringe_of(&region_set, &region, self.neighbors);
                if fringe.iter().any(|&f| critical.locked[f]) {
                    self.enqueue(critical, candidate);
                    continue;
                }
            }

            for &b in region.iter().chain(fringe.iter()) {
                critical.locked[b] = true;
            }
            return Some((region, fringe.into_iter().collect()));
        }
        None
    }

    fn enqueue(&self, critical: &mut Critical, block_id: usize) {
        if !critical.in_queue[block_id] {
            critical.in_queue[block_id] = true;
            critical.active_queue.push_back(block_id);
        }
    }

    fn release_region(&self, region: &[usize], fringe: &[usize]) {
        let mut critical = self.critical.lock();
        for &b in region.iter().chain(fringe.iter()) {
            critical.locked[b] = false;
        }
        for &b in region {
            if self.block_is_active(b) {
                self.enqueue(&mut critical, b);
            }
        }
        critical.busy_workers -= 1;
        if critical.discharges_since_relabel
            >= self.config.global_update_frequency.max(1) * self.blocks_len()
        {
            critical.relabel_pending = true;
        }
        self.monitor.notify_all();
    }

    fn blocks_len(&self) -> usize {
        self.neighbors.len()
    }

    fn get_workload(&self) -> WorkLoad {
        let mut critical = self.critical.lock();
        loop {
            if critical.error.is_some() {
                return WorkLoad::Complete;
            }
            if critical.relabel_pending {
                if critical.busy_workers == 0 {
                    critical.relabel_pending = false;
                    critical.relabel_in_progress = true;
                    return WorkLoad::GlobalRelabel;
                }
                self.monitor.wait(&mut critical);
                continue;
            }
            if critical.relabel_in_progress {
                self.monitor.wait(&mut critical);
                continue;
            }
            if let Some((region, fringe)) = self.try_claim_region(&mut critical) {
                critical.busy_workers += 1;
                return WorkLoad::Region {
                    blocks: region,
                    fringe,
                };
            }
            if critical.busy_workers == 0 && critical.active_queue.is_empty() {
                return WorkLoad::Complete;
            }
            self.monitor.wait(&mut critical);
        }
    }

    fn finish_global_relabel(&self, newly_active: Vec<usize>) {
        let mut critical = self.critical.lock();
        critical.relabel_in_progress = false;
        critical.discharges_since_relabel = 0;
        for b in newly_active {
            self.enqueue(&mut critical, b);
        }
        self.monitor.notify_all();
    }

    fn report_error(&self, err: RegionFlowError) {
        let mut critical = self.critical.lock();
        if critical.error.is_none() {
            critical.error = Some(err);
        }
        self.monitor.notify_all();
    }
}

/// Runs the solver to completion: seeds the active queue, spawns
/// `config.thread_count` workers under `std::thread::scope`, and returns
/// once the active set is empty and every worker is idle (spec.md §2, §5).
pub fn run<Cap, Flow>(
    layout: &Layout,
    blocks: &mut [Block<Cap, Flow>],
    neighbors: &[Vec<usize>],
    config: SchedulerConfig,
) -> Result<(), RegionFlowError>
where
    Cap: PrimInt + Signed + CheckedAdd + Send + Sync,
    Flow: PrimInt + Signed + CheckedAdd + Send + Sync,
{
    let block_count = blocks.len();
    let initially_active: Vec<usize> = (0..block_count)
        .filter(|&b| blocks[b].is_active())
        .collect();

    let shared = Shared {
        layout,
        blocks: UnsafeSlice::new(blocks),
        neighbors,
        config,
        critical: Mutex::new(Critical {
            active_queue: VecDeque::new(),
            in_queue: vec![false; block_count],
            locked: vec![false; block_count],
            busy_workers: 0,
            relabel_pending: false,
            relabel_in_progress: false,
            discharges_since_relabel: 0,
            error: None,
        }),
        monitor: Condvar::new(),
    };
    {
        let mut critical = shared.critical.lock();
        for b in initially_active {
            shared.enqueue(&mut critical, b);
        }
    }

    info!(
        "starting region scheduler: {} blocks, {} threads",
        block_count, config.thread_count
    );

    std::thread::scope(|scope| {
        for worker_id in 0..config.thread_count.max(1) {
            let shared = &shared;
            scope.spawn(move || worker_loop(shared, worker_id));
        }
    });

    let critical = shared.critical.lock();
    if let Some(err) = critical.error.clone() {
        return Err(err);
    }
    Ok(())
}

fn worker_loop<Cap, Flow>(shared: &Shared<Cap, Flow>, worker_id: usize)
where
    Cap: PrimInt + Signed + CheckedAdd + Send + Sync,
    Flow: PrimInt + Signed + CheckedAdd + Send + Sync,
{
    loop {
        match shared.get_workload() {
            WorkLoad::Complete => return,
            WorkLoad::GlobalRelabel => {
                info!("worker {worker_id} performing global relabel");
                match global_relabel::run(shared.layout, &shared.blocks, shared.neighbors.len()) {
                    Ok(newly_active) => shared.finish_global_relabel(newly_active),
                    Err(err) => {
                        shared.report_error(err);
                        shared.finish_global_relabel(Vec::new());
                    }
                }
            }
            WorkLoad::Region { blocks, fringe } => {
                if let Err(err) = process_region(shared, &blocks) {
                    shared.report_error(err);
                }
                shared.release_region(&blocks, &fringe);
            }
        }
    }
}

fn process_region<Cap, Flow>(
    shared: &Shared<Cap, Flow>,
    region: &[usize],
) -> Result<(), RegionFlowError>
where
    Cap: PrimInt + Signed + CheckedAdd + Send + Sync,
    Flow: PrimInt + Signed + CheckedAdd + Send + Sync,
{
    let mut total_discharges = 0usize;
    for &block_id in region {
        // SAFETY: `block_id` is locked by this worker's claim (region ∪
        // fringe) for the duration of this call, and the scheduler never
        // hands out the same block id to two concurrently running regions.
        let block = unsafe { shared.blocks.get(block_id) };
        let mut active = ActiveBuckets::new(shared.config.bucket_density, shared.layout.nodes_per_block());
        // Re-seed the local active set from whatever nodes carry excess;
        // the bucket structure itself is rebuilt per quantum since it is
        // cheap relative to a discharge pass.
        for node_subid in 0..shared.layout.nodes_per_block() {
            if block.excess[node_subid] > Flow::zero() {
                active.push(node_subid, block.label[node_subid]);
            }
        }
        let outgoing = discharge::run_block_quantum(
            shared.layout,
            block,
            &mut active,
            shared.config.discharges_per_block,
        )?;
        total_discharges += 1;
        deliver_messages(shared, outgoing)?;
    }

    let mut critical = shared.critical.lock();
    critical.discharges_since_relabel += total_discharges;
    Ok(())
}

fn deliver_messages<Cap, Flow>(
    shared: &Shared<Cap, Flow>,
    outgoing: Vec<(usize, BoundaryMessage<Flow>)>,
) -> Result<(), RegionFlowError>
where
    Cap: PrimInt + Signed + CheckedAdd + Send + Sync,
    Flow: PrimInt + Signed + CheckedAdd + Send + Sync,
{
    for (dst_block, message) in outgoing {
        // SAFETY: `dst_block` is part of the current region's locked fringe
        // (or the region itself); the inbox itself is additionally
        // protected by its own mutex for the benefit of any other worker
        // that might concurrently be delivering into the same block from a
        // different region's fringe.
        let block = unsafe { shared.blocks.get(dst_block) };
        block.inbox.push(message);
        block.set_active(true);
        debug!("delivered message to block {dst_block}");
    }
    Ok(())
}

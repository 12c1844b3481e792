//! Synchronous reverse BFS from the sink, recomputing exact distance labels
//! across every block (spec.md §4.6 "Global Relabel").
//!
//! Grounded on `src/bfs.rs::run_with_filter`'s shape (parent/frontier
//! `VecDeque`, `log::debug!`/`info!` timing) adapted from one `StaticGraph`
//! to the blocked residual graph: instead of a single node array, each
//! step's neighbor lookup goes through the layout's shift table the way
//! `src/discharge.rs` does for forward pushes, but walks arcs in reverse —
//! for node `v`'s arc to neighbor `w`, the residual arc carrying flow
//! *into* `v` is `w`'s own arc back to `v`, found via `layout.sister`, which
//! is exactly the table the forward push path already needed.

use std::collections::VecDeque;

use log::{debug, info};
use num::{CheckedAdd, PrimInt, Signed};

use crate::block::{Block, LABEL_UNREACHABLE};
use crate::layout::Layout;
use crate::region_error::RegionFlowError;
use crate::unsafe_slice::UnsafeSlice;

/// Recomputes every block's `label` array and returns the block ids left
/// active afterward. Caller must guarantee exclusive access to every block
/// for the duration of the call (spec.md §5: "Global relabel observes a
/// globally consistent snapshot because all workers are parked").
pub fn run<Cap, Flow>(
    layout: &Layout,
    blocks: &UnsafeSlice<Block<Cap, Flow>>,
    block_count: usize,
) -> Result<Vec<usize>, RegionFlowError>
where
    Cap: PrimInt + Signed + CheckedAdd,
    Flow: PrimInt + Signed + CheckedAdd,
{
    let nodes_per_block = layout.nodes_per_block();
    info!("global relabel: resetting labels across {block_count} blocks");

    for b in 0..block_count {
        let block = unsafe { blocks.get(b) };
        for label in block.label.iter_mut() {
            *label = LABEL_UNREACHABLE;
        }
    }

    let mut queue: VecDeque<(usize, usize)> = VecDeque::new();
    for b in 0..block_count {
        let block = unsafe { blocks.get(b) };
        for node_subid in 0..nodes_per_block {
            if block.term_cap_snk[node_subid] > Cap::zero() {
                block.label[node_subid] = 1;
                queue.push_back((b, node_subid));
            }
        }
    }
    debug!("global relabel: seeded {} sink-adjacent nodes", queue.len());

    let mut visited_count = 0usize;
    while let Some((b, node_subid)) = queue.pop_front() {
        visited_count += 1;
        let cur_label = unsafe { blocks.get(b) }.label[node_subid];
        let (local_cell_index, cell_kind) = layout.local_cell_of(node_subid);
        let global_cell = layout.compose_global_cell(b, local_cell_index);
        let node_location = layout.node_location_of(&global_cell);
        let block_location = layout.block_location_of(&layout.local_cell_coord(&global_cell));
        let mask = layout.edge_mask(cell_kind, node_location);
        let shifts = layout.shifts(cell_kind, block_location);
        let arcs = layout.arcs(cell_kind);

        for (edge_idx, _arc) in arcs.iter().enumerate() {
            if !mask[edge_idx] {
                continue;
            }
            let (delta_block, delta_subid) = shifts[edge_idx];
            let predecessor_block = (b as i64 + delta_block) as usize;
            let predecessor_subid = (node_subid as i64 + delta_subid) as usize;
            let sister_idx = layout.sister(cell_kind, edge_idx);

            let predecessor = unsafe { blocks.get(predecessor_block) };
            if predecessor.cap[predecessor_subid][sister_idx] > Cap::zero()
                && predecessor.label[predecessor_subid] == LABEL_UNREACHABLE
            {
                predecessor.label[predecessor_subid] = cur_label + 1;
                queue.push_back((predecessor_block, predecessor_subid));
            }
        }
    }
    debug!("global relabel: visited {visited_count} nodes from the sink");

    let mut newly_active = Vec::new();
    for b in 0..block_count {
        let block = unsafe { blocks.get(b) };
        let mut any_active = false;
        for node_subid in 0..nodes_per_block {
            if block.label[node_subid] == LABEL_UNREACHABLE && block.excess[node_subid] > Flow::zero() {
                block.return_excess_to_source(node_subid)?;
            }
            if block.excess[node_subid] > Flow::zero() {
                any_active = true;
            }
        }
        block.set_active(any_active);
        if any_active {
            newly_active.push(b);
        }
    }
    info!("global relabel: {} blocks active afterward", newly_active.len());
    Ok(newly_active)
}

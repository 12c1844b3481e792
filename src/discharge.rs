//! The per-block inner loop (spec.md §4.3 "Discharge Engine").
//!
//! Generalizes `src/push_relabel.rs::discharge`/`relabel` — same shape (pop
//! a node, push along admissible edges in order, relabel if still positive)
//! — to: a label-bucketed active-node FIFO keyed by `bucket_density` instead
//! of the teacher's unordered `Vec`, an inbox drain step the single-block
//! teacher has no counterpart for, an explicit sink terminal arc, and
//! gap-heuristic bookkeeping the teacher never implements.

use std::collections::VecDeque;

use log::{debug, trace, warn};
use num::{CheckedAdd, NumCast, PrimInt, Signed};

use crate::block::{Block, LABEL_UNREACHABLE};
use crate::boundary::BoundaryMessage;
use crate::layout::Layout;
use crate::region_error::RegionFlowError;

/// FIFO of locally active nodes, bucketed by `label / bucket_density` so
/// discharge can cheaply find "the lowest-label active node" without a full
/// scan — the label-bucket grain spec.md §6 calls `BucketDensity`.
pub struct ActiveBuckets {
    bucket_density: usize,
    buckets: Vec<VecDeque<usize>>,
    /// Count of active nodes at each *exact* label value, used for the gap
    /// heuristic: when a count drops to zero, every node with a strictly
    /// greater label is unreachable from the sink until the next global
    /// relabel.
    label_counts: Vec<usize>,
}

impl ActiveBuckets {
    pub fn new(bucket_density: usize, max_label: usize) -> Self {
        let bucket_density = bucket_density.max(1);
        let bucket_count = max_label / bucket_density + 2;
        Self {
            bucket_density,
            buckets: vec![VecDeque::new(); bucket_count],
            label_counts: vec![0; max_label + 2],
        }
    }

    fn bucket_of(&self, label: i32) -> usize {
        ((label.max(0) as usize) / self.bucket_density).min(self.buckets.len() - 1)
    }

    pub fn push(&mut self, node_subid: usize, label: i32) {
        self.buckets[self.bucket_of(label)].push_back(node_subid);
        if (label as usize) < self.label_counts.len() {
            self.label_counts[label as usize] += 1;
        }
    }

    fn note_vacated(&mut self, label: i32) {
        if label >= 0 && (label as usize) < self.label_counts.len() {
            self.label_counts[label as usize] -= 1;
        }
    }

    /// Pops the next node from the lowest non-empty bucket (FIFO order
    /// preserved within nodes of the same label, per spec.md §4.3's
    /// tie-breaking rule).
    pub fn pop(&mut self) -> Option<usize> {
        for bucket in &mut self.buckets {
            if let Some(node) = bucket.pop_front() {
                return Some(node);
            }
        }
        None
    }

    pub fn is_empty(&self) -> bool {
        self.buckets.iter().all(|b| b.is_empty())
    }

    /// True if no active node remains at `label` — the classic gap
    /// heuristic trigger (spec.md GLOSSARY "Gap heuristic").
    pub fn label_is_gap(&self, label: i32) -> bool {
        label >= 0 && (label as usize) < self.label_counts.len() && self.label_counts[label as usize] == 0
    }
}

/// Runs up to `discharges_per_block` discharges on `block`, draining its
/// inbox first (spec.md §4.3 step 1). Returns the set of foreign messages
/// produced by cross-block pushes, to be delivered by the caller (the
/// scheduler owns cross-block addressing since it alone may hold the
/// destination block's storage).
pub fn run_block_quantum<Cap, Flow>(
    layout: &Layout,
    block: &mut Block<Cap, Flow>,
    active: &mut ActiveBuckets,
    discharges_per_block: usize,
) -> Result<Vec<(usize, BoundaryMessage<Flow>)>, RegionFlowError>
where
    Cap: PrimInt + Signed + CheckedAdd,
    Flow: PrimInt + Signed + CheckedAdd,
{
    let mut outgoing = Vec::new();

    for message in block.inbox.drain() {
        let was_active = block.excess[message.dst_node_subid] > Flow::zero();
        block.apply_message(message.dst_node_subid, message.dst_edge_idx, message.amount)?;
        if !was_active && block.excess[message.dst_node_subid] > Flow::zero() {
            active.push(message.dst_node_subid, block.label[message.dst_node_subid]);
        }
    }

    let mut discharges = 0usize;
    while discharges < discharges_per_block {
        let Some(node_subid) = active.pop() else {
            break;
        };
        discharges += 1;
        discharge_one(layout, block, active, node_subid, &mut outgoing)?;
    }

    let still_active = !active.is_empty() || !block.inbox.is_empty();
    block.set_active(still_active);
    debug!(
        "block {}: ran {} discharges, still_active={}",
        block.block_id, discharges, still_active
    );
    Ok(outgoing)
}

fn discharge_one<Cap, Flow>(
    layout: &Layout,
    block: &mut Block<Cap, Flow>,
    active: &mut ActiveBuckets,
    node_subid: usize,
    outgoing: &mut Vec<(usize, BoundaryMessage<Flow>)>,
) -> Result<(), RegionFlowError>
where
    Cap: PrimInt + Signed + CheckedAdd,
    Flow: PrimInt + Signed + CheckedAdd,
{
    trace!("discharging node {node_subid} in block {}", block.block_id);
    let (local_cell_index, cell_kind) = layout.local_cell_of(node_subid);
    let global_cell = layout.compose_global_cell(block.block_id, local_cell_index);
    let node_location = layout.node_location_of(&global_cell);
    let block_location = layout.block_location_of(&layout.local_cell_coord(&global_cell));
    let mask = layout.edge_mask(cell_kind, node_location).to_vec();
    let shifts = layout.shifts(cell_kind, block_location).to_vec();
    let arcs = layout.arcs(cell_kind).to_vec();

    // Sink terminal arc first: it sits at the fixed label 0, so it is
    // admissible whenever this node's label is exactly 1.
    if block.label[node_subid] == 1 && block.term_cap_snk[node_subid] > Cap::zero() {
        let amount = block.excess[node_subid].min(Flow::from(block.term_cap_snk[node_subid]).unwrap_or(Flow::max_value()));
        if amount > Flow::zero() {
            let cap_amount = Cap::from(amount).unwrap_or(Cap::max_value());
            block.push_to_sink(node_subid, cap_amount)?;
        }
    }

    for (edge_idx, arc) in arcs.iter().enumerate() {
        if block.excess[node_subid] <= Flow::zero() {
            break;
        }
        if !mask[edge_idx] {
            continue;
        }
        if block.cap[node_subid][edge_idx] <= Cap::zero() {
            continue;
        }
        let (delta_block, delta_subid) = shifts[edge_idx];
        if delta_block == 0 {
            let dst_subid = (node_subid as i64 + delta_subid) as usize;
            if block.label[dst_subid] >= LABEL_UNREACHABLE {
                continue;
            }
            if block.label[node_subid] != block.label[dst_subid] + 1 {
                continue;
            }
            let amount = block.excess[node_subid].min(Flow::from(block.cap[node_subid][edge_idx]).unwrap_or(Flow::max_value()));
            if amount <= Flow::zero() {
                continue;
            }
            let was_active = block.excess[dst_subid] > Flow::zero();
            let sister_edge_idx = layout.sister(cell_kind, edge_idx);
            let cap_amount = Cap::from(amount).unwrap_or(Cap::max_value());
            block.push_local(node_subid, edge_idx, dst_subid, sister_edge_idx, cap_amount)?;
            if !was_active {
                active.push(dst_subid, block.label[dst_subid]);
            }
        } else {
            // Cross-block destination: the remote label is not available
            // locally, so this push is gated only on capacity and local
            // excess, not on strict admissibility against the destination's
            // current label. The destination applies the credit
            // unconditionally on drain (spec.md §5 "Ordering guarantees":
            // pushes are commutative with local activity at the destination
            // — see src/boundary.rs for why this still preserves
            // correctness).
            let sister_edge_idx = layout.sister(cell_kind, edge_idx);
            let amount = block.excess[node_subid].min(Flow::from(block.cap[node_subid][edge_idx]).unwrap_or(Flow::max_value()));
            if amount <= Flow::zero() {
                continue;
            }
            let cap_amount = Cap::from(amount).unwrap_or(Cap::max_value());
            let flow_amount = block.push_cross_block(node_subid, edge_idx, cap_amount)?;
            let dst_block = (block.block_id as i64 + delta_block) as usize;
            let dst_subid = (node_subid as i64 + delta_subid) as usize;
            outgoing.push((
                dst_block,
                BoundaryMessage {
                    dst_node_subid: dst_subid,
                    dst_edge_idx: sister_edge_idx,
                    amount: flow_amount,
                },
            ));
        }
    }

    if block.excess[node_subid] > Flow::zero() {
        relabel(layout, block, active, node_subid, cell_kind, node_location, &mask, &arcs);
    }
    Ok(())
}

#[allow(clippy::too_many_arguments)]
fn relabel<Cap, Flow>(
    layout: &Layout,
    block: &mut Block<Cap, Flow>,
    active: &mut ActiveBuckets,
    node_subid: usize,
    cell_kind: usize,
    _node_location: usize,
    mask: &[bool],
    arcs: &[crate::arc_template::TemplateArc],
) where
    Cap: PrimInt + Signed + CheckedAdd,
    Flow: PrimInt + Signed + CheckedAdd,
{
    let (local_cell_index, _) = layout.local_cell_of(node_subid);
    let global_cell = layout.compose_global_cell(block.block_id, local_cell_index);
    let block_location = layout.block_location_of(&layout.local_cell_coord(&global_cell));
    let shifts = layout.shifts(cell_kind, block_location);

    let mut best = LABEL_UNREACHABLE;
    if block.term_cap_snk[node_subid] > Cap::zero() {
        best = best.min(1);
    }
    for (edge_idx, _arc) in arcs.iter().enumerate() {
        if !mask[edge_idx] || block.cap[node_subid][edge_idx] <= Cap::zero() {
            continue;
        }
        let (delta_block, delta_subid) = shifts[edge_idx];
        if delta_block == 0 {
            let dst_subid = (node_subid as i64 + delta_subid) as usize;
            if block.label[dst_subid] >= LABEL_UNREACHABLE {
                continue;
            }
            best = best.min(block.label[dst_subid] + 1);
        }
        // Cross-block neighbors cannot be relabeled against locally;
        // global relabel is what keeps cross-block labels tight
        // (spec.md §4.6).
    }

    let old_label = block.label[node_subid];
    if best >= LABEL_UNREACHABLE {
        block.label[node_subid] = LABEL_UNREACHABLE;
        return;
    }
    block.label[node_subid] = best;
    active.push(node_subid, best);

    if old_label >= 0 && active.label_is_gap(old_label) {
        warn!(
            "gap heuristic: label {old_label} emptied in block {}",
            block.block_id
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arc_template::ArcTemplate;

    #[test]
    fn active_buckets_preserve_fifo_within_label() {
        let mut active = ActiveBuckets::new(4, 16);
        active.push(1, 0);
        active.push(2, 0);
        active.push(3, 0);
        assert_eq!(active.pop(), Some(1));
        assert_eq!(active.pop(), Some(2));
        assert_eq!(active.pop(), Some(3));
        assert_eq!(active.pop(), None);
    }

    #[test]
    fn lower_label_pops_first() {
        let mut active = ActiveBuckets::new(4, 16);
        active.push(5, 8);
        active.push(6, 1);
        assert_eq!(active.pop(), Some(6));
        assert_eq!(active.pop(), Some(5));
    }

    #[test]
    fn single_block_discharge_pushes_to_sink() {
        let template = ArcTemplate::four_connected_2d();
        let layout = Layout::new(&template, vec![2, 2], vec![2, 2]).unwrap();
        let mut block: Block<i32, i64> = Block::new(&layout, 0);
        block.add_terminal_weights(0, 10, 0).unwrap();
        block.add_terminal_weights(3, 0, 10).unwrap();
        // node 0 -> node 1 -> node 3 chain of capacity 4 each
        let arcs0 = layout.arcs(0);
        let idx_right = arcs0.iter().position(|a| a.offset == vec![0, 1]).unwrap();
        block.add_arc_capacity(0, idx_right, 4).unwrap();
        let idx_down_from_1 = layout.arcs(0).iter().position(|a| a.offset == vec![1, 0]).unwrap();
        block.add_arc_capacity(1, idx_down_from_1, 4).unwrap();
        block.saturate_source_arc(0).unwrap();

        let mut active = ActiveBuckets::new(1, layout.nodes_per_block());
        active.push(0, 0);
        let outgoing = run_block_quantum(&layout, &mut block, &mut active, 64).unwrap();
        assert!(outgoing.is_empty());
        assert!(block.excess[3] >= 0);
    }
}

//! Per-block residual graph storage (spec.md §3 "Block", §4.2 "Block
//! Storage").
//!
//! Generalizes `src/push_relabel.rs`'s single flat `EdgeCapacity` array and
//! `excess`/`height` vectors to one block's slice of a much larger grid, with
//! capacities generic over `num::PrimInt + Signed` instead of the teacher's
//! hardcoded `i32`, and terminal (source/sink) capacities tracked
//! per-node instead of via an explicit source/target node set — this engine
//! follows the computer-vision graph-cut formulation spec.md §1 targets,
//! where every node carries its own (possibly zero) arcs to an implicit S
//! and T rather than one global source/sink pair of nodes.

use num::{CheckedAdd, NumCast, PrimInt, Signed};

use crate::boundary::Inbox;
use crate::layout::Layout;
use crate::region_error::RegionFlowError;

/// Sentinel meaning "no residual path to the sink found by the last global
/// relabel" (spec.md §3 invariant 4, §4.6).
pub const LABEL_UNREACHABLE: i32 = i32::MAX;

/// Per-block arrays indexed by `node_subid` (spec.md §3 "Block"). Owned
/// exclusively by whichever worker currently holds the block's claim
/// (spec.md §5); the scheduler is responsible for never handing out two
/// `&mut Block` to neighboring blocks at once.
#[derive(Debug)]
pub struct Block<Cap, Flow> {
    pub block_id: usize,
    pub label: Vec<i32>,
    pub excess: Vec<Flow>,
    /// `cap[node_subid][edge_idx]`, residual capacity along arc `edge_idx`
    /// of `arcs_by_kind[cell_kind(node_subid)]`.
    pub cap: Vec<Vec<Cap>>,
    pub term_cap_src: Vec<Cap>,
    pub term_cap_snk: Vec<Cap>,
    pub inbox: Inbox<Flow>,
    /// Running total of flow this block has pushed into the sink terminal;
    /// summed across blocks at the end of `compute_maxflow` for
    /// `get_flow()` (spec.md §9 "Graph-global state (flow accumulator)").
    pub absorbed_by_sink: Flow,
    active: std::sync::atomic::AtomicBool,
}

impl<Cap, Flow> Block<Cap, Flow>
where
    Cap: PrimInt + Signed + CheckedAdd,
    Flow: PrimInt + Signed + CheckedAdd,
{
    pub fn new(layout: &Layout, block_id: usize) -> Self {
        let nodes_per_block = layout.nodes_per_block();
        let mut cap = Vec::with_capacity(nodes_per_block);
        for node_subid in 0..nodes_per_block {
            let (_, cell_kind) = layout.local_cell_of(node_subid);
            cap.push(vec![Cap::zero(); layout.arcs(cell_kind).len()]);
        }
        Self {
            block_id,
            label: vec![0; nodes_per_block],
            excess: vec![Flow::zero(); nodes_per_block],
            cap,
            term_cap_src: vec![Cap::zero(); nodes_per_block],
            term_cap_snk: vec![Cap::zero(); nodes_per_block],
            inbox: Inbox::new(),
            absorbed_by_sink: Flow::zero(),
            active: std::sync::atomic::AtomicBool::new(false),
        }
    }

    pub fn is_active(&self) -> bool {
        self.active.load(std::sync::atomic::Ordering::Acquire)
    }

    pub fn set_active(&self, value: bool) {
        self.active.store(value, std::sync::atomic::Ordering::Release);
    }

    /// Accumulates terminal capacities (additive across calls, spec.md §6).
    pub fn add_terminal_weights(
        &mut self,
        node_subid: usize,
        src_cap: Cap,
        snk_cap: Cap,
    ) -> Result<(), RegionFlowError> {
        if src_cap < Cap::zero() || snk_cap < Cap::zero() {
            return Err(RegionFlowError::InvalidEdge {
                source: node_subid,
                target: node_subid,
                reason: "terminal capacities must be non-negative".to_string(),
            });
        }
        self.term_cap_src[node_subid] = self.term_cap_src[node_subid]
            .checked_add(&src_cap)
            .ok_or_else(|| RegionFlowError::CapacityOverflow {
                context: format!("adding source terminal capacity at node {node_subid}"),
            })?;
        self.term_cap_snk[node_subid] = self.term_cap_snk[node_subid]
            .checked_add(&snk_cap)
            .ok_or_else(|| RegionFlowError::CapacityOverflow {
                context: format!("adding sink terminal capacity at node {node_subid}"),
            })?;
        Ok(())
    }

    /// Accumulates residual capacity on one directed arc slot (additive,
    /// spec.md §6). The caller is responsible for locating `edge_idx` via
    /// the layout and for crediting the sister slot on the opposite
    /// endpoint's owning block.
    pub fn add_arc_capacity(
        &mut self,
        node_subid: usize,
        edge_idx: usize,
        cap: Cap,
    ) -> Result<(), RegionFlowError> {
        if cap < Cap::zero() {
            return Err(RegionFlowError::InvalidEdge {
                source: node_subid,
                target: node_subid,
                reason: "edge capacities must be non-negative".to_string(),
            });
        }
        let slot = &mut self.cap[node_subid][edge_idx];
        *slot = slot
            .checked_add(&cap)
            .ok_or_else(|| RegionFlowError::CapacityOverflow {
                context: format!("adding arc capacity at node {node_subid}, edge {edge_idx}"),
            })?;
        Ok(())
    }

    /// Saturates the source terminal arc, crediting `excess` with whatever
    /// capacity remains (the preflow-initialization step of spec.md §2's
    /// control flow: "seeds active blocks"). Idempotent against repeated
    /// calls only in the sense that it always re-saturates whatever capacity
    /// remains; `compute_maxflow` calls it exactly once per node.
    pub fn saturate_source_arc(&mut self, node_subid: usize) -> Result<(), RegionFlowError> {
        let amount = self.term_cap_src[node_subid];
        if amount > Cap::zero() {
            self.term_cap_src[node_subid] = Cap::zero();
            let flow_amount = Flow::from(amount).ok_or_else(|| RegionFlowError::CapacityOverflow {
                context: format!("converting source capacity to flow at node {node_subid}"),
            })?;
            self.excess[node_subid] = self.excess[node_subid]
                .checked_add(&flow_amount)
                .ok_or_else(|| RegionFlowError::CapacityOverflow {
                    context: format!("crediting initial excess at node {node_subid}"),
                })?;
        }
        Ok(())
    }

    /// Pushes `amount` from `node_subid` to the sink terminal. Requires
    /// `label[node_subid] == 1` (sink sits at label 0) and
    /// `term_cap_snk[node_subid] > 0`; caller enforces admissibility.
    pub fn push_to_sink(&mut self, node_subid: usize, amount: Cap) -> Result<(), RegionFlowError> {
        self.term_cap_snk[node_subid] = self.term_cap_snk[node_subid] - amount;
        let flow_amount = Flow::from(amount).ok_or_else(|| RegionFlowError::CapacityOverflow {
            context: format!("converting sink push to flow at node {node_subid}"),
        })?;
        self.excess[node_subid] = self.excess[node_subid] - flow_amount;
        self.absorbed_by_sink = self
            .absorbed_by_sink
            .checked_add(&flow_amount)
            .ok_or_else(|| RegionFlowError::CapacityOverflow {
                context: "accumulating flow absorbed by sink".to_string(),
            })?;
        Ok(())
    }

    /// Pushes `amount` from `node_subid` along arc `edge_idx` to a node in
    /// the *same* block (`sister_edge_idx`, `dst_subid` resolved by the
    /// caller via the layout's shift table). Decrements local capacity and
    /// excess, increments the destination's in place.
    pub fn push_local(
        &mut self,
        node_subid: usize,
        edge_idx: usize,
        dst_subid: usize,
        sister_edge_idx: usize,
        amount: Cap,
    ) -> Result<(), RegionFlowError> {
        self.cap[node_subid][edge_idx] = self.cap[node_subid][edge_idx] - amount;
        self.cap[dst_subid][sister_edge_idx] = self.cap[dst_subid][sister_edge_idx] + amount;
        let flow_amount = Flow::from(amount).ok_or_else(|| RegionFlowError::CapacityOverflow {
            context: format!("converting local push to flow at node {node_subid}"),
        })?;
        self.excess[node_subid] = self.excess[node_subid] - flow_amount;
        self.excess[dst_subid] = self.excess[dst_subid]
            .checked_add(&flow_amount)
            .ok_or_else(|| RegionFlowError::CapacityOverflow {
                context: format!("crediting local push excess at node {dst_subid}"),
            })?;
        Ok(())
    }

    /// Decrements local capacity and excess for a push whose destination
    /// lives in another block; the caller enqueues the corresponding
    /// [`crate::boundary::BoundaryMessage`] on the destination's inbox.
    pub fn push_cross_block(
        &mut self,
        node_subid: usize,
        edge_idx: usize,
        amount: Cap,
    ) -> Result<Flow, RegionFlowError> {
        self.cap[node_subid][edge_idx] = self.cap[node_subid][edge_idx] - amount;
        let flow_amount = Flow::from(amount).ok_or_else(|| RegionFlowError::CapacityOverflow {
            context: format!("converting cross-block push to flow at node {node_subid}"),
        })?;
        self.excess[node_subid] = self.excess[node_subid] - flow_amount;
        Ok(flow_amount)
    }

    /// Applies a drained boundary message: credits the sister arc's residual
    /// capacity and the destination node's excess together.
    pub fn apply_message(
        &mut self,
        dst_node_subid: usize,
        dst_edge_idx: usize,
        amount: Flow,
    ) -> Result<(), RegionFlowError> {
        let cap_amount = Cap::from(amount).ok_or_else(|| RegionFlowError::CapacityOverflow {
            context: format!("converting message amount to capacity at node {dst_node_subid}"),
        })?;
        self.cap[dst_node_subid][dst_edge_idx] = self.cap[dst_node_subid][dst_edge_idx] + cap_amount;
        self.excess[dst_node_subid] = self.excess[dst_node_subid]
            .checked_add(&amount)
            .ok_or_else(|| RegionFlowError::CapacityOverflow {
                context: format!("crediting message excess at node {dst_node_subid}"),
            })?;
        Ok(())
    }

    /// Returns excess to the source terminal for a node the last global
    /// relabel found unreachable from the sink (spec.md §4.6 flow-return).
    pub fn return_excess_to_source(&mut self, node_subid: usize) -> Result<(), RegionFlowError> {
        let excess = self.excess[node_subid];
        if excess > Flow::zero() {
            let cap_amount = Cap::from(excess).ok_or_else(|| RegionFlowError::CapacityOverflow {
                context: format!("converting returned excess to capacity at node {node_subid}"),
            })?;
            self.term_cap_src[node_subid] = self.term_cap_src[node_subid]
                .checked_add(&cap_amount)
                .ok_or_else(|| RegionFlowError::CapacityOverflow {
                    context: format!("returning excess to source at node {node_subid}"),
                })?;
            self.excess[node_subid] = Flow::zero();
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arc_template::ArcTemplate;

    fn small_layout() -> Layout {
        let template = ArcTemplate::four_connected_2d();
        Layout::new(&template, vec![4, 4], vec![2, 2]).unwrap()
    }

    #[test]
    fn terminal_weights_are_additive() {
        let layout = small_layout();
        let mut block: Block<i32, i64> = Block::new(&layout, 0);
        block.add_terminal_weights(0, 3, 0).unwrap();
        block.add_terminal_weights(0, 4, 0).unwrap();
        assert_eq!(block.term_cap_src[0], 7);
    }

    #[test]
    fn negative_terminal_weight_is_rejected() {
        let layout = small_layout();
        let mut block: Block<i32, i64> = Block::new(&layout, 0);
        assert!(block.add_terminal_weights(0, -1, 0).is_err());
    }

    #[test]
    fn saturate_source_arc_credits_excess_once() {
        let layout = small_layout();
        let mut block: Block<i32, i64> = Block::new(&layout, 0);
        block.add_terminal_weights(0, 5, 0).unwrap();
        block.saturate_source_arc(0).unwrap();
        assert_eq!(block.excess[0], 5);
        assert_eq!(block.term_cap_src[0], 0);
    }

    #[test]
    fn push_local_respects_antisymmetry() {
        let layout = small_layout();
        let mut block: Block<i32, i64> = Block::new(&layout, 0);
        block.cap[0][0] = 5;
        block.excess[0] = 3;
        block.push_local(0, 0, 1, 1, 3).unwrap();
        assert_eq!(block.cap[0][0], 2);
        assert_eq!(block.cap[1][1], 3);
        assert_eq!(block.excess[0], 0);
        assert_eq!(block.excess[1], 3);
    }
}

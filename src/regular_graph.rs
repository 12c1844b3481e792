//! Top-level public surface: `RegularGraph`, `SolverConfig`, `Segment`
//! (spec.md §4.7 "Segmentation Query", §6 "External Interfaces").
//!
//! Grounded on `src/push_relabel.rs`'s public shape (`from_edge_list` /
//! `run` / `max_flow` / `assignment`, split here across
//! setup/compute/query) and on `examples/original_source/Example.cpp` for
//! the exact call sequence this crate's `demos/region_push_relabel.rs`
//! reproduces: `add_terminal_weights`, then `add_edge`, then
//! `compute_maxflow`, then `get_flow`/`get_segment`.

use std::collections::VecDeque;
use std::sync::RwLock;

use bitvec::vec::BitVec;
use log::info;
use num::{CheckedAdd, PrimInt, Signed};
use rayon::prelude::*;

use crate::arc_template::ArcTemplate;
use crate::block::Block;
use crate::global_relabel;
use crate::layout::Layout;
use crate::region_error::RegionFlowError;
use crate::scheduler::{self, SchedulerConfig};
use crate::unsafe_slice::UnsafeSlice;

/// S/T classification returned by [`RegularGraph::get_segment`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Segment {
    S,
    T,
}

/// Construction-time tuning knobs (spec.md §6). Numeric capacity/flow types
/// are a generic parameter on [`RegularGraph`] itself rather than listed
/// here, following `num::PrimInt + Signed` (SPEC_FULL.md §3.3) instead of
/// the teacher's hardcoded `i32`.
#[derive(Debug, Clone, Copy)]
pub struct SolverConfig {
    pub thread_count: usize,
    pub max_blocks_per_region: usize,
    pub discharges_per_block: usize,
    pub bucket_density: usize,
    pub blocks_per_memory_page: usize,
    pub global_update_frequency: usize,
}

impl Default for SolverConfig {
    fn default() -> Self {
        Self {
            thread_count: std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1),
            max_blocks_per_region: 4,
            discharges_per_block: 32,
            bucket_density: 4,
            blocks_per_memory_page: 16,
            global_update_frequency: 1,
        }
    }
}

/// A regular N-dimensional grid max-flow/min-cut solver (spec.md §1).
pub struct RegularGraph<Cap, Flow> {
    layout: Layout,
    blocks: Vec<Block<Cap, Flow>>,
    neighbors: Vec<Vec<usize>>,
    config: SolverConfig,
    finished: bool,
    segment_cache: RwLock<Option<BitVec>>,
}

impl<Cap, Flow> RegularGraph<Cap, Flow>
where
    Cap: PrimInt + Signed + CheckedAdd + Send + Sync,
    Flow: PrimInt + Signed + CheckedAdd + Send + Sync,
{
    /// Constructs with fixed grid dimensions, block dimensions, arc
    /// template, and tuning knobs (spec.md §6 `new`). Fails if `block_dims`
    /// does not evenly divide `grid_dims` along every axis, or if the arc
    /// template is otherwise invalid.
    pub fn new(
        grid_dims: Vec<usize>,
        block_dims: Vec<usize>,
        arc_template: ArcTemplate,
        config: SolverConfig,
    ) -> Result<Self, RegionFlowError> {
        let layout = Layout::new(&arc_template, grid_dims, block_dims)?;
        // `blocks_per_memory_page` (spec.md §6) is a locality hint for block
        // array allocation: blocks are constructed page-group by page-group
        // via rayon so that the backing `Vec`s of one page's worth of
        // neighboring blocks are allocated close together in time, rather
        // than each block fighting every other for allocator attention
        // across the whole grid at once. Block ids (and hence iteration
        // order) are unaffected.
        let block_ids: Vec<usize> = (0..layout.block_count()).collect();
        let page_size = config.blocks_per_memory_page.max(1);
        let blocks = block_ids
            .par_chunks(page_size)
            .flat_map_iter(|chunk| chunk.iter().map(|&block_id| Block::new(&layout, block_id)))
            .collect();
        let neighbors = layout.block_neighbors();
        info!(
            "constructed regular graph: {} blocks, {} nodes/block",
            layout.block_count(),
            layout.nodes_per_block()
        );
        Ok(Self {
            layout,
            blocks,
            neighbors,
            config,
            finished: false,
            segment_cache: RwLock::new(None),
        })
    }

    fn resolve(&self, cell_coord: &[usize], cell_kind: usize) -> (usize, usize) {
        let (block_id, local_cell_index) = self.layout.decompose_global_cell(cell_coord);
        (block_id, self.layout.node_subid(local_cell_index, cell_kind))
    }

    /// Adds terminal capacities (additive across calls, spec.md §6).
    pub fn add_terminal_weights(
        &mut self,
        cell_coord: &[usize],
        cell_kind: usize,
        src_cap: Cap,
        snk_cap: Cap,
    ) -> Result<(), RegionFlowError> {
        let (block_id, node_subid) = self.resolve(cell_coord, cell_kind);
        self.blocks[block_id].add_terminal_weights(node_subid, src_cap, snk_cap)
    }

    /// Adds residual capacity to both directions of an edge (u, v) that
    /// must match an arc in the template (additive across calls, spec.md
    /// §6).
    #[allow(clippy::too_many_arguments)]
    pub fn add_edge(
        &mut self,
        u_coord: &[usize],
        u_kind: usize,
        v_coord: &[usize],
        v_kind: usize,
        cap_uv: Cap,
        cap_vu: Cap,
    ) -> Result<(), RegionFlowError> {
        if u_coord.len() != self.layout.dim_count() || v_coord.len() != self.layout.dim_count() {
            return Err(RegionFlowError::InvalidEdge {
                source: u_kind,
                target: v_kind,
                reason: "coordinate dimension mismatch".to_string(),
            });
        }
        for (axis, (&uc, &vc)) in u_coord.iter().zip(v_coord).enumerate() {
            if uc >= self.layout.grid_dims()[axis] || vc >= self.layout.grid_dims()[axis] {
                return Err(RegionFlowError::InvalidEdge {
                    source: u_kind,
                    target: v_kind,
                    reason: format!("coordinate out of range on axis {axis}"),
                });
            }
        }

        let offset: Vec<i8> = u_coord
            .iter()
            .zip(v_coord)
            .map(|(&u, &v)| (v as i64 - u as i64) as i8)
            .collect();
        let arcs = self.layout.arcs(u_kind);
        let edge_idx = arcs
            .iter()
            .position(|arc| arc.to_cell == v_kind && arc.offset == offset)
            .ok_or_else(|| RegionFlowError::InvalidEdge {
                source: u_kind,
                target: v_kind,
                reason: "endpoints are not connected by the arc template".to_string(),
            })?;
        let sister_idx = self.layout.sister(u_kind, edge_idx);

        let (u_block, u_subid) = self.resolve(u_coord, u_kind);
        let (v_block, v_subid) = self.resolve(v_coord, v_kind);
        self.blocks[u_block].add_arc_capacity(u_subid, edge_idx, cap_uv)?;
        self.blocks[v_block].add_arc_capacity(v_subid, sister_idx, cap_vu)?;
        Ok(())
    }

    /// Runs the solver (spec.md §4, §6 `compute_maxflow`). Rejects a second
    /// call once finished (DESIGN.md Open Question decision: blocks retain
    /// mutated residual state a second run cannot safely reuse).
    pub fn compute_maxflow(&mut self) -> Result<(), RegionFlowError> {
        if self.finished {
            return Err(RegionFlowError::InvalidQuery {
                reason: "compute_maxflow already completed".to_string(),
            });
        }

        info!("compute_maxflow: saturating source terminal arcs");
        for block in &mut self.blocks {
            for node_subid in 0..self.layout.nodes_per_block() {
                block.saturate_source_arc(node_subid)?;
            }
        }

        // Initial labeling: a reverse BFS from the sink before any worker
        // starts, so discharges begin with meaningful labels instead of a
        // flat zero (spec.md §2 control flow: "seeds active blocks").
        let active = {
            let slice = UnsafeSlice::new(&mut self.blocks);
            global_relabel::run(&self.layout, &slice, self.blocks.len())?
        };
        for &block_id in &active {
            self.blocks[block_id].set_active(true);
        }

        let scheduler_config = SchedulerConfig {
            thread_count: self.config.thread_count,
            max_blocks_per_region: self.config.max_blocks_per_region,
            discharges_per_block: self.config.discharges_per_block,
            bucket_density: self.config.bucket_density,
            global_update_frequency: self.config.global_update_frequency,
        };
        scheduler::run(
            &self.layout,
            &mut self.blocks,
            &self.neighbors,
            scheduler_config,
        )?;

        self.finished = true;
        *self.segment_cache.write().unwrap() = None;
        Ok(())
    }

    /// Valid only after `compute_maxflow` (spec.md §6 `get_flow`).
    pub fn get_flow(&self) -> Result<Flow, RegionFlowError> {
        if !self.finished {
            return Err(RegionFlowError::InvalidQuery {
                reason: "get_flow called before compute_maxflow completed".to_string(),
            });
        }
        let mut total = Flow::zero();
        for block in &self.blocks {
            total = total
                .checked_add(&block.absorbed_by_sink)
                .ok_or_else(|| RegionFlowError::CapacityOverflow {
                    context: "summing flow absorbed across blocks".to_string(),
                })?;
        }
        Ok(total)
    }

    /// Valid only after `compute_maxflow` (spec.md §4.7, §6 `get_segment`).
    /// Computed lazily on first query via reverse-residual-forward BFS from
    /// source-adjacent nodes, and cached.
    pub fn get_segment(
        &self,
        cell_coord: &[usize],
        cell_kind: usize,
    ) -> Result<Segment, RegionFlowError> {
        if !self.finished {
            return Err(RegionFlowError::InvalidQuery {
                reason: "get_segment called before compute_maxflow completed".to_string(),
            });
        }
        {
            let cache = self.segment_cache.read().unwrap();
            if let Some(reachable) = cache.as_ref() {
                let (block_id, node_subid) = self.resolve(cell_coord, cell_kind);
                let flat = block_id * self.layout.nodes_per_block() + node_subid;
                let on_source_side = *reachable.get(flat).unwrap();
                return Ok(if on_source_side { Segment::S } else { Segment::T });
            }
        }
        let reachable = self.reachable_from_source();
        let (block_id, node_subid) = self.resolve(cell_coord, cell_kind);
        let flat = block_id * self.layout.nodes_per_block() + node_subid;
        let on_source_side = *reachable.get(flat).unwrap();
        let result = if on_source_side { Segment::S } else { Segment::T };
        *self.segment_cache.write().unwrap() = Some(reachable);
        Ok(result)
    }

    fn reachable_from_source(&self) -> BitVec {
        let nodes_per_block = self.layout.nodes_per_block();
        let total = self.blocks.len() * nodes_per_block;
        let mut reachable = BitVec::with_capacity(total);
        reachable.resize(total, false);
        let mut queue: VecDeque<(usize, usize)> = VecDeque::new();

        for (block_id, block) in self.blocks.iter().enumerate() {
            for node_subid in 0..nodes_per_block {
                if block.term_cap_src[node_subid] > Cap::zero() {
                    let flat = block_id * nodes_per_block + node_subid;
                    if !*reachable.get(flat).unwrap() {
                        reachable.set(flat, true);
                        queue.push_back((block_id, node_subid));
                    }
                }
            }
        }

        while let Some((block_id, node_subid)) = queue.pop_front() {
            let (local_cell_index, cell_kind) = self.layout.local_cell_of(node_subid);
            let global_cell = self.layout.compose_global_cell(block_id, local_cell_index);
            let node_location = self.layout.node_location_of(&global_cell);
            let block_location = self
                .layout
                .block_location_of(&self.layout.local_cell_coord(&global_cell));
            let mask = self.layout.edge_mask(cell_kind, node_location);
            let shifts = self.layout.shifts(cell_kind, block_location);
            let arcs = self.layout.arcs(cell_kind);

            for (edge_idx, _arc) in arcs.iter().enumerate() {
                if !mask[edge_idx] {
                    continue;
                }
                if self.blocks[block_id].cap[node_subid][edge_idx] <= Cap::zero() {
                    continue;
                }
                let (delta_block, delta_subid) = shifts[edge_idx];
                let dst_block = (block_id as i64 + delta_block) as usize;
                let dst_subid = (node_subid as i64 + delta_subid) as usize;
                let flat = dst_block * nodes_per_block + dst_subid;
                if !*reachable.get(flat).unwrap() {
                    reachable.set(flat, true);
                    queue.push_back((dst_block, dst_subid));
                }
            }
        }
        reachable
    }

    pub fn layout(&self) -> &Layout {
        &self.layout
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arc_template::ArcTemplate;

    fn single_threaded_config() -> SolverConfig {
        SolverConfig {
            thread_count: 2,
            ..Default::default()
        }
    }

    /// S1 — `Example.cpp` reproduced exactly: 6x6-padded grid, 3x3 blocks,
    /// 4-connectivity, 22 directed internal edges (`cap_vu = 0`) including
    /// the two bottlenecks (0,1)-(0,2)=1 and (1,1)-(1,2)=2 that pin the
    /// max-flow at 3.
    #[test]
    fn s1_four_by_four_unit_square() {
        let template = ArcTemplate::four_connected_2d();
        let mut graph: RegularGraph<i16, i64> = RegularGraph::new(
            vec![6, 6],
            vec![3, 3],
            template,
            single_threaded_config(),
        )
        .unwrap();

        graph.add_terminal_weights(&[0, 0], 0, 100, 0).unwrap();
        graph.add_terminal_weights(&[3, 3], 0, 0, 100).unwrap();

        let edges: &[([usize; 2], [usize; 2], i16)] = &[
            ([0, 0], [0, 1], 5),
            ([0, 0], [1, 0], 5),
            ([0, 1], [0, 2], 1),
            ([0, 1], [1, 1], 5),
            ([0, 2], [0, 3], 5),
            ([0, 2], [1, 2], 5),
            ([0, 3], [1, 3], 5),
            ([1, 0], [1, 1], 5),
            ([1, 0], [2, 0], 5),
            ([1, 1], [1, 2], 2),
            ([1, 1], [2, 1], 5),
            ([1, 2], [1, 3], 5),
            ([1, 2], [2, 2], 5),
            ([1, 3], [2, 3], 5),
            ([2, 0], [3, 0], 5),
            ([2, 1], [3, 1], 5),
            ([2, 2], [2, 3], 5),
            ([2, 2], [3, 2], 5),
            ([2, 3], [3, 3], 5),
            ([3, 0], [3, 1], 5),
            ([3, 1], [3, 2], 3),
            ([3, 2], [3, 3], 5),
        ];
        for &(u, v, cap) in edges {
            graph.add_edge(&u, 0, &v, 0, cap, 0).unwrap();
        }

        graph.compute_maxflow().unwrap();
        let flow = graph.get_flow().unwrap();
        assert_eq!(flow, 3);
        assert_eq!(graph.get_segment(&[0, 0], 0).unwrap(), Segment::S);
        assert_eq!(graph.get_segment(&[3, 3], 0).unwrap(), Segment::T);
    }

    /// S2 — disconnected source/sink: no internal edges at all.
    #[test]
    fn s2_disconnected_source_and_sink() {
        let template = ArcTemplate::four_connected_2d();
        let mut graph: RegularGraph<i16, i64> =
            RegularGraph::new(vec![4, 4], vec![2, 2], template, single_threaded_config()).unwrap();
        graph.add_terminal_weights(&[0, 0], 0, 100, 0).unwrap();
        graph.add_terminal_weights(&[3, 3], 0, 0, 100).unwrap();

        graph.compute_maxflow().unwrap();
        assert_eq!(graph.get_flow().unwrap(), 0);
        assert_eq!(graph.get_segment(&[0, 0], 0).unwrap(), Segment::S);
        assert_eq!(graph.get_segment(&[3, 3], 0).unwrap(), Segment::T);
        assert_eq!(graph.get_segment(&[1, 1], 0).unwrap(), Segment::T);
    }

    /// S3 — 1x4 grid (blocks 1x2), saturating single path.
    #[test]
    fn s3_saturating_single_path() {
        let template = ArcTemplate::four_connected_2d();
        let mut graph: RegularGraph<i16, i64> =
            RegularGraph::new(vec![1, 4], vec![1, 2], template, single_threaded_config()).unwrap();

        graph.add_terminal_weights(&[0, 0], 0, 7, 0).unwrap();
        graph.add_terminal_weights(&[0, 3], 0, 0, 7).unwrap();
        graph.add_edge(&[0, 0], 0, &[0, 1], 0, 5, 5).unwrap();
        graph.add_edge(&[0, 1], 0, &[0, 2], 0, 5, 5).unwrap();
        graph.add_edge(&[0, 2], 0, &[0, 3], 0, 5, 5).unwrap();

        graph.compute_maxflow().unwrap();
        assert_eq!(graph.get_flow().unwrap(), 5);
    }

    /// S4 — symmetric 3-D grid, 6-connectivity, three node-disjoint unit
    /// capacity paths from corner to corner.
    #[test]
    fn s4_symmetric_three_dimensional() {
        let template = ArcTemplate::six_connected_3d();
        let mut graph: RegularGraph<i16, i64> = RegularGraph::new(
            vec![4, 4, 4],
            vec![2, 2, 2],
            template,
            single_threaded_config(),
        )
        .unwrap();

        graph.add_terminal_weights(&[0, 0, 0], 0, 3, 0).unwrap();
        graph.add_terminal_weights(&[3, 3, 3], 0, 0, 3).unwrap();

        for x in 0..4usize {
            for y in 0..4usize {
                for z in 0..4usize {
                    if x + 1 < 4 {
                        graph
                            .add_edge(&[x, y, z], 0, &[x + 1, y, z], 0, 1, 1)
                            .unwrap();
                    }
                    if y + 1 < 4 {
                        graph
                            .add_edge(&[x, y, z], 0, &[x, y + 1, z], 0, 1, 1)
                            .unwrap();
                    }
                    if z + 1 < 4 {
                        graph
                            .add_edge(&[x, y, z], 0, &[x, y, z + 1], 0, 1, 1)
                            .unwrap();
                    }
                }
            }
        }

        graph.compute_maxflow().unwrap();
        assert_eq!(graph.get_flow().unwrap(), 3);
    }

    /// S5 — forcing `GlobalUpdateFrequency = 1` yields the same flow as
    /// the default on the S1 scenario.
    #[test]
    fn s5_idempotent_global_relabel() {
        let template = ArcTemplate::four_connected_2d();
        let config = SolverConfig {
            global_update_frequency: 1,
            ..single_threaded_config()
        };
        let mut graph: RegularGraph<i16, i64> =
            RegularGraph::new(vec![1, 4], vec![1, 2], template, config).unwrap();
        graph.add_terminal_weights(&[0, 0], 0, 7, 0).unwrap();
        graph.add_terminal_weights(&[0, 3], 0, 0, 7).unwrap();
        graph.add_edge(&[0, 0], 0, &[0, 1], 0, 5, 5).unwrap();
        graph.add_edge(&[0, 1], 0, &[0, 2], 0, 5, 5).unwrap();
        graph.add_edge(&[0, 2], 0, &[0, 3], 0, 5, 5).unwrap();
        graph.compute_maxflow().unwrap();
        assert_eq!(graph.get_flow().unwrap(), 5);
    }

    /// S6 — thread-count invariance on the S3 scenario.
    #[test]
    fn s6_thread_count_invariance() {
        for thread_count in [1usize, 2, 8] {
            let template = ArcTemplate::four_connected_2d();
            let config = SolverConfig {
                thread_count,
                ..Default::default()
            };
            let mut graph: RegularGraph<i16, i64> =
                RegularGraph::new(vec![1, 4], vec![1, 2], template, config).unwrap();
            graph.add_terminal_weights(&[0, 0], 0, 7, 0).unwrap();
            graph.add_terminal_weights(&[0, 3], 0, 0, 7).unwrap();
            graph.add_edge(&[0, 0], 0, &[0, 1], 0, 5, 5).unwrap();
            graph.add_edge(&[0, 1], 0, &[0, 2], 0, 5, 5).unwrap();
            graph.add_edge(&[0, 2], 0, &[0, 3], 0, 5, 5).unwrap();
            graph.compute_maxflow().unwrap();
            assert_eq!(graph.get_flow().unwrap(), 5);
        }
    }

    #[test]
    fn repeated_compute_maxflow_is_rejected() {
        let template = ArcTemplate::four_connected_2d();
        let mut graph: RegularGraph<i16, i64> =
            RegularGraph::new(vec![1, 4], vec![1, 2], template, single_threaded_config()).unwrap();
        graph.add_terminal_weights(&[0, 0], 0, 7, 0).unwrap();
        graph.add_terminal_weights(&[0, 3], 0, 0, 7).unwrap();
        graph.compute_maxflow().unwrap();
        assert!(graph.compute_maxflow().is_err());
    }

    #[test]
    fn query_before_compute_maxflow_is_rejected() {
        let template = ArcTemplate::four_connected_2d();
        let graph: RegularGraph<i16, i64> =
            RegularGraph::new(vec![1, 4], vec![1, 2], template, single_threaded_config()).unwrap();
        assert!(graph.get_flow().is_err());
        assert!(graph.get_segment(&[0, 0], 0).is_err());
    }

    #[test]
    fn mismatched_arc_is_rejected() {
        let template = ArcTemplate::four_connected_2d();
        let mut graph: RegularGraph<i16, i64> =
            RegularGraph::new(vec![4, 4], vec![2, 2], template, single_threaded_config()).unwrap();
        // (0,0) to (1,1) is a diagonal, not in the four-connected template.
        assert!(graph.add_edge(&[0, 0], 0, &[1, 1], 0, 1, 1).is_err());
    }
}

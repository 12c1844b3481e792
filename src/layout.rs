//! Precomputed lookup tables turning an [`ArcTemplate`] plus grid/block
//! dimensions into O(1) per-edge decisions, matching the responsibilities of
//! `examples/original_source/Layout.h`'s `Layout<OffsetVector, Dimensions,
//! BlockDimensions>` — reimplemented as runtime data (SPEC_FULL.md §3.3)
//! instead of unrolled at compile time.
//!
//! Two distinct location-index spaces are kept apart here (SPEC_FULL.md §4):
//! `node_location_of` is keyed against the *global* grid dimensions and feeds
//! the edge mask (does this arc leave the grid?); `block_location_of` is
//! keyed against the *block* dimensions and feeds the shift-vector table
//! (which is identical for every block, so it must not depend on global
//! position).

use rayon::prelude::*;

use crate::arc_template::ArcTemplate;
use crate::region_error::RegionFlowError;

/// A cell's position along one axis, classified for table-keying purposes.
/// Ordinary push–relabel layouts need only low/interior/high (3^D
/// locations); an axis with extent 1 collapses low and high into the same
/// cell, so a fourth state, `Both`, is needed to keep the classification
/// exact (SPEC_FULL.md §4, "Unit-extent axes").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AxisClass {
    Low = 0,
    Interior = 1,
    High = 2,
    Both = 3,
}

impl AxisClass {
    pub fn classify(coord: usize, dim: usize) -> Self {
        if dim == 1 {
            AxisClass::Both
        } else if coord == 0 {
            AxisClass::Low
        } else if coord == dim - 1 {
            AxisClass::High
        } else {
            AxisClass::Interior
        }
    }

    fn blocks_negative_offset(self) -> bool {
        matches!(self, AxisClass::Low | AxisClass::Both)
    }

    fn blocks_positive_offset(self) -> bool {
        matches!(self, AxisClass::High | AxisClass::Both)
    }
}

/// Packs one [`AxisClass`] per axis into a single base-4 index.
fn pack_location(classes: &[AxisClass]) -> usize {
    classes
        .iter()
        .enumerate()
        .map(|(axis, class)| (*class as usize) * 4usize.pow(axis as u32))
        .sum()
}

/// Enumerates every combination of axis classes, in the order `pack_location`
/// expects (axis 0 fastest), so index `i` of the returned vector is the
/// combination that packs to `i`.
fn all_class_combos(dim_count: usize) -> Vec<Vec<AxisClass>> {
    let all = [
        AxisClass::Low,
        AxisClass::Interior,
        AxisClass::High,
        AxisClass::Both,
    ];
    let mut combos = vec![Vec::with_capacity(dim_count)];
    for _ in 0..dim_count {
        let mut next = Vec::with_capacity(combos.len() * 4);
        for combo in &combos {
            for class in &all {
                let mut extended = combo.clone();
                extended.push(*class);
                next.push(extended);
            }
        }
        combos = next;
    }
    combos
}

/// Row-major (last axis fastest) strides over `dims`, matching
/// `examples/original_source/Example.cpp`'s `ID(i,j) = d[1]*i + j`.
fn row_major_strides(dims: &[usize]) -> Vec<usize> {
    let mut strides = vec![1usize; dims.len()];
    for axis in (0..dims.len().saturating_sub(1)).rev() {
        strides[axis] = strides[axis + 1] * dims[axis + 1];
    }
    strides
}

fn encode_coord(coord: &[usize], strides: &[usize]) -> usize {
    coord.iter().zip(strides).map(|(c, s)| c * s).sum()
}

fn decode_coord(mut index: usize, dims: &[usize], strides: &[usize]) -> Vec<usize> {
    let mut coord = vec![0usize; dims.len()];
    for axis in 0..dims.len() {
        coord[axis] = index / strides[axis];
        index %= strides[axis];
    }
    coord
}

/// Per-axis contribution to a shift vector: how many whole blocks and how
/// many local-cell-index steps a `+1`/`-1` offset along this axis produces,
/// given the cell's class along that axis. Each branch is a constant because
/// a boundary class pins the coordinate before *and* after the offset is
/// applied (SPEC_FULL.md §4).
fn axis_shift(class: AxisClass, offset: i8, dim: usize) -> (i64, i64) {
    match offset {
        0 => (0, 0),
        1 => {
            if class.blocks_positive_offset() {
                (1, -((dim as i64) - 1))
            } else {
                (0, 1)
            }
        }
        -1 => {
            if class.blocks_negative_offset() {
                (-1, (dim as i64) - 1)
            } else {
                (0, -1)
            }
        }
        other => unreachable!("offset component {other} outside {{-1, 0, 1}}"),
    }
}

/// Materialized layout: sister-arc table, edge masks, and shift vectors,
/// computed once at construction and immutable thereafter (spec.md §3, §5).
#[derive(Debug, Clone)]
pub struct Layout {
    dim_count: usize,
    grid_dims: Vec<usize>,
    block_dims: Vec<usize>,
    blocks_per_axis: Vec<usize>,
    block_count: usize,
    cells_per_block: usize,
    nodes_per_cell: usize,
    nodes_per_block: usize,
    grid_strides: Vec<usize>,
    block_axis_strides: Vec<usize>,
    local_cell_strides: Vec<usize>,
    arcs_by_kind: Vec<Vec<crate::arc_template::TemplateArc>>,
    edge_sister: Vec<Vec<usize>>,
    /// `[cell_kind][node_location_index][edge_idx]`
    edge_mask_table: Vec<Vec<Vec<bool>>>,
    /// `[cell_kind][block_location_index][edge_idx]`: `(delta_block_id, delta_node_subid)`.
    shift_table: Vec<Vec<Vec<(i64, i64)>>>,
}

impl Layout {
    pub fn new(
        template: &ArcTemplate,
        grid_dims: Vec<usize>,
        block_dims: Vec<usize>,
    ) -> Result<Self, RegionFlowError> {
        let dim_count = template.dim_count();
        if grid_dims.len() != dim_count || block_dims.len() != dim_count {
            return Err(RegionFlowError::InvalidLayout {
                reason: format!(
                    "grid/block dimension count must match the arc template's {dim_count}"
                ),
            });
        }
        if grid_dims.iter().any(|&d| d == 0) || block_dims.iter().any(|&d| d == 0) {
            return Err(RegionFlowError::InvalidLayout {
                reason: "grid and block dimensions must be positive".to_string(),
            });
        }
        let mut blocks_per_axis = Vec::with_capacity(dim_count);
        for axis in 0..dim_count {
            let (g, b) = (grid_dims[axis], block_dims[axis]);
            if g % b != 0 {
                return Err(RegionFlowError::InvalidLayout {
                    reason: format!(
                        "block dimension {b} does not divide grid dimension {g} on axis {axis}"
                    ),
                });
            }
            blocks_per_axis.push(g / b);
        }

        let nodes_per_cell = template.nodes_per_cell();
        let arcs_by_kind = template.arcs_by_cell_kind();

        let mut edge_sister = Vec::with_capacity(nodes_per_cell);
        for kind in 0..nodes_per_cell {
            let mut sisters = Vec::with_capacity(arcs_by_kind[kind].len());
            for arc in &arcs_by_kind[kind] {
                let sister_offset: Vec<i8> = arc.offset.iter().map(|c| -c).collect();
                let sister_idx = arcs_by_kind[arc.to_cell]
                    .iter()
                    .position(|candidate| {
                        candidate.to_cell == kind && candidate.offset == sister_offset
                    })
                    .ok_or_else(|| RegionFlowError::InvalidLayout {
                        reason: format!("no sister found for arc emanating from cell-kind {kind}"),
                    })?;
                sisters.push(sister_idx);
            }
            edge_sister.push(sisters);
        }

        let grid_strides = row_major_strides(&grid_dims);
        let block_axis_strides = row_major_strides(&blocks_per_axis);
        let local_cell_strides = row_major_strides(&block_dims);

        // Every (cell-kind, location) cell of these tables is independent of
        // every other, so the precomputation fans out across
        // `nodes_per_cell` with rayon — negligible for a 2-D unit cell, but
        // this is the O(`NODES_PER_CELL` x 3^D) table spec.md §4.1 calls
        // out as the one-time cost multi-node-cell templates (e.g. a
        // supervoxel graph with dozens of nodes per cell) actually pay.
        let global_combos = all_class_combos(dim_count);
        let edge_mask_table: Vec<Vec<Vec<bool>>> = (0..nodes_per_cell)
            .into_par_iter()
            .map(|kind| {
                global_combos
                    .iter()
                    .map(|combo| {
                        arcs_by_kind[kind]
                            .iter()
                            .map(|arc| {
                                let leaves_grid = arc.offset.iter().enumerate().any(|(axis, &o)| {
                                    (o == -1 && combo[axis].blocks_negative_offset())
                                        || (o == 1 && combo[axis].blocks_positive_offset())
                                });
                                !leaves_grid
                            })
                            .collect()
                    })
                    .collect()
            })
            .collect();

        let block_combos = all_class_combos(dim_count);
        let shift_table: Vec<Vec<Vec<(i64, i64)>>> = (0..nodes_per_cell)
            .into_par_iter()
            .map(|kind| {
                block_combos
                    .iter()
                    .map(|combo| {
                        arcs_by_kind[kind]
                            .iter()
                            .map(|arc| {
                                let mut block_delta: i64 = 0;
                                let mut local_delta: i64 = 0;
                                for axis in 0..dim_count {
                                    let (bd, ld) =
                                        axis_shift(combo[axis], arc.offset[axis], block_dims[axis]);
                                    block_delta += bd * block_axis_strides[axis] as i64;
                                    local_delta += ld * local_cell_strides[axis] as i64;
                                }
                                let node_subid_delta = local_delta * nodes_per_cell as i64
                                    + (arc.to_cell as i64 - arc.from_cell as i64);
                                (block_delta, node_subid_delta)
                            })
                            .collect()
                    })
                    .collect()
            })
            .collect();

        let cells_per_block: usize = block_dims.iter().product();
        let block_count: usize = blocks_per_axis.iter().product();
        let nodes_per_block = cells_per_block * nodes_per_cell;

        Ok(Self {
            dim_count,
            grid_dims,
            block_dims,
            blocks_per_axis,
            block_count,
            cells_per_block,
            nodes_per_cell,
            nodes_per_block,
            grid_strides,
            block_axis_strides,
            local_cell_strides,
            arcs_by_kind,
            edge_sister,
            edge_mask_table,
            shift_table,
        })
    }

    pub fn dim_count(&self) -> usize {
        self.dim_count
    }

    pub fn grid_dims(&self) -> &[usize] {
        &self.grid_dims
    }

    pub fn block_dims(&self) -> &[usize] {
        &self.block_dims
    }

    pub fn block_count(&self) -> usize {
        self.block_count
    }

    pub fn cells_per_block(&self) -> usize {
        self.cells_per_block
    }

    pub fn nodes_per_cell(&self) -> usize {
        self.nodes_per_cell
    }

    pub fn nodes_per_block(&self) -> usize {
        self.nodes_per_block
    }

    pub fn arcs(&self, cell_kind: usize) -> &[crate::arc_template::TemplateArc] {
        &self.arcs_by_kind[cell_kind]
    }

    pub fn sister(&self, cell_kind: usize, edge_idx: usize) -> usize {
        self.edge_sister[cell_kind][edge_idx]
    }

    /// Location index against the *global* grid, for edge masking.
    pub fn node_location_of(&self, global_cell_coord: &[usize]) -> usize {
        let classes: Vec<AxisClass> = global_cell_coord
            .iter()
            .zip(&self.grid_dims)
            .map(|(&c, &d)| AxisClass::classify(c, d))
            .collect();
        pack_location(&classes)
    }

    /// Location index against *block* dimensions, for shift vectors.
    pub fn block_location_of(&self, local_cell_coord: &[usize]) -> usize {
        let classes: Vec<AxisClass> = local_cell_coord
            .iter()
            .zip(&self.block_dims)
            .map(|(&c, &d)| AxisClass::classify(c, d))
            .collect();
        pack_location(&classes)
    }

    pub fn edge_mask(&self, cell_kind: usize, node_location_index: usize) -> &[bool] {
        &self.edge_mask_table[cell_kind][node_location_index]
    }

    pub fn shifts(&self, cell_kind: usize, block_location_index: usize) -> &[(i64, i64)] {
        &self.shift_table[cell_kind][block_location_index]
    }

    /// Splits a global cell coordinate into `(block_id, local_cell_index)`.
    pub fn decompose_global_cell(&self, global_cell_coord: &[usize]) -> (usize, usize) {
        let block_coord: Vec<usize> = global_cell_coord
            .iter()
            .zip(&self.block_dims)
            .map(|(&c, &b)| c / b)
            .collect();
        let local_coord: Vec<usize> = global_cell_coord
            .iter()
            .zip(&self.block_dims)
            .map(|(&c, &b)| c % b)
            .collect();
        let block_id = encode_coord(&block_coord, &self.block_axis_strides);
        let local_cell_index = encode_coord(&local_coord, &self.local_cell_strides);
        (block_id, local_cell_index)
    }

    /// Reconstructs the global cell coordinate from `(block_id, local_cell_index)`.
    pub fn compose_global_cell(&self, block_id: usize, local_cell_index: usize) -> Vec<usize> {
        let block_coord = decode_coord(block_id, &self.blocks_per_axis, &self.block_axis_strides);
        let local_coord = decode_coord(local_cell_index, &self.block_dims, &self.local_cell_strides);
        block_coord
            .iter()
            .zip(&local_coord)
            .zip(&self.block_dims)
            .map(|((&bc, &lc), &b)| bc * b + lc)
            .collect()
    }

    /// The block-local cell coordinate (global coordinate modulo block
    /// dimensions), used to key [`Layout::block_location_of`].
    pub fn local_cell_coord(&self, global_cell_coord: &[usize]) -> Vec<usize> {
        global_cell_coord
            .iter()
            .zip(&self.block_dims)
            .map(|(&c, &b)| c % b)
            .collect()
    }

    pub fn node_subid(&self, local_cell_index: usize, cell_kind: usize) -> usize {
        local_cell_index * self.nodes_per_cell + cell_kind
    }

    pub fn local_cell_of(&self, node_subid: usize) -> (usize, usize) {
        (node_subid / self.nodes_per_cell, node_subid % self.nodes_per_cell)
    }

    /// Flat global node id, matching `Example.cpp`'s `ID(i,j) = d[1]*i + j`
    /// convention when `nodes_per_cell == 1`.
    pub fn global_node_id(&self, global_cell_coord: &[usize], cell_kind: usize) -> usize {
        encode_coord(global_cell_coord, &self.grid_strides) * self.nodes_per_cell + cell_kind
    }

    pub fn global_cell_of_node(&self, global_node_id: usize) -> (Vec<usize>, usize) {
        let cell_index = global_node_id / self.nodes_per_cell;
        let cell_kind = global_node_id % self.nodes_per_cell;
        (decode_coord(cell_index, &self.grid_dims, &self.grid_strides), cell_kind)
    }

    /// For every block, every other block reachable by a single arc
    /// crossing (a Chebyshev/"king-move" neighborhood over block
    /// coordinates — a conservative superset that covers diagonal arc
    /// templates like `eight_connected_2d` as well as axis-aligned ones).
    /// Feeds the region scheduler's fringe-locking (spec.md §4.5).
    pub fn block_neighbors(&self) -> Vec<Vec<usize>> {
        let mut neighbors = vec![Vec::new(); self.block_count];
        let mut deltas = vec![-1i64, 0, 1];
        let combos = cartesian_power(&mut deltas, self.dim_count);
        for block_id in 0..self.block_count {
            let coord = decode_coord(block_id, &self.blocks_per_axis, &self.block_axis_strides);
            let mut seen = Vec::new();
            for combo in &combos {
                if combo.iter().all(|&d| d == 0) {
                    continue;
                }
                let mut ok = true;
                let mut nbr_coord = vec![0usize; self.dim_count];
                for axis in 0..self.dim_count {
                    let v = coord[axis] as i64 + combo[axis];
                    if v < 0 || v >= self.blocks_per_axis[axis] as i64 {
                        ok = false;
                        break;
                    }
                    nbr_coord[axis] = v as usize;
                }
                if ok {
                    let nbr_id = encode_coord(&nbr_coord, &self.block_axis_strides);
                    if !seen.contains(&nbr_id) {
                        seen.push(nbr_id);
                    }
                }
            }
            neighbors[block_id] = seen;
        }
        neighbors
    }
}

fn cartesian_power(values: &mut [i64], dim_count: usize) -> Vec<Vec<i64>> {
    let mut combos = vec![Vec::new()];
    for _ in 0..dim_count {
        let mut next = Vec::with_capacity(combos.len() * values.len());
        for combo in &combos {
            for &v in values.iter() {
                let mut extended = combo.clone();
                extended.push(v);
                next.push(extended);
            }
        }
        combos = next;
    }
    combos
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arc_template::ArcTemplate;

    #[test]
    fn divisibility_is_enforced() {
        let template = ArcTemplate::four_connected_2d();
        let err = Layout::new(&template, vec![6, 6], vec![4, 4]).unwrap_err();
        assert!(matches!(err, RegionFlowError::InvalidLayout { .. }));
    }

    #[test]
    fn s1_scenario_block_count() {
        let template = ArcTemplate::four_connected_2d();
        let layout = Layout::new(&template, vec![6, 6], vec![3, 3]).unwrap();
        assert_eq!(layout.block_count(), 4);
        assert_eq!(layout.nodes_per_block(), 9);
    }

    #[test]
    fn global_node_id_matches_row_major_macro() {
        let template = ArcTemplate::four_connected_2d();
        let layout = Layout::new(&template, vec![6, 6], vec![3, 3]).unwrap();
        // ID(i, j) = d[1]*i + j from Example.cpp, with d = [6, 6].
        assert_eq!(layout.global_node_id(&[2, 3], 0), 6 * 2 + 3);
    }

    #[test]
    fn decompose_and_compose_round_trip() {
        let template = ArcTemplate::four_connected_2d();
        let layout = Layout::new(&template, vec![6, 6], vec![3, 3]).unwrap();
        for i in 0..6 {
            for j in 0..6 {
                let (block_id, local_idx) = layout.decompose_global_cell(&[i, j]);
                let back = layout.compose_global_cell(block_id, local_idx);
                assert_eq!(back, vec![i, j]);
            }
        }
    }

    #[test]
    fn unit_extent_axis_classifies_as_both() {
        assert_eq!(AxisClass::classify(0, 1), AxisClass::Both);
    }

    #[test]
    fn edge_leaving_grid_is_masked() {
        let template = ArcTemplate::four_connected_2d();
        let layout = Layout::new(&template, vec![4, 4], vec![2, 2]).unwrap();
        // top-left corner cell (0, 0): the "-1, 0" and "0, -1" arcs leave the grid.
        let loc = layout.node_location_of(&[0, 0]);
        let mask = layout.edge_mask(0, loc);
        let arcs = layout.arcs(0);
        for (arc, &allowed) in arcs.iter().zip(mask) {
            let leaves = (arc.offset[0] == -1) || (arc.offset[1] == -1);
            assert_eq!(allowed, !leaves, "arc {:?}", arc);
        }
    }

    #[test]
    fn shift_vector_crosses_block_on_high_face() {
        let template = ArcTemplate::four_connected_2d();
        let layout = Layout::new(&template, vec![6, 6], vec![3, 3]).unwrap();
        // local cell (2, 1) is on the block's high face along axis 0.
        let block_loc = layout.block_location_of(&[2, 1]);
        let arcs = layout.arcs(0);
        let shifts = layout.shifts(0, block_loc);
        let arc_idx = arcs.iter().position(|a| a.offset == vec![1, 0]).unwrap();
        let (delta_block, _) = shifts[arc_idx];
        assert_eq!(delta_block, layout.block_axis_strides[0] as i64);
    }

    #[test]
    fn one_by_four_grid_scenario_s3() {
        let template = ArcTemplate::four_connected_2d();
        let layout = Layout::new(&template, vec![1, 4], vec![1, 2]).unwrap();
        assert_eq!(layout.block_count(), 2);
        let (block_id, local_idx) = layout.decompose_global_cell(&[0, 3]);
        assert_eq!(block_id, 1);
        assert_eq!(local_idx, 1);
    }
}

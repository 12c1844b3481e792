//! Declarative description of the regular wiring pattern repeated from every
//! cell of the grid: the *arc template* of spec.md §3.
//!
//! This plays the role that `examples/original_source/Layout.h`'s
//! `OffsetVector` template parameter plays in the original — a small, fixed
//! multiset of `(from_cell, to_cell, offset)` triples — except it is a plain
//! data value accepted at construction time instead of a `boost::mpl` type
//! list unrolled at compile time (spec.md §9's re-architecture guidance).

use crate::region_error::RegionFlowError;

/// One arc in the template: from node `from_cell` of a cell to node
/// `to_cell` of the cell translated by `offset` (one signed component per
/// grid dimension, each required to be in `{-1, 0, 1}` — see SPEC_FULL.md §4
/// for why the layout precomputation depends on this).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TemplateArc {
    pub from_cell: usize,
    pub to_cell: usize,
    pub offset: Vec<i8>,
}

impl TemplateArc {
    pub fn new(from_cell: usize, to_cell: usize, offset: Vec<i8>) -> Self {
        Self {
            from_cell,
            to_cell,
            offset,
        }
    }

    fn negated_offset(&self) -> Vec<i8> {
        self.offset.iter().map(|c| -c).collect()
    }
}

/// The declarative wiring pattern shared by every cell of the grid.
#[derive(Debug, Clone)]
pub struct ArcTemplate {
    dim_count: usize,
    nodes_per_cell: usize,
    arcs: Vec<TemplateArc>,
}

impl ArcTemplate {
    /// Validates and wraps a raw arc list: every offset has `dim_count`
    /// components in `{-1, 0, 1}`, and every arc has a sister (same
    /// endpoints swapped, offset negated) present in the list.
    pub fn new(dim_count: usize, arcs: Vec<TemplateArc>) -> Result<Self, RegionFlowError> {
        if dim_count == 0 {
            return Err(RegionFlowError::InvalidLayout {
                reason: "dim_count must be positive".to_string(),
            });
        }
        if arcs.is_empty() {
            return Err(RegionFlowError::InvalidLayout {
                reason: "arc template must contain at least one arc".to_string(),
            });
        }

        let mut nodes_per_cell = 0usize;
        for arc in &arcs {
            nodes_per_cell = nodes_per_cell.max(arc.from_cell + 1).max(arc.to_cell + 1);
            if arc.offset.len() != dim_count {
                return Err(RegionFlowError::InvalidLayout {
                    reason: format!(
                        "arc ({} -> {}) has {} offset components, expected {}",
                        arc.from_cell,
                        arc.to_cell,
                        arc.offset.len(),
                        dim_count
                    ),
                });
            }
            if arc.offset.iter().any(|c| !(-1..=1).contains(c)) {
                return Err(RegionFlowError::InvalidLayout {
                    reason: format!(
                        "arc ({} -> {}, {:?}) has an offset component outside {{-1, 0, 1}}",
                        arc.from_cell, arc.to_cell, arc.offset
                    ),
                });
            }
        }

        for arc in &arcs {
            let sister_offset = arc.negated_offset();
            let has_sister = arcs.iter().any(|candidate| {
                candidate.from_cell == arc.to_cell
                    && candidate.to_cell == arc.from_cell
                    && candidate.offset == sister_offset
            });
            if !has_sister {
                return Err(RegionFlowError::InvalidLayout {
                    reason: format!(
                        "arc ({} -> {}, {:?}) has no sister arc in the template",
                        arc.from_cell, arc.to_cell, arc.offset
                    ),
                });
            }
        }

        Ok(Self {
            dim_count,
            nodes_per_cell,
            arcs,
        })
    }

    pub fn dim_count(&self) -> usize {
        self.dim_count
    }

    pub fn nodes_per_cell(&self) -> usize {
        self.nodes_per_cell
    }

    pub fn arcs(&self) -> &[TemplateArc] {
        &self.arcs
    }

    /// The arcs grouped by cell-kind (`arcs[k]` of spec.md §3), in
    /// declaration order within each group — `Discharge` relies on this
    /// order for tie-breaking among admissible edges.
    pub fn arcs_by_cell_kind(&self) -> Vec<Vec<TemplateArc>> {
        let mut grouped = vec![Vec::new(); self.nodes_per_cell];
        for arc in &self.arcs {
            grouped[arc.from_cell].push(arc.clone());
        }
        grouped
    }

    /// Four-connected 2-D lattice: the `FourConnected` template of
    /// `examples/original_source/Example.cpp`.
    pub fn four_connected_2d() -> Self {
        let arcs = vec![
            TemplateArc::new(0, 0, vec![1, 0]),
            TemplateArc::new(0, 0, vec![-1, 0]),
            TemplateArc::new(0, 0, vec![0, 1]),
            TemplateArc::new(0, 0, vec![0, -1]),
        ];
        Self::new(2, arcs).expect("four_connected_2d is a valid template")
    }

    /// Eight-connected 2-D lattice (adds the four diagonals).
    pub fn eight_connected_2d() -> Self {
        let mut arcs = vec![
            TemplateArc::new(0, 0, vec![1, 0]),
            TemplateArc::new(0, 0, vec![-1, 0]),
            TemplateArc::new(0, 0, vec![0, 1]),
            TemplateArc::new(0, 0, vec![0, -1]),
        ];
        for &(dx, dy) in &[(1i8, 1i8), (1, -1), (-1, 1), (-1, -1)] {
            arcs.push(TemplateArc::new(0, 0, vec![dx, dy]));
        }
        Self::new(2, arcs).expect("eight_connected_2d is a valid template")
    }

    /// Six-connected 3-D lattice (face neighbors only).
    pub fn six_connected_3d() -> Self {
        let arcs = vec![
            TemplateArc::new(0, 0, vec![1, 0, 0]),
            TemplateArc::new(0, 0, vec![-1, 0, 0]),
            TemplateArc::new(0, 0, vec![0, 1, 0]),
            TemplateArc::new(0, 0, vec![0, -1, 0]),
            TemplateArc::new(0, 0, vec![0, 0, 1]),
            TemplateArc::new(0, 0, vec![0, 0, -1]),
        ];
        Self::new(3, arcs).expect("six_connected_3d is a valid template")
    }

    /// Twenty-six-connected 3-D lattice (every non-zero offset in
    /// `{-1, 0, 1}^3`).
    pub fn twenty_six_connected_3d() -> Self {
        let mut arcs = Vec::with_capacity(26);
        for dx in -1i8..=1 {
            for dy in -1i8..=1 {
                for dz in -1i8..=1 {
                    if dx == 0 && dy == 0 && dz == 0 {
                        continue;
                    }
                    arcs.push(TemplateArc::new(0, 0, vec![dx, dy, dz]));
                }
            }
        }
        Self::new(3, arcs).expect("twenty_six_connected_3d is a valid template")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn four_connected_has_every_sister() {
        let template = ArcTemplate::four_connected_2d();
        assert_eq!(template.arcs().len(), 4);
        assert_eq!(template.nodes_per_cell(), 1);
    }

    #[test]
    fn twenty_six_connected_has_26_arcs() {
        let template = ArcTemplate::twenty_six_connected_3d();
        assert_eq!(template.arcs().len(), 26);
    }

    #[test]
    fn missing_sister_is_rejected() {
        let arcs = vec![TemplateArc::new(0, 0, vec![1, 0])];
        let err = ArcTemplate::new(2, arcs).unwrap_err();
        assert!(matches!(err, RegionFlowError::InvalidLayout { .. }));
    }

    #[test]
    fn offset_out_of_range_is_rejected() {
        let arcs = vec![
            TemplateArc::new(0, 0, vec![2, 0]),
            TemplateArc::new(0, 0, vec![-2, 0]),
        ];
        let err = ArcTemplate::new(2, arcs).unwrap_err();
        assert!(matches!(err, RegionFlowError::InvalidLayout { .. }));
    }

    #[test]
    fn wrong_dimension_count_is_rejected() {
        let arcs = vec![
            TemplateArc::new(0, 0, vec![1, 0, 0]),
            TemplateArc::new(0, 0, vec![-1, 0, 0]),
        ];
        let err = ArcTemplate::new(2, arcs).unwrap_err();
        assert!(matches!(err, RegionFlowError::InvalidLayout { .. }));
    }

    #[test]
    fn multi_node_cell_groups_by_kind() {
        // two nodes per cell, connected to each other and to the right neighbor's node 0
        let arcs = vec![
            TemplateArc::new(0, 1, vec![0, 0]),
            TemplateArc::new(1, 0, vec![0, 0]),
            TemplateArc::new(1, 0, vec![1, 0]),
            TemplateArc::new(0, 1, vec![-1, 0]),
        ];
        let template = ArcTemplate::new(2, arcs).unwrap();
        assert_eq!(template.nodes_per_cell(), 2);
        let grouped = template.arcs_by_cell_kind();
        assert_eq!(grouped[0].len(), 2);
        assert_eq!(grouped[1].len(), 2);
    }
}

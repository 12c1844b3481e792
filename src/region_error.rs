//! Error kinds for the region-parallel push-relabel engine (spec.md §7).
//!
//! The teacher crate declares `thiserror` in `Cargo.toml` but never actually
//! derives with it — `tsplib::TspError` hand-rolls a `enum` + `impl From`
//! instead. This is the first module in the lineage to put the dependency
//! to work.

use thiserror::Error;

/// Every failure this crate can report, synchronously at setup/query time
/// or (for `CapacityOverflow`) discovered by a worker during `compute_maxflow`.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RegionFlowError {
    /// Block dimensions that do not divide grid dimensions, an arc template
    /// missing a sister, an out-of-range cell index, or an offset outside
    /// `{-1, 0, 1}`. Raised at construction.
    #[error("invalid layout: {reason}")]
    InvalidLayout { reason: String },

    /// `add_edge` called on a pair of nodes not connected by the arc
    /// template, or with an out-of-range node index.
    #[error("invalid edge {source} -> {target}: {reason}")]
    InvalidEdge {
        source: usize,
        target: usize,
        reason: String,
    },

    /// Accumulated flow or capacity would exceed the range of `FlowType`.
    /// Leaves the solver in an unspecified state; the object should be
    /// discarded.
    #[error("flow capacity overflow while {context}")]
    CapacityOverflow { context: String },

    /// `get_flow`/`get_segment` called before `compute_maxflow` completed,
    /// or `compute_maxflow` called a second time.
    #[error("invalid query: {reason}")]
    InvalidQuery { reason: String },
}

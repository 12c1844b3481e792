//! Cross-block push messages (spec.md §3 "Block: inbox", §4.4 "Boundary
//! Messaging").
//!
//! toolbox-rs has no multi-block analogue to ground this on directly (its
//! `push_relabel.rs` is single-block/single-threaded); the synchronization
//! shape — state that must be touched from more than one worker pulled
//! behind one lock, read by whichever thread currently holds the claim — is
//! grounded on `examples/other_examples/b0ea8487_vcoppe-ddo-caching__src-solver-barrier.rs.rs`'s
//! `Shared`/`Critical` split.
//!
//! A message carries both the capacity credit and the excess credit for the
//! sister arc, applied together when the destination block's discharge next
//! drains its inbox. Between send and drain, the in-flight amount is exactly
//! the "transient excess during discharge" invariant 3 of spec.md §3 already
//! allows; see DESIGN.md for why this is a stronger (but still invariant-
//! preserving) reading than the literal "capacity already incremented on the
//! sending side" wording of spec.md §4.4.
//!
//! Admissibility (`label[u] == label[v] + 1`) is checked once, by the sender,
//! against its own current label before the push is issued — the sending
//! block has no way to know the destination's label at arrival time, and
//! correctness of the max-flow (capacity bounds plus conservation) does not
//! depend on re-checking it: a message that lands on a node whose label has
//! since moved just becomes additional excess for that node's next discharge
//! or relabel to route onward.

use std::collections::VecDeque;

use parking_lot::Mutex;

/// A push that crossed a block boundary, queued for the destination block.
#[derive(Debug, Clone, Copy)]
pub struct BoundaryMessage<Flow> {
    pub dst_node_subid: usize,
    /// Index, within the destination node's arc list, of the sister edge
    /// whose residual capacity this message credits.
    pub dst_edge_idx: usize,
    pub amount: Flow,
}

/// A block's inbox: a bounded, lock-protected FIFO of pending messages.
/// Protected by `parking_lot::Mutex` rather than `std::sync::Mutex` for the
/// same reason as the region scheduler (`src/scheduler.rs`): no poisoning to
/// thread through, and cheaper uncontended locking under the
/// frequently-short critical sections spec.md §5 calls for.
#[derive(Debug)]
pub struct Inbox<Flow> {
    queue: Mutex<VecDeque<BoundaryMessage<Flow>>>,
}

impl<Flow> Default for Inbox<Flow> {
    fn default() -> Self {
        Self {
            queue: Mutex::new(VecDeque::new()),
        }
    }
}

impl<Flow> Inbox<Flow> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, message: BoundaryMessage<Flow>) {
        self.queue.lock().push_back(message);
    }

    /// Removes and returns every message currently queued. Called at the
    /// start of a block's discharge (spec.md §4.3 step 1).
    pub fn drain(&self) -> Vec<BoundaryMessage<Flow>> {
        let mut queue = self.queue.lock();
        queue.drain(..).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn drain_empties_the_queue() {
        let inbox: Inbox<i64> = Inbox::new();
        inbox.push(BoundaryMessage {
            dst_node_subid: 3,
            dst_edge_idx: 1,
            amount: 5,
        });
        inbox.push(BoundaryMessage {
            dst_node_subid: 4,
            dst_edge_idx: 0,
            amount: 2,
        });
        assert!(!inbox.is_empty());
        let drained = inbox.drain();
        assert_eq!(drained.len(), 2);
        assert!(inbox.is_empty());
    }
}

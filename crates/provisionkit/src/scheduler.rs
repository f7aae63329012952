//! Topological scheduler - Kahn's algorithm over a `PlanGraph`
//!
//! [`ready_sets`] gives the static layering used for plan output.
//! [`Scheduler`] tracks in-degrees during execution: a resource enters a
//! ready set only once every dependency has been marked Ready, and a
//! failure removes all of its transitive dependents from the schedule.

use crate::graph::PlanGraph;
use crate::types::ResourceAddress;
use std::collections::VecDeque;

/// Batches of resources that may run concurrently, in dependency order
///
/// For every edge `a depends on b`, `b` lands in a strictly earlier set.
pub fn ready_sets(graph: &PlanGraph) -> Vec<Vec<ResourceAddress>> {
    let n = graph.len();
    let mut indeg: Vec<usize> = (0..n).map(|i| graph.deps_idx(i).len()).collect();
    let mut current: Vec<usize> = (0..n).filter(|&i| indeg[i] == 0).collect();
    let mut sets = Vec::new();

    while !current.is_empty() {
        let mut next = Vec::new();
        for &u in &current {
            for &v in graph.dependents_idx(u) {
                indeg[v] -= 1;
                if indeg[v] == 0 {
                    next.push(v);
                }
            }
        }
        next.sort_unstable();
        sets.push(current.iter().map(|&i| graph.node(i).clone()).collect());
        current = next;
    }

    sets
}

/// Ready sets in reverse: dependents before their dependencies
///
/// Flattened, this is exactly the reverse of the flattened [`ready_sets`].
pub fn teardown_sets(graph: &PlanGraph) -> Vec<Vec<ResourceAddress>> {
    let mut sets = ready_sets(graph);
    sets.reverse();
    for set in &mut sets {
        set.reverse();
    }
    sets
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Slot {
    Waiting,
    Dispatched,
    Ready,
    Failed,
    Skipped,
}

/// Dynamic ready-set scheduler for one apply cycle
///
/// The scheduler is the only writer of the in-degree counters; workers
/// report back through [`Scheduler::mark_ready`] and
/// [`Scheduler::mark_failed`].
#[derive(Debug)]
pub struct Scheduler<'g> {
    graph: &'g PlanGraph,
    remaining: Vec<usize>,
    slots: Vec<Slot>,
}

impl<'g> Scheduler<'g> {
    pub fn new(graph: &'g PlanGraph) -> Self {
        let n = graph.len();
        Self {
            graph,
            remaining: (0..n).map(|i| graph.deps_idx(i).len()).collect(),
            slots: vec![Slot::Waiting; n],
        }
    }

    /// Every waiting resource whose dependencies are all Ready
    ///
    /// Returned resources are marked dispatched and will not be returned
    /// again. An empty set means nothing can make progress right now.
    pub fn next_ready_set(&mut self) -> Vec<ResourceAddress> {
        let mut set = Vec::new();
        for i in 0..self.slots.len() {
            if self.slots[i] == Slot::Waiting && self.remaining[i] == 0 {
                self.slots[i] = Slot::Dispatched;
                set.push(self.graph.node(i).clone());
            }
        }
        set
    }

    /// Record that a dispatched resource reached Ready
    pub fn mark_ready(&mut self, address: &ResourceAddress) {
        let Some(i) = self.graph.index_of(address) else {
            return;
        };
        if self.slots[i] != Slot::Dispatched {
            log::warn!("{address} marked ready while not dispatched");
        }
        self.slots[i] = Slot::Ready;
        for &v in self.graph.dependents_idx(i) {
            self.remaining[v] = self.remaining[v].saturating_sub(1);
        }
    }

    /// Record a failure; returns the transitive dependents now skipped
    pub fn mark_failed(&mut self, address: &ResourceAddress) -> Vec<ResourceAddress> {
        let Some(i) = self.graph.index_of(address) else {
            return Vec::new();
        };
        self.slots[i] = Slot::Failed;

        let mut skipped = Vec::new();
        let mut queue = VecDeque::from([i]);
        while let Some(u) = queue.pop_front() {
            for &v in self.graph.dependents_idx(u) {
                if self.slots[v] == Slot::Waiting {
                    self.slots[v] = Slot::Skipped;
                    skipped.push(self.graph.node(v).clone());
                    queue.push_back(v);
                }
            }
        }
        skipped.sort();
        skipped
    }

    /// Skip everything not yet dispatched (cancellation)
    pub fn skip_remaining(&mut self) -> Vec<ResourceAddress> {
        let mut skipped = Vec::new();
        for i in 0..self.slots.len() {
            if self.slots[i] == Slot::Waiting {
                self.slots[i] = Slot::Skipped;
                skipped.push(self.graph.node(i).clone());
            }
        }
        skipped
    }

    /// True once no resource is waiting or in flight
    pub fn is_finished(&self) -> bool {
        self.slots
            .iter()
            .all(|s| matches!(s, Slot::Ready | Slot::Failed | Slot::Skipped))
    }
}

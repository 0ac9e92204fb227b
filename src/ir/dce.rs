//! Dead code elimination over a finished graph
//!
//! Nodes are removed in two rounds:
//!
//!   1. Control nodes not reachable from the start node along successor edges. Their edges into
//!      live merges are dropped first, taking the matching phi inputs with them.
//!
//!   2. Nodes not reachable from the surviving control nodes along input (and state) edges.
//!
//! The control round has to come first: otherwise the data round could walk from a dead control
//! node into the data it uses and keep it all alive. Afterwards merges with one predecessor, phis
//! with one distinct input, and frame states with no users are folded away, repeating the data
//! round until nothing changes. Running the pass on its own output removes nothing.

use super::{Graph, NodeId, NodeKind};
use std::collections::VecDeque;

/// Counts of what one run of dead code elimination removed
#[derive(Copy, Clone, Default, PartialEq, Eq, Debug)]
pub struct DceStats {
    /// Unreachable control nodes
    pub control_removed: usize,

    /// Unused data nodes
    pub data_removed: usize,

    /// Merges, phis, and frame states that got folded away
    pub simplified: usize,
}

impl DceStats {
    pub fn total(&self) -> usize {
        self.control_removed + self.data_removed + self.simplified
    }
}

pub fn eliminate_dead_code(graph: &mut Graph) -> DceStats {
    let mut stats = DceStats::default();

    let live_control = mark_control(graph);
    stats.control_removed = sweep_control(graph, &live_control);

    loop {
        stats.data_removed += sweep_data(graph, &live_control);
        let simplified = simplify(graph);
        if simplified == 0 {
            break;
        }
        stats.simplified += simplified;
    }

    log::debug!(
        "Dead code elimination removed {} control, {} data, and simplified {} nodes",
        stats.control_removed,
        stats.data_removed,
        stats.simplified
    );
    stats
}

/// Mark control nodes reachable from the start
fn mark_control(graph: &Graph) -> Vec<bool> {
    let mut marked = vec![false; graph.capacity()];
    let mut worklist = VecDeque::new();
    marked[graph.start().index()] = true;
    worklist.push_back(graph.start());

    while let Some(id) = worklist.pop_front() {
        for succ in graph[id].successors.iter().flatten() {
            if graph.is_live(*succ) && !marked[succ.index()] {
                marked[succ.index()] = true;
                worklist.push_back(*succ);
            }
        }
    }
    marked
}

fn sweep_control(graph: &mut Graph, live_control: &[bool]) -> usize {
    let dead = graph.filter(|node| node.kind.is_control());
    let dead: Vec<NodeId> = dead
        .into_iter()
        .filter(|id| !live_control[id.index()])
        .collect();

    for id in &dead {
        graph.disconnect(*id);
    }
    for id in &dead {
        graph.delete(*id);
    }
    dead.len()
}

/// Delete everything not used (transitively) by a live control node
fn sweep_data(graph: &mut Graph, live_control: &[bool]) -> usize {
    let mut marked = vec![false; graph.capacity()];
    let mut worklist = VecDeque::new();
    for id in graph.node_ids() {
        if live_control[id.index()] {
            marked[id.index()] = true;
            worklist.push_back(id);
        }
    }

    while let Some(id) = worklist.pop_front() {
        let node = &graph[id];
        for used in node.inputs.iter().chain(node.state_after.iter()) {
            if graph.is_live(*used) && !marked[used.index()] {
                marked[used.index()] = true;
                worklist.push_back(*used);
            }
        }
    }

    let dead: Vec<NodeId> = graph
        .node_ids()
        .filter(|id| !marked[id.index()])
        .collect();
    for id in &dead {
        graph.clear_inputs(*id);
    }
    for id in &dead {
        graph.delete(*id);
    }
    dead.len()
}

/// One round of folding trivial merges, phis, and frame states
fn simplify(graph: &mut Graph) -> usize {
    let mut simplified = 0;

    let single_entry = graph.filter(|node| {
        node.kind == NodeKind::Merge && node.predecessors.len() == 1
    });
    for merge in single_entry {
        for phi in graph.phis(merge) {
            match graph[phi].inputs.get(1).copied() {
                Some(value) if value != phi => graph.replace_all_usages(phi, value),
                _ => (),
            }
            graph.delete(phi);
            simplified += 1;
        }
        graph.clear_inputs(merge);
        if graph.can_splice_out(merge) {
            graph.splice_out(merge);
        } else {
            graph[merge].kind = NodeKind::End;
        }
        simplified += 1;
    }

    for phi in graph.filter(|node| node.kind == NodeKind::Phi) {
        if graph.is_live(phi) && graph.simplify_phi(phi) {
            simplified += 1;
        }
    }

    let orphans = graph.filter(|node| {
        matches!(node.kind, NodeKind::FrameState { .. }) && node.usages.is_empty()
    });
    for state in orphans {
        graph.delete(state);
        simplified += 1;
    }

    simplified
}

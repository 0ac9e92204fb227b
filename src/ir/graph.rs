use super::{Constant, Node, NodeId, NodeKind, ValueKind};
use std::collections::HashMap;
use std::fmt;
use std::ops::{Index, IndexMut};

/// Arena of nodes forming one method's graph
///
/// Edges are kept consistent in both directions: adding an input registers a usage, attaching a
/// successor registers a predecessor. Deleting a node frees its slot without ever reusing it, so
/// stale ids are detected (`get` returns `None`) rather than silently aliasing a new node.
///
/// All iteration happens in id order, so a given sequence of edits always produces the same
/// graph.
#[derive(Clone)]
pub struct Graph {
    nodes: Vec<Option<Node>>,
    start: NodeId,

    /// Canonical node for each constant (lookups only)
    constants: HashMap<Constant, NodeId>,
    live: usize,
}

impl Default for Graph {
    fn default() -> Graph {
        Graph::new()
    }
}

impl Graph {
    /// New graph containing just a start node
    pub fn new() -> Graph {
        let mut graph = Graph {
            nodes: vec![],
            start: NodeId(0),
            constants: HashMap::new(),
            live: 0,
        };
        graph.start = graph.add(NodeKind::Start, ValueKind::Void, vec![]);
        graph
    }

    pub fn start(&self) -> NodeId {
        self.start
    }

    /// Number of nodes that have not been deleted
    pub fn live_count(&self) -> usize {
        self.live
    }

    /// Upper bound on node indices (including deleted nodes)
    pub fn capacity(&self) -> usize {
        self.nodes.len()
    }

    pub fn get(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(id.index()).and_then(Option::as_ref)
    }

    pub fn is_live(&self, id: NodeId) -> bool {
        self.get(id).is_some()
    }

    /// Live nodes, in ascending id order
    pub fn node_ids(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.nodes
            .iter()
            .enumerate()
            .filter(|(_, node)| node.is_some())
            .map(|(idx, _)| NodeId(idx as u32))
    }

    /// Live nodes matching a predicate, in ascending id order
    pub fn filter(&self, predicate: impl Fn(&Node) -> bool) -> Vec<NodeId> {
        self.node_ids().filter(|id| predicate(&self[*id])).collect()
    }

    pub fn add(&mut self, kind: NodeKind, value_kind: ValueKind, inputs: Vec<NodeId>) -> NodeId {
        let id = NodeId(self.nodes.len() as u32);
        for input in &inputs {
            self[*input].usages.push(id);
        }
        self.nodes.push(Some(Node::new(kind, value_kind, inputs)));
        self.live += 1;
        id
    }

    /// Canonical node for a constant
    ///
    /// Equal constants always share a node, so identity comparison on values sees through them.
    pub fn constant(&mut self, constant: Constant) -> NodeId {
        if let Some(id) = self.constants.get(&constant) {
            if self.is_live(*id) {
                return *id;
            }
        }
        let kind = constant.kind();
        let id = self.add(NodeKind::Constant(constant.clone()), kind, vec![]);
        self.constants.insert(constant, id);
        id
    }

    pub fn set_bci(&mut self, node: NodeId, bci: u32) {
        self[node].bci = Some(bci);
    }

    /// Attach `to` as the successor at `index` of `from`
    pub fn set_successor(&mut self, from: NodeId, index: usize, to: NodeId) {
        let successors = &mut self[from].successors;
        if successors.len() <= index {
            successors.resize(index + 1, None);
        }
        debug_assert!(
            successors[index].is_none(),
            "successor {} of {} is already set",
            index,
            from
        );
        successors[index] = Some(to);
        self[to].predecessors.push(from);
    }

    pub fn add_input(&mut self, node: NodeId, input: NodeId) {
        self[node].inputs.push(input);
        self[input].usages.push(node);
    }

    pub fn remove_input_at(&mut self, node: NodeId, index: usize) {
        let input = self[node].inputs.remove(index);
        self.remove_usage(input, node);
    }

    pub fn set_state_after(&mut self, node: NodeId, state: NodeId) {
        debug_assert!(self[node].state_after.is_none(), "{} already has a state", node);
        self[node].state_after = Some(state);
        self[state].usages.push(node);
    }

    fn remove_usage(&mut self, used: NodeId, user: NodeId) {
        if let Some(Some(node)) = self.nodes.get_mut(used.index()) {
            if let Some(pos) = node.usages.iter().position(|u| *u == user) {
                node.usages.swap_remove(pos);
            }
        }
    }

    /// Distinct users of a node, in id order
    pub fn users(&self, node: NodeId) -> Vec<NodeId> {
        let mut users = self[node].usages.clone();
        users.sort();
        users.dedup();
        users
    }

    /// Phis attached to a merge, in id order
    pub fn phis(&self, merge: NodeId) -> Vec<NodeId> {
        self.users(merge)
            .into_iter()
            .filter(|user| self[*user].is_phi_of(merge))
            .collect()
    }

    /// Make every usage of `old` (as input or as state) refer to `new` instead
    pub fn replace_all_usages(&mut self, old: NodeId, new: NodeId) {
        let users = self.users(old);
        self[old].usages.clear();
        for user in users {
            let node = &mut self[user];
            let mut replaced = 0;
            for input in node.inputs.iter_mut().filter(|input| **input == old) {
                *input = new;
                replaced += 1;
            }
            if node.state_after == Some(old) {
                node.state_after = Some(new);
                replaced += 1;
            }
            for _ in 0..replaced {
                self[new].usages.push(user);
            }
        }
    }

    /// Remove the `index`-th predecessor of a merge, along with the matching phi inputs
    ///
    /// This does not touch the successors of the predecessor.
    pub fn remove_predecessor(&mut self, merge: NodeId, index: usize) {
        self[merge].predecessors.remove(index);
        for phi in self.phis(merge) {
            if self[phi].inputs.len() > index + 1 {
                self.remove_input_at(phi, index + 1);
            }
        }
    }

    /// Can a node with one predecessor be spliced out?
    ///
    /// Not when its predecessor already has another edge into its successor: that would leave
    /// the successor with the same predecessor twice, and no way to tell which phi input belongs
    /// to which edge.
    pub fn can_splice_out(&self, node: NodeId) -> bool {
        let pred = match self[node].predecessors.as_slice() {
            [pred] => *pred,
            _ => return false,
        };
        match self[node].successor(0) {
            Some(succ) => !self[pred].successors.contains(&Some(succ)),
            None => true,
        }
    }

    /// Remove a node with one predecessor and at most one successor from the control flow,
    /// linking the predecessor directly to the successor
    ///
    /// The predecessor takes the node's place in the successor's predecessor list, so phi inputs
    /// of a successor merge stay lined up.
    pub fn splice_out(&mut self, node: NodeId) {
        debug_assert!(self.can_splice_out(node));
        debug_assert!(self[node].successors.len() <= 1);

        let pred = self[node].predecessors[0];
        let succ = self[node].successor(0);
        if let Some(slot) = self[pred].successors.iter_mut().find(|s| **s == Some(node)) {
            *slot = succ;
        }
        if let Some(succ) = succ {
            if let Some(slot) = self[succ].predecessors.iter_mut().find(|p| **p == node) {
                *slot = pred;
            }
        }
        self[node].predecessors.clear();
        self[node].successors.clear();
        self.delete(node);
    }

    /// Drop all of the inputs and the state of a node
    pub fn clear_inputs(&mut self, node: NodeId) {
        let inputs = std::mem::take(&mut self[node].inputs);
        for input in inputs {
            self.remove_usage(input, node);
        }
        if let Some(state) = self[node].state_after.take() {
            self.remove_usage(state, node);
        }
    }

    /// Remove all edges touching a node, except usages of it
    ///
    /// Successor merges lose the corresponding predecessor (and phi inputs).
    pub fn disconnect(&mut self, node: NodeId) {
        self.clear_inputs(node);

        let successors = std::mem::take(&mut self[node].successors);
        for succ in successors.into_iter().flatten() {
            if !self.is_live(succ) {
                continue;
            }
            if let Some(pos) = self[succ].predecessors.iter().position(|p| *p == node) {
                if self[succ].kind.is_merge() {
                    self.remove_predecessor(succ, pos);
                } else {
                    self[succ].predecessors.remove(pos);
                }
            }
        }

        let predecessors = std::mem::take(&mut self[node].predecessors);
        for pred in predecessors {
            if let Some(pred_node) = self.nodes.get_mut(pred.index()).and_then(Option::as_mut) {
                for slot in pred_node.successors.iter_mut() {
                    if *slot == Some(node) {
                        *slot = None;
                    }
                }
            }
        }
    }

    /// Disconnect and free a node
    ///
    /// Remaining users lose their references to the node. Callers are expected to only delete
    /// nodes whose users are dead or about to be deleted too.
    pub fn delete(&mut self, node: NodeId) {
        if !self.is_live(node) {
            return;
        }
        self.disconnect(node);
        for user in self.users(node) {
            if let Some(user_node) = self.nodes.get_mut(user.index()).and_then(Option::as_mut) {
                user_node.inputs.retain(|input| *input != node);
                if user_node.state_after == Some(node) {
                    user_node.state_after = None;
                }
            }
        }
        self.nodes[node.index()] = None;
        self.live -= 1;
    }

    /// Remove a phi whose inputs are all the same value (ignoring the phi itself)
    ///
    /// Returns whether the phi was removed.
    pub fn simplify_phi(&mut self, phi: NodeId) -> bool {
        let mut unique = None;
        for input in &self[phi].inputs[1..] {
            if *input == phi {
                continue;
            }
            match unique {
                None => unique = Some(*input),
                Some(value) if value == *input => (),
                Some(_) => return false,
            }
        }
        match unique {
            Some(value) => {
                self.replace_all_usages(phi, value);
                self.delete(phi);
                true
            }
            None => false,
        }
    }

    /// Drop a value from a frame state, marking its slot as empty
    pub fn remove_state_input(&mut self, state: NodeId, value: NodeId) {
        let node = &mut self[state];
        let present = match &mut node.kind {
            NodeKind::FrameState { present, .. } => present,
            _ => return,
        };
        let mut input_idx = 0;
        let mut removed = 0;
        for slot in present.iter_mut().filter(|slot| **slot) {
            if node.inputs[input_idx] == value {
                *slot = false;
                node.inputs.remove(input_idx);
                removed += 1;
            } else {
                input_idx += 1;
            }
        }
        for _ in 0..removed {
            self.remove_usage(value, state);
        }
    }
}

impl Index<NodeId> for Graph {
    type Output = Node;

    fn index(&self, id: NodeId) -> &Node {
        match self.get(id) {
            Some(node) => node,
            None => panic!("{} has been deleted", id),
        }
    }
}

impl IndexMut<NodeId> for Graph {
    fn index_mut(&mut self, id: NodeId) -> &mut Node {
        match self.nodes.get_mut(id.index()).and_then(Option::as_mut) {
            Some(node) => node,
            None => panic!("{} has been deleted", id),
        }
    }
}

fn write_ids(f: &mut fmt::Formatter, ids: impl Iterator<Item = String>) -> fmt::Result {
    let ids: Vec<String> = ids.collect();
    write!(f, "[{}]", ids.join(", "))
}

/// One line per live node, in id order
impl fmt::Display for Graph {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        for id in self.node_ids() {
            let node = &self[id];
            write!(f, "{}: {}", id, node.kind)?;
            if node.value_kind != ValueKind::Void {
                write!(f, " : {:?}", node.value_kind)?;
            }
            if !node.inputs.is_empty() {
                write!(f, " in=")?;
                write_ids(f, node.inputs.iter().map(NodeId::to_string))?;
            }
            if !node.successors.is_empty() {
                write!(f, " succ=")?;
                let succs = node.successors.iter().map(|succ| match succ {
                    Some(succ) => succ.to_string(),
                    None => "_".to_owned(),
                });
                write_ids(f, succs)?;
            }
            if node.kind.is_merge() {
                write!(f, " pred=")?;
                write_ids(f, node.predecessors.iter().map(NodeId::to_string))?;
            }
            if let Some(state) = node.state_after {
                write!(f, " state={}", state)?;
            }
            if let Some(bci) = node.bci {
                write!(f, " @{}", bci)?;
            }
            writeln!(f)?;
        }
        Ok(())
    }
}

impl fmt::Debug for Graph {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

use super::{Bailout, FrameStateError};
use crate::ir::{Graph, NodeId, NodeKind, ValueKind};
use crate::util::Width;

/// Value held in a local variable or on the operand stack
#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug)]
pub struct Value {
    pub node: NodeId,
    pub kind: ValueKind,
}

impl Value {
    pub fn new(node: NodeId, kind: ValueKind) -> Value {
        Value { node, kind }
    }
}

impl Width for Value {
    fn width(&self) -> usize {
        self.kind.width()
    }
}

/// Abstract interpreter state at one point in the bytecode
///
/// Locals are indexed by slot: a `long` or `double` in slot `i` leaves slot `i + 1` empty. The
/// stack holds whole values (so a `long` is one entry of width 2), the way the stack shuffling
/// instructions see it.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct FrameState {
    /// Bytecode offset this state describes
    pub bci: u32,
    pub locals: Vec<Option<Value>>,
    pub stack: Vec<Value>,

    /// Objects whose monitors are held, innermost last
    pub locks: Vec<NodeId>,
    check_kinds: bool,
}

impl FrameState {
    pub fn new(max_locals: usize, check_kinds: bool) -> FrameState {
        FrameState {
            bci: 0,
            locals: vec![None; max_locals],
            stack: vec![],
            locks: vec![],
            check_kinds,
        }
    }

    /// Independent copy tagged with a new position
    pub fn duplicate(&self, bci: u32) -> FrameState {
        FrameState {
            bci,
            ..self.clone()
        }
    }

    /// Size of the stack in slots
    pub fn stack_slots(&self) -> usize {
        self.stack.iter().map(Width::width).sum()
    }

    pub fn push(&mut self, kind: ValueKind, node: NodeId) {
        debug_assert_ne!(kind, ValueKind::Void, "cannot push a void value");
        self.stack.push(Value::new(node, kind));
    }

    pub fn push_value(&mut self, value: Value) {
        self.stack.push(value);
    }

    pub fn pop_value(&mut self) -> Result<Value, FrameStateError> {
        self.stack.pop().ok_or(FrameStateError::EmptyStack)
    }

    /// Pop a value, checking only that it has the expected width
    pub fn pop_expecting_width(&mut self, expected_width: usize) -> Result<Value, FrameStateError> {
        let value = self.pop_value()?;
        let found_width = value.width();
        if found_width == expected_width {
            Ok(value)
        } else {
            Err(FrameStateError::InvalidWidth(found_width))
        }
    }

    /// Pop a value of a known kind
    pub fn pop(&mut self, kind: ValueKind) -> Result<NodeId, FrameStateError> {
        let value = self.pop_expecting_width(kind.width())?;
        if self.check_kinds && value.kind != kind {
            return Err(FrameStateError::InvalidKind {
                expected: kind,
                found: Some(value.kind),
            });
        }
        Ok(value.node)
    }

    /// Pop the values taking up the top `slots` slots, returned bottom-most first
    ///
    /// Fails if a two-slot value straddles the boundary.
    pub fn pop_slots(&mut self, slots: usize) -> Result<Vec<Value>, FrameStateError> {
        let mut popped = vec![];
        let mut remaining = slots;
        while remaining > 0 {
            let value = self.pop_value()?;
            if value.width() > remaining {
                return Err(FrameStateError::InvalidWidth(value.width()));
            }
            remaining -= value.width();
            popped.push(value);
        }
        popped.reverse();
        Ok(popped)
    }

    /// Pop call arguments of the given kinds, returned in declaration order
    pub fn pop_arguments(&mut self, kinds: &[ValueKind]) -> Result<Vec<NodeId>, FrameStateError> {
        let mut arguments = kinds
            .iter()
            .rev()
            .map(|kind| self.pop(*kind))
            .collect::<Result<Vec<_>, _>>()?;
        arguments.reverse();
        Ok(arguments)
    }

    pub fn load_local(&self, index: u16, kind: ValueKind) -> Result<NodeId, FrameStateError> {
        match self.locals.get(index as usize) {
            Some(Some(value)) if !self.check_kinds || value.kind == kind => Ok(value.node),
            Some(Some(value)) => Err(FrameStateError::InvalidKind {
                expected: kind,
                found: Some(value.kind),
            }),
            _ => Err(FrameStateError::InvalidLocal(index)),
        }
    }

    /// Store into a local, clobbering any two-slot value overlapping it
    pub fn store_local(&mut self, index: u16, value: Value) -> Result<(), FrameStateError> {
        let index = index as usize;
        if index + value.width() > self.locals.len() {
            return Err(FrameStateError::InvalidLocal(index as u16));
        }
        if index > 0 {
            if let Some(previous) = self.locals[index - 1] {
                if previous.width() == 2 {
                    self.locals[index - 1] = None;
                }
            }
        }
        self.locals[index] = Some(value);
        if value.width() == 2 {
            self.locals[index + 1] = None;
        }
        Ok(())
    }

    pub fn clear_locals(&mut self) {
        for local in self.locals.iter_mut() {
            *local = None;
        }
    }

    pub fn clear_stack(&mut self) {
        self.stack.clear();
    }

    pub fn push_lock(&mut self, object: NodeId) {
        self.locks.push(object);
    }

    pub fn pop_lock(&mut self) -> Result<NodeId, FrameStateError> {
        self.locks.pop().ok_or(FrameStateError::NoLockHeld)
    }

    /// Can another path's state be merged into this one?
    ///
    /// Stacks must agree value for value on kind, and the same number of locks must be held.
    /// Locals never make states incompatible: disagreeing locals are just dropped.
    pub fn check_compatible(&self, other: &FrameState) -> Result<(), Bailout> {
        let reason = if self.stack.len() != other.stack.len() {
            format!(
                "stack depth {} vs. {}",
                self.stack.len(),
                other.stack.len()
            )
        } else if let Some((ours, theirs)) = self
            .stack
            .iter()
            .zip(&other.stack)
            .find(|(ours, theirs)| ours.kind != theirs.kind)
        {
            format!("stack kinds {:?} vs. {:?}", ours.kind, theirs.kind)
        } else if self.locks.len() != other.locks.len() {
            format!("{} locks vs. {}", self.locks.len(), other.locks.len())
        } else if self.locals.len() != other.locals.len() {
            format!("{} locals vs. {}", self.locals.len(), other.locals.len())
        } else {
            return Ok(());
        };
        Err(Bailout::IncompatibleFrames {
            bci: self.bci,
            reason,
        })
    }

    /// Merge the state of a new predecessor of `merge` into this one
    ///
    /// The control edge from the new predecessor must already be attached to `merge`. Slots
    /// holding the same value on all paths are left alone; other slots get a phi (created on
    /// the first disagreement, extended with one input per later predecessor). Locals whose
    /// kinds disagree become empty.
    pub fn merge(
        &mut self,
        graph: &mut Graph,
        merge: NodeId,
        other: &FrameState,
    ) -> Result<(), Bailout> {
        self.check_compatible(other)?;
        let predecessors = graph[merge].predecessors.len();

        for (local, incoming) in self.locals.iter_mut().zip(&other.locals) {
            *local = merge_value(graph, merge, predecessors, *local, *incoming);
        }
        for (value, incoming) in self.stack.iter_mut().zip(&other.stack) {
            let merged = merge_value(graph, merge, predecessors, Some(*value), Some(*incoming));
            if let Some(merged) = merged {
                *value = merged;
            }
        }
        for (lock, incoming) in self.locks.iter_mut().zip(&other.locks) {
            let ours = Value::new(*lock, ValueKind::Object);
            let theirs = Value::new(*incoming, ValueKind::Object);
            if let Some(merged) = merge_value(graph, merge, predecessors, Some(ours), Some(theirs))
            {
                *lock = merged.node;
            }
        }
        Ok(())
    }

    /// Give every value a phi at a loop header, so that the loop body can refer to values
    /// which the back edges have not supplied yet
    pub fn insert_loop_phis(&mut self, graph: &mut Graph, loop_begin: NodeId) {
        let predecessors = graph[loop_begin].predecessors.len();
        let phi_for = |graph: &mut Graph, value: Value| -> Value {
            if is_phi_of(graph, value.node, loop_begin) {
                return value;
            }
            let mut inputs = vec![loop_begin];
            inputs.extend(std::iter::repeat(value.node).take(predecessors));
            Value::new(graph.add(NodeKind::Phi, value.kind, inputs), value.kind)
        };

        for local in self.locals.iter_mut() {
            if let Some(value) = local {
                *value = phi_for(graph, *value);
            }
        }
        for value in self.stack.iter_mut() {
            *value = phi_for(graph, *value);
        }
        for lock in self.locks.iter_mut() {
            *lock = phi_for(graph, Value::new(*lock, ValueKind::Object)).node;
        }
    }

    /// Add the back edge inputs to the phis of a loop header (this state is the header's)
    ///
    /// A local whose back edge value is missing or of another kind loses its phi. That only
    /// works if nothing but frame states (or other such phis) use the phi.
    pub fn close_loop(
        &self,
        graph: &mut Graph,
        loop_begin: NodeId,
        end: &FrameState,
    ) -> Result<(), Bailout> {
        self.check_compatible(end)?;

        let locals = self.locals.iter().zip(&end.locals);
        let stack = self.stack.iter().zip(&end.stack).map(|(v, i)| (Some(v), Some(i)));
        let locks = self.locks.iter().zip(&end.locks).map(|(lock, incoming)| {
            (
                Value::new(*lock, ValueKind::Object),
                Value::new(*incoming, ValueKind::Object),
            )
        });
        let locks: Vec<(Value, Value)> = locks.collect();
        let slots = locals
            .map(|(local, incoming)| (local.as_ref(), incoming.as_ref()))
            .chain(stack)
            .chain(locks.iter().map(|(l, i)| (Some(l), Some(i))));

        for (phi, incoming) in slots {
            let phi = match phi {
                Some(phi) if is_phi_of(graph, phi.node, loop_begin) => *phi,
                _ => continue,
            };
            match incoming {
                Some(incoming) if incoming.kind == phi.kind && graph.is_live(incoming.node) => {
                    graph.add_input(phi.node, incoming.node)
                }
                _ => kill_phi(graph, phi.node, self.bci)?,
            }
        }
        Ok(())
    }

    /// Record this state in the graph
    pub fn snapshot(&self, graph: &mut Graph, bci: u32) -> NodeId {
        let mut present = Vec::with_capacity(self.locals.len() + self.stack.len());
        let mut inputs = vec![];
        for local in &self.locals {
            present.push(local.is_some());
            inputs.extend(local.map(|value| value.node));
        }
        for value in &self.stack {
            present.push(true);
            inputs.push(value.node);
        }
        inputs.extend(self.locks.iter().copied());

        let kind = NodeKind::FrameState {
            bci,
            present,
            locals: self.locals.len() as u16,
            locks: self.locks.len() as u16,
        };
        graph.add(kind, ValueKind::Void, inputs)
    }
}

fn is_phi_of(graph: &Graph, node: NodeId, merge: NodeId) -> bool {
    graph.get(node).map_or(false, |node| node.is_phi_of(merge))
}

/// Merge one slot, returning `None` if the slot must become empty
fn merge_value(
    graph: &mut Graph,
    merge: NodeId,
    predecessors: usize,
    current: Option<Value>,
    incoming: Option<Value>,
) -> Option<Value> {
    let current = current?;
    let owned_phi = is_phi_of(graph, current.node, merge);
    match incoming {
        Some(incoming) if incoming.kind == current.kind => {
            if owned_phi {
                graph.add_input(current.node, incoming.node);
                Some(current)
            } else if current.node == incoming.node {
                Some(current)
            } else {
                let mut inputs = vec![merge];
                inputs.extend(std::iter::repeat(current.node).take(predecessors - 1));
                inputs.push(incoming.node);
                let phi = graph.add(NodeKind::Phi, current.kind, inputs);
                Some(Value::new(phi, current.kind))
            }
        }
        _ => {
            if owned_phi {
                graph.delete(current.node);
            }
            None
        }
    }
}

/// Remove a phi which cannot get a consistent input, along with any phis depending on it
///
/// Frame states referring to a removed phi lose that slot. Any other use means the code really
/// does depend on the inconsistent value, which is a bailout.
fn kill_phi(graph: &mut Graph, phi: NodeId, bci: u32) -> Result<(), Bailout> {
    let mut worklist = vec![phi];
    let mut killed = vec![];
    while let Some(phi) = worklist.pop() {
        if killed.contains(&phi) {
            continue;
        }
        killed.push(phi);
        for user in graph.users(phi) {
            let user_kind = &graph[user].kind;
            if matches!(user_kind, NodeKind::FrameState { .. }) {
                graph.remove_state_input(user, phi);
            } else if *user_kind == NodeKind::Phi {
                worklist.push(user);
            } else {
                return Err(Bailout::IncompatibleFrames {
                    bci,
                    reason: format!("{} is used with inconsistent kinds", phi),
                });
            }
        }
    }
    for phi in killed {
        graph.delete(phi);
    }
    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::ir::Constant;

    fn state_with(graph: &mut Graph, locals: usize) -> FrameState {
        let mut state = FrameState::new(locals, true);
        for i in 0..locals {
            let param = graph.add(NodeKind::Parameter(i as u16), ValueKind::Int, vec![]);
            state.locals[i] = Some(Value::new(param, ValueKind::Int));
        }
        state
    }

    fn merge_with_preds(graph: &mut Graph, preds: usize) -> NodeId {
        let merge = graph.add(NodeKind::Merge, ValueKind::Void, vec![]);
        for _ in 0..preds {
            let pred = graph.add(NodeKind::Placeholder, ValueKind::Void, vec![]);
            graph.set_successor(pred, 0, merge);
        }
        merge
    }

    #[test]
    fn typed_push_and_pop() {
        let mut graph = Graph::new();
        let mut state = FrameState::new(0, true);
        let long = graph.constant(Constant::Long(1));
        let int = graph.constant(Constant::Int(1));

        state.push(ValueKind::Long, long);
        state.push(ValueKind::Int, int);
        assert_eq!(state.stack_slots(), 3);
        assert_eq!(
            state.pop(ValueKind::Float),
            Err(FrameStateError::InvalidKind {
                expected: ValueKind::Float,
                found: Some(ValueKind::Int)
            })
        );

        state.push(ValueKind::Int, int);
        assert_eq!(state.pop_slots(2), Err(FrameStateError::InvalidWidth(2)));

        let mut state = FrameState::new(0, false);
        state.push(ValueKind::Long, long);
        state.push(ValueKind::Int, int);
        assert_eq!(state.pop(ValueKind::Float), Ok(int));
        assert_eq!(
            state.pop(ValueKind::Int),
            Err(FrameStateError::InvalidWidth(2))
        );
        assert_eq!(state.pop(ValueKind::Int), Err(FrameStateError::EmptyStack));
    }

    #[test]
    fn wide_locals_clobber_neighbours() {
        let mut graph = Graph::new();
        let mut state = state_with(&mut graph, 4);
        let long = graph.constant(Constant::Long(7));

        state.store_local(1, Value::new(long, ValueKind::Long)).unwrap();
        assert!(state.locals[0].is_some());
        assert_eq!(state.load_local(1, ValueKind::Long), Ok(long));
        assert_eq!(state.locals[2], None);
        assert!(state.locals[3].is_some());

        let int = graph.constant(Constant::Int(7));
        state.store_local(2, Value::new(int, ValueKind::Int)).unwrap();
        assert_eq!(state.locals[1], None);
        assert_eq!(
            state.load_local(1, ValueKind::Long),
            Err(FrameStateError::InvalidLocal(1))
        );
        assert_eq!(
            state.store_local(3, Value::new(long, ValueKind::Long)),
            Err(FrameStateError::InvalidLocal(3))
        );
    }

    #[test]
    fn merge_inserts_phis_only_where_values_differ() {
        let mut graph = Graph::new();
        let mut entry = state_with(&mut graph, 2);
        let one = graph.constant(Constant::Int(1));
        let two = graph.constant(Constant::Int(2));
        let three = graph.constant(Constant::Int(3));
        entry.push(ValueKind::Int, one);

        let merge = merge_with_preds(&mut graph, 2);
        let mut second = entry.clone();
        second.clear_stack();
        second.push(ValueKind::Int, two);
        entry.merge(&mut graph, merge, &second).unwrap();

        let phi = entry.stack[0].node;
        assert_eq!(graph[phi].inputs, vec![merge, one, two]);
        assert_eq!(graph.phis(merge), vec![phi]);

        // Third predecessor extends the existing phi
        let pred = graph.add(NodeKind::Placeholder, ValueKind::Void, vec![]);
        graph.set_successor(pred, 0, merge);
        let mut third = second.clone();
        third.clear_stack();
        third.push(ValueKind::Int, three);
        entry.merge(&mut graph, merge, &third).unwrap();
        assert_eq!(entry.stack[0].node, phi);
        assert_eq!(graph[phi].inputs, vec![merge, one, two, three]);
        assert_eq!(graph.phis(merge), vec![phi]);
    }

    #[test]
    fn merge_kills_inconsistent_locals() {
        let mut graph = Graph::new();
        let mut entry = state_with(&mut graph, 2);
        let merge = merge_with_preds(&mut graph, 2);

        let mut other = entry.clone();
        let float = graph.constant(Constant::float(1.0));
        other
            .store_local(1, Value::new(float, ValueKind::Float))
            .unwrap();
        let local0 = entry.locals[0];
        entry.merge(&mut graph, merge, &other).unwrap();
        assert_eq!(entry.locals[0], local0);
        assert_eq!(entry.locals[1], None);
        assert!(graph.phis(merge).is_empty());
    }

    #[test]
    fn merge_rejects_stack_mismatch() {
        let mut graph = Graph::new();
        let mut entry = state_with(&mut graph, 1);
        let merge = merge_with_preds(&mut graph, 2);
        let mut other = entry.clone();
        let one = graph.constant(Constant::Int(1));
        other.push(ValueKind::Int, one);

        assert!(matches!(
            entry.merge(&mut graph, merge, &other),
            Err(Bailout::IncompatibleFrames { .. })
        ));

        entry.push(ValueKind::Object, graph.constant(Constant::Null));
        assert!(matches!(
            entry.check_compatible(&other),
            Err(Bailout::IncompatibleFrames { .. })
        ));
    }

    #[test]
    fn snapshots_skip_empty_slots() {
        let mut graph = Graph::new();
        let mut state = state_with(&mut graph, 3);
        state.locals[1] = None;
        let one = graph.constant(Constant::Int(1));
        state.push(ValueKind::Int, one);

        let snapshot = state.snapshot(&mut graph, 5);
        let expected_inputs = vec![
            state.locals[0].unwrap().node,
            state.locals[2].unwrap().node,
            one,
        ];
        assert_eq!(graph[snapshot].inputs, expected_inputs);
        assert_eq!(
            graph[snapshot].kind,
            NodeKind::FrameState {
                bci: 5,
                present: vec![true, false, true, true],
                locals: 3,
                locks: 0,
            }
        );
    }
}

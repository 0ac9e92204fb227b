use super::{
    Bailout, BlockMap, FrameState, Settings, Value, RETURN_BLOCK, SYNC_UNLOCK_BLOCK, UNWIND_BLOCK,
};
use crate::ir::{eliminate_dead_code, Constant, Graph, NodeId, NodeKind, ValueKind, EXIT_BCI};
use crate::jvm::{BytecodeStream, ConstantPool, Decoded, Error, MethodInfo, Resolution};
use crate::util::Width;
use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};

/// Build the graph of a method
///
/// On success, the graph has a single `Start` node and no placeholders. On failure, nothing is
/// salvaged: the bailout says why the method can't be compiled.
pub fn build_graph<P: ConstantPool + ?Sized>(
    method: &MethodInfo,
    pool: &P,
    settings: &Settings,
) -> Result<Graph, Bailout> {
    GraphBuilder::new(method, pool, settings)?.build()
}

/// Node at the entry of a block
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum BlockEntry {
    /// No jump to the block has been seen
    Unresolved,

    /// Exactly one jump to the block has been seen
    Placeholder(NodeId),

    /// `Merge` or `LoopBegin`
    Settled(NodeId),
}

/// Bookkeeping for a loop header
struct LoopInfo {
    begin: NodeId,
    end: NodeId,

    /// Merged state of all back edges seen so far
    end_state: Option<FrameState>,
}

/// Position of the builder in the control flow being built
///
/// All of the opcode handlers take the cursor explicitly, which makes them usable on a state
/// set up by hand.
#[derive(Clone, Debug)]
pub struct BuilderCursor {
    /// Abstract interpreter state at the current instruction
    pub state: FrameState,

    /// Last fixed node appended, or `None` once control flow has left the block
    pub last: Option<NodeId>,

    /// Offset of the instruction being built
    pub bci: u32,

    /// Offset of the instruction after it
    pub next_bci: u32,
}

impl BuilderCursor {
    /// Take the node which control flows out of, ending the current block
    pub(super) fn take_last(&mut self) -> Result<NodeId, Bailout> {
        self.last.take().ok_or(Bailout::IncompatibleFrames {
            bci: self.bci,
            reason: String::from("instruction reached after the end of its block"),
        })
    }
}

/// Single pass abstract interpreter producing the graph of one method
///
/// Blocks are parsed in increasing id order off of a worklist. Since ids follow a reverse
/// postorder of the control flow, every forward predecessor of a block has been parsed by the
/// time the block is, so each block is parsed exactly once, with its full entry state. Back edges
/// only ever reach loop headers, and are collected on the loop's `LoopEnd` until the loop gets
/// closed after the last block.
pub struct GraphBuilder<'a, P: ConstantPool + ?Sized> {
    pub(super) method: &'a MethodInfo,
    pub(super) pool: &'a P,
    pub(super) settings: &'a Settings,
    pub(super) graph: Graph,
    blocks: BlockMap,

    /// Entry node for every block (including the synthetic ones), by slot
    entries: Vec<BlockEntry>,

    /// State at the entry of each block, by slot
    entry_states: Vec<Option<FrameState>>,
    loops: Vec<Option<LoopInfo>>,

    worklist: BinaryHeap<Reverse<u32>>,
    on_worklist: Vec<bool>,
    visited: Vec<bool>,

    /// Values whose dynamic type is known exactly (lookups only)
    pub(super) exact_types: HashMap<NodeId, String>,

    /// Do throwing nodes get exception edges?
    has_exception_edges: bool,
}

impl<'a, P: ConstantPool + ?Sized> GraphBuilder<'a, P> {
    pub fn new(
        method: &'a MethodInfo,
        pool: &'a P,
        settings: &'a Settings,
    ) -> Result<GraphBuilder<'a, P>, Bailout> {
        let blocks = BlockMap::new(method)?;
        let slots = blocks.len() + 3;
        Ok(GraphBuilder {
            method,
            pool,
            settings,
            graph: Graph::new(),
            blocks,
            entries: vec![BlockEntry::Unresolved; slots],
            entry_states: vec![None; slots],
            loops: (0..slots).map(|_| None).collect(),
            worklist: BinaryHeap::new(),
            on_worklist: vec![false; slots],
            visited: vec![false; slots],
            exact_types: HashMap::new(),
            has_exception_edges: !method.exception_handlers.is_empty()
                || method.is_synchronized(),
        })
    }

    pub fn build(mut self) -> Result<Graph, Bailout> {
        self.build_entry()?;
        while let Some(Reverse(block)) = self.worklist.pop() {
            let slot = self.slot(block);
            self.on_worklist[slot] = false;
            self.process_block(block)?;
            self.check_budget()?;
        }
        self.finalize_loops()?;
        self.cleanup();
        log::debug!(
            "built graph for {}.{}: {} nodes",
            self.method.holder,
            self.method.name,
            self.graph.live_count()
        );
        Ok(self.graph)
    }

    /// Index of a block in the per-block tables
    fn slot(&self, block: u32) -> usize {
        let synthetic = self.blocks.len();
        match block {
            RETURN_BLOCK => synthetic,
            SYNC_UNLOCK_BLOCK => synthetic + 1,
            UNWIND_BLOCK => synthetic + 2,
            id => id as usize,
        }
    }

    fn block_start(&self, block: u32) -> u32 {
        match block {
            RETURN_BLOCK | SYNC_UNLOCK_BLOCK | UNWIND_BLOCK => EXIT_BCI,
            id => self.blocks.block(id).start_bci,
        }
    }

    fn is_loop_header(&self, block: u32) -> bool {
        match block {
            RETURN_BLOCK | SYNC_UNLOCK_BLOCK | UNWIND_BLOCK => false,
            id => self.blocks.block(id).is_loop_header,
        }
    }

    /// Id of the block starting at a jump target
    pub(super) fn block_at(&self, cursor: &BuilderCursor, target: u32) -> Result<u32, Bailout> {
        self.blocks.block_starting_at(target).ok_or_else(|| {
            Bailout::Malformed(Error::InvalidJumpTarget {
                offset: cursor.bci,
                target: target as i64,
            })
        })
    }

    fn check_budget(&self) -> Result<(), Bailout> {
        if self.graph.live_count() > self.settings.max_graph_nodes {
            Err(Bailout::NodeBudgetExceeded {
                limit: self.settings.max_graph_nodes,
            })
        } else {
            Ok(())
        }
    }

    /// Set up parameters (and the method lock) and jump to the first block
    fn build_entry(&mut self) -> Result<(), Bailout> {
        let method = self.method;
        let start = self.graph.start();
        let mut state = FrameState::new(
            method.max_locals as usize,
            self.settings.check_stack_kinds,
        );

        let mut slot: u16 = 0;
        if !method.is_static() {
            let receiver = self.graph.add(NodeKind::Parameter(0), ValueKind::Object, vec![]);
            state.store_local(0, Value::new(receiver, ValueKind::Object))?;
            slot += 1;
        }
        for parameter in &method.descriptor.parameters {
            let kind = ValueKind::from_field_type(parameter);
            let node = self.graph.add(NodeKind::Parameter(slot), kind, vec![]);
            state.store_local(slot, Value::new(node, kind))?;
            slot += kind.width() as u16;
        }

        let mut cursor = BuilderCursor {
            state,
            last: Some(start),
            bci: 0,
            next_bci: 0,
        };
        let start_state = cursor.state.snapshot(&mut self.graph, 0);
        self.graph.set_state_after(start, start_state);

        if method.is_synchronized() {
            let lock = match cursor.state.locals.first() {
                Some(Some(receiver)) if !method.is_static() => receiver.node,
                _ => self.graph.constant(Constant::Class(method.holder.clone())),
            };
            let enter = self.graph.add(NodeKind::MonitorEnter, ValueKind::Void, vec![lock]);
            self.append(&mut cursor, enter);
            cursor.state.push_lock(lock);
            self.attach_state(enter, &cursor.state, 0);
        }

        let last = cursor.take_last()?;
        let state = cursor.state.duplicate(0);
        self.jump_to(last, 0, 0, state)
    }

    fn process_block(&mut self, block: u32) -> Result<(), Bailout> {
        let slot = self.slot(block);
        let entry = self.entries[slot];
        let entry = match entry {
            BlockEntry::Unresolved => {
                log::trace!("block {} is unreachable", block);
                return Ok(());
            }
            BlockEntry::Placeholder(entry) | BlockEntry::Settled(entry) => entry,
        };
        if self.visited[slot] {
            if self.is_loop_header(block) {
                return Ok(());
            }
            return Err(Bailout::NonLoopRevisit {
                bci: self.block_start(block),
            });
        }
        self.visited[slot] = true;

        let mut state = match &self.entry_states[slot] {
            Some(state) => state.clone(),
            None => return Ok(()),
        };
        if let Some(info) = &self.loops[slot] {
            state.insert_loop_phis(&mut self.graph, info.begin);
            self.entry_states[slot] = Some(state.clone());
        }
        if self.graph[entry].kind.is_merge() {
            self.attach_state(entry, &state, state.bci);
        }

        let start_bci = self.block_start(block);
        let mut cursor = BuilderCursor {
            state,
            last: Some(entry),
            bci: start_bci,
            next_bci: start_bci,
        };
        match block {
            RETURN_BLOCK => self.build_return_block(&mut cursor),
            SYNC_UNLOCK_BLOCK => self.build_sync_unlock_block(&mut cursor),
            UNWIND_BLOCK => self.build_unwind_block(&mut cursor),
            _ => self.parse_block(block, &mut cursor),
        }
    }

    /// Decode the instructions of a block, from its entry state
    fn parse_block(&mut self, block: u32, cursor: &mut BuilderCursor) -> Result<(), Bailout> {
        let method = self.method;
        let (start_bci, end_bci) = {
            let block = self.blocks.block(block);
            (block.start_bci, block.end_bci)
        };
        log::debug!("parsing block {} [{}, {})", block, start_bci, end_bci);

        let mut stream = BytecodeStream::new(&method.code);
        stream.seek(start_bci);
        while cursor.last.is_some() {
            if stream.current_bci() >= end_bci {
                // Fell through into the next block
                let target = self.block_at(cursor, end_bci)?;
                let last = cursor.take_last()?;
                let state = cursor.state.duplicate(end_bci);
                self.jump_to(last, 0, target, state)?;
                break;
            }

            let (bci, decoded) = stream.next_instruction()?;
            cursor.bci = bci;
            cursor.next_bci = stream.current_bci();
            cursor.state.bci = bci;
            log::trace!("{:>5}: {:?}", bci, decoded);

            let result = match decoded {
                Decoded::Instruction(instruction) => self.build_instruction(cursor, instruction),
                Decoded::Branch(branch) => self.build_branch(cursor, branch),
                Decoded::Subroutine => Err(Bailout::Subroutine { bci }),
            };
            result.map_err(|err| err.at(bci))?;
            self.check_budget()?;
        }
        Ok(())
    }

    /// Every `*return` ends up here, with just the returned value on the stack
    fn build_return_block(&mut self, cursor: &mut BuilderCursor) -> Result<(), Bailout> {
        if self.method.is_synchronized() {
            let lock = cursor.state.pop_lock()?;
            let exit = self.graph.add(NodeKind::MonitorExit, ValueKind::Void, vec![lock]);
            self.append(cursor, exit);
            self.attach_state(exit, &cursor.state, cursor.bci);
        }

        let return_kind = ValueKind::from_return_type(self.method.descriptor.return_type.as_ref());
        let inputs = if return_kind == ValueKind::Void {
            vec![]
        } else {
            vec![cursor.state.pop(return_kind)?]
        };
        let ret = self.graph.add(NodeKind::Return, ValueKind::Void, inputs);
        self.append(cursor, ret);
        cursor.last = None;
        Ok(())
    }

    /// Release the lock of a synchronized method on the way out of an exception
    fn build_sync_unlock_block(&mut self, cursor: &mut BuilderCursor) -> Result<(), Bailout> {
        let exception = cursor.state.pop(ValueKind::Object)?;
        let lock = cursor.state.pop_lock()?;
        let exit = self.graph.add(NodeKind::MonitorExit, ValueKind::Void, vec![lock]);
        self.append(cursor, exit);
        cursor.state.push(ValueKind::Object, exception);
        self.attach_state(exit, &cursor.state, cursor.bci);

        let last = cursor.take_last()?;
        let state = cursor.state.duplicate(EXIT_BCI);
        self.jump_to(last, 0, UNWIND_BLOCK, state)
    }

    fn build_unwind_block(&mut self, cursor: &mut BuilderCursor) -> Result<(), Bailout> {
        let exception = cursor.state.pop(ValueKind::Object)?;
        let unwind = self.graph.add(NodeKind::Unwind, ValueKind::Void, vec![exception]);
        self.append(cursor, unwind);
        cursor.last = None;
        Ok(())
    }

    fn enqueue(&mut self, block: u32) {
        let slot = self.slot(block);
        if !self.on_worklist[slot] && !self.visited[slot] {
            self.on_worklist[slot] = true;
            self.worklist.push(Reverse(block));
        }
    }

    /// Connect successor `index` of `from` to the entry of a block, merging `state` into the
    /// block's entry state
    pub(super) fn jump_to(
        &mut self,
        from: NodeId,
        index: usize,
        block: u32,
        state: FrameState,
    ) -> Result<(), Bailout> {
        let slot = self.slot(block);

        if self.visited[slot] {
            // Back edge: gets collected on the `LoopEnd`
            let end = match &self.loops[slot] {
                Some(info) => info.end,
                None => {
                    return Err(Bailout::NonLoopRevisit {
                        bci: self.block_start(block),
                    })
                }
            };
            self.connect(from, index, end);
            if let Some(info) = self.loops[slot].as_mut() {
                match &mut info.end_state {
                    Some(end_state) => end_state.merge(&mut self.graph, end, &state)?,
                    None => {
                        if let Some(header_state) = &self.entry_states[slot] {
                            header_state.check_compatible(&state)?;
                        }
                        info.end_state = Some(state);
                    }
                }
            }
            return Ok(());
        }

        let current = self.entries[slot];
        match current {
            BlockEntry::Unresolved => {
                let entry = if self.is_loop_header(block) {
                    let begin = self.graph.add(NodeKind::LoopBegin, ValueKind::Void, vec![]);
                    let end = self.graph.add(NodeKind::LoopEnd, ValueKind::Void, vec![begin]);
                    self.loops[slot] = Some(LoopInfo {
                        begin,
                        end,
                        end_state: None,
                    });
                    self.entries[slot] = BlockEntry::Settled(begin);
                    begin
                } else {
                    let placeholder =
                        self.graph
                            .add(NodeKind::Placeholder, ValueKind::Void, vec![]);
                    self.entries[slot] = BlockEntry::Placeholder(placeholder);
                    placeholder
                };
                let start_bci = self.block_start(block);
                if start_bci != EXIT_BCI {
                    self.graph.set_bci(entry, start_bci);
                }
                self.graph.set_successor(from, index, entry);
                self.entry_states[slot] = Some(state.duplicate(start_bci));
            }
            BlockEntry::Placeholder(entry) | BlockEntry::Settled(entry) => {
                if let BlockEntry::Placeholder(_) = current {
                    log::debug!("block {} has several predecessors: {} is a merge", block, entry);
                    self.graph[entry].kind = NodeKind::Merge;
                    self.entries[slot] = BlockEntry::Settled(entry);
                }
                self.connect(from, index, entry);
                if let Some(entry_state) = &mut self.entry_states[slot] {
                    entry_state.merge(&mut self.graph, entry, &state)?;
                }
            }
        }

        self.enqueue(block);
        Ok(())
    }

    /// Add an edge into a merge, going through an `End` when `from` already has an edge into it
    fn connect(&mut self, from: NodeId, index: usize, merge: NodeId) {
        if self.graph[from].successors.contains(&Some(merge)) {
            let end = self.graph.add(NodeKind::End, ValueKind::Void, vec![]);
            self.graph.set_successor(from, index, end);
            self.graph.set_successor(end, 0, merge);
        } else {
            self.graph.set_successor(from, index, merge);
        }
    }

    /// Link a new fixed node after the last one
    ///
    /// Nodes of the exit paths keep no offset.
    pub(super) fn append(&mut self, cursor: &mut BuilderCursor, node: NodeId) {
        if let Some(last) = cursor.last {
            self.graph.set_successor(last, 0, node);
        }
        if cursor.bci != EXIT_BCI {
            self.graph.set_bci(node, cursor.bci);
        }
        cursor.last = Some(node);
    }

    pub(super) fn attach_state(&mut self, node: NodeId, state: &FrameState, bci: u32) {
        let snapshot = state.snapshot(&mut self.graph, bci);
        self.graph.set_state_after(node, snapshot);
    }

    /// Add a value which doesn't depend on control flow and push it
    pub(super) fn floating(
        &mut self,
        cursor: &mut BuilderCursor,
        kind: NodeKind,
        value_kind: ValueKind,
        inputs: Vec<NodeId>,
    ) -> NodeId {
        let node = self.graph.add(kind, value_kind, inputs);
        self.graph.set_bci(node, cursor.bci);
        cursor.state.push(value_kind, node);
        node
    }

    /// Append a fixed node, push its result (if any), and give it a state and exception edge
    /// as needed
    pub(super) fn fixed(
        &mut self,
        cursor: &mut BuilderCursor,
        kind: NodeKind,
        value_kind: ValueKind,
        inputs: Vec<NodeId>,
        throws: bool,
    ) -> Result<NodeId, Bailout> {
        let side_effect = kind.has_side_effect();
        let node = self.graph.add(kind, value_kind, inputs);
        self.append(cursor, node);
        if value_kind != ValueKind::Void {
            cursor.state.push(value_kind, node);
        }
        if side_effect {
            self.attach_state(node, &cursor.state, cursor.next_bci);
        }
        if throws {
            self.exception_edge(cursor, node)?;
        }
        Ok(node)
    }

    /// Push a constant
    pub(super) fn constant(&mut self, cursor: &mut BuilderCursor, constant: Constant) {
        let exact_type = match &constant {
            Constant::String(_) => Some("java/lang/String"),
            Constant::Class(_) => Some("java/lang/Class"),
            _ => None,
        };
        let kind = constant.kind();
        let node = self.graph.constant(constant);
        if let Some(exact_type) = exact_type {
            self.exact_types.insert(node, exact_type.to_owned());
        }
        cursor.state.push(kind, node);
    }

    /// Replace an instruction whose constant pool entry didn't resolve with a `Deoptimize`
    ///
    /// The operands are popped and a default value of the result kind is pushed, so that
    /// building can go on past the instruction.
    pub(super) fn deoptimize(
        &mut self,
        cursor: &mut BuilderCursor,
        cpi: u16,
        operands: &[ValueKind],
        result: ValueKind,
    ) -> Result<(), Bailout> {
        log::debug!("constant {} at bci {} is unresolved", cpi, cursor.bci);
        let state_before = cursor.state.snapshot(&mut self.graph, cursor.bci);
        cursor.state.pop_arguments(operands)?;

        let deopt = self
            .graph
            .add(NodeKind::Deoptimize { cpi }, ValueKind::Void, vec![]);
        self.append(cursor, deopt);
        self.graph.set_state_after(deopt, state_before);
        if let Some(default) = Constant::default_for(result) {
            self.constant(cursor, default);
        }
        Ok(())
    }

    /// Give a throwing node its exception successor
    pub(super) fn exception_edge(
        &mut self,
        cursor: &BuilderCursor,
        node: NodeId,
    ) -> Result<(), Bailout> {
        if !self.has_exception_edges {
            return Ok(());
        }
        let exception = self
            .graph
            .add(NodeKind::ExceptionObject, ValueKind::Object, vec![]);
        self.graph.set_bci(exception, cursor.bci);
        self.graph.set_successor(node, 1, exception);

        let mut state = cursor.state.duplicate(cursor.bci);
        state.clear_stack();
        state.push(ValueKind::Object, exception);
        self.attach_state(exception, &state, cursor.bci);
        self.dispatch_exception(exception, 0, exception, state, cursor.bci)
    }

    /// Route an exception thrown at `bci` to the handlers covering it, in exception table order,
    /// and out of the method if none of them catch it
    ///
    /// `state` holds only the exception on its stack.
    pub(super) fn dispatch_exception(
        &mut self,
        from: NodeId,
        index: usize,
        exception: NodeId,
        state: FrameState,
        bci: u32,
    ) -> Result<(), Bailout> {
        let method = self.method;
        let mut from = (from, index);

        for handler in method.exception_handlers.iter().filter(|h| h.covers(bci)) {
            let handler_block = self.blocks.block_starting_at(handler.handler_bci).ok_or(
                Bailout::Malformed(Error::InvalidJumpTarget {
                    offset: bci,
                    target: handler.handler_bci as i64,
                }),
            )?;
            let cpi = match handler.catch_type {
                None => return self.jump_to(from.0, from.1, handler_block, state),
                Some(cpi) => cpi,
            };
            let catch_type = self
                .pool
                .class(cpi)
                .ok_or(Bailout::InvalidConstant { bci, cpi })?;

            if let Resolution::Unresolved = self.pool.resolve_type(cpi) {
                log::debug!("catch type {} at bci {} is unresolved", catch_type, bci);
                let deopt = self
                    .graph
                    .add(NodeKind::Deoptimize { cpi }, ValueKind::Void, vec![]);
                self.graph.set_bci(deopt, bci);
                self.graph.set_successor(from.0, from.1, deopt);
                self.attach_state(deopt, &state, bci);
                return Ok(());
            }

            let dispatch = self.graph.add(
                NodeKind::ExceptionDispatch { catch_type },
                ValueKind::Void,
                vec![exception],
            );
            self.graph.set_bci(dispatch, bci);
            self.graph.set_successor(from.0, from.1, dispatch);
            self.jump_to(dispatch, 0, handler_block, state.duplicate(handler.handler_bci))?;
            from = (dispatch, 1);
        }

        let exit = if method.is_synchronized() {
            SYNC_UNLOCK_BLOCK
        } else {
            UNWIND_BLOCK
        };
        self.jump_to(from.0, from.1, exit, state)
    }

    /// Close every loop reached while parsing, in block order
    fn finalize_loops(&mut self) -> Result<(), Bailout> {
        for slot in 0..self.loops.len() {
            let info = match self.loops[slot].take() {
                Some(info) => info,
                None => continue,
            };
            match info.end_state {
                None => {
                    log::debug!("loop at {} has no back edge: becomes a merge", info.begin);
                    self.graph[info.begin].kind = NodeKind::Merge;
                    self.graph.delete(info.end);
                }
                Some(end_state) => {
                    self.graph.set_successor(info.end, 0, info.begin);
                    if let Some(header_state) = &self.entry_states[slot] {
                        header_state.close_loop(&mut self.graph, info.begin, &end_state)?;
                    }
                    log::debug!("closed loop {} -> {}", info.end, info.begin);
                }
            }

            // Phis whose back edge value turned out to be the entry value are redundant
            loop {
                let mut changed = false;
                for phi in self.graph.phis(info.begin) {
                    if self.graph.is_live(phi) && self.graph.simplify_phi(phi) {
                        changed = true;
                    }
                }
                if !changed {
                    break;
                }
            }
        }
        Ok(())
    }

    /// Remove placeholders and unobserved frame states, then dead code
    fn cleanup(&mut self) {
        let placeholders = self
            .graph
            .filter(|node| node.kind == NodeKind::Placeholder && node.predecessors.len() == 1);
        for placeholder in placeholders {
            if self.graph.can_splice_out(placeholder) {
                self.graph.splice_out(placeholder);
            } else {
                self.graph[placeholder].kind = NodeKind::End;
            }
        }

        let orphan_states = self.graph.filter(|node| {
            matches!(node.kind, NodeKind::FrameState { .. }) && node.usages.is_empty()
        });
        for state in orphan_states {
            self.graph.delete(state);
        }

        if self.settings.eliminate_dead_code {
            let stats = eliminate_dead_code(&mut self.graph);
            log::debug!("dead code elimination: {:?}", stats);
        }
    }
}

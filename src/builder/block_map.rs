use super::Bailout;
use crate::jvm::{BranchInstruction, BytecodeStream, Decoded, Error, MethodInfo};

/// Synthetic block which all returns jump to
pub const RETURN_BLOCK: u32 = u32::MAX - 2;

/// Synthetic block releasing the lock of a synchronized method before unwinding
pub const SYNC_UNLOCK_BLOCK: u32 = u32::MAX - 1;

/// Synthetic block for exceptions leaving the method
pub const UNWIND_BLOCK: u32 = u32::MAX;

/// Basic block of bytecode
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Block {
    /// Position in reverse postorder (blocks unreachable from the entry come last)
    pub id: u32,
    pub start_bci: u32,

    /// Offset right after the last instruction of the block
    pub end_bci: u32,

    /// Target of a back edge
    pub is_loop_header: bool,

    /// Start of an exception handler
    pub is_exception_entry: bool,

    /// Index in the exception table of the first handler starting here
    pub handler: Option<usize>,

    /// Normal successors first, then the entries of handlers covering the block
    pub successors: Vec<u32>,
}

/// Partition of a method's bytecode into basic blocks
///
/// Blocks start at the method entry, at jump targets, after branches, at handler entries, and
/// at the boundaries of protected ranges (so each block is either fully inside or fully outside
/// of every protected range).
///
/// Ids come from a depth-first search which explores successors in descending bytecode order.
/// This makes reverse postorder follow the bytecode order whenever the control flow allows it,
/// and it guarantees that every predecessor of a block has a lower id unless the edge is a back
/// edge.
#[derive(Debug)]
pub struct BlockMap {
    /// Blocks, indexed by id
    blocks: Vec<Block>,

    /// Id of the block starting at each offset
    block_at: Vec<Option<u32>>,
    reachable: usize,
}

/// How the last instruction of a block hands over control
enum BlockEnd {
    Branch(BranchInstruction),
    FallThrough,
}

impl BlockMap {
    pub fn new(method: &MethodInfo) -> Result<BlockMap, Bailout> {
        let code = &method.code;
        if code.is_empty() {
            return Err(Bailout::NoCode);
        }
        let code_len = code.len() as u32;

        let mut is_instruction_start = vec![false; code.len()];
        let mut is_leader = vec![false; code.len()];
        let mut jumps: Vec<(u32, u32)> = vec![];
        let mut ends: Vec<(u32, BlockEnd)> = vec![];
        is_leader[0] = true;

        for handler in &method.exception_handlers {
            let bad_range = handler.start_bci >= handler.end_bci
                || handler.end_bci > code_len
                || handler.handler_bci >= code_len;
            if bad_range {
                return Err(Error::InvalidJumpTarget {
                    offset: handler.start_bci,
                    target: handler.handler_bci as i64,
                }
                .into());
            }
            jumps.push((handler.start_bci, handler.handler_bci));
            jumps.push((handler.start_bci, handler.start_bci));
            is_leader[handler.handler_bci as usize] = true;
            is_leader[handler.start_bci as usize] = true;
            if handler.end_bci < code_len {
                jumps.push((handler.start_bci, handler.end_bci));
                is_leader[handler.end_bci as usize] = true;
            }
        }

        // Linear scan for instruction starts and block leaders
        let mut stream = BytecodeStream::new(code);
        while !stream.is_at_end() {
            let (bci, decoded) = stream.next_instruction()?;
            is_instruction_start[bci as usize] = true;
            let next_bci = stream.current_bci();
            match decoded {
                Decoded::Subroutine => return Err(Bailout::Subroutine { bci }),
                Decoded::Branch(branch) => {
                    for target in branch.jump_targets() {
                        jumps.push((bci, target));
                        is_leader[target as usize] = true;
                    }
                    if next_bci < code_len {
                        is_leader[next_bci as usize] = true;
                    }
                    ends.push((next_bci, BlockEnd::Branch(branch)));
                }
                Decoded::Instruction(_) => ends.push((next_bci, BlockEnd::FallThrough)),
            }
        }
        for (offset, target) in jumps {
            if !is_instruction_start[target as usize] {
                let target = target as i64;
                return Err(Error::InvalidJumpTarget { offset, target }.into());
            }
        }

        // Blocks in bytecode order, before numbering
        let starts: Vec<u32> = (0..code_len).filter(|bci| is_leader[*bci as usize]).collect();
        let mut order_at = vec![None; code.len()];
        for (order, start) in starts.iter().enumerate() {
            order_at[*start as usize] = Some(order);
        }
        let lookup = |bci: u32| order_at[bci as usize];

        let mut ends = ends.into_iter().peekable();
        let mut successors: Vec<Vec<usize>> = Vec::with_capacity(starts.len());
        for (order, start) in starts.iter().enumerate() {
            let end = starts.get(order + 1).copied().unwrap_or(code_len);
            let mut block_end = None;
            while let Some((next_bci, _)) = ends.peek() {
                if *next_bci > end {
                    break;
                }
                block_end = ends.next();
            }

            let mut succs = vec![];
            match block_end {
                Some((_, BlockEnd::Branch(branch))) => {
                    succs.extend(branch.jump_targets().into_iter().filter_map(lookup));
                    if branch.falls_through() {
                        succs.extend(lookup(end));
                    }
                }
                _ if end < code_len => succs.extend(lookup(end)),
                _ => {
                    let target = end as i64;
                    return Err(Error::InvalidJumpTarget {
                        offset: *start,
                        target,
                    }
                    .into());
                }
            }
            for handler in &method.exception_handlers {
                if handler.overlaps(*start, end) {
                    succs.extend(lookup(handler.handler_bci));
                }
            }
            successors.push(succs);
        }

        // Depth-first search for back edges and the reverse postorder
        const WHITE: u8 = 0;
        const GREY: u8 = 1;
        const BLACK: u8 = 2;
        let mut color = vec![WHITE; starts.len()];
        let mut is_loop_header = vec![false; starts.len()];
        let mut postorder = vec![];
        let mut dfs_stack: Vec<(usize, Vec<usize>)> = vec![];

        let children = |order: usize| -> Vec<usize> {
            let mut children = successors[order].clone();
            children.sort_unstable_by(|a, b| b.cmp(a));
            children.dedup();
            children
        };
        color[0] = GREY;
        dfs_stack.push((0, children(0)));
        while let Some((order, pending)) = dfs_stack.last_mut() {
            match pending.first().copied() {
                Some(child) => {
                    pending.remove(0);
                    match color[child] {
                        WHITE => {
                            color[child] = GREY;
                            dfs_stack.push((child, children(child)));
                        }
                        GREY => is_loop_header[child] = true,
                        _ => (),
                    }
                }
                None => {
                    color[*order] = BLACK;
                    postorder.push(*order);
                    dfs_stack.pop();
                }
            }
        }

        let reachable = postorder.len();
        let mut numbering: Vec<usize> = postorder.into_iter().rev().collect();
        numbering.extend((0..starts.len()).filter(|order| color[*order] == WHITE));
        let mut id_of = vec![0u32; starts.len()];
        for (id, order) in numbering.iter().enumerate() {
            id_of[*order] = id as u32;
        }

        let mut block_at = vec![None; code.len()];
        let blocks = numbering
            .iter()
            .map(|order| {
                let start_bci = starts[*order];
                let end_bci = starts.get(order + 1).copied().unwrap_or(code_len);
                block_at[start_bci as usize] = Some(id_of[*order]);
                let handler = method
                    .exception_handlers
                    .iter()
                    .position(|handler| handler.handler_bci == start_bci);
                Block {
                    id: id_of[*order],
                    start_bci,
                    end_bci,
                    is_loop_header: is_loop_header[*order],
                    is_exception_entry: handler.is_some(),
                    handler,
                    successors: successors[*order].iter().map(|s| id_of[*s]).collect(),
                }
            })
            .collect();

        let block_map = BlockMap {
            blocks,
            block_at,
            reachable,
        };
        log::debug!(
            "{}.{}: {} blocks ({} reachable)",
            method.holder,
            method.name,
            block_map.blocks.len(),
            reachable
        );
        Ok(block_map)
    }

    /// Blocks in id order
    pub fn blocks(&self) -> &[Block] {
        &self.blocks
    }

    pub fn block(&self, id: u32) -> &Block {
        &self.blocks[id as usize]
    }

    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    /// Number of blocks reachable from the entry (these have the lowest ids)
    pub fn reachable_count(&self) -> usize {
        self.reachable
    }

    pub fn block_starting_at(&self, bci: u32) -> Option<u32> {
        self.block_at.get(bci as usize).copied().flatten()
    }

    pub fn block_containing(&self, bci: u32) -> Option<u32> {
        if bci as usize >= self.block_at.len() {
            return None;
        }
        (0..=bci).rev().find_map(|start| self.block_starting_at(start))
    }
}

use crate::jvm::{BaseType, CompareMode, EqComparison, FieldType, OrdComparison, ShiftType};
use crate::util::Width;
use std::fmt;

/// Index of a node in its graph
///
/// Ids are never reused within a graph: a deleted node leaves a free slot behind.
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NodeId(pub u32);

impl NodeId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Debug for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "n{}", self.0)
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "n{}", self.0)
    }
}

/// Offset given to frame states in the return, unlock and unwind paths, which don't belong to
/// any instruction
pub const EXIT_BCI: u32 = u32::MAX;

/// Kind of value a node produces, as seen by the operand stack
///
/// `boolean`, `byte`, `char`, and `short` are all `Int` here.
#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug)]
pub enum ValueKind {
    Int,
    Long,
    Float,
    Double,
    Object,

    /// Nodes which produce no value (most control nodes)
    Void,
}

impl ValueKind {
    pub fn from_base_type(base_type: BaseType) -> ValueKind {
        match base_type {
            BaseType::Long => ValueKind::Long,
            BaseType::Float => ValueKind::Float,
            BaseType::Double => ValueKind::Double,
            _ => ValueKind::Int,
        }
    }

    pub fn from_field_type(field_type: &FieldType) -> ValueKind {
        match field_type {
            FieldType::Base(base_type) => ValueKind::from_base_type(*base_type),
            _ => ValueKind::Object,
        }
    }

    /// Kind of a method's result (`void` for no result)
    pub fn from_return_type(return_type: Option<&FieldType>) -> ValueKind {
        return_type.map_or(ValueKind::Void, ValueKind::from_field_type)
    }
}

impl Width for ValueKind {
    fn width(&self) -> usize {
        match self {
            ValueKind::Long | ValueKind::Double => 2,
            ValueKind::Void => 0,
            _ => 1,
        }
    }
}

/// Constant value
///
/// Floating point values are kept as bits, so that `-0.0` and `0.0` are distinct constants and
/// `NaN` is equal to itself.
#[derive(Clone, PartialEq, Eq, Hash, Debug)]
pub enum Constant {
    Int(i32),
    Long(i64),
    Float(u32),
    Double(u64),
    Null,
    String(String),
    Class(String),
}

impl Constant {
    pub fn float(value: f32) -> Constant {
        Constant::Float(value.to_bits())
    }

    pub fn double(value: f64) -> Constant {
        Constant::Double(value.to_bits())
    }

    /// Zero value of a kind, used in place of values that can't be computed
    pub fn default_for(kind: ValueKind) -> Option<Constant> {
        match kind {
            ValueKind::Int => Some(Constant::Int(0)),
            ValueKind::Long => Some(Constant::Long(0)),
            ValueKind::Float => Some(Constant::float(0.0)),
            ValueKind::Double => Some(Constant::double(0.0)),
            ValueKind::Object => Some(Constant::Null),
            ValueKind::Void => None,
        }
    }

    pub fn kind(&self) -> ValueKind {
        match self {
            Constant::Int(_) => ValueKind::Int,
            Constant::Long(_) => ValueKind::Long,
            Constant::Float(_) => ValueKind::Float,
            Constant::Double(_) => ValueKind::Double,
            Constant::Null | Constant::String(_) | Constant::Class(_) => ValueKind::Object,
        }
    }
}

impl fmt::Display for Constant {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Constant::Int(i) => write!(f, "{}", i),
            Constant::Long(l) => write!(f, "{}L", l),
            Constant::Float(bits) => write!(f, "{:?}f", f32::from_bits(*bits)),
            Constant::Double(bits) => write!(f, "{:?}d", f64::from_bits(*bits)),
            Constant::Null => write!(f, "null"),
            Constant::String(s) => write!(f, "{:?}", s),
            Constant::Class(c) => write!(f, "{}.class", c),
        }
    }
}

#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug)]
pub enum ArithOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    And,
    Or,
    Xor,
}

#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug)]
pub enum ConvertOp {
    I2L,
    I2F,
    I2D,
    L2I,
    L2F,
    L2D,
    F2I,
    F2L,
    F2D,
    D2I,
    D2L,
    D2F,
    I2B,
    I2C,
    I2S,
}

/// Condition tested by an `If` node on its two inputs
#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug)]
pub enum Condition {
    Int(OrdComparison),
    Reference(EqComparison),
}

/// How an `Invoke` node dispatches
#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug)]
pub enum InvokeKind {
    Static,

    /// Direct call: `invokespecial`, or a virtual call that got devirtualized
    Special,
    Virtual,
    Interface,
    Dynamic,
}

/// Element type of an array access
#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug)]
pub enum ElementType {
    Base(BaseType),
    Reference,
}

impl ElementType {
    pub fn value_kind(self) -> ValueKind {
        match self {
            ElementType::Base(base_type) => ValueKind::from_base_type(base_type),
            ElementType::Reference => ValueKind::Object,
        }
    }
}

/// Every type of node that can appear in a graph
///
/// Control nodes are connected to each other with successor edges and form the control flow
/// graph. Floating nodes only have data inputs and are placed wherever their usages need them.
/// Unless otherwise noted, control nodes have a single successor (the next node).
///
/// Inputs, where present, are listed in order in the variant docs.
#[derive(Clone, PartialEq, Eq, Hash, Debug)]
pub enum NodeKind {
    /// Unique entry of a graph
    Start,

    /// Provisional entry of a block with only one predecessor so far
    Placeholder,

    /// Join of several control flow paths
    Merge,

    /// Forward edge into a merge, for a branch with several edges into that merge. Each edge
    /// then enters the merge from a different predecessor.
    End,

    /// Loop header: forward predecessors first, then the `LoopEnd`
    LoopBegin,

    /// Join of all the back edges of a loop. Input: the `LoopBegin`. Successor: the `LoopBegin`.
    LoopEnd,

    /// Two-way branch. Inputs: the two compared values. Successors: jump target, then fallthrough.
    If(Condition),

    /// Multi-way branch. Input: the key. Successors: one per key, then the default.
    Switch(Vec<i32>),

    /// Method exit. Input: the returned value, if any. No successors.
    Return,

    /// Exit by throwing. Input: the exception. No successors.
    Unwind,

    /// Transfer to the interpreter, for a constant pool entry which didn't resolve
    Deoptimize { cpi: u16 },

    /// Exception caught by the exception edge of the preceding node
    ExceptionObject,

    /// Input: the exception. Successors: the handler (exception is an instance of `catch_type`),
    /// then the next dispatch.
    ExceptionDispatch { catch_type: String },

    /// Inputs: the arguments, receiver first. Successors: next, then the exception edge.
    Invoke { kind: InvokeKind, method: String },

    /// Input: the object, unless static
    LoadField { field: String, is_static: bool },

    /// Inputs: the object (unless static) and the value
    StoreField { field: String, is_static: bool },

    /// Inputs: array, index
    LoadIndexed(ElementType),

    /// Inputs: array, index, value
    StoreIndexed(ElementType),
    ArrayLength,
    NewInstance { class: String },

    /// Input: length
    NewArray(BaseType),

    /// Input: length
    NewObjectArray { class: String },

    /// Inputs: one length per dimension
    NewMultiArray { class: String },
    CheckCast { class: String },
    MonitorEnter,
    MonitorExit,

    /// `idiv`, `irem`, `ldiv`, `lrem` (these throw on a zero divisor)
    IntegerDivRem(ArithOp),

    Constant(Constant),

    /// Argument passed to the method, by local variable slot
    Parameter(u16),

    /// Inputs: the two operands
    Arithmetic(ArithOp),
    Negate,

    /// Inputs: value, shift distance
    Shift(ShiftType),
    Convert(ConvertOp),

    /// `lcmp` (no mode), or the floating point comparisons
    Compare(Option<CompareMode>),
    InstanceOf { class: String },

    /// Inputs: the merge node, then one value per predecessor of the merge
    Phi,

    /// Snapshot of the interpreter frame. Inputs: present locals, present stack slots, locks.
    FrameState {
        bci: u32,

        /// One entry per local variable slot then stack slot, saying if it holds a value
        present: Vec<bool>,
        locals: u16,
        locks: u16,
    },
}

impl NodeKind {
    /// Is this a control node (taking part in the control flow graph)?
    pub fn is_control(&self) -> bool {
        !matches!(
            self,
            NodeKind::Constant(_)
                | NodeKind::Parameter(_)
                | NodeKind::Arithmetic(_)
                | NodeKind::Negate
                | NodeKind::Shift(_)
                | NodeKind::Convert(_)
                | NodeKind::Compare(_)
                | NodeKind::InstanceOf { .. }
                | NodeKind::Phi
                | NodeKind::FrameState { .. }
        )
    }

    /// Can the node have several predecessors (and so own phis)?
    pub fn is_merge(&self) -> bool {
        matches!(
            self,
            NodeKind::Merge | NodeKind::LoopBegin | NodeKind::LoopEnd
        )
    }

    /// Does the node have effects an interpreter resuming after it must not repeat? These are
    /// the nodes that get a frame state.
    pub fn has_side_effect(&self) -> bool {
        matches!(
            self,
            NodeKind::Start
                | NodeKind::Deoptimize { .. }
                | NodeKind::ExceptionObject
                | NodeKind::Invoke { .. }
                | NodeKind::StoreField { .. }
                | NodeKind::StoreIndexed(_)
                | NodeKind::NewInstance { .. }
                | NodeKind::NewArray(_)
                | NodeKind::NewObjectArray { .. }
                | NodeKind::NewMultiArray { .. }
                | NodeKind::MonitorEnter
                | NodeKind::MonitorExit
        )
    }
}

/// Node in a graph, along with its edges
#[derive(Clone, Debug)]
pub struct Node {
    pub kind: NodeKind,
    pub value_kind: ValueKind,

    /// Data inputs
    pub inputs: Vec<NodeId>,

    /// Control successors. Slots are `None` until the successor gets attached.
    pub successors: Vec<Option<NodeId>>,

    /// Control predecessors, in arrival order
    pub predecessors: Vec<NodeId>,

    /// Nodes using this one as an input or as their `state_after` (once per use)
    pub usages: Vec<NodeId>,

    /// Frame state right after this node executes
    pub state_after: Option<NodeId>,

    /// Bytecode offset the node was built from
    pub bci: Option<u32>,
}

impl Node {
    pub fn new(kind: NodeKind, value_kind: ValueKind, inputs: Vec<NodeId>) -> Node {
        Node {
            kind,
            value_kind,
            inputs,
            successors: vec![],
            predecessors: vec![],
            usages: vec![],
            state_after: None,
            bci: None,
        }
    }

    pub fn successor(&self, index: usize) -> Option<NodeId> {
        self.successors.get(index).copied().flatten()
    }

    pub fn is_phi_of(&self, merge: NodeId) -> bool {
        self.kind == NodeKind::Phi && self.inputs.first() == Some(&merge)
    }
}

impl fmt::Display for NodeKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            NodeKind::Constant(constant) => write!(f, "Constant({})", constant),
            NodeKind::Parameter(slot) => write!(f, "Parameter({})", slot),
            NodeKind::Switch(keys) => write!(f, "Switch{:?}", keys),
            NodeKind::FrameState {
                bci,
                present,
                locals,
                locks,
            } => {
                let stack = present.len() - *locals as usize;
                if *bci == EXIT_BCI {
                    f.write_str("FrameState(bci=exit")?;
                } else {
                    write!(f, "FrameState(bci={}", bci)?;
                }
                write!(f, ", locals={}, stack={}, locks={})", locals, stack, locks)
            }
            other => write!(f, "{:?}", other),
        }
    }
}

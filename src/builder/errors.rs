use crate::ir::ValueKind;
use crate::jvm;
use std::fmt;

/// Invalid operation on a frame state
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FrameStateError {
    EmptyStack,

    /// Popped a value of the wrong kind (`None` is the second slot of a `long` or `double`)
    InvalidKind {
        expected: ValueKind,
        found: Option<ValueKind>,
    },
    InvalidWidth(usize),

    /// Local variable that is out of range or holds no value of the expected kind
    InvalidLocal(u16),
    NoLockHeld,
}

/// Reason the graph for a method could not be built
///
/// A bailout aborts the whole compilation attempt: no graph is produced.
#[derive(Debug)]
pub enum Bailout {
    /// Bytecode could not be decoded
    Malformed(jvm::Error),

    /// Opcode the builder does not handle (reserved opcodes, `breakpoint`)
    UnsupportedOpcode { bci: u32, opcode: u8 },

    /// `jsr`, `jsr_w`, or `ret`
    Subroutine { bci: u32 },

    /// Method has no bytecode (abstract or native)
    NoCode,

    /// Two paths reaching the same block disagree on stack shape or held locks
    IncompatibleFrames { bci: u32, reason: String },

    /// The graph grew past `Settings::max_graph_nodes`
    NodeBudgetExceeded { limit: usize },

    /// A block not known to be a loop header was reached again after being parsed
    NonLoopRevisit { bci: u32 },

    /// Reference which must resolve for the code to make sense (eg. the class of a `new`)
    UnresolvedMandatory { bci: u32, cpi: u16 },

    /// Constant pool index with no entry of the expected sort
    InvalidConstant { bci: u32, cpi: u16 },

    /// Operation on the frame state that verified code would never do
    InvalidFrame {
        bci: Option<u32>,
        kind: FrameStateError,
    },
}

impl Bailout {
    /// Attach a bytecode offset to errors that are missing one
    pub fn at(self, bci: u32) -> Bailout {
        match self {
            Bailout::InvalidFrame { bci: None, kind } => Bailout::InvalidFrame {
                bci: Some(bci),
                kind,
            },
            other => other,
        }
    }
}

impl From<jvm::Error> for Bailout {
    fn from(err: jvm::Error) -> Bailout {
        match err {
            jvm::Error::InvalidOpcode { offset, opcode } => Bailout::UnsupportedOpcode {
                bci: offset,
                opcode,
            },
            err => Bailout::Malformed(err),
        }
    }
}

impl From<FrameStateError> for Bailout {
    fn from(kind: FrameStateError) -> Bailout {
        Bailout::InvalidFrame { bci: None, kind }
    }
}

impl fmt::Display for Bailout {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Bailout::Malformed(err) => write!(f, "malformed bytecode: {}", err),
            Bailout::UnsupportedOpcode { bci, opcode } => {
                write!(f, "unsupported opcode 0x{:02x} at bci {}", opcode, bci)
            }
            Bailout::Subroutine { bci } => {
                write!(f, "subroutine instruction at bci {} is not supported", bci)
            }
            Bailout::NoCode => write!(f, "method has no code"),
            Bailout::IncompatibleFrames { bci, reason } => {
                write!(f, "incompatible frame states at bci {}: {}", bci, reason)
            }
            Bailout::NodeBudgetExceeded { limit } => {
                write!(f, "graph exceeds the limit of {} nodes", limit)
            }
            Bailout::NonLoopRevisit { bci } => {
                write!(f, "block at bci {} reached after it was parsed", bci)
            }
            Bailout::UnresolvedMandatory { bci, cpi } => {
                write!(f, "constant {} at bci {} must resolve", cpi, bci)
            }
            Bailout::InvalidConstant { bci, cpi } => {
                write!(f, "invalid constant pool index {} at bci {}", cpi, bci)
            }
            Bailout::InvalidFrame { bci: Some(bci), kind } => {
                write!(f, "invalid frame operation at bci {}: {:?}", bci, kind)
            }
            Bailout::InvalidFrame { bci: None, kind } => {
                write!(f, "invalid frame operation: {:?}", kind)
            }
        }
    }
}

impl std::error::Error for Bailout {}

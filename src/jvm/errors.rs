/// Problems found while decoding method bytecode
///
/// These all indicate malformed input: verified class files never trigger them.
#[derive(Debug)]
pub enum Error {
    /// Truncated operand or other read failure
    IoError(std::io::Error),

    /// Opcode that is not defined by the JVM specification
    InvalidOpcode { offset: u32, opcode: u8 },

    /// `wide` prefix in front of an instruction that can't be widened
    InvalidWide { offset: u32, opcode: u8 },

    /// Jump whose target is outside the method or in the middle of an instruction
    InvalidJumpTarget { offset: u32, target: i64 },

    /// Inverted bounds in a `tableswitch` or a negative pair count in a `lookupswitch`
    InvalidSwitch(u32),

    /// Bad method, field, or class descriptor
    BadDescriptor(String),
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Error {
        Error::IoError(err)
    }
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::IoError(err) => write!(f, "truncated bytecode: {}", err),
            Error::InvalidOpcode { offset, opcode } => {
                write!(f, "invalid opcode 0x{:02x} at {}", opcode, offset)
            }
            Error::InvalidWide { offset, opcode } => {
                write!(f, "opcode 0x{:02x} at {} cannot be widened", opcode, offset)
            }
            Error::InvalidJumpTarget { offset, target } => {
                write!(f, "jump at {} to invalid target {}", offset, target)
            }
            Error::InvalidSwitch(offset) => write!(f, "malformed switch table at {}", offset),
            Error::BadDescriptor(desc) => write!(f, "bad descriptor '{}'", desc),
        }
    }
}

impl std::error::Error for Error {}

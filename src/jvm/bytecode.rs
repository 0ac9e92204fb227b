//! This module contains a decoded view of JVM bytecode. The representation is slightly different
//! from the raw encoding to make it more convenient to interpret. For instance:
//!
//!   - The "wide" instruction doesn't show up at all, but instead gets merged into the
//!     instructions it is allowed to modify
//!
//!   - Some instructions (like the branches) get abstracted into one instruction with a field.
//!     This helps with repetitive pattern matches.
//!
//!   - Jump targets are resolved to absolute bytecode offsets
//!
//!   - Subroutine instructions (`jsr`, `jsr_w`, `ret`) are recognized but not represented, since
//!     nothing downstream can handle them
//!

use super::{BaseType, Deserialize, Error};
use std::io::Cursor;
use std::ops::Not;

/// Non-branching JVM bytecode instruction
#[derive(Clone, Debug, PartialEq)]
pub enum Instruction {
    Nop,
    AConstNull,
    IConstM1,
    IConst0,
    IConst1,
    IConst2,
    IConst3,
    IConst4,
    IConst5,
    LConst0,
    LConst1,
    FConst0,
    FConst1,
    FConst2,
    DConst0,
    DConst1,
    BiPush(i8),
    SiPush(i16),
    Ldc(u16), // covers both `ldc` and `ldc_w`
    Ldc2(u16),
    ILoad(u16), // covers `iload`, `iload{0,3}`, and `wide iload`
    LLoad(u16),
    FLoad(u16),
    DLoad(u16),
    ALoad(u16),
    IALoad,
    LALoad,
    FALoad,
    DALoad,
    AALoad,
    BALoad,
    CALoad,
    SALoad,
    IStore(u16), // covers `istore`, `istore{0,3}`, and `wide istore`
    LStore(u16),
    FStore(u16),
    DStore(u16),
    AStore(u16),
    IAStore,
    LAStore,
    FAStore,
    DAStore,
    AAStore,
    BAStore,
    CAStore,
    SAStore,
    Pop,
    Pop2,
    Dup,
    DupX1,
    DupX2,
    Dup2,
    Dup2X1,
    Dup2X2,
    Swap,
    IAdd,
    LAdd,
    FAdd,
    DAdd,
    ISub,
    LSub,
    FSub,
    DSub,
    IMul,
    LMul,
    FMul,
    DMul,
    IDiv,
    LDiv,
    FDiv,
    DDiv,
    IRem,
    LRem,
    FRem,
    DRem,
    INeg,
    LNeg,
    FNeg,
    DNeg,
    ISh(ShiftType), // covers `ishr`, `ishl`, and `iushr`
    LSh(ShiftType), // covers `lshr`, `lshl`, and `lushr`
    IAnd,
    LAnd,
    IOr,
    LOr,
    IXor,
    LXor,
    IInc(u16, i16), // covers `iinc` and `wide iinc`
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
    LCmp,
    FCmp(CompareMode), // covers `fcmpl` and `fcmpg`
    DCmp(CompareMode), // covers `dcmpl` and `dcmpg`
    GetStatic(u16),
    PutStatic(u16),
    GetField(u16),
    PutField(u16),
    Invoke(InvokeType, u16),
    InvokeDynamic(u16),
    New(u16),
    NewArray(BaseType),
    ANewArray(u16),
    ArrayLength,
    CheckCast(u16),
    InstanceOf(u16),
    MonitorEnter,
    MonitorExit,
    MultiANewArray(u16, u8),
}

/// Branching JVM bytecode instruction
///
/// These are the instructions that end a basic block. Targets are absolute bytecode offsets.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum BranchInstruction {
    If(OrdComparison, u32), // covers `ifeq`, `ifne`, `iflt`, `ifge`, `ifgt`, `ifle`
    IfICmp(OrdComparison, u32), // covers `if_icmpeq`, `if_icmpne`, `if_icmplt`, ... `if_icmple`
    IfACmp(EqComparison, u32),  // covers `if_acmpeq`, `if_acmpne`
    IfNull(EqComparison, u32),  // covers `ifnull`, `ifnonnull`
    Goto(u32),                  // covers `goto` and `goto_w`
    TableSwitch {
        /// Jump target if the argument is less than `low` or greater than
        /// `low + targets.len()`
        default: u32,

        /// Value associated with the first jump target
        low: i32,

        /// Jump targets
        targets: Vec<u32>,
    },
    LookupSwitch {
        /// Jump target if there is no corresponding key
        default: u32,

        /// Jump targets, in the order they appear in the bytecode
        targets: Vec<(i32, u32)>,
    },
    IReturn,
    LReturn,
    FReturn,
    DReturn,
    AReturn,
    Return,
    AThrow,
}

impl BranchInstruction {
    /// Can execution continue at the next instruction?
    pub fn falls_through(&self) -> bool {
        matches!(
            self,
            BranchInstruction::If(..)
                | BranchInstruction::IfICmp(..)
                | BranchInstruction::IfACmp(..)
                | BranchInstruction::IfNull(..)
        )
    }

    /// Explicit jump targets (not including the fallthrough)
    pub fn jump_targets(&self) -> Vec<u32> {
        match self {
            BranchInstruction::If(_, target)
            | BranchInstruction::IfICmp(_, target)
            | BranchInstruction::IfACmp(_, target)
            | BranchInstruction::IfNull(_, target)
            | BranchInstruction::Goto(target) => vec![*target],
            BranchInstruction::TableSwitch {
                default, targets, ..
            } => {
                let mut all = targets.clone();
                all.push(*default);
                all
            }
            BranchInstruction::LookupSwitch { default, targets } => {
                let mut all: Vec<u32> = targets.iter().map(|(_, target)| *target).collect();
                all.push(*default);
                all
            }
            BranchInstruction::IReturn
            | BranchInstruction::LReturn
            | BranchInstruction::FReturn
            | BranchInstruction::DReturn
            | BranchInstruction::AReturn
            | BranchInstruction::Return
            | BranchInstruction::AThrow => vec![],
        }
    }
}

/// Result of decoding one instruction
#[derive(Clone, Debug, PartialEq)]
pub enum Decoded {
    Instruction(Instruction),
    Branch(BranchInstruction),

    /// `jsr`, `jsr_w`, or `ret`
    Subroutine,
}

/// Possible bit shifts
#[derive(Copy, Clone, Eq, PartialEq, Debug, Hash)]
pub enum ShiftType {
    Left,
    LogicalRight,
    ArithmeticRight,
}

/// Comparison modes for floating point
#[derive(Copy, Clone, Eq, PartialEq, Debug, Hash)]
pub enum CompareMode {
    /// -1 on NaN
    L,

    /// 1 on NaN
    G,
}

/// Binary comparison operators available for `int` branches
#[derive(Copy, Clone, Eq, PartialEq, Debug, Hash)]
pub enum OrdComparison {
    EQ,
    GE,
    GT,
    LE,
    LT,
    NE,
}

impl Not for OrdComparison {
    type Output = Self;

    fn not(self) -> Self::Output {
        match self {
            OrdComparison::EQ => OrdComparison::NE,
            OrdComparison::GE => OrdComparison::LT,
            OrdComparison::GT => OrdComparison::LE,
            OrdComparison::LE => OrdComparison::GT,
            OrdComparison::LT => OrdComparison::GE,
            OrdComparison::NE => OrdComparison::EQ,
        }
    }
}

/// Equality/inequality comparison operators
#[derive(Copy, Clone, Eq, PartialEq, Debug, Hash)]
pub enum EqComparison {
    EQ,
    NE,
}

impl Not for EqComparison {
    type Output = Self;

    fn not(self) -> Self::Output {
        match self {
            EqComparison::EQ => EqComparison::NE,
            EqComparison::NE => EqComparison::EQ,
        }
    }
}

/// Type of method to invoke
///
/// Note: `invokedynamic` is kept separate because the constant argument it expects is not a
/// method reference.
#[derive(Copy, Clone, Eq, PartialEq, Debug, Hash)]
pub enum InvokeType {
    Virtual,
    Special,
    Static,
    Interface,
}

/// Cursor over the bytecode of one method
///
/// Offsets are `u32` (even though code is limited to 65535 bytes) to match bytecode indices used
/// elsewhere.
pub struct BytecodeStream<'a> {
    cursor: Cursor<&'a [u8]>,
}

impl<'a> BytecodeStream<'a> {
    pub fn new(code: &'a [u8]) -> BytecodeStream<'a> {
        BytecodeStream {
            cursor: Cursor::new(code),
        }
    }

    /// Move the cursor to a specific offset
    pub fn seek(&mut self, offset: u32) {
        self.cursor.set_position(offset as u64);
    }

    /// Offset of the next byte to be read
    pub fn current_bci(&self) -> u32 {
        self.cursor.position() as u32
    }

    pub fn code_len(&self) -> u32 {
        self.cursor.get_ref().len() as u32
    }

    pub fn is_at_end(&self) -> bool {
        self.current_bci() >= self.code_len()
    }

    /// Read an operand
    pub fn read<T: Deserialize>(&mut self) -> Result<T, Error> {
        Ok(T::deserialize(&mut self.cursor)?)
    }

    /// Read a relative branch offset and resolve it against the opcode offset
    fn read_branch_target(&mut self, opcode_offset: u32, wide: bool) -> Result<u32, Error> {
        let relative = if wide {
            self.read::<i32>()? as i64
        } else {
            self.read::<i16>()? as i64
        };
        let target = opcode_offset as i64 + relative;
        if target < 0 || target >= self.code_len() as i64 {
            return Err(Error::InvalidJumpTarget {
                offset: opcode_offset,
                target,
            });
        }
        Ok(target as u32)
    }

    fn read_local_index(&mut self, wide: bool) -> Result<u16, Error> {
        if wide {
            self.read::<u16>()
        } else {
            self.read::<u8>().map(u16::from)
        }
    }

    /// Skip the 0-3 bytes of padding which align a switch table to a multiple of four bytes from
    /// the start of the method
    ///
    /// The padding isn't required to be zero (class files from version 51 on may hold anything
    /// there), so its contents are ignored.
    fn skip_switch_padding(&mut self) -> Result<(), Error> {
        while self.current_bci() % 4 != 0 {
            self.read::<u8>()?;
        }
        Ok(())
    }

    fn read_table_switch(&mut self, opcode_offset: u32) -> Result<BranchInstruction, Error> {
        self.skip_switch_padding()?;
        let default = self.read_branch_target(opcode_offset, true)?;
        let low = self.read::<i32>()?;
        let high = self.read::<i32>()?;
        if high < low {
            return Err(Error::InvalidSwitch(opcode_offset));
        }
        let count = (high as i64 - low as i64 + 1) as usize;
        let mut targets = Vec::with_capacity(count.min(1024));
        for _ in 0..count {
            targets.push(self.read_branch_target(opcode_offset, true)?);
        }
        Ok(BranchInstruction::TableSwitch {
            default,
            low,
            targets,
        })
    }

    fn read_lookup_switch(&mut self, opcode_offset: u32) -> Result<BranchInstruction, Error> {
        self.skip_switch_padding()?;
        let default = self.read_branch_target(opcode_offset, true)?;
        let npairs = self.read::<i32>()?;
        if npairs < 0 {
            return Err(Error::InvalidSwitch(opcode_offset));
        }
        let mut targets = Vec::with_capacity((npairs as usize).min(1024));
        for _ in 0..npairs {
            let key = self.read::<i32>()?;
            targets.push((key, self.read_branch_target(opcode_offset, true)?));
        }
        Ok(BranchInstruction::LookupSwitch { default, targets })
    }

    /// Decode the instruction at the cursor, returning its offset and leaving the cursor at the
    /// following instruction
    pub fn next_instruction(&mut self) -> Result<(u32, Decoded), Error> {
        use BranchInstruction as B;
        use Decoded::{Branch, Instruction as I};
        use Instruction::*;

        let offset = self.current_bci();
        let opcode = self.read::<u8>()?;
        let decoded = match opcode {
            0x00 => I(Nop),
            0x01 => I(AConstNull),
            0x02 => I(IConstM1),
            0x03 => I(IConst0),
            0x04 => I(IConst1),
            0x05 => I(IConst2),
            0x06 => I(IConst3),
            0x07 => I(IConst4),
            0x08 => I(IConst5),
            0x09 => I(LConst0),
            0x0a => I(LConst1),
            0x0b => I(FConst0),
            0x0c => I(FConst1),
            0x0d => I(FConst2),
            0x0e => I(DConst0),
            0x0f => I(DConst1),
            0x10 => I(BiPush(self.read()?)),
            0x11 => I(SiPush(self.read()?)),
            0x12 => I(Ldc(self.read::<u8>()? as u16)),
            0x13 => I(Ldc(self.read()?)),
            0x14 => I(Ldc2(self.read()?)),
            0x15 => I(ILoad(self.read_local_index(false)?)),
            0x16 => I(LLoad(self.read_local_index(false)?)),
            0x17 => I(FLoad(self.read_local_index(false)?)),
            0x18 => I(DLoad(self.read_local_index(false)?)),
            0x19 => I(ALoad(self.read_local_index(false)?)),
            0x1a..=0x1d => I(ILoad((opcode - 0x1a) as u16)),
            0x1e..=0x21 => I(LLoad((opcode - 0x1e) as u16)),
            0x22..=0x25 => I(FLoad((opcode - 0x22) as u16)),
            0x26..=0x29 => I(DLoad((opcode - 0x26) as u16)),
            0x2a..=0x2d => I(ALoad((opcode - 0x2a) as u16)),
            0x2e => I(IALoad),
            0x2f => I(LALoad),
            0x30 => I(FALoad),
            0x31 => I(DALoad),
            0x32 => I(AALoad),
            0x33 => I(BALoad),
            0x34 => I(CALoad),
            0x35 => I(SALoad),
            0x36 => I(IStore(self.read_local_index(false)?)),
            0x37 => I(LStore(self.read_local_index(false)?)),
            0x38 => I(FStore(self.read_local_index(false)?)),
            0x39 => I(DStore(self.read_local_index(false)?)),
            0x3a => I(AStore(self.read_local_index(false)?)),
            0x3b..=0x3e => I(IStore((opcode - 0x3b) as u16)),
            0x3f..=0x42 => I(LStore((opcode - 0x3f) as u16)),
            0x43..=0x46 => I(FStore((opcode - 0x43) as u16)),
            0x47..=0x4a => I(DStore((opcode - 0x47) as u16)),
            0x4b..=0x4e => I(AStore((opcode - 0x4b) as u16)),
            0x4f => I(IAStore),
            0x50 => I(LAStore),
            0x51 => I(FAStore),
            0x52 => I(DAStore),
            0x53 => I(AAStore),
            0x54 => I(BAStore),
            0x55 => I(CAStore),
            0x56 => I(SAStore),
            0x57 => I(Pop),
            0x58 => I(Pop2),
            0x59 => I(Dup),
            0x5a => I(DupX1),
            0x5b => I(DupX2),
            0x5c => I(Dup2),
            0x5d => I(Dup2X1),
            0x5e => I(Dup2X2),
            0x5f => I(Swap),
            0x60 => I(IAdd),
            0x61 => I(LAdd),
            0x62 => I(FAdd),
            0x63 => I(DAdd),
            0x64 => I(ISub),
            0x65 => I(LSub),
            0x66 => I(FSub),
            0x67 => I(DSub),
            0x68 => I(IMul),
            0x69 => I(LMul),
            0x6a => I(FMul),
            0x6b => I(DMul),
            0x6c => I(IDiv),
            0x6d => I(LDiv),
            0x6e => I(FDiv),
            0x6f => I(DDiv),
            0x70 => I(IRem),
            0x71 => I(LRem),
            0x72 => I(FRem),
            0x73 => I(DRem),
            0x74 => I(INeg),
            0x75 => I(LNeg),
            0x76 => I(FNeg),
            0x77 => I(DNeg),
            0x78 => I(ISh(ShiftType::Left)),
            0x79 => I(LSh(ShiftType::Left)),
            0x7a => I(ISh(ShiftType::ArithmeticRight)),
            0x7b => I(LSh(ShiftType::ArithmeticRight)),
            0x7c => I(ISh(ShiftType::LogicalRight)),
            0x7d => I(LSh(ShiftType::LogicalRight)),
            0x7e => I(IAnd),
            0x7f => I(LAnd),
            0x80 => I(IOr),
            0x81 => I(LOr),
            0x82 => I(IXor),
            0x83 => I(LXor),
            0x84 => {
                let index = self.read_local_index(false)?;
                I(IInc(index, self.read::<i8>()? as i16))
            }
            0x85 => I(I2L),
            0x86 => I(I2F),
            0x87 => I(I2D),
            0x88 => I(L2I),
            0x89 => I(L2F),
            0x8a => I(L2D),
            0x8b => I(F2I),
            0x8c => I(F2L),
            0x8d => I(F2D),
            0x8e => I(D2I),
            0x8f => I(D2L),
            0x90 => I(D2F),
            0x91 => I(I2B),
            0x92 => I(I2C),
            0x93 => I(I2S),
            0x94 => I(LCmp),
            0x95 => I(FCmp(CompareMode::L)),
            0x96 => I(FCmp(CompareMode::G)),
            0x97 => I(DCmp(CompareMode::L)),
            0x98 => I(DCmp(CompareMode::G)),
            0x99..=0x9e => {
                let comparison = ORD_COMPARISONS[(opcode - 0x99) as usize];
                Branch(B::If(comparison, self.read_branch_target(offset, false)?))
            }
            0x9f..=0xa4 => {
                let comparison = ORD_COMPARISONS[(opcode - 0x9f) as usize];
                Branch(B::IfICmp(comparison, self.read_branch_target(offset, false)?))
            }
            0xa5 => Branch(B::IfACmp(
                EqComparison::EQ,
                self.read_branch_target(offset, false)?,
            )),
            0xa6 => Branch(B::IfACmp(
                EqComparison::NE,
                self.read_branch_target(offset, false)?,
            )),
            0xa7 => Branch(B::Goto(self.read_branch_target(offset, false)?)),
            0xa8 => {
                self.read::<i16>()?;
                Decoded::Subroutine
            }
            0xa9 => {
                self.read::<u8>()?;
                Decoded::Subroutine
            }
            0xaa => Branch(self.read_table_switch(offset)?),
            0xab => Branch(self.read_lookup_switch(offset)?),
            0xac => Branch(B::IReturn),
            0xad => Branch(B::LReturn),
            0xae => Branch(B::FReturn),
            0xaf => Branch(B::DReturn),
            0xb0 => Branch(B::AReturn),
            0xb1 => Branch(B::Return),
            0xb2 => I(GetStatic(self.read()?)),
            0xb3 => I(PutStatic(self.read()?)),
            0xb4 => I(GetField(self.read()?)),
            0xb5 => I(PutField(self.read()?)),
            0xb6 => I(Invoke(InvokeType::Virtual, self.read()?)),
            0xb7 => I(Invoke(InvokeType::Special, self.read()?)),
            0xb8 => I(Invoke(InvokeType::Static, self.read()?)),
            0xb9 => {
                let index = self.read()?;
                let _count = self.read::<u8>()?;
                let _zero = self.read::<u8>()?;
                I(Invoke(InvokeType::Interface, index))
            }
            0xba => {
                let index = self.read()?;
                let _zero = self.read::<u16>()?;
                I(InvokeDynamic(index))
            }
            0xbb => I(New(self.read()?)),
            0xbc => {
                let code = self.read::<u8>()?;
                let base_type = BaseType::from_array_type_code(code)
                    .ok_or(Error::InvalidOpcode { offset, opcode })?;
                I(NewArray(base_type))
            }
            0xbd => I(ANewArray(self.read()?)),
            0xbe => I(ArrayLength),
            0xbf => Branch(B::AThrow),
            0xc0 => I(CheckCast(self.read()?)),
            0xc1 => I(InstanceOf(self.read()?)),
            0xc2 => I(MonitorEnter),
            0xc3 => I(MonitorExit),
            0xc4 => self.read_wide(offset)?,
            0xc5 => {
                let index = self.read()?;
                I(MultiANewArray(index, self.read()?))
            }
            0xc6 => Branch(B::IfNull(
                EqComparison::EQ,
                self.read_branch_target(offset, false)?,
            )),
            0xc7 => Branch(B::IfNull(
                EqComparison::NE,
                self.read_branch_target(offset, false)?,
            )),
            0xc8 => Branch(B::Goto(self.read_branch_target(offset, true)?)),
            0xc9 => {
                self.read::<i32>()?;
                Decoded::Subroutine
            }
            _ => return Err(Error::InvalidOpcode { offset, opcode }),
        };
        Ok((offset, decoded))
    }

    /// Decode the instruction following a `wide` prefix
    fn read_wide(&mut self, offset: u32) -> Result<Decoded, Error> {
        use Instruction::*;

        let opcode = self.read::<u8>()?;
        let insn = match opcode {
            0x15 => ILoad(self.read_local_index(true)?),
            0x16 => LLoad(self.read_local_index(true)?),
            0x17 => FLoad(self.read_local_index(true)?),
            0x18 => DLoad(self.read_local_index(true)?),
            0x19 => ALoad(self.read_local_index(true)?),
            0x36 => IStore(self.read_local_index(true)?),
            0x37 => LStore(self.read_local_index(true)?),
            0x38 => FStore(self.read_local_index(true)?),
            0x39 => DStore(self.read_local_index(true)?),
            0x3a => AStore(self.read_local_index(true)?),
            0x84 => {
                let index = self.read_local_index(true)?;
                IInc(index, self.read::<i16>()?)
            }
            0xa9 => {
                self.read::<u16>()?;
                return Ok(Decoded::Subroutine);
            }
            _ => return Err(Error::InvalidWide { offset, opcode }),
        };
        Ok(Decoded::Instruction(insn))
    }
}

/// Comparisons in the order they appear in the `if<cond>` and `if_icmp<cond>` opcode ranges
const ORD_COMPARISONS: [OrdComparison; 6] = [
    OrdComparison::EQ,
    OrdComparison::NE,
    OrdComparison::LT,
    OrdComparison::GE,
    OrdComparison::GT,
    OrdComparison::LE,
];

//! Instructions.

use super::ValueId;
use alloy_primitives::U256;
use krait_interface::Span;
use smallvec::SmallVec;

/// Operand list; three covers every instruction.
pub type Operands = SmallVec<[ValueId; 3]>;

/// One IR instruction. The instruction's own [`ValueId`](super::ValueId) is
/// its result when [`has_result`](InstKind::has_result) holds.
#[derive(Clone, Debug)]
pub struct Inst {
    pub kind: InstKind,
    pub span: Span,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum InstKind {
    /// Materializes a constant word.
    Const(U256),
    Unary(UnaryOp, ValueId),
    /// `Binary(op, a, b)` computes `a op b`.
    Binary(BinaryOp, ValueId, ValueId),
    /// Loads a word from memory at a byte address.
    MLoad(ValueId),
    /// Stores a word to memory at a byte address.
    MStore { addr: ValueId, value: ValueId },
    /// Loads a storage slot.
    SLoad(ValueId),
    /// Stores a storage slot.
    SStore { slot: ValueId, value: ValueId },
    /// Loads a word of calldata at a byte offset.
    CalldataLoad(ValueId),
    CalldataSize,
    /// Copies `len` bytes of calldata at `src` to memory at `dst`.
    CalldataCopy { dst: ValueId, src: ValueId, len: ValueId },
    CodeSize,
    /// Copies `len` bytes of the executing code at `src` to memory at `dst`.
    CodeCopy { dst: ValueId, src: ValueId, len: ValueId },
    /// Hashes `len` bytes of memory at `addr`.
    Keccak { addr: ValueId, len: ValueId },
    Caller,
}

impl InstKind {
    /// Whether the instruction leaves a result word on the stack.
    pub fn has_result(&self) -> bool {
        !matches!(
            self,
            Self::MStore { .. }
                | Self::SStore { .. }
                | Self::CalldataCopy { .. }
                | Self::CodeCopy { .. }
        )
    }

    /// Operands in stack order: the first operand is consumed from the top
    /// of the stack. Shifts take the shift amount on top, so their operands
    /// appear reversed relative to `Binary(op, a, b) = a op b`.
    pub fn operands(&self) -> Operands {
        match *self {
            Self::Binary(BinaryOp::Shl | BinaryOp::Shr | BinaryOp::Sar, a, b) => {
                SmallVec::from_slice(&[b, a])
            }
            _ => self.operands_inner(),
        }
    }

    fn operands_inner(&self) -> Operands {
        match *self {
            Self::Const(_) | Self::CalldataSize | Self::CodeSize | Self::Caller => {
                SmallVec::new()
            }
            Self::Unary(_, a)
            | Self::MLoad(a)
            | Self::SLoad(a)
            | Self::CalldataLoad(a) => SmallVec::from_slice(&[a]),
            Self::Binary(_, a, b) => SmallVec::from_slice(&[a, b]),
            Self::MStore { addr, value } => SmallVec::from_slice(&[addr, value]),
            Self::SStore { slot, value } => SmallVec::from_slice(&[slot, value]),
            Self::Keccak { addr, len } => SmallVec::from_slice(&[addr, len]),
            Self::CalldataCopy { dst, src, len } | Self::CodeCopy { dst, src, len } => {
                SmallVec::from_slice(&[dst, src, len])
            }
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum UnaryOp {
    IsZero,
    /// Bitwise not.
    Not,
}

/// Word-level binary operators. Arithmetic wraps; overflow checks are
/// explicit compare-and-branch sequences built by lowering.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    SDiv,
    Mod,
    SMod,
    Lt,
    Gt,
    SLt,
    SGt,
    Eq,
    And,
    Or,
    Xor,
    Shl,
    Shr,
    Sar,
}

impl BinaryOp {
    pub const fn is_commutative(self) -> bool {
        matches!(
            self,
            Self::Add | Self::Mul | Self::Eq | Self::And | Self::Or | Self::Xor
        )
    }
}

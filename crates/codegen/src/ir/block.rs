//! Basic blocks and terminators.

use super::{BlockId, ValueId};
use smallvec::SmallVec;

/// A basic block: a straight-line instruction sequence ending in exactly one
/// terminator. No instruction may follow the terminator; the builder
/// enforces this and [`Function::validate`](super::Function::validate)
/// re-checks it on the finished function.
#[derive(Clone, Debug, Default)]
pub struct Block {
    pub insts: Vec<ValueId>,
    pub terminator: Option<Terminator>,
}

impl Block {
    pub fn is_terminated(&self) -> bool {
        self.terminator.is_some()
    }
}

/// Block terminators.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Terminator {
    Jump(BlockId),
    /// Jumps to `then_blk` when `cond` is nonzero, `else_blk` otherwise.
    Branch { cond: ValueId, then_blk: BlockId, else_blk: BlockId },
    /// Returns `len` bytes of memory at `addr` to the caller.
    Return { addr: ValueId, len: ValueId },
    /// Reverts with `len` bytes of memory at `addr`.
    Revert { addr: ValueId, len: ValueId },
    /// Halts with no return data. In a constructor this means "proceed to
    /// the deploy epilogue"; the emitter resolves it.
    Stop,
}

impl Terminator {
    pub fn successors(&self) -> SmallVec<[BlockId; 2]> {
        match *self {
            Self::Jump(target) => SmallVec::from_slice(&[target]),
            Self::Branch { then_blk, else_blk, .. } => {
                SmallVec::from_slice(&[then_blk, else_blk])
            }
            Self::Return { .. } | Self::Revert { .. } | Self::Stop => SmallVec::new(),
        }
    }

    /// Operands in stack order, as for instructions.
    pub fn operands(&self) -> SmallVec<[ValueId; 2]> {
        match *self {
            Self::Branch { cond, .. } => SmallVec::from_slice(&[cond]),
            Self::Return { addr, len } | Self::Revert { addr, len } => {
                SmallVec::from_slice(&[addr, len])
            }
            Self::Jump(_) | Self::Stop => SmallVec::new(),
        }
    }
}

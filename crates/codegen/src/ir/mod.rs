//! The word-level intermediate representation.
//!
//! Every value is a 256-bit word produced exactly once by an instruction.
//! Aggregates never exist as IR values; they live in memory, storage, or
//! calldata and are manipulated through loads, stores, and copy loops built
//! by lowering. Locals are memory-resident, so no value needs to merge at a
//! control-flow join: the only values that cross a block boundary are the
//! linear continuations of runtime-check branches.

mod block;
mod builder;
mod display;
mod function;
mod inst;

pub use block::{Block, Terminator};
pub use builder::FunctionBuilder;
pub use function::{Function, IrModule};
pub use inst::{BinaryOp, Inst, InstKind, UnaryOp};

use krait_data_structures::newtype_index;

newtype_index! {
    /// An instruction, and the value it produces if it produces one.
    pub struct ValueId;
}

newtype_index! {
    /// A basic block within a function.
    pub struct BlockId;
}

newtype_index! {
    /// A function within an [`IrModule`].
    pub struct FuncId;
}

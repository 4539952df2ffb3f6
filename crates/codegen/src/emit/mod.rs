//! Assembly and final contract emission.

pub mod asm;
mod evm;

pub use evm::{emit_contract, CompiledContract};

//! Code generation: IR construction, lowering from the typed AST, liveness
//! analysis, stack scheduling, and two-pass bytecode emission.
//!
//! The pipeline over one module is strictly sequential:
//!
//! 1. [`lower`] turns the analyzed AST into per-function IR (basic blocks of
//!    word-level instructions; locals live in a static memory frame).
//! 2. [`analysis::liveness`] computes per-block live sets.
//! 3. [`stack`] schedules each function onto the 16-slot stack window,
//!    producing abstract assembly.
//! 4. [`emit`] assembles the deploy and runtime segments.
//!
//! A failure in one function does not abort its siblings; diagnostics batch
//! and no bytecode is produced if any function failed.

pub mod analysis;
pub mod emit;
pub mod ir;
pub mod lower;
pub mod stack;

pub use emit::{emit_contract, CompiledContract};
pub use lower::lower_module;

//! Type and layout resolution.
//!
//! Runs before any code generation and freezes the module-level facts the
//! later stages read: folded constant values, the storage layout, and the
//! external signature table. All failures here are fatal and batched through
//! the shared [`DiagCtxt`](krait_interface::DiagCtxt).

pub mod abi;
pub mod eval;
pub mod layout;
pub mod resolve;

pub use abi::AbiFunction;
pub use eval::ConstValue;
pub use layout::{Layout, MemFrame, StorageSlot};
pub use resolve::{analyze, Analysis};

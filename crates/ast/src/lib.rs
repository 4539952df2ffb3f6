//! The typed AST consumed by the compiler core.
//!
//! The front end (lexing, parsing, name-level type checking) is an external
//! collaborator; it hands the core a fully typed tree. The core re-verifies
//! the invariants it depends on (declaration uniqueness, constant-foldable
//! array bounds, region legality) and reports violations through
//! `krait_interface` diagnostics rather than trusting the producer.

pub mod expr;
pub mod item;
pub mod stmt;
pub mod ty;

pub use expr::{BinOp, Expr, ExprKind, Lit, UnOp};
pub use item::{
    Block, ConstantDecl, Function, FunctionKind, Ident, Module, Param, VarDecl,
};
pub use stmt::{Stmt, StmtKind};
pub use ty::{StructDef, StructField, StructId, Structs, Type, WORD_BYTES};

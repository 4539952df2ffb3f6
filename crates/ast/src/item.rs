//! Module-level declarations.

use crate::{expr::Expr, stmt::Stmt, ty::{Structs, Type}};
use krait_interface::Span;
use std::fmt;

/// An identifier with its source location.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Ident {
    pub name: String,
    pub span: Span,
}

impl Ident {
    pub fn new(name: impl Into<String>, span: Span) -> Self {
        Self { name: name.into(), span }
    }

    pub fn as_str(&self) -> &str {
        &self.name
    }
}

impl fmt::Display for Ident {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

/// A sequence of statements.
pub type Block = Vec<Stmt>;

/// One contract module: the unit of compilation.
#[derive(Clone, Debug, Default)]
pub struct Module {
    pub name: String,
    pub structs: Structs,
    pub constants: Vec<ConstantDecl>,
    pub storage: Vec<VarDecl>,
    pub functions: Vec<Function>,
}

/// A module-level `constant` declaration. The initializer must fold at
/// compile time; it may reference other constants.
#[derive(Clone, Debug)]
pub struct ConstantDecl {
    pub name: Ident,
    pub ty: Type,
    pub init: Expr,
}

/// A contract storage variable.
#[derive(Clone, Debug)]
pub struct VarDecl {
    pub name: Ident,
    pub ty: Type,
}

/// How a function may be reached.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum FunctionKind {
    /// Reachable through the runtime dispatcher.
    External,
    /// Callable only from other functions of the same module.
    Internal,
    /// Runs once at deployment; emitted only into the deploy segment.
    Constructor,
}

/// A function definition.
#[derive(Clone, Debug)]
pub struct Function {
    pub name: Ident,
    pub kind: FunctionKind,
    pub params: Vec<Param>,
    pub ret: Option<Type>,
    pub body: Block,
    pub span: Span,
}

/// A function parameter.
#[derive(Clone, Debug)]
pub struct Param {
    pub name: Ident,
    pub ty: Type,
}

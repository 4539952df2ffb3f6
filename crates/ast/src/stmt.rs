//! Typed statements.

use crate::{
    expr::Expr,
    item::{Block, Ident},
    ty::Type,
};
use krait_interface::Span;

/// A typed statement.
#[derive(Clone, Debug)]
pub struct Stmt {
    pub kind: StmtKind,
    pub span: Span,
}

impl Stmt {
    pub fn new(kind: StmtKind, span: Span) -> Self {
        Self { kind, span }
    }
}

#[derive(Clone, Debug)]
pub enum StmtKind {
    /// `name: ty = init`. Locals are always initialized.
    Let { name: Ident, ty: Type, init: Expr },
    /// `target = value`. The target is a place expression: a local, a
    /// storage variable, or an index/member chain rooted at one.
    Assign { target: Expr, value: Expr },
    /// An expression evaluated for effect, e.g. an internal call.
    Expr(Expr),
    If { cond: Expr, then: Block, else_: Option<Block> },
    /// `for var in range(start, end)`. The induction variable is a fresh
    /// local scoped to the body; `start`/`end` are evaluated once.
    For { var: Ident, var_ty: Type, start: Expr, end: Expr, body: Block },
    Break,
    Continue,
    Return(Option<Expr>),
    /// `assert cond`; failure reverts at runtime.
    Assert(Expr),
    /// Unconditional revert.
    Raise,
}

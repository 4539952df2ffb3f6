//! Typed expressions.

use crate::{item::Ident, ty::Type};
use alloy_primitives::U256;
use krait_interface::Span;

/// A typed expression. Every node carries the type assigned by the front end
/// and the source span for diagnostics.
#[derive(Clone, Debug)]
pub struct Expr {
    pub kind: ExprKind,
    pub ty: Type,
    pub span: Span,
}

impl Expr {
    pub fn new(kind: ExprKind, ty: Type, span: Span) -> Self {
        Self { kind, ty, span }
    }
}

#[derive(Clone, Debug)]
pub enum ExprKind {
    /// A literal value.
    Lit(Lit),
    /// A local variable, parameter, or module constant.
    Ident(Ident),
    /// A contract storage variable, `self.<name>`.
    Storage(Ident),
    /// `op expr`.
    Unary(UnOp, Box<Expr>),
    /// `lhs op rhs`. `unchecked` opts the expression out of overflow checks.
    Binary { op: BinOp, lhs: Box<Expr>, rhs: Box<Expr>, unchecked: bool },
    /// `base[index]`.
    Index { base: Box<Expr>, index: Box<Expr> },
    /// `base.field` on a struct value.
    Member { base: Box<Expr>, field: Ident },
    /// `len(base)` on an array.
    Len(Box<Expr>),
    /// A call to an internal function of the same module.
    Call { callee: Ident, args: Vec<Expr> },
    /// An array literal, `[a, b, c]`.
    Array(Vec<Expr>),
    /// The calling account, `msg.sender`.
    Caller,
}

/// A literal. Numeric literals are stored as the raw word; signed values are
/// in two's complement, interpreted through the expression's type.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Lit {
    Num(U256),
    Bool(bool),
}

/// A unary operator.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum UnOp {
    /// `-x`, checked for overflow on the type's minimum.
    Neg,
    /// `not x` on booleans.
    Not,
    /// `~x`.
    BitNot,
}

impl UnOp {
    pub const fn to_str(self) -> &'static str {
        match self {
            Self::Neg => "-",
            Self::Not => "not",
            Self::BitNot => "~",
        }
    }
}

/// A binary operator.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    BitAnd,
    BitOr,
    BitXor,
    Shl,
    Shr,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    /// Short-circuiting boolean and.
    And,
    /// Short-circuiting boolean or.
    Or,
}

impl BinOp {
    /// Operators whose result can exceed the operand type's range.
    pub const fn is_checked_arith(self) -> bool {
        matches!(self, Self::Add | Self::Sub | Self::Mul | Self::Div | Self::Mod)
    }

    pub const fn is_comparison(self) -> bool {
        matches!(self, Self::Eq | Self::Ne | Self::Lt | Self::Le | Self::Gt | Self::Ge)
    }

    /// Operators that lower to branch form instead of eager evaluation.
    pub const fn is_short_circuit(self) -> bool {
        matches!(self, Self::And | Self::Or)
    }

    pub const fn to_str(self) -> &'static str {
        match self {
            Self::Add => "+",
            Self::Sub => "-",
            Self::Mul => "*",
            Self::Div => "/",
            Self::Mod => "%",
            Self::BitAnd => "&",
            Self::BitOr => "|",
            Self::BitXor => "^",
            Self::Shl => "<<",
            Self::Shr => ">>",
            Self::Eq => "==",
            Self::Ne => "!=",
            Self::Lt => "<",
            Self::Le => "<=",
            Self::Gt => ">",
            Self::Ge => ">=",
            Self::And => "and",
            Self::Or => "or",
        }
    }
}

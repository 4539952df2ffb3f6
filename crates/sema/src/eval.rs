//! Constant expression folding.
//!
//! Folds `constant` initializers to single words at compile time, with the
//! same overflow semantics the generated code enforces at runtime: any
//! result outside the expression type's range is an error, not a wrap.

use alloy_primitives::{I256, U256};
use krait_ast::{BinOp, Expr, ExprKind, Lit, Type, UnOp};
use krait_data_structures::map::FxIndexMap;
use krait_interface::{DiagCtxt, DiagKind, ErrorGuaranteed, Span};

/// A folded constant: its declared type and the full-width word value.
/// Signed values are sign-extended two's complement.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ConstValue {
    pub ty: Type,
    pub word: U256,
}

impl ConstValue {
    fn as_signed(&self) -> I256 {
        I256::from_raw(self.word)
    }

    fn as_bool(&self) -> bool {
        !self.word.is_zero()
    }
}

/// Folds constant expressions against a table of previously folded constants.
pub struct ConstantEvaluator<'a> {
    dcx: &'a DiagCtxt,
    values: FxIndexMap<String, ConstValue>,
}

impl<'a> ConstantEvaluator<'a> {
    pub fn new(dcx: &'a DiagCtxt) -> Self {
        Self { dcx, values: FxIndexMap::default() }
    }

    /// Records a folded constant so later initializers can reference it.
    pub fn define(&mut self, name: impl Into<String>, value: ConstValue) {
        self.values.insert(name.into(), value);
    }

    pub fn get(&self, name: &str) -> Option<&ConstValue> {
        self.values.get(name)
    }

    pub fn into_values(self) -> FxIndexMap<String, ConstValue> {
        self.values
    }

    /// Folds `expr` to a value, or emits a diagnostic describing why it is
    /// not a compile-time constant.
    pub fn eval(&self, expr: &Expr) -> Result<ConstValue, ErrorGuaranteed> {
        let span = expr.span;
        match &expr.kind {
            ExprKind::Lit(Lit::Num(word)) => {
                let v = ConstValue { ty: expr.ty.clone(), word: *word };
                self.check_range(&v, span)?;
                Ok(v)
            }
            ExprKind::Lit(Lit::Bool(b)) => {
                Ok(ConstValue { ty: Type::Bool, word: U256::from(*b as u8) })
            }
            ExprKind::Ident(name) => match self.values.get(name.as_str()) {
                Some(v) => Ok(v.clone()),
                None => Err(self
                    .dcx
                    .err(DiagKind::Malformed, format!("`{name}` is not a constant"))
                    .span(span)
                    .emit()),
            },
            ExprKind::Unary(op, operand) => {
                let v = self.eval(operand)?;
                self.eval_unop(*op, &v, span)
            }
            ExprKind::Binary { op, lhs, rhs, .. } => {
                let l = self.eval(lhs)?;
                let r = self.eval(rhs)?;
                self.eval_binop(*op, &l, &r, &expr.ty, span)
            }
            _ => Err(self
                .dcx
                .err(DiagKind::Malformed, "expression is not a compile-time constant")
                .span(span)
                .emit()),
        }
    }

    fn eval_unop(
        &self,
        op: UnOp,
        v: &ConstValue,
        span: Span,
    ) -> Result<ConstValue, ErrorGuaranteed> {
        let word = match op {
            UnOp::Not => U256::from(v.word.is_zero() as u8),
            UnOp::BitNot => !v.word,
            UnOp::Neg => match v.as_signed().checked_neg() {
                Some(n) => n.into_raw(),
                None => return Err(self.overflow(op.to_str(), span)),
            },
        };
        let out = ConstValue { ty: v.ty.clone(), word };
        self.check_range(&out, span)?;
        Ok(out)
    }

    fn eval_binop(
        &self,
        op: BinOp,
        l: &ConstValue,
        r: &ConstValue,
        result_ty: &Type,
        span: Span,
    ) -> Result<ConstValue, ErrorGuaranteed> {
        if op.is_comparison() {
            let b = match (op, signed_bits(&l.ty)) {
                (BinOp::Eq, _) => l.word == r.word,
                (BinOp::Ne, _) => l.word != r.word,
                (cmp, Some(_)) => {
                    let (a, b) = (l.as_signed(), r.as_signed());
                    match cmp {
                        BinOp::Lt => a < b,
                        BinOp::Le => a <= b,
                        BinOp::Gt => a > b,
                        _ => a >= b,
                    }
                }
                (cmp, None) => match cmp {
                    BinOp::Lt => l.word < r.word,
                    BinOp::Le => l.word <= r.word,
                    BinOp::Gt => l.word > r.word,
                    _ => l.word >= r.word,
                },
            };
            return Ok(ConstValue { ty: Type::Bool, word: U256::from(b as u8) });
        }

        if op.is_short_circuit() {
            let b = match op {
                BinOp::And => l.as_bool() && r.as_bool(),
                _ => l.as_bool() || r.as_bool(),
            };
            return Ok(ConstValue { ty: Type::Bool, word: U256::from(b as u8) });
        }

        let word = if let Some(_bits) = signed_bits(result_ty) {
            let (a, b) = (l.as_signed(), r.as_signed());
            let out = match op {
                BinOp::Add => a.checked_add(b),
                BinOp::Sub => a.checked_sub(b),
                BinOp::Mul => a.checked_mul(b),
                BinOp::Div => {
                    self.nonzero(b == I256::ZERO, span)?;
                    a.checked_div(b)
                }
                BinOp::Mod => {
                    self.nonzero(b == I256::ZERO, span)?;
                    a.checked_rem(b)
                }
                BinOp::BitAnd => Some(a & b),
                BinOp::BitOr => Some(a | b),
                BinOp::BitXor => Some(a ^ b),
                BinOp::Shl | BinOp::Shr => {
                    return Err(self
                        .dcx
                        .err(DiagKind::Malformed, "shifts require an unsigned left operand")
                        .span(span)
                        .emit());
                }
                _ => unreachable!("comparison and logical ops handled above"),
            };
            match out {
                Some(v) => v.into_raw(),
                None => return Err(self.overflow(op.to_str(), span)),
            }
        } else {
            let (a, b) = (l.word, r.word);
            let out = match op {
                BinOp::Add => a.checked_add(b),
                BinOp::Sub => a.checked_sub(b),
                BinOp::Mul => a.checked_mul(b),
                BinOp::Div => {
                    self.nonzero(b.is_zero(), span)?;
                    Some(a / b)
                }
                BinOp::Mod => {
                    self.nonzero(b.is_zero(), span)?;
                    Some(a % b)
                }
                BinOp::BitAnd => Some(a & b),
                BinOp::BitOr => Some(a | b),
                BinOp::BitXor => Some(a ^ b),
                BinOp::Shl => {
                    if b >= U256::from(256u32) {
                        None
                    } else {
                        let shift = b.to::<usize>();
                        let v = a << shift;
                        // Shifted-out bits are an overflow, not a wrap.
                        if (v >> shift) == a { Some(v) } else { None }
                    }
                }
                BinOp::Shr => {
                    if b >= U256::from(256u32) {
                        Some(U256::ZERO)
                    } else {
                        Some(a >> b.to::<usize>())
                    }
                }
                _ => unreachable!("comparison and logical ops handled above"),
            };
            match out {
                Some(v) => v,
                None => return Err(self.overflow(op.to_str(), span)),
            }
        };

        let out = ConstValue { ty: result_ty.clone(), word };
        self.check_range(&out, span)?;
        Ok(out)
    }

    /// Checks that the word fits the declared type's range.
    fn check_range(&self, v: &ConstValue, span: Span) -> Result<(), ErrorGuaranteed> {
        let ok = match v.ty {
            Type::Uint(bits) => v.word <= uint_max(bits),
            Type::Int(bits) => signed_in_range(v.as_signed(), bits),
            Type::Bool => v.word <= U256::from(1u8),
            _ => true,
        };
        if ok {
            Ok(())
        } else {
            Err(self
                .dcx
                .err(
                    DiagKind::ConstOverflow,
                    format!("constant value out of range for `{:?}`", v.ty),
                )
                .span(span)
                .emit())
        }
    }

    fn nonzero(&self, divisor_is_zero: bool, span: Span) -> Result<(), ErrorGuaranteed> {
        if divisor_is_zero {
            Err(self
                .dcx
                .err(DiagKind::ConstOverflow, "division by zero in constant expression")
                .span(span)
                .emit())
        } else {
            Ok(())
        }
    }

    fn overflow(&self, op: &str, span: Span) -> ErrorGuaranteed {
        self.dcx
            .err(DiagKind::ConstOverflow, format!("overflow evaluating constant `{op}`"))
            .span(span)
            .emit()
    }
}

/// Largest value of `uintN`.
pub fn uint_max(bits: u16) -> U256 {
    if bits >= 256 { U256::MAX } else { (U256::from(1u8) << bits) - U256::from(1u8) }
}

/// Smallest and largest values of `intN`, as raw words.
pub fn int_bounds(bits: u16) -> (U256, U256) {
    let half = U256::from(1u8) << (bits - 1);
    let min = I256::from_raw(half).checked_neg().unwrap_or(I256::MIN).into_raw();
    (min, half - U256::from(1u8))
}

fn signed_in_range(v: I256, bits: u16) -> bool {
    if bits >= 256 {
        return true;
    }
    let half = I256::from_raw(U256::from(1u8) << (bits - 1));
    v >= -half && v < half
}

fn signed_bits(ty: &Type) -> Option<u16> {
    match ty {
        Type::Int(bits) => Some(*bits),
        _ => None,
    }
}

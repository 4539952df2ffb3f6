//! Expression lowering.
//!
//! Scalar expressions become IR values; aggregate expressions become
//! [`Place`]s naming where the data lives. Checked arithmetic expands to the
//! raw operation plus a branch into the matching panic block.

use super::{FuncLower, PANIC_BOUNDS, PANIC_DIV_ZERO, PANIC_OVERFLOW};
use crate::ir::{BinaryOp, InstKind, Terminator, UnaryOp, ValueId};
use alloy_primitives::U256;
use krait_ast::{BinOp, Expr, ExprKind, Lit, Type, UnOp, WORD_BYTES};
use krait_interface::{DiagKind, ErrorGuaranteed};
use krait_sema::eval::{int_bounds, uint_max};

/// Data region an lvalue lives in.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Region {
    Memory,
    Storage,
    Calldata,
}

/// An addressed location. For memory and calldata `addr` is a byte offset;
/// for storage it is a slot number.
#[derive(Clone, Debug)]
pub struct Place {
    pub region: Region,
    pub addr: ValueId,
    pub ty: Type,
}

/// A lowered expression: a single stack word, or a reference to aggregate
/// data in some region.
#[derive(Clone, Debug)]
pub enum RValue {
    Word(ValueId),
    Ref(Place),
}

impl<'cx> FuncLower<'cx> {
    pub(crate) fn lower_expr(&mut self, e: &Expr) -> Result<RValue, ErrorGuaranteed> {
        self.b.set_span(e.span);
        match &e.kind {
            ExprKind::Lit(Lit::Num(w)) => Ok(RValue::Word(self.b.const_(*w))),
            ExprKind::Lit(Lit::Bool(v)) => Ok(RValue::Word(self.b.const_u64(*v as u64))),
            ExprKind::Ident(name) => {
                if let Some(local) = self.lookup_local(name.as_str()).cloned() {
                    if local.ty.is_value_type() {
                        let addr = self.b.const_u64(local.offset);
                        return Ok(RValue::Word(self.b.mload(addr)));
                    }
                    return Ok(RValue::Ref(self.local_place(&local)));
                }
                if let Some(c) = self.analysis().constant(name.as_str()) {
                    return Ok(RValue::Word(self.b.const_(c.word)));
                }
                Err(self
                    .dcx()
                    .err(DiagKind::Malformed, format!("unknown identifier `{name}`"))
                    .span(e.span)
                    .emit())
            }
            ExprKind::Storage(_) | ExprKind::Index { .. } | ExprKind::Member { .. } => {
                let place = self.lower_place(e)?;
                if place.ty.is_value_type() {
                    return Ok(RValue::Word(self.load_scalar(&place)));
                }
                Ok(RValue::Ref(place))
            }
            ExprKind::Unary(op, inner) => {
                let v = self.lower_value(inner)?;
                Ok(RValue::Word(self.lower_unop(*op, v, &inner.ty)?))
            }
            ExprKind::Binary { op, lhs, rhs, unchecked } => {
                Ok(RValue::Word(self.lower_binop(*op, lhs, rhs, *unchecked)?))
            }
            ExprKind::Len(base) => match &base.ty {
                Type::FixedArray(_, len) => Ok(RValue::Word(self.b.const_u64(*len))),
                Type::DynArray(..) => {
                    let place = self.lower_place(base)?;
                    Ok(RValue::Word(self.load_len(&place)))
                }
                _ => Err(self
                    .dcx()
                    .err(DiagKind::Malformed, "len() on a non-array value")
                    .span(e.span)
                    .emit()),
            },
            ExprKind::Call { callee, args } => {
                match self.lower_call(callee.as_str(), args, e.span)? {
                    Some(rv) => Ok(rv),
                    None => Err(self
                        .dcx()
                        .err(
                            DiagKind::Malformed,
                            format!("call to `{callee}` produces no value"),
                        )
                        .span(e.span)
                        .emit()),
                }
            }
            ExprKind::Array(_) => {
                let tmp = self.alloc_temp(&e.ty);
                let place = self.local_place(&tmp);
                self.store_expr_into(&place, e)?;
                Ok(RValue::Ref(place))
            }
            ExprKind::Caller => Ok(RValue::Word(self.b.inst(InstKind::Caller))),
        }
    }

    /// Lowers an expression that must produce a single word.
    pub(crate) fn lower_value(&mut self, e: &Expr) -> Result<ValueId, ErrorGuaranteed> {
        match self.lower_expr(e)? {
            RValue::Word(v) => Ok(v),
            RValue::Ref(place) if place.ty.is_value_type() => Ok(self.load_scalar(&place)),
            RValue::Ref(_) => {
                panic!("aggregate used as a scalar value at {}", e.span)
            }
        }
    }

    /// Lowers an assignable expression to the location it names.
    pub(crate) fn lower_place(&mut self, e: &Expr) -> Result<Place, ErrorGuaranteed> {
        self.b.set_span(e.span);
        match &e.kind {
            ExprKind::Ident(name) => match self.lookup_local(name.as_str()).cloned() {
                Some(local) => Ok(self.local_place(&local)),
                None => Err(self
                    .dcx()
                    .err(DiagKind::Malformed, format!("`{name}` is not assignable"))
                    .span(e.span)
                    .emit()),
            },
            ExprKind::Storage(name) => {
                match self.analysis().layout.slot(name.as_str()).cloned() {
                    Some(slot) => {
                        let addr = self.b.const_(slot.base_slot);
                        Ok(Place { region: Region::Storage, addr, ty: slot.ty })
                    }
                    None => Err(self
                        .dcx()
                        .err(
                            DiagKind::Malformed,
                            format!("no storage variable named `{name}`"),
                        )
                        .span(e.span)
                        .emit()),
                }
            }
            ExprKind::Index { base, index } => self.lower_index(base, index),
            ExprKind::Member { base, field } => {
                let place = self.lower_place(base)?;
                let Type::Struct(id) = &place.ty else {
                    panic!("member access on non-struct {:?}", place.ty)
                };
                let def = &self.structs()[*id];
                let Some((pos, field_ty)) = def.field(field.as_str()) else {
                    return Err(self
                        .dcx()
                        .err(
                            DiagKind::Malformed,
                            format!("no field `{field}` on `{}`", def.name),
                        )
                        .span(e.span)
                        .emit());
                };
                let head = &def.fields[..pos];
                let offset: u64 = match place.region {
                    Region::Memory | Region::Calldata => {
                        head.iter().map(|f| self.size_of(&f.ty)).sum()
                    }
                    Region::Storage => {
                        head.iter().map(|f| f.ty.storage_words(self.structs())).sum()
                    }
                };
                let addr = self.offset_addr(place.addr, offset);
                Ok(Place { region: place.region, addr, ty: field_ty.clone() })
            }
            _ => Err(self
                .dcx()
                .err(DiagKind::Malformed, "expression does not name a location")
                .span(e.span)
                .emit()),
        }
    }

    fn lower_index(&mut self, base: &Expr, index: &Expr) -> Result<Place, ErrorGuaranteed> {
        let place = self.lower_place(base)?;
        match place.ty.clone() {
            Type::FixedArray(elem, len) => {
                let idx = self.lower_value(index)?;
                // Indexes known in range at compile time skip the runtime
                // check.
                let statically_ok =
                    matches!(index.kind, ExprKind::Lit(Lit::Num(w)) if w < U256::from(len));
                if !statically_ok {
                    let len_v = self.b.const_u64(len);
                    let ok = self.b.binary(BinaryOp::Lt, idx, len_v);
                    let fail = self.bool_not(ok);
                    self.check_panic(fail, PANIC_BOUNDS)?;
                }
                let addr = self.elem_addr(place.region, place.addr, idx, &elem);
                Ok(Place { region: place.region, addr, ty: *elem })
            }
            Type::DynArray(elem, _) => {
                let idx = self.lower_value(index)?;
                let len = self.load_len(&place);
                let ok = self.b.binary(BinaryOp::Lt, idx, len);
                let fail = self.bool_not(ok);
                self.check_panic(fail, PANIC_BOUNDS)?;
                let data = self.dyn_data_addr(&place);
                let addr = self.elem_addr(place.region, data, idx, &elem);
                Ok(Place { region: place.region, addr, ty: *elem })
            }
            Type::Mapping(_, value) => {
                debug_assert_eq!(place.region, Region::Storage);
                let key = self.lower_value(index)?;
                let slot = self.keccak_key_slot(key, place.addr);
                Ok(Place { region: Region::Storage, addr: slot, ty: *value })
            }
            ty => panic!("indexing into non-container {ty:?}"),
        }
    }

    /// Length word of a dynamic array, at the place's base address.
    pub(crate) fn load_len(&mut self, place: &Place) -> ValueId {
        let scalar = Place { region: place.region, addr: place.addr, ty: Type::U256 };
        self.load_scalar(&scalar)
    }

    /// Base address of a dynamic array's element data.
    pub(crate) fn dyn_data_addr(&mut self, place: &Place) -> ValueId {
        match place.region {
            Region::Memory | Region::Calldata => {
                self.offset_addr(place.addr, WORD_BYTES as u64)
            }
            Region::Storage => self.keccak_slot(place.addr),
        }
    }

    /// Address of element `idx`, given the data base address.
    pub(crate) fn elem_addr(
        &mut self,
        region: Region,
        data: ValueId,
        idx: ValueId,
        elem: &Type,
    ) -> ValueId {
        let stride = match region {
            Region::Memory | Region::Calldata => self.size_of(elem),
            Region::Storage => elem.storage_words(self.structs()),
        };
        let stride_v = self.b.const_u64(stride);
        let scaled = self.b.mul(idx, stride_v);
        self.b.add(data, scaled)
    }

    pub(crate) fn offset_addr(&mut self, addr: ValueId, offset: u64) -> ValueId {
        if offset == 0 {
            return addr;
        }
        let off = self.b.const_u64(offset);
        self.b.add(addr, off)
    }

    fn lower_unop(
        &mut self,
        op: UnOp,
        v: ValueId,
        ty: &Type,
    ) -> Result<ValueId, ErrorGuaranteed> {
        match op {
            UnOp::Not => Ok(self.bool_not(v)),
            UnOp::BitNot => {
                let r = self.b.unary(UnaryOp::Not, v);
                Ok(match ty {
                    // Narrow unsigned results are masked back to the type's
                    // width to keep values canonical.
                    Type::Uint(bits) if *bits < 256 => {
                        let mask = self.b.const_(uint_max(*bits));
                        self.b.binary(BinaryOp::And, r, mask)
                    }
                    Type::FixedBytes(n) if *n < 32 => {
                        let mask = U256::MAX << (256 - 8 * u32::from(*n));
                        let mask = self.b.const_(mask);
                        self.b.binary(BinaryOp::And, r, mask)
                    }
                    _ => r,
                })
            }
            UnOp::Neg => {
                let Type::Int(bits) = ty else { panic!("negation of non-int {ty:?}") };
                // -min does not fit the type.
                let (min, _) = int_bounds(*bits);
                let min_v = self.b.const_(min);
                let is_min = self.b.binary(BinaryOp::Eq, v, min_v);
                self.check_panic(is_min, PANIC_OVERFLOW)?;
                let zero = self.b.const_u64(0);
                Ok(self.b.binary(BinaryOp::Sub, zero, v))
            }
        }
    }

    fn lower_binop(
        &mut self,
        op: BinOp,
        lhs: &Expr,
        rhs: &Expr,
        unchecked: bool,
    ) -> Result<ValueId, ErrorGuaranteed> {
        if op.is_short_circuit() {
            return self.lower_short_circuit(op, lhs, rhs);
        }
        let a = self.lower_value(lhs)?;
        let b = self.lower_value(rhs)?;
        let signed = matches!(lhs.ty, Type::Int(_));

        if op.is_comparison() {
            return Ok(self.lower_comparison(op, a, b, signed));
        }
        match op {
            BinOp::BitAnd => Ok(self.b.binary(BinaryOp::And, a, b)),
            BinOp::BitOr => Ok(self.b.binary(BinaryOp::Or, a, b)),
            BinOp::BitXor => Ok(self.b.binary(BinaryOp::Xor, a, b)),
            BinOp::Shl => {
                let r = self.b.binary(BinaryOp::Shl, a, b);
                Ok(match lhs.ty {
                    Type::Uint(bits) if bits < 256 => {
                        let mask = self.b.const_(uint_max(bits));
                        self.b.binary(BinaryOp::And, r, mask)
                    }
                    _ => r,
                })
            }
            BinOp::Shr => {
                let opc = if signed { BinaryOp::Sar } else { BinaryOp::Shr };
                Ok(self.b.binary(opc, a, b))
            }
            BinOp::Add | BinOp::Sub | BinOp::Mul | BinOp::Div | BinOp::Mod => {
                if signed {
                    self.lower_signed_arith(op, a, b, &lhs.ty, unchecked)
                } else {
                    self.lower_unsigned_arith(op, a, b, &lhs.ty, unchecked)
                }
            }
            BinOp::And | BinOp::Or | BinOp::Eq | BinOp::Ne | BinOp::Lt | BinOp::Le
            | BinOp::Gt | BinOp::Ge => unreachable!("handled above"),
        }
    }

    fn lower_comparison(&mut self, op: BinOp, a: ValueId, b: ValueId, signed: bool) -> ValueId {
        let (lt, gt) = if signed {
            (BinaryOp::SLt, BinaryOp::SGt)
        } else {
            (BinaryOp::Lt, BinaryOp::Gt)
        };
        match op {
            BinOp::Eq => self.b.binary(BinaryOp::Eq, a, b),
            BinOp::Ne => {
                let eq = self.b.binary(BinaryOp::Eq, a, b);
                self.bool_not(eq)
            }
            BinOp::Lt => self.b.binary(lt, a, b),
            BinOp::Gt => self.b.binary(gt, a, b),
            BinOp::Le => {
                let v = self.b.binary(gt, a, b);
                self.bool_not(v)
            }
            BinOp::Ge => {
                let v = self.b.binary(lt, a, b);
                self.bool_not(v)
            }
            _ => unreachable!(),
        }
    }

    /// `and`/`or` lower to branch form through a memory temporary, so the
    /// join block carries no stack state.
    fn lower_short_circuit(
        &mut self,
        op: BinOp,
        lhs: &Expr,
        rhs: &Expr,
    ) -> Result<ValueId, ErrorGuaranteed> {
        let tmp = self.alloc_temp(&Type::Bool);
        let a = self.lower_value(lhs)?;
        let addr = self.b.const_u64(tmp.offset);
        self.b.mstore(addr, a);

        let rhs_blk = self.b.new_block();
        let join = self.b.new_block();
        let (then_blk, else_blk) = match op {
            BinOp::And => (rhs_blk, join),
            BinOp::Or => (join, rhs_blk),
            _ => unreachable!(),
        };
        self.b.terminate(Terminator::Branch { cond: a, then_blk, else_blk });

        self.b.switch_to(rhs_blk);
        let r = self.lower_value(rhs)?;
        let addr = self.b.const_u64(tmp.offset);
        self.b.mstore(addr, r);
        if !self.b.is_terminated() {
            self.b.terminate(Terminator::Jump(join));
        }

        self.b.switch_to(join);
        let addr = self.b.const_u64(tmp.offset);
        Ok(self.b.mload(addr))
    }

    fn lower_unsigned_arith(
        &mut self,
        op: BinOp,
        a: ValueId,
        b: ValueId,
        ty: &Type,
        unchecked: bool,
    ) -> Result<ValueId, ErrorGuaranteed> {
        let bits = match ty {
            Type::Uint(bits) => *bits,
            Type::Address | Type::FixedBytes(_) => 256,
            _ => panic!("unsigned arithmetic on {ty:?}"),
        };
        match op {
            BinOp::Add => {
                let r = self.b.add(a, b);
                if !unchecked {
                    let fail = if bits < 256 {
                        // Operands are canonical, so the sum cannot wrap the
                        // word; exceeding the type's max is the only failure.
                        let max = self.b.const_(uint_max(bits));
                        self.b.binary(BinaryOp::Gt, r, max)
                    } else {
                        self.b.binary(BinaryOp::Lt, r, a)
                    };
                    self.check_panic(fail, PANIC_OVERFLOW)?;
                } else if bits < 256 {
                    return Ok(self.mask_uint(r, bits));
                }
                Ok(r)
            }
            BinOp::Sub => {
                let r = self.b.binary(BinaryOp::Sub, a, b);
                if !unchecked {
                    let fail = self.b.binary(BinaryOp::Lt, a, b);
                    self.check_panic(fail, PANIC_OVERFLOW)?;
                } else if bits < 256 {
                    return Ok(self.mask_uint(r, bits));
                }
                Ok(r)
            }
            BinOp::Mul => {
                let r = self.b.mul(a, b);
                if !unchecked {
                    // b != 0 && r / b != a detects a word-level wrap.
                    let q = self.b.binary(BinaryOp::Div, r, b);
                    let eq = self.b.binary(BinaryOp::Eq, q, a);
                    let ne = self.bool_not(eq);
                    let bz = self.bool_not(b);
                    let bnz = self.bool_not(bz);
                    let mut fail = self.b.binary(BinaryOp::And, ne, bnz);
                    if bits < 256 {
                        let max = self.b.const_(uint_max(bits));
                        let over = self.b.binary(BinaryOp::Gt, r, max);
                        fail = self.b.binary(BinaryOp::Or, fail, over);
                    }
                    self.check_panic(fail, PANIC_OVERFLOW)?;
                } else if bits < 256 {
                    return Ok(self.mask_uint(r, bits));
                }
                Ok(r)
            }
            BinOp::Div | BinOp::Mod => {
                let dz = self.bool_not(b);
                self.check_panic(dz, PANIC_DIV_ZERO)?;
                let opc = if op == BinOp::Div { BinaryOp::Div } else { BinaryOp::Mod };
                Ok(self.b.binary(opc, a, b))
            }
            _ => unreachable!(),
        }
    }

    fn lower_signed_arith(
        &mut self,
        op: BinOp,
        a: ValueId,
        b: ValueId,
        ty: &Type,
        unchecked: bool,
    ) -> Result<ValueId, ErrorGuaranteed> {
        let Type::Int(bits) = ty else { panic!("signed arithmetic on {ty:?}") };
        let bits = *bits;
        let (min, max) = int_bounds(bits);
        match op {
            BinOp::Add | BinOp::Sub => {
                let opc = if op == BinOp::Add { BinaryOp::Add } else { BinaryOp::Sub };
                let r = self.b.binary(opc, a, b);
                if !unchecked {
                    let fail = if bits < 256 {
                        self.range_fail(r, min, max)
                    } else {
                        // Sign rules: x + y overflows iff the operands agree
                        // in sign and the result does not; x - y iff they
                        // disagree and the result's sign differs from x's.
                        let sa = self.sign_bit(a);
                        let sb = self.sign_bit(b);
                        let sr = self.sign_bit(r);
                        let ab_eq = self.b.binary(BinaryOp::Eq, sa, sb);
                        let ab = if op == BinOp::Add { ab_eq } else { self.bool_not(ab_eq) };
                        let ra_eq = self.b.binary(BinaryOp::Eq, sr, sa);
                        let ra_ne = self.bool_not(ra_eq);
                        self.b.binary(BinaryOp::And, ab, ra_ne)
                    };
                    self.check_panic(fail, PANIC_OVERFLOW)?;
                } else if bits < 256 {
                    return Ok(self.sign_extend(r, bits));
                }
                Ok(r)
            }
            BinOp::Mul => {
                let r = self.b.mul(a, b);
                if !unchecked {
                    // a != 0 && r / a != b catches the word-level wrap; the
                    // a == -1, b == i256::MIN corner wraps back to b and
                    // needs its own test.
                    let q = self.b.binary(BinaryOp::SDiv, r, a);
                    let eq = self.b.binary(BinaryOp::Eq, q, b);
                    let ne = self.bool_not(eq);
                    let az = self.bool_not(a);
                    let anz = self.bool_not(az);
                    let mut fail = self.b.binary(BinaryOp::And, ne, anz);
                    let neg_one = self.b.const_(U256::MAX);
                    let a_neg1 = self.b.binary(BinaryOp::Eq, a, neg_one);
                    let (min256, _) = int_bounds(256);
                    let min_v = self.b.const_(min256);
                    let b_min = self.b.binary(BinaryOp::Eq, b, min_v);
                    let corner = self.b.binary(BinaryOp::And, a_neg1, b_min);
                    fail = self.b.binary(BinaryOp::Or, fail, corner);
                    if bits < 256 {
                        let narrow = self.range_fail(r, min, max);
                        fail = self.b.binary(BinaryOp::Or, fail, narrow);
                    }
                    self.check_panic(fail, PANIC_OVERFLOW)?;
                } else if bits < 256 {
                    return Ok(self.sign_extend(r, bits));
                }
                Ok(r)
            }
            BinOp::Div | BinOp::Mod => {
                let dz = self.bool_not(b);
                self.check_panic(dz, PANIC_DIV_ZERO)?;
                if op == BinOp::Div && !unchecked {
                    // min / -1 is the one overflowing quotient.
                    let min_v = self.b.const_(min);
                    let a_min = self.b.binary(BinaryOp::Eq, a, min_v);
                    let neg_one = self.b.const_(U256::MAX);
                    let b_neg1 = self.b.binary(BinaryOp::Eq, b, neg_one);
                    let fail = self.b.binary(BinaryOp::And, a_min, b_neg1);
                    self.check_panic(fail, PANIC_OVERFLOW)?;
                }
                let opc = if op == BinOp::Div { BinaryOp::SDiv } else { BinaryOp::SMod };
                Ok(self.b.binary(opc, a, b))
            }
            _ => unreachable!(),
        }
    }

    fn mask_uint(&mut self, v: ValueId, bits: u16) -> ValueId {
        let mask = self.b.const_(uint_max(bits));
        self.b.binary(BinaryOp::And, v, mask)
    }

    /// Re-canonicalizes a narrow signed word: shift the value's top bit to
    /// the word's top, then arithmetic-shift back.
    pub(crate) fn sign_extend(&mut self, v: ValueId, bits: u16) -> ValueId {
        let by = self.b.const_u64(256 - u64::from(bits));
        let up = self.b.binary(BinaryOp::Shl, v, by);
        let by = self.b.const_u64(256 - u64::from(bits));
        self.b.binary(BinaryOp::Sar, up, by)
    }

    fn sign_bit(&mut self, v: ValueId) -> ValueId {
        let by = self.b.const_u64(255);
        self.b.binary(BinaryOp::Shr, v, by)
    }

    /// `v < min || v > max` under signed comparison.
    fn range_fail(&mut self, v: ValueId, min: U256, max: U256) -> ValueId {
        let min_v = self.b.const_(min);
        let under = self.b.binary(BinaryOp::SLt, v, min_v);
        let max_v = self.b.const_(max);
        let over = self.b.binary(BinaryOp::SGt, v, max_v);
        self.b.binary(BinaryOp::Or, under, over)
    }

    /// Inlines a call to an internal function. Returns `None` for calls to
    /// functions without a return value.
    pub(crate) fn lower_call(
        &mut self,
        callee: &str,
        args: &[Expr],
        span: krait_interface::Span,
    ) -> Result<Option<RValue>, ErrorGuaranteed> {
        let Some(target) =
            self.ast_function(callee).filter(|f| f.kind == krait_ast::FunctionKind::Internal)
        else {
            return Err(self
                .dcx()
                .err(DiagKind::Malformed, format!("no internal function named `{callee}`"))
                .span(span)
                .emit());
        };
        if !self.enter_call(callee) {
            // The pre-pass rejects cycles; this guards inlining itself.
            return Err(self
                .dcx()
                .err(
                    DiagKind::RecursiveCall,
                    format!("recursive call cycle involving `{callee}`"),
                )
                .span(span)
                .emit());
        }

        // Arguments evaluate in the caller's scope, into the callee's frame
        // slots.
        let mut param_locals = Vec::with_capacity(target.params.len());
        for (param, arg) in target.params.iter().zip(args) {
            let local = self.alloc_temp(&param.ty);
            let dst = self.local_place(&local);
            self.store_expr_into(&dst, arg)?;
            param_locals.push((param.name.as_str().to_string(), local));
        }
        let ret_local = target.ret.as_ref().map(|ty| self.alloc_temp(ty));
        let exit = self.b.new_block();

        self.push_param_scope(param_locals);
        self.push_inline(ret_local.clone(), exit);
        let res = self.lower_block(&target.body);
        self.pop_inline();
        self.pop_param_scope();
        self.leave_call();
        res?;

        if !self.b.is_terminated() {
            self.b.terminate(Terminator::Jump(exit));
        }
        self.b.switch_to(exit);

        Ok(match ret_local {
            Some(local) if local.ty.is_value_type() => {
                let addr = self.b.const_u64(local.offset);
                Some(RValue::Word(self.b.mload(addr)))
            }
            Some(local) => Some(RValue::Ref(self.local_place(&local))),
            None => None,
        })
    }

    /// Evaluates `e` directly into `dst`, flattening array literals without
    /// a second temporary.
    pub(crate) fn store_expr_into(
        &mut self,
        dst: &Place,
        e: &Expr,
    ) -> Result<(), ErrorGuaranteed> {
        if dst.ty.is_value_type() {
            let v = self.lower_value(e)?;
            self.store_scalar(dst, v);
            return Ok(());
        }
        if let ExprKind::Array(elems) = &e.kind {
            return self.store_array_literal(dst, &e.ty, elems);
        }
        match self.lower_expr(e)? {
            RValue::Ref(src) => self.copy_value(dst, &src),
            RValue::Word(_) => panic!("scalar value for aggregate {:?}", dst.ty),
        }
    }

    fn store_array_literal(
        &mut self,
        dst: &Place,
        ty: &Type,
        elems: &[Expr],
    ) -> Result<(), ErrorGuaranteed> {
        let elem_ty = match ty {
            Type::FixedArray(elem, _) => elem,
            Type::DynArray(elem, _) => {
                let len = self.b.const_u64(elems.len() as u64);
                let len_place =
                    Place { region: dst.region, addr: dst.addr, ty: Type::U256 };
                self.store_scalar(&len_place, len);
                elem
            }
            _ => panic!("array literal of type {ty:?}"),
        };
        let data = match ty {
            Type::DynArray(..) => self.dyn_data_addr(dst),
            _ => dst.addr,
        };
        for (i, elem) in elems.iter().enumerate() {
            let idx = self.b.const_u64(i as u64);
            let addr = self.elem_addr(dst.region, data, idx, elem_ty);
            let place = Place { region: dst.region, addr, ty: (**elem_ty).clone() };
            self.store_expr_into(&place, elem)?;
        }
        Ok(())
    }
}

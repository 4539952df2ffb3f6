//! Statement and control-flow lowering.
//!
//! Locals live in the memory frame, so every join point and loop boundary
//! is reached with an empty value stack; the only values crossing block
//! edges are the linear continuations of runtime-check branches.

use super::{FuncLower, PANIC_ASSERT};
use crate::ir::{BinaryOp, Terminator};
use krait_ast::{Expr, ExprKind, Stmt, StmtKind, Type};
use krait_interface::{DiagKind, ErrorGuaranteed};

impl<'cx> FuncLower<'cx> {
    pub(crate) fn lower_stmt(&mut self, stmt: &'cx Stmt) -> Result<(), ErrorGuaranteed> {
        self.b.set_span(stmt.span);
        match &stmt.kind {
            StmtKind::Let { name, ty, init } => {
                // The binding is not in scope inside its own initializer.
                let local = self.alloc_temp(ty);
                let place = self.local_place(&local);
                self.store_expr_into(&place, init)?;
                self.bind_local(name.as_str(), local);
                Ok(())
            }
            StmtKind::Assign { target, value } => {
                let place = self.lower_place(target)?;
                self.store_expr_into(&place, value)
            }
            StmtKind::Expr(e) => {
                // A discarded result is left dead; the scheduler drops it.
                if let ExprKind::Call { callee, args } = &e.kind {
                    self.lower_call(callee.as_str(), args, e.span)?;
                } else {
                    self.lower_expr(e)?;
                }
                Ok(())
            }
            StmtKind::If { cond, then, else_ } => self.lower_if(cond, then, else_.as_deref()),
            StmtKind::For { var, var_ty, start, end, body } => {
                self.lower_for(var.as_str(), var_ty, start, end, body)
            }
            StmtKind::Break => match self.current_loop() {
                Some((_, break_to)) => {
                    self.b.terminate(Terminator::Jump(break_to));
                    Ok(())
                }
                None => Err(self
                    .dcx()
                    .err(DiagKind::Malformed, "`break` outside of a loop")
                    .span(stmt.span)
                    .emit()),
            },
            StmtKind::Continue => match self.current_loop() {
                Some((continue_to, _)) => {
                    self.b.terminate(Terminator::Jump(continue_to));
                    Ok(())
                }
                None => Err(self
                    .dcx()
                    .err(DiagKind::Malformed, "`continue` outside of a loop")
                    .span(stmt.span)
                    .emit()),
            },
            StmtKind::Return(value) => self.lower_return(value.as_ref()),
            StmtKind::Assert(cond) => {
                let v = self.lower_value(cond)?;
                let fail = self.bool_not(v);
                self.check_panic(fail, PANIC_ASSERT)
            }
            StmtKind::Raise => self.lower_raise(),
        }
    }

    fn lower_if(
        &mut self,
        cond: &'cx Expr,
        then: &'cx [Stmt],
        else_: Option<&'cx [Stmt]>,
    ) -> Result<(), ErrorGuaranteed> {
        let c = self.lower_value(cond)?;
        let then_blk = self.b.new_block();
        let join = self.b.new_block();
        let else_blk = else_.map(|_| self.b.new_block());
        self.b.terminate(Terminator::Branch {
            cond: c,
            then_blk,
            else_blk: else_blk.unwrap_or(join),
        });

        self.b.switch_to(then_blk);
        self.lower_block(then)?;
        if !self.b.is_terminated() {
            self.b.terminate(Terminator::Jump(join));
        }
        if let (Some(else_blk), Some(else_body)) = (else_blk, else_) {
            self.b.switch_to(else_blk);
            self.lower_block(else_body)?;
            if !self.b.is_terminated() {
                self.b.terminate(Terminator::Jump(join));
            }
        }
        self.b.switch_to(join);
        Ok(())
    }

    /// `for var in range(start, end)`. The induction variable and the bound
    /// live in the frame; every loop edge is entered with an empty stack.
    fn lower_for(
        &mut self,
        var: &str,
        var_ty: &Type,
        start: &'cx Expr,
        end: &'cx Expr,
        body: &'cx [Stmt],
    ) -> Result<(), ErrorGuaranteed> {
        let iv = self.alloc_temp(var_ty);
        let iv_place = self.local_place(&iv);
        self.store_expr_into(&iv_place, start)?;
        let bound = self.alloc_temp(var_ty);
        let bound_place = self.local_place(&bound);
        self.store_expr_into(&bound_place, end)?;

        let header = self.b.new_block();
        let body_blk = self.b.new_block();
        let latch = self.b.new_block();
        let exit = self.b.new_block();
        self.b.terminate(Terminator::Jump(header));

        self.b.switch_to(header);
        let i_addr = self.b.const_u64(iv.offset);
        let i = self.b.mload(i_addr);
        let e_addr = self.b.const_u64(bound.offset);
        let e = self.b.mload(e_addr);
        let lt = if matches!(var_ty, Type::Int(_)) { BinaryOp::SLt } else { BinaryOp::Lt };
        let cond = self.b.binary(lt, i, e);
        self.b.terminate(Terminator::Branch { cond, then_blk: body_blk, else_blk: exit });

        self.b.switch_to(body_blk);
        self.push_param_scope(vec![(var.to_string(), iv.clone())]);
        self.push_loop(latch, exit);
        let res = self.lower_block(body);
        self.pop_loop();
        self.pop_param_scope();
        res?;
        if !self.b.is_terminated() {
            self.b.terminate(Terminator::Jump(latch));
        }

        // i < end <= the type's max, so the increment cannot overflow.
        self.b.switch_to(latch);
        let i_addr = self.b.const_u64(iv.offset);
        let i = self.b.mload(i_addr);
        let one = self.b.const_u64(1);
        let next = self.b.add(i, one);
        let i_addr = self.b.const_u64(iv.offset);
        self.b.mstore(i_addr, next);
        self.b.terminate(Terminator::Jump(header));

        self.b.switch_to(exit);
        Ok(())
    }

    fn lower_return(&mut self, value: Option<&'cx Expr>) -> Result<(), ErrorGuaranteed> {
        // Returns inside an inlined callee store to the call's result slot
        // and jump to its exit block.
        if let Some((ret_local, exit)) = self.current_inline() {
            if let (Some(local), Some(e)) = (&ret_local, value) {
                let place = self.local_place(local);
                self.store_expr_into(&place, e)?;
            }
            self.b.terminate(Terminator::Jump(exit));
            return Ok(());
        }

        match (self.ret_buf(), value) {
            (Some(buf), Some(e)) => {
                let place = self.local_place(&buf);
                self.store_expr_into(&place, e)?;
                let addr = self.b.const_u64(buf.offset);
                let len = self.b.const_u64(self.size_of(&buf.ty));
                self.b.terminate(Terminator::Return { addr, len });
                Ok(())
            }
            (None, None) => {
                self.b.terminate(Terminator::Stop);
                Ok(())
            }
            _ => {
                let span = value.map(|e| e.span).unwrap_or_default();
                Err(self
                    .dcx()
                    .err(DiagKind::Malformed, "return value does not match the signature")
                    .span(span)
                    .emit())
            }
        }
    }
}

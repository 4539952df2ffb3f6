//! Greedy per-block stack scheduling.
//!
//! Blocks are scheduled in control-flow discovery order from the entry, so
//! a label is bound for exactly the reachable blocks. Within a block a list
//! scheduler orders the instructions: data dependencies and a memory and
//! storage access chain fix the partial order, and among ready instructions
//! the one whose result is consumed soonest goes first, ties broken by
//! program order. An operand still needed afterwards is `DUP`ed; a last-use
//! operand is consumed in place or swapped to the top; dead slots are
//! dropped nearest-to-top first. Every `DUP`/`SWAP` depth and the model
//! depth at each instruction boundary are checked against the 16-slot
//! window; exceeding it is a deterministic fatal diagnostic naming the
//! function, and aborts that function only.

use crate::{
    analysis::Liveness,
    emit::asm::{AsmInst, Assembler, Label, Opcode},
    ir::{BinaryOp, BlockId, Function, InstKind, Terminator, UnaryOp, ValueId},
    stack::{StackModel, STACK_WINDOW},
};
use krait_data_structures::{index::IndexVec, map::FxHashMap};
use krait_interface::{DiagCtxt, DiagKind, ErrorGuaranteed};

/// Schedules `func` into `asm`. `entry_label` is bound at the function's
/// entry block so the dispatcher can reference it before scheduling runs.
/// For constructors, `Stop` terminators jump to `ctor_exit` (the deploy
/// epilogue) instead of halting.
#[tracing::instrument(level = "debug", skip_all, fields(func = %func.name))]
pub fn schedule_function(
    dcx: &DiagCtxt,
    func: &Function,
    asm: &mut Assembler,
    entry_label: Label,
    ctor_exit: Option<Label>,
) -> Result<(), ErrorGuaranteed> {
    let liveness = Liveness::compute(func);
    let mut labels: IndexVec<BlockId, Label> = IndexVec::new();
    for id in func.block_ids() {
        labels.push(if id == func.entry { entry_label } else { asm.new_label() });
    }
    Scheduler {
        dcx,
        func,
        liveness,
        asm,
        labels,
        stack: StackModel::new(),
        entry_stacks: IndexVec::from(vec![None; func.blocks.len()]),
        ctor_exit,
    }
    .run()
}

struct Scheduler<'a> {
    dcx: &'a DiagCtxt,
    func: &'a Function,
    liveness: Liveness,
    asm: &'a mut Assembler,
    labels: IndexVec<BlockId, Label>,
    stack: StackModel,
    /// Stack contents each block starts with, recorded when a predecessor
    /// flows into it.
    entry_stacks: IndexVec<BlockId, Option<Vec<ValueId>>>,
    ctor_exit: Option<Label>,
}

/// Ordering class of an instruction with respect to memory and storage.
enum Effect {
    Pure,
    Read,
    Write,
}

fn effect_of(kind: &InstKind) -> Effect {
    match kind {
        InstKind::Const(_)
        | InstKind::Unary(..)
        | InstKind::Binary(..)
        | InstKind::CalldataLoad(_)
        | InstKind::CalldataSize
        | InstKind::CodeSize
        | InstKind::Caller => Effect::Pure,
        InstKind::MLoad(_) | InstKind::SLoad(_) | InstKind::Keccak { .. } => Effect::Read,
        InstKind::MStore { .. }
        | InstKind::SStore { .. }
        | InstKind::CalldataCopy { .. }
        | InstKind::CodeCopy { .. } => Effect::Write,
    }
}

impl Scheduler<'_> {
    fn run(mut self) -> Result<(), ErrorGuaranteed> {
        self.entry_stacks[self.func.entry] = Some(Vec::new());

        // A block is scheduled once some predecessor has recorded its entry
        // stack; block numbering plays no role, so a join that only its
        // later-numbered arm falls into is still reached.
        let mut done: IndexVec<BlockId, bool> =
            IndexVec::from(vec![false; self.func.blocks.len()]);
        let mut worklist = vec![self.func.entry];
        while let Some(id) = worklist.pop() {
            if std::mem::replace(&mut done[id], true) {
                continue;
            }
            let entry = self.entry_stacks[id]
                .clone()
                .unwrap_or_else(|| panic!("no entry stack for {id:?} in {}", self.func.name));
            self.stack = if self.is_junk_tolerant(id) {
                StackModel::new()
            } else {
                StackModel::from_slots(entry)
            };
            self.asm.emit(AsmInst::Bind(self.labels[id]));
            self.schedule_block(id)?;
            if let Some(term) = &self.func.block(id).terminator {
                for succ in term.successors() {
                    if !done[succ] && self.entry_stacks[succ].is_some() {
                        worklist.push(succ);
                    }
                }
            }
        }
        Ok(())
    }

    fn schedule_block(&mut self, id: BlockId) -> Result<(), ErrorGuaranteed> {
        let order = self.block_order(id);

        // Entries dead on arrival (a value live into a sibling successor
        // but not here) are dropped up front.
        loop {
            let dead = self
                .stack
                .slots()
                .iter()
                .rev()
                .position(|&v| !self.liveness.live_in[id].contains(v))
                .map(|p| p + 1);
            match dead {
                Some(d) => self.drop_at(d)?,
                None => break,
            }
        }

        for pos in 0..order.len() {
            let v = order[pos];
            let kind = &self.func.inst(v).kind;
            let ops = kind.operands();
            self.materialize(id, &order, pos, &ops)?;
            for _ in &ops {
                self.stack.pop();
            }
            self.emit_inst(kind);
            if kind.has_result() {
                self.stack.push(v);
            }
            self.drop_dead(id, &order, pos)?;
            if self.stack.len() > STACK_WINDOW {
                return Err(self.too_deep());
            }
        }

        let term = self
            .func
            .block(id)
            .terminator
            .as_ref()
            .unwrap_or_else(|| panic!("unterminated block {id:?} in {}", self.func.name));
        self.schedule_terminator(id, &order, term)
    }

    /// Orders a block's instructions for emission. Data dependencies and
    /// the read/write chain over memory and storage are hard edges; among
    /// the ready instructions the soonest-consumed result goes first.
    fn block_order(&self, id: BlockId) -> Vec<ValueId> {
        let insts = &self.func.block(id).insts;
        let n = insts.len();
        let mut pos_of: FxHashMap<ValueId, usize> = FxHashMap::default();
        for (i, &v) in insts.iter().enumerate() {
            pos_of.insert(v, i);
        }

        let mut pending = vec![0usize; n];
        let mut users: Vec<Vec<usize>> = vec![Vec::new(); n];
        let mut last_write: Option<usize> = None;
        let mut reads_since: Vec<usize> = Vec::new();
        for (i, &v) in insts.iter().enumerate() {
            for op in self.func.inst(v).kind.operands() {
                if let Some(&p) = pos_of.get(&op) {
                    users[p].push(i);
                    pending[i] += 1;
                }
            }
            match effect_of(&self.func.inst(v).kind) {
                Effect::Pure => {}
                Effect::Read => {
                    if let Some(w) = last_write {
                        users[w].push(i);
                        pending[i] += 1;
                    }
                    reads_since.push(i);
                }
                Effect::Write => {
                    if let Some(w) = last_write {
                        users[w].push(i);
                        pending[i] += 1;
                    }
                    for &r in &reads_since {
                        users[r].push(i);
                        pending[i] += 1;
                    }
                    last_write = Some(i);
                    reads_since.clear();
                }
            }
        }

        // First consumer of each result, in original positions; the
        // terminator counts as position `n`. An instruction without a
        // result counts as its own consumer so it runs as soon as its
        // operands exist and releases them. Results consumed only by
        // successor blocks sort last.
        let term = self.func.block(id).terminator.as_ref();
        let mut next_use = vec![usize::MAX; n];
        for (i, &v) in insts.iter().enumerate() {
            if !self.func.inst(v).kind.has_result() {
                next_use[i] = i;
                continue;
            }
            for (j, &u) in insts.iter().enumerate().skip(i + 1) {
                if self.func.inst(u).kind.operands().contains(&v) {
                    next_use[i] = j;
                    break;
                }
            }
            if next_use[i] == usize::MAX {
                if let Some(t) = term {
                    if t.operands().contains(&v) {
                        next_use[i] = n;
                    }
                }
            }
        }

        let mut order = Vec::with_capacity(n);
        let mut placed = vec![false; n];
        for _ in 0..n {
            let mut best: Option<usize> = None;
            for i in 0..n {
                if placed[i] || pending[i] > 0 {
                    continue;
                }
                let better = match best {
                    None => true,
                    Some(b) => (next_use[i], i) < (next_use[b], b),
                };
                if better {
                    best = Some(i);
                }
            }
            let i = best
                .unwrap_or_else(|| panic!("dependency cycle in {id:?} of {}", self.func.name));
            placed[i] = true;
            for &u in &users[i] {
                pending[u] -= 1;
            }
            order.push(insts[i]);
        }
        order
    }

    fn schedule_terminator(
        &mut self,
        id: BlockId,
        order: &[ValueId],
        term: &Terminator,
    ) -> Result<(), ErrorGuaranteed> {
        let pos = order.len();
        match *term {
            Terminator::Jump(target) => {
                self.flow_into(target)?;
                self.asm.push_label(self.labels[target]);
                self.asm.op(Opcode::Jump);
            }
            Terminator::Branch { cond, then_blk, else_blk } => {
                self.materialize(id, order, pos, &[cond])?;
                self.stack.pop();
                self.asm.push_label(self.labels[then_blk]);
                self.asm.op(Opcode::JumpI);
                self.flow_into(then_blk)?;
                self.flow_into(else_blk)?;
                self.asm.push_label(self.labels[else_blk]);
                self.asm.op(Opcode::Jump);
            }
            Terminator::Return { addr, len } => {
                self.materialize(id, order, pos, &[addr, len])?;
                self.stack.pop();
                self.stack.pop();
                self.asm.op(Opcode::Return);
            }
            Terminator::Revert { addr, len } => {
                self.materialize(id, order, pos, &[addr, len])?;
                self.stack.pop();
                self.stack.pop();
                self.asm.op(Opcode::Revert);
            }
            Terminator::Stop => match self.ctor_exit {
                Some(exit) if self.func.is_constructor => {
                    self.asm.push_label(exit);
                    self.asm.op(Opcode::Jump);
                }
                _ => self.asm.op(Opcode::Stop),
            },
        }
        Ok(())
    }

    /// Brings `ops` onto the top of the stack, first operand ending on top.
    fn materialize(
        &mut self,
        block: BlockId,
        order: &[ValueId],
        pos: usize,
        ops: &[ValueId],
    ) -> Result<(), ErrorGuaranteed> {
        let k = ops.len();

        // Fast path: the top slots already hold the operands in order, and
        // consuming them strands nothing (anything needed later has another
        // copy below or can be rematerialized).
        let in_place = k <= self.stack.len()
            && (0..k).all(|j| self.stack.at_depth(j + 1) == ops[j])
            && (0..k).all(|j| {
                let x = ops[j];
                !self.used_after(block, order, pos, x)
                    || self.stack.depth_of_below(x, k).is_some()
                    || matches!(self.func.inst(x).kind, InstKind::Const(_))
            });
        if in_place {
            return Ok(());
        }

        for i in (0..k).rev() {
            let x = ops[i];
            // Slots holding the already-materialized operands ops[i+1..];
            // copies of x in there are reserved and cannot serve ops[i].
            let reserved = k - 1 - i;
            let d = match self.stack.depth_of_below(x, reserved) {
                Some(d) => d,
                None => {
                    // A constant with no free copy left is rematerialized in
                    // place instead of being kept alive across the block.
                    let kind = self.func.inst(x).kind.clone();
                    debug_assert!(
                        matches!(kind, InstKind::Const(_)),
                        "operand v{} not on stack",
                        x.index()
                    );
                    self.emit_inst(&kind);
                    self.stack.push(x);
                    continue;
                }
            };
            let pending = ops[..i].iter().filter(|&&o| o == x).count();
            let needed_later = pending > 0 || self.used_after(block, order, pos, x);

            if needed_later {
                self.dup(d)?;
            } else if reserved == 0 && d == 1 {
                // Already in place.
            } else if reserved == 0 {
                self.swap(d - 1)?;
            } else if reserved == 1 && d == 2 {
                // Directly beneath the one materialized operand; a single
                // swap puts both in order. Equal values need no swap.
                if self.stack.at_depth(1) != self.stack.at_depth(2) {
                    self.swap(1)?;
                }
            } else {
                // Buried beneath other operands; copy it and let the drop
                // pass reclaim the dead original.
                self.dup(d)?;
            }
        }
        Ok(())
    }

    /// Pops every slot whose value has no remaining use, nearest the top
    /// first.
    fn drop_dead(
        &mut self,
        block: BlockId,
        order: &[ValueId],
        pos: usize,
    ) -> Result<(), ErrorGuaranteed> {
        loop {
            let dead = self
                .stack
                .slots()
                .iter()
                .rev()
                .position(|&v| !self.used_after(block, order, pos, v))
                .map(|p| p + 1);
            match dead {
                Some(d) => self.drop_at(d)?,
                None => return Ok(()),
            }
        }
    }

    fn drop_at(&mut self, depth: usize) -> Result<(), ErrorGuaranteed> {
        if depth > 1 {
            self.swap(depth - 1)?;
        }
        self.asm.op(Opcode::Pop);
        self.stack.pop();
        Ok(())
    }

    /// Whether `v` is consumed after schedule position `pos`: by a later
    /// instruction, by the terminator, or by a successor block. When `pos`
    /// is the terminator itself only successor liveness counts; the
    /// operands being materialized there are current, not later, uses.
    fn used_after(&self, block: BlockId, order: &[ValueId], pos: usize, v: ValueId) -> bool {
        for &later in order.iter().skip(pos + 1) {
            if self.func.inst(later).kind.operands().contains(&v) {
                return true;
            }
        }
        if pos < order.len() {
            if let Some(term) = &self.func.block(block).terminator {
                if term.operands().contains(&v) {
                    return true;
                }
            }
        }
        self.liveness.live_out[block].contains(v)
    }

    /// Records or checks the stack shape flowing into `target`.
    fn flow_into(&mut self, target: BlockId) -> Result<(), ErrorGuaranteed> {
        if self.is_junk_tolerant(target) {
            self.entry_stacks[target].get_or_insert_with(Vec::new);
            return Ok(());
        }
        match &self.entry_stacks[target] {
            None => {
                self.entry_stacks[target] = Some(self.stack.slots().to_vec());
                Ok(())
            }
            Some(expected) => {
                debug_assert_eq!(
                    expected.as_slice(),
                    self.stack.slots(),
                    "inconsistent stack flowing into {target:?} of {}",
                    self.func.name
                );
                Ok(())
            }
        }
    }

    /// Blocks that never read their incoming stack: terminal blocks with no
    /// live-in values, such as shared revert blocks. They are scheduled
    /// against an empty model and leave any junk beneath them.
    fn is_junk_tolerant(&self, id: BlockId) -> bool {
        let block = self.func.block(id);
        let terminal = block
            .terminator
            .as_ref()
            .is_some_and(|t| t.successors().is_empty());
        terminal && self.liveness.live_in[id].is_empty()
    }

    fn dup(&mut self, depth: usize) -> Result<(), ErrorGuaranteed> {
        if depth > STACK_WINDOW {
            return Err(self.too_deep());
        }
        self.asm.emit(AsmInst::Dup(depth as u8));
        self.stack.dup(depth);
        Ok(())
    }

    fn swap(&mut self, n: usize) -> Result<(), ErrorGuaranteed> {
        if n > STACK_WINDOW {
            return Err(self.too_deep());
        }
        self.asm.emit(AsmInst::Swap(n as u8));
        self.stack.swap(n);
        Ok(())
    }

    fn too_deep(&self) -> ErrorGuaranteed {
        self.dcx
            .err(
                DiagKind::StackTooDeep,
                format!("stack too deep in function `{}`", self.func.name),
            )
            .span(self.func.span)
            .emit()
    }

    fn emit_inst(&mut self, kind: &InstKind) {
        match kind {
            InstKind::Const(c) => self.asm.push(*c),
            InstKind::Unary(op, _) => self.asm.op(match op {
                UnaryOp::IsZero => Opcode::IsZero,
                UnaryOp::Not => Opcode::Not,
            }),
            InstKind::Binary(op, ..) => self.asm.op(binary_opcode(*op)),
            InstKind::MLoad(_) => self.asm.op(Opcode::MLoad),
            InstKind::MStore { .. } => self.asm.op(Opcode::MStore),
            InstKind::SLoad(_) => self.asm.op(Opcode::SLoad),
            InstKind::SStore { .. } => self.asm.op(Opcode::SStore),
            InstKind::CalldataLoad(_) => self.asm.op(Opcode::CalldataLoad),
            InstKind::CalldataSize => self.asm.op(Opcode::CalldataSize),
            InstKind::CalldataCopy { .. } => self.asm.op(Opcode::CalldataCopy),
            InstKind::CodeSize => self.asm.op(Opcode::CodeSize),
            InstKind::CodeCopy { .. } => self.asm.op(Opcode::CodeCopy),
            InstKind::Keccak { .. } => self.asm.op(Opcode::Keccak256),
            InstKind::Caller => self.asm.op(Opcode::Caller),
        }
    }
}

fn binary_opcode(op: BinaryOp) -> Opcode {
    match op {
        BinaryOp::Add => Opcode::Add,
        BinaryOp::Sub => Opcode::Sub,
        BinaryOp::Mul => Opcode::Mul,
        BinaryOp::Div => Opcode::Div,
        BinaryOp::SDiv => Opcode::SDiv,
        BinaryOp::Mod => Opcode::Mod,
        BinaryOp::SMod => Opcode::SMod,
        BinaryOp::Lt => Opcode::Lt,
        BinaryOp::Gt => Opcode::Gt,
        BinaryOp::SLt => Opcode::SLt,
        BinaryOp::SGt => Opcode::SGt,
        BinaryOp::Eq => Opcode::Eq,
        BinaryOp::And => Opcode::And,
        BinaryOp::Or => Opcode::Or,
        BinaryOp::Xor => Opcode::Xor,
        BinaryOp::Shl => Opcode::Shl,
        BinaryOp::Shr => Opcode::Shr,
        BinaryOp::Sar => Opcode::Sar,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::FunctionBuilder;
    use alloy_primitives::U256;
    use krait_interface::Span;

    fn schedule(func: &Function) -> (Vec<AsmInst>, Result<(), ErrorGuaranteed>, DiagCtxt) {
        let dcx = DiagCtxt::new();
        let mut asm = Assembler::new(krait_interface::EvmVersion::default());
        let entry = asm.new_label();
        let res = schedule_function(&dcx, func, &mut asm, entry, None);
        (asm.insts().to_vec(), res, dcx)
    }

    #[test]
    fn straight_line_add_store() {
        let mut b = FunctionBuilder::new("f", Span::DUMMY);
        let one = b.const_u64(1);
        let two = b.const_u64(2);
        let sum = b.add(one, two);
        let addr = b.const_u64(0x80);
        b.mstore(addr, sum);
        b.terminate(Terminator::Stop);
        let f = b.finish();

        let (insts, res, _) = schedule(&f);
        assert!(res.is_ok());
        assert_eq!(
            insts,
            [
                AsmInst::Bind(Label::new(0)),
                AsmInst::Push(U256::from(1u8)),
                AsmInst::Push(U256::from(2u8)),
                AsmInst::Swap(1),
                AsmInst::Op(Opcode::Add),
                // MSTORE wants the address on top of the value.
                AsmInst::Push(U256::from(0x80u8)),
                AsmInst::Op(Opcode::MStore),
                AsmInst::Op(Opcode::Stop),
            ]
        );
    }

    #[test]
    fn reused_value_is_duplicated() {
        let mut b = FunctionBuilder::new("f", Span::DUMMY);
        let x = b.const_u64(5);
        let sq = b.mul(x, x);
        let addr = b.const_u64(0x80);
        b.mstore(addr, sq);
        b.terminate(Terminator::Stop);
        let f = b.finish();

        let (insts, res, _) = schedule(&f);
        assert!(res.is_ok());
        let dups = insts.iter().filter(|i| matches!(i, AsmInst::Dup(_))).count();
        assert_eq!(dups, 1);
    }

    #[test]
    fn distant_operands_wait_for_their_consumers() {
        // 7 feeds the second store; as written it is pushed first, but the
        // scheduler defers it past the whole first store.
        let mut b = FunctionBuilder::new("f", Span::DUMMY);
        let late = b.const_u64(7);
        let one = b.const_u64(1);
        let two = b.const_u64(2);
        let sum = b.add(one, two);
        let addr = b.const_u64(0x80);
        b.mstore(addr, sum);
        let addr2 = b.const_u64(0xa0);
        b.mstore(addr2, late);
        b.terminate(Terminator::Stop);
        let f = b.finish();

        let (insts, res, _) = schedule(&f);
        assert!(res.is_ok());
        let push_seven = insts
            .iter()
            .position(|i| matches!(i, AsmInst::Push(v) if *v == U256::from(7u8)))
            .unwrap();
        let first_store = insts
            .iter()
            .position(|i| matches!(i, AsmInst::Op(Opcode::MStore)))
            .unwrap();
        assert!(push_seven > first_store, "{insts:?}");
    }

    #[test]
    fn too_many_live_values_is_deterministic_error() {
        // 17 loads stay live across a check branch; no ordering fits them
        // in the window.
        let mut b = FunctionBuilder::new("wide", Span::DUMMY);
        let fail_blk = b.new_block();
        let cont = b.new_block();
        let mut vals = Vec::new();
        for i in 0..17u64 {
            let addr = b.const_u64(0x80 + 32 * i);
            vals.push(b.mload(addr));
        }
        let cond = b.const_u64(0);
        b.terminate(Terminator::Branch { cond, then_blk: fail_blk, else_blk: cont });

        b.switch_to(fail_blk);
        let zero = b.const_u64(0);
        b.terminate(Terminator::Revert { addr: zero, len: zero });

        b.switch_to(cont);
        let mut acc = vals[0];
        for &v in &vals[1..] {
            acc = b.add(acc, v);
        }
        let addr = b.const_u64(0x80);
        b.mstore(addr, acc);
        b.terminate(Terminator::Stop);
        let f = b.finish();

        let (_, res, dcx) = schedule(&f);
        assert!(res.is_err());
        let rendered = dcx.rendered();
        assert_eq!(rendered.len(), 1);
        assert!(rendered[0].contains("stack too deep in function `wide`"), "{rendered:?}");
    }

    #[test]
    fn value_crosses_check_branch() {
        // A value computed before a branch is consumed in the continuation;
        // the revert arm leaves the stack alone.
        let mut b = FunctionBuilder::new("f", Span::DUMMY);
        let panic_blk = b.new_block();
        let cont = b.new_block();

        let r = b.const_u64(9);
        let cond = b.const_u64(0);
        b.terminate(Terminator::Branch { cond, then_blk: panic_blk, else_blk: cont });

        b.switch_to(panic_blk);
        let zero = b.const_u64(0);
        b.terminate(Terminator::Revert { addr: zero, len: zero });

        b.switch_to(cont);
        let addr = b.const_u64(0x80);
        b.mstore(addr, r);
        b.terminate(Terminator::Stop);
        let f = b.finish();

        let (insts, res, _) = schedule(&f);
        assert!(res.is_ok());
        // The continuation block must not re-push 9; it arrives on the stack.
        let pushes_of_nine = insts
            .iter()
            .filter(|i| matches!(i, AsmInst::Push(v) if *v == U256::from(9u8)))
            .count();
        assert_eq!(pushes_of_nine, 1);
    }

    #[test]
    fn join_reached_only_through_the_second_arm() {
        // Block numbering puts the join before the arm that falls into it;
        // the first arm halts. The join must still be scheduled and bound.
        let mut b = FunctionBuilder::new("f", Span::DUMMY);
        let then_blk = b.new_block();
        let join = b.new_block();
        let else_blk = b.new_block();

        let cond = b.const_u64(1);
        b.terminate(Terminator::Branch { cond, then_blk, else_blk });

        b.switch_to(then_blk);
        let zero = b.const_u64(0);
        b.terminate(Terminator::Revert { addr: zero, len: zero });

        b.switch_to(else_blk);
        let addr = b.const_u64(0x80);
        let two = b.const_u64(2);
        b.mstore(addr, two);
        b.terminate(Terminator::Jump(join));

        b.switch_to(join);
        b.terminate(Terminator::Stop);
        let f = b.finish();

        let (insts, res, _) = schedule(&f);
        assert!(res.is_ok());
        let binds = insts.iter().filter(|i| matches!(i, AsmInst::Bind(_))).count();
        assert_eq!(binds, 4, "{insts:?}");
    }
}

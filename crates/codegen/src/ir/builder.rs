//! Construction of IR functions.

use super::{
    BinaryOp, Block, BlockId, Function, Inst, InstKind, Terminator, UnaryOp, ValueId,
};
use alloy_primitives::U256;
use krait_ast::Type;
use krait_data_structures::index::IndexVec;
use krait_interface::Span;

/// Builds one [`Function`] block by block. Instructions go to the current
/// block; pushing into a terminated block is a bug and panics via
/// `debug_assert`.
pub struct FunctionBuilder {
    func: Function,
    current: BlockId,
    span: Span,
}

impl FunctionBuilder {
    pub fn new(name: impl Into<String>, span: Span) -> Self {
        let mut blocks = IndexVec::new();
        let entry = blocks.push(Block::default());
        Self {
            func: Function {
                name: name.into(),
                span,
                is_constructor: false,
                selector: None,
                args_size: 0,
                ret: None,
                insts: IndexVec::new(),
                blocks,
                entry,
            },
            current: entry,
            span,
        }
    }

    pub fn func_mut(&mut self) -> &mut Function {
        &mut self.func
    }

    pub fn finish(self) -> Function {
        self.func
    }

    /// Source span attached to subsequently built instructions.
    pub fn set_span(&mut self, span: Span) {
        self.span = span;
    }

    pub fn entry(&self) -> BlockId {
        self.func.entry
    }

    pub fn current_block(&self) -> BlockId {
        self.current
    }

    pub fn new_block(&mut self) -> BlockId {
        self.func.blocks.push(Block::default())
    }

    pub fn switch_to(&mut self, block: BlockId) {
        self.current = block;
    }

    pub fn is_terminated(&self) -> bool {
        self.func.blocks[self.current].is_terminated()
    }

    /// Pushes an instruction into the current block.
    pub fn inst(&mut self, kind: InstKind) -> ValueId {
        debug_assert!(
            !self.is_terminated(),
            "instruction after terminator in {:?}",
            self.current
        );
        let id = self.func.insts.push(Inst { kind, span: self.span });
        self.func.blocks[self.current].insts.push(id);
        id
    }

    pub fn terminate(&mut self, terminator: Terminator) {
        debug_assert!(!self.is_terminated(), "double terminator in {:?}", self.current);
        self.func.blocks[self.current].terminator = Some(terminator);
    }

    /// Terminates with a jump and switches to the target.
    pub fn jump_to(&mut self, target: BlockId) {
        self.terminate(Terminator::Jump(target));
        self.switch_to(target);
    }

    pub fn const_(&mut self, value: U256) -> ValueId {
        self.inst(InstKind::Const(value))
    }

    pub fn const_u64(&mut self, value: u64) -> ValueId {
        self.const_(U256::from(value))
    }

    pub fn binary(&mut self, op: BinaryOp, a: ValueId, b: ValueId) -> ValueId {
        self.inst(InstKind::Binary(op, a, b))
    }

    pub fn unary(&mut self, op: UnaryOp, a: ValueId) -> ValueId {
        self.inst(InstKind::Unary(op, a))
    }

    pub fn iszero(&mut self, a: ValueId) -> ValueId {
        self.unary(UnaryOp::IsZero, a)
    }

    pub fn add(&mut self, a: ValueId, b: ValueId) -> ValueId {
        self.binary(BinaryOp::Add, a, b)
    }

    pub fn mul(&mut self, a: ValueId, b: ValueId) -> ValueId {
        self.binary(BinaryOp::Mul, a, b)
    }

    pub fn mload(&mut self, addr: ValueId) -> ValueId {
        self.inst(InstKind::MLoad(addr))
    }

    pub fn mstore(&mut self, addr: ValueId, value: ValueId) {
        self.inst(InstKind::MStore { addr, value });
    }

    pub fn sload(&mut self, slot: ValueId) -> ValueId {
        self.inst(InstKind::SLoad(slot))
    }

    pub fn sstore(&mut self, slot: ValueId, value: ValueId) {
        self.inst(InstKind::SStore { slot, value });
    }

    pub fn keccak(&mut self, addr: ValueId, len: ValueId) -> ValueId {
        self.inst(InstKind::Keccak { addr, len })
    }
}

/// Builder-level metadata setters, applied once at function start.
impl FunctionBuilder {
    pub fn set_constructor(&mut self) {
        self.func.is_constructor = true;
    }

    pub fn set_selector(&mut self, selector: [u8; 4]) {
        self.func.selector = Some(selector);
    }

    pub fn set_args_size(&mut self, size: u64) {
        self.func.args_size = size;
    }

    pub fn set_ret(&mut self, ret: Option<Type>) {
        self.func.ret = ret;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_a_diamond() {
        let mut b = FunctionBuilder::new("f", Span::DUMMY);
        let then_blk = b.new_block();
        let else_blk = b.new_block();
        let join = b.new_block();

        let cond = b.const_u64(1);
        b.terminate(Terminator::Branch { cond, then_blk, else_blk });

        b.switch_to(then_blk);
        b.jump_to(join);
        // jump_to switched us to join; fill else_blk next.
        b.switch_to(else_blk);
        b.terminate(Terminator::Jump(join));

        b.switch_to(join);
        b.terminate(Terminator::Stop);

        let f = b.finish();
        assert!(f.validate().is_ok());
        assert_eq!(f.predecessor_counts()[join], 2);
    }

    #[test]
    fn unterminated_reachable_block_fails_validation() {
        let mut b = FunctionBuilder::new("f", Span::DUMMY);
        let next = b.new_block();
        b.terminate(Terminator::Jump(next));
        let f = b.finish();
        assert!(f.validate().is_err());
    }
}

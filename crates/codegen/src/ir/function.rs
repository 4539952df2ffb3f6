//! IR functions and modules.

use super::{Block, BlockId, FuncId, Inst, Terminator, ValueId};
use krait_ast::Type;
use krait_data_structures::index::IndexVec;
use krait_interface::Span;

/// One compiled function: the constructor or an externally dispatched
/// function. Internal functions are inlined during lowering and never
/// appear here.
#[derive(Clone, Debug)]
pub struct Function {
    pub name: String,
    pub span: Span,
    pub is_constructor: bool,
    /// Dispatch selector; `None` for the constructor.
    pub selector: Option<[u8; 4]>,
    /// Static size in bytes of the encoded arguments.
    pub args_size: u64,
    pub ret: Option<Type>,
    pub insts: IndexVec<ValueId, Inst>,
    pub blocks: IndexVec<BlockId, Block>,
    pub entry: BlockId,
}

impl Function {
    pub fn inst(&self, value: ValueId) -> &Inst {
        &self.insts[value]
    }

    pub fn block(&self, id: BlockId) -> &Block {
        &self.blocks[id]
    }

    pub fn block_ids(&self) -> impl Iterator<Item = BlockId> + '_ {
        self.blocks.indices()
    }

    /// Predecessor counts, indexed by block.
    pub fn predecessor_counts(&self) -> IndexVec<BlockId, u32> {
        let mut counts: IndexVec<BlockId, u32> = IndexVec::from(vec![0u32; self.blocks.len()]);
        for block in self.blocks.iter() {
            if let Some(term) = &block.terminator {
                for succ in term.successors() {
                    counts[succ] += 1;
                }
            }
        }
        counts
    }

    /// Checks the structural invariants: every reachable block terminated,
    /// all referenced blocks and values in range.
    pub fn validate(&self) -> Result<(), String> {
        let mut stack = vec![self.entry];
        let mut seen = vec![false; self.blocks.len()];
        while let Some(id) = stack.pop() {
            if std::mem::replace(&mut seen[id.index()], true) {
                continue;
            }
            let block = &self.blocks[id];
            let Some(term) = &block.terminator else {
                return Err(format!("{}: block {id:?} is not terminated", self.name));
            };
            if let Terminator::Branch { then_blk, else_blk, .. } = term {
                if then_blk == else_blk {
                    return Err(format!("{}: branch with equal targets in {id:?}", self.name));
                }
            }
            stack.extend(term.successors());
        }
        Ok(())
    }
}

/// The IR of one contract module, ready for scheduling and emission.
#[derive(Clone, Debug, Default)]
pub struct IrModule {
    pub name: String,
    pub functions: IndexVec<FuncId, Function>,
}

impl IrModule {
    pub fn constructor(&self) -> Option<&Function> {
        self.functions.iter().find(|f| f.is_constructor)
    }

    /// Dispatched functions, in declaration order.
    pub fn runtime_functions(&self) -> impl Iterator<Item = (FuncId, &Function)> {
        self.functions.iter_enumerated().filter(|(_, f)| !f.is_constructor)
    }
}

//! Per-block liveness, by backward dataflow over dense bitsets.

use crate::ir::{BlockId, Function, ValueId};
use krait_data_structures::index::{Idx, IndexVec};

/// A dense bitset over the values of one function.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LiveSet {
    words: Vec<u64>,
}

impl LiveSet {
    pub fn new(num_values: usize) -> Self {
        Self { words: vec![0; num_values.div_ceil(64)] }
    }

    pub fn contains(&self, v: ValueId) -> bool {
        let i = v.index();
        self.words[i / 64] & (1 << (i % 64)) != 0
    }

    /// Returns `true` if the value was newly inserted.
    pub fn insert(&mut self, v: ValueId) -> bool {
        let i = v.index();
        let word = &mut self.words[i / 64];
        let bit = 1 << (i % 64);
        let new = *word & bit == 0;
        *word |= bit;
        new
    }

    pub fn remove(&mut self, v: ValueId) {
        let i = v.index();
        self.words[i / 64] &= !(1 << (i % 64));
    }

    /// Unions `other` in; returns `true` if anything changed.
    pub fn union_with(&mut self, other: &Self) -> bool {
        let mut changed = false;
        for (a, b) in self.words.iter_mut().zip(&other.words) {
            let old = *a;
            *a |= b;
            changed |= *a != old;
        }
        changed
    }

    pub fn is_empty(&self) -> bool {
        self.words.iter().all(|&w| w == 0)
    }

    pub fn count(&self) -> usize {
        self.words.iter().map(|w| w.count_ones() as usize).sum()
    }

    pub fn iter(&self) -> impl Iterator<Item = ValueId> + '_ {
        self.words.iter().enumerate().flat_map(|(wi, &w)| {
            (0..64)
                .filter(move |b| w & (1 << b) != 0)
                .map(move |b| ValueId::from_usize(wi * 64 + b))
        })
    }
}

/// Live-in and live-out sets per block.
#[derive(Debug)]
pub struct Liveness {
    pub live_in: IndexVec<BlockId, LiveSet>,
    pub live_out: IndexVec<BlockId, LiveSet>,
}

impl Liveness {
    /// Computes liveness for `func` with a backward worklist.
    pub fn compute(func: &Function) -> Self {
        let n = func.insts.len();
        let num_blocks = func.blocks.len();
        let mut live_in: IndexVec<BlockId, LiveSet> =
            IndexVec::from(vec![LiveSet::new(n); num_blocks]);
        let mut live_out: IndexVec<BlockId, LiveSet> =
            IndexVec::from(vec![LiveSet::new(n); num_blocks]);

        let mut preds: IndexVec<BlockId, Vec<BlockId>> =
            IndexVec::from(vec![Vec::new(); num_blocks]);
        for (id, block) in func.blocks.iter_enumerated() {
            if let Some(term) = &block.terminator {
                for succ in term.successors() {
                    preds[succ].push(id);
                }
            }
        }

        // Seed with every block; `pop` takes the highest ID first, which is
        // back to front for the block orders lowering produces.
        let mut worklist: Vec<BlockId> = (0..num_blocks).map(BlockId::from_usize).collect();
        while let Some(id) = worklist.pop() {
            let block = &func.blocks[id];

            let mut out = LiveSet::new(n);
            if let Some(term) = &block.terminator {
                for succ in term.successors() {
                    out.union_with(&live_in[succ]);
                }
            }

            let mut live = out.clone();
            if let Some(term) = &block.terminator {
                for v in term.operands() {
                    live.insert(v);
                }
            }
            for &v in block.insts.iter().rev() {
                let inst = &func.insts[v];
                if inst.kind.has_result() {
                    live.remove(v);
                }
                for op in inst.kind.operands() {
                    live.insert(op);
                }
            }

            live_out[id] = out;
            if live != live_in[id] {
                live_in[id] = live;
                for &p in &preds[id] {
                    if !worklist.contains(&p) {
                        worklist.push(p);
                    }
                }
            }
        }

        Self { live_in, live_out }
    }
}

//! The abstract operand stack.

use crate::ir::ValueId;
use smallvec::SmallVec;

/// Deepest slot `DUP`/`SWAP` can reach.
pub const STACK_WINDOW: usize = 16;

/// Tracks which value occupies each stack slot during scheduling. The same
/// value may occupy several slots once duplicated; each slot is an
/// independent copy.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct StackModel {
    /// Bottom to top.
    slots: SmallVec<[ValueId; 32]>,
}

impl StackModel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_slots(slots: impl IntoIterator<Item = ValueId>) -> Self {
        Self { slots: slots.into_iter().collect() }
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Bottom-to-top slot contents.
    pub fn slots(&self) -> &[ValueId] {
        &self.slots
    }

    pub fn top(&self) -> Option<ValueId> {
        self.slots.last().copied()
    }

    /// 1-based depth of the shallowest copy of `v`; 1 is the top.
    pub fn depth_of(&self, v: ValueId) -> Option<usize> {
        self.slots.iter().rev().position(|&s| s == v).map(|p| p + 1)
    }

    /// Like [`depth_of`](Self::depth_of), ignoring the top `skip` slots.
    pub fn depth_of_below(&self, v: ValueId, skip: usize) -> Option<usize> {
        if skip >= self.slots.len() {
            return None;
        }
        self.slots[..self.slots.len() - skip]
            .iter()
            .rev()
            .position(|&s| s == v)
            .map(|p| p + 1 + skip)
    }

    /// Value at 1-based depth `d`.
    pub fn at_depth(&self, d: usize) -> ValueId {
        self.slots[self.slots.len() - d]
    }

    pub fn push(&mut self, v: ValueId) {
        self.slots.push(v);
    }

    pub fn pop(&mut self) -> Option<ValueId> {
        self.slots.pop()
    }

    /// Models `SWAPn`: exchanges the top with depth `n + 1`.
    pub fn swap(&mut self, n: usize) {
        let len = self.slots.len();
        self.slots.swap(len - 1, len - 1 - n);
    }

    /// Models `DUPn`: copies depth `n` to a new top slot.
    pub fn dup(&mut self, n: usize) {
        self.push(self.at_depth(n));
    }

    /// Number of slots holding values for which `live` returns false.
    pub fn dead_slots(&self, mut live: impl FnMut(ValueId) -> bool) -> usize {
        self.slots.iter().filter(|&&v| !live(v)).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use krait_data_structures::index::Idx;

    fn v(i: usize) -> ValueId {
        ValueId::from_usize(i)
    }

    #[test]
    fn depth_is_one_based_from_top() {
        let m = StackModel::from_slots([v(0), v(1), v(2)]);
        assert_eq!(m.depth_of(v(2)), Some(1));
        assert_eq!(m.depth_of(v(0)), Some(3));
        assert_eq!(m.depth_of(v(9)), None);
    }

    #[test]
    fn swap_and_dup_model_the_opcodes() {
        let mut m = StackModel::from_slots([v(0), v(1), v(2)]);
        m.swap(2); // SWAP2
        assert_eq!(m.slots(), [v(2), v(1), v(0)]);
        m.dup(3); // DUP3
        assert_eq!(m.slots(), [v(2), v(1), v(0), v(2)]);
    }
}

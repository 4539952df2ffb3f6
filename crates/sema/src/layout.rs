//! Storage and memory layout assignment.

use alloy_primitives::{keccak256, B256, U256};
use krait_ast::{ty::WORD_BYTES, Module, Structs, Type};
use krait_data_structures::map::FxIndexMap;

/// Where a storage variable lives.
///
/// `byte_offset` is always zero under word-granularity packing; the field
/// exists so packed layouts can be introduced without changing consumers.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StorageSlot {
    pub base_slot: U256,
    pub byte_offset: u32,
    pub ty: Type,
}

/// The frozen storage layout of a module: declaration order, each variable
/// occupying `storage_words()` consecutive slots.
#[derive(Clone, Debug, Default)]
pub struct Layout {
    slots: FxIndexMap<String, StorageSlot>,
    used_slots: U256,
}

impl Layout {
    /// Assigns slots to every storage variable of `module`.
    pub fn of(module: &Module) -> Self {
        let mut layout = Self::default();
        let mut next = U256::ZERO;
        for var in &module.storage {
            let words = var.ty.storage_words(&module.structs);
            let slot = StorageSlot { base_slot: next, byte_offset: 0, ty: var.ty.clone() };
            tracing::trace!(name = %var.name, slot = %next, words, "storage slot");
            layout.slots.insert(var.name.name.clone(), slot);
            next += U256::from(words);
        }
        layout.used_slots = next;
        layout
    }

    pub fn slot(&self, name: &str) -> Option<&StorageSlot> {
        self.slots.get(name)
    }

    /// Total directly-addressed slots (hashed regions excluded).
    pub fn used_slots(&self) -> U256 {
        self.used_slots
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &StorageSlot)> {
        self.slots.iter().map(|(k, v)| (k.as_str(), v))
    }
}

/// Base slot of a dynamic array's element region: `keccak256(base_slot)`.
/// Element `i` of element-width `w` lives at `keccak256(base) + i * w`.
pub fn dyn_array_data_slot(base_slot: U256) -> U256 {
    U256::from_be_bytes(keccak256(B256::from(base_slot)).0)
}

/// Slot of a mapping value: `keccak256(key_word ++ base_slot)`.
pub fn mapping_value_slot(key_word: U256, base_slot: U256) -> U256 {
    let mut buf = [0u8; 64];
    buf[..32].copy_from_slice(&key_word.to_be_bytes::<32>());
    buf[32..].copy_from_slice(&base_slot.to_be_bytes::<32>());
    U256::from_be_bytes(keccak256(buf).0)
}

/// Assigns memory offsets to a function's locals. The region below
/// [`MemFrame::BASE`] is reserved for scratch and the hash buffer.
#[derive(Clone, Debug)]
pub struct MemFrame {
    next: u64,
}

impl MemFrame {
    /// First byte available to locals.
    pub const BASE: u64 = 0x80;
    /// Scratch words for keccak input live at 0x00..0x40.
    pub const HASH_SCRATCH: u64 = 0x00;

    pub fn new() -> Self {
        Self { next: Self::BASE }
    }

    /// Reserves memory for a value of `ty` and returns its byte offset.
    /// Encodable types only; callers verify region legality first.
    pub fn alloc(&mut self, ty: &Type, structs: &Structs) -> u64 {
        let size = ty.max_encoded_size(structs).unwrap_or(WORD_BYTES as u64);
        let at = self.next;
        self.next += size;
        at
    }

    /// Reserves raw words.
    pub fn alloc_words(&mut self, words: u64) -> u64 {
        let at = self.next;
        self.next += words * WORD_BYTES as u64;
        at
    }

    /// One past the highest allocated byte.
    pub fn high_water(&self) -> u64 {
        self.next
    }
}

impl Default for MemFrame {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use krait_ast::{Ident, VarDecl};
    use krait_interface::Span;

    fn var(name: &str, ty: Type) -> VarDecl {
        VarDecl { name: Ident::new(name, Span::DUMMY), ty }
    }

    #[test]
    fn slots_follow_declaration_order() {
        let module = Module {
            storage: vec![
                var("a", Type::U256),
                var("b", Type::FixedArray(Box::new(Type::U256), 3)),
                var("c", Type::Mapping(Box::new(Type::Address), Box::new(Type::U256))),
                var("d", Type::Bool),
            ],
            ..Default::default()
        };
        let layout = Layout::of(&module);
        assert_eq!(layout.slot("a").unwrap().base_slot, U256::from(0u8));
        assert_eq!(layout.slot("b").unwrap().base_slot, U256::from(1u8));
        assert_eq!(layout.slot("c").unwrap().base_slot, U256::from(4u8));
        assert_eq!(layout.slot("d").unwrap().base_slot, U256::from(5u8));
        assert_eq!(layout.used_slots(), U256::from(6u8));
    }

    #[test]
    fn hashed_regions_match_reference_values() {
        // keccak256(bytes32(2)) and keccak256(bytes32(1) ++ bytes32(3)).
        let dyn_base = dyn_array_data_slot(U256::from(2u8));
        assert_eq!(
            dyn_base,
            U256::from_be_bytes(keccak256(B256::from(U256::from(2u8))).0)
        );
        let map_slot = mapping_value_slot(U256::from(1u8), U256::from(3u8));
        let mut buf = [0u8; 64];
        buf[31] = 1;
        buf[63] = 3;
        assert_eq!(map_slot, U256::from_be_bytes(keccak256(buf).0));
    }

    #[test]
    fn mem_frame_is_bump_allocated() {
        let structs = Structs::new();
        let mut frame = MemFrame::new();
        assert_eq!(frame.alloc(&Type::U256, &structs), 0x80);
        let arr = Type::DynArray(Box::new(Type::U256), 3);
        assert_eq!(frame.alloc(&arr, &structs), 0xa0);
        assert_eq!(frame.high_water(), 0xa0 + 32 + 3 * 32);
    }
}

//! Value, container, and storage types.

use krait_data_structures::{index::IndexVec, newtype_index};
use std::fmt::Write;

/// Bytes per VM word.
pub const WORD_BYTES: u32 = 32;

newtype_index! {
    /// A struct definition in the module's [`Structs`] table.
    pub struct StructId;
}

/// Side table of struct definitions, indexed by [`StructId`].
///
/// `Type` stays `Copy`-free but cheap to clone by keeping struct bodies out
/// of line; all size and signature queries thread `&Structs` through.
pub type Structs = IndexVec<StructId, StructDef>;

/// A struct definition.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StructDef {
    pub name: String,
    pub fields: Vec<StructField>,
}

impl StructDef {
    /// Returns the index and type of the named field.
    pub fn field(&self, name: &str) -> Option<(usize, &Type)> {
        self.fields.iter().enumerate().find(|(_, f)| f.name == name).map(|(i, f)| (i, &f.ty))
    }
}

/// A single struct field.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StructField {
    pub name: String,
    pub ty: Type,
}

/// The type of a value, variable, or expression.
///
/// Every operation below is structural recursion over the variants; there is
/// no per-container special-casing beyond the scalar base cases.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum Type {
    /// `uintN`, `8 <= N <= 256`, multiple of 8.
    Uint(u16),
    /// `intN`, `8 <= N <= 256`, multiple of 8.
    Int(u16),
    Bool,
    Address,
    /// `bytesN`, `1 <= N <= 32`.
    FixedBytes(u8),
    /// `T[n]` with a compile-time length.
    FixedArray(Box<Type>, u64),
    /// Bounded dynamic array: runtime length `<= bound`, static capacity.
    DynArray(Box<Type>, u64),
    /// Storage-only key/value mapping.
    Mapping(Box<Type>, Box<Type>),
    Struct(StructId),
}

impl Type {
    pub const U256: Self = Self::Uint(256);
    pub const I128: Self = Self::Int(128);

    /// Returns `true` for types that fit a single stack word.
    pub fn is_value_type(&self) -> bool {
        matches!(
            self,
            Self::Uint(_) | Self::Int(_) | Self::Bool | Self::Address | Self::FixedBytes(_)
        )
    }

    /// Returns `true` if any part of the type has a runtime-varying length.
    pub fn is_dynamic(&self, structs: &Structs) -> bool {
        match self {
            Self::DynArray(..) => true,
            Self::FixedArray(elem, _) => elem.is_dynamic(structs),
            Self::Struct(id) => structs[*id].fields.iter().any(|f| f.ty.is_dynamic(structs)),
            _ => false,
        }
    }

    /// Returns `true` if the type may appear in memory or calldata.
    ///
    /// Mappings are storage-only; a mapping anywhere inside a type poisons it.
    pub fn is_encodable(&self, structs: &Structs) -> bool {
        match self {
            Self::Mapping(..) => false,
            Self::FixedArray(elem, _) | Self::DynArray(elem, _) => elem.is_encodable(structs),
            Self::Struct(id) => structs[*id].fields.iter().all(|f| f.ty.is_encodable(structs)),
            _ => true,
        }
    }

    /// Maximum encoded size in bytes when the type lives in memory, calldata,
    /// or returndata. Dynamic arrays encode as one length word followed by
    /// `bound` fixed-stride element slots, so every encodable type has a
    /// static size. `None` for storage-only types and for bounds so large
    /// the size arithmetic overflows.
    pub fn max_encoded_size(&self, structs: &Structs) -> Option<u64> {
        Some(match self {
            Self::Uint(_) | Self::Int(_) | Self::Bool | Self::Address | Self::FixedBytes(_) => {
                WORD_BYTES as u64
            }
            Self::FixedArray(elem, len) => elem.max_encoded_size(structs)?.checked_mul(*len)?,
            Self::DynArray(elem, bound) => elem
                .max_encoded_size(structs)?
                .checked_mul(*bound)?
                .checked_add(WORD_BYTES as u64)?,
            Self::Mapping(..) => return None,
            Self::Struct(id) => {
                let mut size = 0u64;
                for f in &structs[*id].fields {
                    size = size.checked_add(f.ty.max_encoded_size(structs)?)?;
                }
                size
            }
        })
    }

    /// Encoded size in words. Same precondition as [`max_encoded_size`].
    ///
    /// [`max_encoded_size`]: Self::max_encoded_size
    pub fn encoded_words(&self, structs: &Structs) -> Option<u64> {
        self.max_encoded_size(structs).map(|b| b / WORD_BYTES as u64)
    }

    /// Number of consecutive storage slots the type occupies at its base
    /// position. Dynamic arrays and mappings hold one slot here; their
    /// contents live at hashed slots.
    pub fn storage_words(&self, structs: &Structs) -> u64 {
        match self {
            Self::Uint(_) | Self::Int(_) | Self::Bool | Self::Address | Self::FixedBytes(_) => 1,
            Self::FixedArray(elem, len) => elem.storage_words(structs) * len,
            Self::DynArray(..) | Self::Mapping(..) => 1,
            Self::Struct(id) => {
                structs[*id].fields.iter().map(|f| f.ty.storage_words(structs)).sum()
            }
        }
    }

    /// Canonical signature fragment used when hashing function selectors.
    pub fn abi_signature(&self, structs: &Structs) -> String {
        let mut s = String::new();
        self.write_abi_signature(structs, &mut s);
        s
    }

    fn write_abi_signature(&self, structs: &Structs, out: &mut String) {
        match self {
            Self::Uint(bits) => {
                let _ = write!(out, "uint{bits}");
            }
            Self::Int(bits) => {
                let _ = write!(out, "int{bits}");
            }
            Self::Bool => out.push_str("bool"),
            Self::Address => out.push_str("address"),
            Self::FixedBytes(n) => {
                let _ = write!(out, "bytes{n}");
            }
            Self::FixedArray(elem, len) => {
                elem.write_abi_signature(structs, out);
                let _ = write!(out, "[{len}]");
            }
            Self::DynArray(elem, _) => {
                elem.write_abi_signature(structs, out);
                out.push_str("[]");
            }
            // Mappings never reach a signature; sema rejects them in
            // external positions before selectors are computed.
            Self::Mapping(..) => out.push_str("<mapping>"),
            Self::Struct(id) => {
                out.push('(');
                for (i, f) in structs[*id].fields.iter().enumerate() {
                    if i > 0 {
                        out.push(',');
                    }
                    f.ty.write_abi_signature(structs, out);
                }
                out.push(')');
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn point(structs: &mut Structs) -> StructId {
        structs.push(StructDef {
            name: "Point".into(),
            fields: vec![
                StructField { name: "x".into(), ty: Type::U256 },
                StructField { name: "y".into(), ty: Type::U256 },
            ],
        })
    }

    #[test]
    fn scalar_sizes() {
        let structs = Structs::new();
        for ty in [Type::Uint(8), Type::Int(128), Type::Bool, Type::Address, Type::FixedBytes(4)] {
            assert_eq!(ty.max_encoded_size(&structs), Some(32));
            assert_eq!(ty.storage_words(&structs), 1);
            assert!(ty.is_value_type());
        }
    }

    #[test]
    fn nested_dyn_array_sizes() {
        let structs = Structs::new();
        // DynArray[DynArray[uint256, 3], 3]: outer length word plus three
        // inner (length word + 3 elements) blocks.
        let inner = Type::DynArray(Box::new(Type::U256), 3);
        let outer = Type::DynArray(Box::new(inner), 3);
        assert_eq!(outer.max_encoded_size(&structs), Some(32 + 3 * (32 + 3 * 32)));
        assert_eq!(outer.storage_words(&structs), 1);
        assert!(outer.is_dynamic(&structs));
    }

    #[test]
    fn struct_sizes_sum_fields() {
        let mut structs = Structs::new();
        let id = point(&mut structs);
        let ty = Type::Struct(id);
        assert_eq!(ty.max_encoded_size(&structs), Some(64));
        assert_eq!(ty.storage_words(&structs), 2);
        assert_eq!(ty.abi_signature(&structs), "(uint256,uint256)");
    }

    #[test]
    fn overflowing_bound_has_no_encoded_size() {
        let structs = Structs::new();
        let ty = Type::FixedArray(Box::new(Type::U256), u64::MAX);
        assert_eq!(ty.max_encoded_size(&structs), None);
        assert_eq!(ty.encoded_words(&structs), None);
    }

    #[test]
    fn mapping_is_storage_only() {
        let structs = Structs::new();
        let ty = Type::Mapping(Box::new(Type::Address), Box::new(Type::U256));
        assert!(!ty.is_encodable(&structs));
        assert_eq!(ty.max_encoded_size(&structs), None);
        assert_eq!(ty.storage_words(&structs), 1);
    }

    #[test]
    fn abi_signatures() {
        let structs = Structs::new();
        assert_eq!(Type::U256.abi_signature(&structs), "uint256");
        assert_eq!(
            Type::FixedArray(Box::new(Type::Int(128)), 4).abi_signature(&structs),
            "int128[4]"
        );
        assert_eq!(
            Type::DynArray(Box::new(Type::U256), 10).abi_signature(&structs),
            "uint256[]"
        );
    }
}

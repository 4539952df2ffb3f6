//! Region-crossing copies.
//!
//! One recursive routine moves any encodable value between storage, memory,
//! and calldata, dispatching on type structure: scalars load and store one
//! word, fixed arrays iterate, dynamic arrays move the length word plus the
//! live elements, structs recurse per field. Calldata is untrusted, so
//! decoding checks every word against its type's canonical form: lengths
//! against the array bound, narrow scalars against their value range.

use super::{expr::Region, FuncLower, Place};
use crate::ir::{BinaryOp, InstKind, Terminator, ValueId};
use krait_ast::Type;
use krait_interface::{DiagKind, ErrorGuaranteed};
use krait_sema::eval::uint_max;

/// Element count of a copy loop.
#[derive(Clone, Copy)]
enum Count {
    Const(u64),
    Runtime(ValueId),
}

/// Fixed-length copies up to this many elements are unrolled.
const UNROLL_LIMIT: u64 = 4;

impl<'cx> FuncLower<'cx> {
    /// Copies a value of `dst.ty` from `src` to `dst`. Source and
    /// destination types match; sema has already rejected storage-only
    /// types in encodable positions.
    pub(crate) fn copy_value(&mut self, dst: &Place, src: &Place) -> Result<(), ErrorGuaranteed> {
        debug_assert_eq!(dst.ty, src.ty);
        // A value needing no per-word checks has identical calldata and
        // memory encodings, so one bulk copy replaces the recursion.
        if src.region == Region::Calldata
            && dst.region == Region::Memory
            && !self.decode_needs_check(&dst.ty)
        {
            let len = self.b.const_u64(self.size_of(&dst.ty));
            self.b.inst(InstKind::CalldataCopy { dst: dst.addr, src: src.addr, len });
            return Ok(());
        }
        if dst.ty.is_value_type() {
            let v = self.load_scalar(src);
            if src.region == Region::Calldata {
                self.check_decoded_scalar(v, &dst.ty)?;
            }
            self.store_scalar(dst, v);
            return Ok(());
        }
        match dst.ty.clone() {
            Type::FixedArray(elem, len) => {
                self.copy_elements(dst, dst.addr, src, src.addr, &elem, Count::Const(len))
            }
            Type::DynArray(elem, bound) => {
                let len = self.load_len(src);
                if src.region == Region::Calldata {
                    let bound_v = self.b.const_u64(bound);
                    let over = self.b.binary(BinaryOp::Gt, len, bound_v);
                    self.check_revert(over)?;
                }
                let len_dst = Place { region: dst.region, addr: dst.addr, ty: Type::U256 };
                self.store_scalar(&len_dst, len);
                let dst_data = self.dyn_data_addr(dst);
                let src_data = self.dyn_data_addr(src);
                self.copy_elements(dst, dst_data, src, src_data, &elem, Count::Runtime(len))
            }
            Type::Struct(id) => {
                let fields = &self.structs()[id].fields;
                let mut dst_off = 0u64;
                let mut src_off = 0u64;
                for field in fields {
                    let d_addr = self.offset_addr(dst.addr, dst_off);
                    let s_addr = self.offset_addr(src.addr, src_off);
                    let d = Place { region: dst.region, addr: d_addr, ty: field.ty.clone() };
                    let s = Place { region: src.region, addr: s_addr, ty: field.ty.clone() };
                    self.copy_value(&d, &s)?;
                    dst_off += self.region_stride(dst.region, &field.ty);
                    src_off += self.region_stride(src.region, &field.ty);
                }
                Ok(())
            }
            // Scalars returned above; only mappings remain.
            _ => Err(self
                .dcx()
                .err(DiagKind::InvalidRegionCrossing, "mappings cannot be copied")
                .emit()),
        }
    }

    /// Validates a freshly decoded value in memory: dynamic lengths against
    /// their bounds, narrow scalars against their ranges. Constructor
    /// arguments arrive as one code-copied blob, so the checks run after
    /// the copy rather than during it.
    pub(crate) fn validate_decoded(&mut self, place: &Place) -> Result<(), ErrorGuaranteed> {
        if place.ty.is_value_type() {
            if self.decode_needs_check(&place.ty) {
                let v = self.load_scalar(place);
                self.check_decoded_scalar(v, &place.ty)?;
            }
            return Ok(());
        }
        match place.ty.clone() {
            Type::FixedArray(elem, len) => {
                if !self.decode_needs_check(&elem) {
                    return Ok(());
                }
                self.for_each_element(place.region, place.addr, &elem, Count::Const(len), |l, p| {
                    l.validate_decoded(&p)
                })
            }
            Type::DynArray(elem, bound) => {
                let len = self.load_len(place);
                let bound_v = self.b.const_u64(bound);
                let over = self.b.binary(BinaryOp::Gt, len, bound_v);
                self.check_revert(over)?;
                if !self.decode_needs_check(&elem) {
                    return Ok(());
                }
                let data = self.dyn_data_addr(place);
                self.for_each_element(place.region, data, &elem, Count::Runtime(len), |l, p| {
                    l.validate_decoded(&p)
                })
            }
            Type::Struct(id) => {
                let fields = &self.structs()[id].fields;
                let mut off = 0u64;
                for field in fields {
                    if self.decode_needs_check(&field.ty) {
                        let addr = self.offset_addr(place.addr, off);
                        let p =
                            Place { region: place.region, addr, ty: field.ty.clone() };
                        self.validate_decoded(&p)?;
                    }
                    off += self.region_stride(place.region, &field.ty);
                }
                Ok(())
            }
            // Scalars returned above; only mappings remain.
            _ => Err(self
                .dcx()
                .err(DiagKind::InvalidRegionCrossing, "mappings cannot be decoded")
                .emit()),
        }
    }

    /// Whether decoding a value of `ty` can observe a non-canonical word
    /// that must be rejected. Full-width scalars admit every word; dynamic
    /// arrays always carry an untrusted length.
    fn decode_needs_check(&self, ty: &Type) -> bool {
        match ty {
            Type::Uint(bits) | Type::Int(bits) => *bits < 256,
            Type::Bool | Type::Address => true,
            Type::FixedBytes(n) => *n < 32,
            Type::FixedArray(elem, _) => self.decode_needs_check(elem),
            Type::DynArray(..) => true,
            Type::Struct(id) => {
                self.structs()[*id].fields.iter().any(|f| self.decode_needs_check(&f.ty))
            }
            Type::Mapping(..) => false,
        }
    }

    /// Reverts unless `v` is the canonical word encoding of scalar `ty`.
    fn check_decoded_scalar(&mut self, v: ValueId, ty: &Type) -> Result<(), ErrorGuaranteed> {
        match *ty {
            Type::Uint(bits) if bits < 256 => {
                let max = self.b.const_(uint_max(bits));
                let over = self.b.binary(BinaryOp::Gt, v, max);
                self.check_revert(over)
            }
            Type::Int(bits) if bits < 256 => {
                // Canonical exactly when sign extension is the identity.
                let ext = self.sign_extend(v, bits);
                let same = self.b.binary(BinaryOp::Eq, v, ext);
                let fail = self.bool_not(same);
                self.check_revert(fail)
            }
            Type::Bool => {
                let one = self.b.const_u64(1);
                let over = self.b.binary(BinaryOp::Gt, v, one);
                self.check_revert(over)
            }
            Type::Address => {
                let max = self.b.const_(uint_max(160));
                let over = self.b.binary(BinaryOp::Gt, v, max);
                self.check_revert(over)
            }
            Type::FixedBytes(n) if n < 32 => {
                // Left-aligned; everything past the data bytes must be zero.
                let by = self.b.const_u64(u64::from(n) * 8);
                let tail = self.b.binary(BinaryOp::Shl, v, by);
                self.check_revert(tail)
            }
            _ => Ok(()),
        }
    }

    /// Element stride in the region's address units: bytes for memory and
    /// calldata, slots for storage.
    fn region_stride(&self, region: Region, ty: &Type) -> u64 {
        match region {
            Region::Memory | Region::Calldata => self.size_of(ty),
            Region::Storage => ty.storage_words(self.structs()),
        }
    }

    fn copy_elements(
        &mut self,
        dst: &Place,
        dst_data: ValueId,
        src: &Place,
        src_data: ValueId,
        elem: &Type,
        count: Count,
    ) -> Result<(), ErrorGuaranteed> {
        if let Count::Const(n) = count {
            if n <= UNROLL_LIMIT {
                let d_stride = self.region_stride(dst.region, elem);
                let s_stride = self.region_stride(src.region, elem);
                for i in 0..n {
                    let d_addr = self.offset_addr(dst_data, i * d_stride);
                    let s_addr = self.offset_addr(src_data, i * s_stride);
                    let d = Place { region: dst.region, addr: d_addr, ty: elem.clone() };
                    let s = Place { region: src.region, addr: s_addr, ty: elem.clone() };
                    self.copy_value(&d, &s)?;
                }
                return Ok(());
            }
        }
        let dst_region = dst.region;
        let src_region = src.region;
        self.count_loop(count, |l, i| {
            let d_addr = l.elem_addr(dst_region, dst_data, i, elem);
            let s_addr = l.elem_addr(src_region, src_data, i, elem);
            let d = Place { region: dst_region, addr: d_addr, ty: elem.clone() };
            let s = Place { region: src_region, addr: s_addr, ty: elem.clone() };
            l.copy_value(&d, &s)
        })
    }

    fn for_each_element(
        &mut self,
        region: Region,
        data: ValueId,
        elem: &Type,
        count: Count,
        mut body: impl FnMut(&mut Self, Place) -> Result<(), ErrorGuaranteed>,
    ) -> Result<(), ErrorGuaranteed> {
        self.count_loop(count, |l, i| {
            let addr = l.elem_addr(region, data, i, elem);
            body(l, Place { region, addr, ty: elem.clone() })
        })
    }

    /// Runs `body` for indexes `0..count`. The counter lives in a frame
    /// scratch word so loop edges carry no mutable stack state.
    fn count_loop(
        &mut self,
        count: Count,
        mut body: impl FnMut(&mut Self, ValueId) -> Result<(), ErrorGuaranteed>,
    ) -> Result<(), ErrorGuaranteed> {
        let ctr = self.alloc_scratch_word();
        let ctr_addr = self.b.const_u64(ctr);
        let zero = self.b.const_u64(0);
        self.b.mstore(ctr_addr, zero);
        let count_v = match count {
            Count::Const(n) => self.b.const_u64(n),
            Count::Runtime(v) => v,
        };

        let header = self.b.new_block();
        let body_blk = self.b.new_block();
        let exit = self.b.new_block();
        self.b.terminate(Terminator::Jump(header));

        self.b.switch_to(header);
        let ctr_addr = self.b.const_u64(ctr);
        let i = self.b.mload(ctr_addr);
        let cond = self.b.binary(BinaryOp::Lt, i, count_v);
        self.b.terminate(Terminator::Branch { cond, then_blk: body_blk, else_blk: exit });

        self.b.switch_to(body_blk);
        let ctr_addr = self.b.const_u64(ctr);
        let i = self.b.mload(ctr_addr);
        body(self, i)?;
        let ctr_addr = self.b.const_u64(ctr);
        let i = self.b.mload(ctr_addr);
        let one = self.b.const_u64(1);
        let next = self.b.add(i, one);
        let ctr_addr = self.b.const_u64(ctr);
        self.b.mstore(ctr_addr, next);
        self.b.terminate(Terminator::Jump(header));

        self.b.switch_to(exit);
        Ok(())
    }

    pub(crate) fn alloc_scratch_word(&mut self) -> u64 {
        self.frame_alloc_words(1)
    }
}

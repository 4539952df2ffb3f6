//! Abstract assembly and the two-pass assembler.
//!
//! The first pass sizes the code, iterating until the widths of
//! label-referencing pushes stabilize (widths only ever grow, so the loop
//! terminates). The second pass emits bytes with jump targets backpatched.

use alloy_primitives::U256;
use krait_data_structures::newtype_index;
use krait_interface::EvmVersion;

newtype_index! {
    /// A jump target, resolved to a byte offset at assembly time.
    pub struct Label;
}

/// Plain opcodes, excluding pushes, dups, and swaps.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum Opcode {
    Stop = 0x00,
    Add = 0x01,
    Mul = 0x02,
    Sub = 0x03,
    Div = 0x04,
    SDiv = 0x05,
    Mod = 0x06,
    SMod = 0x07,
    Lt = 0x10,
    Gt = 0x11,
    SLt = 0x12,
    SGt = 0x13,
    Eq = 0x14,
    IsZero = 0x15,
    And = 0x16,
    Or = 0x17,
    Xor = 0x18,
    Not = 0x19,
    Shl = 0x1b,
    Shr = 0x1c,
    Sar = 0x1d,
    Keccak256 = 0x20,
    Caller = 0x33,
    CalldataLoad = 0x35,
    CalldataSize = 0x36,
    CalldataCopy = 0x37,
    CodeSize = 0x38,
    CodeCopy = 0x39,
    Pop = 0x50,
    MLoad = 0x51,
    MStore = 0x52,
    SLoad = 0x54,
    SStore = 0x55,
    Jump = 0x56,
    JumpI = 0x57,
    JumpDest = 0x5b,
    Return = 0xf3,
    Revert = 0xfd,
    Invalid = 0xfe,
}

const PUSH0: u8 = 0x5f;
const PUSH1: u8 = 0x60;
const DUP1: u8 = 0x80;
const SWAP1: u8 = 0x90;

/// One abstract instruction.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AsmInst {
    Op(Opcode),
    /// Pushes a constant with the minimal width; zero becomes `PUSH0`.
    Push(U256),
    /// Pushes the resolved offset of a label.
    PushLabel(Label),
    /// `DUP1..=DUP16`.
    Dup(u8),
    /// `SWAP1..=SWAP16`.
    Swap(u8),
    /// Binds a label here and emits a `JUMPDEST`.
    Bind(Label),
    /// Binds a label here without emitting anything. Used for data offsets
    /// that are never jump targets, such as the embedded runtime segment.
    Mark(Label),
    /// Raw bytes appended verbatim.
    Verbatim(Vec<u8>),
}

/// Assembly failures. These are internal consistency errors, not user
/// diagnostics; the driver maps them to ICE-style reports.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum AsmError {
    #[error("label {0} is never bound")]
    UnboundLabel(Label),
    #[error("label {0} is bound more than once")]
    RedefinedLabel(Label),
    #[error("dup/swap depth {0} exceeds 16")]
    BadStackIndex(u8),
}

/// Collects abstract instructions and assembles them into bytecode.
#[derive(Debug, Default)]
pub struct Assembler {
    insts: Vec<AsmInst>,
    num_labels: u32,
    evm_version: EvmVersion,
}

impl Assembler {
    pub fn new(evm_version: EvmVersion) -> Self {
        Self { evm_version, ..Self::default() }
    }

    pub fn new_label(&mut self) -> Label {
        let label = Label::new(self.num_labels);
        self.num_labels += 1;
        label
    }

    pub fn emit(&mut self, inst: AsmInst) {
        self.insts.push(inst);
    }

    pub fn op(&mut self, op: Opcode) {
        self.emit(AsmInst::Op(op));
    }

    pub fn push(&mut self, value: U256) {
        self.emit(AsmInst::Push(value));
    }

    pub fn push_u64(&mut self, value: u64) {
        self.push(U256::from(value));
    }

    pub fn push_label(&mut self, label: Label) {
        self.emit(AsmInst::PushLabel(label));
    }

    pub fn bind(&mut self, label: Label) {
        self.emit(AsmInst::Bind(label));
    }

    pub fn insts(&self) -> &[AsmInst] {
        &self.insts
    }

    /// Assembles to bytes. `base` is the code offset the first instruction
    /// will live at in the final artifact; labels resolve relative to it.
    pub fn assemble(&self, base: usize) -> Result<Vec<u8>, AsmError> {
        let push0 = self.evm_version.supports_push0();
        let (offsets, widths) = self.resolve_labels(base)?;

        let mut out = Vec::new();
        for inst in &self.insts {
            match inst {
                AsmInst::Op(op) => out.push(*op as u8),
                AsmInst::Push(value) => push_bytes(&mut out, value.as_le_slice(), push0),
                AsmInst::PushLabel(label) => {
                    // Label pushes keep the width the size pass settled on,
                    // which can exceed the minimal width for the offset.
                    let width = widths[label.index()];
                    let be = (offsets[label.index()] as u64).to_be_bytes();
                    out.push(PUSH1 + width as u8 - 1);
                    out.extend_from_slice(&be[8 - width..]);
                }
                AsmInst::Dup(n) => {
                    check_stack_index(*n)?;
                    out.push(DUP1 + n - 1);
                }
                AsmInst::Swap(n) => {
                    check_stack_index(*n)?;
                    out.push(SWAP1 + n - 1);
                }
                AsmInst::Bind(_) => out.push(Opcode::JumpDest as u8),
                AsmInst::Mark(_) => {}
                AsmInst::Verbatim(bytes) => out.extend_from_slice(bytes),
            }
        }
        Ok(out)
    }

    /// Size pass: fixed-point over label push widths.
    fn resolve_labels(&self, base: usize) -> Result<(Vec<usize>, Vec<usize>), AsmError> {
        let push0 = self.evm_version.supports_push0();
        let mut widths = vec![1usize; self.num_labels as usize];
        let mut offsets = vec![usize::MAX; self.num_labels as usize];

        loop {
            let mut bound = vec![false; self.num_labels as usize];
            let mut at = base;
            for inst in &self.insts {
                at += match inst {
                    AsmInst::Op(_) | AsmInst::Dup(_) | AsmInst::Swap(_) | AsmInst::Bind(_) => 1,
                    AsmInst::Push(value) => 1 + push_width(value, push0),
                    AsmInst::PushLabel(label) => 1 + widths[label.index()],
                    AsmInst::Mark(_) => 0,
                    AsmInst::Verbatim(bytes) => bytes.len(),
                };
                match inst {
                    // The JUMPDEST byte itself is the target; marks point at
                    // whatever follows them.
                    AsmInst::Bind(label) | AsmInst::Mark(label) => {
                        if std::mem::replace(&mut bound[label.index()], true) {
                            return Err(AsmError::RedefinedLabel(*label));
                        }
                        let skip = usize::from(matches!(inst, AsmInst::Bind(_)));
                        offsets[label.index()] = at - skip;
                    }
                    _ => {}
                }
            }
            // Labels are created eagerly (one per block, including
            // unreachable ones); only referenced labels must be bound.
            for inst in &self.insts {
                if let AsmInst::PushLabel(label) = inst {
                    if !bound[label.index()] {
                        return Err(AsmError::UnboundLabel(*label));
                    }
                }
            }

            let mut stable = true;
            for inst in &self.insts {
                if let AsmInst::PushLabel(label) = inst {
                    let bits = usize::BITS - offsets[label.index()].leading_zeros();
                    let need = (bits as usize).div_ceil(8).max(1);
                    let width = &mut widths[label.index()];
                    if need > *width {
                        *width = need;
                        stable = false;
                    }
                }
            }
            if stable {
                return Ok((offsets, widths));
            }
        }
    }
}

/// Byte width of the minimal push for `value`. Zero is `PUSH0` with no
/// immediate when the target supports it, `PUSH1 0x00` otherwise.
fn push_width(value: &U256, push0: bool) -> usize {
    let width = (value.bit_len() + 7) / 8;
    if width == 0 && !push0 { 1 } else { width }
}

fn push_bytes(out: &mut Vec<u8>, le: &[u8], push0: bool) {
    let width = le.iter().rposition(|&b| b != 0).map_or(0, |i| i + 1);
    if width == 0 {
        if push0 {
            out.push(PUSH0);
        } else {
            out.push(PUSH1);
            out.push(0);
        }
        return;
    }
    out.push(PUSH1 + width as u8 - 1);
    out.extend(le[..width].iter().rev());
}

fn check_stack_index(n: u8) -> Result<(), AsmError> {
    if (1..=16).contains(&n) { Ok(()) } else { Err(AsmError::BadStackIndex(n)) }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minimal_push_widths() {
        let mut asm = Assembler::new(EvmVersion::default());
        asm.push(U256::ZERO);
        asm.push(U256::from(0x7fu8));
        asm.push(U256::from(0x1234u16));
        let bytes = asm.assemble(0).unwrap();
        assert_eq!(bytes, [0x5f, 0x60, 0x7f, 0x61, 0x12, 0x34]);
    }

    #[test]
    fn zero_pushes_an_immediate_before_shanghai() {
        let mut asm = Assembler::new(EvmVersion::Paris);
        asm.push(U256::ZERO);
        let bytes = asm.assemble(0).unwrap();
        assert_eq!(bytes, [0x60, 0x00]);
    }

    #[test]
    fn forward_jump_backpatched() {
        let mut asm = Assembler::new(EvmVersion::default());
        let target = asm.new_label();
        asm.push_label(target);
        asm.op(Opcode::Jump);
        asm.op(Opcode::Invalid);
        asm.bind(target);
        asm.op(Opcode::Stop);
        let bytes = asm.assemble(0).unwrap();
        // PUSH1 0x04, JUMP, INVALID, JUMPDEST, STOP
        assert_eq!(bytes, [0x60, 0x04, 0x56, 0xfe, 0x5b, 0x00]);
    }

    #[test]
    fn labels_respect_base_offset() {
        let mut asm = Assembler::new(EvmVersion::default());
        let target = asm.new_label();
        asm.bind(target);
        asm.push_label(target);
        asm.op(Opcode::Jump);
        let bytes = asm.assemble(0x100).unwrap();
        // JUMPDEST, PUSH2 0x0100, JUMP
        assert_eq!(bytes, [0x5b, 0x61, 0x01, 0x00, 0x56]);
    }

    #[test]
    fn unbound_label_is_an_error() {
        let mut asm = Assembler::new(EvmVersion::default());
        let label = asm.new_label();
        asm.push_label(label);
        assert_eq!(asm.assemble(0), Err(AsmError::UnboundLabel(label)));
    }

    #[test]
    fn width_growth_reaches_fixpoint() {
        // Enough padding that a late label needs a two-byte push from the
        // start of the code.
        let mut asm = Assembler::new(EvmVersion::default());
        let target = asm.new_label();
        asm.push_label(target);
        asm.op(Opcode::Jump);
        asm.emit(AsmInst::Verbatim(vec![0xfe; 300]));
        asm.bind(target);
        asm.op(Opcode::Stop);
        let bytes = asm.assemble(0).unwrap();
        let dest = 1 + 2 + 1 + 300;
        assert_eq!(bytes[0], 0x61);
        assert_eq!(&bytes[1..3], [(dest >> 8) as u8, dest as u8]);
        assert_eq!(bytes[dest], 0x5b);
    }
}

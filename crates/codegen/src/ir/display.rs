//! Human-readable IR dumps, used in tests and trace logging.

use super::{Function, InstKind, Terminator};
use std::fmt;

impl fmt::Display for Function {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "fn {}:", self.name)?;
        for (id, block) in self.blocks.iter_enumerated() {
            writeln!(f, "  b{}:", id.index())?;
            for &v in &block.insts {
                let inst = &self.insts[v];
                if inst.kind.has_result() {
                    writeln!(f, "    v{} = {}", v.index(), DisplayKind(&inst.kind))?;
                } else {
                    writeln!(f, "    {}", DisplayKind(&inst.kind))?;
                }
            }
            match &block.terminator {
                Some(term) => writeln!(f, "    {}", DisplayTerm(term))?,
                None => writeln!(f, "    <unterminated>")?,
            }
        }
        Ok(())
    }
}

struct DisplayKind<'a>(&'a InstKind);

impl fmt::Display for DisplayKind<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0 {
            InstKind::Const(c) => write!(f, "const {c}"),
            InstKind::Unary(op, a) => write!(f, "{op:?} v{}", a.index()),
            InstKind::Binary(op, a, b) => {
                write!(f, "{op:?} v{}, v{}", a.index(), b.index())
            }
            InstKind::MLoad(a) => write!(f, "mload v{}", a.index()),
            InstKind::MStore { addr, value } => {
                write!(f, "mstore v{}, v{}", addr.index(), value.index())
            }
            InstKind::SLoad(a) => write!(f, "sload v{}", a.index()),
            InstKind::SStore { slot, value } => {
                write!(f, "sstore v{}, v{}", slot.index(), value.index())
            }
            InstKind::CalldataLoad(a) => write!(f, "calldataload v{}", a.index()),
            InstKind::CalldataSize => write!(f, "calldatasize"),
            InstKind::CalldataCopy { dst, src, len } => write!(
                f,
                "calldatacopy v{}, v{}, v{}",
                dst.index(),
                src.index(),
                len.index()
            ),
            InstKind::CodeSize => write!(f, "codesize"),
            InstKind::CodeCopy { dst, src, len } => {
                write!(f, "codecopy v{}, v{}, v{}", dst.index(), src.index(), len.index())
            }
            InstKind::Keccak { addr, len } => {
                write!(f, "keccak v{}, v{}", addr.index(), len.index())
            }
            InstKind::Caller => write!(f, "caller"),
        }
    }
}

struct DisplayTerm<'a>(&'a Terminator);

impl fmt::Display for DisplayTerm<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self.0 {
            Terminator::Jump(t) => write!(f, "jump b{}", t.index()),
            Terminator::Branch { cond, then_blk, else_blk } => write!(
                f,
                "branch v{}, b{}, b{}",
                cond.index(),
                then_blk.index(),
                else_blk.index()
            ),
            Terminator::Return { addr, len } => {
                write!(f, "return v{}, v{}", addr.index(), len.index())
            }
            Terminator::Revert { addr, len } => {
                write!(f, "revert v{}, v{}", addr.index(), len.index())
            }
            Terminator::Stop => write!(f, "stop"),
        }
    }
}

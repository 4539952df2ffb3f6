//! Contract emission.
//!
//! The runtime segment opens with the selector dispatcher, followed by every
//! scheduled function body. The deploy segment is the scheduled constructor,
//! then a stub that code-copies the embedded runtime segment to memory and
//! returns it. Constructor arguments are appended after the runtime bytes by
//! the deployer and read relative to `CODESIZE`.

use crate::{
    emit::asm::{AsmError, AsmInst, Assembler, Opcode},
    ir::IrModule,
    stack::schedule_function,
};
use alloy_primitives::U256;
use krait_interface::{CompilerOpts, DiagCtxt, DiagKind, DispatchScheme, ErrorGuaranteed};
use krait_sema::{AbiFunction, Analysis};

/// The finished artifact.
#[derive(Clone, Debug)]
pub struct CompiledContract {
    /// Initcode: constructor plus the runtime-returning stub.
    pub deploy_code: Vec<u8>,
    /// The code that lives at the deployed address.
    pub runtime_code: Vec<u8>,
    /// External signatures, in declaration order.
    pub abi: Vec<AbiFunction>,
}

/// Schedules and assembles a lowered module into its two code segments.
#[tracing::instrument(level = "debug", skip_all, fields(module = %ir.name))]
pub fn emit_contract(
    dcx: &DiagCtxt,
    ir: &IrModule,
    analysis: &Analysis,
    opts: &CompilerOpts,
) -> Result<CompiledContract, ErrorGuaranteed> {
    let rt_asm = runtime_assembly(dcx, ir, opts)?;
    let runtime_code = rt_asm.assemble(0).map_err(|e| ice(dcx, e))?;
    let dep_asm = deploy_assembly(dcx, ir, &runtime_code, opts)?;
    let deploy_code = dep_asm.assemble(0).map_err(|e| ice(dcx, e))?;
    tracing::debug!(
        runtime = runtime_code.len(),
        deploy = deploy_code.len(),
        "assembled contract"
    );
    Ok(CompiledContract { deploy_code, runtime_code, abi: analysis.signatures.clone() })
}

/// Assembler faults are compiler bugs surfaced as diagnostics rather than
/// panics.
fn ice(dcx: &DiagCtxt, e: AsmError) -> ErrorGuaranteed {
    dcx.err(DiagKind::Malformed, format!("internal assembler failure: {e}")).emit()
}

/// Dispatcher plus every runtime function body. Scheduling failures batch
/// across functions.
fn runtime_assembly(
    dcx: &DiagCtxt,
    ir: &IrModule,
    opts: &CompilerOpts,
) -> Result<Assembler, ErrorGuaranteed> {
    let mut asm = Assembler::new(opts.evm_version);
    let funcs: Vec<_> = ir.runtime_functions().map(|(_, f)| f).collect();
    let entries: Vec<_> = funcs.iter().map(|_| asm.new_label()).collect();
    let fallback = asm.new_label();

    // Anything shorter than a selector goes to the fallback revert.
    asm.push_u64(4);
    asm.op(Opcode::CalldataSize);
    asm.op(Opcode::Lt);
    asm.push_label(fallback);
    asm.op(Opcode::JumpI);

    // selector = calldata[0..4], right-aligned.
    asm.push(U256::ZERO);
    asm.op(Opcode::CalldataLoad);
    asm.push_u64(0xe0);
    asm.op(Opcode::Shr);

    // Comparisons in ascending selector order, independent of declaration
    // order.
    let mut dispatch: Vec<_> = funcs
        .iter()
        .enumerate()
        .filter_map(|(i, f)| f.selector.map(|s| (u32::from_be_bytes(s), i)))
        .collect();
    dispatch.sort_unstable();
    match opts.dispatch {
        DispatchScheme::Linear => {
            for &(selector, i) in &dispatch {
                asm.emit(AsmInst::Dup(1));
                asm.push_u64(u64::from(selector));
                asm.op(Opcode::Eq);
                asm.push_label(entries[i]);
                asm.op(Opcode::JumpI);
            }
        }
    }
    asm.bind(fallback);
    asm.push(U256::ZERO);
    asm.push(U256::ZERO);
    asm.op(Opcode::Revert);

    let mut guar = None;
    for (i, func) in funcs.iter().enumerate() {
        if let Err(g) = schedule_function(dcx, func, &mut asm, entries[i], None) {
            guar = Some(g);
        }
    }
    match guar {
        None => Ok(asm),
        Some(guar) => Err(guar),
    }
}

/// Constructor code, the runtime-returning stub, and the runtime bytes.
fn deploy_assembly(
    dcx: &DiagCtxt,
    ir: &IrModule,
    runtime: &[u8],
    opts: &CompilerOpts,
) -> Result<Assembler, ErrorGuaranteed> {
    let mut asm = Assembler::new(opts.evm_version);
    let ctor_exit = asm.new_label();
    if let Some(ctor) = ir.constructor() {
        let entry = asm.new_label();
        schedule_function(dcx, ctor, &mut asm, entry, Some(ctor_exit))?;
    }

    // CODECOPY(0, runtime_start, len); RETURN(0, len).
    asm.bind(ctor_exit);
    let rt_start = asm.new_label();
    asm.push_u64(runtime.len() as u64);
    asm.emit(AsmInst::Dup(1));
    asm.push_label(rt_start);
    asm.push(U256::ZERO);
    asm.op(Opcode::CodeCopy);
    asm.push(U256::ZERO);
    asm.op(Opcode::Return);
    asm.emit(AsmInst::Mark(rt_start));
    asm.emit(AsmInst::Verbatim(runtime.to_vec()));
    Ok(asm)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{Function, FunctionBuilder, Terminator};
    use krait_data_structures::index::IndexVec;
    use krait_interface::Span;
    use krait_sema::Layout;

    fn stub_fn(name: &str, selector: Option<[u8; 4]>) -> Function {
        let mut b = FunctionBuilder::new(name, Span::DUMMY);
        if let Some(s) = selector {
            b.set_selector(s);
        }
        b.terminate(Terminator::Stop);
        b.finish()
    }

    fn module(functions: Vec<Function>) -> IrModule {
        IrModule { name: "t".into(), functions: IndexVec::from(functions) }
    }

    fn empty_analysis() -> Analysis {
        Analysis {
            constants: Default::default(),
            layout: Layout::default(),
            signatures: Vec::new(),
        }
    }

    #[test]
    fn dispatcher_compares_selectors_in_ascending_order() {
        // Declared high selector first; the dispatcher must still compare
        // low first.
        let ir = module(vec![
            stub_fn("hi", Some([0xa9, 0x05, 0x9c, 0xbb])),
            stub_fn("lo", Some([0x18, 0x16, 0x0d, 0xdd])),
        ]);
        let dcx = DiagCtxt::new();
        let asm = runtime_assembly(&dcx, &ir, &CompilerOpts::default()).unwrap();

        let pushes: Vec<U256> = asm
            .insts()
            .iter()
            .filter_map(|i| match i {
                AsmInst::Push(v) if *v > U256::from(u32::MAX >> 8) => Some(*v),
                _ => None,
            })
            .collect();
        assert_eq!(pushes, [U256::from(0x18160dddu64), U256::from(0xa9059cbbu64)]);
    }

    #[test]
    fn dispatcher_guards_short_calldata_before_anything_else() {
        let ir = module(vec![stub_fn("f", Some([1, 2, 3, 4]))]);
        let dcx = DiagCtxt::new();
        let asm = runtime_assembly(&dcx, &ir, &CompilerOpts::default()).unwrap();
        assert_eq!(asm.insts()[0], AsmInst::Push(U256::from(4u8)));
        assert_eq!(asm.insts()[1], AsmInst::Op(Opcode::CalldataSize));
        assert_eq!(asm.insts()[2], AsmInst::Op(Opcode::Lt));
        assert!(matches!(asm.insts()[3], AsmInst::PushLabel(_)));
        assert_eq!(asm.insts()[4], AsmInst::Op(Opcode::JumpI));
    }

    #[test]
    fn deploy_code_embeds_runtime_verbatim() {
        let ir = module(vec![stub_fn("f", Some([1, 2, 3, 4]))]);
        let dcx = DiagCtxt::new();
        let contract = emit_contract(&dcx, &ir, &empty_analysis(), &CompilerOpts::default()).unwrap();
        assert!(!contract.runtime_code.is_empty());
        assert!(contract.deploy_code.ends_with(&contract.runtime_code));
        // No constructor: the deploy segment opens at the stub's JUMPDEST.
        assert_eq!(contract.deploy_code[0], 0x5b);
    }

    #[test]
    fn constructor_halt_reaches_the_deploy_stub() {
        let mut b = FunctionBuilder::new("__init__", Span::DUMMY);
        b.set_constructor();
        let slot = b.const_u64(0);
        let val = b.const_u64(7);
        b.sstore(slot, val);
        b.terminate(Terminator::Stop);
        let ir = module(vec![b.finish(), stub_fn("f", Some([1, 2, 3, 4]))]);

        let dcx = DiagCtxt::new();
        let contract = emit_contract(&dcx, &ir, &empty_analysis(), &CompilerOpts::default()).unwrap();
        // The constructor body must not halt; it jumps into the stub, so
        // the only STOP bytes live in the runtime segment.
        let stub_at = contract.deploy_code.len() - contract.runtime_code.len();
        let deploy_only = &contract.deploy_code[..stub_at];
        assert!(!deploy_only.contains(&(Opcode::Stop as u8)));
        assert!(deploy_only.contains(&(Opcode::Jump as u8)));
    }
}

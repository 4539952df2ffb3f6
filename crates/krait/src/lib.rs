//! Compiler driver.
//!
//! Glues the pipeline together over one module:
//!
//! 1. `krait-sema`: declaration checks, constant folding, storage layout,
//!    and the external signature table.
//! 2. `krait-codegen`: lowering to IR, stack scheduling, and assembly of
//!    the deploy and runtime segments.
//!
//! Diagnostics batch through a shared [`DiagCtxt`]; no bytecode is produced
//! if any stage reported an error.

pub use krait_ast as ast;
pub use krait_codegen as codegen;
pub use krait_interface as interface;
pub use krait_sema as sema;

pub use krait_codegen::CompiledContract;
pub use krait_interface::{CompilerOpts, DiagCtxt, DispatchScheme, ErrorGuaranteed, EvmVersion};

/// Compiles a typed module to its deploy and runtime bytecode.
#[tracing::instrument(level = "info", skip_all, fields(module = %module.name))]
pub fn compile(
    dcx: &DiagCtxt,
    module: &ast::Module,
    opts: &CompilerOpts,
) -> Result<CompiledContract, ErrorGuaranteed> {
    let analysis = krait_sema::analyze(dcx, module)?;
    let ir = krait_codegen::lower_module(dcx, module, &analysis)?;
    let contract = krait_codegen::emit_contract(dcx, &ir, &analysis, opts)?;
    // Each stage batches failures; nothing above may hand out an artifact
    // alongside queued errors.
    dcx.has_errors()?;
    Ok(contract)
}

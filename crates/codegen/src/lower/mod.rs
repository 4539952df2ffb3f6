//! Lowering from the typed AST to IR.
//!
//! One [`FuncLower`] per compiled function. Locals and temporaries live in a
//! static memory frame, so blocks exchange no stack state except the linear
//! continuations of runtime-check branches. Internal calls are inlined; the
//! recursion pre-pass rejects cyclic call graphs before any function is
//! lowered.

mod copy;
mod expr;
mod stmt;

pub use expr::{Place, RValue, Region};

use crate::ir::{
    BinaryOp, BlockId, FunctionBuilder, IrModule, Terminator, UnaryOp, ValueId,
};
use alloy_primitives::U256;
use krait_ast::{
    Expr, ExprKind, Function as AstFunction, FunctionKind, Module, Stmt, StmtKind, Structs,
    Type,
};
use krait_data_structures::{
    index::IndexVec,
    map::{FxHashMap, FxIndexMap},
    topo::{topo_sort, TopoResult},
};
use krait_interface::{DiagCtxt, DiagKind, ErrorGuaranteed};
use krait_sema::{Analysis, MemFrame};

/// Panic codes for compiler-generated runtime checks, following the
/// canonical `Panic(uint256)` convention.
pub const PANIC_ASSERT: u64 = 0x01;
pub const PANIC_OVERFLOW: u64 = 0x11;
pub const PANIC_DIV_ZERO: u64 = 0x12;
pub const PANIC_BOUNDS: u64 = 0x32;

/// `Panic(uint256)` selector, left-aligned in a word.
const PANIC_SELECTOR: U256 = U256::from_limbs([0, 0, 0, 0x4e487b71u64 << 32]);

/// Lowers every compiled function of `ast`. Failures batch per function;
/// the module result is `Err` if any function failed.
#[tracing::instrument(level = "debug", skip_all, fields(module = %ast.name))]
pub fn lower_module(
    dcx: &DiagCtxt,
    ast: &Module,
    analysis: &Analysis,
) -> Result<IrModule, ErrorGuaranteed> {
    check_recursion(dcx, ast)?;

    let mut ir = IrModule { name: ast.name.clone(), functions: IndexVec::new() };
    let mut guar = None;
    for func in &ast.functions {
        if func.kind == FunctionKind::Internal {
            continue;
        }
        match FuncLower::new(dcx, ast, analysis).lower_function(func) {
            Ok(f) => {
                ir.functions.push(f);
            }
            Err(g) => guar = Some(g),
        }
    }
    match guar {
        None => Ok(ir),
        Some(guar) => Err(guar),
    }
}

/// Rejects cyclic internal call graphs. Deterministic: the named function
/// is the first cycle participant in declaration order.
fn check_recursion(dcx: &DiagCtxt, ast: &Module) -> Result<(), ErrorGuaranteed> {
    let mut graph: FxIndexMap<&str, Vec<&str>> = FxIndexMap::default();
    for func in &ast.functions {
        let mut callees = Vec::new();
        for stmt in &func.body {
            collect_calls_stmt(stmt, &mut callees);
        }
        graph.insert(func.name.as_str(), callees);
    }
    match topo_sort(&graph) {
        TopoResult::Sorted(_) => Ok(()),
        TopoResult::Cycle(name) => {
            let span = ast
                .functions
                .iter()
                .find(|f| f.name.as_str() == name)
                .map(|f| f.span)
                .unwrap_or_default();
            Err(dcx
                .err(
                    DiagKind::RecursiveCall,
                    format!("recursive call cycle involving `{name}`"),
                )
                .span(span)
                .emit())
        }
    }
}

fn collect_calls_stmt<'ast>(stmt: &'ast Stmt, out: &mut Vec<&'ast str>) {
    match &stmt.kind {
        StmtKind::Let { init, .. } => collect_calls_expr(init, out),
        StmtKind::Assign { target, value } => {
            collect_calls_expr(target, out);
            collect_calls_expr(value, out);
        }
        StmtKind::Expr(e) | StmtKind::Assert(e) => collect_calls_expr(e, out),
        StmtKind::If { cond, then, else_ } => {
            collect_calls_expr(cond, out);
            for s in then {
                collect_calls_stmt(s, out);
            }
            if let Some(else_) = else_ {
                for s in else_ {
                    collect_calls_stmt(s, out);
                }
            }
        }
        StmtKind::For { start, end, body, .. } => {
            collect_calls_expr(start, out);
            collect_calls_expr(end, out);
            for s in body {
                collect_calls_stmt(s, out);
            }
        }
        StmtKind::Return(Some(e)) => collect_calls_expr(e, out),
        StmtKind::Return(None) | StmtKind::Break | StmtKind::Continue | StmtKind::Raise => {}
    }
}

fn collect_calls_expr<'ast>(expr: &'ast Expr, out: &mut Vec<&'ast str>) {
    match &expr.kind {
        ExprKind::Call { callee, args } => {
            out.push(callee.as_str());
            for a in args {
                collect_calls_expr(a, out);
            }
        }
        ExprKind::Unary(_, e) | ExprKind::Len(e) => collect_calls_expr(e, out),
        ExprKind::Binary { lhs, rhs, .. } => {
            collect_calls_expr(lhs, out);
            collect_calls_expr(rhs, out);
        }
        ExprKind::Index { base, index } => {
            collect_calls_expr(base, out);
            collect_calls_expr(index, out);
        }
        ExprKind::Member { base, .. } => collect_calls_expr(base, out),
        ExprKind::Array(elems) => {
            for e in elems {
                collect_calls_expr(e, out);
            }
        }
        ExprKind::Lit(_) | ExprKind::Ident(_) | ExprKind::Storage(_) | ExprKind::Caller => {}
    }
}

/// A memory-resident local or temporary.
#[derive(Clone, Debug)]
pub(crate) struct Local {
    pub offset: u64,
    pub ty: Type,
}

struct LoopFrame {
    continue_to: BlockId,
    break_to: BlockId,
}

struct InlineFrame {
    ret_local: Option<Local>,
    exit: BlockId,
}

/// Lowers one function body.
pub(crate) struct FuncLower<'cx> {
    dcx: &'cx DiagCtxt,
    ast: &'cx Module,
    analysis: &'cx Analysis,
    pub(crate) b: FunctionBuilder,
    frame: MemFrame,
    scopes: Vec<FxHashMap<String, Local>>,
    loops: Vec<LoopFrame>,
    inlines: Vec<InlineFrame>,
    panic_blocks: FxHashMap<u64, BlockId>,
    revert_block: Option<BlockId>,
    call_chain: Vec<String>,
    is_constructor: bool,
    ret_buf: Option<Local>,
}

impl<'cx> FuncLower<'cx> {
    fn new(dcx: &'cx DiagCtxt, ast: &'cx Module, analysis: &'cx Analysis) -> Self {
        Self {
            dcx,
            ast,
            analysis,
            b: FunctionBuilder::new("", krait_interface::Span::DUMMY),
            frame: MemFrame::new(),
            scopes: Vec::new(),
            loops: Vec::new(),
            inlines: Vec::new(),
            panic_blocks: FxHashMap::default(),
            revert_block: None,
            call_chain: Vec::new(),
            is_constructor: false,
            ret_buf: None,
        }
    }

    pub(crate) fn dcx(&self) -> &'cx DiagCtxt {
        self.dcx
    }

    pub(crate) fn structs(&self) -> &'cx Structs {
        &self.ast.structs
    }

    pub(crate) fn analysis(&self) -> &'cx Analysis {
        self.analysis
    }

    pub(crate) fn ast_function(&self, name: &str) -> Option<&'cx AstFunction> {
        self.ast.functions.iter().find(|f| f.name.as_str() == name)
    }

    /// Static encoded size in bytes. Sema rejects storage-only types in
    /// encodable positions before lowering runs.
    pub(crate) fn size_of(&self, ty: &Type) -> u64 {
        ty.max_encoded_size(self.structs())
            .unwrap_or_else(|| panic!("storage-only type in encodable position: {ty:?}"))
    }

    #[tracing::instrument(level = "debug", skip_all, fields(func = %func.name))]
    fn lower_function(
        mut self,
        func: &'cx AstFunction,
    ) -> Result<crate::ir::Function, ErrorGuaranteed> {
        self.b = FunctionBuilder::new(func.name.as_str(), func.span);
        self.is_constructor = func.kind == FunctionKind::Constructor;
        if self.is_constructor {
            self.b.set_constructor();
        } else if let Some(selector) = self.analysis.selector_of(func.name.as_str()) {
            self.b.set_selector(selector);
        }
        self.b.set_ret(func.ret.clone());

        if let Some(ret_ty) = &func.ret {
            let offset = self.frame.alloc(ret_ty, self.structs());
            self.ret_buf = Some(Local { offset, ty: ret_ty.clone() });
        }

        self.scopes.push(FxHashMap::default());
        let args_size = self.lower_prologue(func)?;
        self.b.set_args_size(args_size);

        self.lower_block(&func.body)?;
        if !self.b.is_terminated() {
            self.lower_implicit_return(func)?;
        }

        self.scopes.pop();
        let f = self.b.finish();
        if let Err(msg) = f.validate() {
            panic!("lowering produced invalid IR: {msg}");
        }
        Ok(f)
    }

    /// Binds parameters to frame slots and decodes the encoded arguments:
    /// from calldata (after the selector) for external functions, from the
    /// initcode tail for the constructor.
    fn lower_prologue(&mut self, func: &'cx AstFunction) -> Result<u64, ErrorGuaranteed> {
        let mut args_size = 0u64;
        let mut params = Vec::with_capacity(func.params.len());
        for param in &func.params {
            let offset = self.frame.alloc(&param.ty, self.structs());
            let local = Local { offset, ty: param.ty.clone() };
            self.bind_local(param.name.as_str(), local.clone());
            params.push(local);
            args_size += self.size_of(&param.ty);
        }

        match func.kind {
            FunctionKind::External => {
                // The length guard precedes any decode: anything shorter
                // than selector plus static argument size reverts.
                let size = self.b.inst(crate::ir::InstKind::CalldataSize);
                let need = self.b.const_u64(4 + args_size);
                let short = self.b.binary(BinaryOp::Lt, size, need);
                self.check_revert(short)?;

                let mut at = 4u64;
                for local in &params {
                    let src = self.b.const_u64(at);
                    let src_place = Place {
                        region: Region::Calldata,
                        addr: src,
                        ty: local.ty.clone(),
                    };
                    let dst = self.local_place(local);
                    self.copy_value(&dst, &src_place)?;
                    at += self.size_of(&local.ty);
                }
            }
            FunctionKind::Constructor => {
                if args_size > 0 {
                    // Arguments are appended to the initcode by the
                    // deployer; the blob starts at codesize - args_size.
                    let dst = self.b.const_u64(params[0].offset);
                    let size = self.b.const_u64(args_size);
                    let cs = self.b.inst(crate::ir::InstKind::CodeSize);
                    let src = self.b.binary(BinaryOp::Sub, cs, size);
                    self.b.inst(crate::ir::InstKind::CodeCopy { dst, src, len: size });
                    for local in &params {
                        let place = self.local_place(local);
                        self.validate_decoded(&place)?;
                    }
                }
            }
            FunctionKind::Internal => unreachable!("internal functions are inlined"),
        }
        Ok(args_size)
    }

    fn lower_implicit_return(&mut self, func: &AstFunction) -> Result<(), ErrorGuaranteed> {
        match &func.ret {
            // A value-returning body that falls off the end reverts.
            Some(_) => self.lower_raise(),
            None => {
                self.b.terminate(Terminator::Stop);
                Ok(())
            }
        }
    }

    pub(crate) fn lower_block(&mut self, block: &'cx [Stmt]) -> Result<(), ErrorGuaranteed> {
        self.scopes.push(FxHashMap::default());
        for stmt in block {
            if self.b.is_terminated() {
                // Statements after a return/break are unreachable.
                break;
            }
            self.lower_stmt(stmt)?;
        }
        self.scopes.pop();
        Ok(())
    }

    pub(crate) fn lower_raise(&mut self) -> Result<(), ErrorGuaranteed> {
        let zero = self.b.const_u64(0);
        self.b.terminate(Terminator::Revert { addr: zero, len: zero });
        Ok(())
    }

    // Scopes and locals.

    pub(crate) fn bind_local(&mut self, name: &str, local: Local) {
        if let Some(scope) = self.scopes.last_mut() {
            scope.insert(name.to_string(), local);
        }
    }

    pub(crate) fn lookup_local(&self, name: &str) -> Option<&Local> {
        self.scopes.iter().rev().find_map(|s| s.get(name))
    }

    pub(crate) fn alloc_local(&mut self, name: &str, ty: &Type) -> Local {
        let offset = self.frame.alloc(ty, self.structs());
        let local = Local { offset, ty: ty.clone() };
        self.bind_local(name, local.clone());
        local
    }

    /// Scope holding an inlined callee's parameter bindings.
    pub(crate) fn push_param_scope(&mut self, params: Vec<(String, Local)>) {
        self.scopes.push(params.into_iter().collect());
    }

    pub(crate) fn pop_param_scope(&mut self) {
        self.scopes.pop();
    }

    pub(crate) fn alloc_temp(&mut self, ty: &Type) -> Local {
        let offset = self.frame.alloc(ty, self.structs());
        Local { offset, ty: ty.clone() }
    }

    pub(crate) fn frame_alloc_words(&mut self, words: u64) -> u64 {
        self.frame.alloc_words(words)
    }

    pub(crate) fn local_place(&mut self, local: &Local) -> Place {
        let addr = self.b.const_u64(local.offset);
        Place { region: Region::Memory, addr, ty: local.ty.clone() }
    }

    // Loop and inline context.

    pub(crate) fn push_loop(&mut self, continue_to: BlockId, break_to: BlockId) {
        self.loops.push(LoopFrame { continue_to, break_to });
    }

    pub(crate) fn pop_loop(&mut self) {
        self.loops.pop();
    }

    pub(crate) fn current_loop(&self) -> Option<(BlockId, BlockId)> {
        self.loops.last().map(|l| (l.continue_to, l.break_to))
    }

    pub(crate) fn push_inline(&mut self, ret_local: Option<Local>, exit: BlockId) {
        self.inlines.push(InlineFrame { ret_local, exit });
    }

    pub(crate) fn pop_inline(&mut self) {
        self.inlines.pop();
    }

    pub(crate) fn current_inline(&self) -> Option<(Option<Local>, BlockId)> {
        self.inlines.last().map(|f| (f.ret_local.clone(), f.exit))
    }

    pub(crate) fn enter_call(&mut self, name: &str) -> bool {
        if self.call_chain.iter().any(|c| c == name) {
            return false;
        }
        self.call_chain.push(name.to_string());
        true
    }

    pub(crate) fn leave_call(&mut self) {
        self.call_chain.pop();
    }

    pub(crate) fn is_constructor(&self) -> bool {
        self.is_constructor
    }

    pub(crate) fn ret_buf(&self) -> Option<Local> {
        self.ret_buf.clone()
    }

    // Runtime checks.

    /// Branches to a `Panic(code)` revert block when `fail` is nonzero, and
    /// continues lowering in the fall-through block.
    pub(crate) fn check_panic(&mut self, fail: ValueId, code: u64) -> Result<(), ErrorGuaranteed> {
        let panic_blk = self.panic_block(code);
        let cont = self.b.new_block();
        self.b.terminate(Terminator::Branch { cond: fail, then_blk: panic_blk, else_blk: cont });
        self.b.switch_to(cont);
        Ok(())
    }

    /// Branches to the bare revert block when `fail` is nonzero.
    pub(crate) fn check_revert(&mut self, fail: ValueId) -> Result<(), ErrorGuaranteed> {
        let revert = self.bare_revert_block();
        let cont = self.b.new_block();
        self.b.terminate(Terminator::Branch { cond: fail, then_blk: revert, else_blk: cont });
        self.b.switch_to(cont);
        Ok(())
    }

    /// The shared `Panic(uint256)` revert block for `code`, built on first
    /// use: selector at 0x00, code at 0x04, revert of 36 bytes.
    fn panic_block(&mut self, code: u64) -> BlockId {
        if let Some(&blk) = self.panic_blocks.get(&code) {
            return blk;
        }
        let saved = self.b.current_block();
        let blk = self.b.new_block();
        self.b.switch_to(blk);
        let sel_addr = self.b.const_u64(0);
        let sel = self.b.const_(PANIC_SELECTOR);
        self.b.mstore(sel_addr, sel);
        let code_addr = self.b.const_u64(4);
        let code_v = self.b.const_u64(code);
        self.b.mstore(code_addr, code_v);
        let zero = self.b.const_u64(0);
        let len = self.b.const_u64(0x24);
        self.b.terminate(Terminator::Revert { addr: zero, len });
        self.b.switch_to(saved);
        self.panic_blocks.insert(code, blk);
        blk
    }

    /// The shared no-data revert block, built on first use.
    fn bare_revert_block(&mut self) -> BlockId {
        if let Some(blk) = self.revert_block {
            return blk;
        }
        let saved = self.b.current_block();
        let blk = self.b.new_block();
        self.b.switch_to(blk);
        let zero = self.b.const_u64(0);
        self.b.terminate(Terminator::Revert { addr: zero, len: zero });
        self.b.switch_to(saved);
        self.revert_block = Some(blk);
        blk
    }

    // Scalar moves between regions.

    pub(crate) fn load_scalar(&mut self, place: &Place) -> ValueId {
        match place.region {
            Region::Memory => self.b.mload(place.addr),
            Region::Storage => self.b.sload(place.addr),
            Region::Calldata => self.b.inst(crate::ir::InstKind::CalldataLoad(place.addr)),
        }
    }

    pub(crate) fn store_scalar(&mut self, place: &Place, value: ValueId) {
        match place.region {
            Region::Memory => self.b.mstore(place.addr, value),
            Region::Storage => self.b.sstore(place.addr, value),
            Region::Calldata => panic!("store into calldata"),
        }
    }

    // Misc IR helpers.

    pub(crate) fn bool_not(&mut self, v: ValueId) -> ValueId {
        self.b.unary(UnaryOp::IsZero, v)
    }

    pub(crate) fn keccak_slot(&mut self, slot: ValueId) -> ValueId {
        // Hash input goes through the scratch space below the frame.
        let scratch = self.b.const_u64(MemFrame::HASH_SCRATCH);
        self.b.mstore(scratch, slot);
        let addr = self.b.const_u64(MemFrame::HASH_SCRATCH);
        let len = self.b.const_u64(32);
        self.b.keccak(addr, len)
    }

    pub(crate) fn keccak_key_slot(&mut self, key: ValueId, slot: ValueId) -> ValueId {
        let key_addr = self.b.const_u64(MemFrame::HASH_SCRATCH);
        self.b.mstore(key_addr, key);
        let slot_addr = self.b.const_u64(MemFrame::HASH_SCRATCH + 32);
        self.b.mstore(slot_addr, slot);
        let addr = self.b.const_u64(MemFrame::HASH_SCRATCH);
        let len = self.b.const_u64(64);
        self.b.keccak(addr, len)
    }
}

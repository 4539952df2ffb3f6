//! Declaration checking and module analysis.

use crate::{
    abi::{self, AbiFunction},
    eval::{ConstValue, ConstantEvaluator},
    layout::Layout,
};
use krait_ast::{Expr, ExprKind, Function, FunctionKind, Module, Structs, Type};
use krait_data_structures::{
    map::{FxHashMap, FxHashSet, FxIndexMap},
    topo::{topo_sort, TopoResult},
};
use krait_interface::{DiagCtxt, DiagKind, ErrorGuaranteed, Span};

/// The frozen facts later stages read. Nothing here changes once
/// [`analyze`] returns.
#[derive(Debug)]
pub struct Analysis {
    /// Folded constants, in dependency order.
    pub constants: FxIndexMap<String, ConstValue>,
    pub layout: Layout,
    /// External signature table, in declaration order.
    pub signatures: Vec<AbiFunction>,
}

impl Analysis {
    pub fn constant(&self, name: &str) -> Option<&ConstValue> {
        self.constants.get(name)
    }

    pub fn selector_of(&self, name: &str) -> Option<[u8; 4]> {
        self.signatures.iter().find(|f| f.name == name).map(|f| f.selector)
    }
}

/// Resolves a module: declaration checks, constant folding in dependency
/// order, storage layout, signature table. Errors batch; the first
/// guarantee is returned after the whole module has been visited.
#[tracing::instrument(level = "debug", skip_all, fields(module = %module.name))]
pub fn analyze(dcx: &DiagCtxt, module: &Module) -> Result<Analysis, ErrorGuaranteed> {
    let mut guar = None;

    check_declarations(dcx, module, &mut guar);

    let constants = match fold_constants(dcx, module) {
        Ok(consts) => consts,
        Err(g) => {
            note(&mut guar, g);
            FxIndexMap::default()
        }
    };

    // The layout sums sizes that only a clean declaration set keeps in
    // range, so it is skipped once anything has been rejected.
    let layout = if guar.is_none() { Layout::of(module) } else { Layout::default() };

    let signatures = match abi::signature_table(dcx, module) {
        Ok(table) => table,
        Err(g) => {
            note(&mut guar, g);
            Vec::new()
        }
    };

    match guar {
        None => Ok(Analysis { constants, layout, signatures }),
        Some(guar) => Err(guar),
    }
}

/// Keeps the first guarantee.
fn note(guar: &mut Option<ErrorGuaranteed>, g: ErrorGuaranteed) {
    guar.get_or_insert(g);
}

fn check_declarations(dcx: &DiagCtxt, module: &Module, guar: &mut Option<ErrorGuaranteed>) {
    // Constants, storage variables, and functions share one namespace.
    let mut seen: FxHashMap<String, Span> = FxHashMap::default();
    let mut check_name = |name: &krait_ast::Ident, guar: &mut Option<ErrorGuaranteed>| {
        if seen.insert(name.as_str().to_owned(), name.span).is_some() {
            note(
                guar,
                dcx.err(
                    DiagKind::DuplicateDeclaration,
                    format!("`{name}` is declared more than once"),
                )
                .span(name.span)
                .emit(),
            );
        }
    };

    for c in &module.constants {
        check_name(&c.name, guar);
    }
    for v in &module.storage {
        check_name(&v.name, guar);
        check_bounds(dcx, &v.ty, &module.structs, v.name.span, guar);
    }
    let mut ctor_seen = false;
    for f in &module.functions {
        check_name(&f.name, guar);
        check_function_regions(dcx, f, &module.structs, guar);
        if f.kind == FunctionKind::Constructor {
            if ctor_seen {
                note(
                    guar,
                    dcx.err(DiagKind::DuplicateDeclaration, "more than one constructor")
                        .span(f.span)
                        .emit(),
                );
            }
            ctor_seen = true;
        }
    }
}

/// Bounds reach this stage already folded to unsigned words, so negative
/// and non-constant bounds cannot occur here. Zero-length arrays are
/// unconstructible, and bounds whose encoded size overflows the size
/// arithmetic are rejected with them.
fn check_bounds(
    dcx: &DiagCtxt,
    ty: &Type,
    structs: &Structs,
    span: Span,
    guar: &mut Option<ErrorGuaranteed>,
) {
    match ty {
        Type::FixedArray(elem, len) | Type::DynArray(elem, len) => {
            if *len == 0 {
                note(
                    guar,
                    dcx.err(DiagKind::InvalidArrayBound, "array bound must be at least 1")
                        .span(span)
                        .emit(),
                );
            } else if ty.is_encodable(structs) && ty.max_encoded_size(structs).is_none() {
                note(
                    guar,
                    dcx.err(
                        DiagKind::InvalidArrayBound,
                        "array bound overflows the encodable size limit",
                    )
                    .span(span)
                    .emit(),
                );
            }
            check_bounds(dcx, elem, structs, span, guar);
        }
        Type::Mapping(key, value) => {
            check_bounds(dcx, key, structs, span, guar);
            check_bounds(dcx, value, structs, span, guar);
        }
        Type::Struct(id) => {
            for f in &structs[*id].fields {
                check_bounds(dcx, &f.ty, structs, span, guar);
            }
        }
        _ => {}
    }
}

/// Parameters and returns live in calldata/memory; mappings cannot.
fn check_function_regions(
    dcx: &DiagCtxt,
    func: &Function,
    structs: &Structs,
    guar: &mut Option<ErrorGuaranteed>,
) {
    for param in &func.params {
        check_bounds(dcx, &param.ty, structs, param.name.span, guar);
        if !param.ty.is_encodable(structs) {
            note(
                guar,
                dcx.err(
                    DiagKind::InvalidRegionCrossing,
                    format!("parameter `{}` has a storage-only type", param.name),
                )
                .span(param.name.span)
                .emit(),
            );
        }
    }
    if let Some(ret) = &func.ret {
        check_bounds(dcx, ret, structs, func.span, guar);
        if !ret.is_encodable(structs) {
            note(
                guar,
                dcx.err(DiagKind::InvalidRegionCrossing, "return type is storage-only")
                    .span(func.span)
                    .emit(),
            );
        }
    }
}

/// Folds all `constant` declarations in dependency order.
fn fold_constants(
    dcx: &DiagCtxt,
    module: &Module,
) -> Result<FxIndexMap<String, ConstValue>, ErrorGuaranteed> {
    let names: FxHashSet<&str> =
        module.constants.iter().map(|c| c.name.as_str()).collect();

    let mut graph: FxIndexMap<&str, Vec<&str>> = FxIndexMap::default();
    for c in &module.constants {
        let mut deps = Vec::new();
        collect_const_refs(&c.init, &names, &mut deps);
        graph.insert(c.name.as_str(), deps);
    }

    let order = match topo_sort(&graph) {
        TopoResult::Sorted(order) => order,
        TopoResult::Cycle(name) => {
            let span = module
                .constants
                .iter()
                .find(|c| c.name.as_str() == name)
                .map(|c| c.name.span)
                .unwrap_or(Span::DUMMY);
            return Err(dcx
                .err(
                    DiagKind::CyclicConstant,
                    format!("cyclic constant dependency involving `{name}`"),
                )
                .span(span)
                .emit());
        }
    };

    let by_name: FxHashMap<&str, &krait_ast::ConstantDecl> =
        module.constants.iter().map(|c| (c.name.as_str(), c)).collect();

    let mut ev = ConstantEvaluator::new(dcx);
    let mut guar = None;
    for name in order {
        let decl = by_name[name];
        match ev.eval(&decl.init) {
            Ok(value) => {
                if value.ty != decl.ty {
                    guar = Some(
                        dcx.err(
                            DiagKind::TypeMismatch,
                            format!("constant `{name}` initializer has the wrong type"),
                        )
                        .span(decl.name.span)
                        .emit(),
                    );
                    continue;
                }
                ev.define(name, value);
            }
            Err(g) => guar = Some(g),
        }
    }

    match guar {
        None => Ok(ev.into_values()),
        Some(guar) => Err(guar),
    }
}

fn collect_const_refs<'ast>(
    expr: &'ast Expr,
    names: &FxHashSet<&str>,
    out: &mut Vec<&'ast str>,
) {
    match &expr.kind {
        ExprKind::Ident(name) => {
            if names.contains(name.as_str()) {
                out.push(name.as_str());
            }
        }
        ExprKind::Unary(_, e) | ExprKind::Len(e) => collect_const_refs(e, names, out),
        ExprKind::Binary { lhs, rhs, .. } => {
            collect_const_refs(lhs, names, out);
            collect_const_refs(rhs, names, out);
        }
        ExprKind::Index { base, index } => {
            collect_const_refs(base, names, out);
            collect_const_refs(index, names, out);
        }
        ExprKind::Member { base, .. } => collect_const_refs(base, names, out),
        ExprKind::Call { args, .. } => {
            for a in args {
                collect_const_refs(a, names, out);
            }
        }
        ExprKind::Array(elems) => {
            for e in elems {
                collect_const_refs(e, names, out);
            }
        }
        ExprKind::Lit(_) | ExprKind::Storage(_) | ExprKind::Caller => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_primitives::U256;
    use krait_ast::{BinOp, ConstantDecl, Ident, Lit, VarDecl};

    fn ident_expr(name: &str, ty: Type) -> Expr {
        Expr::new(ExprKind::Ident(Ident::new(name, Span::DUMMY)), ty, Span::DUMMY)
    }

    fn num(v: u64, ty: Type) -> Expr {
        Expr::new(ExprKind::Lit(Lit::Num(U256::from(v))), ty, Span::DUMMY)
    }

    fn constant(name: &str, init: Expr) -> ConstantDecl {
        ConstantDecl { name: Ident::new(name, Span::DUMMY), ty: init.ty.clone(), init }
    }

    #[test]
    fn constants_fold_in_dependency_order() {
        // B is declared before A but depends on it.
        let module = Module {
            constants: vec![
                constant(
                    "B",
                    Expr::new(
                        ExprKind::Binary {
                            op: BinOp::Mul,
                            lhs: Box::new(ident_expr("A", Type::U256)),
                            rhs: Box::new(num(2, Type::U256)),
                            unchecked: false,
                        },
                        Type::U256,
                        Span::DUMMY,
                    ),
                ),
                constant("A", num(21, Type::U256)),
            ],
            ..Default::default()
        };
        let dcx = DiagCtxt::new();
        let analysis = analyze(&dcx, &module).unwrap();
        assert_eq!(analysis.constant("B").unwrap().word, U256::from(42u8));
    }

    #[test]
    fn cyclic_constants_are_fatal() {
        let module = Module {
            constants: vec![
                constant("A", ident_expr("B", Type::U256)),
                constant("B", ident_expr("A", Type::U256)),
            ],
            ..Default::default()
        };
        let dcx = DiagCtxt::new();
        assert!(analyze(&dcx, &module).is_err());
        let rendered = dcx.rendered().join("\n");
        assert!(rendered.contains("cyclic constant dependency"), "{rendered}");
    }

    #[test]
    fn duplicate_names_are_fatal() {
        let module = Module {
            storage: vec![
                VarDecl { name: Ident::new("x", Span::DUMMY), ty: Type::U256 },
                VarDecl { name: Ident::new("x", Span::DUMMY), ty: Type::Bool },
            ],
            ..Default::default()
        };
        let dcx = DiagCtxt::new();
        assert!(analyze(&dcx, &module).is_err());
        assert_eq!(dcx.err_count(), 1);
    }

    #[test]
    fn zero_bound_is_fatal() {
        let module = Module {
            storage: vec![VarDecl {
                name: Ident::new("xs", Span::DUMMY),
                ty: Type::DynArray(Box::new(Type::U256), 0),
            }],
            ..Default::default()
        };
        let dcx = DiagCtxt::new();
        assert!(analyze(&dcx, &module).is_err());
    }

    #[test]
    fn oversized_bound_is_fatal() {
        let module = Module {
            storage: vec![VarDecl {
                name: Ident::new("xs", Span::DUMMY),
                ty: Type::FixedArray(Box::new(Type::U256), u64::MAX),
            }],
            ..Default::default()
        };
        let dcx = DiagCtxt::new();
        assert!(analyze(&dcx, &module).is_err());
        let rendered = dcx.rendered().join("\n");
        assert!(rendered.contains("array bound overflows"), "{rendered}");
    }

    #[test]
    fn mapping_parameter_is_rejected() {
        let module = Module {
            functions: vec![Function {
                name: Ident::new("f", Span::DUMMY),
                kind: FunctionKind::External,
                params: vec![krait_ast::Param {
                    name: Ident::new("m", Span::DUMMY),
                    ty: Type::Mapping(Box::new(Type::Address), Box::new(Type::U256)),
                }],
                ret: None,
                body: vec![],
                span: Span::DUMMY,
            }],
            ..Default::default()
        };
        let dcx = DiagCtxt::new();
        assert!(analyze(&dcx, &module).is_err());
    }
}

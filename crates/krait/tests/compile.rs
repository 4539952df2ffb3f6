//! End-to-end compilation over hand-built typed modules.

use alloy_primitives::U256;
use krait::ast::{
    BinOp, ConstantDecl, Expr, ExprKind, Function, FunctionKind, Ident, Lit, Module, Param,
    Stmt, StmtKind, Type, VarDecl,
};
use krait::interface::Span;
use krait::{CompilerOpts, DiagCtxt, EvmVersion};

fn id(name: &str) -> Ident {
    Ident::new(name, Span::DUMMY)
}

fn e(kind: ExprKind, ty: Type) -> Expr {
    Expr::new(kind, ty, Span::DUMMY)
}

fn num(v: u64, ty: Type) -> Expr {
    e(ExprKind::Lit(Lit::Num(U256::from(v))), ty)
}

fn var(name: &str, ty: Type) -> Expr {
    e(ExprKind::Ident(id(name)), ty)
}

fn sto(name: &str, ty: Type) -> Expr {
    e(ExprKind::Storage(id(name)), ty)
}

fn caller() -> Expr {
    e(ExprKind::Caller, Type::Address)
}

fn index(base: Expr, idx: Expr, ty: Type) -> Expr {
    e(ExprKind::Index { base: Box::new(base), index: Box::new(idx) }, ty)
}

fn bin(op: BinOp, lhs: Expr, rhs: Expr) -> Expr {
    let ty = if op.is_comparison() || op.is_short_circuit() {
        Type::Bool
    } else {
        lhs.ty.clone()
    };
    e(ExprKind::Binary { op, lhs: Box::new(lhs), rhs: Box::new(rhs), unchecked: false }, ty)
}

fn unchecked(op: BinOp, lhs: Expr, rhs: Expr) -> Expr {
    let ty = lhs.ty.clone();
    e(ExprKind::Binary { op, lhs: Box::new(lhs), rhs: Box::new(rhs), unchecked: true }, ty)
}

fn stmt(kind: StmtKind) -> Stmt {
    Stmt { kind, span: Span::DUMMY }
}

fn assign(target: Expr, value: Expr) -> Stmt {
    stmt(StmtKind::Assign { target, value })
}

fn ret(value: Expr) -> Stmt {
    stmt(StmtKind::Return(Some(value)))
}

fn func(
    name: &str,
    kind: FunctionKind,
    params: Vec<(&str, Type)>,
    ret: Option<Type>,
    body: Vec<Stmt>,
) -> Function {
    Function {
        name: id(name),
        kind,
        params: params.into_iter().map(|(n, ty)| Param { name: id(n), ty }).collect(),
        ret,
        body,
        span: Span::DUMMY,
    }
}

fn storage_var(name: &str, ty: Type) -> VarDecl {
    VarDecl { name: id(name), ty }
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}

fn addr_map(value: Type) -> Type {
    Type::Mapping(Box::new(Type::Address), Box::new(value))
}

/// A minimal token: mapping storage, checked transfers, a constructor that
/// credits the deployer.
fn token_module() -> Module {
    let balances = || addr_map(Type::U256);
    Module {
        name: "token".into(),
        storage: vec![
            storage_var("total_supply", Type::U256),
            storage_var("balances", balances()),
        ],
        functions: vec![
            func(
                "__init__",
                FunctionKind::Constructor,
                vec![("supply", Type::U256)],
                None,
                vec![
                    assign(sto("total_supply", Type::U256), var("supply", Type::U256)),
                    assign(
                        index(sto("balances", balances()), caller(), Type::U256),
                        var("supply", Type::U256),
                    ),
                ],
            ),
            func(
                "transfer",
                FunctionKind::External,
                vec![("to", Type::Address), ("amount", Type::U256)],
                Some(Type::Bool),
                vec![
                    // Checked subtraction reverts an overdraft.
                    assign(
                        index(sto("balances", balances()), caller(), Type::U256),
                        bin(
                            BinOp::Sub,
                            index(sto("balances", balances()), caller(), Type::U256),
                            var("amount", Type::U256),
                        ),
                    ),
                    assign(
                        index(sto("balances", balances()), var("to", Type::Address), Type::U256),
                        bin(
                            BinOp::Add,
                            index(
                                sto("balances", balances()),
                                var("to", Type::Address),
                                Type::U256,
                            ),
                            var("amount", Type::U256),
                        ),
                    ),
                    ret(e(ExprKind::Lit(Lit::Bool(true)), Type::Bool)),
                ],
            ),
            func(
                "totalSupply",
                FunctionKind::External,
                vec![],
                Some(Type::U256),
                vec![ret(sto("total_supply", Type::U256))],
            ),
        ],
        ..Default::default()
    }
}

#[test]
fn token_compiles_and_reports_its_abi() {
    let dcx = DiagCtxt::new();
    let contract = krait::compile(&dcx, &token_module(), &CompilerOpts::default()).unwrap();

    assert!(!contract.runtime_code.is_empty());
    assert!(contract.deploy_code.ends_with(&contract.runtime_code));

    assert_eq!(contract.abi.len(), 2);
    assert_eq!(contract.abi[0].signature, "transfer(address,uint256)");
    assert_eq!(contract.abi[0].selector, [0xa9, 0x05, 0x9c, 0xbb]);
    assert_eq!(contract.abi[1].signature, "totalSupply()");
    assert_eq!(contract.abi[1].selector, [0x18, 0x16, 0x0d, 0xdd]);
}

#[test]
fn dispatcher_guards_length_then_compares_ascending() {
    let dcx = DiagCtxt::new();
    let contract = krait::compile(&dcx, &token_module(), &CompilerOpts::default()).unwrap();
    let rt = &contract.runtime_code;

    // PUSH1 4, CALLDATASIZE, LT opens the runtime segment.
    assert_eq!(&rt[..4], [0x60, 0x04, 0x36, 0x10]);

    // totalSupply (0x18160ddd) is compared before transfer (0xa9059cbb)
    // even though it is declared after it.
    let low = find(rt, &[0x63, 0x18, 0x16, 0x0d, 0xdd]).unwrap();
    let high = find(rt, &[0x63, 0xa9, 0x05, 0x9c, 0xbb]).unwrap();
    assert!(low < high);
}

#[test]
fn pre_shanghai_target_avoids_push0() {
    let dcx = DiagCtxt::new();
    let opts = CompilerOpts { evm_version: EvmVersion::Paris, ..Default::default() };
    let contract = krait::compile(&dcx, &token_module(), &opts).unwrap();
    // Guard (7 bytes: PUSH1 4, CALLDATASIZE, LT, PUSH1 fallback, JUMPI),
    // then the selector load pushes an explicit zero.
    assert_eq!(&contract.runtime_code[..4], [0x60, 0x04, 0x36, 0x10]);
    assert_eq!(&contract.runtime_code[7..10], [0x60, 0x00, 0x35]);

    let dcx = DiagCtxt::new();
    let modern = krait::compile(&dcx, &token_module(), &CompilerOpts::default()).unwrap();
    assert_eq!(&modern.runtime_code[7..9], [0x5f, 0x35]);
}

#[test]
fn checked_arithmetic_emits_panic_reverts() {
    let dcx = DiagCtxt::new();
    let contract = krait::compile(&dcx, &token_module(), &CompilerOpts::default()).unwrap();
    // Panic(uint256) selector, left-aligned in a PUSH32.
    assert!(find(&contract.runtime_code, &[0x7f, 0x4e, 0x48, 0x7b, 0x71]).is_some());
}

#[test]
fn constructor_decodes_nested_dyn_arrays_from_the_code_tail() {
    let matrix = Type::DynArray(Box::new(Type::DynArray(Box::new(Type::U256), 3)), 3);
    let row = Type::DynArray(Box::new(Type::U256), 3);
    let module = Module {
        name: "matrix".into(),
        storage: vec![storage_var("total", Type::U256)],
        functions: vec![
            func(
                "__init__",
                FunctionKind::Constructor,
                vec![("m", matrix.clone())],
                None,
                vec![
                    stmt(StmtKind::Let {
                        name: id("t"),
                        ty: Type::U256,
                        init: num(0, Type::U256),
                    }),
                    stmt(StmtKind::For {
                        var: id("i"),
                        var_ty: Type::U256,
                        start: num(0, Type::U256),
                        end: e(
                            ExprKind::Len(Box::new(var("m", matrix.clone()))),
                            Type::U256,
                        ),
                        body: vec![stmt(StmtKind::For {
                            var: id("j"),
                            var_ty: Type::U256,
                            start: num(0, Type::U256),
                            end: e(
                                ExprKind::Len(Box::new(index(
                                    var("m", matrix.clone()),
                                    var("i", Type::U256),
                                    row.clone(),
                                ))),
                                Type::U256,
                            ),
                            body: vec![assign(
                                var("t", Type::U256),
                                bin(
                                    BinOp::Add,
                                    var("t", Type::U256),
                                    index(
                                        index(
                                            var("m", matrix.clone()),
                                            var("i", Type::U256),
                                            row.clone(),
                                        ),
                                        var("j", Type::U256),
                                        Type::U256,
                                    ),
                                ),
                            )],
                        })],
                    }),
                    assign(sto("total", Type::U256), var("t", Type::U256)),
                ],
            ),
            func(
                "total",
                FunctionKind::External,
                vec![],
                Some(Type::U256),
                vec![ret(sto("total", Type::U256))],
            ),
        ],
        ..Default::default()
    };

    let dcx = DiagCtxt::new();
    let contract = krait::compile(&dcx, &module, &CompilerOpts::default()).unwrap();

    // The constructor reads its argument blob relative to CODESIZE and
    // copies it into the frame.
    let ctor_len = contract.deploy_code.len() - contract.runtime_code.len();
    let ctor = &contract.deploy_code[..ctor_len];
    assert!(ctor.contains(&0x38), "constructor must use CODESIZE");
    assert!(ctor.contains(&0x39), "constructor must use CODECOPY");
    assert!(contract.deploy_code.ends_with(&contract.runtime_code));
}

#[test]
fn delegation_walk_with_bounded_iterations() {
    let delegate_of = || addr_map(Type::Address);
    let weight = || addr_map(Type::U256);
    let zero_addr = || num(0, Type::Address);
    let module = Module {
        name: "ballot".into(),
        storage: vec![
            storage_var("delegate_of", delegate_of()),
            storage_var("weight", weight()),
        ],
        functions: vec![func(
            "delegate",
            FunctionKind::External,
            vec![("to", Type::Address)],
            None,
            vec![
                stmt(StmtKind::Let {
                    name: id("t"),
                    ty: Type::Address,
                    init: var("to", Type::Address),
                }),
                // Follow at most four links of existing delegations.
                stmt(StmtKind::For {
                    var: id("i"),
                    var_ty: Type::U256,
                    start: num(0, Type::U256),
                    end: num(4, Type::U256),
                    body: vec![
                        stmt(StmtKind::Let {
                            name: id("nxt"),
                            ty: Type::Address,
                            init: index(
                                sto("delegate_of", delegate_of()),
                                var("t", Type::Address),
                                Type::Address,
                            ),
                        }),
                        stmt(StmtKind::If {
                            cond: bin(BinOp::Eq, var("nxt", Type::Address), zero_addr()),
                            then: vec![stmt(StmtKind::Break)],
                            else_: None,
                        }),
                        assign(var("t", Type::Address), var("nxt", Type::Address)),
                    ],
                }),
                // A chain that loops back to the caller is rejected.
                stmt(StmtKind::Assert(bin(BinOp::Ne, var("t", Type::Address), caller()))),
                assign(
                    index(sto("delegate_of", delegate_of()), caller(), Type::Address),
                    var("t", Type::Address),
                ),
                assign(
                    index(sto("weight", weight()), var("t", Type::Address), Type::U256),
                    bin(
                        BinOp::Add,
                        index(sto("weight", weight()), var("t", Type::Address), Type::U256),
                        index(sto("weight", weight()), caller(), Type::U256),
                    ),
                ),
            ],
        )],
        ..Default::default()
    };

    let dcx = DiagCtxt::new();
    let contract = krait::compile(&dcx, &module, &CompilerOpts::default()).unwrap();
    assert_eq!(contract.abi[0].signature, "delegate(address)");
    // Mapping slots go through KECCAK256.
    assert!(contract.runtime_code.contains(&0x20));
}

#[test]
fn mutually_recursive_internal_calls_are_rejected() {
    let call = |name: &str| stmt(StmtKind::Expr(e(
        ExprKind::Call { callee: id(name), args: vec![] },
        Type::Bool,
    )));
    let module = Module {
        name: "loops".into(),
        functions: vec![
            func("ping", FunctionKind::Internal, vec![], None, vec![call("pong")]),
            func("pong", FunctionKind::Internal, vec![], None, vec![call("ping")]),
            func("kick", FunctionKind::External, vec![], None, vec![call("ping")]),
        ],
        ..Default::default()
    };

    let dcx = DiagCtxt::new();
    assert!(krait::compile(&dcx, &module, &CompilerOpts::default()).is_err());
    let rendered = dcx.rendered();
    assert!(
        rendered.iter().any(|d| d.contains("recursive call cycle")),
        "{rendered:?}"
    );
}

#[test]
fn stack_too_deep_is_a_single_deterministic_error() {
    // A right-nested checked sum loads every operand before the innermost
    // add, whose overflow check ends the block; the pending operands stay
    // live across that edge and 18 levels exceed the window.
    let mut acc = var("x", Type::U256);
    for _ in 0..18 {
        acc = bin(BinOp::Add, var("x", Type::U256), acc);
    }
    let module = Module {
        name: "deep".into(),
        functions: vec![func(
            "deep",
            FunctionKind::External,
            vec![("x", Type::U256)],
            Some(Type::U256),
            vec![ret(acc)],
        )],
        ..Default::default()
    };

    let dcx = DiagCtxt::new();
    assert!(krait::compile(&dcx, &module, &CompilerOpts::default()).is_err());
    let rendered = dcx.rendered();
    assert_eq!(rendered.len(), 1, "{rendered:?}");
    assert!(rendered[0].contains("stack too deep in function `deep`"));
}

#[test]
fn early_return_in_the_then_branch_still_reaches_the_join() {
    // Only the else arm falls through to the statement after the `if`; the
    // join must still be emitted and its label bound.
    let module = Module {
        name: "early".into(),
        functions: vec![func(
            "pick",
            FunctionKind::External,
            vec![("x", Type::U256)],
            Some(Type::U256),
            vec![
                stmt(StmtKind::If {
                    cond: bin(BinOp::Eq, var("x", Type::U256), num(0, Type::U256)),
                    then: vec![ret(num(1, Type::U256))],
                    else_: Some(vec![assign(var("x", Type::U256), num(2, Type::U256))]),
                }),
                ret(num(7, Type::U256)),
            ],
        )],
        ..Default::default()
    };

    let dcx = DiagCtxt::new();
    let contract = krait::compile(&dcx, &module, &CompilerOpts::default()).unwrap();
    assert!(!contract.runtime_code.is_empty());
    assert_eq!(dcx.err_count(), 0);
}

#[test]
fn decoded_arguments_are_range_checked() {
    let module = Module {
        name: "narrow".into(),
        storage: vec![
            storage_var("a", Type::Uint(16)),
            storage_var("b", Type::I128),
        ],
        functions: vec![func(
            "set",
            FunctionKind::External,
            vec![("x", Type::Uint(16)), ("y", Type::I128)],
            None,
            vec![
                assign(sto("a", Type::Uint(16)), var("x", Type::Uint(16))),
                assign(sto("b", Type::I128), var("y", Type::I128)),
            ],
        )],
        ..Default::default()
    };

    let dcx = DiagCtxt::new();
    let contract = krait::compile(&dcx, &module, &CompilerOpts::default()).unwrap();
    let rt = &contract.runtime_code;
    // The uint16 argument is compared against its maximum before use.
    assert!(find(rt, &[0x61, 0xff, 0xff]).is_some());
    // The int128 argument is checked as a fixed point of sign extension,
    // which runs through SAR.
    assert!(rt.contains(&0x1d));
}

#[test]
fn checked_narrow_add_tests_the_type_bound() {
    let module = Module {
        name: "clamp".into(),
        storage: vec![storage_var("v", Type::Uint(16))],
        functions: vec![func(
            "bump",
            FunctionKind::External,
            vec![("x", Type::Uint(16))],
            Some(Type::Uint(16)),
            vec![
                assign(
                    sto("v", Type::Uint(16)),
                    bin(BinOp::Add, sto("v", Type::Uint(16)), var("x", Type::Uint(16))),
                ),
                ret(sto("v", Type::Uint(16))),
            ],
        )],
        ..Default::default()
    };

    let dcx = DiagCtxt::new();
    let contract = krait::compile(&dcx, &module, &CompilerOpts::default()).unwrap();
    let rt = &contract.runtime_code;
    // A sum of exactly 0xffff passes the bound compare; one more fails it
    // and lands in the Panic(0x11) path.
    assert!(find(rt, &[0x61, 0xff, 0xff]).is_some());
    assert!(find(rt, &[0x7f, 0x4e, 0x48, 0x7b, 0x71]).is_some());
    assert!(find(rt, &[0x60, 0x11]).is_some());
}

#[test]
fn unchecked_narrow_add_masks_without_a_panic_path() {
    let module = Module {
        name: "wrap".into(),
        storage: vec![storage_var("v", Type::Uint(16))],
        functions: vec![func(
            "bump",
            FunctionKind::External,
            vec![("x", Type::Uint(16))],
            Some(Type::Uint(16)),
            vec![
                assign(
                    sto("v", Type::Uint(16)),
                    unchecked(
                        BinOp::Add,
                        sto("v", Type::Uint(16)),
                        var("x", Type::Uint(16)),
                    ),
                ),
                ret(sto("v", Type::Uint(16))),
            ],
        )],
        ..Default::default()
    };

    let dcx = DiagCtxt::new();
    let contract = krait::compile(&dcx, &module, &CompilerOpts::default()).unwrap();
    let rt = &contract.runtime_code;
    // The wrapped sum is masked back to 16 bits, and no arithmetic panic
    // revert exists anywhere in the function.
    assert!(find(rt, &[0x61, 0xff, 0xff]).is_some());
    assert!(find(rt, &[0x7f, 0x4e, 0x48, 0x7b, 0x71]).is_none());
}

#[test]
fn cyclic_constants_are_fatal() {
    let module = Module {
        name: "cyc".into(),
        constants: vec![
            ConstantDecl { name: id("A"), ty: Type::U256, init: var("B", Type::U256) },
            ConstantDecl { name: id("B"), ty: Type::U256, init: var("A", Type::U256) },
        ],
        ..Default::default()
    };

    let dcx = DiagCtxt::new();
    assert!(krait::compile(&dcx, &module, &CompilerOpts::default()).is_err());
    assert!(dcx.rendered().iter().any(|d| d.contains("cyclic constant")));
}

#[test]
fn dyn_array_reads_are_bounds_checked_against_the_length() {
    let xs = || Type::DynArray(Box::new(Type::U256), 10);
    let module = Module {
        name: "arr".into(),
        storage: vec![storage_var("xs", xs())],
        functions: vec![func(
            "get",
            FunctionKind::External,
            vec![("i", Type::U256)],
            Some(Type::U256),
            vec![ret(index(sto("xs", xs()), var("i", Type::U256), Type::U256))],
        )],
        ..Default::default()
    };

    let dcx = DiagCtxt::new();
    let contract = krait::compile(&dcx, &module, &CompilerOpts::default()).unwrap();
    let rt = &contract.runtime_code;
    // The length lives at the base slot (SLOAD), elements behind KECCAK256,
    // and the failure path is Panic(0x32).
    assert!(rt.contains(&0x54));
    assert!(rt.contains(&0x20));
    assert!(find(rt, &[0x7f, 0x4e, 0x48, 0x7b, 0x71]).is_some());
}

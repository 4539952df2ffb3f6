//! External function signatures and selectors.

use alloy_primitives::keccak256;
use krait_ast::{Function, FunctionKind, Module, Type};
use krait_data_structures::map::FxHashMap;
use krait_interface::{DiagCtxt, DiagKind, ErrorGuaranteed};
use std::fmt::Write;

/// One externally callable function.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AbiFunction {
    pub name: String,
    /// Canonical signature, `name(ty1,ty2,...)`.
    pub signature: String,
    /// First four bytes of `keccak256(signature)`.
    pub selector: [u8; 4],
    pub inputs: Vec<Type>,
    pub outputs: Vec<Type>,
}

/// Builds the signature table over `module`'s external functions, in
/// declaration order. Selector collisions are fatal.
pub fn signature_table(
    dcx: &DiagCtxt,
    module: &Module,
) -> Result<Vec<AbiFunction>, ErrorGuaranteed> {
    let mut table = Vec::new();
    let mut seen: FxHashMap<[u8; 4], String> = FxHashMap::default();
    let mut guar = None;

    for func in &module.functions {
        if func.kind != FunctionKind::External {
            continue;
        }
        let abi = abi_function(module, func);
        match seen.insert(abi.selector, abi.signature.clone()) {
            None => table.push(abi),
            Some(prev) => {
                guar = Some(
                    dcx.err(
                        DiagKind::SelectorCollision,
                        format!(
                            "selector collision: `{}` and `{prev}` both hash to 0x{}",
                            abi.signature,
                            hex(abi.selector),
                        ),
                    )
                    .span(func.span)
                    .emit(),
                );
            }
        }
    }

    match guar {
        None => Ok(table),
        Some(guar) => Err(guar),
    }
}

fn abi_function(module: &Module, func: &Function) -> AbiFunction {
    let mut signature = func.name.name.clone();
    signature.push('(');
    for (i, param) in func.params.iter().enumerate() {
        if i > 0 {
            signature.push(',');
        }
        signature.push_str(&param.ty.abi_signature(&module.structs));
    }
    signature.push(')');

    let hash = keccak256(signature.as_bytes());
    let selector = [hash[0], hash[1], hash[2], hash[3]];
    AbiFunction {
        name: func.name.name.clone(),
        signature,
        selector,
        inputs: func.params.iter().map(|p| p.ty.clone()).collect(),
        outputs: func.ret.clone().into_iter().collect(),
    }
}

fn hex(bytes: [u8; 4]) -> String {
    let mut s = String::with_capacity(8);
    for b in bytes {
        let _ = write!(s, "{b:02x}");
    }
    s
}

#[cfg(test)]
mod tests {
    use super::*;
    use krait_ast::{Ident, Param};
    use krait_interface::Span;

    fn external(name: &str, params: Vec<Type>, ret: Option<Type>) -> Function {
        Function {
            name: Ident::new(name, Span::DUMMY),
            kind: FunctionKind::External,
            params: params
                .into_iter()
                .enumerate()
                .map(|(i, ty)| Param { name: Ident::new(format!("a{i}"), Span::DUMMY), ty })
                .collect(),
            ret,
            body: vec![],
            span: Span::DUMMY,
        }
    }

    #[test]
    fn known_selectors() {
        let module = Module {
            functions: vec![
                external("transfer", vec![Type::Address, Type::U256], Some(Type::Bool)),
                external("totalSupply", vec![], Some(Type::U256)),
            ],
            ..Default::default()
        };
        let dcx = DiagCtxt::new();
        let table = signature_table(&dcx, &module).unwrap();
        assert_eq!(table[0].signature, "transfer(address,uint256)");
        assert_eq!(table[0].selector, [0xa9, 0x05, 0x9c, 0xbb]);
        assert_eq!(table[1].signature, "totalSupply()");
        assert_eq!(table[1].selector, [0x18, 0x16, 0x0d, 0xdd]);
    }

    #[test]
    fn constructor_and_internal_are_not_dispatchable() {
        let mut ctor = external("__init__", vec![], None);
        ctor.kind = FunctionKind::Constructor;
        let mut helper = external("helper", vec![], None);
        helper.kind = FunctionKind::Internal;
        let module =
            Module { functions: vec![ctor, helper], ..Default::default() };
        let dcx = DiagCtxt::new();
        assert!(signature_table(&dcx, &module).unwrap().is_empty());
    }

    #[test]
    fn duplicate_selector_is_fatal() {
        let module = Module {
            functions: vec![
                external("ping", vec![], None),
                external("ping", vec![], None),
            ],
            ..Default::default()
        };
        let dcx = DiagCtxt::new();
        assert!(signature_table(&dcx, &module).is_err());
        assert_eq!(dcx.err_count(), 1);
    }
}

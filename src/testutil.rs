//! Shared helpers for constructing test modules.

use crate::ir::{
    Block, Const, FnTy, FuncId, Function, FunctionProps, GlobalId, GlobalVar, Inst, Linkage,
    Module, ResourceClass, ResourceDesc, ResourceKind, ResourceProps, ThreadLocalMode, Ty,
};
use crate::profile::ShaderKind;

pub(crate) const TRIPLE: &str = "dxil-ms-dx";

pub(crate) fn module(name: &str) -> Module {
    Module::new(name, TRIPLE)
}

pub(crate) fn declare(name: &str, ty: FnTy) -> Function {
    Function::new(name, ty, Linkage::External)
}

/// External definition with a single empty block; tests add the body.
pub(crate) fn define(name: &str, ty: FnTy) -> Function {
    let mut f = Function::new(name, ty, Linkage::External);
    f.blocks.push(Block::default());
    f
}

pub(crate) fn define_internal(name: &str, ty: FnTy) -> Function {
    let mut f = Function::new(name, ty, Linkage::Internal);
    f.blocks.push(Block::default());
    f
}

pub(crate) fn global(name: &str, ty: Ty, init: Option<Const>) -> GlobalVar {
    GlobalVar {
        name: name.to_string(),
        ty,
        is_const: false,
        linkage: Linkage::External,
        tls_mode: ThreadLocalMode::NotThreadLocal,
        addr_space: 0,
        externally_initialized: false,
        init,
    }
}

pub(crate) fn internal_global(name: &str, ty: Ty, init: Option<Const>) -> GlobalVar {
    let mut g = global(name, ty, init);
    g.linkage = Linkage::Internal;
    g
}

pub(crate) fn ret_void(m: &mut Module, f: FuncId) {
    m.function_mut(f).push_inst(0, Inst::Ret { value: None });
}

pub(crate) fn call_void(m: &mut Module, caller: FuncId, callee: FuncId) -> u32 {
    m.function_mut(caller).push_inst(
        0,
        Inst::Call {
            callee,
            args: vec![],
            ty: Ty::Void,
        },
    )
}

pub(crate) fn props(kind: ShaderKind) -> FunctionProps {
    FunctionProps {
        shader_kind: kind,
        patch_constant_func: None,
    }
}

pub(crate) fn srv(name: &str, symbol: GlobalId, symbol_ty: Ty) -> ResourceDesc {
    ResourceDesc {
        class: ResourceClass::Srv,
        name: name.to_string(),
        symbol,
        symbol_ty,
        id: 0,
        lower_bound: 0,
        range_size: 1,
        space: 0,
        props: ResourceProps::Srv {
            kind: ResourceKind::Texture2D,
        },
    }
}
